//! # casc-engine
//!
//! `casc-engine` is a pure Rust implementation of a storage handler for Blizzard's CASC format.
//! It opens local game installations or products served by a CDN, resolves file names,
//! FileDataIds and content keys to stored blobs, and streams their decoded contents.
//!
//! ## Features
//! - Local storages (`.build.info`, `.idx` indexes, `data.NNN` archives)
//! - Online storages through a caller-supplied [`CdnFetcher`](fetcher::CdnFetcher)
//! - TVFS, World of Warcraft and text roots, install and download manifests
//! - BLTE frames: raw, zlib and Salsa20 encrypted
//! - Strict or tolerant handling of missing files and decryption keys
//!
//! ## Usage
//! Add to your `Cargo.toml`:
//! ```toml
//! [dependencies]
//! casc-engine = "0.1"
//! ```
//!
//! ### Example: Listing and Extracting Files
//! ```no_run
//! use casc_engine::casc_storage::CascStorage;
//! use casc_engine::options::CascOptions;
//! use std::fs::File;
//!
//! // Open a CASC storage directory (containing .build.info and the data folder)
//! let storage = CascStorage::open_local("path/to/casc/storage", None, CascOptions::default()).unwrap();
//!
//! // List all named files
//! for file_info in storage.files().unwrap() {
//!     println!("File: {} ({} bytes)", file_info.file_name, file_info.file_size);
//! }
//!
//! // Extract a file by name
//! if let Some(mut casc_stream) = storage.open_file_by_name("some/file/in/storage.txt").unwrap() {
//!     let mut output = File::create("output.txt").unwrap();
//!     std::io::copy(&mut casc_stream, &mut output).unwrap();
//! }
//! ```

pub mod block_table;
pub mod casc_build_info;
pub mod casc_config;
mod casc_file_frame;
pub mod casc_file_info;
mod casc_file_span;
pub mod casc_file_stream;
pub mod casc_folder;
pub mod casc_key_mapping_table;
mod casc_span_header;
pub mod casc_storage;
pub mod cdn_index;
pub mod download_handler;
pub mod encoding_handler;
pub mod entry;
pub mod error;
pub mod ext;
pub mod fetcher;
pub mod game_type;
pub mod index_access;
pub mod install_handler;
pub mod jenkins96;
pub mod keys;
pub mod locale_flags;
pub mod options;
pub mod path_table_node_flags;
pub mod progress;
pub mod root_handler;
pub mod root_handlers;
pub mod span_info;
pub mod storage_config;
pub mod tact_keys;
pub mod utility;

pub use casc_file_stream::CascFileStream;
pub use casc_storage::{CascStorage, LoadState};
pub use error::{CascError, Result};
pub use fetcher::{CdnFetcher, FetchError};
pub use keys::{ContentKey, EncodingKey};
pub use options::{CascOptions, LoadFlags};
