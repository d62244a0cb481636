use crate::casc_storage::LoadState;
use thiserror::Error;

/// Represents all possible errors that can occur in the CASC library.
///
/// Every fatal condition carries a human-readable reason and the identifier
/// (product, key, path or URL) responsible for it.
#[derive(Error, Debug)]
pub enum CascError {
    /// An error that occurs during I/O operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A file, key or remote resource is not present.
    #[error("File not found: {0}")]
    FileNotFound(String),

    /// The data in a file is invalid.
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// A binary structure started with the wrong signature.
    #[error("Bad magic in {what}: found {found:#010x}")]
    BadMagic { what: &'static str, found: u32 },

    /// A binary structure has a version this crate does not read.
    #[error("Unsupported {what} version {version}")]
    BadVersion { what: &'static str, version: u32 },

    /// A required key is missing from a manifest.
    #[error("Missing key '{key}' in {config}")]
    MissingConfigKey { key: String, config: String },

    /// A manifest line could not be parsed.
    #[error("Parse error in {origin} at line {line}: {reason}")]
    Parse {
        origin: String,
        line: usize,
        reason: String,
    },

    /// A bar-table row does not have as many cells as the header.
    #[error("Row length mismatch in {origin} at line {line}: header has {expected} columns, row has {found}")]
    HeaderMismatch {
        origin: String,
        line: usize,
        expected: usize,
        found: usize,
    },

    /// The product has no known root format.
    #[error("No root handler for product '{product}'")]
    UnknownRootFormat { product: String },

    /// An encrypted frame references a key that is not in the key store.
    #[error("Decryption key {0:016X} not found")]
    MissingDecryptionKey(u64),

    /// A BLTE frame uses an encoding mode this crate cannot decode.
    #[error("Unsupported BLTE frame encoding {0:#04x}")]
    UnsupportedEncoding(u8),

    /// Stored data does not match its checksum.
    #[error("Checksum mismatch: {0}")]
    ChecksumMismatch(String),

    /// The CDN transport failed for a reason other than "not found".
    #[error("Transport error fetching {url}: {reason}")]
    Transport { url: String, reason: String },

    /// The storage has been cleared or was never fully opened.
    #[error("Storage is not ready (state: {0:?})")]
    NotReady(LoadState),

    /// A cancellation was requested through a progress reporter.
    #[error("Operation cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, CascError>;

impl From<CascError> for std::io::Error {
    fn from(error: CascError) -> Self {
        match error {
            CascError::Io(err) => err,
            other => std::io::Error::other(other),
        }
    }
}
