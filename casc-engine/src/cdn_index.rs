//! CDN archive indexes (`<archive>.index`), locating encoding keys inside
//! the archive blobs served by the CDN.

use crate::error::{CascError, Result};
use crate::fetcher::{self, CdnFetcher};
use crate::keys::{EncodingKey, KEY_LENGTH};
use crate::progress::ProgressReporter;
use crate::storage_config::StorageConfig;
use std::collections::HashMap;
use tracing::{debug, info};

const FOOTER_SIZE: usize = 20;

/// Where an encoding key lives on the CDN.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CdnIndexEntry {
    /// Position of the archive in the CDN config's `archives` list.
    pub archive_index: usize,
    pub offset: u32,
    pub size: u32,
}

/// The fixed footer closing every `.index` file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CdnIndexFooter {
    pub version: u8,
    pub block_size_kb: u8,
    /// 0 for a file index of loose blobs.
    pub offset_bytes: u8,
    pub size_bytes: u8,
    pub key_size: u8,
    pub hash_size: u8,
    pub element_count: u32,
}

impl CdnIndexFooter {
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < FOOTER_SIZE {
            return Err(CascError::InvalidData(format!(
                "CDN index of {} bytes has no footer",
                data.len()
            )));
        }
        let footer = &data[data.len() - FOOTER_SIZE..];
        let parsed = Self {
            version: footer[0],
            block_size_kb: footer[3],
            offset_bytes: footer[4],
            size_bytes: footer[5],
            key_size: footer[6],
            hash_size: footer[7],
            element_count: u32::from_le_bytes([footer[8], footer[9], footer[10], footer[11]]),
        };

        if parsed.version != 1 {
            return Err(CascError::BadVersion {
                what: "CDN index",
                version: parsed.version as u32,
            });
        }
        if parsed.block_size_kb == 0
            || parsed.key_size as usize != KEY_LENGTH
            || parsed.size_bytes != 4
            || !matches!(parsed.offset_bytes, 0 | 4)
        {
            return Err(CascError::InvalidData(format!(
                "Unsupported CDN index layout {parsed:?}"
            )));
        }
        Ok(parsed)
    }

    fn entry_size(&self) -> usize {
        (self.key_size + self.size_bytes + self.offset_bytes) as usize
    }
}

/// Parses one index, calling `add(ekey, size, offset)` for every entry.
///
/// Entries never straddle a block; a zero key pads the rest of its block.
fn parse_index<F>(data: &[u8], mut add: F) -> Result<CdnIndexFooter>
where
    F: FnMut(EncodingKey, u32, u32),
{
    let footer = CdnIndexFooter::parse(data)?;
    let block_size = footer.block_size_kb as usize * 1024;
    let entry_size = footer.entry_size();
    let end = data.len() - FOOTER_SIZE;

    let mut pos = 0usize;
    let mut read = 0u32;
    while read < footer.element_count && pos + entry_size <= end {
        let block_remaining = block_size - pos % block_size;
        if block_remaining < entry_size {
            pos += block_remaining;
            continue;
        }

        let key = EncodingKey::from_slice(&data[pos..pos + KEY_LENGTH])?;
        if key.is_zero() {
            pos += block_remaining;
            continue;
        }
        let field = |at: usize| u32::from_be_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]]);
        let size = field(pos + KEY_LENGTH);
        let offset = if footer.offset_bytes == 4 {
            field(pos + KEY_LENGTH + 4)
        } else {
            0
        };
        add(key, size, offset);
        pos += entry_size;
        read += 1;
    }

    if read != footer.element_count {
        return Err(CascError::InvalidData(format!(
            "CDN index declares {} entries, found {read}",
            footer.element_count
        )));
    }
    Ok(footer)
}

/// Every archive index and the optional file index of an online build.
#[derive(Debug, Default)]
pub struct CdnIndexHandler {
    archives: Vec<String>,
    entries: HashMap<EncodingKey, CdnIndexEntry>,
    file_index: HashMap<EncodingKey, u32>,
}

impl CdnIndexHandler {
    /// Fetches every archive index listed by the CDN config and, if asked,
    /// the file index. A failing archive index aborts the load.
    pub fn load(
        config: &StorageConfig,
        fetcher: &dyn CdnFetcher,
        load_file_index: bool,
        progress: Option<&ProgressReporter>,
    ) -> Result<Self> {
        let mut handler = CdnIndexHandler {
            archives: config.archives().to_vec(),
            ..Default::default()
        };

        let archives = handler.archives.clone();
        for (archive_index, archive) in archives.iter().enumerate() {
            if let Some(progress) = progress {
                progress.report(
                    (archive_index * 100 / archives.len().max(1)) as u8,
                    "Loading CDN indexes",
                )?;
            }
            let data = Self::fetch_index(config, fetcher, archive)?;
            handler.add_archive_index(&data, archive_index)?;
        }

        if load_file_index {
            if let Some(file_index) = config.file_index() {
                let data = Self::fetch_index(config, fetcher, file_index)?;
                handler.add_file_index(&data)?;
            }
        }

        info!(
            "Loaded {} archive index entries from {} archives, {} file index entries",
            handler.entries.len(),
            handler.archives.len(),
            handler.file_index.len()
        );
        Ok(handler)
    }

    fn fetch_index(config: &StorageConfig, fetcher: &dyn CdnFetcher, key: &str) -> Result<Vec<u8>> {
        let host = config.cdn_host().ok_or_else(|| CascError::MissingConfigKey {
            key: "CDN Hosts".to_string(),
            config: config.product().to_string(),
        })?;
        let url = fetcher::data_url(host, config.cdn_path(), key, ".index")?;
        debug!("Fetching {url}");
        Ok(fetcher.fetch(&url, None)?)
    }

    /// Adds the entries of the index of `archives[archive_index]`. First entry wins.
    pub fn add_archive_index(&mut self, data: &[u8], archive_index: usize) -> Result<()> {
        let entries = &mut self.entries;
        parse_index(data, |key, size, offset| {
            entries.entry(key).or_insert(CdnIndexEntry {
                archive_index,
                offset,
                size,
            });
        })?;
        Ok(())
    }

    pub fn add_file_index(&mut self, data: &[u8]) -> Result<()> {
        let file_index = &mut self.file_index;
        parse_index(data, |key, size, _| {
            file_index.entry(key).or_insert(size);
        })?;
        Ok(())
    }

    pub fn get(&self, ekey: &EncodingKey) -> Option<&CdnIndexEntry> {
        self.entries.get(ekey)
    }

    /// Size of a loose blob listed by the file index.
    pub fn get_file_index(&self, ekey: &EncodingKey) -> Option<u32> {
        self.file_index.get(ekey).copied()
    }

    pub fn archive_key(&self, archive_index: usize) -> Option<&str> {
        self.archives.get(archive_index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
