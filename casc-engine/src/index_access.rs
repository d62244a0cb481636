//! Resolves encoding keys to the bytes backing them, local or remote.
//!
//! Local storages look keys up in the `.idx` tables and read `data.NNN`
//! files; online storages use the CDN archive indexes, then the file index,
//! then the loose blob path. Opened data files and fetched blobs are cached
//! until [`IndexAccess::clear`].

use crate::block_table::FrameDecoder;
use crate::casc_file_span::{CascFileSpan, SpanSource};
use crate::casc_key_mapping_table::LocalIndexHandler;
use crate::casc_span_header::CascSpanHeader;
use crate::cdn_index::CdnIndexHandler;
use crate::error::{CascError, Result};
use crate::fetcher::{self, CdnFetcher};
use crate::keys::EncodingKey;
use crate::storage_config::StorageConfig;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, trace};

pub struct IndexAccess {
    local: Option<LocalIndexHandler>,
    cdn: Option<CdnIndexHandler>,
    /// `<base>/<data folder>/data` of a local storage.
    data_dir: Option<PathBuf>,
    fetcher: Option<Arc<dyn CdnFetcher>>,
    online_fallback: bool,
    validate: bool,
    local_files: Mutex<HashMap<u32, Arc<Mutex<File>>>>,
    cdn_blobs: Mutex<HashMap<EncodingKey, Arc<Vec<u8>>>>,
}

impl fmt::Debug for IndexAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexAccess")
            .field("local_entries", &self.local.as_ref().map(LocalIndexHandler::len))
            .field("cdn_entries", &self.cdn.as_ref().map(CdnIndexHandler::len))
            .field("data_dir", &self.data_dir)
            .field("has_fetcher", &self.fetcher.is_some())
            .field("online_fallback", &self.online_fallback)
            .finish()
    }
}

impl IndexAccess {
    pub fn local(
        local: LocalIndexHandler,
        data_dir: PathBuf,
        fetcher: Option<Arc<dyn CdnFetcher>>,
        online_fallback: bool,
        validate: bool,
    ) -> Self {
        Self {
            local: Some(local),
            cdn: None,
            data_dir: Some(data_dir),
            fetcher,
            online_fallback,
            validate,
            local_files: Mutex::new(HashMap::new()),
            cdn_blobs: Mutex::new(HashMap::new()),
        }
    }

    pub fn online(cdn: CdnIndexHandler, fetcher: Arc<dyn CdnFetcher>, validate: bool) -> Self {
        Self {
            local: None,
            cdn: Some(cdn),
            data_dir: None,
            fetcher: Some(fetcher),
            online_fallback: true,
            validate,
            local_files: Mutex::new(HashMap::new()),
            cdn_blobs: Mutex::new(HashMap::new()),
        }
    }

    pub fn local_index(&self) -> Option<&LocalIndexHandler> {
        self.local.as_ref()
    }

    pub fn cdn_index(&self) -> Option<&CdnIndexHandler> {
        self.cdn.as_ref()
    }

    fn may_fetch(&self) -> bool {
        self.fetcher.is_some() && (self.cdn.is_some() || self.online_fallback)
    }

    /// Whether the key is known to an index. Keys that would only be tried
    /// on the loose CDN path are not reported.
    pub fn contains(&self, ekey: &EncodingKey) -> bool {
        self.local.as_ref().is_some_and(|l| l.contains(ekey))
            || self.cdn.as_ref().is_some_and(|c| {
                c.get(ekey).is_some() || c.get_file_index(ekey).is_some()
            })
            || self.cdn_blobs.lock().contains_key(ekey)
    }

    /// Opens the blob of `ekey` as a span starting at `virtual_start` of a file.
    pub(crate) fn open_span(
        &self,
        config: &StorageConfig,
        ekey: &EncodingKey,
        virtual_start: u64,
        range: Option<(u64, u64)>,
        decoder: &FrameDecoder<'_>,
    ) -> Result<CascFileSpan> {
        if let Some(entry) = self.local.as_ref().and_then(|l| l.get(ekey)) {
            let file = self.local_file(entry.archive_index)?;
            let source = SpanSource::Local(file);
            if self.validate {
                let raw = source.read_at(entry.offset, CascSpanHeader::SIZE as usize)?;
                CascSpanHeader::read(&mut Cursor::new(raw))?.validate(ekey, entry.size)?;
            }
            let blob_length = (entry.size as u64).saturating_sub(CascSpanHeader::SIZE);
            return CascFileSpan::new(
                source,
                entry.offset + CascSpanHeader::SIZE,
                blob_length,
                virtual_start,
                range,
                decoder,
            );
        }

        if self.may_fetch() {
            let blob = self.cdn_blob(config, ekey)?;
            let length = blob.len() as u64;
            return CascFileSpan::new(SpanSource::Memory(blob), 0, length, virtual_start, range, decoder);
        }

        Err(CascError::FileNotFound(format!("Encoding key {ekey}")))
    }

    /// Reads and decodes the whole blob of `ekey`.
    pub(crate) fn read_decoded(
        &self,
        config: &StorageConfig,
        ekey: &EncodingKey,
        decoder: &FrameDecoder<'_>,
    ) -> Result<Vec<u8>> {
        let span = self.open_span(config, ekey, 0, None, decoder)?;
        let mut data = Vec::with_capacity(span.len() as usize);
        span.write_to(&mut data, decoder)?;
        Ok(data)
    }

    fn local_file(&self, archive_index: u32) -> Result<Arc<Mutex<File>>> {
        let mut files = self.local_files.lock();
        if let Some(file) = files.get(&archive_index) {
            return Ok(Arc::clone(file));
        }
        let data_dir = self
            .data_dir
            .as_ref()
            .ok_or_else(|| CascError::InvalidData("No local data directory".to_string()))?;
        let path = data_dir.join(format!("data.{archive_index:03}"));
        let file = File::open(&path)
            .map_err(|_| CascError::FileNotFound(path.display().to_string()))?;
        debug!("Opened {}", path.display());
        let file = Arc::new(Mutex::new(file));
        files.insert(archive_index, Arc::clone(&file));
        Ok(file)
    }

    fn cdn_blob(&self, config: &StorageConfig, ekey: &EncodingKey) -> Result<Arc<Vec<u8>>> {
        if let Some(blob) = self.cdn_blobs.lock().get(ekey) {
            return Ok(Arc::clone(blob));
        }

        let fetcher = self
            .fetcher
            .as_ref()
            .ok_or_else(|| CascError::FileNotFound(format!("Encoding key {ekey}")))?;
        let host = config.cdn_host().ok_or_else(|| CascError::MissingConfigKey {
            key: "CDN Hosts".to_string(),
            config: config.product().to_string(),
        })?;

        let archived = self.cdn.as_ref().and_then(|c| {
            let entry = c.get(ekey)?;
            Some((c.archive_key(entry.archive_index)?.to_string(), *entry))
        });

        let data = match archived {
            Some((archive, entry)) => {
                let url = fetcher::data_url(host, config.cdn_path(), &archive, "")?;
                let start = entry.offset as u64;
                trace!("Fetching {ekey} from {url} at {start}+{}", entry.size);
                fetcher.fetch(&url, Some(start..start + entry.size as u64))?
            }
            None => {
                // File index and loose blobs share the same path
                let url = fetcher::data_url(host, config.cdn_path(), &ekey.to_hex(), "")?;
                trace!("Fetching loose {url}");
                fetcher.fetch(&url, None)?
            }
        };

        let blob = Arc::new(data);
        Ok(Arc::clone(
            self.cdn_blobs.lock().entry(*ekey).or_insert(blob),
        ))
    }

    /// Drops every cached data file handle and fetched blob. Idempotent.
    pub fn clear(&self) {
        self.local_files.lock().clear();
        self.cdn_blobs.lock().clear();
    }

    pub(crate) fn cached_handles(&self) -> usize {
        self.local_files.lock().len() + self.cdn_blobs.lock().len()
    }
}
