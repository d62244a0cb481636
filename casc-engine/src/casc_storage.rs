use crate::block_table::FrameDecoder;
use crate::casc_file_info::CascFileInfo;
use crate::casc_file_span::CascFileSpan;
use crate::casc_file_stream::CascFileStream;
use crate::casc_folder::CascFolder;
use crate::casc_key_mapping_table::LocalIndexHandler;
use crate::cdn_index::CdnIndexHandler;
use crate::download_handler::DownloadHandler;
use crate::encoding_handler::EncodingHandler;
use crate::error::{CascError, Result};
use crate::fetcher::CdnFetcher;
use crate::game_type::GameType;
use crate::index_access::IndexAccess;
use crate::install_handler::InstallHandler;
use crate::jenkins96::hash_path;
use crate::keys::{ContentKey, EncodingKey};
use crate::options::{CascOptions, LoadFlags};
use crate::progress::{BackgroundWorker, ProgressReporter};
use crate::root_handler::{RootFormat, RootHandler};
use crate::root_handlers::dummy_root_handler::DummyRootHandler;
use crate::root_handlers::text_root_handler::TextRootHandler;
use crate::root_handlers::tvfs_root_handler::TvfsRootHandler;
use crate::root_handlers::wow_root_handler::WowRootHandler;
use crate::span_info::VfsRootEntry;
use crate::storage_config::StorageConfig;
use crate::tact_keys::KeyStore;
use std::fmt;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, trace};

/// Where a storage is in its open sequence.
///
/// `Closed -> LoadingEncoding -> LoadingRoot -> [LoadingDownload] ->
/// [LoadingInstall] -> Ready`. A failing step aborts the open, so callers
/// only ever see `Ready` or, after [`CascStorage::clear`], `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Closed,
    LoadingEncoding,
    LoadingRoot,
    LoadingDownload,
    LoadingInstall,
    Ready,
}

/// What a name hash resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Resolved {
    /// A whole file stored under one content key.
    Content(ContentKey),
    /// Byte ranges of several blobs, concatenated in order.
    Chunks(Vec<VfsRootEntry>),
}

/// Represents an open CASC storage, local or online, providing access to
/// files and metadata.
///
/// `CascStorage` is the main entry point of the crate. It loads the build
/// configuration, the storage indexes, the encoding table and the root, and
/// then resolves names, hashes, FileDataIds and keys to file contents.
///
/// ```no_run
/// use casc_engine::casc_storage::CascStorage;
/// use casc_engine::options::CascOptions;
/// use std::fs::File;
///
/// let storage = CascStorage::open_local("path/to/game", None, CascOptions::default()).unwrap();
///
/// // Extract a file by name
/// if let Some(mut stream) = storage.open_file_by_name("some/file/in/storage.txt").unwrap() {
///     let mut output = File::create("output.txt").unwrap();
///     std::io::copy(&mut stream, &mut output).unwrap();
/// }
/// ```
///
/// # Thread Safety
///
/// Lookups and reads take `&self`. Opened data files and fetched blobs are
/// cached behind a mutex, so one storage can serve several threads. Each
/// returned [`CascFileStream`] has its own position and frame cache.
pub struct CascStorage {
    state: LoadState,
    options: CascOptions,
    config: StorageConfig,
    keys: Arc<KeyStore>,
    index: Option<IndexAccess>,
    encoding: Option<EncodingHandler>,
    root: Option<RootHandler>,
    install: Option<InstallHandler>,
    download: Option<DownloadHandler>,
}

impl fmt::Debug for CascStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CascStorage")
            .field("state", &self.state)
            .field("product", &self.config.product())
            .field("game", &self.config.game())
            .field("encoding_entries", &self.encoding.as_ref().map(EncodingHandler::len))
            .field("root", &self.root.as_ref().map(RootHandler::format))
            .field("install", &self.install.is_some())
            .field("download", &self.download.is_some())
            .finish()
    }
}

impl CascStorage {
    /// Opens a local installation. `product` picks a row of a multi-product
    /// `.build.info`.
    pub fn open_local<P: AsRef<Path>>(
        base_path: P,
        product: Option<&str>,
        options: CascOptions,
    ) -> Result<Self> {
        let config = StorageConfig::load_local(base_path, product, &options)?;
        Self::open(config, options, None, None)
    }

    /// Opens a local installation that may fetch missing blobs from the CDN
    /// when [`CascOptions::online_fallback`] is set.
    pub fn open_local_with_fetcher<P: AsRef<Path>>(
        base_path: P,
        product: Option<&str>,
        options: CascOptions,
        fetcher: Arc<dyn CdnFetcher>,
    ) -> Result<Self> {
        let config = StorageConfig::load_local(base_path, product, &options)?;
        Self::open(config, options, Some(fetcher), None)
    }

    /// Opens a product straight from the CDN.
    pub fn open_online(product: &str, options: CascOptions, fetcher: Arc<dyn CdnFetcher>) -> Result<Self> {
        let config = StorageConfig::load_online(product, &options, fetcher.as_ref())?;
        Self::open(config, options, Some(fetcher), None)
    }

    /// Opens a local installation on a worker thread. Cancelling the
    /// reporter's token stops the open at its next progress report.
    pub fn open_local_in_background(
        base_path: PathBuf,
        product: Option<String>,
        options: CascOptions,
        progress: ProgressReporter,
    ) -> BackgroundWorker<CascStorage> {
        BackgroundWorker::spawn(progress, move |progress| {
            progress.report(0, "Loading configuration")?;
            let config = StorageConfig::load_local(&base_path, product.as_deref(), &options)?;
            Self::open(config, options, None, Some(progress))
        })
    }

    /// Loads indexes, encoding, root and the optional manifests for `config`.
    pub fn open(
        config: StorageConfig,
        options: CascOptions,
        fetcher: Option<Arc<dyn CdnFetcher>>,
        progress: Option<&ProgressReporter>,
    ) -> Result<Self> {
        let index = Self::load_index(&config, &options, fetcher, progress)?;

        let mut storage = CascStorage {
            state: LoadState::Closed,
            options,
            config,
            keys: Arc::new(KeyStore::new()),
            index: Some(index),
            encoding: None,
            root: None,
            install: None,
            download: None,
        };

        let keys = Arc::clone(&storage.keys);
        let decoder = FrameDecoder::new(
            &keys,
            storage.options.throw_on_missing_decryption_key,
            storage.options.validate_data,
        );

        storage.enter(LoadState::LoadingEncoding, progress, 20)?;
        storage.load_encoding(&decoder)?;

        storage.enter(LoadState::LoadingRoot, progress, 40)?;
        storage.load_root(&decoder)?;

        if storage.options.load_flags.contains(LoadFlags::DOWNLOAD) {
            storage.enter(LoadState::LoadingDownload, progress, 60)?;
            let data = storage.read_manifest("download", &decoder)?;
            storage.download = Some(DownloadHandler::parse(&data)?);
        }

        if storage.options.load_flags.contains(LoadFlags::INSTALL) {
            storage.enter(LoadState::LoadingInstall, progress, 80)?;
            let data = storage.read_manifest("install", &decoder)?;
            storage.install = Some(InstallHandler::parse(&data)?);
        }

        storage.enter(LoadState::Ready, progress, 100)?;
        Ok(storage)
    }

    fn enter(&mut self, state: LoadState, progress: Option<&ProgressReporter>, percent: u8) -> Result<()> {
        if let Some(progress) = progress {
            progress.report(percent, &format!("{state:?}"))?;
        }
        info!("{:?} -> {state:?}", self.state);
        self.state = state;
        Ok(())
    }

    fn load_index(
        config: &StorageConfig,
        options: &CascOptions,
        fetcher: Option<Arc<dyn CdnFetcher>>,
        progress: Option<&ProgressReporter>,
    ) -> Result<IndexAccess> {
        if config.is_online() {
            let fetcher = fetcher.ok_or_else(|| {
                CascError::InvalidData("An online storage needs a CDN fetcher".to_string())
            })?;
            let cdn = CdnIndexHandler::load(
                config,
                fetcher.as_ref(),
                options.load_flags.contains(LoadFlags::FILE_INDEX),
                progress,
            )?;
            return Ok(IndexAccess::online(cdn, fetcher, options.validate_data));
        }

        let data_dir = config
            .data_path()
            .ok_or_else(|| CascError::InvalidData("Local storage without data path".to_string()))?
            .join("data");
        let local = LocalIndexHandler::load(&data_dir, progress)?;
        Ok(IndexAccess::local(
            local,
            data_dir,
            fetcher,
            options.online_fallback,
            options.validate_data,
        ))
    }

    fn load_encoding(&mut self, decoder: &FrameDecoder<'_>) -> Result<()> {
        let ekey = self.config.encoding_ekey()?;
        let data = self.index()?.read_decoded(&self.config, &ekey, decoder)?;
        self.encoding = Some(EncodingHandler::parse(&data)?);
        Ok(())
    }

    fn load_root(&mut self, decoder: &FrameDecoder<'_>) -> Result<()> {
        let format = RootFormat::select(
            self.config.game(),
            self.config.is_vfs_root(),
            self.config.product(),
        )?;
        debug!("Root format {format:?}");

        let root = match format {
            RootFormat::Tvfs => {
                let list = self.config.vfs_root_list()?;
                let (root_keys, mounts) = list
                    .split_first()
                    .ok_or_else(|| CascError::MissingConfigKey {
                        key: "vfs-root".to_string(),
                        config: self.config.product().to_string(),
                    })?;
                let mounts: Vec<EncodingKey> = mounts.iter().map(|k| k.ekey).collect();
                let index = self.index()?;
                let data = index.read_decoded(&self.config, &root_keys.ekey, decoder)?;
                RootHandler::Tvfs(TvfsRootHandler::load(&data, &mounts, &mut |ekey: &EncodingKey| {
                    index.read_decoded(&self.config, ekey, decoder)
                })?)
            }
            RootFormat::Legacy => {
                let data = self.read_by_ckey(&self.config.root_ckey()?, decoder)?;
                RootHandler::Legacy(WowRootHandler::parse(&data)?)
            }
            RootFormat::TitleSpecial => {
                let data = self.read_by_ckey(&self.config.root_ckey()?, decoder)?;
                RootHandler::TitleSpecial(TextRootHandler::parse(&data)?)
            }
            RootFormat::Dummy => RootHandler::Dummy(DummyRootHandler::new(self.config.game())),
        };

        info!("Loaded {:?} root with {} entries", root.format(), root.len());
        self.root = Some(root);
        Ok(())
    }

    /// Reads an install or download manifest, preferring the encoding key
    /// the build config lists next to its content key.
    fn read_manifest(&self, name: &str, decoder: &FrameDecoder<'_>) -> Result<Vec<u8>> {
        if let Some(ekey) = self.config.manifest_ekey(name) {
            return self.index()?.read_decoded(&self.config, &ekey, decoder);
        }
        let ckey = match name {
            "install" => self.config.install_ckey()?,
            _ => self.config.download_ckey()?,
        };
        self.read_by_ckey(&ckey, decoder)
    }

    fn read_by_ckey(&self, ckey: &ContentKey, decoder: &FrameDecoder<'_>) -> Result<Vec<u8>> {
        let ekey = self
            .encoding_table()?
            .try_get_best_ekey(ckey)
            .ok_or_else(|| CascError::FileNotFound(format!("Content key {ckey}")))?;
        self.index()?.read_decoded(&self.config, &ekey, decoder)
    }

    fn index(&self) -> Result<&IndexAccess> {
        self.index.as_ref().ok_or(CascError::NotReady(self.state))
    }

    fn encoding_table(&self) -> Result<&EncodingHandler> {
        self.encoding.as_ref().ok_or(CascError::NotReady(self.state))
    }

    fn ready(&self) -> Result<()> {
        match self.state {
            LoadState::Ready => Ok(()),
            state => Err(CascError::NotReady(state)),
        }
    }

    fn decoder(&self) -> FrameDecoder<'_> {
        FrameDecoder::new(
            &self.keys,
            self.options.throw_on_missing_decryption_key,
            self.options.validate_data,
        )
    }

    /// Applies the not-found policy: an error when strict, `fallback` when tolerant.
    fn not_found<T>(&self, what: String, fallback: T) -> Result<T> {
        if self.options.throw_on_file_not_found {
            Err(CascError::FileNotFound(what))
        } else {
            trace!("Not found: {what}");
            Ok(fallback)
        }
    }

    pub fn state(&self) -> LoadState {
        self.state
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn options(&self) -> &CascOptions {
        &self.options
    }

    pub fn game(&self) -> GameType {
        self.config.game()
    }

    pub fn encoding(&self) -> Result<&EncodingHandler> {
        self.ready()?;
        self.encoding_table()
    }

    pub fn root(&self) -> Result<&RootHandler> {
        self.ready()?;
        self.root.as_ref().ok_or(CascError::NotReady(self.state))
    }

    pub fn install(&self) -> Option<&InstallHandler> {
        self.install.as_ref()
    }

    pub fn download(&self) -> Option<&DownloadHandler> {
        self.download.as_ref()
    }

    /// Decryption keys used for encrypted frames. Keys added here apply to
    /// every stream opened afterwards.
    pub fn keys(&self) -> &Arc<KeyStore> {
        &self.keys
    }

    /// Resolves a name hash through the root, then the install manifest.
    fn resolve(&self, hash: u64) -> Result<Option<Resolved>> {
        let root = self.root()?;

        if let Some(chunks) = root.get_vfs_entries(hash) {
            return Ok(Some(Resolved::Chunks(chunks.to_vec())));
        }

        let locale = self.options.locale;
        let from_root = root
            .get_entries(hash, locale)
            .first()
            .map(|e| e.ckey)
            .or_else(|| root.get_all_entries(hash).first().map(|e| e.ckey));
        if let Some(ckey) = from_root {
            return Ok(Some(Resolved::Content(ckey)));
        }

        let from_install = self
            .install
            .as_ref()
            .and_then(|install| install.get_best_entry(hash, locale))
            .map(|e| e.ckey);
        if let Some(ckey) = &from_install {
            debug!("{hash:016X} resolved to {ckey} through the install manifest");
        }
        Ok(from_install.map(Resolved::Content))
    }

    pub fn file_exists_by_name(&self, name: &str) -> Result<bool> {
        self.file_exists_by_hash(hash_path(name))
    }

    pub fn file_exists_by_hash(&self, hash: u64) -> Result<bool> {
        match self.resolve(hash)? {
            Some(_) => Ok(true),
            None => self.not_found(format!("Hash {hash:016X}"), false),
        }
    }

    pub fn file_exists_by_file_data_id(&self, file_data_id: u32) -> Result<bool> {
        if self.root()?.file_exists_by_file_data_id(file_data_id) {
            Ok(true)
        } else {
            self.not_found(format!("FileDataId {file_data_id}"), false)
        }
    }

    pub fn get_file_size_by_name(&self, name: &str) -> Result<u64> {
        self.get_file_size_by_hash(hash_path(name))
    }

    /// Decoded size of a file; chunked files report the sum of their chunks.
    pub fn get_file_size_by_hash(&self, hash: u64) -> Result<u64> {
        let size = match self.resolve(hash)? {
            Some(Resolved::Chunks(chunks)) => Some(chunks.iter().map(|c| c.content_length).sum()),
            Some(Resolved::Content(ckey)) => self.encoding_table()?.get_size(&ckey),
            None => None,
        };
        match size {
            Some(size) => Ok(size),
            None => self.not_found(format!("Hash {hash:016X}"), 0),
        }
    }

    pub fn open_file_by_name(&self, name: &str) -> Result<Option<CascFileStream>> {
        self.open_file_by_hash(hash_path(name))
    }

    pub fn open_file_by_hash(&self, hash: u64) -> Result<Option<CascFileStream>> {
        match self.resolve(hash)? {
            Some(Resolved::Chunks(chunks)) => match self.open_chunks(&chunks) {
                Ok(stream) => Ok(Some(stream)),
                Err(CascError::FileNotFound(what)) => self.not_found(what, None),
                Err(err) => Err(err),
            },
            Some(Resolved::Content(ckey)) => self.open_file_by_ckey(&ckey),
            None => self.not_found(format!("Hash {hash:016X}"), None),
        }
    }

    pub fn open_file_by_file_data_id(&self, file_data_id: u32) -> Result<Option<CascFileStream>> {
        match self.root()?.get_hash_by_file_data_id(file_data_id) {
            Some(hash) => self.open_file_by_hash(hash),
            None => self.not_found(format!("FileDataId {file_data_id}"), None),
        }
    }

    pub fn open_file_by_ckey(&self, ckey: &ContentKey) -> Result<Option<CascFileStream>> {
        match self.encoding()?.try_get_best_ekey(ckey) {
            Some(ekey) => self.open_file_by_ekey(&ekey),
            None => self.not_found(format!("Content key {ckey}"), None),
        }
    }

    pub fn open_file_by_ekey(&self, ekey: &EncodingKey) -> Result<Option<CascFileStream>> {
        self.ready()?;
        let span = match self.open_span(ekey, 0, None) {
            Ok(span) => span,
            Err(CascError::FileNotFound(what)) => return self.not_found(what, None),
            Err(err) => return Err(err),
        };
        Ok(Some(self.stream(vec![span])))
    }

    fn open_span(&self, ekey: &EncodingKey, virtual_start: u64, range: Option<(u64, u64)>) -> Result<CascFileSpan> {
        self.index()?
            .open_span(&self.config, ekey, virtual_start, range, &self.decoder())
    }

    fn open_chunks(&self, chunks: &[VfsRootEntry]) -> Result<CascFileStream> {
        let mut spans = Vec::with_capacity(chunks.len());
        let mut virtual_offset = 0u64;
        for chunk in chunks {
            let span = self.open_span(
                &chunk.ekey,
                virtual_offset,
                Some((chunk.content_offset, chunk.content_length)),
            )?;
            virtual_offset += span.len();
            spans.push(span);
        }
        Ok(self.stream(spans))
    }

    fn stream(&self, spans: Vec<CascFileSpan>) -> CascFileStream {
        CascFileStream::new(
            spans,
            Arc::clone(&self.keys),
            self.options.throw_on_missing_decryption_key,
            self.options.validate_data,
        )
    }

    pub fn save_file_by_name_to<P: AsRef<Path>>(&self, name: &str, path: P) -> Result<bool> {
        self.save_file_to(hash_path(name), path)
    }

    /// Writes a file to `path`, decoding one chunk at a time. Returns `false`
    /// when the file is unknown and the not-found policy is tolerant.
    pub fn save_file_to<P: AsRef<Path>>(&self, hash: u64, path: P) -> Result<bool> {
        // (encoding key, decoded byte range) of every chunk, in file order
        let parts: Vec<(EncodingKey, Option<(u64, u64)>)> = match self.resolve(hash)? {
            Some(Resolved::Chunks(chunks)) => chunks
                .iter()
                .map(|c| (c.ekey, Some((c.content_offset, c.content_length))))
                .collect(),
            Some(Resolved::Content(ckey)) => match self.encoding_table()?.try_get_best_ekey(&ckey) {
                Some(ekey) => vec![(ekey, None)],
                None => return self.not_found(format!("Content key {ckey}"), false),
            },
            None => return self.not_found(format!("Hash {hash:016X}"), false),
        };

        // every blob is located before the output file is created
        let mut spans = Vec::with_capacity(parts.len());
        let mut virtual_offset = 0u64;
        for (ekey, range) in parts {
            let span = match self.open_span(&ekey, virtual_offset, range) {
                Ok(span) => span,
                Err(CascError::FileNotFound(what)) => return self.not_found(what, false),
                Err(err) => return Err(err),
            };
            virtual_offset += span.len();
            spans.push(span);
        }

        let mut writer = BufWriter::new(File::create(path.as_ref())?);
        let decoder = self.decoder();
        let mut written = 0u64;
        for span in &spans {
            written += span.write_to(&mut writer, &decoder)?;
        }
        writer.flush()?;
        debug!("Saved {written} bytes to {}", path.as_ref().display());
        Ok(true)
    }

    /// Names FileDataIds from a `fid;path` listfile on disk.
    pub fn load_listfile<P: AsRef<Path>>(&mut self, path: P) -> Result<usize> {
        self.ready()?;
        let reader = BufReader::new(File::open(path.as_ref())?);
        match self.root.as_mut() {
            Some(root) => root.load_listfile(reader),
            None => Err(CascError::NotReady(self.state)),
        }
    }

    /// Every name the root and the install manifest know, as a folder tree.
    pub fn folder_tree(&self) -> Result<CascFolder> {
        let mut tree = CascFolder::from_paths(self.root()?.names());
        if let Some(install) = &self.install {
            for entry in install.get_entries() {
                tree.add_path(&entry.name);
            }
        }
        Ok(tree)
    }

    /// Name, size and availability of every named file of the root.
    pub fn files(&self) -> Result<Vec<CascFileInfo>> {
        let root = self.root()?;
        let index = self.index()?;
        let encoding = self.encoding_table()?;

        let mut files: Vec<CascFileInfo> = root
            .names()
            .into_iter()
            .map(|name| -> Result<CascFileInfo> {
                let hash = hash_path(name);
                let (file_size, is_local) = match self.resolve(hash)? {
                    Some(Resolved::Chunks(chunks)) => (
                        chunks.iter().map(|c| c.content_length).sum(),
                        chunks.iter().all(|c| index.contains(&c.ekey)),
                    ),
                    Some(Resolved::Content(ckey)) => (
                        encoding.get_size(&ckey).unwrap_or(0),
                        encoding
                            .try_get_best_ekey(&ckey)
                            .is_some_and(|ekey| index.contains(&ekey)),
                    ),
                    None => (0, false),
                };
                Ok(CascFileInfo {
                    file_name: name.to_string(),
                    hash,
                    file_size,
                    is_local,
                })
            })
            .collect::<Result<_>>()?;
        files.sort_by(|a, b| a.file_name.cmp(&b.file_name));
        Ok(files)
    }

    /// Releases every cached data file and blob and drops all tables.
    /// Safe to call more than once.
    pub fn clear(&mut self) {
        if let Some(index) = &self.index {
            index.clear();
        }
        self.index = None;
        self.encoding = None;
        self.root = None;
        self.install = None;
        self.download = None;
        if self.state != LoadState::Closed {
            info!("{:?} -> {:?}", self.state, LoadState::Closed);
        }
        self.state = LoadState::Closed;
    }

    /// Number of data file handles and CDN blobs currently cached.
    pub fn cached_handles(&self) -> usize {
        self.index.as_ref().map_or(0, IndexAccess::cached_handles)
    }
}

impl Drop for CascStorage {
    fn drop(&mut self) {
        self.clear();
    }
}
