//! Build and CDN configuration of one storage session.
//!
//! A [`StorageConfig`] is assembled either from a local installation
//! (`.build.info` plus config files under `<data folder>/config`) or from the
//! online patch service (`versions`, `cdns` and configs fetched from the CDN).

use crate::casc_build_info::CascBuildInfo;
use crate::casc_config::CascConfig;
use crate::error::{CascError, Result};
use crate::fetcher::{self, CdnFetcher};
use crate::game_type::GameType;
use crate::keys::{hex_path, ContentKey, EncodingKey};
use crate::options::CascOptions;
use crate::utility::dsv_file::{BarRow, BarTable};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info, trace, warn};

const FAKE_CDN_CONFIG: &str = "fakecdnconfig";
const FAKE_CDN_CONFIG_HASH: &str = "fakecdnconfighash";
const FAKE_BUILD_CONFIG: &str = "fakebuildconfig";
const FAKE_BUILD_CONFIG_HASH: &str = "fakebuildconfighash";

/// Where the storage data lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageMode {
    Local {
        base_path: PathBuf,
        data_folder: &'static str,
    },
    Online,
}

/// One content/encoding key pair naming a virtual file system root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VfsRootKeys {
    /// `0` for `vfs-root`, `n` for `vfs-n`.
    pub index: u32,
    pub ckey: ContentKey,
    pub ekey: EncodingKey,
}

/// A build config together with the key it was loaded from.
#[derive(Debug, Clone)]
pub struct BuildConfig {
    pub key: String,
    pub config: CascConfig,
}

/// A debugging override read from the override directory.
enum Override {
    Literal(CascConfig),
    Key(String),
}

#[derive(Debug)]
pub struct StorageConfig {
    mode: StorageMode,
    region: String,
    product: String,
    game: GameType,
    version_name: Option<String>,
    /// Build config key the installation or the versions manifest names as current.
    current_build_key: Option<String>,
    cdn_config: CascConfig,
    builds: Vec<BuildConfig>,
    active_build: usize,
    cdn_hosts: Vec<String>,
    cdn_path: String,
    // Updated with a separate load and store: concurrent callers may be
    // handed the same host. Host choice only spreads load.
    host_index: AtomicUsize,
}

impl StorageConfig {
    /// Loads the configuration of a local installation.
    ///
    /// `product` picks a row of a multi-product `.build.info`.
    pub fn load_local<P: AsRef<Path>>(
        base_path: P,
        product: Option<&str>,
        options: &CascOptions,
    ) -> Result<Self> {
        let base_path = base_path.as_ref().to_path_buf();
        let build_info = CascBuildInfo::from_root(&base_path)?;
        let row = build_info.select_row(product)?;

        let build_key = required_cell(row, "Build Key")?;
        let cdn_key = required_cell(row, "CDN Key")?;

        let row_product = if build_info.has_product_column() {
            row.get_non_empty("Product").map(str::to_string)
        } else {
            None
        };

        let mut game = match &row_product {
            Some(product) => GameType::from_uid(product),
            None => GameType::detect_local(&base_path, None),
        };
        let data_folder = game.data_folder();
        let config_root = base_path.join(data_folder).join("config");

        let build = match load_override(options, FAKE_BUILD_CONFIG, FAKE_BUILD_CONFIG_HASH)? {
            Some(Override::Literal(config)) => BuildConfig {
                key: FAKE_BUILD_CONFIG.to_string(),
                config,
            },
            Some(Override::Key(key)) => read_local_config(&config_root, &key)?,
            None => read_local_config(&config_root, build_key)?,
        };

        if row_product.is_none() && game == GameType::Unknown {
            game = GameType::detect_local(&base_path, Some(&build.config));
        }

        let cdn_config = match load_override(options, FAKE_CDN_CONFIG, FAKE_CDN_CONFIG_HASH)? {
            Some(Override::Literal(config)) => config,
            Some(Override::Key(key)) => read_local_config(&config_root, &key)?.config,
            None => read_local_config(&config_root, cdn_key)?.config,
        };

        let product = row_product
            .or_else(|| product.map(str::to_string))
            .or_else(|| build.config.value("build-product", 0).map(str::to_string))
            .unwrap_or_default();

        info!(
            "Loaded local config for '{product}' ({game}), build {}",
            build.config.value("build-name", 0).unwrap_or("?")
        );

        Ok(Self {
            mode: StorageMode::Local {
                base_path,
                data_folder,
            },
            region: options.region.clone(),
            product,
            game,
            version_name: row.get_non_empty("Version").map(str::to_string),
            current_build_key: Some(build_key.to_string()),
            cdn_config,
            builds: vec![build],
            active_build: 0,
            cdn_hosts: split_hosts(row.get("CDN Hosts")),
            cdn_path: row.get("CDN Path").unwrap_or_default().to_string(),
            host_index: AtomicUsize::new(0),
        })
    }

    /// Loads the configuration of a product from the online patch service.
    pub fn load_online(
        product: &str,
        options: &CascOptions,
        fetcher: &dyn CdnFetcher,
    ) -> Result<Self> {
        let region = options.region.as_str();

        let versions = fetch_bar_table(fetcher, region, product, "versions")?;
        let cdns = fetch_bar_table(fetcher, region, product, "cdns")?;

        let version_row = versions
            .find_row("Region", region)
            .or_else(|| versions.rows().first())
            .ok_or_else(|| CascError::InvalidData(format!("No versions for '{product}'")))?;
        let cdn_row = cdns
            .find_row("Name", region)
            .or_else(|| cdns.rows().first())
            .ok_or_else(|| CascError::InvalidData(format!("No cdns for '{product}'")))?;

        let mut config = Self {
            mode: StorageMode::Online,
            region: region.to_string(),
            product: product.to_string(),
            game: GameType::from_uid(product),
            version_name: version_row.get_non_empty("VersionsName").map(str::to_string),
            current_build_key: version_row.get_non_empty("BuildConfig").map(str::to_string),
            cdn_config: CascConfig::default(),
            builds: Vec::new(),
            active_build: 0,
            cdn_hosts: split_hosts(cdn_row.get("Hosts")),
            cdn_path: cdn_row.get("Path").unwrap_or_default().to_string(),
            host_index: AtomicUsize::new(0),
        };

        config.cdn_config = match load_override(options, FAKE_CDN_CONFIG, FAKE_CDN_CONFIG_HASH)? {
            Some(Override::Literal(cdn_config)) => cdn_config,
            Some(Override::Key(key)) => config.fetch_config(fetcher, &key)?,
            None => {
                let key = required_cell(version_row, "CDNConfig")?;
                config.fetch_config(fetcher, key)?
            }
        };

        match load_override(options, FAKE_BUILD_CONFIG, FAKE_BUILD_CONFIG_HASH)? {
            Some(Override::Literal(build)) => config.builds.push(BuildConfig {
                key: FAKE_BUILD_CONFIG.to_string(),
                config: build,
            }),
            Some(Override::Key(key)) => {
                let build = config.fetch_config(fetcher, &key)?;
                config.builds.push(BuildConfig { key, config: build });
            }
            None => {
                let keys = config.cdn_config.values("builds").to_vec();
                for key in keys {
                    match config.fetch_config(fetcher, &key) {
                        Ok(build) => config.builds.push(BuildConfig { key, config: build }),
                        Err(err) => warn!("Skipping build config {key}: {err}"),
                    }
                }
                if config.builds.is_empty() {
                    let key = required_cell(version_row, "BuildConfig")?.to_string();
                    let build = config.fetch_config(fetcher, &key)?;
                    config.builds.push(BuildConfig { key, config: build });
                }
            }
        }

        if options.use_current_build {
            if let Some(current) = &config.current_build_key {
                if let Some(index) = config
                    .builds
                    .iter()
                    .position(|b| b.key.eq_ignore_ascii_case(current))
                {
                    config.active_build = index;
                }
            }
        }

        info!(
            "Loaded online config for '{product}' ({}), {} build(s), active {}",
            config.game,
            config.builds.len(),
            config.build_name().unwrap_or("?")
        );
        Ok(config)
    }

    /// Fetches and parses `config/xx/yy/<key>` from the next CDN host.
    pub fn fetch_config(&self, fetcher: &dyn CdnFetcher, key: &str) -> Result<CascConfig> {
        let host = self.require_cdn_host()?;
        let url = fetcher::config_url(host, &self.cdn_path, key)?;
        debug!("Fetching config {url}");
        let data = fetcher.fetch(&url, None)?;
        CascConfig::parse(data.as_slice(), key)
    }

    pub fn mode(&self) -> &StorageMode {
        &self.mode
    }

    pub fn is_online(&self) -> bool {
        matches!(self.mode, StorageMode::Online)
    }

    /// `<base>/<data folder>` of a local installation.
    pub fn data_path(&self) -> Option<PathBuf> {
        match &self.mode {
            StorageMode::Local {
                base_path,
                data_folder,
            } => Some(base_path.join(data_folder)),
            StorageMode::Online => None,
        }
    }

    pub fn base_path(&self) -> Option<&Path> {
        match &self.mode {
            StorageMode::Local { base_path, .. } => Some(base_path),
            StorageMode::Online => None,
        }
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn product(&self) -> &str {
        &self.product
    }

    pub fn game(&self) -> GameType {
        self.game
    }

    pub fn version_name(&self) -> Option<&str> {
        self.version_name.as_deref()
    }

    pub fn cdn_config(&self) -> &CascConfig {
        &self.cdn_config
    }

    pub fn builds(&self) -> &[BuildConfig] {
        &self.builds
    }

    pub fn build_count(&self) -> usize {
        self.builds.len()
    }

    pub fn active_build_index(&self) -> usize {
        self.active_build
    }

    pub fn set_active_build(&mut self, index: usize) -> Result<()> {
        if index >= self.builds.len() {
            return Err(CascError::InvalidData(format!(
                "Build index {index} out of range ({} builds)",
                self.builds.len()
            )));
        }
        self.active_build = index;
        Ok(())
    }

    /// The active build config.
    pub fn build(&self) -> Result<&CascConfig> {
        self.builds
            .get(self.active_build)
            .map(|b| &b.config)
            .ok_or_else(|| CascError::MissingConfigKey {
                key: "builds".to_string(),
                config: "cdn config".to_string(),
            })
    }

    pub fn root_ckey(&self) -> Result<ContentKey> {
        self.build()?.content_key("root", 0)
    }

    pub fn install_ckey(&self) -> Result<ContentKey> {
        self.build()?.content_key("install", 0)
    }

    pub fn download_ckey(&self) -> Result<ContentKey> {
        self.build()?.content_key("download", 0)
    }

    pub fn encoding_ckey(&self) -> Result<ContentKey> {
        self.build()?.content_key("encoding", 0)
    }

    pub fn encoding_ekey(&self) -> Result<EncodingKey> {
        self.build()?.encoding_key("encoding", 1)
    }

    /// The EKey stored next to a CKey on manifest lines such as `install = <ckey> <ekey>`.
    pub fn manifest_ekey(&self, name: &str) -> Option<EncodingKey> {
        let build = self.build().ok()?;
        build.encoding_key(name, 1).ok()
    }

    pub fn patch_ekey(&self) -> Option<EncodingKey> {
        self.build().ok()?.encoding_key("patch", 0).ok()
    }

    pub fn build_name(&self) -> Option<&str> {
        self.build().ok()?.value("build-name", 0)
    }

    pub fn build_uid(&self) -> Option<&str> {
        self.build().ok()?.value("build-uid", 0)
    }

    pub fn is_vfs_root(&self) -> bool {
        self.build()
            .map(|b| b.get("vfs-root").is_some())
            .unwrap_or(false)
    }

    /// `vfs-root` followed by every `vfs-<n>` key in numeric order.
    pub fn vfs_root_list(&self) -> Result<Vec<VfsRootKeys>> {
        let build = self.build()?;
        let mut names: Vec<(u32, String)> = build
            .keys()
            .filter_map(|key| {
                let index = match key {
                    "vfs-root" => 0,
                    other => other.strip_prefix("vfs-")?.parse::<u32>().ok()?,
                };
                Some((index, key.to_string()))
            })
            .collect();
        names.sort();

        names
            .into_iter()
            .map(|(index, name)| {
                Ok(VfsRootKeys {
                    index,
                    ckey: build.content_key(&name, 0)?,
                    ekey: build.encoding_key(&name, 1)?,
                })
            })
            .collect()
    }

    /// Archive keys listed by the CDN config.
    pub fn archives(&self) -> &[String] {
        self.cdn_config.values("archives")
    }

    pub fn file_index(&self) -> Option<&str> {
        self.cdn_config.value("file-index", 0)
    }

    pub fn cdn_hosts(&self) -> &[String] {
        &self.cdn_hosts
    }

    pub fn cdn_path(&self) -> &str {
        &self.cdn_path
    }

    /// The next CDN host, rotating through the host list and wrapping to the first.
    pub fn cdn_host(&self) -> Option<&str> {
        if self.cdn_hosts.is_empty() {
            return None;
        }
        let index = self.host_index.load(Ordering::Relaxed) % self.cdn_hosts.len();
        let next = if index + 1 >= self.cdn_hosts.len() {
            0
        } else {
            index + 1
        };
        self.host_index.store(next, Ordering::Relaxed);
        let host = self.cdn_hosts[index].as_str();
        trace!("Using CDN host {host}");
        Some(host)
    }

    fn require_cdn_host(&self) -> Result<&str> {
        self.cdn_host().ok_or_else(|| CascError::MissingConfigKey {
            key: "CDN Hosts".to_string(),
            config: self.product.clone(),
        })
    }
}

fn required_cell<'a>(row: &'a BarRow, column: &str) -> Result<&'a str> {
    row.get_non_empty(column)
        .ok_or_else(|| CascError::MissingConfigKey {
            key: column.to_string(),
            config: "manifest row".to_string(),
        })
}

fn split_hosts(hosts: Option<&str>) -> Vec<String> {
    hosts
        .map(|h| h.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default()
}

fn read_local_config(config_root: &Path, key: &str) -> Result<BuildConfig> {
    let path = config_root.join(hex_path(key)?);
    debug!("Reading config {}", path.display());
    Ok(BuildConfig {
        key: key.to_string(),
        config: CascConfig::from_file(path)?,
    })
}

fn fetch_bar_table(
    fetcher: &dyn CdnFetcher,
    region: &str,
    product: &str,
    manifest: &str,
) -> Result<BarTable> {
    let url = fetcher::patch_service_url(region, product, manifest);
    debug!("Fetching {url}");
    let data = fetcher.fetch(&url, None)?;
    BarTable::parse(data.as_slice(), &url)
}

/// Checks the override directory for a literal config, then for a key pointer.
fn load_override(options: &CascOptions, literal: &str, pointer: &str) -> Result<Option<Override>> {
    let Some(dir) = options.override_dir.as_deref() else {
        return Ok(None);
    };

    let literal_path = dir.join(literal);
    if literal_path.is_file() {
        info!("Using override {}", literal_path.display());
        return Ok(Some(Override::Literal(CascConfig::from_file(literal_path)?)));
    }

    let pointer_path = dir.join(pointer);
    if pointer_path.is_file() {
        let key = fs::read_to_string(&pointer_path)?.trim().to_string();
        info!("Using override key {key} from {}", pointer_path.display());
        return Ok(Some(Override::Key(key)));
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::FetchError;
    use std::collections::HashMap;
    use std::ops::Range;

    fn write_config(root: &Path, key: &str, text: &str) {
        let path = root.join("Data").join("config").join(hex_path(key).unwrap());
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, text).unwrap();
    }

    const BUILD_KEY: &str = "11111111111111111111111111111111";
    const CDN_KEY: &str = "22222222222222222222222222222222";
    const ROOT: &str = "0123456789abcdef0123456789abcdef";

    fn local_install() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(".build.info"),
            format!(
                "Active!DEC:1|Build Key!HEX:16|CDN Key!HEX:16|CDN Hosts!STRING:0|CDN Path!STRING:0|Version!STRING:0|Product!STRING:0\n\
                 1|{BUILD_KEY}|{CDN_KEY}|a.example b.example c.example|tpr/foo|1.2.3|foo\n"
            ),
        )
        .unwrap();
        write_config(
            dir.path(),
            BUILD_KEY,
            &format!(
                "root = {ROOT}\nencoding = {ROOT} {ROOT}\nbuild-name = B1\nvfs-root = {ROOT} {ROOT}\nvfs-2 = {ROOT} {ROOT}\nvfs-1 = {ROOT} {ROOT}\n"
            ),
        );
        write_config(dir.path(), CDN_KEY, "archives = aa bb\n");
        dir
    }

    #[test]
    fn local_config_exposes_build_keys() {
        let dir = local_install();
        let config = StorageConfig::load_local(dir.path(), None, &CascOptions::default()).unwrap();
        assert_eq!(config.product(), "foo");
        assert_eq!(config.game(), GameType::Unknown);
        assert_eq!(config.root_ckey().unwrap().to_hex(), ROOT);
        assert_eq!(config.build_name(), Some("B1"));
        assert_eq!(config.version_name(), Some("1.2.3"));
        assert_eq!(config.archives(), ["aa", "bb"]);
        assert!(config.is_vfs_root());
        let order: Vec<u32> = config.vfs_root_list().unwrap().iter().map(|v| v.index).collect();
        assert_eq!(order, [0, 1, 2]);
    }

    #[test]
    fn host_rotation_visits_each_host_once_then_wraps() {
        let dir = local_install();
        let config = StorageConfig::load_local(dir.path(), None, &CascOptions::default()).unwrap();
        let hosts: Vec<&str> = (0..4).filter_map(|_| config.cdn_host()).collect();
        assert_eq!(hosts, ["a.example", "b.example", "c.example", "a.example"]);
    }

    #[test]
    fn missing_build_config_is_fatal() {
        let dir = local_install();
        fs::remove_file(dir.path().join("Data/config").join(hex_path(BUILD_KEY).unwrap())).unwrap();
        assert!(matches!(
            StorageConfig::load_local(dir.path(), None, &CascOptions::default()),
            Err(CascError::FileNotFound(_))
        ));
    }

    #[test]
    fn literal_override_beats_pointer() {
        let dir = local_install();
        let overrides = tempfile::tempdir().unwrap();
        fs::write(overrides.path().join(FAKE_BUILD_CONFIG), "root = ffffffffffffffffffffffffffffffff\n").unwrap();
        fs::write(overrides.path().join(FAKE_BUILD_CONFIG_HASH), BUILD_KEY).unwrap();
        let options = CascOptions {
            override_dir: Some(overrides.path().to_path_buf()),
            ..CascOptions::default()
        };
        let config = StorageConfig::load_local(dir.path(), None, &options).unwrap();
        assert_eq!(config.root_ckey().unwrap().to_hex(), "ffffffffffffffffffffffffffffffff");
    }

    /// Patch service manifests plus the configs under `tpr/foo`, served from two hosts.
    fn online_files(builds: &str, extra: &[(&str, &str)]) -> HashMap<String, Vec<u8>> {
        let mut files: HashMap<String, Vec<u8>> = HashMap::new();
        files.insert(
            "http://us.patch.battle.net:1119/foo/versions".into(),
            b"Region!STRING:0|BuildConfig!HEX:16|CDNConfig!HEX:16|VersionsName!String:0\nus|bbbb|cccc|9.9\n".to_vec(),
        );
        files.insert(
            "http://us.patch.battle.net:1119/foo/cdns".into(),
            b"Name!STRING:0|Path!STRING:0|Hosts!STRING:0\nus|tpr/foo|h1 h2\n".to_vec(),
        );
        files.insert(
            "/tpr/foo/config/cc/cc/cccc".into(),
            format!("builds = {builds}\narchives = aa\n").into_bytes(),
        );
        files.insert(
            "/tpr/foo/config/bb/bb/bbbb".into(),
            format!("root = {ROOT}\n").into_bytes(),
        );
        for (path, text) in extra {
            files.insert(path.to_string(), text.as_bytes().to_vec());
        }
        files
    }

    fn serve(
        files: HashMap<String, Vec<u8>>,
    ) -> impl Fn(&str, Option<Range<u64>>) -> std::result::Result<Vec<u8>, FetchError> + Send + Sync {
        move |url: &str, _: Option<Range<u64>>| {
            let path = url
                .strip_prefix("http://h1")
                .or_else(|| url.strip_prefix("http://h2"))
                .unwrap_or(url);
            files
                .get(path)
                .cloned()
                .ok_or_else(|| FetchError::NotFound(url.to_string()))
        }
    }

    #[test]
    fn online_skips_builds_that_fail_to_fetch() {
        let fetcher = serve(online_files("dead0000 bbbb", &[]));

        let config = StorageConfig::load_online("foo", &CascOptions::default(), &fetcher).unwrap();
        assert_eq!(config.build_count(), 1);
        assert_eq!(config.builds()[0].key, "bbbb");
        assert_eq!(config.root_ckey().unwrap().to_hex(), ROOT);
        assert_eq!(config.version_name(), Some("9.9"));
        assert_eq!(config.archives(), ["aa"]);
        assert!(config.is_online());
    }

    #[test]
    fn online_activates_current_build_on_request() {
        let other = "ffffffffffffffffffffffffffffffff";
        let files = online_files(
            "aaaa bbbb",
            &[("/tpr/foo/config/aa/aa/aaaa", &format!("root = {other}\n"))],
        );

        let first = StorageConfig::load_online("foo", &CascOptions::default(), &serve(files.clone())).unwrap();
        assert_eq!(first.build_count(), 2);
        assert_eq!(first.active_build_index(), 0);
        assert_eq!(first.root_ckey().unwrap().to_hex(), other);

        let options = CascOptions {
            use_current_build: true,
            ..CascOptions::default()
        };
        let current = StorageConfig::load_online("foo", &options, &serve(files)).unwrap();
        assert_eq!(current.active_build_index(), 1);
        assert_eq!(current.build_name(), None);
        assert_eq!(current.root_ckey().unwrap().to_hex(), ROOT);
    }

    #[test]
    fn cdn_config_overrides_replace_the_versions_key() {
        let files = online_files(
            "bbbb",
            &[("/tpr/foo/config/dd/dd/dddd", "builds = bbbb\narchives = from-pointer\n")],
        );

        let overrides = tempfile::tempdir().unwrap();
        fs::write(overrides.path().join(FAKE_CDN_CONFIG_HASH), "dddd\n").unwrap();
        let options = CascOptions {
            override_dir: Some(overrides.path().to_path_buf()),
            ..CascOptions::default()
        };
        let config = StorageConfig::load_online("foo", &options, &serve(files.clone())).unwrap();
        assert_eq!(config.archives(), ["from-pointer"]);

        fs::write(overrides.path().join(FAKE_CDN_CONFIG), "builds = bbbb\narchives = literal\n").unwrap();
        let config = StorageConfig::load_online("foo", &options, &serve(files)).unwrap();
        assert_eq!(config.archives(), ["literal"]);
        assert_eq!(config.root_ckey().unwrap().to_hex(), ROOT);
    }
}
