//! Builders writing small but complete storages, either to a scratch
//! directory laid out like a local installation or as a map of CDN URLs.
#![allow(dead_code)]

use casc_engine::fetcher::{self, CdnFetcher, FetchError};
use casc_engine::keys::{ContentKey, EncodingKey};
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::ops::Range;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

pub const CDN_HOST: &str = "cdn.example";
pub const CDN_PATH: &str = "tpr/foo";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// A BLTE blob with one frame per slice, zlib compressed when `compress` is set.
pub fn blte(frames: &[&[u8]], compress: bool) -> Vec<u8> {
    let encoded: Vec<Vec<u8>> = frames.iter().map(|f| encode_frame(f, compress)).collect();

    let mut data = b"BLTE".to_vec();
    data.extend_from_slice(&(12 + 24 * frames.len() as u32).to_be_bytes());
    data.push(0x0F);
    data.extend_from_slice(&(frames.len() as u32).to_be_bytes()[1..]);
    for (frame, raw) in encoded.iter().zip(frames) {
        data.extend_from_slice(&(frame.len() as u32).to_be_bytes());
        data.extend_from_slice(&(raw.len() as u32).to_be_bytes());
        data.extend_from_slice(&md5::compute(frame).0);
    }
    for frame in encoded {
        data.extend_from_slice(&frame);
    }
    data
}

fn encode_frame(raw: &[u8], compress: bool) -> Vec<u8> {
    if compress {
        let mut encoder = ZlibEncoder::new(vec![b'Z'], Compression::default());
        encoder.write_all(raw).unwrap();
        encoder.finish().unwrap()
    } else {
        let mut frame = vec![b'N'];
        frame.extend_from_slice(raw);
        frame
    }
}

/// Deterministic filler bytes, different per `seed`.
pub fn pattern(seed: u8, len: usize) -> Vec<u8> {
    (0..len).map(|i| seed.wrapping_mul(31).wrapping_add(i as u8)).collect()
}

pub fn content_key(data: &[u8]) -> ContentKey {
    ContentKey(md5::compute(data).0)
}

/// An encoding table with 1 KiB pages.
pub fn encoding_table(entries: &[(ContentKey, u64, EncodingKey)]) -> Vec<u8> {
    const PAGE_SIZE: usize = 1024;
    let mut sorted = entries.to_vec();
    sorted.sort_by_key(|e| e.0);

    let mut pages = Vec::new();
    let mut page_table = Vec::new();
    for chunk in sorted.chunks(PAGE_SIZE / 38) {
        let mut page = Vec::with_capacity(PAGE_SIZE);
        for (ckey, size, ekey) in chunk {
            page.push(1);
            page.extend_from_slice(&size.to_be_bytes()[3..]);
            page.extend_from_slice(&ckey.0);
            page.extend_from_slice(&ekey.0);
        }
        page.resize(PAGE_SIZE, 0);
        page_table.extend_from_slice(&chunk[0].0 .0);
        page_table.extend_from_slice(&md5::compute(&page).0);
        pages.extend_from_slice(&page);
    }

    let espec = b"n\0";
    let mut data = b"EN".to_vec();
    data.extend_from_slice(&[1, 16, 16]);
    data.extend_from_slice(&1u16.to_be_bytes());
    data.extend_from_slice(&1u16.to_be_bytes());
    data.extend_from_slice(&((pages.len() / PAGE_SIZE) as u32).to_be_bytes());
    data.extend_from_slice(&0u32.to_be_bytes());
    data.push(0);
    data.extend_from_slice(&(espec.len() as u32).to_be_bytes());
    data.extend_from_slice(espec);
    data.extend_from_slice(&page_table);
    data.extend_from_slice(&pages);
    data
}

/// One span of a TVFS file: blob encoding key, chunk content key, offset and length.
pub type TvfsSpan = (EncodingKey, ContentKey, u32, u32);

/// A TVFS root whose files all live in one folder named `dir`.
pub fn tvfs_root(files: &[(&str, Vec<TvfsSpan>)]) -> Vec<u8> {
    let mut cft = Vec::new();
    let mut vfs = Vec::new();
    let mut nodes = Vec::new();

    for (name, spans) in files {
        let vfs_offset = vfs.len() as u32;
        vfs.push(spans.len() as u8);
        for (ekey, ckey, offset, length) in spans {
            vfs.extend_from_slice(&offset.to_be_bytes());
            vfs.extend_from_slice(&length.to_be_bytes());
            vfs.push(cft.len() as u8);
            cft.extend_from_slice(&ekey.0);
            cft.extend_from_slice(&ckey.0);
        }
        nodes.push(name.len() as u8);
        nodes.extend_from_slice(name.as_bytes());
        nodes.push(0xFF);
        nodes.extend_from_slice(&vfs_offset.to_be_bytes());
    }
    // one byte CFT offsets
    assert!(cft.len() <= 0xFF);

    let mut path = vec![3];
    path.extend_from_slice(b"dir");
    path.push(0);
    path.push(0xFF);
    path.extend_from_slice(&(0x8000_0000u32 | (nodes.len() as u32 + 4)).to_be_bytes());
    path.extend_from_slice(&nodes);

    let header_size = 38usize;
    let path_offset = header_size;
    let vfs_offset = path_offset + path.len();
    let cft_offset = vfs_offset + vfs.len();

    let mut data = b"TVFS".to_vec();
    data.extend_from_slice(&[1, header_size as u8, 16, 16]);
    data.extend_from_slice(&1u32.to_be_bytes());
    for value in [path_offset, path.len(), vfs_offset, vfs.len(), cft_offset, cft.len()] {
        data.extend_from_slice(&(value as u32).to_be_bytes());
    }
    data.extend_from_slice(&2u16.to_be_bytes());
    data.extend_from_slice(&path);
    data.extend_from_slice(&vfs);
    data.extend_from_slice(&cft);
    data
}

/// A version 1 `TSFM` root with one enUS block of named files.
pub fn wow_root(records: &[(u32, ContentKey, u64)]) -> Vec<u8> {
    let mut data = b"TSFM".to_vec();
    data.extend_from_slice(&(records.len() as u32).to_le_bytes());
    data.extend_from_slice(&(records.len() as u32).to_le_bytes());
    data.extend_from_slice(&(records.len() as u32).to_le_bytes());
    data.extend_from_slice(&0u32.to_le_bytes());
    data.extend_from_slice(&0x2u32.to_le_bytes());
    let mut previous: Option<u32> = None;
    for (id, _, _) in records {
        let delta = match previous {
            None => *id as i32,
            Some(p) => *id as i32 - p as i32 - 1,
        };
        data.extend_from_slice(&delta.to_le_bytes());
        previous = Some(*id);
    }
    for (_, ckey, _) in records {
        data.extend_from_slice(&ckey.0);
    }
    for (_, _, hash) in records {
        data.extend_from_slice(&hash.to_le_bytes());
    }
    data
}

/// An install manifest; each tag lists the indices of its entries.
pub fn install_manifest(tags: &[(&str, u16, Vec<usize>)], entries: &[(&str, ContentKey, u32)]) -> Vec<u8> {
    let mut data = b"IN".to_vec();
    data.extend_from_slice(&[1, 16]);
    data.extend_from_slice(&(tags.len() as u16).to_be_bytes());
    data.extend_from_slice(&(entries.len() as u32).to_be_bytes());
    for (name, tag_type, members) in tags {
        data.extend_from_slice(name.as_bytes());
        data.push(0);
        data.extend_from_slice(&tag_type.to_be_bytes());
        let mut mask = vec![0u8; entries.len().div_ceil(8)];
        for &i in members {
            mask[i / 8] |= 0x80 >> (i % 8);
        }
        data.extend_from_slice(&mask);
    }
    for (name, ckey, size) in entries {
        data.extend_from_slice(name.as_bytes());
        data.push(0);
        data.extend_from_slice(&ckey.0);
        data.extend_from_slice(&size.to_be_bytes());
    }
    data
}

/// A version 1 download manifest without tags.
pub fn download_manifest(entries: &[(EncodingKey, u64, i8)]) -> Vec<u8> {
    let mut data = b"DL".to_vec();
    data.extend_from_slice(&[1, 16, 1]);
    data.extend_from_slice(&(entries.len() as u32).to_be_bytes());
    data.extend_from_slice(&0u16.to_be_bytes());
    for (ekey, size, priority) in entries {
        data.extend_from_slice(&ekey.0);
        data.extend_from_slice(&size.to_be_bytes()[3..]);
        data.push(*priority as u8);
        data.extend_from_slice(&0u32.to_be_bytes());
    }
    data
}

/// Collects blobs and build config lines, then lays them out on disk or on a fake CDN.
pub struct StorageBuilder {
    product: String,
    blobs: Vec<(EncodingKey, Vec<u8>)>,
    encoding: Vec<(ContentKey, u64, EncodingKey)>,
    build_config: Vec<(String, String)>,
    cdn_config: Vec<(String, String)>,
}

impl StorageBuilder {
    pub fn new(product: &str) -> Self {
        Self {
            product: product.to_string(),
            blobs: Vec::new(),
            encoding: Vec::new(),
            build_config: vec![
                ("build-name".to_string(), "TEST-1234patch1.0.0".to_string()),
                ("build-product".to_string(), product.to_string()),
            ],
            cdn_config: vec![("archives".to_string(), String::new())],
        }
    }

    /// Stores an already encoded blob under the MD5 of its bytes.
    pub fn add_blob(&mut self, blte: Vec<u8>) -> EncodingKey {
        let ekey = EncodingKey(md5::compute(&blte).0);
        self.blobs.push((ekey, blte));
        ekey
    }

    /// Stores `content` as one raw frame and lists it in the encoding table.
    pub fn add_file(&mut self, content: &[u8]) -> (ContentKey, EncodingKey) {
        self.add_framed(&[content], false)
    }

    /// Stores the concatenation of `frames`, one BLTE frame each.
    pub fn add_framed(&mut self, frames: &[&[u8]], compress: bool) -> (ContentKey, EncodingKey) {
        let content = frames.concat();
        let ckey = content_key(&content);
        let ekey = self.add_blob(blte(frames, compress));
        self.encoding.push((ckey, content.len() as u64, ekey));
        (ckey, ekey)
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) -> &mut Self {
        self.build_config.push((key.to_string(), value.into()));
        self
    }

    pub fn set_cdn(&mut self, key: &str, value: impl Into<String>) -> &mut Self {
        self.cdn_config.push((key.to_string(), value.into()));
        self
    }

    pub fn build(mut self) -> BuiltStorage {
        let table = encoding_table(&self.encoding);
        let encoding_ckey = content_key(&table);
        let encoding_ekey = self.add_blob(blte(&[&table], true));
        self.set("encoding", format!("{encoding_ckey} {encoding_ekey}"));

        let mut build_config = String::from("# Build Configuration\n\n");
        for (key, value) in &self.build_config {
            build_config.push_str(&format!("{key} = {value}\n"));
        }
        let mut cdn_config = String::from("# CDN Configuration\n\n");
        for (key, value) in &self.cdn_config {
            if value.is_empty() {
                cdn_config.push_str(&format!("{key} =\n"));
            } else {
                cdn_config.push_str(&format!("{key} = {value}\n"));
            }
        }

        BuiltStorage {
            product: self.product,
            build_key: hex::encode(md5::compute(&build_config).0),
            cdn_key: hex::encode(md5::compute(&cdn_config).0),
            build_config,
            cdn_config,
            blobs: self.blobs,
        }
    }
}

#[derive(Clone)]
pub struct BuiltStorage {
    pub product: String,
    pub build_key: String,
    pub cdn_key: String,
    pub build_config: String,
    pub cdn_config: String,
    pub blobs: Vec<(EncodingKey, Vec<u8>)>,
}

impl BuiltStorage {
    /// Writes `.build.info`, configs, `data.000` and one `.idx` file into a new scratch directory.
    pub fn write_local(&self) -> TempDir {
        let dir = TempDir::new().unwrap();
        self.write_local_to(dir.path());
        dir
    }

    pub fn write_local_to(&self, root: &Path) {
        let data_folder = root.join("Data");
        let data_dir = data_folder.join("data");
        fs::create_dir_all(&data_dir).unwrap();

        for (key, text) in [(&self.build_key, &self.build_config), (&self.cdn_key, &self.cdn_config)] {
            let dir = data_folder.join("config").join(&key[0..2]).join(&key[2..4]);
            fs::create_dir_all(&dir).unwrap();
            fs::write(dir.join(key), text).unwrap();
        }

        let mut archive = Vec::new();
        let mut locations = Vec::new();
        for (ekey, blob) in &self.blobs {
            let size = 30 + blob.len() as u32;
            locations.push((*ekey, archive.len() as u64, size));
            let mut reversed = ekey.0;
            reversed.reverse();
            archive.extend_from_slice(&reversed);
            archive.extend_from_slice(&size.to_le_bytes());
            archive.extend_from_slice(&[0; 10]);
            archive.extend_from_slice(blob);
        }
        fs::write(data_dir.join("data.000"), archive).unwrap();
        fs::write(data_dir.join("0000000001.idx"), index_file(&locations)).unwrap();

        let build_info = format!(
            "Branch!STRING:0|Active!DEC:1|Build Key!HEX:16|CDN Key!HEX:16|CDN Path!STRING:0|CDN Hosts!STRING:0|Version!STRING:0|Product!STRING:0\n\
             us|1|{}|{}|{CDN_PATH}|{CDN_HOST}|1.0.0.1234|{}\n",
            self.build_key, self.cdn_key, self.product
        );
        fs::write(root.join(".build.info"), build_info).unwrap();
    }

    /// Every resource of this storage keyed by the URL the engine asks for.
    pub fn cdn_files(&self, region: &str) -> HashMap<String, Vec<u8>> {
        let mut files = HashMap::new();
        files.insert(
            fetcher::patch_service_url(region, &self.product, "versions"),
            format!(
                "Region!STRING:0|BuildConfig!HEX:16|CDNConfig!HEX:16|BuildId!DEC:4|VersionsName!String:0\n\
                 ## seqn = 1\n\
                 {region}|{}|{}|1234|1.0.0.1234\n",
                self.build_key, self.cdn_key
            )
            .into_bytes(),
        );
        files.insert(
            fetcher::patch_service_url(region, &self.product, "cdns"),
            format!("Name!STRING:0|Path!STRING:0|Hosts!STRING:0\n{region}|{CDN_PATH}|{CDN_HOST}\n").into_bytes(),
        );
        for (key, text) in [(&self.build_key, &self.build_config), (&self.cdn_key, &self.cdn_config)] {
            files.insert(
                fetcher::config_url(CDN_HOST, CDN_PATH, key).unwrap(),
                text.clone().into_bytes(),
            );
        }
        for (ekey, blob) in &self.blobs {
            files.insert(
                fetcher::data_url(CDN_HOST, CDN_PATH, &ekey.to_hex(), "").unwrap(),
                blob.clone(),
            );
        }
        files
    }
}

/// A version 7 key mapping table, all keys in archive 0.
fn index_file(locations: &[(EncodingKey, u64, u32)]) -> Vec<u8> {
    let mut data = Vec::new();
    data.extend_from_slice(&0x10u32.to_le_bytes());
    data.extend_from_slice(&0u32.to_le_bytes());
    data.extend_from_slice(&7u16.to_le_bytes());
    data.extend_from_slice(&[0, 0, 4, 5, 9, 30]);
    data.extend_from_slice(&0x4000_0000u64.to_le_bytes());
    data.resize(0x20, 0);

    data.extend_from_slice(&((locations.len() * 18) as u32).to_le_bytes());
    data.extend_from_slice(&0u32.to_le_bytes());
    for (ekey, offset, size) in locations {
        data.extend_from_slice(&ekey.0[..9]);
        data.extend_from_slice(&offset.to_be_bytes()[3..]);
        data.extend_from_slice(&size.to_le_bytes());
    }
    data
}

/// A CDN file index listing loose blobs and their encoded sizes.
pub fn file_index(entries: &[(EncodingKey, u32)]) -> Vec<u8> {
    let mut data = Vec::new();
    for (ekey, size) in entries {
        data.extend_from_slice(&ekey.0);
        data.extend_from_slice(&size.to_be_bytes());
    }
    data.resize(data.len().div_ceil(4096).max(1) * 4096, 0);
    data.extend_from_slice(&[1, 0, 0, 4, 0, 4, 16, 8]);
    data.extend_from_slice(&(entries.len() as u32).to_le_bytes());
    data.extend_from_slice(&[0; 8]);
    data
}

/// A fetcher serving `files`, honouring byte ranges. Every request is counted.
pub fn mock_fetcher(files: HashMap<String, Vec<u8>>, requests: Arc<std::sync::atomic::AtomicUsize>) -> Arc<dyn CdnFetcher> {
    Arc::new(move |url: &str, range: Option<Range<u64>>| -> Result<Vec<u8>, FetchError> {
        requests.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let data = files
            .get(url)
            .ok_or_else(|| FetchError::NotFound(url.to_string()))?;
        match range {
            Some(range) => data
                .get(range.start as usize..range.end as usize)
                .map(<[u8]>::to_vec)
                .ok_or_else(|| FetchError::Failed {
                    url: url.to_string(),
                    reason: "range out of bounds".to_string(),
                }),
            None => Ok(data.clone()),
        }
    })
}
