mod common;

use casc_engine::fetcher::{self, CdnFetcher, FetchError};
use casc_engine::jenkins96::hash_path;
use casc_engine::keys::EncodingKey;
use casc_engine::root_handler::RootFormat;
use casc_engine::{CascError, CascOptions, CascStorage, LoadFlags, LoadState};
use common::{download_manifest, file_index, mock_fetcher, pattern, tvfs_root, StorageBuilder, CDN_HOST, CDN_PATH};
use std::collections::HashMap;
use std::io::Read;
use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

struct Online {
    files: HashMap<String, Vec<u8>>,
    local: common::BuiltStorage,
    content: Vec<u8>,
    content_ekey: EncodingKey,
}

fn online_storage() -> Online {
    common::init_tracing();
    let mut builder = StorageBuilder::new("foo");
    let content = pattern(5, 500);
    let (content_ckey, content_ekey) = builder.add_framed(&[&content[..256], &content[256..]], true);
    let root = tvfs_root(&[("data.bin", vec![(content_ekey, content_ckey, 0, 500)])]);
    let (root_ckey, root_ekey) = builder.add_file(&root);
    builder.set("vfs-root", format!("{root_ckey} {root_ekey}"));

    let download = download_manifest(&[(content_ekey, 500, 1)]);
    let (download_ckey, download_ekey) = builder.add_file(&download);
    builder.set("download", format!("{download_ckey} {download_ekey}"));

    let built = builder.build();
    Online {
        files: built.cdn_files("us"),
        local: built,
        content,
        content_ekey,
    }
}

#[test]
fn opens_product_from_the_cdn() {
    let online = online_storage();
    let requests = Arc::new(AtomicUsize::new(0));
    let fetcher = mock_fetcher(online.files, Arc::clone(&requests));
    let options = CascOptions::default().with_load_flags(LoadFlags::DOWNLOAD);

    let storage = CascStorage::open_online("foo", options, fetcher).unwrap();
    assert_eq!(storage.state(), LoadState::Ready);
    assert!(storage.config().is_online());
    assert_eq!(storage.config().version_name(), Some("1.0.0.1234"));
    assert_eq!(storage.root().unwrap().format(), RootFormat::Tvfs);

    let download = storage.download().unwrap();
    assert_eq!(download.get_entry(&online.content_ekey).unwrap().size, 500);

    let mut data = Vec::new();
    storage
        .open_file_by_name("dir/data.bin")
        .unwrap()
        .unwrap()
        .read_to_end(&mut data)
        .unwrap();
    assert_eq!(data, online.content);

    // blobs are cached per key
    let before = requests.load(Ordering::SeqCst);
    storage.open_file_by_name("dir/data.bin").unwrap().unwrap();
    assert_eq!(requests.load(Ordering::SeqCst), before);
}

#[test]
fn missing_remote_blob_follows_not_found_policy() {
    let online = online_storage();
    let requests = Arc::new(AtomicUsize::new(0));

    let tolerant = CascStorage::open_online(
        "foo",
        CascOptions::tolerant(),
        mock_fetcher(online.files.clone(), Arc::clone(&requests)),
    )
    .unwrap();
    assert!(tolerant.open_file_by_ekey(&EncodingKey([0x42; 16])).unwrap().is_none());

    let strict = CascStorage::open_online(
        "foo",
        CascOptions::default(),
        mock_fetcher(online.files, requests),
    )
    .unwrap();
    assert!(matches!(
        strict.open_file_by_ekey(&EncodingKey([0x42; 16])),
        Err(CascError::FileNotFound(_))
    ));
}

#[test]
fn transport_failures_are_not_not_found() {
    common::init_tracing();
    let fetcher: Arc<dyn CdnFetcher> = Arc::new(|url: &str, _: Option<Range<u64>>| -> Result<Vec<u8>, FetchError> {
        Err(FetchError::Failed {
            url: url.to_string(),
            reason: "connection reset".to_string(),
        })
    });
    let err = CascStorage::open_online("foo", CascOptions::default(), fetcher).unwrap_err();
    assert!(matches!(err, CascError::Transport { .. }));
}

#[test]
fn local_storage_falls_back_to_the_cdn() {
    let online = online_storage();
    let mut local = online.local.clone();
    local.blobs.retain(|(ekey, _)| *ekey != online.content_ekey);
    let dir = local.write_local();

    let requests = Arc::new(AtomicUsize::new(0));
    let fetcher = mock_fetcher(online.files, Arc::clone(&requests));

    let offline = CascStorage::open_local_with_fetcher(
        dir.path(),
        None,
        CascOptions::tolerant(),
        Arc::clone(&fetcher),
    )
    .unwrap();
    assert!(offline.open_file_by_name("dir/data.bin").unwrap().is_none());
    assert_eq!(requests.load(Ordering::SeqCst), 0);

    let options = CascOptions {
        online_fallback: true,
        ..CascOptions::default()
    };
    let storage = CascStorage::open_local_with_fetcher(dir.path(), None, options, fetcher).unwrap();
    let mut data = Vec::new();
    storage
        .open_file_by_hash(hash_path("dir/data.bin"))
        .unwrap()
        .unwrap()
        .read_to_end(&mut data)
        .unwrap();
    assert_eq!(data, online.content);
    assert!(requests.load(Ordering::SeqCst) > 0);
}

#[test]
fn file_index_is_loaded_on_request() {
    const FILE_INDEX_KEY: &str = "f11e0000000000000000000000000001";
    common::init_tracing();
    let mut builder = StorageBuilder::new("foo");
    let content = pattern(6, 64);
    let (ckey, ekey) = builder.add_file(&content);
    let root = tvfs_root(&[("loose.bin", vec![(ekey, ckey, 0, 64)])]);
    let (root_ckey, root_ekey) = builder.add_file(&root);
    builder.set("vfs-root", format!("{root_ckey} {root_ekey}"));
    builder.set_cdn("file-index", FILE_INDEX_KEY);

    let mut files = builder.build().cdn_files("us");
    let index_url = fetcher::data_url(CDN_HOST, CDN_PATH, FILE_INDEX_KEY, ".index").unwrap();
    files.insert(index_url, file_index(&[(ekey, 113)]));
    let requests = Arc::new(AtomicUsize::new(0));

    let without = CascStorage::open_online(
        "foo",
        CascOptions::default(),
        mock_fetcher(files.clone(), Arc::clone(&requests)),
    )
    .unwrap();
    assert!(!without.files().unwrap()[0].is_local);

    let options = CascOptions::default().with_load_flags(LoadFlags::FILE_INDEX);
    let with = CascStorage::open_online("foo", options, mock_fetcher(files, requests)).unwrap();
    let listed = with.files().unwrap();
    assert_eq!(listed.len(), 1);
    assert!(listed[0].is_local);
    assert_eq!(listed[0].file_size, 64);

    let mut data = Vec::new();
    with.open_file_by_name("dir/loose.bin")
        .unwrap()
        .unwrap()
        .read_to_end(&mut data)
        .unwrap();
    assert_eq!(data, content);
}
