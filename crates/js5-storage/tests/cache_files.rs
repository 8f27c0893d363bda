#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]
//! Integration tests for caches written to and read from disk
//!
//! Authors a small cache, saves it as `main_file_cache.*` files, reopens it
//! through memory-mapped channels and walks every layer back to file bytes.

use js5_crypto::XteaKeyStore;
use js5_formats::compression::decompress;
use js5_formats::{ArchiveIndex, CompressionMethod};
use js5_storage::{
    FileError, Js5Store, Key, MemoryRepository, NameHashTable, SectorStore, StoreConfig,
};
use pretty_assertions::assert_eq;
use std::path::Path;

const CONFIG: &str = r#"{
    "gameBuild": 435,
    "archives": {
        "main": { "index": 255, "name": "main" },
        "maps": {
            "index": 5,
            "name": "maps",
            "encryption": ["xtea", "^l[0-9]+_[0-9]+$"],
            "compression": "gzip",
            "filesNamed": true,
            "versioned": true
        },
        "models": { "index": 7, "name": "models", "compression": "bzip" }
    }
}"#;

const KEYS: &str = r#"{
    "l50_50": [{ "gameBuild": 435, "key": [-1, 2, -3, 4] }],
    "l50_51": [{ "gameBuild": "434", "key": [5, 6, 7, 8] }]
}"#;

fn write_fixtures(dir: &Path) {
    std::fs::write(dir.join("config.json"), CONFIG).unwrap();
    std::fs::write(dir.join("keys.json"), KEYS).unwrap();
}

fn names() -> NameHashTable {
    ["m50_50", "l50_50", "l50_51"].into_iter().collect()
}

fn open(dir: &Path, cache: &Path) -> Js5Store {
    let config = StoreConfig::load(dir.join("config.json")).unwrap();
    let keys = XteaKeyStore::load(dir.join("keys.json")).unwrap();
    Js5Store::open(config, cache)
        .unwrap()
        .with_name_table(names())
        .with_keys(keys)
}

async fn author(dir: &Path, cache: &Path) {
    let config = StoreConfig::load(dir.join("config.json")).unwrap();
    let keys = XteaKeyStore::load(dir.join("keys.json")).unwrap();
    let mut store = Js5Store::new(config, SectorStore::new())
        .unwrap()
        .with_name_table(names())
        .with_keys(keys);

    let maps = store.add_archive(5).unwrap();
    for (key, name) in [(0, "m50_50"), (1, "l50_50"), (2, "l50_51")] {
        let group = maps.add_group(key);
        group.set_name(name);
        group.add_file(0).set_data(format!("{name} contents").into_bytes());
    }

    let models = store.add_archive(7).unwrap();
    for key in 0..40u32 {
        let group = models.add_group(key * 3);
        for file in 0..3u32 {
            let data = vec![(key + file) as u8; (key * 50 + file) as usize];
            group.add_file(file).set_data(data);
        }
    }

    store.encode_archive(5).unwrap();
    store.encode_archive(7).unwrap();
    store.save(cache).await.unwrap();
}

#[tokio::test]
async fn saved_cache_reopens() {
    let dir = tempfile::tempdir().unwrap();
    let cache = dir.path().join("cache");
    write_fixtures(dir.path());
    author(dir.path(), &cache).await;

    assert!(cache.join("main_file_cache.dat2").is_file());
    assert!(cache.join("main_file_cache.idx5").is_file());
    assert!(cache.join("main_file_cache.idx7").is_file());
    assert!(cache.join("main_file_cache.idx255").is_file());

    let mut store = open(dir.path(), &cache);
    assert_eq!(store.decode_all().unwrap(), 40 + 2);

    let models = store.archive(&Key::from("models")).unwrap();
    assert_eq!(models.children.len(), 40);
    let file = store
        .file(&Key::from(7), &Key::from(39 * 3), &Key::from(2))
        .unwrap();
    assert_eq!(file.data.as_deref(), Some(vec![41u8; 39 * 50 + 2].as_slice()));

    let landscape = store
        .file(&Key::from("maps"), &Key::from("l50_50"), &Key::from(0))
        .unwrap();
    assert_eq!(landscape.data.as_deref(), Some(b"l50_50 contents".as_slice()));
    assert!(landscape.record.file_error.is_none());

    // l50_51 only has a key for build 434, so it was never packed
    let missing = store.group(&Key::from(5), &Key::from("l50_51")).unwrap();
    assert_eq!(missing.record.file_error, Some(FileError::FileMissing));
}

#[tokio::test]
async fn meta_archive_holds_indices() {
    let dir = tempfile::tempdir().unwrap();
    let cache = dir.path().join("cache");
    write_fixtures(dir.path());
    author(dir.path(), &cache).await;

    let sectors = SectorStore::open(&cache).unwrap();
    let envelope = sectors.unpack(255, 7).unwrap();
    let index = ArchiveIndex::parse(&decompress(&envelope).unwrap().data).unwrap();

    assert_eq!(index.groups.len(), 40);
    assert_eq!(index.groups[1].key, 3);
    assert_eq!(index.groups[1].files.len(), 3);
    // The compact index encoding drops group versions
    assert!(index.groups.iter().all(|group| group.version == 0));

    let group = decompress(&sectors.unpack(7, 3).unwrap()).unwrap();
    assert_eq!(group.method, CompressionMethod::Bzip2);
}

#[tokio::test]
async fn unchanged_cache_has_no_changes() {
    let dir = tempfile::tempdir().unwrap();
    let cache = dir.path().join("cache");
    write_fixtures(dir.path());
    author(dir.path(), &cache).await;

    let repository = MemoryRepository::new();
    let mut first = open(dir.path(), &cache);
    first.decode_all().unwrap();
    first.validate_all(false);
    let persisted = first.persist(&repository).await.unwrap();

    let mut second = open(dir.path(), &cache);
    second.decode_all().unwrap();
    assert_eq!(second.restore_records(&repository).await.unwrap(), persisted);
    assert_eq!(second.validate_all(true), 0);
}
