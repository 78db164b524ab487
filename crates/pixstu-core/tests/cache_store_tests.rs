//! Integration tests for the generation cache.
//!
//! These exercise the public API against real SQLite files: namespace
//! sharing, recovery from damaged files, and concurrent use.

use pixstu_cache::image::{DynamicImage, Rgba, RgbaImage};
use pixstu_cache::{CacheConfig, CacheDb, CacheStore, PathsConfig, Pipeline, Txt2ImgRequest};
use std::sync::Arc;
use std::thread;
use tempfile::TempDir;

fn db_path(temp_dir: &TempDir) -> std::path::PathBuf {
    PathsConfig::cache_db_path(temp_dir.path())
}

#[test]
fn test_round_trip_creates_private_dir() {
    let temp_dir = TempDir::new().unwrap();
    let store = CacheStore::open(CacheConfig::new(db_path(&temp_dir), "txt2img")).unwrap();

    let payload: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
    store.put("k", &payload).unwrap();

    assert_eq!(store.get("k").unwrap().unwrap(), payload);
    assert!(temp_dir.path().join(".pixstu").is_dir());
}

#[test]
fn test_concrete_budget_scenario() {
    let temp_dir = TempDir::new().unwrap();
    let config = CacheConfig::new(db_path(&temp_dir), "txt2img")
        .with_max_bytes(1000)
        .with_ttl_seconds(3600);
    let store = CacheStore::open(config).unwrap();

    store.put("k1", &[b'x'; 600]).unwrap();
    store.put("k2", &[b'y'; 600]).unwrap();

    assert!(store.get("k1").unwrap().is_none());
    assert_eq!(store.get("k2").unwrap().unwrap(), vec![b'y'; 600]);
    assert_eq!(store.stats().unwrap().total_bytes, 600);
}

#[test]
fn test_namespace_isolation_on_shared_handle() {
    let temp_dir = TempDir::new().unwrap();
    let db = CacheDb::open(db_path(&temp_dir)).unwrap();
    let path = db_path(&temp_dir);

    let txt = CacheStore::with_db(db.clone(), &CacheConfig::new(&path, "ns1").with_max_bytes(10))
        .unwrap();
    let inpaint = CacheStore::with_db(db.clone(), &CacheConfig::new(&path, "ns2")).unwrap();

    inpaint.put("k", b"value-two").unwrap();
    txt.put("k", b"value-one").unwrap();
    // Over ns1's budget; must not evict from ns2.
    txt.put("k2", b"0123456789").unwrap();

    assert_eq!(inpaint.get("k").unwrap().unwrap(), b"value-two");
    assert!(txt.get("k").unwrap().is_none());

    txt.clear().unwrap();
    assert_eq!(txt.stats().unwrap().entry_count, 0);
    assert_eq!(inpaint.stats().unwrap().entry_count, 1);

    let all = db.namespaces().unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].namespace, "ns2");
}

#[test]
fn test_separate_handles_share_the_file() {
    let temp_dir = TempDir::new().unwrap();
    let first = CacheStore::open(CacheConfig::new(db_path(&temp_dir), "txt2img")).unwrap();
    let second = CacheStore::open(CacheConfig::new(db_path(&temp_dir), "txt2img")).unwrap();

    first.put("k", b"from first").unwrap();

    assert_eq!(second.get("k").unwrap().unwrap(), b"from first");
}

#[test]
fn test_garbage_file_is_recreated() {
    let temp_dir = TempDir::new().unwrap();
    let path = db_path(&temp_dir);
    {
        let store = CacheStore::open(CacheConfig::new(&path, "txt2img")).unwrap();
        store.put("k", b"v").unwrap();
    }

    std::fs::write(&path, b"this is not an sqlite database, just noise".repeat(200)).unwrap();

    let store = CacheStore::open(CacheConfig::new(&path, "txt2img")).unwrap();
    assert!(store.get("k").unwrap().is_none());

    store.put("k", b"fresh").unwrap();
    assert_eq!(store.get("k").unwrap().unwrap(), b"fresh");
}

#[test]
fn test_truncated_file_is_usable() {
    let temp_dir = TempDir::new().unwrap();
    let path = db_path(&temp_dir);
    {
        let store = CacheStore::open(CacheConfig::new(&path, "txt2img")).unwrap();
        store.put("k", b"v").unwrap();
    }

    std::fs::write(&path, b"").unwrap();

    let store = CacheStore::open(CacheConfig::new(&path, "txt2img")).unwrap();
    assert!(store.get("k").unwrap().is_none());
    store.put("k", b"again").unwrap();
    assert_eq!(store.get("k").unwrap().unwrap(), b"again");
}

#[test]
fn test_reset_on_one_handle_keeps_others_shared() {
    let temp_dir = TempDir::new().unwrap();
    let path = db_path(&temp_dir);
    let first = CacheStore::open(CacheConfig::new(&path, "txt2img")).unwrap();
    let second = CacheStore::open(CacheConfig::new(&path, "txt2img")).unwrap();

    first.put("a", b"a").unwrap();
    second.db().reset().unwrap();
    second.put("b", b"b").unwrap();
    first.put("c", b"c").unwrap();

    let fresh = CacheStore::open(CacheConfig::new(&path, "txt2img")).unwrap();
    assert!(fresh.get("a").unwrap().is_none());
    assert_eq!(fresh.get("b").unwrap().unwrap(), b"b");
    assert_eq!(fresh.get("c").unwrap().unwrap(), b"c");
    assert_eq!(second.get("c").unwrap().unwrap(), b"c");
}

#[test]
fn test_overwritten_while_open_stays_usable() {
    let temp_dir = TempDir::new().unwrap();
    let path = db_path(&temp_dir);
    let store = CacheStore::open(CacheConfig::new(&path, "txt2img")).unwrap();
    store.put("k", b"v").unwrap();

    std::fs::write(&path, b"this is not an sqlite database, just noise".repeat(200)).unwrap();

    // Committed pages still in the write-ahead log can keep serving the old
    // value; anything else must be a miss.
    let value = store.get("k").unwrap();
    assert!(matches!(value.as_deref(), None | Some(b"v")), "got {value:?}");

    store.put("k2", b"after").unwrap();
    assert_eq!(store.get("k2").unwrap().unwrap(), b"after");
    drop(store);

    let store = CacheStore::open(CacheConfig::new(&path, "txt2img")).unwrap();
    store.put("k3", b"reopened").unwrap();
    assert_eq!(store.get("k3").unwrap().unwrap(), b"reopened");
}

#[cfg(unix)]
#[test]
fn test_replaced_while_open_heals_on_get() {
    let temp_dir = TempDir::new().unwrap();
    let path = db_path(&temp_dir);
    let store = CacheStore::open(CacheConfig::new(&path, "txt2img")).unwrap();
    store.put("k", b"v").unwrap();

    let replacement = temp_dir.path().join("replacement");
    std::fs::write(&replacement, b"garbage".repeat(1000)).unwrap();
    std::fs::rename(&replacement, &path).unwrap();

    assert!(store.get("k").unwrap().is_none());
    store.put("k", b"rebuilt").unwrap();
    assert_eq!(store.get("k").unwrap().unwrap(), b"rebuilt");
}

#[test]
fn test_schema_damaged_while_open_heals_on_get() {
    let temp_dir = TempDir::new().unwrap();
    let path = db_path(&temp_dir);
    let store = CacheStore::open(CacheConfig::new(&path, "txt2img")).unwrap();
    store.put("k", b"v").unwrap();

    {
        let conn = rusqlite::Connection::open(&path).unwrap();
        conn.execute_batch("DROP TABLE kv;").unwrap();
    }

    assert!(store.get("k").unwrap().is_none());

    store.put("k", b"rebuilt").unwrap();
    assert_eq!(store.get("k").unwrap().unwrap(), b"rebuilt");
}

#[test]
fn test_schema_damaged_while_open_heals_on_put() {
    let temp_dir = TempDir::new().unwrap();
    let path = db_path(&temp_dir);
    let store = CacheStore::open(CacheConfig::new(&path, "txt2img")).unwrap();

    {
        let conn = rusqlite::Connection::open(&path).unwrap();
        conn.execute_batch("DROP TABLE kv;").unwrap();
    }

    store.put("k", b"v").unwrap();
    assert_eq!(store.get("k").unwrap().unwrap(), b"v");
}

#[test]
fn test_image_round_trip() {
    let temp_dir = TempDir::new().unwrap();
    let store = CacheStore::open(CacheConfig::new(
        db_path(&temp_dir),
        Pipeline::Txt2Img.namespace(),
    ))
    .unwrap();
    let image = DynamicImage::ImageRgba8(RgbaImage::from_pixel(16, 16, Rgba([200, 40, 90, 255])));

    let key = Txt2ImgRequest {
        prompt: "slime, bouncing".to_string(),
        seed: Some(3),
        ..Txt2ImgRequest::default()
    }
    .cache_key()
    .unwrap();
    store.put_image(&key, &image).unwrap();

    let cached = store.get_image(&key).unwrap().unwrap();
    assert_eq!(cached.width(), 16);
    assert_eq!(cached.height(), 16);
    assert_eq!(cached.to_rgba8(), image.to_rgba8());
}

#[test]
fn test_concurrent_puts_respect_budget() {
    let temp_dir = TempDir::new().unwrap();
    let config = CacheConfig::new(db_path(&temp_dir), "txt2img").with_max_bytes(4_096);
    let store = Arc::new(CacheStore::open(config).unwrap());

    let handles: Vec<_> = (0..8)
        .map(|worker| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for i in 0..25 {
                    let key = format!("w{worker}-{i}");
                    store.put(&key, &[worker as u8; 256]).unwrap();
                    let _ = store.get(&key).unwrap();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let stats = store.stats().unwrap();
    assert!(stats.total_bytes <= 4_096);
    assert_eq!(stats.total_bytes, stats.entry_count * 256);
}

#[test]
fn test_concurrent_handles_on_one_file() {
    let temp_dir = TempDir::new().unwrap();
    let path = db_path(&temp_dir);
    // Create the file before the workers race to open it.
    drop(CacheDb::open(&path).unwrap());

    let handles: Vec<_> = ["txt2img", "img2img", "inpaint"]
        .into_iter()
        .map(|namespace| {
            let path = path.clone();
            thread::spawn(move || {
                let store = CacheStore::open(CacheConfig::new(path, namespace)).unwrap();
                for i in 0..20 {
                    store.put(&format!("k{i}"), namespace.as_bytes()).unwrap();
                }
                store.stats().unwrap()
            })
        })
        .collect();

    for handle in handles {
        let stats = handle.join().unwrap();
        assert_eq!(stats.entry_count, 20);
    }
}
