//! Integration tests for the pixstu-cachectl binary.
//!
//! Each test seeds a cache through the library, runs the binary against the
//! same project root, and checks both its output and the resulting store.

use pixstu_cache::{CacheConfig, CacheStore, NamespaceStats, PathsConfig};
use serde_json::Value;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

fn seed(root: &Path, namespace: &str, entries: &[(&str, usize)]) -> CacheStore {
    let config = CacheConfig::new(PathsConfig::cache_db_path(root), namespace);
    let store = CacheStore::open(config).expect("Failed to open cache");
    for (key, size) in entries {
        store.put(key, &vec![b'x'; *size]).unwrap();
    }
    store
}

fn run_cli(root: &Path, args: &[&str]) -> Output {
    let output = Command::new(env!("CARGO_BIN_EXE_pixstu-cachectl"))
        .arg("--root")
        .arg(root)
        .args(args)
        .env_remove("PIXSTU_CACHE_OFF")
        .output()
        .expect("Failed to run pixstu-cachectl");
    assert!(
        output.status.success(),
        "command {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    output
}

fn stats_json(root: &Path, namespace: &str) -> Vec<NamespaceStats> {
    let output = run_cli(root, &["--namespace", namespace, "stats", "--json"]);
    serde_json::from_slice(&output.stdout).expect("stats output should be JSON")
}

#[test]
fn test_stats_reports_namespace() {
    let temp_dir = TempDir::new().unwrap();
    seed(temp_dir.path(), "txt2img", &[("a", 100), ("b", 50)]);

    let stats = stats_json(temp_dir.path(), "txt2img");

    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].namespace, "txt2img");
    assert_eq!(stats[0].entry_count, 2);
    assert_eq!(stats[0].total_bytes, 150);
}

#[test]
fn test_stats_all_lists_every_namespace() {
    let temp_dir = TempDir::new().unwrap();
    seed(temp_dir.path(), "txt2img", &[("a", 10)]);
    seed(temp_dir.path(), "inpaint", &[("a", 20), ("b", 20)]);

    let output = run_cli(temp_dir.path(), &["stats", "--all", "--json"]);
    let stats: Vec<NamespaceStats> = serde_json::from_slice(&output.stdout).unwrap();

    let names: Vec<&str> = stats.iter().map(|s| s.namespace.as_str()).collect();
    assert_eq!(names, vec!["inpaint", "txt2img"]);
}

#[test]
fn test_prune_to_target() {
    let temp_dir = TempDir::new().unwrap();
    seed(temp_dir.path(), "img2img", &[("a", 400), ("b", 400), ("c", 400)]);

    let output = run_cli(
        temp_dir.path(),
        &["--namespace", "img2img", "prune", "--target-bytes", "500"],
    );
    assert!(String::from_utf8_lossy(&output.stdout).contains("Cache pruned"));

    let stats = stats_json(temp_dir.path(), "img2img");
    assert_eq!(stats[0].entry_count, 1);
    assert_eq!(stats[0].total_bytes, 400);
}

#[test]
fn test_clear_only_touches_namespace() {
    let temp_dir = TempDir::new().unwrap();
    seed(temp_dir.path(), "txt2img", &[("a", 10)]);
    seed(temp_dir.path(), "inpaint", &[("a", 10)]);

    run_cli(temp_dir.path(), &["--namespace", "txt2img", "clear"]);

    assert_eq!(stats_json(temp_dir.path(), "txt2img")[0].entry_count, 0);
    assert_eq!(stats_json(temp_dir.path(), "inpaint")[0].entry_count, 1);
}

#[test]
fn test_list_json_most_recent_first() {
    let temp_dir = TempDir::new().unwrap();
    let store = seed(temp_dir.path(), "txt2img", &[("a", 1), ("b", 2)]);
    store.get("a").unwrap();
    drop(store);

    let output = run_cli(temp_dir.path(), &["--namespace", "txt2img", "list", "--json"]);
    let entries: Value = serde_json::from_slice(&output.stdout).unwrap();

    let keys: Vec<&str> = entries
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["key"].as_str().unwrap())
        .collect();
    assert_eq!(keys, vec!["a", "b"]);
}

#[test]
fn test_vacuum_and_runtime_config_created() {
    let temp_dir = TempDir::new().unwrap();
    seed(temp_dir.path(), "txt2img", &[("a", 10)]);

    let output = run_cli(temp_dir.path(), &["vacuum"]);

    assert!(String::from_utf8_lossy(&output.stdout).contains("Cache vacuumed"));
    assert!(PathsConfig::runtime_config_path(temp_dir.path()).exists());
}

#[test]
fn test_invalid_runtime_config_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = PathsConfig::runtime_config_path(temp_dir.path());
    std::fs::create_dir_all(config_path.parent().unwrap()).unwrap();
    std::fs::write(&config_path, r#"{"cache": {"ttl_seconds": -1}}"#).unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_pixstu-cachectl"))
        .arg("--root")
        .arg(temp_dir.path())
        .arg("stats")
        .output()
        .unwrap();

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("ttl_seconds"));
}
