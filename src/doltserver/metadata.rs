//! Store-metadata reconciler.
//!
//! Every rig's issue store carries a metadata.json naming the backend it
//! must use. When a rig's database lives on the shared server but its
//! metadata still says embedded/sqlite, bd silently creates an isolated
//! local database instead of connecting — the split-brain failure. The
//! reconciler upserts the server fields while preserving everything else
//! in the record.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

use anyhow::Context;
use serde_json::{Map, Value};

use crate::fsutil::{self, FileLock};
use crate::paths;

/// Per-path mutexes for in-process synchronization. flock is
/// inter-process only: the same process can re-acquire the same flock
/// without blocking, so concurrent reconciles inside one process need a
/// real mutex per metadata path.
fn metadata_mutex(path: &Path) -> Arc<Mutex<()>> {
    static REGISTRY: OnceLock<Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>> = OnceLock::new();
    let registry = REGISTRY.get_or_init(|| Mutex::new(HashMap::new()));
    let mut map = registry.lock().unwrap_or_else(|e| e.into_inner());
    map.entry(path.to_path_buf())
        .or_insert_with(|| Arc::new(Mutex::new(())))
        .clone()
}

/// Write or update a rig's store metadata to point at the shared server.
///
/// Preserves all existing keys, then upserts `database`, `backend`,
/// `dolt_mode`, and `dolt_database`; `jsonl_export` is inserted only when
/// absent. Idempotent. Both the per-path mutex and the interprocess file
/// lock are held across the whole mkdir + read-modify-write sequence —
/// creating the directory outside the lock reopens a TOCTOU window where
/// a sibling reads stale contents.
pub fn ensure_metadata(town_root: &Path, rig_name: &str) -> anyhow::Result<()> {
    let store_dir = paths::rig_store_dir(town_root, rig_name);
    let metadata_path = store_dir.join("metadata.json");

    let mutex = metadata_mutex(&metadata_path);
    let _guard = mutex.lock().unwrap_or_else(|e| e.into_inner());

    std::fs::create_dir_all(&store_dir)
        .with_context(|| format!("creating store directory {}", store_dir.display()))?;

    let _lock = FileLock::acquire(&store_dir.join(".metadata.lock"))
        .context("locking metadata for update")?;

    // Preserve any extra fields an older tool or the user put there.
    let mut existing: Map<String, Value> = match std::fs::read_to_string(&metadata_path) {
        Ok(data) => serde_json::from_str(&data).unwrap_or_default(),
        Err(_) => Map::new(),
    };

    existing.insert("database".into(), Value::String("dolt".into()));
    existing.insert("backend".into(), Value::String("dolt".into()));
    existing.insert("dolt_mode".into(), Value::String("server".into()));
    existing.insert("dolt_database".into(), Value::String(rig_name.into()));
    existing
        .entry("jsonl_export")
        .or_insert_with(|| Value::String("issues.jsonl".into()));

    fsutil::atomic_write_json(&metadata_path, &Value::Object(existing))
        .context("writing metadata.json")?;

    Ok(())
}

/// Reconcile metadata for every rig database the server knows. Never
/// fails the sweep on a single rig: returns the updated names and the
/// per-rig errors separately.
pub fn ensure_all_metadata(town_root: &Path) -> (Vec<String>, Vec<anyhow::Error>) {
    let databases = match super::list_databases(town_root) {
        Ok(dbs) => dbs,
        Err(e) => return (Vec::new(), vec![e.context("listing databases")]),
    };

    let mut updated = Vec::new();
    let mut errors = Vec::new();
    for db_name in databases {
        match ensure_metadata(town_root, &db_name) {
            Ok(()) => updated.push(db_name),
            Err(e) => errors.push(e.context(db_name)),
        }
    }
    (updated, errors)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_metadata(path: &Path) -> Map<String, Value> {
        let data = std::fs::read_to_string(path).unwrap();
        serde_json::from_str(&data).unwrap()
    }

    #[test]
    fn hq_metadata_preserves_extra_keys() {
        let tmp = tempfile::tempdir().unwrap();
        let store = tmp.path().join(".beads");
        std::fs::create_dir_all(&store).unwrap();
        std::fs::write(
            store.join("metadata.json"),
            r#"{"database": "beads.db", "custom_field": "preserved"}"#,
        )
        .unwrap();

        ensure_metadata(tmp.path(), "hq").unwrap();

        let meta = read_metadata(&store.join("metadata.json"));
        assert_eq!(meta["backend"], "dolt");
        assert_eq!(meta["dolt_mode"], "server");
        assert_eq!(meta["dolt_database"], "hq");
        assert_eq!(meta["database"], "dolt");
        assert_eq!(meta["jsonl_export"], "issues.jsonl");
        assert_eq!(meta["custom_field"], "preserved");
    }

    #[test]
    fn rig_metadata_written_to_mayor_store() {
        let tmp = tempfile::tempdir().unwrap();
        let store = tmp.path().join("myrig/mayor/rig/.beads");
        std::fs::create_dir_all(&store).unwrap();

        ensure_metadata(tmp.path(), "myrig").unwrap();

        let meta = read_metadata(&store.join("metadata.json"));
        assert_eq!(meta["backend"], "dolt");
        assert_eq!(meta["dolt_database"], "myrig");
        assert_eq!(meta["jsonl_export"], "issues.jsonl");
    }

    #[test]
    fn existing_jsonl_export_untouched() {
        let tmp = tempfile::tempdir().unwrap();
        let store = tmp.path().join(".beads");
        std::fs::create_dir_all(&store).unwrap();
        std::fs::write(
            store.join("metadata.json"),
            r#"{"jsonl_export": "custom.jsonl"}"#,
        )
        .unwrap();

        ensure_metadata(tmp.path(), "hq").unwrap();

        let meta = read_metadata(&store.join("metadata.json"));
        assert_eq!(meta["jsonl_export"], "custom.jsonl");
    }

    #[test]
    fn reconcile_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join(".beads")).unwrap();

        ensure_metadata(tmp.path(), "hq").unwrap();
        let first = std::fs::read_to_string(tmp.path().join(".beads/metadata.json")).unwrap();
        ensure_metadata(tmp.path(), "hq").unwrap();
        let second = std::fs::read_to_string(tmp.path().join(".beads/metadata.json")).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn reconcile_creates_missing_store_dir() {
        let tmp = tempfile::tempdir().unwrap();
        ensure_metadata(tmp.path(), "newrig").unwrap();
        assert!(
            tmp.path()
                .join("newrig/mayor/rig/.beads/metadata.json")
                .exists()
        );
    }

    #[test]
    fn ensure_all_covers_every_database() {
        let tmp = tempfile::tempdir().unwrap();
        for name in ["hq", "myrig"] {
            std::fs::create_dir_all(paths::data_dir(tmp.path()).join(name).join(".dolt"))
                .unwrap();
        }
        std::fs::create_dir_all(tmp.path().join(".beads")).unwrap();
        std::fs::create_dir_all(tmp.path().join("myrig/mayor/rig/.beads")).unwrap();

        let (updated, errors) = ensure_all_metadata(tmp.path());
        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
        assert_eq!(updated.len(), 2);
    }

    #[test]
    fn concurrent_reconciles_agree() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join(".beads")).unwrap();
        let root = tmp.path().to_path_buf();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let root = root.clone();
                std::thread::spawn(move || ensure_metadata(&root, "hq"))
            })
            .collect();
        for h in handles {
            h.join().unwrap().unwrap();
        }

        let meta = read_metadata(&root.join(".beads/metadata.json"));
        assert_eq!(meta["dolt_database"], "hq");
    }
}
