//! Migration of legacy per-rig embedded databases into the centralized
//! data directory.
//!
//! The legacy layout kept each rig's dolt database inside its issue
//! store at `<store>/dolt/beads`. Server mode wants them all under
//! `<town>/.dolt-data/<rig>`. Migration is a directory move plus a
//! metadata reconcile.

use std::path::{Path, PathBuf};

use anyhow::{Context, bail};

use crate::fsutil;
use crate::paths;

use super::{ServerConfig, ensure_metadata};

/// A pending database migration from the legacy layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    pub rig_name: String,
    pub source_path: PathBuf,
    pub target_path: PathBuf,
}

/// Find legacy databases that can be migrated.
///
/// Checks the town-level store (→ hq) and every non-hidden rig directory,
/// resolving the store redirect before probing for `<store>/dolt/beads`.
/// Rigs whose target database already exists are skipped.
pub fn find_migratable(town_root: &Path) -> Vec<Migration> {
    let config = ServerConfig::new(town_root);
    let mut migrations = Vec::new();

    // Town-level store → .dolt-data/hq
    if let Ok(town_store) = paths::resolve_store_dir(town_root) {
        let source = town_store.join("dolt").join("beads");
        if source.join(".dolt").exists() {
            let target = config.data_dir.join(paths::HQ_RIG);
            if !target.join(".dolt").exists() {
                migrations.push(Migration {
                    rig_name: paths::HQ_RIG.to_string(),
                    source_path: source,
                    target_path: target,
                });
            }
        }
    }

    let entries = match std::fs::read_dir(town_root) {
        Ok(e) => e,
        Err(_) => return migrations,
    };

    for entry in entries.flatten() {
        if !entry.path().is_dir() {
            continue;
        }
        let Some(rig_name) = entry.file_name().to_str().map(String::from) else {
            continue;
        };
        if rig_name.starts_with('.') {
            continue;
        }

        let Ok(store) = paths::resolve_store_dir(&town_root.join(&rig_name)) else {
            continue;
        };
        let source = store.join("dolt").join("beads");
        if !source.join(".dolt").exists() {
            continue;
        }

        let target = config.data_dir.join(&rig_name);
        if target.join(".dolt").exists() {
            continue;
        }

        migrations.push(Migration {
            rig_name,
            source_path: source,
            target_path: target,
        });
    }

    migrations
}

/// Migrate one rig's legacy database into the data directory.
///
/// Same-filesystem rename when possible, copy-then-delete across
/// devices. The source directory is not backed up; rollback tooling
/// works against externally-made backups.
pub fn migrate_rig(town_root: &Path, rig_name: &str, source_path: &Path) -> anyhow::Result<()> {
    let config = ServerConfig::new(town_root);
    let target = config.data_dir.join(rig_name);

    if target.join(".dolt").exists() {
        bail!(
            "rig database {rig_name:?} already exists at {}",
            target.display()
        );
    }
    if !source_path.join(".dolt").exists() {
        bail!("source database not found at {}", source_path.display());
    }

    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("creating data directory {}", config.data_dir.display()))?;

    fsutil::move_dir(source_path, &target).context("moving database")?;

    if let Err(e) = ensure_metadata(town_root, rig_name) {
        // The move landed; metadata can be repaired with fix-metadata.
        eprintln!("Warning: database migrated but metadata.json update failed: {e:#}");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_rig_database_via_redirect() {
        let town = tempfile::tempdir().unwrap();
        let rig_dir = town.path().join("nexus");
        let store = rig_dir.join(".beads");
        std::fs::create_dir_all(&store).unwrap();
        std::fs::write(store.join("redirect"), "mayor/rig/.beads\n").unwrap();
        std::fs::create_dir_all(rig_dir.join("mayor/rig/.beads/dolt/beads/.dolt")).unwrap();
        std::fs::create_dir_all(paths::data_dir(town.path())).unwrap();

        let migrations = find_migratable(town.path());

        let m = migrations
            .iter()
            .find(|m| m.rig_name == "nexus")
            .expect("nexus migration via redirect");
        assert_eq!(
            m.source_path,
            rig_dir.join("mayor/rig/.beads/dolt/beads")
        );
        assert_eq!(m.target_path, paths::data_dir(town.path()).join("nexus"));
    }

    #[test]
    fn finds_rig_database_without_redirect() {
        let town = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(town.path().join("simple/.beads/dolt/beads/.dolt")).unwrap();
        std::fs::create_dir_all(paths::data_dir(town.path())).unwrap();

        let migrations = find_migratable(town.path());

        let m = migrations
            .iter()
            .find(|m| m.rig_name == "simple")
            .expect("simple migration");
        assert_eq!(
            m.source_path,
            town.path().join("simple/.beads/dolt/beads")
        );
    }

    #[test]
    fn finds_town_level_database_as_hq() {
        let town = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(town.path().join(".beads/dolt/beads/.dolt")).unwrap();

        let migrations = find_migratable(town.path());

        let m = migrations
            .iter()
            .find(|m| m.rig_name == "hq")
            .expect("hq migration");
        assert_eq!(m.target_path, paths::data_dir(town.path()).join("hq"));
    }

    #[test]
    fn skips_already_migrated_rigs() {
        let town = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(town.path().join("done/.beads/dolt/beads/.dolt")).unwrap();
        std::fs::create_dir_all(paths::data_dir(town.path()).join("done/.dolt")).unwrap();

        let migrations = find_migratable(town.path());
        assert!(!migrations.iter().any(|m| m.rig_name == "done"));
    }

    #[test]
    fn skips_hidden_directories() {
        let town = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(town.path().join(".hidden/.beads/dolt/beads/.dolt")).unwrap();

        let migrations = find_migratable(town.path());
        assert!(!migrations.iter().any(|m| m.rig_name == ".hidden"));
    }

    #[test]
    fn migrate_moves_database_and_writes_metadata() {
        let town = tempfile::tempdir().unwrap();
        let source = town.path().join("nexus/.beads/dolt/beads");
        std::fs::create_dir_all(source.join(".dolt")).unwrap();
        std::fs::write(source.join(".dolt/config.json"), "{}").unwrap();

        migrate_rig(town.path(), "nexus", &source).unwrap();

        let target = paths::data_dir(town.path()).join("nexus");
        assert!(target.join(".dolt/config.json").exists());
        assert!(!source.exists());

        let meta = std::fs::read_to_string(
            town.path().join("nexus/mayor/rig/.beads/metadata.json"),
        )
        .unwrap();
        assert!(meta.contains("\"dolt_database\": \"nexus\""));
    }

    #[test]
    fn migrate_refuses_existing_target() {
        let town = tempfile::tempdir().unwrap();
        let source = town.path().join("nexus/.beads/dolt/beads");
        std::fs::create_dir_all(source.join(".dolt")).unwrap();
        std::fs::create_dir_all(paths::data_dir(town.path()).join("nexus/.dolt")).unwrap();

        let err = migrate_rig(town.path(), "nexus", &source).unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn migrate_refuses_missing_source() {
        let town = tempfile::tempdir().unwrap();
        let source = town.path().join("ghost/.beads/dolt/beads");

        let err = migrate_rig(town.path(), "ghost", &source).unwrap_err();
        assert!(err.to_string().contains("source database not found"));
    }
}
