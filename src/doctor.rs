//! Migration-readiness checks.
//!
//! Three checks guard the sqlite→dolt migration and the server-mode
//! metadata that prevents split-brain: tool version gating, unmigrated
//! rig detection, and per-rig dolt metadata verification (fixable via
//! the metadata reconciler).

use std::path::Path;

use serde::Serialize;

use crate::beads::Beads;
use crate::doltserver;
use crate::git::Git;
use crate::paths;
use crate::rigs::RigsConfig;

/// Outcome class of a single check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Ok,
    Warning,
    Error,
}

/// One check's result, shaped for both human and JSON output.
#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub name: String,
    pub status: CheckStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fix_hint: Option<String>,
}

/// Version compatibility info.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationVersions {
    pub township: String,
    pub bd: String,
    pub bd_supports_dolt: bool,
}

/// Migration status of one rig.
#[derive(Debug, Clone, Serialize)]
pub struct RigMigration {
    pub name: String,
    pub backend: String,
    pub needs_migration: bool,
    pub git_clean: bool,
    pub store_dir: String,
}

/// Aggregate migration readiness, machine-parseable.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationReadiness {
    pub ready: bool,
    pub version: MigrationVersions,
    pub rigs: Vec<RigMigration>,
    pub blockers: Vec<String>,
}

/// Whether a bd version string supports the Dolt backend (0.40.0+).
///
/// Accepts the tool's standard banner, `bd version MAJOR.MINOR.PATCH ...`;
/// anything malformed answers false.
pub fn bd_supports_dolt(version_str: &str) -> bool {
    let mut parts = version_str.split_whitespace();
    let (Some(_bd), Some(_version_word), Some(version)) =
        (parts.next(), parts.next(), parts.next())
    else {
        return false;
    };

    let mut nums = version.split('.');
    let (Some(major), Some(minor)) = (nums.next(), nums.next()) else {
        return false;
    };
    let (Ok(major), Ok(minor)) = (major.parse::<u32>(), minor.parse::<u32>()) else {
        return false;
    };

    major > 0 || minor >= 40
}

fn check_versions() -> MigrationVersions {
    let bd = Beads::version().unwrap_or_else(|_| "unknown".to_string());
    let supports = bd_supports_dolt(&bd);
    MigrationVersions {
        township: format!("township version {}", env!("CARGO_PKG_VERSION")),
        bd,
        bd_supports_dolt: supports,
    }
}

/// Backend recorded in a store's metadata. Absence of metadata in an
/// existing store dir means implicit sqlite (pre-dolt layout); a missing
/// dir means no store at all.
fn store_backend(store_dir: &Path) -> Option<String> {
    let metadata_path = store_dir.join("metadata.json");
    let data = match std::fs::read_to_string(&metadata_path) {
        Ok(d) => d,
        Err(_) => {
            return if store_dir.exists() {
                Some("sqlite".to_string())
            } else {
                None
            };
        }
    };

    let Ok(value) = serde_json::from_str::<serde_json::Value>(&data) else {
        return Some("unknown".to_string());
    };
    let backend = value
        .get("backend")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();
    Some(if backend.is_empty() {
        "sqlite".to_string()
    } else {
        backend
    })
}

fn rig_migration_status(name: &str, store_dir: &Path, repo_dir: &Path) -> RigMigration {
    let backend = store_backend(store_dir).unwrap_or_else(|| "unknown".to_string());
    let needs_migration = backend != "dolt";

    let git_clean = Git::new(repo_dir)
        .has_uncommitted_changes()
        .map(|dirty| !dirty)
        .unwrap_or(true);

    RigMigration {
        name: name.to_string(),
        backend,
        needs_migration,
        git_clean,
        store_dir: store_dir.to_string_lossy().into_owned(),
    }
}

/// Full migration-readiness aggregate: versions plus per-rig backend and
/// git state.
pub fn migration_readiness(town_root: &Path) -> (CheckResult, MigrationReadiness) {
    let mut readiness = MigrationReadiness {
        ready: true,
        version: check_versions(),
        rigs: Vec::new(),
        blockers: Vec::new(),
    };

    if !readiness.version.bd_supports_dolt {
        readiness.ready = false;
        readiness
            .blockers
            .push("bd version does not support Dolt backend".to_string());
    }

    let town_store = town_root.join(paths::STORE_DIR);
    if town_store.exists() {
        let status = rig_migration_status("town-root", &town_store, town_root);
        if status.needs_migration {
            readiness.ready = false;
            readiness
                .blockers
                .push(format!("Town root store uses {} backend", status.backend));
        }
        if !status.git_clean {
            readiness.ready = false;
            readiness
                .blockers
                .push("Town root has uncommitted changes".to_string());
        }
        readiness.rigs.push(status);
    }

    let rigs = RigsConfig::load(town_root).unwrap_or_default();
    for rig_name in rigs.names() {
        let rig_path = town_root.join(&rig_name);
        let store_dir = rig_path.join("mayor").join("rig").join(paths::STORE_DIR);
        if !store_dir.exists() {
            continue;
        }
        let status = rig_migration_status(&rig_name, &store_dir, &rig_path);
        if status.needs_migration {
            readiness.ready = false;
            readiness.blockers.push(format!(
                "Rig {} store uses {} backend",
                rig_name, status.backend
            ));
        }
        if !status.git_clean {
            readiness.ready = false;
            readiness
                .blockers
                .push(format!("Rig {rig_name} has uncommitted changes"));
        }
        readiness.rigs.push(status);
    }

    let result = if readiness.ready {
        CheckResult {
            name: "migration-readiness".into(),
            status: CheckStatus::Ok,
            message: "Workspace ready for migration (all rigs on Dolt)".into(),
            details: Vec::new(),
            fix_hint: None,
        }
    } else {
        let needs = readiness.rigs.iter().filter(|r| r.needs_migration).count();
        CheckResult {
            name: "migration-readiness".into(),
            status: CheckStatus::Warning,
            message: format!(
                "{needs} rig(s) need migration, {} blocker(s)",
                readiness.blockers.len()
            ),
            details: readiness.blockers.clone(),
            fix_hint: Some("Run 'bd migrate' in each rig to migrate from SQLite to Dolt".into()),
        }
    };

    (result, readiness)
}

/// Report rigs still on the sqlite backend.
pub fn unmigrated_rigs(town_root: &Path) -> CheckResult {
    let mut unmigrated = Vec::new();

    if store_backend(&town_root.join(paths::STORE_DIR)).as_deref() == Some("sqlite") {
        unmigrated.push("town-root".to_string());
    }

    let rigs = RigsConfig::load(town_root).unwrap_or_default();
    for rig_name in rigs.names() {
        let store_dir = town_root
            .join(&rig_name)
            .join("mayor")
            .join("rig")
            .join(paths::STORE_DIR);
        if store_backend(&store_dir).as_deref() == Some("sqlite") {
            unmigrated.push(rig_name);
        }
    }

    if unmigrated.is_empty() {
        CheckResult {
            name: "unmigrated-rigs".into(),
            status: CheckStatus::Ok,
            message: "All rigs using Dolt backend".into(),
            details: Vec::new(),
            fix_hint: None,
        }
    } else {
        CheckResult {
            name: "unmigrated-rigs".into(),
            status: CheckStatus::Warning,
            message: format!("{} rig(s) still on SQLite backend", unmigrated.len()),
            details: unmigrated,
            fix_hint: Some("Run 'bd migrate' in each rig to migrate from SQLite to Dolt".into()),
        }
    }
}

fn has_dolt_metadata(store_dir: &Path, expected_db: &str) -> bool {
    let Ok(data) = std::fs::read_to_string(store_dir.join("metadata.json")) else {
        return false;
    };
    let Ok(value) = serde_json::from_str::<serde_json::Value>(&data) else {
        return false;
    };
    let field = |key: &str| value.get(key).and_then(|v| v.as_str()).unwrap_or("");
    field("backend") == "dolt"
        && field("dolt_mode") == "server"
        && field("dolt_database") == expected_db
}

/// Verify every served rig's metadata names the shared server. Returns
/// the check result plus the offending rig names for a fix pass.
pub fn dolt_metadata(town_root: &Path) -> (CheckResult, Vec<String>) {
    let data_dir = paths::data_dir(town_root);
    if !data_dir.exists() {
        return (
            CheckResult {
                name: "dolt-metadata".into(),
                status: CheckStatus::Ok,
                message: "No Dolt data directory (dolt not in use)".into(),
                details: Vec::new(),
                fix_hint: None,
            },
            Vec::new(),
        );
    }

    let databases = doltserver::list_databases(town_root).unwrap_or_default();
    let mut missing = Vec::new();
    let mut offenders = Vec::new();
    let mut ok = 0usize;

    for db_name in databases {
        let store_dir = paths::rig_store_dir(town_root, &db_name);
        if has_dolt_metadata(&store_dir, &db_name) {
            ok += 1;
        } else {
            let shown = store_dir
                .strip_prefix(town_root)
                .unwrap_or(&store_dir)
                .to_string_lossy()
                .into_owned();
            missing.push(format!("{db_name} ({shown})"));
            offenders.push(db_name);
        }
    }

    let result = if missing.is_empty() {
        CheckResult {
            name: "dolt-metadata".into(),
            status: CheckStatus::Ok,
            message: format!("All {ok} rig(s) have Dolt server metadata"),
            details: Vec::new(),
            fix_hint: None,
        }
    } else {
        CheckResult {
            name: "dolt-metadata".into(),
            status: CheckStatus::Warning,
            message: format!("{} rig(s) missing Dolt server metadata", missing.len()),
            details: missing
                .into_iter()
                .map(|m| format!("Missing dolt config: {m}"))
                .collect(),
            fix_hint: Some("Run 'township dolt fix-metadata' to update all metadata.json files".into()),
        }
    };

    (result, offenders)
}

/// Fix the metadata of the offending rigs via the reconciler.
pub fn fix_dolt_metadata(town_root: &Path, offenders: &[String]) -> anyhow::Result<()> {
    for rig_name in offenders {
        doltserver::ensure_metadata(town_root, rig_name)
            .map_err(|e| e.context(format!("fixing {rig_name}")))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_gating() {
        assert!(bd_supports_dolt("bd version 0.49.3 (c)"));
        assert!(!bd_supports_dolt("bd version 0.39.9 (c)"));
        assert!(bd_supports_dolt("bd version 1.0.0 (c)"));
        assert!(bd_supports_dolt("bd version 0.40.0"));
        assert!(!bd_supports_dolt("invalid"));
        assert!(!bd_supports_dolt(""));
        assert!(!bd_supports_dolt("bd version x.y.z"));
    }

    fn write_store(dir: &Path, metadata: Option<&str>) {
        std::fs::create_dir_all(dir).unwrap();
        if let Some(m) = metadata {
            std::fs::write(dir.join("metadata.json"), m).unwrap();
        }
    }

    fn write_rigs(town: &Path, body: &str) {
        std::fs::create_dir_all(town.join("mayor")).unwrap();
        std::fs::write(town.join("mayor/rigs.json"), body).unwrap();
    }

    #[test]
    fn backend_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let store = tmp.path().join(".beads");

        assert_eq!(store_backend(&store), None);

        write_store(&store, None);
        assert_eq!(store_backend(&store).as_deref(), Some("sqlite"));

        std::fs::write(store.join("metadata.json"), "not json").unwrap();
        assert_eq!(store_backend(&store).as_deref(), Some("unknown"));

        std::fs::write(store.join("metadata.json"), r#"{"backend": "dolt"}"#).unwrap();
        assert_eq!(store_backend(&store).as_deref(), Some("dolt"));

        std::fs::write(store.join("metadata.json"), r#"{"database": "x"}"#).unwrap();
        assert_eq!(store_backend(&store).as_deref(), Some("sqlite"));
    }

    #[test]
    fn unmigrated_flags_sqlite_rigs() {
        let tmp = tempfile::tempdir().unwrap();
        write_rigs(tmp.path(), r#"{"rigs": {"nexus": {}}}"#);
        write_store(&tmp.path().join(".beads"), Some(r#"{"backend": "dolt"}"#));
        write_store(
            &tmp.path().join("nexus/mayor/rig/.beads"),
            Some(r#"{"backend": "sqlite"}"#),
        );

        let result = unmigrated_rigs(tmp.path());
        assert_eq!(result.status, CheckStatus::Warning);
        assert_eq!(result.details, vec!["nexus".to_string()]);
    }

    #[test]
    fn unmigrated_all_dolt_is_ok() {
        let tmp = tempfile::tempdir().unwrap();
        write_rigs(tmp.path(), r#"{"rigs": {}}"#);
        write_store(&tmp.path().join(".beads"), Some(r#"{"backend": "dolt"}"#));

        let result = unmigrated_rigs(tmp.path());
        assert_eq!(result.status, CheckStatus::Ok);
    }

    #[test]
    fn missing_metadata_counts_as_sqlite() {
        let tmp = tempfile::tempdir().unwrap();
        write_rigs(tmp.path(), r#"{"rigs": {}}"#);
        write_store(&tmp.path().join(".beads"), None);

        let result = unmigrated_rigs(tmp.path());
        assert_eq!(result.status, CheckStatus::Warning);
        assert_eq!(result.details, vec!["town-root".to_string()]);
    }

    #[test]
    fn metadata_check_without_data_dir_is_ok() {
        let tmp = tempfile::tempdir().unwrap();
        let (result, offenders) = dolt_metadata(tmp.path());
        assert_eq!(result.status, CheckStatus::Ok);
        assert!(offenders.is_empty());
    }

    #[test]
    fn metadata_check_flags_and_fixes_offenders() {
        let tmp = tempfile::tempdir().unwrap();
        write_rigs(tmp.path(), r#"{"rigs": {"nexus": {}}}"#);
        std::fs::create_dir_all(paths::data_dir(tmp.path()).join("hq/.dolt")).unwrap();
        std::fs::create_dir_all(paths::data_dir(tmp.path()).join("nexus/.dolt")).unwrap();
        // hq has correct metadata; nexus is missing entirely.
        write_store(
            &tmp.path().join(".beads"),
            Some(r#"{"backend": "dolt", "dolt_mode": "server", "dolt_database": "hq"}"#),
        );
        std::fs::create_dir_all(tmp.path().join("nexus/mayor/rig/.beads")).unwrap();

        let (result, offenders) = dolt_metadata(tmp.path());
        assert_eq!(result.status, CheckStatus::Warning);
        assert_eq!(offenders, vec!["nexus".to_string()]);

        fix_dolt_metadata(tmp.path(), &offenders).unwrap();

        let (result, offenders) = dolt_metadata(tmp.path());
        assert_eq!(result.status, CheckStatus::Ok, "{result:?}");
        assert!(offenders.is_empty());
    }

    #[test]
    fn metadata_check_requires_matching_database() {
        let tmp = tempfile::tempdir().unwrap();
        write_rigs(tmp.path(), r#"{"rigs": {}}"#);
        std::fs::create_dir_all(paths::data_dir(tmp.path()).join("hq/.dolt")).unwrap();
        // dolt_database names the wrong rig.
        write_store(
            &tmp.path().join(".beads"),
            Some(r#"{"backend": "dolt", "dolt_mode": "server", "dolt_database": "other"}"#),
        );

        let (result, offenders) = dolt_metadata(tmp.path());
        assert_eq!(result.status, CheckStatus::Warning);
        assert_eq!(offenders, vec!["hq".to_string()]);
    }

    #[test]
    fn readiness_reports_blockers() {
        let tmp = tempfile::tempdir().unwrap();
        write_rigs(tmp.path(), r#"{"rigs": {}}"#);
        write_store(
            &tmp.path().join(".beads"),
            Some(r#"{"backend": "sqlite", "database": "sqlite3"}"#),
        );

        let (result, readiness) = migration_readiness(tmp.path());
        assert_eq!(result.status, CheckStatus::Warning);
        assert!(!readiness.ready);
        assert!(
            readiness
                .rigs
                .iter()
                .any(|r| r.name == "town-root" && r.needs_migration)
        );
    }
}
