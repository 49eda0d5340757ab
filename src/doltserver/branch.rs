//! Per-polecat branch lifecycle on the shared server.
//!
//! Each polecat writes issues on its own database branch, eliminating
//! optimistic-lock contention on main. Create precedes any write on the
//! branch; merge-to-main precedes delete; delete is best-effort.

use std::path::Path;

use anyhow::{Context, bail};
use chrono::Utc;

use super::rig_sql;

/// Validate a branch name before it is interpolated into SQL text.
///
/// The dolt CLI offers no parameterized queries, so this validator is the
/// injection boundary: alphanumerics, dot, underscore, hyphen, and slash
/// only. Every caller that accepts a name from an outer layer re-runs
/// this before building a statement.
pub fn validate_branch_name(branch: &str) -> anyhow::Result<()> {
    if branch.is_empty() {
        bail!("branch name must not be empty");
    }
    if !branch
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'/' | b'-'))
    {
        bail!("branch name {branch:?} contains invalid characters");
    }
    Ok(())
}

/// The branch name for a polecat: `polecat-<name>-<unix-seconds>`.
/// The timestamp suffix makes names monotonic per polecat, so
/// lexicographic order matches chronological order.
pub fn polecat_branch_name(polecat_name: &str) -> String {
    format!(
        "polecat-{}-{}",
        polecat_name.to_lowercase(),
        Utc::now().timestamp()
    )
}

/// Create a polecat's isolated branch.
pub fn create_polecat_branch(
    town_root: &Path,
    rig_db: &str,
    branch: &str,
) -> anyhow::Result<()> {
    validate_branch_name(branch)
        .with_context(|| format!("creating Dolt branch in {rig_db}"))?;
    rig_sql(town_root, rig_db, &format!("CALL DOLT_BRANCH('{branch}')"))
        .with_context(|| format!("creating Dolt branch {branch} in {rig_db}"))?;
    Ok(())
}

/// Merge a polecat's branch into main and delete it. Runs each statement
/// separately; multi-statement strings trip the dolt sql CLI parser.
/// Deletion failure is non-fatal: no data is lost, only a leftover branch.
pub fn merge_polecat_branch(
    town_root: &Path,
    rig_db: &str,
    branch: &str,
) -> anyhow::Result<()> {
    validate_branch_name(branch)
        .with_context(|| format!("merging Dolt branch in {rig_db}"))?;

    rig_sql(town_root, rig_db, "CALL DOLT_CHECKOUT('main')")
        .with_context(|| format!("checkout main in {rig_db}"))?;
    rig_sql(town_root, rig_db, &format!("CALL DOLT_MERGE('{branch}')"))
        .with_context(|| format!("merging {branch} to main in {rig_db}"))?;
    if let Err(e) = rig_sql(
        town_root,
        rig_db,
        &format!("CALL DOLT_BRANCH('-D', '{branch}')"),
    ) {
        eprintln!("Warning: could not delete Dolt branch {branch}: {e:#}");
    }
    Ok(())
}

/// The most recent branch for a polecat, queried from the live server.
///
/// Branch names carry a unix-seconds suffix, so lexicographic descending
/// order is chronological and the first row is the newest.
pub fn find_latest_polecat_branch(
    town_root: &Path,
    rig_db: &str,
    polecat_name: &str,
) -> Option<String> {
    let prefix = format!("polecat-{}-%", polecat_name.to_lowercase());
    let query = format!(
        "SELECT name FROM dolt_branches WHERE name LIKE '{prefix}' ORDER BY name DESC LIMIT 1"
    );
    let lines = super::rig_sql_csv(town_root, rig_db, &query).ok()?;
    lines
        .into_iter()
        .find(|line| line != "name" && line.starts_with("polecat-"))
}

/// Force-delete a polecat's branch (cleanup/nuke). Best-effort: the
/// branch may already be gone.
pub fn delete_polecat_branch(town_root: &Path, rig_db: &str, branch: &str) {
    if let Err(e) = validate_branch_name(branch) {
        eprintln!("Warning: invalid Dolt branch name {branch:?}: {e:#}");
        return;
    }
    if let Err(e) = rig_sql(
        town_root,
        rig_db,
        &format!("CALL DOLT_BRANCH('-d', '{branch}')"),
    ) {
        eprintln!("Warning: could not delete Dolt branch {branch}: {e:#}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_branch_names() {
        assert!(validate_branch_name("polecat-toast-1722600000").is_ok());
        assert!(validate_branch_name("feature/x.y_z-1").is_ok());
        assert!(validate_branch_name("main").is_ok());
    }

    #[test]
    fn invalid_branch_names() {
        assert!(validate_branch_name("").is_err());
        assert!(validate_branch_name("has space").is_err());
        assert!(validate_branch_name("polecat-x'; DROP TABLE--").is_err());
        assert!(validate_branch_name("quote\"name").is_err());
        assert!(validate_branch_name("semi;colon").is_err());
    }

    #[test]
    fn injection_attempt_never_reaches_sql() {
        // No dolt binary exists in this environment with this name; if
        // validation failed open, the call would error differently (or
        // hang on a subprocess). The error must come from validation.
        let tmp = tempfile::tempdir().unwrap();
        let err =
            create_polecat_branch(tmp.path(), "nexus", "polecat-x'; DROP TABLE--").unwrap_err();
        assert!(err.to_string().contains("creating Dolt branch in nexus"));
        assert!(format!("{err:#}").contains("invalid characters"));
    }

    #[test]
    fn branch_name_is_lowercased_and_stamped() {
        let name = polecat_branch_name("Toast");
        assert!(name.starts_with("polecat-toast-"));
        let suffix = name.rsplit('-').next().unwrap();
        assert!(suffix.parse::<i64>().is_ok());
        validate_branch_name(&name).unwrap();
    }

    #[test]
    fn branch_names_sort_chronologically() {
        let a = "polecat-toast-1722600000";
        let b = "polecat-toast-1722600001";
        assert!(b > a);
    }
}
