//! Canonical locations inside a town, and redirect resolution.
//!
//! Layout (town root `T`):
//!
//! ```text
//! T/
//!   .dolt-data/            one subdirectory per rig, each a dolt database
//!   .beads/                hq issue store (metadata.json lives here)
//!   daemon/                dolt.pid, dolt.log, dolt.lock, dolt-state.json
//!   mayor/rigs.json        rig registry
//!   <rig>/mayor/rig/.beads shared store (preferred)
//!   <rig>/.beads           shared store (legacy fallback)
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, bail};

/// Name of the issue-store directory inside a rig or worker clone.
pub const STORE_DIR: &str = ".beads";

/// Name of the centralized database data directory.
pub const DATA_DIR: &str = ".dolt-data";

/// The reserved rig name for the town-level store.
pub const HQ_RIG: &str = "hq";

/// Find the town root by walking up from the current directory.
///
/// A directory is a town root when it contains `mayor/rigs.json`. The
/// `TOWN_ROOT` environment variable overrides discovery.
pub fn find_town_root() -> anyhow::Result<PathBuf> {
    if let Ok(root) = std::env::var("TOWN_ROOT") {
        let p = PathBuf::from(root);
        if is_town_root(&p) {
            return Ok(p);
        }
        bail!("TOWN_ROOT={} is not a town root (no mayor/rigs.json)", p.display());
    }

    let cwd = std::env::current_dir().context("could not determine current directory")?;
    let mut dir = cwd.as_path();
    loop {
        if is_town_root(dir) {
            return Ok(dir.to_path_buf());
        }
        match dir.parent() {
            Some(parent) => dir = parent,
            None => bail!(
                "not in a town workspace (no mayor/rigs.json above {})",
                cwd.display()
            ),
        }
    }
}

fn is_town_root(dir: &Path) -> bool {
    dir.join("mayor").join("rigs.json").is_file()
}

/// The daemon directory holding the server's pid/log/lock/state files.
pub fn daemon_dir(town_root: &Path) -> PathBuf {
    town_root.join("daemon")
}

/// The centralized database data directory.
pub fn data_dir(town_root: &Path) -> PathBuf {
    town_root.join(DATA_DIR)
}

/// The database directory for a specific rig.
pub fn rig_database_dir(town_root: &Path, rig: &str) -> PathBuf {
    data_dir(town_root).join(rig)
}

/// Path to the rig registry.
pub fn rigs_config_path(town_root: &Path) -> PathBuf {
    town_root.join("mayor").join("rigs.json")
}

/// Path to the town settings file (role agents, cost tier).
pub fn settings_path(town_root: &Path) -> PathBuf {
    town_root.join("mayor").join("settings.json")
}

/// Canonical store directory for a rig.
///
/// For `hq` this is `<town>/.beads`. For other rigs, prefer
/// `<rig>/mayor/rig/.beads` when it exists on disk, fall back to
/// `<rig>/.beads`, and otherwise return the mayor path so the caller can
/// create it.
pub fn rig_store_dir(town_root: &Path, rig: &str) -> PathBuf {
    if rig == HQ_RIG {
        return town_root.join(STORE_DIR);
    }

    let mayor_store = town_root.join(rig).join("mayor").join("rig").join(STORE_DIR);
    if mayor_store.exists() {
        return mayor_store;
    }

    let rig_store = town_root.join(rig).join(STORE_DIR);
    if rig_store.exists() {
        return rig_store;
    }

    mayor_store
}

/// Resolve the store directory under `base`, following one hop of the
/// redirect file.
///
/// The redirect is a one-line file at `<base>/.beads/redirect` whose
/// contents are a path relative to `base`. Exactly one hop is resolved; a
/// redirect that resolves back to the store itself is an error (fail
/// closed rather than loop).
pub fn resolve_store_dir(base: &Path) -> anyhow::Result<PathBuf> {
    let store = base.join(STORE_DIR);
    let redirect = store.join("redirect");

    let contents = match std::fs::read_to_string(&redirect) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(store),
        Err(e) => {
            return Err(anyhow::Error::new(e))
                .with_context(|| format!("reading {}", redirect.display()));
        }
    };

    let rel = contents.trim();
    if rel.is_empty() {
        bail!("redirect file {} is empty", redirect.display());
    }

    let target = normalize(&base.join(rel));
    if target == normalize(&store) {
        bail!(
            "redirect file {} points back at its own store",
            redirect.display()
        );
    }
    Ok(target)
}

/// Lexical path normalization (resolves `.` and `..` without touching the
/// filesystem, so it works for not-yet-created targets).
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            std::path::Component::CurDir => {}
            std::path::Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other),
        }
    }
    out
}
