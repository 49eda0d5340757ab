//! The rig registry: named project workspaces within a town.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};

use crate::paths;

/// One registered rig.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RigEntry {
    #[serde(default)]
    pub git_url: String,
    #[serde(default)]
    pub added_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Contents of `mayor/rigs.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RigsConfig {
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub rigs: BTreeMap<String, RigEntry>,
}

impl RigsConfig {
    pub fn load(town_root: &Path) -> anyhow::Result<Self> {
        let path = paths::rigs_config_path(town_root);
        match std::fs::read_to_string(&path) {
            Ok(data) => serde_json::from_str(&data)
                .with_context(|| format!("parsing {}", path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(anyhow::Error::new(e))
                .with_context(|| format!("reading {}", path.display())),
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.rigs.keys().cloned().collect()
    }
}

/// A rig resolved against the town layout.
#[derive(Debug, Clone)]
pub struct Rig {
    pub name: String,
    pub path: PathBuf,
    pub git_url: String,
}

impl Rig {
    /// Look up a rig by name in the registry.
    pub fn get(town_root: &Path, name: &str) -> anyhow::Result<Rig> {
        let config = RigsConfig::load(town_root)?;
        let Some(entry) = config.rigs.get(name) else {
            bail!("rig {name:?} not found");
        };
        Ok(Rig {
            name: name.to_string(),
            path: town_root.join(name),
            git_url: entry.git_url.clone(),
        })
    }
}

/// Infer the rig from a directory inside the town: the first path
/// component under the town root.
pub fn infer_rig_from_dir(town_root: &Path, dir: &Path) -> anyhow::Result<String> {
    let rel = dir
        .strip_prefix(town_root)
        .context("directory is not inside the town")?;
    let Some(first) = rel.components().next() else {
        bail!("could not infer rig from town root itself");
    };
    let name = first.as_os_str().to_string_lossy().to_string();
    if name.starts_with('.') || name == "mayor" || name == "daemon" {
        bail!("directory {} is not inside a rig", dir.display());
    }
    Ok(name)
}
