//! Cost tiers: named presets mapping supervisor/worker roles to cheaper
//! runtime configurations.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::fsutil;

/// A predefined cost optimization tier for model selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum CostTier {
    /// Opus for all roles (default, highest quality).
    Standard,
    /// Sonnet/haiku for patrol roles, opus kept for workers.
    Economy,
    /// Haiku for patrols, sonnet for workers.
    Budget,
}

impl CostTier {
    pub const ALL: [CostTier; 3] = [CostTier::Standard, CostTier::Economy, CostTier::Budget];

    pub fn as_str(self) -> &'static str {
        match self {
            CostTier::Standard => "standard",
            CostTier::Economy => "economy",
            CostTier::Budget => "budget",
        }
    }

    pub fn parse(s: &str) -> Option<CostTier> {
        match s {
            "standard" => Some(CostTier::Standard),
            "economy" => Some(CostTier::Economy),
            "budget" => Some(CostTier::Budget),
            _ => None,
        }
    }

    /// Human-readable description of the tier's model assignments.
    pub fn description(self) -> &'static str {
        match self {
            CostTier::Standard => "All roles use Opus (highest quality)",
            CostTier::Economy => "Patrol roles use Sonnet/Haiku, workers use Opus",
            CostTier::Budget => "Patrol roles use Haiku, workers use Sonnet",
        }
    }
}

impl fmt::Display for CostTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Runtime configuration for an agent preset: the command that launches
/// the AI runtime plus its arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

/// Town-level settings persisted at `<town>/mayor/settings.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TownSettings {
    /// Custom agent presets by name.
    #[serde(default)]
    pub agents: BTreeMap<String, RuntimeConfig>,
    /// Role name → agent preset name. Roles absent from the map use the
    /// default runtime.
    #[serde(default)]
    pub role_agents: BTreeMap<String, String>,
    /// Informational record of the applied tier.
    #[serde(default)]
    pub cost_tier: String,
}

impl TownSettings {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(data) => serde_json::from_str(&data)
                .with_context(|| format!("parsing {}", path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(anyhow::Error::new(e))
                .with_context(|| format!("reading {}", path.display())),
        }
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating {}", dir.display()))?;
        }
        fsutil::atomic_write_json(path, self)
    }

    /// The runtime config for a role, following role_agents → agents.
    /// None means the role runs on the default runtime.
    pub fn runtime_for_role(&self, role: &str) -> Option<&RuntimeConfig> {
        let preset = self.role_agents.get(role)?;
        self.agents.get(preset)
    }
}

/// The role_agents mapping for a tier. Standard is an empty map (all
/// roles on the default runtime).
pub fn tier_role_agents(tier: CostTier) -> BTreeMap<String, String> {
    let mut m = BTreeMap::new();
    match tier {
        CostTier::Standard => {}
        CostTier::Economy => {
            m.insert("mayor".into(), "claude-sonnet".into());
            m.insert("deacon".into(), "claude-haiku".into());
            m.insert("witness".into(), "claude-sonnet".into());
            m.insert("refinery".into(), "claude-sonnet".into());
            // polecat and crew omitted: workers stay on the default
        }
        CostTier::Budget => {
            m.insert("mayor".into(), "claude-sonnet".into());
            m.insert("deacon".into(), "claude-haiku".into());
            m.insert("witness".into(), "claude-haiku".into());
            m.insert("refinery".into(), "claude-haiku".into());
            m.insert("polecat".into(), "claude-sonnet".into());
            m.insert("crew".into(), "claude-sonnet".into());
        }
    }
    m
}

/// The custom agent presets a tier needs. Standard needs none.
pub fn tier_agents(tier: CostTier) -> BTreeMap<String, RuntimeConfig> {
    let mut m = BTreeMap::new();
    if tier != CostTier::Standard {
        m.insert("claude-sonnet".into(), claude_sonnet_preset());
        m.insert("claude-haiku".into(), claude_haiku_preset());
    }
    m
}

fn claude_sonnet_preset() -> RuntimeConfig {
    RuntimeConfig {
        command: "claude".into(),
        args: vec![
            "--dangerously-skip-permissions".into(),
            "--model".into(),
            "sonnet".into(),
        ],
    }
}

fn claude_haiku_preset() -> RuntimeConfig {
    RuntimeConfig {
        command: "claude".into(),
        args: vec![
            "--dangerously-skip-permissions".into(),
            "--model".into(),
            "haiku".into(),
        ],
    }
}

/// Write a tier's agents and role_agents into the settings. Standard
/// clears role assignments and removes the tier presets.
pub fn apply_cost_tier(settings: &mut TownSettings, tier: CostTier) {
    settings.role_agents = tier_role_agents(tier);

    if tier == CostTier::Standard {
        settings.agents.remove("claude-sonnet");
        settings.agents.remove("claude-haiku");
    } else {
        for (name, rc) in tier_agents(tier) {
            settings.agents.insert(name, rc);
        }
    }

    settings.cost_tier = tier.as_str().to_string();
}

/// Infer the current tier from the settings' role_agents. Returns None
/// for custom configurations that match no known tier.
pub fn current_tier(settings: &TownSettings) -> Option<CostTier> {
    // Quick path: the informational field, verified against the live map.
    if let Some(tier) = CostTier::parse(&settings.cost_tier)
        && settings.role_agents == tier_role_agents(tier)
    {
        return Some(tier);
    }

    CostTier::ALL
        .into_iter()
        .find(|&tier| settings.role_agents == tier_role_agents(tier))
}

/// Formatted role → model table for a tier.
pub fn tier_role_table(tier: CostTier) -> String {
    let role_agents = tier_role_agents(tier);
    let roles = ["mayor", "deacon", "witness", "refinery", "polecat", "crew"];
    roles
        .iter()
        .map(|role| {
            let agent = role_agents
                .get(*role)
                .map(String::as_str)
                .unwrap_or("(default/opus)");
            format!("  {:<10} {}", format!("{role}:"), agent)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_tiers() {
        assert_eq!(CostTier::parse("standard"), Some(CostTier::Standard));
        assert_eq!(CostTier::parse("economy"), Some(CostTier::Economy));
        assert_eq!(CostTier::parse("budget"), Some(CostTier::Budget));
        assert_eq!(CostTier::parse("premium"), None);
        assert_eq!(CostTier::parse(""), None);
        assert_eq!(CostTier::parse("Standard"), None); // case-sensitive
    }

    #[test]
    fn standard_role_agents_is_empty() {
        assert!(tier_role_agents(CostTier::Standard).is_empty());
    }

    #[test]
    fn economy_keeps_workers_on_default() {
        let ra = tier_role_agents(CostTier::Economy);
        assert_eq!(ra.get("mayor").unwrap(), "claude-sonnet");
        assert_eq!(ra.get("deacon").unwrap(), "claude-haiku");
        assert_eq!(ra.get("witness").unwrap(), "claude-sonnet");
        assert_eq!(ra.get("refinery").unwrap(), "claude-sonnet");
        assert!(!ra.contains_key("polecat"));
        assert!(!ra.contains_key("crew"));
    }

    #[test]
    fn budget_covers_all_roles() {
        let ra = tier_role_agents(CostTier::Budget);
        assert_eq!(ra.len(), 6);
        assert_eq!(ra.get("witness").unwrap(), "claude-haiku");
        assert_eq!(ra.get("polecat").unwrap(), "claude-sonnet");
        assert_eq!(ra.get("crew").unwrap(), "claude-sonnet");
    }

    #[test]
    fn tier_agents_presets() {
        assert!(tier_agents(CostTier::Standard).is_empty());
        let agents = tier_agents(CostTier::Economy);
        let sonnet = agents.get("claude-sonnet").unwrap();
        assert_eq!(sonnet.command, "claude");
        assert!(sonnet.args.contains(&"sonnet".to_string()));
        let haiku = agents.get("claude-haiku").unwrap();
        assert!(haiku.args.contains(&"haiku".to_string()));
    }

    #[test]
    fn apply_and_infer_round_trip() {
        let mut settings = TownSettings::default();
        for tier in CostTier::ALL {
            apply_cost_tier(&mut settings, tier);
            assert_eq!(current_tier(&settings), Some(tier), "tier {tier}");
        }
    }

    #[test]
    fn apply_standard_clears_presets() {
        let mut settings = TownSettings::default();
        apply_cost_tier(&mut settings, CostTier::Budget);
        assert!(settings.agents.contains_key("claude-haiku"));

        apply_cost_tier(&mut settings, CostTier::Standard);
        assert!(!settings.agents.contains_key("claude-sonnet"));
        assert!(!settings.agents.contains_key("claude-haiku"));
        assert!(settings.role_agents.is_empty());
    }

    #[test]
    fn apply_standard_keeps_user_presets() {
        let mut settings = TownSettings::default();
        settings.agents.insert(
            "my-runner".into(),
            RuntimeConfig { command: "pi".into(), args: vec![] },
        );
        apply_cost_tier(&mut settings, CostTier::Standard);
        assert!(settings.agents.contains_key("my-runner"));
    }

    #[test]
    fn custom_config_infers_none() {
        let mut settings = TownSettings::default();
        settings
            .role_agents
            .insert("mayor".into(), "my-runner".into());
        assert_eq!(current_tier(&settings), None);
    }

    #[test]
    fn stale_tier_field_is_reverified() {
        let mut settings = TownSettings::default();
        apply_cost_tier(&mut settings, CostTier::Economy);
        // Hand-edit drifts the live config away from the recorded tier.
        settings.role_agents.insert("mayor".into(), "other".into());
        assert_eq!(current_tier(&settings), None);
    }

    #[test]
    fn runtime_for_role_follows_mapping() {
        let mut settings = TownSettings::default();
        apply_cost_tier(&mut settings, CostTier::Budget);
        let rc = settings.runtime_for_role("polecat").unwrap();
        assert_eq!(rc.command, "claude");
        assert!(settings.runtime_for_role("unknown-role").is_none());
    }

    #[test]
    fn settings_load_missing_file_is_default() {
        let tmp = tempfile::tempdir().unwrap();
        let settings = TownSettings::load(&tmp.path().join("settings.json")).unwrap();
        assert!(settings.agents.is_empty());
        assert!(settings.role_agents.is_empty());
    }

    #[test]
    fn settings_save_load_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("mayor/settings.json");
        let mut settings = TownSettings::default();
        apply_cost_tier(&mut settings, CostTier::Economy);
        settings.save(&path).unwrap();

        let loaded = TownSettings::load(&path).unwrap();
        assert_eq!(current_tier(&loaded), Some(CostTier::Economy));
        assert_eq!(loaded.cost_tier, "economy");
    }

    #[test]
    fn role_table_shows_defaults() {
        let table = tier_role_table(CostTier::Economy);
        assert!(table.contains("mayor:"));
        assert!(table.contains("(default/opus)"));
    }
}
