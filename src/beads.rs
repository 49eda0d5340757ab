//! Typed access to the issue store through the `bd` CLI.
//!
//! Everything in town is an issue: work, mail, hook assignments, and
//! molecule steps are all views over one flat table. This module keeps
//! that table opaque and exposes the handful of typed reads and writes
//! the orchestrator needs. No SQL is spoken here; the `bd` binary owns
//! the storage.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::subprocess::Tool;

/// Deadline for a single bd invocation.
const BD_TIMEOUT: Duration = Duration::from_secs(10);

/// The issue fields the orchestrator reads. Everything else the store
/// knows about an issue stays inside bd.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Issue {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub issue_type: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub description: String,
    /// Authoritative process-state column for agent beads.
    #[serde(default)]
    pub agent_state: String,
    #[serde(default)]
    pub updated_at: String,
    #[serde(default)]
    pub hook_bead: String,
    #[serde(default)]
    pub attached_molecule: String,
    #[serde(default)]
    pub attached_at: String,
    #[serde(default)]
    pub labels: Vec<String>,
}

/// A molecule attachment on a hook bead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub molecule: String,
    pub attached_at: String,
}

impl Issue {
    /// The effective agent state.
    ///
    /// The `agent_state` column is the single authoritative location; the
    /// description's `agent_state:` line is a human-readable audit trail
    /// that lags column writes and must not be preferred. The description
    /// is consulted only when the column is empty (pre-column stores).
    pub fn effective_agent_state(&self) -> &str {
        if !self.agent_state.is_empty() {
            return &self.agent_state;
        }
        parse_description_field(&self.description, "agent_state").unwrap_or("")
    }

    /// Parsed `updated_at` timestamp, if present and well-formed.
    pub fn updated_at_time(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(self.updated_at.trim())
            .ok()
            .map(|t| t.with_timezone(&Utc))
    }

    /// The attached molecule, from the fields first, then the
    /// description's audit lines.
    pub fn attachment(&self) -> Option<Attachment> {
        if !self.attached_molecule.is_empty() {
            return Some(Attachment {
                molecule: self.attached_molecule.clone(),
                attached_at: self.attached_at.clone(),
            });
        }
        let molecule = parse_description_field(&self.description, "attached_molecule")?;
        Some(Attachment {
            molecule: molecule.to_string(),
            attached_at: parse_description_field(&self.description, "attached_at")
                .unwrap_or("")
                .to_string(),
        })
    }
}

/// Extract `key: value` from a description body. Returns the first match.
fn parse_description_field<'a>(description: &'a str, key: &str) -> Option<&'a str> {
    for line in description.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix(key)
            && let Some(value) = rest.strip_prefix(':')
        {
            let value = value.trim();
            if !value.is_empty() {
                return Some(value);
            }
        }
    }
    None
}

/// Handle on an issue store, rooted at a working directory. Reads can be
/// scoped to a database branch via `BD_BRANCH`.
pub struct Beads {
    work_dir: PathBuf,
    branch: Option<String>,
}

impl Beads {
    pub fn new(work_dir: &Path) -> Self {
        Self {
            work_dir: work_dir.to_path_buf(),
            branch: None,
        }
    }

    /// Scope subsequent reads to an isolated database branch.
    pub fn on_branch(mut self, branch: &str) -> Self {
        if !branch.is_empty() {
            self.branch = Some(branch.to_string());
        }
        self
    }

    fn tool(&self) -> Tool {
        let mut t = Tool::new("bd")
            .current_dir(&self.work_dir)
            .timeout(BD_TIMEOUT);
        if let Some(ref branch) = self.branch {
            t = t.env("BD_BRANCH", branch);
        }
        t
    }

    /// Fetch one issue as structured data.
    pub fn show(&self, id: &str) -> anyhow::Result<Issue> {
        let out = self
            .tool()
            .args(&["show", "--json", id])
            .run_ok()
            .with_context(|| format!("bd show {id}"))?;
        parse_issue_json(&out.stdout).with_context(|| format!("parsing bd show {id} output"))
    }

    /// Fetch one issue's human-readable rendering (step trees, audit
    /// trail). Used where bd's text output is the interface.
    pub fn show_text(&self, id: &str) -> anyhow::Result<String> {
        let out = self
            .tool()
            .args(&["show", id])
            .run_ok()
            .with_context(|| format!("bd show {id}"))?;
        Ok(out.stdout)
    }

    /// The agent's hook bead: assigned to it and pinned as its current
    /// work pointer.
    pub fn find_hook(&self, agent: &str) -> anyhow::Result<Option<Issue>> {
        let out = self
            .tool()
            .args(&["list", "--json", "--assignee", agent, "--pinned"])
            .run_ok()
            .context("bd list (hook lookup)")?;
        let mut issues = parse_issue_list_json(&out.stdout)?;
        Ok(if issues.is_empty() {
            None
        } else {
            Some(issues.remove(0))
        })
    }

    /// Unread mail for an agent: open message-type issues assigned to it.
    pub fn find_inbox(&self, agent: &str) -> anyhow::Result<Vec<Issue>> {
        let out = self
            .tool()
            .args(&[
                "list", "--json", "--type", "message", "--assignee", agent, "--status", "open",
            ])
            .run_ok()
            .context("bd list (inbox lookup)")?;
        parse_issue_list_json(&out.stdout)
    }

    /// Create an issue, returning its id.
    pub fn create(
        &self,
        title: &str,
        description: &str,
        issue_type: &str,
        priority: u8,
    ) -> anyhow::Result<Issue> {
        let prio = priority.to_string();
        let out = self
            .tool()
            .args(&[
                "create", title, "-d", description, "-t", issue_type, "-p", &prio, "--json",
            ])
            .run_ok()
            .context("bd create")?;
        parse_issue_json(&out.stdout).context("parsing bd create output")
    }

    /// Mark an issue closed.
    pub fn close(&self, id: &str) -> anyhow::Result<()> {
        self.tool()
            .args(&["close", id])
            .run_ok()
            .with_context(|| format!("bd close {id}"))?;
        Ok(())
    }

    /// Add a label to an issue.
    pub fn add_label(&self, id: &str, label: &str) -> anyhow::Result<()> {
        self.tool()
            .args(&["update", id, "--add-label", label])
            .run_ok()
            .with_context(|| format!("labeling {id}"))?;
        Ok(())
    }

    /// Attach a molecule to a hook bead.
    pub fn attach_molecule(&self, hook_id: &str, molecule_id: &str) -> anyhow::Result<Issue> {
        self.tool()
            .args(&["update", hook_id, "--attach", molecule_id])
            .run_ok()
            .with_context(|| format!("attaching {molecule_id} to {hook_id}"))?;
        self.show(hook_id)
    }

    /// Detach the molecule from a hook bead, recording why in the
    /// description audit trail.
    pub fn detach_molecule(&self, hook_id: &str, reason: &str) -> anyhow::Result<()> {
        self.tool()
            .args(&["update", hook_id, "--detach", "--reason", reason])
            .run_ok()
            .with_context(|| format!("detaching molecule from {hook_id}"))?;
        Ok(())
    }

    /// Run an issue sync in the store's working directory.
    pub fn sync(&self) -> anyhow::Result<()> {
        self.tool().arg("sync").run_ok().context("bd sync")?;
        Ok(())
    }

    /// The issue-store tool's version string (e.g. `bd version 0.49.3 (...)`).
    pub fn version() -> anyhow::Result<String> {
        let out = Tool::new("bd")
            .arg("version")
            .timeout(BD_TIMEOUT)
            .run_ok()
            .context("bd version")?;
        Ok(out.stdout.trim().to_string())
    }
}

/// Set sync.mode=dolt-native in a rig's database.
///
/// The store decides whether to export JSONL from the sync.mode stored in
/// the database, not from config files. Leaving it unset costs every
/// write a full JSONL export.
pub fn set_sync_mode_dolt_native(store_dir: &Path) -> anyhow::Result<()> {
    let parent = store_dir.parent().unwrap_or(store_dir);
    let store_s = store_dir.to_string_lossy();
    Tool::new("bd")
        .args(&["sync", "mode", "set", "dolt-native"])
        .current_dir(parent)
        .env("BEADS_DIR", &store_s)
        .timeout(BD_TIMEOUT)
        .run_ok()
        .context("bd sync mode set dolt-native")?;
    Ok(())
}

/// The deterministic id of a polecat's agent bead in its rig.
pub fn agent_bead_id(rig: &str, name: &str) -> String {
    format!("{rig}-polecat-{name}")
}

/// Parse bd JSON output that may be a single issue or a one-element array
/// (bd emits arrays for list-shaped queries, single objects elsewhere).
fn parse_issue_json(stdout: &str) -> anyhow::Result<Issue> {
    let value: serde_json::Value =
        serde_json::from_str(stdout.trim()).context("bd output is not JSON")?;
    let obj = match value {
        serde_json::Value::Array(mut items) if !items.is_empty() => items.remove(0),
        serde_json::Value::Array(_) => anyhow::bail!("bd returned no rows"),
        other => other,
    };
    serde_json::from_value(obj).context("bd output does not match issue shape")
}

fn parse_issue_list_json(stdout: &str) -> anyhow::Result<Vec<Issue>> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    let value: serde_json::Value =
        serde_json::from_str(trimmed).context("bd output is not JSON")?;
    match value {
        serde_json::Value::Array(items) => items
            .into_iter()
            .map(|v| serde_json::from_value(v).context("bd output does not match issue shape"))
            .collect(),
        serde_json::Value::Null => Ok(Vec::new()),
        other => Ok(vec![
            serde_json::from_value(other).context("bd output does not match issue shape")?,
        ]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_single_object() {
        let issue = parse_issue_json(r#"{"id":"tw-1","title":"x","agent_state":"working"}"#)
            .unwrap();
        assert_eq!(issue.id, "tw-1");
        assert_eq!(issue.agent_state, "working");
    }

    #[test]
    fn parse_one_element_array() {
        let issue = parse_issue_json(
            r#"[{"id":"tw-myr-polecat-mycat","issue_type":"agent","labels":["tw:agent"],"description":"agent_state: spawning","hook_bead":"tw-xyz","agent_state":"spawning","updated_at":"2026-08-02T10:00:00Z"}]"#,
        )
        .unwrap();
        assert_eq!(issue.id, "tw-myr-polecat-mycat");
        assert_eq!(issue.hook_bead, "tw-xyz");
        assert!(issue.updated_at_time().is_some());
    }

    #[test]
    fn parse_empty_array_errors() {
        assert!(parse_issue_json("[]").is_err());
    }

    #[test]
    fn column_overrides_description_state() {
        let issue = Issue {
            agent_state: "working".into(),
            description: "agent_state: spawning".into(),
            ..Default::default()
        };
        assert_eq!(issue.effective_agent_state(), "working");
    }

    #[test]
    fn description_state_used_only_when_column_empty() {
        let issue = Issue {
            description: "some text\nagent_state: idle\nmore".into(),
            ..Default::default()
        };
        assert_eq!(issue.effective_agent_state(), "idle");
    }

    #[test]
    fn attachment_prefers_fields() {
        let issue = Issue {
            attached_molecule: "tw-wisp-9".into(),
            attached_at: "2026-08-01T00:00:00Z".into(),
            description: "attached_molecule: stale-value".into(),
            ..Default::default()
        };
        let att = issue.attachment().unwrap();
        assert_eq!(att.molecule, "tw-wisp-9");
    }

    #[test]
    fn attachment_falls_back_to_description() {
        let issue = Issue {
            description: "notes\nattached_molecule: tw-wisp-3\nattached_at: 2026-08-01T12:00:00Z"
                .into(),
            ..Default::default()
        };
        let att = issue.attachment().unwrap();
        assert_eq!(att.molecule, "tw-wisp-3");
        assert_eq!(att.attached_at, "2026-08-01T12:00:00Z");
    }

    #[test]
    fn no_attachment_is_none() {
        let issue = Issue::default();
        assert!(issue.attachment().is_none());
    }

    #[test]
    fn malformed_updated_at_is_none() {
        let issue = Issue {
            updated_at: "yesterday".into(),
            ..Default::default()
        };
        assert!(issue.updated_at_time().is_none());
    }

    #[test]
    fn agent_bead_id_format() {
        assert_eq!(agent_bead_id("nexus", "Toast"), "nexus-polecat-Toast");
    }

    #[test]
    fn parse_list_empty_output() {
        assert!(parse_issue_list_json("").unwrap().is_empty());
        assert!(parse_issue_list_json("null").unwrap().is_empty());
    }
}
