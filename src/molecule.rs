//! Molecule attachment lifecycle on hook beads.
//!
//! A molecule is a step-structured work unit; a wisp is a running
//! instance of one, attached to an agent's hook bead. Attach/detach are
//! thin wrappers over the store; squash collapses a finished (or
//! abandoned) run into a closed digest issue before detaching.

use std::path::Path;

use anyhow::{Context, bail};
use chrono::Utc;

use crate::beads::{Attachment, Beads};
use crate::stepdrift;

/// Result of squashing a molecule run.
#[derive(Debug, serde::Serialize)]
pub struct SquashResult {
    pub squashed: String,
    pub digest_id: String,
    pub hook_id: String,
}

/// Attach a molecule to a hook bead.
pub fn attach(town_root: &Path, hook_id: &str, molecule_id: &str) -> anyhow::Result<Attachment> {
    let store = Beads::new(town_root);
    let issue = store.attach_molecule(hook_id, molecule_id)?;
    issue
        .attachment()
        .with_context(|| format!("attachment missing on {hook_id} after attach"))
}

/// Detach whatever molecule is attached to a hook bead. Returns the
/// detached molecule id, or None when nothing was attached.
pub fn detach(town_root: &Path, hook_id: &str, agent: &str) -> anyhow::Result<Option<String>> {
    let store = Beads::new(town_root);
    let issue = store.show(hook_id)?;
    let Some(attachment) = issue.attachment() else {
        return Ok(None);
    };

    store.detach_molecule(hook_id, &format!("detached by {agent}"))?;
    Ok(Some(attachment.molecule))
}

/// Squash an agent's attached molecule into a closed digest issue.
///
/// The digest records the run for the audit trail at backlog priority;
/// the attachment is removed afterwards with a reason pointing at the
/// digest. Returns None when the agent has no hook or no attachment.
pub fn squash(town_root: &Path, agent: &str) -> anyhow::Result<Option<SquashResult>> {
    let store = Beads::new(town_root);

    let Some(hook) = store.find_hook(agent)? else {
        bail!("no hook bead found for {agent}");
    };
    let Some(attachment) = hook.attachment() else {
        return Ok(None);
    };
    let molecule_id = attachment.molecule;

    let mut description = format!(
        "Squashed molecule execution.\n\nmolecule: {molecule_id}\nagent: {agent}\nsquashed_at: {}\n",
        Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
    );

    // Execution summary from the wisp's step tree, when readable.
    let statuses = stepdrift::read_step_statuses(town_root, &molecule_id, "");
    if !statuses.is_empty() {
        let done = stepdrift::count_closed_steps(&statuses);
        let total = stepdrift::STEPS_ORDER.len();
        let status = if done == total { "complete" } else { "partial" };
        description.push_str(&format!(
            "\n## Execution Summary\n- Steps: {done}/{total} completed\n- Status: {status}\n"
        ));
    }

    let digest = store
        .create(&format!("Digest: {molecule_id}"), &description, "task", 4)
        .context("creating digest")?;

    let _ = store.add_label(&digest.id, "digest");
    if let Err(e) = store.close(&digest.id) {
        eprintln!("Warning: created digest but couldn't close it: {e:#}");
    }

    store
        .detach_molecule(
            &hook.id,
            &format!("molecule squashed to digest {}", digest.id),
        )
        .context("detaching molecule")?;

    Ok(Some(SquashResult {
        squashed: molecule_id,
        digest_id: digest.id,
        hook_id: hook.id,
    }))
}
