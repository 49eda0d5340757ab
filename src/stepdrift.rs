//! Step-drift detection.
//!
//! A polecat's molecule has a fixed, ordered set of nine steps. The
//! polecat closes steps on its own database branch, so the true closure
//! state is only visible there, not on main. Drift means a session has
//! been alive past the threshold without closing a single step.

use std::collections::HashMap;
use std::path::Path;

use serde::Serialize;

use crate::beads::Beads;
use crate::doltserver;
use crate::rigs::{Rig, RigsConfig};
use crate::session;
use crate::tmux;
use crate::workers::{Manager, WorkerKind};

/// Canonical molecule step names, in execution order.
pub const STEPS_ORDER: [&str; 9] = [
    "Load context",
    "Set up working branch",
    "Verify tests pass",
    "Implement",
    "Self-review",
    "Run tests",
    "Clean up",
    "Prepare work",
    "Submit work",
];

/// Legend for the per-step progress glyphs.
pub const STEP_LABELS: &str =
    "①load ②branch ③preflight ④implement ⑤review ⑥test ⑦cleanup ⑧prepare ⑨submit";

/// The message sent to drifting polecats.
pub const NUDGE_MSG: &str = "You have been working for several minutes with no molecule steps \
closed. Close each step IMMEDIATELY when you finish it: `bd close <step-id>`. Run `bd ready` to \
see your next step. Not closing steps signals you are not following the formula.";

/// Default drift threshold in minutes.
pub const DEFAULT_THRESHOLD_MINUTES: u32 = 5;

/// Drift status of a single polecat.
#[derive(Debug, Clone, Serialize)]
pub struct StepDriftResult {
    pub rig: String,
    pub name: String,
    pub bead: String,
    pub title: String,
    pub state: String,
    pub age_min: f64,
    pub closed: usize,
    pub total: usize,
    pub drifting: bool,
    pub nudged: bool,
    pub branch: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub error: String,
}

/// Basic identity of a polecat as the patrol sees it.
#[derive(Debug, Clone)]
pub struct PolecatInfo {
    pub rig: String,
    pub name: String,
    pub state: String,
    pub bead: String,
}

/// All polecats across the town's rigs, with state and hook bead read
/// from their agent beads (best effort; unknown state renders as "?").
pub fn list_all_polecats(town_root: &Path, rig_filter: Option<&str>) -> Vec<PolecatInfo> {
    let Ok(config) = RigsConfig::load(town_root) else {
        return Vec::new();
    };

    let mut all = Vec::new();
    for rig_name in config.names() {
        if let Some(filter) = rig_filter
            && filter != rig_name
        {
            continue;
        }
        let Ok(rig) = Rig::get(town_root, &rig_name) else {
            continue;
        };
        let manager = Manager::new(rig, WorkerKind::Polecat);
        let Ok(workers) = manager.list() else {
            continue;
        };

        let store = Beads::new(town_root);
        for worker in workers {
            let bead_id = crate::beads::agent_bead_id(&rig_name, &worker.name);
            let (state, bead) = match store.show(&bead_id) {
                Ok(issue) => (
                    issue.effective_agent_state().to_string(),
                    issue.hook_bead.clone(),
                ),
                Err(_) => ("?".to_string(), String::new()),
            };
            all.push(PolecatInfo {
                rig: rig_name.clone(),
                name: worker.name,
                state,
                bead,
            });
        }
    }
    all
}

/// Check every polecat for step drift.
pub fn check_step_drift(
    town_root: &Path,
    rig_filter: Option<&str>,
    threshold_minutes: u32,
) -> Vec<StepDriftResult> {
    let polecats = list_all_polecats(town_root, rig_filter);

    let mut results = Vec::new();
    for p in polecats {
        let branch =
            doltserver::find_latest_polecat_branch(town_root, &p.rig, &p.name).unwrap_or_default();
        let (title, wisp_id) = hook_details(town_root, &p.bead);
        let statuses = read_step_statuses(town_root, &wisp_id, &branch);
        let closed = count_closed_steps(&statuses);
        let age = tmux::session_age_minutes(&session::polecat_session_name(&p.rig, &p.name));

        let error = if branch.is_empty() && !p.bead.is_empty() {
            "could not find Dolt branch".to_string()
        } else if wisp_id.is_empty() && !p.bead.is_empty() {
            "could not find attached molecule".to_string()
        } else {
            String::new()
        };

        results.push(StepDriftResult {
            rig: p.rig,
            name: p.name,
            bead: p.bead,
            title,
            state: p.state,
            age_min: round_to_1(age),
            closed,
            total: STEPS_ORDER.len(),
            drifting: age >= f64::from(threshold_minutes) && closed == 0,
            nudged: false,
            branch,
            error,
        });
    }
    results
}

/// Title and attached molecule (wisp) id from a hook bead.
fn hook_details(town_root: &Path, bead_id: &str) -> (String, String) {
    if bead_id.is_empty() {
        return ("?".to_string(), String::new());
    }
    let store = Beads::new(town_root);
    match store.show(bead_id) {
        Ok(issue) => {
            let title = if issue.title.is_empty() {
                "?".to_string()
            } else {
                truncate(&issue.title, 80)
            };
            let wisp = issue
                .attachment()
                .map(|a| a.molecule)
                .unwrap_or_default();
            (title, wisp)
        }
        Err(_) => ("?".to_string(), String::new()),
    }
}

/// Step closure status from a wisp's rendered step tree, read on the
/// polecat's branch when one is given.
///
/// bd renders child steps as `  ↳ <id>: <title> ● <status>` lines, with
/// `✓` marking closed steps. Step titles map to canonical names by
/// case-insensitive substring containment.
pub fn read_step_statuses(
    town_root: &Path,
    wisp_id: &str,
    branch: &str,
) -> HashMap<String, bool> {
    if wisp_id.is_empty() {
        return HashMap::new();
    }

    let store = Beads::new(town_root).on_branch(branch);
    let Ok(text) = store.show_text(wisp_id) else {
        return HashMap::new();
    };
    parse_step_statuses(&text)
}

/// Parse step lines out of bd's rendered issue tree.
pub fn parse_step_statuses(text: &str) -> HashMap<String, bool> {
    let mut statuses = HashMap::new();
    for line in text.lines() {
        if !line.contains('↳') {
            continue;
        }
        let closed = line.contains('✓');
        // Title sits between the id's colon and the status dot.
        let Some(colon) = line.find(':') else { continue };
        let rest = &line[colon + 1..];
        let title = match rest.find('●') {
            Some(dot) => &rest[..dot],
            None => rest,
        };
        let title = title.trim().trim_end_matches('✓').trim();
        if !title.is_empty() {
            statuses.insert(title.to_string(), closed);
        }
    }
    statuses
}

/// Whether a canonical step name matches any recorded step and that step
/// is closed. Matching is by case-insensitive substring containment, so
/// decorated titles ("Load context and verify assignment") still count.
pub fn match_step(step_name: &str, statuses: &HashMap<String, bool>) -> bool {
    let needle = step_name.to_lowercase();
    for (key, closed) in statuses {
        if key.to_lowercase().contains(&needle) {
            return *closed;
        }
    }
    false
}

/// How many canonical steps are closed.
pub fn count_closed_steps(statuses: &HashMap<String, bool>) -> usize {
    STEPS_ORDER
        .iter()
        .filter(|step| match_step(step, statuses))
        .count()
}

/// Send the standard nudge to every drifting polecat.
pub fn nudge_drifting(results: &mut [StepDriftResult]) {
    for r in results.iter_mut() {
        if r.drifting {
            let session_name = session::polecat_session_name(&r.rig, &r.name);
            if tmux::send_message(&session_name, NUDGE_MSG).is_ok() {
                r.nudged = true;
            }
        }
    }
}

/// Recent session output for a polecat, bounded to `lines` non-empty
/// lines of at most 100 columns.
pub fn peek_polecat(rig: &str, name: &str, lines: usize) -> String {
    let session_name = session::polecat_session_name(rig, name);
    let Ok(captured) = tmux::capture_pane(&session_name, lines as u32) else {
        return String::new();
    };

    let mut tail: Vec<&str> = captured
        .lines()
        .filter(|l| !l.trim().is_empty())
        .collect();
    if tail.len() > lines {
        tail = tail.split_off(tail.len() - lines);
    }
    tail.iter()
        .map(|l| truncate(l, 100))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn round_to_1(f: f64) -> f64 {
    (f * 10.0).trunc() / 10.0
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}
