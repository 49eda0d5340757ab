//! Polecat health supervision.
//!
//! The witness heartbeat reads each polecat's agent bead from the issue
//! store (the authoritative `agent_state` column, never the description
//! text) and probes its multiplexer session. The spawning guard closes a
//! double-spawn race: the heartbeat can fire in the window between bead
//! creation and the session launch, when the bead says `spawning` but no
//! session exists yet. Restarting then would launch a second runtime for
//! the same polecat.

use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::Utc;

use crate::beads::{self, Beads};
use crate::cost_tier::TownSettings;
use crate::doltserver;
use crate::paths;
use crate::session;
use crate::tmux;

/// How long a bead may sit in `spawning` before the guard expires and
/// the polecat is treated as crashed (the spawn itself may have failed).
pub const SPAWNING_GRACE_MINUTES: i64 = 5;

/// What a restart attempt did, or why it was skipped.
#[derive(Debug)]
pub enum RestartOutcome {
    Restarted,
    SkippedQuiesced,
    SkippedNoCapacity { active: u32 },
    Failed(String),
}

/// The heartbeat's decision for one polecat.
#[derive(Debug)]
pub enum HealthDecision {
    /// Recently spawning; session may not exist yet. No restart.
    SkipSpawning { age_minutes: f64 },
    /// Session alive.
    Healthy,
    /// Session gone while the bead says the polecat should be running.
    /// `guard_expired` marks crashes detected through an expired
    /// spawning guard.
    Crashed {
        guard_expired: bool,
        restart: RestartOutcome,
    },
    /// States that need no supervision (idle, done, ...).
    NoAction { state: String },
}

pub struct Witness {
    town_root: PathBuf,
    /// Quiesce switch: when false, crashes are reported but nothing is
    /// respawned.
    restarts_enabled: bool,
}

impl Witness {
    pub fn new(town_root: &Path, restarts_enabled: bool) -> Self {
        Self {
            town_root: town_root.to_path_buf(),
            restarts_enabled,
        }
    }

    /// One heartbeat for one polecat.
    pub fn check_polecat_health(&self, rig: &str, name: &str) -> anyhow::Result<HealthDecision> {
        let bead_id = beads::agent_bead_id(rig, name);
        let store = Beads::new(&self.town_root);
        let bead = store
            .show(&bead_id)
            .with_context(|| format!("reading agent bead for {rig}/{name}"))?;

        let state = bead.effective_agent_state().to_string();

        let mut guard_expired = false;
        match state.as_str() {
            "spawning" => {
                // Age from the column's updated_at. An unreadable
                // timestamp counts as expired: an untimestamped bead
                // cannot hold the guard open forever.
                let age_minutes = bead
                    .updated_at_time()
                    .map(|t| {
                        (Utc::now().signed_duration_since(t).num_seconds().max(0) as f64) / 60.0
                    })
                    .unwrap_or(f64::INFINITY);

                if age_minutes <= SPAWNING_GRACE_MINUTES as f64 {
                    tracing::info!(rig, name, age_minutes, "polecat spawning — skipping");
                    return Ok(HealthDecision::SkipSpawning { age_minutes });
                }
                tracing::warn!(rig, name, age_minutes, "spawning guard expired");
                guard_expired = true;
            }
            "working" => {}
            other => {
                return Ok(HealthDecision::NoAction {
                    state: other.to_string(),
                });
            }
        }

        let session_name = session::polecat_session_name(rig, name);
        if tmux::has_session(&session_name) {
            return Ok(HealthDecision::Healthy);
        }

        tracing::warn!(rig, name, session = session_name, "CRASH DETECTED");
        let restart = self.restart_polecat(rig, name);
        Ok(HealthDecision::Crashed {
            guard_expired,
            restart,
        })
    }

    /// Respawn a crashed polecat's session, subject to the quiesce
    /// switch and server connection capacity.
    fn restart_polecat(&self, rig: &str, name: &str) -> RestartOutcome {
        if !self.restarts_enabled {
            return RestartOutcome::SkippedQuiesced;
        }

        let (has_capacity, active, _err) =
            doltserver::has_connection_capacity(&self.town_root);
        if !has_capacity {
            return RestartOutcome::SkippedNoCapacity { active };
        }

        let work_dir = self
            .town_root
            .join(rig)
            .join("polecats")
            .join(name);
        if !work_dir.is_dir() {
            return RestartOutcome::Failed(format!(
                "polecat workspace missing at {}",
                work_dir.display()
            ));
        }

        let command = self.polecat_runtime_command();
        let session_name = session::polecat_session_name(rig, name);
        match tmux::new_session(&session_name, &work_dir, &command) {
            Ok(()) => RestartOutcome::Restarted,
            Err(e) => RestartOutcome::Failed(format!("{e:#}")),
        }
    }

    /// The command line that launches a polecat's runtime, honoring the
    /// town's cost tier role assignment.
    fn polecat_runtime_command(&self) -> String {
        let settings = TownSettings::load(&paths::settings_path(&self.town_root))
            .unwrap_or_default();
        match settings.runtime_for_role("polecat") {
            Some(rc) => {
                let mut parts = vec![rc.command.clone()];
                parts.extend(rc.args.iter().cloned());
                parts.join(" ")
            }
            None => "claude --dangerously-skip-permissions".to_string(),
        }
    }
}
