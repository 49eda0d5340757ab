use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use clap::Subcommand;

use crate::paths;
use crate::rigs::{Rig, RigsConfig};
use crate::witness::{HealthDecision, RestartOutcome, Witness};
use crate::workers::{Manager, WorkerKind};

#[derive(Debug, Subcommand)]
pub enum WitnessCommand {
    /// Run one health check for a single polecat
    Check {
        rig: String,
        name: String,
        /// Report crashes without restarting anything
        #[arg(long)]
        no_restart: bool,
    },
    /// Heartbeat loop over all polecats
    Run {
        /// Only supervise this rig
        #[arg(long)]
        rig: Option<String>,
        /// Heartbeat interval in seconds
        #[arg(long, default_value_t = 60)]
        interval: u32,
        /// Report crashes without restarting anything
        #[arg(long)]
        no_restart: bool,
    },
}

impl WitnessCommand {
    pub fn execute(&self) -> anyhow::Result<()> {
        let town_root = paths::find_town_root()?;
        match self {
            WitnessCommand::Check { rig, name, no_restart } => {
                let witness = Witness::new(&town_root, !no_restart);
                let decision = witness.check_polecat_health(rig, name)?;
                report(rig, name, &decision);
                Ok(())
            }
            WitnessCommand::Run { rig, interval, no_restart } => {
                let witness = Witness::new(&town_root, !no_restart);
                let stop = Arc::new(AtomicBool::new(false));
                {
                    let stop = stop.clone();
                    ctrlc::set_handler(move || stop.store(true, Ordering::SeqCst))
                        .expect("setting interrupt handler");
                }

                while !stop.load(Ordering::SeqCst) {
                    heartbeat(&town_root, &witness, rig.as_deref());
                    for _ in 0..*interval {
                        if stop.load(Ordering::SeqCst) {
                            return Ok(());
                        }
                        std::thread::sleep(Duration::from_secs(1));
                    }
                }
                Ok(())
            }
        }
    }
}

fn heartbeat(town_root: &std::path::Path, witness: &Witness, rig_filter: Option<&str>) {
    let Ok(config) = RigsConfig::load(town_root) else {
        return;
    };
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
        for worker in workers {
            match witness.check_polecat_health(&rig_name, &worker.name) {
                Ok(decision) => report(&rig_name, &worker.name, &decision),
                Err(e) => println!("{}/{}: health check failed: {e:#}", rig_name, worker.name),
            }
        }
    }
}

fn report(rig: &str, name: &str, decision: &HealthDecision) {
    match decision {
        HealthDecision::SkipSpawning { age_minutes } => {
            println!(
                "{rig}/{name}: agent_state=spawning ({age_minutes:.1}m) — skipping restart check"
            );
        }
        HealthDecision::Healthy => {
            println!("{rig}/{name}: healthy");
        }
        HealthDecision::Crashed { guard_expired, restart } => {
            if *guard_expired {
                println!("{rig}/{name}: Spawning guard expired");
            }
            println!("CRASH DETECTED: {rig}/{name} session is gone");
            match restart {
                RestartOutcome::Restarted => println!("  restarted {rig}/{name}"),
                RestartOutcome::SkippedQuiesced => {
                    println!("  restart skipped (restarts disabled)");
                }
                RestartOutcome::SkippedNoCapacity { active } => {
                    println!("  restart skipped (no connection capacity, {active} active)");
                }
                RestartOutcome::Failed(e) => println!("  restart failed: {e}"),
            }
        }
        HealthDecision::NoAction { state } => {
            println!("{rig}/{name}: agent_state={state} — no action");
        }
    }
}
