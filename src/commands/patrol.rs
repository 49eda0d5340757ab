use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use clap::{Args, Subcommand};

use crate::paths;
use crate::stepdrift::{self, StepDriftResult};

#[derive(Debug, Subcommand)]
pub enum PatrolCommand {
    /// Detect polecats with unclosed molecule steps
    StepDrift(StepDriftArgs),
}

impl PatrolCommand {
    pub fn execute(&self) -> anyhow::Result<()> {
        match self {
            PatrolCommand::StepDrift(args) => args.execute(),
        }
    }
}

/// Reads polecat step status from their isolated Dolt branches (not
/// main) to get true closure state. "Step drift" means a polecat has
/// been working past the threshold without closing any steps.
#[derive(Debug, Args)]
pub struct StepDriftArgs {
    /// Watch-mode refresh interval in seconds
    #[arg(value_name = "interval")]
    pub interval: Option<u32>,
    /// JSON output for the deacon and scripts
    #[arg(long)]
    pub agent: bool,
    /// Nudge drifting polecats
    #[arg(long)]
    pub nudge: bool,
    /// Include recent polecat output in human-readable mode
    #[arg(long)]
    pub peek: bool,
    /// Only check polecats in this rig
    #[arg(long)]
    pub rig: Option<String>,
    /// Drift threshold in minutes
    #[arg(long, default_value_t = stepdrift::DEFAULT_THRESHOLD_MINUTES)]
    pub threshold: u32,
    /// Live dashboard mode
    #[arg(short, long)]
    pub watch: bool,
}

impl StepDriftArgs {
    pub fn execute(&self) -> anyhow::Result<()> {
        let town_root = paths::find_town_root()?;
        let interval = self.interval.filter(|v| *v > 0).unwrap_or(30);

        if self.watch {
            let stop = Arc::new(AtomicBool::new(false));
            {
                let stop = stop.clone();
                ctrlc::set_handler(move || stop.store(true, Ordering::SeqCst))
                    .expect("setting interrupt handler");
            }

            while !stop.load(Ordering::SeqCst) {
                // Clear screen between refreshes.
                print!("\x1b[2J\x1b[H");
                println!("patrol-step-drift  ({})", Local::now().format("%H:%M:%S"));
                println!("{}", "=".repeat(80));

                let mut results =
                    stepdrift::check_step_drift(&town_root, self.rig.as_deref(), self.threshold);
                if self.nudge {
                    stepdrift::nudge_drifting(&mut results);
                }
                self.render_pretty(&results);

                // Cancelable between ticks.
                for _ in 0..interval {
                    if stop.load(Ordering::SeqCst) {
                        return Ok(());
                    }
                    std::thread::sleep(Duration::from_secs(1));
                }
            }
            return Ok(());
        }

        let mut results =
            stepdrift::check_step_drift(&town_root, self.rig.as_deref(), self.threshold);
        if self.nudge {
            stepdrift::nudge_drifting(&mut results);
        }

        if self.agent {
            println!("{}", serde_json::to_string_pretty(&results)?);
            return Ok(());
        }

        println!("patrol-step-drift");
        println!("{}", "=".repeat(80));
        self.render_pretty(&results);
        Ok(())
    }

    fn render_pretty(&self, results: &[StepDriftResult]) {
        if results.is_empty() {
            println!("  No active polecats.");
            return;
        }

        for p in results {
            let progress: String = (0..p.total)
                .map(|i| if i < p.closed { '●' } else { '○' })
                .collect();

            let age = if p.age_min > 0.0 {
                format!("{}m", p.age_min as u32)
            } else {
                String::new()
            };
            let state = if p.state != "working" {
                format!("({})", p.state)
            } else {
                String::new()
            };
            let title: String = p.title.chars().take(55).collect();

            println!(
                "  ▶ {:<10} {:<12} {}  {} {} {}",
                p.name, p.bead, progress, title, state, age
            );

            if !p.error.is_empty() {
                println!("    ⚠ {}", p.error);
            }

            if self.peek {
                let peek = stepdrift::peek_polecat(&p.rig, &p.name, 20);
                for line in peek.lines() {
                    println!("    │ {line}");
                }
            }

            if p.drifting {
                println!(
                    "    ⚡ Step drift detected ({}m, 0 steps closed)",
                    p.age_min as u32
                );
            }
            if p.nudged {
                println!("    ⚡ Nudged");
            }
            println!();
        }

        println!("  Steps: {}", stepdrift::STEP_LABELS);
        println!("  ● = done  ○ = pending  ⚡ = drifting");
    }
}
