use std::path::Path;

use anyhow::Context;
use clap::Subcommand;

use crate::paths;
use crate::rigs::{self, Rig};
use crate::workers::{Manager, WorkerKind};

/// Shared surface for crew and polecat workspace management; the two
/// command groups differ only in the worker kind they operate on.
#[derive(Debug, Subcommand)]
pub enum WorkerCommand {
    /// Create a new worker workspace (clone + mail + shared store)
    Add {
        name: String,
        /// Rig to create the workspace in (inferred from cwd if omitted)
        #[arg(long)]
        rig: Option<String>,
        /// Create and check out a feature branch
        #[arg(long)]
        branch: bool,
    },
    /// List worker workspaces
    List {
        #[arg(long)]
        rig: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove a worker workspace
    Remove {
        name: String,
        #[arg(long)]
        rig: Option<String>,
        /// Remove even with uncommitted changes
        #[arg(long)]
        force: bool,
    },
    /// Rename a worker workspace
    Rename {
        old_name: String,
        new_name: String,
        #[arg(long)]
        rig: Option<String>,
    },
    /// Bring a worker clone up to date (git pull --rebase + issue sync)
    Pristine {
        name: String,
        #[arg(long)]
        rig: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

impl WorkerCommand {
    pub fn execute(&self, kind: WorkerKind) -> anyhow::Result<()> {
        let town_root = paths::find_town_root()?;
        match self {
            WorkerCommand::Add { name, rig, branch } => {
                let mgr = manager(&town_root, rig.as_deref(), kind)?;
                println!("Creating {} workspace {name}...", kind.as_str());
                let worker = mgr.add(name, *branch)?;
                println!("✓ Created {} workspace: {}/{}", kind.as_str(), worker.rig, worker.name);
                println!("  Path: {}", worker.clone_path.display());
                println!("  Branch: {}", worker.branch);
                println!("  Mail: {}/mail/", worker.clone_path.display());
                println!("\nStart working with: cd {}", worker.clone_path.display());
                Ok(())
            }
            WorkerCommand::List { rig, json } => {
                let mgr = manager(&town_root, rig.as_deref(), kind)?;
                let workers = mgr.list()?;
                if *json {
                    println!("{}", serde_json::to_string_pretty(&workers)?);
                    return Ok(());
                }
                if workers.is_empty() {
                    println!("No {} workspaces.", kind.as_str());
                    return Ok(());
                }
                for w in workers {
                    println!("{}  branch={}  {}", w.name, w.branch, w.clone_path.display());
                }
                Ok(())
            }
            WorkerCommand::Remove { name, rig, force } => {
                let mgr = manager(&town_root, rig.as_deref(), kind)?;
                mgr.remove(name, *force)?;
                println!("✓ Removed {} workspace {name}", kind.as_str());
                Ok(())
            }
            WorkerCommand::Rename { old_name, new_name, rig } => {
                let mgr = manager(&town_root, rig.as_deref(), kind)?;
                mgr.rename(old_name, new_name)?;
                println!("✓ Renamed {} workspace {old_name} → {new_name}", kind.as_str());
                Ok(())
            }
            WorkerCommand::Pristine { name, rig, json } => {
                let mgr = manager(&town_root, rig.as_deref(), kind)?;
                let result = mgr.pristine(name)?;
                if *json {
                    println!("{}", serde_json::to_string_pretty(&result)?);
                    return Ok(());
                }
                println!(
                    "{}: pulled={} synced={}{}",
                    result.name,
                    result.pulled,
                    result.synced,
                    if result.had_changes { " (had local changes)" } else { "" }
                );
                if let Some(e) = result.pull_error {
                    println!("  pull error: {e}");
                }
                if let Some(e) = result.sync_error {
                    println!("  sync error: {e}");
                }
                Ok(())
            }
        }
    }
}

fn manager(town_root: &Path, rig: Option<&str>, kind: WorkerKind) -> anyhow::Result<Manager> {
    let rig_name = match rig {
        Some(name) => name.to_string(),
        None => {
            let cwd = std::env::current_dir().context("determining current directory")?;
            rigs::infer_rig_from_dir(town_root, &cwd)
                .context("could not determine rig (use --rig)")?
        }
    };
    let rig = Rig::get(town_root, &rig_name)?;
    Ok(Manager::new(rig, kind))
}
