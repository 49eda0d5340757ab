use anyhow::Context;
use clap::Subcommand;

use crate::beads::Beads;
use crate::molecule;
use crate::paths;

#[derive(Debug, Subcommand)]
pub enum MolCommand {
    /// Attach a molecule to a hook bead
    Attach { hook_id: String, molecule_id: String },
    /// Detach the molecule from a hook bead
    Detach { hook_id: String },
    /// Show a hook bead's attachment
    Attachment {
        hook_id: String,
        #[arg(long)]
        json: bool,
    },
    /// Show the current agent's hook and attachment
    Status {
        /// Agent identity (defaults to $TOWN_AGENT)
        agent: Option<String>,
    },
    /// Squash the current molecule into a closed digest issue
    Squash {
        /// Agent identity (defaults to $TOWN_AGENT)
        agent: Option<String>,
        #[arg(long)]
        json: bool,
    },
}

impl MolCommand {
    pub fn execute(&self) -> anyhow::Result<()> {
        let town_root = paths::find_town_root()?;
        match self {
            MolCommand::Attach { hook_id, molecule_id } => {
                let attachment = molecule::attach(&town_root, hook_id, molecule_id)?;
                println!("✓ Attached {molecule_id} to {hook_id}");
                if !attachment.attached_at.is_empty() {
                    println!("  attached_at: {}", attachment.attached_at);
                }
                Ok(())
            }
            MolCommand::Detach { hook_id } => {
                let agent = current_agent(None).unwrap_or_else(|_| "overseer".to_string());
                match molecule::detach(&town_root, hook_id, &agent)? {
                    Some(prev) => println!("✓ Detached {prev} from {hook_id}"),
                    None => println!("ℹ No molecule attached to {hook_id}"),
                }
                Ok(())
            }
            MolCommand::Attachment { hook_id, json } => {
                let store = Beads::new(&town_root);
                let issue = store.show(hook_id)?;
                let attachment = issue.attachment();

                if *json {
                    let out = serde_json::json!({
                        "issue_id": issue.id,
                        "issue_title": issue.title,
                        "status": issue.status,
                        "attached_molecule": attachment.as_ref().map(|a| a.molecule.clone()),
                        "attached_at": attachment.as_ref().map(|a| a.attached_at.clone()),
                    });
                    println!("{}", serde_json::to_string_pretty(&out)?);
                    return Ok(());
                }

                println!("\n{}: {}", issue.id, issue.title);
                println!("Status: {}", issue.status);
                match attachment {
                    None => println!("\nNo molecule attached"),
                    Some(a) => {
                        println!("\nAttached Molecule:");
                        println!("  ID: {}", a.molecule);
                        if !a.attached_at.is_empty() {
                            println!("  Attached at: {}", a.attached_at);
                        }
                    }
                }
                Ok(())
            }
            MolCommand::Status { agent } => {
                let agent = current_agent(agent.as_deref())?;
                let store = Beads::new(&town_root);
                match store.find_hook(&agent)? {
                    None => println!("No hook bead for {agent} — run `bd ready` to find work"),
                    Some(hook) => {
                        println!("Hook: {} — {}", hook.id, hook.title);
                        match hook.attachment() {
                            Some(a) => println!("Molecule: {}", a.molecule),
                            None => println!("No molecule attached"),
                        }
                    }
                }
                Ok(())
            }
            MolCommand::Squash { agent, json } => {
                let agent = current_agent(agent.as_deref())?;
                match molecule::squash(&town_root, &agent)? {
                    None => {
                        println!("ℹ No molecule attached to {agent} - nothing to squash");
                        Ok(())
                    }
                    Some(result) => {
                        if *json {
                            println!("{}", serde_json::to_string_pretty(&result)?);
                        } else {
                            println!(
                                "✓ Squashed molecule {} → digest {}",
                                result.squashed, result.digest_id
                            );
                        }
                        Ok(())
                    }
                }
            }
        }
    }
}

/// The acting agent identity: explicit argument, else $TOWN_AGENT.
fn current_agent(arg: Option<&str>) -> anyhow::Result<String> {
    if let Some(agent) = arg {
        return Ok(agent.to_string());
    }
    std::env::var("TOWN_AGENT").context("agent identity unknown (pass it or set TOWN_AGENT)")
}
