use anyhow::Context;
use clap::Subcommand;

use crate::beads::Beads;
use crate::paths;

#[derive(Debug, Subcommand)]
pub enum MailCommand {
    /// Show an agent's unread mail (open message issues assigned to it)
    Inbox {
        /// Agent identity (defaults to $TOWN_AGENT)
        agent: Option<String>,
        #[arg(long)]
        json: bool,
    },
}

impl MailCommand {
    pub fn execute(&self) -> anyhow::Result<()> {
        let town_root = paths::find_town_root()?;
        match self {
            MailCommand::Inbox { agent, json } => {
                let agent = match agent {
                    Some(a) => a.clone(),
                    None => std::env::var("TOWN_AGENT")
                        .context("agent identity unknown (pass it or set TOWN_AGENT)")?,
                };

                let messages = Beads::new(&town_root).find_inbox(&agent)?;
                if *json {
                    let out: Vec<_> = messages
                        .iter()
                        .map(|m| {
                            serde_json::json!({
                                "id": m.id,
                                "title": m.title,
                                "updated_at": m.updated_at,
                            })
                        })
                        .collect();
                    println!("{}", serde_json::to_string_pretty(&out)?);
                    return Ok(());
                }

                if messages.is_empty() {
                    println!("Inbox empty for {agent}");
                    return Ok(());
                }
                println!("Inbox for {agent} ({} message(s)):", messages.len());
                for m in messages {
                    println!("  {} — {}", m.id, m.title);
                }
                Ok(())
            }
        }
    }
}
