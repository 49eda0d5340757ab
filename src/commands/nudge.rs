use anyhow::bail;
use clap::Args;

use crate::session;
use crate::tmux;

/// Send a message into an agent's session.
#[derive(Debug, Args)]
pub struct NudgeArgs {
    /// Target as <rig>/<name>
    pub target: String,
    /// Message text
    pub message: String,
}

impl NudgeArgs {
    pub fn execute(&self) -> anyhow::Result<()> {
        let Some((rig, name)) = self.target.split_once('/') else {
            bail!("target must be <rig>/<name>, got {:?}", self.target);
        };
        if rig.is_empty() || name.is_empty() {
            bail!("target must be <rig>/<name>, got {:?}", self.target);
        }

        let session_name = session::polecat_session_name(rig, name);
        if !tmux::has_session(&session_name) {
            bail!("no session {session_name} for {}", self.target);
        }
        tmux::send_message(&session_name, &self.message)?;
        println!("✓ Nudged {}", self.target);
        Ok(())
    }
}
