use clap::Subcommand;

use crate::error::ExitError;

#[derive(Debug, Subcommand)]
pub enum GuardCommand {
    /// Block task dispatch for roles that must delegate instead
    TaskDispatch,
}

impl GuardCommand {
    pub fn execute(&self) -> anyhow::Result<()> {
        match self {
            GuardCommand::TaskDispatch => {
                // The mayor coordinates; it never dispatches work itself.
                // The refusal is silent (reserved exit code 2) so hook
                // pipelines treat it as a clean veto.
                let role = std::env::var("TOWN_ROLE").unwrap_or_default();
                if role == "mayor" {
                    return Err(ExitError::SilentRefusal.into());
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // TOWN_ROLE-driven behavior is covered by integration tests (each
    // gets its own process env); here only the allowed path.

    #[test]
    fn allows_without_role() {
        if std::env::var("TOWN_ROLE").is_err() {
            assert!(GuardCommand::TaskDispatch.execute().is_ok());
        }
    }
}
