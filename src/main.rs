use std::process::ExitCode;

use clap::{Parser, Subcommand};

use township::commands::doctor::DoctorArgs;
use township::commands::dolt::DoltCommand;
use township::commands::guard::GuardCommand;
use township::commands::mail::MailCommand;
use township::commands::molecule::MolCommand;
use township::commands::nudge::NudgeArgs;
use township::commands::patrol::PatrolCommand;
use township::commands::tier::TierCommand;
use township::commands::witness::WitnessCommand;
use township::commands::workers::WorkerCommand;
use township::error::ExitError;
use township::telemetry;
use township::workers::WorkerKind;

#[derive(Debug, Parser)]
#[command(
    name = "township",
    version,
    about = "Workspace orchestrator for multi-agent towns"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Manage the shared Dolt SQL server
    Dolt {
        #[command(subcommand)]
        command: DoltCommand,
    },
    /// Manage crew workspaces (user-managed, persistent)
    Crew {
        #[command(subcommand)]
        command: WorkerCommand,
    },
    /// Manage polecat workspaces (witness-managed, ephemeral)
    Polecat {
        #[command(subcommand)]
        command: WorkerCommand,
    },
    /// Patrol checks over running polecats
    Patrol {
        #[command(subcommand)]
        command: PatrolCommand,
    },
    /// Polecat health supervision
    Witness {
        #[command(subcommand)]
        command: WitnessCommand,
    },
    /// Validate migration readiness and server-mode metadata
    Doctor(DoctorArgs),
    /// Manage molecule attachments on hook beads
    Mol {
        #[command(subcommand)]
        command: MolCommand,
    },
    /// Agent mail over the issue store
    Mail {
        #[command(subcommand)]
        command: MailCommand,
    },
    /// Show or apply cost tiers
    Tier {
        #[command(subcommand)]
        command: TierCommand,
    },
    /// Role-policy guards for hook pipelines
    Guard {
        #[command(subcommand)]
        command: GuardCommand,
    },
    /// Send a message into an agent's session
    Nudge(NudgeArgs),
}

impl Commands {
    const fn name(&self) -> &'static str {
        match self {
            Self::Dolt { .. } => "dolt",
            Self::Crew { .. } => "crew",
            Self::Polecat { .. } => "polecat",
            Self::Patrol { .. } => "patrol",
            Self::Witness { .. } => "witness",
            Self::Doctor(_) => "doctor",
            Self::Mol { .. } => "mol",
            Self::Mail { .. } => "mail",
            Self::Tier { .. } => "tier",
            Self::Guard { .. } => "guard",
            Self::Nudge(_) => "nudge",
        }
    }
}

fn main() -> ExitCode {
    let _telemetry = telemetry::init();

    let cli = Cli::parse();

    let _span = tracing::info_span!("command", name = cli.command.name()).entered();

    let result = match cli.command {
        Commands::Dolt { command } => command.execute(),
        Commands::Crew { command } => command.execute(WorkerKind::Crew),
        Commands::Polecat { command } => command.execute(WorkerKind::Polecat),
        Commands::Patrol { command } => command.execute(),
        Commands::Witness { command } => command.execute(),
        Commands::Doctor(args) => args.execute(),
        Commands::Mol { command } => command.execute(),
        Commands::Mail { command } => command.execute(),
        Commands::Tier { command } => command.execute(),
        Commands::Guard { command } => command.execute(),
        Commands::Nudge(args) => args.execute(),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if let Some(exit_err) = e.downcast_ref::<ExitError>() {
                if !exit_err.is_silent() {
                    eprintln!("error: {exit_err}");
                }
                exit_err.exit_code()
            } else {
                eprintln!("error: {e:#}");
                ExitCode::FAILURE
            }
        }
    }
}
