use clap::Args;
use serde::Serialize;

use crate::doctor::{self, CheckResult, CheckStatus};
use crate::paths;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Pretty,
    Json,
}

#[derive(Debug, Args)]
pub struct DoctorArgs {
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Pretty)]
    pub format: OutputFormat,
    /// Apply fixes for fixable findings (dolt metadata)
    #[arg(long)]
    pub fix: bool,
}

#[derive(Serialize)]
struct DoctorReport {
    checks: Vec<CheckResult>,
    readiness: doctor::MigrationReadiness,
}

impl DoctorArgs {
    pub fn execute(&self) -> anyhow::Result<()> {
        let town_root = paths::find_town_root()?;

        let (readiness_result, readiness) = doctor::migration_readiness(&town_root);
        let unmigrated = doctor::unmigrated_rigs(&town_root);
        let (mut metadata_result, offenders) = doctor::dolt_metadata(&town_root);

        if self.fix && !offenders.is_empty() {
            doctor::fix_dolt_metadata(&town_root, &offenders)?;
            let (fixed_result, remaining) = doctor::dolt_metadata(&town_root);
            metadata_result = fixed_result;
            if remaining.is_empty() {
                println!("✓ Fixed Dolt metadata for: {}", offenders.join(", "));
            }
        }

        let checks = vec![readiness_result, unmigrated, metadata_result];

        match self.format {
            OutputFormat::Json => {
                let report = DoctorReport { checks, readiness };
                println!("{}", serde_json::to_string_pretty(&report)?);
            }
            OutputFormat::Pretty => {
                for check in &checks {
                    let marker = match check.status {
                        CheckStatus::Ok => "✓",
                        CheckStatus::Warning => "!",
                        CheckStatus::Error => "✗",
                    };
                    println!("{marker} {}: {}", check.name, check.message);
                    for detail in &check.details {
                        println!("    {detail}");
                    }
                    if let Some(hint) = &check.fix_hint {
                        println!("    fix: {hint}");
                    }
                }
            }
        }

        Ok(())
    }
}
