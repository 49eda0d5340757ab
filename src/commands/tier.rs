use clap::Subcommand;

use crate::cost_tier::{self, CostTier, TownSettings};
use crate::paths;

#[derive(Debug, Subcommand)]
pub enum TierCommand {
    /// Show the current cost tier and role assignments
    Show,
    /// Apply a cost tier to the town settings
    Set { tier: CostTier },
    /// List available tiers
    List,
}

impl TierCommand {
    pub fn execute(&self) -> anyhow::Result<()> {
        let town_root = paths::find_town_root()?;
        let settings_path = paths::settings_path(&town_root);

        match self {
            TierCommand::Show => {
                let settings = TownSettings::load(&settings_path)?;
                match cost_tier::current_tier(&settings) {
                    Some(tier) => {
                        println!("Cost tier: {tier}");
                        println!("  {}\n", tier.description());
                        println!("{}", cost_tier::tier_role_table(tier));
                    }
                    None => {
                        println!("Cost tier: custom");
                        if settings.role_agents.is_empty() {
                            println!("  No role assignments (all roles on default runtime)");
                        } else {
                            for (role, agent) in &settings.role_agents {
                                println!("  {role}: {agent}");
                            }
                        }
                    }
                }
                Ok(())
            }
            TierCommand::Set { tier } => {
                let mut settings = TownSettings::load(&settings_path)?;
                cost_tier::apply_cost_tier(&mut settings, *tier);
                settings.save(&settings_path)?;
                println!("✓ Applied cost tier {tier}");
                println!("  {}\n", tier.description());
                println!("{}", cost_tier::tier_role_table(*tier));
                Ok(())
            }
            TierCommand::List => {
                for tier in CostTier::ALL {
                    println!("{tier}: {}", tier.description());
                }
                Ok(())
            }
        }
    }
}
