use std::path::Path;
use std::process::{Command, Stdio};

use anyhow::Context;
use clap::Subcommand;

use crate::beads;
use crate::doltserver;
use crate::paths;

#[derive(Debug, Subcommand)]
pub enum DoltCommand {
    /// Start the Dolt SQL server
    Start,
    /// Stop the Dolt server
    Stop,
    /// Show Dolt server status
    Status,
    /// View Dolt server logs
    Logs {
        /// Number of lines to show
        #[arg(short = 'n', long, default_value_t = 50)]
        lines: u32,
        /// Follow log output
        #[arg(short, long)]
        follow: bool,
    },
    /// Initialize a new rig database
    InitRig { name: String },
    /// List available rig databases
    List,
    /// Migrate legacy databases to the centralized data directory
    Migrate {
        /// Preview what would be migrated without making changes
        #[arg(long)]
        dry_run: bool,
    },
    /// Update metadata.json in all rig store directories
    FixMetadata,
    /// Create a polecat's isolated database branch
    CreateBranch { rig: String, polecat: String },
    /// Merge a polecat's branch to main and delete it
    MergeBranch { rig: String, branch: String },
    /// Force-delete a polecat's branch
    DeleteBranch { rig: String, branch: String },
}

impl DoltCommand {
    pub fn execute(&self) -> anyhow::Result<()> {
        let town_root = paths::find_town_root()?;
        match self {
            DoltCommand::Start => run_start(&town_root),
            DoltCommand::Stop => run_stop(&town_root),
            DoltCommand::Status => run_status(&town_root),
            DoltCommand::Logs { lines, follow } => run_logs(&town_root, *lines, *follow),
            DoltCommand::InitRig { name } => run_init_rig(&town_root, name),
            DoltCommand::List => run_list(&town_root),
            DoltCommand::Migrate { dry_run } => run_migrate(&town_root, *dry_run),
            DoltCommand::FixMetadata => run_fix_metadata(&town_root),
            DoltCommand::CreateBranch { rig, polecat } => {
                let branch = doltserver::polecat_branch_name(polecat);
                doltserver::create_polecat_branch(&town_root, rig, &branch)?;
                println!("✓ Created branch {branch} in {rig}");
                Ok(())
            }
            DoltCommand::MergeBranch { rig, branch } => {
                doltserver::merge_polecat_branch(&town_root, rig, branch)?;
                println!("✓ Merged {branch} to main in {rig}");
                Ok(())
            }
            DoltCommand::DeleteBranch { rig, branch } => {
                doltserver::delete_polecat_branch(&town_root, rig, branch);
                Ok(())
            }
        }
    }
}

fn run_start(town_root: &Path) -> anyhow::Result<()> {
    doltserver::start(town_root)?;

    let state = doltserver::load_state(town_root).unwrap_or_default();
    let config = doltserver::ServerConfig::new(town_root);

    println!("✓ Dolt server started (PID {}, port {})", state.pid, config.port);
    println!("  Data dir: {}", state.data_dir);
    println!("  Databases: {}", state.databases.join(", "));
    println!("  Connection: {}", config.connection_string());
    Ok(())
}

fn run_stop(town_root: &Path) -> anyhow::Result<()> {
    let (_, pid) = doltserver::is_running(town_root);
    doltserver::stop(town_root)?;
    println!("✓ Dolt server stopped (was PID {pid})");
    Ok(())
}

fn run_status(town_root: &Path) -> anyhow::Result<()> {
    let (running, pid) = doltserver::is_running(town_root);
    let config = doltserver::ServerConfig::new(town_root);

    if !running {
        println!("○ Dolt server is not running");

        let databases = doltserver::list_databases(town_root).unwrap_or_default();
        if databases.is_empty() {
            println!(
                "\n! No rig databases found in {}",
                config.data_dir.display()
            );
            println!("  Initialize with: township dolt init-rig <name>");
        } else {
            println!("\nAvailable databases in {}:", config.data_dir.display());
            for db in databases {
                println!("  - {db}");
            }
            println!("\nStart with: township dolt start");
        }
        return Ok(());
    }

    println!("● Dolt server is running (PID {pid})");
    if let Err(e) = doltserver::check_reachable(town_root) {
        println!("  ⚠ {e:#}");
    }

    if let Ok(state) = doltserver::load_state(town_root) {
        if let Some(started) = state.started_at {
            println!("  Started: {}", started.format("%Y-%m-%d %H:%M:%S"));
        }
        println!("  Port: {}", state.port);
        println!("  Data dir: {}", state.data_dir);
        if !state.databases.is_empty() {
            println!("  Databases:");
            for db in &state.databases {
                println!("    - {db}");
            }
        }
        println!("  Connection: {}", config.connection_string());
    }

    let metrics = doltserver::health_metrics(town_root);
    println!("\n  Resource Metrics:");
    match metrics.query_latency_ms {
        Some(ms) => println!("    Query latency: {ms}ms"),
        None => println!("    Query latency: (unavailable)"),
    }
    match (metrics.connections, metrics.connection_pct) {
        (Some(n), Some(pct)) => println!(
            "    Connections:   {} / {} ({:.0}%)",
            n, metrics.max_connections, pct
        ),
        _ => println!("    Connections:   (unavailable)"),
    }
    println!("    Disk usage:    {}", metrics.disk_usage_human);
    if !metrics.warnings.is_empty() {
        println!("\n  Warnings:");
        for w in &metrics.warnings {
            println!("    ! {w}");
        }
    }

    Ok(())
}

fn run_logs(town_root: &Path, lines: u32, follow: bool) -> anyhow::Result<()> {
    let config = doltserver::ServerConfig::new(town_root);
    if !config.log_file.exists() {
        anyhow::bail!("no log file found at {}", config.log_file.display());
    }

    let mut cmd = Command::new("tail");
    if follow {
        cmd.arg("-f");
    } else {
        cmd.args(["-n", &lines.to_string()]);
    }
    cmd.arg(&config.log_file)
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit());
    let status = cmd.status().context("running tail")?;
    if !status.success() {
        anyhow::bail!("tail exited with {status}");
    }
    Ok(())
}

fn run_init_rig(town_root: &Path, name: &str) -> anyhow::Result<()> {
    let server_was_running = doltserver::init_rig(town_root, name)?;

    let config = doltserver::ServerConfig::new(town_root);
    println!("✓ Initialized rig database {name:?}");
    println!("  Location: {}", paths::rig_database_dir(town_root, name).display());
    println!("  Data dir: {}", config.data_dir.display());

    if server_was_running {
        println!("  Server: database registered with running server");
    } else {
        println!("\nStart server with: township dolt start");
    }
    Ok(())
}

fn run_list(town_root: &Path) -> anyhow::Result<()> {
    let config = doltserver::ServerConfig::new(town_root);
    let databases = doltserver::list_databases(town_root)?;

    if databases.is_empty() {
        println!("No rig databases found in {}", config.data_dir.display());
        println!("\nInitialize with: township dolt init-rig <name>");
        return Ok(());
    }

    println!("Rig databases in {}:\n", config.data_dir.display());
    for db in databases {
        println!("  {db}");
        println!("    {}", paths::rig_database_dir(town_root, &db).display());
    }
    Ok(())
}

fn run_migrate(town_root: &Path, dry_run: bool) -> anyhow::Result<()> {
    // A live server would race the directory moves.
    let (running, _) = doltserver::is_running(town_root);
    if running {
        anyhow::bail!("Dolt server is running. Stop it first with: township dolt stop");
    }

    let migrations = doltserver::find_migratable(town_root);
    if migrations.is_empty() {
        println!("No databases found to migrate.");
        return Ok(());
    }

    println!("Found {} database(s) to migrate:\n", migrations.len());
    for m in &migrations {
        let size = crate::fsutil::format_bytes(crate::fsutil::dir_size(&m.source_path));
        println!("  {} ({size})", m.source_path.display());
        println!("    → {}\n", m.target_path.display());
    }

    if dry_run {
        println!("Dry run: no changes made.");
        return Ok(());
    }

    for m in &migrations {
        println!("Migrating {}...", m.rig_name);
        doltserver::migrate_rig(town_root, &m.rig_name, &m.source_path)
            .with_context(|| format!("migrating {}", m.rig_name))?;
        println!("  ✓ Migrated to {}", m.target_path.display());
    }

    let (updated, errors) = doltserver::ensure_all_metadata(town_root);
    if !updated.is_empty() {
        println!("\nUpdated metadata.json for: {}", updated.join(", "));
    }
    for e in errors {
        println!("  ⚠ metadata.json update failed: {e:#}");
    }

    println!("\n✓ Migration complete.");

    // Leaving the server down here invites split-brain: the next bd
    // command would silently create an isolated local database.
    println!("\nStarting Dolt server to prevent split-brain risk...");
    match doltserver::start(town_root) {
        Err(e) => {
            println!("\n⚠ Could not auto-start Dolt server: {e:#}");
            println!("\n⚠ WARNING: Do NOT run bd commands until the server is started!");
            println!("  Running bd before 'township dolt start' risks split-brain: bd may create");
            println!("  an isolated local database instead of connecting to the shared server.");
            println!("\n  Start manually with: township dolt start");
        }
        Ok(()) => {
            let state = doltserver::load_state(town_root).unwrap_or_default();
            println!("✓ Dolt server started (PID {})", state.pid);
            for e in set_sync_mode_for_all_rigs(town_root) {
                println!("  ⚠ sync.mode set failed: {e:#}");
            }
        }
    }

    Ok(())
}

fn run_fix_metadata(town_root: &Path) -> anyhow::Result<()> {
    let (updated, errors) = doltserver::ensure_all_metadata(town_root);

    if !updated.is_empty() {
        println!("✓ Updated metadata.json for {} rig(s):", updated.len());
        for name in &updated {
            println!("  - {name}");
        }
    }
    let had_errors = !errors.is_empty();
    for e in errors {
        println!("  ⚠ {e:#}");
    }
    if updated.is_empty() && !had_errors {
        println!("No rig databases found. Nothing to update.");
    }

    for e in set_sync_mode_for_all_rigs(town_root) {
        println!("  ⚠ sync.mode set failed: {e:#}");
    }
    Ok(())
}

/// Set sync.mode=dolt-native in every rig database. Best-effort: the
/// JSONL export penalty this avoids is a performance issue, not a
/// correctness one.
fn set_sync_mode_for_all_rigs(town_root: &Path) -> Vec<anyhow::Error> {
    let databases = match doltserver::list_databases(town_root) {
        Ok(dbs) => dbs,
        Err(e) => return vec![e.context("listing databases")],
    };

    let mut errors = Vec::new();
    let mut set = Vec::new();
    for db_name in databases {
        let store_dir = paths::rig_store_dir(town_root, &db_name);
        match beads::set_sync_mode_dolt_native(&store_dir) {
            Ok(()) => set.push(db_name),
            Err(e) => errors.push(e.context(db_name)),
        }
    }

    if !set.is_empty() {
        println!("✓ Set sync.mode=dolt-native in DB for: {}", set.join(", "));
    }
    errors
}
