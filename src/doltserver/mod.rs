//! Supervisor for the shared Dolt SQL server.
//!
//! One server per town serves every rig's issue database over the MySQL
//! protocol, lifting the single-writer limit of embedded mode. The
//! supervisor owns the server's lifecycle and the only persisted runtime
//! state (pid file + state file in the daemon directory). All SQL goes
//! through the `dolt` binary; nothing here links a SQL client.

mod branch;
mod health;
mod metadata;
mod migrate;

pub use branch::{
    create_polecat_branch, delete_polecat_branch, find_latest_polecat_branch,
    merge_polecat_branch, polecat_branch_name, validate_branch_name,
};
pub use health::{HealthMetrics, active_connections, has_connection_capacity, health_metrics,
    query_latency};
pub use metadata::{ensure_all_metadata, ensure_metadata};
pub use migrate::{Migration, find_migratable, migrate_rig};

use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, bail};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::fsutil::{self, FileLock};
use crate::paths;
use crate::procutil::{self, LockHolders};
use crate::subprocess::Tool;

/// MySQL protocol port; 3307 avoids colliding with a local MySQL on 3306.
pub const DEFAULT_PORT: u16 = 3307;

/// Default Dolt user (no password for localhost).
pub const DEFAULT_USER: &str = "root";

/// Conservative cap to prevent connection storms during mass polecat
/// spawns. 0 means the Dolt default (1000).
pub const DEFAULT_MAX_CONNECTIONS: u32 = 50;

/// Deadline for a single SQL statement through the dolt CLI.
const SQL_TIMEOUT: Duration = Duration::from_secs(15);

/// Dolt server configuration. max_connections is always re-read from
/// here; it is never persisted in the state file.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub town_root: PathBuf,
    pub port: u16,
    pub user: String,
    pub data_dir: PathBuf,
    pub log_file: PathBuf,
    pub pid_file: PathBuf,
    pub max_connections: u32,
}

impl ServerConfig {
    pub fn new(town_root: &Path) -> Self {
        let daemon_dir = paths::daemon_dir(town_root);
        Self {
            town_root: town_root.to_path_buf(),
            port: DEFAULT_PORT,
            user: DEFAULT_USER.to_string(),
            data_dir: paths::data_dir(town_root),
            log_file: daemon_dir.join("dolt.log"),
            pid_file: daemon_dir.join("dolt.pid"),
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }

    pub fn lock_file(&self) -> PathBuf {
        paths::daemon_dir(&self.town_root).join("dolt.lock")
    }

    /// MySQL connection string for the server.
    pub fn connection_string(&self) -> String {
        format!("{}@tcp(127.0.0.1:{})/", self.user, self.port)
    }
}

/// The server's runtime state, written atomically on start and zeroed on
/// stop. Advisory: liveness is always re-derived from the pid file and
/// port, never from this record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerState {
    pub running: bool,
    pub pid: u32,
    pub port: u16,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub data_dir: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub databases: Vec<String>,
}

/// Path to the state file.
pub fn state_file(town_root: &Path) -> PathBuf {
    paths::daemon_dir(town_root).join("dolt-state.json")
}

/// Load server state; a missing file is an empty state.
pub fn load_state(town_root: &Path) -> anyhow::Result<ServerState> {
    let path = state_file(town_root);
    match std::fs::read_to_string(&path) {
        Ok(data) => {
            serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ServerState::default()),
        Err(e) => {
            Err(anyhow::Error::new(e)).with_context(|| format!("reading {}", path.display()))
        }
    }
}

/// Save server state atomically.
pub fn save_state(town_root: &Path, state: &ServerState) -> anyhow::Result<()> {
    let path = state_file(town_root);
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }
    fsutil::atomic_write_json(&path, state)
}

/// Check whether the server is running. Returns (running, pid).
///
/// Resolution order: pid file (process alive and verified as a dolt
/// sql-server by command line), then a port scan that catches
/// externally-started servers. A pid file that fails verification is
/// stale and gets deleted.
pub fn is_running(town_root: &Path) -> (bool, u32) {
    let config = ServerConfig::new(town_root);

    if let Ok(data) = std::fs::read_to_string(&config.pid_file) {
        if let Ok(pid) = data.trim().parse::<u32>()
            && procutil::pid_alive(pid)
            && procutil::is_dolt_server_process(pid)
        {
            return (true, pid);
        }
        // Stale pid file
        let _ = std::fs::remove_file(&config.pid_file);
    }

    if let Some(pid) = procutil::find_dolt_server_on_port(config.port) {
        return (true, pid);
    }

    (false, 0)
}

/// Verify the server is actually accepting TCP connections.
///
/// Catches the window where a process exists but isn't listening yet, or
/// a stale pid with nothing on the port. The error is distinct from "not
/// running" so callers can tell misconfiguration from a clean stop.
pub fn check_reachable(town_root: &Path) -> anyhow::Result<()> {
    let config = ServerConfig::new(town_root);
    let addr = format!("127.0.0.1:{}", config.port);
    let sock_addr: std::net::SocketAddr = addr.parse().context("building server address")?;
    match TcpStream::connect_timeout(&sock_addr, Duration::from_secs(2)) {
        Ok(_) => Ok(()),
        Err(e) => bail!(
            "Dolt server not reachable at {addr}: {e}\n\nStart with: township dolt start"
        ),
    }
}

/// List rig databases: immediate subdirectories of the data dir that
/// contain a `.dolt` metadata directory.
pub fn list_databases(town_root: &Path) -> anyhow::Result<Vec<String>> {
    let config = ServerConfig::new(town_root);
    let entries = match std::fs::read_dir(&config.data_dir) {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(anyhow::Error::new(e))
                .with_context(|| format!("reading {}", config.data_dir.display()));
        }
    };

    let mut databases = Vec::new();
    for entry in entries.flatten() {
        if !entry.path().is_dir() {
            continue;
        }
        if entry.path().join(".dolt").exists()
            && let Some(name) = entry.file_name().to_str()
        {
            databases.push(name.to_string());
        }
    }
    databases.sort();
    Ok(databases)
}

/// Start the Dolt SQL server in the background.
pub fn start(town_root: &Path) -> anyhow::Result<()> {
    let config = ServerConfig::new(town_root);

    let daemon_dir = paths::daemon_dir(town_root);
    std::fs::create_dir_all(&daemon_dir)
        .with_context(|| format!("creating daemon directory {}", daemon_dir.display()))?;

    // One start at a time across processes.
    let lock = FileLock::try_acquire(&config.lock_file())
        .context("acquiring start lock")?;
    let _lock = match lock {
        Some(l) => l,
        None => bail!("another dolt start is in progress"),
    };

    let (running, pid) = is_running(town_root);
    if running {
        bail!("Dolt server already running (PID {pid})");
    }

    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("creating data directory {}", config.data_dir.display()))?;

    let databases = list_databases(town_root)?;
    if databases.is_empty() {
        bail!(
            "no databases found in {}\nInitialize with: township dolt init-rig <name>",
            config.data_dir.display()
        );
    }

    // Embedded-mode lock files survive crashes; clear the ones nobody
    // holds so the server can open every database.
    for db in &databases {
        if let Err(e) = cleanup_stale_dolt_lock(&config.data_dir.join(db)) {
            eprintln!("Warning: {e:#}");
        }
    }

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&config.log_file)
        .with_context(|| format!("opening log file {}", config.log_file.display()))?;
    let log_err = log_file.try_clone().context("duplicating log handle")?;

    let mut args: Vec<String> = vec![
        "sql-server".into(),
        "--port".into(),
        config.port.to_string(),
        "--data-dir".into(),
        config.data_dir.to_string_lossy().into_owned(),
    ];
    if config.max_connections > 0 {
        args.push("--max-connections".into());
        args.push(config.max_connections.to_string());
    }

    let child = std::process::Command::new("dolt")
        .args(&args)
        .stdin(std::process::Stdio::null())
        .stdout(log_file)
        .stderr(log_err)
        .spawn()
        .context("starting Dolt server")?;
    let pid = child.id();

    // pid file strictly follows a successful spawn; a failed write means
    // we own an untracked child, so kill it.
    if let Err(e) = std::fs::write(&config.pid_file, pid.to_string()) {
        let _ = procutil::force_kill(pid);
        return Err(anyhow::Error::new(e))
            .with_context(|| format!("writing PID file {}", config.pid_file.display()));
    }

    let state = ServerState {
        running: true,
        pid,
        port: config.port,
        started_at: Some(Utc::now()),
        data_dir: config.data_dir.to_string_lossy().into_owned(),
        databases,
    };
    if let Err(e) = save_state(town_root, &state) {
        // Advisory state only; the server is up.
        eprintln!("Warning: failed to save state: {e:#}");
    }

    // Give the server a beat, then make sure it survived startup.
    std::thread::sleep(Duration::from_millis(500));
    let (running, _) = is_running(town_root);
    if !running {
        bail!("Dolt server failed to start (check logs with 'township dolt logs')");
    }

    Ok(())
}

/// Remove a stale embedded-mode lock file if no process holds it open.
/// A held lock is expected (bd may be running) and is left alone.
fn cleanup_stale_dolt_lock(database_dir: &Path) -> anyhow::Result<()> {
    let lock_path = database_dir.join(".dolt").join("noms").join("LOCK");
    if !lock_path.exists() {
        return Ok(());
    }

    match procutil::file_open_handles(&lock_path) {
        LockHolders::None => std::fs::remove_file(&lock_path)
            .with_context(|| format!("removing stale LOCK file {}", lock_path.display())),
        LockHolders::Held => Ok(()),
    }
}

/// Stop the server. Works for supervisor-started and externally-started
/// servers alike.
pub fn stop(town_root: &Path) -> anyhow::Result<()> {
    let config = ServerConfig::new(town_root);

    let (running, pid) = is_running(town_root);
    if !running {
        bail!("Dolt server is not running");
    }

    procutil::terminate(pid)?;

    // Graceful window: dolt takes a moment to flush.
    for _ in 0..10 {
        std::thread::sleep(Duration::from_millis(500));
        if !procutil::pid_alive(pid) {
            break;
        }
    }

    if procutil::pid_alive(pid) {
        let _ = procutil::force_kill(pid);
        std::thread::sleep(Duration::from_millis(100));
    }

    let _ = std::fs::remove_file(&config.pid_file);

    // Zero the state, keeping historical fields for display.
    let mut state = load_state(town_root).unwrap_or_default();
    state.running = false;
    state.pid = 0;
    let _ = save_state(town_root, &state);

    Ok(())
}

/// Initialize a new rig database. With a live server this issues CREATE
/// DATABASE so no restart is needed; otherwise it creates the directory
/// and runs `dolt init`. Returns whether a running server registered it.
pub fn init_rig(town_root: &Path, rig_name: &str) -> anyhow::Result<bool> {
    if rig_name.is_empty() {
        bail!("rig name cannot be empty");
    }
    if !rig_name
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
    {
        bail!(
            "invalid rig name {rig_name:?}: must contain only alphanumeric, underscore, or dash"
        );
    }

    let config = ServerConfig::new(town_root);
    let rig_dir = config.data_dir.join(rig_name);

    if rig_dir.join(".dolt").exists() {
        bail!(
            "rig database {rig_name:?} already exists at {}",
            rig_dir.display()
        );
    }

    let (running, _) = is_running(town_root);

    if running {
        server_sql(town_root, &format!("CREATE DATABASE `{rig_name}`"))
            .context("creating database on running server")?;
    } else {
        std::fs::create_dir_all(&rig_dir)
            .with_context(|| format!("creating rig directory {}", rig_dir.display()))?;
        Tool::new("dolt")
            .arg("init")
            .current_dir(&rig_dir)
            .run_ok()
            .context("initializing Dolt database")?;
    }

    if let Err(e) = ensure_metadata(town_root, rig_name) {
        // Init succeeded; the metadata upsert is repairable later.
        eprintln!("Warning: database initialized but metadata.json update failed: {e:#}");
    }

    Ok(running)
}

/// Execute a server-level SQL statement (no target database).
pub(crate) fn server_sql(town_root: &Path, query: &str) -> anyhow::Result<()> {
    let config = ServerConfig::new(town_root);
    let out = Tool::new("dolt")
        .args(&["sql", "-q", query])
        .current_dir(&config.data_dir)
        .timeout(SQL_TIMEOUT)
        .run()?;
    if !out.success() {
        bail!("dolt sql failed (exit {}): {}", out.exit_code, out.combined());
    }
    Ok(())
}

/// Execute a SQL statement against one rig database. A `USE` prefix
/// selects the database; `--use-db` is not available on all dolt
/// versions.
pub(crate) fn rig_sql(town_root: &Path, rig_db: &str, query: &str) -> anyhow::Result<()> {
    let full_query = format!("USE {rig_db}; {query}");
    server_sql(town_root, &full_query)
}

/// Run a query against one rig database and return csv output rows.
pub(crate) fn rig_sql_csv(
    town_root: &Path,
    rig_db: &str,
    query: &str,
) -> anyhow::Result<Vec<String>> {
    let config = ServerConfig::new(town_root);
    let full_query = format!("USE {rig_db}; {query}");
    let out = Tool::new("dolt")
        .args(&["sql", "-q", &full_query, "-r", "csv"])
        .current_dir(&config.data_dir)
        .timeout(SQL_TIMEOUT)
        .run()?;
    if !out.success() {
        bail!("dolt sql failed (exit {}): {}", out.exit_code, out.combined());
    }
    Ok(out
        .stdout
        .lines()
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
        .collect())
}
