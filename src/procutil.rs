//! Process probes and signals: liveness, identity, port and lockfile
//! inspection via the platform tools.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;

use crate::subprocess::Tool;

/// True when a process with the given pid exists (null-signal probe).
#[cfg(unix)]
pub fn pid_alive(pid: u32) -> bool {
    unsafe { libc::kill(pid as i32, 0) == 0 }
}

#[cfg(not(unix))]
pub fn pid_alive(pid: u32) -> bool {
    Tool::new("tasklist")
        .args(&["/FI", &format!("PID eq {pid}")])
        .run()
        .map(|o| o.stdout.contains(&pid.to_string()))
        .unwrap_or(false)
}

/// Send SIGTERM. Errors are returned to the caller; an already-gone
/// process is not an error.
#[cfg(unix)]
pub fn terminate(pid: u32) -> anyhow::Result<()> {
    if unsafe { libc::kill(pid as i32, libc::SIGTERM) } != 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ESRCH) {
            return Ok(());
        }
        return Err(err).with_context(|| format!("sending SIGTERM to pid {pid}"));
    }
    Ok(())
}

/// Send SIGKILL. An already-gone process is not an error.
#[cfg(unix)]
pub fn force_kill(pid: u32) -> anyhow::Result<()> {
    if unsafe { libc::kill(pid as i32, libc::SIGKILL) } != 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ESRCH) {
            return Ok(());
        }
        return Err(err).with_context(|| format!("sending SIGKILL to pid {pid}"));
    }
    Ok(())
}

#[cfg(not(unix))]
pub fn terminate(pid: u32) -> anyhow::Result<()> {
    Tool::new("taskkill")
        .args(&["/PID", &pid.to_string()])
        .run_ok()
        .with_context(|| format!("terminating pid {pid}"))?;
    Ok(())
}

#[cfg(not(unix))]
pub fn force_kill(pid: u32) -> anyhow::Result<()> {
    Tool::new("taskkill")
        .args(&["/F", "/PID", &pid.to_string()])
        .run_ok()
        .with_context(|| format!("killing pid {pid}"))?;
    Ok(())
}

/// The command line of a running process, or None if it cannot be read.
pub fn process_command_line(pid: u32) -> Option<String> {
    let out = Tool::new("ps")
        .args(&["-p", &pid.to_string(), "-o", "command="])
        .run()
        .ok()?;
    if !out.success() {
        return None;
    }
    let line = out.stdout.trim().to_string();
    if line.is_empty() { None } else { Some(line) }
}

/// True when the pid's command line identifies the dolt binary in
/// sql-server mode.
pub fn is_dolt_server_process(pid: u32) -> bool {
    process_command_line(pid)
        .map(|cmd| cmd.contains("dolt") && cmd.contains("sql-server"))
        .unwrap_or(false)
}

/// Find a dolt sql-server process listening on the given port. Returns
/// the pid, or None. Catches externally-started servers the pid file
/// knows nothing about.
pub fn find_dolt_server_on_port(port: u16) -> Option<u32> {
    let out = Tool::new("lsof")
        .args(&["-i", &format!(":{port}"), "-t"])
        .timeout(Duration::from_secs(5))
        .run()
        .ok()?;
    if !out.success() {
        return None;
    }

    let pid: u32 = out.stdout.trim().lines().next()?.trim().parse().ok()?;
    if is_dolt_server_process(pid) {
        Some(pid)
    } else {
        None
    }
}

/// Outcome of probing a file for open handles.
#[derive(Debug, PartialEq, Eq)]
pub enum LockHolders {
    /// No process holds the file open; safe to remove.
    None,
    /// At least one process holds it (or the probe was inconclusive).
    Held,
}

/// Probe whether any process holds `path` open, via lsof. Exit code 1
/// with no output means no holders; anything else is treated as held so
/// we never delete a live lock.
pub fn file_open_handles(path: &Path) -> LockHolders {
    let path_s = path.to_string_lossy();
    match Tool::new("lsof")
        .arg(&path_s)
        .timeout(Duration::from_secs(5))
        .run()
    {
        Ok(out) if out.exit_code == 1 && out.stdout.trim().is_empty() => LockHolders::None,
        _ => LockHolders::Held,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn own_pid_is_alive() {
        assert!(pid_alive(std::process::id()));
    }

    #[test]
    fn bogus_pid_is_dead() {
        // Pid near the typical max; overwhelmingly unlikely to exist.
        assert!(!pid_alive(4_000_000));
    }

    #[test]
    fn own_command_line_is_readable() {
        let cmd = process_command_line(std::process::id());
        assert!(cmd.is_some());
    }

    #[test]
    fn own_process_is_not_a_dolt_server() {
        assert!(!is_dolt_server_process(std::process::id()));
    }
}
