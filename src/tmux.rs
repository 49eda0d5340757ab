//! Multiplexer probes: session liveness, age, pane capture, keystrokes.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use chrono::{TimeZone, Utc};

use crate::subprocess::Tool;

const TMUX_TIMEOUT: Duration = Duration::from_secs(5);

/// True when a session with this exact name exists.
pub fn has_session(name: &str) -> bool {
    Tool::new("tmux")
        .args(&["has-session", "-t", name])
        .timeout(TMUX_TIMEOUT)
        .run()
        .map(|o| o.success())
        .unwrap_or(false)
}

/// Minutes since the session was created, from the multiplexer's
/// `session_created` epoch. Returns 0.0 when the session is missing or
/// the epoch cannot be read.
pub fn session_age_minutes(name: &str) -> f64 {
    let out = match Tool::new("tmux")
        .args(&["display-message", "-t", name, "-p", "#{session_created}"])
        .timeout(TMUX_TIMEOUT)
        .run()
    {
        Ok(o) if o.success() => o,
        _ => return 0.0,
    };

    let Ok(epoch) = out.stdout.trim().parse::<i64>() else {
        return 0.0;
    };
    let Some(created) = Utc.timestamp_opt(epoch, 0).single() else {
        return 0.0;
    };
    let age = Utc::now().signed_duration_since(created);
    (age.num_seconds().max(0) as f64) / 60.0
}

/// Recent output from a session's active pane.
pub fn capture_pane(name: &str, lines: u32) -> anyhow::Result<String> {
    let start = format!("-{lines}");
    let out = Tool::new("tmux")
        .args(&["capture-pane", "-p", "-t", name, "-S", &start])
        .timeout(TMUX_TIMEOUT)
        .run_ok()
        .with_context(|| format!("capturing pane for {name}"))?;
    Ok(out.stdout)
}

/// Type a message into a session followed by Enter.
pub fn send_message(name: &str, message: &str) -> anyhow::Result<()> {
    Tool::new("tmux")
        .args(&["send-keys", "-t", name, message, "Enter"])
        .timeout(TMUX_TIMEOUT)
        .run_ok()
        .with_context(|| format!("sending keys to {name}"))?;
    Ok(())
}

/// Start a detached session running `command` in `work_dir`.
pub fn new_session(name: &str, work_dir: &Path, command: &str) -> anyhow::Result<()> {
    let dir = work_dir.to_string_lossy();
    Tool::new("tmux")
        .args(&["new-session", "-d", "-s", name, "-c", &dir, command])
        .timeout(TMUX_TIMEOUT)
        .run_ok()
        .with_context(|| format!("creating session {name}"))?;
    Ok(())
}
