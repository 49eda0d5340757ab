//! Deterministic multiplexer session names and identity beacons.

/// Common prefix for all town tmux session names.
pub const PREFIX: &str = "gt-";

/// Session name for the Mayor agent.
pub fn mayor_session_name() -> String {
    format!("{PREFIX}mayor")
}

/// Session name for the Deacon agent.
pub fn deacon_session_name() -> String {
    format!("{PREFIX}deacon")
}

/// Session name for a rig's Witness agent.
pub fn witness_session_name(rig: &str) -> String {
    format!("{PREFIX}{rig}-witness")
}

/// Session name for a rig's Refinery agent.
pub fn refinery_session_name(rig: &str) -> String {
    format!("{PREFIX}{rig}-refinery")
}

/// Session name for a crew worker in a rig.
pub fn crew_session_name(rig: &str, name: &str) -> String {
    format!("{PREFIX}{rig}-crew-{name}")
}

/// Session name for a polecat in a rig.
pub fn polecat_session_name(rig: &str, name: &str) -> String {
    format!("{PREFIX}{rig}-{name}")
}

/// Identity beacon for agent sessions. The beacon becomes the session
/// title in the runtime's resume picker, so workers can find their
/// predecessor sessions.
///
/// Format: `[TOWNSHIP] <address> • <mol-id or "ready"> • <timestamp>`
pub fn session_beacon(address: &str, mol_id: &str) -> String {
    let mol = if mol_id.is_empty() { "ready" } else { mol_id };
    let timestamp = chrono::Local::now().format("%Y-%m-%dT%H:%M");
    format!("[TOWNSHIP] {address} • {mol} • {timestamp}")
}

/// The nudge sent after the beacon to trigger autonomous work execution:
/// if work is on your hook, you run it.
pub fn propulsion_nudge() -> &'static str {
    "Run `township mol status` to check your hook and begin work."
}
