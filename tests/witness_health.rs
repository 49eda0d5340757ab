use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use assert_cmd::Command;
use chrono::{Duration, SecondsFormat, Utc};
use predicates::prelude::*;

/// Create a town root (marker: mayor/rigs.json) in a temp dir.
fn make_town(dir: &Path) {
    fs::create_dir_all(dir.join("mayor")).unwrap();
    fs::write(dir.join("mayor/rigs.json"), r#"{"version": 1, "rigs": {}}"#).unwrap();
}

fn write_script(dir: &Path, name: &str, body: &str) {
    let path = dir.join(name);
    fs::write(&path, body).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
}

/// Fake tmux that reports "session not found" for has-session and
/// accepts new-session (the restart path).
fn write_fake_tmux(dir: &Path) {
    write_script(
        dir,
        "tmux",
        "#!/bin/sh\n\
         case \"$*\" in\n\
         *has-session*) echo \"can't find session\" >&2; exit 1;;\n\
         *new-session*) exit 0;;\n\
         *) echo 'unexpected tmux command' >&2; exit 1;;\n\
         esac\n",
    );
}

/// Fake tmux whose sessions all exist.
fn write_fake_tmux_alive(dir: &Path) {
    write_script(
        dir,
        "tmux",
        "#!/bin/sh\n\
         case \"$*\" in\n\
         *has-session*) exit 0;;\n\
         *) exit 0;;\n\
         esac\n",
    );
}

/// Fake bd that outputs a polecat agent bead. `desc_state` lands in the
/// description text (the stale audit trail); `db_state` is the
/// authoritative agent_state column.
fn write_fake_bd(dir: &Path, desc_state: &str, db_state: &str, hook: &str, updated_at: &str) {
    let json = format!(
        r#"[{{"id":"tw-myr-polecat-mycat","issue_type":"agent","labels":["tw:agent"],"description":"agent_state: {desc_state}","hook_bead":"{hook}","agent_state":"{db_state}","updated_at":"{updated_at}"}}]"#
    );
    write_script(dir, "bd", &format!("#!/bin/sh\necho '{json}'\n"));
}

fn witness_check(town: &Path, bin_dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("township").unwrap();
    cmd.env("TOWN_ROOT", town)
        .env(
            "PATH",
            format!(
                "{}:{}",
                bin_dir.display(),
                std::env::var("PATH").unwrap_or_default()
            ),
        )
        .args(["witness", "check", "myr", "mycat"]);
    cmd
}

/// A recently-spawning polecat must not be restarted: the heartbeat can
/// fire between bead creation and the session launch, and restarting
/// then double-spawns the runtime.
#[test]
fn spawning_guard_suppresses_restart() {
    let town = tempfile::tempdir().unwrap();
    make_town(town.path());
    let bin = tempfile::tempdir().unwrap();
    write_fake_tmux(bin.path());
    let recent = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
    write_fake_bd(bin.path(), "spawning", "spawning", "tw-xyz", &recent);

    witness_check(town.path(), bin.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("spawning"))
        .stdout(predicate::str::contains("CRASH DETECTED").not());
}

/// A polecat stuck in spawning past the grace window is treated as
/// crashed: the spawn itself may have failed.
#[test]
fn spawning_guard_expires() {
    let town = tempfile::tempdir().unwrap();
    make_town(town.path());
    // Workspace present so the restart path can run.
    fs::create_dir_all(town.path().join("myr/polecats/mycat")).unwrap();
    let bin = tempfile::tempdir().unwrap();
    write_fake_tmux(bin.path());
    let old = (Utc::now() - Duration::minutes(10)).to_rfc3339_opts(SecondsFormat::Secs, true);
    write_fake_bd(bin.path(), "spawning", "spawning", "tw-xyz", &old);

    witness_check(town.path(), bin.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Spawning guard expired"))
        .stdout(predicate::str::contains("CRASH DETECTED"))
        .stdout(predicate::str::contains("restarted myr/mycat"));
}

/// The agent_state column is authoritative. A stale "spawning" line in
/// the description must not suppress crash detection when the column
/// says the polecat is working.
#[test]
fn db_column_overrides_description() {
    let town = tempfile::tempdir().unwrap();
    make_town(town.path());
    let bin = tempfile::tempdir().unwrap();
    write_fake_tmux(bin.path());
    let recent = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
    write_fake_bd(bin.path(), "spawning", "working", "tw-xyz", &recent);

    witness_check(town.path(), bin.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("skipping").not())
        .stdout(predicate::str::contains("CRASH DETECTED"));
}

/// A working polecat with a dead session is a crash.
#[test]
fn working_polecat_with_dead_session_crashes() {
    let town = tempfile::tempdir().unwrap();
    make_town(town.path());
    let bin = tempfile::tempdir().unwrap();
    write_fake_tmux(bin.path());
    let recent = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
    write_fake_bd(bin.path(), "working", "working", "tw-xyz", &recent);

    witness_check(town.path(), bin.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("CRASH DETECTED"));
}

/// A working polecat whose session is alive is healthy.
#[test]
fn working_polecat_with_live_session_is_healthy() {
    let town = tempfile::tempdir().unwrap();
    make_town(town.path());
    let bin = tempfile::tempdir().unwrap();
    write_fake_tmux_alive(bin.path());
    let recent = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
    write_fake_bd(bin.path(), "working", "working", "tw-xyz", &recent);

    witness_check(town.path(), bin.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("healthy"))
        .stdout(predicate::str::contains("CRASH DETECTED").not());
}

/// Idle and done polecats are left alone.
#[test]
fn idle_polecat_needs_no_action() {
    let town = tempfile::tempdir().unwrap();
    make_town(town.path());
    let bin = tempfile::tempdir().unwrap();
    write_fake_tmux(bin.path());
    let recent = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
    write_fake_bd(bin.path(), "idle", "idle", "tw-xyz", &recent);

    witness_check(town.path(), bin.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("no action"))
        .stdout(predicate::str::contains("CRASH DETECTED").not());
}

/// --no-restart reports the crash but quiesces the respawn.
#[test]
fn no_restart_flag_quiesces() {
    let town = tempfile::tempdir().unwrap();
    make_town(town.path());
    fs::create_dir_all(town.path().join("myr/polecats/mycat")).unwrap();
    let bin = tempfile::tempdir().unwrap();
    write_fake_tmux(bin.path());
    let recent = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
    write_fake_bd(bin.path(), "working", "working", "tw-xyz", &recent);

    let mut cmd = Command::cargo_bin("township").unwrap();
    cmd.env("TOWN_ROOT", town.path())
        .env(
            "PATH",
            format!(
                "{}:{}",
                bin.path().display(),
                std::env::var("PATH").unwrap_or_default()
            ),
        )
        .args(["witness", "check", "myr", "mycat", "--no-restart"]);

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("CRASH DETECTED"))
        .stdout(predicate::str::contains("restart skipped (restarts disabled)"));
}
