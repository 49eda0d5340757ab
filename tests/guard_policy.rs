use assert_cmd::Command;
use predicates::prelude::*;

fn guard_cmd(role: Option<&str>) -> Command {
    let mut cmd = Command::cargo_bin("township").unwrap();
    match role {
        Some(r) => {
            cmd.env("TOWN_ROLE", r);
        }
        None => {
            cmd.env_remove("TOWN_ROLE");
        }
    }
    cmd.args(["guard", "task-dispatch"]);
    cmd
}

/// The mayor never dispatches work itself; the guard vetoes with the
/// reserved silent exit code and no output.
#[test]
fn blocks_mayor_silently_with_code_2() {
    guard_cmd(Some("mayor"))
        .assert()
        .code(2)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::is_empty());
}

#[test]
fn allows_when_role_unset() {
    guard_cmd(None).assert().success();
}

#[test]
fn allows_for_crew() {
    guard_cmd(Some("crew")).assert().success();
}

#[test]
fn allows_for_polecat() {
    guard_cmd(Some("polecat")).assert().success();
}
