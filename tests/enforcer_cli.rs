//! CLI-surface integration tests for the `tbulmkd` (Enforcer) binary, run
//! out-of-process with `assert_cmd`. Anything that needs real root
//! privileges (shm, cgroups, mlockall) is covered by the unit tests inside
//! the library instead; this file only exercises argument parsing and the
//! process's documented exit codes.

use assert_cmd::Command;
use pretty_assertions::assert_eq;

#[test]
fn help_flag_exits_with_status_one() {
    let mut cmd = Command::cargo_bin("tbulmkd").unwrap();
    let assert = cmd.arg("--help").assert();
    assert.failure().code(1);
}

#[test]
fn help_output_lists_all_four_flags() {
    let mut cmd = Command::cargo_bin("tbulmkd").unwrap();
    let output = cmd.arg("--help").output().unwrap();
    let combined = format!(
        "{}{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    for flag in ["--apps", "--daemons", "--cgroups", "--timeout"] {
        assert!(combined.contains(flag), "help text missing {flag}: {combined}");
    }
}

#[test]
fn rejects_non_numeric_timeout() {
    let mut cmd = Command::cargo_bin("tbulmkd").unwrap();
    cmd.args(["--timeout", "soon"]).assert().failure();
}

#[test]
fn unknown_flag_is_silently_skipped_not_rejected() {
    // §6: "Unknown options are silently skipped". The process still exits
    // nonzero here (no shared task table exists in this test sandbox), so
    // the thing to check isn't the overall exit code but that clap never
    // treated the flag itself as a usage error: a real clap parse failure
    // exits with its own usage-error code (2) and echoes the offending
    // token on stderr, neither of which should appear once the flag has
    // been filtered out before reaching clap.
    let mut cmd = Command::cargo_bin("tbulmkd").unwrap();
    let output = cmd.arg("--not-a-real-flag").output().unwrap();
    assert_ne!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(!stderr.contains("--not-a-real-flag"), "flag leaked into clap's error: {stderr}");
    assert!(!stderr.contains("unexpected argument"), "clap treated the flag as a usage error: {stderr}");
}

#[test]
fn exit_code_matches_between_long_and_short_help() {
    let long = Command::cargo_bin("tbulmkd").unwrap().arg("--help").assert().get_output().status.code();
    let short = Command::cargo_bin("tbulmkd").unwrap().arg("-h").assert().get_output().status.code();
    assert_eq!(long, short);
}
