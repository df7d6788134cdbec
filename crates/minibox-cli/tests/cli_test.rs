//! End-to-end tests for the `minibox` binary.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::process::Command;

fn minibox() -> Command {
    Command::new(env!("CARGO_BIN_EXE_minibox"))
}

#[test]
fn missing_command_is_a_usage_error() {
    let output = minibox().args(["run", "alpine"]).output().expect("spawn");
    assert!(!output.status.success());
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn unknown_program_fails_with_pipeline_exit_code() {
    let output = minibox()
        .args(["run", "alpine", "definitely-not-a-real-program-xyz"])
        .output()
        .expect("spawn");
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Error:"), "stderr: {stderr}");
}

#[test]
fn invalid_reference_fails_with_pipeline_exit_code() {
    let output = minibox()
        .args(["run", "library/nested/name", "echo"])
        .output()
        .expect("spawn");
    assert_eq!(output.status.code(), Some(1));
}

// The host binary is copied into the image, so the image must carry a
// compatible C library.
#[test]
#[ignore = "requires root and network access"]
fn echo_prints_through_to_stdout() {
    let output = minibox()
        .args(["run", "busybox:glibc", "/bin/echo", "hello"])
        .output()
        .expect("spawn");
    assert_eq!(String::from_utf8_lossy(&output.stdout), "hello\n");
    assert_eq!(output.status.code(), Some(0));
}

#[test]
#[ignore = "requires root and network access"]
fn child_exit_code_is_mirrored() {
    let output = minibox()
        .args(["run", "busybox:glibc", "/bin/sh", "-c", "exit 3"])
        .output()
        .expect("spawn");
    assert_eq!(output.status.code(), Some(3));
}

#[test]
#[ignore = "requires root and network access"]
fn child_sees_itself_as_pid_one() {
    let output = minibox()
        .args(["run", "busybox:glibc", "/bin/sh", "-c", "echo $$"])
        .output()
        .expect("spawn");
    assert_eq!(String::from_utf8_lossy(&output.stdout), "1\n");
}
