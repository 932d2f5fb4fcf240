//! Integration tests for the `procprim` binary.

use assert_cmd::Command;
use predicates::prelude::*;
use predicates::str::contains;

fn procprim() -> Command {
    #[allow(deprecated)]
    Command::cargo_bin("procprim").expect("binary `procprim` should be built")
}

// ── exit / cwd ──────────────────────────────────────────────────────

#[test]
fn exit_uses_given_code() {
    procprim().args(["exit", "5"]).assert().code(5);
    procprim().arg("exit").assert().code(0);
}

#[test]
fn exit_rejects_out_of_range_code() {
    procprim()
        .args(["exit", "4294967296"])
        .assert()
        .code(1)
        .stderr(contains("invalid argument"));
}

#[test]
fn cwd_prints_working_directory() {
    let tmp = tempfile::tempdir().expect("create temp dir");
    let expected = tmp.path().canonicalize().unwrap();

    procprim()
        .arg("cwd")
        .current_dir(tmp.path())
        .assert()
        .success()
        .stdout(predicate::str::diff(format!("{}\n", expected.display())));
}

#[test]
fn cwd_fails_in_removed_directory() {
    let tmp = tempfile::tempdir().expect("create temp dir");
    let script = format!(
        "mkdir gone && cd gone && rmdir ../gone && exec {} cwd",
        env!("CARGO_BIN_EXE_procprim")
    );

    Command::new("/bin/sh")
        .args(["-c", &script])
        .current_dir(tmp.path())
        .assert()
        .code(1)
        .stderr(contains("getcwd failed"));
}

// ── pipe ────────────────────────────────────────────────────────────

#[test]
fn pipe_read_copies_output_and_status() {
    procprim()
        .args(["pipe", "printf 'a\\nb\\n'; exit 4"])
        .assert()
        .code(4)
        .stdout("a\nb\n");
}

#[test]
fn pipe_write_feeds_stdin() {
    procprim()
        .args(["--chunk", "3", "pipe", "--mode", "w", "tr a-z A-Z"])
        .write_stdin("hello pipe")
        .assert()
        .success()
        .stdout("HELLO PIPE");
}

#[test]
fn pipe_with_huge_chunk_still_reads() {
    procprim()
        .args(["--chunk", "18446744073709551615", "pipe", "printf hi"])
        .assert()
        .success()
        .stdout("hi");
}

#[test]
fn pipe_rejects_unknown_mode() {
    procprim()
        .args(["pipe", "--mode", "rw", "true"])
        .assert()
        .code(1)
        .stderr(contains("pipe mode must be"));
}

// ── spawn ───────────────────────────────────────────────────────────

#[test]
fn spawn_separates_streams() {
    procprim()
        .args(["spawn", "sh", "-c", "echo out; echo err >&2; exit 6"])
        .assert()
        .code(6)
        .stdout("out\n")
        .stderr("err\n");
}

#[test]
fn spawn_reports_exec_failure_from_child() {
    procprim()
        .args(["spawn", "/nonexistent/program"])
        .assert()
        .code(127)
        .stderr("spawn: exec failed\n");
}

#[test]
fn spawn_signal_status() {
    procprim()
        .args(["spawn", "sh", "-c", "kill -TERM $$"])
        .assert()
        .code(128 + 15);
}

// ── exports ─────────────────────────────────────────────────────────

#[test]
fn exports_global_style() {
    procprim()
        .args(["exports", "--style", "global"])
        .assert()
        .success()
        .stdout(contains("function process.exit"))
        .stdout(contains("constructor Pipe"))
        .stdout(contains("value dirname"));
}

#[test]
fn exports_module_style() {
    procprim()
        .arg("exports")
        .assert()
        .success()
        .stdout(contains("function spawn"))
        .stdout(contains("function wait"))
        .stdout(contains("function dirname"))
        .stdout(contains("process.exit").not());
}
