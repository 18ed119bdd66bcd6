//! CLI integration tests for the depot binary.
//!
//! Each test uses an isolated temp directory for the store, ensuring tests
//! can run in parallel safely.

#![allow(deprecated)] // Command::cargo_bin deprecation only affects custom build dirs

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use assert_fs::TempDir;
use predicates::prelude::*;
use serde_json::Value;

struct TestContext {
    temp_dir: TempDir,
}

impl TestContext {
    fn new() -> Self {
        Self {
            temp_dir: TempDir::new().expect("failed to create temp dir"),
        }
    }

    fn root(&self) -> PathBuf {
        self.temp_dir.path().join("store")
    }

    fn root_str(&self) -> String {
        self.root().to_string_lossy().to_string()
    }

    fn scratch(&self) -> &Path {
        self.temp_dir.path()
    }

    fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("depot").expect("failed to find binary");
        cmd.env("NO_COLOR", "1");
        cmd.args(["--root", &self.root_str()]);
        cmd
    }

    fn init(&self) -> assert_cmd::assert::Assert {
        self.cmd().args(["init", "--owner-name", "tester"]).assert()
    }

    fn add_fileset(&self, name: &str) -> assert_cmd::assert::Assert {
        self.cmd()
            .args(["fileset", "add", name, "--version", "1.0", "--revision", "123"])
            .assert()
    }

    fn add_artifact(&self, fileset: &str, name: &str, auxiliary: bool) -> assert_cmd::assert::Assert {
        let source = self.scratch().join("source.txt");
        fs::write(&source, b"artifact bytes\n").expect("failed to write source");
        let source = source.to_string_lossy().to_string();

        let mut cmd = self.cmd();
        cmd.args([
            "artifact",
            "add",
            "--fileset",
            fileset,
            "--source-file",
            &source,
            "--name",
            name,
            "--path",
            "deploy",
            "--origin",
            "buildbot",
        ]);
        if auxiliary {
            cmd.arg("--auxiliary");
        }
        cmd.assert()
    }
}

#[test]
fn init_succeeds_once() {
    let ctx = TestContext::new();

    ctx.init()
        .success()
        .stdout(predicate::str::contains("initialised depot"));

    ctx.init()
        .failure()
        .stderr(predicate::str::contains("already exists"));
}

#[test]
fn commands_fail_without_init() {
    let ctx = TestContext::new();

    ctx.cmd()
        .args(["fileset", "list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("depot instance not found"));
}

#[test]
fn fileset_add_and_list() {
    let ctx = TestContext::new();
    ctx.init().success();

    ctx.add_fileset("build-1")
        .success()
        .stdout(predicate::str::contains("added fileset 'build-1'"));

    ctx.cmd()
        .args(["fileset", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("build-1"));
}

#[test]
fn duplicate_fileset_reports_error() {
    let ctx = TestContext::new();
    ctx.init().success();
    ctx.add_fileset("build-1").success();

    ctx.add_fileset("build-1")
        .failure()
        .stderr(predicate::str::contains("fileset 'build-1' already exists"));
}

#[test]
fn fileset_list_json() {
    let ctx = TestContext::new();
    ctx.init().success();
    ctx.add_fileset("build-1").success();

    let output = ctx
        .cmd()
        .args(["fileset", "list", "--json"])
        .output()
        .expect("failed to run command");
    assert!(output.status.success());

    let filesets: Value = serde_json::from_slice(&output.stdout).expect("failed to parse JSON");
    assert_eq!(filesets[0]["name"], "build-1");
    assert_eq!(filesets[0]["version"], "1.0");
}

#[test]
fn artifact_add_transit_and_get() {
    let ctx = TestContext::new();
    ctx.init().success();
    ctx.add_fileset("build-1").success();

    ctx.add_artifact("build-1", "requirements.txt", false)
        .success()
        .stdout(predicate::str::contains("deploy/requirements.txt"));

    ctx.cmd()
        .args(["artifact", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("untested"));

    ctx.cmd()
        .args(["artifact", "transit", "--id", "1", "--state", "testing"])
        .assert()
        .success()
        .stdout(predicate::str::contains("artifact 1 is now testing"));

    ctx.cmd()
        .args(["artifact", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("testing"));

    let dest = ctx.scratch().join("retrieved.txt");
    let dest_arg = dest.to_string_lossy().to_string();
    ctx.cmd()
        .args(["artifact", "get", "--id", "1", "--dest", &dest_arg])
        .assert()
        .success();
    assert_eq!(fs::read(&dest).unwrap(), b"artifact bytes\n");

    ctx.cmd()
        .args(["artifact", "get", "--id", "1", "--dest", &dest_arg])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));
}

#[test]
fn transit_error_messages() {
    let ctx = TestContext::new();
    ctx.init().success();
    ctx.add_fileset("build-1").success();
    ctx.add_artifact("build-1", "requirements.txt", false).success();

    ctx.cmd()
        .args(["artifact", "transit", "--id", "1", "--state", "happy-birthday"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("is not recognised"));

    ctx.cmd()
        .args(["artifact", "transit", "--id", "42", "--state", "testing"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot be found"));

    ctx.cmd()
        .args(["artifact", "transit", "--id", "1", "--state", "approved"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("is not permitted"));
}

#[test]
fn transit_rejects_auxiliary_artifact() {
    let ctx = TestContext::new();
    ctx.init().success();
    ctx.add_fileset("build-1").success();
    ctx.add_artifact("build-1", "coverage-report.txt", true).success();

    ctx.cmd()
        .args(["artifact", "transit", "--id", "1", "--state", "testing"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("auxiliary"));
}

#[test]
fn artifact_add_unknown_fileset() {
    let ctx = TestContext::new();
    ctx.init().success();

    ctx.add_artifact("no-such-fileset", "requirements.txt", false)
        .failure()
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn tag_and_prop_round_trip() {
    let ctx = TestContext::new();
    ctx.init().success();
    ctx.add_fileset("build-1").success();

    ctx.cmd()
        .args(["tag", "fileset", "--id", "1", "RC1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("tagged fileset 1"));

    ctx.cmd()
        .args(["prop", "fileset", "--id", "1", "TestDate", "2015-10-31"])
        .assert()
        .success();

    // Re-adding the same property without --update must fail.
    ctx.cmd()
        .args(["prop", "fileset", "--id", "1", "TestDate", "2015-10-29"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));

    ctx.cmd()
        .args(["prop", "fileset", "--id", "1", "TestDate", "2015-10-29", "--update"])
        .assert()
        .success();
}
