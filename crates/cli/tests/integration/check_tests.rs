//! `tether check` runs commands with the host shell, so these tests are
//! unix only.
#![cfg(unix)]

use predicates::prelude::*;

use super::common::TestEnv;

#[test]
fn passing_checks_succeed() {
  let env = TestEnv::with_manifest(
    r#"
[outputs.checks.lint]
command = "true"

[outputs.checks.test]
command = "test -f tether.toml"
"#,
  );

  env
    .tether_cmd()
    .arg("check")
    .assert()
    .success()
    .stdout(predicate::str::contains("lint"))
    .stdout(predicate::str::contains("2 checks passed"));
}

#[test]
fn failing_check_reports_every_failure() {
  let env = TestEnv::with_manifest(
    r#"
[outputs.checks.ok]
command = "true"

[outputs.checks.bad]
command = "echo nope; exit 1"
"#,
  );

  env
    .tether_cmd()
    .arg("check")
    .assert()
    .code(6)
    .stdout(predicate::str::contains("nope"))
    .stderr(predicate::str::contains("error[CheckFailure]"))
    .stderr(predicate::str::contains("1 of 2 checks failed: bad"));
}

#[test]
fn check_without_checks_succeeds() {
  let env = TestEnv::with_manifest("");

  env
    .tether_cmd()
    .arg("check")
    .assert()
    .success()
    .stdout(predicate::str::contains("No checks"));
}

#[test]
fn check_sees_declared_env() {
  let env = TestEnv::with_manifest(
    r#"
[outputs.checks.env]
command = "test \"$GREETING\" = hello"
env = { GREETING = "hello" }
"#,
  );

  env.tether_cmd().arg("check").assert().success();
}
