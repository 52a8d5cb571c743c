//! `tether build` runs package commands with the host shell, so these tests
//! are unix only.
#![cfg(unix)]

use predicates::prelude::*;

use super::common::{TestEnv, last_line_path};

#[test]
fn build_default_package_adds_output_to_store() {
  let env = TestEnv::with_manifest(
    r#"
[outputs.packages.default]
build = ["echo built > $out/result"]
"#,
  );

  let output = env.tether_cmd().arg("build").assert().success().get_output().stdout.clone();

  let store_path = last_line_path(&output);
  assert!(store_path.starts_with(env.store_path()));
  assert_eq!(std::fs::read_to_string(store_path.join("result")).unwrap(), "built\n");
}

#[test]
fn build_reads_locked_input() {
  let env = TestEnv::with_manifest(
    r#"
[inputs]
lib = "path:../lib"

[outputs.packages.app]
build = ["cp ${inputs.lib}/VERSION $out/VERSION"]
"#,
  );
  env.write_file("lib/VERSION", "1.2.3");

  let output = env.tether_cmd().args(["build", "app"]).assert().success().get_output().stdout.clone();

  let store_path = last_line_path(&output);
  assert_eq!(std::fs::read_to_string(store_path.join("VERSION")).unwrap(), "1.2.3");
  assert!(env.lock_path().exists());
}

#[test]
fn failing_build_command_is_a_compile_error() {
  let env = TestEnv::with_manifest(
    r#"
[outputs.packages.default]
build = ["echo compiling", "echo broken >&2; exit 7"]
"#,
  );

  env
    .tether_cmd()
    .arg("build")
    .assert()
    .code(6)
    .stderr(predicate::str::contains("error[CompileError]"))
    .stderr(predicate::str::contains("broken"));
}

#[test]
fn build_of_a_check_is_rejected() {
  let env = TestEnv::with_manifest(
    r#"
[outputs.checks.fmt]
command = "true"
"#,
  );

  env
    .tether_cmd()
    .args(["build", "fmt"])
    .assert()
    .code(2)
    .stderr(predicate::str::contains("fmt"));
}
