use predicates::prelude::*;

use super::common::TestEnv;

const MANIFEST: &str = r#"
description = "demo project"

[outputs.packages.default]
build = ["true"]

[outputs.dev-shells.default]
shell-hook = "echo hi"

[outputs.checks.fmt]
command = "true"
"#;

#[test]
fn show_lists_outputs() {
  let env = TestEnv::with_manifest(MANIFEST);

  env
    .tether_cmd()
    .arg("show")
    .assert()
    .success()
    .stdout(predicate::str::contains("demo project"))
    .stdout(predicate::str::contains("packages.default"))
    .stdout(predicate::str::contains("devShells.default"))
    .stdout(predicate::str::contains("checks.fmt"));
}

#[test]
fn show_json_is_valid() {
  let env = TestEnv::with_manifest(MANIFEST);

  let output = env
    .tether_cmd()
    .args(["show", "--json"])
    .assert()
    .success()
    .get_output()
    .stdout
    .clone();

  let value: serde_json::Value = serde_json::from_slice(&output).unwrap();
  let systems = value.as_object().unwrap();
  assert_eq!(systems.len(), 1);
  let set = systems.values().next().unwrap();
  assert!(set["packages"]["default"].is_object());
  assert!(set["checks"]["fmt"].is_object());
}
