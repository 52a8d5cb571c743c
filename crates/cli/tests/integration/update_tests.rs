use predicates::prelude::*;

use super::common::TestEnv;

const MANIFEST: &str = r#"
[inputs]
lib = "path:../lib"
"#;

#[test]
fn update_with_unchanged_inputs_is_up_to_date() {
  let env = TestEnv::with_manifest(MANIFEST);
  env.write_file("lib/README", "hello");
  env.tether_cmd().arg("lock").assert().success();

  env
    .tether_cmd()
    .arg("update")
    .assert()
    .success()
    .stdout(predicate::str::contains("up to date"));
}

#[test]
fn update_picks_up_changed_path_input() {
  let env = TestEnv::with_manifest(MANIFEST);
  env.write_file("lib/README", "hello");
  env.tether_cmd().arg("lock").assert().success();
  let before = env.read_lock();

  env.write_file("lib/README", "goodbye");
  env.tether_cmd().args(["update", "lib"]).assert().success();

  assert_ne!(env.read_lock(), before);
}

#[test]
fn update_dry_run_leaves_lock_untouched() {
  let env = TestEnv::with_manifest(MANIFEST);
  env.write_file("lib/README", "hello");
  env.tether_cmd().arg("lock").assert().success();
  let before = env.read_lock();

  env.write_file("lib/README", "goodbye");
  env
    .tether_cmd()
    .args(["update", "--dry-run"])
    .assert()
    .success()
    .stdout(predicate::str::contains("Dry run"));

  assert_eq!(env.read_lock(), before);
}
