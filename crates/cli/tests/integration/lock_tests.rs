use predicates::prelude::*;

use super::common::TestEnv;

const PATH_INPUT: &str = r#"
[inputs]
lib = "path:../lib"
"#;

#[test]
fn lock_writes_lock_file_for_path_input() {
  let env = TestEnv::with_manifest(PATH_INPUT);
  env.write_file("lib/README", "hello");

  env
    .tether_cmd()
    .arg("lock")
    .assert()
    .success()
    .stdout(predicate::str::contains("Lock file updated"))
    .stdout(predicate::str::contains("lib"));

  let lock = env.read_lock();
  assert!(lock.contains("\"lib\""));
  assert!(lock.contains("\"root\""));
}

#[test]
fn second_lock_is_up_to_date() {
  let env = TestEnv::with_manifest(PATH_INPUT);
  env.write_file("lib/README", "hello");

  env.tether_cmd().arg("lock").assert().success();
  let first = env.read_lock();

  env
    .tether_cmd()
    .arg("lock")
    .assert()
    .success()
    .stdout(predicate::str::contains("up to date"));

  assert_eq!(env.read_lock(), first);
}

#[test]
fn lock_without_inputs_writes_root_only() {
  let env = TestEnv::with_manifest("description = \"empty\"\n");

  env.tether_cmd().arg("lock").assert().success();

  assert!(env.lock_path().exists());
}

#[test]
fn lock_registers_gc_root() {
  let env = TestEnv::with_manifest(PATH_INPUT);
  env.write_file("lib/README", "hello");

  env.tether_cmd().arg("lock").assert().success();

  let roots = std::fs::read_to_string(env.data_path().join("roots.json")).unwrap();
  assert!(roots.contains("tether.lock"));
}

#[test]
fn file_flag_selects_manifest() {
  let env = TestEnv::empty();
  env.write_file("elsewhere/tether.toml", "");

  env
    .tether_cmd()
    .arg("--file")
    .arg(env.temp.path().join("elsewhere"))
    .arg("lock")
    .assert()
    .success();

  assert!(env.temp.path().join("elsewhere/tether.lock").exists());
  assert!(!env.lock_path().exists());
}
