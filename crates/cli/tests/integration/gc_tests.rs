use predicates::prelude::*;

use super::common::TestEnv;

#[test]
fn gc_with_no_store_succeeds() {
  let env = TestEnv::empty();

  env
    .tether_cmd()
    .arg("gc")
    .assert()
    .success()
    .stdout(predicate::str::contains("Garbage collection complete"));
}

#[test]
fn gc_dry_run_shows_what_would_be_removed() {
  let env = TestEnv::empty();

  env
    .tether_cmd()
    .arg("gc")
    .arg("--dry-run")
    .assert()
    .success()
    .stdout(predicate::str::contains("Dry run"));
}

#[test]
fn gc_json_output_is_valid() {
  let env = TestEnv::empty();

  env
    .tether_cmd()
    .arg("gc")
    .args(["-o", "json"])
    .assert()
    .success()
    .stdout(predicate::str::contains("entries_deleted"))
    .stdout(predicate::str::contains("deleted_paths"));
}

#[test]
fn gc_keeps_locked_inputs() {
  let env = TestEnv::with_manifest("[inputs]\nlib = \"path:../lib\"\n");
  env.write_file("lib/README", "hello");
  env.tether_cmd().arg("lock").assert().success();

  env
    .tether_cmd()
    .args(["gc", "-o", "json"])
    .assert()
    .success()
    .stdout(predicate::str::contains("\"entries_deleted\": 0"))
    .stdout(predicate::str::contains("\"entries_live\": 1"));
}

#[cfg(unix)]
#[test]
fn gc_removes_build_outputs() {
  let env = TestEnv::with_manifest("[outputs.packages.default]\nbuild = [\"touch $out/x\"]\n");
  env.tether_cmd().arg("build").assert().success();

  env
    .tether_cmd()
    .args(["gc", "-o", "json"])
    .assert()
    .success()
    .stdout(predicate::str::contains("\"entries_deleted\": 1"));
}
