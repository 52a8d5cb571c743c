//! Shared test helpers for CLI integration tests.

use std::path::{Path, PathBuf};

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use tempfile::TempDir;

/// Isolated test environment.
///
/// Each test gets its own project directory and its own store, data and
/// cache paths.
pub struct TestEnv {
  pub temp: TempDir,
}

impl TestEnv {
  /// Create a project whose `tether.toml` holds `manifest`.
  pub fn with_manifest(manifest: &str) -> Self {
    let env = Self::empty();
    env.write_file("project/tether.toml", manifest);
    env
  }

  /// Create an empty test environment.
  pub fn empty() -> Self {
    let temp = TempDir::new().unwrap();
    std::fs::create_dir_all(temp.path().join("project")).unwrap();
    Self { temp }
  }

  /// Write a file relative to the temp directory.
  pub fn write_file(&self, relative_path: &str, content: &str) {
    let path = self.temp.path().join(relative_path);
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
  }

  pub fn project_dir(&self) -> PathBuf {
    let p = self.temp.path().join("project");
    dunce::canonicalize(&p).unwrap_or(p)
  }

  pub fn lock_path(&self) -> PathBuf {
    self.project_dir().join("tether.lock")
  }

  pub fn read_lock(&self) -> String {
    std::fs::read_to_string(self.lock_path()).unwrap()
  }

  /// Data path for the GC roots file.
  pub fn data_path(&self) -> PathBuf {
    let p = self.temp.path().join("data");
    std::fs::create_dir_all(&p).unwrap();
    dunce::canonicalize(&p).unwrap_or(p)
  }

  /// Cache path holding the store.
  pub fn cache_path(&self) -> PathBuf {
    let p = self.temp.path().join("cache");
    std::fs::create_dir_all(&p).unwrap();
    dunce::canonicalize(&p).unwrap_or(p)
  }

  pub fn store_path(&self) -> PathBuf {
    self.cache_path().join("store")
  }

  /// Get a pre-configured Command for the tether binary.
  ///
  /// Runs inside the project directory with `TETHER_CACHE_DIR` and
  /// `TETHER_DATA_DIR` pointing into the temp directory.
  pub fn tether_cmd(&self) -> Command {
    let mut cmd: Command = cargo_bin_cmd!("tether");
    cmd.current_dir(self.project_dir());
    cmd.env("TETHER_CACHE_DIR", self.cache_path());
    cmd.env("TETHER_DATA_DIR", self.data_path());
    cmd.env_remove("TETHER_LOG");
    cmd.env_remove("RUST_LOG");
    cmd
  }
}

/// Last non-empty line of `stdout`, as a path.
pub fn last_line_path(stdout: &[u8]) -> PathBuf {
  let text = String::from_utf8_lossy(stdout);
  text
    .lines()
    .map(str::trim)
    .filter(|l| Path::new(l).is_absolute())
    .last()
    .map(PathBuf::from)
    .unwrap_or_else(|| panic!("no path in output:\n{text}"))
}
