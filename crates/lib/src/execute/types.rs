//! Types for build, check and shell execution.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::inputs::store::StoreError;
use crate::platform::Platform;
use crate::store_lock::StoreLockError;
use crate::util::hash::ContentHash;

/// Exit status as shown to users.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitStatus(pub Option<i32>);

impl fmt::Display for ExitStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self.0 {
      Some(code) => write!(f, "exit code {code}"),
      None => f.write_str("a signal"),
    }
  }
}

/// Errors that can occur during execution.
#[derive(Debug, Error)]
pub enum ExecuteError {
  #[error("{kind} '{output}' needs tool '{tool}', which is not on PATH")]
  MissingTool {
    kind: &'static str,
    output: String,
    tool: String,
  },

  #[error("package '{output}' has no source directory at {path}")]
  MissingSource { output: String, path: PathBuf },

  #[error("'{output}' is composed for {system} and cannot run on this {host} host")]
  ForeignSystem {
    output: String,
    system: Platform,
    host: String,
  },

  /// A build command exited unsuccessfully. `log` is its output, verbatim.
  #[error("package '{output}': `{cmd}` failed with {status}\n{log}")]
  Compile {
    output: String,
    cmd: String,
    status: ExitStatus,
    log: String,
  },

  #[error("{} of {total} checks failed: {}", failed.len(), failed.join(", "))]
  ChecksFailed { failed: Vec<String>, total: usize },

  #[error(transparent)]
  Store(#[from] StoreError),

  #[error(transparent)]
  StoreLock(#[from] StoreLockError),

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
}

/// Captured result of one command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
  pub status: ExitStatus,
  pub stdout: String,
  pub stderr: String,
}

impl CommandOutput {
  pub fn success(&self) -> bool {
    self.status.0 == Some(0)
  }

  /// Stdout followed by stderr, the way a terminal would have shown them.
  pub fn log(&self) -> String {
    let mut log = self.stdout.clone();
    if !log.is_empty() && !log.ends_with('\n') && !self.stderr.is_empty() {
      log.push('\n');
    }
    log.push_str(&self.stderr);
    log
  }
}

/// Result of building a single package.
#[derive(Debug, Clone)]
pub struct BuildResult {
  pub package: String,
  pub hash: ContentHash,
  /// Store entry holding `$out`.
  pub store_path: PathBuf,
  pub duration: Duration,
}

/// Result of running a single check.
#[derive(Debug, Clone)]
pub struct CheckOutcome {
  pub name: String,
  pub passed: bool,
  pub status: ExitStatus,
  /// Combined command output, or the reason the check could not start.
  pub log: String,
  pub duration: Duration,
}

/// Result of running a set of checks.
#[derive(Debug, Clone, Default)]
pub struct CheckReport {
  /// Sorted by check name.
  pub outcomes: Vec<CheckOutcome>,
}

impl CheckReport {
  pub fn is_success(&self) -> bool {
    self.outcomes.iter().all(|o| o.passed)
  }

  pub fn passed(&self) -> impl Iterator<Item = &CheckOutcome> {
    self.outcomes.iter().filter(|o| o.passed)
  }

  pub fn failed(&self) -> impl Iterator<Item = &CheckOutcome> {
    self.outcomes.iter().filter(|o| !o.passed)
  }

  /// `Err(ChecksFailed)` if any check failed.
  pub fn into_result(self) -> Result<CheckReport, ExecuteError> {
    if self.is_success() {
      return Ok(self);
    }
    Err(ExecuteError::ChecksFailed {
      failed: self.failed().map(|o| o.name.clone()).collect(),
      total: self.outcomes.len(),
    })
  }
}

/// Configuration for execution.
#[derive(Debug, Clone)]
pub struct ExecuteConfig {
  /// Maximum number of checks to run in parallel.
  pub parallelism: usize,

  /// Shell to use for command execution.
  /// If None, uses /bin/sh (Unix) or powershell.exe (Windows).
  pub shell: Option<String>,
}

impl Default for ExecuteConfig {
  fn default() -> Self {
    Self {
      parallelism: num_cpus(),
      shell: None,
    }
  }
}

fn num_cpus() -> usize {
  std::thread::available_parallelism().map(|p| p.get()).unwrap_or(4)
}
