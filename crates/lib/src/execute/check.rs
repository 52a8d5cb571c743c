//! Running checks concurrently.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::cmd::run_captured;
use super::ensure_host;
use super::env::{CommandEnv, EnvMode};
use super::types::{CheckOutcome, CheckReport, ExecuteConfig, ExecuteError, ExitStatus};
use crate::outputs::Check;

/// Run every check in `checks` from `cwd`, at most `config.parallelism` at
/// a time.
///
/// A failing check never stops the others. The report lists every check;
/// use [`CheckReport::into_result`] to turn failures into an error.
pub async fn run_checks(checks: Vec<Check>, cwd: &Path, config: &ExecuteConfig) -> Result<CheckReport, ExecuteError> {
  for check in &checks {
    ensure_host(&check.name, check.system)?;
  }
  info!(count = checks.len(), parallelism = config.parallelism, "running checks");

  let semaphore = Arc::new(Semaphore::new(config.parallelism.max(1)));
  let mut join_set = JoinSet::new();

  for check in checks {
    let semaphore = semaphore.clone();
    let config = config.clone();
    let cwd = cwd.to_path_buf();

    join_set.spawn(async move {
      let _permit = semaphore.acquire_owned().await;
      run_check(&check, &cwd, &config).await
    });
  }

  let mut outcomes = Vec::new();
  while let Some(joined) = join_set.join_next().await {
    match joined {
      Ok(outcome) => outcomes.push(outcome),
      Err(e) => {
        error!(error = %e, "check task panicked");
        return Err(ExecuteError::Io(std::io::Error::other(e)));
      }
    }
  }
  outcomes.sort_by(|a, b| a.name.cmp(&b.name));

  let report = CheckReport { outcomes };
  info!(
    passed = report.passed().count(),
    failed = report.failed().count(),
    "checks finished"
  );
  Ok(report)
}

async fn run_check(check: &Check, cwd: &Path, config: &ExecuteConfig) -> CheckOutcome {
  let started = Instant::now();
  let failed = |log: String| CheckOutcome {
    name: check.name.clone(),
    passed: false,
    status: ExitStatus(None),
    log,
    duration: started.elapsed(),
  };

  let scratch = match tempfile::Builder::new().prefix("tether-check-").tempdir() {
    Ok(dir) => dir,
    Err(e) => return failed(format!("failed to create scratch directory: {e}")),
  };
  let env = match CommandEnv::new(&check.environment, check.system, scratch.path(), EnvMode::Check) {
    Ok(env) => env,
    Err(e) => return failed(format!("failed to prepare environment: {e}")),
  };
  if let Some(tool) = env.missing_tools.first() {
    let err = ExecuteError::MissingTool {
      kind: "check",
      output: check.name.clone(),
      tool: tool.clone(),
    };
    warn!(check = %check.name, tool = %tool, "check cannot start");
    return failed(err.to_string());
  }

  debug!(check = %check.name, "starting check");
  match run_captured(&check.command, cwd, &env, config.shell.as_deref()).await {
    Ok(output) => {
      let passed = output.success();
      let duration = started.elapsed();
      if passed {
        info!(check = %check.name, elapsed = ?duration, "check passed");
      } else {
        warn!(check = %check.name, status = %output.status, "check failed");
      }
      CheckOutcome {
        name: check.name.clone(),
        passed,
        status: output.status,
        log: output.log(),
        duration,
      }
    }
    Err(e) => failed(format!("failed to run `{}`: {e}", check.command)),
  }
}
