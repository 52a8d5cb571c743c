//! Building packages into the content store.

use std::path::Path;
use std::time::Instant;

use tracing::{debug, info};

use super::cmd::run_captured;
use super::env::{CommandEnv, EnvMode};
use super::ensure_host;
use super::types::{BuildResult, ExecuteConfig, ExecuteError};
use crate::inputs::store::ContentStore;
use crate::outputs::Package;
use crate::store_lock::{LockMode, StoreLock};

/// Run the build commands of `package` and add `$out` to the store.
///
/// Commands run in order inside the package source directory; the first
/// failing command aborts the build with its output. Nothing is added to
/// the store unless every command succeeds.
pub async fn build_package(
  package: &Package,
  store: &ContentStore,
  config: &ExecuteConfig,
) -> Result<BuildResult, ExecuteError> {
  ensure_host(&package.name, package.system)?;
  if !package.src.is_dir() {
    return Err(ExecuteError::MissingSource {
      output: package.name.clone(),
      path: package.src.clone(),
    });
  }

  let started = Instant::now();
  info!(package = %package.name, system = %package.system, "building package");

  let _store_lock = StoreLock::acquire(store.root(), LockMode::Shared, "tether build")?;
  let out = store.staging_dir()?;
  let scratch = tempfile::Builder::new().prefix("tether-build-").tempdir()?;

  let mut env = CommandEnv::new(&package.environment, package.system, scratch.path(), EnvMode::Build)?;
  if let Some(tool) = env.missing_tools.first() {
    return Err(ExecuteError::MissingTool {
      kind: "package",
      output: package.name.clone(),
      tool: tool.clone(),
    });
  }
  env.set("out", out.path().as_os_str());

  for cmd in &package.build {
    run_step(package, cmd, &package.src, &env, config).await?;
  }

  let (hash, store_path) = store.add(out)?;
  let duration = started.elapsed();
  info!(package = %package.name, hash = %hash, elapsed = ?duration, "package built");

  Ok(BuildResult {
    package: package.name.clone(),
    hash,
    store_path,
    duration,
  })
}

async fn run_step(
  package: &Package,
  cmd: &str,
  cwd: &Path,
  env: &CommandEnv,
  config: &ExecuteConfig,
) -> Result<(), ExecuteError> {
  let output = run_captured(cmd, cwd, env, config.shell.as_deref()).await?;
  if !output.success() {
    return Err(ExecuteError::Compile {
      output: package.name.clone(),
      cmd: cmd.to_string(),
      status: output.status,
      log: output.log(),
    });
  }
  debug!(package = %package.name, cmd = %cmd, "build step finished");
  Ok(())
}
