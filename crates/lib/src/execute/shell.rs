//! Entering development shells.

use std::path::Path;

use tracing::{info, warn};

use super::cmd::run_interactive;
use super::ensure_host;
use super::env::{CommandEnv, EnvMode};
use super::types::{ExecuteConfig, ExecuteError, ExitStatus};
use crate::outputs::DevShell;

/// Start `shell` in `cwd`: run its hook once, then `command` or an
/// interactive shell. Returns the exit status of the session.
///
/// Declared variables reach only the child process. Missing tools are
/// reported but do not prevent entering the shell.
pub async fn develop(
  shell: &DevShell,
  cwd: &Path,
  command: Option<&str>,
  config: &ExecuteConfig,
) -> Result<ExitStatus, ExecuteError> {
  ensure_host(&shell.name, shell.system)?;

  let scratch = tempfile::Builder::new().prefix("tether-shell-").tempdir()?;
  let mut env = CommandEnv::new(&shell.environment, shell.system, scratch.path(), EnvMode::Shell)?;
  for tool in &env.missing_tools {
    warn!(shell = %shell.name, tool = %tool, "tool not found on PATH");
  }
  env.set("TETHER_SHELL", shell.name.as_str());

  info!(shell = %shell.name, interactive = command.is_none(), "entering dev shell");
  let script = session_script(shell.shell_hook.as_deref(), command);
  let status = run_interactive(&script, cwd, &env, config.shell.as_deref()).await?;
  info!(shell = %shell.name, status = %status, "left dev shell");
  Ok(status)
}

/// The hook followed by `command`, or by a handoff to the user's shell.
fn session_script(hook: Option<&str>, command: Option<&str>) -> String {
  let mut script = String::new();
  if let Some(hook) = hook.filter(|h| !h.trim().is_empty()) {
    script.push_str(hook);
    script.push('\n');
  }
  match command {
    Some(command) => script.push_str(command),
    None => script.push_str(INTERACTIVE),
  }
  script
}

#[cfg(unix)]
const INTERACTIVE: &str = "exec \"${SHELL:-/bin/sh}\"";
#[cfg(windows)]
const INTERACTIVE: &str = "powershell.exe -NoLogo";
