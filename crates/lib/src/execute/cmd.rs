//! Running a single command through the shell.

use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, info};

use super::env::CommandEnv;
use super::types::{CommandOutput, ExitStatus};

/// Run `cmd` in `cwd` with `env`, capturing its output.
///
/// A nonzero exit is not an error here; callers decide what failure means.
pub async fn run_captured(
  cmd: &str,
  cwd: &Path,
  env: &CommandEnv,
  shell: Option<&str>,
) -> std::io::Result<CommandOutput> {
  info!(cmd = %cmd, "executing command");

  let mut command = shell_command(cmd, shell);
  command
    .current_dir(cwd)
    .stdin(Stdio::null())
    .stdout(Stdio::piped())
    .stderr(Stdio::piped())
    .kill_on_drop(true);
  env.apply(&mut command);

  debug!(working_dir = %cwd.display(), "spawning process");
  let output = command.output().await?;

  let result = CommandOutput {
    status: ExitStatus(output.status.code()),
    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
  };
  if !result.success() {
    debug!(status = %result.status, stderr = %result.stderr, "command failed");
  }
  Ok(result)
}

/// Run `cmd` attached to the terminal and return its exit status.
pub async fn run_interactive(
  cmd: &str,
  cwd: &Path,
  env: &CommandEnv,
  shell: Option<&str>,
) -> std::io::Result<ExitStatus> {
  let mut command = shell_command(cmd, shell);
  command
    .current_dir(cwd)
    .stdin(Stdio::inherit())
    .stdout(Stdio::inherit())
    .stderr(Stdio::inherit());
  env.apply(&mut command);

  let status = command.status().await?;
  Ok(ExitStatus(status.code()))
}

fn shell_command(cmd: &str, shell: Option<&str>) -> Command {
  let (program, args) = get_shell(shell);
  let mut command = Command::new(program);
  command.args(args).arg(cmd);
  command
}

/// Shell program and the arguments preceding the script.
///
/// Commands run under `/bin/sh` (Unix) or `powershell.exe` (Windows) unless
/// overridden; `$SHELL` is not consulted because profile files would leak
/// into the environment.
pub(crate) fn get_shell(override_shell: Option<&str>) -> (String, Vec<String>) {
  if let Some(shell) = override_shell {
    let args = if shell.contains("powershell") || shell.contains("pwsh") {
      vec![
        "-NoProfile".to_string(),
        "-ExecutionPolicy".to_string(),
        "Bypass".to_string(),
        "-Command".to_string(),
      ]
    } else if shell.contains("cmd") {
      vec!["/C".to_string()]
    } else {
      vec!["-c".to_string()]
    };
    return (shell.to_string(), args);
  }

  #[cfg(unix)]
  {
    ("/bin/sh".to_string(), vec!["-c".to_string()])
  }

  #[cfg(windows)]
  {
    (
      "powershell.exe".to_string(),
      vec![
        "-NoProfile".to_string(),
        "-ExecutionPolicy".to_string(),
        "Bypass".to_string(),
        "-Command".to_string(),
      ],
    )
  }
}
