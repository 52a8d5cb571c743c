//! Implementation of the `tether develop` command.

use std::process::ExitCode;

use anyhow::Result;
use tracing::debug;

use tether_lib::execute::develop;
use tether_lib::outputs::{LookupError, Output, OutputKind, OutputRef};

use crate::cmd::{Session, host, runtime};

/// Enter the dev shell `reference` names, or run `command` inside it.
///
/// The exit code is the shell's own.
pub fn cmd_develop(session: &Session, reference: &str, command: Option<&str>) -> Result<ExitCode> {
  let reference: OutputRef = reference.parse()?;
  let project = session.project()?;
  let _store_lock = session.hold_store("tether develop")?;
  let registry = session.outputs(&project)?;
  let shell = match registry.get_kind(&reference, OutputKind::DevShell, host()?)? {
    Output::DevShell(shell) => shell,
    other => {
      return Err(
        LookupError::WrongKind {
          reference: reference.to_string(),
          expected: OutputKind::DevShell,
          actual: other.kind(),
        }
        .into(),
      );
    }
  };

  let status = runtime()?.block_on(develop(shell, &project.dir, command, &session.execute_config()))?;
  debug!(shell = %shell.name, %status, "dev shell exited");

  Ok(match status.0 {
    Some(0) => ExitCode::SUCCESS,
    Some(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
    None => ExitCode::FAILURE,
  })
}
