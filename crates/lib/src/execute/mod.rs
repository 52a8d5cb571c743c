//! Execution of composed outputs.
//!
//! - [`build_package`] runs a package's build commands and stores `$out`
//! - [`run_checks`] runs checks concurrently and reports each one
//! - [`develop`] enters a dev shell
//!
//! Composition is pure; everything that spawns processes lives here and runs
//! on tokio.

mod build;
mod check;
pub mod cmd;
pub mod env;
mod shell;
mod types;

pub use build::build_package;
pub use check::run_checks;
pub use shell::develop;
pub use types::{
  BuildResult, CheckOutcome, CheckReport, CommandOutput, ExecuteConfig, ExecuteError, ExitStatus,
};

use crate::platform::Platform;

/// Outputs only run on the platform they were composed for.
fn ensure_host(output: &str, system: Platform) -> Result<(), ExecuteError> {
  match Platform::current() {
    Some(host) if host == system => Ok(()),
    host => Err(ExecuteError::ForeignSystem {
      output: output.to_string(),
      system,
      host: host.map_or_else(|| "unsupported".to_string(), |h| h.triple()),
    }),
  }
}
