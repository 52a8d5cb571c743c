//! Implementation of the `tether build` command.

use std::process::ExitCode;

use anyhow::Result;
use tracing::debug;

use tether_lib::execute::build_package;
use tether_lib::inputs::store::ContentStore;
use tether_lib::outputs::{LookupError, Output, OutputKind, OutputRef};

use crate::cmd::{Session, runtime, target_system};
use crate::output::{format_duration, print_stat, print_success, truncate_hash};

/// Build the package `reference` names and print its store path.
pub fn cmd_build(session: &Session, reference: &str, system: Option<&str>) -> Result<ExitCode> {
  let reference: OutputRef = reference.parse()?;
  let system = target_system(system)?;

  let project = session.project()?;
  let _store_lock = session.hold_store("tether build")?;
  let registry = session.outputs(&project)?;
  let package = match registry.get_kind(&reference, OutputKind::Package, system)? {
    Output::Package(package) => package,
    other => {
      return Err(
        LookupError::WrongKind {
          reference: reference.to_string(),
          expected: OutputKind::Package,
          actual: other.kind(),
        }
        .into(),
      );
    }
  };
  debug!(package = %package.name, system = %package.system, "resolved build target");

  let store = ContentStore::new();
  let result = runtime()?.block_on(build_package(package, &store, &session.execute_config()))?;

  print_success(&format!("Built {}", package.name));
  println!("{}", result.store_path.display());
  print_stat("Hash", truncate_hash(result.hash.as_str()));
  print_stat("Duration", &format_duration(result.duration));

  Ok(ExitCode::SUCCESS)
}
