//! Implementation of the `tether check` command.

use std::process::ExitCode;

use anyhow::Result;
use owo_colors::{OwoColorize, Stream};

use tether_lib::execute::run_checks;

use crate::cmd::{Session, runtime, target_system};
use crate::output::{format_duration, print_info, print_success, symbols};

/// Run every check declared for the target system.
pub fn cmd_check(session: &Session, system: Option<&str>) -> Result<ExitCode> {
  let system = target_system(system)?;
  let project = session.project()?;
  let _store_lock = session.hold_store("tether check")?;
  let registry = session.outputs(&project)?;
  let checks: Vec<_> = registry.system(system)?.checks.values().cloned().collect();

  if checks.is_empty() {
    print_info(&format!("No checks defined for {system}"));
    return Ok(ExitCode::SUCCESS);
  }

  let report = runtime()?.block_on(run_checks(checks, &project.dir, &session.execute_config()))?;

  for outcome in &report.outcomes {
    let duration = format_duration(outcome.duration);
    if outcome.passed {
      println!(
        "  {} {} {}",
        symbols::SUCCESS.if_supports_color(Stream::Stdout, |s| s.green()),
        outcome.name,
        duration.if_supports_color(Stream::Stdout, |s| s.dimmed())
      );
    } else {
      println!(
        "  {} {} ({}) {}",
        symbols::ERROR.if_supports_color(Stream::Stdout, |s| s.red()),
        outcome.name,
        outcome.status,
        duration.if_supports_color(Stream::Stdout, |s| s.dimmed())
      );
    }
  }

  for outcome in report.failed() {
    let log = outcome.log.trim_end();
    if log.is_empty() {
      continue;
    }
    println!();
    println!("{}", format!("--- {} ---", outcome.name).if_supports_color(Stream::Stdout, |s| s.bold()));
    println!("{log}");
  }

  let report = report.into_result()?;
  print_success(&format!("{} checks passed", report.outcomes.len()));
  Ok(ExitCode::SUCCESS)
}
