//! Implementation of the `tether lock` command.

use std::process::ExitCode;
use std::time::Instant;

use anyhow::Result;
use owo_colors::{OwoColorize, Stream};

use crate::cmd::Session;
use crate::output::{format_duration, print_info, print_stat, print_success, short_rev};

/// Resolve every input and write `tether.lock` if it changed.
pub fn cmd_lock(session: &Session) -> Result<ExitCode> {
  let start = Instant::now();
  let project = session.project()?;
  let result = session.lock(&project)?;

  for (name, input) in project
    .manifest
    .inputs
    .keys()
    .filter_map(|name| Some((name, result.graph.input(name)?)))
  {
    println!(
      "  {} {} {}",
      name.if_supports_color(Stream::Stdout, |s| s.cyan()),
      input.original,
      short_rev(&input.locked.rev).if_supports_color(Stream::Stdout, |s| s.dimmed())
    );
  }

  if result.lock_changed {
    print_success(&format!("Lock file updated: {}", project.lock_path().display()));
  } else {
    print_info("Lock file is up to date");
  }
  print_stat("Nodes", &result.graph.nodes.len().to_string());
  print_stat("Fetched", &result.fetched.to_string());
  print_stat("Reused", &result.reused.to_string());
  print_stat("Duration", &format_duration(start.elapsed()));

  Ok(ExitCode::SUCCESS)
}
