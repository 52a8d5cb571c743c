//! Implementation of the `tether update` command.
//!
//! Re-resolves inputs (fetching the newest revisions) and rewrites the lock
//! file.

use std::process::ExitCode;
use std::time::Instant;

use anyhow::{Context, Result};
use owo_colors::{OwoColorize, Stream};

use tether_lib::inputs::fetch::SourceFetcher;
use tether_lib::inputs::store::ContentStore;
use tether_lib::platform::paths;
use tether_lib::update::{UpdateOptions, update_inputs};

use crate::cmd::Session;
use crate::output::{format_duration, print_info, print_success, short_rev, symbols};

/// Execute the update command.
///
/// * `inputs` - Top-level inputs to update. If empty, all inputs are updated.
/// * `dry_run` - If true, show what would change without writing anything.
pub fn cmd_update(session: &Session, inputs: Vec<String>, dry_run: bool) -> Result<ExitCode> {
  let start = Instant::now();
  let project = session.project()?;

  let options = UpdateOptions {
    inputs,
    dry_run,
    jobs: session.jobs,
    retry: session.retry_policy(),
  };

  let fetcher = SourceFetcher::new()?;
  let result = update_inputs(&project, &fetcher, &ContentStore::new(), &paths::roots_file(), &options)
    .context("Failed to update inputs")?;

  if dry_run {
    println!("{}", "Dry run - no changes written".if_supports_color(Stream::Stdout, |s| s.yellow()));
    println!();
  }

  for (path, (old_rev, new_rev)) in &result.updated {
    let prefix = if dry_run { "Would update" } else { "Updated" };
    println!(
      "  {} {}: {} {} {}",
      symbols::MODIFY.if_supports_color(Stream::Stdout, |s| s.yellow()),
      prefix,
      path.if_supports_color(Stream::Stdout, |s| s.cyan()),
      format!("{} ->", short_rev(old_rev)).if_supports_color(Stream::Stdout, |s| s.dimmed()),
      short_rev(new_rev).if_supports_color(Stream::Stdout, |s| s.green())
    );
  }

  for path in &result.added {
    let prefix = if dry_run { "Would add" } else { "Added" };
    let rev = result.graph.node(path).map(|n| n.locked.rev.as_str()).unwrap_or_default();
    println!(
      "  {} {}: {} ({})",
      symbols::ADD.if_supports_color(Stream::Stdout, |s| s.green()),
      prefix,
      path.if_supports_color(Stream::Stdout, |s| s.cyan()),
      short_rev(rev).if_supports_color(Stream::Stdout, |s| s.dimmed())
    );
  }

  for path in &result.removed {
    let prefix = if dry_run { "Would remove" } else { "Removed" };
    println!(
      "  {} {}: {}",
      symbols::REMOVE.if_supports_color(Stream::Stdout, |s| s.red()),
      prefix,
      path.if_supports_color(Stream::Stdout, |s| s.cyan())
    );
  }

  if !result.unchanged.is_empty() {
    let names = result.unchanged.join(", ");
    println!(
      "  {} Unchanged: {}",
      symbols::INFO.if_supports_color(Stream::Stdout, |s| s.dimmed()),
      names.if_supports_color(Stream::Stdout, |s| s.dimmed())
    );
  }

  if !result.lock_changed {
    print_success("All inputs are up to date.");
  } else if !dry_run {
    println!();
    print_success(&format!("Lock file updated: {}", project.lock_path().display()));
    print_info(&format!("Duration: {}", format_duration(start.elapsed())));
  }

  Ok(ExitCode::SUCCESS)
}
