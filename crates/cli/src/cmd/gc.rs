use std::process::ExitCode;
use std::time::Instant;

use anyhow::{Context, Result};

use tether_lib::gc::collect_garbage;
use tether_lib::inputs::store::ContentStore;
use tether_lib::platform::paths;

use crate::output::{OutputFormat, format_bytes, format_duration, print_info, print_json, print_stat, print_success};

pub fn cmd_gc(dry_run: bool, output: OutputFormat) -> Result<ExitCode> {
  let start = Instant::now();

  let result =
    collect_garbage(&ContentStore::new(), &paths::roots_file(), dry_run).context("Failed to collect garbage")?;

  if output.is_json() {
    print_json(&result)?;
  } else {
    if dry_run {
      print_info("Dry run - no changes made");
    } else {
      print_success("Garbage collection complete!");
    }
    let stats = &result.stats;
    print_stat("Roots", &stats.roots.to_string());
    if stats.roots_pruned > 0 {
      print_stat("Roots pruned", &stats.roots_pruned.to_string());
    }
    print_stat("Entries kept", &format!("{} of {}", stats.entries_live, stats.entries_scanned));
    print_stat("Entries removed", &stats.entries_deleted.to_string());
    print_stat("Staging removed", &stats.staging_deleted.to_string());
    print_stat("Space freed", &format_bytes(stats.bytes_freed));
    print_stat("Duration", &format_duration(start.elapsed()));
  }

  Ok(ExitCode::SUCCESS)
}
