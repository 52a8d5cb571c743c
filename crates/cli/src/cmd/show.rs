//! Implementation of the `tether show` command.

use std::process::ExitCode;

use anyhow::Result;
use owo_colors::{OwoColorize, Stream};

use tether_lib::outputs::OutputKind;

use crate::cmd::{Session, host};
use crate::output::print_json;

/// List the outputs of the project for every system.
pub fn cmd_show(session: &Session, json: bool) -> Result<ExitCode> {
  let project = session.project()?;
  let registry = session.outputs(&project)?;

  if json {
    print_json(&registry)?;
    return Ok(ExitCode::SUCCESS);
  }

  if let Some(description) = &project.manifest.description {
    println!("{description}");
    println!();
  }

  let host = host()?;
  for (system, set) in &registry.systems {
    let marker = if *system == host { " (host)" } else { "" };
    println!("{}{}", system.if_supports_color(Stream::Stdout, |s| s.bold()), marker);
    if set.is_empty() {
      println!("  {}", "no outputs".if_supports_color(Stream::Stdout, |s| s.dimmed()));
      continue;
    }
    for kind in OutputKind::ALL {
      for name in set.names(kind) {
        println!(
          "  {}.{}",
          kind.as_str().if_supports_color(Stream::Stdout, |s| s.dimmed()),
          name.if_supports_color(Stream::Stdout, |s| s.cyan())
        );
      }
    }
  }

  Ok(ExitCode::SUCCESS)
}
