mod cmd;
mod output;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgAction, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use tether_lib::error::{ErrorClass, class_of};

use crate::cmd::Session;
use crate::output::{OutputFormat, error_message, print_error};

/// tether - lock inputs and compose per-platform outputs
#[derive(Parser)]
#[command(name = "tether")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Increase log verbosity (-v info, -vv debug, -vvv trace)
  #[arg(short, long, action = ArgAction::Count, global = true)]
  verbose: u8,

  /// Declaration file or the directory holding it (default: nearest tether.toml)
  #[arg(short = 'f', long = "file", global = true)]
  file: Option<PathBuf>,

  /// Maximum number of parallel fetches and checks
  #[arg(long, global = true)]
  jobs: Option<usize>,

  /// Retries for transient fetch failures
  #[arg(long, global = true)]
  retries: Option<u32>,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Resolve inputs and write tether.lock if it changed
  Lock,

  /// Re-resolve inputs against upstream, ignoring their pins
  Update {
    /// Inputs to update (default: all)
    inputs: Vec<String>,

    /// Show what would change without writing the lock file
    #[arg(long)]
    dry_run: bool,
  },

  /// Build a package
  Build {
    /// Output reference: `name`, `kind.name` or `kind.system.name`
    #[arg(default_value = "default")]
    output: String,

    /// Platform to compose for (default: this host)
    #[arg(long)]
    system: Option<String>,
  },

  /// Enter a development shell
  Develop {
    /// Dev shell name
    #[arg(default_value = "default")]
    shell: String,

    /// Run this command instead of an interactive shell
    #[arg(short, long)]
    command: Option<String>,
  },

  /// Run every check
  Check {
    /// Platform to compose for (default: this host)
    #[arg(long)]
    system: Option<String>,
  },

  /// List outputs per platform
  Show {
    /// Print the output registry as JSON
    #[arg(long)]
    json: bool,
  },

  /// Remove store entries no registered lock file refers to
  Gc {
    /// Report what would be removed without removing it
    #[arg(long)]
    dry_run: bool,

    /// Output format
    #[arg(short, long, value_enum, default_value_t)]
    output: OutputFormat,
  },

  /// Show platform and directory information
  Info,
}

fn init_logging(verbose: u8) {
  let filter = match verbose {
    0 => std::env::var("TETHER_LOG")
      .ok()
      .and_then(|s| EnvFilter::try_new(s).ok())
      .or_else(|| EnvFilter::try_from_default_env().ok())
      .unwrap_or_else(|| EnvFilter::new("warn")),
    1 => EnvFilter::new("info"),
    2 => EnvFilter::new("debug"),
    _ => EnvFilter::new("trace"),
  };

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();
}

fn main() -> ExitCode {
  let cli = Cli::parse();
  init_logging(cli.verbose);

  let session = Session {
    file: cli.file,
    jobs: cli.jobs,
    retries: cli.retries,
  };

  let result = match cli.command {
    Commands::Lock => cmd::cmd_lock(&session),
    Commands::Update { inputs, dry_run } => cmd::cmd_update(&session, inputs, dry_run),
    Commands::Build { output, system } => cmd::cmd_build(&session, &output, system.as_deref()),
    Commands::Develop { shell, command } => cmd::cmd_develop(&session, &shell, command.as_deref()),
    Commands::Check { system } => cmd::cmd_check(&session, system.as_deref()),
    Commands::Show { json } => cmd::cmd_show(&session, json),
    Commands::Gc { dry_run, output } => cmd::cmd_gc(dry_run, output),
    Commands::Info => {
      cmd::cmd_info();
      Ok(ExitCode::SUCCESS)
    }
  };

  match result {
    Ok(code) => code,
    Err(err) => {
      let class = err.chain().find_map(class_of).unwrap_or(ErrorClass::Other);
      print_error(class.name(), &error_message(&err));
      ExitCode::from(class.exit_code() as u8)
    }
  }
}
