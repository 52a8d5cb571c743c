mod build;
mod check;
mod develop;
mod gc;
mod info;
mod lock;
mod show;
mod update;

pub use build::cmd_build;
pub use check::cmd_check;
pub use develop::cmd_develop;
pub use gc::cmd_gc;
pub use info::cmd_info;
pub use lock::cmd_lock;
pub use show::cmd_show;
pub use update::cmd_update;

use std::path::PathBuf;

use anyhow::{Context, Result};

use tether_lib::execute::ExecuteConfig;
use tether_lib::inputs::fetch::SourceFetcher;
use tether_lib::inputs::resolve::{ResolutionResult, ResolveOptions};
use tether_lib::inputs::retry::RetryPolicy;
use tether_lib::inputs::store::ContentStore;
use tether_lib::outputs::OutputRegistry;
use tether_lib::platform::Platform;
use tether_lib::platform::paths;
use tether_lib::project::{Project, hold_store};
use tether_lib::store_lock::StoreLock;

/// Global options shared by every command.
pub struct Session {
  pub file: Option<PathBuf>,
  pub jobs: Option<usize>,
  pub retries: Option<u32>,
}

impl Session {
  pub fn project(&self) -> Result<Project> {
    Ok(Project::load(self.file.as_deref())?)
  }

  pub fn resolve_options(&self) -> ResolveOptions {
    let mut options = ResolveOptions {
      retry: self.retry_policy(),
      ..Default::default()
    };
    if let Some(jobs) = self.jobs {
      options.jobs = jobs;
    }
    options
  }

  pub fn retry_policy(&self) -> RetryPolicy {
    match self.retries {
      Some(retries) => RetryPolicy::with_retries(retries),
      None => RetryPolicy::default(),
    }
  }

  pub fn execute_config(&self) -> ExecuteConfig {
    let mut config = ExecuteConfig::default();
    if let Some(jobs) = self.jobs {
      config.parallelism = jobs;
    }
    config
  }

  /// Resolve `project`, persist its lock file and register it as a GC root.
  ///
  /// Runs before any async runtime exists: fetching uses blocking clients.
  pub fn lock(&self, project: &Project) -> Result<ResolutionResult> {
    let fetcher = SourceFetcher::new()?;
    let store = ContentStore::new();
    let result = project.resolve(&fetcher, &store, &self.resolve_options())?;
    project.write_lock(&result, &paths::roots_file())?;
    Ok(result)
  }

  /// Keep garbage collection off the store until the guard is dropped.
  pub fn hold_store(&self, command: &str) -> Result<StoreLock> {
    Ok(hold_store(&ContentStore::new(), command)?)
  }

  /// Resolve and compose `project` for every configured system.
  pub fn outputs(&self, project: &Project) -> Result<OutputRegistry> {
    let result = self.lock(project)?;
    Ok(project.outputs(&result.graph, host()?)?)
  }
}

pub fn host() -> Result<Platform> {
  Platform::current().context("Unsupported host platform")
}

/// The platform named on the command line, or the host.
pub fn target_system(requested: Option<&str>) -> Result<Platform> {
  match requested {
    Some(s) => Ok(s.parse()?),
    None => host(),
  }
}

pub fn runtime() -> Result<tokio::runtime::Runtime> {
  tokio::runtime::Runtime::new().context("Failed to create async runtime")
}
