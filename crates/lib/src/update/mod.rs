//! Input update orchestration.
//!
//! Re-resolves all or some inputs against their upstream, ignoring the pins
//! in the lock file, and reports how the lock file moved.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use thiserror::Error;
use tracing::info;

use crate::consts::ROOT_NODE;
use crate::inputs::ResolvedGraph;
use crate::inputs::fetch::Fetcher;
use crate::inputs::lock::LockFile;
use crate::inputs::resolve::{Refresh, ResolveOptions};
use crate::inputs::retry::RetryPolicy;
use crate::inputs::store::ContentStore;
use crate::project::{Project, ProjectError};

/// Options for the update operation.
#[derive(Debug, Default)]
pub struct UpdateOptions {
  /// Top-level inputs to update. If empty, all inputs are updated.
  pub inputs: Vec<String>,
  /// If true, don't write the lock file.
  pub dry_run: bool,
  /// Fetch parallelism; `None` uses the resolver default.
  pub jobs: Option<usize>,
  pub retry: RetryPolicy,
}

/// Result of a successful update operation.
#[derive(Debug)]
pub struct UpdateResult {
  /// Nodes whose pinned revision moved: node path -> (old_rev, new_rev).
  pub updated: BTreeMap<String, (String, String)>,
  /// Nodes that were not locked before.
  pub added: Vec<String>,
  /// Nodes that dropped out of the lock file.
  pub removed: Vec<String>,
  /// Nodes pinned to the same revision as before.
  pub unchanged: Vec<String>,
  pub graph: ResolvedGraph,
  /// Whether the lock file changed.
  pub lock_changed: bool,
}

#[derive(Debug, Error)]
pub enum UpdateError {
  /// Specified input not declared.
  #[error("input '{name}' not found in tether.toml")]
  InputNotFound { name: String },

  #[error(transparent)]
  Project(#[from] ProjectError),
}

/// Update inputs of `project` by re-resolving them against upstream.
///
/// Named inputs are refreshed together with their own transitive inputs;
/// everything else keeps its pin. With `dry_run` nothing is written.
pub fn update_inputs(
  project: &Project,
  fetcher: &dyn Fetcher,
  store: &ContentStore,
  roots_file: &Path,
  options: &UpdateOptions,
) -> Result<UpdateResult, UpdateError> {
  for name in &options.inputs {
    if !project.manifest.inputs.contains_key(name) {
      return Err(UpdateError::InputNotFound { name: name.clone() });
    }
  }

  let refresh = if options.inputs.is_empty() {
    Refresh::All
  } else {
    Refresh::Only(options.inputs.iter().cloned().collect())
  };
  info!(?refresh, dry_run = options.dry_run, "updating inputs");

  let mut resolve_options = ResolveOptions {
    refresh,
    retry: options.retry,
    ..Default::default()
  };
  if let Some(jobs) = options.jobs {
    resolve_options.jobs = jobs;
  }

  let old_lock = project.load_lock().map_err(ProjectError::from)?.unwrap_or_default();
  let result = project.resolve(fetcher, store, &resolve_options)?;
  let diff = diff_locks(&old_lock, &result.lock_file);

  if options.dry_run {
    info!("dry run, lock file not written");
  } else {
    project.write_lock(&result, roots_file)?;
  }

  info!(
    updated = diff.updated.len(),
    added = diff.added.len(),
    removed = diff.removed.len(),
    "update complete"
  );

  Ok(UpdateResult {
    updated: diff.updated,
    added: diff.added,
    removed: diff.removed,
    unchanged: diff.unchanged,
    graph: result.graph,
    lock_changed: result.lock_changed,
  })
}

#[derive(Debug, Default)]
struct LockDiff {
  updated: BTreeMap<String, (String, String)>,
  added: Vec<String>,
  removed: Vec<String>,
  unchanged: Vec<String>,
}

fn diff_locks(old: &LockFile, new: &LockFile) -> LockDiff {
  let pinned = |lock: &LockFile| -> BTreeMap<String, String> {
    lock
      .nodes
      .iter()
      .filter(|(path, _)| path.as_str() != ROOT_NODE)
      .filter_map(|(path, node)| Some((path.clone(), node.locked.as_ref()?.rev.clone())))
      .collect()
  };
  let old = pinned(old);
  let new = pinned(new);

  let mut diff = LockDiff::default();
  for (path, new_rev) in &new {
    match old.get(path) {
      None => diff.added.push(path.clone()),
      Some(old_rev) if old_rev != new_rev => {
        diff.updated.insert(path.clone(), (old_rev.clone(), new_rev.clone()));
      }
      Some(_) => diff.unchanged.push(path.clone()),
    }
  }

  let kept: BTreeSet<&String> = new.keys().collect();
  diff.removed = old.keys().filter(|path| !kept.contains(path)).cloned().collect();
  diff
}
