//! Input resolution.
//!
//! Turns declarations into a [`ResolvedGraph`] with every node pinned and
//! present in the content store.
//!
//! # Resolution Algorithm
//!
//! For each scope (the root declaration, then each input's own `tether.toml`):
//! 1. Build the follow graph of the scope and reject cycles before fetching
//! 2. Bind names the parent scope overrides through `follows`
//! 3. Resolve the remaining names wave by wave, each wave in parallel
//!
//! For each input:
//! - If locked and the locator matches: reuse the store entry, or fetch the
//!   locked revision and verify its content hash
//! - If locked but the locator differs: error (requires `tether update`)
//! - If not locked, or being refreshed: fetch the newest revision and pin it
//!
//! `path:` inputs are re-read on every resolution.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use rayon::prelude::*;
use tempfile::TempDir;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

use super::fetch::{FetchError, FetchRequest, Fetched, Fetcher, resolve_path};
use super::graph::{FollowGraph, GraphError};
use super::lock::LockFile;
use super::retry::RetryPolicy;
use super::source::{Locator, SourceType};
use super::store::{ContentStore, StoreError};
use super::types::{InputDecl, InputDecls, LockedSource, ResolvedGraph, ResolvedInput, node_path};
use crate::consts::ROOT_NODE;
use crate::manifest::{DeclError, Manifest};

/// Which locked nodes to ignore and re-resolve.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Refresh {
  #[default]
  None,
  All,
  /// Top-level names; their transitive inputs are refreshed with them.
  Only(BTreeSet<String>),
}

impl Refresh {
  pub fn covers(&self, node: &str) -> bool {
    match self {
      Refresh::None => false,
      Refresh::All => true,
      Refresh::Only(names) => {
        let head = node.split('/').next().unwrap_or(node);
        names.contains(head)
      }
    }
  }
}

#[derive(Debug, Clone)]
pub struct ResolveOptions {
  pub refresh: Refresh,
  /// Upper bound on concurrent fetches.
  pub jobs: usize,
  pub retry: RetryPolicy,
}

impl Default for ResolveOptions {
  fn default() -> Self {
    Self {
      refresh: Refresh::None,
      jobs: std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4),
      retry: RetryPolicy::default(),
    }
  }
}

/// Result of input resolution.
#[derive(Debug)]
pub struct ResolutionResult {
  pub graph: ResolvedGraph,
  /// Lock file describing `graph`.
  pub lock_file: LockFile,
  /// Whether `lock_file` differs from the lock resolution started from.
  pub lock_changed: bool,
  /// Number of successful fetches.
  pub fetched: usize,
  /// Number of nodes served from the store without fetching.
  pub reused: usize,
}

/// Errors that can occur during input resolution.
#[derive(Debug, Error)]
pub enum ResolveError {
  #[error(transparent)]
  Graph(#[from] GraphError),

  #[error("input '{name}' has an invalid declaration file: {source}")]
  SubManifest {
    name: String,
    #[source]
    source: DeclError,
  },

  #[error("input '{name}' is locked to {locked} but declared as {declared}. Run 'tether update {name}' to update.")]
  LockMismatch {
    name: String,
    locked: String,
    declared: String,
  },

  #[error("lock entry for '{name}' has an invalid content hash '{hash}'")]
  InvalidLockHash { name: String, hash: String },

  #[error("failed to fetch input '{name}': {source}")]
  Fetch {
    name: String,
    #[source]
    source: FetchError,
  },

  #[error("content of input '{name}' does not match the lock file: expected {expected}, got {actual}")]
  Integrity {
    name: String,
    expected: String,
    actual: String,
  },

  #[error(transparent)]
  Store(#[from] StoreError),

  #[error("failed to start fetch workers: {0}")]
  ThreadPool(String),
}

/// Resolves declarations against a lock file, a fetcher and a store.
pub struct Resolver<'a> {
  fetcher: &'a dyn Fetcher,
  store: &'a ContentStore,
  lock: Option<&'a LockFile>,
  options: &'a ResolveOptions,
  fetched: AtomicUsize,
  reused: AtomicUsize,
}

impl<'a> Resolver<'a> {
  pub fn new(
    fetcher: &'a dyn Fetcher,
    store: &'a ContentStore,
    lock: Option<&'a LockFile>,
    options: &'a ResolveOptions,
  ) -> Self {
    Self {
      fetcher,
      store,
      lock,
      options,
      fetched: AtomicUsize::new(0),
      reused: AtomicUsize::new(0),
    }
  }

  /// Resolve the top-level `inputs`, declared in a file located in `base_dir`.
  pub fn resolve(&self, inputs: &InputDecls, base_dir: &Path) -> Result<ResolutionResult, ResolveError> {
    info!(count = inputs.len(), jobs = self.options.jobs, "resolving inputs");

    self.store.ensure_dir()?;
    let pool = rayon::ThreadPoolBuilder::new()
      .num_threads(self.options.jobs.max(1))
      .thread_name(|i| format!("tether-fetch-{i}"))
      .build()
      .map_err(|e| ResolveError::ThreadPool(e.to_string()))?;

    let mut graph = ResolvedGraph::default();
    pool.install(|| self.resolve_scope(ROOT_NODE, inputs, &BTreeMap::new(), base_dir, &mut graph))?;

    let lock_file = LockFile::from_graph(&graph);
    if let Some(old) = self.lock {
      for node in old.nodes.keys().filter(|n| !lock_file.nodes.contains_key(*n)) {
        warn!(node = %node, "removing stale input from lock file");
      }
    }
    let lock_changed = self.lock != Some(&lock_file);

    let fetched = self.fetched.load(Ordering::Relaxed);
    let reused = self.reused.load(Ordering::Relaxed);
    info!(nodes = graph.nodes.len(), fetched, reused, lock_changed, "inputs resolved");

    Ok(ResolutionResult {
      graph,
      lock_file,
      lock_changed,
      fetched,
      reused,
    })
  }

  /// Resolve every name declared in `scope` into `graph`.
  ///
  /// `overrides` are the sub-inputs the parent scope already bound through
  /// `follows`; they are never fetched.
  fn resolve_scope(
    &self,
    scope: &str,
    decls: &InputDecls,
    overrides: &BTreeMap<String, String>,
    base_dir: &Path,
    graph: &mut ResolvedGraph,
  ) -> Result<(), ResolveError> {
    let bound: BTreeSet<String> = overrides.keys().cloned().collect();
    let follow_graph = FollowGraph::build(scope, decls, &bound)?;
    follow_graph.check_acyclic()?;

    graph.edges.entry(scope.to_string()).or_default();
    for (name, target) in overrides {
      if !decls.contains_key(name) {
        debug!(scope, name = %name, "follows override for an undeclared sub-input");
      }
      graph.bind(scope, name, target);
    }

    for wave in follow_graph.waves()? {
      trace!(scope, wave = ?wave, "resolving wave");
      let snapshot: &ResolvedGraph = graph;
      let results: Vec<Result<ResolvedGraph, ResolveError>> = wave
        .par_iter()
        .map(|name| self.resolve_input(scope, name, &decls[name], base_dir, snapshot))
        .collect();

      for (name, result) in wave.iter().zip(results) {
        graph.merge(result?);
        graph.bind(scope, name, &node_path(scope, name));
      }
    }
    Ok(())
  }

  /// Pin one input and resolve its own inputs, returning `graph` extended
  /// with everything found below it.
  fn resolve_input(
    &self,
    scope: &str,
    name: &str,
    decl: &InputDecl,
    base_dir: &Path,
    graph: &ResolvedGraph,
  ) -> Result<ResolvedGraph, ResolveError> {
    let node = node_path(scope, name);

    let mut overrides = BTreeMap::new();
    for (sub, target) in &decl.follows {
      let target_node = graph
        .lookup(scope, target)
        .ok_or_else(|| GraphError::FollowsTargetNotFound {
          from: format!("{node}.{sub}"),
          target: target.clone(),
        })?;
      trace!(node = %node, sub = %sub, target = %target_node, "binding followed input");
      overrides.insert(sub.clone(), target_node);
    }

    let input = self.pin(&node, &decl.locator, base_dir)?;

    let sub_inputs = Manifest::load_inputs(&input.path).map_err(|source| ResolveError::SubManifest {
      name: node.clone(),
      source,
    })?;

    // Relative paths inside a local input are relative to its source directory.
    let child_base = match decl.locator.type_ {
      SourceType::Path => decl
        .locator
        .path
        .as_deref()
        .and_then(|p| resolve_path(p, base_dir).ok())
        .unwrap_or_else(|| input.path.clone()),
      _ => input.path.clone(),
    };

    let mut local = graph.clone();
    local.nodes.insert(node.clone(), input);
    self.resolve_scope(&node, &sub_inputs, &overrides, &child_base, &mut local)?;
    Ok(local)
  }

  fn pin(&self, node: &str, locator: &Locator, base_dir: &Path) -> Result<ResolvedInput, ResolveError> {
    let locked = self.locked_for(node, locator)?;

    if locator.type_ != SourceType::Path
      && let Some(locked) = locked
    {
      return self.pin_locked(node, locator, locked, base_dir);
    }

    let (fetched, staged) = self.fetch(node, locator, None, base_dir)?;
    let (hash, path) = self.store.add(staged)?;
    info!(input = node, rev = %fetched.rev, hash = %hash, "locking input");

    Ok(ResolvedInput {
      original: locator.clone(),
      locked: LockedSource::new(locator, fetched.rev, &hash, fetched.last_modified),
      path,
    })
  }

  fn pin_locked(
    &self,
    node: &str,
    locator: &Locator,
    locked: LockedSource,
    base_dir: &Path,
  ) -> Result<ResolvedInput, ResolveError> {
    let expected = locked.content_hash().ok_or_else(|| ResolveError::InvalidLockHash {
      name: node.to_string(),
      hash: locked.nar_hash.clone(),
    })?;

    if let Some(path) = self.store.get(&expected) {
      debug!(input = node, hash = %expected, "using store entry");
      self.reused.fetch_add(1, Ordering::Relaxed);
      return Ok(ResolvedInput {
        original: locator.clone(),
        locked,
        path,
      });
    }

    let (_, staged) = self.fetch(node, locator, Some(&locked.rev), base_dir)?;
    let actual = self.store.hash_staged(&staged)?;
    if actual != expected {
      return Err(ResolveError::Integrity {
        name: node.to_string(),
        expected: locked.nar_hash.clone(),
        actual: actual.to_nar(),
      });
    }
    let path = self.store.commit(staged, &actual)?;
    debug!(input = node, rev = %locked.rev, "fetched locked revision");

    Ok(ResolvedInput {
      original: locator.clone(),
      locked,
      path,
    })
  }

  /// The lock entry to honor for `node`, if any.
  fn locked_for(&self, node: &str, locator: &Locator) -> Result<Option<LockedSource>, ResolveError> {
    if self.options.refresh.covers(node) {
      return Ok(None);
    }
    let Some(entry) = self.lock.and_then(|lock| lock.node(node)) else {
      return Ok(None);
    };

    match (&entry.original, &entry.locked) {
      (Some(original), Some(locked)) if original == locator => Ok(Some(locked.clone())),
      (Some(original), _) if !node.contains('/') => Err(ResolveError::LockMismatch {
        name: node.to_string(),
        locked: original.to_string(),
        declared: locator.to_string(),
      }),
      _ => {
        debug!(input = node, "upstream declaration changed, re-resolving");
        Ok(None)
      }
    }
  }

  fn fetch(
    &self,
    node: &str,
    locator: &Locator,
    rev: Option<&str>,
    base_dir: &Path,
  ) -> Result<(Fetched, TempDir), ResolveError> {
    let request = FetchRequest { locator, rev, base_dir };
    let result = self.options.retry.run(node, |attempt| {
      trace!(input = node, attempt, "fetching");
      let staged = self.store.staging_dir().map_err(|source| FetchError::Io {
        path: self.store.root().to_path_buf(),
        source,
      })?;
      let fetched = self.fetcher.fetch(&request, staged.path())?;
      Ok((fetched, staged))
    });

    let fetched = result.map_err(|source| ResolveError::Fetch {
      name: node.to_string(),
      source,
    })?;
    self.fetched.fetch_add(1, Ordering::Relaxed);
    Ok(fetched)
  }
}

/// Directory a declaration file's relative `path:` inputs are resolved against.
pub fn base_dir_of(manifest_path: &Path) -> PathBuf {
  manifest_path
    .parent()
    .filter(|p| !p.as_os_str().is_empty())
    .map(Path::to_path_buf)
    .unwrap_or_else(|| PathBuf::from("."))
}
