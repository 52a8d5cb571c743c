//! A project: a declaration file, its lock file, and the operations that
//! tie resolution, the store and composition together.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{info, warn};

use crate::compose::{ComposeError, compose_all};
use crate::consts::LOCK_FILENAME;
use crate::gc::register_root;
use crate::inputs::fetch::Fetcher;
use crate::inputs::lock::{LockError, LockFile};
use crate::inputs::resolve::{ResolutionResult, ResolveError, ResolveOptions, Resolver, base_dir_of};
use crate::inputs::store::ContentStore;
use crate::inputs::ResolvedGraph;
use crate::manifest::{DeclError, Manifest, find_manifest_path};
use crate::outputs::OutputRegistry;
use crate::platform::Platform;
use crate::store_lock::{LockMode, StoreLock, StoreLockError};

#[derive(Debug, Error)]
pub enum ProjectError {
  #[error(transparent)]
  Decl(#[from] DeclError),

  #[error(transparent)]
  Lock(#[from] LockError),

  #[error(transparent)]
  Resolve(#[from] ResolveError),

  #[error(transparent)]
  StoreLock(#[from] StoreLockError),

  #[error(transparent)]
  Compose(#[from] ComposeError),
}

#[derive(Debug, Clone)]
pub struct Project {
  pub manifest_path: PathBuf,
  /// Directory holding the declaration file.
  pub dir: PathBuf,
  pub manifest: Manifest,
}

impl Project {
  /// Load the declaration file at `explicit`, or the nearest `tether.toml`.
  pub fn load(explicit: Option<&Path>) -> Result<Self, ProjectError> {
    let manifest_path = find_manifest_path(explicit)?;
    Self::from_path(&manifest_path)
  }

  pub fn from_path(manifest_path: &Path) -> Result<Self, ProjectError> {
    let manifest = Manifest::load(manifest_path)?;
    info!(path = %manifest_path.display(), inputs = manifest.inputs.len(), "loaded declarations");
    Ok(Self {
      manifest_path: manifest_path.to_path_buf(),
      dir: base_dir_of(manifest_path),
      manifest,
    })
  }

  pub fn lock_path(&self) -> PathBuf {
    self.dir.join(LOCK_FILENAME)
  }

  pub fn load_lock(&self) -> Result<Option<LockFile>, LockError> {
    LockFile::load(&self.lock_path())
  }

  /// Resolve every input against the current lock file. Nothing is written.
  pub fn resolve(
    &self,
    fetcher: &dyn Fetcher,
    store: &ContentStore,
    options: &ResolveOptions,
  ) -> Result<ResolutionResult, ProjectError> {
    let lock = self.load_lock()?;
    let _store_lock = hold_store(store, "tether lock")?;
    let result = Resolver::new(fetcher, store, lock.as_ref(), options).resolve(&self.manifest.inputs, &self.dir)?;
    Ok(result)
  }

  /// Persist `result` if it changed the lock file and register the lock file
  /// as a GC root. Returns whether the lock file was written.
  pub fn write_lock(&self, result: &ResolutionResult, roots_file: &Path) -> Result<bool, ProjectError> {
    let lock_path = self.lock_path();
    let written = result.lock_changed || !lock_path.exists();
    if written {
      result.lock_file.save(&lock_path)?;
      info!(path = %lock_path.display(), "wrote lock file");
    }
    if let Err(e) = register_root(roots_file, &lock_path) {
      warn!(error = %e, "failed to register lock file as GC root");
    }
    Ok(written)
  }

  /// Compose the outputs of every configured system.
  pub fn outputs(&self, graph: &ResolvedGraph, host: Platform) -> Result<OutputRegistry, ComposeError> {
    compose_all(graph, &self.manifest.outputs, &self.dir, host)
  }
}

/// Take the store lock shared for as long as the guard lives.
///
/// Commands that read store paths after resolving hold this until they are
/// done, so garbage collection cannot remove entries under them.
pub fn hold_store(store: &ContentStore, command: &str) -> Result<StoreLock, ProjectError> {
  Ok(StoreLock::acquire(store.root(), LockMode::Shared, command)?)
}
