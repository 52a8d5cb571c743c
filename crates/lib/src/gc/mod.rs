//! Garbage collection of the content store.
//!
//! Every lock file tether writes is registered as a root in
//! `<data>/roots.json`. An entry is live while some registered lock file pins
//! its content hash; everything else, leftover staging directories included,
//! is deleted. Roots whose lock file has disappeared are pruned.

use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::inputs::lock::{LockError, LockFile};
use crate::inputs::store::{ContentStore, StoreError};
use crate::store_lock::{LockMode, StoreLock, StoreLockError};
use crate::util::hash::ContentHash;

#[derive(Debug, Error)]
pub enum GcError {
  #[error("failed to read GC roots {path}: {source}")]
  ReadRoots {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("GC roots {path} are corrupt: {source}")]
  ParseRoots {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  #[error("failed to write GC roots {path}: {source}")]
  WriteRoots {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("refusing to collect: registered lock file is unreadable: {0}")]
  InvalidRoot(#[source] LockError),

  #[error(transparent)]
  Store(#[from] StoreError),

  #[error(transparent)]
  Lock(#[from] StoreLockError),
}

/// The set of registered lock files.
#[derive(Debug, Clone)]
pub struct GcRoots {
  path: PathBuf,
  roots: BTreeSet<PathBuf>,
}

impl GcRoots {
  /// Load the roots file, treating a missing file as empty.
  pub fn load(path: &Path) -> Result<Self, GcError> {
    let roots = match fs::read_to_string(path) {
      Ok(content) => serde_json::from_str(&content).map_err(|source| GcError::ParseRoots {
        path: path.to_path_buf(),
        source,
      })?,
      Err(e) if e.kind() == io::ErrorKind::NotFound => BTreeSet::new(),
      Err(source) => {
        return Err(GcError::ReadRoots {
          path: path.to_path_buf(),
          source,
        });
      }
    };
    Ok(Self {
      path: path.to_path_buf(),
      roots,
    })
  }

  pub fn iter(&self) -> impl Iterator<Item = &Path> {
    self.roots.iter().map(PathBuf::as_path)
  }

  pub fn len(&self) -> usize {
    self.roots.len()
  }

  pub fn is_empty(&self) -> bool {
    self.roots.is_empty()
  }

  /// Returns whether `lock_path` was newly added.
  pub fn insert(&mut self, lock_path: &Path) -> bool {
    let canonical = dunce::canonicalize(lock_path).unwrap_or_else(|_| lock_path.to_path_buf());
    self.roots.insert(canonical)
  }

  pub fn remove(&mut self, lock_path: &Path) -> bool {
    self.roots.remove(lock_path)
  }

  /// Write the roots file atomically.
  pub fn save(&self) -> Result<(), GcError> {
    let write_err = |source| GcError::WriteRoots {
      path: self.path.clone(),
      source,
    };
    let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir).map_err(write_err)?;

    let mut content = serde_json::to_string_pretty(&self.roots).map_err(|e| write_err(io::Error::other(e)))?;
    content.push('\n');

    let mut tmp = NamedTempFile::new_in(dir).map_err(write_err)?;
    tmp.write_all(content.as_bytes()).map_err(write_err)?;
    tmp.persist(&self.path).map_err(|e| write_err(e.error))?;
    Ok(())
  }
}

/// Register `lock_path` in the roots file at `roots_file`.
pub fn register_root(roots_file: &Path, lock_path: &Path) -> Result<(), GcError> {
  let mut roots = GcRoots::load(roots_file)?;
  if roots.insert(lock_path) {
    debug!(lock = %lock_path.display(), "registered GC root");
    roots.save()?;
  }
  Ok(())
}

#[derive(Debug, Default, Serialize)]
pub struct GcStats {
  pub roots: usize,
  pub roots_pruned: usize,
  pub entries_scanned: usize,
  pub entries_live: usize,
  pub entries_deleted: usize,
  pub staging_deleted: usize,
  pub bytes_freed: u64,
}

#[derive(Debug, Serialize)]
pub struct GcResult {
  pub stats: GcStats,
  pub deleted_paths: Vec<PathBuf>,
  pub dry_run: bool,
}

fn dir_size(path: &Path) -> u64 {
  WalkDir::new(path)
    .into_iter()
    .filter_map(|e| e.ok())
    .filter(|e| e.file_type().is_file())
    .filter_map(|e| e.metadata().ok())
    .map(|m| m.len())
    .sum()
}

/// Content hashes pinned by the registered lock files.
///
/// Roots whose lock file no longer exists are removed from `roots`.
fn collect_live_hashes(roots: &mut GcRoots, stats: &mut GcStats) -> Result<HashSet<ContentHash>, GcError> {
  let mut live = HashSet::new();
  let mut missing = Vec::new();

  for root in roots.iter() {
    match LockFile::load(root).map_err(GcError::InvalidRoot)? {
      Some(lock) => {
        for (node, entry) in &lock.nodes {
          if let Some(hash) = entry.locked.as_ref().and_then(|l| l.content_hash()) {
            live.insert(hash);
          } else if entry.locked.is_some() {
            warn!(lock = %root.display(), node = %node, "lock entry has an invalid content hash");
          }
        }
      }
      None => {
        warn!(lock = %root.display(), "lock file no longer exists, pruning GC root");
        missing.push(root.to_path_buf());
      }
    }
  }

  for root in &missing {
    roots.remove(root);
  }
  stats.roots_pruned = missing.len();
  stats.roots = roots.len();
  debug!(count = live.len(), "collected live hashes from lock files");
  Ok(live)
}

/// Delete every store entry no registered lock file references.
pub fn collect_garbage(store: &ContentStore, roots_file: &Path, dry_run: bool) -> Result<GcResult, GcError> {
  let _lock = StoreLock::acquire(store.root(), LockMode::Exclusive, "tether gc")?;

  let mut roots = GcRoots::load(roots_file)?;
  let mut stats = GcStats::default();
  let live = collect_live_hashes(&mut roots, &mut stats)?;
  let mut deleted_paths = Vec::new();

  for (hash, path) in store.entries()? {
    stats.entries_scanned += 1;
    if live.contains(&hash) {
      stats.entries_live += 1;
      continue;
    }
    stats.bytes_freed += dir_size(&path);
    if dry_run {
      debug!(path = %path.display(), "would delete store entry");
    } else {
      store.remove(&path)?;
      debug!(path = %path.display(), "deleted store entry");
    }
    stats.entries_deleted += 1;
    deleted_paths.push(path);
  }

  for path in store.stale_staging_dirs()? {
    stats.bytes_freed += dir_size(&path);
    if !dry_run {
      store.remove(&path)?;
    }
    stats.staging_deleted += 1;
    deleted_paths.push(path);
  }

  if !dry_run && stats.roots_pruned > 0 {
    roots.save()?;
  }

  info!(
    entries_deleted = stats.entries_deleted,
    staging_deleted = stats.staging_deleted,
    bytes_freed = stats.bytes_freed,
    dry_run,
    "garbage collection complete"
  );

  Ok(GcResult {
    stats,
    deleted_paths,
    dry_run,
  })
}
