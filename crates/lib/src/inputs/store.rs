//! Content-addressed store for fetched inputs and build artifacts.
//!
//! # Store Structure
//!
//! ```text
//! ~/.cache/tether/store/
//!   .lock                       # store lock (see store_lock)
//!   .tmp-Xy12ab/                # in-flight write, renamed into place when complete
//!   3f5a…c9/                    # sha256 of the directory contents
//!     tether.toml
//!     src/…
//! ```
//!
//! Entries are written into a staging directory inside the store, hashed,
//! and renamed to `<hash>/`. Renames within one filesystem are atomic, so a
//! reader either sees a complete entry or none. When two writers race on the
//! same hash the first rename wins and the loser's staging copy is dropped.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use thiserror::Error;
use tracing::{debug, trace};

use crate::platform::paths::store_dir;
use crate::util::hash::{ContentHash, DirHashError, hash_directory};

/// Name prefix of staging directories. Never a valid content hash.
pub const STAGING_PREFIX: &str = ".tmp-";

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
  #[error("failed to create directory '{path}': {source}")]
  CreateDir {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to hash '{path}': {source}")]
  Hash {
    path: PathBuf,
    #[source]
    source: DirHashError,
  },

  #[error("failed to move '{from}' into the store at '{to}': {source}")]
  Commit {
    from: PathBuf,
    to: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to read store directory '{path}': {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to remove '{path}': {source}")]
  Remove {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

/// Handle to a content-addressed store directory.
#[derive(Debug, Clone)]
pub struct ContentStore {
  root: PathBuf,
}

impl Default for ContentStore {
  fn default() -> Self {
    Self::new()
  }
}

impl ContentStore {
  /// Store under the default cache directory.
  pub fn new() -> Self {
    Self { root: store_dir() }
  }

  /// Store rooted at a custom directory.
  pub fn with_path(root: PathBuf) -> Self {
    Self { root }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  pub fn ensure_dir(&self) -> Result<(), StoreError> {
    fs::create_dir_all(&self.root).map_err(|source| StoreError::CreateDir {
      path: self.root.clone(),
      source,
    })
  }

  /// Where an entry with `hash` lives, whether or not it exists yet.
  pub fn path_for(&self, hash: &ContentHash) -> PathBuf {
    self.root.join(hash.as_str())
  }

  /// Existing entry for `hash`.
  pub fn get(&self, hash: &ContentHash) -> Option<PathBuf> {
    let path = self.path_for(hash);
    path.is_dir().then_some(path)
  }

  pub fn contains(&self, hash: &ContentHash) -> bool {
    self.get(hash).is_some()
  }

  /// Fresh empty directory inside the store to write a new entry into.
  ///
  /// Dropping the returned handle removes whatever was written.
  pub fn staging_dir(&self) -> io::Result<TempDir> {
    fs::create_dir_all(&self.root)?;
    tempfile::Builder::new().prefix(STAGING_PREFIX).tempdir_in(&self.root)
  }

  /// Content hash of a staged directory.
  pub fn hash_staged(&self, staged: &TempDir) -> Result<ContentHash, StoreError> {
    hash_directory(staged.path(), &[]).map_err(|source| StoreError::Hash {
      path: staged.path().to_path_buf(),
      source,
    })
  }

  /// Move a staged directory into place under `hash`.
  ///
  /// The caller vouches that `hash` is the staged content's hash. If an
  /// entry already exists the staged copy is discarded.
  pub fn commit(&self, staged: TempDir, hash: &ContentHash) -> Result<PathBuf, StoreError> {
    let target = self.path_for(hash);
    if target.is_dir() {
      trace!(hash = %hash, "store entry already present");
      return Ok(target);
    }

    match fs::rename(staged.path(), &target) {
      Ok(()) => {
        debug!(hash = %hash, path = %target.display(), "added store entry");
        Ok(target)
      }
      // Lost a race with another writer of the same content.
      Err(_) if target.is_dir() => {
        trace!(hash = %hash, "concurrent writer won the rename");
        Ok(target)
      }
      Err(source) => Err(StoreError::Commit {
        from: staged.path().to_path_buf(),
        to: target,
        source,
      }),
    }
  }

  /// Hash a staged directory and commit it.
  pub fn add(&self, staged: TempDir) -> Result<(ContentHash, PathBuf), StoreError> {
    let hash = self.hash_staged(&staged)?;
    let path = self.commit(staged, &hash)?;
    Ok((hash, path))
  }

  /// All complete entries currently in the store.
  pub fn entries(&self) -> Result<Vec<(ContentHash, PathBuf)>, StoreError> {
    let read_err = |source| StoreError::Read {
      path: self.root.clone(),
      source,
    };
    let dir = match fs::read_dir(&self.root) {
      Ok(dir) => dir,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
      Err(e) => return Err(read_err(e)),
    };

    let mut entries = Vec::new();
    for entry in dir {
      let entry = entry.map_err(read_err)?;
      let name = entry.file_name();
      let Some(hash) = name.to_str().and_then(ContentHash::parse) else {
        continue;
      };
      if entry.path().is_dir() {
        entries.push((hash, entry.path()));
      }
    }
    entries.sort();
    Ok(entries)
  }

  /// Leftover staging directories from interrupted writes.
  pub fn stale_staging_dirs(&self) -> Result<Vec<PathBuf>, StoreError> {
    let dir = match fs::read_dir(&self.root) {
      Ok(dir) => dir,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
      Err(source) => {
        return Err(StoreError::Read {
          path: self.root.clone(),
          source,
        });
      }
    };
    Ok(
      dir
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_string_lossy().starts_with(STAGING_PREFIX))
        .map(|e| e.path())
        .collect(),
    )
  }

  /// Delete a store entry or staging directory.
  pub fn remove(&self, path: &Path) -> Result<(), StoreError> {
    make_writable(path);
    fs::remove_dir_all(path).map_err(|source| StoreError::Remove {
      path: path.to_path_buf(),
      source,
    })
  }
}

/// Restore owner write permission so read-only build outputs can be deleted.
#[cfg(unix)]
fn make_writable(path: &Path) {
  use std::os::unix::fs::PermissionsExt;

  for entry in walkdir::WalkDir::new(path).into_iter().filter_map(Result::ok) {
    if entry.path_is_symlink() {
      continue;
    }
    if let Ok(metadata) = entry.metadata() {
      let mode = metadata.permissions().mode();
      if mode & 0o200 == 0 {
        let _ = fs::set_permissions(entry.path(), fs::Permissions::from_mode(mode | 0o200));
      }
    }
  }
}

#[cfg(not(unix))]
fn make_writable(_path: &Path) {}
