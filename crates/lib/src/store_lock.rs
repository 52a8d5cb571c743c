//! Advisory lock on the content store.
//!
//! Resolution holds the lock shared so several projects can fetch into the
//! store at once. Garbage collection holds it exclusively, so no entry it
//! considers dead can be created while it runs. The lock lives at
//! `<store>/.lock`; the exclusive holder records who it is in the file.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

const LOCK_FILENAME: &str = ".lock";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
  Shared,
  Exclusive,
}

/// Written by the exclusive holder for diagnostics.
#[derive(Debug, Serialize, Deserialize)]
pub struct LockHolder {
  pub pid: u32,
  pub started_at_unix: u64,
  pub command: String,
}

#[derive(Debug, Error)]
pub enum StoreLockError {
  #[error(
    "store is locked by '{command}' (PID {pid}, started at unix time {started_at_unix})\n\
     If no tether process is running, remove the lock file:\n  {lock_path}"
  )]
  Contention {
    command: String,
    pid: u32,
    started_at_unix: u64,
    lock_path: PathBuf,
  },

  #[error("store is locked by another process\nIf no tether process is running, remove the lock file:\n  {lock_path}")]
  ContentionUnknown { lock_path: PathBuf },

  #[error("failed to open store lock {path}: {source}")]
  Open {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to record lock holder: {0}")]
  WriteHolder(#[source] io::Error),

  #[error("failed to lock store: {0}")]
  Lock(#[source] io::Error),
}

/// Held until dropped.
pub struct StoreLock {
  file: File,
  path: PathBuf,
  mode: LockMode,
}

impl StoreLock {
  /// Take the lock on the store rooted at `store` without blocking.
  pub fn acquire(store: &Path, mode: LockMode, command: &str) -> Result<Self, StoreLockError> {
    let path = store.join(LOCK_FILENAME);
    let open_err = |source| StoreLockError::Open {
      path: path.clone(),
      source,
    };

    std::fs::create_dir_all(store).map_err(open_err)?;
    let file = OpenOptions::new()
      .read(true)
      .write(true)
      .create(true)
      .truncate(false)
      .open(&path)
      .map_err(open_err)?;

    if let Err(err) = try_lock(&file, mode) {
      if err.kind() == io::ErrorKind::WouldBlock {
        return Err(contention_error(&path));
      }
      return Err(StoreLockError::Lock(err));
    }

    let lock = StoreLock { file, path, mode };
    if mode == LockMode::Exclusive {
      lock.write_holder(command)?;
    }
    debug!(path = %lock.path.display(), ?mode, "store locked");
    Ok(lock)
  }

  fn write_holder(&self, command: &str) -> Result<(), StoreLockError> {
    let holder = LockHolder {
      pid: std::process::id(),
      started_at_unix: SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs(),
      command: command.to_string(),
    };

    let mut file = &self.file;
    file.set_len(0).map_err(StoreLockError::WriteHolder)?;
    file.seek(SeekFrom::Start(0)).map_err(StoreLockError::WriteHolder)?;
    serde_json::to_writer(&mut file, &holder).map_err(|e| StoreLockError::WriteHolder(io::Error::other(e)))?;
    file.flush().map_err(StoreLockError::WriteHolder)
  }

  /// Read the holder record through the held handle.
  pub fn holder(&self) -> io::Result<LockHolder> {
    let mut file = &self.file;
    file.seek(SeekFrom::Start(0))?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;
    serde_json::from_str(&contents).map_err(io::Error::other)
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn mode(&self) -> LockMode {
    self.mode
  }
}

fn contention_error(path: &Path) -> StoreLockError {
  let holder = File::open(path).ok().and_then(|mut file| {
    let mut contents = String::new();
    file.read_to_string(&mut contents).ok()?;
    serde_json::from_str::<LockHolder>(&contents).ok()
  });

  match holder {
    Some(holder) => StoreLockError::Contention {
      command: holder.command,
      pid: holder.pid,
      started_at_unix: holder.started_at_unix,
      lock_path: path.to_path_buf(),
    },
    None => StoreLockError::ContentionUnknown {
      lock_path: path.to_path_buf(),
    },
  }
}

#[cfg(unix)]
fn try_lock(file: &File, mode: LockMode) -> io::Result<()> {
  use rustix::fs::{FlockOperation, flock};
  use std::os::unix::io::AsFd;

  let operation = match mode {
    LockMode::Shared => FlockOperation::NonBlockingLockShared,
    LockMode::Exclusive => FlockOperation::NonBlockingLockExclusive,
  };

  flock(file.as_fd(), operation).map_err(|e| io::Error::from_raw_os_error(e.raw_os_error()))
}

#[cfg(windows)]
fn try_lock(file: &File, mode: LockMode) -> io::Result<()> {
  use std::os::windows::io::AsRawHandle;
  use windows_sys::Win32::Foundation::HANDLE;
  use windows_sys::Win32::Storage::FileSystem::{LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY, LockFileEx};

  let handle = file.as_raw_handle() as HANDLE;
  let flags = match mode {
    LockMode::Shared => LOCKFILE_FAIL_IMMEDIATELY,
    LockMode::Exclusive => LOCKFILE_FAIL_IMMEDIATELY | LOCKFILE_EXCLUSIVE_LOCK,
  };

  // SAFETY: a zeroed OVERLAPPED is valid and `handle` is an open file.
  let result = unsafe {
    let mut overlapped = std::mem::zeroed();
    LockFileEx(handle, flags, 0, 1, 0, &mut overlapped)
  };

  if result == 0 {
    Err(io::Error::last_os_error())
  } else {
    Ok(())
  }
}
