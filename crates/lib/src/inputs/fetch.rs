//! Fetching input sources into a staging directory.
//!
//! - `github:` / `git:` inputs are cloned bare into a scratch directory and
//!   the tree of the requested revision is exported (no `.git` directory).
//! - `path:` inputs are copied (with `~` expansion, relative to the
//!   declaring file), skipping `.git`.
//! - `tarball:` inputs are downloaded and unpacked (see [`super::tarball`]).
//!
//! The [`Fetcher`] trait is the seam resolution goes through, so the whole
//! resolution pipeline can run against an in-memory fetcher in tests.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use gix::object::tree::EntryKind;
use thiserror::Error;
use tracing::{debug, info, trace};
use walkdir::WalkDir;

use super::source::{Locator, SourceType};
use super::tarball;
use crate::consts::LOCAL_REV;
use crate::platform::paths::home_dir;

/// Entries never copied out of a `path:` input.
const PATH_EXCLUDES: &[&str] = &[".git"];

/// Timeout applied to each tarball download.
const HTTP_TIMEOUT: Duration = Duration::from_secs(300);

/// Errors that can occur during fetch operations.
#[derive(Debug, Error)]
pub enum FetchError {
  #[error("I/O error at '{path}': {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to clone repository '{url}': {source}")]
  Clone {
    url: String,
    #[source]
    source: Box<dyn std::error::Error + Send + Sync>,
  },

  #[error("revision '{rev}' not found in '{url}'")]
  RevisionNotFound { url: String, rev: String },

  #[error("failed to export tree of '{url}': {message}")]
  Export { url: String, message: String },

  #[error("path does not exist: {0}")]
  PathNotFound(PathBuf),

  #[error("path input is not a directory: {0}")]
  NotADirectory(PathBuf),

  #[error("failed to resolve path '{path}': {source}")]
  CanonicalizePath {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("request to '{url}' failed: {message}")]
  Http {
    url: String,
    message: String,
    retryable: bool,
  },

  #[error("'{url}' answered with HTTP {status}")]
  Status { url: String, status: u16 },

  #[error("failed to unpack archive from '{url}': {source}")]
  Unpack {
    url: String,
    #[source]
    source: io::Error,
  },

  #[error("failed to set up HTTP client: {0}")]
  Client(String),
}

impl FetchError {
  /// Whether another attempt may succeed.
  ///
  /// Network-level failures are transient; anything about the content or the
  /// local filesystem is not.
  pub fn is_retryable(&self) -> bool {
    match self {
      FetchError::Clone { .. } => true,
      FetchError::Http { retryable, .. } => *retryable,
      FetchError::Status { status, .. } => *status == 429 || *status >= 500,
      _ => false,
    }
  }
}

/// What to fetch.
#[derive(Debug, Clone, Copy)]
pub struct FetchRequest<'a> {
  pub locator: &'a Locator,
  /// Exact revision to fetch; falls back to the locator's ref, then the
  /// upstream default.
  pub rev: Option<&'a str>,
  /// Directory relative `path:` locators are resolved against.
  pub base_dir: &'a Path,
}

/// Result of a successful fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fetched {
  /// Immutable revision that was written.
  pub rev: String,
  /// Commit time in seconds since the epoch, when the source has one.
  pub last_modified: Option<u64>,
}

/// Writes the tree of an input into a directory.
///
/// Implementations must be idempotent: fetching the same request twice into
/// two empty directories yields identical trees.
pub trait Fetcher: Send + Sync {
  /// Fetch `request` into `dest`, which exists and is empty.
  fn fetch(&self, request: &FetchRequest<'_>, dest: &Path) -> Result<Fetched, FetchError>;
}

/// Fetcher for every supported locator type.
pub struct SourceFetcher {
  http: reqwest::blocking::Client,
}

impl SourceFetcher {
  pub fn new() -> Result<Self, FetchError> {
    let http = reqwest::blocking::Client::builder()
      .timeout(HTTP_TIMEOUT)
      .user_agent(concat!("tether/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| FetchError::Client(e.to_string()))?;
    Ok(Self { http })
  }
}

impl Fetcher for SourceFetcher {
  fn fetch(&self, request: &FetchRequest<'_>, dest: &Path) -> Result<Fetched, FetchError> {
    let locator = request.locator;
    let rev = request.rev.or(locator.ref_.as_deref());
    match locator.type_ {
      SourceType::Github | SourceType::Git => {
        let url = locator.fetch_url().unwrap_or_default();
        fetch_git(&url, rev, dest)
      }
      SourceType::Path => {
        let src = resolve_path(locator.path.as_deref().unwrap_or_default(), request.base_dir)?;
        copy_tree(&src, dest)?;
        Ok(Fetched {
          rev: LOCAL_REV.to_string(),
          last_modified: None,
        })
      }
      SourceType::Tarball => {
        let url = locator.fetch_url().unwrap_or_default();
        tarball::fetch_tarball(&self.http, &url, dest)
      }
    }
  }
}

/// Fetch a git repository at `rev` and export its tree into `dest`.
///
/// # Arguments
///
/// * `url` - Clone URL (e.g. `https://github.com/org/repo.git`)
/// * `rev` - Commit id, tag or branch; `None` means the remote's HEAD
/// * `dest` - Existing empty directory receiving the tree
pub fn fetch_git(url: &str, rev: Option<&str>, dest: &Path) -> Result<Fetched, FetchError> {
  let scratch = tempfile::Builder::new()
    .prefix("tether-git-")
    .tempdir()
    .map_err(|source| FetchError::Io {
      path: std::env::temp_dir(),
      source,
    })?;

  info!(url, rev = rev.unwrap_or("HEAD"), "cloning repository");
  let repo = clone_bare(url, scratch.path())?;

  let commit = resolve_revision(&repo, url, rev)?;
  let commit_id = commit.id.to_string();
  let last_modified = commit.time().ok().map(|t| t.seconds.max(0) as u64);
  debug!(url, rev = %commit_id, "resolved revision");

  let tree = commit.tree().map_err(|e| FetchError::Export {
    url: url.to_string(),
    message: e.to_string(),
  })?;
  export_tree(&repo, url, &tree, dest)?;

  Ok(Fetched {
    rev: commit_id,
    last_modified,
  })
}

/// Clone a git repository without a worktree.
fn clone_bare(url: &str, dest: &Path) -> Result<gix::Repository, FetchError> {
  let mut prepared = gix::prepare_clone_bare(url, dest).map_err(|e| FetchError::Clone {
    url: url.to_string(),
    source: Box::new(e),
  })?;

  let (repo, _outcome) = prepared
    .fetch_only(gix::progress::Discard, &gix::interrupt::IS_INTERRUPTED)
    .map_err(|e| FetchError::Clone {
      url: url.to_string(),
      source: Box::new(e),
    })?;

  Ok(repo)
}

/// Resolve a revision spec to a commit.
///
/// A bare clone may keep branches under `refs/heads/` or
/// `refs/remotes/origin/`, so both spellings are tried.
fn resolve_revision<'repo>(
  repo: &'repo gix::Repository,
  url: &str,
  rev: Option<&str>,
) -> Result<gix::Commit<'repo>, FetchError> {
  let not_found = |rev: &str| FetchError::RevisionNotFound {
    url: url.to_string(),
    rev: rev.to_string(),
  };

  let Some(rev) = rev else {
    return repo.head_commit().map_err(|_| not_found("HEAD"));
  };

  let candidates = [
    rev.to_string(),
    format!("refs/heads/{rev}"),
    format!("refs/remotes/origin/{rev}"),
    format!("refs/tags/{rev}"),
  ];
  for candidate in &candidates {
    let Ok(id) = repo.rev_parse_single(candidate.as_str()) else {
      continue;
    };
    let Ok(object) = id.object() else {
      continue;
    };
    match object.peel_to_commit() {
      Ok(commit) => return Ok(commit),
      Err(e) => trace!(candidate = %candidate, error = %e, "revision does not name a commit"),
    }
  }
  Err(not_found(rev))
}

/// Write every entry of `tree` below `dest`.
fn export_tree(repo: &gix::Repository, url: &str, tree: &gix::Tree<'_>, dest: &Path) -> Result<(), FetchError> {
  let export_err = |message: String| FetchError::Export {
    url: url.to_string(),
    message,
  };
  let io_err = |path: &Path, source| FetchError::Io {
    path: path.to_path_buf(),
    source,
  };

  let mut recorder = gix::traverse::tree::Recorder::default();
  tree
    .traverse()
    .breadthfirst(&mut recorder)
    .map_err(|e| export_err(e.to_string()))?;

  for entry in recorder.records {
    let rel = gix::path::from_bstr(AsRef::<gix::bstr::BStr>::as_ref(&entry.filepath)).into_owned();
    let target = dest.join(&rel);

    match entry.mode.kind() {
      EntryKind::Tree => fs::create_dir_all(&target).map_err(|e| io_err(&target, e))?,
      EntryKind::Blob | EntryKind::BlobExecutable => {
        if let Some(parent) = target.parent() {
          fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }
        let object = repo.find_object(entry.oid).map_err(|e| export_err(e.to_string()))?;
        fs::write(&target, &object.data).map_err(|e| io_err(&target, e))?;
        set_executable(&target, entry.mode.kind() == EntryKind::BlobExecutable).map_err(|e| io_err(&target, e))?;
      }
      EntryKind::Link => {
        if let Some(parent) = target.parent() {
          fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }
        let object = repo.find_object(entry.oid).map_err(|e| export_err(e.to_string()))?;
        let link_target = PathBuf::from(String::from_utf8_lossy(&object.data).into_owned());
        create_symlink(&link_target, &target).map_err(|e| io_err(&target, e))?;
      }
      EntryKind::Commit => {
        debug!(url, path = %rel.display(), "skipping submodule");
      }
    }
  }
  Ok(())
}

#[cfg(unix)]
fn set_executable(path: &Path, executable: bool) -> io::Result<()> {
  use std::os::unix::fs::PermissionsExt;
  let mode = if executable { 0o755 } else { 0o644 };
  fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_executable(_path: &Path, _executable: bool) -> io::Result<()> {
  Ok(())
}

#[cfg(unix)]
fn create_symlink(target: &Path, link: &Path) -> io::Result<()> {
  std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn create_symlink(target: &Path, link: &Path) -> io::Result<()> {
  std::os::windows::fs::symlink_file(target, link)
}

/// Resolve a path input.
///
/// Handles `~` expansion and paths relative to `base_dir`, and checks that
/// the result exists.
pub fn resolve_path(path_str: &str, base_dir: &Path) -> Result<PathBuf, FetchError> {
  let expanded = if let Some(rest) = path_str.strip_prefix("~/") {
    home_dir().join(rest)
  } else if path_str == "~" {
    home_dir()
  } else if Path::new(path_str).is_absolute() {
    PathBuf::from(path_str)
  } else {
    base_dir.join(path_str)
  };

  let canonical = dunce::canonicalize(&expanded).map_err(|e| {
    if e.kind() == io::ErrorKind::NotFound {
      FetchError::PathNotFound(expanded.clone())
    } else {
      FetchError::CanonicalizePath {
        path: expanded,
        source: e,
      }
    }
  })?;

  if !canonical.is_dir() {
    return Err(FetchError::NotADirectory(canonical));
  }

  debug!(path = %canonical.display(), "resolved path input");
  Ok(canonical)
}

/// Copy a directory tree, preserving symlinks and permissions and skipping
/// [`PATH_EXCLUDES`].
pub fn copy_tree(src: &Path, dst: &Path) -> Result<(), FetchError> {
  let io_err = |path: &Path, source| FetchError::Io {
    path: path.to_path_buf(),
    source,
  };

  let walker = WalkDir::new(src).follow_links(false).into_iter().filter_entry(|e| {
    e.depth() == 0
      || e
        .file_name()
        .to_str()
        .map(|name| !PATH_EXCLUDES.contains(&name))
        .unwrap_or(true)
  });

  for entry in walker {
    let entry = entry.map_err(|e| FetchError::Io {
      path: src.to_path_buf(),
      source: e.into(),
    })?;
    let rel = entry.path().strip_prefix(src).unwrap_or(entry.path());
    if rel.as_os_str().is_empty() {
      continue;
    }
    let target = dst.join(rel);
    let file_type = entry.file_type();

    if file_type.is_dir() {
      fs::create_dir_all(&target).map_err(|e| io_err(&target, e))?;
    } else if file_type.is_symlink() {
      let link = fs::read_link(entry.path()).map_err(|e| io_err(entry.path(), e))?;
      create_symlink(&link, &target).map_err(|e| io_err(&target, e))?;
    } else if file_type.is_file() {
      fs::copy(entry.path(), &target).map_err(|e| io_err(entry.path(), e))?;
    }
  }
  Ok(())
}
