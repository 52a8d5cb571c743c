//! Test utilities for tether-lib.
//!
//! - [`MemoryFetcher`]: an in-memory [`Fetcher`] with publishable revisions,
//!   call counting and injectable transient failures
//! - shell helpers for tests that need to run commands

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::consts::LOCAL_REV;
use crate::inputs::fetch::{FetchError, FetchRequest, Fetched, Fetcher, copy_tree, resolve_path};
use crate::inputs::source::{Locator, SourceType};

#[derive(Default)]
struct Repo {
  revisions: BTreeMap<String, Vec<(String, String)>>,
  refs: BTreeMap<String, String>,
  head: String,
}

/// In-memory upstream for resolution tests.
///
/// Remote locators are looked up by everything but their ref; `path:`
/// locators are copied from disk like the real fetcher does.
#[derive(Default)]
pub struct MemoryFetcher {
  repos: Mutex<BTreeMap<String, Repo>>,
  calls: AtomicUsize,
  failures: AtomicUsize,
}

fn repo_key(locator: &Locator) -> String {
  let mut key = locator.clone();
  key.ref_ = None;
  key.to_string()
}

impl MemoryFetcher {
  pub fn new() -> Self {
    Self::default()
  }

  /// Publish `rev` of `locator` with `files` and make it the head revision.
  pub fn publish(&self, locator: &str, rev: &str, files: &[(&str, &str)]) {
    let locator: Locator = locator.parse().unwrap();
    let mut repos = self.repos.lock().unwrap();
    let repo = repos.entry(repo_key(&locator)).or_default();
    repo.revisions.insert(
      rev.to_string(),
      files.iter().map(|(p, c)| (p.to_string(), c.to_string())).collect(),
    );
    repo.head = rev.to_string();
  }

  /// Builder form of [`MemoryFetcher::publish`].
  pub fn with(self, locator: &str, rev: &str, files: &[(&str, &str)]) -> Self {
    self.publish(locator, rev, files);
    self
  }

  /// Point a named ref (branch or tag) at `rev`.
  pub fn tag(&self, locator: &str, name: &str, rev: &str) {
    let locator: Locator = locator.parse().unwrap();
    let mut repos = self.repos.lock().unwrap();
    let repo = repos.entry(repo_key(&locator)).or_default();
    repo.refs.insert(name.to_string(), rev.to_string());
  }

  /// Fail the next `n` fetches with a retryable error.
  pub fn fail_next(&self, n: usize) {
    self.failures.store(n, Ordering::SeqCst);
  }

  /// Fetches attempted so far, failed ones included.
  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }
}

impl Fetcher for MemoryFetcher {
  fn fetch(&self, request: &FetchRequest<'_>, dest: &Path) -> Result<Fetched, FetchError> {
    self.calls.fetch_add(1, Ordering::SeqCst);

    let pending = self.failures.load(Ordering::SeqCst);
    if pending > 0
      && self
        .failures
        .compare_exchange(pending, pending - 1, Ordering::SeqCst, Ordering::SeqCst)
        .is_ok()
    {
      return Err(FetchError::Http {
        url: request.locator.to_string(),
        message: "simulated connection reset".to_string(),
        retryable: true,
      });
    }

    if request.locator.type_ == SourceType::Path {
      let src = resolve_path(request.locator.path.as_deref().unwrap_or_default(), request.base_dir)?;
      copy_tree(&src, dest)?;
      return Ok(Fetched {
        rev: LOCAL_REV.to_string(),
        last_modified: None,
      });
    }

    let url = request.locator.to_string();
    let repos = self.repos.lock().unwrap();
    let repo = repos.get(&repo_key(request.locator)).ok_or_else(|| FetchError::Clone {
      url: url.clone(),
      source: "repository not found".into(),
    })?;

    let wanted = request.rev.or(request.locator.ref_.as_deref());
    let rev = match wanted {
      None => repo.head.clone(),
      Some(r) if repo.revisions.contains_key(r) => r.to_string(),
      Some(r) => repo.refs.get(r).cloned().ok_or_else(|| FetchError::RevisionNotFound {
        url: url.clone(),
        rev: r.to_string(),
      })?,
    };
    let files = repo.revisions.get(&rev).ok_or_else(|| FetchError::RevisionNotFound {
      url: url.clone(),
      rev: rev.clone(),
    })?;

    for (path, content) in files {
      let target = dest.join(path);
      if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).unwrap();
      }
      fs::write(&target, content).unwrap();
    }

    let index = repo.revisions.keys().position(|r| *r == rev).unwrap_or(0) as u64;
    Ok(Fetched {
      rev,
      last_modified: Some(1_700_000_000 + index),
    })
  }
}

/// Returns the shell command and args to execute a shell script.
#[cfg(unix)]
pub fn shell_cmd(script: &str) -> (&'static str, Vec<String>) {
  ("/bin/sh", vec!["-c".to_string(), script.to_string()])
}

#[cfg(windows)]
pub fn shell_cmd(script: &str) -> (&'static str, Vec<String>) {
  ("cmd.exe", vec!["/C".to_string(), script.to_string()])
}
