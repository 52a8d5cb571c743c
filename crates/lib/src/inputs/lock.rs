//! Lock file management for input resolution.
//!
//! The lock file (`tether.lock`) pins every input, transitive ones
//! included, to an immutable revision and content hash. It lives next to
//! the declaration file.
//!
//! # Lock File Format
//!
//! ```json
//! {
//!   "version": 1,
//!   "root": "root",
//!   "nodes": {
//!     "root": { "inputs": { "a": "a", "b": "b" } },
//!     "a": {
//!       "original": { "type": "github", "owner": "o", "repo": "a" },
//!       "locked": { "type": "github", "owner": "o", "repo": "a", "rev": "…", "narHash": "sha256-…" }
//!     },
//!     "b": { "original": { … }, "locked": { … }, "inputs": { "x": "a" } }
//!   }
//! }
//! ```
//!
//! Keys are sorted, so resolving the same inputs twice produces the same bytes.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::source::Locator;
use super::types::{LockedSource, ResolvedGraph};
use crate::consts::ROOT_NODE;

/// Current lock file format version.
pub const LOCK_VERSION: u32 = 1;

/// A lock file containing pinned input revisions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockFile {
  /// Lock file format version.
  pub version: u32,
  /// Label of the node describing the declaring project.
  pub root: String,
  /// Every node, keyed by node path.
  pub nodes: BTreeMap<String, LockNode>,
}

/// A node in the lock file.
///
/// The root node only carries `inputs`; every other node carries the locator
/// it was declared with and the pin it was resolved to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockNode {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub original: Option<Locator>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub locked: Option<LockedSource>,

  /// Sub-input name -> node path it is bound to.
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub inputs: BTreeMap<String, String>,
}

/// Errors that can occur when working with lock files.
#[derive(Debug, Error)]
pub enum LockError {
  #[error("failed to read lock file {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to write lock file {path}: {source}")]
  Write {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to parse lock file {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  #[error("failed to serialize lock file: {0}")]
  Serialize(#[source] serde_json::Error),

  #[error("unsupported lock file version {0}, expected {LOCK_VERSION}")]
  UnsupportedVersion(u32),

  #[error("lock file {path} is inconsistent: {reason}")]
  Inconsistent { path: PathBuf, reason: String },
}

#[derive(Deserialize)]
struct VersionProbe {
  version: u32,
}

impl Default for LockFile {
  fn default() -> Self {
    Self::new()
  }
}

impl LockFile {
  /// Create a lock file with an empty root node.
  pub fn new() -> Self {
    let mut nodes = BTreeMap::new();
    nodes.insert(ROOT_NODE.to_string(), LockNode::root(BTreeMap::new()));
    Self {
      version: LOCK_VERSION,
      root: ROOT_NODE.to_string(),
      nodes,
    }
  }

  /// Snapshot a resolved graph.
  pub fn from_graph(graph: &ResolvedGraph) -> Self {
    let mut lock = Self::new();
    if let Some(bindings) = graph.bindings(ROOT_NODE) {
      lock.nodes.insert(ROOT_NODE.to_string(), LockNode::root(bindings.clone()));
    }
    for (path, input) in &graph.nodes {
      lock.nodes.insert(
        path.clone(),
        LockNode {
          original: Some(input.original.clone()),
          locked: Some(input.locked.clone()),
          inputs: graph.bindings(path).cloned().unwrap_or_default(),
        },
      );
    }
    lock
  }

  /// Load a lock file from the given path.
  ///
  /// Returns `Ok(None)` if the file doesn't exist.
  pub fn load(path: &Path) -> Result<Option<Self>, LockError> {
    let content = match fs::read_to_string(path) {
      Ok(content) => content,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
      Err(source) => {
        return Err(LockError::Read {
          path: path.to_path_buf(),
          source,
        });
      }
    };

    let parse_err = |source| LockError::Parse {
      path: path.to_path_buf(),
      source,
    };

    let probe: VersionProbe = serde_json::from_str(&content).map_err(parse_err)?;
    if probe.version != LOCK_VERSION {
      return Err(LockError::UnsupportedVersion(probe.version));
    }

    let lock: LockFile = serde_json::from_str(&content).map_err(parse_err)?;
    lock.check_consistency(path)?;
    Ok(Some(lock))
  }

  fn check_consistency(&self, path: &Path) -> Result<(), LockError> {
    let inconsistent = |reason: String| LockError::Inconsistent {
      path: path.to_path_buf(),
      reason,
    };

    if !self.nodes.contains_key(&self.root) {
      return Err(inconsistent(format!("root node '{}' is missing", self.root)));
    }
    for (label, node) in &self.nodes {
      for (name, target) in &node.inputs {
        if !self.nodes.contains_key(target) {
          return Err(inconsistent(format!("'{label}' input '{name}' points at missing node '{target}'")));
        }
      }
      if *label != self.root && (node.original.is_none() || node.locked.is_none()) {
        return Err(inconsistent(format!("node '{label}' is not pinned")));
      }
    }
    Ok(())
  }

  /// Render the lock file exactly as it is written to disk.
  pub fn to_json(&self) -> Result<String, LockError> {
    let mut content = serde_json::to_string_pretty(self).map_err(LockError::Serialize)?;
    content.push('\n');
    Ok(content)
  }

  /// Save the lock file to the given path.
  ///
  /// The content goes to a temporary file in the same directory which is then
  /// renamed over `path`, so readers never observe a partial lock file.
  pub fn save(&self, path: &Path) -> Result<(), LockError> {
    let content = self.to_json()?;
    let write_err = |source| LockError::Write {
      path: path.to_path_buf(),
      source,
    };

    let dir = match path.parent() {
      Some(parent) if !parent.as_os_str().is_empty() => parent,
      _ => Path::new("."),
    };
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;
    tmp.write_all(content.as_bytes()).map_err(write_err)?;
    tmp.as_file().sync_all().map_err(write_err)?;
    tmp.persist(path).map_err(|e| write_err(e.error))?;
    Ok(())
  }

  /// Get a node by path.
  pub fn node(&self, path: &str) -> Option<&LockNode> {
    self.nodes.get(path)
  }

  /// Names bound at the root.
  pub fn root_inputs(&self) -> Option<&BTreeMap<String, String>> {
    self.nodes.get(&self.root).map(|n| &n.inputs)
  }
}

impl LockNode {
  /// Create a root node.
  pub fn root(inputs: BTreeMap<String, String>) -> Self {
    Self {
      original: None,
      locked: None,
      inputs,
    }
  }

  /// Check if this is a root node.
  pub fn is_root(&self) -> bool {
    self.original.is_none() && self.locked.is_none()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::consts::LOCK_FILENAME;
  use crate::inputs::types::ResolvedInput;
  use crate::util::hash::hash_bytes;
  use tempfile::TempDir;

  fn sample_graph() -> ResolvedGraph {
    let mut graph = ResolvedGraph::default();
    for name in ["a", "b"] {
      let locator = Locator::github("o", name, Some("main"));
      let hash = hash_bytes(name.as_bytes());
      graph.nodes.insert(
        name.to_string(),
        ResolvedInput {
          locked: LockedSource::new(&locator, format!("{name}-rev"), &hash, Some(1733667300)),
          original: locator,
          path: PathBuf::from("/store").join(hash.as_str()),
        },
      );
      graph.bind(ROOT_NODE, name, name);
    }
    graph.bind("b", "x", "a");
    graph
  }

  mod lock_file {
    use super::*;

    #[test]
    fn from_graph_records_bindings() {
      let lock = LockFile::from_graph(&sample_graph());

      assert_eq!(lock.root, ROOT_NODE);
      assert_eq!(lock.root_inputs().unwrap().len(), 2);
      assert!(lock.node(ROOT_NODE).unwrap().is_root());
      assert_eq!(lock.node("b").unwrap().inputs.get("x").map(String::as_str), Some("a"));
      assert_eq!(lock.node("a").unwrap().locked.as_ref().unwrap().rev, "a-rev");
    }

    #[test]
    fn save_and_load_roundtrip() {
      let temp_dir = TempDir::new().unwrap();
      let lock_path = temp_dir.path().join(LOCK_FILENAME);

      let original = LockFile::from_graph(&sample_graph());
      original.save(&lock_path).unwrap();
      let loaded = LockFile::load(&lock_path).unwrap().unwrap();

      assert_eq!(original, loaded);
    }

    #[test]
    fn save_is_byte_stable() {
      let temp_dir = TempDir::new().unwrap();
      let lock_path = temp_dir.path().join(LOCK_FILENAME);

      LockFile::from_graph(&sample_graph()).save(&lock_path).unwrap();
      let first = fs::read(&lock_path).unwrap();
      LockFile::from_graph(&sample_graph()).save(&lock_path).unwrap();
      let second = fs::read(&lock_path).unwrap();

      assert_eq!(first, second);
      assert!(first.ends_with(b"}\n"));
    }

    #[test]
    fn save_leaves_no_temporary_files() {
      let temp_dir = TempDir::new().unwrap();
      LockFile::new().save(&temp_dir.path().join(LOCK_FILENAME)).unwrap();

      let entries: Vec<_> = fs::read_dir(temp_dir.path()).unwrap().collect();
      assert_eq!(entries.len(), 1);
    }

    #[test]
    fn load_nonexistent_returns_none() {
      let temp_dir = TempDir::new().unwrap();
      let result = LockFile::load(&temp_dir.path().join("nonexistent.lock")).unwrap();
      assert!(result.is_none());
    }

    #[test]
    fn load_invalid_json_returns_error() {
      let temp_dir = TempDir::new().unwrap();
      let lock_path = temp_dir.path().join(LOCK_FILENAME);

      fs::write(&lock_path, "not valid json").unwrap();
      assert!(matches!(LockFile::load(&lock_path), Err(LockError::Parse { .. })));
    }

    #[test]
    fn load_unsupported_version_returns_error() {
      let temp_dir = TempDir::new().unwrap();
      let lock_path = temp_dir.path().join(LOCK_FILENAME);

      fs::write(&lock_path, r#"{"version": 999, "whatever": true}"#).unwrap();
      assert!(matches!(LockFile::load(&lock_path), Err(LockError::UnsupportedVersion(999))));
    }

    #[test]
    fn load_rejects_dangling_node_reference() {
      let temp_dir = TempDir::new().unwrap();
      let lock_path = temp_dir.path().join(LOCK_FILENAME);

      fs::write(
        &lock_path,
        r#"{"version": 1, "root": "root", "nodes": {"root": {"inputs": {"a": "a"}}}}"#,
      )
      .unwrap();
      assert!(matches!(LockFile::load(&lock_path), Err(LockError::Inconsistent { .. })));
    }
  }

  mod serialization {
    use super::*;

    #[test]
    fn json_format() {
      let json = LockFile::from_graph(&sample_graph()).to_json().unwrap();

      assert!(json.contains(r#""version": 1"#));
      assert!(json.contains(r#""root": "root""#));
      assert!(json.contains(r#""type": "github""#));
      assert!(json.contains(r#""rev": "a-rev""#));
      assert!(json.contains(r#""narHash": "sha256-"#));
      assert!(json.contains(r#""lastModified": 1733667300"#));
    }

    #[test]
    fn empty_inputs_are_omitted() {
      let value = serde_json::to_value(LockFile::from_graph(&sample_graph())).unwrap();
      assert!(value["nodes"]["a"].get("inputs").is_none());
      assert_eq!(value["nodes"]["b"]["inputs"]["x"], "a");
    }
  }
}
