//! Input types for declaration and resolution.
//!
//! - [`InputDecl`] - a declared input (locator plus follow overrides)
//! - [`LockedSource`] - the immutable pin recorded for a resolved input
//! - [`ResolvedInput`] - a pinned input materialized in the content store
//! - [`ResolvedGraph`] - all resolved nodes, indexed by node path, plus the
//!   table binding each node's sub-input names to nodes

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::source::{Locator, SourceType};
use crate::consts::ROOT_NODE;
use crate::util::hash::ContentHash;

/// Maximum number of segments in a follows path (`a/x/y/...`).
pub const MAX_FOLLOWS_DEPTH: usize = 10;

/// A declared input (before resolution).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputDecl {
  pub locator: Locator,

  /// Sub-inputs of this input that reuse another input's resolved instance
  /// instead of being resolved on their own (sub-input name -> follows path).
  pub follows: BTreeMap<String, String>,
}

impl InputDecl {
  pub fn new(locator: Locator) -> Self {
    Self {
      locator,
      follows: BTreeMap::new(),
    }
  }

  pub fn with_follows<I, K, V>(locator: Locator, follows: I) -> Self
  where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
  {
    Self {
      locator,
      follows: follows.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
    }
  }
}

/// Map of input names to their declarations.
pub type InputDecls = BTreeMap<String, InputDecl>;

/// Immutable pin of a resolved input, as recorded in the lock file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockedSource {
  #[serde(rename = "type")]
  pub type_: SourceType,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub owner: Option<String>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub repo: Option<String>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub url: Option<String>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub path: Option<String>,

  /// Git commit id, archive digest, or `local` for path inputs.
  pub rev: String,

  /// Content hash of the fetched tree, `sha256-<hex>`.
  pub nar_hash: String,

  /// Commit time of `rev` in seconds since the epoch, when known.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub last_modified: Option<u64>,
}

impl LockedSource {
  pub fn new(locator: &Locator, rev: String, hash: &ContentHash, last_modified: Option<u64>) -> Self {
    Self {
      type_: locator.type_,
      owner: locator.owner.clone(),
      repo: locator.repo.clone(),
      url: locator.url.clone(),
      path: locator.path.clone(),
      rev,
      nar_hash: hash.to_nar(),
      last_modified,
    }
  }

  /// Content hash parsed from `nar_hash`, `None` when malformed.
  pub fn content_hash(&self) -> Option<ContentHash> {
    ContentHash::from_nar(&self.nar_hash)
  }
}

/// A resolved input ready for use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedInput {
  /// Locator as declared.
  pub original: Locator,

  /// Pinned revision and content hash.
  pub locked: LockedSource,

  /// Store directory holding the input's contents.
  pub path: PathBuf,
}

/// Node path of sub-input `name` declared inside `scope`.
///
/// Top-level inputs live directly under the root (`a`); transitive inputs
/// are nested below the input that declares them (`a/x`).
pub fn node_path(scope: &str, name: &str) -> String {
  if scope == ROOT_NODE {
    name.to_string()
  } else {
    format!("{scope}/{name}")
  }
}

/// Every resolved input instance, indexed by node path, plus the binding of
/// each node's sub-input names to nodes.
///
/// A followed sub-input is bound to the node it follows, so two consumers of
/// the same target share one entry in `nodes`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedGraph {
  pub nodes: BTreeMap<String, ResolvedInput>,
  pub edges: BTreeMap<String, BTreeMap<String, String>>,
}

impl ResolvedGraph {
  pub fn node(&self, path: &str) -> Option<&ResolvedInput> {
    self.nodes.get(path)
  }

  /// Sub-input bindings of `node` (`root` for top-level inputs).
  pub fn bindings(&self, node: &str) -> Option<&BTreeMap<String, String>> {
    self.edges.get(node)
  }

  /// Names of the top-level inputs.
  pub fn root_inputs(&self) -> impl Iterator<Item = &str> {
    self.edges.get(ROOT_NODE).into_iter().flat_map(|b| b.keys().map(String::as_str))
  }

  /// The resolved instance a top-level input name is bound to.
  pub fn input(&self, name: &str) -> Option<&ResolvedInput> {
    self.lookup(ROOT_NODE, name).and_then(|node| self.nodes.get(&node))
  }

  /// Node a follows path resolves to, relative to `scope`.
  ///
  /// `a/x` names sub-input `x` of whatever `a` is bound to in `scope`; each
  /// further segment descends one more level.
  pub fn lookup(&self, scope: &str, path: &str) -> Option<String> {
    let mut current = scope;
    let mut found: Option<&String> = None;
    for segment in path.split('/') {
      let next = self.edges.get(current)?.get(segment)?;
      found = Some(next);
      current = next;
    }
    found.cloned()
  }

  /// Record that `name` inside `scope` resolves to `target`.
  pub fn bind(&mut self, scope: &str, name: &str, target: &str) {
    self
      .edges
      .entry(scope.to_string())
      .or_default()
      .insert(name.to_string(), target.to_string());
  }

  /// Fold in the nodes and bindings produced by an independent sub-resolution.
  pub fn merge(&mut self, other: ResolvedGraph) {
    self.nodes.extend(other.nodes);
    for (node, bindings) in other.edges {
      self.edges.entry(node).or_default().extend(bindings);
    }
  }
}
