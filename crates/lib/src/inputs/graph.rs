//! Follow graph of one declaration scope.
//!
//! Nodes are the inputs declared in a scope (the project itself, or a
//! fetched input's own `tether.toml`). There is an edge `a -> b` when one of
//! `a`'s sub-inputs follows a path starting at `b`: `a` cannot bind that
//! sub-input until `b` is resolved.
//!
//! The graph is checked for dangling targets and cycles before anything is
//! fetched, then split into waves of inputs that can resolve in parallel.

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;
use tracing::trace;

use super::types::{InputDecls, MAX_FOLLOWS_DEPTH};

/// Errors that can occur during graph operations.
#[derive(Debug, Error)]
pub enum GraphError {
  /// A follows target does not exist.
  #[error("follows target '{target}' not found (referenced from '{from}')")]
  FollowsTargetNotFound { from: String, target: String },

  /// Circular follows detected.
  #[error("circular follows detected: {}", chain.join(" -> "))]
  CircularFollows { chain: Vec<String> },

  /// Follows path has too many segments.
  #[error("follows path '{path}' is too deep (maximum {max} segments)")]
  FollowsChainTooDeep { max: usize, path: String },

  /// Invalid follows path format.
  #[error("invalid follows path '{path}': {reason}")]
  InvalidFollowsPath { path: String, reason: String },
}

/// Follow dependencies between the inputs of one scope.
#[derive(Debug, Clone, Default)]
pub struct FollowGraph {
  /// Input -> inputs it must wait for.
  deps: BTreeMap<String, BTreeSet<String>>,
}

impl FollowGraph {
  /// Build the graph for `decls`, skipping names in `bound` (bound by the
  /// parent scope and never resolved here).
  ///
  /// `scope` is only used in error messages.
  pub fn build(scope: &str, decls: &InputDecls, bound: &BTreeSet<String>) -> Result<Self, GraphError> {
    let mut deps = BTreeMap::new();

    for (name, decl) in decls {
      if bound.contains(name) {
        continue;
      }
      let mut waits_for = BTreeSet::new();

      for (sub, target) in &decl.follows {
        let from = format!("{}.{}", qualified(scope, name), sub);
        let head = validate_path(target)?;

        if bound.contains(head) {
          // Already resolved by the parent scope.
          continue;
        }
        if !decls.contains_key(head) {
          return Err(GraphError::FollowsTargetNotFound {
            from,
            target: target.clone(),
          });
        }
        trace!(from = %from, target = %target, "follow edge");
        waits_for.insert(head.to_string());
      }

      deps.insert(name.clone(), waits_for);
    }

    Ok(Self { deps })
  }

  /// Inputs resolved in this scope.
  pub fn names(&self) -> impl Iterator<Item = &str> {
    self.deps.keys().map(String::as_str)
  }

  /// First follow cycle found by depth-first search, as a closed chain
  /// (`["a", "b", "a"]`).
  pub fn find_cycle(&self) -> Option<Vec<String>> {
    let mut visited = BTreeSet::new();
    let mut stack = Vec::new();
    let mut on_stack = BTreeSet::new();

    for name in self.deps.keys() {
      if !visited.contains(name)
        && let Some(cycle) = self.find_cycle_dfs(name, &mut visited, &mut stack, &mut on_stack)
      {
        return Some(cycle);
      }
    }
    None
  }

  fn find_cycle_dfs(
    &self,
    name: &str,
    visited: &mut BTreeSet<String>,
    stack: &mut Vec<String>,
    on_stack: &mut BTreeSet<String>,
  ) -> Option<Vec<String>> {
    visited.insert(name.to_string());
    stack.push(name.to_string());
    on_stack.insert(name.to_string());

    if let Some(deps) = self.deps.get(name) {
      for dep in deps {
        if on_stack.contains(dep) {
          let start = stack.iter().position(|n| n == dep).unwrap_or(0);
          let mut cycle = stack[start..].to_vec();
          cycle.push(dep.clone());
          return Some(cycle);
        }
        if !visited.contains(dep)
          && let Some(cycle) = self.find_cycle_dfs(dep, visited, stack, on_stack)
        {
          return Some(cycle);
        }
      }
    }

    stack.pop();
    on_stack.remove(name);
    None
  }

  /// Fail with [`GraphError::CircularFollows`] if the graph has a cycle.
  pub fn check_acyclic(&self) -> Result<(), GraphError> {
    match self.find_cycle() {
      Some(chain) => Err(GraphError::CircularFollows { chain }),
      None => Ok(()),
    }
  }

  /// Group inputs into waves: every input's follow targets are in earlier
  /// waves. Inputs within a wave are sorted by name.
  pub fn waves(&self) -> Result<Vec<Vec<String>>, GraphError> {
    let mut remaining: BTreeMap<&str, usize> = self.deps.iter().map(|(n, d)| (n.as_str(), d.len())).collect();
    let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for (name, deps) in &self.deps {
      for dep in deps {
        dependents.entry(dep.as_str()).or_default().push(name.as_str());
      }
    }

    let mut waves = Vec::new();
    let mut ready: Vec<&str> = remaining.iter().filter(|(_, n)| **n == 0).map(|(name, _)| *name).collect();

    while !ready.is_empty() {
      for name in &ready {
        remaining.remove(name);
      }
      let mut next = Vec::new();
      for name in &ready {
        for dependent in dependents.get(name).into_iter().flatten() {
          if let Some(count) = remaining.get_mut(dependent) {
            *count -= 1;
            if *count == 0 {
              next.push(*dependent);
            }
          }
        }
      }
      waves.push(ready.iter().map(|s| s.to_string()).collect());
      next.sort_unstable();
      ready = next;
    }

    if !remaining.is_empty() {
      let chain = self
        .find_cycle()
        .unwrap_or_else(|| remaining.keys().map(|s| s.to_string()).collect());
      return Err(GraphError::CircularFollows { chain });
    }
    Ok(waves)
  }
}

fn qualified(scope: &str, name: &str) -> String {
  if scope == crate::consts::ROOT_NODE {
    name.to_string()
  } else {
    format!("{scope}/{name}")
  }
}

/// Check a follows path and return its first segment.
fn validate_path(path: &str) -> Result<&str, GraphError> {
  let invalid = |reason: &str| GraphError::InvalidFollowsPath {
    path: path.to_string(),
    reason: reason.to_string(),
  };

  if path.is_empty() {
    return Err(invalid("path cannot be empty"));
  }
  let segments: Vec<&str> = path.split('/').collect();
  if segments.iter().any(|s| s.is_empty()) {
    return Err(invalid("path segments cannot be empty"));
  }
  if segments.len() > MAX_FOLLOWS_DEPTH {
    return Err(GraphError::FollowsChainTooDeep {
      max: MAX_FOLLOWS_DEPTH,
      path: path.to_string(),
    });
  }
  Ok(segments[0])
}
