//! Composition of outputs from a resolved graph.
//!
//! [`compose`] is a pure function of the resolved inputs, a platform and the
//! `[outputs]` declarations: it touches neither the network nor the store.
//! Packages may depend on each other through `inputs-from` and
//! `${packages.<name>.src}`; those dependencies form a DAG that is evaluated
//! in topological order.

pub mod interpolate;

use std::collections::{BTreeMap, HashSet};
use std::path::{Component, Path, PathBuf};

use petgraph::Direction;
use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use rayon::prelude::*;
use thiserror::Error;
use tracing::{debug, trace};

use self::interpolate::{InputAttr, InterpolateError, Reference, Segment};
use crate::consts::ROOT_NODE;
use crate::inputs::ResolvedGraph;
use crate::manifest::{EnvDecl, OutputDecls};
use crate::outputs::{BuildInput, Check, DevShell, Environment, OutputRegistry, OutputSet, Package};
use crate::platform::Platform;

#[derive(Debug, Error)]
pub enum ComposeError {
  #[error("{output}: invalid {field}: {source}")]
  Interpolate {
    output: String,
    field: &'static str,
    #[source]
    source: InterpolateError,
  },

  #[error("{output}: unknown input '{name}'")]
  UnknownInput { output: String, name: String },

  #[error("{output}: unknown package '{name}'")]
  UnknownPackage { output: String, name: String },

  #[error("{output}: package '{name}' is not available on {system}")]
  PackageUnavailable {
    output: String,
    name: String,
    system: Platform,
  },

  #[error("package dependency cycle on {system}: {}", chain.join(" -> "))]
  Cycle { system: Platform, chain: Vec<String> },
}

/// Compose every output declared for `system`.
///
/// Relative package sources are resolved against `project_dir`.
pub fn compose(
  graph: &ResolvedGraph,
  system: Platform,
  decls: &OutputDecls,
  project_dir: &Path,
) -> Result<OutputSet, ComposeError> {
  let composer = Composer {
    graph,
    system,
    decls,
    project_dir,
  };
  let order = composer.package_order()?;
  trace!(%system, order = ?order, "package order");

  let mut set = OutputSet::new(system);
  for name in order {
    let package = composer.package(name, &set)?;
    set.packages.insert(name.to_string(), package);
  }

  for (name, decl) in &decls.dev_shells {
    if !decl.env_decl().enabled_on(system) {
      continue;
    }
    let output = format!("devShells.{name}");
    let shell_hook = decl
      .shell_hook
      .as_deref()
      .map(|hook| composer.expand(&output, "shell-hook", hook, &set))
      .transpose()?;
    let shell = DevShell {
      name: name.clone(),
      system,
      shell_hook,
      environment: composer.environment(&output, decl.env_decl(), &set)?,
    };
    set.dev_shells.insert(name.clone(), shell);
  }

  for (name, decl) in &decls.checks {
    if !decl.env_decl().enabled_on(system) {
      continue;
    }
    let output = format!("checks.{name}");
    let check = Check {
      name: name.clone(),
      system,
      command: composer.expand(&output, "command", &decl.command, &set)?,
      environment: composer.environment(&output, decl.env_decl(), &set)?,
    };
    set.checks.insert(name.clone(), check);
  }

  debug!(
    %system,
    packages = set.packages.len(),
    dev_shells = set.dev_shells.len(),
    checks = set.checks.len(),
    "composed outputs"
  );
  Ok(set)
}

/// Compose every configured system, or only `host` when `systems` is empty.
pub fn compose_all(
  graph: &ResolvedGraph,
  decls: &OutputDecls,
  project_dir: &Path,
  host: Platform,
) -> Result<OutputRegistry, ComposeError> {
  let systems = if decls.systems.is_empty() {
    vec![host]
  } else {
    decls.systems.clone()
  };

  let sets = systems
    .par_iter()
    .map(|system| compose(graph, *system, decls, project_dir))
    .collect::<Result<Vec<_>, _>>()?;

  let mut registry = OutputRegistry::default();
  for set in sets {
    registry.insert(set);
  }
  Ok(registry)
}

struct Composer<'a> {
  graph: &'a ResolvedGraph,
  system: Platform,
  decls: &'a OutputDecls,
  project_dir: &'a Path,
}

impl<'a> Composer<'a> {
  /// Enabled packages, dependencies before dependents.
  fn package_order(&self) -> Result<Vec<&'a str>, ComposeError> {
    let mut dag: DiGraph<&str, ()> = DiGraph::new();
    let mut nodes: BTreeMap<&str, NodeIndex> = BTreeMap::new();

    for (name, decl) in &self.decls.packages {
      if decl.env_decl().enabled_on(self.system) {
        nodes.insert(name.as_str(), dag.add_node(name.as_str()));
      }
    }

    for (name, decl) in &self.decls.packages {
      let Some(&dependent) = nodes.get(name.as_str()) else {
        continue;
      };
      let output = format!("packages.{name}");

      let mut deps: Vec<String> = decl.inputs_from.clone();
      let texts = decl
        .src
        .iter()
        .map(|s| ("src", s))
        .chain(decl.build.iter().map(|s| ("build", s)))
        .chain(decl.env.values().map(|s| ("env", s)));
      for (field, text) in texts {
        let refs = interpolate::references(text).map_err(|source| ComposeError::Interpolate {
          output: output.clone(),
          field,
          source,
        })?;
        deps.extend(refs.into_iter().filter_map(|r| match r {
          Reference::PackageSrc(dep) => Some(dep),
          _ => None,
        }));
      }

      // Unknown or disabled dependencies are reported during evaluation.
      for dep in deps {
        if let Some(&dependency) = nodes.get(dep.as_str()) {
          dag.update_edge(dependency, dependent, ());
        }
      }
    }

    let sorted = toposort(&dag, None).map_err(|cycle| ComposeError::Cycle {
      system: self.system,
      chain: cycle_chain(&dag, cycle.node_id()),
    })?;
    Ok(sorted.into_iter().map(|idx| dag[idx]).collect())
  }

  fn package(&self, name: &str, set: &OutputSet) -> Result<Package, ComposeError> {
    let decl = &self.decls.packages[name];
    let output = format!("packages.{name}");

    let src = self.expand(&output, "src", decl.src.as_deref().unwrap_or("."), set)?;
    let build = decl
      .build
      .iter()
      .map(|cmd| self.expand(&output, "build", cmd, set))
      .collect::<Result<Vec<_>, _>>()?;

    Ok(Package {
      name: name.to_string(),
      system: self.system,
      src: self.source_path(&src),
      build,
      environment: self.environment(&output, decl.env_decl(), set)?,
    })
  }

  fn environment(&self, output: &str, decl: EnvDecl<'_>, set: &OutputSet) -> Result<Environment, ComposeError> {
    let mut environment = Environment {
      build_inputs: Vec::with_capacity(decl.build_inputs.len()),
      tools: decl.tools.to_vec(),
      env: BTreeMap::new(),
    };

    for name in decl.build_inputs {
      let input = self
        .graph
        .lookup(ROOT_NODE, name)
        .and_then(|node| self.graph.node(&node))
        .ok_or_else(|| ComposeError::UnknownInput {
          output: output.to_string(),
          name: name.clone(),
        })?;
      environment.build_inputs.push(BuildInput {
        name: name.clone(),
        path: input.path.clone(),
      });
    }

    for (key, value) in decl.env {
      environment.env.insert(key.clone(), self.expand(output, "env", value, set)?);
    }

    for from in decl.inputs_from {
      let package = self.composed_package(output, from, set)?;
      environment.inherit(&package.environment);
    }

    Ok(environment)
  }

  /// A package already composed into `set`.
  fn composed_package<'s>(&self, output: &str, name: &str, set: &'s OutputSet) -> Result<&'s Package, ComposeError> {
    if let Some(package) = set.packages.get(name) {
      return Ok(package);
    }
    if self.decls.packages.contains_key(name) {
      Err(ComposeError::PackageUnavailable {
        output: output.to_string(),
        name: name.to_string(),
        system: self.system,
      })
    } else {
      Err(ComposeError::UnknownPackage {
        output: output.to_string(),
        name: name.to_string(),
      })
    }
  }

  /// Substitute references in `text`.
  fn expand(&self, output: &str, field: &'static str, text: &str, set: &OutputSet) -> Result<String, ComposeError> {
    let segments = interpolate::parse(text).map_err(|source| ComposeError::Interpolate {
      output: output.to_string(),
      field,
      source,
    })?;

    let mut out = String::with_capacity(text.len());
    for segment in segments {
      match segment {
        Segment::Literal(literal) => out.push_str(&literal),
        Segment::Reference(Reference::System) => out.push_str(&self.system.triple()),
        Segment::Reference(Reference::Input { name, attr }) => {
          let input = self
            .graph
            .lookup(ROOT_NODE, &name)
            .and_then(|node| self.graph.node(&node))
            .ok_or_else(|| ComposeError::UnknownInput {
              output: output.to_string(),
              name: name.clone(),
            })?;
          match attr {
            InputAttr::Path => out.push_str(&input.path.to_string_lossy()),
            InputAttr::Rev => out.push_str(&input.locked.rev),
            InputAttr::Hash => out.push_str(&input.locked.nar_hash),
          }
        }
        Segment::Reference(Reference::PackageSrc(name)) => {
          let package = self.composed_package(output, &name, set)?;
          out.push_str(&package.src.to_string_lossy());
        }
      }
    }
    Ok(out)
  }

  fn source_path(&self, src: &str) -> PathBuf {
    let path = Path::new(src);
    let joined = if path.is_absolute() {
      path.to_path_buf()
    } else {
      self.project_dir.join(path)
    };
    joined.components().filter(|c| !matches!(c, Component::CurDir)).collect()
  }
}

/// A dependency chain through the cycle containing `start`, closed on its
/// first node (`["a", "b", "a"]`).
fn cycle_chain(dag: &DiGraph<&str, ()>, start: NodeIndex) -> Vec<String> {
  let members: HashSet<NodeIndex> = tarjan_scc(dag)
    .into_iter()
    .find(|scc| scc.contains(&start))
    .map(|scc| scc.into_iter().collect())
    .unwrap_or_default();

  let mut path = vec![start];
  let mut current = start;
  // Follow "depends on" edges inside the strongly connected component.
  while let Some(next) = dag
    .neighbors_directed(current, Direction::Incoming)
    .filter(|n| members.contains(n))
    .min_by_key(|n| dag[*n])
  {
    if let Some(pos) = path.iter().position(|n| *n == next) {
      let mut chain: Vec<String> = path[pos..].iter().map(|n| dag[*n].to_string()).collect();
      chain.push(dag[next].to_string());
      return chain;
    }
    path.push(next);
    current = next;
  }
  vec![dag[start].to_string()]
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::inputs::source::Locator;
  use crate::inputs::{LockedSource, ResolvedInput};
  use crate::manifest::Manifest;
  use crate::util::hash::hash_bytes;

  fn linux() -> Platform {
    "x86_64-linux".parse().unwrap()
  }

  fn darwin() -> Platform {
    "aarch64-darwin".parse().unwrap()
  }

  fn graph() -> ResolvedGraph {
    let mut graph = ResolvedGraph::default();
    for name in ["nixpkgs", "overlay"] {
      let locator = Locator::github("o", name, None);
      let hash = hash_bytes(name.as_bytes());
      graph.nodes.insert(
        name.to_string(),
        ResolvedInput {
          locked: LockedSource::new(&locator, format!("rev-{name}"), &hash, None),
          original: locator,
          path: PathBuf::from("/store").join(name),
        },
      );
      graph.bind(ROOT_NODE, name, name);
    }
    graph
  }

  fn outputs(toml: &str) -> OutputDecls {
    Manifest::parse(toml, Path::new("tether.toml")).unwrap().outputs
  }

  fn compose_linux(toml: &str) -> Result<OutputSet, ComposeError> {
    compose(&graph(), linux(), &outputs(toml), Path::new("/project"))
  }

  mod packages {
    use super::*;

    #[test]
    fn defaults_source_to_project_dir() {
      let set = compose_linux(
        r#"
        [outputs.packages.default]
        build = ["make"]
        "#,
      )
      .unwrap();

      let package = &set.packages["default"];
      assert_eq!(package.src, PathBuf::from("/project"));
      assert_eq!(package.build, vec!["make"]);
      assert_eq!(package.system, linux());
    }

    #[test]
    fn interpolates_inputs_and_system() {
      let set = compose_linux(
        r#"
        [outputs.packages.default]
        src = "./crates/app"
        build-inputs = ["nixpkgs"]
        build = ["echo ${inputs.overlay.rev} ${system}", "cp -r ${inputs.nixpkgs}/lib $out"]
        env = { HASH = "${inputs.nixpkgs.hash}", HOME_DIR = "${HOME}" }
        "#,
      )
      .unwrap();

      let package = &set.packages["default"];
      assert_eq!(package.src, PathBuf::from("/project/crates/app"));
      assert_eq!(package.build[0], "echo rev-overlay x86_64-linux");
      assert_eq!(package.build[1], "cp -r /store/nixpkgs/lib $out");
      assert!(package.environment.env["HASH"].starts_with("sha256-"));
      assert_eq!(package.environment.env["HOME_DIR"], "${HOME}");
      assert_eq!(package.environment.build_inputs[0].path, PathBuf::from("/store/nixpkgs"));
    }

    #[test]
    fn package_src_references_order_evaluation() {
      let set = compose_linux(
        r#"
        [outputs.packages.app]
        build = ["cp -r ${packages.zlib.src} $out"]

        [outputs.packages.zlib]
        src = "vendor/zlib"
        "#,
      )
      .unwrap();

      assert_eq!(set.packages["app"].build[0], "cp -r /project/vendor/zlib $out");
    }

    #[test]
    fn inputs_from_inherits_environment() {
      let set = compose_linux(
        r#"
        [outputs.packages.base]
        build-inputs = ["nixpkgs"]
        tools = ["cargo"]
        env = { RUSTFLAGS = "-C opt-level=3", MODE = "base" }

        [outputs.packages.app]
        inputs-from = ["base"]
        tools = ["make"]
        env = { MODE = "app" }
        "#,
      )
      .unwrap();

      let env = &set.packages["app"].environment;
      assert_eq!(env.tools, vec!["make", "cargo"]);
      assert_eq!(env.env["MODE"], "app");
      assert_eq!(env.env["RUSTFLAGS"], "-C opt-level=3");
      assert_eq!(env.build_inputs.len(), 1);
    }

    #[test]
    fn systems_filter_excludes_package() {
      let set = compose_linux(
        r#"
        [outputs.packages.mac-only]
        systems = ["aarch64-darwin"]
        "#,
      )
      .unwrap();

      assert!(set.packages.is_empty());
    }
  }

  mod shells_and_checks {
    use super::*;

    #[test]
    fn dev_shell_inherits_from_package() {
      let set = compose_linux(
        r#"
        [outputs.packages.default]
        tools = ["cargo"]
        build-inputs = ["overlay"]

        [outputs.dev-shells.default]
        inputs-from = ["default"]
        tools = ["rust-analyzer"]
        env = { RUST_SRC_PATH = "${inputs.overlay}/lib/rustlib/src" }
        shell-hook = "echo entering ${system}"
        "#,
      )
      .unwrap();

      let shell = &set.dev_shells["default"];
      assert_eq!(shell.shell_hook.as_deref(), Some("echo entering x86_64-linux"));
      assert_eq!(shell.environment.tools, vec!["rust-analyzer", "cargo"]);
      assert_eq!(shell.environment.env["RUST_SRC_PATH"], "/store/overlay/lib/rustlib/src");
    }

    #[test]
    fn checks_are_composed_per_system() {
      let decls = outputs(
        r#"
        [outputs.checks.fmt]
        command = "cargo fmt --check"

        [outputs.checks.mac]
        command = "true"
        systems = ["aarch64-darwin"]
        "#,
      );

      let linux_set = compose(&graph(), linux(), &decls, Path::new("/p")).unwrap();
      let darwin_set = compose(&graph(), darwin(), &decls, Path::new("/p")).unwrap();

      assert_eq!(linux_set.names(crate::outputs::OutputKind::Check), vec!["fmt"]);
      assert_eq!(darwin_set.checks.len(), 2);
    }
  }

  mod errors {
    use super::*;

    #[test]
    fn inputs_from_cycle_is_reported_with_chain() {
      let err = compose_linux(
        r#"
        [outputs.packages.a]
        inputs-from = ["b"]

        [outputs.packages.b]
        inputs-from = ["a"]
        "#,
      )
      .unwrap_err();

      match err {
        ComposeError::Cycle { chain, .. } => {
          assert_eq!(chain.len(), 3);
          assert_eq!(chain.first(), chain.last());
        }
        other => panic!("expected a cycle, got {other:?}"),
      }
    }

    #[test]
    fn self_reference_is_a_cycle() {
      let err = compose_linux(
        r#"
        [outputs.packages.a]
        build = ["ls ${packages.a.src}"]
        "#,
      )
      .unwrap_err();

      match err {
        ComposeError::Cycle { chain, .. } => assert_eq!(chain, vec!["a", "a"]),
        other => panic!("expected a cycle, got {other:?}"),
      }
    }

    #[test]
    fn unknown_input() {
      let err = compose_linux(
        r#"
        [outputs.checks.lint]
        command = "${inputs.missing}/bin/lint"
        "#,
      )
      .unwrap_err();

      assert!(matches!(err, ComposeError::UnknownInput { ref name, .. } if name == "missing"));
    }

    #[test]
    fn unknown_build_input() {
      let err = compose_linux(
        r#"
        [outputs.dev-shells.default]
        build-inputs = ["missing"]
        "#,
      )
      .unwrap_err();

      assert!(matches!(err, ComposeError::UnknownInput { ref output, .. } if output == "devShells.default"));
    }

    #[test]
    fn unknown_and_unavailable_packages() {
      let err = compose_linux(
        r#"
        [outputs.dev-shells.default]
        inputs-from = ["nope"]
        "#,
      )
      .unwrap_err();
      assert!(matches!(err, ComposeError::UnknownPackage { .. }));

      let err = compose_linux(
        r#"
        [outputs.packages.mac]
        systems = ["aarch64-darwin"]

        [outputs.dev-shells.default]
        inputs-from = ["mac"]
        "#,
      )
      .unwrap_err();
      assert!(matches!(err, ComposeError::PackageUnavailable { .. }));
    }

    #[test]
    fn unterminated_reference() {
      let err = compose_linux(
        r#"
        [outputs.checks.broken]
        command = "echo ${system"
        "#,
      )
      .unwrap_err();

      assert!(matches!(err, ComposeError::Interpolate { field: "command", .. }));
    }
  }

  #[test]
  fn compose_is_deterministic() {
    let toml = r#"
      [outputs.packages.default]
      build = ["make ${system}"]
      [outputs.checks.test]
      command = "make test"
    "#;
    assert_eq!(compose_linux(toml).unwrap(), compose_linux(toml).unwrap());
  }

  #[test]
  fn compose_all_defaults_to_host() {
    let decls = outputs("[outputs.checks.t]\ncommand = \"true\"\n");
    let registry = compose_all(&graph(), &decls, Path::new("/p"), darwin()).unwrap();
    assert_eq!(registry.systems.keys().copied().collect::<Vec<_>>(), vec![darwin()]);
  }

  #[test]
  fn compose_all_covers_declared_systems() {
    let decls = outputs(
      r#"
      [outputs]
      systems = ["x86_64-linux", "aarch64-darwin"]
      [outputs.checks.t]
      command = "true"
      "#,
    );
    let registry = compose_all(&graph(), &decls, Path::new("/p"), linux()).unwrap();
    assert_eq!(registry.systems.len(), 2);
    assert!(registry.systems.values().all(|set| set.checks.contains_key("t")));
  }
}
