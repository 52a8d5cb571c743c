//! Composed outputs and lookup by reference.
//!
//! The registry maps `(kind, system, name)` to a concrete output. References
//! are written `kind.system.name`, `kind.name` (current system) or just
//! `name`, which tries packages, then dev shells, then checks.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::Serialize;
use thiserror::Error;

use crate::platform::Platform;

/// The three categories of outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum OutputKind {
  #[serde(rename = "packages")]
  Package,
  #[serde(rename = "devShells")]
  DevShell,
  #[serde(rename = "checks")]
  Check,
}

impl OutputKind {
  pub const ALL: [OutputKind; 3] = [OutputKind::Package, OutputKind::DevShell, OutputKind::Check];

  pub fn as_str(&self) -> &'static str {
    match self {
      OutputKind::Package => "packages",
      OutputKind::DevShell => "devShells",
      OutputKind::Check => "checks",
    }
  }

  fn parse(s: &str) -> Option<Self> {
    match s {
      "packages" | "package" => Some(OutputKind::Package),
      "devShells" | "dev-shells" | "devShell" | "dev-shell" => Some(OutputKind::DevShell),
      "checks" | "check" => Some(OutputKind::Check),
      _ => None,
    }
  }
}

impl fmt::Display for OutputKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// A root input made available to an output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildInput {
  pub name: String,
  pub path: PathBuf,
}

/// Environment shared by every output kind, with `inputs-from` already
/// folded in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Environment {
  pub build_inputs: Vec<BuildInput>,
  pub tools: Vec<String>,
  pub env: BTreeMap<String, String>,
}

impl Environment {
  /// Append `other` under `self`: entries already present win.
  pub fn inherit(&mut self, other: &Environment) {
    for input in &other.build_inputs {
      if !self.build_inputs.iter().any(|i| i.name == input.name) {
        self.build_inputs.push(input.clone());
      }
    }
    for tool in &other.tools {
      if !self.tools.contains(tool) {
        self.tools.push(tool.clone());
      }
    }
    for (key, value) in &other.env {
      self.env.entry(key.clone()).or_insert_with(|| value.clone());
    }
  }
}

/// A buildable unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Package {
  pub name: String,
  pub system: Platform,
  pub src: PathBuf,
  /// Commands run in order with `$out` set.
  pub build: Vec<String>,
  #[serde(flatten)]
  pub environment: Environment,
}

/// A development environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DevShell {
  pub name: String,
  pub system: Platform,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub shell_hook: Option<String>,
  #[serde(flatten)]
  pub environment: Environment,
}

/// A pass/fail command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Check {
  pub name: String,
  pub system: Platform,
  pub command: String,
  #[serde(flatten)]
  pub environment: Environment,
}

/// Every output composed for one system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputSet {
  #[serde(skip)]
  pub system: Platform,
  pub packages: BTreeMap<String, Package>,
  #[serde(rename = "devShells")]
  pub dev_shells: BTreeMap<String, DevShell>,
  pub checks: BTreeMap<String, Check>,
}

impl OutputSet {
  pub fn new(system: Platform) -> Self {
    Self {
      system,
      packages: BTreeMap::new(),
      dev_shells: BTreeMap::new(),
      checks: BTreeMap::new(),
    }
  }

  pub fn get(&self, kind: OutputKind, name: &str) -> Option<Output<'_>> {
    match kind {
      OutputKind::Package => self.packages.get(name).map(Output::Package),
      OutputKind::DevShell => self.dev_shells.get(name).map(Output::DevShell),
      OutputKind::Check => self.checks.get(name).map(Output::Check),
    }
  }

  pub fn names(&self, kind: OutputKind) -> Vec<&str> {
    match kind {
      OutputKind::Package => self.packages.keys().map(String::as_str).collect(),
      OutputKind::DevShell => self.dev_shells.keys().map(String::as_str).collect(),
      OutputKind::Check => self.checks.keys().map(String::as_str).collect(),
    }
  }

  pub fn is_empty(&self) -> bool {
    self.packages.is_empty() && self.dev_shells.is_empty() && self.checks.is_empty()
  }
}

/// A borrowed output of any kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Output<'a> {
  Package(&'a Package),
  DevShell(&'a DevShell),
  Check(&'a Check),
}

impl Output<'_> {
  pub fn kind(&self) -> OutputKind {
    match self {
      Output::Package(_) => OutputKind::Package,
      Output::DevShell(_) => OutputKind::DevShell,
      Output::Check(_) => OutputKind::Check,
    }
  }

  pub fn name(&self) -> &str {
    match self {
      Output::Package(p) => &p.name,
      Output::DevShell(s) => &s.name,
      Output::Check(c) => &c.name,
    }
  }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LookupError {
  #[error("invalid output reference '{reference}': {reason}")]
  InvalidReference { reference: String, reason: String },

  #[error("no outputs were composed for {0}")]
  UnknownSystem(Platform),

  #[error("output '{reference}' not found for {system}")]
  NotFound { reference: String, system: Platform },

  #[error("'{reference}' is a {actual} output, expected {expected}")]
  WrongKind {
    reference: String,
    expected: OutputKind,
    actual: OutputKind,
  },
}

/// A parsed output reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputRef {
  pub kind: Option<OutputKind>,
  pub system: Option<Platform>,
  pub name: String,
}

impl OutputRef {
  pub fn named(name: &str) -> Self {
    Self {
      kind: None,
      system: None,
      name: name.to_string(),
    }
  }
}

impl FromStr for OutputRef {
  type Err = LookupError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let invalid = |reason: &str| LookupError::InvalidReference {
      reference: s.to_string(),
      reason: reason.to_string(),
    };
    let kind = |k: &str| OutputKind::parse(k).ok_or_else(|| invalid(&format!("unknown output kind '{k}'")));

    let parts: Vec<&str> = s.split('.').collect();
    if parts.iter().any(|p| p.is_empty()) {
      return Err(invalid("empty segment"));
    }
    match parts.as_slice() {
      [name] => Ok(Self::named(name)),
      [k, name] => Ok(Self {
        kind: Some(kind(k)?),
        system: None,
        name: name.to_string(),
      }),
      [k, system, name] => Ok(Self {
        kind: Some(kind(k)?),
        system: Some(system.parse().map_err(|_| invalid(&format!("unknown system '{system}'")))?),
        name: name.to_string(),
      }),
      _ => Err(invalid("expected kind.system.name, kind.name or name")),
    }
  }
}

impl fmt::Display for OutputRef {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if let Some(kind) = self.kind {
      write!(f, "{kind}.")?;
    }
    if let Some(system) = self.system {
      write!(f, "{system}.")?;
    }
    f.write_str(&self.name)
  }
}

/// Outputs of every configured system.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct OutputRegistry {
  pub systems: BTreeMap<Platform, OutputSet>,
}

impl OutputRegistry {
  pub fn insert(&mut self, set: OutputSet) {
    self.systems.insert(set.system, set);
  }

  pub fn system(&self, system: Platform) -> Result<&OutputSet, LookupError> {
    self.systems.get(&system).ok_or(LookupError::UnknownSystem(system))
  }

  /// Find the output `reference` names, defaulting to `current` when the
  /// reference carries no system.
  pub fn get(&self, reference: &OutputRef, current: Platform) -> Result<Output<'_>, LookupError> {
    let system = reference.system.unwrap_or(current);
    let set = self.system(system)?;
    let kinds: &[OutputKind] = match &reference.kind {
      Some(kind) => std::slice::from_ref(kind),
      None => &OutputKind::ALL,
    };
    kinds
      .iter()
      .find_map(|kind| set.get(*kind, &reference.name))
      .ok_or_else(|| LookupError::NotFound {
        reference: reference.to_string(),
        system,
      })
  }

  /// Like [`OutputRegistry::get`], but the output must be of `kind`.
  pub fn get_kind(&self, reference: &OutputRef, kind: OutputKind, current: Platform) -> Result<Output<'_>, LookupError> {
    let reference = OutputRef {
      kind: reference.kind.or(Some(kind)),
      ..reference.clone()
    };
    let output = self.get(&reference, current)?;
    if output.kind() != kind {
      return Err(LookupError::WrongKind {
        reference: reference.to_string(),
        expected: kind,
        actual: output.kind(),
      });
    }
    Ok(output)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn linux() -> Platform {
    "x86_64-linux".parse().unwrap()
  }

  fn darwin() -> Platform {
    "aarch64-darwin".parse().unwrap()
  }

  fn package(name: &str, system: Platform) -> Package {
    Package {
      name: name.to_string(),
      system,
      src: PathBuf::from("/src"),
      build: vec!["true".to_string()],
      environment: Environment::default(),
    }
  }

  fn check(name: &str, system: Platform) -> Check {
    Check {
      name: name.to_string(),
      system,
      command: "true".to_string(),
      environment: Environment::default(),
    }
  }

  fn registry() -> OutputRegistry {
    let mut registry = OutputRegistry::default();
    for system in [linux(), darwin()] {
      let mut set = OutputSet::new(system);
      set.packages.insert("default".to_string(), package("default", system));
      set.checks.insert("default".to_string(), check("default", system));
      set.checks.insert("fmt".to_string(), check("fmt", system));
      set.dev_shells.insert(
        "default".to_string(),
        DevShell {
          name: "default".to_string(),
          system,
          shell_hook: None,
          environment: Environment::default(),
        },
      );
      registry.insert(set);
    }
    registry
  }

  mod references {
    use super::*;

    #[test]
    fn parses_all_three_forms() {
      assert_eq!("default".parse::<OutputRef>().unwrap(), OutputRef::named("default"));

      let two: OutputRef = "checks.fmt".parse().unwrap();
      assert_eq!(two.kind, Some(OutputKind::Check));
      assert_eq!(two.system, None);

      let three: OutputRef = "devShells.aarch64-darwin.default".parse().unwrap();
      assert_eq!(three.kind, Some(OutputKind::DevShell));
      assert_eq!(three.system, Some(darwin()));
      assert_eq!(three.to_string(), "devShells.aarch64-darwin.default");
    }

    #[test]
    fn rejects_unknown_kinds_and_systems() {
      assert!("widgets.default".parse::<OutputRef>().is_err());
      assert!("packages.riscv-plan9.default".parse::<OutputRef>().is_err());
      assert!("packages..default".parse::<OutputRef>().is_err());
      assert!("a.b.c.d".parse::<OutputRef>().is_err());
    }
  }

  mod lookup {
    use super::*;

    #[test]
    fn bare_names_prefer_packages_then_shells_then_checks() {
      let registry = registry();

      let output = registry.get(&OutputRef::named("default"), linux()).unwrap();
      assert_eq!(output.kind(), OutputKind::Package);

      let output = registry.get(&OutputRef::named("fmt"), linux()).unwrap();
      assert_eq!(output.kind(), OutputKind::Check);
    }

    #[test]
    fn explicit_system_overrides_current() {
      let registry = registry();
      let reference: OutputRef = "packages.aarch64-darwin.default".parse().unwrap();

      match registry.get(&reference, linux()).unwrap() {
        Output::Package(p) => assert_eq!(p.system, darwin()),
        other => panic!("expected a package, got {other:?}"),
      }
    }

    #[test]
    fn missing_system_and_name_are_distinct_errors() {
      let registry = registry();
      let windows: Platform = "x86_64-windows".parse().unwrap();

      assert_eq!(
        registry.get(&OutputRef::named("default"), windows),
        Err(LookupError::UnknownSystem(windows))
      );
      assert!(matches!(
        registry.get(&OutputRef::named("nope"), linux()),
        Err(LookupError::NotFound { .. })
      ));
    }

    #[test]
    fn get_kind_rejects_other_kinds() {
      let registry = registry();
      let reference: OutputRef = "checks.fmt".parse().unwrap();

      assert!(matches!(
        registry.get_kind(&reference, OutputKind::Package, linux()),
        Err(LookupError::WrongKind { .. })
      ));
      assert!(registry.get_kind(&OutputRef::named("fmt"), OutputKind::Check, linux()).is_ok());
    }
  }

  #[test]
  fn inherit_keeps_own_entries_first() {
    let mut own = Environment {
      build_inputs: vec![BuildInput {
        name: "a".to_string(),
        path: PathBuf::from("/a"),
      }],
      tools: vec!["cargo".to_string()],
      env: [("X".to_string(), "own".to_string())].into(),
    };
    let inherited = Environment {
      build_inputs: vec![
        BuildInput {
          name: "a".to_string(),
          path: PathBuf::from("/other"),
        },
        BuildInput {
          name: "b".to_string(),
          path: PathBuf::from("/b"),
        },
      ],
      tools: vec!["cargo".to_string(), "rustc".to_string()],
      env: [("X".to_string(), "inherited".to_string()), ("Y".to_string(), "y".to_string())].into(),
    };

    own.inherit(&inherited);

    assert_eq!(own.build_inputs.len(), 2);
    assert_eq!(own.build_inputs[0].path, PathBuf::from("/a"));
    assert_eq!(own.tools, vec!["cargo", "rustc"]);
    assert_eq!(own.env["X"], "own");
    assert_eq!(own.env["Y"], "y");
  }

  #[test]
  fn registry_serializes_by_system_and_kind() {
    let json = serde_json::to_value(registry()).unwrap();
    assert!(json["x86_64-linux"]["packages"]["default"]["build"].is_array());
    assert!(json["aarch64-darwin"]["devShells"]["default"].is_object());
    assert_eq!(json["x86_64-linux"]["checks"]["fmt"]["command"], "true");
  }
}
