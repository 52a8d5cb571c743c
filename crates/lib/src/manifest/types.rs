//! Output declarations as written in `[outputs]`.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::platform::Platform;

/// The `[outputs]` table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct OutputDecls {
  /// Platforms outputs are composed for. Empty means the host platform only.
  #[serde(default)]
  pub systems: Vec<Platform>,

  #[serde(default)]
  pub packages: BTreeMap<String, PackageDecl>,

  #[serde(default)]
  pub dev_shells: BTreeMap<String, DevShellDecl>,

  #[serde(default)]
  pub checks: BTreeMap<String, CheckDecl>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct PackageDecl {
  /// Source directory, relative to the declaring file. Defaults to `.`.
  #[serde(default)]
  pub src: Option<String>,

  /// Commands run in order with `$out` set to the output directory.
  #[serde(default)]
  pub build: Vec<String>,

  #[serde(default)]
  pub inputs_from: Vec<String>,
  #[serde(default)]
  pub build_inputs: Vec<String>,
  #[serde(default)]
  pub tools: Vec<String>,
  #[serde(default)]
  pub env: BTreeMap<String, String>,
  #[serde(default)]
  pub systems: Option<Vec<Platform>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct DevShellDecl {
  /// Script run once each time the shell is entered.
  #[serde(default)]
  pub shell_hook: Option<String>,

  #[serde(default)]
  pub inputs_from: Vec<String>,
  #[serde(default)]
  pub build_inputs: Vec<String>,
  #[serde(default)]
  pub tools: Vec<String>,
  #[serde(default)]
  pub env: BTreeMap<String, String>,
  #[serde(default)]
  pub systems: Option<Vec<Platform>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct CheckDecl {
  /// Command whose exit status decides the check.
  pub command: String,

  #[serde(default)]
  pub inputs_from: Vec<String>,
  #[serde(default)]
  pub build_inputs: Vec<String>,
  #[serde(default)]
  pub tools: Vec<String>,
  #[serde(default)]
  pub env: BTreeMap<String, String>,
  #[serde(default)]
  pub systems: Option<Vec<Platform>>,
}

/// Environment fields shared by every output kind.
#[derive(Debug, Clone, Copy)]
pub struct EnvDecl<'a> {
  /// Packages whose build inputs, tools and variables are inherited.
  pub inputs_from: &'a [String],
  /// Inputs whose `bin/` directories are put on `PATH`.
  pub build_inputs: &'a [String],
  /// Bare names are looked up on the host `PATH`, paths are used as given.
  pub tools: &'a [String],
  pub env: &'a BTreeMap<String, String>,
  /// Restricts the output to these platforms.
  pub systems: Option<&'a [Platform]>,
}

impl EnvDecl<'_> {
  pub fn enabled_on(&self, platform: Platform) -> bool {
    self.systems.is_none_or(|systems| systems.contains(&platform))
  }
}

macro_rules! env_decl {
  ($($ty:ty),*) => {
    $(
      impl $ty {
        pub fn env_decl(&self) -> EnvDecl<'_> {
          EnvDecl {
            inputs_from: &self.inputs_from,
            build_inputs: &self.build_inputs,
            tools: &self.tools,
            env: &self.env,
            systems: self.systems.as_deref(),
          }
        }
      }
    )*
  };
}

env_decl!(PackageDecl, DevShellDecl, CheckDecl);
