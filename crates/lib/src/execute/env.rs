//! Process environments for output commands.
//!
//! Builds and checks start from an empty environment. `PATH` is assembled
//! from the `bin/` directories of build inputs, the directories of declared
//! tools and finally the host `PATH`. Dev shells keep the host environment
//! and only prepend to `PATH`.

use std::collections::BTreeMap;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};

use tokio::process::Command;
use tracing::trace;

use crate::consts::SOURCE_DATE_EPOCH;
use crate::outputs::Environment;
use crate::platform::Platform;

/// Host variables kept in isolated environments.
#[cfg(unix)]
const PASS_THROUGH: &[&str] = &["HOME", "USER", "TERM"];
#[cfg(windows)]
const PASS_THROUGH: &[&str] = &[
  "HOME",
  "USER",
  "TERM",
  "USERPROFILE",
  "SYSTEMROOT",
  "COMSPEC",
  "PATHEXT",
  "WINDIR",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvMode {
  /// Cleared environment, `HOME` inside the scratch directory.
  Build,
  /// Cleared environment with the host's `HOME`, `USER` and `TERM`.
  Check,
  /// Host environment with additions.
  Shell,
}

/// Environment of one command, with the tools that could not be found.
#[derive(Debug, Clone)]
pub struct CommandEnv {
  mode: EnvMode,
  vars: BTreeMap<String, OsString>,
  pub missing_tools: Vec<String>,
}

impl CommandEnv {
  /// Assemble the environment for an output of `system`.
  ///
  /// `scratch` receives `tmp/` (and `home/` for builds); it is created.
  pub fn new(environment: &Environment, system: Platform, scratch: &Path, mode: EnvMode) -> std::io::Result<Self> {
    let (path, missing_tools) = search_path(environment, std::env::var_os("PATH").as_deref());

    let mut vars = BTreeMap::new();
    if mode != EnvMode::Shell {
      for name in PASS_THROUGH {
        if let Some(value) = std::env::var_os(name) {
          vars.insert(name.to_string(), value);
        }
      }

      let tmp = scratch.join("tmp");
      std::fs::create_dir_all(&tmp)?;
      for name in ["TMPDIR", "TMP", "TEMP", "TEMPDIR"] {
        vars.insert(name.to_string(), tmp.clone().into_os_string());
      }
      if mode == EnvMode::Build {
        let home = scratch.join("home");
        std::fs::create_dir_all(&home)?;
        vars.insert("HOME".to_string(), home.into_os_string());
      }

      vars.insert("LANG".to_string(), "C".into());
      vars.insert("LC_ALL".to_string(), "C".into());
      vars.insert("SOURCE_DATE_EPOCH".to_string(), SOURCE_DATE_EPOCH.to_string().into());
    }

    vars.insert("PATH".to_string(), path);
    vars.insert("TETHER_SYSTEM".to_string(), system.triple().into());
    for (key, value) in &environment.env {
      vars.insert(key.clone(), value.into());
    }

    trace!(?mode, vars = vars.len(), missing = missing_tools.len(), "assembled command environment");
    Ok(Self {
      mode,
      vars,
      missing_tools,
    })
  }

  pub fn set(&mut self, key: &str, value: impl Into<OsString>) {
    self.vars.insert(key.to_string(), value.into());
  }

  pub fn get(&self, key: &str) -> Option<&OsStr> {
    self.vars.get(key).map(OsString::as_os_str)
  }

  pub fn mode(&self) -> EnvMode {
    self.mode
  }

  /// Install this environment on `command`.
  pub fn apply(&self, command: &mut Command) {
    if self.mode != EnvMode::Shell {
      command.env_clear();
    }
    command.envs(&self.vars);
  }
}

/// `PATH` for `environment` followed by `host_path`, and every bare tool name
/// that could not be found on `host_path`.
pub fn search_path(environment: &Environment, host_path: Option<&OsStr>) -> (OsString, Vec<String>) {
  let host_dirs: Vec<PathBuf> = host_path.map(|p| std::env::split_paths(p).collect()).unwrap_or_default();
  let mut dirs: Vec<PathBuf> = Vec::new();
  let mut missing = Vec::new();

  let mut push = |dir: PathBuf| {
    if !dirs.contains(&dir) {
      dirs.push(dir);
    }
  };

  for input in &environment.build_inputs {
    let bin = input.path.join("bin");
    if bin.is_dir() {
      push(bin);
    }
  }

  for tool in &environment.tools {
    match tool_dir(tool, host_path) {
      Some(dir) => push(dir),
      None => missing.push(tool.clone()),
    }
  }

  for dir in host_dirs {
    push(dir);
  }

  // Entries come from split_paths, so they contain no separators.
  let path = std::env::join_paths(&dirs).unwrap_or_default();
  (path, missing)
}

/// Directory a tool lives in. Tools given as paths are used as given.
fn tool_dir(tool: &str, host_path: Option<&OsStr>) -> Option<PathBuf> {
  let as_path = Path::new(tool);
  if as_path.components().count() > 1 || as_path.is_absolute() {
    if as_path.is_dir() {
      return Some(as_path.to_path_buf());
    }
    return as_path.parent().map(Path::to_path_buf);
  }

  let cwd = std::env::current_dir().ok()?;
  let found = which::which_in(tool, host_path, cwd).ok()?;
  found.parent().map(Path::to_path_buf)
}

#[cfg(test)]
mod tests {
  use std::fs;

  use super::*;
  use crate::outputs::BuildInput;
  use tempfile::TempDir;

  fn linux() -> Platform {
    "x86_64-linux".parse().unwrap()
  }

  #[cfg(unix)]
  fn make_executable(dir: &Path, name: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    fs::create_dir_all(dir).unwrap();
    let path = dir.join(name);
    fs::write(&path, "#!/bin/sh\n").unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
  }

  mod search_path_tests {
    use super::*;

    #[test]
    fn build_input_bin_dirs_come_first() {
      let dir = TempDir::new().unwrap();
      let with_bin = dir.path().join("a");
      fs::create_dir_all(with_bin.join("bin")).unwrap();
      let without_bin = dir.path().join("b");
      fs::create_dir_all(&without_bin).unwrap();
      let environment = Environment {
        build_inputs: vec![
          BuildInput {
            name: "a".to_string(),
            path: with_bin.clone(),
          },
          BuildInput {
            name: "b".to_string(),
            path: without_bin,
          },
        ],
        ..Default::default()
      };
      let host = std::env::join_paths([dir.path().join("host")]).unwrap();

      let (path, missing) = search_path(&environment, Some(&host));

      let dirs: Vec<PathBuf> = std::env::split_paths(&path).collect();
      assert_eq!(dirs, vec![with_bin.join("bin"), dir.path().join("host")]);
      assert!(missing.is_empty());
    }

    #[test]
    #[cfg(unix)]
    fn bare_tools_are_found_on_host_path() {
      let dir = TempDir::new().unwrap();
      let tools = dir.path().join("tools");
      make_executable(&tools, "cargo");
      let host = std::env::join_paths([tools.clone()]).unwrap();
      let environment = Environment {
        tools: vec!["cargo".to_string(), "no-such-tool".to_string()],
        ..Default::default()
      };

      let (path, missing) = search_path(&environment, Some(&host));

      let dirs: Vec<PathBuf> = std::env::split_paths(&path).collect();
      assert_eq!(dirs, vec![tools]);
      assert_eq!(missing, vec!["no-such-tool".to_string()]);
    }

    #[test]
    #[cfg(unix)]
    fn tool_paths_are_used_as_given() {
      let dir = TempDir::new().unwrap();
      let tool = make_executable(&dir.path().join("opt/bin"), "lint");
      let environment = Environment {
        tools: vec![tool.to_string_lossy().into_owned()],
        ..Default::default()
      };

      let (path, missing) = search_path(&environment, None);

      assert_eq!(PathBuf::from(path), dir.path().join("opt/bin"));
      assert!(missing.is_empty());
    }
  }

  mod command_env {
    use super::*;

    #[test]
    fn build_env_is_isolated() {
      let scratch = TempDir::new().unwrap();
      let mut environment = Environment::default();
      environment.env.insert("RUSTFLAGS".to_string(), "-Dwarnings".to_string());

      let env = CommandEnv::new(&environment, linux(), scratch.path(), EnvMode::Build).unwrap();

      assert_eq!(env.get("HOME"), Some(scratch.path().join("home").as_os_str()));
      assert_eq!(env.get("TMPDIR"), Some(scratch.path().join("tmp").as_os_str()));
      assert_eq!(env.get("SOURCE_DATE_EPOCH"), Some(OsStr::new("315532800")));
      assert_eq!(env.get("TETHER_SYSTEM"), Some(OsStr::new("x86_64-linux")));
      assert_eq!(env.get("RUSTFLAGS"), Some(OsStr::new("-Dwarnings")));
      assert!(scratch.path().join("tmp").is_dir());
    }

    #[test]
    fn declared_env_overrides_defaults() {
      let scratch = TempDir::new().unwrap();
      let mut environment = Environment::default();
      environment.env.insert("LANG".to_string(), "en_US.UTF-8".to_string());

      let env = CommandEnv::new(&environment, linux(), scratch.path(), EnvMode::Check).unwrap();

      assert_eq!(env.get("LANG"), Some(OsStr::new("en_US.UTF-8")));
    }

    #[test]
    fn shell_env_only_adds() {
      let scratch = TempDir::new().unwrap();
      let env = CommandEnv::new(&Environment::default(), linux(), scratch.path(), EnvMode::Shell).unwrap();

      assert!(env.get("SOURCE_DATE_EPOCH").is_none());
      assert!(env.get("PATH").is_some());
      assert!(!scratch.path().join("tmp").exists());
    }
  }
}
