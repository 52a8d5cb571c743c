//! The declaration file, `tether.toml`.
//!
//! ```toml
//! description = "seer: a chess engine"
//!
//! [inputs]
//! nixpkgs = "github:NixOS/nixpkgs/nixos-unstable"
//!
//! [inputs.rust-overlay]
//! url = "github:oxalica/rust-overlay"
//! follows = { nixpkgs = "nixpkgs" }
//!
//! [outputs.packages.default]
//! build = ["cargo build --release", "cp target/release/seer $out/"]
//! ```
//!
//! Parsing validates everything that can be checked without fetching:
//! input names, locators, and output declarations. Follow targets are
//! checked by [`crate::inputs::graph`].

mod types;

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::consts::ROOT_NODE;
use crate::inputs::source::{Locator, LocatorError};
use crate::inputs::{InputDecl, InputDecls};

pub use types::*;

#[derive(Debug, Error)]
pub enum DeclError {
  #[error("failed to read '{path}': {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to parse '{path}': {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: toml::de::Error,
  },

  #[error("input '{name}': {source}")]
  Locator {
    name: String,
    #[source]
    source: LocatorError,
  },

  #[error("input '{name}': a locator string in `url` cannot be combined with other locator fields")]
  AmbiguousLocator { name: String },

  #[error("invalid input name '{name}': {reason}")]
  InvalidName { name: String, reason: &'static str },

  #[error("invalid output name '{name}': {reason}")]
  InvalidOutputName { name: String, reason: &'static str },
}

/// A parsed declaration file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
  pub description: Option<String>,
  pub inputs: InputDecls,
  pub outputs: OutputDecls,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawManifest {
  description: Option<String>,
  #[serde(default)]
  inputs: BTreeMap<String, RawInput>,
  #[serde(default)]
  outputs: OutputDecls,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawInput {
  Url(String),
  Table(RawInputTable),
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawInputTable {
  url: Option<String>,
  #[serde(rename = "type")]
  type_: Option<String>,
  owner: Option<String>,
  repo: Option<String>,
  path: Option<String>,
  #[serde(rename = "ref")]
  ref_: Option<String>,
  #[serde(default)]
  follows: BTreeMap<String, String>,
}

impl Manifest {
  /// Parse declaration text. `origin` names the file in error messages.
  pub fn parse(content: &str, origin: &Path) -> Result<Self, DeclError> {
    let raw: RawManifest = toml::from_str(content).map_err(|source| DeclError::Parse {
      path: origin.to_path_buf(),
      source,
    })?;

    let mut inputs = InputDecls::new();
    for (name, raw_input) in raw.inputs {
      validate_input_name(&name)?;
      let decl = raw_input.into_decl(&name)?;
      for sub in decl.follows.keys() {
        validate_input_name(sub)?;
      }
      inputs.insert(name, decl);
    }

    let outputs = raw.outputs;
    let names = outputs
      .packages
      .keys()
      .chain(outputs.dev_shells.keys())
      .chain(outputs.checks.keys());
    for name in names {
      validate_output_name(name)?;
    }

    Ok(Manifest {
      description: raw.description,
      inputs,
      outputs,
    })
  }

  /// Read and parse a declaration file.
  pub fn load(path: &Path) -> Result<Self, DeclError> {
    let content = fs::read_to_string(path).map_err(|source| DeclError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    Self::parse(&content, path)
  }

  /// Inputs declared by a fetched source, if it has a declaration file.
  pub fn load_inputs(dir: &Path) -> Result<InputDecls, DeclError> {
    let path = dir.join(crate::consts::MANIFEST_FILENAME);
    if !path.is_file() {
      return Ok(InputDecls::new());
    }
    Ok(Self::load(&path)?.inputs)
  }
}

impl RawInput {
  fn into_decl(self, name: &str) -> Result<InputDecl, DeclError> {
    let locator_err = |source| DeclError::Locator {
      name: name.to_string(),
      source,
    };

    match self {
      RawInput::Url(url) => Ok(InputDecl::new(url.parse().map_err(locator_err)?)),
      RawInput::Table(table) => {
        let locator = match (&table.url, &table.type_) {
          (Some(url), None) => {
            if table.owner.is_some() || table.repo.is_some() || table.path.is_some() || table.ref_.is_some() {
              return Err(DeclError::AmbiguousLocator { name: name.to_string() });
            }
            url.parse::<Locator>().map_err(locator_err)?
          }
          (_, Some(type_)) => Locator::from_parts(
            type_,
            table.owner.as_deref(),
            table.repo.as_deref(),
            table.url.as_deref(),
            table.path.as_deref(),
            table.ref_.as_deref(),
          )
          .map_err(locator_err)?,
          (None, None) => return Err(locator_err(LocatorError::MissingType(name.to_string()))),
        };
        Ok(InputDecl {
          locator,
          follows: table.follows,
        })
      }
    }
  }
}

fn validate_input_name(name: &str) -> Result<(), DeclError> {
  let invalid = |reason| DeclError::InvalidName {
    name: name.to_string(),
    reason,
  };
  if name.is_empty() {
    return Err(invalid("name cannot be empty"));
  }
  if name.contains(['.', '/']) {
    return Err(invalid("name cannot contain '.' or '/'"));
  }
  if name == ROOT_NODE {
    return Err(invalid("name is reserved"));
  }
  Ok(())
}

fn validate_output_name(name: &str) -> Result<(), DeclError> {
  let invalid = |reason| DeclError::InvalidOutputName {
    name: name.to_string(),
    reason,
  };
  if name.is_empty() {
    return Err(invalid("name cannot be empty"));
  }
  if name.contains(['.', '/']) || name.contains(char::is_whitespace) {
    return Err(invalid("name cannot contain '.', '/' or whitespace"));
  }
  Ok(())
}

/// Locate the declaration file.
///
/// An explicit path wins; otherwise the current directory and its ancestors
/// are searched for `tether.toml`.
pub fn find_manifest_path(explicit: Option<&Path>) -> Result<PathBuf, DeclError> {
  if let Some(path) = explicit {
    let path = if path.is_dir() {
      path.join(crate::consts::MANIFEST_FILENAME)
    } else {
      path.to_path_buf()
    };
    return dunce::canonicalize(&path).map_err(|source| DeclError::Read { path, source });
  }

  let cwd = std::env::current_dir().map_err(|source| DeclError::Read {
    path: PathBuf::from("."),
    source,
  })?;
  for dir in cwd.ancestors() {
    let candidate = dir.join(crate::consts::MANIFEST_FILENAME);
    if candidate.is_file() {
      return Ok(candidate);
    }
  }

  Err(DeclError::Read {
    path: cwd.join(crate::consts::MANIFEST_FILENAME),
    source: io::Error::new(io::ErrorKind::NotFound, "no tether.toml in this directory or any parent"),
  })
}
