//! Input locators and their string forms.
//!
//! Locators are written as `<type>:<rest>` strings in declarations:
//!
//! - `github:<owner>/<repo>[/<ref>]`
//! - `git:<url>[#<ref>]`
//! - `path:<dir>`
//! - `tarball:<url>`
//!
//! or as a table with the same fields spelled out (see [`Locator::from_parts`]).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Kind of upstream a locator points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
  Github,
  Git,
  Path,
  Tarball,
}

impl SourceType {
  pub fn as_str(&self) -> &'static str {
    match self {
      SourceType::Github => "github",
      SourceType::Git => "git",
      SourceType::Path => "path",
      SourceType::Tarball => "tarball",
    }
  }
}

impl fmt::Display for SourceType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for SourceType {
  type Err = LocatorError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "github" => Ok(SourceType::Github),
      "git" => Ok(SourceType::Git),
      "path" => Ok(SourceType::Path),
      "tarball" => Ok(SourceType::Tarball),
      other => Err(LocatorError::UnknownType(other.to_string())),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LocatorError {
  #[error("locator '{0}' has no type prefix (expected github:, git:, path: or tarball:)")]
  MissingType(String),

  #[error("unknown locator type '{0}'")]
  UnknownType(String),

  #[error("invalid {kind} locator '{locator}': {reason}")]
  Invalid {
    kind: SourceType,
    locator: String,
    reason: &'static str,
  },
}

/// A reference to an upstream source revision.
///
/// `ref_` is mutable upstream (a branch or tag); resolution pins it to an
/// immutable revision and a content hash.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Locator {
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

  #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
  pub ref_: Option<String>,
}

impl Locator {
  pub fn github(owner: &str, repo: &str, ref_: Option<&str>) -> Self {
    Self {
      type_: SourceType::Github,
      owner: Some(owner.to_string()),
      repo: Some(repo.to_string()),
      url: None,
      path: None,
      ref_: ref_.map(str::to_string),
    }
  }

  pub fn git(url: &str, ref_: Option<&str>) -> Self {
    Self {
      type_: SourceType::Git,
      owner: None,
      repo: None,
      url: Some(url.to_string()),
      path: None,
      ref_: ref_.map(str::to_string),
    }
  }

  pub fn path(path: &str) -> Self {
    Self {
      type_: SourceType::Path,
      owner: None,
      repo: None,
      url: None,
      path: Some(path.to_string()),
      ref_: None,
    }
  }

  pub fn tarball(url: &str) -> Self {
    Self {
      type_: SourceType::Tarball,
      owner: None,
      repo: None,
      url: Some(url.to_string()),
      path: None,
      ref_: None,
    }
  }

  /// Build a locator from the fields of a declaration table.
  pub fn from_parts(
    type_: &str,
    owner: Option<&str>,
    repo: Option<&str>,
    url: Option<&str>,
    path: Option<&str>,
    ref_: Option<&str>,
  ) -> Result<Self, LocatorError> {
    let locator = Locator {
      type_: type_.parse()?,
      owner: owner.map(str::to_string),
      repo: repo.map(str::to_string),
      url: url.map(str::to_string),
      path: path.map(str::to_string),
      ref_: ref_.map(str::to_string),
    };
    locator.validate()?;
    Ok(locator)
  }

  /// Check that the fields required by the locator type are present and
  /// that no field belonging to another type is set.
  pub fn validate(&self) -> Result<(), LocatorError> {
    let invalid = |reason| LocatorError::Invalid {
      kind: self.type_,
      locator: self.to_string(),
      reason,
    };
    let present = |field: &Option<String>| field.as_deref().is_some_and(|v| !v.trim().is_empty());

    match self.type_ {
      SourceType::Github => {
        if !present(&self.owner) || !present(&self.repo) {
          return Err(invalid("owner and repo are required"));
        }
        let bad = |s: &Option<String>| s.as_deref().is_some_and(|v| v.contains('/') || v.contains(char::is_whitespace));
        if bad(&self.owner) || bad(&self.repo) {
          return Err(invalid("owner and repo must be single path segments"));
        }
        if self.url.is_some() || self.path.is_some() {
          return Err(invalid("url and path are not allowed"));
        }
      }
      SourceType::Git => {
        if !present(&self.url) {
          return Err(invalid("url is required"));
        }
        if self.owner.is_some() || self.repo.is_some() || self.path.is_some() {
          return Err(invalid("only url and ref are allowed"));
        }
      }
      SourceType::Path => {
        if !present(&self.path) {
          return Err(invalid("path is required"));
        }
        if self.owner.is_some() || self.repo.is_some() || self.url.is_some() || self.ref_.is_some() {
          return Err(invalid("only path is allowed"));
        }
      }
      SourceType::Tarball => {
        let url = self.url.as_deref().unwrap_or_default();
        if !(url.starts_with("https://") || url.starts_with("http://")) {
          return Err(invalid("url must be http(s)"));
        }
        if self.owner.is_some() || self.repo.is_some() || self.path.is_some() || self.ref_.is_some() {
          return Err(invalid("only url is allowed"));
        }
      }
    }
    if self.ref_.as_deref().is_some_and(|r| r.trim().is_empty()) {
      return Err(invalid("ref must not be empty"));
    }
    Ok(())
  }

  /// Remote URL to clone or download from, if the locator has one.
  pub fn fetch_url(&self) -> Option<String> {
    match self.type_ {
      SourceType::Github => Some(format!(
        "https://github.com/{}/{}.git",
        self.owner.as_deref().unwrap_or_default(),
        self.repo.as_deref().unwrap_or_default()
      )),
      SourceType::Git | SourceType::Tarball => self.url.clone(),
      SourceType::Path => None,
    }
  }
}

impl fmt::Display for Locator {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let field = |v: &Option<String>| v.clone().unwrap_or_default();
    match self.type_ {
      SourceType::Github => {
        write!(f, "github:{}/{}", field(&self.owner), field(&self.repo))?;
        if let Some(r) = &self.ref_ {
          write!(f, "/{r}")?;
        }
        Ok(())
      }
      SourceType::Git => {
        write!(f, "git:{}", field(&self.url))?;
        if let Some(r) = &self.ref_ {
          write!(f, "#{r}")?;
        }
        Ok(())
      }
      SourceType::Path => write!(f, "path:{}", field(&self.path)),
      SourceType::Tarball => write!(f, "tarball:{}", field(&self.url)),
    }
  }
}

impl FromStr for Locator {
  type Err = LocatorError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let s = s.trim();
    let (kind, rest) = s.split_once(':').ok_or_else(|| LocatorError::MissingType(s.to_string()))?;

    let locator = match kind {
      "github" => {
        let mut parts = rest.splitn(3, '/');
        let owner = parts.next().unwrap_or_default();
        let repo = parts.next().unwrap_or_default();
        let ref_ = parts.next().filter(|r| !r.is_empty());
        Locator::github(owner, repo, ref_)
      }
      "git" => match rest.rsplit_once('#') {
        Some((url, ref_)) => Locator::git(url, Some(ref_)),
        None => Locator::git(rest, None),
      },
      "path" => Locator::path(rest),
      "tarball" => Locator::tarball(rest),
      // Bare URLs: "https://host/x.tar.gz" splits as ("https", "//host/...").
      "http" | "https" if is_archive_url(s) => Locator::tarball(s),
      "http" | "https" => return Err(LocatorError::MissingType(s.to_string())),
      other => return Err(LocatorError::UnknownType(other.to_string())),
    };

    locator.validate()?;
    Ok(locator)
  }
}

fn is_archive_url(url: &str) -> bool {
  let path = url.split(['?', '#']).next().unwrap_or(url);
  path.ends_with(".tar.gz") || path.ends_with(".tgz")
}
