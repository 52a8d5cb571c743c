pub mod arch;
pub mod os;
pub mod paths;

use arch::Arch;
use os::Os;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Platform identifier combining architecture and OS (e.g., "aarch64-darwin")
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Platform {
  pub arch: Arch,
  pub os: Os,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown platform '{0}' (expected <arch>-<os>, e.g. x86_64-linux)")]
pub struct ParsePlatformError(pub String);

impl Platform {
  /// Create a new platform identifier
  pub fn new(arch: Arch, os: Os) -> Self {
    Self { arch, os }
  }

  /// Detect the current platform at runtime
  ///
  /// Returns `None` if the OS or architecture is not supported
  pub fn current() -> Option<Self> {
    Some(Self {
      arch: Arch::current()?,
      os: Os::current()?,
    })
  }

  /// Every platform tether knows how to name.
  pub fn all() -> impl Iterator<Item = Platform> {
    Os::ALL
      .into_iter()
      .flat_map(|os| Arch::ALL.into_iter().map(move |arch| Platform::new(arch, os)))
  }

  /// Returns the platform triple string (e.g., "aarch64-darwin")
  pub fn triple(&self) -> String {
    format!("{}-{}", self.arch, self.os)
  }
}

impl fmt::Display for Platform {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.triple())
  }
}

impl FromStr for Platform {
  type Err = ParsePlatformError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let (arch, os) = s.split_once('-').ok_or_else(|| ParsePlatformError(s.to_string()))?;
    match (Arch::parse(arch), Os::parse(os)) {
      (Some(arch), Some(os)) => Ok(Platform::new(arch, os)),
      _ => Err(ParsePlatformError(s.to_string())),
    }
  }
}

impl Serialize for Platform {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&self.triple())
  }
}

impl<'de> Deserialize<'de> for Platform {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    let s = String::deserialize(deserializer)?;
    s.parse().map_err(serde::de::Error::custom)
  }
}

/// Returns the platform triple for the current system (e.g., "aarch64-darwin")
///
/// Returns `None` if the current platform is not supported
pub fn platform_triple() -> Option<String> {
  Platform::current().map(|p| p.triple())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn platform_triple_format() {
    let platform = Platform::new(Arch::Aarch64, Os::MacOs);
    assert_eq!(platform.triple(), "aarch64-darwin");

    let platform = Platform::new(Arch::X86_64, Os::Linux);
    assert_eq!(platform.triple(), "x86_64-linux");
  }

  #[test]
  fn parse_accepts_every_known_triple() {
    for platform in Platform::all() {
      assert_eq!(platform.triple().parse::<Platform>().unwrap(), platform);
    }
    assert_eq!(Platform::all().count(), 6);
  }

  #[test]
  fn parse_rejects_unknown() {
    assert!("riscv64-linux".parse::<Platform>().is_err());
    assert!("x86_64".parse::<Platform>().is_err());
    assert!("x86_64-plan9".parse::<Platform>().is_err());
  }

  #[test]
  fn serializes_as_triple_string() {
    let json = serde_json::to_string(&Platform::new(Arch::X86_64, Os::Linux)).unwrap();
    assert_eq!(json, "\"x86_64-linux\"");
    let back: Platform = serde_json::from_str("\"aarch64-darwin\"").unwrap();
    assert_eq!(back, Platform::new(Arch::Aarch64, Os::MacOs));
  }
}
