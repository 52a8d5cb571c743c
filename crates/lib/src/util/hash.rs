//! Hashing utilities for content-addressed storage and verification.
//!
//! - `ContentHash`: a 64-character SHA-256 identifying store content
//! - `hash_directory()`: deterministic directory hashing
//! - `hash_file()` / `hash_bytes()`: single file and byte hashing

use std::fmt;
use std::fs;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

/// Prefix used when a content hash is written to a lock file.
const NAR_PREFIX: &str = "sha256-";

/// A full 64-character SHA-256 hash of store content.
///
/// # Format
///
/// Lowercase hexadecimal. Lock files carry it as `sha256-<hex>`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContentHash(pub String);

impl ContentHash {
  /// Parse a bare 64-character hex digest.
  pub fn parse(hex: &str) -> Option<Self> {
    let valid = hex.len() == 64 && hex.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
    valid.then(|| ContentHash(hex.to_string()))
  }

  /// Parse the `sha256-<hex>` form stored in lock files.
  pub fn from_nar(nar: &str) -> Option<Self> {
    nar.strip_prefix(NAR_PREFIX).and_then(Self::parse)
  }

  /// Render the `sha256-<hex>` form stored in lock files.
  pub fn to_nar(&self) -> String {
    format!("{NAR_PREFIX}{}", self.0)
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for ContentHash {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// Error during directory hashing.
#[derive(Debug, thiserror::Error)]
pub enum DirHashError {
  #[error("failed to walk directory: {message}")]
  WalkDir { message: String },

  #[error("failed to read file {path}: {message}")]
  ReadFile { path: String, message: String },

  #[error("failed to read symlink {path}: {message}")]
  ReadSymlink { path: String, message: String },
}

#[cfg(unix)]
fn is_executable(metadata: &fs::Metadata) -> bool {
  use std::os::unix::fs::PermissionsExt;
  metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_metadata: &fs::Metadata) -> bool {
  false
}

/// Compute a deterministic hash of a directory's contents.
///
/// The hash covers file contents, the executable bit, directory structure
/// and symlink targets. Timestamps, owners and other permission bits are
/// ignored, and relative paths always use `/` so the digest is the same on
/// every platform. Entries named in `exclude` are skipped at any depth.
pub fn hash_directory(path: &Path, exclude: &[&str]) -> Result<ContentHash, DirHashError> {
  let mut entries: Vec<(String, String)> = Vec::new();

  let walker = WalkDir::new(path).sort_by_file_name().into_iter().filter_entry(|e| {
    e.file_name()
      .to_str()
      .map(|name| !exclude.contains(&name))
      .unwrap_or(true)
  });

  for entry in walker {
    let entry = entry.map_err(|e| DirHashError::WalkDir { message: e.to_string() })?;
    let entry_path = entry.path();

    let rel_path = entry_path
      .strip_prefix(path)
      .unwrap_or(entry_path)
      .to_string_lossy()
      .replace('\\', "/");

    // The root itself
    if rel_path.is_empty() {
      continue;
    }

    let file_type = entry.file_type();
    let entry_hash = if file_type.is_file() {
      let metadata = entry.metadata().map_err(|e| DirHashError::WalkDir { message: e.to_string() })?;
      let content_hash = hash_file(entry_path)?;
      let mode = if is_executable(&metadata) { "x" } else { "-" };
      format!("F:{}:{}:{}", rel_path, mode, content_hash.0)
    } else if file_type.is_dir() {
      format!("D:{}", rel_path)
    } else if file_type.is_symlink() {
      let target = fs::read_link(entry_path).map_err(|e| DirHashError::ReadSymlink {
        path: entry_path.display().to_string(),
        message: e.to_string(),
      })?;
      let target_hash = hash_bytes(target.to_string_lossy().as_bytes());
      format!("L:{}:{}", rel_path, target_hash.0)
    } else {
      // Sockets, devices and the like
      continue;
    };

    entries.push((rel_path, entry_hash));
  }

  entries.sort_by(|a, b| a.0.cmp(&b.0));

  let mut hasher = Sha256::new();
  for (_, entry_hash) in entries {
    hasher.update(entry_hash.as_bytes());
    hasher.update(b"\n");
  }

  Ok(ContentHash(format!("{:x}", hasher.finalize())))
}

/// Hash a file's contents.
pub fn hash_file(path: &Path) -> Result<ContentHash, DirHashError> {
  let mut file = fs::File::open(path).map_err(|e| DirHashError::ReadFile {
    path: path.display().to_string(),
    message: e.to_string(),
  })?;

  let mut hasher = Sha256::new();
  let mut buffer = [0u8; 8192];

  loop {
    let bytes_read = file.read(&mut buffer).map_err(|e| DirHashError::ReadFile {
      path: path.display().to_string(),
      message: e.to_string(),
    })?;
    if bytes_read == 0 {
      break;
    }
    hasher.update(&buffer[..bytes_read]);
  }

  Ok(ContentHash(format!("{:x}", hasher.finalize())))
}

/// Hash arbitrary bytes.
pub fn hash_bytes(data: &[u8]) -> ContentHash {
  let mut hasher = Sha256::new();
  hasher.update(data);
  ContentHash(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::fs;
  use std::path::Path;
  use tempfile::tempdir;

  fn create_symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    #[cfg(unix)]
    {
      std::os::unix::fs::symlink(target, link)
    }
    #[cfg(windows)]
    {
      if target.is_dir() {
        std::os::windows::fs::symlink_dir(target, link)
      } else {
        std::os::windows::fs::symlink_file(target, link)
      }
    }
  }

  mod content_hash {
    use super::*;

    #[test]
    fn nar_form_round_trips() {
      let hash = hash_bytes(b"tether");
      let nar = hash.to_nar();
      assert!(nar.starts_with("sha256-"));
      assert_eq!(ContentHash::from_nar(&nar), Some(hash));
    }

    #[test]
    fn rejects_malformed_digests() {
      assert_eq!(ContentHash::from_nar("sha256-abc"), None);
      assert_eq!(ContentHash::from_nar(&"A".repeat(64)), None);
      assert_eq!(ContentHash::parse(&"g".repeat(64)), None);
      assert_eq!(ContentHash::from_nar(&format!("sha1-{}", "a".repeat(64))), None);
    }
  }

  mod directories {
    use super::*;

    #[test]
    fn hash_empty_directory() {
      let temp = tempdir().unwrap();
      let hash = hash_directory(temp.path(), &[]).unwrap();
      assert_eq!(hash.0.len(), 64);
    }

    #[test]
    fn hash_is_deterministic() {
      let temp = tempdir().unwrap();
      fs::write(temp.path().join("a.txt"), "content a").unwrap();
      fs::write(temp.path().join("b.txt"), "content b").unwrap();

      let hash1 = hash_directory(temp.path(), &[]).unwrap();
      let hash2 = hash_directory(temp.path(), &[]).unwrap();

      assert_eq!(hash1, hash2);
    }

    #[test]
    fn identical_trees_in_different_places_hash_equal() {
      let one = tempdir().unwrap();
      let two = tempdir().unwrap();
      for dir in [one.path(), two.path()] {
        fs::create_dir(dir.join("src")).unwrap();
        fs::write(dir.join("src/main.rs"), "fn main() {}").unwrap();
      }
      assert_eq!(
        hash_directory(one.path(), &[]).unwrap(),
        hash_directory(two.path(), &[]).unwrap()
      );
    }

    #[test]
    fn hash_changes_with_content() {
      let temp = tempdir().unwrap();
      fs::write(temp.path().join("file.txt"), "original").unwrap();
      let hash1 = hash_directory(temp.path(), &[]).unwrap();

      fs::write(temp.path().join("file.txt"), "modified").unwrap();
      let hash2 = hash_directory(temp.path(), &[]).unwrap();

      assert_ne!(hash1, hash2);
    }

    #[cfg(unix)]
    #[test]
    fn hash_changes_with_executable_bit() {
      use std::os::unix::fs::PermissionsExt;

      let temp = tempdir().unwrap();
      let script = temp.path().join("run.sh");
      fs::write(&script, "#!/bin/sh\n").unwrap();
      fs::set_permissions(&script, fs::Permissions::from_mode(0o644)).unwrap();
      let plain = hash_directory(temp.path(), &[]).unwrap();

      fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
      let executable = hash_directory(temp.path(), &[]).unwrap();

      assert_ne!(plain, executable);
    }

    #[test]
    fn hash_includes_symlinks() {
      let temp = tempdir().unwrap();
      fs::write(temp.path().join("target.txt"), "target content").unwrap();
      let before = hash_directory(temp.path(), &[]).unwrap();

      create_symlink(Path::new("target.txt"), &temp.path().join("link")).unwrap();
      let after = hash_directory(temp.path(), &[]).unwrap();

      assert_ne!(before, after);
    }

    #[test]
    fn hash_respects_exclusions() {
      let temp = tempdir().unwrap();
      fs::write(temp.path().join("file.txt"), "content").unwrap();
      let hash1 = hash_directory(temp.path(), &[]).unwrap();

      fs::create_dir(temp.path().join(".git")).unwrap();
      fs::write(temp.path().join(".git/HEAD"), "ref: refs/heads/main").unwrap();

      let hash2 = hash_directory(temp.path(), &[".git"]).unwrap();
      assert_eq!(hash1, hash2);
    }

    #[test]
    fn same_content_different_structure_different_hash() {
      let temp1 = tempdir().unwrap();
      fs::write(temp1.path().join("file.txt"), "content").unwrap();

      let temp2 = tempdir().unwrap();
      fs::create_dir(temp2.path().join("subdir")).unwrap();
      fs::write(temp2.path().join("subdir/file.txt"), "content").unwrap();

      let hash1 = hash_directory(temp1.path(), &[]).unwrap();
      let hash2 = hash_directory(temp2.path(), &[]).unwrap();

      assert_ne!(hash1, hash2);
    }
  }

  #[test]
  fn hash_file_matches_hash_bytes() {
    let temp = tempdir().unwrap();
    let file_path = temp.path().join("test.txt");
    fs::write(&file_path, "hello world").unwrap();

    assert_eq!(hash_file(&file_path).unwrap(), hash_bytes(b"hello world"));
  }
}
