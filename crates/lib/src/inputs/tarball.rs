//! `tarball:` inputs: download a `.tar.gz` and unpack it.
//!
//! The revision of a tarball input is the SHA-256 of the archive bytes. When
//! every entry sits below one top-level directory (as in GitHub release
//! archives), that directory is stripped.

use std::fs;
use std::io::{self, Cursor, Read};
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use sha2::{Digest, Sha256};
use tar::Archive;
use tracing::{debug, info};

use super::fetch::{FetchError, Fetched};

/// Download `url` and unpack it into `dest`.
pub fn fetch_tarball(client: &reqwest::blocking::Client, url: &str, dest: &Path) -> Result<Fetched, FetchError> {
  info!(url, "downloading archive");

  let response = client.get(url).send().map_err(|e| FetchError::Http {
    url: url.to_string(),
    message: e.to_string(),
    retryable: e.is_timeout() || e.is_connect() || e.is_request() || e.is_body(),
  })?;

  let status = response.status();
  if !status.is_success() {
    return Err(FetchError::Status {
      url: url.to_string(),
      status: status.as_u16(),
    });
  }

  let bytes = response.bytes().map_err(|e| FetchError::Http {
    url: url.to_string(),
    message: e.to_string(),
    retryable: true,
  })?;

  let rev = hex::encode(Sha256::digest(&bytes));
  unpack_tar_gz(&bytes, dest).map_err(|source| FetchError::Unpack {
    url: url.to_string(),
    source,
  })?;

  debug!(url, rev = %rev, size = bytes.len(), "unpacked archive");
  Ok(Fetched {
    rev,
    last_modified: None,
  })
}

/// Unpack gzip-compressed tar bytes into `dest`.
pub fn unpack_tar_gz(bytes: &[u8], dest: &Path) -> io::Result<()> {
  let strip = common_root(GzDecoder::new(Cursor::new(bytes)))?;

  let mut archive = Archive::new(GzDecoder::new(Cursor::new(bytes)));
  for entry in archive.entries()? {
    let mut entry = entry?;
    let path = entry.path()?.into_owned();
    check_relative(&path)?;

    let stripped: PathBuf = path
      .components()
      .filter(|c| !matches!(c, Component::CurDir))
      .skip(usize::from(strip))
      .collect();
    if stripped.as_os_str().is_empty() {
      continue;
    }

    let dest_path = dest.join(&stripped);
    if let Some(parent) = dest_path.parent() {
      fs::create_dir_all(parent)?;
    }
    entry.unpack(&dest_path)?;
  }
  Ok(())
}

/// Whether all entries share a single top-level directory.
fn common_root<R: Read>(reader: R) -> io::Result<bool> {
  let mut archive = Archive::new(reader);
  let mut root: Option<PathBuf> = None;
  let mut nested = false;

  for entry in archive.entries()? {
    let entry = entry?;
    let path = entry.path()?.into_owned();
    let mut components = path.components().filter(|c| !matches!(c, Component::CurDir));
    let Some(first) = components.next() else {
      continue;
    };
    let first = PathBuf::from(first.as_os_str());
    let has_more = components.next().is_some();

    match &root {
      None => root = Some(first),
      Some(existing) if *existing != first => return Ok(false),
      Some(_) => {}
    }
    if has_more {
      nested = true;
    } else if !entry.header().entry_type().is_dir() {
      // A plain file at the top level.
      return Ok(false);
    }
  }
  Ok(root.is_some() && nested)
}

fn check_relative(path: &Path) -> io::Result<()> {
  let escapes = path
    .components()
    .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)));
  if escapes {
    return Err(io::Error::new(
      io::ErrorKind::InvalidData,
      format!("archive entry escapes destination: {}", path.display()),
    ));
  }
  Ok(())
}
