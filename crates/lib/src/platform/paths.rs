use crate::consts::APP_NAME;
use std::path::PathBuf;

/// Overrides the cache root (content store and scratch space).
pub const CACHE_DIR_ENV: &str = "TETHER_CACHE_DIR";

/// Overrides the data root (garbage collection roots).
pub const DATA_DIR_ENV: &str = "TETHER_DATA_DIR";

fn env_path(var: &str) -> Option<PathBuf> {
  std::env::var_os(var).filter(|v| !v.is_empty()).map(PathBuf::from)
}

/// Returns the user's home directory
#[cfg(windows)]
pub fn home_dir() -> PathBuf {
  env_path("USERPROFILE").unwrap_or_else(|| PathBuf::from("."))
}

/// Returns the user's home directory
#[cfg(not(windows))]
pub fn home_dir() -> PathBuf {
  env_path("HOME").unwrap_or_else(|| PathBuf::from("."))
}

/// Returns the directory for data files for the application
#[cfg(windows)]
pub fn data_dir() -> PathBuf {
  if let Some(dir) = env_path(DATA_DIR_ENV) {
    return dir;
  }
  env_path("APPDATA").unwrap_or_else(home_dir).join(APP_NAME)
}

/// Returns the directory for data files for the application
#[cfg(not(windows))]
pub fn data_dir() -> PathBuf {
  if let Some(dir) = env_path(DATA_DIR_ENV) {
    return dir;
  }
  let data_home = env_path("XDG_DATA_HOME").unwrap_or_else(|| home_dir().join(".local").join("share"));
  data_home.join(APP_NAME)
}

/// Returns the directory for cache files for the application
#[cfg(windows)]
pub fn cache_dir() -> PathBuf {
  if let Some(dir) = env_path(CACHE_DIR_ENV) {
    return dir;
  }
  env_path("LOCALAPPDATA")
    .unwrap_or_else(home_dir)
    .join(APP_NAME)
    .join("Cache")
}

/// Returns the directory for cache files for the application
#[cfg(not(windows))]
pub fn cache_dir() -> PathBuf {
  if let Some(dir) = env_path(CACHE_DIR_ENV) {
    return dir;
  }
  let cache_home = env_path("XDG_CACHE_HOME").unwrap_or_else(|| home_dir().join(".cache"));
  cache_home.join(APP_NAME)
}

/// Content-addressed store holding fetched sources and build artifacts.
pub fn store_dir() -> PathBuf {
  cache_dir().join("store")
}

/// Registry of lock files whose inputs survive garbage collection.
pub fn roots_file() -> PathBuf {
  data_dir().join("roots.json")
}
