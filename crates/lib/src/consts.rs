/// Application name used for cache and data directories.
pub const APP_NAME: &str = "tether";

/// Declaration file looked up in the project directory and in fetched inputs.
pub const MANIFEST_FILENAME: &str = "tether.toml";

/// Lock file written next to the declaration file.
pub const LOCK_FILENAME: &str = "tether.lock";

/// Node label of the declaring project inside a lock file.
pub const ROOT_NODE: &str = "root";

/// Revision recorded for `path:` inputs.
pub const LOCAL_REV: &str = "local";

/// Fixed timestamp exported to builds (1980-01-01T00:00:00Z).
pub const SOURCE_DATE_EPOCH: u64 = 315_532_800;
