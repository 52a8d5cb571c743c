//! tether-lib: dependency locking and per-platform output composition.
//!
//! - `inputs`: declared inputs, follow graphs, fetching, the content store
//!   and the lock file
//! - `compose`: turns a resolved graph and output declarations into an
//!   [`outputs::OutputRegistry`]
//! - `execute`: builds packages, runs checks and enters dev shells
//! - `project`: ties the above to a `tether.toml` on disk

pub mod compose;
pub mod consts;
pub mod error;
pub mod execute;
pub mod gc;
pub mod inputs;
pub mod manifest;
pub mod outputs;
pub mod platform;
pub mod project;
pub mod store_lock;
pub mod update;
pub mod util;
