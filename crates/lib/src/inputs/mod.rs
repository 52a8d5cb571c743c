//! Input resolution and management.
//!
//! Inputs are the external sources a `tether.toml` declares: GitHub
//! repositories, git URLs, tarballs and local paths. Each may declare inputs
//! of its own, and `follows` lets a consumer bind those to instances it
//! already has.
//!
//! # Modules
//!
//! - [`source`] - Locator parsing and canonical rendering
//! - [`types`] - Declarations, pins and the resolved graph
//! - [`graph`] - Follow graph validation and wave ordering
//! - [`lock`] - Lock file management for reproducible resolution
//! - [`store`] - Content-addressed store for fetched trees
//! - [`fetch`] - Git, tarball and path fetching
//! - [`retry`] - Backoff for transient fetch failures
//! - [`resolve`] - High-level resolution orchestration

pub mod fetch;
pub mod graph;
pub mod lock;
pub mod resolve;
pub mod retry;
pub mod source;
pub mod store;
mod tarball;
mod types;

pub use types::*;
