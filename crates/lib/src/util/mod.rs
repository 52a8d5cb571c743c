//! Shared utilities.
//!
//! Content hashing, plus test helpers.

pub mod hash;

#[cfg(test)]
pub mod testutil;
