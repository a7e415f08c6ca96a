//! Domain allowlist: the table that decides which names the sandbox may resolve.
//!
//! The store is built once from configuration (inline `[[allow]]` tables and
//! an optional hosts-style file) and never mutated afterwards. Hot reload
//! goes through [`SharedAllowlist`], which swaps a whole new store in one
//! step.

mod error;
mod hosts;
mod store;

pub use error::AllowlistError;
pub use hosts::parse_hosts;
pub use store::{AllowlistEntry, AllowlistStore, SharedAllowlist, normalize_domain};
