//! netfence: filtering resolver and proxy router for sandboxed agents
//!
//! This crate confines an untrusted automated agent to a curated set of
//! remote services. The agent's DNS goes to a filtering resolver that
//! answers only for allowlisted domains, handing back a dedicated proxy
//! address for each; every other name is NXDOMAIN. Each proxy address is
//! served by a route that relays to exactly one real upstream.
//!
//! # Security Model
//!
//! The model is **fail-closed**: a name that is not listed verbatim does
//! not resolve, and a blocked name is indistinguishable from a nonexistent
//! one. Reachability of anything else is the network topology's job (see
//! [`isolation`]); this crate never sees such traffic.
//!
//! # Architecture
//!
//! - **Allowlist**: exact-match domain table, atomically swappable on reload
//! - **DNS**: resolver engine, UDP/TCP listeners, health endpoint, stub client
//! - **Proxy**: per-service routes, duplex relay, SNI-checking TLS termination
//! - **Isolation**: the reachability contract and `resolv.conf` rendering
//! - **Config**: hierarchical TOML configuration and startup validation
//! - **Telemetry**: serialized JSON-lines audit log

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod allowlist;
pub mod cli;
pub mod cli_handler;
pub mod config;
pub mod dns;
pub mod isolation;
pub mod proxy;
pub mod service;
pub mod telemetry;
