//! Filtering DNS resolver.
//!
//! Answers only for allowlisted names, always with the name's proxy address.
//! Everything else gets NXDOMAIN.
//!
//! - [`wire`]: message codec
//! - [`engine`]: per-query decisions and audit
//! - [`server`]: UDP/TCP listen loops
//! - [`health`]: `GET /health` liveness endpoint
//! - [`client`]: stub client for the CLI and tests

pub mod client;
pub mod engine;
pub mod error;
pub mod health;
pub mod server;
pub mod wire;

pub use client::{DnsClient, QueryOutcome};
pub use engine::{
    NonAddressPolicy, ResolutionDecision, ResolutionRequest, ResolverEngine, ResolverSettings,
};
pub use error::DnsError;
pub use health::{HealthServer, Readiness};
pub use server::DnsServer;
pub use wire::{RecordType, ResponseCode};
