//! Proxy router: the only egress path out of the sandbox.
//!
//! Each allowlisted service has a route bound to its private proxy address.
//! A connection to that address is relayed to the route's fixed upstream
//! and nowhere else.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────── isolated subnet ───────────────────────────┐
//! │                                                                         │
//! │  ┌───────┐  DNS   ┌──────────────┐                                      │
//! │  │ Agent │───────▶│   Resolver   │  github.com -> 10.100.1.10           │
//! │  └───┬───┘        │ (10.100.1.2) │                                      │
//! │      │            └──────────────┘                                      │
//! │      │ TCP 10.100.1.10:443                                              │
//! │      ▼                                                                  │
//! │  ┌──────────────────┐                                                   │
//! │  │ Route "github"   │── passthrough | terminate + SNI check ──┐         │
//! │  │ (10.100.1.10)    │                                         │         │
//! │  └──────────────────┘                                         │         │
//! └───────────────────────────────────────────────────────────────┼─────────┘
//!                                                                 ▼
//!                                                        github.com:443
//! ```

pub mod ca;
pub mod error;
pub mod relay;
pub mod route;
pub mod server;
pub mod tls;

pub use ca::{CaError, EphemeralCa};
pub use error::ProxyError;
pub use relay::{CloseReason, RelayStats, relay};
pub use route::{ProxyRoute, RouteTable, RouteTls, TlsPolicy};
pub use server::ProxyRouter;
pub use tls::{CertificateCache, TlsTerminator, native_roots};
