//! Network isolation contract.
//!
//! Describes which addresses the sandboxed agent can reach: the resolver
//! and the proxy listen addresses in `filtered` mode, nothing in `offline`
//! mode. Enforcement belongs to the network namespace set up around the
//! agent; this module validates the addressing and renders `resolv.conf`.

mod error;
mod policy;
mod subnet;

pub use error::IsolationError;
pub use policy::{IsolationMode, IsolationPolicy};
pub use subnet::Subnet;
