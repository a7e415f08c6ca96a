//! Audit logging.
//!
//! Two separate concerns, never mixed:
//!
//! - **Audit records** go through an injected [`AuditLogger`]: one JSON line
//!   per resolution decision and per proxy connection outcome.
//! - **Diagnostics** go to stderr via `tracing`.
//!
//! # Event Format
//!
//! ```json
//! {"ts":"2026-01-07T14:32:01Z","event":"dns_query","query_name":"github.com","query_type":"A","client":"10.100.1.20:5353","decision":"allow","resolved_address":"10.100.1.10"}
//! ```

mod error;
mod events;
mod logger;

pub use error::TelemetryError;
pub use events::{AuditEvent, Decision, RejectReason};
pub use logger::{AuditLogger, AuditTarget, MemoryAudit, SYSLOG_TAG};
