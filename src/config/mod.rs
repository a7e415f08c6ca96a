//! Configuration system for netfence.
//!
//! This module provides TOML configuration loading with hierarchy merging
//! and the validation step that turns the merged file into runtime types.
//!
//! # Configuration Hierarchy
//!
//! Configuration is loaded from multiple sources and merged in order:
//!
//! 1. System config: `/etc/netfence/config.toml`
//! 2. User config: `~/.config/netfence/config.toml`
//! 3. Additional config file (via `--config` flag)
//! 4. CLI flags (highest priority)
//!
//! At least one configuration file must exist.
//!
//! # Merge Behavior
//!
//! - **Lists** (`[[allow]]`, `[[services]]`) are **merged** (appended)
//! - **Scalars** (ttl, log_level, etc.) are **overridden**
//!
//! # Example
//!
//! ```toml
//! [resolver]
//! listen = "10.100.1.2:53"
//!
//! [[allow]]
//! domain = "github.com"
//! proxy_address = "10.100.1.10"
//!
//! [[services]]
//! name = "github"
//! listen = "10.100.1.10:443"
//! upstream = "github.com:443"
//! ```

mod error;
mod loader;
mod schema;
mod validate;

pub use error::ConfigError;
pub use loader::{ConfigLoader, SYSTEM_CONFIG_PATH};
pub use schema::{
    AllowEntry, AuditConfig, AuditSinkKind, Config, GeneralConfig, IsolationConfig,
    ResolverConfig, ServiceConfig, TlsConfig,
};
pub use validate::{ResolvedConfig, validate};
