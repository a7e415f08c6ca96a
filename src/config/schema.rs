//! Configuration schema definitions.
//!
//! This module defines the structure of the netfence configuration files.
//! Every scalar is optional so that files can be layered: a later file only
//! overrides what it actually sets. Defaults are applied during validation
//! (see [`super::validate`]), not here.

use crate::dns::NonAddressPolicy;
use crate::isolation::IsolationMode;
use crate::proxy::TlsPolicy;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Top-level configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Optional hosts-style allowlist file.
    ///
    /// Relative paths are resolved against the directory of the config file
    /// that named them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowlist_file: Option<PathBuf>,

    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Resolver settings.
    #[serde(default)]
    pub resolver: ResolverConfig,

    /// Network isolation contract.
    #[serde(default)]
    pub isolation: IsolationConfig,

    /// Audit log sink.
    #[serde(default)]
    pub audit: AuditConfig,

    /// TLS termination settings.
    #[serde(default)]
    pub tls: TlsConfig,

    /// Inline allowlist entries.
    #[serde(default)]
    pub allow: Vec<AllowEntry>,

    /// Proxy services.
    #[serde(default)]
    pub services: Vec<ServiceConfig>,
}

impl Config {
    /// Merge another config into this one.
    ///
    /// Lists (`allow`, `services`) are appended.
    /// Scalars are overridden when the other config sets them.
    pub fn merge(&mut self, other: Config) {
        if other.allowlist_file.is_some() {
            self.allowlist_file = other.allowlist_file;
        }
        self.general.merge(other.general);
        self.resolver.merge(other.resolver);
        self.isolation.merge(other.isolation);
        self.audit.merge(other.audit);
        self.tls.merge(other.tls);
        self.allow.extend(other.allow);
        self.services.extend(other.services);
    }
}

/// General application settings.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct GeneralConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
}

impl GeneralConfig {
    fn merge(&mut self, other: GeneralConfig) {
        if other.log_level.is_some() {
            self.log_level = other.log_level;
        }
    }
}

/// Filtering resolver settings.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ResolverConfig {
    /// UDP and TCP listen address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listen: Option<SocketAddr>,

    /// Health endpoint listen address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_listen: Option<SocketAddr>,

    /// TTL of synthesized answers, in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u32>,

    /// Bound on one query, including any upstream exchange.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_timeout_ms: Option<u64>,

    /// What to do with MX/TXT/... queries for allowed names.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub non_address_queries: Option<NonAddressPolicy>,

    /// Upstream resolver for `non_address_queries = "forward"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream: Option<SocketAddr>,
}

impl ResolverConfig {
    fn merge(&mut self, other: ResolverConfig) {
        if other.listen.is_some() {
            self.listen = other.listen;
        }
        if other.health_listen.is_some() {
            self.health_listen = other.health_listen;
        }
        if other.ttl.is_some() {
            self.ttl = other.ttl;
        }
        if other.query_timeout_ms.is_some() {
            self.query_timeout_ms = other.query_timeout_ms;
        }
        if other.non_address_queries.is_some() {
            self.non_address_queries = other.non_address_queries;
        }
        if other.upstream.is_some() {
            self.upstream = other.upstream;
        }
    }
}

/// Isolation contract settings.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct IsolationConfig {
    /// `filtered` or `offline`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<IsolationMode>,

    /// CIDR every resolver and proxy address must fall inside.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet: Option<String>,
}

impl IsolationConfig {
    fn merge(&mut self, other: IsolationConfig) {
        if other.mode.is_some() {
            self.mode = other.mode;
        }
        if other.subnet.is_some() {
            self.subnet = other.subnet;
        }
    }
}

/// Where audit records go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditSinkKind {
    /// Append to `audit.path`.
    File,
    /// Standard output.
    Stdout,
    /// Local syslog daemon.
    Syslog,
    /// Discard.
    Null,
}

/// Audit log settings.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AuditConfig {
    /// Sink kind.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sink: Option<AuditSinkKind>,

    /// File path for the `file` sink.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl AuditConfig {
    fn merge(&mut self, other: AuditConfig) {
        if other.sink.is_some() {
            self.sink = other.sink;
        }
        if other.path.is_some() {
            self.path = other.path;
        }
    }
}

/// TLS termination settings.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Where to write the ephemeral CA certificate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_cert_out: Option<PathBuf>,
}

impl TlsConfig {
    fn merge(&mut self, other: TlsConfig) {
        if other.ca_cert_out.is_some() {
            self.ca_cert_out = other.ca_cert_out;
        }
    }
}

/// One `[[allow]]` entry, as written.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct AllowEntry {
    /// Domain, any case, optional trailing dot.
    pub domain: String,

    /// Address the domain resolves to.
    pub proxy_address: String,

    /// Service expected to listen on `proxy_address`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_tag: Option<String>,

    /// TLS policy the serving route must enforce.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_policy: Option<TlsPolicy>,
}

/// One `[[services]]` entry, as written.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ServiceConfig {
    /// Unique service name.
    pub name: String,

    /// Listen socket; its IP must be an allowlist proxy address.
    pub listen: SocketAddr,

    /// Upstream `host:port`, resolved once at load time.
    pub upstream: String,

    /// TLS handling.
    #[serde(default = "default_tls_policy")]
    pub tls_policy: TlsPolicy,

    /// Extra SNI names accepted by a terminating route.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hostnames: Vec<String>,

    /// Relay idle timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idle_timeout_secs: Option<u64>,

    /// Upstream connect timeout in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect_timeout_ms: Option<u64>,
}

fn default_tls_policy() -> TlsPolicy {
    TlsPolicy::Passthrough
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let config: Config = toml::from_str(
            r#"
            allowlist_file = "hosts.allowlist"

            [general]
            log_level = "debug"

            [resolver]
            listen = "10.100.1.2:53"
            health_listen = "10.100.1.2:8080"
            ttl = 60
            non_address_queries = "forward"
            upstream = "1.1.1.1:53"

            [isolation]
            mode = "offline"
            subnet = "10.100.1.0/24"

            [audit]
            sink = "file"
            path = "/var/log/netfence/queries.jsonl"

            [[allow]]
            domain = "github.com"
            proxy_address = "10.100.1.10"
            service_tag = "github"
            tls_policy = "passthrough"

            [[services]]
            name = "github"
            listen = "10.100.1.10:443"
            upstream = "github.com:443"
            tls_policy = "terminate-and-check-sni"
            hostnames = ["api.github.com"]
            "#,
        )
        .unwrap();

        assert_eq!(config.allowlist_file, Some(PathBuf::from("hosts.allowlist")));
        assert_eq!(config.general.log_level.as_deref(), Some("debug"));
        assert_eq!(config.resolver.ttl, Some(60));
        assert_eq!(
            config.resolver.non_address_queries,
            Some(NonAddressPolicy::Forward)
        );
        assert_eq!(config.isolation.mode, Some(IsolationMode::Offline));
        assert_eq!(config.audit.sink, Some(AuditSinkKind::File));
        assert_eq!(config.allow[0].tls_policy, Some(TlsPolicy::Passthrough));
        assert_eq!(config.services[0].tls_policy, TlsPolicy::TerminateCheckSni);
        assert_eq!(config.services[0].idle_timeout_secs, None);
    }

    #[test]
    fn test_service_defaults_to_passthrough() {
        let config: Config = toml::from_str(
            r#"
            [[services]]
            name = "pypi"
            listen = "10.100.1.15:443"
            upstream = "pypi.org:443"
            "#,
        )
        .unwrap();
        assert_eq!(config.services[0].tls_policy, TlsPolicy::Passthrough);
        assert!(config.services[0].hostnames.is_empty());
    }

    #[test]
    fn test_unknown_policy_rejected() {
        let result: Result<Config, _> = toml::from_str(
            r#"
            [[allow]]
            domain = "github.com"
            proxy_address = "10.100.1.10"
            tls_policy = "inspect"
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_merge_appends_lists_and_overrides_scalars() {
        let mut base: Config = toml::from_str(
            r#"
            [resolver]
            ttl = 30
            listen = "10.100.1.2:53"

            [[allow]]
            domain = "github.com"
            proxy_address = "10.100.1.10"
            "#,
        )
        .unwrap();
        let overlay: Config = toml::from_str(
            r#"
            [resolver]
            ttl = 5

            [[allow]]
            domain = "pypi.org"
            proxy_address = "10.100.1.15"
            "#,
        )
        .unwrap();

        base.merge(overlay);
        assert_eq!(base.resolver.ttl, Some(5));
        assert_eq!(base.resolver.listen, Some("10.100.1.2:53".parse().unwrap()));
        let domains: Vec<&str> = base.allow.iter().map(|e| e.domain.as_str()).collect();
        assert_eq!(domains, vec!["github.com", "pypi.org"]);
    }
}
