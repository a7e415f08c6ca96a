//! Turn a merged [`Config`] into validated runtime types.
//!
//! Every cross-field rule lives here. The result either describes a
//! consistent deployment or the process does not start.

use super::error::ConfigError;
use super::schema::{AllowEntry, AuditSinkKind, Config, ServiceConfig};
use crate::allowlist::{AllowlistStore, normalize_domain, parse_hosts};
use crate::dns::{NonAddressPolicy, ResolverSettings};
use crate::isolation::{IsolationPolicy, Subnet};
use crate::proxy::{ProxyRoute, RouteTable, RouteTls, TlsPolicy};
use crate::telemetry::AuditTarget;
use std::collections::BTreeSet;
use std::fs;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, warn};

/// Resolver listen address when none is configured.
pub const DEFAULT_RESOLVER_LISTEN: &str = "127.0.0.1:53";

/// Health endpoint address when none is configured.
pub const DEFAULT_HEALTH_LISTEN: &str = "127.0.0.1:8080";

/// Audit file when `sink = "file"` has no `path`.
pub const DEFAULT_AUDIT_PATH: &str = "/var/log/netfence/queries.jsonl";

/// Relay idle timeout when a service sets none.
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 300;

/// Upstream connect timeout when a service sets none.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5000;

/// Fully validated configuration.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Log level from `[general]`, if set.
    pub log_level: Option<String>,
    /// Allowlist built from `[[allow]]` and `allowlist_file`.
    pub allowlist: AllowlistStore,
    /// Proxy routes.
    pub routes: RouteTable,
    /// Resolver tuning.
    pub resolver: ResolverSettings,
    /// Resolver UDP/TCP address.
    pub resolver_listen: SocketAddr,
    /// Health endpoint address.
    pub health_listen: SocketAddr,
    /// Isolation contract.
    pub isolation: IsolationPolicy,
    /// Audit sink.
    pub audit: AuditTarget,
    /// Where to export the CA certificate.
    pub ca_cert_out: Option<PathBuf>,
}

fn invalid(field: impl Into<String>, message: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.into(),
        message: message.into(),
    }
}

/// Validate a merged configuration.
///
/// Reads `allowlist_file` and resolves service upstreams, so this blocks.
pub fn validate(config: &Config) -> Result<ResolvedConfig, ConfigError> {
    let entries = allow_entries(config)?;
    let allowlist = AllowlistStore::from_config(&entries)?;

    let resolver = resolver_settings(config)?;
    let resolver_listen = parse_default(config.resolver.listen, DEFAULT_RESOLVER_LISTEN)?;
    let health_listen = parse_default(config.resolver.health_listen, DEFAULT_HEALTH_LISTEN)?;

    let routes = config
        .services
        .iter()
        .map(|service| build_route(service, &allowlist))
        .collect::<Result<Vec<_>, _>>()?;
    let routes = RouteTable::new(routes)?;

    check_entries_against_routes(&allowlist, &routes)?;

    let subnet = config
        .isolation
        .subnet
        .as_deref()
        .map(str::parse::<Subnet>)
        .transpose()?;
    let proxy_ips = allowlist
        .entries()
        .into_iter()
        .map(|e| e.proxy_address)
        .chain(routes.iter().map(|r| r.listen_address.ip()));
    let isolation = IsolationPolicy::new(
        config.isolation.mode.unwrap_or_default(),
        subnet,
        resolver_listen,
        proxy_ips,
    )?;

    let audit = match config.audit.sink.unwrap_or(AuditSinkKind::Stdout) {
        AuditSinkKind::File => AuditTarget::File(
            config
                .audit
                .path
                .clone()
                .unwrap_or_else(|| PathBuf::from(DEFAULT_AUDIT_PATH)),
        ),
        AuditSinkKind::Stdout => AuditTarget::Stdout,
        AuditSinkKind::Syslog => AuditTarget::Syslog,
        AuditSinkKind::Null => AuditTarget::Null,
    };

    if routes.needs_tls() && config.tls.ca_cert_out.is_none() {
        warn!("TLS-terminating routes configured but tls.ca_cert_out is unset; agents cannot trust the proxy CA");
    }

    Ok(ResolvedConfig {
        log_level: config.general.log_level.clone(),
        allowlist,
        routes,
        resolver,
        resolver_listen,
        health_listen,
        isolation,
        audit,
        ca_cert_out: config.tls.ca_cert_out.clone(),
    })
}

/// Inline entries followed by the hosts-file entries.
fn allow_entries(config: &Config) -> Result<Vec<AllowEntry>, ConfigError> {
    let mut entries = config.allow.clone();

    if let Some(path) = &config.allowlist_file {
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.clone(),
            source: e,
        })?;
        let from_file = parse_hosts(&contents).map_err(|e| ConfigError::AllowlistFile {
            path: path.clone(),
            source: e,
        })?;
        debug!("Read {} entries from {:?}", from_file.len(), path);
        entries.extend(from_file);
    }

    Ok(entries)
}

fn parse_default(value: Option<SocketAddr>, default: &str) -> Result<SocketAddr, ConfigError> {
    match value {
        Some(addr) => Ok(addr),
        None => default
            .parse()
            .map_err(|_| invalid("default address", default)),
    }
}

fn resolver_settings(config: &Config) -> Result<ResolverSettings, ConfigError> {
    let defaults = ResolverSettings::default();
    let r = &config.resolver;

    let non_address = r.non_address_queries.unwrap_or_default();
    if non_address == NonAddressPolicy::Forward && r.upstream.is_none() {
        return Err(invalid(
            "resolver.upstream",
            "required when non_address_queries = \"forward\"",
        ));
    }

    let query_timeout = match r.query_timeout_ms {
        Some(0) => return Err(invalid("resolver.query_timeout_ms", "must be positive")),
        Some(ms) => Duration::from_millis(ms),
        None => defaults.query_timeout,
    };

    Ok(ResolverSettings {
        ttl: r.ttl.unwrap_or(defaults.ttl),
        non_address,
        upstream: r.upstream,
        query_timeout,
    })
}

fn build_route(service: &ServiceConfig, allowlist: &AllowlistStore) -> Result<ProxyRoute, ConfigError> {
    let field = |name: &str| format!("services.{}.{}", service.name, name);

    if service.name.trim().is_empty() {
        return Err(invalid("services.name", "must not be empty"));
    }

    let listen_ip = service.listen.ip();
    let served_domains = allowlist.domains_for(listen_ip);
    if served_domains.is_empty() {
        return Err(invalid(
            field("listen"),
            format!("{} is not the proxy address of any allowlisted domain", listen_ip),
        ));
    }

    let upstream_address = resolve_upstream(service)?;

    let tls = match service.tls_policy {
        TlsPolicy::Passthrough => {
            if !service.hostnames.is_empty() {
                warn!(
                    "Service '{}' lists hostnames but is passthrough; they are ignored",
                    service.name
                );
            }
            RouteTls::Passthrough
        }
        TlsPolicy::TerminateCheckSni => {
            let mut expected_hostnames: BTreeSet<String> = served_domains.into_iter().collect();
            expected_hostnames.extend(service.hostnames.iter().map(|h| normalize_domain(h)));
            RouteTls::TerminateCheckSni { expected_hostnames }
        }
    };

    let idle_secs = service.idle_timeout_secs.unwrap_or(DEFAULT_IDLE_TIMEOUT_SECS);
    if idle_secs == 0 {
        return Err(invalid(field("idle_timeout_secs"), "must be positive"));
    }
    let connect_ms = service.connect_timeout_ms.unwrap_or(DEFAULT_CONNECT_TIMEOUT_MS);
    if connect_ms == 0 {
        return Err(invalid(field("connect_timeout_ms"), "must be positive"));
    }

    debug!(
        "Route {}: {} -> {} ({})",
        service.name, service.listen, upstream_address, service.tls_policy
    );
    Ok(ProxyRoute {
        service_name: service.name.clone(),
        listen_address: service.listen,
        upstream_address,
        upstream_host: service.upstream.clone(),
        tls,
        idle_timeout: Duration::from_secs(idle_secs),
        connect_timeout: Duration::from_millis(connect_ms),
    })
}

/// Resolve `host:port` once. The route keeps the first address.
fn resolve_upstream(service: &ServiceConfig) -> Result<SocketAddr, ConfigError> {
    let unresolvable = |message: String| ConfigError::UnresolvableUpstream {
        service: service.name.clone(),
        upstream: service.upstream.clone(),
        message,
    };

    let mut addrs = service
        .upstream
        .to_socket_addrs()
        .map_err(|e| unresolvable(e.to_string()))?;
    addrs
        .next()
        .ok_or_else(|| unresolvable("no addresses returned".to_string()))
}

/// `service_tag` and `tls_policy` on allowlist entries must match the routes.
fn check_entries_against_routes(
    allowlist: &AllowlistStore,
    routes: &RouteTable,
) -> Result<(), ConfigError> {
    for entry in allowlist.entries() {
        let field = |name: &str| format!("allow.{}.{}", entry.domain, name);
        let serving: Vec<&ProxyRoute> = routes
            .iter()
            .filter(|r| r.listen_address.ip() == entry.proxy_address)
            .collect();

        if let Some(tag) = &entry.service_tag {
            let route = routes
                .by_name(tag)
                .ok_or_else(|| invalid(field("service_tag"), format!("no service named '{}'", tag)))?;
            if route.listen_address.ip() != entry.proxy_address {
                return Err(invalid(
                    field("service_tag"),
                    format!(
                        "service '{}' listens on {}, not {}",
                        tag, route.listen_address, entry.proxy_address
                    ),
                ));
            }
        }

        if let Some(policy) = entry.tls_policy {
            if serving.is_empty() {
                warn!(
                    "Allowlist entry {} expects {} but no service listens on {}",
                    entry.domain, policy, entry.proxy_address
                );
            }
            if let Some(route) = serving.iter().find(|r| r.tls.policy() != policy) {
                return Err(invalid(
                    field("tls_policy"),
                    format!(
                        "{} but service '{}' on {} is {}",
                        policy,
                        route.service_name,
                        route.listen_address,
                        route.tls.policy()
                    ),
                ));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isolation::IsolationError;
    use crate::proxy::ProxyError;
    use std::net::IpAddr;

    fn parse(toml_str: &str) -> Config {
        toml::from_str(toml_str).unwrap()
    }

    const BASE: &str = r#"
        [resolver]
        listen = "10.100.1.2:53"

        [isolation]
        subnet = "10.100.1.0/24"

        [[allow]]
        domain = "github.com"
        proxy_address = "10.100.1.10"
        service_tag = "github"

        [[allow]]
        domain = "www.github.com"
        proxy_address = "10.100.1.10"

        [[services]]
        name = "github"
        listen = "10.100.1.10:443"
        upstream = "127.0.0.1:8443"
    "#;

    #[test]
    fn test_valid_config() {
        let resolved = validate(&parse(BASE)).unwrap();

        assert_eq!(resolved.allowlist.len(), 2);
        assert_eq!(resolved.routes.len(), 1);
        let route = resolved.routes.by_name("github").unwrap();
        assert_eq!(route.upstream_address, "127.0.0.1:8443".parse().unwrap());
        assert_eq!(route.idle_timeout, Duration::from_secs(300));
        assert_eq!(route.tls, RouteTls::Passthrough);
        assert_eq!(resolved.resolver.ttl, 30);
        assert_eq!(resolved.health_listen, DEFAULT_HEALTH_LISTEN.parse().unwrap());
        assert_eq!(resolved.audit, AuditTarget::Stdout);
        assert_eq!(
            resolved.isolation.reachable_addresses(),
            vec![
                "10.100.1.2".parse::<IpAddr>().unwrap(),
                "10.100.1.10".parse().unwrap()
            ]
        );
    }

    #[test]
    fn test_terminate_route_expects_domains_and_hostnames() {
        let config = parse(&BASE.replace(
            "upstream = \"127.0.0.1:8443\"",
            "upstream = \"127.0.0.1:8443\"\ntls_policy = \"terminate_check_sni\"\nhostnames = [\"API.github.com.\"]",
        ));
        let resolved = validate(&config).unwrap();
        let route = resolved.routes.by_name("github").unwrap();

        let RouteTls::TerminateCheckSni { expected_hostnames } = &route.tls else {
            panic!("expected a terminating route");
        };
        let names: Vec<&str> = expected_hostnames.iter().map(String::as_str).collect();
        assert_eq!(names, vec!["api.github.com", "github.com", "www.github.com"]);
    }

    #[test]
    fn test_listen_must_be_allowlist_address() {
        let config = parse(&BASE.replace("10.100.1.10:443", "10.100.1.99:443"));
        let err = validate(&config).unwrap_err();
        assert!(
            matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "services.github.listen"),
            "{}",
            err
        );
    }

    #[test]
    fn test_duplicate_domain_is_config_error() {
        let config = parse(&format!(
            "{}\n[[allow]]\ndomain = \"GitHub.com.\"\nproxy_address = \"10.100.1.11\"\n",
            BASE
        ));
        assert!(matches!(validate(&config), Err(ConfigError::Allowlist(_))));
    }

    #[test]
    fn test_duplicate_listen_rejected() {
        let config = parse(&format!(
            "{}\n[[services]]\nname = \"github2\"\nlisten = \"10.100.1.10:443\"\nupstream = \"127.0.0.1:9443\"\n",
            BASE
        ));
        assert!(matches!(
            validate(&config),
            Err(ConfigError::Routes(ProxyError::DuplicateRoute(_)))
        ));
    }

    #[test]
    fn test_unknown_service_tag_rejected() {
        let config = parse(&BASE.replace("service_tag = \"github\"", "service_tag = \"gitlab\""));
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("no service named 'gitlab'"), "{}", err);
    }

    #[test]
    fn test_tls_policy_must_agree_with_route() {
        let config = parse(&BASE.replace(
            "service_tag = \"github\"",
            "service_tag = \"github\"\ntls_policy = \"terminate_check_sni\"",
        ));
        let err = validate(&config).unwrap_err();
        assert!(
            matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "allow.github.com.tls_policy"),
            "{}",
            err
        );
    }

    #[test]
    fn test_forward_requires_upstream() {
        let config = parse(&BASE.replace(
            "listen = \"10.100.1.2:53\"",
            "listen = \"10.100.1.2:53\"\nnon_address_queries = \"forward\"",
        ));
        let err = validate(&config).unwrap_err();
        assert!(
            matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "resolver.upstream")
        );
    }

    #[test]
    fn test_resolver_outside_subnet_rejected() {
        let config = parse(&BASE.replace("10.100.1.2:53", "10.200.0.2:53"));
        assert!(matches!(
            validate(&config),
            Err(ConfigError::Isolation(IsolationError::OutsideSubnet { .. }))
        ));
    }

    #[test]
    fn test_resolver_on_proxy_address_rejected() {
        let config = parse(&BASE.replace("10.100.1.2:53", "10.100.1.10:53"));
        assert!(matches!(
            validate(&config),
            Err(ConfigError::Isolation(IsolationError::ResolverIsProxy(_)))
        ));
    }

    #[test]
    fn test_bad_upstream_rejected() {
        let config = parse(&BASE.replace("127.0.0.1:8443", "no-port-here"));
        assert!(matches!(
            validate(&config),
            Err(ConfigError::UnresolvableUpstream { .. })
        ));
    }

    #[test]
    fn test_hosts_file_merged_with_inline_entries() {
        let dir = tempfile::tempdir().unwrap();
        let hosts = dir.path().join("hosts.allowlist");
        fs::write(&hosts, "10.100.1.11 raw.githubusercontent.com\n").unwrap();

        let mut config = parse(BASE);
        config.allowlist_file = Some(hosts);
        let resolved = validate(&config).unwrap();
        assert_eq!(
            resolved
                .allowlist
                .lookup("raw.githubusercontent.com")
                .map(|e| e.proxy_address),
            Some("10.100.1.11".parse().unwrap())
        );
    }

    #[test]
    fn test_hosts_file_duplicate_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let hosts = dir.path().join("hosts.allowlist");
        fs::write(&hosts, "10.100.1.10 github.com\n").unwrap();

        let mut config = parse(BASE);
        config.allowlist_file = Some(hosts);
        assert!(matches!(validate(&config), Err(ConfigError::Allowlist(_))));
    }

    #[test]
    fn test_file_sink_default_path() {
        let config = parse(&format!("{}\n[audit]\nsink = \"file\"\n", BASE));
        let resolved = validate(&config).unwrap();
        assert_eq!(
            resolved.audit,
            AuditTarget::File(PathBuf::from(DEFAULT_AUDIT_PATH))
        );
    }
}
