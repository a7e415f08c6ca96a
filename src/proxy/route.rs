//! Proxy routes: one listen address, one upstream, one TLS policy.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use super::error::ProxyError;

/// TLS handling for a route, as written in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TlsPolicy {
    /// Relay raw bytes without looking at them.
    Passthrough,
    /// Terminate TLS, check SNI against the route's hostnames, re-originate.
    #[serde(alias = "terminate-and-check-sni", alias = "terminate_and_check_sni")]
    TerminateCheckSni,
}

impl fmt::Display for TlsPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TlsPolicy::Passthrough => f.write_str("passthrough"),
            TlsPolicy::TerminateCheckSni => f.write_str("terminate_check_sni"),
        }
    }
}

/// Resolved TLS behaviour of a route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteTls {
    /// Forward bytes unconditionally once accepted.
    Passthrough,
    /// Only relay when the client's SNI is in `expected_hostnames`.
    TerminateCheckSni {
        /// Lowercase host names the route serves.
        expected_hostnames: BTreeSet<String>,
    },
}

impl RouteTls {
    /// The configuration-level policy this corresponds to.
    pub fn policy(&self) -> TlsPolicy {
        match self {
            RouteTls::Passthrough => TlsPolicy::Passthrough,
            RouteTls::TerminateCheckSni { .. } => TlsPolicy::TerminateCheckSni,
        }
    }

    /// Whether `sni` is acceptable for this route.
    ///
    /// Passthrough routes accept anything. SNI is compared case-insensitively
    /// and with a trailing dot removed, exactly like DNS names.
    pub fn accepts_sni(&self, sni: &str) -> bool {
        match self {
            RouteTls::Passthrough => true,
            RouteTls::TerminateCheckSni { expected_hostnames } => {
                expected_hostnames.contains(&crate::allowlist::normalize_domain(sni))
            }
        }
    }
}

/// A single proxy route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyRoute {
    /// Service name (unique).
    pub service_name: String,
    /// Private address the route listens on.
    pub listen_address: SocketAddr,
    /// Fixed upstream socket, resolved once at load time.
    pub upstream_address: SocketAddr,
    /// Upstream as written in configuration (`host:port`).
    pub upstream_host: String,
    /// TLS behaviour.
    pub tls: RouteTls,
    /// Relay idle timeout.
    pub idle_timeout: Duration,
    /// Upstream connect timeout.
    pub connect_timeout: Duration,
}

impl ProxyRoute {
    /// Whether `other` is configured identically. The upstream address each
    /// side resolved to is not compared, only the configured upstream.
    pub fn same_config(&self, other: &ProxyRoute) -> bool {
        self.service_name == other.service_name
            && self.listen_address == other.listen_address
            && self.upstream_host == other.upstream_host
            && self.tls == other.tls
            && self.idle_timeout == other.idle_timeout
            && self.connect_timeout == other.connect_timeout
    }
}

/// All routes, keyed by listen address.
///
/// Each listen IP carries exactly one route: a name resolving to that IP can
/// only ever reach one upstream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteTable {
    routes: BTreeMap<SocketAddr, ProxyRoute>,
}

impl RouteTable {
    /// Build a table, rejecting duplicate service names and listen IPs shared
    /// between routes (even on different ports).
    pub fn new(routes: Vec<ProxyRoute>) -> Result<Self, ProxyError> {
        let mut table: BTreeMap<SocketAddr, ProxyRoute> = BTreeMap::new();
        let mut names = BTreeSet::new();
        let mut ips: BTreeMap<IpAddr, String> = BTreeMap::new();

        for route in routes {
            if !names.insert(route.service_name.clone()) {
                return Err(ProxyError::DuplicateRoute(format!(
                    "service '{}' defined twice",
                    route.service_name
                )));
            }
            if let Some(existing) = ips.get(&route.listen_address.ip()) {
                return Err(ProxyError::DuplicateRoute(format!(
                    "{} is claimed by both '{}' and '{}'",
                    route.listen_address.ip(),
                    existing,
                    route.service_name
                )));
            }
            ips.insert(route.listen_address.ip(), route.service_name.clone());
            table.insert(route.listen_address, route);
        }

        Ok(Self { routes: table })
    }

    /// Route bound to `listen`, if any.
    pub fn get(&self, listen: &SocketAddr) -> Option<&ProxyRoute> {
        self.routes.get(listen)
    }

    /// Route by service name.
    pub fn by_name(&self, name: &str) -> Option<&ProxyRoute> {
        self.routes.values().find(|r| r.service_name == name)
    }

    /// Routes in listen-address order.
    pub fn iter(&self) -> impl Iterator<Item = &ProxyRoute> {
        self.routes.values()
    }

    /// Number of routes.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether there are no routes.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Whether both tables hold the same routes by configuration, whatever
    /// their upstreams resolved to.
    pub fn same_config(&self, other: &RouteTable) -> bool {
        self.routes.len() == other.routes.len()
            && self
                .iter()
                .zip(other.iter())
                .all(|(a, b)| a.same_config(b))
    }

    /// Whether any route terminates TLS.
    pub fn needs_tls(&self) -> bool {
        self.iter()
            .any(|r| r.tls.policy() == TlsPolicy::TerminateCheckSni)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(name: &str, listen: &str) -> ProxyRoute {
        ProxyRoute {
            service_name: name.to_string(),
            listen_address: listen.parse().unwrap(),
            upstream_address: "140.82.112.3:443".parse().unwrap(),
            upstream_host: "github.com".to_string(),
            tls: RouteTls::Passthrough,
            idle_timeout: Duration::from_secs(300),
            connect_timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_tls_policy_names() {
        #[derive(Deserialize)]
        struct Doc {
            p: TlsPolicy,
        }

        let doc: Doc = toml::from_str("p = \"passthrough\"").unwrap();
        assert_eq!(doc.p, TlsPolicy::Passthrough);

        for alias in ["terminate_check_sni", "terminate-and-check-sni"] {
            let doc: Doc = toml::from_str(&format!("p = \"{}\"", alias)).unwrap();
            assert_eq!(doc.p, TlsPolicy::TerminateCheckSni);
        }
        assert!(toml::from_str::<Doc>("p = \"inspect\"").is_err());
    }

    #[test]
    fn test_sni_matching() {
        let tls = RouteTls::TerminateCheckSni {
            expected_hostnames: ["github.com".to_string(), "www.github.com".to_string()]
                .into_iter()
                .collect(),
        };

        assert!(tls.accepts_sni("github.com"));
        assert!(tls.accepts_sni("WWW.GitHub.com."));
        assert!(!tls.accepts_sni("gist.github.com"));
        assert!(!tls.accepts_sni("evil.example"));
        assert!(RouteTls::Passthrough.accepts_sni("anything.example"));
    }

    #[test]
    fn test_route_table_lookup() {
        let table = RouteTable::new(vec![
            route("github", "10.100.1.10:443"),
            route("raw", "10.100.1.11:443"),
        ])
        .unwrap();

        assert_eq!(table.len(), 2);
        let listen: SocketAddr = "10.100.1.11:443".parse().unwrap();
        assert_eq!(table.get(&listen).unwrap().service_name, "raw");
        assert_eq!(
            table.by_name("github").unwrap().listen_address,
            "10.100.1.10:443".parse::<SocketAddr>().unwrap()
        );
        assert!(!table.needs_tls());
    }

    #[test]
    fn test_duplicate_listen_rejected() {
        let result = RouteTable::new(vec![
            route("github", "10.100.1.10:443"),
            route("mirror", "10.100.1.10:443"),
        ]);
        assert!(matches!(result, Err(ProxyError::DuplicateRoute(_))));
    }

    #[test]
    fn test_shared_listen_ip_rejected() {
        let result = RouteTable::new(vec![
            route("github", "10.100.1.10:443"),
            route("github-ssh", "10.100.1.10:22"),
        ]);
        match result {
            Err(ProxyError::DuplicateRoute(message)) => {
                assert!(message.contains("10.100.1.10"), "{}", message);
                assert!(message.contains("github-ssh"), "{}", message);
            }
            other => panic!("expected DuplicateRoute, got {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let result = RouteTable::new(vec![
            route("github", "10.100.1.10:443"),
            route("github", "10.100.1.11:443"),
        ]);
        assert!(matches!(result, Err(ProxyError::DuplicateRoute(_))));
    }

    #[test]
    fn test_tables_compare_by_value() {
        let a = RouteTable::new(vec![route("github", "10.100.1.10:443")]).unwrap();
        let b = RouteTable::new(vec![route("github", "10.100.1.10:443")]).unwrap();
        let mut changed = route("github", "10.100.1.10:443");
        changed.idle_timeout = Duration::from_secs(1);
        let c = RouteTable::new(vec![changed]).unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.same_config(&b));
        assert!(!a.same_config(&c));
    }

    #[test]
    fn test_same_config_ignores_resolved_upstream() {
        let a = RouteTable::new(vec![route("github", "10.100.1.10:443")]).unwrap();
        let mut rotated = route("github", "10.100.1.10:443");
        rotated.upstream_address = "140.82.113.4:443".parse().unwrap();
        let b = RouteTable::new(vec![rotated]).unwrap();
        assert!(a.same_config(&b));

        let mut moved = route("github", "10.100.1.10:443");
        moved.upstream_host = "github.example:443".to_string();
        let c = RouteTable::new(vec![moved]).unwrap();
        assert!(!a.same_config(&c));
    }
}
