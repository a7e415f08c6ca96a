//! The isolation contract as data.

use super::error::IsolationError;
use super::subnet::Subnet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::fmt::Write as _;
use std::net::{IpAddr, SocketAddr};

/// How much of the network the sandboxed process can reach.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationMode {
    /// Resolver and proxy addresses only.
    #[default]
    Filtered,
    /// Nothing at all, not even the resolver.
    Offline,
}

impl fmt::Display for IsolationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IsolationMode::Filtered => f.write_str("filtered"),
            IsolationMode::Offline => f.write_str("offline"),
        }
    }
}

/// Reachability contract handed to the surrounding deployment.
///
/// netfence does not enforce any of this; the network topology does. The
/// policy exists so the addressing can be validated at startup and rendered
/// into the agent's `resolv.conf`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IsolationPolicy {
    mode: IsolationMode,
    subnet: Option<Subnet>,
    resolver: SocketAddr,
    proxies: BTreeSet<IpAddr>,
}

impl IsolationPolicy {
    /// Build and check a policy.
    ///
    /// With a subnet, the resolver and every proxy address must lie inside
    /// it. The resolver may never share an address with a proxy.
    pub fn new(
        mode: IsolationMode,
        subnet: Option<Subnet>,
        resolver: SocketAddr,
        proxies: impl IntoIterator<Item = IpAddr>,
    ) -> Result<Self, IsolationError> {
        let proxies: BTreeSet<IpAddr> = proxies.into_iter().collect();

        if let Some(subnet) = subnet {
            let outside = |role: &str, address: IpAddr| IsolationError::OutsideSubnet {
                role: role.to_string(),
                address,
                subnet: subnet.to_string(),
            };
            if !subnet.contains(resolver.ip()) {
                return Err(outside("Resolver", resolver.ip()));
            }
            if let Some(addr) = proxies.iter().find(|a| !subnet.contains(**a)) {
                return Err(outside("Proxy", *addr));
            }
        }

        if proxies.contains(&resolver.ip()) {
            return Err(IsolationError::ResolverIsProxy(resolver.ip()));
        }

        Ok(Self {
            mode,
            subnet,
            resolver,
            proxies,
        })
    }

    /// Isolation mode.
    pub fn mode(&self) -> IsolationMode {
        self.mode
    }

    /// Whether the sandbox is fully offline.
    pub fn is_offline(&self) -> bool {
        self.mode == IsolationMode::Offline
    }

    /// Configured subnet.
    pub fn subnet(&self) -> Option<Subnet> {
        self.subnet
    }

    /// Resolver socket.
    pub fn resolver(&self) -> SocketAddr {
        self.resolver
    }

    /// Addresses the sandboxed process may reach, resolver first.
    ///
    /// Empty when offline.
    pub fn reachable_addresses(&self) -> Vec<IpAddr> {
        if self.is_offline() {
            return Vec::new();
        }
        std::iter::once(self.resolver.ip())
            .chain(self.proxies.iter().copied())
            .collect()
    }

    /// Whether `addr` is reachable from the sandbox under this contract.
    pub fn permits(&self, addr: IpAddr) -> bool {
        !self.is_offline() && (addr == self.resolver.ip() || self.proxies.contains(&addr))
    }

    /// Render the agent's `/etc/resolv.conf`.
    ///
    /// Offline mode gets no `nameserver` line, so lookups fail at the
    /// transport layer instead of returning NXDOMAIN.
    pub fn resolv_conf(&self) -> String {
        let mut out = format!("# Generated by netfence ({} isolation)\n", self.mode);
        if self.is_offline() {
            out.push_str("# No resolver is reachable from this sandbox.\n");
            return out;
        }

        if self.resolver.port() != 53 {
            let _ = writeln!(
                out,
                "# Resolver listens on port {}; stub resolvers only query port 53.",
                self.resolver.port()
            );
        }
        let _ = writeln!(out, "nameserver {}", self.resolver.ip());
        out.push_str("options timeout:2 attempts:2\n");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn filtered() -> IsolationPolicy {
        IsolationPolicy::new(
            IsolationMode::Filtered,
            Some("10.100.1.0/24".parse().unwrap()),
            "10.100.1.2:53".parse().unwrap(),
            [ip("10.100.1.10"), ip("10.100.1.11")],
        )
        .unwrap()
    }

    #[test]
    fn test_reachable_set() {
        let policy = filtered();
        assert_eq!(
            policy.reachable_addresses(),
            vec![ip("10.100.1.2"), ip("10.100.1.10"), ip("10.100.1.11")]
        );
        assert!(policy.permits(ip("10.100.1.10")));
        assert!(!policy.permits(ip("10.100.1.99")));
        assert!(!policy.permits(ip("140.82.112.3")));
    }

    #[test]
    fn test_offline_reaches_nothing() {
        let policy = IsolationPolicy::new(
            IsolationMode::Offline,
            None,
            "10.100.1.2:53".parse().unwrap(),
            [ip("10.100.1.10")],
        )
        .unwrap();
        assert!(policy.reachable_addresses().is_empty());
        assert!(!policy.permits(ip("10.100.1.2")));
        assert!(!policy.resolv_conf().contains("nameserver"));
    }

    #[test]
    fn test_address_outside_subnet_rejected() {
        let err = IsolationPolicy::new(
            IsolationMode::Filtered,
            Some("10.100.1.0/24".parse().unwrap()),
            "10.100.1.2:53".parse().unwrap(),
            [ip("10.100.2.10")],
        )
        .unwrap_err();
        assert!(matches!(err, IsolationError::OutsideSubnet { .. }));

        let err = IsolationPolicy::new(
            IsolationMode::Filtered,
            Some("10.100.1.0/24".parse().unwrap()),
            "127.0.0.1:53".parse().unwrap(),
            [],
        )
        .unwrap_err();
        assert!(matches!(err, IsolationError::OutsideSubnet { .. }));
    }

    #[test]
    fn test_resolver_cannot_be_proxy() {
        let err = IsolationPolicy::new(
            IsolationMode::Filtered,
            None,
            "10.100.1.10:53".parse().unwrap(),
            [ip("10.100.1.10")],
        )
        .unwrap_err();
        assert!(matches!(err, IsolationError::ResolverIsProxy(_)));
    }

    #[test]
    fn test_resolv_conf_filtered() {
        let conf = filtered().resolv_conf();
        assert!(conf.contains("nameserver 10.100.1.2\n"));
        assert!(!conf.contains("port"));
    }

    #[test]
    fn test_resolv_conf_notes_nonstandard_port() {
        let policy = IsolationPolicy::new(
            IsolationMode::Filtered,
            None,
            "127.0.0.1:5353".parse().unwrap(),
            [],
        )
        .unwrap();
        assert!(policy.resolv_conf().contains("port 5353"));
    }
}
