//! Exact-match domain table.
//!
//! # Matching Rules
//!
//! - Names are compared after [`normalize_domain`]: ASCII lowercase, one
//!   trailing dot removed.
//! - Matching is exact. `github.com` does not admit `gist.github.com`; every
//!   subdomain that should resolve must be listed on its own.
//! - Wildcard patterns (`*.example.com`) are rejected at load time rather
//!   than silently treated as literals.

use super::error::AllowlistError;
use crate::config::AllowEntry;
use crate::proxy::TlsPolicy;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info};

/// Maximum length of a presentation-format domain name.
const MAX_DOMAIN_LEN: usize = 253;

/// Maximum length of a single label.
const MAX_LABEL_LEN: usize = 63;

/// One permitted domain and the proxy address it resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowlistEntry {
    /// Normalized domain (lowercase, no trailing dot).
    pub domain: String,
    /// Address handed back to the agent for this domain.
    pub proxy_address: IpAddr,
    /// Optional name of the service that serves this domain.
    pub service_tag: Option<String>,
    /// Optional TLS policy the serving route is expected to enforce.
    pub tls_policy: Option<TlsPolicy>,
}

/// Normalize a domain for lookup.
///
/// Lowercases ASCII letters and strips a single trailing dot. Load-time and
/// query-time normalization go through this one function so the two can
/// never disagree.
pub fn normalize_domain(name: &str) -> String {
    let trimmed = name.trim();
    let trimmed = trimmed.strip_suffix('.').unwrap_or(trimmed);
    trimmed.to_ascii_lowercase()
}

/// Check that a normalized domain is a syntactically valid host name.
fn validate_domain(original: &str, normalized: &str) -> Result<(), AllowlistError> {
    let invalid = |reason: &str| AllowlistError::InvalidDomain {
        domain: original.to_string(),
        reason: reason.to_string(),
    };

    if normalized.is_empty() {
        return Err(invalid("empty domain"));
    }
    if normalized.len() > MAX_DOMAIN_LEN {
        return Err(invalid("longer than 253 characters"));
    }
    if normalized.starts_with("*.") || normalized == "*" {
        return Err(invalid(
            "wildcards are not supported; list each name explicitly",
        ));
    }

    for label in normalized.split('.') {
        if label.is_empty() {
            return Err(invalid("empty label"));
        }
        if label.len() > MAX_LABEL_LEN {
            return Err(invalid("label longer than 63 characters"));
        }
        if label.starts_with('-') || label.ends_with('-') {
            return Err(invalid("label starts or ends with '-'"));
        }
        if !label
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
        {
            return Err(invalid("label contains characters outside [a-z0-9-_]"));
        }
    }

    Ok(())
}

/// Immutable exact-match lookup table from domain to proxy address.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowlistStore {
    entries: HashMap<String, AllowlistEntry>,
}

impl AllowlistStore {
    /// Build a store from configured entries.
    ///
    /// Every domain is normalized and validated, every address parsed.
    /// Duplicate normalized domains are rejected even when they map to the
    /// same address, so that an ambiguous source never loads.
    pub fn from_config(entries: &[AllowEntry]) -> Result<Self, AllowlistError> {
        let mut table: HashMap<String, AllowlistEntry> = HashMap::with_capacity(entries.len());

        for raw in entries {
            let domain = normalize_domain(&raw.domain);
            validate_domain(&raw.domain, &domain)?;

            let proxy_address: IpAddr =
                raw.proxy_address
                    .trim()
                    .parse()
                    .map_err(|_| AllowlistError::InvalidAddress {
                        domain: domain.clone(),
                        address: raw.proxy_address.clone(),
                    })?;

            if let Some(existing) = table.get(&domain) {
                return Err(AllowlistError::DuplicateDomain {
                    domain,
                    first: existing.proxy_address,
                    second: proxy_address,
                });
            }

            debug!("Allowlist: {} -> {}", domain, proxy_address);
            table.insert(
                domain.clone(),
                AllowlistEntry {
                    domain,
                    proxy_address,
                    service_tag: raw.service_tag.clone(),
                    tls_policy: raw.tls_policy,
                },
            );
        }

        info!("Loaded allowlist with {} domains", table.len());
        Ok(Self { entries: table })
    }

    /// Look up a query name.
    ///
    /// Returns `None` for anything not listed verbatim after normalization.
    pub fn lookup(&self, name: &str) -> Option<&AllowlistEntry> {
        self.entries.get(&normalize_domain(name))
    }

    /// Number of domains in the table.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All entries, sorted by domain.
    pub fn entries(&self) -> Vec<&AllowlistEntry> {
        let mut entries: Vec<&AllowlistEntry> = self.entries.values().collect();
        entries.sort_by(|a, b| a.domain.cmp(&b.domain));
        entries
    }

    /// Domains that resolve to `address`, sorted.
    pub fn domains_for(&self, address: IpAddr) -> Vec<String> {
        let mut domains: Vec<String> = self
            .entries
            .values()
            .filter(|e| e.proxy_address == address)
            .map(|e| e.domain.clone())
            .collect();
        domains.sort();
        domains
    }
}

/// Shared handle to the live allowlist.
///
/// Readers take a snapshot (`Arc` clone under a read lock) and then work on
/// that snapshot without holding any lock. A reload builds a complete new
/// [`AllowlistStore`] first and then swaps the single reference, so a reader
/// sees either the old table or the new one, never a mix.
#[derive(Debug)]
pub struct SharedAllowlist {
    current: RwLock<Arc<AllowlistStore>>,
}

impl SharedAllowlist {
    /// Wrap an initial store.
    pub fn new(store: AllowlistStore) -> Self {
        Self {
            current: RwLock::new(Arc::new(store)),
        }
    }

    /// Take a consistent snapshot of the current table.
    pub fn snapshot(&self) -> Arc<AllowlistStore> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Atomically replace the table, returning the previous one.
    pub fn replace(&self, store: AllowlistStore) -> Arc<AllowlistStore> {
        let next = Arc::new(store);
        let mut guard = self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *guard, next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(domain: &str, address: &str) -> AllowEntry {
        AllowEntry {
            domain: domain.to_string(),
            proxy_address: address.to_string(),
            service_tag: None,
            tls_policy: None,
        }
    }

    fn github_store() -> AllowlistStore {
        AllowlistStore::from_config(&[
            entry("github.com", "10.100.1.10"),
            entry("www.github.com", "10.100.1.10"),
            entry("raw.githubusercontent.com", "10.100.1.11"),
            entry("api.anthropic.com", "10.100.1.14"),
        ])
        .unwrap()
    }

    #[test]
    fn test_normalize_domain() {
        assert_eq!(normalize_domain("GitHub.com"), "github.com");
        assert_eq!(normalize_domain("github.com."), "github.com");
        assert_eq!(normalize_domain("GITHUB.COM."), "github.com");
        assert_eq!(normalize_domain("  github.com "), "github.com");
    }

    #[test]
    fn test_exact_lookup() {
        let store = github_store();
        let hit = store.lookup("github.com").unwrap();
        assert_eq!(hit.proxy_address, "10.100.1.10".parse::<IpAddr>().unwrap());
        assert_eq!(
            store.lookup("raw.githubusercontent.com").unwrap().proxy_address,
            "10.100.1.11".parse::<IpAddr>().unwrap()
        );
    }

    #[test]
    fn test_no_subdomain_inheritance() {
        let store = github_store();
        assert!(store.lookup("gist.github.com").is_none());
        assert!(store.lookup("api.github.com").is_none());
        assert!(store.lookup("evil.github.com.attacker.io").is_none());
    }

    #[test]
    fn test_no_suffix_or_prefix_matching() {
        let store = github_store();
        assert!(store.lookup("notgithub.com").is_none());
        assert!(store.lookup("github.co").is_none());
        assert!(store.lookup("com").is_none());
    }

    #[test]
    fn test_case_and_trailing_dot_insensitive() {
        let store = github_store();
        let canonical = store.lookup("github.com").unwrap();
        assert_eq!(store.lookup("GitHub.com"), Some(canonical));
        assert_eq!(store.lookup("github.com."), Some(canonical));
        assert_eq!(store.lookup("GITHUB.COM."), Some(canonical));
    }

    #[test]
    fn test_duplicate_domain_rejected() {
        let result = AllowlistStore::from_config(&[
            entry("github.com", "10.100.1.10"),
            entry("GitHub.com.", "10.100.1.10"),
        ]);
        assert!(matches!(
            result,
            Err(AllowlistError::DuplicateDomain { ref domain, .. }) if domain == "github.com"
        ));
    }

    #[test]
    fn test_malformed_address_rejected() {
        let result = AllowlistStore::from_config(&[entry("github.com", "10.100.1")]);
        assert!(matches!(result, Err(AllowlistError::InvalidAddress { .. })));

        let result = AllowlistStore::from_config(&[entry("github.com", "proxy.local")]);
        assert!(matches!(result, Err(AllowlistError::InvalidAddress { .. })));
    }

    #[test]
    fn test_ipv6_proxy_address() {
        let store = AllowlistStore::from_config(&[entry("github.com", "fd00:100::10")]).unwrap();
        assert!(store.lookup("github.com").unwrap().proxy_address.is_ipv6());
    }

    #[test]
    fn test_invalid_domains_rejected() {
        for bad in ["", ".", "*.github.com", "git hub.com", "a..b", "-bad.com", "bad-.com"] {
            let result = AllowlistStore::from_config(&[entry(bad, "10.0.0.1")]);
            assert!(
                matches!(result, Err(AllowlistError::InvalidDomain { .. })),
                "expected {:?} to be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_domains_for_address() {
        let store = github_store();
        let domains = store.domains_for("10.100.1.10".parse().unwrap());
        assert_eq!(domains, vec!["github.com", "www.github.com"]);
        assert!(store.domains_for("10.100.1.99".parse().unwrap()).is_empty());
    }

    #[test]
    fn test_entries_sorted() {
        let store = github_store();
        let domains: Vec<&str> = store.entries().iter().map(|e| e.domain.as_str()).collect();
        assert_eq!(
            domains,
            vec![
                "api.anthropic.com",
                "github.com",
                "raw.githubusercontent.com",
                "www.github.com"
            ]
        );
    }

    #[test]
    fn test_shared_allowlist_swap() {
        let shared = SharedAllowlist::new(github_store());
        let before = shared.snapshot();
        assert!(before.lookup("github.com").is_some());

        let next = AllowlistStore::from_config(&[entry("gitlab.com", "10.100.1.20")]).unwrap();
        let previous = shared.replace(next);

        // Old snapshot is untouched by the swap.
        assert!(Arc::ptr_eq(&before, &previous));
        assert!(before.lookup("github.com").is_some());

        let after = shared.snapshot();
        assert!(after.lookup("github.com").is_none());
        assert!(after.lookup("gitlab.com").is_some());
    }

    #[test]
    fn test_concurrent_readers_see_whole_tables() {
        let old = AllowlistStore::from_config(&[
            entry("a.example", "10.0.0.1"),
            entry("b.example", "10.0.0.1"),
        ])
        .unwrap();
        let new = AllowlistStore::from_config(&[
            entry("a.example", "10.0.0.2"),
            entry("b.example", "10.0.0.2"),
        ])
        .unwrap();
        let shared = Arc::new(SharedAllowlist::new(old));

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let shared = shared.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        let snap = shared.snapshot();
                        let a = snap.lookup("a.example").unwrap().proxy_address;
                        let b = snap.lookup("b.example").unwrap().proxy_address;
                        assert_eq!(a, b, "snapshot mixed two tables");
                    }
                })
            })
            .collect();

        shared.replace(new);
        for reader in readers {
            reader.join().unwrap();
        }
    }
}
