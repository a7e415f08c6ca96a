//! TLS termination for terminate-and-check-SNI routes.
//!
//! The router reads the ClientHello with a lazy acceptor, checks SNI against
//! the route, and only then completes the handshake with a leaf certificate
//! minted by the [`EphemeralCa`]. Traffic is re-encrypted towards the fixed
//! upstream with a regular verifying client.
//!
//! # ALPN
//!
//! Both sides are pinned to `http/1.1`. If the client negotiated h2 with us
//! while the upstream picked http/1.1 (or the reverse), the plaintext relay
//! in between would splice two incompatible framings together.

use super::ca::EphemeralCa;
use super::error::ProxyError;
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use rustls_pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tokio_rustls::TlsConnector;
use tracing::{debug, error, trace};

const ALPN_HTTP1: &[u8] = b"http/1.1";

/// Leaf certificates keyed by lowercase host name.
pub struct CertificateCache {
    cache: RwLock<HashMap<String, Arc<CertifiedKey>>>,
    ca: Arc<EphemeralCa>,
}

impl CertificateCache {
    /// Create an empty cache backed by `ca`.
    pub fn new(ca: Arc<EphemeralCa>) -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
            ca,
        }
    }

    /// Get or mint the certificate for `domain`.
    pub fn get_or_generate(&self, domain: &str) -> Result<Arc<CertifiedKey>, ProxyError> {
        let domain_lower = crate::allowlist::normalize_domain(domain);

        {
            let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(key) = cache.get(&domain_lower) {
                trace!("Certificate cache hit for {}", domain_lower);
                return Ok(key.clone());
            }
        }

        debug!("Generating certificate for {}", domain_lower);
        let domain_cert = self.ca.generate_cert(&[domain_lower.as_str()])?;

        let cert_chain: Vec<CertificateDer<'static>> =
            rustls_pemfile::certs(&mut domain_cert.cert_pem.as_bytes())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| ProxyError::Tls(format!("Failed to parse certificate PEM: {}", e)))?;
        if cert_chain.is_empty() {
            return Err(ProxyError::Tls("No certificates found in PEM".into()));
        }

        let private_key: PrivateKeyDer<'static> =
            rustls_pemfile::private_key(&mut domain_cert.key_pem.as_bytes())
                .map_err(|e| ProxyError::Tls(format!("Failed to parse private key PEM: {}", e)))?
                .ok_or_else(|| ProxyError::Tls("No private key found in PEM".into()))?;

        let signing_key = rustls::crypto::aws_lc_rs::sign::any_supported_type(&private_key)
            .map_err(|e| ProxyError::Tls(format!("Failed to create signing key: {}", e)))?;

        let certified_key = Arc::new(CertifiedKey::new(cert_chain, signing_key));

        // Two racing handshakes may both mint; the first insert wins.
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        Ok(cache
            .entry(domain_lower)
            .or_insert(certified_key)
            .clone())
    }

    /// Number of cached certificates.
    pub fn len(&self) -> usize {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Resolves the server certificate from the ClientHello's SNI.
///
/// Clients without SNI get no certificate and the handshake fails; the
/// router rejects those before reaching this point anyway.
struct SniCertResolver {
    cache: Arc<CertificateCache>,
}

impl ResolvesServerCert for SniCertResolver {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        let domain = client_hello.server_name()?;
        match self.cache.get_or_generate(domain) {
            Ok(key) => Some(key),
            Err(e) => {
                error!("Failed to generate certificate for {}: {}", domain, e);
                None
            }
        }
    }
}

impl std::fmt::Debug for SniCertResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SniCertResolver")
            .field("cache_size", &self.cache.len())
            .finish()
    }
}

/// Server and client TLS configuration shared by all terminating routes.
#[derive(Clone)]
pub struct TlsTerminator {
    server_config: Arc<ServerConfig>,
    connector: TlsConnector,
    cache: Arc<CertificateCache>,
}

impl TlsTerminator {
    /// Build the terminator. `upstream_roots` verifies re-originated
    /// connections; see [`native_roots`].
    pub fn new(ca: Arc<EphemeralCa>, upstream_roots: RootCertStore) -> Result<Self, ProxyError> {
        if upstream_roots.is_empty() {
            return Err(ProxyError::Tls("No upstream root certificates".into()));
        }

        let cache = Arc::new(CertificateCache::new(ca));
        let resolver = Arc::new(SniCertResolver {
            cache: cache.clone(),
        });

        let mut server_config = ServerConfig::builder()
            .with_no_client_auth()
            .with_cert_resolver(resolver);
        server_config.alpn_protocols = vec![ALPN_HTTP1.to_vec()];

        let mut client_config = ClientConfig::builder()
            .with_root_certificates(upstream_roots)
            .with_no_client_auth();
        client_config.alpn_protocols = vec![ALPN_HTTP1.to_vec()];

        Ok(Self {
            server_config: Arc::new(server_config),
            connector: TlsConnector::from(Arc::new(client_config)),
            cache,
        })
    }

    /// Config for completing the client-side handshake.
    pub fn server_config(&self) -> Arc<ServerConfig> {
        self.server_config.clone()
    }

    /// Connector for the upstream side.
    pub fn connector(&self) -> &TlsConnector {
        &self.connector
    }

    /// Leaf certificate cache.
    pub fn cache(&self) -> &CertificateCache {
        &self.cache
    }
}

/// System root certificates.
pub fn native_roots() -> Result<RootCertStore, ProxyError> {
    let mut root_store = RootCertStore::empty();

    let native_certs = rustls_native_certs::load_native_certs();
    for err in native_certs.errors {
        debug!("Warning loading native cert: {}", err);
    }
    for cert in native_certs.certs {
        if let Err(e) = root_store.add(cert) {
            debug!("Warning adding cert to store: {}", e);
        }
    }

    if root_store.is_empty() {
        return Err(ProxyError::Tls("No system root certificates found".into()));
    }

    debug!("Loaded {} root certificates", root_store.len());
    Ok(root_store)
}

/// Convert a host name into a rustls `ServerName`.
pub fn server_name(domain: &str) -> Result<ServerName<'static>, ProxyError> {
    ServerName::try_from(domain.to_string())
        .map_err(|_| ProxyError::Tls(format!("Invalid server name: {}", domain)))
}
