//! Service wiring.
//!
//! Builds every component from a [`ResolvedConfig`], binds all listeners
//! up front and runs them until shutdown. Configuration reloads arrive on a
//! channel (the binary feeds it from `SIGHUP`) and are applied by
//! [`apply_reload`].
//!
//! ```text
//!   ResolvedConfig ──► SharedAllowlist ──► ResolverEngine ──► DnsServer (udp+tcp)
//!                  │                                     └──► HealthServer
//!                  └─► RouteTable ──► ProxyRouter ◄── TlsTerminator ◄── EphemeralCa
//! ```

use crate::allowlist::SharedAllowlist;
use crate::config::{ConfigError, ResolvedConfig};
use crate::dns::{DnsError, DnsServer, HealthServer, Readiness, ResolverEngine};
use crate::proxy::{CaError, EphemeralCa, ProxyError, ProxyRouter, TlsTerminator, native_roots};
use crate::telemetry::{AuditEvent, AuditLogger};
use rustls::RootCertStore;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// Queued reloads beyond this are dropped by the sender.
const RELOAD_QUEUE: usize = 4;

/// Errors that stop the service.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Configuration is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The resolver could not bind or failed.
    #[error("Resolver: {0}")]
    Dns(#[from] DnsError),

    /// The proxy router could not bind or failed.
    #[error("Proxy: {0}")]
    Proxy(#[from] ProxyError),

    /// The CA could not be created or exported.
    #[error("CA: {0}")]
    Ca(#[from] CaError),

    /// A listener task panicked.
    #[error("Listener task failed: {0}")]
    Task(String),
}

/// Result of re-reading configuration, as fed to a running service.
pub type ReloadRequest = Result<ResolvedConfig, ConfigError>;

struct Listeners {
    dns: DnsServer,
    health: HealthServer,
    proxy: ProxyRouter,
}

/// All components, bound and ready to run.
pub struct Service {
    config: ResolvedConfig,
    audit: Arc<AuditLogger>,
    allowlist: Arc<SharedAllowlist>,
    listeners: Option<Listeners>,
    ca: Option<Arc<EphemeralCa>>,
    reload_tx: mpsc::Sender<ReloadRequest>,
    reload_rx: mpsc::Receiver<ReloadRequest>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Service {
    /// Build and bind everything.
    ///
    /// `upstream_roots` verifies re-originated TLS; `None` loads the system
    /// roots, and only when some route terminates TLS. In offline isolation
    /// nothing is bound.
    pub async fn bind(
        config: ResolvedConfig,
        audit: Arc<AuditLogger>,
        upstream_roots: Option<RootCertStore>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Result<Self, ServiceError> {
        let allowlist = Arc::new(SharedAllowlist::new(config.allowlist.clone()));
        let (reload_tx, reload_rx) = mpsc::channel(RELOAD_QUEUE);

        if config.isolation.is_offline() {
            info!("Offline isolation: resolver and proxies are not started");
            return Ok(Self {
                config,
                audit,
                allowlist,
                listeners: None,
                ca: None,
                reload_tx,
                reload_rx,
                shutdown_rx,
            });
        }

        let (ca, terminator) = if config.routes.needs_tls() {
            let ca = Arc::new(EphemeralCa::generate()?);
            if let Some(path) = &config.ca_cert_out {
                ca.export(path)?;
            }
            let roots = match upstream_roots {
                Some(roots) => roots,
                None => native_roots()?,
            };
            let terminator = TlsTerminator::new(ca.clone(), roots)?;
            (Some(ca), Some(terminator))
        } else {
            (None, None)
        };

        let engine = Arc::new(ResolverEngine::new(
            allowlist.clone(),
            audit.clone(),
            config.resolver.clone(),
        ));
        let readiness = Readiness::new();
        let dns = DnsServer::bind(
            config.resolver_listen,
            engine,
            config.resolver.query_timeout,
            readiness.clone(),
            shutdown_rx.clone(),
        )
        .await?;
        let health =
            HealthServer::bind(config.health_listen, readiness, shutdown_rx.clone()).await?;
        let proxy =
            ProxyRouter::bind(&config.routes, audit.clone(), terminator, shutdown_rx.clone())
                .await?;

        Ok(Self {
            config,
            audit,
            allowlist,
            listeners: Some(Listeners { dns, health, proxy }),
            ca,
            reload_tx,
            reload_rx,
            shutdown_rx,
        })
    }

    /// Resolver UDP address, if bound.
    pub fn dns_udp_addr(&self) -> Option<SocketAddr> {
        self.listeners.as_ref()?.dns.udp_addr().ok()
    }

    /// Resolver TCP address, if bound.
    pub fn dns_tcp_addr(&self) -> Option<SocketAddr> {
        self.listeners.as_ref()?.dns.tcp_addr().ok()
    }

    /// Health endpoint address, if bound.
    pub fn health_addr(&self) -> Option<SocketAddr> {
        self.listeners.as_ref()?.health.local_addr().ok()
    }

    /// Bound address of one proxy route.
    pub fn proxy_addr(&self, service: &str) -> Option<SocketAddr> {
        self.listeners.as_ref()?.proxy.local_addr(service)
    }

    /// PEM of the ephemeral CA, when some route terminates TLS.
    pub fn ca_cert_pem(&self) -> Option<&str> {
        self.ca.as_deref().map(EphemeralCa::cert_pem)
    }

    /// Live allowlist handle.
    pub fn allowlist(&self) -> Arc<SharedAllowlist> {
        self.allowlist.clone()
    }

    /// Channel for feeding reloaded configuration into the running service.
    pub fn reload_sender(&self) -> mpsc::Sender<ReloadRequest> {
        self.reload_tx.clone()
    }

    /// Run until shutdown, applying reloads as they arrive.
    pub async fn run(self) -> Result<(), ServiceError> {
        let Self {
            mut config,
            audit,
            allowlist,
            listeners,
            reload_tx,
            mut reload_rx,
            mut shutdown_rx,
            ..
        } = self;
        drop(reload_tx);

        let mut tasks: JoinSet<Result<(), ServiceError>> = JoinSet::new();
        if let Some(Listeners { dns, health, proxy }) = listeners {
            tasks.spawn(async move { dns.run().await.map_err(ServiceError::from) });
            tasks.spawn(async move { health.run().await.map_err(ServiceError::from) });
            tasks.spawn(async move { proxy.run().await.map_err(ServiceError::from) });
        }

        audit.log(AuditEvent::ServiceStart {
            version: env!("CARGO_PKG_VERSION").to_string(),
            pid: std::process::id(),
            domains: config.allowlist.len(),
            routes: config.routes.len(),
        });
        info!(
            "netfence running ({} isolation, {} domains, {} routes)",
            config.isolation.mode(),
            config.allowlist.len(),
            config.routes.len()
        );

        let mut reloads_open = true;
        let mut failure = None;
        loop {
            if *shutdown_rx.borrow() {
                break;
            }
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
                next = reload_rx.recv(), if reloads_open => {
                    match next {
                        Some(next) => {
                            apply_reload(&mut config, next, &allowlist, &audit);
                        }
                        None => reloads_open = false,
                    }
                }
                Some(joined) = tasks.join_next() => {
                    let err = match joined {
                        Ok(Ok(())) => continue,
                        Ok(Err(e)) => e,
                        Err(e) => ServiceError::Task(e.to_string()),
                    };
                    error!("Listener stopped: {}", err);
                    failure = Some(err);
                    break;
                }
            }
        }

        let reason = match &failure {
            Some(err) => err.to_string(),
            None => "shutdown".to_string(),
        };
        audit.log(AuditEvent::ServiceStop { reason });

        // Without a shutdown signal the other listeners would never return.
        if failure.is_some() {
            tasks.abort_all();
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined
                && !e.is_cancelled()
            {
                warn!("Listener task ended abnormally: {}", e);
            }
        }

        match failure {
            Some(err) => Err(err),
            None => {
                info!("netfence stopped");
                Ok(())
            }
        }
    }
}

/// Apply a reloaded configuration.
///
/// Only the allowlist can change at runtime. A reload that fails
/// validation, or that would change any route, listener or resolver
/// setting, is rejected whole and the current state stays active. Returns
/// whether the new allowlist was installed.
pub fn apply_reload(
    current: &mut ResolvedConfig,
    next: ReloadRequest,
    allowlist: &SharedAllowlist,
    audit: &AuditLogger,
) -> bool {
    let reject = |reason: String| {
        warn!("Reload rejected: {}", reason);
        audit.log(AuditEvent::ReloadRejected { reason });
        false
    };

    let mut next = match next {
        Ok(next) => next,
        Err(e) => return reject(e.to_string()),
    };

    if !next.routes.same_config(&current.routes) {
        return reject("proxy routes changed; restart required".to_string());
    }
    if next.resolver_listen != current.resolver_listen
        || next.health_listen != current.health_listen
    {
        return reject("listen addresses changed; restart required".to_string());
    }
    if next.resolver != current.resolver {
        return reject("resolver settings changed; restart required".to_string());
    }
    // The proxy set follows the allowlist; only mode and subnet are fixed.
    if next.isolation.mode() != current.isolation.mode()
        || next.isolation.subnet() != current.isolation.subnet()
    {
        return reject("isolation settings changed; restart required".to_string());
    }

    // Upstreams stay pinned to the addresses resolved at startup.
    next.routes = current.routes.clone();

    let previous = allowlist.replace(next.allowlist.clone());
    audit.log(AuditEvent::AllowlistReload {
        previous_domains: previous.len(),
        domains: next.allowlist.len(),
    });
    info!(
        "Allowlist reloaded: {} -> {} domains",
        previous.len(),
        next.allowlist.len()
    );
    *current = next;
    true
}
