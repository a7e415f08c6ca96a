//! Proxy router: one TCP listener per route.
//!
//! Each route's entire trust boundary is its listen address: whatever
//! connects there is relayed to that route's fixed upstream socket and
//! nowhere else. The router never resolves names and never picks an
//! alternate destination.
//!
//! # Architecture
//!
//! Every listener gets its own accept loop; every accepted connection gets
//! its own task. All of them watch the same shutdown channel.
//!
//! ```ignore
//! let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//! let router = ProxyRouter::bind(&routes, audit, None, shutdown_rx).await?;
//! tokio::spawn(router.run());
//!
//! // To shutdown:
//! shutdown_tx.send(true)?;
//! ```

use super::error::ProxyError;
use super::relay::{RelayStats, relay};
use super::route::{ProxyRoute, RouteTable, RouteTls};
use super::tls::{TlsTerminator, server_name};
use crate::allowlist::normalize_domain;
use crate::telemetry::{AuditEvent, AuditLogger, RejectReason};
use rustls::server::Acceptor;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_rustls::LazyConfigAcceptor;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

/// Pause after a failed accept (e.g. fd exhaustion).
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

struct Shared {
    audit: Arc<AuditLogger>,
    tls: Option<TlsTerminator>,
}

/// Bound listeners for every route, ready to run.
pub struct ProxyRouter {
    listeners: Vec<(Arc<ProxyRoute>, TcpListener)>,
    shared: Arc<Shared>,
    shutdown_rx: watch::Receiver<bool>,
}

impl ProxyRouter {
    /// Bind every route's listen address.
    ///
    /// Fails if any address cannot be bound, or if a route terminates TLS
    /// and no terminator was supplied.
    pub async fn bind(
        routes: &RouteTable,
        audit: Arc<AuditLogger>,
        tls: Option<TlsTerminator>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Result<Self, ProxyError> {
        if tls.is_none() {
            if let Some(route) = routes
                .iter()
                .find(|r| matches!(r.tls, RouteTls::TerminateCheckSni { .. }))
            {
                return Err(ProxyError::Tls(format!(
                    "route '{}' terminates TLS but no CA is configured",
                    route.service_name
                )));
            }
        }

        let mut listeners = Vec::with_capacity(routes.len());
        for route in routes.iter() {
            let listener = TcpListener::bind(route.listen_address)
                .await
                .map_err(|source| ProxyError::Bind {
                    addr: route.listen_address,
                    source,
                })?;
            info!(
                "Proxy route '{}': {} -> {} ({})",
                route.service_name,
                listener.local_addr()?,
                route.upstream_address,
                route.tls.policy()
            );
            listeners.push((Arc::new(route.clone()), listener));
        }

        Ok(Self {
            listeners,
            shared: Arc::new(Shared { audit, tls }),
            shutdown_rx,
        })
    }

    /// Actual bound address of each route, by service name.
    pub fn local_addrs(&self) -> Vec<(String, SocketAddr)> {
        self.listeners
            .iter()
            .filter_map(|(route, listener)| {
                listener
                    .local_addr()
                    .ok()
                    .map(|addr| (route.service_name.clone(), addr))
            })
            .collect()
    }

    /// Actual bound address of one route.
    pub fn local_addr(&self, service: &str) -> Option<SocketAddr> {
        self.local_addrs()
            .into_iter()
            .find(|(name, _)| name == service)
            .map(|(_, addr)| addr)
    }

    /// Run all accept loops until shutdown.
    pub async fn run(self) -> Result<(), ProxyError> {
        let mut loops = JoinSet::new();
        for (route, listener) in self.listeners {
            loops.spawn(accept_loop(
                route,
                listener,
                self.shared.clone(),
                self.shutdown_rx.clone(),
            ));
        }

        if loops.is_empty() {
            let mut shutdown_rx = self.shutdown_rx.clone();
            while !*shutdown_rx.borrow() {
                if shutdown_rx.changed().await.is_err() {
                    break;
                }
            }
        }

        while let Some(result) = loops.join_next().await {
            if let Err(e) = result {
                warn!("Proxy accept loop failed: {}", e);
            }
        }

        info!("Proxy router stopped");
        Ok(())
    }
}

async fn accept_loop(
    route: Arc<ProxyRoute>,
    listener: TcpListener,
    shared: Arc<Shared>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    if *shutdown_rx.borrow() {
        return;
    }

    loop {
        tokio::select! {
            accept_result = listener.accept() => {
                match accept_result {
                    Ok((stream, peer)) => {
                        debug!("Route '{}': connection from {}", route.service_name, peer);
                        tokio::spawn(handle_connection(
                            stream,
                            peer,
                            route.clone(),
                            shared.clone(),
                            shutdown_rx.clone(),
                        ));
                    }
                    Err(e) => {
                        warn!("Route '{}': accept failed: {}", route.service_name, e);
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                }
            }
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    debug!("Route '{}' shutting down", route.service_name);
                    break;
                }
            }
        }
    }
}

/// Per-connection bookkeeping shared by both TLS policies.
struct Connection {
    id: String,
    peer: SocketAddr,
    route: Arc<ProxyRoute>,
    shared: Arc<Shared>,
    started: Instant,
}

impl Connection {
    fn reject(&self, reason: RejectReason, sni: Option<String>) {
        info!(
            "Route '{}': rejected {} ({:?}, sni={:?})",
            self.route.service_name, self.peer, reason, sni
        );
        self.shared.audit.log(AuditEvent::ProxyReject {
            conn_id: self.id.clone(),
            service: self.route.service_name.clone(),
            client: self.peer,
            reason,
            sni,
        });
    }

    fn upstream_failed(&self, err: &ProxyError) {
        warn!(
            "Route '{}': upstream {} unavailable: {}",
            self.route.service_name, self.route.upstream_address, err
        );
        self.shared.audit.log(AuditEvent::UpstreamFailure {
            conn_id: self.id.clone(),
            service: self.route.service_name.clone(),
            upstream: self.route.upstream_address,
            error: err.to_string(),
        });
    }

    fn connected(&self) {
        self.shared.audit.log(AuditEvent::ProxyConnect {
            conn_id: self.id.clone(),
            service: self.route.service_name.clone(),
            client: self.peer,
            upstream: self.route.upstream_address,
        });
    }

    fn closed(&self, stats: RelayStats) {
        debug!(
            "Route '{}': relay for {} closed ({:?}, up={}, down={})",
            self.route.service_name,
            self.peer,
            stats.close,
            stats.client_to_upstream,
            stats.upstream_to_client
        );
        self.shared.audit.log(AuditEvent::RelayClosed {
            conn_id: self.id.clone(),
            service: self.route.service_name.clone(),
            bytes_up: stats.client_to_upstream,
            bytes_down: stats.upstream_to_client,
            close: stats.close,
            duration_ms: self.started.elapsed().as_millis() as u64,
        });
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    route: Arc<ProxyRoute>,
    shared: Arc<Shared>,
    shutdown_rx: watch::Receiver<bool>,
) {
    set_nodelay(&stream);
    let conn = Connection {
        id: Uuid::new_v4().to_string(),
        peer,
        route,
        shared,
        started: Instant::now(),
    };

    match &conn.route.tls {
        RouteTls::Passthrough => passthrough(conn, stream, shutdown_rx).await,
        RouteTls::TerminateCheckSni { .. } => terminate(conn, stream, shutdown_rx).await,
    }
}

async fn connect_upstream(route: &ProxyRoute) -> Result<TcpStream, ProxyError> {
    let stream = timeout(
        route.connect_timeout,
        TcpStream::connect(route.upstream_address),
    )
    .await
    .map_err(|_| ProxyError::Timeout(route.connect_timeout))?
    .map_err(|e| ProxyError::UpstreamConnect {
        addr: route.upstream_address,
        message: e.to_string(),
    })?;
    set_nodelay(&stream);
    Ok(stream)
}

fn set_nodelay(stream: &TcpStream) {
    if let Err(e) = stream.set_nodelay(true) {
        trace!("Failed to set TCP_NODELAY: {}", e);
    }
}

/// Close `stream` with an RST instead of a FIN.
fn reset(stream: &TcpStream) {
    if let Err(e) = stream.set_linger(Some(Duration::ZERO)) {
        trace!("Failed to set SO_LINGER: {}", e);
    }
}

async fn passthrough(conn: Connection, client: TcpStream, shutdown_rx: watch::Receiver<bool>) {
    let upstream = match connect_upstream(&conn.route).await {
        Ok(upstream) => upstream,
        Err(e) => {
            conn.upstream_failed(&e);
            reset(&client);
            return;
        }
    };

    conn.connected();
    let stats = relay(client, upstream, conn.route.idle_timeout, shutdown_rx).await;
    conn.closed(stats);
}

async fn terminate(conn: Connection, client: TcpStream, shutdown_rx: watch::Receiver<bool>) {
    let Some(tls) = conn.shared.tls.clone() else {
        return;
    };
    let deadline = conn.route.connect_timeout;

    let start = match timeout(deadline, LazyConfigAcceptor::new(Acceptor::default(), client)).await
    {
        Ok(Ok(start)) => start,
        _ => {
            conn.reject(RejectReason::HandshakeFailed, None);
            return;
        }
    };

    let Some(sni) = start.client_hello().server_name().map(normalize_domain) else {
        conn.reject(RejectReason::MissingSni, None);
        return;
    };
    if !conn.route.tls.accepts_sni(&sni) {
        conn.reject(RejectReason::SniMismatch, Some(sni));
        return;
    }

    let client = match timeout(deadline, start.into_stream(tls.server_config())).await {
        Ok(Ok(client)) => client,
        _ => {
            conn.reject(RejectReason::HandshakeFailed, Some(sni));
            return;
        }
    };

    let upstream = match connect_upstream(&conn.route).await {
        Ok(upstream) => upstream,
        Err(e) => {
            conn.upstream_failed(&e);
            reset(client.get_ref().0);
            return;
        }
    };

    let name = match server_name(&sni) {
        Ok(name) => name,
        Err(e) => {
            conn.upstream_failed(&e);
            reset(client.get_ref().0);
            return;
        }
    };

    let upstream = match timeout(deadline, tls.connector().connect(name, upstream)).await {
        Ok(Ok(upstream)) => upstream,
        Ok(Err(e)) => {
            conn.upstream_failed(&ProxyError::Tls(e.to_string()));
            reset(client.get_ref().0);
            return;
        }
        Err(_) => {
            conn.upstream_failed(&ProxyError::Timeout(deadline));
            reset(client.get_ref().0);
            return;
        }
    };

    conn.connected();
    let stats = relay(client, upstream, conn.route.idle_timeout, shutdown_rx).await;
    conn.closed(stats);
}
