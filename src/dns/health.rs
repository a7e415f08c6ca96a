//! HTTP liveness endpoint for the resolver.
//!
//! `GET /health` answers `200 OK` with body `OK` while the DNS listen loop
//! is accepting queries and `503` otherwise. It never touches the
//! allowlist.

use super::error::DnsError;
use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Bound on one health connection.
const HEALTH_CONN_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared flag flipped by the DNS server's listen loop.
#[derive(Debug, Clone, Default)]
pub struct Readiness(Arc<AtomicBool>);

impl Readiness {
    /// New flag, initially not ready.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the flag.
    pub fn set_ready(&self, ready: bool) {
        self.0.store(ready, Ordering::SeqCst);
    }

    /// Read the flag.
    pub fn is_ready(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Bound health endpoint.
pub struct HealthServer {
    listener: TcpListener,
    readiness: Readiness,
    shutdown_rx: watch::Receiver<bool>,
}

impl HealthServer {
    /// Bind the endpoint.
    pub async fn bind(
        listen: SocketAddr,
        readiness: Readiness,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Result<Self, DnsError> {
        let listener = TcpListener::bind(listen)
            .await
            .map_err(|source| DnsError::Bind {
                addr: listen,
                source,
            })?;
        info!("Health endpoint listening on http://{}/health", listener.local_addr()?);

        Ok(Self {
            listener,
            readiness,
            shutdown_rx,
        })
    }

    /// Bound address.
    pub fn local_addr(&self) -> Result<SocketAddr, DnsError> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until shutdown.
    pub async fn run(self) -> Result<(), DnsError> {
        let mut shutdown_rx = self.shutdown_rx.clone();
        if *shutdown_rx.borrow() {
            return Ok(());
        }

        loop {
            tokio::select! {
                accept_result = self.listener.accept() => {
                    match accept_result {
                        Ok((stream, peer)) => {
                            let readiness = self.readiness.clone();
                            tokio::spawn(async move {
                                let service = service_fn(move |req| {
                                    let readiness = readiness.clone();
                                    async move { Ok::<_, Infallible>(respond(&req, &readiness)) }
                                });
                                let conn = http1::Builder::new()
                                    .serve_connection(TokioIo::new(stream), service);
                                match tokio::time::timeout(HEALTH_CONN_TIMEOUT, conn).await {
                                    Ok(Ok(())) => {}
                                    Ok(Err(e)) => debug!("Health connection from {} failed: {}", peer, e),
                                    Err(_) => debug!("Health connection from {} timed out", peer),
                                }
                            });
                        }
                        Err(e) => warn!("Health accept failed: {}", e),
                    }
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        debug!("Health endpoint shutting down");
                        break;
                    }
                }
            }
        }

        Ok(())
    }
}

fn respond(req: &Request<Incoming>, readiness: &Readiness) -> Response<Full<Bytes>> {
    let (status, body) = match (req.method(), req.uri().path()) {
        (&Method::GET | &Method::HEAD, "/health") if readiness.is_ready() => {
            (StatusCode::OK, "OK")
        }
        (&Method::GET | &Method::HEAD, "/health") => {
            (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
        }
        (_, "/health") => (StatusCode::METHOD_NOT_ALLOWED, ""),
        _ => (StatusCode::NOT_FOUND, ""),
    };

    let mut response = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
    *response.status_mut() = status;
    response
}
