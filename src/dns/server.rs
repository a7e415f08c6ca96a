//! UDP and TCP listen loops for the resolver.
//!
//! Each datagram and each TCP connection is handled in its own task, with no
//! ordering between them. Every I/O step is bounded by a timeout.

use super::engine::ResolverEngine;
use super::error::DnsError;
use super::health::Readiness;
use super::wire::MAX_UDP_PAYLOAD;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

/// How long an idle TCP connection is kept open between queries.
const TCP_IDLE_TIMEOUT: Duration = Duration::from_secs(10);

/// Bound listeners for one resolver address.
pub struct DnsServer {
    udp: Arc<UdpSocket>,
    tcp: TcpListener,
    engine: Arc<ResolverEngine>,
    query_timeout: Duration,
    readiness: Readiness,
    shutdown_rx: watch::Receiver<bool>,
}

impl DnsServer {
    /// Bind UDP and TCP on `listen`.
    ///
    /// With port 0 the TCP listener takes the port UDP was given.
    pub async fn bind(
        listen: SocketAddr,
        engine: Arc<ResolverEngine>,
        query_timeout: Duration,
        readiness: Readiness,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Result<Self, DnsError> {
        let udp = UdpSocket::bind(listen)
            .await
            .map_err(|source| DnsError::Bind {
                addr: listen,
                source,
            })?;
        let udp_addr = udp.local_addr()?;
        let tcp = TcpListener::bind(udp_addr)
            .await
            .map_err(|source| DnsError::Bind {
                addr: udp_addr,
                source,
            })?;

        info!("Resolver listening on {} (udp+tcp)", udp_addr);
        Ok(Self {
            udp: Arc::new(udp),
            tcp,
            engine,
            query_timeout,
            readiness,
            shutdown_rx,
        })
    }

    /// Bound UDP address.
    pub fn udp_addr(&self) -> Result<SocketAddr, DnsError> {
        Ok(self.udp.local_addr()?)
    }

    /// Bound TCP address.
    pub fn tcp_addr(&self) -> Result<SocketAddr, DnsError> {
        Ok(self.tcp.local_addr()?)
    }

    /// Serve until shutdown. Readiness is true exactly while this loop runs.
    pub async fn run(self) -> Result<(), DnsError> {
        let mut shutdown_rx = self.shutdown_rx.clone();
        if *shutdown_rx.borrow() {
            return Ok(());
        }

        let mut buf = vec![0u8; MAX_UDP_PAYLOAD];
        self.readiness.set_ready(true);

        loop {
            tokio::select! {
                recv = self.udp.recv_from(&mut buf) => {
                    match recv {
                        Ok((n, peer)) => self.spawn_udp(buf[..n].to_vec(), peer),
                        Err(e) => warn!("UDP receive failed: {}", e),
                    }
                }
                accept = self.tcp.accept() => {
                    match accept {
                        Ok((stream, peer)) => {
                            trace!("DNS/TCP connection from {}", peer);
                            tokio::spawn(serve_tcp(
                                stream,
                                peer,
                                self.engine.clone(),
                                self.query_timeout,
                                self.shutdown_rx.clone(),
                            ));
                        }
                        Err(e) => warn!("TCP accept failed: {}", e),
                    }
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("Resolver shutting down");
                        break;
                    }
                }
            }
        }

        self.readiness.set_ready(false);
        Ok(())
    }

    fn spawn_udp(&self, packet: Vec<u8>, peer: SocketAddr) {
        let engine = self.engine.clone();
        let socket = self.udp.clone();
        let query_timeout = self.query_timeout;

        tokio::spawn(async move {
            // Forwarding has its own deadline; this covers the whole exchange.
            let handled = timeout(query_timeout * 2, engine.handle_packet(&packet, peer)).await;
            let response = match handled {
                Ok(Some(response)) => response,
                Ok(None) => return,
                Err(_) => {
                    warn!("Query from {} timed out", peer);
                    return;
                }
            };
            match timeout(query_timeout, socket.send_to(&response, peer)).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => debug!("UDP send to {} failed: {}", peer, e),
                Err(_) => debug!("UDP send to {} timed out", peer),
            }
        });
    }
}

/// Serve length-prefixed queries on one TCP connection until the client
/// closes it, goes idle, or the server shuts down.
async fn serve_tcp(
    mut stream: TcpStream,
    peer: SocketAddr,
    engine: Arc<ResolverEngine>,
    query_timeout: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        let len = tokio::select! {
            read = timeout(TCP_IDLE_TIMEOUT, stream.read_u16()) => match read {
                Ok(Ok(len)) => len as usize,
                Ok(Err(_)) => return,
                Err(_) => {
                    trace!("DNS/TCP connection from {} idle", peer);
                    return;
                }
            },
            _ = shutdown_rx.changed() => return,
        };

        let mut packet = vec![0u8; len];
        match timeout(query_timeout, stream.read_exact(&mut packet)).await {
            Ok(Ok(_)) => {}
            _ => {
                debug!("DNS/TCP read from {} failed", peer);
                return;
            }
        }

        let Ok(Some(response)) = timeout(query_timeout * 2, engine.handle_packet(&packet, peer)).await
        else {
            return;
        };
        let Ok(response_len) = u16::try_from(response.len()) else {
            warn!("Response to {} exceeds 65535 bytes", peer);
            return;
        };

        let mut framed = Vec::with_capacity(response.len() + 2);
        framed.extend_from_slice(&response_len.to_be_bytes());
        framed.extend_from_slice(&response);
        match timeout(query_timeout, stream.write_all(&framed)).await {
            Ok(Ok(())) => {}
            _ => {
                debug!("DNS/TCP write to {} failed", peer);
                return;
            }
        }
    }
}
