//! Duplex relay between an accepted client and its upstream.
//!
//! Each direction is its own copy loop, so a write stalled in one direction
//! never holds up reading in the other. Both loops share a last-activity
//! clock that drives the idle timeout. A clean EOF on one side is propagated
//! as a write shutdown to the other and the opposite direction keeps flowing
//! until it also ends. Every other exit (error, idle timeout, shutdown)
//! drops both sockets together.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tokio::time::{Instant, sleep_until, timeout};
use tracing::trace;

const RELAY_BUF_SIZE: usize = 16 * 1024;

/// Bound on the final write shutdowns.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Why a relay ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    /// Both sides finished with EOF.
    Closed,
    /// Reading from or writing to the client failed.
    ClientError,
    /// Reading from or writing to the upstream failed.
    UpstreamError,
    /// No bytes moved in either direction for the idle timeout.
    IdleTimeout,
    /// The service is shutting down.
    Shutdown,
}

/// Byte counts and outcome of one relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayStats {
    /// Bytes copied from the client to the upstream.
    pub client_to_upstream: u64,
    /// Bytes copied from the upstream to the client.
    pub upstream_to_client: u64,
    /// What ended the relay.
    pub close: CloseReason,
}

/// Time of the last byte moved in either direction.
struct Activity {
    origin: Instant,
    last_ms: AtomicU64,
}

impl Activity {
    fn new() -> Self {
        Self {
            origin: Instant::now(),
            last_ms: AtomicU64::new(0),
        }
    }

    fn touch(&self) {
        let elapsed = self.origin.elapsed().as_millis() as u64;
        self.last_ms.fetch_max(elapsed, Ordering::Relaxed);
    }

    fn last(&self) -> Instant {
        self.origin + Duration::from_millis(self.last_ms.load(Ordering::Relaxed))
    }
}

/// One direction of the relay.
#[derive(Default)]
struct Flow {
    copied: AtomicU64,
    finished: AtomicBool,
}

/// Copy `reader` into `writer` until EOF, then shut `writer` down.
async fn pump<R, W>(
    reader: &mut R,
    writer: &mut W,
    flow: &Flow,
    activity: &Activity,
    read_failure: CloseReason,
    write_failure: CloseReason,
) -> Result<(), CloseReason>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; RELAY_BUF_SIZE];
    loop {
        let n = reader.read(&mut buf).await.map_err(|_| read_failure)?;
        if n == 0 {
            flow.finished.store(true, Ordering::Relaxed);
            let _ = timeout(SHUTDOWN_GRACE, writer.shutdown()).await;
            return Ok(());
        }
        activity.touch();
        writer
            .write_all(&buf[..n])
            .await
            .map_err(|_| write_failure)?;
        flow.copied.fetch_add(n as u64, Ordering::Relaxed);
        activity.touch();
    }
}

/// Resolve once nothing has moved for `idle`.
async fn idle_expired(activity: &Activity, idle: Duration) {
    loop {
        let deadline = activity.last() + idle;
        if Instant::now() >= deadline {
            return;
        }
        sleep_until(deadline).await;
    }
}

async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

/// Relay bytes between `client` and `upstream` until both finish, either
/// fails, `idle` elapses without traffic, or `shutdown` flips to true.
///
/// A write that makes no progress also counts as idle, so a peer that stops
/// reading cannot park the relay forever.
pub async fn relay<C, U>(
    client: C,
    upstream: U,
    idle: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> RelayStats
where
    C: AsyncRead + AsyncWrite + Unpin,
    U: AsyncRead + AsyncWrite + Unpin,
{
    let (mut client_rd, mut client_wr) = tokio::io::split(client);
    let (mut upstream_rd, mut upstream_wr) = tokio::io::split(upstream);

    let activity = Activity::new();
    let up = Flow::default();
    let down = Flow::default();

    let close = if *shutdown.borrow() {
        CloseReason::Shutdown
    } else {
        let flows = async {
            tokio::try_join!(
                pump(
                    &mut client_rd,
                    &mut upstream_wr,
                    &up,
                    &activity,
                    CloseReason::ClientError,
                    CloseReason::UpstreamError,
                ),
                pump(
                    &mut upstream_rd,
                    &mut client_wr,
                    &down,
                    &activity,
                    CloseReason::UpstreamError,
                    CloseReason::ClientError,
                ),
            )
        };

        tokio::select! {
            result = flows => match result {
                Ok(_) => CloseReason::Closed,
                Err(reason) => reason,
            },
            _ = idle_expired(&activity, idle) => CloseReason::IdleTimeout,
            _ = shutdown_requested(&mut shutdown) => CloseReason::Shutdown,
        }
    };
    trace!("Relay ended: {:?}", close);

    if !up.finished.load(Ordering::Relaxed) {
        let _ = timeout(SHUTDOWN_GRACE, upstream_wr.shutdown()).await;
    }
    if !down.finished.load(Ordering::Relaxed) {
        let _ = timeout(SHUTDOWN_GRACE, client_wr.shutdown()).await;
    }

    RelayStats {
        client_to_upstream: up.copied.load(Ordering::Relaxed),
        upstream_to_client: down.copied.load(Ordering::Relaxed),
        close,
    }
}
