//! Serialized audit sinks.
//!
//! [`AuditLogger`] is handed to the resolver and the proxy router as an
//! `Arc`. Taking the timestamp, serializing and enqueueing a record happen
//! under one mutex, so records keep the order in which `log` acquired it.
//!
//! Sinks that do real I/O (file, stdout, syslog) are drained by a single
//! writer thread fed through a bounded queue; `log` itself never waits on
//! that I/O. When the sink stalls long enough for the queue to fill, further
//! records are dropped and counted rather than blocking query handling.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, mpsc as std_mpsc};
use std::thread;
use std::time::Duration;

use syslog::{Facility, Formatter3164};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, error, warn};

use super::error::TelemetryError;
use super::events::AuditEvent;

/// Syslog tag for all audit events.
pub const SYSLOG_TAG: &str = "NETFENCE";

/// Records waiting for the writer thread.
const QUEUE_CAPACITY: usize = 8192;

/// How long dropping the logger waits for queued records to be written.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Where audit records go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditTarget {
    /// Append JSON lines to a file.
    File(PathBuf),
    /// JSON lines on stdout.
    Stdout,
    /// Local syslog daemon.
    Syslog,
    /// Discard.
    Null,
}

type SyslogWriter = syslog::Logger<syslog::LoggerBackend, Formatter3164>;

/// Destination owned by the writer thread.
enum Output {
    Writer(Box<dyn Write + Send>),
    Syslog(SyslogWriter),
}

impl Output {
    fn write_record(&mut self, json: &str) -> io::Result<()> {
        match self {
            Output::Writer(writer) => writeln!(writer, "{}", json).and_then(|_| writer.flush()),
            Output::Syslog(writer) => writer
                .info(json)
                .map_err(|e| io::Error::other(e.to_string())),
        }
    }
}

struct Queue {
    tx: mpsc::Sender<String>,
    /// Signalled once the writer thread has drained the queue.
    drained: std_mpsc::Receiver<()>,
}

enum AuditSink {
    Queue(Queue),
    Memory(MemoryAudit),
}

/// Audit logger that writes one JSON record per event.
pub struct AuditLogger {
    /// None indicates a null logger.
    sink: Option<Mutex<AuditSink>>,
    dropped: AtomicU64,
}

impl std::fmt::Debug for AuditLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLogger")
            .field("null", &self.is_null())
            .field("dropped", &self.dropped())
            .finish()
    }
}

impl AuditLogger {
    /// Open the sink described by `target`.
    pub fn open(target: &AuditTarget) -> Result<Self, TelemetryError> {
        match target {
            AuditTarget::File(path) => Self::file(path),
            AuditTarget::Stdout => Self::from_writer(io::stdout()),
            AuditTarget::Syslog => Self::syslog(),
            AuditTarget::Null => Ok(Self::new_null()),
        }
    }

    /// Append to a file, creating it (and its parent directory) if needed.
    pub fn file(path: &Path) -> Result<Self, TelemetryError> {
        let open_err = |source| TelemetryError::OpenFile {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(open_err)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(open_err)?;

        debug!("Audit log opened at {}", path.display());
        Self::from_writer(file)
    }

    /// Write to any `Write` implementation from a dedicated thread.
    pub fn from_writer<W: Write + Send + 'static>(writer: W) -> Result<Self, TelemetryError> {
        Self::queued(Output::Writer(Box::new(writer)), QUEUE_CAPACITY)
    }

    /// Connect to the local syslog daemon over its Unix socket.
    pub fn syslog() -> Result<Self, TelemetryError> {
        let formatter = Formatter3164 {
            facility: Facility::LOG_DAEMON,
            hostname: None,
            process: SYSLOG_TAG.to_string(),
            pid: std::process::id(),
        };

        let writer = syslog::unix(formatter)
            .map_err(|e| TelemetryError::SyslogConnection(e.to_string()))?;

        debug!("Connected to syslog with tag '{}'", SYSLOG_TAG);
        Self::queued(Output::Syslog(writer), QUEUE_CAPACITY)
    }

    fn queued(mut output: Output, capacity: usize) -> Result<Self, TelemetryError> {
        let (tx, mut rx) = mpsc::channel::<String>(capacity);
        let (drained_tx, drained) = std_mpsc::channel();

        thread::Builder::new()
            .name("netfence-audit".to_string())
            .spawn(move || {
                while let Some(json) = rx.blocking_recv() {
                    if let Err(e) = output.write_record(&json) {
                        error!("Failed to write audit record: {}", e);
                    }
                }
                let _ = drained_tx.send(());
            })
            .map_err(TelemetryError::WriterThread)?;

        Ok(Self {
            sink: Some(Mutex::new(AuditSink::Queue(Queue { tx, drained }))),
            dropped: AtomicU64::new(0),
        })
    }

    /// Keep records in memory; the returned handle reads them back.
    pub fn in_memory() -> (Self, MemoryAudit) {
        let memory = MemoryAudit::default();
        let logger = Self {
            sink: Some(Mutex::new(AuditSink::Memory(memory.clone()))),
            dropped: AtomicU64::new(0),
        };
        (logger, memory)
    }

    /// Create a null audit logger that discards all events.
    pub fn new_null() -> Self {
        Self {
            sink: None,
            dropped: AtomicU64::new(0),
        }
    }

    /// Log an audit event.
    ///
    /// Never blocks on sink I/O. Failures are reported through `tracing` and
    /// otherwise swallowed: a broken audit sink must not take down query
    /// handling.
    pub fn log(&self, event: AuditEvent) {
        let Some(ref sink) = self.sink else {
            return;
        };

        let sink = sink.lock().unwrap_or_else(PoisonError::into_inner);

        let json = match serde_json::to_string(&event.with_timestamp()) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize audit event: {}", e);
                return;
            }
        };

        match &*sink {
            AuditSink::Memory(memory) => memory.push(json),
            AuditSink::Queue(queue) => match queue.tx.try_send(json) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    if dropped == 1 || dropped % 1000 == 0 {
                        error!("Audit sink stalled; {} records dropped so far", dropped);
                    }
                }
                Err(TrySendError::Closed(_)) => error!("Audit writer thread is gone"),
            },
        }
    }

    /// Records discarded because the sink could not keep up.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Check if this is a null logger.
    pub fn is_null(&self) -> bool {
        self.sink.is_none()
    }
}

impl Drop for AuditLogger {
    fn drop(&mut self) {
        let Some(sink) = self.sink.take() else {
            return;
        };
        if let AuditSink::Queue(Queue { tx, drained }) =
            sink.into_inner().unwrap_or_else(PoisonError::into_inner)
        {
            drop(tx);
            if drained.recv_timeout(DRAIN_TIMEOUT).is_err() {
                warn!("Audit records still queued after {:?}", DRAIN_TIMEOUT);
            }
        }
    }
}

/// Read handle for an in-memory audit sink.
#[derive(Debug, Clone, Default)]
pub struct MemoryAudit {
    lines: Arc<Mutex<Vec<String>>>,
}

impl MemoryAudit {
    fn push(&self, line: String) {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(line);
    }

    /// Raw JSON lines, in write order.
    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Records parsed back into JSON values, in write order.
    pub fn records(&self) -> Vec<serde_json::Value> {
        self.lines()
            .iter()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect()
    }

    /// Records whose `event` tag equals `kind`.
    pub fn records_of(&self, kind: &str) -> Vec<serde_json::Value> {
        self.records()
            .into_iter()
            .filter(|r| r["event"] == kind)
            .collect()
    }

    /// Number of records written.
    pub fn len(&self) -> usize {
        self.lines.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::Decision;

    fn query_event(name: &str) -> AuditEvent {
        AuditEvent::DnsQuery {
            query_name: name.to_string(),
            query_type: "A".to_string(),
            client: "127.0.0.1:5353".parse().unwrap(),
            decision: Decision::Block,
            resolved_address: None,
        }
    }

    #[test]
    fn test_syslog_tag() {
        assert_eq!(SYSLOG_TAG, "NETFENCE");
    }

    #[test]
    fn test_null_logger_discards() {
        let logger = AuditLogger::new_null();
        assert!(logger.is_null());
        logger.log(query_event("example.com"));
    }

    #[test]
    fn test_memory_preserves_order() {
        let (logger, memory) = AuditLogger::in_memory();
        for i in 0..10 {
            logger.log(query_event(&format!("host{}.example", i)));
        }

        let names: Vec<String> = memory
            .records_of("dns_query")
            .iter()
            .map(|r| r["query_name"].as_str().unwrap().to_string())
            .collect();
        let expected: Vec<String> = (0..10).map(|i| format!("host{}.example", i)).collect();
        assert_eq!(names, expected);
    }

    #[test]
    fn test_file_sink_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit").join("queries.jsonl");

        let logger = AuditLogger::open(&AuditTarget::File(path.clone())).unwrap();
        logger.log(query_event("a.example"));
        logger.log(query_event("b.example"));
        drop(logger);

        // Reopening appends rather than truncating.
        let logger = AuditLogger::file(&path).unwrap();
        logger.log(query_event("c.example"));
        drop(logger);

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        for line in lines {
            let value: serde_json::Value = serde_json::from_str(line).unwrap();
            assert_eq!(value["event"], "dns_query");
        }
    }

    #[test]
    fn test_concurrent_writers_never_interleave() {
        let (logger, memory) = AuditLogger::in_memory();
        let logger = Arc::new(logger);

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let logger = logger.clone();
                std::thread::spawn(move || {
                    for i in 0..200 {
                        logger.log(query_event(&format!("t{}-{}.example", t, i)));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(memory.len(), 1600);
        assert_eq!(memory.records().len(), 1600);

        // Per-thread order is preserved.
        for t in 0..8 {
            let prefix = format!("t{}-", t);
            let seq: Vec<u32> = memory
                .records()
                .iter()
                .filter_map(|r| r["query_name"].as_str().map(str::to_string))
                .filter(|n| n.starts_with(&prefix))
                .map(|n| {
                    n[prefix.len()..]
                        .trim_end_matches(".example")
                        .parse()
                        .unwrap()
                })
                .collect();
            let expected: Vec<u32> = (0..200).collect();
            assert_eq!(seq, expected);
        }
    }

    /// Writer whose every write waits for the gate to open.
    struct GatedWriter {
        gate: std_mpsc::Receiver<()>,
        written: Arc<Mutex<Vec<u8>>>,
    }

    impl Write for GatedWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            // Returns immediately once the sender is dropped.
            let _ = self.gate.recv();
            self.written.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_stalled_sink_never_blocks_log() {
        let (gate_tx, gate) = std_mpsc::channel();
        let written = Arc::new(Mutex::new(Vec::new()));
        let writer = GatedWriter {
            gate,
            written: written.clone(),
        };
        let logger = AuditLogger::queued(Output::Writer(Box::new(writer)), 4).unwrap();

        let started = std::time::Instant::now();
        for i in 0..100 {
            logger.log(query_event(&format!("host{}.example", i)));
        }
        assert!(started.elapsed() < Duration::from_secs(1));
        let dropped = logger.dropped();
        assert!(dropped >= 90, "only {} dropped", dropped);

        // Unblock the sink; everything that was queued gets written in order.
        drop(gate_tx);
        drop(logger);

        let written = String::from_utf8(written.lock().unwrap().clone()).unwrap();
        let names: Vec<String> = written
            .lines()
            .map(|line| {
                let value: serde_json::Value = serde_json::from_str(line).unwrap();
                value["query_name"].as_str().unwrap().to_string()
            })
            .collect();
        assert_eq!(names.len() as u64, 100 - dropped);
        assert_eq!(names[0], "host0.example");
    }

    #[test]
    #[ignore = "Requires running syslog daemon"]
    fn test_syslog_creation() {
        assert!(AuditLogger::syslog().is_ok());
    }
}
