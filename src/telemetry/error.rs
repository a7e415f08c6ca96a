//! Telemetry error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while opening an audit sink.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Failed to connect to syslog.
    #[error("Failed to connect to syslog: {0}")]
    SyslogConnection(String),

    /// Failed to open the audit log file.
    #[error("Failed to open audit log {path}: {source}")]
    OpenFile {
        /// Path that could not be opened.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The audit writer thread could not be started.
    #[error("Failed to start audit writer thread: {0}")]
    WriterThread(#[source] std::io::Error),
}
