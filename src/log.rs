//! Access logging
//!
//! One immutable `LogEntry` is emitted per request. The sink contract is
//! deliberately small: it must be safe for concurrent use from many
//! worker threads, and the engine guarantees request order only within a
//! single connection - entries from different connections interleave
//! arbitrarily.

use crate::filter::Trace;
use crate::http::{Error, Headers, Method};
use std::net::SocketAddr;
use std::time::SystemTime;

/// Immutable record of one processed request
#[derive(Debug)]
pub struct LogEntry {
    /// When the request line arrived
    pub received_at: SystemTime,
    /// When filter processing started
    pub processing_started: SystemTime,
    /// When the first response byte was written, if any was
    pub response_started: Option<SystemTime>,
    /// When the response was fully sent
    pub response_sent: SystemTime,
    /// Bytes consumed from the connection for this request
    pub bytes_read: u64,
    /// Bytes written to the connection for this request
    pub bytes_written: u64,
    /// Body bytes the response logically produced; for HEAD responses
    /// this counts the suppressed content
    pub content_length: u64,
    pub method: Method,
    pub target: String,
    pub status: Option<u16>,
    pub peer: SocketAddr,
    pub port: u16,
    pub secure: bool,
    /// The full filter trace for this request
    pub trace: Trace,
    /// Snapshot of the request headers
    pub request_headers: Headers,
    /// Snapshot of the response headers
    pub response_headers: Headers,
}

/// Logging sink contract
///
/// Implementations must be thread-safe; the engine calls them from
/// every worker thread without coordination.
pub trait AccessLog: Send + Sync {
    /// One request finished (successfully or not)
    fn on_request(&self, entry: &LogEntry);

    /// A connection failed outside request processing
    fn on_socket_error(&self, port: u16, secure: bool, peer: Option<SocketAddr>, error: &Error);
}

/// Default sink emitting structured `tracing` events
pub struct TracingLog;

impl AccessLog for TracingLog {
    fn on_request(&self, entry: &LogEntry) {
        tracing::info!(
            method = %entry.method,
            target = %entry.target,
            status = entry.status,
            peer = %entry.peer,
            port = entry.port,
            secure = entry.secure,
            bytes_read = entry.bytes_read,
            bytes_written = entry.bytes_written,
            content_length = entry.content_length,
            trace = %entry.trace,
            "request processed"
        );
    }

    fn on_socket_error(&self, port: u16, secure: bool, peer: Option<SocketAddr>, error: &Error) {
        match error {
            Error::Timeout => {
                tracing::warn!(port, secure, peer = ?peer, "client read timed out")
            }
            Error::HeaderTooLarge(detail) => {
                tracing::warn!(port, secure, peer = ?peer, detail = %detail, "header block too large")
            }
            _ => tracing::warn!(port, secure, peer = ?peer, %error, "socket error"),
        }
    }
}
