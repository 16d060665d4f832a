//! HTTP/1.1 protocol layer
//!
//! This module implements the wire-level half of the engine: the header
//! model, body framing (content-length, chunked, multipart), the buffered
//! connection transport, and the keep-alive protocol driver.
//!
//! Framing errors are deliberately split from application errors: a
//! malformed chunk or an oversized header block poisons the connection,
//! while a failing request handler only poisons the request.

pub mod body;
pub mod chunked;
pub mod driver;
pub mod headers;
pub mod message;
pub mod mime;
pub mod multipart;
pub mod parser;
pub mod session;
pub mod tls;

pub use body::{BodyReader, Response};
pub use headers::Headers;
pub use message::{Method, RequestHead, ResponseHead, Status, Version};
pub use session::{Conduit, FdSessionOps, SessionOps};

/// Result type for HTTP operations
pub type Result<T> = std::result::Result<T, Error>;

/// HTTP operation errors
///
/// Variants are grouped by blast radius: `ChunkFraming`, `PrematureClose`,
/// `HeaderTooLarge` and `ConnectionBroken` are connection-fatal; the rest
/// are request-scoped or transient.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Timeout")]
    Timeout,

    #[error("Connection closed by peer")]
    ConnectionClosed,

    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    #[error("Header block too large: {0}")]
    HeaderTooLarge(String),

    #[error("Line exceeds {0} bytes")]
    LineTooLong(usize),

    #[error("Chunk framing error: {0}")]
    ChunkFraming(String),

    #[error("Premature close: expected {expected} bytes, saw {actual}")]
    PrematureClose { expected: u64, actual: u64 },

    #[error("Connection unusable: {0}")]
    ConnectionBroken(String),

    #[error("Body exceeds {0} bytes")]
    BodyTooLarge(u64),

    #[error("Invalid HTTP version: {0}")]
    InvalidVersion(String),

    #[error("Invalid HTTP method: {0}")]
    InvalidMethod(String),

    #[error("Invalid HTTP status: {0}")]
    InvalidStatus(String),

    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    #[error("Invalid multipart body: {0}")]
    Multipart(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("TLS error: {0}")]
    Tls(String),
}

impl Error {
    /// Whether this error makes the connection unusable for keep-alive.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(
            self,
            Error::Io(_)
                | Error::ConnectionClosed
                | Error::HeaderTooLarge(_)
                | Error::ChunkFraming(_)
                | Error::PrematureClose { .. }
                | Error::ConnectionBroken(_)
                | Error::BodyTooLarge(_)
                | Error::Timeout
        )
    }
}

/// Maximum number of header fields per message
pub const MAX_HEADER_FIELDS: usize = 64;

/// Maximum length of a single header line in bytes
pub const MAX_HEADER_LINE: usize = 8192;

/// How many unread body bytes a closing reader will skip to keep the
/// connection aligned for the next request
pub const DRAIN_LIMIT: u64 = 256 * 1024;

/// CRLF line ending
pub const CRLF: &str = "\r\n";
