//! Connection acceptor and worker pool
//!
//! The protocol-agnostic half of the engine: listening sockets, the
//! accept loop, and the bounded pool of worker threads that own
//! connections. A protocol implementation plugs in through the
//! `ConnectionHandler` trait; HTTP lives in `http::driver`.

pub mod acceptor;
pub mod pool;

pub use acceptor::Server;
pub use pool::WorkerPool;

use crate::http::session::SessionOps;
use crate::http::{DRAIN_LIMIT, MAX_HEADER_FIELDS, MAX_HEADER_LINE};
use socket2::SockRef;
use std::io;
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

/// Engine configuration
///
/// Covers socket tuning, pool sizing and protocol limits. Values are
/// supplied by the embedder; the engine does no config loading of its
/// own.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Per-socket read/write readiness timeout
    pub read_timeout: Duration,
    /// Kernel receive buffer size, if overridden
    pub recv_buffer: Option<usize>,
    /// Kernel send buffer size, if overridden
    pub send_buffer: Option<usize>,
    /// SO_LINGER duration, if set
    pub linger: Option<Duration>,
    /// Worker threads kept alive when idle
    pub core_threads: usize,
    /// Hard ceiling on worker threads; reaching it blocks the acceptor
    pub max_threads: usize,
    /// How long a surplus worker waits for work before exiting
    pub idle_timeout: Duration,
    /// Maximum bytes in one header line
    pub max_header_line: usize,
    /// Maximum header fields per request
    pub max_header_fields: usize,
    /// Maximum buffered request body size in bytes
    pub max_body: u64,
    /// Unread body bytes drained on close before the connection is dropped
    pub drain_limit: u64,
    /// Consecutive accept failures before the loop backs off
    pub accept_error_threshold: u32,
    /// How long the accept loop sleeps when saturated with errors
    pub accept_error_pause: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            read_timeout: Duration::from_secs(30),
            recv_buffer: None,
            send_buffer: None,
            linger: None,
            core_threads: 4,
            max_threads: 64,
            idle_timeout: Duration::from_secs(60),
            max_header_line: MAX_HEADER_LINE,
            max_header_fields: MAX_HEADER_FIELDS,
            max_body: 16 * 1024 * 1024,
            drain_limit: DRAIN_LIMIT,
            accept_error_threshold: 8,
            accept_error_pause: Duration::from_millis(100),
        }
    }
}

impl ServerConfig {
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn buffers(mut self, recv: usize, send: usize) -> Self {
        self.recv_buffer = Some(recv);
        self.send_buffer = Some(send);
        self
    }

    pub fn pool(mut self, core: usize, max: usize, idle: Duration) -> Self {
        self.core_threads = core;
        self.max_threads = max.max(core.max(1));
        self.idle_timeout = idle;
        self
    }

    pub fn header_limits(mut self, max_line: usize, max_fields: usize) -> Self {
        self.max_header_line = max_line;
        self.max_header_fields = max_fields;
        self
    }

    pub fn max_body(mut self, bytes: u64) -> Self {
        self.max_body = bytes;
        self
    }
}

/// One accepted connection
///
/// Owned exclusively by a worker thread for its lifetime and destroyed
/// when the protocol loop exits.
pub struct Connection {
    session: Box<dyn SessionOps>,
    peer: SocketAddr,
    port: u16,
    secure: bool,
}

impl Connection {
    pub fn new(session: Box<dyn SessionOps>, peer: SocketAddr, port: u16, secure: bool) -> Self {
        Connection { session, peer, port, secure }
    }

    /// The client address
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// The listening port this connection arrived on
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Whether the transport is TLS-wrapped
    pub fn is_secure(&self) -> bool {
        self.secure
    }

    /// Consume the connection, yielding the raw session
    pub fn into_session(self) -> Box<dyn SessionOps> {
        self.session
    }
}

/// Per-connection protocol entry point
///
/// The acceptor calls `configure_socket` once at accept time and
/// `handle` from a worker thread. Both hooks have defaults; protocol
/// drivers override `handle` and, where needed, the socket tuning.
pub trait ConnectionHandler: Send + Sync {
    /// Run the protocol for one connection; the connection is dropped
    /// when this returns
    fn handle(&self, conn: Connection);

    /// Apply per-socket options at accept time
    fn configure_socket(&self, stream: &TcpStream, config: &ServerConfig) -> io::Result<()> {
        stream.set_nodelay(true)?;

        let sock = SockRef::from(stream);
        if let Some(size) = config.recv_buffer {
            sock.set_recv_buffer_size(size)?;
        }
        if let Some(size) = config.send_buffer {
            sock.set_send_buffer_size(size)?;
        }
        sock.set_linger(config.linger)?;
        Ok(())
    }

    /// Report a failed accept attempt; must not panic
    fn on_accept_error(&self, port: u16, secure: bool, error: &io::Error) {
        tracing::warn!(port, secure, %error, "accept failed");
    }

    /// Release handler resources; called once when the server closes
    fn on_shutdown(&self) {}
}
