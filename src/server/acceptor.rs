//! Listening sockets and the accept loop
//!
//! One accept thread per bound port. Accepted connections are tuned via
//! the handler's socket hook, optionally TLS-wrapped, and submitted to
//! the worker pool - a submission that blocks when the pool is
//! saturated, which is what throttles acceptance under load.
//!
//! Accept failures are reported through the handler hook and never
//! terminate the loop; a burst of consecutive failures backs off
//! briefly instead of spinning.

use super::{Connection, ConnectionHandler, ServerConfig, WorkerPool};
use crate::http::session::{FdSessionOps, SessionOps};
use crate::http::tls::TlsContext;
use crate::http::{Error, Result};
use socket2::{Domain, Socket, Type};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

/// Listen backlog for new sockets
const BACKLOG: i32 = 128;

/// In-flight connection registry, for forced close at shutdown
#[derive(Default)]
struct ConnRegistry {
    next_id: AtomicU64,
    streams: Mutex<HashMap<u64, TcpStream>>,
}

impl ConnRegistry {
    fn add(&self, stream: &TcpStream) -> Option<u64> {
        let clone = stream.try_clone().ok()?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.streams.lock().unwrap().insert(id, clone);
        Some(id)
    }

    fn remove(&self, id: u64) {
        self.streams.lock().unwrap().remove(&id);
    }

    fn close_all(&self) {
        use std::net::Shutdown;
        let streams: Vec<_> = self.streams.lock().unwrap().drain().collect();
        for (_, stream) in streams {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}

struct ListenerHandle {
    port: u16,
    socket: Socket,
    thread: thread::JoinHandle<()>,
    closed: Arc<AtomicBool>,
}

/// The connection acceptor
///
/// Owns the listening sockets and the worker pool; multiple ports may
/// be bound concurrently. `close` shuts every listener and forcibly
/// closes in-flight connections.
pub struct Server {
    config: ServerConfig,
    handler: Arc<dyn ConnectionHandler>,
    pool: Arc<WorkerPool>,
    tls: Option<TlsContext>,
    listeners: Mutex<Vec<ListenerHandle>>,
    closing: Arc<AtomicBool>,
    registry: Arc<ConnRegistry>,
}

impl Server {
    /// Create a server around a protocol handler
    pub fn new(config: ServerConfig, handler: Arc<dyn ConnectionHandler>) -> Self {
        let pool = Arc::new(WorkerPool::new(
            config.core_threads,
            config.max_threads,
            config.idle_timeout,
        ));

        Server {
            config,
            handler,
            pool,
            tls: None,
            listeners: Mutex::new(Vec::new()),
            closing: Arc::new(AtomicBool::new(false)),
            registry: Arc::new(ConnRegistry::default()),
        }
    }

    /// Install the TLS context used by secure listeners
    pub fn with_tls(mut self, tls: TlsContext) -> Self {
        self.tls = Some(tls);
        self
    }

    /// The worker pool, for introspection
    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Bind a port and start accepting
    ///
    /// Returns the actual bound port (useful when asking for port 0).
    /// Each listener is independent; binding several ports shares one
    /// worker pool.
    pub fn listen(&self, port: u16, secure: bool, bind_addr: &str) -> Result<u16> {
        if secure && self.tls.is_none() {
            return Err(Error::Tls("no TLS context configured".to_string()));
        }

        let ip: IpAddr = bind_addr
            .parse()
            .map_err(|_| Error::Protocol(format!("bad bind address: {}", bind_addr)))?;
        let addr = SocketAddr::new(ip, port);

        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, None)?;
        socket.set_reuse_address(true)?;
        socket.bind(&addr.into())?;
        socket.listen(BACKLOG)?;

        let shutdown_handle = socket.try_clone()?;
        let listener: TcpListener = socket.into();
        let bound_port = listener.local_addr()?.port();

        let closed = Arc::new(AtomicBool::new(false));
        let thread = {
            let config = self.config.clone();
            let handler = Arc::clone(&self.handler);
            let pool = Arc::clone(&self.pool);
            let closing = Arc::clone(&self.closing);
            let closed = Arc::clone(&closed);
            let registry = Arc::clone(&self.registry);
            let tls = self.tls.clone();

            thread::Builder::new()
                .name(format!("hearth-accept-{}", bound_port))
                .spawn(move || {
                    accept_loop(
                        listener, bound_port, secure, config, handler, pool, closing, closed,
                        registry, tls,
                    )
                })
                .map_err(Error::Io)?
        };

        self.listeners.lock().unwrap().push(ListenerHandle {
            port: bound_port,
            socket: shutdown_handle,
            thread,
            closed,
        });

        tracing::info!(port = bound_port, secure, "listening");
        Ok(bound_port)
    }

    /// Ports currently bound
    pub fn ports(&self) -> Vec<u16> {
        self.listeners.lock().unwrap().iter().map(|l| l.port).collect()
    }

    /// Close a single listener, leaving the others serving
    ///
    /// In-flight connections are not touched; only new accepts stop.
    pub fn close_port(&self, port: u16) {
        let handle = {
            let mut listeners = self.listeners.lock().unwrap();
            let idx = listeners.iter().position(|l| l.port == port);
            idx.map(|i| listeners.remove(i))
        };

        if let Some(handle) = handle {
            handle.closed.store(true, Ordering::SeqCst);
            let _ = handle.socket.shutdown(std::net::Shutdown::Both);
            let _ = handle.thread.join();
            tracing::info!(port, "listener closed");
        }
    }

    /// Stop listening, force-close in-flight connections, drain the pool
    pub fn close(&self) {
        self.closing.store(true, Ordering::SeqCst);

        let handles: Vec<_> = self.listeners.lock().unwrap().drain(..).collect();
        for handle in &handles {
            // Unblocks the accept call so the loop observes the flag
            let _ = handle.socket.shutdown(std::net::Shutdown::Both);
        }

        // Unblock workers stuck on connection I/O, then drain the pool;
        // a saturated accept loop blocked in submit is released by the
        // pool shutdown and exits on its own.
        self.registry.close_all();
        self.pool.shutdown();

        for handle in handles {
            let _ = handle.thread.join();
            tracing::info!(port = handle.port, "listener closed");
        }

        self.handler.on_shutdown();
    }

    /// Block until every listener thread exits
    pub fn join(&self) {
        let handles: Vec<_> = self.listeners.lock().unwrap().drain(..).collect();
        for handle in handles {
            let _ = handle.thread.join();
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn accept_loop(
    listener: TcpListener,
    port: u16,
    secure: bool,
    config: ServerConfig,
    handler: Arc<dyn ConnectionHandler>,
    pool: Arc<WorkerPool>,
    closing: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
    registry: Arc<ConnRegistry>,
    tls: Option<TlsContext>,
) {
    let mut consecutive_errors = 0u32;
    let done = || closing.load(Ordering::SeqCst) || closed.load(Ordering::SeqCst);

    loop {
        let (stream, peer) = match listener.accept() {
            Ok(accepted) => {
                consecutive_errors = 0;
                accepted
            }
            Err(e) => {
                if done() {
                    return;
                }
                handler.on_accept_error(port, secure, &e);
                consecutive_errors += 1;
                if consecutive_errors >= config.accept_error_threshold {
                    thread::sleep(config.accept_error_pause);
                }
                continue;
            }
        };

        if done() {
            return;
        }

        if let Err(e) = handler.configure_socket(&stream, &config) {
            handler.on_accept_error(port, secure, &e);
            continue;
        }

        let conn_id = registry.add(&stream);

        let session: Box<dyn SessionOps> = match &tls {
            Some(ctx) => match ctx.accept(stream) {
                Ok(tls_session) => Box::new(tls_session),
                Err(e) => {
                    tracing::warn!(port, %peer, error = %e, "tls accept failed");
                    if let Some(id) = conn_id {
                        registry.remove(id);
                    }
                    continue;
                }
            },
            None => Box::new(FdSessionOps::new(stream)),
        };

        let conn = Connection::new(session, peer, port, secure);

        let job_handler = Arc::clone(&handler);
        let job_registry = Arc::clone(&registry);
        // Blocks when the pool is saturated - the backpressure point
        let submitted = pool.submit(move || {
            job_handler.handle(conn);
            if let Some(id) = conn_id {
                job_registry.remove(id);
            }
        });

        if !submitted {
            return;
        }
    }
}
