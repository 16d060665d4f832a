//! HTTP/1.1 protocol driver
//!
//! Implements the server's per-connection callback: the keep-alive
//! request/response loop that wires the header model, the framed body
//! streams and the filter chain together, and emits one log entry per
//! request.
//!
//! Failure semantics: framing errors (malformed chunks, oversized
//! header blocks, premature EOF) are connection-fatal; filter errors
//! are request-scoped and the connection keeps serving when keep-alive
//! is otherwise eligible.

use super::body::{BodyReader, Response};
use super::message::{Method, RequestHead, ResponseHead, Status, Version};
use super::multipart::{self, Multipart};
use super::parser::{self, read_header_block};
use super::session::Conduit;
use super::{Error, Result, DRAIN_LIMIT, MAX_HEADER_FIELDS, MAX_HEADER_LINE};
use crate::filter::{Filter, Trace};
use crate::log::{AccessLog, LogEntry, TracingLog};
use crate::server::{Connection, ConnectionHandler, ServerConfig};
use crate::state::ConnectionState;
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Blank lines tolerated before the request line
const MAX_LEADING_BLANKS: usize = 4;

/// One parsed request as the filter chain sees it
///
/// The body is fully buffered before filters run; multipart access
/// parses it on demand.
pub struct Request {
    head: RequestHead,
    body: Bytes,
    peer: SocketAddr,
    port: u16,
    secure: bool,
}

impl Request {
    pub fn new(head: RequestHead, body: Bytes, peer: SocketAddr, port: u16, secure: bool) -> Self {
        Request { head, body, peer, port, secure }
    }

    pub fn head(&self) -> &RequestHead {
        &self.head
    }

    pub fn head_mut(&mut self) -> &mut RequestHead {
        &mut self.head
    }

    /// The buffered request body
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Split the body as multipart/form-data
    pub fn multipart(&self) -> Result<Multipart> {
        let content_type = self
            .head
            .headers()
            .get("Content-Type")
            .ok_or_else(|| Error::Multipart("no content type".to_string()))?;
        multipart::parse(content_type, &self.body)
    }

    /// The client address
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// The listening port the request arrived on
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }

    fn into_head(self) -> RequestHead {
        self.head
    }
}

/// The HTTP protocol driver
///
/// Owns the root filter and the log sink; one instance serves every
/// connection of a server.
pub struct HttpDriver {
    root: Arc<dyn Filter>,
    log: Arc<dyn AccessLog>,
    read_timeout: Duration,
    max_header_line: usize,
    max_header_fields: usize,
    max_body: u64,
    drain_limit: u64,
}

impl HttpDriver {
    /// Create a driver with default limits and the tracing log sink
    pub fn new(root: Arc<dyn Filter>) -> Self {
        HttpDriver {
            root,
            log: Arc::new(TracingLog),
            read_timeout: Duration::from_secs(30),
            max_header_line: MAX_HEADER_LINE,
            max_header_fields: MAX_HEADER_FIELDS,
            max_body: 16 * 1024 * 1024,
            drain_limit: DRAIN_LIMIT,
        }
    }

    /// Replace the log sink
    pub fn with_log(mut self, log: Arc<dyn AccessLog>) -> Self {
        self.log = log;
        self
    }

    /// Copy timeouts and protocol limits from a server configuration
    pub fn with_limits(mut self, config: &ServerConfig) -> Self {
        self.read_timeout = config.read_timeout;
        self.max_header_line = config.max_header_line;
        self.max_header_fields = config.max_header_fields;
        self.max_body = config.max_body;
        self.drain_limit = config.drain_limit;
        self
    }

    /// The root filter
    pub fn root(&self) -> &Arc<dyn Filter> {
        &self.root
    }

    /// Close the filter chain; safe to call once at shutdown
    pub fn close(&self) {
        self.root.close();
    }

    /// Serve one request; returns whether the connection may be reused
    #[allow(clippy::too_many_arguments)]
    fn serve_one(
        &self,
        conduit: &mut Conduit,
        state: &mut ConnectionState,
        req_head: &mut RequestHead,
        resp_head: &mut ResponseHead,
        peer: SocketAddr,
        port: u16,
        secure: bool,
    ) -> bool {
        req_head.reset();
        resp_head.reset();

        let bytes_in_start = conduit.bytes_in();
        let bytes_out_start = conduit.bytes_out();

        // Request line, tolerating a few leading blank lines
        let mut blanks = 0;
        let line = loop {
            match conduit.read_line(self.max_header_line) {
                Ok(line) if line.is_empty() => {
                    blanks += 1;
                    if blanks > MAX_LEADING_BLANKS {
                        return false;
                    }
                }
                Ok(line) => break line,
                Err(Error::ConnectionClosed) => {
                    // Peer ended the keep-alive quietly
                    return false;
                }
                Err(Error::LineTooLong(n)) => {
                    let e = Error::HeaderTooLarge(format!("request line exceeds {} bytes", n));
                    self.reject(conduit, resp_head, Status::PAYLOAD_TOO_LARGE);
                    self.log.on_socket_error(port, secure, Some(peer), &e);
                    return false;
                }
                Err(e) => {
                    self.log.on_socket_error(port, secure, Some(peer), &e);
                    return false;
                }
            }
        };

        let received_at = SystemTime::now();

        let (method, target, version) = match parser::parse_request_line(&line) {
            Ok(parts) => parts,
            Err(e) => {
                tracing::debug!(%peer, error = %e, "malformed request line");
                self.reject(conduit, resp_head, Status::BAD_REQUEST);
                return false;
            }
        };

        let headers = match read_header_block(conduit, self.max_header_line, self.max_header_fields) {
            Ok(headers) => headers,
            Err(e @ Error::HeaderTooLarge(_)) => {
                self.reject(conduit, resp_head, Status::PAYLOAD_TOO_LARGE);
                self.log.on_socket_error(port, secure, Some(peer), &e);
                return false;
            }
            Err(e) => {
                self.log.on_socket_error(port, secure, Some(peer), &e);
                return false;
            }
        };

        req_head.populate(method, target, version, headers);
        let close_after = req_head.wants_close();
        let head_request = method == Method::Head;
        let processing_started = SystemTime::now();

        // Interim response before the body is read
        if version == Version::Http11 && (req_head.expects_continue() || method == Method::Post) {
            if conduit.write_all(b"HTTP/1.1 100 Continue\r\n\r\n").is_err() {
                return false;
            }
        }

        // The body is buffered up front; the reader drains what filters
        // would otherwise leave on the wire
        let body = {
            let mut reader = BodyReader::for_request(conduit, req_head, self.drain_limit);
            match reader.read_to_end(self.max_body) {
                Ok(bytes) => Bytes::from(bytes),
                Err(e @ Error::BodyTooLarge(_)) => {
                    self.reject(conduit, resp_head, Status::PAYLOAD_TOO_LARGE);
                    self.log.on_socket_error(port, secure, Some(peer), &e);
                    return false;
                }
                Err(e) => {
                    self.log.on_socket_error(port, secure, Some(peer), &e);
                    return false;
                }
            }
        };

        let mut request = Request::new(std::mem::take(req_head), body, peer, port, secure);

        let (trace, content_length, response_started, abandoned, finished) = {
            let mut response = Response::new(conduit, resp_head, version, head_request);
            let trace = self
                .root
                .invoke(Trace::root(), &mut request, &mut response, state);

            if !response.committed() {
                self.synthesize(&mut response, &trace);
            }

            let finished = response.finish().is_ok();
            (
                trace,
                response.logical_written(),
                response.started_at(),
                response.is_abandoned(),
                finished,
            )
        };

        *req_head = request.into_head();

        let entry = LogEntry {
            received_at,
            processing_started,
            response_started,
            response_sent: SystemTime::now(),
            bytes_read: conduit.bytes_in() - bytes_in_start,
            bytes_written: conduit.bytes_out() - bytes_out_start,
            content_length,
            method,
            target: req_head.target().to_string(),
            status: resp_head.status().map(|s| s.code()),
            peer,
            port,
            secure,
            trace,
            request_headers: req_head.headers().clone(),
            response_headers: resp_head.headers().clone(),
        };
        self.log.on_request(&entry);

        finished && !abandoned && !conduit.is_poisoned() && !close_after
    }

    /// Produce a response when the chain did not
    ///
    /// A recorded error becomes a generic 500 page - never a stack
    /// trace; a chain that simply declined becomes a 404. A filter that
    /// configured a status without sending anything gets an empty body
    /// with its chosen status.
    fn synthesize(&self, response: &mut Response<'_>, trace: &Trace) {
        if response.head().status().is_some() {
            let _ = response.send_content(0);
            return;
        }

        let (status, page) = if trace.primary_error().is_some() {
            (
                Status::INTERNAL_SERVER_ERROR,
                "<html><body><h1>500 Internal Server Error</h1></body></html>",
            )
        } else {
            (
                Status::NOT_FOUND,
                "<html><body><h1>404 Not Found</h1></body></html>",
            )
        };
        let _ = response.send_bytes(status, "text/html", page.as_bytes());
    }

    /// Answer a protocol-level rejection and give up on the connection
    fn reject(&self, conduit: &mut Conduit, resp_head: &mut ResponseHead, status: Status) {
        resp_head.reset();
        let mut response = Response::new(conduit, resp_head, Version::Http11, false);
        if response.begin(status).is_ok() {
            response.head().set_header("Connection", "close");
            let page = format!("<html><body><h1>{}</h1></body></html>", status);
            response.head().set_header("Content-Type", "text/html");
            if response.send_content(page.len() as u64).is_ok() {
                let _ = response.write(page.as_bytes());
            }
            let _ = response.finish();
        }
    }
}

impl ConnectionHandler for HttpDriver {
    fn handle(&self, conn: Connection) {
        let peer = conn.peer();
        let port = conn.port();
        let secure = conn.is_secure();

        let mut conduit = Conduit::new(conn.into_session(), Some(self.read_timeout));
        let mut state = ConnectionState::new();
        let mut req_head = RequestHead::new();
        let mut resp_head = ResponseHead::new();

        while self.serve_one(
            &mut conduit,
            &mut state,
            &mut req_head,
            &mut resp_head,
            peer,
            port,
            secure,
        ) {}

        let _ = conduit.close();
        tracing::debug!(%peer, port, "connection finished");
        // state drops here, releasing everything filters stored
    }

    fn on_shutdown(&self) {
        self.root.close();
    }
}
