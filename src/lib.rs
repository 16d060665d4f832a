//! Hearth - an embeddable HTTP/1.1 server engine
//!
//! This crate provides a blocking, thread-per-connection HTTP/1.1 server:
//! a TCP connection acceptor, a bounded worker pool, byte-exact
//! request/response framing (content-length bodies, chunked transfer
//! encoding, byte ranges, multipart forms), and a composable filter chain
//! for request handling.
//!
//! # Architecture
//!
//! The engine is layered bottom-up:
//!
//! - `http::session` abstracts the transport (`SessionOps` for plain TCP
//!   and TLS) and buffers connection I/O
//! - `http` holds the header model, body framing and the protocol driver
//! - `filter` defines the composable request-handling contract
//! - `server` owns listening sockets and the bounded worker pool
//!
//! # Examples
//!
//! ```no_run
//! use std::sync::Arc;
//! use hearth::filter::{FilterError, FilterFn};
//! use hearth::http::body::Response;
//! use hearth::http::driver::Request;
//! use hearth::http::Status;
//! use hearth::state::ConnectionState;
//! use hearth::{HttpDriver, Server, ServerConfig};
//!
//! let hello = Arc::new(FilterFn::new(
//!     "hello",
//!     |_req: &mut Request,
//!      resp: &mut Response<'_>,
//!      _state: &mut ConnectionState|
//!      -> Result<bool, FilterError> {
//!         resp.send_bytes(Status::OK, "text/plain", b"hello")?;
//!         Ok(true)
//!     },
//! ));
//!
//! let driver = Arc::new(HttpDriver::new(hello));
//! let server = Server::new(ServerConfig::default(), driver);
//! server.listen(8080, false, "0.0.0.0").unwrap();
//! server.join();
//! ```

pub mod filter;
pub mod http;
pub mod log;
pub mod server;
pub mod state;

pub use filter::{Filter, Outcome, Trace, Verdict};
pub use http::driver::HttpDriver;
pub use log::{AccessLog, LogEntry, TracingLog};
pub use server::{Connection, ConnectionHandler, Server, ServerConfig};
pub use state::ConnectionState;
