//! TLS support for secure listeners
//!
//! The engine delegates all protocol work to OpenSSL; this module only
//! adapts an accepted `SslStream` to the `SessionOps` abstraction so the
//! HTTP layer stays transparent to the transport.

use super::session::{poll_fd, PollEvents, SessionOps};
use super::{Error, Result};
use openssl::ssl::{SslAcceptor, SslFiletype, SslMethod};
use std::io::{Read, Write};
use std::net::TcpStream;
use std::os::fd::AsRawFd;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Server-side TLS context
///
/// Built once at configuration time and shared by every secure
/// listener; `accept` runs the handshake for one connection.
#[derive(Clone)]
pub struct TlsContext {
    acceptor: Arc<SslAcceptor>,
}

impl TlsContext {
    /// Build a context from PEM certificate and private-key files
    pub fn from_pem_files(cert: impl AsRef<Path>, key: impl AsRef<Path>) -> Result<Self> {
        let mut builder = SslAcceptor::mozilla_intermediate(SslMethod::tls())
            .map_err(|e| Error::Tls(e.to_string()))?;
        builder
            .set_private_key_file(key, SslFiletype::PEM)
            .map_err(|e| Error::Tls(e.to_string()))?;
        builder
            .set_certificate_chain_file(cert)
            .map_err(|e| Error::Tls(e.to_string()))?;

        Ok(TlsContext {
            acceptor: Arc::new(builder.build()),
        })
    }

    /// Run the server-side handshake on an accepted stream
    pub fn accept(&self, stream: TcpStream) -> Result<TlsSessionOps> {
        let ssl_stream = self
            .acceptor
            .accept(stream)
            .map_err(|e| Error::Tls(format!("handshake failed: {}", e)))?;

        Ok(TlsSessionOps {
            stream: ssl_stream,
            failed: false,
        })
    }
}

/// TLS session operations
///
/// Wraps an OpenSSL stream. I/O failure latches the session as failed
/// so close skips the shutdown alert on a broken transport.
pub struct TlsSessionOps {
    stream: openssl::ssl::SslStream<TcpStream>,
    failed: bool,
}

impl SessionOps for TlsSessionOps {
    fn poll(&self, events: PollEvents, timeout: Option<Duration>) -> Result<bool> {
        // Bytes already decrypted inside the SSL buffer won't show on the fd
        if events == PollEvents::Read && self.stream.ssl().pending() > 0 {
            return Ok(true);
        }
        poll_fd(self.stream.get_ref().as_raw_fd(), events, timeout)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self.stream.read(buf) {
            Ok(n) => Ok(n),
            Err(e) => {
                self.failed = true;
                Err(Error::Io(e))
            }
        }
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        match self.stream.write(buf) {
            Ok(n) => Ok(n),
            Err(e) => {
                self.failed = true;
                Err(Error::Io(e))
            }
        }
    }

    fn flush(&mut self) -> Result<()> {
        self.stream.flush().map_err(|e| {
            self.failed = true;
            Error::Io(e)
        })
    }

    fn close(&mut self) -> Result<()> {
        if !self.failed {
            let _ = self.stream.shutdown();
        }

        use std::net::Shutdown;
        self.stream
            .get_mut()
            .shutdown(Shutdown::Both)
            .map_err(Error::from)
    }
}
