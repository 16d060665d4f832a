//! Session operations abstraction and buffered connection I/O
//!
//! `SessionOps` abstracts the transport so the protocol code is
//! transparent to plain TCP vs TLS. `Conduit` layers a read buffer,
//! poll-based timeouts, line reading with a hard cap, and byte
//! accounting on top of a boxed session.
//!
//! A `Conduit` can be poisoned: once a framing invariant is broken the
//! connection is never reused for another request.

use super::{Error, Result};
use bytes::{Buf, BytesMut};
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::os::fd::AsRawFd;
use std::time::Duration;

/// Session operations trait
///
/// Defines the operations that can be performed on a connection,
/// abstracting over plain TCP and TLS transports. Implementations move
/// into worker threads, so `Send` is part of the contract.
pub trait SessionOps: Send {
    /// Poll the session for readiness
    ///
    /// Returns true if the session is ready for the requested operation
    fn poll(&self, events: PollEvents, timeout: Option<Duration>) -> Result<bool>;

    /// Read data from the session
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Write data to the session
    fn write(&mut self, buf: &[u8]) -> Result<usize>;

    /// Flush buffered writes
    fn flush(&mut self) -> Result<()>;

    /// Close the session
    fn close(&mut self) -> Result<()>;
}

/// Poll events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollEvents {
    Read,
    Write,
}

/// Plain TCP session operations
pub struct FdSessionOps {
    stream: TcpStream,
}

impl FdSessionOps {
    /// Create session operations from a TCP stream
    pub fn new(stream: TcpStream) -> Self {
        FdSessionOps { stream }
    }

    /// Get a reference to the underlying stream
    pub fn stream(&self) -> &TcpStream {
        &self.stream
    }
}

impl SessionOps for FdSessionOps {
    fn poll(&self, events: PollEvents, timeout: Option<Duration>) -> Result<bool> {
        poll_fd(self.stream.as_raw_fd(), events, timeout)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.stream.read(buf).map_err(Error::from)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.stream.write(buf).map_err(Error::from)
    }

    fn flush(&mut self) -> Result<()> {
        self.stream.flush().map_err(Error::from)
    }

    fn close(&mut self) -> Result<()> {
        use std::net::Shutdown;
        self.stream.shutdown(Shutdown::Both).map_err(Error::from)
    }
}

/// Poll a raw fd for readiness with an optional timeout
pub(crate) fn poll_fd(fd: i32, events: PollEvents, timeout: Option<Duration>) -> Result<bool> {
    use libc::{poll, pollfd, POLLIN, POLLOUT};

    let mut pfd = pollfd {
        fd,
        events: match events {
            PollEvents::Read => POLLIN,
            PollEvents::Write => POLLOUT,
        },
        revents: 0,
    };

    let timeout_ms = timeout.map(|d| d.as_millis() as i32).unwrap_or(-1);

    let result = unsafe { poll(&mut pfd as *mut pollfd, 1, timeout_ms) };

    if result < 0 {
        return Err(Error::Io(io::Error::last_os_error()));
    }

    Ok(result > 0)
}

/// Buffered, timeout-bounded connection I/O
///
/// Owns the session for the connection's lifetime. Reads go through an
/// internal buffer so header lines and body bytes can interleave without
/// losing carry-over; all reads and writes are bounded by the configured
/// timeout via `poll`.
pub struct Conduit {
    ops: Box<dyn SessionOps>,
    timeout: Option<Duration>,
    rbuf: BytesMut,
    bytes_in: u64,
    bytes_out: u64,
    poisoned: Option<String>,
}

impl Conduit {
    /// Wrap a session with the given read/write timeout
    pub fn new(ops: Box<dyn SessionOps>, timeout: Option<Duration>) -> Self {
        Conduit {
            ops,
            timeout,
            rbuf: BytesMut::with_capacity(8192),
            bytes_in: 0,
            bytes_out: 0,
            poisoned: None,
        }
    }

    /// Set the timeout for subsequent operations
    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    /// Total bytes consumed from the transport
    pub fn bytes_in(&self) -> u64 {
        self.bytes_in
    }

    /// Total bytes written to the transport
    pub fn bytes_out(&self) -> u64 {
        self.bytes_out
    }

    /// Mark the connection unusable for further requests
    pub fn poison(&mut self, reason: impl Into<String>) {
        if self.poisoned.is_none() {
            self.poisoned = Some(reason.into());
        }
    }

    /// Whether a framing invariant has been broken on this connection
    pub fn is_poisoned(&self) -> bool {
        self.poisoned.is_some()
    }

    /// Pull more bytes from the session into the read buffer
    ///
    /// Returns the number of new bytes, 0 at EOF.
    fn fill(&mut self) -> Result<usize> {
        if !self.ops.poll(PollEvents::Read, self.timeout)? {
            return Err(Error::Timeout);
        }

        let mut tmp = [0u8; 4096];
        let n = self.ops.read(&mut tmp)?;
        self.rbuf.extend_from_slice(&tmp[..n]);
        self.bytes_in += n as u64;
        Ok(n)
    }

    /// Read one line, stripping the trailing CRLF (or bare LF)
    ///
    /// Fails with `LineTooLong` once the line exceeds `max` bytes and
    /// with `ConnectionClosed` on EOF mid-line.
    pub fn read_line(&mut self, max: usize) -> Result<String> {
        loop {
            if let Some(nl) = self.rbuf.iter().position(|&b| b == b'\n') {
                if nl > max {
                    return Err(Error::LineTooLong(max));
                }
                let mut line = self.rbuf.split_to(nl + 1);
                line.truncate(nl);
                if line.last() == Some(&b'\r') {
                    line.truncate(line.len() - 1);
                }
                return Ok(String::from_utf8_lossy(&line).into_owned());
            }

            if self.rbuf.len() > max {
                return Err(Error::LineTooLong(max));
            }
            if self.fill()? == 0 {
                return Err(Error::ConnectionClosed);
            }
        }
    }

    /// Read up to `buf.len()` bytes, serving buffered bytes first
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.rbuf.is_empty() && self.fill()? == 0 {
            return Ok(0);
        }

        let n = buf.len().min(self.rbuf.len());
        buf[..n].copy_from_slice(&self.rbuf[..n]);
        self.rbuf.advance(n);
        Ok(n)
    }

    /// Read exactly `buf.len()` bytes or fail with `ConnectionClosed`
    pub fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.read(&mut buf[filled..])?;
            if n == 0 {
                return Err(Error::ConnectionClosed);
            }
            filled += n;
        }
        Ok(())
    }

    /// Discard up to `limit` bytes; returns how many were skipped
    ///
    /// Stops early at EOF without error - the caller decides whether a
    /// short skip breaks an invariant.
    pub fn skip(&mut self, limit: u64) -> Result<u64> {
        let mut skipped = 0u64;
        let mut sink = [0u8; 4096];

        while skipped < limit {
            let want = sink.len().min((limit - skipped) as usize);
            let n = self.read(&mut sink[..want])?;
            if n == 0 {
                break;
            }
            skipped += n as u64;
        }
        Ok(skipped)
    }

    /// Write the whole buffer
    pub fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        let mut written = 0;
        while written < buf.len() {
            if !self.ops.poll(PollEvents::Write, self.timeout)? {
                return Err(Error::Timeout);
            }
            let n = self.ops.write(&buf[written..])?;
            if n == 0 {
                return Err(Error::ConnectionClosed);
            }
            written += n;
            self.bytes_out += n as u64;
        }
        Ok(())
    }

    /// Flush buffered transport writes
    pub fn flush(&mut self) -> Result<()> {
        self.ops.flush()
    }

    /// Close the underlying session
    pub fn close(&mut self) -> Result<()> {
        self.ops.close()
    }
}
