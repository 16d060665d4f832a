//! Framed body streams
//!
//! Both directions of HTTP body framing over the buffered connection:
//! `BodyReader` decodes fixed-length and chunked request bodies with the
//! drain-on-close contract, and `Response` frames the outgoing body
//! (fixed, chunked, or HEAD-suppressed) while enforcing the declared
//! length.
//!
//! State transitions are one-way; `Closed` is terminal in both
//! directions, and reading or writing past the declared length is an
//! error rather than silent truncation.

use super::chunked::{self, ChunkedEncoder};
use super::message::{RequestHead, ResponseHead, Status, Version};
use super::parser::ByteRange;
use super::session::Conduit;
use super::{Error, Result};
use std::io;
use std::time::SystemTime;

/// Read-side framing state
#[derive(Debug, Clone, Copy, PartialEq)]
enum ReadFraming {
    /// No body declared
    Empty,
    /// Exactly `remaining` bytes left to consume
    Fixed { remaining: u64 },
    /// Inside a chunked stream; `remaining` bytes left in the current chunk
    Chunked { remaining: usize, started: bool },
    /// Body fully consumed or stream closed
    Closed,
}

/// Decoding reader for a request body
///
/// Borrows the connection for the duration of the body. `close` must run
/// before the next request can be read: it drains unread bytes up to the
/// drain limit so the connection stays byte-aligned, and poisons the
/// connection when it cannot.
pub struct BodyReader<'a> {
    conduit: &'a mut Conduit,
    framing: ReadFraming,
    drain_limit: u64,
}

impl<'a> BodyReader<'a> {
    /// Build a reader for the body the request head declares
    pub fn for_request(conduit: &'a mut Conduit, head: &RequestHead, drain_limit: u64) -> Self {
        let framing = if head.is_chunked() {
            ReadFraming::Chunked { remaining: 0, started: false }
        } else {
            match head.content_length() {
                Some(0) | None => ReadFraming::Empty,
                Some(n) => ReadFraming::Fixed { remaining: n },
            }
        };

        BodyReader { conduit, framing, drain_limit }
    }

    /// Whether the declared body has been fully consumed
    pub fn is_complete(&self) -> bool {
        matches!(self.framing, ReadFraming::Empty | ReadFraming::Closed)
    }

    /// Read some body bytes; 0 means the body is complete
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self.framing {
            ReadFraming::Empty | ReadFraming::Closed => Ok(0),

            ReadFraming::Fixed { remaining } => {
                let want = buf.len().min(remaining.min(usize::MAX as u64) as usize);
                let n = self.conduit.read(&mut buf[..want])?;
                if n == 0 {
                    // EOF mid-body corrupts framing for good
                    self.conduit.poison("eof inside declared body");
                    return Err(Error::ConnectionClosed);
                }
                let left = remaining - n as u64;
                self.framing = if left == 0 {
                    ReadFraming::Closed
                } else {
                    ReadFraming::Fixed { remaining: left }
                };
                Ok(n)
            }

            ReadFraming::Chunked { mut remaining, started } => {
                if remaining == 0 {
                    if started {
                        if let Err(e) = chunked::read_chunk_terminator(self.conduit) {
                            return Err(self.poisoning(e));
                        }
                    }
                    remaining = match chunked::read_chunk_size(self.conduit) {
                        Ok(n) => n,
                        Err(e) => return Err(self.poisoning(e)),
                    };
                    if remaining == 0 {
                        if let Err(e) = chunked::skip_trailers(self.conduit) {
                            return Err(self.poisoning(e));
                        }
                        self.framing = ReadFraming::Closed;
                        return Ok(0);
                    }
                }

                let want = buf.len().min(remaining);
                let n = self.conduit.read(&mut buf[..want])?;
                if n == 0 {
                    self.conduit.poison("eof inside chunk");
                    return Err(Error::ConnectionClosed);
                }
                self.framing = ReadFraming::Chunked { remaining: remaining - n, started: true };
                Ok(n)
            }
        }
    }

    /// Read the whole body, failing once it exceeds `limit` bytes
    pub fn read_to_end(&mut self, limit: u64) -> Result<Vec<u8>> {
        let mut body = Vec::new();
        let mut buf = [0u8; 8192];

        loop {
            let n = self.read(&mut buf)?;
            if n == 0 {
                return Ok(body);
            }
            if body.len() as u64 + n as u64 > limit {
                self.conduit.poison("body over limit");
                return Err(Error::BodyTooLarge(limit));
            }
            body.extend_from_slice(&buf[..n]);
        }
    }

    /// Close the reader, draining unread body bytes
    ///
    /// Skips at most the drain limit; a body that cannot be drained
    /// within it leaves the connection poisoned and unusable.
    pub fn close(mut self) -> Result<()> {
        if self.is_complete() {
            return Ok(());
        }

        let mut budget = self.drain_limit;
        let mut sink = [0u8; 4096];

        loop {
            if self.is_complete() {
                return Ok(());
            }
            let want = sink.len().min(budget.min(usize::MAX as u64) as usize);
            if want == 0 {
                self.conduit.poison("undrained body past limit");
                return Err(Error::ConnectionBroken(
                    "body not drained within limit".to_string(),
                ));
            }
            match self.read(&mut sink[..want]) {
                Ok(0) => return Ok(()),
                Ok(n) => budget -= n as u64,
                Err(e) => return Err(e),
            }
        }
    }

    /// Poison the connection on a fatal framing error and pass it through
    fn poisoning(&mut self, e: Error) -> Error {
        if e.is_connection_fatal() {
            self.conduit.poison("chunk framing violation");
        }
        e
    }
}

/// Write-side framing state
#[derive(Debug, Clone, Copy, PartialEq)]
enum WriteFraming {
    /// Neither content-length nor chunked resolved yet
    Unset,
    /// Exactly `remaining` bytes still owed to the peer
    Fixed { remaining: u64 },
    /// Chunked stream open
    Chunked,
    /// Body finished
    Closed,
}

/// A response under construction
///
/// Wraps the head and the connection for one exchange. The framing
/// invariant is enforced here: exactly one of content-length or chunked
/// encoding must be resolved before body bytes flow, and a fixed-length
/// body must be written in full.
///
/// For HEAD requests all body writes are discarded while the byte
/// bookkeeping behaves as if they were sent.
pub struct Response<'a> {
    conduit: &'a mut Conduit,
    head: &'a mut ResponseHead,
    version: Version,
    suppress_body: bool,
    framing: WriteFraming,
    headers_sent: bool,
    logical_written: u64,
    started_at: Option<SystemTime>,
    abandoned: bool,
}

impl<'a> Response<'a> {
    /// Create a response for one exchange
    pub fn new(
        conduit: &'a mut Conduit,
        head: &'a mut ResponseHead,
        version: Version,
        head_request: bool,
    ) -> Self {
        Response {
            conduit,
            head,
            version,
            suppress_body: head_request,
            framing: WriteFraming::Unset,
            headers_sent: false,
            logical_written: 0,
            started_at: None,
            abandoned: false,
        }
    }

    /// Configure the status line (delegates to the head; once only)
    pub fn begin(&mut self, status: Status) -> Result<()> {
        self.head.begin(status)
    }

    /// The response head, for header and cookie manipulation
    pub fn head(&mut self) -> &mut ResponseHead {
        self.head
    }

    /// Whether the status line and headers have reached the wire
    pub fn committed(&self) -> bool {
        self.headers_sent
    }

    /// Bytes of body content produced, counting suppressed HEAD output
    pub fn logical_written(&self) -> u64 {
        self.logical_written
    }

    /// When the first header byte was written, if it was
    pub fn started_at(&self) -> Option<SystemTime> {
        self.started_at
    }

    /// Mark the response as unusable; the driver drops the connection
    pub fn abandon(&mut self) {
        self.abandoned = true;
    }

    pub fn is_abandoned(&self) -> bool {
        self.abandoned
    }

    /// Resolve a fixed-length body and send the headers
    ///
    /// Requires a configured status line and no prior framing decision.
    pub fn send_content(&mut self, len: u64) -> Result<()> {
        if self.framing != WriteFraming::Unset {
            return Err(Error::Protocol("body framing already resolved".to_string()));
        }
        self.head.set_header("Content-Length", len.to_string());
        self.head.headers_mut().remove("Transfer-Encoding");
        self.write_head()?;
        self.framing = if len == 0 {
            WriteFraming::Closed
        } else {
            WriteFraming::Fixed { remaining: len }
        };
        Ok(())
    }

    /// Resolve a chunked body and send the headers
    pub fn send_chunked(&mut self) -> Result<()> {
        if self.framing != WriteFraming::Unset {
            return Err(Error::Protocol("body framing already resolved".to_string()));
        }
        self.head.headers_mut().remove("Content-Length");
        self.head.set_header("Transfer-Encoding", "chunked");
        self.write_head()?;
        self.framing = WriteFraming::Chunked;
        Ok(())
    }

    fn write_head(&mut self) -> Result<()> {
        let wire = self.head.to_wire(self.version)?;
        self.conduit.write_all(&wire)?;
        self.headers_sent = true;
        self.started_at = Some(SystemTime::now());
        Ok(())
    }

    /// Write body bytes through the resolved framing
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        match self.framing {
            WriteFraming::Unset => Err(Error::Protocol("body framing not resolved".to_string())),
            WriteFraming::Closed => Err(Error::Protocol("body already closed".to_string())),

            WriteFraming::Fixed { remaining } => {
                if data.len() as u64 > remaining {
                    return Err(Error::Protocol(format!(
                        "write of {} bytes exceeds remaining content length {}",
                        data.len(),
                        remaining
                    )));
                }
                if !self.suppress_body {
                    self.conduit.write_all(data)?;
                }
                self.logical_written += data.len() as u64;
                let left = remaining - data.len() as u64;
                self.framing = if left == 0 {
                    WriteFraming::Closed
                } else {
                    WriteFraming::Fixed { remaining: left }
                };
                Ok(())
            }

            WriteFraming::Chunked => {
                if !self.suppress_body {
                    let mut encoder = ChunkedEncoder::new(ConduitWriter(self.conduit));
                    encoder.write_chunk(data)?;
                }
                self.logical_written += data.len() as u64;
                Ok(())
            }
        }
    }

    /// Convenience: status + content type + fixed body in one call
    pub fn send_bytes(&mut self, status: Status, content_type: &str, body: &[u8]) -> Result<()> {
        self.begin(status)?;
        self.head.set_header("Content-Type", content_type);
        self.send_content(body.len() as u64)?;
        if !body.is_empty() {
            self.write(body)?;
        }
        Ok(())
    }

    /// Serve a resource honoring an optional byte range
    ///
    /// A satisfiable range answers 206 with `Content-Range`; an absent,
    /// inverted or out-of-bounds range falls back to the whole resource
    /// with 200.
    pub fn send_with_range(
        &mut self,
        range: Option<ByteRange>,
        content_type: &str,
        body: &[u8],
    ) -> Result<()> {
        match range.and_then(|r| r.resolve(body.len() as u64)) {
            Some((start, end)) => {
                self.begin(Status::PARTIAL_CONTENT)?;
                self.head.set_header("Content-Type", content_type);
                self.head.set_content_range(start, end, body.len() as u64);
                self.send_content(end - start + 1)?;
                self.write(&body[start as usize..=end as usize])
            }
            None => self.send_bytes(Status::OK, content_type, body),
        }
    }

    /// Finish the body framing for this exchange
    ///
    /// A fixed-length body closed before its declared length is a
    /// `PrematureClose`; the connection cannot be reused after one.
    /// Closing a chunked body emits the terminal chunk.
    pub fn finish(&mut self) -> Result<()> {
        match self.framing {
            WriteFraming::Fixed { remaining } if remaining > 0 => {
                self.conduit.poison("fixed body underrun");
                self.framing = WriteFraming::Closed;
                Err(Error::PrematureClose {
                    expected: self.logical_written + remaining,
                    actual: self.logical_written,
                })
            }
            WriteFraming::Chunked => {
                if !self.suppress_body {
                    let mut encoder = ChunkedEncoder::new(ConduitWriter(self.conduit));
                    encoder.finish()?;
                }
                self.framing = WriteFraming::Closed;
                self.conduit.flush()?;
                Ok(())
            }
            _ => {
                self.framing = WriteFraming::Closed;
                self.conduit.flush()?;
                Ok(())
            }
        }
    }
}

/// `io::Write` adapter so the chunked encoder can frame onto a conduit
struct ConduitWriter<'b>(&'b mut Conduit);

impl io::Write for ConduitWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0
            .write_all(buf)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0
            .flush()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
    }
}
