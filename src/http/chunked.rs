//! Chunked transfer encoding
//!
//! Encoder for arbitrary writers and the line-level decode primitives
//! used by the streaming body reader. Any framing violation on the
//! decode side is a `ChunkFraming` error and aborts the connection, not
//! just the request - resynchronizing inside a corrupt chunk stream is
//! not possible.

use super::session::Conduit;
use super::{Error, Result, CRLF};
use std::io::Write;

/// Maximum length of a chunk-size line, incl. extensions
const MAX_CHUNK_LINE: usize = 1024;

/// Maximum number of trailer lines tolerated after the last chunk
const MAX_TRAILERS: usize = 32;

/// Chunked encoder
///
/// Each write emits `<hex-length>\r\n<data>\r\n`; `finish` emits the
/// terminal zero-length chunk. Trailers are never produced. Empty writes
/// are skipped - a bare zero chunk would terminate the body early.
pub struct ChunkedEncoder<W: Write> {
    writer: W,
}

impl<W: Write> ChunkedEncoder<W> {
    /// Create a new chunked encoder
    pub fn new(writer: W) -> Self {
        ChunkedEncoder { writer }
    }

    /// Write a chunk of data
    pub fn write_chunk(&mut self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }

        write!(self.writer, "{:x}{}", data.len(), CRLF)?;
        self.writer.write_all(data)?;
        self.writer.write_all(CRLF.as_bytes())?;
        Ok(())
    }

    /// Write the terminal zero-length chunk
    pub fn finish(&mut self) -> Result<()> {
        write!(self.writer, "0{}{}", CRLF, CRLF)?;
        self.writer.flush()?;
        Ok(())
    }

    /// Consume the encoder and return the underlying writer
    pub fn into_inner(self) -> W {
        self.writer
    }
}

/// Read and parse one chunk-size line
///
/// Chunk extensions (after `;`) are ignored. Malformed hex or an
/// oversized line is fatal.
pub fn read_chunk_size(conduit: &mut Conduit) -> Result<usize> {
    let line = match conduit.read_line(MAX_CHUNK_LINE) {
        Ok(line) => line,
        Err(Error::LineTooLong(_)) => {
            return Err(Error::ChunkFraming("chunk size line too long".to_string()))
        }
        Err(e) => return Err(e),
    };

    let size_str = line.split(';').next().unwrap_or("").trim();
    if size_str.is_empty() {
        return Err(Error::ChunkFraming("empty chunk size".to_string()));
    }

    usize::from_str_radix(size_str, 16)
        .map_err(|_| Error::ChunkFraming(format!("bad chunk size: {:?}", size_str)))
}

/// Consume the CRLF that must follow each chunk's data
pub fn read_chunk_terminator(conduit: &mut Conduit) -> Result<()> {
    let mut crlf = [0u8; 2];
    conduit.read_exact(&mut crlf)?;
    if &crlf != b"\r\n" {
        return Err(Error::ChunkFraming("missing CRLF after chunk data".to_string()));
    }
    Ok(())
}

/// Skip optional trailer lines after the terminal chunk
///
/// Trailer contents are discarded; the body ends at the empty line.
pub fn skip_trailers(conduit: &mut Conduit) -> Result<()> {
    for _ in 0..MAX_TRAILERS {
        let line = match conduit.read_line(MAX_CHUNK_LINE) {
            Ok(line) => line,
            Err(Error::LineTooLong(_)) => {
                return Err(Error::ChunkFraming("trailer line too long".to_string()))
            }
            Err(e) => return Err(e),
        };
        if line.is_empty() {
            return Ok(());
        }
    }
    Err(Error::ChunkFraming("too many trailer lines".to_string()))
}

/// Encode data as a complete chunked body, split at `chunk_size`
pub fn encode_chunked_body(data: &[u8], chunk_size: usize) -> Result<Vec<u8>> {
    let mut output = Vec::new();
    let mut encoder = ChunkedEncoder::new(&mut output);

    for chunk in data.chunks(chunk_size.max(1)) {
        encoder.write_chunk(chunk)?;
    }
    encoder.finish()?;

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_single_chunk() {
        let mut output = Vec::new();
        let mut encoder = ChunkedEncoder::new(&mut output);

        encoder.write_chunk(b"Hello").unwrap();
        encoder.finish().unwrap();

        assert_eq!(output, b"5\r\nHello\r\n0\r\n\r\n");
    }

    #[test]
    fn test_encode_multiple_chunks() {
        let mut output = Vec::new();
        let mut encoder = ChunkedEncoder::new(&mut output);

        encoder.write_chunk(b"Hello").unwrap();
        encoder.write_chunk(b"World").unwrap();
        encoder.finish().unwrap();

        assert_eq!(output, b"5\r\nHello\r\n5\r\nWorld\r\n0\r\n\r\n");
    }

    #[test]
    fn test_empty_chunks_skipped() {
        let mut output = Vec::new();
        let mut encoder = ChunkedEncoder::new(&mut output);

        encoder.write_chunk(b"").unwrap();
        encoder.write_chunk(b"Hello").unwrap();
        encoder.write_chunk(b"").unwrap();
        encoder.finish().unwrap();

        assert_eq!(output, b"5\r\nHello\r\n0\r\n\r\n");
    }

    #[test]
    fn test_encode_body_helper() {
        let out = encode_chunked_body(b"Hello, World!", 5).unwrap();
        assert_eq!(out, b"5\r\nHello\r\n5\r\n, Wor\r\n3\r\nld!\r\n0\r\n\r\n");
    }

    #[test]
    fn test_encode_empty_body() {
        let out = encode_chunked_body(b"", 5).unwrap();
        assert_eq!(out, b"0\r\n\r\n");
    }
}
