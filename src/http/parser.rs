//! HTTP request parsing
//!
//! Request-line and header-block parsing, plus the derived-view parsers
//! the header model exposes: query strings, cookies, and byte ranges.
//!
//! The header-block reader enforces hard limits on line length and field
//! count and reports overflow as `HeaderTooLarge`, a distinct error so
//! the driver can answer 413 without parsing the rest of the input.

use super::session::Conduit;
use super::{Error, Headers, Method, Result, Version};

/// Parse an HTTP request line
///
/// Format: `METHOD TARGET VERSION`. Anything but exactly three
/// space-delimited parts is a malformed request.
pub fn parse_request_line(line: &str) -> Result<(Method, String, Version)> {
    let parts: Vec<&str> = line.split_whitespace().collect();

    if parts.len() != 3 {
        return Err(Error::MalformedRequest(format!(
            "request line: expected 3 parts, got {}",
            parts.len()
        )));
    }

    let method = Method::from_str(parts[0])?;
    let target = parts[1].to_string();
    let version = Version::from_str(parts[2])?;

    Ok((method, target, version))
}

/// Read a CRLF-terminated header block from the connection
///
/// Terminates on the empty line. A line longer than `max_line` or more
/// than `max_fields` fields raises `HeaderTooLarge`. Duplicate field
/// names follow the last-write-wins policy.
pub fn read_header_block(
    conduit: &mut Conduit,
    max_line: usize,
    max_fields: usize,
) -> Result<Headers> {
    let mut headers = Headers::new();
    let mut fields = 0usize;

    loop {
        let line = match conduit.read_line(max_line) {
            Ok(line) => line,
            Err(Error::LineTooLong(n)) => {
                return Err(Error::HeaderTooLarge(format!("header line exceeds {} bytes", n)))
            }
            Err(e) => return Err(e),
        };

        if line.is_empty() {
            return Ok(headers);
        }

        fields += 1;
        if fields > max_fields {
            return Err(Error::HeaderTooLarge(format!(
                "more than {} header fields",
                max_fields
            )));
        }

        let (name, value) = Headers::parse_header_line(&line)?;
        headers.set(name, value);
    }
}

/// Parse a query string into decoded key/value pairs
///
/// Percent-decoding aware; a key without `=` yields an empty value.
/// Pure function of its input, so repeated calls agree.
pub fn parse_query(raw: &str) -> Vec<(String, String)> {
    url::form_urlencoded::parse(raw.as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

/// Parse a `Cookie` header value into ordered name/value pairs
///
/// Pairs are `;`-separated; a fragment without `=` becomes a name with an
/// empty value; `%XX` escapes are decoded.
pub fn parse_cookies(raw: &str) -> Vec<(String, String)> {
    raw.split(';')
        .filter_map(|pair| {
            let pair = pair.trim();
            if pair.is_empty() {
                return None;
            }
            let (name, value) = match pair.split_once('=') {
                Some((n, v)) => (n.trim(), v.trim()),
                None => (pair, ""),
            };
            Some((percent_decode(name), percent_decode(value)))
        })
        .collect()
}

/// Decode `%XX` escapes, passing malformed escapes through untouched
fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'%' {
            if let (Some(hi), Some(lo)) = (
                bytes.get(i + 1).and_then(|b| (*b as char).to_digit(16)),
                bytes.get(i + 2).and_then(|b| (*b as char).to_digit(16)),
            ) {
                out.push((hi * 16 + lo) as u8);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }

    String::from_utf8_lossy(&out).into_owned()
}

/// A parsed `Range: bytes=start-end` header
///
/// Either bound may be absent: a missing start means 0, a missing end
/// means the end of the resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: Option<u64>,
    pub end: Option<u64>,
}

impl ByteRange {
    /// Resolve against a resource of `total` bytes
    ///
    /// Returns the inclusive `(start, end)` byte positions, or `None`
    /// when the range is inverted or out of bounds, in which case the
    /// caller serves the whole resource with 200. Lenient on purpose:
    /// a bad range is a whole-content fallback, never an error.
    pub fn resolve(&self, total: u64) -> Option<(u64, u64)> {
        if total == 0 {
            return None;
        }

        let start = self.start.unwrap_or(0);
        let end = self.end.unwrap_or(total - 1).min(total - 1);

        if start > end || start >= total {
            return None;
        }
        Some((start, end))
    }
}

/// Parse a `Range` header value
///
/// Only the `bytes=start-end` form is recognized; multi-range requests
/// use their first range. Anything unparseable yields `None`.
pub fn parse_range(value: &str) -> Option<ByteRange> {
    let spec = value.trim().strip_prefix("bytes=")?;
    let first = spec.split(',').next()?.trim();
    let (start_str, end_str) = first.split_once('-')?;

    let start = match start_str.trim() {
        "" => None,
        s => Some(s.parse::<u64>().ok()?),
    };
    let end = match end_str.trim() {
        "" => None,
        s => Some(s.parse::<u64>().ok()?),
    };

    if start.is_none() && end.is_none() {
        return None;
    }
    Some(ByteRange { start, end })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_request_line() {
        let (method, target, version) = parse_request_line("GET /index.html HTTP/1.1").unwrap();
        assert_eq!(method, Method::Get);
        assert_eq!(target, "/index.html");
        assert_eq!(version, Version::Http11);
    }

    #[test]
    fn test_parse_request_line_malformed() {
        assert!(matches!(
            parse_request_line("GET /index.html"),
            Err(Error::MalformedRequest(_))
        ));
        assert!(matches!(
            parse_request_line("GET /a b HTTP/1.1 extra"),
            Err(Error::MalformedRequest(_))
        ));
        assert!(parse_request_line("").is_err());
    }

    #[test]
    fn test_parse_query_decoding() {
        let q = parse_query("name=hello%20world&empty&a=1&a=2");
        assert_eq!(q[0], ("name".to_string(), "hello world".to_string()));
        assert_eq!(q[1], ("empty".to_string(), String::new()));
        assert_eq!(q[2], ("a".to_string(), "1".to_string()));
        assert_eq!(q[3], ("a".to_string(), "2".to_string()));
    }

    #[test]
    fn test_parse_query_idempotent() {
        assert_eq!(parse_query("a=b&c=d"), parse_query("a=b&c=d"));
    }

    #[test]
    fn test_parse_cookies() {
        let cookies = parse_cookies("session=abc123; theme=dark; bare");
        assert_eq!(cookies[0], ("session".to_string(), "abc123".to_string()));
        assert_eq!(cookies[1], ("theme".to_string(), "dark".to_string()));
        assert_eq!(cookies[2], ("bare".to_string(), String::new()));
    }

    #[test]
    fn test_parse_cookies_percent_decoding() {
        let cookies = parse_cookies("msg=hello%20there");
        assert_eq!(cookies[0].1, "hello there");

        // Malformed escapes pass through untouched
        let cookies = parse_cookies("msg=50%");
        assert_eq!(cookies[0].1, "50%");
    }

    #[test]
    fn test_parse_range_forms() {
        assert_eq!(
            parse_range("bytes=10-19"),
            Some(ByteRange { start: Some(10), end: Some(19) })
        );
        assert_eq!(
            parse_range("bytes=10-"),
            Some(ByteRange { start: Some(10), end: None })
        );
        assert_eq!(
            parse_range("bytes=-10"),
            Some(ByteRange { start: None, end: Some(10) })
        );
        assert_eq!(parse_range("bytes=-"), None);
        assert_eq!(parse_range("items=0-5"), None);
        assert_eq!(parse_range("bytes=abc-def"), None);
    }

    #[test]
    fn test_range_resolve() {
        let r = ByteRange { start: Some(10), end: Some(19) };
        assert_eq!(r.resolve(100), Some((10, 19)));

        // Missing end runs to the last byte
        let r = ByteRange { start: Some(90), end: None };
        assert_eq!(r.resolve(100), Some((90, 99)));

        // Missing start means zero
        let r = ByteRange { start: None, end: Some(10) };
        assert_eq!(r.resolve(100), Some((0, 10)));

        // End past the resource is clamped
        let r = ByteRange { start: Some(50), end: Some(5000) };
        assert_eq!(r.resolve(100), Some((50, 99)));
    }

    #[test]
    fn test_range_resolve_fallback() {
        // Inverted range: whole content
        let r = ByteRange { start: Some(19), end: Some(10) };
        assert_eq!(r.resolve(100), None);

        // Start past the end: whole content
        let r = ByteRange { start: Some(100), end: None };
        assert_eq!(r.resolve(100), None);

        // Empty resource never has a satisfiable range
        let r = ByteRange { start: Some(0), end: Some(10) };
        assert_eq!(r.resolve(0), None);
    }
}
