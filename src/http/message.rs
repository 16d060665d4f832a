//! HTTP message heads
//!
//! This module defines the core types for HTTP requests and responses:
//! methods, versions, status codes, and the mutable request/response
//! heads the protocol driver reuses across keep-alive iterations.

use super::parser::{self, ByteRange};
use super::{Error, Headers, Result, CRLF};
use std::fmt;
use std::time::SystemTime;

/// HTTP methods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Delete,
    Connect,
    Options,
    Trace,
    Patch,
}

impl Method {
    /// Parse method from string
    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "GET" => Ok(Method::Get),
            "HEAD" => Ok(Method::Head),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "DELETE" => Ok(Method::Delete),
            "CONNECT" => Ok(Method::Connect),
            "OPTIONS" => Ok(Method::Options),
            "TRACE" => Ok(Method::Trace),
            "PATCH" => Ok(Method::Patch),
            _ => Err(Error::InvalidMethod(s.to_string())),
        }
    }

    /// Convert method to string
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Connect => "CONNECT",
            Method::Options => "OPTIONS",
            Method::Trace => "TRACE",
            Method::Patch => "PATCH",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// HTTP version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Version {
    Http10,
    Http11,
}

impl Version {
    /// Parse version from string
    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "HTTP/1.0" => Ok(Version::Http10),
            "HTTP/1.1" => Ok(Version::Http11),
            _ => Err(Error::InvalidVersion(s.to_string())),
        }
    }

    /// Convert version to string
    pub fn as_str(&self) -> &'static str {
        match self {
            Version::Http10 => "HTTP/1.0",
            Version::Http11 => "HTTP/1.1",
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Default for Version {
    fn default() -> Self {
        Version::Http11
    }
}

/// HTTP status code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Status {
    code: u16,
}

impl Status {
    /// Create a new status code
    pub fn new(code: u16) -> Result<Self> {
        if (100..600).contains(&code) {
            Ok(Status { code })
        } else {
            Err(Error::InvalidStatus(format!("invalid status code: {}", code)))
        }
    }

    /// Get the status code
    pub fn code(&self) -> u16 {
        self.code
    }

    /// Get the canonical reason phrase for this status code
    pub fn reason_phrase(&self) -> &'static str {
        match self.code {
            100 => "Continue",
            101 => "Switching Protocols",
            200 => "OK",
            201 => "Created",
            202 => "Accepted",
            204 => "No Content",
            205 => "Reset Content",
            206 => "Partial Content",
            300 => "Multiple Choices",
            301 => "Moved Permanently",
            302 => "Found",
            303 => "See Other",
            304 => "Not Modified",
            307 => "Temporary Redirect",
            308 => "Permanent Redirect",
            400 => "Bad Request",
            401 => "Unauthorized",
            403 => "Forbidden",
            404 => "Not Found",
            405 => "Method Not Allowed",
            406 => "Not Acceptable",
            408 => "Request Timeout",
            409 => "Conflict",
            410 => "Gone",
            411 => "Length Required",
            412 => "Precondition Failed",
            413 => "Payload Too Large",
            414 => "URI Too Long",
            415 => "Unsupported Media Type",
            416 => "Range Not Satisfiable",
            417 => "Expectation Failed",
            500 => "Internal Server Error",
            501 => "Not Implemented",
            502 => "Bad Gateway",
            503 => "Service Unavailable",
            504 => "Gateway Timeout",
            505 => "HTTP Version Not Supported",
            _ => "Unknown",
        }
    }

    /// Check if this is a success status (2xx)
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }

    /// Check if this is a client error status (4xx)
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.code)
    }

    /// Check if this is a server error status (5xx)
    pub fn is_server_error(&self) -> bool {
        (500..600).contains(&self.code)
    }

    pub const CONTINUE: Status = Status { code: 100 };
    pub const OK: Status = Status { code: 200 };
    pub const NO_CONTENT: Status = Status { code: 204 };
    pub const PARTIAL_CONTENT: Status = Status { code: 206 };
    pub const NOT_MODIFIED: Status = Status { code: 304 };
    pub const BAD_REQUEST: Status = Status { code: 400 };
    pub const FORBIDDEN: Status = Status { code: 403 };
    pub const NOT_FOUND: Status = Status { code: 404 };
    pub const PAYLOAD_TOO_LARGE: Status = Status { code: 413 };
    pub const INTERNAL_SERVER_ERROR: Status = Status { code: 500 };
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.reason_phrase())
    }
}

/// Parsed head of an HTTP request
///
/// One instance lives per connection and is `reset()` at the start of
/// every keep-alive iteration instead of reallocated.
#[derive(Debug, Clone)]
pub struct RequestHead {
    method: Method,
    target: String,
    version: Version,
    headers: Headers,
}

impl RequestHead {
    /// Create an empty request head
    pub fn new() -> Self {
        RequestHead {
            method: Method::Get,
            target: String::new(),
            version: Version::default(),
            headers: Headers::new(),
        }
    }

    /// Reset for the next keep-alive iteration, keeping allocations
    pub fn reset(&mut self) {
        self.method = Method::Get;
        self.target.clear();
        self.headers.clear();
        self.version = Version::default();
    }

    /// Populate from a parsed request line and header block
    pub fn populate(&mut self, method: Method, target: String, version: Version, headers: Headers) {
        self.method = method;
        self.target = target;
        self.version = version;
        self.headers = headers;
    }

    pub fn method(&self) -> Method {
        self.method
    }

    /// The raw request target as it appeared on the wire
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    /// Path component of the target, without the query string
    pub fn path(&self) -> &str {
        match self.target.find('?') {
            Some(pos) => &self.target[..pos],
            None => &self.target,
        }
    }

    /// Raw query string, if any
    pub fn raw_query(&self) -> Option<&str> {
        self.target.find('?').map(|pos| &self.target[pos + 1..])
    }

    /// Decoded query parameters in order of appearance
    pub fn query(&self) -> Vec<(String, String)> {
        self.raw_query().map(parser::parse_query).unwrap_or_default()
    }

    /// Cookies from the `Cookie` header, in order of appearance
    pub fn cookies(&self) -> Vec<(String, String)> {
        self.headers
            .get("Cookie")
            .map(parser::parse_cookies)
            .unwrap_or_default()
    }

    /// Declared `Content-Length`, if present and well-formed
    pub fn content_length(&self) -> Option<u64> {
        self.headers.get("Content-Length").and_then(|v| v.parse().ok())
    }

    /// Whether the body uses chunked transfer encoding
    pub fn is_chunked(&self) -> bool {
        self.headers.has_value("Transfer-Encoding", "chunked")
    }

    /// Whether the request carries a body at all
    pub fn has_body(&self) -> bool {
        self.is_chunked() || self.content_length().map(|n| n > 0).unwrap_or(false)
    }

    /// Parsed `Range` header, if one is present and syntactically a range
    pub fn range(&self) -> Option<ByteRange> {
        self.headers.get("Range").and_then(parser::parse_range)
    }

    /// Whether the client asked for an interim `100 Continue`
    pub fn expects_continue(&self) -> bool {
        self.headers.has_value("Expect", "100-continue")
    }

    /// Whether the connection should close after this exchange
    pub fn wants_close(&self) -> bool {
        self.version != Version::Http11 || self.headers.has_value("Connection", "close")
    }
}

impl Default for RequestHead {
    fn default() -> Self {
        Self::new()
    }
}

/// Head of an HTTP response under construction
///
/// The status line must be configured exactly once, via `begin`, before
/// any framing header is resolved; `Set-Cookie` is kept as an ordered
/// list separate from the single-valued fields.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    status: Option<Status>,
    reason: String,
    headers: Headers,
    cookies: Vec<String>,
}

impl ResponseHead {
    /// Create an empty response head
    pub fn new() -> Self {
        ResponseHead {
            status: None,
            reason: String::new(),
            headers: Headers::new(),
            cookies: Vec::new(),
        }
    }

    /// Reset for the next keep-alive iteration
    pub fn reset(&mut self) {
        self.status = None;
        self.reason.clear();
        self.headers.clear();
        self.cookies.clear();
    }

    /// Configure the status line and stamp the conventional headers
    ///
    /// Sets the status, its canonical reason phrase, and the `Date` and
    /// `Server` fields as one operation. Fails if a status line was
    /// already configured.
    pub fn begin(&mut self, status: Status) -> Result<()> {
        if self.status.is_some() {
            return Err(Error::Protocol("status line already configured".to_string()));
        }
        self.status = Some(status);
        self.reason = status.reason_phrase().to_string();
        self.headers
            .set("Date", httpdate::fmt_http_date(SystemTime::now()));
        self.headers.set("Server", concat!("hearth/", env!("CARGO_PKG_VERSION")));
        Ok(())
    }

    /// The configured status, if `begin` has run
    pub fn status(&self) -> Option<Status> {
        self.status
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    /// Set a single-valued header
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.set(name, value);
    }

    /// Add a `Set-Cookie` value; order of addition is preserved
    pub fn add_cookie(&mut self, cookie: impl Into<String>) {
        self.cookies.push(cookie.into());
    }

    /// The ordered `Set-Cookie` list
    pub fn cookies(&self) -> &[String] {
        &self.cookies
    }

    /// Set the `ETag` field (quoted if the caller did not quote it)
    pub fn set_etag(&mut self, tag: &str) {
        if tag.starts_with('"') {
            self.headers.set("ETag", tag);
        } else {
            self.headers.set("ETag", format!("\"{}\"", tag));
        }
    }

    /// Set `Last-Modified` from a timestamp
    pub fn set_last_modified(&mut self, when: SystemTime) {
        self.headers.set("Last-Modified", httpdate::fmt_http_date(when));
    }

    /// Mark the response publicly cacheable for `max_age` seconds
    pub fn cache_public(&mut self, max_age: u64) {
        self.headers
            .set("Cache-Control", format!("public, max-age={}", max_age));
    }

    /// Mark the response privately cacheable for `max_age` seconds
    pub fn cache_private(&mut self, max_age: u64) {
        self.headers
            .set("Cache-Control", format!("private, max-age={}", max_age));
    }

    /// Forbid caching entirely
    pub fn no_cache(&mut self) {
        self.headers
            .set("Cache-Control", "no-cache, no-store, must-revalidate");
        self.headers.set("Pragma", "no-cache");
        self.headers.set("Expires", "0");
    }

    /// Set `Content-Range` for a partial-content response
    pub fn set_content_range(&mut self, start: u64, end: u64, total: u64) {
        self.headers
            .set("Content-Range", format!("bytes {}-{}/{}", start, end, total));
    }

    /// Serialize the status line, headers and cookie list to wire format
    ///
    /// Fails if no status line was configured; framing headers can
    /// therefore never reach the wire without one.
    pub fn to_wire(&self, version: Version) -> Result<Vec<u8>> {
        let status = self
            .status
            .ok_or_else(|| Error::Protocol("response has no status line".to_string()))?;

        let mut buf = Vec::with_capacity(256);
        buf.extend_from_slice(version.as_str().as_bytes());
        buf.push(b' ');
        buf.extend_from_slice(status.code().to_string().as_bytes());
        buf.push(b' ');
        buf.extend_from_slice(self.reason.as_bytes());
        buf.extend_from_slice(CRLF.as_bytes());

        for (name, value) in self.headers.iter() {
            buf.extend_from_slice(name.as_bytes());
            buf.extend_from_slice(b": ");
            buf.extend_from_slice(value.as_bytes());
            buf.extend_from_slice(CRLF.as_bytes());
        }
        for cookie in &self.cookies {
            buf.extend_from_slice(b"Set-Cookie: ");
            buf.extend_from_slice(cookie.as_bytes());
            buf.extend_from_slice(CRLF.as_bytes());
        }

        buf.extend_from_slice(CRLF.as_bytes());
        Ok(buf)
    }
}

impl Default for ResponseHead {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_from_str() {
        assert_eq!(Method::from_str("GET").unwrap(), Method::Get);
        assert_eq!(Method::from_str("POST").unwrap(), Method::Post);
        assert!(Method::from_str("INVALID").is_err());
    }

    #[test]
    fn test_version_from_str() {
        assert_eq!(Version::from_str("HTTP/1.0").unwrap(), Version::Http10);
        assert_eq!(Version::from_str("HTTP/1.1").unwrap(), Version::Http11);
        assert!(Version::from_str("HTTP/2.0").is_err());
    }

    #[test]
    fn test_status() {
        let status = Status::new(200).unwrap();
        assert_eq!(status.code(), 200);
        assert_eq!(status.reason_phrase(), "OK");
        assert!(status.is_success());
        assert!(!status.is_client_error());
        assert!(Status::new(42).is_err());
    }

    fn head_for(target: &str) -> RequestHead {
        let mut head = RequestHead::new();
        head.populate(Method::Get, target.to_string(), Version::Http11, Headers::new());
        head
    }

    #[test]
    fn test_path_and_query_views() {
        let head = head_for("/search?q=hello%20world&flag");
        assert_eq!(head.path(), "/search");
        assert_eq!(head.raw_query(), Some("q=hello%20world&flag"));

        let query = head.query();
        assert_eq!(query[0], ("q".to_string(), "hello world".to_string()));
        assert_eq!(query[1], ("flag".to_string(), String::new()));

        let plain = head_for("/plain");
        assert_eq!(plain.path(), "/plain");
        assert_eq!(plain.raw_query(), None);
    }

    #[test]
    fn test_body_views() {
        let mut head = RequestHead::new();
        let mut headers = Headers::new();
        headers.set("Content-Length", "12");
        head.populate(Method::Post, "/upload".into(), Version::Http11, headers);

        assert_eq!(head.content_length(), Some(12));
        assert!(!head.is_chunked());
        assert!(head.has_body());

        let mut headers = Headers::new();
        headers.set("Transfer-Encoding", "chunked");
        head.populate(Method::Post, "/upload".into(), Version::Http11, headers);
        assert!(head.is_chunked());
        assert!(head.has_body());
    }

    #[test]
    fn test_close_semantics() {
        let mut head = RequestHead::new();
        head.populate(Method::Get, "/".into(), Version::Http10, Headers::new());
        assert!(head.wants_close());

        let mut headers = Headers::new();
        headers.set("Connection", "close");
        head.populate(Method::Get, "/".into(), Version::Http11, headers);
        assert!(head.wants_close());

        head.populate(Method::Get, "/".into(), Version::Http11, Headers::new());
        assert!(!head.wants_close());
    }

    #[test]
    fn test_reset_keeps_nothing() {
        let mut head = RequestHead::new();
        let mut headers = Headers::new();
        headers.set("Host", "example.com");
        head.populate(Method::Post, "/x".into(), Version::Http10, headers);

        head.reset();
        assert_eq!(head.method(), Method::Get);
        assert_eq!(head.target(), "");
        assert!(head.headers().is_empty());
        assert_eq!(head.version(), Version::Http11);
    }

    #[test]
    fn test_response_status_once() {
        let mut resp = ResponseHead::new();
        resp.begin(Status::OK).unwrap();
        assert!(resp.begin(Status::NOT_FOUND).is_err());
        assert_eq!(resp.status(), Some(Status::OK));
        assert!(resp.headers().contains("Date"));
        assert!(resp.headers().contains("Server"));
    }

    #[test]
    fn test_response_wire_requires_status() {
        let resp = ResponseHead::new();
        assert!(resp.to_wire(Version::Http11).is_err());
    }

    #[test]
    fn test_response_wire_format() {
        let mut resp = ResponseHead::new();
        resp.begin(Status::OK).unwrap();
        resp.set_header("Content-Length", "0");
        resp.add_cookie("a=1");
        resp.add_cookie("b=2");

        let wire = String::from_utf8(resp.to_wire(Version::Http11).unwrap()).unwrap();
        assert!(wire.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(wire.contains("Content-Length: 0\r\n"));
        let a = wire.find("Set-Cookie: a=1").unwrap();
        let b = wire.find("Set-Cookie: b=2").unwrap();
        assert!(a < b);
        assert!(wire.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_caching_helpers() {
        let mut resp = ResponseHead::new();
        resp.set_etag("abc123");
        assert_eq!(resp.headers().get("ETag"), Some("\"abc123\""));

        resp.cache_public(3600);
        assert_eq!(resp.headers().get("Cache-Control"), Some("public, max-age=3600"));

        resp.no_cache();
        assert_eq!(
            resp.headers().get("Cache-Control"),
            Some("no-cache, no-store, must-revalidate")
        );
        assert_eq!(resp.headers().get("Pragma"), Some("no-cache"));
        assert_eq!(resp.headers().get("Expires"), Some("0"));

        resp.set_content_range(10, 19, 100);
        assert_eq!(resp.headers().get("Content-Range"), Some("bytes 10-19/100"));
    }
}
