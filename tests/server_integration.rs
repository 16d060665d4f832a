//! End-to-end tests for the server engine
//!
//! Each test binds a real listener on an ephemeral port, drives it with
//! raw sockets, and asserts on the exact bytes that come back.

use hearth::filter::{Chain, Filter, FilterError, Outcome, Router};
use hearth::http::body::Response;
use hearth::http::driver::{HttpDriver, Request};
use hearth::http::Status;
use hearth::log::{AccessLog, LogEntry};
use hearth::state::ConnectionState;
use hearth::{Server, ServerConfig};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Read exactly one HTTP response off the stream
///
/// Parses the status line and headers, then reads a content-length
/// body. Good enough for a test client; the engine under test is the
/// thing doing real framing.
fn read_response(stream: &mut TcpStream) -> (String, HashMap<String, String>, Vec<u8>) {
    let mut buf = Vec::new();
    let mut byte = [0u8; 1];

    // Headers end at the first blank line
    while !buf.ends_with(b"\r\n\r\n") {
        stream.read_exact(&mut byte).expect("reading response head");
        buf.push(byte[0]);
    }

    let head = String::from_utf8_lossy(&buf[..buf.len() - 4]).into_owned();
    let mut lines = head.split("\r\n");
    let status_line = lines.next().unwrap_or_default().to_string();

    let mut headers = HashMap::new();
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }

    let length: usize = headers
        .get("content-length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let mut body = vec![0u8; length];
    stream.read_exact(&mut body).expect("reading response body");

    (status_line, headers, body)
}

fn hello_filter() -> Arc<dyn Filter> {
    Arc::new(Chain::new(
        "hello",
        |_req: &mut Request,
         resp: &mut Response<'_>,
         _state: &mut ConnectionState|
         -> Result<bool, FilterError> {
            resp.send_bytes(Status::OK, "text/plain", b"hello world")?;
            Ok(true)
        },
    ))
}

fn start(root: Arc<dyn Filter>, config: ServerConfig) -> (Server, u16) {
    let driver = Arc::new(HttpDriver::new(root).with_limits(&config));
    let server = Server::new(config, driver);
    let port = server.listen(0, false, "127.0.0.1").expect("listen");
    (server, port)
}

fn connect(port: u16) -> TcpStream {
    let stream = TcpStream::connect(("127.0.0.1", port)).expect("connect");
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    stream
}

#[test]
fn keep_alive_reuses_one_socket_until_close() {
    let (server, port) = start(hello_filter(), ServerConfig::default());
    let mut stream = connect(port);

    // Two sequential requests on the same socket
    for _ in 0..2 {
        stream
            .write_all(b"GET / HTTP/1.1\r\nHost: t\r\n\r\n")
            .unwrap();
        let (status, _, body) = read_response(&mut stream);
        assert_eq!(status, "HTTP/1.1 200 OK");
        assert_eq!(body, b"hello world");
    }

    // The third asks to close; the server must answer then hang up
    stream
        .write_all(b"GET / HTTP/1.1\r\nHost: t\r\nConnection: close\r\n\r\n")
        .unwrap();
    let (status, _, body) = read_response(&mut stream);
    assert_eq!(status, "HTTP/1.1 200 OK");
    assert_eq!(body, b"hello world");

    let mut probe = [0u8; 1];
    assert_eq!(stream.read(&mut probe).unwrap(), 0, "socket should be closed");

    server.close();
}

#[test]
fn http10_closes_after_response() {
    let (server, port) = start(hello_filter(), ServerConfig::default());
    let mut stream = connect(port);

    stream.write_all(b"GET / HTTP/1.0\r\n\r\n").unwrap();
    let (status, _, _) = read_response(&mut stream);
    assert_eq!(status, "HTTP/1.0 200 OK");

    let mut probe = [0u8; 1];
    assert_eq!(stream.read(&mut probe).unwrap(), 0);

    server.close();
}

#[test]
fn oversized_header_block_yields_413_and_close() {
    let config = ServerConfig::default().header_limits(512, 16);
    let (server, port) = start(hello_filter(), config);
    let mut stream = connect(port);

    let mut request = b"GET / HTTP/1.1\r\nX-Big: ".to_vec();
    request.extend_from_slice(&vec![b'a'; 2048]);
    request.extend_from_slice(b"\r\n\r\n");
    stream.write_all(&request).unwrap();

    let (status, headers, _) = read_response(&mut stream);
    assert_eq!(status, "HTTP/1.1 413 Payload Too Large");
    assert_eq!(headers.get("connection").map(String::as_str), Some("close"));

    // No stray header bytes may be misread as a next request
    let mut probe = [0u8; 1];
    assert_eq!(stream.read(&mut probe).unwrap(), 0);

    server.close();
}

#[test]
fn byte_range_request_gets_206_or_full_fallback() {
    let resource: Vec<u8> = (0u8..100).collect();
    let body = resource.clone();
    let ranged: Arc<dyn Filter> = Arc::new(Chain::new(
        "ranged",
        move |req: &mut Request,
              resp: &mut Response<'_>,
              _state: &mut ConnectionState|
              -> Result<bool, FilterError> {
            let range = req.head().range();
            resp.send_with_range(range, "application/octet-stream", &body)?;
            Ok(true)
        },
    ));
    let (server, port) = start(ranged, ServerConfig::default());

    // Satisfiable range: 206 with exactly ten bytes
    let mut stream = connect(port);
    stream
        .write_all(b"GET /blob HTTP/1.1\r\nRange: bytes=10-19\r\n\r\n")
        .unwrap();
    let (status, headers, got) = read_response(&mut stream);
    assert_eq!(status, "HTTP/1.1 206 Partial Content");
    assert_eq!(
        headers.get("content-range").map(String::as_str),
        Some("bytes 10-19/100")
    );
    assert_eq!(got, &resource[10..20]);

    // Inverted range: whole resource with 200
    stream
        .write_all(b"GET /blob HTTP/1.1\r\nRange: bytes=90-10\r\n\r\n")
        .unwrap();
    let (status, headers, got) = read_response(&mut stream);
    assert_eq!(status, "HTTP/1.1 200 OK");
    assert!(!headers.contains_key("content-range"));
    assert_eq!(got, resource);

    server.close();
}

#[test]
fn chunked_response_is_correctly_framed() {
    let streaming: Arc<dyn Filter> = Arc::new(Chain::new(
        "streaming",
        |_req: &mut Request,
         resp: &mut Response<'_>,
         _state: &mut ConnectionState|
         -> Result<bool, FilterError> {
            resp.begin(Status::OK)?;
            resp.head().set_header("Content-Type", "text/plain");
            resp.send_chunked()?;
            resp.write(b"first")?;
            resp.write(b"second")?;
            Ok(true)
        },
    ));
    let (server, port) = start(streaming, ServerConfig::default());
    let mut stream = connect(port);

    stream
        .write_all(b"GET /s HTTP/1.1\r\nConnection: close\r\n\r\n")
        .unwrap();
    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).unwrap();
    let text = String::from_utf8_lossy(&raw);

    assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(text.contains("Transfer-Encoding: chunked\r\n"));
    // Exact chunk framing including the terminal chunk
    assert!(text.ends_with("5\r\nfirst\r\n6\r\nsecond\r\n0\r\n\r\n"));

    server.close();
}

#[test]
fn multipart_upload_is_split_into_parts() {
    let upload: Arc<dyn Filter> = Arc::new(Chain::new(
        "upload",
        |req: &mut Request,
         resp: &mut Response<'_>,
         _state: &mut ConnectionState|
         -> Result<bool, FilterError> {
            let form = req.multipart()?;
            let title = form.part("title").map(|p| p.data().to_vec()).unwrap_or_default();
            let files = form.list("attachments");
            let summary = format!(
                "title={};files={}",
                String::from_utf8_lossy(&title),
                files.len()
            );
            resp.send_bytes(Status::OK, "text/plain", summary.as_bytes())?;
            Ok(true)
        },
    ));
    let (server, port) = start(upload, ServerConfig::default());
    let mut stream = connect(port);

    let mut body = Vec::new();
    body.extend_from_slice(b"--sep\r\n");
    body.extend_from_slice(b"Content-Disposition: form-data; name=\"title\"\r\n\r\nreport\r\n");
    body.extend_from_slice(b"--sep\r\n");
    body.extend_from_slice(
        b"Content-Disposition: form-data; name=\"attachments[]\"; filename=\"a\"\r\n\r\nAAA\r\n",
    );
    body.extend_from_slice(b"--sep\r\n");
    body.extend_from_slice(
        b"Content-Disposition: form-data; name=\"attachments[]\"; filename=\"b\"\r\n\r\nBBB\r\n",
    );
    body.extend_from_slice(b"--sep--\r\n");

    let mut request = format!(
        "POST /upload HTTP/1.1\r\nContent-Type: multipart/form-data; boundary=sep\r\nContent-Length: {}\r\n\r\n",
        body.len()
    )
    .into_bytes();
    request.extend_from_slice(&body);
    stream.write_all(&request).unwrap();

    // The driver answers POSTs with an interim continue first
    let (interim, _, _) = read_response(&mut stream);
    assert_eq!(interim, "HTTP/1.1 100 Continue");

    let (status, _, got) = read_response(&mut stream);
    assert_eq!(status, "HTTP/1.1 200 OK");
    assert_eq!(got, b"title=report;files=2");

    server.close();
}

/// Sink that captures every entry for inspection
#[derive(Default)]
struct CapturingLog {
    entries: Mutex<Vec<CapturedEntry>>,
}

struct CapturedEntry {
    target: String,
    status: Option<u16>,
    content_length: u64,
    trace: Vec<(String, Outcome)>,
    has_request_host: bool,
}

impl AccessLog for CapturingLog {
    fn on_request(&self, entry: &LogEntry) {
        self.entries.lock().unwrap().push(CapturedEntry {
            target: entry.target.clone(),
            status: entry.status,
            content_length: entry.content_length,
            trace: entry
                .trace
                .links()
                .iter()
                .map(|l| (l.name().to_string(), l.outcome()))
                .collect(),
            has_request_host: entry.request_headers.contains("Host"),
        });
    }

    fn on_socket_error(
        &self,
        _port: u16,
        _secure: bool,
        _peer: Option<SocketAddr>,
        _error: &hearth::http::Error,
    ) {
    }
}

#[test]
fn trace_records_delegation_order_and_log_entry_is_complete() {
    let handle: Arc<dyn Filter> = Arc::new(Chain::new(
        "c",
        |_req: &mut Request,
         resp: &mut Response<'_>,
         _state: &mut ConnectionState|
         -> Result<bool, FilterError> {
            resp.send_bytes(Status::OK, "text/plain", b"from c")?;
            Ok(true)
        },
    ));
    let decline = |_req: &mut Request,
                   _resp: &mut Response<'_>,
                   _state: &mut ConnectionState|
     -> Result<bool, FilterError> { Ok(false) };
    let b: Arc<dyn Filter> = Arc::new(Chain::new("b", decline).with_fallback(handle));
    let a: Arc<dyn Filter> = Arc::new(Chain::new("a", decline).with_fallback(b));

    let log = Arc::new(CapturingLog::default());
    let config = ServerConfig::default();
    let driver = Arc::new(
        HttpDriver::new(a)
            .with_limits(&config)
            .with_log(Arc::clone(&log) as Arc<dyn AccessLog>),
    );
    let server = Server::new(config, driver);
    let port = server.listen(0, false, "127.0.0.1").unwrap();

    let mut stream = connect(port);
    stream
        .write_all(b"GET /traced HTTP/1.1\r\nHost: t\r\nConnection: close\r\n\r\n")
        .unwrap();
    let (status, _, _) = read_response(&mut stream);
    assert_eq!(status, "HTTP/1.1 200 OK");
    drop(stream);

    server.close();

    let entries = log.entries.lock().unwrap();
    assert_eq!(entries.len(), 1);
    let entry = &entries[0];
    assert_eq!(entry.target, "/traced");
    assert_eq!(entry.status, Some(200));
    assert_eq!(entry.content_length, 6);
    assert!(entry.has_request_host);
    assert_eq!(
        entry.trace,
        vec![
            ("a".to_string(), Outcome::Delegated),
            ("b".to_string(), Outcome::Delegated),
            ("c".to_string(), Outcome::Handled),
        ]
    );
}

#[test]
fn router_dispatches_and_falls_through_to_404() {
    let router = Router::new("router");
    router.route(
        "/api/ping",
        Arc::new(Chain::new(
            "ping",
            |_req: &mut Request,
             resp: &mut Response<'_>,
             _state: &mut ConnectionState|
             -> Result<bool, FilterError> {
                resp.send_bytes(Status::OK, "text/plain", b"pong")?;
                Ok(true)
            },
        )),
    );

    let (server, port) = start(Arc::new(router), ServerConfig::default());
    let mut stream = connect(port);

    stream
        .write_all(b"GET /api/ping HTTP/1.1\r\n\r\n")
        .unwrap();
    let (status, _, body) = read_response(&mut stream);
    assert_eq!(status, "HTTP/1.1 200 OK");
    assert_eq!(body, b"pong");

    stream
        .write_all(b"GET /unrouted HTTP/1.1\r\nConnection: close\r\n\r\n")
        .unwrap();
    let (status, _, _) = read_response(&mut stream);
    assert_eq!(status, "HTTP/1.1 404 Not Found");

    server.close();
}

#[test]
fn filter_error_stays_request_scoped_on_keep_alive() {
    let flaky: Arc<dyn Filter> = Arc::new(Chain::new(
        "flaky",
        |req: &mut Request,
         resp: &mut Response<'_>,
         _state: &mut ConnectionState|
         -> Result<bool, FilterError> {
            if req.head().path() == "/fail" {
                return Err("induced failure".into());
            }
            resp.send_bytes(Status::OK, "text/plain", b"fine")?;
            Ok(true)
        },
    ));
    let (server, port) = start(flaky, ServerConfig::default());
    let mut stream = connect(port);

    stream.write_all(b"GET /fail HTTP/1.1\r\n\r\n").unwrap();
    let (status, _, body) = read_response(&mut stream);
    assert_eq!(status, "HTTP/1.1 500 Internal Server Error");
    assert!(!String::from_utf8_lossy(&body).contains("induced failure"));

    // Same socket still serves the next request
    stream
        .write_all(b"GET /ok HTTP/1.1\r\nConnection: close\r\n\r\n")
        .unwrap();
    let (status, _, body) = read_response(&mut stream);
    assert_eq!(status, "HTTP/1.1 200 OK");
    assert_eq!(body, b"fine");

    server.close();
}

#[test]
fn connection_state_persists_across_keep_alive_requests() {
    let counting: Arc<dyn Filter> = Arc::new(Chain::new(
        "counting",
        |_req: &mut Request,
         resp: &mut Response<'_>,
         state: &mut ConnectionState|
         -> Result<bool, FilterError> {
            let hits = state.get::<u32>("hits").copied().unwrap_or(0) + 1;
            state.put("hits", hits);
            resp.send_bytes(Status::OK, "text/plain", hits.to_string().as_bytes())?;
            Ok(true)
        },
    ));
    let (server, port) = start(counting, ServerConfig::default());
    let mut stream = connect(port);

    for expected in ["1", "2", "3"] {
        stream.write_all(b"GET / HTTP/1.1\r\n\r\n").unwrap();
        let (_, _, body) = read_response(&mut stream);
        assert_eq!(body, expected.as_bytes());
    }

    // A fresh connection gets a fresh state scope
    let mut other = connect(port);
    other
        .write_all(b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n")
        .unwrap();
    let (_, _, body) = read_response(&mut other);
    assert_eq!(body, b"1");

    server.close();
}

#[test]
fn cookies_round_trip_in_order() {
    let cookies: Arc<dyn Filter> = Arc::new(Chain::new(
        "cookies",
        |req: &mut Request,
         resp: &mut Response<'_>,
         _state: &mut ConnectionState|
         -> Result<bool, FilterError> {
            let got = req.head().cookies();
            resp.begin(Status::OK)?;
            resp.head().add_cookie("first=1; Path=/");
            resp.head().add_cookie("second=2; Path=/");
            let body = format!("{}", got.len());
            resp.head().set_header("Content-Type", "text/plain");
            resp.send_content(body.len() as u64)?;
            resp.write(body.as_bytes())?;
            Ok(true)
        },
    ));
    let (server, port) = start(cookies, ServerConfig::default());
    let mut stream = connect(port);

    stream
        .write_all(b"GET / HTTP/1.1\r\nCookie: a=1; b=2\r\nConnection: close\r\n\r\n")
        .unwrap();

    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).unwrap();
    let text = String::from_utf8_lossy(&raw);
    let first = text.find("Set-Cookie: first=1").expect("first cookie");
    let second = text.find("Set-Cookie: second=2").expect("second cookie");
    assert!(first < second);
    assert!(text.ends_with("2"));

    server.close();
}
