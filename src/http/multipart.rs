//! multipart/form-data splitting
//!
//! Splits a fully-buffered request body into its parts given the
//! boundary token from the `Content-Type` header. Parts keep their
//! order of appearance; a part whose name ends in `[]` belongs to an
//! ordered group under the stripped name.

use super::headers::Headers;
use super::{Error, Result};
use bytes::Bytes;

/// One part of a multipart body
#[derive(Debug, Clone)]
pub struct Part {
    headers: Headers,
    attrs: Vec<(String, String)>,
    data: Bytes,
}

impl Part {
    /// The part's field name from its `Content-Disposition` line
    pub fn name(&self) -> Option<&str> {
        self.attr("name")
    }

    /// The uploaded file name, when the part is a file field
    pub fn filename(&self) -> Option<&str> {
        self.attr("filename")
    }

    /// A `Content-Disposition` attribute by key
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// All `Content-Disposition` attributes in order
    pub fn attrs(&self) -> &[(String, String)] {
        &self.attrs
    }

    /// The part's own header block
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// The raw payload
    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

/// A parsed multipart body
#[derive(Debug, Clone)]
pub struct Multipart {
    parts: Vec<Part>,
}

impl Multipart {
    /// All parts in order of appearance
    pub fn parts(&self) -> &[Part] {
        &self.parts
    }

    /// The first part with the given field name
    pub fn part(&self, name: &str) -> Option<&Part> {
        self.parts.iter().find(|p| p.name() == Some(name))
    }

    /// The ordered group of parts registered under `name[]`
    pub fn list(&self, name: &str) -> Vec<&Part> {
        let marked = format!("{}[]", name);
        self.parts
            .iter()
            .filter(|p| p.name() == Some(marked.as_str()))
            .collect()
    }
}

/// Extract the boundary token from a `Content-Type` header value
pub fn boundary(content_type: &str) -> Option<String> {
    let (kind, params) = content_type.split_once(';')?;
    if !kind.trim().eq_ignore_ascii_case("multipart/form-data") {
        return None;
    }

    for param in params.split(';') {
        let (key, value) = param.split_once('=')?;
        if key.trim().eq_ignore_ascii_case("boundary") {
            return Some(value.trim().trim_matches('"').to_string());
        }
    }
    None
}

/// Split a raw body into parts
///
/// The split is deterministic: part order is wire order, headers and
/// disposition attributes are parsed per part, payloads are byte-exact
/// (the CRLF before each delimiter belongs to the framing, not the
/// payload).
pub fn parse(content_type: &str, body: &[u8]) -> Result<Multipart> {
    let boundary = boundary(content_type)
        .ok_or_else(|| Error::Multipart("no boundary in content type".to_string()))?;

    let delim = format!("--{}", boundary).into_bytes();
    let mut parts = Vec::new();

    // Skip the preamble up to the first delimiter
    let mut pos = find(body, &delim)
        .ok_or_else(|| Error::Multipart("opening boundary not found".to_string()))?
        + delim.len();

    loop {
        // Closing delimiter ends the body
        if body[pos..].starts_with(b"--") {
            return Ok(Multipart { parts });
        }
        if !body[pos..].starts_with(b"\r\n") {
            return Err(Error::Multipart("boundary not followed by CRLF".to_string()));
        }
        pos += 2;

        // Part headers run to the empty line
        let headers_end = find(&body[pos..], b"\r\n\r\n")
            .ok_or_else(|| Error::Multipart("part headers not terminated".to_string()))?;
        let headers = parse_part_headers(&body[pos..pos + headers_end])?;
        pos += headers_end + 4;

        // Payload runs to the CRLF before the next delimiter
        let mut marker = Vec::with_capacity(delim.len() + 2);
        marker.extend_from_slice(b"\r\n");
        marker.extend_from_slice(&delim);
        let data_end = find(&body[pos..], &marker)
            .ok_or_else(|| Error::Multipart("part not terminated by boundary".to_string()))?;

        let attrs = headers
            .get("Content-Disposition")
            .map(parse_disposition)
            .unwrap_or_default();

        parts.push(Part {
            headers,
            attrs,
            data: Bytes::copy_from_slice(&body[pos..pos + data_end]),
        });

        pos += data_end + marker.len();
    }
}

fn parse_part_headers(block: &[u8]) -> Result<Headers> {
    let mut headers = Headers::new();
    let text = String::from_utf8_lossy(block);

    for line in text.split("\r\n") {
        if line.is_empty() {
            continue;
        }
        let (name, value) = Headers::parse_header_line(line)?;
        headers.set(name, value);
    }
    Ok(headers)
}

/// Parse a `Content-Disposition` value into ordered key/value attributes
///
/// `form-data; name="files[]"; filename="a.txt"` yields
/// `[(name, files[]), (filename, a.txt)]`; the leading disposition type
/// is not an attribute.
fn parse_disposition(value: &str) -> Vec<(String, String)> {
    value
        .split(';')
        .skip(1)
        .filter_map(|param| {
            let param = param.trim();
            let (key, raw) = param.split_once('=')?;
            Some((
                key.trim().to_string(),
                raw.trim().trim_matches('"').to_string(),
            ))
        })
        .collect()
}

/// Find the first occurrence of `needle` in `haystack`
fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CT: &str = "multipart/form-data; boundary=xyzzy";

    fn sample() -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(b"--xyzzy\r\n");
        body.extend_from_slice(b"Content-Disposition: form-data; name=\"title\"\r\n\r\n");
        body.extend_from_slice(b"My upload\r\n");
        body.extend_from_slice(b"--xyzzy\r\n");
        body.extend_from_slice(
            b"Content-Disposition: form-data; name=\"files[]\"; filename=\"a.txt\"\r\n\
              Content-Type: text/plain\r\n\r\n",
        );
        body.extend_from_slice(b"alpha\r\n");
        body.extend_from_slice(b"--xyzzy\r\n");
        body.extend_from_slice(
            b"Content-Disposition: form-data; name=\"files[]\"; filename=\"b.txt\"\r\n\r\n",
        );
        body.extend_from_slice(b"bravo\r\n");
        body.extend_from_slice(b"--xyzzy--\r\n");
        body
    }

    #[test]
    fn test_boundary_extraction() {
        assert_eq!(boundary(CT), Some("xyzzy".to_string()));
        assert_eq!(
            boundary("multipart/form-data; boundary=\"quoted\""),
            Some("quoted".to_string())
        );
        assert_eq!(boundary("text/plain; boundary=xyzzy"), None);
        assert_eq!(boundary("multipart/form-data"), None);
    }

    #[test]
    fn test_parse_parts_in_order() {
        let form = parse(CT, &sample()).unwrap();
        assert_eq!(form.parts().len(), 3);
        assert_eq!(form.parts()[0].name(), Some("title"));
        assert_eq!(form.parts()[0].data(), b"My upload");
        assert_eq!(form.parts()[1].data(), b"alpha");
        assert_eq!(form.parts()[2].data(), b"bravo");
    }

    #[test]
    fn test_disposition_attributes() {
        let form = parse(CT, &sample()).unwrap();
        let part = &form.parts()[1];
        assert_eq!(part.name(), Some("files[]"));
        assert_eq!(part.filename(), Some("a.txt"));
        assert_eq!(part.headers().get("Content-Type"), Some("text/plain"));
        assert_eq!(part.attrs()[0].0, "name");
    }

    #[test]
    fn test_repetition_grouping() {
        let form = parse(CT, &sample()).unwrap();
        let files = form.list("files");
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].filename(), Some("a.txt"));
        assert_eq!(files[1].filename(), Some("b.txt"));
        // The scalar lookup does not see the grouped parts
        assert!(form.part("files").is_none());
    }

    #[test]
    fn test_binary_payload_is_byte_exact() {
        let mut body = Vec::new();
        body.extend_from_slice(b"--xyzzy\r\n");
        body.extend_from_slice(b"Content-Disposition: form-data; name=\"bin\"\r\n\r\n");
        body.extend_from_slice(&[0u8, 13, 10, 255, 0]);
        body.extend_from_slice(b"\r\n--xyzzy--\r\n");

        let form = parse(CT, &body).unwrap();
        assert_eq!(form.parts()[0].data(), &[0u8, 13, 10, 255, 0][..]);
    }

    #[test]
    fn test_malformed_bodies() {
        assert!(parse(CT, b"no boundary here").is_err());
        assert!(parse("text/plain", &sample()).is_err());
        assert!(parse(CT, b"--xyzzy\r\nbroken").is_err());
    }

    #[test]
    fn test_preamble_is_ignored() {
        let mut body = b"preamble to discard\r\n".to_vec();
        body.extend_from_slice(&sample());
        let form = parse(CT, &body).unwrap();
        assert_eq!(form.parts().len(), 3);
    }
}
