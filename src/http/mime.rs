//! MIME type inference
//!
//! Static longest-suffix lookup over a fixed extension table. Pure and
//! allocation-free per call; unknown suffixes fall back to
//! `application/octet-stream`.

/// Extension table, matched against the end of the file name.
///
/// Longer (more specific) suffixes must sort before shorter ones that
/// they contain, e.g. `.tar.gz` before `.gz`.
const TYPES: &[(&str, &str)] = &[
    (".tar.gz", "application/gzip"),
    (".html", "text/html"),
    (".htm", "text/html"),
    (".css", "text/css"),
    (".js", "application/javascript"),
    (".mjs", "application/javascript"),
    (".json", "application/json"),
    (".xml", "application/xml"),
    (".txt", "text/plain"),
    (".md", "text/plain"),
    (".csv", "text/csv"),
    (".png", "image/png"),
    (".jpg", "image/jpeg"),
    (".jpeg", "image/jpeg"),
    (".gif", "image/gif"),
    (".svg", "image/svg+xml"),
    (".ico", "image/x-icon"),
    (".webp", "image/webp"),
    (".woff", "font/woff"),
    (".woff2", "font/woff2"),
    (".ttf", "font/ttf"),
    (".pdf", "application/pdf"),
    (".zip", "application/zip"),
    (".gz", "application/gzip"),
    (".wasm", "application/wasm"),
    (".mp3", "audio/mpeg"),
    (".mp4", "video/mp4"),
    (".webm", "video/webm"),
];

/// Fallback for names with no known suffix
pub const DEFAULT: &str = "application/octet-stream";

/// Infer the MIME type for a file name
///
/// The most specific (longest) matching suffix wins; comparison is
/// ASCII case-insensitive.
pub fn from_name(name: &str) -> &'static str {
    let name = name.as_bytes();
    let mut best: Option<(&[u8], &'static str)> = None;

    for (suffix, mime) in TYPES {
        let suffix = suffix.as_bytes();
        if name.len() >= suffix.len()
            && name[name.len() - suffix.len()..].eq_ignore_ascii_case(suffix)
        {
            match best {
                Some((s, _)) if s.len() >= suffix.len() => {}
                _ => best = Some((suffix, mime)),
            }
        }
    }

    best.map(|(_, mime)| mime).unwrap_or(DEFAULT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_common_types() {
        assert_eq!(from_name("index.html"), "text/html");
        assert_eq!(from_name("style.css"), "text/css");
        assert_eq!(from_name("app.js"), "application/javascript");
        assert_eq!(from_name("photo.jpeg"), "image/jpeg");
    }

    #[test]
    fn test_case_insensitive() {
        assert_eq!(from_name("INDEX.HTML"), "text/html");
        assert_eq!(from_name("Photo.JPG"), "image/jpeg");
    }

    #[test]
    fn test_longest_suffix_wins() {
        assert_eq!(from_name("bundle.tar.gz"), "application/gzip");
        assert_eq!(from_name("data.gz"), "application/gzip");
        // .htm must not shadow .html
        assert_eq!(from_name("page.html"), "text/html");
    }

    #[test]
    fn test_fallback() {
        assert_eq!(from_name("archive.unknown"), DEFAULT);
        assert_eq!(from_name("noextension"), DEFAULT);
        assert_eq!(from_name(""), DEFAULT);
    }
}
