//! Minimal HTTP response handling for probe content.
//!
//! The dispatcher does not speak full HTTP; it splits the response on the
//! first `\r\n\r\n` and parses the status line. Everything downstream works
//! on the raw text.

use kestrel_common::HttpParts;
use once_cell::sync::Lazy;
use regex::Regex;

static TITLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<title[^>]*>\s*(.*?)\s*</title>").unwrap());

/// Request bytes for a plain `GET /`.
#[must_use]
pub fn default_get(host: &str) -> Vec<u8> {
    get_for_path(host, "/")
}

/// Request bytes for a GET of an arbitrary path (favicon, probe paths).
#[must_use]
pub fn get_for_path(host: &str, path: &str) -> Vec<u8> {
    format!(
        "GET {} HTTP/1.1\r\nHost: {}\r\nUser-Agent: Mozilla/5.0 (compatible; kestrel)\r\nAccept: */*\r\nConnection: close\r\n\r\n",
        path, host
    )
    .into_bytes()
}

/// Split a raw response on the first `\r\n\r\n` and parse the status line.
/// Returns `None` when the bytes are not an HTTP response.
#[must_use]
pub fn parse_http(raw: &[u8]) -> Option<HttpParts> {
    let text = String::from_utf8_lossy(raw);
    if !text.starts_with("HTTP/") {
        return None;
    }
    let (header, body) = match text.split_once("\r\n\r\n") {
        Some((h, b)) => (h.to_string(), b.to_string()),
        None => (text.into_owned(), String::new()),
    };
    let status: u16 = header.split_whitespace().nth(1)?.parse().ok()?;
    Some(HttpParts {
        status,
        header,
        body,
    })
}

/// First `<title>` of an HTML body, whitespace-collapsed.
#[must_use]
pub fn extract_title(body: &str) -> Option<String> {
    let m = TITLE_RE.captures(body)?;
    let title = m.get(1)?.as_str().split_whitespace().collect::<Vec<_>>().join(" ");
    if title.is_empty() {
        None
    } else {
        Some(title)
    }
}

/// Case-insensitive lookup of a header value in a raw header block.
#[must_use]
pub fn header_value(header: &str, name: &str) -> Option<String> {
    for line in header.lines() {
        if let Some((k, v)) = line.split_once(':') {
            if k.trim().eq_ignore_ascii_case(name) {
                let v = v.trim();
                if !v.is_empty() {
                    return Some(v.to_string());
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESP: &str = "HTTP/1.1 200 OK\r\nServer: nginx/1.18.0\r\nContent-Type: text/html\r\n\r\n<html><head><title> Welcome\n  Page </title></head></html>";

    #[test]
    fn splits_on_first_blank_line() {
        let parts = parse_http(RESP.as_bytes()).unwrap();
        assert_eq!(parts.status, 200);
        assert!(parts.header.contains("Server: nginx/1.18.0"));
        assert!(parts.body.starts_with("<html>"));
    }

    #[test]
    fn header_only_response() {
        let parts = parse_http(b"HTTP/1.0 404 Not Found\r\nServer: x").unwrap();
        assert_eq!(parts.status, 404);
        assert!(parts.body.is_empty());
    }

    #[test]
    fn non_http_is_none() {
        assert!(parse_http(b"SSH-2.0-OpenSSH_8.2").is_none());
        assert!(parse_http(b"HTTP/9 nope").is_none());
    }

    #[test]
    fn title_extraction() {
        let parts = parse_http(RESP.as_bytes()).unwrap();
        assert_eq!(extract_title(&parts.body).unwrap(), "Welcome Page");
        assert!(extract_title("<html>no title</html>").is_none());
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let parts = parse_http(RESP.as_bytes()).unwrap();
        assert_eq!(header_value(&parts.header, "server").unwrap(), "nginx/1.18.0");
        assert_eq!(
            header_value(&parts.header, "CONTENT-TYPE").unwrap(),
            "text/html"
        );
        assert!(header_value(&parts.header, "x-powered-by").is_none());
    }

    #[test]
    fn request_builders() {
        let get = String::from_utf8(default_get("10.0.0.1")).unwrap();
        assert!(get.starts_with("GET / HTTP/1.1\r\nHost: 10.0.0.1\r\n"));
        assert!(get.ends_with("\r\n\r\n"));
        let fav = String::from_utf8(get_for_path("10.0.0.1", "/favicon.ico")).unwrap();
        assert!(fav.starts_with("GET /favicon.ico "));
    }
}
