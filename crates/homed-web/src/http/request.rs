//! Minimal HTTP/1.1 request parsing.
//!
//! The gateway speaks just enough HTTP to serve the frontend and accept
//! the WebSocket upgrade: one request per connection, no chunked bodies,
//! no pipelining. Parsing never fails; malformed pieces degrade to empty
//! fields instead.

use percent_encoding::percent_decode_str;
use std::collections::HashMap;

/// Byte offset one past the head/body boundary (`\r\n\r\n`), if present.
pub fn head_end(buffer: &[u8]) -> Option<usize> {
    buffer
        .windows(4)
        .position(|window| window == b"\r\n\r\n")
        .map(|i| i + 4)
}

/// A parsed HTTP request.
///
/// Header and cookie keys are case-sensitive, matching what the dashboard
/// frontend and browsers actually send.
#[derive(Debug, Clone, Default)]
pub struct Request {
    pub method: String,
    pub target: String,
    pub headers: HashMap<String, String>,
    pub cookies: HashMap<String, String>,
    pub params: HashMap<String, String>,
    body_len: usize,
}

impl Request {
    /// Parse a request buffer (head plus any body bytes buffered so far).
    pub fn parse(buffer: &[u8]) -> Self {
        let boundary = head_end(buffer);
        let head_bytes = &buffer[..boundary.map(|end| end - 4).unwrap_or(buffer.len())];
        let body_bytes = boundary.map(|end| &buffer[end..]).unwrap_or_default();

        let head = String::from_utf8_lossy(head_bytes);
        let mut lines = head.split("\r\n");

        let mut request_line = lines.next().unwrap_or_default().split(' ');
        let method = request_line.next().unwrap_or_default().to_string();
        let target = request_line.next().unwrap_or_default().to_string();

        let mut headers = HashMap::new();
        for line in lines {
            match line.split_once(':') {
                Some((name, value)) => {
                    headers.insert(name.trim().to_string(), value.trim().to_string())
                }
                None => headers.insert(line.trim().to_string(), String::new()),
            };
        }

        let mut cookies = HashMap::new();
        if let Some(header) = headers.get("Cookie") {
            for entry in header.split(';') {
                match entry.split_once('=') {
                    Some((name, value)) => {
                        cookies.insert(name.trim().to_string(), value.trim().to_string())
                    }
                    None => cookies.insert(entry.trim().to_string(), String::new()),
                };
            }
        }

        let body = String::from_utf8_lossy(body_bytes);
        let source = if method == "GET" && target.contains('?') {
            target.split_once('?').map(|(_, query)| query).unwrap_or("")
        } else {
            body.as_ref()
        };

        let mut params = HashMap::new();
        if !source.is_empty() {
            for entry in source.split('&') {
                let (name, value) = entry.split_once('=').unwrap_or((entry, ""));
                params.insert(
                    name.to_string(),
                    percent_decode_str(value).decode_utf8_lossy().into_owned(),
                );
            }
        }

        Self {
            method,
            target,
            headers,
            cookies,
            params,
            body_len: body_bytes.len(),
        }
    }

    /// Target path with any query string stripped.
    pub fn path(&self) -> &str {
        self.target
            .split_once('?')
            .map(|(path, _)| path)
            .unwrap_or(&self.target)
    }

    /// Header value, empty when absent.
    pub fn header(&self, name: &str) -> &str {
        self.headers.get(name).map(String::as_str).unwrap_or("")
    }

    /// Cookie value, empty when absent.
    pub fn cookie(&self, name: &str) -> &str {
        self.cookies.get(name).map(String::as_str).unwrap_or("")
    }

    /// Parameter value (query for GET, form body otherwise), empty when absent.
    pub fn param(&self, name: &str) -> &str {
        self.params.get(name).map(String::as_str).unwrap_or("")
    }

    /// Declared body length; malformed or absent `Content-Length` counts as 0.
    pub fn content_length(&self) -> usize {
        self.header("Content-Length").parse().unwrap_or(0)
    }

    /// Whether the buffered body covers the declared `Content-Length`.
    pub fn has_full_body(&self) -> bool {
        self.body_len >= self.content_length()
    }

    /// Whether this request asks for the WebSocket upgrade.
    pub fn is_upgrade(&self) -> bool {
        self.header("Upgrade") == "websocket"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn head_end_finds_boundary() {
        assert_eq!(head_end(b"GET / HTTP/1.1\r\n\r\n"), Some(18));
        assert_eq!(head_end(b"GET / HTTP/1.1\r\nHost: x\r\n"), None);
        assert_eq!(head_end(b""), None);
    }

    #[test]
    fn parses_get_with_query_and_cookies() {
        let request = Request::parse(
            b"GET /logout?session=all HTTP/1.1\r\nHost: gateway\r\nCookie: homed-auth-token=abc123; theme=dark\r\n\r\n",
        );
        assert_eq!(request.method, "GET");
        assert_eq!(request.target, "/logout?session=all");
        assert_eq!(request.path(), "/logout");
        assert_eq!(request.param("session"), "all");
        assert_eq!(request.cookie("homed-auth-token"), "abc123");
        assert_eq!(request.cookie("theme"), "dark");
    }

    #[test]
    fn parses_post_form_body() {
        let request = Request::parse(
            b"POST / HTTP/1.1\r\nContent-Length: 30\r\n\r\nusername=admin&password=p%40ss",
        );
        assert_eq!(request.method, "POST");
        assert_eq!(request.param("username"), "admin");
        assert_eq!(request.param("password"), "p@ss");
    }

    #[test]
    fn header_splits_on_first_colon() {
        let request = Request::parse(b"GET / HTTP/1.1\r\nHost: gateway.local:8080\r\n\r\n");
        assert_eq!(request.header("Host"), "gateway.local:8080");
    }

    #[test]
    fn malformed_pieces_degrade_to_empty() {
        let request = Request::parse(
            b"GET / HTTP/1.1\r\nBroken-Header\r\nCookie: orphan; a=1\r\n\r\n",
        );
        assert_eq!(request.header("Broken-Header"), "");
        assert_eq!(request.cookie("orphan"), "");
        assert_eq!(request.cookie("a"), "1");
    }

    #[test]
    fn missing_param_value_defaults_empty() {
        let request = Request::parse(b"GET /?a=1&b&c=%20 HTTP/1.1\r\n\r\n");
        assert_eq!(request.param("a"), "1");
        assert_eq!(request.param("b"), "");
        assert_eq!(request.param("c"), " ");
    }

    #[test]
    fn content_length_tracks_body() {
        let partial = Request::parse(b"POST / HTTP/1.1\r\nContent-Length: 10\r\n\r\nabc");
        assert_eq!(partial.content_length(), 10);
        assert!(!partial.has_full_body());

        let full = Request::parse(b"POST / HTTP/1.1\r\nContent-Length: 3\r\n\r\nabc");
        assert!(full.has_full_body());

        let junk = Request::parse(b"POST / HTTP/1.1\r\nContent-Length: many\r\n\r\n");
        assert_eq!(junk.content_length(), 0);
        assert!(junk.has_full_body());
    }

    #[test]
    fn upgrade_header_detected() {
        let request = Request::parse(
            b"GET / HTTP/1.1\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\r\n",
        );
        assert!(request.is_upgrade());
        assert!(!Request::parse(b"GET / HTTP/1.1\r\n\r\n").is_upgrade());
    }

    #[test]
    fn garbage_never_panics() {
        let request = Request::parse(b"\xff\xfe\x00garbage");
        assert_eq!(request.path(), "");
        assert_eq!(request.content_length(), 0);

        let empty = Request::parse(b"");
        assert_eq!(empty.method, "");
        assert_eq!(empty.target, "");
    }
}
