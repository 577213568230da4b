//! Minimal response head rendering.
//!
//! Status, headers and the keep-alive decision. Bodies are written whole
//! with a `Content-Length`.

use std::fmt::Write as _;

use http::header::{self, HeaderMap, HeaderName, HeaderValue};
use http::StatusCode;

const SERVER: &str = concat!("ws-engine/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    close_connection: bool,
}

impl Response {
    pub fn new() -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            close_connection: false,
        }
    }

    /// Response for a failed request: HTML body, connection closed.
    pub fn error(status: StatusCode, message: Option<&str>) -> (Self, Vec<u8>) {
        let mut response = Self::new();
        response.status = status;
        response.close_connection = true;
        response
            .headers
            .insert(header::CONTENT_TYPE, HeaderValue::from_static("text/html"));
        let reason = status.canonical_reason().unwrap_or("");
        let body = match message {
            Some(m) if !m.is_empty() => {
                format!("<html><body><h1>{} {reason} ({m})</h1></body></html>", status.as_u16())
            }
            _ => format!("<html><body><h1>{} {reason}</h1></body></html>", status.as_u16()),
        };
        (response, body.into_bytes())
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn insert_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.headers.insert(name, value);
    }

    pub fn close_connection(&self) -> bool {
        self.close_connection
    }

    /// Ask the engine to close the connection after this response.
    pub fn set_close_connection(&mut self, close: bool) {
        self.close_connection = close;
    }

    /// Serialize the status line and headers for a body of `body_len` bytes.
    pub fn render_head(&self, body_len: usize) -> Vec<u8> {
        let mut head = String::with_capacity(128);
        let reason = self.status.canonical_reason().unwrap_or("");
        let _ = write!(head, "HTTP/1.1 {} {reason}\r\n", self.status.as_u16());
        let _ = write!(head, "Server: {SERVER}\r\n");

        let mut out = head.into_bytes();
        for (name, value) in &self.headers {
            if name == header::CONTENT_LENGTH || name == header::CONNECTION {
                continue;
            }
            out.extend_from_slice(name.as_str().as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value.as_bytes());
            out.extend_from_slice(b"\r\n");
        }

        let connection = if self.close_connection { "close" } else { "keep-alive" };
        let tail = format!("Content-Length: {body_len}\r\nConnection: {connection}\r\n\r\n");
        out.extend_from_slice(tail.as_bytes());
        out
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}

/// Interim response sent for `Expect: 100-continue`.
pub const CONTINUE: &[u8] = b"HTTP/1.1 100 Continue\r\n\r\n";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_head_with_length_and_connection() {
        let mut response = Response::new();
        response.insert_header(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        let head = String::from_utf8(response.render_head(5)).unwrap();
        assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(head.contains("content-type: text/plain\r\n"));
        assert!(head.ends_with("Content-Length: 5\r\nConnection: keep-alive\r\n\r\n"));
    }

    #[test]
    fn error_pages_close_the_connection() {
        let (response, body) = Response::error(StatusCode::BAD_REQUEST, Some("Headers too long"));
        assert!(response.close_connection());
        assert_eq!(
            String::from_utf8(body).unwrap(),
            "<html><body><h1>400 Bad Request (Headers too long)</h1></body></html>"
        );
        let head = String::from_utf8(response.render_head(0)).unwrap();
        assert!(head.contains("Connection: close\r\n"));
    }
}
