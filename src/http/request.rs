//! Finalized HTTP request.
//!
//! # Responsibilities
//! - Validate the parsed head (Host, Transfer-Encoding, Content-Length)
//! - Build the absolute request URL from the target and Host header
//! - Expose keep-alive, `Expect: 100-continue` and upgrade intent
//!
//! # Design Decisions
//! - Validation failures carry the HTTP status sent back to the client
//! - A Host header without a port inherits the local port

use std::net::SocketAddr;

use http::header::{self, HeaderMap};
use http::{Method, StatusCode, Version};
use url::Url;

use crate::error::{Error, Result};
use crate::http::parser::RequestHead;

/// Transport facts the request needs to finalize itself.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionInfo {
    pub local_addr: SocketAddr,
    pub remote_addr: SocketAddr,
    pub secure: bool,
}

/// How the request body is delimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFraming {
    Empty,
    Fixed(u64),
    Chunked,
}

#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    target: String,
    version: Version,
    headers: HeaderMap,
    url: Url,
    framing: BodyFraming,
    keep_alive: bool,
    info: ConnectionInfo,
}

impl Request {
    /// Validate `head` and resolve its URL.
    pub fn from_head(head: RequestHead, info: ConnectionInfo) -> Result<Self> {
        let RequestHead {
            method,
            target,
            version,
            headers,
        } = head;

        let host = headers.get(header::HOST).map(|v| v.to_str().unwrap_or_default().trim());
        if version == Version::HTTP_11 && host.is_none() {
            return Err(Error::bad_request("Invalid Host header"));
        }

        let url = build_url(&target, host, &info)?;

        let mut framing = BodyFraming::Empty;
        let chunked = match headers.get(header::TRANSFER_ENCODING) {
            Some(te) if te.as_bytes().eq_ignore_ascii_case(b"chunked") => true,
            Some(_) => {
                return Err(Error::Request {
                    status: StatusCode::NOT_IMPLEMENTED,
                    message: "Unsupported transfer encoding",
                })
            }
            None => false,
        };
        if chunked {
            framing = BodyFraming::Chunked;
        } else if let Some(value) = headers.get(header::CONTENT_LENGTH) {
            let len = value
                .to_str()
                .ok()
                .and_then(|s| s.trim().parse::<u64>().ok())
                .ok_or_else(|| Error::bad_request("Invalid Content-Length header"))?;
            if len > 0 {
                framing = BodyFraming::Fixed(len);
            }
        } else if method == Method::POST || method == Method::PUT {
            return Err(Error::Request {
                status: StatusCode::LENGTH_REQUIRED,
                message: "Length required",
            });
        }

        let keep_alive = {
            let connection = headers
                .get_all(header::CONNECTION)
                .iter()
                .filter_map(|v| v.to_str().ok())
                .flat_map(|v| v.split(','))
                .map(str::trim)
                .collect::<Vec<_>>();
            let has = |token: &str| connection.iter().any(|t| t.eq_ignore_ascii_case(token));
            match version {
                Version::HTTP_10 => has("keep-alive"),
                _ => !has("close"),
            }
        };

        Ok(Self {
            method,
            target,
            version,
            headers,
            url,
            framing,
            keep_alive,
            info,
        })
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Request target exactly as sent.
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// First value of `name` as text.
    pub fn header(&self, name: impl header::AsHeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn framing(&self) -> BodyFraming {
        self.framing
    }

    pub fn content_length(&self) -> Option<u64> {
        match self.framing {
            BodyFraming::Fixed(len) => Some(len),
            BodyFraming::Empty => Some(0),
            BodyFraming::Chunked => None,
        }
    }

    pub fn is_chunked(&self) -> bool {
        self.framing == BodyFraming::Chunked
    }

    pub fn has_entity_body(&self) -> bool {
        self.framing != BodyFraming::Empty
    }

    /// Whether the client allows the connection to be reused.
    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    pub fn expects_continue(&self) -> bool {
        self.version == Version::HTTP_11
            && self
                .header(header::EXPECT)
                .is_some_and(|v| v.eq_ignore_ascii_case("100-continue"))
    }

    /// GET over HTTP/1.1 asking to switch to the WebSocket protocol.
    pub fn is_websocket_upgrade(&self) -> bool {
        self.method == Method::GET
            && self.version > Version::HTTP_10
            && self
                .header(header::UPGRADE)
                .is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.info.local_addr
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.info.remote_addr
    }

    pub fn is_secure(&self) -> bool {
        self.info.secure
    }
}

fn build_url(target: &str, host: Option<&str>, info: &ConnectionInfo) -> Result<Url> {
    let invalid = || Error::bad_request("Invalid request url");

    if target.contains("://") {
        return Url::parse(target).map_err(|_| invalid());
    }
    if !target.starts_with('/') {
        return Err(invalid());
    }

    let scheme = if info.secure { "https" } else { "http" };
    let port = info.local_addr.port();
    let authority = match host.filter(|h| !h.is_empty()) {
        Some(h) if has_port(h) => h.to_string(),
        Some(h) => format!("{h}:{port}"),
        None => info.local_addr.to_string(),
    };
    Url::parse(&format!("{scheme}://{authority}{target}")).map_err(|_| invalid())
}

fn has_port(host: &str) -> bool {
    match host.rfind(':') {
        Some(idx) => !host[idx..].contains(']'),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::parser::RequestParser;

    fn info() -> ConnectionInfo {
        ConnectionInfo {
            local_addr: "127.0.0.1:8080".parse().unwrap(),
            remote_addr: "127.0.0.1:50000".parse().unwrap(),
            secure: false,
        }
    }

    fn parse(raw: &str) -> Result<Request> {
        let mut parser = RequestParser::new(32_768);
        assert!(parser.feed(raw.as_bytes())?);
        Request::from_head(parser.take_head()?, info())
    }

    #[test]
    fn builds_url_from_host() {
        let req = parse("GET /chat?x=1 HTTP/1.1\r\nHost: example.com\r\n\r\n").unwrap();
        assert_eq!(req.url().as_str(), "http://example.com:8080/chat?x=1");
        assert!(req.keep_alive());
        assert_eq!(req.framing(), BodyFraming::Empty);

        let req = parse("GET / HTTP/1.1\r\nHost: [::1]:9000\r\n\r\n").unwrap();
        assert_eq!(req.url().port(), Some(9000));

        let req = parse("GET / HTTP/1.0\r\n\r\n").unwrap();
        assert_eq!(req.url().as_str(), "http://127.0.0.1:8080/");
        assert!(!req.keep_alive());
    }

    #[test]
    fn http11_requires_host() {
        let err = parse("GET / HTTP/1.1\r\n\r\n").unwrap_err();
        assert_eq!(err.status_code(), Some(StatusCode::BAD_REQUEST));
    }

    #[test]
    fn validates_body_framing() {
        let err = parse("POST / HTTP/1.1\r\nHost: h\r\n\r\n").unwrap_err();
        assert_eq!(err.status_code(), Some(StatusCode::LENGTH_REQUIRED));

        let err = parse("POST / HTTP/1.1\r\nHost: h\r\nTransfer-Encoding: gzip\r\n\r\n").unwrap_err();
        assert_eq!(err.status_code(), Some(StatusCode::NOT_IMPLEMENTED));

        let err = parse("POST / HTTP/1.1\r\nHost: h\r\nContent-Length: ten\r\n\r\n").unwrap_err();
        assert_eq!(err.status_code(), Some(StatusCode::BAD_REQUEST));

        let req = parse("POST / HTTP/1.1\r\nHost: h\r\nTransfer-Encoding: Chunked\r\n\r\n").unwrap();
        assert!(req.is_chunked());

        let req = parse("PUT / HTTP/1.1\r\nHost: h\r\nContent-Length: 5\r\n\r\n").unwrap();
        assert_eq!(req.content_length(), Some(5));
    }

    #[test]
    fn detects_connection_intent() {
        let req = parse("GET / HTTP/1.1\r\nHost: h\r\nConnection: keep-alive, Close\r\n\r\n").unwrap();
        assert!(!req.keep_alive());

        let req = parse("GET / HTTP/1.0\r\nConnection: Keep-Alive\r\n\r\n").unwrap();
        assert!(req.keep_alive());

        let req = parse("POST / HTTP/1.1\r\nHost: h\r\nContent-Length: 1\r\nExpect: 100-continue\r\n\r\n").unwrap();
        assert!(req.expects_continue());

        let req = parse("GET /ws HTTP/1.1\r\nHost: h\r\nUpgrade: WebSocket\r\nConnection: Upgrade\r\n\r\n").unwrap();
        assert!(req.is_websocket_upgrade());
    }
}
