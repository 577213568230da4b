//! Incremental request-head parser.
//!
//! # Responsibilities
//! - Scan raw bytes for CR/LF-terminated lines across partial reads
//! - Parse the request line and header fields
//! - Enforce the cap on bytes consumed before the blank line
//!
//! # Design Decisions
//! - The caller owns the byte buffer; the parser only keeps a cursor into it
//! - CR only sets a flag and LF ends the line, so bare LF is accepted
//! - The line buffer is reused across lines and requests

use http::header::{HeaderMap, HeaderName, HeaderValue};
use http::{Method, Version};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineState {
    None,
    Cr,
    Lf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InputState {
    RequestLine,
    Headers,
}

/// Request line and headers as received.
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub method: Method,
    pub target: String,
    pub version: Version,
    pub headers: HeaderMap,
}

/// Parses one request head at a time from a growing byte buffer.
#[derive(Debug)]
pub struct RequestParser {
    line: Vec<u8>,
    line_state: LineState,
    input_state: InputState,
    position: usize,
    max_input_length: usize,
    method: Option<Method>,
    target: String,
    version: Version,
    headers: HeaderMap,
}

impl RequestParser {
    pub fn new(max_input_length: usize) -> Self {
        Self {
            line: Vec::with_capacity(64),
            line_state: LineState::None,
            input_state: InputState::RequestLine,
            position: 0,
            max_input_length,
            method: None,
            target: String::new(),
            version: Version::HTTP_11,
            headers: HeaderMap::new(),
        }
    }

    /// Bytes of the buffer consumed so far.
    pub fn position(&self) -> usize {
        self.position
    }

    /// True once the request line has been parsed.
    pub fn in_headers(&self) -> bool {
        self.input_state == InputState::Headers
    }

    /// Scan `data[position..]`.
    ///
    /// Returns `Ok(true)` once the blank line ending the head was consumed and
    /// `Ok(false)` when more bytes are needed.
    pub fn feed(&mut self, data: &[u8]) -> Result<bool> {
        while let Some(nread) = self.read_line(&data[self.position..]) {
            self.position += nread;

            if self.line.is_empty() {
                if self.input_state == InputState::RequestLine {
                    continue;
                }
                if self.position > self.max_input_length {
                    return Err(Error::HeadersTooLong);
                }
                return Ok(true);
            }

            let result = match self.input_state {
                InputState::RequestLine => self.set_request_line(),
                InputState::Headers => self.add_header(),
            };
            self.line.clear();
            result?;
            self.input_state = InputState::Headers;
        }

        if self.position >= self.max_input_length {
            return Err(Error::HeadersTooLong);
        }
        Ok(false)
    }

    /// Consume bytes up to and including the next LF.
    ///
    /// Returns `None` (after consuming everything) when no LF was found.
    fn read_line(&mut self, data: &[u8]) -> Option<usize> {
        if self.line_state == LineState::Lf {
            self.line_state = LineState::None;
        }
        let mut nread = 0;
        for &b in data {
            nread += 1;
            match b {
                b'\r' => self.line_state = LineState::Cr,
                b'\n' => {
                    self.line_state = LineState::Lf;
                    break;
                }
                _ => self.line.push(b),
            }
        }
        if self.line_state == LineState::Lf {
            Some(nread)
        } else {
            self.position += nread;
            None
        }
    }

    fn set_request_line(&mut self) -> Result<()> {
        let line = std::str::from_utf8(&self.line).map_err(|_| Error::bad_request("Invalid request line"))?;
        let mut parts = line.split(' ');
        let (Some(method), Some(target), Some(version), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(Error::bad_request("Invalid request line"));
        };
        if target.is_empty() {
            return Err(Error::bad_request("Invalid request line (target)"));
        }

        let method = Method::from_bytes(method.as_bytes())
            .map_err(|_| Error::bad_request("Invalid request line (method)"))?;
        let version = match version {
            "HTTP/1.1" => Version::HTTP_11,
            "HTTP/1.0" => Version::HTTP_10,
            _ => return Err(Error::bad_request("Invalid request line (version)")),
        };

        self.method = Some(method);
        self.target.clear();
        self.target.push_str(target);
        self.version = version;
        Ok(())
    }

    fn add_header(&mut self) -> Result<()> {
        let colon = self
            .line
            .iter()
            .position(|&b| b == b':')
            .ok_or_else(|| Error::bad_request("Invalid header"))?;
        let (name, value) = self.line.split_at(colon);
        let name = HeaderName::from_bytes(name.trim_ascii_end()).map_err(|_| Error::bad_request("Invalid header name"))?;
        let value =
            HeaderValue::from_bytes(value[1..].trim_ascii()).map_err(|_| Error::bad_request("Invalid header value"))?;
        self.headers.append(name, value);
        Ok(())
    }

    /// Hand out the parsed head. Only meaningful after `feed` returned true.
    pub fn take_head(&mut self) -> Result<RequestHead> {
        let method = self.method.take().ok_or_else(|| Error::bad_request("Invalid request line"))?;
        Ok(RequestHead {
            method,
            target: std::mem::take(&mut self.target),
            version: self.version,
            headers: std::mem::take(&mut self.headers),
        })
    }

    /// Prepare for the next request on the same connection.
    pub fn reset(&mut self) {
        self.line.clear();
        self.line_state = LineState::None;
        self.input_state = InputState::RequestLine;
        self.position = 0;
        self.method = None;
        self.target.clear();
        self.version = Version::HTTP_11;
        self.headers.clear();
    }
}
