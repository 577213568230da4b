//! Chunked transfer-coding decoder (RFC 7230 §4.1).
//!
//! Push-based: the caller feeds whatever bytes it has and receives decoded
//! data plus the number of input bytes consumed. Decoding stops right after
//! the trailer section so bytes of a pipelined request stay with the caller.

use crate::error::{Error, Result};

/// Longest chunk-size or trailer line accepted.
const MAX_LINE_LENGTH: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Size,
    Data(u64),
    DataEnd,
    Trailer,
    Done,
}

#[derive(Debug)]
pub struct ChunkDecoder {
    state: State,
    line: Vec<u8>,
    trailer_bytes: usize,
}

impl ChunkDecoder {
    pub fn new() -> Self {
        Self {
            state: State::Size,
            line: Vec::with_capacity(16),
            trailer_bytes: 0,
        }
    }

    /// True until the terminal chunk and its trailers have been consumed.
    pub fn wants_more(&self) -> bool {
        self.state != State::Done
    }

    pub fn is_done(&self) -> bool {
        self.state == State::Done
    }

    /// Decode from `input`, appending chunk data to `out`.
    ///
    /// Returns the number of input bytes consumed. Once done, nothing more
    /// is consumed.
    pub fn decode(&mut self, input: &[u8], out: &mut Vec<u8>) -> Result<usize> {
        let mut i = 0;
        while i < input.len() {
            match self.state {
                State::Done => break,
                State::Data(remaining) => {
                    let take = remaining.min((input.len() - i) as u64) as usize;
                    out.extend_from_slice(&input[i..i + take]);
                    i += take;
                    let remaining = remaining - take as u64;
                    self.state = if remaining == 0 {
                        State::DataEnd
                    } else {
                        State::Data(remaining)
                    };
                }
                State::DataEnd => {
                    match input[i] {
                        b'\r' => {}
                        b'\n' => self.state = State::Size,
                        _ => return Err(invalid()),
                    }
                    i += 1;
                }
                State::Size | State::Trailer => {
                    let b = input[i];
                    i += 1;
                    if b != b'\n' {
                        if self.line.len() >= MAX_LINE_LENGTH {
                            return Err(invalid());
                        }
                        self.line.push(b);
                        continue;
                    }
                    self.end_line()?;
                }
            }
        }
        Ok(i)
    }

    fn end_line(&mut self) -> Result<()> {
        if self.line.last() == Some(&b'\r') {
            self.line.pop();
        }
        match self.state {
            State::Size => {
                let size = parse_size(&self.line)?;
                self.state = if size == 0 {
                    State::Trailer
                } else {
                    State::Data(size)
                };
            }
            State::Trailer if self.line.is_empty() => self.state = State::Done,
            State::Trailer => {
                self.trailer_bytes += self.line.len();
                if self.trailer_bytes > MAX_LINE_LENGTH {
                    return Err(invalid());
                }
            }
            _ => {}
        }
        self.line.clear();
        Ok(())
    }
}

impl Default for ChunkDecoder {
    fn default() -> Self {
        Self::new()
    }
}

fn invalid() -> Error {
    Error::bad_request("Invalid chunked data")
}

/// Hex size, ignoring chunk extensions after `;`.
fn parse_size(line: &[u8]) -> Result<u64> {
    let end = line.iter().position(|&b| b == b';').unwrap_or(line.len());
    let digits = std::str::from_utf8(&line[..end]).map_err(|_| invalid())?.trim();
    if digits.is_empty() {
        return Err(invalid());
    }
    u64::from_str_radix(digits, 16).map_err(|_| invalid())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_in_one_pass() {
        let mut decoder = ChunkDecoder::new();
        let mut out = Vec::new();
        let input = b"4\r\nWiki\r\n5;ext=1\r\npedia\r\n0\r\n\r\nNEXT";
        let consumed = decoder.decode(input, &mut out).unwrap();
        assert_eq!(out, b"Wikipedia");
        assert!(decoder.is_done());
        assert_eq!(&input[consumed..], b"NEXT");
    }

    #[test]
    fn decodes_byte_by_byte() {
        let mut decoder = ChunkDecoder::new();
        let mut out = Vec::new();
        let input = b"A\r\n0123456789\r\n0\r\nX-Trailer: 1\r\n\r\n";
        for b in input.iter() {
            assert!(decoder.wants_more());
            assert_eq!(decoder.decode(std::slice::from_ref(b), &mut out).unwrap(), 1);
        }
        assert!(decoder.is_done());
        assert_eq!(out, b"0123456789");
    }

    #[test]
    fn stops_consuming_when_done() {
        let mut decoder = ChunkDecoder::new();
        let mut out = Vec::new();
        decoder.decode(b"0\r\n\r\n", &mut out).unwrap();
        assert_eq!(decoder.decode(b"more", &mut out).unwrap(), 0);
        assert!(out.is_empty());
    }

    #[test]
    fn rejects_malformed_sizes_and_framing() {
        let mut out = Vec::new();
        assert!(ChunkDecoder::new().decode(b"zz\r\n", &mut out).is_err());
        assert!(ChunkDecoder::new().decode(b"\r\n", &mut out).is_err());
        assert!(ChunkDecoder::new().decode(b"1\r\nab\r\n", &mut out).is_err());
        assert!(ChunkDecoder::new().decode(b"FFFFFFFFFFFFFFFFF\r\n", &mut out).is_err());
    }
}
