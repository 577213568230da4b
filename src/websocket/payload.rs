//! Frame payload buffer and close-payload interpretation.

use std::fmt;

use crate::websocket::close::{is_reserved, CloseStatusCode};

/// Status reported when a close payload carries no code.
pub const NO_STATUS: u16 = CloseStatusCode::NoStatus as u16;

/// XOR `buf` with `key`, cycling the key by byte index.
///
/// Applying the same key twice restores the original bytes.
pub fn apply_mask(buf: &mut [u8], key: [u8; 4]) {
    for (i, b) in buf.iter_mut().enumerate() {
        *b ^= key[i & 3];
    }
}

/// Raw payload bytes plus the offset where application data begins.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct PayloadData {
    data: Vec<u8>,
    extension_len: usize,
}

impl PayloadData {
    /// Wrap raw bytes with no extension data.
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            extension_len: 0,
        }
    }

    /// An empty payload.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a close payload: big-endian code followed by the UTF-8 reason.
    pub fn from_close(code: u16, reason: &str) -> Self {
        let mut data = Vec::with_capacity(2 + reason.len());
        data.extend_from_slice(&code.to_be_bytes());
        data.extend_from_slice(reason.as_bytes());
        Self::new(data)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }

    /// Mark the first `len` bytes as extension data.
    pub fn set_extension_len(&mut self, len: usize) {
        self.extension_len = len.min(self.data.len());
    }

    pub fn extension_len(&self) -> usize {
        self.extension_len
    }

    pub fn extension_data(&self) -> &[u8] {
        &self.data[..self.extension_len]
    }

    pub fn application_data(&self) -> &[u8] {
        &self.data[self.extension_len..]
    }

    /// Close status code, or 1005 when fewer than two bytes are present.
    pub fn code(&self) -> u16 {
        if self.data.len() >= 2 {
            u16::from_be_bytes([self.data[0], self.data[1]])
        } else {
            NO_STATUS
        }
    }

    /// Close reason; empty when absent or not valid UTF-8.
    pub fn reason(&self) -> String {
        if self.data.len() <= 2 {
            return String::new();
        }
        std::str::from_utf8(&self.data[2..])
            .map(str::to_owned)
            .unwrap_or_default()
    }

    /// True when the payload carries a code an endpoint must not send.
    pub fn has_reserved_code(&self) -> bool {
        self.data.len() >= 2 && is_reserved(self.code())
    }

    pub(crate) fn mask(&mut self, key: [u8; 4]) {
        apply_mask(&mut self.data, key);
    }
}

impl From<Vec<u8>> for PayloadData {
    fn from(data: Vec<u8>) -> Self {
        Self::new(data)
    }
}

impl From<&[u8]> for PayloadData {
    fn from(data: &[u8]) -> Self {
        Self::new(data.to_vec())
    }
}

impl fmt::Debug for PayloadData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PayloadData")
            .field("len", &self.data.len())
            .field("extension_len", &self.extension_len)
            .finish()
    }
}

impl fmt::Display for PayloadData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, b) in self.data.iter().enumerate() {
            if i > 0 {
                f.write_str("-")?;
            }
            write!(f, "{b:02X}")?;
        }
        Ok(())
    }
}
