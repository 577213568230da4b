//! Close status codes (RFC 6455 §7.4).

use std::fmt;

/// Status codes carried in the first two bytes of a close payload.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseStatusCode {
    Normal = 1000,
    Away = 1001,
    ProtocolError = 1002,
    UnsupportedData = 1003,
    Undefined = 1004,
    NoStatus = 1005,
    Abnormal = 1006,
    InvalidData = 1007,
    PolicyViolation = 1008,
    TooBig = 1009,
    MandatoryExtension = 1010,
    ServerError = 1011,
    TlsHandshakeFailure = 1015,
}

impl CloseStatusCode {
    /// Numeric value as sent on the wire.
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Map a wire value back to a known code.
    pub fn from_u16(code: u16) -> Option<Self> {
        let code = match code {
            1000 => Self::Normal,
            1001 => Self::Away,
            1002 => Self::ProtocolError,
            1003 => Self::UnsupportedData,
            1004 => Self::Undefined,
            1005 => Self::NoStatus,
            1006 => Self::Abnormal,
            1007 => Self::InvalidData,
            1008 => Self::PolicyViolation,
            1009 => Self::TooBig,
            1010 => Self::MandatoryExtension,
            1011 => Self::ServerError,
            1015 => Self::TlsHandshakeFailure,
            _ => return None,
        };
        Some(code)
    }
}

impl From<CloseStatusCode> for u16 {
    fn from(code: CloseStatusCode) -> Self {
        code.as_u16()
    }
}

impl fmt::Display for CloseStatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?})", self.as_u16(), self)
    }
}

/// Codes that must never appear in a close frame sent by an endpoint.
pub fn is_reserved(code: u16) -> bool {
    matches!(code, 1004 | 1005 | 1006 | 1015)
}

/// Codes a close frame may legally carry.
pub fn is_close_status_code(code: u16) -> bool {
    (1000..=4999).contains(&code)
}
