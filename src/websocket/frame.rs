//! RFC 6455 frame encoding and decoding.
//!
//! # Responsibilities
//! - Encode frames with the minimal payload-length class
//! - Mask client-bound payloads with a random 4-byte key
//! - Decode frames from an async byte stream, validating control-frame rules
//!
//! # Wire Layout
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
//! |N|V|V|V|       |S|             |   (if payload len==126/127)   |
//! +-+-+-+-+-------+-+-------------+ - - - - - - - - - - - - - - - +
//! |     Masking-key (0 or 4 bytes)     |     Payload Data ...     |
//! +---------------------------------------------------------------+
//! ```
//!
//! # Design Decisions
//! - Decoding is a sequence of awaits: header, length, key, payload
//! - Header validation happens before any further byte is read
//! - Payload reads are bounded by the declared length, never pre-allocated
//!   beyond what actually arrives

use std::fmt;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{Error, Result};
use crate::websocket::payload::PayloadData;

/// Largest payload a control frame may carry.
pub const MAX_CONTROL_PAYLOAD: usize = 125;

/// Payload size above which a message is sent as several fragments.
pub const FRAGMENT_LENGTH: usize = 1016;

/// Frame type tag.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    Cont = 0x0,
    Text = 0x1,
    Binary = 0x2,
    Close = 0x8,
    Ping = 0x9,
    Pong = 0xA,
}

impl Opcode {
    /// Returns `None` for reserved opcodes.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x0 => Some(Opcode::Cont),
            0x1 => Some(Opcode::Text),
            0x2 => Some(Opcode::Binary),
            0x8 => Some(Opcode::Close),
            0x9 => Some(Opcode::Ping),
            0xA => Some(Opcode::Pong),
            _ => None,
        }
    }

    pub fn is_data(self) -> bool {
        matches!(self, Opcode::Text | Opcode::Binary)
    }

    pub fn is_control(self) -> bool {
        (self as u8) >= 0x8
    }
}

/// One RFC 6455 protocol unit.
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    fin: bool,
    rsv1: bool,
    rsv2: bool,
    rsv3: bool,
    opcode: Opcode,
    payload_length: u8,
    masking_key: Option<[u8; 4]>,
    payload: PayloadData,
}

impl Frame {
    /// Build an outgoing frame.
    ///
    /// RSV1 is set only when `compressed` and the opcode carries data.
    /// Control frames must be final and at most 125 bytes.
    pub fn new(
        fin: bool,
        opcode: Opcode,
        payload: impl Into<PayloadData>,
        compressed: bool,
        mask: bool,
    ) -> Result<Self> {
        let mut payload = payload.into();
        let len = payload.len();

        if opcode.is_control() {
            if !fin {
                return Err(Error::protocol("A control frame is fragmented."));
            }
            if len > MAX_CONTROL_PAYLOAD {
                return Err(Error::protocol("A control frame has too long payload length."));
            }
        }

        let payload_length = if len < 126 {
            len as u8
        } else if len < 0x1_0000 {
            126
        } else {
            127
        };

        let masking_key = if mask {
            let key: [u8; 4] = rand::random();
            payload.mask(key);
            Some(key)
        } else {
            None
        };

        Ok(Self {
            fin,
            rsv1: opcode.is_data() && compressed,
            rsv2: false,
            rsv3: false,
            opcode,
            payload_length,
            masking_key,
            payload,
        })
    }

    pub fn close(payload: PayloadData, mask: bool) -> Result<Self> {
        Self::new(true, Opcode::Close, payload, false, mask)
    }

    pub fn ping(data: impl Into<PayloadData>, mask: bool) -> Result<Self> {
        Self::new(true, Opcode::Ping, data, false, mask)
    }

    pub fn pong(data: impl Into<PayloadData>, mask: bool) -> Result<Self> {
        Self::new(true, Opcode::Pong, data, false, mask)
    }

    /// Split one message into frames of at most [`FRAGMENT_LENGTH`] bytes.
    ///
    /// The first frame carries `opcode` (and RSV1 when compressed), the rest
    /// are continuations; only the last is final.
    pub fn fragments(opcode: Opcode, data: &[u8], compressed: bool, mask: bool) -> Result<Vec<Self>> {
        if !opcode.is_data() {
            return Err(Error::protocol("Only data frames can be fragmented."));
        }
        if data.len() <= FRAGMENT_LENGTH {
            return Ok(vec![Self::new(true, opcode, data, compressed, mask)?]);
        }

        let mut chunks = data.chunks(FRAGMENT_LENGTH).peekable();
        let mut frames = Vec::with_capacity(data.len().div_ceil(FRAGMENT_LENGTH));
        let mut first = true;
        while let Some(chunk) = chunks.next() {
            let fin = chunks.peek().is_none();
            let frame = if first {
                Self::new(fin, opcode, chunk, compressed, mask)?
            } else {
                Self::new(fin, Opcode::Cont, chunk, false, mask)?
            };
            frames.push(frame);
            first = false;
        }
        Ok(frames)
    }

    pub fn fin(&self) -> bool {
        self.fin
    }

    pub fn rsv1(&self) -> bool {
        self.rsv1
    }

    pub fn rsv2(&self) -> bool {
        self.rsv2
    }

    pub fn rsv3(&self) -> bool {
        self.rsv3
    }

    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    pub fn is_compressed(&self) -> bool {
        self.rsv1
    }

    pub fn is_masked(&self) -> bool {
        self.masking_key.is_some()
    }

    pub fn is_fragment(&self) -> bool {
        !self.fin || self.opcode == Opcode::Cont
    }

    pub fn masking_key(&self) -> Option<[u8; 4]> {
        self.masking_key
    }

    pub fn payload(&self) -> &PayloadData {
        &self.payload
    }

    pub fn into_payload(self) -> PayloadData {
        self.payload
    }

    /// The 7-bit length field as it appears on the wire.
    pub fn payload_length(&self) -> u8 {
        self.payload_length
    }

    pub fn exact_payload_length(&self) -> u64 {
        self.payload.len() as u64
    }

    /// Width of the extended length field: 0, 2 or 8 bytes.
    pub fn extended_payload_length_width(&self) -> usize {
        extended_width(self.payload_length)
    }

    /// Remove the mask in place.
    pub fn unmask(&mut self) {
        if let Some(key) = self.masking_key.take() {
            self.payload.mask(key);
        }
    }

    /// Serialize the frame.
    pub fn to_bytes(&self) -> Vec<u8> {
        let ext = self.extended_payload_length_width();
        let key_len = if self.masking_key.is_some() { 4 } else { 0 };
        let mut out = Vec::with_capacity(2 + ext + key_len + self.payload.len());

        let mut b0 = self.opcode as u8;
        if self.fin {
            b0 |= 0x80;
        }
        if self.rsv1 {
            b0 |= 0x40;
        }
        if self.rsv2 {
            b0 |= 0x20;
        }
        if self.rsv3 {
            b0 |= 0x10;
        }
        let mut b1 = self.payload_length;
        if self.masking_key.is_some() {
            b1 |= 0x80;
        }
        out.push(b0);
        out.push(b1);

        let len = self.payload.len() as u64;
        match ext {
            2 => out.extend_from_slice(&(len as u16).to_be_bytes()),
            8 => out.extend_from_slice(&len.to_be_bytes()),
            _ => {}
        }
        if let Some(key) = self.masking_key {
            out.extend_from_slice(&key);
        }
        out.extend_from_slice(self.payload.as_bytes());
        out
    }
}

/// Encode a single final frame.
pub fn encode(opcode: Opcode, payload: &[u8], compressed: bool, mask: bool) -> Result<Vec<u8>> {
    Ok(Frame::new(true, opcode, payload, compressed, mask)?.to_bytes())
}

fn extended_width(payload_length: u8) -> usize {
    match payload_length {
        0..=125 => 0,
        126 => 2,
        _ => 8,
    }
}

struct Header {
    fin: bool,
    rsv1: bool,
    rsv2: bool,
    rsv3: bool,
    opcode: Opcode,
    masked: bool,
    payload_length: u8,
}

fn process_header(header: [u8; 2]) -> Result<Header> {
    let fin = header[0] & 0x80 == 0x80;
    let rsv1 = header[0] & 0x40 == 0x40;
    let rsv2 = header[0] & 0x20 == 0x20;
    let rsv3 = header[0] & 0x10 == 0x10;
    let raw_opcode = header[0] & 0x0F;
    let masked = header[1] & 0x80 == 0x80;
    let payload_length = header[1] & 0x7F;

    let opcode = Opcode::from_u8(raw_opcode)
        .ok_or_else(|| Error::protocol(format!("A frame has an unsupported opcode {raw_opcode:#x}.")))?;

    if !opcode.is_data() && rsv1 {
        return Err(Error::protocol("A non data frame is compressed."));
    }

    if opcode.is_control() {
        if !fin {
            return Err(Error::protocol("A control frame is fragmented."));
        }
        if payload_length as usize > MAX_CONTROL_PAYLOAD {
            return Err(Error::protocol("A control frame has too long payload length."));
        }
    }

    Ok(Header {
        fin,
        rsv1,
        rsv2,
        rsv3,
        opcode,
        masked,
        payload_length,
    })
}

async fn read_field<R>(reader: &mut R, buf: &mut [u8], what: &'static str) -> Result<()>
where
    R: AsyncRead + Unpin + ?Sized,
{
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(Error::TruncatedIo(what)),
        Err(e) => Err(Error::Io(e)),
    }
}

/// Read one frame from `reader`.
///
/// Fails with [`Error::Protocol`] on header violations, [`Error::PayloadTooBig`]
/// when the declared length exceeds `max_payload`, and [`Error::TruncatedIo`]
/// when the stream ends early. When `unmask` is set the payload is unmasked
/// right after it is read.
pub async fn read_frame<R>(reader: &mut R, unmask: bool, max_payload: u64) -> Result<Frame>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut raw = [0u8; 2];
    read_field(reader, &mut raw, "The header part of a frame could not be read.").await?;
    let header = process_header(raw)?;

    let exact_len = match extended_width(header.payload_length) {
        0 => header.payload_length as u64,
        2 => {
            let mut ext = [0u8; 2];
            read_field(reader, &mut ext, "The extended payload length of a frame could not be read.").await?;
            u16::from_be_bytes(ext) as u64
        }
        _ => {
            let mut ext = [0u8; 8];
            read_field(reader, &mut ext, "The extended payload length of a frame could not be read.").await?;
            u64::from_be_bytes(ext)
        }
    };

    let masking_key = if header.masked {
        let mut key = [0u8; 4];
        read_field(reader, &mut key, "The masking key of a frame could not be read.").await?;
        Some(key)
    } else {
        None
    };

    if exact_len > max_payload {
        return Err(Error::PayloadTooBig {
            len: exact_len,
            max: max_payload,
        });
    }

    let mut data = Vec::new();
    if exact_len > 0 {
        let read = (&mut *reader).take(exact_len).read_to_end(&mut data).await?;
        if read as u64 != exact_len {
            return Err(Error::TruncatedIo("The payload data of a frame could not be read."));
        }
    }

    let mut frame = Frame {
        fin: header.fin,
        rsv1: header.rsv1,
        rsv2: header.rsv2,
        rsv3: header.rsv3,
        opcode: header.opcode,
        payload_length: header.payload_length,
        masking_key,
        payload: PayloadData::new(data),
    };

    if unmask {
        frame.unmask();
    }

    Ok(frame)
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("fin", &self.fin)
            .field("rsv1", &self.rsv1)
            .field("opcode", &self.opcode)
            .field("masked", &self.is_masked())
            .field("len", &self.payload.len())
            .finish()
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ext = if self.payload_length > 125 {
            self.exact_payload_length().to_string()
        } else {
            String::new()
        };
        let key = self
            .masking_key
            .map(|k| format!("{:02X}-{:02X}-{:02X}-{:02X}", k[0], k[1], k[2], k[3]))
            .unwrap_or_default();
        let data = if self.payload_length == 0 {
            String::new()
        } else if self.payload_length > 125 {
            "---".to_string()
        } else if self.opcode != Opcode::Text || self.is_fragment() || self.is_masked() || self.rsv1 {
            self.payload.to_string()
        } else {
            String::from_utf8_lossy(self.payload.application_data()).into_owned()
        };

        writeln!(f, "                    FIN: {}", self.fin)?;
        writeln!(f, "                   RSV1: {}", self.rsv1)?;
        writeln!(f, "                   RSV2: {}", self.rsv2)?;
        writeln!(f, "                   RSV3: {}", self.rsv3)?;
        writeln!(f, "                 Opcode: {:?}", self.opcode)?;
        writeln!(f, "                   MASK: {}", self.is_masked())?;
        writeln!(f, "         Payload Length: {}", self.payload_length)?;
        writeln!(f, "Extended Payload Length: {ext}")?;
        writeln!(f, "            Masking Key: {key}")?;
        write!(f, "           Payload Data: {data}")
    }
}
