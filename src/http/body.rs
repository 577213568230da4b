//! Request body reader.
//!
//! # Responsibilities
//! - Serve body bytes already buffered behind the request head first
//! - Pull further bytes from the transport through the connection's buffer
//! - Stop exactly at the end of the body so pipelined bytes stay buffered
//!
//! # Design Decisions
//! - The body borrows the connection's buffers; nothing is reallocated per
//!   request
//! - A connection close wakes a pending body read
//! - Reads made by a handler carry no inactivity limit of their own; the
//!   request timer is cancelled once the head is dispatched. Handlers that
//!   must bound a slow upload wrap their reads in `tokio::time::timeout`.
//!   The drain after the handler returns is bounded by the reuse timeout.

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::watch;

use crate::error::{Error, Result};
use crate::http::chunked::ChunkDecoder;
use crate::http::request::BodyFraming;
use crate::net::connection::closed_signal;

enum Framing {
    Empty,
    Fixed { remaining: u64 },
    Chunked { decoder: ChunkDecoder, decoded: Vec<u8>, offset: usize },
}

/// Body of the request currently being handled.
pub struct RequestBody<'a> {
    reader: &'a mut (dyn AsyncRead + Unpin + Send),
    read_buf: &'a mut [u8],
    pending: &'a mut Vec<u8>,
    position: &'a mut usize,
    closed: watch::Receiver<bool>,
    framing: Framing,
}

impl<'a> RequestBody<'a> {
    pub(crate) fn new(
        framing: BodyFraming,
        reader: &'a mut (dyn AsyncRead + Unpin + Send),
        read_buf: &'a mut [u8],
        pending: &'a mut Vec<u8>,
        position: &'a mut usize,
        closed: watch::Receiver<bool>,
    ) -> Self {
        let framing = match framing {
            BodyFraming::Empty => Framing::Empty,
            BodyFraming::Fixed(remaining) => Framing::Fixed { remaining },
            BodyFraming::Chunked => Framing::Chunked {
                decoder: ChunkDecoder::new(),
                decoded: Vec::new(),
                offset: 0,
            },
        };
        Self {
            reader,
            read_buf,
            pending,
            position,
            closed,
            framing,
        }
    }

    /// True once every body byte has been read.
    pub fn is_complete(&self) -> bool {
        match &self.framing {
            Framing::Empty => true,
            Framing::Fixed { remaining } => *remaining == 0,
            Framing::Chunked {
                decoder,
                decoded,
                offset,
            } => decoder.is_done() && *offset >= decoded.len(),
        }
    }

    /// Read body bytes into `buf`; `Ok(0)` at the end of the body.
    ///
    /// Waits until the peer sends more bytes or the connection is closed.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            match &mut self.framing {
                Framing::Empty => return Ok(0),
                Framing::Fixed { remaining } => {
                    if *remaining == 0 {
                        return Ok(0);
                    }
                    let avail = &self.pending[*self.position..];
                    if !avail.is_empty() {
                        let cap = usize::try_from(*remaining).unwrap_or(usize::MAX);
                        let n = avail.len().min(buf.len()).min(cap);
                        buf[..n].copy_from_slice(&avail[..n]);
                        *self.position += n;
                        *remaining -= n as u64;
                        return Ok(n);
                    }
                }
                Framing::Chunked {
                    decoder,
                    decoded,
                    offset,
                } => {
                    if *offset < decoded.len() {
                        let n = (decoded.len() - *offset).min(buf.len());
                        buf[..n].copy_from_slice(&decoded[*offset..*offset + n]);
                        *offset += n;
                        return Ok(n);
                    }
                    decoded.clear();
                    *offset = 0;
                    if decoder.is_done() {
                        return Ok(0);
                    }
                    let avail = &self.pending[*self.position..];
                    if !avail.is_empty() {
                        *self.position += decoder.decode(avail, decoded)?;
                        continue;
                    }
                }
            }
            self.fill().await?;
        }
    }

    /// Read the rest of the body.
    pub async fn read_to_end(&mut self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = self.read(&mut chunk).await?;
            if n == 0 {
                return Ok(out);
            }
            out.extend_from_slice(&chunk[..n]);
        }
    }

    /// Discard the rest of the body.
    pub async fn drain(&mut self) -> Result<()> {
        let mut scratch = [0u8; 1024];
        while self.read(&mut scratch).await? > 0 {}
        Ok(())
    }

    /// Append one transport read to the pending buffer.
    async fn fill(&mut self) -> Result<()> {
        if *self.position >= self.pending.len() {
            self.pending.clear();
            *self.position = 0;
        }
        let n = tokio::select! {
            read = self.reader.read(self.read_buf) => read?,
            _ = closed_signal(&mut self.closed) => {
                return Err(Error::Io(std::io::ErrorKind::ConnectionAborted.into()));
            }
        };
        if n == 0 {
            return Err(Error::TruncatedIo("The request body could not be read."));
        }
        self.pending.extend_from_slice(&self.read_buf[..n]);
        Ok(())
    }
}
