//! The registry's view of a WebSocket session.
//!
//! The handshake, receive loop and compression live outside the engine.
//! A registry only needs to observe state and push frames through a session.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;

use crate::error::Result;
use crate::websocket::frame::Opcode;
use crate::websocket::payload::PayloadData;

/// Connection state of one WebSocket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WebSocketState {
    Connecting,
    Open,
    Closing,
    Closed,
}

impl fmt::Display for WebSocketState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WebSocketState::Connecting => "connecting",
            WebSocketState::Open => "open",
            WebSocketState::Closing => "closing",
            WebSocketState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Payload compression negotiated for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CompressionMethod {
    #[default]
    None,
    Deflate,
}

/// Compressed payloads keyed by method, shared across the sessions of one
/// broadcast so each method compresses the message at most once.
pub type CompressionCache = HashMap<CompressionMethod, Vec<u8>>;

/// A live WebSocket as seen by a [`SessionRegistry`](super::registry::SessionRegistry).
///
/// Implementations must not call back into the owning registry from
/// `close`: the registry may hold its session lock while awaiting it.
#[async_trait]
pub trait WebSocketSession: Send + Sync {
    fn state(&self) -> WebSocketState;

    /// Send one complete message as a single frame.
    async fn send(&self, opcode: Opcode, data: &[u8], cache: &mut CompressionCache) -> Result<()>;

    /// Send one message split into fragments.
    async fn send_fragmented(
        &self,
        opcode: Opcode,
        data: &[u8],
        cache: &mut CompressionCache,
    ) -> Result<()>;

    /// Write an encoded ping frame and wait for the matching pong.
    ///
    /// The registry bounds the wait; implementations may wait indefinitely.
    async fn ping(&self, frame: &[u8]) -> bool;

    /// Close the session with `payload` as the close reason.
    ///
    /// `frame` is the encoded close frame to send, or `None` when no frame
    /// may be sent for this code.
    async fn close(&self, payload: &PayloadData, frame: Option<&[u8]>);
}
