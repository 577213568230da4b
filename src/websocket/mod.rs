//! WebSocket subsystem.
//!
//! # Data Flow
//! ```text
//! bytes from an upgraded connection
//!     → frame.rs (decode, validate, unmask)
//!     → payload.rs / close.rs (close codes and reasons)
//!
//! server-side fan-out
//!     → registry.rs (broadcast, ping sweep, stop)
//!     → session.rs (per-session send/ping/close seam)
//! ```
//!
//! # Design Decisions
//! - Server frames are never masked; client frames are unmasked on read
//! - The per-session object (handshake, receive loop, compression) is
//!   supplied by the embedder through `WebSocketSession`

pub mod close;
pub mod frame;
pub mod payload;
pub mod registry;
pub mod session;

pub use close::CloseStatusCode;
pub use frame::{read_frame, Frame, Opcode, FRAGMENT_LENGTH};
pub use payload::PayloadData;
pub use registry::{ServerState, SessionRegistry};
pub use session::{CompressionCache, CompressionMethod, WebSocketSession, WebSocketState};
