//! Byte-stream abstraction shared by plain and TLS connections.

use tokio::io::{AsyncRead, AsyncWrite};

/// Any bidirectional stream a connection can run on: `TcpStream`, a TLS
/// stream, or an in-memory duplex in tests.
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

pub type BoxedTransport = Box<dyn Transport>;
