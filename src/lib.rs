//! WebSocket-capable HTTP/1.1 server engine.
//!
//! Prefix-routed endpoints, a keep-alive connection engine, an RFC 6455
//! frame codec and per-service session registries.

// Core subsystems
pub mod error;
pub mod http;
pub mod net;
pub mod routing;
pub mod websocket;

// Cross-cutting concerns
pub mod config;
pub mod lifecycle;
pub mod observability;

pub use config::EngineConfig;
pub use error::{Error, Result};
pub use http::{Handler, HttpServer, RequestContext, SessionAcceptor};
pub use lifecycle::Shutdown;
pub use net::EndpointManager;
pub use websocket::{Frame, Opcode, SessionRegistry};
