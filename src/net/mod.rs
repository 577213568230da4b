//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! EndpointManager::add_prefix
//!     → manager.rs (parse prefix, resolve bind address)
//!     → listener.rs (one bound socket per address, accept loop, limits)
//!     → tls.rs (optional TLS handshake, per-port certificate lookup)
//!     → connection.rs (read, route, dispatch, reuse or upgrade)
//!     → Handler
//!
//! Connection States:
//!     AwaitingRequestLine → AwaitingHeaders → Dispatched → Closed
//! ```
//!
//! # Design Decisions
//! - Bounded accept queue prevents resource exhaustion
//! - Each connection tracked so an endpoint can force-close it
//! - TLS is optional and handled transparently behind `BoxedTransport`

pub mod connection;
pub mod listener;
pub mod manager;
pub mod tls;
pub mod transport;

pub use connection::{Connection, ConnectionHandle, ConnectionId, ConnectionSettings, ConnectionState};
pub use listener::{EndpointListener, EndpointOptions};
pub use manager::EndpointManager;
pub use tls::{CertificateProvider, FolderCertificateProvider, ServerCertificate};
pub use transport::{BoxedTransport, Transport};
