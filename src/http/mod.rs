//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! bytes read by the connection engine
//!     → parser.rs (request line and headers, input cap)
//!     → request.rs (Host, framing, keep-alive, URL)
//!     → [routing layer picks the prefix handler]
//!     → handler.rs (RequestContext: body.rs + chunked.rs, response.rs)
//!     → server.rs (WebSocket services or the user handler)
//! ```

pub mod body;
pub mod chunked;
pub mod handler;
pub mod parser;
pub mod request;
pub mod response;
pub mod server;

pub use body::RequestBody;
pub use handler::{Handler, RequestContext, Upgraded};
pub use request::{BodyFraming, ConnectionInfo, Request};
pub use response::Response;
pub use server::{HttpServer, SessionAcceptor};
