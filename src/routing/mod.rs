//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Handler registration
//!     → prefix.rs (parse + normalize `scheme://host:port/path/`)
//!     → router.rs (copy-on-write insert into concrete, `+` or `*` list)
//!
//! Incoming request URL
//!     → router.rs (decoded path, host/port filter, longest prefix)
//!     → matched Route or none (404)
//! ```
//!
//! # Design Decisions
//! - No regex in the hot path (prefix matching only)
//! - Lookups read a lock-free snapshot; registration may race freely
//! - Deterministic: equal-length matches resolve to the later registration

pub mod prefix;
pub mod router;

pub use prefix::{HostKind, ListenerPrefix};
pub use router::{Route, Router};
