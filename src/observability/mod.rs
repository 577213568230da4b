//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! listener / connection / registry
//!     → logging.rs (structured tracing events)
//!     → metrics.rs (counters and gauges, optional Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Events carry ids as fields (`connection_id`, `session_id`, `prefix`)
//! - Metrics are cheap atomic updates through the `metrics` facade

pub mod logging;
pub mod metrics;
