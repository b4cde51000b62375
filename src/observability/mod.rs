//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Dispatch outcomes and error values
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → stdout (pretty or JSON)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Core scheduling and connection code returns errors; it does not report them
//! - Connection ID flows through the handler span
//! - Metrics are cheap (atomic increments)

pub mod logging;
pub mod metrics;
