//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! gate, cache, jail
//!     → logging.rs (structured tracing events)
//!     → metrics.rs (counters and histograms)
//!
//! Consumers:
//!     → stdout log lines
//!     → Prometheus scrape endpoint (optional)
//! ```

pub mod logging;
pub mod metrics;
