//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured diagnostic events via tracing)
//!     → metrics.rs (counters, histograms)
//!
//! Per request (access-log slot):
//!     → access_log.rs (selected fields → JSON object → sink)
//!
//! Consumers:
//!     → stdout (pretty or JSON)
//!     → access log file (JSON lines)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Request ID flows into access log entries
//! - Metrics are cheap (atomic increments)

pub mod access_log;
pub mod logging;
pub mod metrics;
