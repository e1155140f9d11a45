//! Location subsystem.
//!
//! # Data Flow
//! ```text
//! Directive location tokens (config)
//!     → matcher.rs (compile prefix / regex, optional exclude)
//!     → Freeze as immutable LocationRule
//!
//! Per request:
//!     request path → LocationRule::matches → feature runs or delegates to next
//! ```
//!
//! # Design Decisions
//! - Rules compiled at startup, immutable at runtime
//! - Deterministic: same path always yields the same outcome
//! - Every location-gated middleware shares this one matcher type

pub mod matcher;

pub use matcher::{LocationMatcher, LocationRule};
