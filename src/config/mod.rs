//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → EdgeConfig (validated, immutable)
//!     → lifecycle::startup builds one pipeline per server
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; there is no hot reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - Directives are an ordered list; file order is pipeline order

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    AccessLogConfig, BackendConfig, Directive, EdgeConfig, FastcgiDirective, GzipConfig,
    HeaderDirective, LocationSpec, LogFormat, LoggingConfig, MetricsConfig, NotFoundConfig,
    ProxyDirective, RequestIdConfig, ResponseDirective, RewriteDirective, RouterConfig,
    ServerConfig, StaticDirective, StatusDirective, TimeoutConfig, UpstreamConfig,
};
pub use validation::{validate_config, ValidationError};
