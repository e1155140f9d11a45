//! Feature middlewares built from `[[servers.directives]]`.
//!
//! Every directive compiles into a [`Middleware`](crate::http::handler::Middleware)
//! that either handles the request itself or passes it on to `next`.

pub mod header;
pub mod response;
pub mod rewrite;
pub mod router;
pub mod static_files;
pub mod status;

pub use header::HeaderRule;
pub use response::InlineResponse;
pub use rewrite::Rewriter;
pub use router::{router_middleware, AxumRouter, BoxError, RouterFactory};
pub use static_files::StaticFiles;
pub use status::StatusRule;
