//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, body buffering, listener-level layers)
//!     → context.rs (RequestCtx built for the request)
//!     → pipeline.rs (compiled handler chain)
//!         → access-log slot → identity slot (request.rs)
//!         → feature middlewares (middleware/, proxy, fastcgi) in file order
//!         → router slot or not-found terminal (handler.rs)
//!     → response written back to the client
//! ```

pub mod context;
pub mod handler;
pub mod middleware;
pub mod pipeline;
pub mod request;
pub mod server;

pub use context::{ConnAddr, RequestCtx};
pub use handler::{Handler, Middleware, NotFound, SharedHandler};
pub use pipeline::{PipelineConfig, Slot};
pub use request::{request_id_middleware, RequestId, X_REQUEST_ID};
pub use server::{EdgeConnection, HttpServer};
