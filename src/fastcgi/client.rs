//! Gateway client seam.
//!
//! The adapter talks to backends through [`GatewayClient`] so tests can
//! swap the wire client for an in-memory fake.

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::{HeaderMap, Method, StatusCode};
use bytes::Bytes;
use thiserror::Error;

use super::rule::CgiEnvironment;
use crate::load_balancer::Backend;

/// How the request body is presented to the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayVerb {
    /// GET forwards whatever body the client sent.
    Get { content_length: usize },
    Head,
    Options,
    /// Any method that may carry a body.
    Post {
        method: String,
        content_type: String,
        content_length: usize,
    },
}

impl GatewayVerb {
    pub fn from_request(method: &Method, content_type: &str, content_length: usize) -> Self {
        match *method {
            Method::GET => GatewayVerb::Get { content_length },
            Method::HEAD => GatewayVerb::Head,
            Method::OPTIONS => GatewayVerb::Options,
            _ => GatewayVerb::Post {
                method: method.as_str().to_string(),
                content_type: content_type.to_string(),
                content_length,
            },
        }
    }

    /// Overwrite the method and body variables to agree with the verb.
    pub fn apply(&self, env: &mut CgiEnvironment) {
        let (method, content_type, length) = match self {
            GatewayVerb::Get { content_length } => ("GET", None, *content_length),
            GatewayVerb::Head => ("HEAD", None, 0),
            GatewayVerb::Options => ("OPTIONS", None, 0),
            GatewayVerb::Post {
                method,
                content_type,
                content_length,
            } => (method.as_str(), Some(content_type.as_str()), *content_length),
        };
        env.insert("REQUEST_METHOD".to_string(), method.to_string());
        env.insert("CONTENT_LENGTH".to_string(), length.to_string());
        if let Some(content_type) = content_type {
            env.insert("CONTENT_TYPE".to_string(), content_type.to_string());
        }
    }

    pub fn has_body(&self) -> bool {
        matches!(
            self,
            GatewayVerb::Get { content_length: 1.. } | GatewayVerb::Post { .. }
        )
    }
}

/// One request handed to a backend.
#[derive(Debug, Clone)]
pub struct GatewayRequest {
    pub env: CgiEnvironment,
    pub verb: GatewayVerb,
    pub body: Bytes,
}

/// Decoded CGI response.
#[derive(Debug, Clone)]
pub struct GatewayResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[derive(Debug, Error)]
pub enum FcgiError {
    #[error("connect {backend}: {source}")]
    Connect {
        backend: String,
        #[source]
        source: io::Error,
    },

    #[error("backend timed out after {0:?}")]
    Timeout(Duration),

    #[error("i/o: {0}")]
    Io(#[from] io::Error),

    #[error("protocol: {0}")]
    Protocol(String),
}

impl FcgiError {
    pub fn status(&self) -> StatusCode {
        match self {
            FcgiError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::BAD_GATEWAY,
        }
    }

    /// Text written to the client.
    pub fn public_text(&self) -> &'static str {
        match self {
            FcgiError::Connect { .. } => "[fcgi] fail to connect backend",
            _ => "[fcgi] request backend error",
        }
    }
}

/// Performs one request/response exchange with a backend.
#[async_trait]
pub trait GatewayClient: Send + Sync {
    async fn round_trip(
        &self,
        backend: &Backend,
        request: GatewayRequest,
    ) -> Result<GatewayResponse, FcgiError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verb_from_method() {
        assert_eq!(
            GatewayVerb::from_request(&Method::GET, "", 0),
            GatewayVerb::Get { content_length: 0 }
        );
        assert!(!GatewayVerb::Get { content_length: 0 }.has_body());
        assert_eq!(GatewayVerb::from_request(&Method::HEAD, "", 0), GatewayVerb::Head);
        let verb = GatewayVerb::from_request(&Method::PUT, "application/json", 9);
        assert!(verb.has_body());
        assert_eq!(
            verb,
            GatewayVerb::Post {
                method: "PUT".to_string(),
                content_type: "application/json".to_string(),
                content_length: 9,
            }
        );
    }

    #[test]
    fn test_apply_overwrites_method_vars() {
        let mut env = CgiEnvironment::new();
        env.insert("CONTENT_LENGTH".to_string(), "12".to_string());
        GatewayVerb::Head.apply(&mut env);
        assert_eq!(env["REQUEST_METHOD"], "HEAD");
        assert_eq!(env["CONTENT_LENGTH"], "0");

        GatewayVerb::from_request(&Method::DELETE, "text/plain", 3).apply(&mut env);
        assert_eq!(env["REQUEST_METHOD"], "DELETE");
        assert_eq!(env["CONTENT_TYPE"], "text/plain");
        assert_eq!(env["CONTENT_LENGTH"], "3");
    }

    #[test]
    fn test_get_with_body_keeps_length() {
        let verb = GatewayVerb::from_request(&Method::GET, "application/json", 5);
        assert!(verb.has_body());
        let mut env = CgiEnvironment::new();
        verb.apply(&mut env);
        assert_eq!(env["REQUEST_METHOD"], "GET");
        assert_eq!(env["CONTENT_LENGTH"], "5");
    }

    #[test]
    fn test_error_status() {
        assert_eq!(
            FcgiError::Timeout(Duration::from_secs(1)).status(),
            StatusCode::GATEWAY_TIMEOUT
        );
        let err = FcgiError::Connect {
            backend: "127.0.0.1:9000".to_string(),
            source: io::Error::from(io::ErrorKind::ConnectionRefused),
        };
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(err.public_text(), "[fcgi] fail to connect backend");
        assert_eq!(
            FcgiError::Protocol("x".into()).public_text(),
            "[fcgi] request backend error"
        );
    }
}
