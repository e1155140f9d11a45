//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check referential integrity (directives reference existing upstreams)
//! - Validate value ranges (status codes, addresses)
//! - Detect conflicting options
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: EdgeConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system
//! - Regex and template syntax is checked when the pipeline is built

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::{Directive, EdgeConfig, NotFoundConfig, ServerConfig};
use crate::load_balancer::Transport;
use crate::load_balancer::Backend;
use crate::observability::access_log::AccessField;

/// A single semantic problem, located by its config path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &EdgeConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    // upstream name → has at least one tcp backend
    let mut upstreams: HashMap<&str, bool> = HashMap::new();
    for (i, upstream) in config.upstreams.iter().enumerate() {
        let field = format!("upstreams[{i}]");
        if upstream.name.is_empty() {
            errors.push(ValidationError::new(&field, "name must not be empty"));
        }
        if upstream.backends.is_empty() {
            errors.push(ValidationError::new(
                &field,
                format!("upstream {:?} has no backends", upstream.name),
            ));
        }
        let mut has_tcp = false;
        for (j, backend) in upstream.backends.iter().enumerate() {
            match Backend::parse(&backend.address) {
                Ok(b) => has_tcp |= b.transport == Transport::Tcp,
                Err(e) => errors.push(ValidationError::new(
                    format!("{field}.backends[{j}]"),
                    e.to_string(),
                )),
            }
        }
        upstreams.insert(upstream.name.as_str(), has_tcp);
    }

    let mut addresses = HashSet::new();
    for (i, server) in config.servers.iter().enumerate() {
        let field = format!("servers[{i}]");
        if server.address.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError::new(
                format!("{field}.address"),
                format!("invalid socket address {:?}", server.address),
            ));
        }
        if !addresses.insert(server.address.as_str()) {
            errors.push(ValidationError::new(
                format!("{field}.address"),
                format!("duplicate server address {:?}", server.address),
            ));
        }
        if server.concurrency == 0 {
            errors.push(ValidationError::new(
                format!("{field}.concurrency"),
                "must be greater than zero",
            ));
        }
        validate_server(server, &field, &upstreams, &mut errors);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_server(
    server: &ServerConfig,
    field: &str,
    upstreams: &HashMap<&str, bool>,
    errors: &mut Vec<ValidationError>,
) {
    if let Some(not_found) = &server.not_found {
        validate_not_found(not_found, &format!("{field}.not_found"), errors);
    }

    if let Some(access_log) = &server.access_log {
        for name in &access_log.format {
            if AccessField::from_name(name).is_none() {
                errors.push(ValidationError::new(
                    format!("{field}.access_log.format"),
                    format!("unknown access log field {name:?}"),
                ));
            }
        }
    }

    for (i, directive) in server.directives.iter().enumerate() {
        let field = format!("{field}.directives[{i}]");
        match directive {
            Directive::Proxy(proxy) => {
                if !proxy.backends.is_empty() {
                    continue;
                }
                match proxy.upstream.as_deref() {
                    None => errors.push(ValidationError::new(&field, "proxy has no backends")),
                    Some(name) => match upstreams.get(name) {
                        None => errors.push(ValidationError::new(
                            &field,
                            format!("unknown upstream {name:?}"),
                        )),
                        Some(false) => errors.push(ValidationError::new(
                            &field,
                            format!("upstream {name:?} has no tcp backends for proxy"),
                        )),
                        Some(true) => {}
                    },
                }
            }
            Directive::Fastcgi(fastcgi) => {
                if fastcgi.upstream.is_empty() {
                    errors.push(ValidationError::new(&field, "fastcgi requires an upstream"));
                } else if !upstreams.contains_key(fastcgi.upstream.as_str()) {
                    errors.push(ValidationError::new(
                        &field,
                        format!("unknown upstream {:?}", fastcgi.upstream),
                    ));
                }
            }
            Directive::Status(status) => {
                check_status_code(status.code, &format!("{field}.code"), errors);
                if status.paths.is_empty() {
                    errors.push(ValidationError::new(&field, "status needs at least one path"));
                }
            }
            Directive::Response(response) => {
                check_status_code(response.code, &format!("{field}.code"), errors);
                match (&response.path, &response.pattern) {
                    (Some(_), Some(_)) => errors.push(ValidationError::new(
                        &field,
                        "response takes either path or pattern, not both",
                    )),
                    (None, None) => errors.push(ValidationError::new(
                        &field,
                        "response requires path or pattern",
                    )),
                    _ => {}
                }
            }
            Directive::Header(header) => {
                if header.path.is_empty() {
                    errors.push(ValidationError::new(&field, "header requires a path"));
                }
            }
            Directive::Rewrite(_) | Directive::Static(_) => {}
        }
    }
}

fn validate_not_found(config: &NotFoundConfig, field: &str, errors: &mut Vec<ValidationError>) {
    check_status_code(config.code, &format!("{field}.code"), errors);
    if config.body.is_some() && config.file.is_some() {
        errors.push(ValidationError::new(field, "body and file are mutually exclusive"));
    }
    if let Some(file) = &config.file {
        match std::fs::metadata(file) {
            Ok(meta) if meta.is_dir() => errors.push(ValidationError::new(
                format!("{field}.file"),
                format!("{} is a directory", file.display()),
            )),
            Ok(_) => {}
            Err(e) => errors.push(ValidationError::new(
                format!("{field}.file"),
                format!("{}: {e}", file.display()),
            )),
        }
    }
}

fn check_status_code(code: u16, field: &str, errors: &mut Vec<ValidationError>) {
    if !(100..=999).contains(&code) {
        errors.push(ValidationError::new(
            field,
            format!("status code {code} out of range"),
        ));
    }
}
