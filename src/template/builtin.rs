//! Builtin placeholder table.
//!
//! Named tags (`{host}`, `{when_iso}`, ...) plus sigil lookups:
//! `{>Name}` request header, `{<Name}` response header, `{?key}` query
//! argument, `{~name}` cookie. A missing header, argument or cookie renders
//! as an empty string.

use std::sync::OnceLock;

use axum::http::Version;
use chrono::SecondsFormat;

use crate::http::context::RequestCtx;
use crate::template::{NotBuiltin, TagResolver};

/// Resolves builtin tags against a request context.
pub struct RequestTags<'a>(pub &'a RequestCtx);

impl TagResolver for RequestTags<'_> {
    fn resolve(&self, tag: &str) -> Result<String, NotBuiltin> {
        lookup(self.0, tag)
    }
}

fn hostname() -> &'static str {
    static HOSTNAME: OnceLock<String> = OnceLock::new();
    HOSTNAME.get_or_init(|| {
        std::env::var("HOSTNAME")
            .ok()
            .or_else(|| std::fs::read_to_string("/proc/sys/kernel/hostname").ok())
            .map(|h| h.trim().to_string())
            .unwrap_or_default()
    })
}

/// Look up one builtin tag.
pub fn lookup(ctx: &RequestCtx, tag: &str) -> Result<String, NotBuiltin> {
    let value = match tag {
        "host" => ctx.host().to_string(),
        "hostonly" => {
            let host = ctx.host();
            host.split_once(':').map(|(h, _)| h).unwrap_or(host).to_string()
        }
        "hostname" => hostname().to_string(),
        "method" => ctx.request.method().as_str().to_string(),
        "path" => ctx.path().to_string(),
        "proto" => match ctx.request.version() {
            Version::HTTP_09 | Version::HTTP_10 => "HTTP/1.0".to_string(),
            _ => "HTTP/1.1".to_string(),
        },
        "query" => ctx.query().to_string(),
        "remote" => match ctx.remote_addr.socket_addr() {
            Some(addr) => addr.ip().to_string(),
            None => ctx.remote_addr.to_string(),
        },
        "port" => ctx
            .remote_addr
            .socket_addr()
            .map(|addr| addr.port().to_string())
            .unwrap_or_default(),
        "schema" | "scheme" => ctx
            .request
            .uri()
            .scheme_str()
            .unwrap_or("http")
            .to_string(),
        "uri" => ctx.request_uri().to_string(),
        "when_iso" => ctx.received_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        "when_unix" => ctx.received_at.timestamp().to_string(),
        "when_unix_ms" => ctx.received_at.timestamp_millis().to_string(),
        // never sent by clients; kept for template compatibility
        "fragment" => String::new(),
        "latency" => format!("{:?}", ctx.elapsed()),
        "latency_ms" => ctx.elapsed().as_millis().to_string(),
        "status" => ctx.status().as_u16().to_string(),
        _ => return sigil(ctx, tag),
    };
    Ok(value)
}

fn sigil(ctx: &RequestCtx, tag: &str) -> Result<String, NotBuiltin> {
    let Some(first) = tag.chars().next() else {
        return Err(NotBuiltin);
    };
    let key = &tag[first.len_utf8()..];
    let value = match first {
        '>' => ctx.request_header(key).map(str::to_string),
        '<' => ctx.response_header(key).map(str::to_string),
        '?' => ctx.query_arg(key),
        '~' => ctx.cookie(key).map(str::to_string),
        _ => return Err(NotBuiltin),
    };
    Ok(value.unwrap_or_default())
}
