//! Gateway rule: path-info splitting and CGI environment synthesis.
//!
//! # Responsibilities
//! - Split a request path into script name and path info
//! - Build the full CGI/1.1 variable set for one request
//! - Resolve operator params through the template engine
//! - Fold inbound headers into `HTTP_*` variables
//!
//! # Design Decisions
//! - The environment is rebuilt from scratch for every request
//! - `PATH_INFO` and `PATH_TRANSLATED` are omitted, never empty
//! - Header variables are folded last and overwrite same-named entries

use std::collections::BTreeMap;
use std::path::Path;

use axum::http::Version;
use regex::Regex;
use thiserror::Error;

use crate::config::{ConfigError, FastcgiDirective};
use crate::http::context::RequestCtx;
use crate::routing::{LocationMatcher, LocationRule};
use crate::template::{NotBuiltin, RequestTags, TagResolver, TemplateError, TemplateStore};

/// CGI variable name → value.
pub type CgiEnvironment = BTreeMap<String, String>;

/// Script name and trailing path info for one request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathInfo {
    pub script_name: String,
    pub path_info: String,
}

/// Per-request failures computed before any backend is contacted.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GatewayError {
    #[error("fail to split path {0:?}")]
    Split(String),

    #[error("fail to get address: {0}")]
    PeerAddress(String),

    #[error("param {name}: {source}")]
    Param {
        name: String,
        #[source]
        source: TemplateError,
    },
}

/// Fold an HTTP header name into its CGI spelling, without the prefix.
pub fn header_to_env(name: &str) -> String {
    name.chars()
        .map(|c| if c == '-' { '_' } else { c.to_ascii_uppercase() })
        .collect()
}

/// Append the index file when the script names a directory.
fn with_index(script: &str, index: &str) -> String {
    if script.is_empty() {
        return format!("/{index}");
    }
    if script.ends_with('/') {
        return format!("{script}{index}");
    }
    script.to_string()
}

/// Tags owned by the gateway adapter.
struct AdapterTags<'a> {
    info: &'a PathInfo,
    root: &'a str,
}

impl TagResolver for AdapterTags<'_> {
    fn resolve(&self, tag: &str) -> Result<String, NotBuiltin> {
        match tag {
            "fastcgi_script_name" => Ok(self.info.script_name.clone()),
            "fastcgi_path_info" => Ok(self.info.path_info.clone()),
            "document_root" | "root" => Ok(self.root.to_string()),
            _ => Err(NotBuiltin),
        }
    }
}

/// One `fastcgi` directive, compiled.
#[derive(Debug)]
pub struct GatewayRule {
    location: LocationRule,
    root: String,
    index: String,
    split_path_info: Option<Regex>,
    script_filename: Option<String>,
    script_filename_prefix: Option<String>,
    params: Vec<(String, String)>,
    templates: TemplateStore,
    server_software: String,
    server_name: String,
}

impl GatewayRule {
    /// Compile a rule. `root` and `server_name` are the server-level defaults.
    pub fn build(
        directive: &FastcgiDirective,
        root: &Path,
        server_name: &str,
    ) -> Result<Self, ConfigError> {
        let mut location = LocationRule::build(&directive.location.tokens())?;
        if let Some(exclude) = &directive.exclude {
            location = LocationRule::combine(location, LocationRule::build(&exclude.tokens())?);
        }

        let split_path_info = match &directive.split_path_info {
            Some(pattern) => {
                let re = Regex::new(pattern).map_err(|source| ConfigError::Pattern {
                    pattern: pattern.clone(),
                    source,
                })?;
                if re.captures_len() < 2 {
                    return Err(ConfigError::Directive(format!(
                        "split_path_info {pattern:?} needs at least one capture group"
                    )));
                }
                Some(re)
            }
            None => None,
        };

        let mut templates = TemplateStore::new();
        for (_, value) in &directive.params {
            templates.register(value)?;
        }

        let root = directive
            .root
            .as_deref()
            .unwrap_or(root)
            .to_string_lossy()
            .into_owned();

        Ok(Self {
            location,
            root,
            index: directive.index.clone(),
            split_path_info,
            script_filename: directive.script_filename.clone(),
            script_filename_prefix: directive.script_filename_prefix.clone(),
            params: directive.params.clone(),
            templates,
            server_software: directive.server_software.clone(),
            server_name: directive
                .server_name
                .clone()
                .unwrap_or_else(|| server_name.to_string()),
        })
    }

    pub fn matches(&self, path: &str) -> bool {
        self.location.matches(path)
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    /// Split a request path into script name and path info.
    ///
    /// Without a split pattern the whole path is the script. With one,
    /// group 1 is the script and group 2, when present, the path info.
    pub fn split_path(&self, path: &str) -> Result<PathInfo, GatewayError> {
        let Some(re) = &self.split_path_info else {
            return Ok(PathInfo {
                script_name: with_index(path, &self.index),
                path_info: String::new(),
            });
        };
        let caps = re
            .captures(path)
            .ok_or_else(|| GatewayError::Split(path.to_string()))?;
        let script = caps
            .get(1)
            .ok_or_else(|| GatewayError::Split(path.to_string()))?;
        Ok(PathInfo {
            script_name: with_index(script.as_str(), &self.index),
            path_info: caps
                .get(2)
                .map(|m| m.as_str().to_string())
                .unwrap_or_default(),
        })
    }

    fn script_filename(&self, info: &PathInfo) -> String {
        if let Some(template) = &self.script_filename {
            return template
                .replace("$document_root", &self.root)
                .replace("$fastcgi_script_name", &info.script_name);
        }
        let base = self.script_filename_prefix.as_deref().unwrap_or(&self.root);
        format!("{}{}", base.trim_end_matches('/'), info.script_name)
    }

    /// Build the CGI environment for one request.
    pub fn build_env(
        &self,
        ctx: &RequestCtx,
        info: &PathInfo,
    ) -> Result<CgiEnvironment, GatewayError> {
        let mut env = CgiEnvironment::new();
        let mut set = |k: &str, v: String| {
            env.insert(k.to_string(), v);
        };

        set("AUTH_TYPE", String::new());
        set("QUERY_STRING", ctx.query().to_string());
        set("REQUEST_METHOD", ctx.request.method().as_str().to_string());
        set(
            "CONTENT_TYPE",
            ctx.request_header("content-type").unwrap_or("").to_string(),
        );
        set("CONTENT_LENGTH", ctx.request.body().len().to_string());
        set("REQUEST_URI", ctx.request_uri().to_string());
        set("DOCUMENT_URI", ctx.path().to_string());
        set("DOCUMENT_ROOT", self.root.clone());
        set("SCRIPT_NAME", info.script_name.clone());
        set("SCRIPT_FILENAME", self.script_filename(info));
        set("PATH_INFO", info.path_info.clone());
        set(
            "PATH_TRANSLATED",
            format!("{}{}", self.root.trim_end_matches('/'), info.path_info),
        );
        let protocol = match ctx.request.version() {
            Version::HTTP_09 | Version::HTTP_10 => "HTTP/1.0",
            _ => "HTTP/1.1",
        };
        set("SERVER_PROTOCOL", protocol.to_string());
        set("GATEWAY_INTERFACE", "CGI/1.1".to_string());
        set("SERVER_SOFTWARE", self.server_software.clone());

        let remote = ctx
            .remote_addr
            .socket_addr()
            .ok_or_else(|| GatewayError::PeerAddress(ctx.remote_addr.to_string()))?;
        set("REMOTE_ADDR", remote.ip().to_string());
        set("REMOTE_PORT", remote.port().to_string());
        let local = ctx
            .local_addr
            .socket_addr()
            .ok_or_else(|| GatewayError::PeerAddress(ctx.local_addr.to_string()))?;
        set("SERVER_ADDR", local.ip().to_string());
        set("SERVER_PORT", local.port().to_string());
        set("SERVER_NAME", self.server_name.clone());

        let adapter = AdapterTags {
            info,
            root: &self.root,
        };
        let builtin = RequestTags(ctx);
        for (name, template) in &self.params {
            let value = self
                .templates
                .execute(template, &[&adapter, &builtin])
                .map_err(|source| GatewayError::Param {
                    name: name.clone(),
                    source,
                })?;
            env.insert(name.clone(), value);
        }

        if env.get("PATH_INFO").map_or(true, String::is_empty) {
            env.remove("PATH_INFO");
            env.remove("PATH_TRANSLATED");
        }

        for (name, value) in ctx.request.headers() {
            let key = format!("HTTP_{}", header_to_env(name.as_str()));
            env.insert(key, String::from_utf8_lossy(value.as_bytes()).into_owned());
        }

        Ok(env)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LocationSpec;
    use crate::http::context::test_support::{ctx, ctx_with};
    use crate::http::context::ConnAddr;
    use axum::http::Request;
    use bytes::Bytes;
    use std::path::PathBuf;

    fn rule(split: Option<&str>) -> GatewayRule {
        let directive = FastcgiDirective {
            location: LocationSpec::Tokens(vec!["php".to_string(), r"\.php".to_string()]),
            upstream: "php".to_string(),
            split_path_info: split.map(str::to_string),
            ..FastcgiDirective::default()
        };
        GatewayRule::build(&directive, Path::new("/var/www"), "edge.local").unwrap()
    }

    #[test]
    fn test_header_folding() {
        assert_eq!(header_to_env("Content-Type"), "CONTENT_TYPE");
        assert_eq!(header_to_env("Foo-Bar-Baz"), "FOO_BAR_BAZ");
        assert_eq!(header_to_env("FooBarBaz"), "FOOBARBAZ");
        assert_eq!(header_to_env(""), "");
    }

    #[test]
    fn test_split_lazy_pattern() {
        let r = rule(Some(r"^(.+?\.php)(/.*)$"));
        let info = r.split_path("/test.php/foo/bar.php").unwrap();
        assert_eq!(info.script_name, "/test.php");
        assert_eq!(info.path_info, "/foo/bar.php");
    }

    #[test]
    fn test_split_greedy_pattern() {
        let r = rule(Some(r"^(.+\.php)(.*)$"));
        let info = r.split_path("/test.php/foo/bar.baz").unwrap();
        assert_eq!(info.script_name, "/test.php");
        assert_eq!(info.path_info, "/foo/bar.baz");
    }

    #[test]
    fn test_split_without_pattern_appends_index() {
        let r = rule(None);
        assert_eq!(r.split_path("/admin/").unwrap().script_name, "/admin/index.php");
        assert_eq!(r.split_path("/run.php").unwrap().script_name, "/run.php");
        assert_eq!(r.split_path("/run.php").unwrap().path_info, "");
    }

    #[test]
    fn test_split_mismatch_is_error() {
        let r = rule(Some(r"^(.+?\.php)(/.*)$"));
        assert_eq!(
            r.split_path("/index.html"),
            Err(GatewayError::Split("/index.html".to_string()))
        );
    }

    #[test]
    fn test_split_pattern_needs_a_group() {
        let directive = FastcgiDirective {
            upstream: "php".to_string(),
            split_path_info: Some(r"\.php$".to_string()),
            ..FastcgiDirective::default()
        };
        assert!(GatewayRule::build(&directive, Path::new("/"), "x").is_err());
    }

    #[test]
    fn test_env_has_mandatory_set() {
        let r = rule(Some(r"^(.+?\.php)(/.*)?$"));
        let request = Request::post("/shop/cart.php?id=7")
            .header("content-type", "application/x-www-form-urlencoded")
            .header("X-Trace-Id", "abc")
            .body(Bytes::from_static(b"qty=2"))
            .unwrap();
        let c = ctx_with(request);
        let info = r.split_path(c.path()).unwrap();
        let env = r.build_env(&c, &info).unwrap();

        for key in [
            "AUTH_TYPE",
            "QUERY_STRING",
            "REQUEST_METHOD",
            "CONTENT_TYPE",
            "CONTENT_LENGTH",
            "SCRIPT_FILENAME",
            "SCRIPT_NAME",
            "REQUEST_URI",
            "DOCUMENT_URI",
            "DOCUMENT_ROOT",
            "SERVER_PROTOCOL",
            "GATEWAY_INTERFACE",
            "SERVER_SOFTWARE",
            "REMOTE_ADDR",
            "REMOTE_PORT",
            "SERVER_ADDR",
            "SERVER_PORT",
            "SERVER_NAME",
        ] {
            assert!(env.contains_key(key), "missing {key}");
        }
        assert_eq!(env["REQUEST_METHOD"], "POST");
        assert_eq!(env["QUERY_STRING"], "id=7");
        assert_eq!(env["CONTENT_LENGTH"], "5");
        assert_eq!(env["SCRIPT_NAME"], "/shop/cart.php");
        assert_eq!(env["SCRIPT_FILENAME"], "/var/www/shop/cart.php");
        assert_eq!(env["REQUEST_URI"], "/shop/cart.php?id=7");
        assert_eq!(env["SERVER_PROTOCOL"], "HTTP/1.1");
        assert_eq!(env["GATEWAY_INTERFACE"], "CGI/1.1");
        assert_eq!(env["SERVER_SOFTWARE"], "edgeway");
        assert_eq!(env["SERVER_NAME"], "edge.local");
        assert_eq!(env["REMOTE_ADDR"], "127.0.0.1");
        assert_eq!(env["SERVER_PORT"], "8080");
        assert_eq!(env["HTTP_X_TRACE_ID"], "abc");
        assert_eq!(env["HTTP_CONTENT_TYPE"], "application/x-www-form-urlencoded");
        assert!(!env.contains_key("PATH_INFO"));
        assert!(!env.contains_key("PATH_TRANSLATED"));
    }

    #[test]
    fn test_path_info_present_when_split_yields_it() {
        let r = rule(Some(r"^(.+?\.php)(/.*)?$"));
        let c = ctx("/app.php/users/1");
        let info = r.split_path(c.path()).unwrap();
        let env = r.build_env(&c, &info).unwrap();
        assert_eq!(env["PATH_INFO"], "/users/1");
        assert_eq!(env["PATH_TRANSLATED"], "/var/www/users/1");
    }

    #[test]
    fn test_http_10_protocol() {
        let r = rule(None);
        let request = Request::get("/")
            .version(Version::HTTP_10)
            .body(Bytes::new())
            .unwrap();
        let c = ctx_with(request);
        let env = r.build_env(&c, &r.split_path("/").unwrap()).unwrap();
        assert_eq!(env["SERVER_PROTOCOL"], "HTTP/1.0");
        assert_eq!(env["SCRIPT_NAME"], "/index.php");
    }

    #[test]
    fn test_script_filename_template_and_prefix() {
        let mut directive = FastcgiDirective {
            upstream: "php".to_string(),
            script_filename: Some("$document_root/public$fastcgi_script_name".to_string()),
            ..FastcgiDirective::default()
        };
        let r = GatewayRule::build(&directive, Path::new("/srv"), "x").unwrap();
        let info = r.split_path("/a.php").unwrap();
        assert_eq!(r.script_filename(&info), "/srv/public/a.php");

        directive.script_filename = None;
        directive.script_filename_prefix = Some("/opt/app/".to_string());
        let r = GatewayRule::build(&directive, Path::new("/srv"), "x").unwrap();
        assert_eq!(r.script_filename(&info), "/opt/app/a.php");
    }

    #[test]
    fn test_params_use_adapter_then_builtin_tags() {
        let directive = FastcgiDirective {
            upstream: "php".to_string(),
            root: Some(PathBuf::from("/www")),
            split_path_info: Some(r"^(.+?\.php)(/.*)?$".to_string()),
            params: vec![
                ("APP_SCRIPT".to_string(), "{root}{fastcgi_script_name}".to_string()),
                ("APP_CLIENT".to_string(), "{method} {>User-Agent}".to_string()),
                ("PATH_INFO".to_string(), "".to_string()),
            ],
            ..FastcgiDirective::default()
        };
        let r = GatewayRule::build(&directive, Path::new("/ignored"), "x").unwrap();
        let request = Request::get("/x.php/tail")
            .header("user-agent", "probe")
            .body(Bytes::new())
            .unwrap();
        let c = ctx_with(request);
        let env = r.build_env(&c, &r.split_path(c.path()).unwrap()).unwrap();
        assert_eq!(env["APP_SCRIPT"], "/www/x.php");
        assert_eq!(env["APP_CLIENT"], "GET probe");
        assert_eq!(env["DOCUMENT_ROOT"], "/www");
        // an empty override removes the pair
        assert!(!env.contains_key("PATH_INFO"));
        assert!(!env.contains_key("PATH_TRANSLATED"));
    }

    #[test]
    fn test_unresolved_param_is_error() {
        let directive = FastcgiDirective {
            upstream: "php".to_string(),
            params: vec![("X".to_string(), "{nope}".to_string())],
            ..FastcgiDirective::default()
        };
        let r = GatewayRule::build(&directive, Path::new("/"), "x").unwrap();
        let c = ctx("/a.php");
        let err = r.build_env(&c, &r.split_path("/a.php").unwrap()).unwrap_err();
        assert!(matches!(err, GatewayError::Param { .. }));
    }

    #[test]
    fn test_non_ip_peer_is_error() {
        let r = rule(None);
        let mut c = ctx("/a.php");
        c.remote_addr = ConnAddr::Unix(PathBuf::from("/run/edge.sock"));
        let err = r.build_env(&c, &r.split_path("/a.php").unwrap()).unwrap_err();
        assert!(matches!(err, GatewayError::PeerAddress(_)));
    }
}
