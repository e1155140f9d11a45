//! Variable substitution engine.
//!
//! # Data Flow
//! ```text
//! Setup:
//!     template text → CompiledTemplate::parse (once)
//!     → TemplateStore keyed by the literal text
//!
//! Per request:
//!     TemplateStore::execute(key, resolvers)
//!     → each tag walks the resolver chain (adapter tags, then builtins)
//!     → NotBuiltin falls through to the next resolver
//!     → a tag nobody resolves is a TemplateError
//! ```
//!
//! # Design Decisions
//! - Templates use `{` and `}` as the only delimiter pair
//! - Execution never re-parses; the store is read-only after setup
//! - Resolvers are plain trait objects so adapters can stack their own tags

pub mod builtin;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::config::ConfigError;

pub use builtin::RequestTags;

const OPEN: char = '{';
const CLOSE: char = '}';

/// Signal from a resolver that it does not own a tag.
///
/// Not a failure: the chain moves on to the next resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotBuiltin;

impl fmt::Display for NotBuiltin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("not built-in variable")
    }
}

/// Request-time template failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("template {0:?} is not registered")]
    NotFound(String),

    #[error("unresolved template variable {{{0}}}")]
    Unresolved(String),
}

/// Resolves a single placeholder tag.
pub trait TagResolver {
    fn resolve(&self, tag: &str) -> Result<String, NotBuiltin>;
}

impl<F> TagResolver for F
where
    F: Fn(&str) -> Result<String, NotBuiltin>,
{
    fn resolve(&self, tag: &str) -> Result<String, NotBuiltin> {
        self(tag)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Tag(String),
}

/// A parsed template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl CompiledTemplate {
    /// Parse a template. An opening `{` without a closing `}` is an error.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let mut segments = Vec::new();
        let mut rest = text;
        while let Some(start) = rest.find(OPEN) {
            if start > 0 {
                segments.push(Segment::Literal(rest[..start].to_string()));
            }
            let after = &rest[start + OPEN.len_utf8()..];
            let end = after.find(CLOSE).ok_or_else(|| ConfigError::Template {
                template: text.to_string(),
                reason: format!("missing closing {CLOSE:?}"),
            })?;
            segments.push(Segment::Tag(after[..end].to_string()));
            rest = &after[end + CLOSE.len_utf8()..];
        }
        if !rest.is_empty() {
            segments.push(Segment::Literal(rest.to_string()));
        }
        Ok(Self {
            source: text.to_string(),
            segments,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// True when the template has no placeholders.
    pub fn is_literal(&self) -> bool {
        self.segments
            .iter()
            .all(|s| matches!(s, Segment::Literal(_)))
    }

    /// Render the template, asking each resolver in turn for every tag.
    pub fn execute(&self, resolvers: &[&dyn TagResolver]) -> Result<String, TemplateError> {
        let mut out = String::with_capacity(self.source.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(s) => out.push_str(s),
                Segment::Tag(tag) => {
                    let value = resolvers
                        .iter()
                        .find_map(|r| r.resolve(tag).ok())
                        .ok_or_else(|| TemplateError::Unresolved(tag.clone()))?;
                    out.push_str(&value);
                }
            }
        }
        Ok(out)
    }
}

/// Compiled templates keyed by their own literal text.
#[derive(Debug, Clone, Default)]
pub struct TemplateStore {
    templates: HashMap<String, Arc<CompiledTemplate>>,
}

impl TemplateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and store a template. Registering the same text twice is a no-op.
    pub fn register(&mut self, text: &str) -> Result<(), ConfigError> {
        if !self.templates.contains_key(text) {
            let template = CompiledTemplate::parse(text)?;
            self.templates.insert(text.to_string(), Arc::new(template));
        }
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&Arc<CompiledTemplate>> {
        self.templates.get(key)
    }

    pub fn execute(
        &self,
        key: &str,
        resolvers: &[&dyn TagResolver],
    ) -> Result<String, TemplateError> {
        self.get(key)
            .ok_or_else(|| TemplateError::NotFound(key.to_string()))?
            .execute(resolvers)
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}
