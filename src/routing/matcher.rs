//! Location matching logic.
//!
//! # Responsibilities
//! - Match request path prefix (byte-wise, case-sensitive)
//! - Match request path against a regular expression
//! - Combine an allow rule with an exclude rule (allow-with-carve-outs)
//!
//! # Design Decisions
//! - Rules are compiled once at setup; a rule never changes its outcome
//! - Invalid regex syntax is a configuration error, never a request error
//! - The token form mirrors the config file: one token is a prefix,
//!   two tokens carry a regex in the second position

use regex::Regex;

use crate::config::ConfigError;

/// Trait for matching a request path against a location.
pub trait LocationMatcher: Send + Sync + std::fmt::Debug {
    /// Returns true if the path is covered by this location.
    fn matches(&self, path: &str) -> bool;
}

/// A compiled location rule.
#[derive(Debug, Clone)]
pub enum LocationRule {
    /// Literal path prefix.
    Prefix(String),
    /// Regular expression over the whole path.
    Pattern(Regex),
    /// `should` matches and `exclude` does not.
    Exclude {
        should: Box<LocationRule>,
        exclude: Box<LocationRule>,
    },
}

impl LocationRule {
    /// Build a rule from its config tokens.
    ///
    /// A single token is a literal prefix. With two tokens the second one is
    /// compiled as a regular expression (the first is a label kept for
    /// readability in config files).
    pub fn build<S: AsRef<str>>(tokens: &[S]) -> Result<Self, ConfigError> {
        match tokens {
            [] => Err(ConfigError::Directive("empty location".to_string())),
            [prefix] => Ok(Self::prefix(prefix.as_ref())),
            [_, pattern] => Self::pattern(pattern.as_ref()),
            _ => Err(ConfigError::Directive(format!(
                "location takes one or two tokens, got {}",
                tokens.len()
            ))),
        }
    }

    /// Create a prefix rule.
    pub fn prefix(prefix: impl Into<String>) -> Self {
        Self::Prefix(prefix.into())
    }

    /// Compile a regex rule.
    pub fn pattern(pattern: &str) -> Result<Self, ConfigError> {
        Regex::new(pattern)
            .map(Self::Pattern)
            .map_err(|source| ConfigError::Pattern {
                pattern: pattern.to_string(),
                source,
            })
    }

    /// Combine two rules: true iff `should` matches and `exclude` does not.
    pub fn combine(should: LocationRule, exclude: LocationRule) -> Self {
        Self::Exclude {
            should: Box::new(should),
            exclude: Box::new(exclude),
        }
    }
}

impl LocationMatcher for LocationRule {
    fn matches(&self, path: &str) -> bool {
        match self {
            LocationRule::Prefix(prefix) => path.as_bytes().starts_with(prefix.as_bytes()),
            LocationRule::Pattern(re) => re.is_match(path),
            LocationRule::Exclude { should, exclude } => {
                should.matches(path) && !exclude.matches(path)
            }
        }
    }
}
