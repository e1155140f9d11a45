//! Named upstream pools.
//!
//! # Responsibilities
//! - Hold named, ordered lists of backends
//! - Build the registry once from configuration
//! - Serve read-only lookups to every directive that references a pool

use std::collections::HashMap;

use crate::config::{ConfigError, UpstreamConfig};
use crate::load_balancer::backend::Backend;

/// A named, ordered list of backends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upstream {
    pub name: String,
    pub backends: Vec<Backend>,
}

/// Registry of upstreams, keyed by name.
///
/// Populated during setup and never mutated afterwards, so it is shared by
/// reference without synchronization.
#[derive(Debug, Clone, Default)]
pub struct UpstreamRegistry {
    upstreams: HashMap<String, Upstream>,
}

impl UpstreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the registry from configuration.
    ///
    /// A later upstream with the same name replaces an earlier one.
    pub fn from_config(configs: &[UpstreamConfig]) -> Result<Self, ConfigError> {
        let mut registry = Self::new();
        for config in configs {
            let mut backends = Vec::with_capacity(config.backends.len());
            for b in &config.backends {
                let mut backend = Backend::parse(&b.address)?;
                backend.weight = b.weight;
                backend.backup = b.backup;
                backends.push(backend);
            }
            if registry.upstreams.contains_key(&config.name) {
                tracing::warn!(upstream = %config.name, "Upstream redefined, later definition wins");
            }
            registry.insert(Upstream {
                name: config.name.clone(),
                backends,
            });
        }
        Ok(registry)
    }

    /// Add an upstream during setup.
    pub fn insert(&mut self, upstream: Upstream) {
        self.upstreams.insert(upstream.name.clone(), upstream);
    }

    pub fn get(&self, name: &str) -> Option<&Upstream> {
        self.upstreams.get(name)
    }

    /// Look up an upstream referenced by a directive.
    pub fn resolve(&self, name: &str) -> Result<&Upstream, ConfigError> {
        self.get(name)
            .ok_or_else(|| ConfigError::UnknownUpstream(name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.upstreams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.upstreams.is_empty()
    }
}
