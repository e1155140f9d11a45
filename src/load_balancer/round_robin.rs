//! Round-robin load balancing strategy.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::load_balancer::{backend::Backend, upstream::Upstream};

/// Round-robin selector over one upstream.
///
/// The counter is the only runtime-mutable state: a single atomic
/// increment per pick, reduced modulo the backend count. Concurrent callers
/// never observe a torn value; under contention each caller still gets a
/// distinct counter value.
#[derive(Debug)]
pub struct RoundRobin {
    backends: Vec<Backend>,
    counter: AtomicUsize,
}

impl RoundRobin {
    /// Build a selector for an upstream.
    ///
    /// Backup backends only take traffic when the upstream has no primary
    /// backend at all. Returns `None` for an empty upstream.
    pub fn new(upstream: &Upstream) -> Option<Self> {
        let primary: Vec<Backend> = upstream
            .backends
            .iter()
            .filter(|b| !b.backup)
            .cloned()
            .collect();
        let backends = if primary.is_empty() {
            upstream.backends.clone()
        } else {
            primary
        };
        if backends.is_empty() {
            return None;
        }
        Some(Self {
            backends,
            counter: AtomicUsize::new(0),
        })
    }

    /// Pick the next backend.
    pub fn next_backend(&self) -> &Backend {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        &self.backends[n % self.backends.len()]
    }

    /// Number of backends in rotation.
    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}
