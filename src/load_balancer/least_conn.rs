//! Least Connections load balancing strategy.

use std::sync::Arc;

use crate::load_balancer::backend::{Backend, BackendSlot, SlotGuard};

/// A pool of host slots balanced by fewest active connections.
///
/// Used by the reverse proxy: requests spread across open connections to
/// any backend, and slots at their connection cap are skipped.
#[derive(Debug)]
pub struct LeastConnections {
    slots: Vec<Arc<BackendSlot>>,
}

impl LeastConnections {
    pub fn new(backends: Vec<Backend>, max_connections: Option<usize>) -> Self {
        Self {
            slots: backends
                .into_iter()
                .map(|b| Arc::new(BackendSlot::new(b, max_connections)))
                .collect(),
        }
    }

    /// Acquire the least loaded backend that still has capacity.
    ///
    /// In case of tie, the first one is selected (stability). Returns `None`
    /// when every backend is at its cap.
    pub fn acquire(&self) -> Option<SlotGuard> {
        let mut candidates: Vec<&Arc<BackendSlot>> = self
            .slots
            .iter()
            .filter(|s| !s.is_saturated())
            .collect();
        candidates.sort_by_key(|s| s.active());
        // A slot may fill up between the scan and the guard; try the next one.
        candidates.into_iter().find_map(|s| s.try_create_guard())
    }

    pub fn backends(&self) -> impl Iterator<Item = &Backend> {
        self.slots.iter().map(|s| &s.backend)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_least_conn() {
        let lb = LeastConnections::new(
            vec![Backend::tcp("127.0.0.1:8080"), Backend::tcp("127.0.0.1:8081")],
            None,
        );

        let g1 = lb.acquire().unwrap();
        assert_eq!(g1.address, "127.0.0.1:8080");

        // b1 busy, so b2 is picked
        let g2 = lb.acquire().unwrap();
        assert_eq!(g2.address, "127.0.0.1:8081");

        drop(g1);
        let g3 = lb.acquire().unwrap();
        assert_eq!(g3.address, "127.0.0.1:8080");
        drop(g2);
        drop(g3);
    }

    #[test]
    fn test_cap_exhaustion() {
        let lb = LeastConnections::new(vec![Backend::tcp("127.0.0.1:8080")], Some(1));
        let held = lb.acquire().unwrap();
        assert!(lb.acquire().is_none());
        drop(held);
        assert!(lb.acquire().is_some());
    }
}
