//! Middleware pipeline compiler.
//!
//! # Data Flow
//! ```text
//! Setup (single-threaded):
//!     directives → PipelineConfig::add_middleware (file order)
//!     slots      → PipelineConfig::add_named_middleware (router / identity / access-log)
//!
//! compile():
//!     terminal = router slot wrapping not-found, or not-found alone
//!     → generic middlewares, first registered outermost
//!     → identity slot
//!     → access-log slot (outermost)
//! ```
//!
//! # Design Decisions
//! - Slot positions are fixed regardless of when a slot was registered
//! - Registering a slot twice keeps the last registration
//! - Compilation cannot fail; construction errors surface before this point

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::http::handler::{Middleware, NotFound, SharedHandler};

/// Fixed-position pipeline slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    /// User-supplied router, replaces the not-found terminal.
    Router,
    /// Correlation id tagging.
    Identity,
    /// Access logging, outermost.
    AccessLog,
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Slot::Router => f.write_str("router"),
            Slot::Identity => f.write_str("identity"),
            Slot::AccessLog => f.write_str("access-log"),
        }
    }
}

/// Per-listener pipeline under construction.
#[derive(Default)]
pub struct PipelineConfig {
    middlewares: Vec<Middleware>,
    named: HashMap<Slot, Middleware>,
    not_found: NotFound,
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a generic, order-sensitive middleware.
    pub fn add_middleware(&mut self, m: Middleware) {
        self.middlewares.push(m);
    }

    /// Register a middleware into a fixed slot.
    pub fn add_named_middleware(&mut self, slot: Slot, m: Middleware) {
        if self.named.insert(slot, m).is_some() {
            tracing::warn!(slot = %slot, "Slot registered twice, keeping the last one");
        }
    }

    /// Override the default not-found terminal.
    pub fn set_not_found(&mut self, not_found: NotFound) {
        self.not_found = not_found;
    }

    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }

    pub fn has_slot(&self, slot: Slot) -> bool {
        self.named.contains_key(&slot)
    }

    /// Compose everything into one handler.
    pub fn compile(mut self) -> SharedHandler {
        let terminal: SharedHandler = Arc::new(self.not_found);
        let mut handler = match self.named.remove(&Slot::Router) {
            Some(router) => router(terminal),
            None => terminal,
        };
        // Wrap from the last registered inwards so the first one runs first.
        for m in self.middlewares.into_iter().rev() {
            handler = m(handler);
        }
        if let Some(identity) = self.named.remove(&Slot::Identity) {
            handler = identity(handler);
        }
        if let Some(access_log) = self.named.remove(&Slot::AccessLog) {
            handler = access_log(handler);
        }
        handler
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("middlewares", &self.middlewares.len())
            .field("slots", &self.named.keys().collect::<Vec<_>>())
            .field("not_found", &self.not_found)
            .finish()
    }
}
