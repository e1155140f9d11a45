//! Backend abstraction.
//!
//! # Responsibilities
//! - Represent a single backend endpoint (tcp or unix socket)
//! - Track active connections per backend for the proxy pool
//! - Enforce max connection limits

use std::fmt;
use std::ops::Deref;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::config::ConfigError;

/// Socket family used to reach a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Tcp,
    Unix,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Tcp => f.write_str("tcp"),
            Transport::Unix => f.write_str("unix"),
        }
    }
}

/// A single backend endpoint. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backend {
    pub transport: Transport,
    /// `host:port` for tcp, a filesystem path for unix.
    pub address: String,
    pub weight: u32,
    pub backup: bool,
}

impl Backend {
    /// Create a tcp backend with default weight.
    pub fn tcp(address: impl Into<String>) -> Self {
        Self {
            transport: Transport::Tcp,
            address: address.into(),
            weight: 1,
            backup: false,
        }
    }

    /// Create a unix socket backend with default weight.
    pub fn unix(path: impl Into<String>) -> Self {
        Self {
            transport: Transport::Unix,
            address: path.into(),
            weight: 1,
            backup: false,
        }
    }

    /// Parse an address as written in config: `unix:/path` or `host:port`.
    pub fn parse(address: &str) -> Result<Self, ConfigError> {
        let address = address.trim();
        if let Some(path) = address.strip_prefix("unix:") {
            if path.is_empty() {
                return Err(ConfigError::Directive(
                    "unix backend needs a socket path".to_string(),
                ));
            }
            return Ok(Self::unix(path));
        }
        if address.is_empty() {
            return Err(ConfigError::Directive("empty backend address".to_string()));
        }
        Ok(Self::tcp(address))
    }

    /// Socket path for unix backends.
    pub fn socket_path(&self) -> Option<PathBuf> {
        match self.transport {
            Transport::Unix => Some(PathBuf::from(&self.address)),
            Transport::Tcp => None,
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.transport {
            Transport::Tcp => f.write_str(&self.address),
            Transport::Unix => write!(f, "unix:{}", self.address),
        }
    }
}

/// A backend slot in a connection-tracking pool.
#[derive(Debug)]
pub struct BackendSlot {
    pub backend: Backend,
    /// Maximum concurrent connections allowed (`None` = unbounded).
    pub max_connections: Option<usize>,
    /// Number of currently active connections.
    pub active_connections: AtomicUsize,
}

impl BackendSlot {
    pub fn new(backend: Backend, max_connections: Option<usize>) -> Self {
        Self {
            backend,
            max_connections,
            active_connections: AtomicUsize::new(0),
        }
    }

    /// Get the current number of active connections.
    pub fn active(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// True when the slot is at its connection cap.
    pub fn is_saturated(&self) -> bool {
        self.max_connections
            .map(|max| self.active() >= max)
            .unwrap_or(false)
    }

    fn dec_connections(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    /// Try to create a connection guard that increments count.
    pub fn try_create_guard(self: &Arc<Self>) -> Option<SlotGuard> {
        let mut prev = self.active_connections.load(Ordering::Relaxed);
        loop {
            if let Some(max) = self.max_connections {
                if prev >= max {
                    return None;
                }
            }
            match self.active_connections.compare_exchange_weak(
                prev,
                prev + 1,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(x) => prev = x,
            }
        }
        Some(SlotGuard { slot: self.clone() })
    }
}

/// A RAII guard that manages the active connection count.
#[derive(Debug)]
pub struct SlotGuard {
    slot: Arc<BackendSlot>,
}

impl Deref for SlotGuard {
    type Target = Backend;
    fn deref(&self) -> &Self::Target {
        &self.slot.backend
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.slot.dec_connections();
    }
}
