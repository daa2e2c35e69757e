//! Basic type definitions for the chat server
//!
//! Provides the `ConnectionId` newtype used as the registry key.

use std::sync::atomic::{AtomicU64, Ordering};

/// Unique connection identifier (newtype pattern)
///
/// Assigned in accept order. The ordering is what gives the registry a
/// deterministic fan-out order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(pub u64);

impl ConnectionId {
    /// Take the next identifier from a shared counter
    pub fn next(counter: &AtomicU64) -> Self {
        Self(counter.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}
