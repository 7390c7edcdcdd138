//! Server counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time copy of [`ServerStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Total connections accepted.
    pub connections_accepted: u64,
    /// Connections currently open.
    pub connections_active: u64,
    /// Accept calls that failed.
    pub accept_errors: u64,
    /// HTTP requests read.
    pub requests: u64,
    /// Requests a handler reported as handled.
    pub handled: u64,
    /// Requests answered with 404.
    pub not_found: u64,
    /// Handler failures turned into 500 responses.
    pub handler_errors: u64,
    /// Accepted WebSocket upgrades.
    pub upgrades: u64,
    /// Refused WebSocket upgrades.
    pub rejected_handshakes: u64,
}

/// Atomic counters shared by every connection task.
#[derive(Debug, Default)]
pub struct ServerStats {
    connections_accepted: AtomicU64,
    connections_active: AtomicU64,
    accept_errors: AtomicU64,
    requests: AtomicU64,
    handled: AtomicU64,
    not_found: AtomicU64,
    handler_errors: AtomicU64,
    upgrades: AtomicU64,
    rejected_handshakes: AtomicU64,
}

impl ServerStats {
    /// Create zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn connection_closed(&self) {
        self.connections_active.fetch_sub(1, Ordering::Relaxed);
    }

    pub(crate) fn accept_error(&self) {
        self.accept_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn handled(&self) {
        self.handled.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn not_found(&self) {
        self.not_found.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn handler_error(&self) {
        self.handler_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn upgrade(&self) {
        self.upgrades.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn rejected_handshake(&self) {
        self.rejected_handshakes.fetch_add(1, Ordering::Relaxed);
    }

    /// Read every counter.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            connections_accepted: self.connections_accepted.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            accept_errors: self.accept_errors.load(Ordering::Relaxed),
            requests: self.requests.load(Ordering::Relaxed),
            handled: self.handled.load(Ordering::Relaxed),
            not_found: self.not_found.load(Ordering::Relaxed),
            handler_errors: self.handler_errors.load(Ordering::Relaxed),
            upgrades: self.upgrades.load(Ordering::Relaxed),
            rejected_handshakes: self.rejected_handshakes.load(Ordering::Relaxed),
        }
    }
}
