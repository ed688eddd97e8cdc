//! Counters shared between the worker and the health endpoint.

use metrics::gauge;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Snapshot of gateway occupancy, written by the worker after every event.
#[derive(Debug, Default)]
pub struct GatewayStats {
    connections: AtomicUsize,
    sessions: AtomicUsize,
    pending_verifications: AtomicUsize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub connections: usize,
    pub sessions: usize,
    pub pending_verifications: usize,
}

impl GatewayStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record(&self, connections: usize, sessions: usize, pending_verifications: usize) {
        self.connections.store(connections, Ordering::Relaxed);
        self.sessions.store(sessions, Ordering::Relaxed);
        self.pending_verifications
            .store(pending_verifications, Ordering::Relaxed);

        gauge!("gateway_active_connections").set(connections as f64);
        gauge!("gateway_active_sessions").set(sessions as f64);
        gauge!("gateway_pending_verifications").set(pending_verifications as f64);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            connections: self.connections.load(Ordering::Relaxed),
            sessions: self.sessions.load(Ordering::Relaxed),
            pending_verifications: self.pending_verifications.load(Ordering::Relaxed),
        }
    }
}
