//! Relay statistics

use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of relay-wide statistics
#[derive(Debug, Clone, Default)]
pub struct RelayStats {
    /// Total connections ever accepted
    pub total_connections: u64,
    /// Current active connections
    pub active_connections: u64,
    /// Channel registrations processed
    pub registrations: u64,
    /// Events relayed (broadcasts performed)
    pub events_relayed: u64,
    /// Per-subscriber deliveries handed off
    pub deliveries: u64,
    /// Deliveries dropped because a subscriber queue was full
    pub dropped_deliveries: u64,
    /// Channels with at least one subscriber
    pub channels: usize,
}

/// Live counters behind [`RelayStats`]
#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    pub(crate) total_connections: AtomicU64,
    pub(crate) active_connections: AtomicU64,
    pub(crate) registrations: AtomicU64,
    pub(crate) events_relayed: AtomicU64,
    pub(crate) deliveries: AtomicU64,
    pub(crate) dropped_deliveries: AtomicU64,
}

impl StatsCounters {
    pub(crate) fn snapshot(&self, channels: usize) -> RelayStats {
        RelayStats {
            total_connections: self.total_connections.load(Ordering::Relaxed),
            active_connections: self.active_connections.load(Ordering::Relaxed),
            registrations: self.registrations.load(Ordering::Relaxed),
            events_relayed: self.events_relayed.load(Ordering::Relaxed),
            deliveries: self.deliveries.load(Ordering::Relaxed),
            dropped_deliveries: self.dropped_deliveries.load(Ordering::Relaxed),
            channels,
        }
    }
}
