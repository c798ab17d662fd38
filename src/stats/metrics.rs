//! Statistics and metrics for the relay

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Relay-wide counters
///
/// Shared by both listeners and every delivery worker. All updates are
/// relaxed atomics; a snapshot is not a consistent cut across counters.
#[derive(Debug)]
pub struct RelayStats {
    started_at: Instant,
    datagrams_received: AtomicU64,
    datagrams_malformed: AtomicU64,
    sentences_broadcast: AtomicU64,
    sentences_dropped: AtomicU64,
    sentences_delivered: AtomicU64,
    bytes_delivered: AtomicU64,
    connections_accepted: AtomicU64,
    connections_rejected: AtomicU64,
    active_connections: AtomicU64,
}

impl RelayStats {
    /// Create new stats tracker
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            datagrams_received: AtomicU64::new(0),
            datagrams_malformed: AtomicU64::new(0),
            sentences_broadcast: AtomicU64::new(0),
            sentences_dropped: AtomicU64::new(0),
            sentences_delivered: AtomicU64::new(0),
            bytes_delivered: AtomicU64::new(0),
            connections_accepted: AtomicU64::new(0),
            connections_rejected: AtomicU64::new(0),
            active_connections: AtomicU64::new(0),
        }
    }

    /// Count a datagram read from the ingestion socket
    pub fn record_datagram(&self) {
        self.datagrams_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a datagram that carried no `gps,raw` marker or was not UTF-8
    pub fn record_malformed(&self) {
        self.datagrams_malformed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one fanned-out sentence and how many buffers overflowed
    pub fn record_broadcast(&self, dropped: usize) {
        self.sentences_broadcast.fetch_add(1, Ordering::Relaxed);
        self.sentences_dropped
            .fetch_add(dropped as u64, Ordering::Relaxed);
    }

    /// Record one sentence written to a consumer, `bytes` including any CRLF
    pub fn record_delivery(&self, bytes: usize) {
        self.sentences_delivered.fetch_add(1, Ordering::Relaxed);
        self.bytes_delivered.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Count an accepted consumer whose delivery worker has started
    pub fn record_connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    /// Mark a consumer connection as finished
    pub fn record_connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    /// Count a connection refused by the connection limit
    pub fn record_connection_rejected(&self) {
        self.connections_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Get duration since the stats were created
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Copy the current counter values
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            uptime: self.uptime(),
            datagrams_received: self.datagrams_received.load(Ordering::Relaxed),
            datagrams_malformed: self.datagrams_malformed.load(Ordering::Relaxed),
            sentences_broadcast: self.sentences_broadcast.load(Ordering::Relaxed),
            sentences_dropped: self.sentences_dropped.load(Ordering::Relaxed),
            sentences_delivered: self.sentences_delivered.load(Ordering::Relaxed),
            bytes_delivered: self.bytes_delivered.load(Ordering::Relaxed),
            connections_accepted: self.connections_accepted.load(Ordering::Relaxed),
            connections_rejected: self.connections_rejected.load(Ordering::Relaxed),
            active_connections: self.active_connections.load(Ordering::Relaxed),
        }
    }
}

impl Default for RelayStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of [`RelayStats`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Time since the relay was created
    pub uptime: Duration,
    /// Datagrams received on the ingestion socket
    pub datagrams_received: u64,
    /// Datagrams dropped as malformed
    pub datagrams_malformed: u64,
    /// Sentences fanned out to the registry
    pub sentences_broadcast: u64,
    /// Sentences lost to buffer overflow, summed over all buffers
    pub sentences_dropped: u64,
    /// Sentences written to consumers
    pub sentences_delivered: u64,
    /// Bytes written to consumers
    pub bytes_delivered: u64,
    /// Delivery connections accepted
    pub connections_accepted: u64,
    /// Delivery connections refused by the connection limit
    pub connections_rejected: u64,
    /// Delivery connections currently open
    pub active_connections: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relay_stats_new() {
        let stats = RelayStats::new().snapshot();

        assert_eq!(stats.datagrams_received, 0);
        assert_eq!(stats.sentences_broadcast, 0);
        assert_eq!(stats.sentences_delivered, 0);
        assert_eq!(stats.active_connections, 0);
    }

    #[test]
    fn test_broadcast_accumulates_drops() {
        let stats = RelayStats::new();
        stats.record_broadcast(0);
        stats.record_broadcast(3);
        stats.record_broadcast(2);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.sentences_broadcast, 3);
        assert_eq!(snapshot.sentences_dropped, 5);
    }

    #[test]
    fn test_connection_tracking() {
        let stats = RelayStats::new();
        stats.record_connection_opened();
        stats.record_connection_opened();
        stats.record_connection_closed();
        stats.record_connection_rejected();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.connections_accepted, 2);
        assert_eq!(snapshot.active_connections, 1);
        assert_eq!(snapshot.connections_rejected, 1);
    }

    #[test]
    fn test_delivery_bytes() {
        let stats = RelayStats::new();
        stats.record_delivery(20);
        stats.record_delivery(22);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.sentences_delivered, 2);
        assert_eq!(snapshot.bytes_delivered, 42);
    }
}
