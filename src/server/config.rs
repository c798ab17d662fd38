//! Relay configuration

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::protocol::constants::*;
use crate::registry::RegistryConfig;

/// Relay configuration options
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// UDP address the device sends its log datagrams to
    pub ingest_addr: SocketAddr,

    /// TCP address NMEA consumers connect to
    pub delivery_addr: SocketAddr,

    /// Maximum concurrent delivery connections (0 = unlimited)
    pub max_connections: usize,

    /// Enable TCP_NODELAY on delivery connections
    pub tcp_nodelay: bool,

    /// Append `\r\n` to every sentence written to consumers
    pub append_crlf: bool,

    /// Receive buffer for one datagram
    pub recv_buffer_size: usize,

    /// How long shutdown waits for each listener before aborting it
    pub shutdown_timeout: Duration,

    /// Registry settings
    pub registry: RegistryConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        let any = IpAddr::V4(Ipv4Addr::UNSPECIFIED);
        Self {
            ingest_addr: SocketAddr::new(any, DEFAULT_INGEST_PORT),
            delivery_addr: SocketAddr::new(any, DEFAULT_DELIVERY_PORT),
            max_connections: 0, // Unlimited
            tcp_nodelay: true, // Sentences are tiny, don't let Nagle hold them
            append_crlf: false,
            recv_buffer_size: MAX_DATAGRAM_SIZE,
            shutdown_timeout: Duration::from_secs(5),
            registry: RegistryConfig::default(),
        }
    }
}

impl RelayConfig {
    /// Set the ingestion address
    pub fn ingest_addr(mut self, addr: SocketAddr) -> Self {
        self.ingest_addr = addr;
        self
    }

    /// Set the delivery address
    pub fn delivery_addr(mut self, addr: SocketAddr) -> Self {
        self.delivery_addr = addr;
        self
    }

    /// Set maximum connections
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Enable or disable TCP_NODELAY
    pub fn tcp_nodelay(mut self, enabled: bool) -> Self {
        self.tcp_nodelay = enabled;
        self
    }

    /// Terminate each delivered sentence with CRLF
    pub fn append_crlf(mut self, enabled: bool) -> Self {
        self.append_crlf = enabled;
        self
    }

    /// Set the datagram receive buffer size
    pub fn recv_buffer_size(mut self, size: usize) -> Self {
        self.recv_buffer_size = size.clamp(1, MAX_DATAGRAM_SIZE);
        self
    }

    /// Set shutdown timeout
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Set registry configuration
    pub fn registry(mut self, registry: RegistryConfig) -> Self {
        self.registry = registry;
        self
    }

    /// Config bound to loopback on OS-assigned ports
    pub fn localhost() -> Self {
        let lo = IpAddr::V4(Ipv4Addr::LOCALHOST);
        Self::default()
            .ingest_addr(SocketAddr::new(lo, 0))
            .delivery_addr(SocketAddr::new(lo, 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RelayConfig::default();

        assert_eq!(config.ingest_addr.port(), 514);
        assert_eq!(config.delivery_addr.port(), 2000);
        assert!(config.ingest_addr.ip().is_unspecified());
        assert!(config.delivery_addr.ip().is_unspecified());
        assert_eq!(config.max_connections, 0);
        assert!(config.tcp_nodelay);
        assert!(!config.append_crlf);
        assert_eq!(config.registry.buffer_capacity, DEFAULT_BUFFER_CAPACITY);
    }

    #[test]
    fn test_localhost() {
        let config = RelayConfig::localhost();

        assert!(config.ingest_addr.ip().is_loopback());
        assert_eq!(config.ingest_addr.port(), 0);
        assert_eq!(config.delivery_addr.port(), 0);
    }

    #[test]
    fn test_builder_recv_buffer_clamped() {
        let config = RelayConfig::default().recv_buffer_size(usize::MAX);
        assert_eq!(config.recv_buffer_size, MAX_DATAGRAM_SIZE);

        let config = RelayConfig::default().recv_buffer_size(0);
        assert_eq!(config.recv_buffer_size, 1);
    }

    #[test]
    fn test_builder_chaining() {
        let ingest: SocketAddr = "127.0.0.1:5514".parse().unwrap();
        let delivery: SocketAddr = "127.0.0.1:10110".parse().unwrap();
        let config = RelayConfig::default()
            .ingest_addr(ingest)
            .delivery_addr(delivery)
            .max_connections(8)
            .tcp_nodelay(false)
            .append_crlf(true)
            .shutdown_timeout(Duration::from_secs(1))
            .registry(RegistryConfig::default().buffer_capacity(10));

        assert_eq!(config.ingest_addr, ingest);
        assert_eq!(config.delivery_addr, delivery);
        assert_eq!(config.max_connections, 8);
        assert!(!config.tcp_nodelay);
        assert!(config.append_crlf);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(1));
        assert_eq!(config.registry.buffer_capacity, 10);
    }
}
