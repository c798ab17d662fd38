//! Relay server
//!
//! Two listeners share one [`ClientRegistry`](crate::registry::ClientRegistry):
//! the UDP ingestion listener fills every buffer, the TCP delivery listener
//! drains them, and [`Relay`] starts and stops both together.

pub mod config;
pub mod delivery;
pub mod ingest;
pub mod lifecycle;
pub mod signal;

pub use config::RelayConfig;
pub use delivery::DeliveryListener;
pub use ingest::IngestListener;
pub use lifecycle::{Relay, RelayState, RunningRelay, ShutdownHandle};

/// Names the two listener loops in logs and errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Listener {
    /// UDP syslog side
    Ingest,
    /// TCP NMEA side
    Delivery,
}

impl std::fmt::Display for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Listener::Ingest => write!(f, "ingestion"),
            Listener::Delivery => write!(f, "delivery"),
        }
    }
}
