//! NMEA relay
//!
//! Bridges a GPS-equipped Mikrotik router to NMEA 0183 consumers. The
//! router's remote logging action sends one syslog datagram per sentence to
//! UDP port 514; the relay extracts the sentence and streams it to every
//! consumer connected on TCP port 2000 (OpenCPN, Navionics, gpsd, ...).
//!
//! # Example
//!
//! ```no_run
//! use nmea_relay::{Relay, RelayConfig};
//!
//! # async fn example() -> nmea_relay::Result<()> {
//! let relay = Relay::new(RelayConfig::default());
//! relay.run_until(nmea_relay::server::signal::shutdown_signal()).await
//! # }
//! ```
//!
//! Each consumer host gets a bounded buffer of recent sentences (50 by
//! default). A host that stops reading keeps the newest sentences and loses
//! the oldest; nobody else is slowed down.

pub mod error;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod stats;

pub use error::{Error, Result};
pub use protocol::{extract_sentence, ExtractError};
pub use registry::{ClientId, ClientRegistry, OutboundBuffer, RegistryConfig, Sentence};
pub use server::{Relay, RelayConfig, RelayState, RunningRelay, ShutdownHandle};
pub use stats::{RelayStats, StatsSnapshot};
