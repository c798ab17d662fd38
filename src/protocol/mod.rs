//! Wire-level pieces of the relay
//!
//! The ingestion side speaks a syslog-style UDP transport where each datagram
//! carries one log line. Lines for the GPS topic embed a raw NMEA 0183
//! sentence after a fixed marker; [`extract_sentence`] pulls it out.

pub mod constants;
pub mod extract;

pub use constants::*;
pub use extract::{extract_sentence, ExtractError};
