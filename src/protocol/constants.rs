//! Protocol constants

/// Marker that precedes the NMEA sentence in a GPS log line
pub const MARKER: &str = "gps,raw";

/// Default syslog port the device sends to
pub const DEFAULT_INGEST_PORT: u16 = 514;

/// Default port NMEA consumers connect to
pub const DEFAULT_DELIVERY_PORT: u16 = 2000;

/// Default number of sentences held per consumer
pub const DEFAULT_BUFFER_CAPACITY: usize = 50;

/// Largest payload a single UDP datagram can carry
pub const MAX_DATAGRAM_SIZE: usize = 64 * 1024;

/// Terminator appended to sentences when CRLF framing is enabled
pub const CRLF: &[u8] = b"\r\n";
