//! Client identity and sentence types
//!
//! This module defines the key used to route sentences to consumers and the
//! sentence payload that is fanned out to their buffers.

use std::net::{IpAddr, SocketAddr};

use bytes::Bytes;

/// Identity of a downstream consumer (its host address)
///
/// The port is deliberately not part of the identity: every connection from
/// the same host shares one buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(IpAddr);

impl ClientId {
    /// Create an identity from a host address
    pub fn new(addr: IpAddr) -> Self {
        Self(addr)
    }

    /// Derive the identity of a connected peer
    pub fn from_peer(peer: SocketAddr) -> Self {
        Self(peer.ip())
    }

    /// The host address
    pub fn ip(&self) -> IpAddr {
        self.0
    }
}

impl From<IpAddr> for ClientId {
    fn from(addr: IpAddr) -> Self {
        Self(addr)
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// One NMEA sentence ready for delivery
///
/// Cheap to clone: fanning a sentence out to many buffers only bumps the
/// reference count of the shared `Bytes`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sentence(Bytes);

impl Sentence {
    /// Create a sentence from text
    pub fn new(text: impl Into<String>) -> Self {
        Self(Bytes::from(text.into()))
    }

    /// The sentence as text
    pub fn as_str(&self) -> &str {
        // Only ever constructed from a String
        std::str::from_utf8(&self.0).unwrap_or_default()
    }

    /// The raw bytes written to consumers
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Length in bytes
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the sentence is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for Sentence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for Sentence {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_id_ignores_port() {
        let a: SocketAddr = "192.168.88.10:50000".parse().unwrap();
        let b: SocketAddr = "192.168.88.10:50001".parse().unwrap();

        assert_eq!(ClientId::from_peer(a), ClientId::from_peer(b));
        assert_eq!(ClientId::from_peer(a).to_string(), "192.168.88.10");
    }

    #[test]
    fn test_sentence_clone_shares_storage() {
        let sentence = Sentence::new("$GPRMC,123519,A*6A");
        let copy = sentence.clone();

        assert_eq!(sentence.as_bytes().as_ptr(), copy.as_bytes().as_ptr());
        assert_eq!(copy.as_str(), "$GPRMC,123519,A*6A");
        assert_eq!(copy.len(), 18);
    }
}
