//! Sentence extraction from GPS log datagrams
//!
//! A Mikrotik router configured with a remote logging action for the `gps`
//! topic emits one datagram per NMEA sentence, shaped roughly like:
//!
//! ```text
//! <30>Jan  1 00:00:00 router gps,raw $GPRMC,123519,A,4807.038,N,...*6A
//! ```
//!
//! Everything after the first `gps,raw` is the sentence. No checksum or
//! field validation is done here; consumers are expected to cope with
//! whatever the device produced.

use crate::registry::Sentence;

use super::constants::MARKER;

/// Reasons a datagram is rejected as malformed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExtractError {
    /// Payload is not valid UTF-8
    #[error("datagram is not valid UTF-8")]
    InvalidUtf8,
    /// Payload has no `gps,raw` marker
    #[error("datagram has no `gps,raw` marker")]
    MissingMarker,
}

/// Extract the NMEA sentence from one raw datagram
///
/// Returns `Ok(None)` when the datagram is blank or the marker is followed
/// only by whitespace. Those are not worth a warning and carry nothing to
/// deliver.
pub fn extract_sentence(datagram: &[u8]) -> Result<Option<Sentence>, ExtractError> {
    let text = std::str::from_utf8(datagram).map_err(|_| ExtractError::InvalidUtf8)?;
    let text = text.trim();

    if text.is_empty() {
        return Ok(None);
    }

    let (_, rest) = text
        .split_once(MARKER)
        .ok_or(ExtractError::MissingMarker)?;

    let sentence = rest.trim();
    if sentence.is_empty() {
        return Ok(None);
    }

    Ok(Some(Sentence::new(sentence)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract(input: &str) -> Result<Option<Sentence>, ExtractError> {
        extract_sentence(input.as_bytes())
    }

    #[test]
    fn test_extracts_trimmed_remainder() {
        let sentence = extract("<garbage>gps,raw  $GPRMC,123519,...*6A  ")
            .unwrap()
            .unwrap();

        assert_eq!(sentence.as_str(), "$GPRMC,123519,...*6A");
    }

    #[test]
    fn test_syslog_envelope() {
        let datagram = "<30>Oct 14 10:22:01 MikroTik gps,raw $GPGGA,102201.00,5230.1234,N,01322.5678,E,1,08,0.9,35.2,M,,M,,*47\n";
        let sentence = extract(datagram).unwrap().unwrap();

        assert_eq!(
            sentence.as_str(),
            "$GPGGA,102201.00,5230.1234,N,01322.5678,E,1,08,0.9,35.2,M,,M,,*47"
        );
    }

    #[test]
    fn test_splits_on_first_marker_only() {
        let sentence = extract("x gps,raw a gps,raw b").unwrap().unwrap();

        assert_eq!(sentence.as_str(), "a gps,raw b");
    }

    #[test]
    fn test_missing_marker_is_malformed() {
        assert_eq!(
            extract("<30>router system,info link up"),
            Err(ExtractError::MissingMarker)
        );
        // Close but not the exact marker
        assert_eq!(extract("gps raw $GPRMC"), Err(ExtractError::MissingMarker));
    }

    #[test]
    fn test_invalid_utf8_is_malformed() {
        let datagram = [b'g', b'p', b's', 0xff, 0xfe];

        assert_eq!(extract_sentence(&datagram), Err(ExtractError::InvalidUtf8));
    }

    #[test]
    fn test_blank_datagram_yields_nothing() {
        assert_eq!(extract(""), Ok(None));
        assert_eq!(extract("  \r\n"), Ok(None));
    }

    #[test]
    fn test_marker_without_payload_yields_nothing() {
        assert_eq!(extract("<30>router gps,raw   "), Ok(None));
    }
}
