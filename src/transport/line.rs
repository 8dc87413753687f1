//! Line-based decoder for the lobby wire format.
//!
//! Lobby traffic is plain text terminated by a single `\n`; there is no
//! carriage-return handling anywhere in the protocol. The decoder carries
//! its scan position across calls so partial lines split over arbitrary
//! read boundaries cost no re-scanning.

use std::io;

use bytes::BytesMut;
use tokio_util::codec::Decoder;

/// Splits a byte stream into `\n`-terminated lines.
pub(crate) struct LineDecoder {
    /// Index of next byte to check for a newline.
    next_index: usize,
    /// Maximum line length in bytes, terminator included.
    max_len: usize,
}

impl LineDecoder {
    pub(crate) fn new(max_len: usize) -> Self {
        Self {
            next_index: 0,
            max_len,
        }
    }
}

impl Decoder for LineDecoder {
    type Item = String;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> io::Result<Option<String>> {
        // Look for a newline starting from where we left off.
        if let Some(offset) = src[self.next_index..].iter().position(|b| *b == b'\n') {
            let mut line = src.split_to(self.next_index + offset + 1);
            self.next_index = 0;

            if line.len() > self.max_len {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("line of {} bytes exceeds limit {}", line.len(), self.max_len),
                ));
            }

            // Strip the terminator only; the protocol never sends '\r'.
            line.truncate(line.len() - 1);
            Ok(Some(String::from_utf8_lossy(&line).into_owned()))
        } else {
            // No complete line yet; remember where we stopped.
            self.next_index = src.len();

            if src.len() > self.max_len {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "partial line of {} bytes exceeds limit {}",
                        src.len(),
                        self.max_len
                    ),
                ));
            }

            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_complete_line() {
        let mut decoder = LineDecoder::new(512);
        let mut buf = BytesMut::from("PING\n");

        let result = decoder.decode(&mut buf).unwrap();
        assert_eq!(result, Some("PING".to_string()));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_across_boundaries() {
        let mut decoder = LineDecoder::new(512);
        let mut buf = BytesMut::from("ADDUSER Glass");

        assert_eq!(decoder.decode(&mut buf).unwrap(), None);

        buf.extend_from_slice(b"Bead ?? 1281\nPONG\nLE");
        assert_eq!(
            decoder.decode(&mut buf).unwrap(),
            Some("ADDUSER GlassBead ?? 1281".to_string())
        );
        assert_eq!(decoder.decode(&mut buf).unwrap(), Some("PONG".to_string()));
        assert_eq!(decoder.decode(&mut buf).unwrap(), None);
        assert_eq!(&buf[..], b"LE");
    }

    #[test]
    fn test_decode_empty_line() {
        let mut decoder = LineDecoder::new(512);
        let mut buf = BytesMut::from("\n");

        assert_eq!(decoder.decode(&mut buf).unwrap(), Some(String::new()));
    }

    #[test]
    fn test_decode_keeps_carriage_return() {
        // No CR handling in this protocol; a stray '\r' stays in the line.
        let mut decoder = LineDecoder::new(512);
        let mut buf = BytesMut::from("PING\r\n");

        assert_eq!(decoder.decode(&mut buf).unwrap(), Some("PING\r".to_string()));
    }

    #[test]
    fn test_partial_over_limit() {
        let mut decoder = LineDecoder::new(10);
        let mut buf = BytesMut::from("0123456789AB");

        assert!(decoder.decode(&mut buf).is_err());
    }

    #[test]
    fn test_complete_over_limit() {
        let mut decoder = LineDecoder::new(10);
        let mut buf = BytesMut::from("0123456789\n");

        // 11 bytes with the terminator.
        assert!(decoder.decode(&mut buf).is_err());
    }

    #[test]
    fn test_invalid_utf8_is_lossy() {
        let mut decoder = LineDecoder::new(512);
        let mut buf = BytesMut::from(&b"SAID main Bob caf\xe9\n"[..]);

        let line = decoder.decode(&mut buf).unwrap().unwrap();
        assert!(line.starts_with("SAID main Bob caf"));
        assert!(line.contains('\u{FFFD}'));
    }
}
