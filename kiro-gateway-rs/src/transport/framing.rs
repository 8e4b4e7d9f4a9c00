//! AWS event-stream binary framing decoder.
//!
//! Kiro's streaming responses use AWS's `application/vnd.amazon.eventstream`
//! framing, not text SSE: each message is
//!
//! ```text
//! +-------------+------------------+-------------+---------+-------------+
//! | total_len:4 | headers_len:4    | prelude_crc | headers | payload     | msg_crc:4
//! +-------------+------------------+-------------+---------+-------------+
//! ```
//!
//! `prelude_crc` covers the 8-byte `total_len`+`headers_len` prelude.
//! `msg_crc` covers the whole message except itself. `total_len` counts
//! every byte of the message, including both CRCs.
//!
//! The decoder is restartable: partial messages are buffered across `feed`
//! calls and resumed on the next one. A CRC mismatch is treated as fatal -
//! everything after a corrupt message is unrecoverable framing-wise.

use crc32fast::Hasher;

use crate::error::{Error, Result};

const PRELUDE_LEN: usize = 8;
const PRELUDE_WITH_CRC_LEN: usize = PRELUDE_LEN + 4;
const TRAILING_CRC_LEN: usize = 4;

/// Incremental decoder for AWS event-stream framed messages.
///
/// Call [`feed`](Self::feed) with each chunk of bytes as it arrives; it
/// returns the JSON payloads of any complete messages found, buffering the
/// remainder for the next call.
#[derive(Default)]
pub struct EventStreamDecoder {
    buffer: Vec<u8>,
}

impl EventStreamDecoder {
    /// Create a new, empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed in newly received bytes and extract any complete messages.
    ///
    /// Returns the parsed JSON payload of each complete message, in order.
    /// Errors are fatal: a framing CRC mismatch means the stream can no
    /// longer be trusted and the caller should abort.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<serde_json::Value>> {
        self.buffer.extend_from_slice(chunk);
        let mut payloads = Vec::new();

        loop {
            if self.buffer.len() < PRELUDE_WITH_CRC_LEN {
                break;
            }

            let total_length = u32::from_be_bytes(self.buffer[0..4].try_into().unwrap()) as usize;
            let headers_length = u32::from_be_bytes(self.buffer[4..8].try_into().unwrap()) as usize;

            let expected_prelude_crc =
                u32::from_be_bytes(self.buffer[8..PRELUDE_WITH_CRC_LEN].try_into().unwrap());
            let actual_prelude_crc = crc32(&self.buffer[0..PRELUDE_LEN]);
            if actual_prelude_crc != expected_prelude_crc {
                return Err(Error::StreamCorrupt(format!(
                    "prelude CRC mismatch: expected {:08x}, got {:08x}",
                    expected_prelude_crc, actual_prelude_crc
                )));
            }

            if total_length < PRELUDE_WITH_CRC_LEN + TRAILING_CRC_LEN + headers_length {
                return Err(Error::StreamCorrupt(format!(
                    "total_length {} too small for headers_length {}",
                    total_length, headers_length
                )));
            }

            if self.buffer.len() < total_length {
                // Message not fully received yet; wait for more bytes.
                break;
            }

            let message = &self.buffer[0..total_length];
            let expected_msg_crc = u32::from_be_bytes(
                message[total_length - TRAILING_CRC_LEN..total_length]
                    .try_into()
                    .unwrap(),
            );
            let actual_msg_crc = crc32(&message[0..total_length - TRAILING_CRC_LEN]);
            if actual_msg_crc != expected_msg_crc {
                return Err(Error::StreamCorrupt(format!(
                    "message CRC mismatch: expected {:08x}, got {:08x}",
                    expected_msg_crc, actual_msg_crc
                )));
            }

            let payload_start = PRELUDE_WITH_CRC_LEN + headers_length;
            let payload_end = total_length - TRAILING_CRC_LEN;
            let payload_bytes = &message[payload_start..payload_end];

            if !payload_bytes.is_empty() {
                match serde_json::from_slice::<serde_json::Value>(payload_bytes) {
                    Ok(value) => payloads.push(value),
                    Err(e) => {
                        return Err(Error::Stream(format!(
                            "event payload is not valid JSON: {}",
                            e
                        )))
                    }
                }
            }

            self.buffer.drain(0..total_length);
        }

        Ok(payloads)
    }
}

fn crc32(bytes: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(bytes);
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_message(headers: &[u8], payload: &[u8]) -> Vec<u8> {
        let headers_length = headers.len() as u32;
        let total_length = (PRELUDE_WITH_CRC_LEN + headers.len() + payload.len() + TRAILING_CRC_LEN) as u32;

        let mut out = Vec::new();
        out.extend_from_slice(&total_length.to_be_bytes());
        out.extend_from_slice(&headers_length.to_be_bytes());
        let prelude_crc = crc32(&out);
        out.extend_from_slice(&prelude_crc.to_be_bytes());
        out.extend_from_slice(headers);
        out.extend_from_slice(payload);
        let msg_crc = crc32(&out);
        out.extend_from_slice(&msg_crc.to_be_bytes());
        out
    }

    #[test]
    fn decodes_single_message() {
        let payload = br#"{"content":"hi"}"#;
        let msg = encode_message(&[], payload);

        let mut decoder = EventStreamDecoder::new();
        let events = decoder.feed(&msg).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["content"], "hi");
    }

    #[test]
    fn decodes_message_split_across_feeds() {
        let payload = br#"{"content":"partial-safe"}"#;
        let msg = encode_message(&[], payload);
        let (first, second) = msg.split_at(msg.len() / 2);

        let mut decoder = EventStreamDecoder::new();
        assert!(decoder.feed(first).unwrap().is_empty());
        let events = decoder.feed(second).unwrap();
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn decodes_multiple_messages_in_one_feed() {
        let mut buf = Vec::new();
        buf.extend(encode_message(&[], br#"{"content":"a"}"#));
        buf.extend(encode_message(&[], br#"{"content":"b"}"#));

        let mut decoder = EventStreamDecoder::new();
        let events = decoder.feed(&buf).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0]["content"], "a");
        assert_eq!(events[1]["content"], "b");
    }

    #[test]
    fn rejects_corrupt_prelude_crc() {
        let payload = br#"{"content":"hi"}"#;
        let mut msg = encode_message(&[], payload);
        msg[8] ^= 0xff;

        let mut decoder = EventStreamDecoder::new();
        let err = decoder.feed(&msg).unwrap_err();
        assert!(matches!(err, Error::StreamCorrupt(_)));
    }

    #[test]
    fn rejects_corrupt_message_crc() {
        let payload = br#"{"content":"hi"}"#;
        let mut msg = encode_message(&[], payload);
        let last = msg.len() - 1;
        msg[last] ^= 0xff;

        let mut decoder = EventStreamDecoder::new();
        let err = decoder.feed(&msg).unwrap_err();
        assert!(matches!(err, Error::StreamCorrupt(_)));
    }

    #[test]
    fn handles_nonempty_headers_section() {
        let headers = b"\x09event-type\x07\x00\x07content";
        let payload = br#"{"content":"with-headers"}"#;
        let msg = encode_message(headers, payload);

        let mut decoder = EventStreamDecoder::new();
        let events = decoder.feed(&msg).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["content"], "with-headers");
    }
}
