//! Newline-delimited JSON framing for the raw socket binding.
//!
//! Each envelope is one compact JSON document terminated by `\n`.
//! Partial lines stay buffered across reads; a line that fails to parse
//! or exceeds the length limit is yielded as [`Inbound::Malformed`] so
//! the stream itself never errors on bad input.

use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::debug;

use crate::error::{ProtocolError, TetherError};
use crate::message::{Inbound, Message};

/// Default upper bound on a single line, terminator excluded.
pub const DEFAULT_MAX_LINE_LENGTH: usize = 8 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct LineCodec {
    max_length: usize,
    /// Where the next newline scan resumes.
    next_index: usize,
    /// Inside an oversized line; drop bytes until its newline.
    discarding: bool,
}

impl LineCodec {
    pub fn new() -> Self {
        Self::with_max_length(DEFAULT_MAX_LINE_LENGTH)
    }

    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            max_length,
            next_index: 0,
            discarding: false,
        }
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for LineCodec {
    type Item = Inbound;
    type Error = TetherError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let newline = src[self.next_index..]
                .iter()
                .position(|b| *b == b'\n')
                .map(|offset| self.next_index + offset);

            let Some(end) = newline else {
                if src.len() > self.max_length {
                    // No terminator within the limit: drop what we have and
                    // keep discarding until the line ends.
                    self.discarding = true;
                    src.clear();
                    self.next_index = 0;
                } else {
                    self.next_index = src.len();
                }
                return Ok(None);
            };

            self.next_index = 0;
            let line = src.split_to(end + 1);

            if self.discarding || end > self.max_length {
                self.discarding = false;
                return Ok(Some(Inbound::Malformed(ProtocolError::LineTooLong {
                    max: self.max_length,
                })));
            }

            let mut body = &line[..end];
            if let Some(stripped) = body.strip_suffix(b"\r") {
                body = stripped;
            }
            if body.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            return Ok(Some(Inbound::decode(body)));
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(buf)? {
            Some(item) => Ok(Some(item)),
            None => {
                if !buf.is_empty() {
                    debug!(bytes = buf.len(), "discarding unterminated line at end of stream");
                    buf.clear();
                }
                self.next_index = 0;
                self.discarding = false;
                Ok(None)
            }
        }
    }
}

impl Encoder<Message> for LineCodec {
    type Error = TetherError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let line = item.to_json()?;
        dst.reserve(line.len() + 1);
        dst.put_slice(line.as_bytes());
        dst.put_u8(b'\n');
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{MessageKind, Params};
    use serde_json::json;

    fn encoded(message: &Message) -> BytesMut {
        let mut buf = BytesMut::new();
        LineCodec::new().encode(message.clone(), &mut buf).unwrap();
        buf
    }

    fn expect_message(item: Option<Inbound>) -> Message {
        match item {
            Some(Inbound::Message(m)) => m,
            other => panic!("expected message, got {other:?}"),
        }
    }

    #[test]
    fn encode_appends_single_newline() {
        let buf = encoded(&Message::request("ping", Params::new()));
        assert_eq!(buf.last(), Some(&b'\n'));
        assert_eq!(buf.iter().filter(|b| **b == b'\n').count(), 1);
    }

    #[test]
    fn decode_roundtrip() {
        let m = Message::success("7", "ping", json!({"ok": true}));
        let mut buf = encoded(&m);
        let mut codec = LineCodec::new();
        assert_eq!(expect_message(codec.decode(&mut buf).unwrap()), m);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn partial_line_stays_buffered() {
        let m = Message::event("tick", Params::new());
        let full = encoded(&m);
        let (head, tail) = full.split_at(full.len() / 2);

        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from(head);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), head.len());

        buf.extend_from_slice(tail);
        assert_eq!(expect_message(codec.decode(&mut buf).unwrap()), m);
    }

    #[test]
    fn two_lines_in_one_read() {
        let a = Message::event("a", Params::new());
        let b = Message::event("b", Params::new());
        let mut buf = encoded(&a);
        buf.extend_from_slice(&encoded(&b));

        let mut codec = LineCodec::new();
        assert_eq!(expect_message(codec.decode(&mut buf).unwrap()).action(), "a");
        assert_eq!(expect_message(codec.decode(&mut buf).unwrap()).action(), "b");
    }

    #[test]
    fn malformed_line_does_not_poison_the_next() {
        let good = Message::success("1", "ping", json!(1));
        let mut buf = BytesMut::from(&b"{\"version\":\"1.0\",\"ty\n"[..]);
        buf.extend_from_slice(&encoded(&good));

        let mut codec = LineCodec::new();
        assert!(matches!(
            codec.decode(&mut buf).unwrap(),
            Some(Inbound::Malformed(ProtocolError::Malformed(_)))
        ));
        let next = expect_message(codec.decode(&mut buf).unwrap());
        assert_eq!(next.kind, MessageKind::Response);
    }

    #[test]
    fn blank_and_crlf_lines() {
        let m = Message::event("x", Params::new());
        let mut text = b"\n  \r\n".to_vec();
        text.extend_from_slice(m.to_json().unwrap().as_bytes());
        text.extend_from_slice(b"\r\n");

        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from(&text[..]);
        assert_eq!(expect_message(codec.decode(&mut buf).unwrap()), m);
    }

    #[test]
    fn oversized_line_is_discarded_once() {
        let mut codec = LineCodec::with_max_length(16);
        let mut buf = BytesMut::from(&[b'a'; 40][..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert!(buf.is_empty());

        buf.extend_from_slice(b"aaaa\n");
        assert!(matches!(
            codec.decode(&mut buf).unwrap(),
            Some(Inbound::Malformed(ProtocolError::LineTooLong { max: 16 }))
        ));

        let m = Message::event("e", Params::new());
        let mut codec = LineCodec::with_max_length(1024);
        buf.extend_from_slice(&encoded(&m));
        assert_eq!(expect_message(codec.decode(&mut buf).unwrap()), m);
    }

    #[test]
    fn eof_discards_unterminated_fragment() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from(&b"{\"partial\":"[..]);
        assert!(codec.decode_eof(&mut buf).unwrap().is_none());
        assert!(buf.is_empty());
    }
}
