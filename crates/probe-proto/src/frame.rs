//! Wire framing for the motor-drive ASCII protocol.
//!
//! Each outbound packet is a two-byte sequence header (`0x00 0x07`), the
//! ASCII command body, and a `0x0D` terminator. Replies are ASCII text
//! terminated by `0x0D`; the drive echoes the sequence header back, and the
//! codec strips it so callers only ever see the reply text.

use crate::ProtocolError;
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Two-byte sequence prefix on every packet.
const HEADER: [u8; 2] = [0x00, 0x07];
/// Carriage return closes every packet and reply.
const TERMINATOR: u8 = 0x0D;
/// Bound on the reply buffer; drive replies are short status strings.
const MAX_REPLY_SIZE: usize = 1024;

/// A codec for encoding commands to and decoding replies from a motor
/// drive.
///
/// Encoding takes the ASCII command body (e.g. `"DI4000"`) and produces the
/// framed packet. Decoding scans for the terminator, strips it and the
/// echoed header, and yields the reply text.
#[derive(Debug, Default)]
pub struct MotorCodec;

impl MotorCodec {
    /// Creates a new `MotorCodec`.
    pub fn new() -> Self {
        Self
    }
}

impl Encoder<String> for MotorCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if !item.is_ascii() {
            return Err(ProtocolError::NonAscii(item));
        }

        dst.reserve(HEADER.len() + item.len() + 1);
        dst.put_slice(&HEADER);
        dst.put_slice(item.as_bytes());
        dst.put_u8(TERMINATOR);
        Ok(())
    }
}

impl Decoder for MotorCodec {
    type Item = String;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(pos) = src.iter().position(|&b| b == TERMINATOR) else {
            if src.len() > MAX_REPLY_SIZE {
                return Err(ProtocolError::ReplyTooLong(MAX_REPLY_SIZE));
            }
            return Ok(None);
        };

        let mut frame = src.split_to(pos + 1);
        frame.truncate(pos); // drop the terminator

        // The drive echoes the sequence header ahead of the reply text.
        if frame.len() >= HEADER.len() && frame[..HEADER.len()] == HEADER {
            frame.advance(HEADER.len());
        }

        let text =
            std::str::from_utf8(&frame).map_err(|_| ProtocolError::MalformedReply)?;
        if !text.is_ascii() {
            return Err(ProtocolError::MalformedReply);
        }

        Ok(Some(text.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_header_body_terminator() {
        let mut codec = MotorCodec::new();
        let mut buf = BytesMut::new();
        codec.encode("DI4000".to_string(), &mut buf).unwrap();
        assert_eq!(&buf[..], b"\x00\x07DI4000\x0d");
    }

    #[test]
    fn rejects_non_ascii_body() {
        let mut codec = MotorCodec::new();
        let mut buf = BytesMut::new();
        let err = codec.encode("DI\u{2603}".to_string(), &mut buf).unwrap_err();
        assert!(matches!(err, ProtocolError::NonAscii(_)));
    }

    #[test]
    fn decodes_reply_and_strips_echo_header() {
        let mut codec = MotorCodec::new();
        let mut buf = BytesMut::from(&b"\x00\x07IE=12345\x0d"[..]);
        let reply = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(reply, "IE=12345");
        assert!(buf.is_empty());
    }

    #[test]
    fn decodes_reply_without_header() {
        let mut codec = MotorCodec::new();
        let mut buf = BytesMut::from(&b"RS=R\x0d"[..]);
        let reply = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(reply, "RS=R");
    }

    #[test]
    fn waits_for_terminator() {
        let mut codec = MotorCodec::new();
        let mut buf = BytesMut::from(&b"\x00\x07IE=12"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(b"345\x0d");
        let reply = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(reply, "IE=12345");
    }

    #[test]
    fn splits_back_to_back_replies() {
        let mut codec = MotorCodec::new();
        let mut buf = BytesMut::from(&b"\x00\x07%\x0d\x00\x07IE=7\x0d"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), "%");
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), "IE=7");
    }

    #[test]
    fn bounded_buffer_errors_without_terminator() {
        let mut codec = MotorCodec::new();
        let mut buf = BytesMut::from(vec![b'x'; MAX_REPLY_SIZE + 8].as_slice());
        let err = codec.decode(&mut buf).unwrap_err();
        assert!(matches!(err, ProtocolError::ReplyTooLong(_)));
    }
}
