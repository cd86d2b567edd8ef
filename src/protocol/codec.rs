//! Protocol codec for encoding/decoding frames
//!
//! Handles the fixed header, framing of payloads and the length-prefixed
//! string convention shared by every payload type.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use super::{MessageType, MAGIC, PROTOCOL_VERSION};

/// Header size: magic(4) + version(1) + type(1) + length(4) + reserved(2) = 12 bytes
pub const HEADER_SIZE: usize = 12;

/// Maximum payload accepted from the wire (10 MB)
pub const MAX_PAYLOAD_SIZE: usize = 10 * 1024 * 1024;

/// Maximum byte length of a string field
pub const MAX_FIELD_LEN: usize = u16::MAX as usize;

/// Malformed or truncated bytes on the wire
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FramingError {
    #[error("Header too short: {0} < 12 bytes")]
    ShortHeader(usize),

    #[error("Bad magic: {0:#010x}")]
    BadMagic(u32),

    #[error("Bad version: {0}")]
    BadVersion(u8),

    #[error("Payload too large: {0} bytes (max: {1})")]
    PayloadTooLarge(usize, usize),

    #[error("Truncated {field}: need {needed} bytes, {remaining} remaining")]
    Truncated {
        field: &'static str,
        needed: usize,
        remaining: usize,
    },

    #[error("{0} trailing bytes after payload")]
    TrailingBytes(usize),
}

/// A value that cannot be represented under the fixed length-prefix widths
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{field} too long: {len} bytes (max: 65535)")]
    FieldTooLong { field: &'static str, len: usize },

    #[error("Payload too long: {0} bytes")]
    PayloadTooLong(usize),
}

/// Decoded message header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Raw message type; unknown codes are kept so callers can report them
    pub msg_type: u8,
    /// Payload byte count
    pub payload_len: u32,
}

impl Header {
    pub fn message_type(&self) -> Option<MessageType> {
        MessageType::try_from(self.msg_type).ok()
    }
}

/// Encode a header for a payload of `payload_len` bytes
pub fn encode_header(msg_type: MessageType, payload_len: u32) -> [u8; HEADER_SIZE] {
    let mut out = [0u8; HEADER_SIZE];
    let mut buf = &mut out[..];
    buf.put_u32(MAGIC);
    buf.put_u8(PROTOCOL_VERSION);
    buf.put_u8(msg_type.into());
    buf.put_u32(payload_len);
    buf.put_u16(0);
    out
}

/// Decode and validate the first 12 bytes of `bytes`
pub fn decode_header(bytes: &[u8]) -> Result<Header, FramingError> {
    if bytes.len() < HEADER_SIZE {
        return Err(FramingError::ShortHeader(bytes.len()));
    }

    let mut buf = &bytes[..HEADER_SIZE];
    let magic = buf.get_u32();
    if magic != MAGIC {
        return Err(FramingError::BadMagic(magic));
    }

    let version = buf.get_u8();
    if version != PROTOCOL_VERSION {
        return Err(FramingError::BadVersion(version));
    }

    let msg_type = buf.get_u8();
    let payload_len = buf.get_u32();
    // reserved: ignored on read
    let _ = buf.get_u16();

    Ok(Header {
        msg_type,
        payload_len,
    })
}

/// Header followed by payload, ready for a single write
pub fn encode_frame(msg_type: MessageType, payload: &[u8]) -> Result<BytesMut, ValidationError> {
    let len = u32::try_from(payload.len())
        .map_err(|_| ValidationError::PayloadTooLong(payload.len()))?;

    let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    buf.put_slice(&encode_header(msg_type, len));
    buf.put_slice(payload);
    Ok(buf)
}

/// A complete frame read off the wire
#[derive(Debug, Clone)]
pub struct Frame {
    pub header: Header,
    pub payload: Bytes,
}

/// Incrementally decodes frames from a growing buffer
pub struct FrameDecoder {
    state: DecodeState,
    max_payload: usize,
}

#[derive(Debug, Clone, Copy, Default)]
enum DecodeState {
    #[default]
    Header,
    Payload { header: Header },
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::with_max_payload(MAX_PAYLOAD_SIZE)
    }

    pub fn with_max_payload(max_payload: usize) -> Self {
        Self {
            state: DecodeState::Header,
            max_payload,
        }
    }

    /// Attempt to decode a frame from the buffer
    /// Returns Ok(None) if more data is needed
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>, FramingError> {
        loop {
            match self.state {
                DecodeState::Header => {
                    if buf.len() < HEADER_SIZE {
                        return Ok(None);
                    }

                    let header = decode_header(&buf[..HEADER_SIZE])?;
                    let length = header.payload_len as usize;
                    if length > self.max_payload {
                        return Err(FramingError::PayloadTooLarge(length, self.max_payload));
                    }

                    buf.advance(HEADER_SIZE);
                    self.state = DecodeState::Payload { header };
                }
                DecodeState::Payload { header } => {
                    let length = header.payload_len as usize;
                    if buf.len() < length {
                        return Ok(None);
                    }

                    let payload = buf.split_to(length).freeze();
                    self.state = DecodeState::Header;

                    return Ok(Some(Frame { header, payload }));
                }
            }
        }
    }

    /// Payload length still owed by the peer, once a header has been consumed
    pub fn pending_payload(&self) -> Option<usize> {
        match self.state {
            DecodeState::Header => None,
            DecodeState::Payload { header } => Some(header.payload_len as usize),
        }
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Append a `u16` length-prefixed string field
pub fn put_string(
    buf: &mut BytesMut,
    field: &'static str,
    value: &str,
) -> Result<(), ValidationError> {
    let len = value.len();
    if len > MAX_FIELD_LEN {
        return Err(ValidationError::FieldTooLong { field, len });
    }
    buf.put_u16(len as u16);
    buf.put_slice(value.as_bytes());
    Ok(())
}

/// Bounds-checked reader over a payload slice
pub struct PayloadReader<'a> {
    buf: &'a [u8],
}

impl<'a> PayloadReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    fn ensure(&self, field: &'static str, needed: usize) -> Result<(), FramingError> {
        if self.buf.len() < needed {
            return Err(FramingError::Truncated {
                field,
                needed,
                remaining: self.buf.len(),
            });
        }
        Ok(())
    }

    pub fn read_u8(&mut self, field: &'static str) -> Result<u8, FramingError> {
        self.ensure(field, 1)?;
        Ok(self.buf.get_u8())
    }

    pub fn read_u16(&mut self, field: &'static str) -> Result<u16, FramingError> {
        self.ensure(field, 2)?;
        Ok(self.buf.get_u16())
    }

    pub fn read_u64(&mut self, field: &'static str) -> Result<u64, FramingError> {
        self.ensure(field, 8)?;
        Ok(self.buf.get_u64())
    }

    /// Read a length-prefixed string; invalid UTF-8 is replaced, not rejected
    pub fn read_string(&mut self, field: &'static str) -> Result<String, FramingError> {
        let len = self.read_u16(field)? as usize;
        self.ensure(field, len)?;
        let (value, rest) = self.buf.split_at(len);
        self.buf = rest;
        Ok(String::from_utf8_lossy(value).into_owned())
    }

    /// Fail if any bytes are left over
    pub fn finish(self) -> Result<(), FramingError> {
        if self.buf.is_empty() {
            Ok(())
        } else {
            Err(FramingError::TrailingBytes(self.buf.len()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_roundtrip() {
        let cases = [
            (MessageType::Ping, 0u32),
            (MessageType::LoginRequest, 17),
            (MessageType::OnlineListResponse, u16::MAX as u32),
            (MessageType::RegisterResponse, u32::MAX),
        ];

        for (msg_type, len) in cases {
            let header = decode_header(&encode_header(msg_type, len)).unwrap();
            assert_eq!(header.msg_type, u8::from(msg_type));
            assert_eq!(header.payload_len, len);
            assert_eq!(header.message_type(), Some(msg_type));
        }
    }

    #[test]
    fn test_header_layout() {
        let bytes = encode_header(MessageType::OnlineListRequest, 0x0102_0304);
        assert_eq!(
            bytes,
            [0x46, 0x53, 0x58, 0x31, 0x01, 20, 0x01, 0x02, 0x03, 0x04, 0x00, 0x00]
        );
    }

    #[test]
    fn test_short_header() {
        let bytes = encode_header(MessageType::Ping, 4);
        for len in 0..HEADER_SIZE {
            assert_eq!(decode_header(&bytes[..len]), Err(FramingError::ShortHeader(len)));
        }
    }

    #[test]
    fn test_bad_magic_and_version() {
        let mut bytes = encode_header(MessageType::Ping, 0);
        bytes[0] = 0x00;
        assert!(matches!(decode_header(&bytes), Err(FramingError::BadMagic(_))));

        let mut bytes = encode_header(MessageType::Ping, 0);
        bytes[4] = 2;
        assert_eq!(decode_header(&bytes), Err(FramingError::BadVersion(2)));
    }

    #[test]
    fn test_reserved_ignored() {
        let mut bytes = encode_header(MessageType::Pong, 3);
        bytes[10] = 0xAB;
        bytes[11] = 0xCD;
        let header = decode_header(&bytes).unwrap();
        assert_eq!(header.payload_len, 3);
    }

    #[test]
    fn test_decoder_partial_reads() {
        let frame = encode_frame(MessageType::Ping, b"ping").unwrap();
        let mut decoder = FrameDecoder::new();
        let mut buf = BytesMut::new();

        // Feed one byte at a time; no frame until the last byte lands
        for (i, byte) in frame.iter().enumerate() {
            buf.put_u8(*byte);
            let decoded = decoder.decode(&mut buf).unwrap();
            if i + 1 < frame.len() {
                assert!(decoded.is_none());
            } else {
                let decoded = decoded.unwrap();
                assert_eq!(decoded.header.message_type(), Some(MessageType::Ping));
                assert_eq!(&decoded.payload[..], b"ping");
            }
        }
        assert!(decoder.pending_payload().is_none());
    }

    #[test]
    fn test_decoder_reports_pending_payload() {
        let frame = encode_frame(MessageType::Pong, b"pong").unwrap();
        let mut decoder = FrameDecoder::new();
        let mut buf = BytesMut::from(&frame[..HEADER_SIZE + 2]);

        assert!(decoder.decode(&mut buf).unwrap().is_none());
        assert_eq!(decoder.pending_payload(), Some(4));
    }

    #[test]
    fn test_decoder_rejects_oversized_payload() {
        let mut decoder = FrameDecoder::with_max_payload(8);
        let mut buf = BytesMut::from(&encode_header(MessageType::Pong, 9)[..]);
        assert_eq!(
            decoder.decode(&mut buf).unwrap_err(),
            FramingError::PayloadTooLarge(9, 8)
        );
    }

    #[test]
    fn test_string_field_too_long() {
        let mut buf = BytesMut::new();
        let long = "x".repeat(MAX_FIELD_LEN + 1);
        assert_eq!(
            put_string(&mut buf, "username", &long),
            Err(ValidationError::FieldTooLong {
                field: "username",
                len: MAX_FIELD_LEN + 1
            })
        );
        assert!(buf.is_empty());

        let max = "y".repeat(MAX_FIELD_LEN);
        assert!(put_string(&mut buf, "username", &max).is_ok());
        assert_eq!(buf.len(), 2 + MAX_FIELD_LEN);
    }

    #[test]
    fn test_reader_truncated_string() {
        let mut reader = PayloadReader::new(&[0x00, 0x05, b'a', b'b']);
        assert_eq!(
            reader.read_string("message"),
            Err(FramingError::Truncated {
                field: "message",
                needed: 5,
                remaining: 2
            })
        );
    }

    #[test]
    fn test_reader_lossy_utf8() {
        let mut reader = PayloadReader::new(&[0x00, 0x02, 0xFF, b'a']);
        assert_eq!(reader.read_string("username").unwrap(), "\u{FFFD}a");
        assert!(reader.finish().is_ok());
    }
}
