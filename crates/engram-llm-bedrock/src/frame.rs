//! AWS event-stream binary framing.
//!
//! Bedrock's streaming responses use the `application/vnd.amazon.eventstream`
//! encoding: a sequence of self-delimiting frames, each laid out as
//!
//! ```text
//! ┌─────────────┬──────────────┬─────────────┬─────────┬─────────┬─────────────┐
//! │ total_len   │ headers_len  │ prelude_crc │ headers │ payload │ message_crc │
//! │ u32 BE      │ u32 BE       │ u32 BE      │         │         │ u32 BE      │
//! └─────────────┴──────────────┴─────────────┴─────────┴─────────┴─────────────┘
//! ```
//!
//! Both checksums are CRC-32 (IEEE). The prelude CRC covers the first eight
//! bytes; the message CRC covers everything before it.

use bytes::{Buf, Bytes, BytesMut};
use engram_llm::error::LlmError;

const PRELUDE_LEN: usize = 12;
const CRC_LEN: usize = 4;
const MIN_FRAME_LEN: usize = PRELUDE_LEN + CRC_LEN;
const MAX_FRAME_LEN: usize = 16 * 1024 * 1024; // 16 MiB

/// A typed header value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum HeaderValue {
    Bool(bool),
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Bytes(Bytes),
    String(String),
    Timestamp(i64),
    Uuid([u8; 16]),
}

/// One decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Frame {
    pub headers: Vec<(String, HeaderValue)>,
    pub payload: Bytes,
}

impl Frame {
    /// The value of a string header, if present.
    pub(crate) fn header_str(&self, name: &str) -> Option<&str> {
        self.headers.iter().find_map(|(n, v)| match v {
            HeaderValue::String(s) if n == name => Some(s.as_str()),
            _ => None,
        })
    }
}

/// Reassembles frames from arbitrarily split response bytes.
#[derive(Debug, Default)]
pub(crate) struct FrameBuffer {
    buf: BytesMut,
}

impl FrameBuffer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Appends response bytes.
    pub(crate) fn extend(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Removes and decodes the next fully buffered frame.
    pub(crate) fn next_frame(&mut self) -> Result<Option<Frame>, LlmError> {
        let Some(total_len) = self.next_frame_len()? else {
            return Ok(None);
        };
        let raw = self.buf.split_to(total_len).freeze();
        decode_frame(raw).map(Some)
    }

    /// Returns `true` if no partial frame is buffered.
    pub(crate) fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Length of the next frame if it is fully buffered.
    fn next_frame_len(&self) -> Result<Option<usize>, LlmError> {
        if self.buf.len() < PRELUDE_LEN {
            return Ok(None);
        }
        let mut prelude = &self.buf[..PRELUDE_LEN];
        let total_len = prelude.get_u32() as usize;
        let headers_len = prelude.get_u32() as usize;
        let prelude_crc = prelude.get_u32();

        let expected = crc32fast::hash(&self.buf[..8]);
        if prelude_crc != expected {
            return Err(LlmError::decode(
                format!("event-stream prelude CRC mismatch: {prelude_crc:#010x} != {expected:#010x}"),
                hex_preview(&self.buf),
            ));
        }
        if total_len < MIN_FRAME_LEN + headers_len || total_len > MAX_FRAME_LEN {
            return Err(LlmError::decode(
                format!("invalid event-stream frame length {total_len} (headers {headers_len})"),
                hex_preview(&self.buf),
            ));
        }
        Ok((self.buf.len() >= total_len).then_some(total_len))
    }
}

fn decode_frame(raw: Bytes) -> Result<Frame, LlmError> {
    let body_end = raw.len() - CRC_LEN;
    let message_crc = (&raw[body_end..]).get_u32();
    let expected = crc32fast::hash(&raw[..body_end]);
    if message_crc != expected {
        return Err(LlmError::decode(
            format!("event-stream message CRC mismatch: {message_crc:#010x} != {expected:#010x}"),
            hex_preview(&raw),
        ));
    }

    let headers_len = (&raw[4..8]).get_u32() as usize;
    let headers_end = PRELUDE_LEN + headers_len;
    let headers = decode_headers(raw.slice(PRELUDE_LEN..headers_end))?;
    let payload = raw.slice(headers_end..body_end);
    Ok(Frame { headers, payload })
}

fn decode_headers(mut buf: Bytes) -> Result<Vec<(String, HeaderValue)>, LlmError> {
    let mut headers = Vec::new();
    while buf.has_remaining() {
        let name_len = usize::from(buf.get_u8());
        let name = take_string(&mut buf, name_len)?;
        need(&buf, 1)?;
        let value = match buf.get_u8() {
            0 => HeaderValue::Bool(true),
            1 => HeaderValue::Bool(false),
            2 => {
                need(&buf, 1)?;
                HeaderValue::Byte(buf.get_i8())
            }
            3 => {
                need(&buf, 2)?;
                HeaderValue::Short(buf.get_i16())
            }
            4 => {
                need(&buf, 4)?;
                HeaderValue::Int(buf.get_i32())
            }
            5 => {
                need(&buf, 8)?;
                HeaderValue::Long(buf.get_i64())
            }
            6 => {
                need(&buf, 2)?;
                let len = usize::from(buf.get_u16());
                need(&buf, len)?;
                HeaderValue::Bytes(buf.split_to(len))
            }
            7 => {
                need(&buf, 2)?;
                let len = usize::from(buf.get_u16());
                HeaderValue::String(take_string(&mut buf, len)?)
            }
            8 => {
                need(&buf, 8)?;
                HeaderValue::Timestamp(buf.get_i64())
            }
            9 => {
                need(&buf, 16)?;
                let mut uuid = [0u8; 16];
                buf.copy_to_slice(&mut uuid);
                HeaderValue::Uuid(uuid)
            }
            other => {
                return Err(LlmError::decode(
                    format!("unknown event-stream header type {other} for {name}"),
                    String::new(),
                ));
            }
        };
        headers.push((name, value));
    }
    Ok(headers)
}

fn need(buf: &Bytes, len: usize) -> Result<(), LlmError> {
    if buf.remaining() < len {
        return Err(LlmError::decode(
            "event-stream header truncated",
            hex_preview(buf),
        ));
    }
    Ok(())
}

fn take_string(buf: &mut Bytes, len: usize) -> Result<String, LlmError> {
    need(buf, len)?;
    let raw = buf.split_to(len);
    String::from_utf8(raw.to_vec())
        .map_err(|_| LlmError::decode("event-stream header is not UTF-8", hex_preview(&raw)))
}

/// First bytes of a buffer as hex, for error reports.
fn hex_preview(bytes: &[u8]) -> String {
    bytes
        .iter()
        .take(64)
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(" ")
}


#[cfg(test)]
mod tests {
    use bytes::BufMut;
    use pretty_assertions::assert_eq;

    use super::testing::encode;
    use super::*;

    fn push(buf: &mut FrameBuffer, chunk: &[u8]) -> Result<Vec<Frame>, LlmError> {
        buf.extend(chunk);
        let mut frames = Vec::new();
        while let Some(frame) = buf.next_frame()? {
            frames.push(frame);
        }
        Ok(frames)
    }

    fn chunk_frame(payload: &str) -> Vec<u8> {
        encode(
            &[
                (":event-type", "chunk"),
                (":content-type", "application/json"),
                (":message-type", "event"),
            ],
            payload.as_bytes(),
        )
    }

    #[test]
    fn test_single_frame() {
        let mut buf = FrameBuffer::new();
        let frames = push(&mut buf, &chunk_frame(r#"{"bytes":"e30="}"#)).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].header_str(":event-type"), Some("chunk"));
        assert_eq!(frames[0].header_str(":message-type"), Some("event"));
        assert_eq!(&frames[0].payload[..], br#"{"bytes":"e30="}"#);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_frames_split_at_every_byte() {
        let mut wire = chunk_frame("one");
        wire.extend(chunk_frame("two"));
        let mut buf = FrameBuffer::new();
        let mut payloads = Vec::new();
        for byte in &wire {
            for frame in push(&mut buf, std::slice::from_ref(byte)).unwrap() {
                payloads.push(frame.payload);
            }
        }
        assert_eq!(payloads, vec![Bytes::from("one"), Bytes::from("two")]);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_partial_frame_is_held() {
        let wire = chunk_frame("held");
        let mut buf = FrameBuffer::new();
        assert!(push(&mut buf, &wire[..wire.len() - 1]).unwrap().is_empty());
        assert!(!buf.is_empty());
    }

    #[test]
    fn test_corrupt_payload_fails_message_crc() {
        let mut wire = chunk_frame("payload");
        let last_payload_byte = wire.len() - 5;
        wire[last_payload_byte] ^= 0xff;
        let err = push(&mut FrameBuffer::new(), &wire).unwrap_err();
        assert!(
            matches!(err, LlmError::ResponseFormat { ref message, .. } if message.contains("message CRC"))
        );
    }

    #[test]
    fn test_valid_frame_before_corrupt_one_is_returned() {
        let mut wire = chunk_frame("good");
        let mut bad = chunk_frame("bad");
        let last = bad.len() - 1;
        bad[last] ^= 0xff;
        wire.extend(bad);
        let mut buf = FrameBuffer::new();
        buf.extend(&wire);
        let first = buf.next_frame().unwrap().unwrap();
        assert_eq!(&first.payload[..], b"good");
        assert!(buf.next_frame().is_err());
    }

    #[test]
    fn test_corrupt_prelude_fails() {
        let mut wire = chunk_frame("payload");
        wire[3] ^= 0x01;
        let err = push(&mut FrameBuffer::new(), &wire).unwrap_err();
        assert!(
            matches!(err, LlmError::ResponseFormat { ref message, .. } if message.contains("prelude CRC"))
        );
    }

    #[test]
    fn test_typed_headers() {
        let mut headers = Vec::new();
        headers.put_u8(4);
        headers.put_slice(b"flag");
        headers.put_u8(1);
        headers.put_u8(3);
        headers.put_slice(b"num");
        headers.put_u8(4);
        headers.put_i32(-7);
        headers.put_u8(2);
        headers.put_slice(b"id");
        headers.put_u8(9);
        headers.put_slice(&[0xab; 16]);

        let decoded = decode_headers(Bytes::from(headers)).unwrap();
        assert_eq!(
            decoded,
            vec![
                ("flag".to_string(), HeaderValue::Bool(false)),
                ("num".to_string(), HeaderValue::Int(-7)),
                ("id".to_string(), HeaderValue::Uuid([0xab; 16])),
            ]
        );
    }

    #[test]
    fn test_truncated_header_value() {
        let mut headers = Vec::new();
        headers.put_u8(1);
        headers.put_slice(b"x");
        headers.put_u8(7);
        headers.put_u16(10);
        headers.put_slice(b"short");
        assert!(decode_headers(Bytes::from(headers)).is_err());
    }
}
