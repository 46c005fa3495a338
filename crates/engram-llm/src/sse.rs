//! Server-sent events framing shared by the SSE-based adapters.
//!
//! [`SseBuffer`] accepts raw response bytes in arbitrary pieces and yields
//! complete events. It copes with multi-byte UTF-8 characters split across
//! network reads, `\r\n` line endings, comment lines, and multi-line
//! `data:` fields.

use crate::error::LlmError;

/// Maximum buffered, not-yet-terminated event size.
const MAX_BUF: usize = 16 * 1024 * 1024; // 16 MiB

/// One server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// The `event:` field, if present.
    pub event: Option<String>,
    /// All `data:` lines, joined with `\n`.
    pub data: String,
}

/// Incremental SSE parser.
#[derive(Debug, Default)]
pub struct SseBuffer {
    text: String,
    utf8: Vec<u8>,
}

impl SseBuffer {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds raw bytes and returns every event completed by them.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<SseEvent>, LlmError> {
        self.utf8.extend_from_slice(chunk);
        self.decode_utf8()?;

        if self.text.len() > MAX_BUF {
            return Err(LlmError::decode(
                "SSE stream buffer exceeded 16 MiB",
                String::new(),
            ));
        }
        if self.text.contains('\r') {
            self.text = self.text.replace("\r\n", "\n");
        }

        let mut events = Vec::new();
        while let Some(pos) = self.text.find("\n\n") {
            let block: String = self.text.drain(..pos + 2).collect();
            if let Some(event) = parse_block(&block) {
                events.push(event);
            }
        }
        Ok(events)
    }

    /// Flushes a trailing event that was not followed by a blank line.
    pub fn finish(&mut self) -> Result<Option<SseEvent>, LlmError> {
        if !self.utf8.is_empty() {
            let raw = String::from_utf8_lossy(&self.utf8).into_owned();
            self.utf8.clear();
            return Err(LlmError::decode("SSE stream ended inside a UTF-8 character", raw));
        }
        let block = std::mem::take(&mut self.text);
        Ok(parse_block(&block))
    }

    fn decode_utf8(&mut self) -> Result<(), LlmError> {
        match std::str::from_utf8(&self.utf8) {
            Ok(text) => {
                self.text.push_str(text);
                self.utf8.clear();
                Ok(())
            }
            Err(e) if e.error_len().is_some() => {
                let raw = String::from_utf8_lossy(&self.utf8).into_owned();
                Err(LlmError::decode("SSE stream is not valid UTF-8", raw))
            }
            Err(e) => {
                // Incomplete character at the end: keep the tail for the next read.
                let valid_up_to = e.valid_up_to();
                if let Ok(valid) = std::str::from_utf8(&self.utf8[..valid_up_to]) {
                    self.text.push_str(valid);
                }
                self.utf8.drain(..valid_up_to);
                Ok(())
            }
        }
    }
}

fn parse_block(block: &str) -> Option<SseEvent> {
    let mut event = None;
    let mut data: Option<String> = None;
    for line in block.lines() {
        if line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => event = Some(value.to_owned()),
            "data" => match &mut data {
                Some(existing) => {
                    existing.push('\n');
                    existing.push_str(value);
                }
                None => data = Some(value.to_owned()),
            },
            _ => {}
        }
    }
    data.map(|data| SseEvent { event, data })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_event() {
        let mut buf = SseBuffer::new();
        let events = buf.push(b"data: {\"a\":1}\n\n").unwrap();
        assert_eq!(
            events,
            vec![SseEvent {
                event: None,
                data: "{\"a\":1}".into()
            }]
        );
    }

    #[test]
    fn test_event_split_across_reads() {
        let mut buf = SseBuffer::new();
        assert!(buf.push(b"event: ping\nda").unwrap().is_empty());
        assert!(buf.push(b"ta: {}\n").unwrap().is_empty());
        let events = buf.push(b"\n").unwrap();
        assert_eq!(events[0].event.as_deref(), Some("ping"));
        assert_eq!(events[0].data, "{}");
    }

    #[test]
    fn test_crlf_line_endings() {
        let mut buf = SseBuffer::new();
        let mut events = buf.push(b"data: one\r").unwrap();
        events.extend(buf.push(b"\n\r\ndata: two\r\n\r\n").unwrap());
        let data: Vec<_> = events.into_iter().map(|e| e.data).collect();
        assert_eq!(data, ["one", "two"]);
    }

    #[test]
    fn test_multibyte_character_split() {
        let bytes = "data: sää\n\n".as_bytes();
        // Split inside the first 'ä' (two bytes).
        let split = "data: s".len() + 1;
        let mut buf = SseBuffer::new();
        assert!(buf.push(&bytes[..split]).unwrap().is_empty());
        let events = buf.push(&bytes[split..]).unwrap();
        assert_eq!(events[0].data, "sää");
    }

    #[test]
    fn test_invalid_utf8_fails() {
        let mut buf = SseBuffer::new();
        let err = buf.push(b"data: \xff\xfe\n\n").unwrap_err();
        assert!(matches!(err, LlmError::ResponseFormat { .. }));
    }

    #[test]
    fn test_comments_and_fieldless_blocks_are_skipped() {
        let mut buf = SseBuffer::new();
        let events = buf.push(b": keep-alive\n\nevent: x\n\ndata: y\n\n").unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "y");
    }

    #[test]
    fn test_multiline_data_is_joined() {
        let mut buf = SseBuffer::new();
        let events = buf.push(b"data: a\ndata: b\n\n").unwrap();
        assert_eq!(events[0].data, "a\nb");
    }

    #[test]
    fn test_data_without_space() {
        let mut buf = SseBuffer::new();
        let events = buf.push(b"data:[DONE]\n\n").unwrap();
        assert_eq!(events[0].data, "[DONE]");
    }

    #[test]
    fn test_finish_flushes_unterminated_event() {
        let mut buf = SseBuffer::new();
        assert!(buf.push(b"data: [DONE]\n").unwrap().is_empty());
        let last = buf.finish().unwrap().unwrap();
        assert_eq!(last.data, "[DONE]");
        assert!(buf.finish().unwrap().is_none());
    }

    #[test]
    fn test_finish_inside_utf8_character_fails() {
        let mut buf = SseBuffer::new();
        buf.push(&"data: ä".as_bytes()[..7]).unwrap();
        assert!(buf.finish().is_err());
    }
}
