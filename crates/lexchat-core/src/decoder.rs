//! Line framing for the streaming body.
//!
//! Network reads end wherever they like: in the middle of a line, or in the
//! middle of a multi-byte character. The decoder keeps the unfinished tail
//! as raw bytes and only hands out complete `data: ` payloads.

use tracing::{debug, trace};

use crate::error::{ChatError, ChatResult};

pub const DATA_PREFIX: &[u8] = b"data: ";

#[derive(Debug, Default)]
pub struct FrameDecoder {
    carry: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one read. Returns the trimmed payload of every `data: ` line the
    /// read completed, in order. Other lines (blank keep-alives, comments,
    /// `event:` fields) are skipped.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<ChatResult<String>> {
        self.carry.extend_from_slice(chunk);

        let mut frames = Vec::new();
        let mut start = 0;
        while let Some(pos) = self.carry[start..].iter().position(|b| *b == b'\n') {
            let end = start + pos;
            if let Some(frame) = frame_line(&self.carry[start..end]) {
                frames.push(frame);
            }
            start = end + 1;
        }
        self.carry.drain(..start);

        frames
    }

    /// Bytes held back waiting for a line break.
    pub fn pending(&self) -> usize {
        self.carry.len()
    }

    /// Close the stream. An unterminated tail is dropped, never parsed.
    pub fn finish(&mut self) {
        if !self.carry.is_empty() {
            debug!(
                bytes = self.carry.len(),
                tail = %String::from_utf8_lossy(&self.carry),
                "dropping unterminated final line"
            );
        }
        self.carry.clear();
    }
}

fn frame_line(raw: &[u8]) -> Option<ChatResult<String>> {
    let line = raw.strip_suffix(b"\r").unwrap_or(raw);
    let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
        if !line.is_empty() {
            trace!(line = %String::from_utf8_lossy(line), "skipping non-data line");
        }
        return None;
    };

    Some(match std::str::from_utf8(payload) {
        Ok(text) => Ok(text.trim().to_string()),
        Err(err) => Err(ChatError::decode(
            String::from_utf8_lossy(line),
            err.to_string(),
        )),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payloads(frames: Vec<ChatResult<String>>) -> Vec<String> {
        frames.into_iter().map(|f| f.unwrap()).collect()
    }

    #[test]
    fn test_complete_lines_in_one_chunk() {
        let mut decoder = FrameDecoder::new();
        let frames = decoder.feed(b"data: {\"text\":\"A\"}\n\ndata: {\"text\":\"B\"}\n\n");
        assert_eq!(payloads(frames), vec![r#"{"text":"A"}"#, r#"{"text":"B"}"#]);
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn test_line_split_across_reads() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.feed(b"data: {\"te").is_empty());
        assert_eq!(decoder.pending(), 10);

        let frames = decoder.feed(b"xt\":\"A\"}\ndata: ");
        assert_eq!(payloads(frames), vec![r#"{"text":"A"}"#]);
        assert_eq!(decoder.pending(), 6);
    }

    #[test]
    fn test_multibyte_character_split_across_reads() {
        let line = "data: {\"text\":\"公司法\"}\n".as_bytes();
        // Split inside the three-byte encoding of 公.
        let split = line.iter().position(|b| *b == 0xE5).unwrap() + 1;

        let mut decoder = FrameDecoder::new();
        assert!(decoder.feed(&line[..split]).is_empty());
        let frames = decoder.feed(&line[split..]);
        assert_eq!(payloads(frames), vec![r#"{"text":"公司法"}"#]);
    }

    #[test]
    fn test_non_data_lines_are_skipped() {
        let mut decoder = FrameDecoder::new();
        let frames = decoder.feed(b": keep-alive\n\nevent: message\ndata:{\"text\":\"x\"}\ndata: [DONE]\n");
        // `data:` without the space is not a data line.
        assert_eq!(payloads(frames), vec!["[DONE]"]);
    }

    #[test]
    fn test_crlf_line_endings() {
        let mut decoder = FrameDecoder::new();
        let frames = decoder.feed(b"data: {\"text\":\"A\"}\r\n\r\n");
        assert_eq!(payloads(frames), vec![r#"{"text":"A"}"#]);
    }

    #[test]
    fn test_invalid_utf8_is_a_decode_error() {
        let mut decoder = FrameDecoder::new();
        let frames = decoder.feed(b"data: \xff\xfe\n");
        assert!(matches!(frames[0], Err(ChatError::Decode { .. })));
    }

    #[test]
    fn test_finish_drops_unterminated_tail() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.feed(b"data: {\"text\":\"never terminated\"}").is_empty());
        decoder.finish();
        assert_eq!(decoder.pending(), 0);
    }
}
