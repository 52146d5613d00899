//! Classifies decoded payloads and folds tokens into the response buffer.

use tracing::debug;

use crate::decoder::FrameDecoder;
use crate::error::{ChatError, ChatResult};
use crate::protocol::StreamPayload;

pub const DONE_SENTINEL: &str = "[DONE]";

/// One classified stream event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedEvent {
    Token(String),
    Error(String),
    Terminator,
}

impl DecodedEvent {
    /// `Ok(None)` for well-formed payloads that carry nothing to act on.
    pub fn parse(payload: &str) -> ChatResult<Option<DecodedEvent>> {
        if payload == DONE_SENTINEL {
            return Ok(Some(DecodedEvent::Terminator));
        }

        let parsed: StreamPayload =
            serde_json::from_str(payload).map_err(|e| ChatError::decode(payload, e.to_string()))?;

        Ok(match (parsed.text, parsed.error) {
            (Some(text), _) if !text.is_empty() => Some(DecodedEvent::Token(text)),
            (_, Some(error)) if !error.is_empty() => Some(DecodedEvent::Error(error)),
            _ => None,
        })
    }
}

/// Result of applying one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// A token was appended; carries the delta.
    Progress(String),
    /// Nothing to do: unknown shape, or a token after failure.
    Ignored,
    /// The frame was malformed and skipped.
    Recovered(ChatError),
    /// The stream reported an error. Later tokens are ignored.
    Fatal(ChatError),
    /// The optional sentinel. Not authoritative: the stream ends on close.
    Terminated,
}

#[derive(Debug, Default)]
pub struct EventInterpreter {
    buffer: String,
    failure: Option<String>,
}

impl EventInterpreter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, frame: ChatResult<String>) -> Step {
        let event = match frame.and_then(|payload| DecodedEvent::parse(&payload)) {
            Ok(Some(event)) => event,
            Ok(None) => return Step::Ignored,
            Err(err) => {
                debug!(error = %err, "skipping malformed event");
                return Step::Recovered(err);
            }
        };

        match event {
            DecodedEvent::Terminator => Step::Terminated,
            _ if self.failure.is_some() => Step::Ignored,
            DecodedEvent::Token(text) => {
                self.buffer.push_str(&text);
                Step::Progress(text)
            }
            DecodedEvent::Error(message) => {
                self.failure = Some(message.clone());
                Step::Fatal(ChatError::Upstream(message))
            }
        }
    }

    pub fn text(&self) -> &str {
        &self.buffer
    }

    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    /// Final text, or the first upstream error seen.
    pub fn into_result(self) -> ChatResult<String> {
        match self.failure {
            Some(message) => Err(ChatError::Upstream(message)),
            None => Ok(self.buffer),
        }
    }
}

/// Decode and interpret a whole stream given as a sequence of reads.
pub fn fold_chunks<'a, I>(chunks: I) -> ChatResult<String>
where
    I: IntoIterator<Item = &'a [u8]>,
{
    let mut decoder = FrameDecoder::new();
    let mut interpreter = EventInterpreter::new();
    for chunk in chunks {
        for frame in decoder.feed(chunk) {
            interpreter.apply(frame);
        }
    }
    decoder.finish();
    interpreter.into_result()
}
