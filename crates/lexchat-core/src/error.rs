//! Error taxonomy for a single exchange.
//!
//! Only [`ChatError::Transport`] and [`ChatError::Upstream`] ever reach the
//! user. Decode and auxiliary failures are contained by the component that
//! detected them and only show up in logs.

use thiserror::Error;

use crate::state::ExchangePhase;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChatError {
    /// Network failure or a non-2xx response without a usable body.
    #[error("{}", transport_message(.status, .message))]
    Transport {
        status: Option<u16>,
        message: String,
    },

    /// Explicit error event carried inside the stream.
    #[error("{0}")]
    Upstream(String),

    /// One malformed event line. Decoding continues after it.
    #[error("malformed event line {line:?}: {reason}")]
    Decode { line: String, reason: String },

    /// Refinement or related-questions request failed.
    #[error("auxiliary request failed: {0}")]
    Auxiliary(String),

    /// A submission arrived while another exchange was in flight.
    #[error("an exchange is already in flight")]
    Busy,

    #[error("invalid transition from {from:?} on {event}")]
    InvalidTransition {
        from: ExchangePhase,
        event: &'static str,
    },
}

fn transport_message(status: &Option<u16>, message: &str) -> String {
    match status {
        Some(code) => format!("request failed ({}): {}", code, message),
        None => format!("request failed: {}", message),
    }
}

impl ChatError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            status: None,
            message: message.into(),
        }
    }

    pub fn http_status(status: u16, message: impl Into<String>) -> Self {
        Self::Transport {
            status: Some(status),
            message: message.into(),
        }
    }

    pub fn decode(line: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Decode {
            line: line.into(),
            reason: reason.into(),
        }
    }

    /// Whether the error is surfaced inline to the user.
    pub fn is_user_visible(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::Upstream(_))
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport {
            status: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
        }
    }
}

pub type ChatResult<T> = std::result::Result<T, ChatError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transport_and_upstream_are_user_visible() {
        assert!(ChatError::transport("connection refused").is_user_visible());
        assert!(ChatError::Upstream("rate limited".into()).is_user_visible());
        assert!(!ChatError::decode("data: {", "eof").is_user_visible());
        assert!(!ChatError::Auxiliary("refine".into()).is_user_visible());
        assert!(!ChatError::Busy.is_user_visible());
    }

    #[test]
    fn test_transport_message_includes_status() {
        let err = ChatError::http_status(502, "bad gateway");
        assert_eq!(err.to_string(), "request failed (502): bad gateway");
        assert_eq!(
            ChatError::transport("timed out").to_string(),
            "request failed: timed out"
        );
    }
}
