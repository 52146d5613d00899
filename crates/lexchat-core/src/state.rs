//! UI-agnostic conversation state types
//!
//! These are shared between front ends and carry no dependency on any
//! specific UI framework.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Default number of retained turns (five exchanges).
pub const DEFAULT_HISTORY_CAP: usize = 10;

/// The role of a conversation turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

/// One message in the conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: ChatRole,
    pub content: String,
}

impl ConversationTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Bounded, ordered context sent along with AI submissions.
///
/// Turns are only ever committed in user/assistant pairs, so the length is
/// always even. When the cap is exceeded the oldest pair goes first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationHistory {
    turns: VecDeque<ConversationTurn>,
    cap: usize,
}

impl Default for ConversationHistory {
    fn default() -> Self {
        Self::with_cap(DEFAULT_HISTORY_CAP)
    }
}

impl ConversationHistory {
    /// Odd caps are rounded down so trimming never splits a pair.
    pub fn with_cap(cap: usize) -> Self {
        Self {
            turns: VecDeque::new(),
            cap: cap - cap % 2,
        }
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn turns(&self) -> impl Iterator<Item = &ConversationTurn> {
        self.turns.iter()
    }

    /// Snapshot in wire order (oldest first).
    pub fn to_vec(&self) -> Vec<ConversationTurn> {
        self.turns.iter().cloned().collect()
    }

    pub(crate) fn commit_pair(&mut self, user: ConversationTurn, assistant: ConversationTurn) {
        self.turns.push_back(user);
        self.turns.push_back(assistant);
        self.trim();
    }

    pub(crate) fn clear(&mut self) {
        self.turns.clear();
    }

    fn trim(&mut self) {
        while self.turns.len() > self.cap {
            self.turns.pop_front();
            self.turns.pop_front();
        }
    }
}

/// Lifecycle of the single in-flight exchange.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ExchangeState {
    #[default]
    Idle,
    Sending,
    Streaming(String),
    Settled(String),
    Failed(String),
}

/// Tag of an [`ExchangeState`] without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangePhase {
    Idle,
    Sending,
    Streaming,
    Settled,
    Failed,
}

impl ExchangeState {
    pub fn phase(&self) -> ExchangePhase {
        match self {
            ExchangeState::Idle => ExchangePhase::Idle,
            ExchangeState::Sending => ExchangePhase::Sending,
            ExchangeState::Streaming(_) => ExchangePhase::Streaming,
            ExchangeState::Settled(_) => ExchangePhase::Settled,
            ExchangeState::Failed(_) => ExchangePhase::Failed,
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, ExchangeState::Idle)
    }

    /// Sending or Streaming.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, ExchangeState::Sending | ExchangeState::Streaming(_))
    }
}
