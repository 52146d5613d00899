//! One-exchange-at-a-time lifecycle and the history it owns.
//!
//! ```text
//! Idle → Sending → Streaming → Settled → Idle
//!           │          │
//!           └──────────┴─────→ Failed  → Idle
//! ```
//!
//! History is written in exactly one place: the transition into `Settled`.

use tracing::trace;

use crate::error::{ChatError, ChatResult};
use crate::state::{ConversationHistory, ConversationTurn, ExchangePhase, ExchangeState};

#[derive(Debug, Default)]
pub struct Conversation {
    state: ExchangeState,
    history: ConversationHistory,
    pending: Option<ConversationTurn>,
}

impl Conversation {
    pub fn new(history_cap: usize) -> Self {
        Self {
            state: ExchangeState::Idle,
            history: ConversationHistory::with_cap(history_cap),
            pending: None,
        }
    }

    pub fn state(&self) -> &ExchangeState {
        &self.state
    }

    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    pub fn is_busy(&self) -> bool {
        !self.state.is_idle()
    }

    /// `Idle → Sending`. When `record` is set the query is held as the
    /// pending user turn and committed with the answer on settle.
    ///
    /// Anywhere but `Idle` this returns [`ChatError::Busy`] and changes
    /// nothing.
    pub fn begin(&mut self, query: &str, record: bool) -> ChatResult<()> {
        if !self.state.is_idle() {
            return Err(ChatError::Busy);
        }
        self.pending = record.then(|| ConversationTurn::user(query));
        self.transition(ExchangeState::Sending);
        Ok(())
    }

    /// Replace the pending user turn, e.g. with a refined question.
    pub fn revise_pending(&mut self, query: &str) {
        if let Some(turn) = self.pending.as_mut() {
            turn.content = query.to_string();
        }
    }

    /// Drop the pending user turn so the next settle leaves history alone.
    pub fn discard_pending(&mut self) {
        self.pending = None;
    }

    /// `Sending → Streaming`
    pub fn start_streaming(&mut self) -> ChatResult<()> {
        self.require(&[ExchangePhase::Sending], "start_streaming")?;
        self.transition(ExchangeState::Streaming(String::new()));
        Ok(())
    }

    /// Append a token while streaming.
    pub fn append(&mut self, delta: &str) -> ChatResult<()> {
        match &mut self.state {
            ExchangeState::Streaming(partial) => {
                partial.push_str(delta);
                Ok(())
            }
            other => Err(ChatError::InvalidTransition {
                from: other.phase(),
                event: "append",
            }),
        }
    }

    /// `Sending | Streaming → Settled`. Commits the pending pair and trims.
    pub fn settle(&mut self, text: impl Into<String>) -> ChatResult<()> {
        self.require(&[ExchangePhase::Sending, ExchangePhase::Streaming], "settle")?;
        let text = text.into();
        if let Some(user) = self.pending.take() {
            self.history
                .commit_pair(user, ConversationTurn::assistant(text.clone()));
        }
        self.transition(ExchangeState::Settled(text));
        Ok(())
    }

    /// `Sending | Streaming → Failed`. History is left untouched.
    pub fn fail(&mut self, message: impl Into<String>) -> ChatResult<()> {
        self.require(&[ExchangePhase::Sending, ExchangePhase::Streaming], "fail")?;
        self.pending = None;
        self.transition(ExchangeState::Failed(message.into()));
        Ok(())
    }

    /// `Settled | Failed → Idle`. A no-op when already idle.
    pub fn reset(&mut self) -> ChatResult<()> {
        self.require(
            &[ExchangePhase::Idle, ExchangePhase::Settled, ExchangePhase::Failed],
            "reset",
        )?;
        self.transition(ExchangeState::Idle);
        Ok(())
    }

    /// Any state `→ Idle`, dropping the pending turn. Used when an exchange
    /// is cancelled before it could settle or fail.
    pub fn abandon(&mut self) {
        if self.state.is_idle() {
            return;
        }
        self.pending = None;
        self.transition(ExchangeState::Idle);
    }

    pub fn clear_history(&mut self) -> ChatResult<()> {
        if self.is_busy() {
            return Err(ChatError::Busy);
        }
        self.history.clear();
        Ok(())
    }

    fn require(&self, allowed: &[ExchangePhase], event: &'static str) -> ChatResult<()> {
        let from = self.state.phase();
        if allowed.contains(&from) {
            Ok(())
        } else {
            Err(ChatError::InvalidTransition { from, event })
        }
    }

    fn transition(&mut self, next: ExchangeState) {
        trace!(from = ?self.state.phase(), to = ?next.phase(), "exchange transition");
        self.state = next;
    }
}
