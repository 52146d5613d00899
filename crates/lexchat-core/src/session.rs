//! The session controller: mode selection, dispatch, and the exchange loop.
//!
//! A [`ChatSession`] is the only writer of mode and conversation history.
//! It runs one exchange at a time; front ends that drive it from another
//! task share it behind a `tokio::sync::Mutex` and submit with `try_lock`,
//! so a busy session drops the submission instead of queueing it.
//!
//! Follow-up questions are not part of an exchange. After an answer settles
//! the caller asks [`ChatSession::related_questions`] for a detached future
//! and awaits it once the session is free again.

use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::conversation::Conversation;
use crate::decoder::FrameDecoder;
use crate::error::{ChatError, ChatResult};
use crate::interpreter::{EventInterpreter, Step};
use crate::mode::Mode;
use crate::protocol::{ChatRequest, ResultItem};
use crate::state::{ConversationHistory, ExchangeState, DEFAULT_HISTORY_CAP};
use crate::transport::{ByteStream, ChatResponse, Transport};

/// Session behaviour knobs, usually taken from [`crate::Config`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    pub mode: Mode,
    pub history_cap: usize,
    pub refine_questions: bool,
    pub related_questions: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            mode: Mode::Ai,
            history_cap: DEFAULT_HISTORY_CAP,
            refine_questions: true,
            related_questions: true,
        }
    }
}

/// How an exchange ended.
#[derive(Debug, Clone, PartialEq)]
pub enum ExchangeOutcome {
    /// A streamed answer, committed to history. `query` is the question as
    /// sent, after refinement.
    Answered { query: String, text: String },
    /// Buffered results. `degraded` marks the AI path falling back to search.
    Results { items: Vec<ResultItem>, degraded: bool },
    /// Transport or upstream failure. History is unchanged.
    Failed(ChatError),
    /// Another exchange was in flight; nothing happened.
    Busy,
    /// Blank query; nothing happened.
    Ignored,
}

/// Progressive-update hook. Every method defaults to a no-op.
pub trait ExchangeObserver: Send {
    fn on_state(&mut self, _state: &ExchangeState) {}

    fn on_token(&mut self, _delta: &str, _text: &str) {}

    fn on_refined(&mut self, _original: &str, _refined: &str) {}

    fn on_results(&mut self, _items: &[ResultItem], _degraded: bool) {}
}

/// An observer that ignores everything.
pub struct NoopObserver;

impl ExchangeObserver for NoopObserver {}

/// Owned copy of an observer callback, for delivery across tasks.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    State(ExchangeState),
    Token { delta: String },
    Refined { original: String, refined: String },
    Results { items: Vec<ResultItem>, degraded: bool },
    /// Follow-up questions, delivered after the exchange is over.
    Related(Vec<String>),
}

// A closed receiver just means nobody is watching any more.
impl<T> ExchangeObserver for mpsc::UnboundedSender<T>
where
    T: From<SessionEvent> + Send,
{
    fn on_state(&mut self, state: &ExchangeState) {
        let _ = self.send(SessionEvent::State(state.clone()).into());
    }

    fn on_token(&mut self, delta: &str, _text: &str) {
        let _ = self.send(
            SessionEvent::Token {
                delta: delta.to_string(),
            }
            .into(),
        );
    }

    fn on_refined(&mut self, original: &str, refined: &str) {
        let _ = self.send(
            SessionEvent::Refined {
                original: original.to_string(),
                refined: refined.to_string(),
            }
            .into(),
        );
    }

    fn on_results(&mut self, items: &[ResultItem], degraded: bool) {
        let _ = self.send(
            SessionEvent::Results {
                items: items.to_vec(),
                degraded,
            }
            .into(),
        );
    }
}

const RELATED_TIMEOUT: Duration = Duration::from_secs(20);

pub struct ChatSession {
    transport: Arc<dyn Transport>,
    conversation: Conversation,
    mode: Mode,
    ai_usable: bool,
    options: SessionOptions,
}

impl ChatSession {
    pub fn new(transport: Arc<dyn Transport>, options: SessionOptions) -> Self {
        Self {
            transport,
            conversation: Conversation::new(options.history_cap),
            mode: options.mode,
            ai_usable: true,
            options,
        }
    }

    /// Poll backend capability once. If AI is reported unavailable the
    /// session is pinned to search for its lifetime. A failed poll leaves the
    /// configured mode alone.
    pub async fn initialize(&mut self) {
        match self.transport.status().await {
            Ok(status) if !status.ai_available => {
                info!("backend reports AI unavailable, falling back to search mode");
                self.ai_usable = false;
                self.mode = Mode::Search;
            }
            Ok(status) => {
                debug!(indexed_docs = status.indexed_docs, "backend status ok");
            }
            Err(err) => {
                warn!(error = %err, "status check failed");
            }
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn ai_usable(&self) -> bool {
        self.ai_usable
    }

    /// Fails with `false` when asking for AI after it was marked unusable.
    pub fn set_mode(&mut self, mode: Mode) -> bool {
        if mode == Mode::Ai && !self.ai_usable {
            return false;
        }
        self.mode = mode;
        true
    }

    pub fn state(&self) -> &ExchangeState {
        self.conversation.state()
    }

    pub fn history(&self) -> &ConversationHistory {
        self.conversation.history()
    }

    pub fn clear_conversation(&mut self) -> ChatResult<()> {
        self.conversation.clear_history()
    }

    /// Best-effort single-article lookup.
    pub async fn lookup_article(&self, number: &str) -> ChatResult<Option<ResultItem>> {
        self.transport.article(number).await
    }

    /// Run one exchange to completion and return to `Idle`.
    pub async fn submit(
        &mut self,
        query: &str,
        observer: &mut dyn ExchangeObserver,
    ) -> ExchangeOutcome {
        let query = query.trim();
        if query.is_empty() {
            return ExchangeOutcome::Ignored;
        }

        let mode = self.mode;
        if self.conversation.begin(query, mode == Mode::Ai).is_err() {
            debug!("submission dropped, exchange already in flight");
            return ExchangeOutcome::Busy;
        }
        observer.on_state(self.conversation.state());

        // Returns the session to Idle even if this future is dropped mid-flight.
        let mut exchange = ExchangeGuard { session: self };

        let outcome = match mode {
            Mode::Ai => exchange.run_ai(query, observer).await,
            Mode::Search => exchange.run_search(query, observer).await,
        };

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(err) => {
                // An upstream error event has already moved the state to Failed.
                if exchange.conversation.state().is_in_flight() {
                    let _ = exchange.conversation.fail(err.to_string());
                    observer.on_state(exchange.conversation.state());
                }
                ExchangeOutcome::Failed(err)
            }
        };

        let _ = exchange.conversation.reset();
        observer.on_state(exchange.conversation.state());
        outcome
    }

    /// Follow-up suggestions for a settled answer.
    ///
    /// The future owns its transport handle, so it can be awaited after the
    /// session is released. It never touches exchange state and resolves to
    /// an empty list on failure, timeout, or when the feature is off.
    pub fn related_questions(
        &self,
        query: &str,
        answer: &str,
    ) -> impl Future<Output = Vec<String>> + Send + 'static {
        let transport = Arc::clone(&self.transport);
        let enabled = self.options.related_questions;
        let query = query.to_string();
        let answer = answer.to_string();

        async move {
            if !enabled {
                return Vec::new();
            }
            let request = transport.related_questions(&query, &answer);
            match tokio::time::timeout(RELATED_TIMEOUT, request).await {
                Ok(Ok(questions)) => questions,
                Ok(Err(err)) => {
                    debug!(error = %err, "related questions unavailable");
                    Vec::new()
                }
                Err(_) => {
                    debug!("related questions timed out");
                    Vec::new()
                }
            }
        }
    }

    async fn run_search(
        &mut self,
        query: &str,
        observer: &mut dyn ExchangeObserver,
    ) -> ChatResult<ExchangeOutcome> {
        let response = self.transport.chat(&ChatRequest::search(query)).await?;
        let items = match response {
            ChatResponse::Buffered(body) => body.results,
            ChatResponse::Streaming(body) => {
                // Search never streams; read the body to completion and ignore it.
                drain(body).await;
                Vec::new()
            }
        };
        self.settle_results(items, false, observer)
    }

    async fn run_ai(
        &mut self,
        query: &str,
        observer: &mut dyn ExchangeObserver,
    ) -> ChatResult<ExchangeOutcome> {
        let query = self.refine(query, observer).await;
        let request = ChatRequest::ai(query.clone(), self.conversation.history().to_vec());

        let body = match self.transport.chat(&request).await? {
            ChatResponse::Streaming(body) => body,
            ChatResponse::Buffered(body) => {
                info!("AI path returned buffered results, showing search results instead");
                return self.settle_results(body.results, true, observer);
            }
        };

        self.conversation.start_streaming()?;
        observer.on_state(self.conversation.state());

        let text = self.consume_stream(body, observer).await?;
        self.conversation.settle(text.clone())?;
        observer.on_state(self.conversation.state());

        Ok(ExchangeOutcome::Answered { query, text })
    }

    async fn consume_stream(
        &mut self,
        mut body: ByteStream,
        observer: &mut dyn ExchangeObserver,
    ) -> ChatResult<String> {
        let mut decoder = FrameDecoder::new();
        let mut interpreter = EventInterpreter::new();

        while let Some(chunk) = body.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                // Already failed: the drain is best-effort.
                Err(_) if interpreter.failure().is_some() => break,
                Err(err) => return Err(err),
            };
            for frame in decoder.feed(&chunk) {
                match interpreter.apply(frame) {
                    Step::Progress(delta) => {
                        self.conversation.append(&delta)?;
                        observer.on_token(&delta, interpreter.text());
                    }
                    Step::Fatal(err) => {
                        warn!(error = %err, "stream reported an error");
                        self.conversation.fail(err.to_string())?;
                        observer.on_state(self.conversation.state());
                    }
                    Step::Recovered(_) | Step::Ignored | Step::Terminated => {}
                }
            }
        }
        decoder.finish();

        interpreter.into_result()
    }

    async fn refine(&mut self, query: &str, observer: &mut dyn ExchangeObserver) -> String {
        if !self.options.refine_questions {
            return query.to_string();
        }
        match self.transport.refine(query).await {
            Ok(refined) => {
                let text = refined.refined.trim();
                if refined.success && !text.is_empty() && text != query {
                    observer.on_refined(query, text);
                    self.conversation.revise_pending(text);
                    return text.to_string();
                }
            }
            Err(err) => debug!(error = %err, "refinement failed, using original query"),
        }
        query.to_string()
    }

    fn settle_results(
        &mut self,
        items: Vec<ResultItem>,
        degraded: bool,
        observer: &mut dyn ExchangeObserver,
    ) -> ChatResult<ExchangeOutcome> {
        // Search results never become conversation context.
        self.conversation.discard_pending();
        self.conversation.settle(String::new())?;
        observer.on_state(self.conversation.state());
        observer.on_results(&items, degraded);
        Ok(ExchangeOutcome::Results { items, degraded })
    }
}

/// Exclusive access to a session for one exchange.
struct ExchangeGuard<'a> {
    session: &'a mut ChatSession,
}

impl Deref for ExchangeGuard<'_> {
    type Target = ChatSession;

    fn deref(&self) -> &ChatSession {
        self.session
    }
}

impl DerefMut for ExchangeGuard<'_> {
    fn deref_mut(&mut self) -> &mut ChatSession {
        self.session
    }
}

impl Drop for ExchangeGuard<'_> {
    fn drop(&mut self) {
        if !self.session.conversation.state().is_idle() {
            warn!("exchange cancelled before it finished");
            self.session.conversation.abandon();
        }
    }
}

async fn drain(mut body: ByteStream) {
    while let Some(chunk) = body.next().await {
        if chunk.is_err() {
            break;
        }
    }
}
