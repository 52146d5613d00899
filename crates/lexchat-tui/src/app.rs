use std::sync::Arc;

use lexchat_core::storage::{BOOKMARKS_KEY, SEARCH_HISTORY_KEY, THEME_KEY, USAGE_STATS_KEY};
use lexchat_core::{
    Bookmarks, ChatSession, Config, ExchangeOutcome, ExchangePhase, ExchangeState, Mode,
    SearchHistory, SessionEvent, Store, Theme, UsageStats,
};
use tokio::sync::{mpsc, Mutex};
use tracing::warn;

use crate::cards::{self, CardLine};
use crate::tui::AppEvent;

/// One block of the transcript.
#[derive(Debug, Clone, PartialEq)]
pub enum Entry {
    User(String),
    Refined { original: String, refined: String },
    Answer { text: String, streaming: bool },
    Results(Vec<CardLine>),
    Related(Vec<String>),
    Error(String),
}

pub struct App {
    pub should_quit: bool,

    // Session, shared with the exchange task
    pub session: Arc<Mutex<ChatSession>>,
    pub events: mpsc::UnboundedSender<AppEvent>,
    pub base_url: String,
    pub mode: Mode,
    pub ai_usable: bool,
    pub phase: ExchangePhase,

    // Input line
    pub input: String,
    pub cursor: usize, // in chars, not bytes

    // Transcript
    pub transcript: Vec<Entry>,
    pub scroll: u16,
    pub max_scroll: u16,
    pub follow: bool,
    pub page_height: u16,
    pub last_query: Option<String>,
    pub last_answer: Option<String>,
    pub related: Vec<String>,
    pub related_cursor: usize,

    pub flash: Option<String>,
    pub animation_frame: u8,

    // Persisted state
    pub store: Store,
    pub theme: Theme,
    pub bookmarks: Bookmarks,
    pub history: SearchHistory,
    pub stats: UsageStats,
}

impl App {
    pub fn new(
        session: ChatSession,
        store: Store,
        events: mpsc::UnboundedSender<AppEvent>,
        base_url: String,
    ) -> Self {
        let mode = session.mode();
        let ai_usable = session.ai_usable();

        let mut stats: UsageStats = store.load(USAGE_STATS_KEY);
        stats.record_view();
        store.save(USAGE_STATS_KEY, &stats);

        Self {
            should_quit: false,
            session: Arc::new(Mutex::new(session)),
            events,
            base_url,
            mode,
            ai_usable,
            phase: ExchangePhase::Idle,
            input: String::new(),
            cursor: 0,
            transcript: Vec::new(),
            scroll: 0,
            max_scroll: 0,
            follow: true,
            page_height: 10,
            last_query: None,
            last_answer: None,
            related: Vec::new(),
            related_cursor: 0,
            flash: None,
            animation_frame: 0,
            theme: store.load(THEME_KEY),
            bookmarks: store.load(BOOKMARKS_KEY),
            history: store.load(SEARCH_HISTORY_KEY),
            stats,
            store,
        }
    }

    pub fn is_busy(&self) -> bool {
        !matches!(self.phase, ExchangePhase::Idle)
    }

    /// Start an exchange on a background task. A busy session drops the
    /// submission and keeps the input line.
    pub fn submit(&mut self) {
        let query = self.input.trim().to_string();
        if query.is_empty() {
            return;
        }

        let mut session = match self.session.clone().try_lock_owned() {
            Ok(session) => session,
            Err(_) => {
                self.flash = Some("上一個問題仍在處理中".to_string());
                return;
            }
        };

        self.input.clear();
        self.cursor = 0;
        self.flash = None;
        self.related.clear();
        self.related_cursor = 0;
        self.transcript.push(Entry::User(query.clone()));
        self.last_query = Some(query.clone());
        self.phase = ExchangePhase::Sending;
        self.follow = true;

        self.history.record(&query, self.mode);
        self.store.save(SEARCH_HISTORY_KEY, &self.history);
        self.stats.record_query(self.mode);
        self.store.save(USAGE_STATS_KEY, &self.stats);

        let mut tx = self.events.clone();
        tokio::spawn(async move {
            let outcome = session.submit(&query, &mut tx).await;
            let related = match &outcome {
                ExchangeOutcome::Answered { query, text } => {
                    Some(session.related_questions(query, text))
                }
                _ => None,
            };
            drop(session);
            let _ = tx.send(AppEvent::Finished(outcome));

            // Follow-ups arrive after the exchange, with the session unlocked.
            if let Some(related) = related {
                let questions = related.await;
                if !questions.is_empty() {
                    let _ = tx.send(SessionEvent::Related(questions).into());
                }
            }
        });
    }

    pub fn on_session_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::State(state) => self.on_state(state),
            SessionEvent::Token { delta } => {
                if let Some(Entry::Answer { text, .. }) = self.transcript.last_mut() {
                    text.push_str(&delta);
                }
            }
            SessionEvent::Refined { original, refined } => {
                self.transcript.push(Entry::Refined { original, refined });
            }
            SessionEvent::Results { items, degraded } => {
                self.transcript
                    .push(Entry::Results(cards::result_block(&items, degraded)));
            }
            // Stale once a newer exchange has started.
            SessionEvent::Related(_) if self.is_busy() => {}
            SessionEvent::Related(questions) => {
                self.related = questions.clone();
                self.related_cursor = 0;
                self.transcript.push(Entry::Related(questions));
            }
        }
    }

    fn on_state(&mut self, state: ExchangeState) {
        self.phase = state.phase();
        match state {
            ExchangeState::Streaming(_) => {
                if !self.is_streaming() {
                    self.transcript.push(Entry::Answer {
                        text: String::new(),
                        streaming: true,
                    });
                }
            }
            ExchangeState::Settled(_) | ExchangeState::Failed(_) => self.finish_answer(),
            ExchangeState::Idle | ExchangeState::Sending => {}
        }
    }

    pub fn on_finished(&mut self, outcome: ExchangeOutcome) {
        self.finish_answer();
        self.phase = ExchangePhase::Idle;
        match outcome {
            ExchangeOutcome::Answered { text, .. } => self.last_answer = Some(text),
            ExchangeOutcome::Failed(err) => self.transcript.push(Entry::Error(err.to_string())),
            ExchangeOutcome::Busy => {
                self.flash = Some("上一個問題仍在處理中".to_string());
            }
            ExchangeOutcome::Results { .. } | ExchangeOutcome::Ignored => {}
        }
    }

    fn is_streaming(&self) -> bool {
        matches!(
            self.transcript.last(),
            Some(Entry::Answer { streaming: true, .. })
        )
    }

    fn finish_answer(&mut self) {
        if let Some(Entry::Answer { streaming, .. }) = self.transcript.last_mut() {
            *streaming = false;
        }
    }

    /// Blocked while an exchange runs and when AI is unusable.
    pub fn toggle_mode(&mut self) {
        let target = self.mode.toggled();
        let changed = match self.session.try_lock() {
            Ok(mut session) => Some(session.set_mode(target)),
            Err(_) => None,
        };

        match changed {
            Some(true) => {
                self.mode = target;
                self.flash = None;
                if let Err(err) = Config::save_default_mode(target) {
                    warn!(error = %err, "failed to save mode preference");
                }
            }
            Some(false) => self.flash = Some("AI 模式目前不可用".to_string()),
            None => self.flash = Some("處理中，無法切換模式".to_string()),
        }
    }

    pub fn clear_conversation(&mut self) {
        let cleared = match self.session.try_lock() {
            Ok(mut session) => session.clear_conversation().is_ok(),
            Err(_) => false,
        };

        if cleared {
            self.transcript.clear();
            self.related.clear();
            self.last_answer = None;
            self.scroll = 0;
            self.follow = true;
            self.flash = Some("對話已清除".to_string());
        } else {
            self.flash = Some("處理中，無法清除對話".to_string());
        }
    }

    pub fn bookmark_last_answer(&mut self) {
        let Some(answer) = self.last_answer.clone() else {
            self.flash = Some("沒有可加入書籤的回答".to_string());
            return;
        };
        if self.bookmarks.contains(&answer) {
            self.flash = Some("已在書籤中".to_string());
            return;
        }
        self.bookmarks.add(&answer, self.last_query.clone());
        self.store.save(BOOKMARKS_KEY, &self.bookmarks);
        self.flash = Some(format!("已加入書籤（共 {} 則）", self.bookmarks.len()));
    }

    pub fn toggle_theme(&mut self) {
        self.theme = self.theme.toggled();
        self.store.save(THEME_KEY, &self.theme);
    }

    /// Put the next suggested follow-up question on the input line.
    pub fn cycle_related(&mut self) {
        if self.related.is_empty() {
            return;
        }
        let question = &self.related[self.related_cursor % self.related.len()];
        self.input = question.clone();
        self.cursor = self.input.chars().count();
        self.related_cursor = (self.related_cursor + 1) % self.related.len();
    }

    pub fn tick_animation(&mut self) {
        if self.is_busy() {
            self.animation_frame = (self.animation_frame + 1) % 3;
        }
    }

    pub fn scroll_page_up(&mut self) {
        self.follow = false;
        self.scroll = self.scroll.saturating_sub(self.page_height.max(1));
    }

    pub fn scroll_page_down(&mut self) {
        self.scroll = self
            .scroll
            .saturating_add(self.page_height.max(1))
            .min(self.max_scroll);
        self.follow = self.scroll >= self.max_scroll;
    }

    // Input line editing

    pub fn insert_char(&mut self, c: char) {
        let byte_pos = char_to_byte_index(&self.input, self.cursor);
        self.input.insert(byte_pos, c);
        self.cursor += 1;
    }

    pub fn delete_before_cursor(&mut self) {
        if self.cursor > 0 {
            self.cursor -= 1;
            let byte_pos = char_to_byte_index(&self.input, self.cursor);
            self.input.remove(byte_pos);
        }
    }

    pub fn delete_at_cursor(&mut self) {
        if self.cursor < self.input.chars().count() {
            let byte_pos = char_to_byte_index(&self.input, self.cursor);
            self.input.remove(byte_pos);
        }
    }

    pub fn cursor_left(&mut self) {
        self.cursor = self.cursor.saturating_sub(1);
    }

    pub fn cursor_right(&mut self) {
        self.cursor = (self.cursor + 1).min(self.input.chars().count());
    }

    pub fn cursor_home(&mut self) {
        self.cursor = 0;
    }

    pub fn cursor_end(&mut self) {
        self.cursor = self.input.chars().count();
    }
}

/// Convert a character index to a byte index for UTF-8 safe string operations
fn char_to_byte_index(s: &str, char_idx: usize) -> usize {
    s.char_indices()
        .nth(char_idx)
        .map(|(i, _)| i)
        .unwrap_or(s.len())
}
