//! Best-effort persisted state that lives outside the conversation.
//!
//! Each value is a JSON file named after a fixed storage key. Loading never
//! fails: a missing or corrupt file reads as the default. Saving logs and
//! swallows errors. A disabled store, used when there is no data
//! directory, loads defaults and saves nothing.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use chrono::{DateTime, Local, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::mode::Mode;

pub const SEARCH_HISTORY_KEY: &str = "searchHistory";
pub const BOOKMARKS_KEY: &str = "bookmarks";
pub const USAGE_STATS_KEY: &str = "usageStats";
pub const THEME_KEY: &str = "theme";

const SEARCH_HISTORY_LIMIT: usize = 50;

#[derive(Debug, Clone)]
pub struct Store {
    dir: Option<PathBuf>,
}

impl Store {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Some(dir.into()),
        }
    }

    pub fn disabled() -> Self {
        Self { dir: None }
    }

    /// `<data_dir>/lexchat`
    pub fn open_default() -> Result<Self> {
        let data_dir = dirs::data_dir()
            .ok_or_else(|| anyhow!("Could not determine data directory"))?;
        Ok(Self::new(data_dir.join("lexchat")))
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    fn path(&self, key: &str) -> Option<PathBuf> {
        self.dir.as_ref().map(|dir| dir.join(format!("{}.json", key)))
    }

    pub fn load<T: DeserializeOwned + Default>(&self, key: &str) -> T {
        let Some(path) = self.path(key) else {
            return T::default();
        };
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) => {
                debug!(key, error = %err, "no stored value, using default");
                return T::default();
            }
        };
        serde_json::from_str(&content).unwrap_or_else(|err| {
            warn!(key, error = %err, "stored value is corrupt, using default");
            T::default()
        })
    }

    pub fn save<T: Serialize>(&self, key: &str, value: &T) -> bool {
        if self.dir.is_none() {
            return false;
        }
        match self.try_save(key, value) {
            Ok(()) => true,
            Err(err) => {
                warn!(key, error = %err, "failed to save");
                false
            }
        }
    }

    /// Add a submitted query to the search history and usage counters.
    pub fn record_submission(&self, query: &str, mode: Mode) {
        let mut history: SearchHistory = self.load(SEARCH_HISTORY_KEY);
        history.record(query, mode);
        self.save(SEARCH_HISTORY_KEY, &history);

        let mut stats: UsageStats = self.load(USAGE_STATS_KEY);
        stats.record_query(mode);
        self.save(USAGE_STATS_KEY, &stats);
    }

    fn try_save<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let (Some(dir), Some(path)) = (self.dir.as_ref(), self.path(key)) else {
            return Err(anyhow!("storage is disabled"));
        };
        fs::create_dir_all(dir)?;
        let content = serde_json::to_string_pretty(value)?;
        fs::write(path, content)?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub query: String,
    pub timestamp: DateTime<Utc>,
    pub mode: Mode,
}

/// Submitted queries, newest first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SearchHistory {
    entries: Vec<HistoryEntry>,
}

impl SearchHistory {
    pub fn record(&mut self, query: &str, mode: Mode) {
        self.entries.insert(
            0,
            HistoryEntry {
                query: query.to_string(),
                timestamp: Utc::now(),
                mode,
            },
        );
        self.entries.truncate(SEARCH_HISTORY_LIMIT);
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bookmark {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Bookmarks {
    items: Vec<Bookmark>,
}

impl Bookmarks {
    pub fn add(&mut self, content: &str, label: Option<String>) {
        self.items.insert(
            0,
            Bookmark {
                content: content.to_string(),
                label,
                timestamp: Utc::now(),
            },
        );
    }

    pub fn remove(&mut self, index: usize) -> Option<Bookmark> {
        (index < self.items.len()).then(|| self.items.remove(index))
    }

    pub fn contains(&self, content: &str) -> bool {
        self.items.iter().any(|b| b.content == content)
    }

    pub fn items(&self) -> &[Bookmark] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeUsage {
    #[serde(default)]
    pub ai: u64,
    #[serde(default)]
    pub search: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UsageStats {
    pub total_views: u64,
    pub daily_views: BTreeMap<String, u64>,
    pub daily_queries: BTreeMap<String, u64>,
    pub mode_usage: ModeUsage,
}

impl UsageStats {
    pub fn record_view(&mut self) {
        self.record_view_on(Local::now().date_naive());
    }

    pub fn record_query(&mut self, mode: Mode) {
        self.record_query_on(mode, Local::now().date_naive());
    }

    pub fn record_view_on(&mut self, day: NaiveDate) {
        *self.daily_views.entry(day_key(day)).or_default() += 1;
        self.total_views += 1;
    }

    pub fn record_query_on(&mut self, mode: Mode, day: NaiveDate) {
        *self.daily_queries.entry(day_key(day)).or_default() += 1;
        match mode {
            Mode::Ai => self.mode_usage.ai += 1,
            Mode::Search => self.mode_usage.search += 1,
        }
    }

    pub fn total_queries(&self) -> u64 {
        self.daily_queries.values().sum()
    }
}

fn day_key(day: NaiveDate) -> String {
    day.format("%Y-%m-%d").to_string()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

impl Theme {
    pub fn toggled(&self) -> Theme {
        match self {
            Theme::Light => Theme::Dark,
            Theme::Dark => Theme::Light,
        }
    }
}
