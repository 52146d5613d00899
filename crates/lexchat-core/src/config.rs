use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use anyhow::{Result, anyhow};

use crate::mode::Mode;
use crate::session::SessionOptions;
use crate::state::DEFAULT_HISTORY_CAP;

pub const DEFAULT_BASE_URL: &str = "http://localhost:5003";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    pub base_url: String,
    pub default_mode: Mode,
    pub history_cap: usize,
    pub refine_questions: bool,
    pub related_questions: bool,
    pub connect_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            default_mode: Mode::Ai,
            history_cap: DEFAULT_HISTORY_CAP,
            refine_questions: true,
            related_questions: true,
            connect_timeout_secs: 10,
        }
    }

    /// Load the user's config, then apply `LEXCHAT_URL` if set.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::get_config_path()?)?;

        if let Ok(url) = std::env::var("LEXCHAT_URL") {
            if !url.trim().is_empty() {
                config.base_url = url;
            }
        }

        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }

        let config_content = fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&config_content)?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::get_config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Create config directory if it doesn't exist
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let config_content = serde_json::to_string_pretty(self)?;
        fs::write(path, config_content)?;
        Ok(())
    }

    /// Persist a mode preference without baking in the env override.
    pub fn save_default_mode(mode: Mode) -> Result<()> {
        let path = Self::get_config_path()?;
        let mut config = Self::load_from(&path).unwrap_or_else(|_| Self::new());
        config.default_mode = mode;
        config.save_to(&path)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.max(1))
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            mode: self.default_mode,
            history_cap: self.history_cap,
            refine_questions: self.refine_questions,
            related_questions: self.related_questions,
        }
    }

    pub fn get_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow!("Could not determine config directory"))?;

        Ok(config_dir.join("lexchat").join("config.json"))
    }
}
