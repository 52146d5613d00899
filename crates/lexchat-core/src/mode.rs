use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Ai,
    Search,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Ai => "ai",
            Mode::Search => "search",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "ai" => Some(Mode::Ai),
            "search" => Some(Mode::Search),
            _ => None,
        }
    }

    pub fn all() -> Vec<Mode> {
        vec![Mode::Ai, Mode::Search]
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Mode::Ai => "AI 問答",
            Mode::Search => "條文搜尋",
        }
    }

    pub fn toggled(&self) -> Mode {
        match self {
            Mode::Ai => Mode::Search,
            Mode::Search => Mode::Ai,
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
