//! Request and response bodies exchanged with the knowledge-base backend.

use serde::{Deserialize, Serialize};

use crate::mode::Mode;
use crate::state::ConversationTurn;

/// Body of `POST /api/chat`. History is only attached in AI mode.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub message: String,
    pub mode: Mode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history: Option<Vec<ConversationTurn>>,
}

impl ChatRequest {
    pub fn search(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            mode: Mode::Search,
            history: None,
        }
    }

    pub fn ai(message: impl Into<String>, history: Vec<ConversationTurn>) -> Self {
        Self {
            message: message.into(),
            mode: Mode::Ai,
            history: Some(history),
        }
    }
}

/// Buffered response: a list of search results.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<ResultItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RelatedArticle {
    pub number: String,
}

/// A statute article.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Article {
    pub article_number: String,
    pub article_display: Option<String>,
    pub chapter: Option<String>,
    pub section: Option<String>,
    pub legal_text: Option<String>,
    pub explanation: Option<String>,
    pub tags: Option<String>,
    pub status: Option<String>,
    pub related: Vec<RelatedArticle>,
}

impl Article {
    /// Heading shown for the article, e.g. `第 23 條`.
    pub fn display(&self) -> String {
        match &self.article_display {
            Some(display) if !display.is_empty() => display.clone(),
            _ => format!("第 {} 條", self.article_number),
        }
    }

    /// `chapter → section`, skipping whichever is missing.
    pub fn location(&self) -> Option<String> {
        let parts: Vec<&str> = [self.chapter.as_deref(), self.section.as_deref()]
            .into_iter()
            .flatten()
            .filter(|p| !p.is_empty())
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(" → "))
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.status.as_deref() == Some("deleted")
    }

    pub fn tag_list(&self) -> Vec<&str> {
        self.tags
            .as_deref()
            .map(|tags| {
                tags.split(',')
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Any non-article document (study notes, guides).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StudyDocument {
    pub doc_type: Option<String>,
    pub title: Option<String>,
    pub raw_content: Option<String>,
}

impl StudyDocument {
    pub fn title(&self) -> &str {
        match self.title.as_deref() {
            Some(title) if !title.is_empty() => title,
            _ => "學習資源",
        }
    }
}

/// One search hit, discriminated on `doc_type`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "RawResultItem")]
pub enum ResultItem {
    Article(Article),
    Other(StudyDocument),
}

impl ResultItem {
    pub fn as_article(&self) -> Option<&Article> {
        match self {
            ResultItem::Article(article) => Some(article),
            ResultItem::Other(_) => None,
        }
    }
}

// `doc_type` is open-ended, so the union is resolved after a flat parse.
#[derive(Deserialize)]
struct RawResultItem {
    doc_type: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    article_number: Option<String>,
    article_display: Option<String>,
    chapter: Option<String>,
    section: Option<String>,
    legal_text: Option<String>,
    explanation: Option<String>,
    tags: Option<String>,
    status: Option<String>,
    #[serde(default)]
    related: Vec<RawRelated>,
    title: Option<String>,
    raw_content: Option<String>,
}

#[derive(Deserialize)]
struct RawRelated {
    #[serde(default, deserialize_with = "lenient_string")]
    number: Option<String>,
}

/// Article numbers show up both as `"23"` and `23`.
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

impl From<RawResultItem> for ResultItem {
    fn from(raw: RawResultItem) -> Self {
        if raw.doc_type.as_deref() == Some("article") {
            ResultItem::Article(Article {
                article_number: raw.article_number.unwrap_or_default(),
                article_display: raw.article_display,
                chapter: raw.chapter,
                section: raw.section,
                legal_text: raw.legal_text,
                explanation: raw.explanation,
                tags: raw.tags,
                status: raw.status,
                related: raw
                    .related
                    .into_iter()
                    .filter_map(|r| r.number)
                    .map(|number| RelatedArticle { number })
                    .collect(),
            })
        } else {
            ResultItem::Other(StudyDocument {
                doc_type: raw.doc_type,
                title: raw.title,
                raw_content: raw.raw_content,
            })
        }
    }
}

/// One `data:` payload of the streaming path.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StreamPayload {
    pub text: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefineRequest<'a> {
    pub query: &'a str,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RefineResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub refined: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RelatedQuestionsRequest<'a> {
    pub query: &'a str,
    pub response: &'a str,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RelatedQuestionsResponse {
    #[serde(default)]
    pub questions: Vec<String>,
}

/// `GET /api/status`
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct BackendStatus {
    pub ai_available: bool,
    #[serde(default)]
    pub indexed_docs: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct ErrorBody {
    pub error: Option<String>,
}
