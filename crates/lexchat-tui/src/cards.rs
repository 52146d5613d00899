//! Result cards, as plain styled lines.
//!
//! Both the interactive screen and `lexchat ask` render search hits through
//! [`result_block`]; each front end only decides how a [`LineKind`] looks.

use lexchat_core::{Article, ResultItem, StudyDocument};

const PREVIEW_CHARS: usize = 2000;

pub const NO_RESULTS: &str = "找不到相關結果，請嘗試其他關鍵字。";
pub const DEGRADED_NOTICE: &str = "AI 模式不可用，以下為搜尋結果：";
pub const DEGRADED_NO_RESULTS: &str = "找不到相關結果。";
pub const DELETED: &str = "本條已刪除。";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    Notice,
    Heading,
    Meta,
    Label,
    Body,
    Deleted,
    Tags,
    Related,
    Blank,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardLine {
    pub kind: LineKind,
    pub text: String,
}

impl CardLine {
    fn new(kind: LineKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
        }
    }

    fn blank() -> Self {
        Self::new(LineKind::Blank, "")
    }
}

/// Every card for one results payload, including the leading notice.
///
/// On the degraded AI path only articles are kept.
pub fn result_block(items: &[ResultItem], degraded: bool) -> Vec<CardLine> {
    let shown: Vec<&ResultItem> = items
        .iter()
        .filter(|item| !degraded || item.as_article().is_some())
        .collect();

    let mut lines = Vec::new();
    if degraded {
        if shown.is_empty() {
            lines.push(CardLine::new(LineKind::Notice, DEGRADED_NO_RESULTS));
            return lines;
        }
        lines.push(CardLine::new(LineKind::Notice, DEGRADED_NOTICE));
    } else if shown.is_empty() {
        lines.push(CardLine::new(LineKind::Notice, NO_RESULTS));
        return lines;
    }

    for item in shown {
        lines.extend(card(item));
        lines.push(CardLine::blank());
    }
    lines.pop();
    lines
}

pub fn card(item: &ResultItem) -> Vec<CardLine> {
    match item {
        ResultItem::Article(article) => article_card(article),
        ResultItem::Other(document) => document_card(document),
    }
}

fn article_card(article: &Article) -> Vec<CardLine> {
    let mut lines = vec![CardLine::new(LineKind::Heading, article.display())];
    if let Some(location) = article.location() {
        lines.push(CardLine::new(LineKind::Meta, location));
    }

    if article.is_deleted() {
        lines.push(CardLine::new(LineKind::Deleted, DELETED));
        return lines;
    }

    if let Some(text) = non_empty(&article.legal_text) {
        lines.push(CardLine::new(LineKind::Label, "條文原文"));
        lines.extend(text.lines().map(|l| CardLine::new(LineKind::Body, l)));
    }
    if let Some(text) = non_empty(&article.explanation) {
        lines.push(CardLine::new(LineKind::Label, "白話解說"));
        lines.extend(text.lines().map(|l| CardLine::new(LineKind::Body, l)));
    }

    let tags = article.tag_list();
    if !tags.is_empty() {
        lines.push(CardLine::new(LineKind::Label, "標籤"));
        let text = tags
            .iter()
            .map(|t| format!("#{}", t))
            .collect::<Vec<_>>()
            .join(" ");
        lines.push(CardLine::new(LineKind::Tags, text));
    }

    if !article.related.is_empty() {
        lines.push(CardLine::new(LineKind::Label, "相關條文"));
        let text = article
            .related
            .iter()
            .map(|r| format!("第 {} 條", r.number))
            .collect::<Vec<_>>()
            .join("  ");
        lines.push(CardLine::new(LineKind::Related, text));
    }

    lines
}

fn document_card(document: &StudyDocument) -> Vec<CardLine> {
    let mut lines = vec![CardLine::new(LineKind::Heading, document.title())];
    if let Some(content) = non_empty(&document.raw_content) {
        let preview: String = content.chars().take(PREVIEW_CHARS).collect();
        lines.extend(preview.lines().map(|l| CardLine::new(LineKind::Body, l)));
    }
    lines
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}
