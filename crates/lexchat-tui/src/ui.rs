use lexchat_core::{ExchangePhase, Mode, Theme};
use ratatui::{
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style, Stylize},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Paragraph, Wrap},
    Frame,
};
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use crate::app::{App, Entry};
use crate::cards::{CardLine, LineKind};

struct Palette {
    text: Color,
    muted: Color,
    accent: Color,
    user: Color,
    assistant: Color,
    error: Color,
    bar: Color,
    surface: Color,
}

fn palette(theme: Theme) -> Palette {
    match theme {
        Theme::Light => Palette {
            text: Color::Black,
            muted: Color::DarkGray,
            accent: Color::Blue,
            user: Color::Blue,
            assistant: Color::Magenta,
            error: Color::Red,
            bar: Color::Gray,
            surface: Color::White,
        },
        Theme::Dark => Palette {
            text: Color::White,
            muted: Color::Gray,
            accent: Color::Cyan,
            user: Color::Cyan,
            assistant: Color::Yellow,
            error: Color::LightRed,
            bar: Color::DarkGray,
            surface: Color::Black,
        },
    }
}

/// Render `**bold**` spans and light block markup (headings, bullets).
fn markdown_line(text: &str, p: &Palette) -> Line<'static> {
    let trimmed = text.trim_start();
    if trimmed.starts_with('#') {
        let heading = trimmed.trim_start_matches('#').trim().to_string();
        return Line::from(Span::styled(
            heading,
            Style::default().fg(p.accent).add_modifier(Modifier::BOLD),
        ));
    }

    let text = match trimmed.strip_prefix("- ").or_else(|| trimmed.strip_prefix("* ")) {
        Some(rest) => format!("• {}", rest),
        None => text.to_string(),
    };

    let parts: Vec<&str> = text.split("**").collect();
    // An even count means the last `**` was never closed.
    let unclosed = parts.len() % 2 == 0;
    let mut spans = Vec::new();
    for (i, part) in parts.iter().enumerate() {
        if i % 2 == 0 {
            if !part.is_empty() {
                spans.push(Span::raw(part.to_string()));
            }
        } else if unclosed && i == parts.len() - 1 {
            spans.push(Span::raw(format!("**{}", part)));
        } else if !part.is_empty() {
            spans.push(Span::styled(
                part.to_string(),
                Style::default().add_modifier(Modifier::BOLD),
            ));
        }
    }
    Line::from(spans)
}

fn card_line(line: &CardLine, p: &Palette) -> Line<'static> {
    let style = match line.kind {
        LineKind::Notice => Style::default().fg(p.muted).add_modifier(Modifier::ITALIC),
        LineKind::Heading => Style::default().fg(p.accent).add_modifier(Modifier::BOLD),
        LineKind::Meta => Style::default().fg(p.muted),
        LineKind::Label => Style::default().fg(p.muted).add_modifier(Modifier::UNDERLINED),
        LineKind::Body | LineKind::Blank => Style::default().fg(p.text),
        LineKind::Deleted => Style::default().fg(p.error),
        LineKind::Tags => Style::default().fg(p.assistant),
        LineKind::Related => Style::default().fg(p.user),
    };
    let indent = match line.kind {
        LineKind::Notice | LineKind::Heading | LineKind::Blank => "",
        _ => "  ",
    };
    Line::from(Span::styled(format!("{}{}", indent, line.text), style))
}

pub fn render(app: &mut App, frame: &mut Frame) {
    let p = palette(app.theme);
    let area = frame.area();
    frame.render_widget(
        Block::default().style(Style::default().bg(p.surface).fg(p.text)),
        area,
    );

    let [header_area, chat_area, input_area, footer_area] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Min(0),
        Constraint::Length(3),
        Constraint::Length(1),
    ])
    .areas(area);

    render_header(app, frame, header_area, &p);
    render_transcript(app, frame, chat_area, &p);
    render_input(app, frame, input_area, &p);
    render_footer(app, frame, footer_area, &p);
}

fn render_header(app: &App, frame: &mut Frame, area: Rect, p: &Palette) {
    let title = Line::from(vec![
        Span::styled(" LexChat ", Style::default().fg(p.accent).bold()),
        Span::styled(app.base_url.clone(), Style::default().fg(p.muted)),
        Span::raw(" "),
        Span::styled(
            format!("v{}", env!("CARGO_PKG_VERSION")),
            Style::default().fg(p.muted),
        ),
    ]);

    let header = Paragraph::new(title).style(Style::default().bg(p.bar));
    frame.render_widget(header, area);
}

fn transcript_lines(app: &App, p: &Palette) -> Vec<Line<'static>> {
    let mut lines: Vec<Line> = Vec::new();
    let dots = ".".repeat(app.animation_frame as usize + 1);
    let thinking = Line::from(Span::styled(
        format!("思考中{}", dots),
        Style::default().fg(p.muted).add_modifier(Modifier::ITALIC),
    ));

    for entry in &app.transcript {
        match entry {
            Entry::User(query) => {
                lines.push(Line::from(Span::styled(
                    "你：",
                    Style::default().fg(p.user).add_modifier(Modifier::BOLD),
                )));
                lines.push(Line::from(query.clone()));
            }
            Entry::Refined { refined, .. } => {
                lines.push(Line::from(Span::styled(
                    format!("已優化問題：{}", refined),
                    Style::default().fg(p.muted).add_modifier(Modifier::ITALIC),
                )));
            }
            Entry::Answer { text, streaming } => {
                lines.push(Line::from(Span::styled(
                    "AI：",
                    Style::default().fg(p.assistant).add_modifier(Modifier::BOLD),
                )));
                if text.is_empty() && *streaming {
                    lines.push(thinking.clone());
                } else {
                    lines.extend(text.lines().map(|l| markdown_line(l, p)));
                    if *streaming {
                        lines.push(Line::from(Span::styled("▌", Style::default().fg(p.muted))));
                    }
                }
            }
            Entry::Results(cards) => {
                lines.extend(cards.iter().map(|l| card_line(l, p)));
            }
            Entry::Related(questions) => {
                lines.push(Line::from(Span::styled(
                    "延伸問題（Ctrl-R 帶入）",
                    Style::default().fg(p.muted),
                )));
                lines.extend(questions.iter().map(|q| {
                    Line::from(Span::styled(format!("  • {}", q), Style::default().fg(p.user)))
                }));
            }
            Entry::Error(message) => {
                lines.push(Line::from(Span::styled(
                    format!("⚠ {}", message),
                    Style::default().fg(p.error),
                )));
            }
        }
        lines.push(Line::default());
    }

    if app.phase == ExchangePhase::Sending {
        lines.push(thinking);
    }

    lines
}

/// Rows the lines take once word-wrapped to `width` columns.
fn wrapped_height(lines: &[Line], width: u16) -> u16 {
    let width = width.max(1) as usize;
    let rows: usize = lines
        .iter()
        .map(|line| {
            let text: String = line.spans.iter().map(|span| span.content.as_ref()).collect();
            line_rows(&text, width)
        })
        .sum();
    rows.min(u16::MAX as usize) as u16
}

/// Greedy word wrap: a word that does not fit moves to the next row, and a
/// word wider than a whole row is broken between characters.
fn line_rows(text: &str, width: usize) -> usize {
    let mut rows = 1;
    let mut used = 0;
    let mut rest = text;

    while !rest.is_empty() {
        let word_start = rest.find(|c: char| !c.is_whitespace()).unwrap_or(rest.len());
        let (space, tail) = rest.split_at(word_start);
        let word_end = tail.find(char::is_whitespace).unwrap_or(tail.len());
        let (word, tail) = tail.split_at(word_end);
        rest = tail;

        let space_width = space.width();
        let word_width = word.width();
        if word.is_empty() {
            used = (used + space_width).min(width);
        } else if used + space_width + word_width <= width {
            used += space_width + word_width;
        } else if word_width <= width {
            rows += 1;
            used = word_width;
        } else {
            used = (used + space_width).min(width);
            for c in word.chars() {
                let char_width = c.width().unwrap_or(0);
                if used + char_width > width {
                    rows += 1;
                    used = 0;
                }
                used += char_width;
            }
        }
    }
    rows
}

fn render_transcript(app: &mut App, frame: &mut Frame, area: Rect, p: &Palette) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(p.muted))
        .title(format!(" {} ", app.mode.display_name()));

    let inner_width = area.width.saturating_sub(2);
    let inner_height = area.height.saturating_sub(2);

    let text = if app.transcript.is_empty() && !app.is_busy() {
        let hint = match app.mode {
            Mode::Ai => "請輸入法律問題，例如：董事有哪些責任？",
            Mode::Search => "請輸入條號或關鍵字，例如：第 23 條",
        };
        Text::from(Span::styled(hint, Style::default().fg(p.muted)))
    } else {
        let lines = transcript_lines(app, p);
        let total = wrapped_height(&lines, inner_width);
        app.page_height = inner_height;
        app.max_scroll = total.saturating_sub(inner_height);
        if app.follow {
            app.scroll = app.max_scroll;
        } else {
            app.scroll = app.scroll.min(app.max_scroll);
        }
        Text::from(lines)
    };

    let chat = Paragraph::new(text)
        .block(block)
        .wrap(Wrap { trim: false })
        .scroll((app.scroll, 0));

    frame.render_widget(chat, area);
}

fn render_input(app: &App, frame: &mut Frame, area: Rect, p: &Palette) {
    let title = match app.mode {
        Mode::Ai => " 提問 ",
        Mode::Search => " 搜尋 ",
    };
    let border = if app.is_busy() { p.muted } else { p.accent };
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border))
        .title(title);

    // Scroll horizontally so the cursor stays visible; CJK is two columns wide.
    let inner_width = area.width.saturating_sub(2) as usize;
    let chars: Vec<char> = app.input.chars().collect();
    let cursor = app.cursor.min(chars.len());
    let mut offset = 0;
    while offset < cursor && display_width(&chars[offset..cursor]) >= inner_width {
        offset += 1;
    }

    let visible: String = chars[offset..].iter().collect();
    let input = Paragraph::new(visible)
        .style(Style::default().fg(p.user))
        .block(block);
    frame.render_widget(input, area);

    let cursor_x = display_width(&chars[offset..cursor]) as u16;
    frame.set_cursor_position((area.x + cursor_x + 1, area.y + 1));
}

fn display_width(chars: &[char]) -> usize {
    Span::raw(chars.iter().collect::<String>()).width()
}

fn render_footer(app: &App, frame: &mut Frame, area: Rect, p: &Palette) {
    let mode_style = match app.mode {
        Mode::Ai => Style::default().bg(Color::Magenta).fg(Color::White),
        Mode::Search => Style::default().bg(Color::Blue).fg(Color::White),
    };
    let key_style = Style::default().bg(p.bar).fg(p.text);
    let label_style = Style::default().fg(p.muted);

    let mut spans = vec![Span::styled(
        format!(" {} ", app.mode.display_name()),
        mode_style.bold(),
    )];
    if !app.ai_usable {
        spans.push(Span::styled(" AI 不可用 ", Style::default().fg(p.error)));
    }

    let busy = match app.phase {
        ExchangePhase::Sending => Some("傳送中"),
        ExchangePhase::Streaming => Some("回答中"),
        _ => None,
    };
    if let Some(label) = busy {
        let dots = ".".repeat(app.animation_frame as usize + 1);
        spans.push(Span::styled(
            format!(" {}{:<3}", label, dots),
            Style::default().fg(p.assistant),
        ));
    }

    if let Some(flash) = &app.flash {
        spans.push(Span::styled(format!(" {} ", flash), Style::default().fg(p.accent)));
    } else {
        for (key, label) in [
            ("Enter", "送出"),
            ("Tab", "模式"),
            ("^L", "清除"),
            ("^B", "書籤"),
            ("^T", "主題"),
            ("Esc", "離開"),
        ] {
            spans.push(Span::raw(" "));
            spans.push(Span::styled(format!(" {} ", key), key_style));
            spans.push(Span::styled(format!(" {}", label), label_style));
        }
    }

    frame.render_widget(Paragraph::new(Line::from(spans)), area);
}
