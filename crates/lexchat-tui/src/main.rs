use std::io::{self, Write};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use colored::*;
use lexchat_core::storage::{BOOKMARKS_KEY, SEARCH_HISTORY_KEY, USAGE_STATS_KEY};
use lexchat_core::{
    Bookmarks, ChatSession, Config, ExchangeObserver, ExchangeOutcome, ExchangeState,
    HttpTransport, Mode, ResultItem, SearchHistory, Store, Transport, UsageStats,
};
use tracing::warn;

mod app;
mod cards;
mod handler;
mod logging;
mod tui;
mod ui;

use app::App;
use cards::{CardLine, LineKind};
use tui::EventHandler;

#[derive(Parser)]
#[command(name = "lexchat")]
#[command(about = "Terminal client for the company-law search and Q&A service")]
#[command(version)]
struct Cli {
    /// Backend base URL (overrides config and LEXCHAT_URL)
    #[arg(long, global = true)]
    url: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive chat screen (the default)
    Chat {
        /// Starting mode: ai or search
        #[arg(short, long, value_parser = parse_mode)]
        mode: Option<Mode>,
    },
    /// Ask one question and print the answer as it streams
    Ask {
        /// Your question
        #[arg(required = true, num_args = 1..)]
        question: Vec<String>,
        /// ai or search
        #[arg(short, long, value_parser = parse_mode)]
        mode: Option<Mode>,
    },
    /// Show backend status
    Status,
    /// Show recent queries and usage
    History {
        /// Maximum number of entries
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
    /// List saved answers
    Bookmarks {
        /// Remove the bookmark with this number
        #[arg(long)]
        remove: Option<usize>,
    },
    /// Look up a single article by number
    Article {
        /// Article number, e.g. 23 or 27-1
        number: String,
    },
}

fn parse_mode(s: &str) -> Result<Mode, String> {
    Mode::from_str(s).ok_or_else(|| format!("unknown mode '{}' (expected ai or search)", s))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let (store, store_err) = match Store::open_default() {
        Ok(store) => (store, None),
        Err(err) => (Store::disabled(), Some(err)),
    };

    let command = cli.command.unwrap_or(Commands::Chat { mode: None });
    match (&command, store.dir()) {
        (Commands::Chat { .. }, Some(dir)) => {
            if let Err(err) = logging::init_file(dir) {
                eprintln!("{} {}", "無法寫入紀錄檔：".yellow(), err);
            }
        }
        // Nowhere to put a log file, and stderr belongs to the screen.
        (Commands::Chat { .. }, None) => {}
        _ => logging::init_stderr(),
    }
    if let Some(err) = store_err {
        warn!(error = %err, "no data directory, history and bookmarks will not be saved");
    }

    let mut config = Config::load().unwrap_or_else(|err| {
        warn!(error = %err, "config unreadable, using defaults");
        Config::new()
    });
    if let Some(url) = cli.url {
        config.base_url = url;
    }

    match command {
        Commands::Chat { mode } => run_chat(&config, mode, store).await,
        Commands::Ask { question, mode } => ask(&config, mode, &store, &question.join(" ")).await,
        Commands::Status => show_status(&config).await,
        Commands::History { limit } => {
            show_history(&store, limit);
            Ok(())
        }
        Commands::Bookmarks { remove } => show_bookmarks(&store, remove),
        Commands::Article { number } => show_article(&config, &number).await,
    }
}

fn new_session(config: &Config, mode: Option<Mode>) -> Result<ChatSession> {
    let transport = HttpTransport::new(&config.base_url, config.connect_timeout())?;
    let mut options = config.session_options();
    if let Some(mode) = mode {
        options.mode = mode;
    }
    Ok(ChatSession::new(Arc::new(transport), options))
}

async fn run_chat(config: &Config, mode: Option<Mode>, store: Store) -> Result<()> {
    let mut session = new_session(config, mode)?;
    session.initialize().await;

    let mut events = EventHandler::new();
    let mut app = App::new(session, store, events.sender(), config.base_url.clone());

    tui::install_panic_hook();
    let mut terminal = tui::init()?;
    let result = run_loop(&mut terminal, &mut app, &mut events).await;
    tui::restore()?;
    result
}

async fn run_loop(terminal: &mut tui::Tui, app: &mut App, events: &mut EventHandler) -> Result<()> {
    while !app.should_quit {
        terminal.draw(|frame| ui::render(app, frame))?;
        match events.next().await {
            Some(event) => handler::handle_event(app, event),
            None => break,
        }
    }
    Ok(())
}

/// Prints an exchange to stdout as it happens.
#[derive(Default)]
struct Printer {
    answering: bool,
}

impl ExchangeObserver for Printer {
    fn on_state(&mut self, state: &ExchangeState) {
        if matches!(state, ExchangeState::Settled(_) | ExchangeState::Failed(_)) && self.answering {
            println!();
            self.answering = false;
        }
    }

    fn on_token(&mut self, delta: &str, _text: &str) {
        if !self.answering {
            println!("{}", "AI：".bold().yellow());
            self.answering = true;
        }
        print!("{}", delta);
        let _ = io::stdout().flush();
    }

    fn on_refined(&mut self, _original: &str, refined: &str) {
        println!("{} {}", "已優化問題：".dimmed(), refined.italic());
    }

    fn on_results(&mut self, items: &[ResultItem], degraded: bool) {
        print_card_lines(&cards::result_block(items, degraded));
    }
}

fn print_related(questions: &[String]) {
    if questions.is_empty() {
        return;
    }
    println!("\n{}", "延伸問題".bold().blue());
    for question in questions {
        println!("  • {}", question.cyan());
    }
}

async fn ask(config: &Config, mode: Option<Mode>, store: &Store, question: &str) -> Result<()> {
    let mut session = new_session(config, mode)?;
    session.initialize().await;
    if mode == Some(Mode::Ai) && !session.ai_usable() {
        eprintln!("{}", "AI 模式目前不可用，改用條文搜尋".yellow());
    }
    answer(&mut session, store, question).await
}

/// Run one question through `session`, printing as it goes. The query is
/// recorded before it is sent, so failed attempts still show in history.
async fn answer(session: &mut ChatSession, store: &Store, question: &str) -> Result<()> {
    let question = question.trim();
    if question.is_empty() {
        return Err(anyhow!("問題不可為空白"));
    }
    store.record_submission(question, session.mode());

    match session.submit(question, &mut Printer::default()).await {
        ExchangeOutcome::Answered { query, text } => {
            print_related(&session.related_questions(&query, &text).await);
            Ok(())
        }
        ExchangeOutcome::Failed(err) => Err(err.into()),
        ExchangeOutcome::Ignored => Err(anyhow!("問題不可為空白")),
        ExchangeOutcome::Results { .. } | ExchangeOutcome::Busy => Ok(()),
    }
}

fn print_card_lines(lines: &[CardLine]) {
    for line in lines {
        let text = line.text.as_str();
        match line.kind {
            LineKind::Notice => println!("{}", text.italic().dimmed()),
            LineKind::Heading => println!("{}", text.bold().yellow()),
            LineKind::Meta => println!("  {}", text.dimmed()),
            LineKind::Label => println!("  {}", text.bold().blue()),
            LineKind::Body => println!("  {}", text),
            LineKind::Deleted => println!("  {}", text.red()),
            LineKind::Tags => println!("  {}", text.magenta()),
            LineKind::Related => println!("  {}", text.cyan()),
            LineKind::Blank => println!(),
        }
    }
}

async fn show_status(config: &Config) -> Result<()> {
    let transport = HttpTransport::new(&config.base_url, config.connect_timeout())?;

    println!("{} {}", "後端：".bold(), config.base_url.cyan());
    match transport.status().await {
        Ok(status) => {
            println!("  已索引文件：{}", status.indexed_docs.to_string().bold());
            let ai = if status.ai_available {
                "可用".green()
            } else {
                "不可用".red()
            };
            println!("  AI 模式：{}", ai);
        }
        Err(err) => {
            println!("  {}: {}", "無法連線".red(), err);
        }
    }

    Ok(())
}

fn show_history(store: &Store, limit: usize) {
    let history: SearchHistory = store.load(SEARCH_HISTORY_KEY);
    let stats: UsageStats = store.load(USAGE_STATS_KEY);

    println!("\n{}", "最近的問題".bold().blue());
    println!("{}", "=".repeat(30).dimmed());

    if history.is_empty() {
        println!("{}", "尚無紀錄".dimmed());
    }
    for entry in history.entries().iter().take(limit) {
        let when = entry.timestamp.with_timezone(&Local).format("%Y-%m-%d %H:%M");
        println!(
            "  {} [{}] {}",
            when.to_string().dimmed(),
            entry.mode.display_name().magenta(),
            entry.query
        );
    }

    println!(
        "\n共 {} 次提問（AI {}／搜尋 {}），開啟 {} 次",
        stats.total_queries().to_string().bold(),
        stats.mode_usage.ai,
        stats.mode_usage.search,
        stats.total_views
    );
}

fn show_bookmarks(store: &Store, remove: Option<usize>) -> Result<()> {
    let mut bookmarks: Bookmarks = store.load(BOOKMARKS_KEY);

    if let Some(number) = remove {
        let removed = number
            .checked_sub(1)
            .and_then(|index| bookmarks.remove(index))
            .ok_or_else(|| anyhow!("沒有第 {} 則書籤", number))?;
        store.save(BOOKMARKS_KEY, &bookmarks);
        println!("{} {}", "已移除：".green(), removed.label.unwrap_or(removed.content));
        return Ok(());
    }

    println!("\n{}", "書籤".bold().blue());
    println!("{}", "=".repeat(30).dimmed());
    if bookmarks.is_empty() {
        println!("{}", "尚無書籤（在對話畫面按 Ctrl-B 加入）".dimmed());
    }
    for (i, bookmark) in bookmarks.items().iter().enumerate() {
        let when = bookmark.timestamp.with_timezone(&Local).format("%Y-%m-%d");
        println!(
            "\n{}. {} {}",
            (i + 1).to_string().bold().blue(),
            bookmark.label.as_deref().unwrap_or("（未命名）").bold().yellow(),
            when.to_string().dimmed()
        );
        for line in bookmark.content.lines() {
            println!("   {}", line);
        }
    }

    Ok(())
}

async fn show_article(config: &Config, number: &str) -> Result<()> {
    let session = new_session(config, None)?;
    match session.lookup_article(number).await? {
        Some(item) => print_card_lines(&cards::card(&item)),
        None => println!("{}", format!("找不到第 {} 條", number).red()),
    }
    Ok(())
}
