//! Telegram command parsing and handling.
//!
//! Handlers return the reply text; they never fail outward. Errors become
//! user-facing messages via [`CommandError::user_message`].

use std::fmt::Write as _;

use crate::alerts::format_price;
use crate::data::{Symbol, SymbolError};
use crate::metrics::SentimentSnapshot;
use crate::watchlist::{AddOutcome, RemoveOutcome};
use crate::AppState;
use tickerbot_common::util::format_duration_secs;

pub const HELP_TEXT: &str = "\
📊 *tickerbot*

/stocks - Show the watchlist
/add SYMBOL - Add a symbol (e.g. /add TSLA, /add USDSGD=X)
/remove SYMBOL - Remove a symbol
/quote SYMBOL - Latest quote
/market - Market sentiment
/research SYMBOL [question] - Indicators and an AI summary
/status - Alert job status
/alerts - Run every alert check now
/help - This message";

/// A parsed chat command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    Stocks,
    Add(Option<String>),
    Remove(Option<String>),
    Quote(Option<String>),
    Market,
    Research {
        symbol: Option<String>,
        question: Option<String>,
    },
    Status,
    Alerts,
    Unknown(String),
}

impl Command {
    /// Parse a message. `None` when the text is not a command.
    ///
    /// Accepts the `/cmd@botname` form Telegram uses in group chats.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        let body = text.strip_prefix('/')?;
        let (head, rest) = match body.split_once(char::is_whitespace) {
            Some((head, rest)) => (head, rest.trim()),
            None => (body, ""),
        };
        let name = head.split('@').next().unwrap_or(head).to_ascii_lowercase();

        let first_arg = rest.split_whitespace().next().map(String::from);

        Some(match name.as_str() {
            "start" => Self::Start,
            "help" => Self::Help,
            "stocks" | "list" | "watchlist" => Self::Stocks,
            "add" => Self::Add(first_arg),
            "remove" | "rm" => Self::Remove(first_arg),
            "quote" | "q" => Self::Quote(first_arg),
            "market" => Self::Market,
            "research" => {
                let question = rest
                    .split_once(char::is_whitespace)
                    .map(|(_, q)| q.trim().to_string())
                    .filter(|q| !q.is_empty());
                Self::Research {
                    symbol: first_arg,
                    question,
                }
            }
            "status" => Self::Status,
            "alerts" => Self::Alerts,
            _ => Self::Unknown(name),
        })
    }
}

/// Why a command could not be served.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("missing argument, usage: {0}")]
    MissingArgument(&'static str),

    #[error(transparent)]
    InvalidSymbol(#[from] SymbolError),

    #[error(transparent)]
    Failed(#[from] tickerbot_common::Error),
}

impl CommandError {
    pub fn user_message(&self) -> String {
        match self {
            Self::MissingArgument(usage) => format!("Usage: {usage}"),
            Self::InvalidSymbol(e) => format!("❌ Invalid symbol: {e}"),
            Self::Failed(tickerbot_common::Error::Unavailable(msg)) => {
                format!("⚠️ {msg}. Please try again later.")
            }
            Self::Failed(e) => format!("⚠️ {e}"),
        }
    }
}

type CommandResult = std::result::Result<String, CommandError>;

fn symbol_arg(arg: Option<&str>, usage: &'static str) -> std::result::Result<Symbol, CommandError> {
    let raw = arg.ok_or(CommandError::MissingArgument(usage))?;
    Ok(Symbol::parse(raw)?)
}

/// Handle a command and produce the reply.
pub async fn handle(state: &AppState, command: Command) -> String {
    let result = match command {
        Command::Start | Command::Help | Command::Unknown(_) => Ok(HELP_TEXT.to_string()),
        Command::Stocks => Ok(stocks(state)),
        Command::Add(arg) => add(state, arg.as_deref()),
        Command::Remove(arg) => remove(state, arg.as_deref()),
        Command::Quote(arg) => quote(state, arg.as_deref()).await,
        Command::Market => Ok(format_sentiment(&state.sentiment.snapshot().await)),
        Command::Research { symbol, question } => research(state, symbol.as_deref(), question.as_deref()).await,
        Command::Status => Ok(status(state)),
        Command::Alerts => Ok(run_alerts(state).await),
    };

    result.unwrap_or_else(|e| {
        tracing::debug!(error = %e, "Command failed");
        e.user_message()
    })
}

fn stocks(state: &AppState) -> String {
    let symbols = state.watchlist.list();
    if symbols.is_empty() {
        return "📋 The watchlist is empty. Add one with /add SYMBOL".to_string();
    }

    let mut out = format!("📋 *Watchlist* ({})\n", symbols.len());
    for symbol in symbols {
        let line = match state.provider.cached_quote(&symbol) {
            Some(quote) => format!(
                "• {} {}",
                quote.display_name(),
                format_price(&symbol, quote.price)
            ),
            None => format!("• {symbol}"),
        };
        let _ = writeln!(out, "{line}");
    }
    out
}

fn add(state: &AppState, arg: Option<&str>) -> CommandResult {
    let symbol = symbol_arg(arg, "/add SYMBOL")?;
    let outcome = state
        .watchlist
        .add(symbol.clone())
        .map_err(tickerbot_common::Error::from)?;
    Ok(match outcome {
        AddOutcome::Added => format!("✅ Added {symbol} to the watchlist"),
        AddOutcome::AlreadyPresent => format!("ℹ️ {symbol} is already on the watchlist"),
    })
}

fn remove(state: &AppState, arg: Option<&str>) -> CommandResult {
    let symbol = symbol_arg(arg, "/remove SYMBOL")?;
    let outcome = state
        .watchlist
        .remove(&symbol)
        .map_err(tickerbot_common::Error::from)?;
    Ok(match outcome {
        RemoveOutcome::Removed => format!("🗑 Removed {symbol} from the watchlist"),
        RemoveOutcome::NotFound => format!("❌ {symbol} is not in the watchlist"),
    })
}

async fn quote(state: &AppState, arg: Option<&str>) -> CommandResult {
    let symbol = symbol_arg(arg, "/quote SYMBOL")?;
    let quote = state.quote(symbol.as_str()).await?;

    let icon = if quote.change >= 0.0 { "📈" } else { "📉" };
    let mut out = format!(
        "{icon} *{}*\nPrice: {} ({:+.2}, {:+.2}%)",
        quote.display_name(),
        format_price(&symbol, quote.price),
        quote.change,
        quote.change_percent,
    );
    if let (Some(low), Some(high)) = (quote.year_low, quote.year_high) {
        let _ = write!(
            out,
            "\n52-week range: {} - {}",
            format_price(&symbol, low),
            format_price(&symbol, high)
        );
    }
    if let Some(volume) = quote.volume {
        let _ = write!(out, "\nVolume: {volume}");
    }
    let _ = write!(out, "\nSource: {} ({})", quote.provider, quote.source);
    if quote.stale {
        let _ = write!(out, "\n⚠️ Cached data from {}", quote.fetched_at.format("%Y-%m-%d %H:%M UTC"));
    }
    Ok(out)
}

async fn research(state: &AppState, arg: Option<&str>, question: Option<&str>) -> CommandResult {
    let symbol = symbol_arg(arg, "/research SYMBOL [question]")?;
    let data = state.indicators(&symbol).await?;
    let ind = &data.indicators;

    let fmt_ma = |v: Option<f64>| v.map_or_else(|| "n/a".to_string(), |v| format_price(&symbol, v));
    let mut out = format!(
        "🔬 *{}* {}\nPrice: {}\nSMA20: {} | SMA50: {} | SMA200: {}\nRSI(14): {:.1}",
        data.quote.as_ref().map_or_else(|| symbol.to_string(), |q| q.display_name()),
        ind.trend.emoji(),
        format_price(&symbol, ind.price),
        fmt_ma(ind.sma20),
        fmt_ma(ind.sma50),
        fmt_ma(ind.sma200),
        ind.rsi,
    );
    if let Some(vol) = ind.volatility {
        let _ = write!(out, "\nVolatility (annualized): {:.1}%", vol * 100.0);
    }
    if let Some(pos) = ind.year_position {
        let _ = write!(out, "\n52-week position: {:.0}%", pos * 100.0);
    }

    match &state.llm {
        Some(llm) => match llm.research(data.quote.as_ref(), ind, question).await {
            Ok(summary) => {
                let _ = write!(out, "\n\n🤖 {summary}");
            }
            Err(e) => {
                tracing::warn!(symbol = %symbol, error = %e, "LLM research failed");
                out.push_str("\n\n⚠️ AI summary unavailable right now.");
            }
        },
        None => out.push_str("\n\nℹ️ AI summary disabled (no GROQ_API_KEY)."),
    }
    Ok(out)
}

/// Sentiment snapshot as a chat message.
pub fn format_sentiment(snap: &SentimentSnapshot) -> String {
    let fmt_opt = |v: Option<f64>, suffix: &str| {
        v.map_or_else(|| "n/a".to_string(), |v| format!("{v:.2}{suffix}"))
    };
    let breadth = match (snap.inputs.advancers, snap.inputs.decliners) {
        (Some(a), Some(d)) => format!("{a} up / {d} down"),
        _ => "n/a".to_string(),
    };

    format!(
        "🌡 *Market sentiment*: {} ({:.0}/100)\nScore: {:+.1}\n\nVIX: {}\nIndex 5-day: {}\n10Y yield change: {}\nBreadth: {}\n\nInputs available: {}/4",
        snap.label.as_str(),
        snap.index,
        snap.score,
        fmt_opt(snap.inputs.vix_level, ""),
        fmt_opt(snap.inputs.index_momentum_pct, "%"),
        fmt_opt(snap.inputs.yield_change_pct, "%"),
        breadth,
        snap.available_inputs,
    )
}

fn status(state: &AppState) -> String {
    let uptime = (chrono::Utc::now() - state.started_at).num_seconds().max(0) as u64;
    let stats = state.provider.stats();
    let mut out = format!(
        "⚙️ *Status*\nUptime: {}\nWatchlist: {} symbols\nData: {} primary / {} fallback / {} cached / {} stale / {} failed",
        format_duration_secs(uptime),
        state.watchlist.len(),
        stats.primary,
        stats.fallback,
        stats.cache_hits,
        stats.stale,
        stats.failures,
    );
    if stats.primary_disabled {
        out.push_str("\n⚠️ Primary source disabled after repeated 403s");
    }

    out.push_str("\n\n*Jobs*");
    for job in state.job_status() {
        let state_icon = if job.running { "⏳" } else { "✅" };
        let last = job
            .last_finished
            .map_or_else(|| "never".to_string(), |t| t.format("%H:%M UTC").to_string());
        let _ = write!(
            out,
            "\n{state_icon} {} every {} (runs {}, failures {}, last {last})",
            job.name,
            format_duration_secs(job.interval_secs),
            job.runs,
            job.failures,
        );
    }
    out
}

async fn run_alerts(state: &AppState) -> String {
    let statuses = state.scheduler.run_all_once().await;
    let sent: usize = statuses
        .iter()
        .filter_map(|s| s.last_report)
        .map(|r| r.alerts_sent)
        .sum();
    let failed = statuses.iter().filter(|s| s.last_error.is_some()).count();

    let mut out = format!("🔔 Ran {} alert checks, {sent} alerts sent", statuses.len());
    if failed > 0 {
        let _ = write!(out, ", {failed} failed");
    }
    out
}
