//! Configuration management for tickerbot.
//!
//! The bot reads a single configuration file at `~/.tickerbot/config.json`.
//!
//! # Configuration Priority
//!
//! 1. Environment variables
//! 2. Explicit config file values
//! 3. Default values
//!
//! # Environment Variable Mapping
//!
//! ## Secrets
//! - `TELEGRAM_BOT_TOKEN` → telegram.bot_token
//! - `TELEGRAM_CHAT_ID` → telegram.chat_id
//! - `FMP_API_KEY` → providers.fmp.api_key
//! - `GROQ_API_KEY` → llm.api_key
//!
//! ## Tuning
//! - `FMP_DELAY_SECONDS` → providers.fmp.min_delay_ms (fractional seconds)
//! - `ALERT_<JOB>_INTERVAL` → alerts.<job>.interval_secs
//! - `STARTUP_DELAY_<JOB>` → alerts.<job>.offset_secs
//!
//! `<JOB>` is the uppercased job name (`PRICE_MONITOR`, `YEAR_HIGH`, `BUY_DIP`,
//! `MA_CROSSOVER`, `EARNINGS`, `DIVIDENDS`). The older deployment names
//! `STOCK`, `52_WEEK_HIGH` and `DIVIDEND` are accepted as aliases; the job
//! name wins when both are set.
//!
//! - `EARNINGS_DAYS_AHEAD` / `DIVIDEND_DAYS_AHEAD` → alerts.*_days_ahead
//! - `DEFAULT_STOCKS` → watchlist.defaults (comma separated)
//! - `TICKERBOT_WATCHLIST` → watchlist.path
//! - `TICKERBOT_DASHBOARD_PORT` → dashboard.port
//! - `TICKERBOT_LOG_LEVEL` / `TICKERBOT_LOG_FORMAT` → observability.*

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Error;

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new().map_or_else(
        || PathBuf::from(".tickerbot"),
        |dirs| dirs.home_dir().join(".tickerbot"),
    )
}

/// Get the configuration file path.
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub observability: ObservabilityConfig,

    #[serde(default)]
    pub telegram: TelegramConfig,

    /// Market data sources and cache lifetimes
    #[serde(default)]
    pub providers: ProvidersConfig,

    #[serde(default)]
    pub alerts: AlertsConfig,

    #[serde(default)]
    pub watchlist: WatchlistConfig,

    #[serde(default)]
    pub dashboard: DashboardConfig,

    /// Hosted LLM used for research summaries
    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub sentiment: SentimentConfig,
}

impl Config {
    /// Load configuration from the default path.
    pub fn load() -> Result<Self> {
        let path = config_path();
        if !path.exists() {
            tracing::info!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Load configuration with environment variable overrides applied.
    pub fn load_with_env() -> Result<Self> {
        let mut config = Self::load()?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary lookup.
    ///
    /// Split out from [`Config::apply_env_overrides`] so tests don't have to
    /// mutate the process environment.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(level) = lookup("TICKERBOT_LOG_LEVEL") {
            self.observability.log_level = level;
        }
        if let Some(format) = lookup("TICKERBOT_LOG_FORMAT") {
            self.observability.log_format = format;
        }

        if let Some(token) = lookup("TELEGRAM_BOT_TOKEN") {
            self.telegram.bot_token = Some(token);
        }
        if let Some(chat_id) = lookup("TELEGRAM_CHAT_ID") {
            self.telegram.chat_id = Some(chat_id);
        }

        if let Some(key) = lookup("FMP_API_KEY") {
            self.providers.fmp.api_key = Some(key);
        }
        if let Some(delay) = lookup("FMP_DELAY_SECONDS") {
            match delay.trim().parse::<f64>() {
                Ok(secs) if secs >= 0.0 => {
                    self.providers.fmp.min_delay_ms = (secs * 1000.0).round() as u64;
                }
                _ => tracing::warn!(value = %delay, "Ignoring invalid FMP_DELAY_SECONDS"),
            }
        }

        if let Some(key) = lookup("GROQ_API_KEY") {
            self.llm.api_key = Some(key);
        }

        if let Some(port) = lookup("TICKERBOT_DASHBOARD_PORT") {
            if let Ok(p) = port.parse() {
                self.dashboard.port = p;
            }
        }

        if let Some(path) = lookup("TICKERBOT_WATCHLIST") {
            self.watchlist.path = Some(PathBuf::from(path));
        }
        if let Some(defaults) = lookup("DEFAULT_STOCKS") {
            let symbols: Vec<String> = defaults
                .split(',')
                .map(|s| s.trim().to_uppercase())
                .filter(|s| !s.is_empty())
                .collect();
            if !symbols.is_empty() {
                self.watchlist.defaults = symbols;
            }
        }

        for (names, job) in self.alerts.jobs_mut() {
            if let Some(secs) = first_parsed(&lookup, names, |n| format!("ALERT_{n}_INTERVAL")) {
                job.interval_secs = secs;
            }
            if let Some(secs) = first_parsed(&lookup, names, |n| format!("STARTUP_DELAY_{n}")) {
                job.offset_secs = Some(secs);
            }
        }

        if let Some(days) = lookup("EARNINGS_DAYS_AHEAD").and_then(|v| v.trim().parse().ok()) {
            self.alerts.earnings_days_ahead = days;
        }
        if let Some(days) = lookup("DIVIDEND_DAYS_AHEAD").and_then(|v| v.trim().parse().ok()) {
            self.alerts.dividend_days_ahead = days;
        }
    }

    /// Reject configurations the scheduler and alert jobs cannot run with.
    pub fn validate(&self) -> crate::error::Result<()> {
        let alerts = &self.alerts;
        for (names, job) in alerts.jobs() {
            if job.interval_secs == 0 {
                return Err(Error::Config(format!(
                    "alert job {} has a zero interval",
                    names[0].to_lowercase()
                )));
            }
        }
        if alerts.ma_short == 0 || alerts.ma_short >= alerts.ma_long {
            return Err(Error::Config(format!(
                "ma_short ({}) must be positive and below ma_long ({})",
                alerts.ma_short, alerts.ma_long
            )));
        }
        if alerts.watch_zone_min_pct > alerts.watch_zone_max_pct {
            return Err(Error::Config(
                "watch_zone_min_pct must not exceed watch_zone_max_pct".into(),
            ));
        }
        if self.providers.quote_ttl_secs == 0 {
            return Err(Error::Config("quote_ttl_secs must be positive".into()));
        }
        Ok(())
    }

    /// Save configuration to the default path.
    pub fn save(&self) -> Result<()> {
        let dir = config_dir();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create config directory {}", dir.display()))?;

        let content = serde_json::to_string_pretty(self)?;
        crate::util::write_atomic(&config_path(), content.as_bytes())
            .context("Failed to write config")
    }

    /// Resolved watchlist file path.
    pub fn watchlist_path(&self) -> PathBuf {
        self.watchlist
            .path
            .clone()
            .unwrap_or_else(|| config_dir().join("watchlist.txt"))
    }

    /// Resolved directory for persisted alert state.
    pub fn state_dir(&self) -> PathBuf {
        self.watchlist.state_dir.clone().unwrap_or_else(config_dir)
    }

    /// Whether Telegram delivery is usable.
    pub fn telegram_enabled(&self) -> bool {
        self.telegram.enabled && self.telegram.bot_token.is_some() && self.telegram.chat_id.is_some()
    }
}

/// First env name in `names` whose variable parses, in order.
fn first_parsed<F, K>(lookup: &F, names: &[&str], key: K) -> Option<u64>
where
    F: Fn(&str) -> Option<String>,
    K: Fn(&str) -> String,
{
    names.iter().find_map(|name| {
        let raw = lookup(&key(name))?;
        match raw.trim().parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(key = %key(name), value = %raw, "Ignoring invalid value");
                None
            }
        }
    })
}

// ============================================================================
// Observability
// ============================================================================

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level", alias = "level")]
    pub log_level: String,

    /// Log format (json, pretty)
    #[serde(default = "default_log_format", alias = "format")]
    pub log_format: String,

    /// Additional module targets capped at `warn`.
    #[serde(default)]
    pub excluded_targets: Vec<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
            excluded_targets: Vec::new(),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "pretty".into()
}

// ============================================================================
// Telegram
// ============================================================================

/// Telegram bot configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub bot_token: Option<String>,

    /// The single chat the bot answers and alerts
    #[serde(default)]
    pub chat_id: Option<String>,

    #[serde(default = "default_telegram_api_base")]
    pub api_base: String,

    /// Long-poll timeout for getUpdates
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_secs: u64,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bot_token: None,
            chat_id: None,
            api_base: default_telegram_api_base(),
            poll_timeout_secs: default_poll_timeout(),
        }
    }
}

fn default_telegram_api_base() -> String {
    "https://api.telegram.org".into()
}

fn default_poll_timeout() -> u64 {
    30
}

// ============================================================================
// Market data providers
// ============================================================================

/// Market data source configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub fmp: FmpConfig,

    #[serde(default)]
    pub yahoo: YahooConfig,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_quote_ttl")]
    pub quote_ttl_secs: u64,

    #[serde(default = "default_history_ttl")]
    pub history_ttl_secs: u64,

    #[serde(default = "default_earnings_ttl")]
    pub earnings_ttl_secs: u64,

    #[serde(default = "default_earnings_ttl")]
    pub dividends_ttl_secs: u64,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            fmp: FmpConfig::default(),
            yahoo: YahooConfig::default(),
            request_timeout_secs: default_request_timeout(),
            quote_ttl_secs: default_quote_ttl(),
            history_ttl_secs: default_history_ttl(),
            earnings_ttl_secs: default_earnings_ttl(),
            dividends_ttl_secs: default_earnings_ttl(),
        }
    }
}

/// Financial Modeling Prep (primary source).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FmpConfig {
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_fmp_base_url")]
    pub base_url: String,

    /// Minimum delay between two calls to this source
    #[serde(default = "default_min_delay_ms")]
    pub min_delay_ms: u64,

    /// Consecutive 403 responses before the source is disabled
    #[serde(default = "default_forbidden_threshold")]
    pub forbidden_threshold: u32,
}

impl Default for FmpConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_fmp_base_url(),
            min_delay_ms: default_min_delay_ms(),
            forbidden_threshold: default_forbidden_threshold(),
        }
    }
}

/// Yahoo Finance (fallback source).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YahooConfig {
    #[serde(default = "default_yahoo_base_url")]
    pub base_url: String,

    #[serde(default = "default_min_delay_ms")]
    pub min_delay_ms: u64,
}

impl Default for YahooConfig {
    fn default() -> Self {
        Self {
            base_url: default_yahoo_base_url(),
            min_delay_ms: default_min_delay_ms(),
        }
    }
}

fn default_fmp_base_url() -> String {
    "https://financialmodelingprep.com".into()
}

fn default_yahoo_base_url() -> String {
    "https://query1.finance.yahoo.com".into()
}

fn default_min_delay_ms() -> u64 {
    500
}

fn default_forbidden_threshold() -> u32 {
    10
}

fn default_request_timeout() -> u64 {
    15
}

fn default_quote_ttl() -> u64 {
    60
}

fn default_history_ttl() -> u64 {
    300
}

fn default_earnings_ttl() -> u64 {
    6 * 3600
}

// ============================================================================
// Alerts
// ============================================================================

/// Timing for one scheduled alert job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertJobConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    pub interval_secs: u64,

    /// First-run delay. `None` spreads the job across the startup window.
    #[serde(default)]
    pub offset_secs: Option<u64>,
}

impl AlertJobConfig {
    fn new(interval_secs: u64, offset_secs: u64) -> Self {
        Self {
            enabled: true,
            interval_secs,
            offset_secs: Some(offset_secs),
        }
    }
}

/// Alert scheduling and thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertsConfig {
    /// Window across which un-offset jobs are spread at startup
    pub startup_window_secs: u64,
    /// Grace period for in-flight checks on shutdown
    pub shutdown_grace_secs: u64,

    pub price_monitor: AlertJobConfig,
    pub year_high: AlertJobConfig,
    pub buy_dip: AlertJobConfig,
    pub ma_crossover: AlertJobConfig,
    pub earnings: AlertJobConfig,
    pub dividends: AlertJobConfig,

    pub price_move_pct: f64,
    pub fx_move_pct: f64,
    pub year_high_threshold_pct: f64,
    pub watch_zone_min_pct: f64,
    pub watch_zone_max_pct: f64,
    pub dip_threshold_pct: f64,
    pub dip_step_pct: f64,
    pub ma_short: usize,
    pub ma_long: usize,
    pub ma_lookback_days: usize,
    pub earnings_days_ahead: u32,
    pub dividend_days_ahead: u32,
}

/// Env names per job: the job name first, then deployment aliases.
const PRICE_MONITOR_ENV: &[&str] = &["PRICE_MONITOR", "STOCK"];
const YEAR_HIGH_ENV: &[&str] = &["YEAR_HIGH", "52_WEEK_HIGH"];
const BUY_DIP_ENV: &[&str] = &["BUY_DIP"];
const MA_CROSSOVER_ENV: &[&str] = &["MA_CROSSOVER"];
const EARNINGS_ENV: &[&str] = &["EARNINGS"];
const DIVIDENDS_ENV: &[&str] = &["DIVIDENDS", "DIVIDEND"];

impl AlertsConfig {
    fn jobs(&self) -> [(&'static [&'static str], &AlertJobConfig); 6] {
        [
            (PRICE_MONITOR_ENV, &self.price_monitor),
            (YEAR_HIGH_ENV, &self.year_high),
            (BUY_DIP_ENV, &self.buy_dip),
            (MA_CROSSOVER_ENV, &self.ma_crossover),
            (EARNINGS_ENV, &self.earnings),
            (DIVIDENDS_ENV, &self.dividends),
        ]
    }

    fn jobs_mut(&mut self) -> [(&'static [&'static str], &mut AlertJobConfig); 6] {
        [
            (PRICE_MONITOR_ENV, &mut self.price_monitor),
            (YEAR_HIGH_ENV, &mut self.year_high),
            (BUY_DIP_ENV, &mut self.buy_dip),
            (MA_CROSSOVER_ENV, &mut self.ma_crossover),
            (EARNINGS_ENV, &mut self.earnings),
            (DIVIDENDS_ENV, &mut self.dividends),
        ]
    }
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            startup_window_secs: 2400,
            shutdown_grace_secs: 30,
            price_monitor: AlertJobConfig::new(3600, 40),
            year_high: AlertJobConfig::new(900, 60),
            buy_dip: AlertJobConfig::new(600, 80),
            ma_crossover: AlertJobConfig::new(1800, 20),
            earnings: AlertJobConfig::new(86400, 100),
            dividends: AlertJobConfig::new(86400, 120),
            price_move_pct: 0.5,
            fx_move_pct: 0.2,
            year_high_threshold_pct: 0.5,
            watch_zone_min_pct: 5.0,
            watch_zone_max_pct: 15.0,
            dip_threshold_pct: 10.0,
            dip_step_pct: 5.0,
            ma_short: 50,
            ma_long: 200,
            ma_lookback_days: 90,
            earnings_days_ahead: 14,
            dividend_days_ahead: 30,
        }
    }
}

// ============================================================================
// Watchlist, dashboard, LLM, sentiment
// ============================================================================

/// Watchlist persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchlistConfig {
    /// Defaults to `~/.tickerbot/watchlist.txt`
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Symbols used when no watchlist file exists yet
    #[serde(default = "default_symbols")]
    pub defaults: Vec<String>,

    /// Directory for `alert_state.json`; defaults to the config directory
    #[serde(default)]
    pub state_dir: Option<PathBuf>,
}

impl Default for WatchlistConfig {
    fn default() -> Self {
        Self {
            path: None,
            defaults: default_symbols(),
            state_dir: None,
        }
    }
}

fn default_symbols() -> Vec<String> {
    vec!["AAPL".into(), "MSFT".into(), "GOOGL".into()]
}

/// Dashboard HTTP server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_dashboard_port")]
    pub port: u16,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_host(),
            port: default_dashboard_port(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".into()
}

fn default_dashboard_port() -> u16 {
    8501
}

/// OpenAI-compatible chat completion endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_llm_base_url")]
    pub base_url: String,

    #[serde(default = "default_llm_model")]
    pub model: String,

    #[serde(default = "default_llm_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_llm_temperature")]
    pub temperature: f64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_llm_base_url(),
            model: default_llm_model(),
            max_tokens: default_llm_max_tokens(),
            temperature: default_llm_temperature(),
        }
    }
}

fn default_llm_base_url() -> String {
    "https://api.groq.com/openai/v1".into()
}

fn default_llm_model() -> String {
    "llama-3.1-8b-instant".into()
}

fn default_llm_max_tokens() -> u32 {
    1000
}

fn default_llm_temperature() -> f64 {
    0.3
}

/// Instruments feeding the market sentiment score.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SentimentConfig {
    pub volatility_symbol: String,
    pub index_symbol: String,
    pub yield_symbol: String,
    pub breadth_symbols: Vec<String>,
}

impl Default for SentimentConfig {
    fn default() -> Self {
        Self {
            volatility_symbol: "^VIX".into(),
            index_symbol: "^GSPC".into(),
            yield_symbol: "^TNX".into(),
            breadth_symbols: vec![
                "^DJI".into(),
                "^GSPC".into(),
                "^IXIC".into(),
                "^RUT".into(),
            ],
        }
    }
}

fn default_true() -> bool {
    true
}
