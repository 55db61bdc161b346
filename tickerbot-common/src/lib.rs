//! tickerbot-common - Shared configuration, errors and utilities for tickerbot.
//!
//! This crate provides:
//! - Configuration types and loading (file + environment overrides)
//! - Error types with HTTP status mapping
//! - Logging setup with noise filtering
//! - Atomic file writes and small string helpers

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod logging;
pub mod util;

pub use config::{
    AlertJobConfig, AlertsConfig, Config, DashboardConfig, FmpConfig, LlmConfig,
    ObservabilityConfig, ProvidersConfig, SentimentConfig, TelegramConfig, WatchlistConfig,
    YahooConfig,
};
pub use error::{Error, Result};

/// Re-export commonly used types for convenience
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{Error, Result};
    pub use crate::logging::init_logging;
}
