//! Kumo-Fetch: a polite, failure-tolerant fetch scheduler
//!
//! This crate implements the request-admission and scheduling engine for a
//! single crawl run: per-host queueing with politeness delays, robots.txt
//! gating with cached rule sets, retry/redirect bookkeeping, and dead-host
//! circuit breaking. Fetch execution and output writing are pluggable
//! collaborators behind narrow traits.

pub mod config;
pub mod crawler;
pub mod output;
pub mod request;
pub mod robots;
pub mod scheduler;
pub mod url;

use thiserror::Error;

/// Main error type for Kumo-Fetch operations
#[derive(Debug, Error)]
pub enum KumoError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Output error: {0}")]
    Output(#[from] output::OutputError),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Fetch source error: {0}")]
    Source(String),

    #[error("Scheduler error: {0}")]
    Scheduler(String),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// Result type alias for Kumo-Fetch operations
pub type Result<T> = std::result::Result<T, KumoError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use crate::config::Config;
pub use crate::request::{ErrorReason, FailureReason, RequestRecord};
pub use crate::robots::{RobotRulesParser, RuleSet};
pub use crate::scheduler::{FetcherStatus, RequestScheduler};
pub use crate::url::HostKey;
