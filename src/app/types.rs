use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use serde_json::Value;

use super::confirm::ActionId;
use super::error::GatewayError;
use super::gateway::AuthHeader;
use super::pagination::DEFAULT_PAGE_SIZE;
use super::tabs::{DEFAULT_LOG_LENGTH, DashSettings, LogFilter, Tab};

#[derive(Debug, Parser, Clone)]
#[command(
    name = "brokerdash",
    version,
    about = "Terminal dashboard for an OKSE message broker"
)]
pub struct Cli {
    /// Broker web root; requests go to `<URL>/api/...`.
    #[arg(
        long,
        value_name = "URL",
        env = "BROKERDASH_URL",
        default_value = "http://localhost:8083"
    )]
    pub base_url: String,

    /// Seconds between refreshes of the visible tab.
    #[arg(long, value_name = "SECS", default_value_t = 2, value_parser = clap::value_parser!(u64).range(1..))]
    pub interval: u64,

    #[arg(long, value_name = "N", default_value_t = DEFAULT_PAGE_SIZE)]
    pub page_size: usize,

    #[arg(long, value_enum, default_value_t = Tab::Main)]
    pub tab: Tab,

    #[arg(long, value_name = "NAME", default_value = "X-CSRF-TOKEN")]
    pub auth_header: String,

    #[arg(long, value_name = "TOKEN", env = "BROKERDASH_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    #[arg(long, value_name = "MS", default_value_t = 10_000)]
    pub timeout_ms: u64,

    #[arg(long, value_name = "N", default_value_t = DEFAULT_LOG_LENGTH)]
    pub log_length: usize,

    /// Where diagnostics go while the terminal UI owns the screen.
    #[arg(long, value_name = "FILE")]
    pub log_file: Option<PathBuf>,

    #[arg(long, default_value_t = false)]
    pub no_tui: bool,

    #[arg(short, long, value_name = "FILE")]
    pub output: Option<String>,

    #[arg(long, value_enum, default_value_t = FileFormatArg::Csv)]
    pub format: FileFormatArg,

    /// Stop headless polling after this many rendered refreshes.
    #[arg(long, value_name = "N")]
    pub max_refreshes: Option<usize>,
}

impl Cli {
    pub fn settings(&self) -> DashSettings {
        DashSettings {
            interval: Duration::from_secs(self.interval.max(1)),
            page_size: self.page_size.max(1),
            log: LogFilter {
                length: self.log_length.max(1),
                ..LogFilter::default()
            },
        }
    }

    pub fn auth(&self) -> Option<AuthHeader> {
        self.token
            .as_ref()
            .filter(|token| !token.trim().is_empty())
            .map(|token| AuthHeader {
                name: self.auth_header.clone(),
                value: token.trim().to_string(),
            })
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.max(1))
    }
}

#[derive(Debug, Copy, Clone, ValueEnum, PartialEq, Eq)]
pub enum FileFormatArg {
    Csv,
    Json,
}

/// Everything that reaches the event loop from spawned tasks.
#[derive(Debug)]
pub enum DashEvent {
    Tick {
        tab: Tab,
        generation: u64,
    },
    Fetched {
        tab: Tab,
        generation: u64,
        result: Result<Value, GatewayError>,
    },
    ActionSettled {
        id: ActionId,
        result: Result<Value, GatewayError>,
    },
    DetailLoaded {
        topic_id: String,
        failure_message: &'static str,
        result: Result<Value, GatewayError>,
    },
    LogLevels(Result<Value, GatewayError>),
    LogFiles(Result<Value, GatewayError>),
}
