//! Configuration parsing and validation.
//!
//! pricegrid is configured via an optional TOML file. Every section has
//! defaults, so an absent file yields a working local setup. Two values
//! can be overridden from the environment:
//!
//! | Variable | Overrides |
//! |----------|-----------|
//! | `DATABASE_URL` | `[db].url` |
//! | `PORT` | port of `[server].bind` |
//!
//! ```toml
//! [db]
//! url = "sqlite:./data/pricegrid.sqlite"
//!
//! [server]
//! bind = "127.0.0.1:3000"
//!
//! [scrape]
//! url = "https://example.com/admin-pricing"
//! mode = "groups"
//! product = "mailer"
//! timeout_secs = 10
//! batch_size = 100
//! on_empty = "preserve"
//!
//! [schedule]
//! interval_secs = 300
//! groups = ["Black"]
//! ```

use anyhow::{bail, Context, Result};
use pricegrid_core::reconcile::{EmptyPolicy, SyncOptions, DEFAULT_BATCH_SIZE};
use serde::Deserialize;
use std::path::Path;

use crate::pipeline::ScrapeMode;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub scrape: ScrapeConfig,
    #[serde(default)]
    pub schedule: Option<ScheduleConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    /// SQLite connection string, e.g. `sqlite:./data/pricegrid.sqlite`.
    #[serde(default = "default_db_url")]
    pub url: String,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            url: default_db_url(),
        }
    }
}

fn default_db_url() -> String {
    "sqlite:./data/pricegrid.sqlite".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:3000".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScrapeConfig {
    /// Default source page, used when a command or request names none.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub mode: ScrapeMode,
    /// Product key assigned to combinations in `groups` mode.
    #[serde(default = "default_product")]
    pub product: String,
    /// `name` of the control that picks the print group; never a field.
    #[serde(default = "default_group_selector")]
    pub group_selector: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub on_empty: EmptyPolicy,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            url: None,
            mode: ScrapeMode::default(),
            product: default_product(),
            group_selector: default_group_selector(),
            user_agent: default_user_agent(),
            timeout_secs: default_timeout_secs(),
            batch_size: default_batch_size(),
            on_empty: EmptyPolicy::default(),
        }
    }
}

impl ScrapeConfig {
    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            batch_size: self.batch_size,
            on_empty: self.on_empty,
        }
    }
}

fn default_product() -> String {
    "mailer".to_string()
}
fn default_group_selector() -> String {
    "select-3".to_string()
}
fn default_user_agent() -> String {
    concat!("Mozilla/5.0 (compatible; pricegrid/", env!("CARGO_PKG_VERSION"), ")").to_string()
}
fn default_timeout_secs() -> u64 {
    10
}
fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScheduleConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Group selectors to sync (`"Black"` or `"mailer/Black"`); empty means all.
    #[serde(default)]
    pub groups: Vec<String>,
}

fn default_interval_secs() -> u64 {
    300
}

impl Config {
    /// Apply `DATABASE_URL` and `PORT` overrides from `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("DATABASE_URL").filter(|v| !v.trim().is_empty()) {
            self.db.url = url;
        }
        if let Some(port) = lookup("PORT").filter(|v| !v.trim().is_empty()) {
            self.server.bind = with_port(&self.server.bind, port.trim());
        }
    }
}

/// Replace the port of a `host:port` bind address.
fn with_port(bind: &str, port: &str) -> String {
    match bind.rsplit_once(':') {
        Some((host, _)) => format!("{}:{}", host, port),
        None => format!("{}:{}", bind, port),
    }
}

/// Load configuration from `path`, or defaults when `path` is `None`.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let mut config = match path {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            toml::from_str(&content).with_context(|| "Failed to parse config file")?
        }
        None => Config::default(),
    };

    config.apply_env(|key| std::env::var(key).ok());
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.db.url.trim().is_empty() {
        bail!("db.url must not be empty");
    }
    if config.scrape.timeout_secs == 0 {
        bail!("scrape.timeout_secs must be > 0");
    }
    if config.scrape.batch_size == 0 {
        bail!("scrape.batch_size must be > 0");
    }
    if config.scrape.product.trim().is_empty() {
        bail!("scrape.product must not be empty");
    }
    if let Some(schedule) = &config.schedule {
        if schedule.interval_secs == 0 {
            bail!("schedule.interval_secs must be > 0");
        }
    }
    Ok(())
}
