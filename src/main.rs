//! # pricegrid CLI
//!
//! The `pricegrid` binary drives the scrape pipeline and serves the admin
//! API.
//!
//! ## Usage
//!
//! ```bash
//! pricegrid [--config ./pricegrid.toml] <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `pricegrid init` | Create the SQLite database and run schema migrations |
//! | `pricegrid scrape` | Scrape a page once and sync its combinations |
//! | `pricegrid labels` | List the select captions found on a page |
//! | `pricegrid list` | Print stored combinations grouped by product and group |
//! | `pricegrid summary` | Print per-group combination counts |
//! | `pricegrid watch` | Re-scrape a page on an interval |
//! | `pricegrid serve` | Start the HTTP API |
//!
//! ## Examples
//!
//! ```bash
//! # Sync both print groups of a pricing page
//! pricegrid scrape --url https://example.com/mailers
//!
//! # Sync only the Black group, from a saved copy
//! pricegrid scrape --url ./saved/mailers.html --group Black
//!
//! # One group per product form
//! pricegrid scrape --url https://example.com/products --mode forms
//!
//! # Re-scrape every ten minutes
//! pricegrid watch --url https://example.com/mailers --interval 600
//! ```
//!
//! Logging goes to stderr and is controlled with `RUST_LOG`
//! (default `info`).

use std::path::PathBuf;
use std::time::Duration;

use anyhow::bail;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use pricegrid::config::{self, Config};
use pricegrid::pipeline::{ScrapeMode, ScrapeRequest};
use pricegrid::{catalog, migrate, pipeline, schedule, server, summary};

/// Scrape a print-shop pricing form into a price-preserving combination
/// catalog.
///
/// Configuration comes from an optional TOML file; without one, built-in
/// defaults apply. `DATABASE_URL` and `PORT` override the database and
/// listen port.
#[derive(Parser)]
#[command(name = "pricegrid", version, about)]
struct Cli {
    /// Path to a configuration file (TOML).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent: running it again leaves existing data in place.
    Init,

    /// Scrape a page once and synchronize its combinations.
    ///
    /// Combinations whose options still exist keep their price; new ones
    /// start at 0; vanished ones are removed. A fetch failure changes
    /// nothing.
    Scrape {
        /// Page URL or path to saved HTML. Defaults to `[scrape].url`.
        #[arg(long)]
        url: Option<String>,

        /// Page layout. Defaults to `[scrape].mode`.
        #[arg(long, value_enum)]
        mode: Option<ScrapeMode>,

        /// Only sync this group (`Black` or `mailer/Black`). Repeatable.
        #[arg(long = "group")]
        groups: Vec<String>,
    },

    /// List the captions of every select field on a page.
    Labels {
        /// Page URL or path to saved HTML. Defaults to `[scrape].url`.
        #[arg(long)]
        url: Option<String>,
    },

    /// Print stored combinations, grouped by product and group.
    List,

    /// Print per-group combination counts.
    Summary {
        /// Also list every option tuple.
        #[arg(long, short)]
        verbose: bool,
    },

    /// Re-scrape a page on an interval until interrupted.
    ///
    /// Cycles never overlap. A failed cycle is logged and the next one
    /// runs on schedule.
    Watch {
        /// Page URL or path to saved HTML. Defaults to `[scrape].url`.
        #[arg(long)]
        url: Option<String>,

        #[arg(long, value_enum)]
        mode: Option<ScrapeMode>,

        /// Only sync this group. Repeatable. Defaults to `[schedule].groups`.
        #[arg(long = "group")]
        groups: Vec<String>,

        /// Seconds between cycles. Defaults to `[schedule].interval_secs`, then 300.
        #[arg(long)]
        interval: Option<u64>,
    },

    /// Start the HTTP API.
    ///
    /// Binds to `[server].bind` (port overridable with `PORT`). Runs the
    /// `[schedule]` alongside when it and `[scrape].url` are configured.
    Serve,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn source_url(cfg: &Config, url: Option<String>) -> anyhow::Result<String> {
    match url.or_else(|| cfg.scrape.url.clone()) {
        Some(url) if !url.trim().is_empty() => Ok(url),
        _ => bail!("no page to scrape: pass --url or set [scrape].url"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let cfg = config::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("initialized database at {}", cfg.db.url);
        }
        Commands::Scrape { url, mode, groups } => {
            let request = ScrapeRequest::new(source_url(&cfg, url)?, mode.unwrap_or(cfg.scrape.mode))
                .with_groups(groups);
            pipeline::run_scrape(&cfg, &request).await?;
        }
        Commands::Labels { url } => {
            pipeline::run_labels(&cfg, &source_url(&cfg, url)?).await?;
        }
        Commands::List => {
            catalog::run_list(&cfg).await?;
        }
        Commands::Summary { verbose } => {
            summary::run_summary(&cfg, verbose).await?;
        }
        Commands::Watch {
            url,
            mode,
            groups,
            interval,
        } => {
            let schedule = cfg.schedule.clone();
            let groups = if groups.is_empty() {
                schedule.as_ref().map(|s| s.groups.clone()).unwrap_or_default()
            } else {
                groups
            };
            let interval = interval
                .or_else(|| schedule.as_ref().map(|s| s.interval_secs))
                .unwrap_or(300);
            if interval == 0 {
                bail!("--interval must be > 0");
            }

            let request = ScrapeRequest::new(source_url(&cfg, url)?, mode.unwrap_or(cfg.scrape.mode))
                .with_groups(groups);
            schedule::run_watch(&cfg, request, Duration::from_secs(interval)).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
