//! # pricegrid
//!
//! Scrapes a print-shop pricing form and keeps a catalog of every option
//! combination it offers, each with an operator-edited price.
//!
//! A scrape fetches the page, extracts its dropdown fields, classifies them
//! into print groups by label, expands each group into the Cartesian
//! product of its options, and reconciles that set with the stored one.
//! Reconciliation preserves the price of every combination that still
//! exists, so re-scraping never loses manual edits.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────┐   ┌───────────┐   ┌───────────┐
//! │  Fetch   │──▶│  Extract  │──▶│  Combine  │──▶│ Reconcile │──▶ SQLite
//! │ HTTP/File│   │  scraper  │   │ Cartesian │   │ per group │
//! └──────────┘   └───────────┘   └───────────┘   └─────┬─────┘
//!                                                      │
//!                              ┌───────────────────────┤
//!                              ▼                       ▼
//!                        ┌──────────┐            ┌──────────┐
//!                        │   CLI    │            │   HTTP   │
//!                        │(pricegrid)│           │  (axum)  │
//!                        └──────────┘            └──────────┘
//! ```
//!
//! The pure parts (classification, combination, reconciliation and the
//! [`Store`](pricegrid_core::store::Store) trait) live in `pricegrid-core`.
//!
//! ## Quick Start
//!
//! ```bash
//! pricegrid init                                  # create database
//! pricegrid scrape --url https://example.com/pricing
//! pricegrid summary --verbose
//! pricegrid serve                                 # start HTTP API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and environment overrides |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite [`Store`](pricegrid_core::store::Store) backend |
//! | [`fetch`] | Page fetching over HTTP or from disk |
//! | [`extract`] | Field extraction from form markup |
//! | [`sync`] | Per-group serialized reconciliation |
//! | [`pipeline`] | One scrape cycle, end to end |
//! | [`catalog`] | Manual create and price edits |
//! | [`summary`] | Per-group combination counts |
//! | [`schedule`] | Periodic re-scrape |
//! | [`server`] | HTTP API |

pub mod catalog;
pub mod config;
pub mod db;
pub mod extract;
pub mod fetch;
pub mod migrate;
pub mod pipeline;
pub mod schedule;
pub mod server;
pub mod sqlite_store;
pub mod summary;
pub mod sync;

pub use pricegrid_core;
