//! Scrape pipeline orchestration.
//!
//! Coordinates one scrape cycle: fetch → extract → generate → sync.
//! A fetch failure aborts the cycle before any storage access, so stored
//! combinations and prices are left exactly as they were. Once the page is
//! in hand, each group is synchronized on its own; a storage failure in
//! one group is recorded in the [`ScrapeReport`] and the remaining groups
//! still run.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use anyhow::bail;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use pricegrid_core::combine::{cartesian, expected_count, option_lists};
use pricegrid_core::models::{Field, GroupKey, SINGLE_GROUP};
use pricegrid_core::reconcile::EmptyPolicy;
use pricegrid_core::store::Store;

use crate::config::{Config, ScrapeConfig};
use crate::extract::{
    extract_fields, extract_product_forms, group_fields, select_labels, ExtractOptions,
};
use crate::fetch::{FetchError, Fetcher, SourceFetcher};
use crate::sqlite_store::SqliteStore;
use crate::summary;
use crate::sync::Synchronizer;

/// Page layout to extract.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum ScrapeMode {
    /// One form, fields classified into the Black and Full Color groups.
    #[default]
    Groups,
    /// One form per product; each product is a single group.
    Forms,
}

impl fmt::Display for ScrapeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScrapeMode::Groups => f.write_str("groups"),
            ScrapeMode::Forms => f.write_str("forms"),
        }
    }
}

/// What to scrape in one cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrapeRequest {
    pub url: String,
    pub mode: ScrapeMode,
    /// Group selectors (`"Black"` or `"mailer/Black"`). Empty means every group.
    pub groups: BTreeSet<String>,
}

impl ScrapeRequest {
    pub fn new(url: impl Into<String>, mode: ScrapeMode) -> Self {
        Self {
            url: url.into(),
            mode,
            groups: BTreeSet::new(),
        }
    }

    pub fn with_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups.extend(
            groups
                .into_iter()
                .map(Into::into)
                .filter(|g: &String| !g.trim().is_empty()),
        );
        self
    }

    /// Whether this request covers `key`.
    pub fn wants(&self, key: &GroupKey) -> bool {
        self.groups.is_empty() || self.groups.iter().any(|g| key.matches(g))
    }
}

/// Aborts a whole scrape cycle.
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum GroupStatus {
    Synced {
        inserted: usize,
        deleted: usize,
        retained: usize,
    },
    /// Nothing was generated and stored data was kept.
    SkippedEmpty,
    Failed {
        error: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupReport {
    pub key: GroupKey,
    pub fields: usize,
    pub generated: usize,
    #[serde(flatten)]
    pub status: GroupStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScrapeReport {
    pub url: String,
    pub mode: ScrapeMode,
    pub groups: Vec<GroupReport>,
}

impl ScrapeReport {
    pub fn failed(&self) -> impl Iterator<Item = &GroupReport> {
        self.groups
            .iter()
            .filter(|g| matches!(g.status, GroupStatus::Failed { .. }))
    }

    pub fn has_failures(&self) -> bool {
        self.failed().next().is_some()
    }
}

/// Fetch, extract and synchronize pricing pages.
pub struct Pipeline {
    fetcher: Arc<dyn Fetcher>,
    synchronizer: Arc<Synchronizer>,
    extract: ExtractOptions,
    product: String,
}

impl Pipeline {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        synchronizer: Arc<Synchronizer>,
        config: &ScrapeConfig,
    ) -> Self {
        Self {
            fetcher,
            synchronizer,
            extract: ExtractOptions {
                group_selector: config.group_selector.clone(),
            },
            product: config.product.clone(),
        }
    }

    pub fn fetcher(&self) -> &Arc<dyn Fetcher> {
        &self.fetcher
    }

    /// Run one scrape cycle.
    pub async fn run(&self, request: &ScrapeRequest) -> Result<ScrapeReport, ScrapeError> {
        info!(url = %request.url, mode = %request.mode, "starting scrape");
        let html = self.fetcher.fetch(&request.url).await?;

        let partitions = self.partition(&html, request.mode);
        if partitions.iter().all(|(_, fields)| fields.is_empty()) {
            warn!(url = %request.url, "no fields found on page");
        }

        let mut groups = Vec::new();
        for (key, fields) in partitions {
            if !request.wants(&key) {
                debug!(group = %key, "group not requested; skipping");
                continue;
            }
            groups.push(self.sync_partition(key, fields).await);
        }

        let report = ScrapeReport {
            url: request.url.clone(),
            mode: request.mode,
            groups,
        };

        match summary::summarize(self.synchronizer.store().as_ref()).await {
            Ok(groups) => summary::log_summary(&groups),
            Err(e) => warn!(error = %e, "failed to summarize combinations"),
        }

        info!(
            url = %report.url,
            groups = report.groups.len(),
            failed = report.failed().count(),
            "scrape finished"
        );
        Ok(report)
    }

    /// Split a page into the groups it defines, each with its fields.
    fn partition(&self, html: &str, mode: ScrapeMode) -> Vec<(GroupKey, Vec<Field>)> {
        match mode {
            ScrapeMode::Groups => {
                let fields = extract_fields(html, &self.extract);
                group_fields(&fields)
                    .into_iter()
                    .map(|(group, fields)| (GroupKey::new(self.product.clone(), group.name()), fields))
                    .collect()
            }
            ScrapeMode::Forms => extract_product_forms(html)
                .into_iter()
                .map(|form| (GroupKey::new(form.product, SINGLE_GROUP), form.fields))
                .collect(),
        }
    }

    async fn sync_partition(&self, key: GroupKey, fields: Vec<Field>) -> GroupReport {
        let lists = option_lists(&fields);
        let fresh = cartesian(&lists);
        debug!(
            group = %key,
            fields = fields.len(),
            selects = lists.len(),
            expected = expected_count(&lists),
            "generated combinations"
        );

        let keep_stored = fresh.is_empty()
            && self.synchronizer.options().on_empty == EmptyPolicy::Preserve;
        if !keep_stored {
            if let Err(e) = self
                .synchronizer
                .store()
                .replace_fields(&key, &fields)
                .await
            {
                warn!(group = %key, error = %e, "failed to store field definitions");
            }
        }

        let status = match self.synchronizer.sync_group(&key, &fresh).await {
            Ok(outcome) if outcome.skipped_empty => GroupStatus::SkippedEmpty,
            Ok(outcome) => GroupStatus::Synced {
                inserted: outcome.inserted,
                deleted: outcome.deleted,
                retained: outcome.retained,
            },
            Err(e) => {
                warn!(group = %e.key(), error = %e, "group sync failed");
                GroupStatus::Failed {
                    error: e.to_string(),
                }
            }
        };

        GroupReport {
            key,
            fields: fields.len(),
            generated: fresh.len(),
            status,
        }
    }
}

/// Build a pipeline over the configured SQLite database and fetcher.
pub async fn open_pipeline(config: &Config) -> anyhow::Result<Pipeline> {
    let store: Arc<dyn Store> = Arc::new(SqliteStore::open(config).await?);
    let fetcher: Arc<dyn Fetcher> = Arc::new(SourceFetcher::new(&config.scrape)?);
    let synchronizer = Arc::new(Synchronizer::new(store, config.scrape.sync_options()));
    Ok(Pipeline::new(fetcher, synchronizer, &config.scrape))
}

/// Run the scrape command: one cycle, then print the per-group report.
pub async fn run_scrape(config: &Config, request: &ScrapeRequest) -> anyhow::Result<()> {
    let pipeline = open_pipeline(config).await?;
    let report = pipeline.run(request).await?;

    println!("scrape {} ({})", report.url, report.mode);
    for group in &report.groups {
        let status = match &group.status {
            GroupStatus::Synced {
                inserted,
                deleted,
                retained,
            } => format!(
                "inserted {}, deleted {}, kept {}",
                inserted, deleted, retained
            ),
            GroupStatus::SkippedEmpty => "nothing generated; stored set kept".to_string(),
            GroupStatus::Failed { error } => format!("FAILED: {}", error),
        };
        println!(
            "  {:<32} fields {:>3}  combos {:>6}  {}",
            group.key.to_string(),
            group.fields,
            group.generated,
            status
        );
    }

    let failed = report.failed().count();
    if failed > 0 {
        bail!("{} of {} groups failed to sync", failed, report.groups.len());
    }
    println!("ok");
    Ok(())
}

/// Run the labels command: print the captions of every select on the page.
pub async fn run_labels(config: &Config, url: &str) -> anyhow::Result<()> {
    let fetcher = SourceFetcher::new(&config.scrape)?;
    let html = fetcher.fetch(url).await?;
    let labels = select_labels(&html);

    println!("{} select fields on {}", labels.len(), url);
    for (i, label) in labels.iter().enumerate() {
        println!("  {}. {}", i + 1, label);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pricegrid_core::reconcile::SyncOptions;
    use pricegrid_core::store::memory::InMemoryStore;
    use pricegrid_core::store::Store;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StaticFetcher(String);

    #[async_trait]
    impl Fetcher for StaticFetcher {
        async fn fetch(&self, _url: &str) -> Result<String, FetchError> {
            Ok(self.0.clone())
        }
    }

    struct FailingFetcher(AtomicUsize);

    #[async_trait]
    impl Fetcher for FailingFetcher {
        async fn fetch(&self, url: &str) -> Result<String, FetchError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Err(FetchError::Timeout {
                url: url.to_string(),
                secs: 10,
            })
        }
    }

    const PAGE: &str = r#"
        <div class="forminator-field"><label>Print</label>
          <select name="select-3"><option>Black</option><option>Full Color</option></select></div>
        <div class="forminator-field"><label>Size</label>
          <select name="select-1"><option>A</option><option>B</option></select></div>
        <div class="forminator-field"><label>Black Sides</label>
          <select name="select-2"><option>1</option><option>2</option></select></div>
        <div class="forminator-field"><label>Print Color Sides</label>
          <select name="select-4"><option>1</option><option>2</option><option>3</option></select></div>
    "#;

    fn pipeline(fetcher: Arc<dyn Fetcher>, store: Arc<dyn Store>) -> Pipeline {
        let sync = Arc::new(Synchronizer::new(store, SyncOptions::default()));
        Pipeline::new(fetcher, sync, &ScrapeConfig::default())
    }

    #[tokio::test]
    async fn test_groups_mode_syncs_both_groups() {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let p = pipeline(Arc::new(StaticFetcher(PAGE.to_string())), store.clone());

        let report = p
            .run(&ScrapeRequest::new("page.html", ScrapeMode::Groups))
            .await
            .unwrap();
        assert_eq!(report.groups.len(), 2);
        assert_eq!(report.groups[0].key, GroupKey::new("mailer", "Full Color"));
        assert_eq!(report.groups[0].generated, 6);
        assert_eq!(report.groups[1].key, GroupKey::new("mailer", "Black"));
        assert_eq!(report.groups[1].generated, 4);
        assert!(!report.has_failures());

        let black = store
            .find_by_group(&GroupKey::new("mailer", "Black"))
            .await
            .unwrap();
        assert_eq!(black.len(), 4);
        assert!(black.iter().all(|c| c.price == 0.0));
        assert_eq!(store.list_fields().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_group_filter_limits_sync() {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let p = pipeline(Arc::new(StaticFetcher(PAGE.to_string())), store.clone());

        let request = ScrapeRequest::new("page.html", ScrapeMode::Groups).with_groups(["Black"]);
        let report = p.run(&request).await.unwrap();
        assert_eq!(report.groups.len(), 1);
        assert_eq!(report.groups[0].key.group, "Black");
        assert!(store
            .find_by_group(&GroupKey::new("mailer", "Full Color"))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_fetch_failure_leaves_store_untouched() {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let key = GroupKey::new("mailer", "Black");
        store
            .insert_many(&[pricegrid_core::models::NewCombination {
                product: "mailer".into(),
                group: "Black".into(),
                options: vec!["A".into()],
                price: 9.0,
            }])
            .await
            .unwrap();

        let fetcher = Arc::new(FailingFetcher(AtomicUsize::new(0)));
        let p = pipeline(fetcher.clone(), store.clone());
        let err = p
            .run(&ScrapeRequest::new("https://example.com", ScrapeMode::Groups))
            .await
            .unwrap_err();
        assert!(matches!(err, ScrapeError::Fetch(FetchError::Timeout { .. })));
        assert_eq!(fetcher.0.load(Ordering::SeqCst), 1);

        let stored = store.find_by_group(&key).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].price, 9.0);
    }

    #[tokio::test]
    async fn test_empty_page_preserves_groups() {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let p = pipeline(Arc::new(StaticFetcher(PAGE.to_string())), store.clone());
        p.run(&ScrapeRequest::new("page.html", ScrapeMode::Groups))
            .await
            .unwrap();

        let empty = pipeline(
            Arc::new(StaticFetcher("<html></html>".to_string())),
            store.clone(),
        );
        let report = empty
            .run(&ScrapeRequest::new("page.html", ScrapeMode::Groups))
            .await
            .unwrap();
        assert!(report
            .groups
            .iter()
            .all(|g| g.status == GroupStatus::SkippedEmpty));
        assert_eq!(store.list_all().await.unwrap().len(), 10);
        assert_eq!(store.list_fields().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_forms_mode_uses_product_keys() {
        let page = r#"
            <div><h2 class="elementor-heading-title">Postcards</h2></div>
            <div data-widget_type="shortcode.default">
              <form class="forminator-custom-form">
                <span class="forminator-label">Size</span>
                <select><option>4x6</option><option>5x7</option></select>
              </form>
            </div>
        "#;
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let p = pipeline(Arc::new(StaticFetcher(page.to_string())), store.clone());

        let report = p
            .run(&ScrapeRequest::new("page.html", ScrapeMode::Forms))
            .await
            .unwrap();
        assert_eq!(report.groups.len(), 1);
        assert_eq!(report.groups[0].key, GroupKey::new("Postcards", "All"));
        assert_eq!(
            store
                .find_by_group(&GroupKey::new("Postcards", "All"))
                .await
                .unwrap()
                .len(),
            2
        );
    }

    #[test]
    fn test_request_group_matching() {
        let all = ScrapeRequest::new("u", ScrapeMode::Groups);
        assert!(all.wants(&GroupKey::new("mailer", "Black")));

        let some = all.with_groups(["mailer/Full Color", " "]);
        assert_eq!(some.groups.len(), 1);
        assert!(some.wants(&GroupKey::new("mailer", "Full Color")));
        assert!(!some.wants(&GroupKey::new("mailer", "Black")));
    }

    #[test]
    fn test_report_serializes_flat_status() {
        let report = GroupReport {
            key: GroupKey::new("mailer", "Black"),
            fields: 2,
            generated: 4,
            status: GroupStatus::Synced {
                inserted: 4,
                deleted: 0,
                retained: 0,
            },
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "synced");
        assert_eq!(json["inserted"], 4);
        assert_eq!(json["key"]["group"], "Black");
    }
}
