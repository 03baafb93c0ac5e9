//! Combination summary: how many tuples each group holds.
//!
//! Logged after every scrape and printed by `pricegrid summary`, giving
//! confidence that a sync produced the expected group sizes.

use anyhow::Result;
use serde::Serialize;
use tracing::info;

use pricegrid_core::models::GroupKey;
use pricegrid_core::store::Store;

use crate::config::Config;
use crate::sqlite_store::SqliteStore;

/// Per-group breakdown of stored combinations.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupSummary {
    pub key: GroupKey,
    pub count: usize,
    /// Combinations with a non-zero price.
    pub priced: usize,
    pub tuples: Vec<Vec<String>>,
}

/// Summarize every group in `store`, ordered by key.
pub async fn summarize(store: &dyn Store) -> Result<Vec<GroupSummary>> {
    let combinations = store.list_all().await?;

    let mut groups: Vec<GroupSummary> = Vec::new();
    for combo in combinations {
        let key = combo.key();
        let priced = usize::from(combo.price != 0.0);
        match groups.last_mut() {
            Some(group) if group.key == key => {
                group.count += 1;
                group.priced += priced;
                group.tuples.push(combo.options);
            }
            _ => groups.push(GroupSummary {
                key,
                count: 1,
                priced,
                tuples: vec![combo.options],
            }),
        }
    }
    Ok(groups)
}

pub fn log_summary(groups: &[GroupSummary]) {
    if groups.is_empty() {
        info!("no combinations stored");
        return;
    }
    for group in groups {
        info!(group = %group.key, count = group.count, priced = group.priced, "combination summary");
    }
}

/// Render the summary table; `verbose` lists every tuple under its group.
pub fn render(groups: &[GroupSummary], verbose: bool) -> String {
    let mut out = String::new();
    if groups.is_empty() {
        out.push_str("No combinations found.\n");
        return out;
    }

    let total: usize = groups.iter().map(|g| g.count).sum();
    out.push_str(&format!(
        "  {:<32} {:>8} {:>8}\n",
        "GROUP", "COMBOS", "PRICED"
    ));
    out.push_str(&format!("  {}\n", "-".repeat(50)));
    for group in groups {
        out.push_str(&format!(
            "  {:<32} {:>8} {:>8}\n",
            truncate(&group.key.to_string(), 32),
            group.count,
            group.priced
        ));
        if verbose {
            for tuple in &group.tuples {
                out.push_str(&format!("    • {}\n", tuple.join(" | ")));
            }
        }
    }
    out.push_str(&format!("\n  Total: {} combinations in {} groups\n", total, groups.len()));
    out
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{}…", kept)
    }
}

/// Run the summary command against the configured database.
pub async fn run_summary(config: &Config, verbose: bool) -> Result<()> {
    let store = SqliteStore::open(config).await?;
    let groups = summarize(&store).await?;

    println!("pricegrid — Combination Summary");
    println!("===============================");
    println!();
    println!("  Database:    {}", config.db.url);
    println!();
    print!("{}", render(&groups, verbose));

    store.pool().close().await;
    Ok(())
}
