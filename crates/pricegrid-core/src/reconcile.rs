//! Price-preserving reconciliation of a group's combinations.
//!
//! Given the freshly generated tuples of one group, [`reconcile`] brings
//! the stored set into exact agreement with them:
//!
//! - tuples missing from the store are inserted with price `0`
//! - stored records whose tuple is no longer generated are deleted
//! - stored records whose tuple is still generated are left untouched,
//!   keeping both their price and their id
//!
//! Identity is the serialized option tuple ([`tuple_key`](crate::models::tuple_key)),
//! compared by value. Positions in the generator output are irrelevant.
//! When a group gains or loses a field every old tuple changes length, so
//! the whole group is replaced and previous prices are dropped.
//!
//! # Ordering
//!
//! Inserts run before deletes. If a write fails midway, the group holds a
//! superset of the fresh tuples and every stored price is still present;
//! the next run completes the sync.
//!
//! Callers must serialize runs per group. The binary does so with one
//! mutex per group key and a lease in the store.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::SyncError;
use crate::models::{Combination, GroupKey, NewCombination};
use crate::store::Store;

/// Default number of rows per `insert_many` call.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// What to do when a group's fresh set is empty.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmptyPolicy {
    /// Treat an empty set as a failed extraction and keep stored data.
    #[default]
    Preserve,
    /// Delete every stored combination of the group.
    Wipe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOptions {
    /// Rows per insert call. Values below 1 are treated as 1.
    pub batch_size: usize,
    pub on_empty: EmptyPolicy,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            on_empty: EmptyPolicy::Preserve,
        }
    }
}

/// The changes needed to align a stored set with a fresh one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncPlan {
    /// Fresh tuples absent from the store, deduplicated, in generation order.
    pub to_insert: Vec<Vec<String>>,
    /// Ids of stored records whose tuple is not in the fresh set, plus
    /// any extra copies of a tuple stored more than once.
    pub to_delete: Vec<String>,
    /// Stored records kept as they are.
    pub retained: usize,
}

impl SyncPlan {
    pub fn is_noop(&self) -> bool {
        self.to_insert.is_empty() && self.to_delete.is_empty()
    }
}

/// Result of reconciling one group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncOutcome {
    pub key: GroupKey,
    pub inserted: usize,
    pub deleted: usize,
    pub retained: usize,
    /// The fresh set was empty and [`EmptyPolicy::Preserve`] applied.
    pub skipped_empty: bool,
}

/// Diff `existing` against `fresh` without touching storage.
///
/// When a tuple is stored more than once, the first record in `existing`
/// order is retained and the others are scheduled for deletion.
pub fn plan(existing: &[Combination], fresh: &[Vec<String>]) -> SyncPlan {
    let fresh_keys: HashSet<String> = fresh
        .iter()
        .map(|t| crate::models::tuple_key(t))
        .collect();

    let mut kept: HashSet<String> = HashSet::new();
    let mut to_delete = Vec::new();
    for combo in existing {
        let key = combo.tuple_key();
        if fresh_keys.contains(&key) && kept.insert(key) {
            continue;
        }
        to_delete.push(combo.id.clone());
    }

    let mut queued: HashSet<String> = HashSet::new();
    let mut to_insert = Vec::new();
    for tuple in fresh {
        let key = crate::models::tuple_key(tuple);
        if !kept.contains(&key) && queued.insert(key) {
            to_insert.push(tuple.clone());
        }
    }

    SyncPlan {
        to_insert,
        to_delete,
        retained: kept.len(),
    }
}

/// Reconcile the stored combinations of `key` with `fresh`.
///
/// Reads the full stored set before deciding anything. Running it twice
/// with the same `fresh` set makes the second run a no-op.
pub async fn reconcile(
    store: &dyn Store,
    key: &GroupKey,
    fresh: &[Vec<String>],
    options: &SyncOptions,
) -> Result<SyncOutcome, SyncError> {
    if fresh.is_empty() && options.on_empty == EmptyPolicy::Preserve {
        info!(group = %key, "no combinations generated; keeping stored set");
        return Ok(SyncOutcome {
            key: key.clone(),
            inserted: 0,
            deleted: 0,
            retained: 0,
            skipped_empty: true,
        });
    }

    let existing = store
        .find_by_group(key)
        .await
        .map_err(|source| SyncError::Load {
            key: key.clone(),
            source,
        })?;

    let plan = plan(&existing, fresh);
    debug!(
        group = %key,
        stored = existing.len(),
        fresh = fresh.len(),
        insert = plan.to_insert.len(),
        delete = plan.to_delete.len(),
        "planned sync"
    );

    let batch_size = options.batch_size.max(1);
    let mut inserted = 0;
    for (index, batch) in plan.to_insert.chunks(batch_size).enumerate() {
        let rows: Vec<NewCombination> = batch
            .iter()
            .map(|tuple| NewCombination::unpriced(key, tuple.clone()))
            .collect();
        debug!(group = %key, batch = index + 1, size = rows.len(), "inserting batch");
        let stored = store
            .insert_many(&rows)
            .await
            .map_err(|source| SyncError::Insert {
                key: key.clone(),
                batch: index + 1,
                source,
            })?;
        inserted += stored.len();
    }

    let mut deleted = 0;
    if !plan.to_delete.is_empty() {
        deleted = store
            .delete_many(&plan.to_delete)
            .await
            .map_err(|source| SyncError::Delete {
                key: key.clone(),
                source,
            })? as usize;
    }

    info!(
        group = %key,
        inserted,
        deleted,
        retained = plan.retained,
        "sync complete"
    );

    Ok(SyncOutcome {
        key: key.clone(),
        inserted,
        deleted,
        retained: plan.retained,
        skipped_empty: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Field, GroupKey};
    use crate::store::memory::InMemoryStore;
    use crate::store::FieldSet;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn s(v: &[&str]) -> Vec<String> {
        v.iter().map(|x| x.to_string()).collect()
    }

    fn black() -> GroupKey {
        GroupKey::new("mailer", "Black")
    }

    async fn seed(store: &InMemoryStore, key: &GroupKey, rows: &[(&[&str], f64)]) {
        let rows: Vec<NewCombination> = rows
            .iter()
            .map(|(opts, price)| NewCombination {
                product: key.product.clone(),
                group: key.group.clone(),
                options: s(opts),
                price: *price,
            })
            .collect();
        store.insert_many(&rows).await.unwrap();
    }

    async fn priced(store: &InMemoryStore, key: &GroupKey) -> BTreeMap<Vec<String>, f64> {
        store
            .find_by_group(key)
            .await
            .unwrap()
            .into_iter()
            .map(|c| (c.options, c.price))
            .collect()
    }

    #[test]
    fn test_plan_diff() {
        let existing = vec![
            Combination {
                id: "1".into(),
                product: "mailer".into(),
                group: "Black".into(),
                options: s(&["A", "1"]),
                price: 5.0,
            },
            Combination {
                id: "2".into(),
                product: "mailer".into(),
                group: "Black".into(),
                options: s(&["A", "2"]),
                price: 7.0,
            },
        ];
        let fresh = vec![s(&["A", "1"]), s(&["A", "3"])];
        let plan = plan(&existing, &fresh);
        assert_eq!(plan.to_insert, vec![s(&["A", "3"])]);
        assert_eq!(plan.to_delete, vec!["2".to_string()]);
        assert_eq!(plan.retained, 1);
    }

    #[test]
    fn test_plan_dedupes_fresh_and_stored_copies() {
        let combo = |id: &str| Combination {
            id: id.into(),
            product: "mailer".into(),
            group: "Black".into(),
            options: s(&["A"]),
            price: 1.0,
        };
        let existing = vec![combo("first"), combo("second")];
        let fresh = vec![s(&["A"]), s(&["B"]), s(&["B"])];
        let plan = plan(&existing, &fresh);
        assert_eq!(plan.to_insert, vec![s(&["B"])]);
        assert_eq!(plan.to_delete, vec!["second".to_string()]);
        assert_eq!(plan.retained, 1);
    }

    #[tokio::test]
    async fn test_rescrape_keeps_prices_and_replaces_obsolete() {
        let store = InMemoryStore::new();
        let key = black();
        seed(&store, &key, &[(&["A", "1"], 5.0), (&["A", "2"], 7.0)]).await;
        let kept_id = store.find_by_group(&key).await.unwrap()[0].id.clone();

        let fresh = vec![s(&["A", "1"]), s(&["A", "3"])];
        let outcome = reconcile(&store, &key, &fresh, &SyncOptions::default())
            .await
            .unwrap();
        assert_eq!((outcome.inserted, outcome.deleted, outcome.retained), (1, 1, 1));

        let after = priced(&store, &key).await;
        assert_eq!(after.len(), 2);
        assert_eq!(after[&s(&["A", "1"])], 5.0);
        assert_eq!(after[&s(&["A", "3"])], 0.0);
        assert!(!after.contains_key(&s(&["A", "2"])));

        let still_there = store.get(&kept_id).await.unwrap().unwrap();
        assert_eq!(still_there.options, s(&["A", "1"]));
    }

    #[tokio::test]
    async fn test_second_run_is_noop() {
        let store = InMemoryStore::new();
        let key = black();
        let fresh = vec![s(&["A", "1"]), s(&["A", "2"]), s(&["B", "1"])];

        let first = reconcile(&store, &key, &fresh, &SyncOptions::default())
            .await
            .unwrap();
        assert_eq!(first.inserted, 3);

        let second = reconcile(&store, &key, &fresh, &SyncOptions::default())
            .await
            .unwrap();
        assert_eq!((second.inserted, second.deleted), (0, 0));
        assert_eq!(second.retained, 3);
    }

    #[tokio::test]
    async fn test_stored_set_matches_fresh_set_exactly() {
        let store = InMemoryStore::new();
        let key = black();
        seed(&store, &key, &[(&["X"], 1.0), (&["Y"], 2.0)]).await;

        let fresh = crate::combine::cartesian(&[s(&["A", "B"]), s(&["1", "2", "3"])]);
        reconcile(&store, &key, &fresh, &SyncOptions::default())
            .await
            .unwrap();

        let stored: Vec<Vec<String>> = priced(&store, &key).await.into_keys().collect();
        let mut expected = fresh.clone();
        expected.sort();
        assert_eq!(stored, expected);
    }

    #[tokio::test]
    async fn test_reordered_tuple_is_a_different_combination() {
        let store = InMemoryStore::new();
        let key = black();
        seed(&store, &key, &[(&["A", "X"], 3.0)]).await;

        let outcome = reconcile(&store, &key, &[s(&["X", "A"])], &SyncOptions::default())
            .await
            .unwrap();
        assert_eq!((outcome.inserted, outcome.deleted), (1, 1));
        assert_eq!(priced(&store, &key).await[&s(&["X", "A"])], 0.0);
    }

    #[tokio::test]
    async fn test_field_added_replaces_whole_group() {
        let store = InMemoryStore::new();
        let key = black();
        seed(&store, &key, &[(&["A"], 4.0), (&["B"], 6.0)]).await;

        let fresh = vec![s(&["A", "1"]), s(&["B", "1"])];
        let outcome = reconcile(&store, &key, &fresh, &SyncOptions::default())
            .await
            .unwrap();
        assert_eq!((outcome.inserted, outcome.deleted, outcome.retained), (2, 2, 0));
        assert!(priced(&store, &key).await.values().all(|p| *p == 0.0));
    }

    #[tokio::test]
    async fn test_empty_fresh_set_preserves_by_default() {
        let store = InMemoryStore::new();
        let key = black();
        seed(&store, &key, &[(&["A"], 4.0)]).await;

        let outcome = reconcile(&store, &key, &[], &SyncOptions::default())
            .await
            .unwrap();
        assert!(outcome.skipped_empty);
        assert_eq!(outcome.deleted, 0);
        assert_eq!(priced(&store, &key).await[&s(&["A"])], 4.0);
    }

    #[tokio::test]
    async fn test_empty_fresh_set_wipes_when_configured() {
        let store = InMemoryStore::new();
        let key = black();
        seed(&store, &key, &[(&["A"], 4.0), (&["B"], 1.0)]).await;

        let options = SyncOptions {
            on_empty: EmptyPolicy::Wipe,
            ..SyncOptions::default()
        };
        let outcome = reconcile(&store, &key, &[], &options).await.unwrap();
        assert!(!outcome.skipped_empty);
        assert_eq!(outcome.deleted, 2);
        assert!(store.find_by_group(&key).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_other_groups_are_untouched() {
        let store = InMemoryStore::new();
        let color = GroupKey::new("mailer", "Full Color");
        seed(&store, &color, &[(&["A"], 8.0)]).await;

        reconcile(&store, &black(), &[s(&["B"])], &SyncOptions::default())
            .await
            .unwrap();
        assert_eq!(priced(&store, &color).await[&s(&["A"])], 8.0);
    }

    /// Delegates to an [`InMemoryStore`], counting insert calls and
    /// optionally failing them.
    struct CountingStore {
        inner: InMemoryStore,
        insert_calls: AtomicUsize,
        fail_inserts: bool,
    }

    impl CountingStore {
        fn new(fail_inserts: bool) -> Self {
            Self {
                inner: InMemoryStore::new(),
                insert_calls: AtomicUsize::new(0),
                fail_inserts,
            }
        }
    }

    #[async_trait]
    impl Store for CountingStore {
        async fn find_by_group(&self, key: &GroupKey) -> anyhow::Result<Vec<Combination>> {
            self.inner.find_by_group(key).await
        }
        async fn insert_many(&self, rows: &[NewCombination]) -> anyhow::Result<Vec<Combination>> {
            self.insert_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_inserts {
                anyhow::bail!("disk full");
            }
            self.inner.insert_many(rows).await
        }
        async fn delete_many(&self, ids: &[String]) -> anyhow::Result<u64> {
            self.inner.delete_many(ids).await
        }
        async fn list_all(&self) -> anyhow::Result<Vec<Combination>> {
            self.inner.list_all().await
        }
        async fn get(&self, id: &str) -> anyhow::Result<Option<Combination>> {
            self.inner.get(id).await
        }
        async fn update_price(&self, id: &str, price: f64) -> anyhow::Result<Option<Combination>> {
            self.inner.update_price(id, price).await
        }
        async fn replace_fields(&self, key: &GroupKey, fields: &[Field]) -> anyhow::Result<()> {
            self.inner.replace_fields(key, fields).await
        }
        async fn list_fields(&self) -> anyhow::Result<Vec<FieldSet>> {
            self.inner.list_fields().await
        }
    }

    #[tokio::test]
    async fn test_batching_does_not_change_result() {
        let fresh = crate::combine::cartesian(&[
            (0..15).map(|i| format!("size-{i}")).collect(),
            (0..10).map(|i| format!("qty-{i}")).collect(),
        ]);
        assert_eq!(fresh.len(), 150);

        let batched = CountingStore::new(false);
        let single = CountingStore::new(false);
        let key = black();

        let a = reconcile(&batched, &key, &fresh, &SyncOptions::default())
            .await
            .unwrap();
        let b = reconcile(
            &single,
            &key,
            &fresh,
            &SyncOptions {
                batch_size: 1000,
                ..SyncOptions::default()
            },
        )
        .await
        .unwrap();

        assert_eq!(batched.insert_calls.load(Ordering::SeqCst), 2);
        assert_eq!(single.insert_calls.load(Ordering::SeqCst), 1);
        assert_eq!(a.inserted, b.inserted);

        let tuples = |c: Vec<Combination>| {
            let mut t: Vec<Vec<String>> = c.into_iter().map(|c| c.options).collect();
            t.sort();
            t
        };
        assert_eq!(
            tuples(batched.find_by_group(&key).await.unwrap()),
            tuples(single.find_by_group(&key).await.unwrap())
        );
    }

    #[tokio::test]
    async fn test_failed_insert_deletes_nothing() {
        let store = CountingStore::new(true);
        let key = black();
        store
            .inner
            .insert_many(&[NewCombination {
                product: key.product.clone(),
                group: key.group.clone(),
                options: s(&["old"]),
                price: 12.0,
            }])
            .await
            .unwrap();

        let err = reconcile(&store, &key, &[s(&["new"])], &SyncOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Insert { batch: 1, .. }));
        assert_eq!(err.key(), &key);

        let left = store.find_by_group(&key).await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].price, 12.0);
    }
}
