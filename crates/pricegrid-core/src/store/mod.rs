//! Storage abstraction for pricegrid.
//!
//! The [`Store`] trait is the persistence collaborator of the pipeline.
//! Reconciliation depends only on [`find_by_group`](Store::find_by_group),
//! [`insert_many`](Store::insert_many), and [`delete_many`](Store::delete_many);
//! the remaining operations back the admin API and the raw field listing.
//!
//! Stores shared between processes also implement the group lease
//! ([`try_lease`](Store::try_lease), [`release_lease`](Store::release_lease))
//! so that reconciliations from different processes never interleave.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use crate::models::{Combination, Field, GroupKey, NewCombination};

/// The stored field definitions of one group, as of its last scrape.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldSet {
    pub product: String,
    pub group: String,
    pub fields: Vec<Field>,
}

/// Abstract storage backend for combinations and field definitions.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`find_by_group`](Store::find_by_group) | Load every combination of a group |
/// | [`insert_many`](Store::insert_many) | Insert new combinations, assigning ids |
/// | [`delete_many`](Store::delete_many) | Delete combinations by id |
/// | [`list_all`](Store::list_all) | Every combination, ordered by group |
/// | [`get`](Store::get) | One combination by id |
/// | [`update_price`](Store::update_price) | Set the price of one combination |
/// | [`replace_fields`](Store::replace_fields) | Overwrite a group's field definitions |
/// | [`list_fields`](Store::list_fields) | Every stored field set |
/// | [`try_lease`](Store::try_lease) | Claim a group for one holder across processes |
/// | [`release_lease`](Store::release_lease) | Give a claimed group back |
#[async_trait]
pub trait Store: Send + Sync {
    /// Every combination stored under `key`, in insertion order.
    async fn find_by_group(&self, key: &GroupKey) -> Result<Vec<Combination>>;

    /// Insert `rows` atomically and return them with their assigned ids.
    ///
    /// Fails without inserting anything if any row duplicates an existing
    /// `(product, group, options)` tuple.
    async fn insert_many(&self, rows: &[NewCombination]) -> Result<Vec<Combination>>;

    /// Delete the combinations with the given ids. Returns the number removed.
    async fn delete_many(&self, ids: &[String]) -> Result<u64>;

    /// Every combination, ordered by product, group, then insertion order.
    async fn list_all(&self) -> Result<Vec<Combination>>;

    async fn get(&self, id: &str) -> Result<Option<Combination>>;

    /// Set the price of `id`. Returns the updated record, or `None` if absent.
    async fn update_price(&self, id: &str, price: f64) -> Result<Option<Combination>>;

    /// Replace the stored field definitions of `key` with `fields`.
    async fn replace_fields(&self, key: &GroupKey, fields: &[Field]) -> Result<()>;

    /// Every stored field set, ordered by key.
    async fn list_fields(&self) -> Result<Vec<FieldSet>>;

    /// Claim `key` for `holder` until `ttl` has passed.
    ///
    /// Returns `false` while another holder has an unexpired claim. The
    /// current holder may claim again to extend it. The default always
    /// succeeds, which is correct for a store only one process can open.
    async fn try_lease(&self, _key: &GroupKey, _holder: &str, _ttl: Duration) -> Result<bool> {
        Ok(true)
    }

    /// Drop `holder`'s claim on `key`, if it still has one.
    async fn release_lease(&self, _key: &GroupKey, _holder: &str) -> Result<()> {
        Ok(())
    }
}
