//! Serialized per-group reconciliation.
//!
//! Two reconciliations of the same group must never interleave: one could
//! delete a tuple the other has just decided to keep, or both could insert
//! the same new tuple. [`Synchronizer`] holds one async mutex per
//! [`GroupKey`] for the whole load, diff and apply cycle, then claims the
//! group's lease in the store so other processes sharing the database
//! (`serve`, `watch`, `scrape`) wait too. Different groups proceed
//! independently.
//!
//! A lease expires after [`LEASE_TTL`] so a crashed process cannot block a
//! group forever. Waiting for a lease gives up after [`LEASE_WAIT`].

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::bail;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use pricegrid_core::error::SyncError;
use pricegrid_core::models::GroupKey;
use pricegrid_core::reconcile::{reconcile, SyncOptions, SyncOutcome};
use pricegrid_core::store::Store;

/// How long a claimed group stays claimed without being released.
pub const LEASE_TTL: Duration = Duration::from_secs(120);

/// How long to wait for another process to release a group.
pub const LEASE_WAIT: Duration = Duration::from_secs(180);

const LEASE_POLL: Duration = Duration::from_millis(50);

/// Registry of per-group locks, created on first use.
#[derive(Default)]
pub struct GroupLocks {
    locks: Mutex<HashMap<GroupKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl GroupLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// The lock guarding `key`.
    pub fn lock_for(&self, key: &GroupKey) -> Arc<tokio::sync::Mutex<()>> {
        // The map only ever gains entries, so a poisoned guard is still usable.
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.entry(key.clone()).or_default().clone()
    }
}

/// Runs [`reconcile`] against a shared store, one group at a time per key.
pub struct Synchronizer {
    store: Arc<dyn Store>,
    locks: GroupLocks,
    options: SyncOptions,
    /// Lease holder id, unique per synchronizer.
    holder: String,
    lease_wait: Duration,
}

impl Synchronizer {
    pub fn new(store: Arc<dyn Store>, options: SyncOptions) -> Self {
        Self {
            store,
            locks: GroupLocks::new(),
            options,
            holder: Uuid::new_v4().to_string(),
            lease_wait: LEASE_WAIT,
        }
    }

    /// Override how long to wait for another holder's lease.
    pub fn with_lease_wait(mut self, wait: Duration) -> Self {
        self.lease_wait = wait;
        self
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// Reconcile `key` with `fresh` while holding the group's lock.
    pub async fn sync_group(
        &self,
        key: &GroupKey,
        fresh: &[Vec<String>],
    ) -> Result<SyncOutcome, SyncError> {
        self.with_group_lock(key, reconcile(self.store.as_ref(), key, fresh, &self.options))
            .await
            .map_err(|source| SyncError::Lock {
                key: key.clone(),
                source,
            })?
    }

    /// Run `work` while holding the lock and the store lease of `key`.
    ///
    /// Manual writes to a group go through here so they cannot race a sync
    /// of the same group. Fails without running `work` if the lease cannot
    /// be claimed.
    pub async fn with_group_lock<F, T>(&self, key: &GroupKey, work: F) -> anyhow::Result<T>
    where
        F: Future<Output = T>,
    {
        let lock = self.locks.lock_for(key);
        let _guard = lock.lock().await;

        self.claim_lease(key).await?;
        let output = work.await;
        if let Err(e) = self.store.release_lease(key, &self.holder).await {
            warn!(group = %key, error = %e, "failed to release group lease");
        }
        Ok(output)
    }

    async fn claim_lease(&self, key: &GroupKey) -> anyhow::Result<()> {
        let deadline = Instant::now() + self.lease_wait;
        loop {
            if self.store.try_lease(key, &self.holder, LEASE_TTL).await? {
                return Ok(());
            }
            if Instant::now() >= deadline {
                bail!(
                    "{} is still being synced by another process after {}s",
                    key,
                    self.lease_wait.as_secs()
                );
            }
            debug!(group = %key, "group leased elsewhere; waiting");
            tokio::time::sleep(LEASE_POLL).await;
        }
    }
}
