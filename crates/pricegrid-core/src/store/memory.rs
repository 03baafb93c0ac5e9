//! In-memory [`Store`] implementation for tests and embedding.
//!
//! Uses `Vec` and `BTreeMap` behind `std::sync::RwLock`. Insertion order
//! is the vector order, which matches the SQLite backend's ordering.

use std::collections::{BTreeMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{Combination, Field, GroupKey, NewCombination};

use super::{FieldSet, Store};

/// In-memory store for testing.
pub struct InMemoryStore {
    combinations: RwLock<Vec<Combination>>,
    fields: RwLock<BTreeMap<GroupKey, Vec<Field>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            combinations: RwLock::new(Vec::new()),
            fields: RwLock::new(BTreeMap::new()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Vec<Combination>>> {
        self.combinations
            .read()
            .map_err(|_| anyhow!("combination store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Vec<Combination>>> {
        self.combinations
            .write()
            .map_err(|_| anyhow!("combination store lock poisoned"))
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn identity(product: &str, group: &str, options: &[String]) -> (String, String, String) {
    (
        product.to_string(),
        group.to_string(),
        crate::models::tuple_key(options),
    )
}

#[async_trait]
impl Store for InMemoryStore {
    async fn find_by_group(&self, key: &GroupKey) -> Result<Vec<Combination>> {
        let combos = self.read()?;
        Ok(combos
            .iter()
            .filter(|c| c.product == key.product && c.group == key.group)
            .cloned()
            .collect())
    }

    async fn insert_many(&self, rows: &[NewCombination]) -> Result<Vec<Combination>> {
        let mut combos = self.write()?;
        let mut taken: HashSet<(String, String, String)> = combos
            .iter()
            .map(|c| identity(&c.product, &c.group, &c.options))
            .collect();

        for row in rows {
            if !taken.insert(identity(&row.product, &row.group, &row.options)) {
                bail!(
                    "duplicate combination {:?} in {}/{}",
                    row.options,
                    row.product,
                    row.group
                );
            }
        }

        let inserted: Vec<Combination> = rows
            .iter()
            .map(|row| Combination {
                id: Uuid::new_v4().to_string(),
                product: row.product.clone(),
                group: row.group.clone(),
                options: row.options.clone(),
                price: row.price,
            })
            .collect();
        combos.extend(inserted.iter().cloned());
        Ok(inserted)
    }

    async fn delete_many(&self, ids: &[String]) -> Result<u64> {
        let doomed: HashSet<&str> = ids.iter().map(String::as_str).collect();
        let mut combos = self.write()?;
        let before = combos.len();
        combos.retain(|c| !doomed.contains(c.id.as_str()));
        Ok((before - combos.len()) as u64)
    }

    async fn list_all(&self) -> Result<Vec<Combination>> {
        let mut all = self.read()?.clone();
        // Stable sort keeps insertion order inside a group.
        all.sort_by(|a, b| (&a.product, &a.group).cmp(&(&b.product, &b.group)));
        Ok(all)
    }

    async fn get(&self, id: &str) -> Result<Option<Combination>> {
        Ok(self.read()?.iter().find(|c| c.id == id).cloned())
    }

    async fn update_price(&self, id: &str, price: f64) -> Result<Option<Combination>> {
        let mut combos = self.write()?;
        Ok(combos.iter_mut().find(|c| c.id == id).map(|c| {
            c.price = price;
            c.clone()
        }))
    }

    async fn replace_fields(&self, key: &GroupKey, fields: &[Field]) -> Result<()> {
        let mut stored = self
            .fields
            .write()
            .map_err(|_| anyhow!("field store lock poisoned"))?;
        stored.insert(key.clone(), fields.to_vec());
        Ok(())
    }

    async fn list_fields(&self) -> Result<Vec<FieldSet>> {
        let stored = self
            .fields
            .read()
            .map_err(|_| anyhow!("field store lock poisoned"))?;
        Ok(stored
            .iter()
            .map(|(key, fields)| FieldSet {
                product: key.product.clone(),
                group: key.group.clone(),
                fields: fields.clone(),
            })
            .collect())
    }
}
