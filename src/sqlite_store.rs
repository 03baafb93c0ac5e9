//! SQLite-backed [`Store`] implementation.
//!
//! Combinations live in one `combinations` table keyed by
//! `(product, group_name)`, with the option tuple stored as its JSON
//! identity key in `options_json`. A unique index on
//! `(product, group_name, options_json)` backs the no-duplicates rule.
//! Insertion order is `rowid` order.
//!
//! Group leases live in `group_leases`, one row per claimed group. A claim
//! is an upsert that only overwrites an expired row or the holder's own,
//! so two processes sharing the database file never reconcile the same
//! group at once.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use pricegrid_core::models::{tuple_key, Combination, Field, GroupKey, NewCombination};
use pricegrid_core::store::{FieldSet, Store};

use crate::config::Config;
use crate::{db, migrate};

/// SQLite's default bound-parameter limit is 999; stay well below it.
const DELETE_CHUNK: usize = 500;

/// SQLite implementation of the [`Store`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to the configured database, creating the schema if needed.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::migrate(&pool).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn row_to_combination(row: &SqliteRow) -> Result<Combination> {
    let options_json: String = row.try_get("options_json")?;
    let options: Vec<String> = serde_json::from_str(&options_json)
        .with_context(|| format!("Corrupt options_json: {}", options_json))?;
    Ok(Combination {
        id: row.try_get("id")?,
        product: row.try_get("product")?,
        group: row.try_get("group_name")?,
        options,
        price: row.try_get("price")?,
    })
}

const SELECT_COLUMNS: &str = "SELECT id, product, group_name, options_json, price FROM combinations";

#[async_trait]
impl Store for SqliteStore {
    async fn find_by_group(&self, key: &GroupKey) -> Result<Vec<Combination>> {
        let rows = sqlx::query(&format!(
            "{} WHERE product = ? AND group_name = ? ORDER BY rowid ASC",
            SELECT_COLUMNS
        ))
        .bind(&key.product)
        .bind(&key.group)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_combination).collect()
    }

    async fn insert_many(&self, rows: &[NewCombination]) -> Result<Vec<Combination>> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;
        let mut inserted = Vec::with_capacity(rows.len());

        for row in rows {
            let id = Uuid::new_v4().to_string();
            sqlx::query(
                r#"
                INSERT INTO combinations (id, product, group_name, options_json, price, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&id)
            .bind(&row.product)
            .bind(&row.group)
            .bind(tuple_key(&row.options))
            .bind(row.price)
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await
            .with_context(|| {
                format!(
                    "Failed to insert {:?} into {}/{}",
                    row.options, row.product, row.group
                )
            })?;

            inserted.push(Combination {
                id,
                product: row.product.clone(),
                group: row.group.clone(),
                options: row.options.clone(),
                price: row.price,
            });
        }

        tx.commit().await?;
        Ok(inserted)
    }

    async fn delete_many(&self, ids: &[String]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut removed = 0;
        for chunk in ids.chunks(DELETE_CHUNK) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!("DELETE FROM combinations WHERE id IN ({})", placeholders);
            let mut query = sqlx::query(&sql);
            for id in chunk {
                query = query.bind(id);
            }
            removed += query.execute(&mut *tx).await?.rows_affected();
        }
        tx.commit().await?;

        Ok(removed)
    }

    async fn list_all(&self) -> Result<Vec<Combination>> {
        let rows = sqlx::query(&format!(
            "{} ORDER BY product ASC, group_name ASC, rowid ASC",
            SELECT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_combination).collect()
    }

    async fn get(&self, id: &str) -> Result<Option<Combination>> {
        let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_combination).transpose()
    }

    async fn update_price(&self, id: &str, price: f64) -> Result<Option<Combination>> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query("UPDATE combinations SET price = ?, updated_at = ? WHERE id = ?")
            .bind(price)
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.get(id).await
    }

    async fn replace_fields(&self, key: &GroupKey, fields: &[Field]) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM fields WHERE product = ? AND group_name = ?")
            .bind(&key.product)
            .bind(&key.group)
            .execute(&mut *tx)
            .await?;

        for (position, field) in fields.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO fields (product, group_name, position, name, label, kind, options_json, scraped_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&key.product)
            .bind(&key.group)
            .bind(position as i64)
            .bind(&field.name)
            .bind(&field.label)
            .bind(&field.kind)
            .bind(serde_json::to_string(&field.options)?)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn list_fields(&self) -> Result<Vec<FieldSet>> {
        let rows = sqlx::query(
            r#"
            SELECT product, group_name, name, label, kind, options_json
            FROM fields
            ORDER BY product ASC, group_name ASC, position ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut sets: Vec<FieldSet> = Vec::new();
        for row in &rows {
            let product: String = row.try_get("product")?;
            let group: String = row.try_get("group_name")?;
            let options_json: String = row.try_get("options_json")?;
            let field = Field {
                name: row.try_get("name")?,
                label: row.try_get("label")?,
                kind: row.try_get("kind")?,
                options: serde_json::from_str(&options_json)
                    .with_context(|| format!("Corrupt field options: {}", options_json))?,
            };

            match sets.last_mut() {
                Some(set) if set.product == product && set.group == group => set.fields.push(field),
                _ => sets.push(FieldSet {
                    product,
                    group,
                    fields: vec![field],
                }),
            }
        }

        Ok(sets)
    }

    async fn try_lease(&self, key: &GroupKey, holder: &str, ttl: Duration) -> Result<bool> {
        let now = chrono::Utc::now().timestamp_millis();
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let result = sqlx::query(
            r#"
            INSERT INTO group_leases (product, group_name, holder, expires_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(product, group_name) DO UPDATE SET
                holder = excluded.holder,
                expires_at = excluded.expires_at
            WHERE group_leases.expires_at <= ? OR group_leases.holder = excluded.holder
            "#,
        )
        .bind(&key.product)
        .bind(&key.group)
        .bind(holder)
        .bind(now.saturating_add(ttl_ms))
        .bind(now)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to claim lease on {}", key))?;

        Ok(result.rows_affected() == 1)
    }

    async fn release_lease(&self, key: &GroupKey, holder: &str) -> Result<()> {
        sqlx::query("DELETE FROM group_leases WHERE product = ? AND group_name = ? AND holder = ?")
            .bind(&key.product)
            .bind(&key.group)
            .bind(holder)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to release lease on {}", key))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn store(tmp: &TempDir) -> SqliteStore {
        let mut config = Config::default();
        config.db.url = format!("sqlite:{}", tmp.path().join("db/test.sqlite").display());
        SqliteStore::open(&config).await.unwrap()
    }

    fn row(group: &str, options: &[&str], price: f64) -> NewCombination {
        NewCombination {
            product: "mailer".into(),
            group: group.into(),
            options: options.iter().map(|s| s.to_string()).collect(),
            price,
        }
    }

    #[tokio::test]
    async fn test_round_trip_preserves_order_and_price() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp).await;
        store
            .insert_many(&[
                row("Black", &["B", "2"], 1.5),
                row("Black", &["A", "1"], 0.0),
                row("Full Color", &["A", "1"], 3.0),
            ])
            .await
            .unwrap();

        let black = store
            .find_by_group(&GroupKey::new("mailer", "Black"))
            .await
            .unwrap();
        assert_eq!(black.len(), 2);
        assert_eq!(black[0].options, vec!["B", "2"]);
        assert_eq!(black[0].price, 1.5);
        assert_eq!(black[1].options, vec!["A", "1"]);

        let all = store.list_all().await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].group, "Black");
        assert_eq!(all[2].group, "Full Color");
    }

    #[tokio::test]
    async fn test_duplicate_tuple_rolls_back_batch() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp).await;
        store.insert_many(&[row("Black", &["A"], 2.0)]).await.unwrap();

        let result = store
            .insert_many(&[row("Black", &["B"], 0.0), row("Black", &["A"], 0.0)])
            .await;
        assert!(result.is_err());
        assert_eq!(store.list_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp).await;
        let inserted = store
            .insert_many(&[row("Black", &["A"], 2.0), row("Black", &["B"], 2.0)])
            .await
            .unwrap();

        let updated = store.update_price(&inserted[0].id, 42.0).await.unwrap();
        assert_eq!(updated.unwrap().price, 42.0);
        assert!(store.update_price("nope", 1.0).await.unwrap().is_none());

        let removed = store
            .delete_many(&[inserted[1].id.clone()])
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert!(store.get(&inserted[1].id).await.unwrap().is_none());
        assert_eq!(store.get(&inserted[0].id).await.unwrap().unwrap().price, 42.0);
    }

    #[tokio::test]
    async fn test_replace_fields() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp).await;
        let key = GroupKey::new("mailer", "Black");
        let field = |name: &str| Field {
            name: name.into(),
            label: name.to_uppercase(),
            kind: "select".into(),
            options: vec!["x".into(), "y".into()],
        };

        store
            .replace_fields(&key, &[field("a"), field("b")])
            .await
            .unwrap();
        store.replace_fields(&key, &[field("c")]).await.unwrap();

        let sets = store.list_fields().await.unwrap();
        assert_eq!(sets.len(), 1);
        assert_eq!(sets[0].fields.len(), 1);
        assert_eq!(sets[0].fields[0].name, "c");
        assert_eq!(sets[0].fields[0].options, vec!["x", "y"]);
    }

    #[tokio::test]
    async fn test_lease_excludes_other_holders_until_released_or_expired() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp).await;
        let key = GroupKey::new("mailer", "Black");
        let minute = Duration::from_secs(60);

        assert!(store.try_lease(&key, "a", minute).await.unwrap());
        assert!(!store.try_lease(&key, "b", minute).await.unwrap());
        assert!(store.try_lease(&key, "a", minute).await.unwrap());
        assert!(store
            .try_lease(&GroupKey::new("mailer", "Full Color"), "b", minute)
            .await
            .unwrap());

        store.release_lease(&key, "b").await.unwrap();
        assert!(!store.try_lease(&key, "b", minute).await.unwrap());

        store.release_lease(&key, "a").await.unwrap();
        assert!(store.try_lease(&key, "b", Duration::ZERO).await.unwrap());
        // An expired claim is taken over.
        assert!(store.try_lease(&key, "a", minute).await.unwrap());
    }
}
