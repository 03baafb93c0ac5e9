use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// Create the database and its schema. Idempotent.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate(&pool).await?;
    pool.close().await;
    Ok(())
}

pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    // One table for every product and group; the key columns partition it.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS combinations (
            id TEXT PRIMARY KEY,
            product TEXT NOT NULL,
            group_name TEXT NOT NULL,
            options_json TEXT NOT NULL,
            price REAL NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            UNIQUE(product, group_name, options_json)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS fields (
            product TEXT NOT NULL,
            group_name TEXT NOT NULL,
            position INTEGER NOT NULL,
            name TEXT NOT NULL,
            label TEXT NOT NULL,
            kind TEXT NOT NULL,
            options_json TEXT NOT NULL DEFAULT '[]',
            scraped_at INTEGER NOT NULL,
            PRIMARY KEY (product, group_name, position)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Cross-process claim on a group while it is being reconciled.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS group_leases (
            product TEXT NOT NULL,
            group_name TEXT NOT NULL,
            holder TEXT NOT NULL,
            expires_at INTEGER NOT NULL,
            PRIMARY KEY (product, group_name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_combinations_group ON combinations(product, group_name)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
