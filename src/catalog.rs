//! Admin operations over stored combinations.
//!
//! Everything an operator does by hand goes through [`Catalog`]: listing
//! combinations grouped for display, adding one manually, and editing
//! prices one at a time or in bulk. Input is validated here and rejected
//! with [`CatalogError::Validation`] before any write; the synchronizer
//! never sees malformed input.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::info;

use pricegrid_core::models::{tuple_key, Combination, GroupKey, NewCombination};
use pricegrid_core::store::Store;

use crate::config::Config;
use crate::sqlite_store::SqliteStore;
use crate::sync::Synchronizer;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("{0}")]
    Validation(String),

    #[error("combination not found: {0}")]
    NotFound(String),

    #[error("product not found: {0}")]
    UnknownProduct(String),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

fn invalid(message: impl Into<String>) -> CatalogError {
    CatalogError::Validation(message.into())
}

/// A price as sent by the admin UI: a JSON number or a numeric string.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum PriceInput {
    Number(f64),
    Text(String),
}

impl PriceInput {
    pub fn to_price(&self) -> Result<f64, CatalogError> {
        let price = match self {
            PriceInput::Number(n) => *n,
            PriceInput::Text(s) => s
                .trim()
                .parse::<f64>()
                .map_err(|_| invalid(format!("price is not a number: {:?}", s)))?,
        };
        if !price.is_finite() || price < 0.0 {
            return Err(invalid("price must be a non-negative number"));
        }
        Ok(price)
    }
}

/// Body of a manual create.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateInput {
    #[serde(default)]
    pub product: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub options: Option<Vec<String>>,
    #[serde(default)]
    pub price: Option<PriceInput>,
}

/// One row of a bulk price update.
#[derive(Debug, Clone, Deserialize)]
pub struct PriceUpdate {
    #[serde(default, alias = "_id")]
    pub id: Option<String>,
    #[serde(default)]
    pub price: Option<PriceInput>,
}

/// Parse a JSON body, reporting shape errors as validation failures.
pub fn parse_body<T: for<'de> Deserialize<'de>>(body: Value) -> Result<T, CatalogError> {
    serde_json::from_value(body).map_err(|e| invalid(format!("invalid request body: {}", e)))
}

/// The combinations of one group, with column headers for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupListing {
    pub product: String,
    pub group: String,
    /// `Option 1` .. `Option n`, then `Price`.
    pub headers: Vec<String>,
    pub combinations: Vec<Combination>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BulkUpdateOutcome {
    pub updated: usize,
    /// Ids that matched no stored combination.
    pub missing: Vec<String>,
}

/// Split combinations ordered by key into per-group listings.
fn group_listings(combos: Vec<Combination>) -> Vec<GroupListing> {
    let mut listings: Vec<GroupListing> = Vec::new();
    for combo in combos {
        match listings.last_mut() {
            Some(listing) if listing.product == combo.product && listing.group == combo.group => {
                listing.combinations.push(combo)
            }
            _ => listings.push(GroupListing {
                product: combo.product.clone(),
                group: combo.group.clone(),
                headers: Vec::new(),
                combinations: vec![combo],
            }),
        }
    }

    for listing in &mut listings {
        let width = listing
            .combinations
            .iter()
            .map(|c| c.options.len())
            .max()
            .unwrap_or(0);
        listing.headers = (1..=width)
            .map(|i| format!("Option {}", i))
            .chain(std::iter::once("Price".to_string()))
            .collect();
    }
    listings
}

pub struct Catalog {
    synchronizer: Arc<Synchronizer>,
    default_product: String,
}

impl Catalog {
    pub fn new(synchronizer: Arc<Synchronizer>, default_product: impl Into<String>) -> Self {
        Self {
            synchronizer,
            default_product: default_product.into(),
        }
    }

    fn store(&self) -> &dyn Store {
        self.synchronizer.store().as_ref()
    }

    /// Every stored combination, one listing per group, ordered by key.
    pub async fn grouped(&self) -> Result<Vec<GroupListing>, CatalogError> {
        Ok(group_listings(self.store().list_all().await?))
    }

    /// The listings of one product, or [`CatalogError::UnknownProduct`] if
    /// it has no stored combinations.
    pub async fn product(&self, name: &str) -> Result<Vec<GroupListing>, CatalogError> {
        let combos: Vec<Combination> = self
            .store()
            .list_all()
            .await?
            .into_iter()
            .filter(|c| c.product == name)
            .collect();
        if combos.is_empty() {
            return Err(CatalogError::UnknownProduct(name.to_string()));
        }
        Ok(group_listings(combos))
    }

    
    /// Add one combination by hand.
    pub async fn create(&self, input: CreateInput) -> Result<Combination, CatalogError> {
        let group = input
            .group
            .map(|g| g.trim().to_string())
            .filter(|g| !g.is_empty())
            .ok_or_else(|| invalid("group is required"))?;
        let product = match input.product {
            Some(p) if !p.trim().is_empty() => p.trim().to_string(),
            Some(_) => return Err(invalid("product must not be blank")),
            None => self.default_product.clone(),
        };
        // Scraped options are trimmed; manual ones must match them.
        let options: Vec<String> = input
            .options
            .filter(|o| !o.is_empty())
            .ok_or_else(|| invalid("options must be a non-empty array"))?
            .into_iter()
            .map(|o| o.trim().to_string())
            .collect();
        if options.iter().any(String::is_empty) {
            return Err(invalid("options must not contain blank values"));
        }
        let price = match &input.price {
            Some(price) => price.to_price()?,
            None => 0.0,
        };

        let key = GroupKey::new(product, group);
        let row = NewCombination {
            product: key.product.clone(),
            group: key.group.clone(),
            options,
            price,
        };

        let created = self
            .synchronizer
            .with_group_lock(&key, self.insert_unique(&key, &row))
            .await??;

        info!(group = %key, id = %created.id, "created combination");
        Ok(created)
    }

    async fn insert_unique(
        &self,
        key: &GroupKey,
        row: &NewCombination,
    ) -> Result<Combination, CatalogError> {
        let tuple = tuple_key(&row.options);
        let existing = self.store().find_by_group(key).await?;
        if existing.iter().any(|c| c.tuple_key() == tuple) {
            return Err(invalid(format!(
                "combination {:?} already exists in {}",
                row.options, key
            )));
        }

        let mut inserted = self.store().insert_many(std::slice::from_ref(row)).await?;
        inserted
            .pop()
            .ok_or_else(|| CatalogError::Store(anyhow::anyhow!("insert returned no row")))
    }

    pub async fn update_price(
        &self,
        id: &str,
        price: Option<&PriceInput>,
    ) -> Result<Combination, CatalogError> {
        let price = price
            .ok_or_else(|| invalid("price is required"))?
            .to_price()?;
        self.store()
            .update_price(id, price)
            .await?
            .ok_or_else(|| CatalogError::NotFound(id.to_string()))
    }

    /// Apply many price edits. Every row is validated before any is applied.
    pub async fn bulk_update(
        &self,
        rows: &[PriceUpdate],
    ) -> Result<BulkUpdateOutcome, CatalogError> {
        if rows.is_empty() {
            return Err(invalid("no updates given"));
        }

        let mut updates = Vec::with_capacity(rows.len());
        for (index, row) in rows.iter().enumerate() {
            let id = row
                .id
                .as_deref()
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .ok_or_else(|| invalid(format!("row {}: id is required", index + 1)))?;
            let price = row
                .price
                .as_ref()
                .ok_or_else(|| invalid(format!("row {}: price is required", index + 1)))?
                .to_price()
                .map_err(|e| invalid(format!("row {}: {}", index + 1, e)))?;
            updates.push((id, price));
        }

        let mut outcome = BulkUpdateOutcome {
            updated: 0,
            missing: Vec::new(),
        };
        for (id, price) in updates {
            match self.store().update_price(id, price).await? {
                Some(_) => outcome.updated += 1,
                None => outcome.missing.push(id.to_string()),
            }
        }

        info!(
            updated = outcome.updated,
            missing = outcome.missing.len(),
            "bulk price update"
        );
        Ok(outcome)
    }
}

/// Run the list command: print every group as a table.
pub async fn run_list(config: &Config) -> anyhow::Result<()> {
    let store: Arc<dyn Store> = Arc::new(SqliteStore::open(config).await?);
    let synchronizer = Arc::new(Synchronizer::new(store, config.scrape.sync_options()));
    let catalog = Catalog::new(synchronizer, config.scrape.product.clone());

    let listings = catalog.grouped().await?;
    if listings.is_empty() {
        println!("No combinations found.");
        return Ok(());
    }

    for listing in &listings {
        println!("{}/{} ({} combinations)", listing.product, listing.group, listing.combinations.len());
        println!("  {:<36}  {}", "ID", listing.headers.join(" | "));
        for combo in &listing.combinations {
            println!(
                "  {:<36}  {} | {:.2}",
                combo.id,
                combo.options.join(" | "),
                combo.price
            );
        }
        println!();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pricegrid_core::reconcile::SyncOptions;
    use pricegrid_core::store::memory::InMemoryStore;
    use serde_json::json;

    fn catalog() -> Catalog {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        Catalog::new(
            Arc::new(Synchronizer::new(store, SyncOptions::default())),
            "mailer",
        )
    }

    fn create_input(body: Value) -> CreateInput {
        parse_body(body).unwrap()
    }

    #[test]
    fn test_price_input_accepts_numbers_and_numeric_strings() {
        assert_eq!(PriceInput::Number(4.5).to_price().unwrap(), 4.5);
        assert_eq!(PriceInput::Text(" 12.25 ".into()).to_price().unwrap(), 12.25);
        assert!(PriceInput::Text("cheap".into()).to_price().is_err());
        assert!(PriceInput::Number(-1.0).to_price().is_err());
    }

    #[tokio::test]
    async fn test_create_defaults_and_rejects_duplicates() {
        let catalog = catalog();
        let created = catalog
            .create(create_input(json!({"group": "Black", "options": ["A", "1"]})))
            .await
            .unwrap();
        assert_eq!(created.product, "mailer");
        assert_eq!(created.price, 0.0);

        let err = catalog
            .create(create_input(
                json!({"group": "Black", "options": ["A", "1"], "price": "3"}),
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::Validation(_)));

        let other = catalog
            .create(create_input(
                json!({"group": "Full Color", "options": ["A", "1"], "price": 3}),
            ))
            .await
            .unwrap();
        assert_eq!(other.price, 3.0);
    }

    #[tokio::test]
    async fn test_create_trims_options_to_match_scraped_tuples() {
        let catalog = catalog();
        let created = catalog
            .create(create_input(json!({"group": "Black", "options": [" A ", "1\t"]})))
            .await
            .unwrap();
        assert_eq!(created.options, vec!["A", "1"]);

        let err = catalog
            .create(create_input(json!({"group": "Black", "options": ["A", " 1"]})))
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::Validation(_)));

        // A scrape producing the same tuple keeps the manual row.
        let key = GroupKey::new("mailer", "Black");
        let outcome = catalog
            .synchronizer
            .sync_group(&key, &[vec!["A".to_string(), "1".to_string()]])
            .await
            .unwrap();
        assert_eq!((outcome.inserted, outcome.deleted, outcome.retained), (0, 0, 1));
    }

    #[tokio::test]
    async fn test_product_listing_and_unknown_product() {
        let catalog = catalog();
        for body in [
            json!({"product": "Postcards", "group": "All", "options": ["4x6"]}),
            json!({"product": "Postcards", "group": "All", "options": ["5x7"]}),
            json!({"product": "Flyers", "group": "All", "options": ["Letter"]}),
        ] {
            catalog.create(create_input(body)).await.unwrap();
        }

        let listings = catalog.product("Postcards").await.unwrap();
        assert_eq!(listings.len(), 1);
        assert_eq!(listings[0].product, "Postcards");
        assert_eq!(listings[0].combinations.len(), 2);

        let err = catalog.product("Banners").await.unwrap_err();
        assert!(matches!(err, CatalogError::UnknownProduct(ref p) if p == "Banners"));
    }

    #[tokio::test]
    async fn test_create_validation() {
        let catalog = catalog();
        for body in [
            json!({"options": ["A"]}),
            json!({"group": " ", "options": ["A"]}),
            json!({"group": "Black"}),
            json!({"group": "Black", "options": []}),
            json!({"group": "Black", "options": ["A", ""]}),
            json!({"group": "Black", "options": ["A"], "price": "n/a"}),
        ] {
            let err = catalog.create(create_input(body)).await.unwrap_err();
            assert!(matches!(err, CatalogError::Validation(_)));
        }

        let err = parse_body::<CreateInput>(json!({"group": "Black", "options": [1, 2]}))
            .unwrap_err();
        assert!(matches!(err, CatalogError::Validation(_)));
    }

    #[tokio::test]
    async fn test_grouped_headers_follow_tuple_width() {
        let catalog = catalog();
        catalog
            .create(create_input(json!({"group": "Full Color", "options": ["A", "1", "x"]})))
            .await
            .unwrap();
        catalog
            .create(create_input(json!({"group": "Black", "options": ["A"]})))
            .await
            .unwrap();

        let listings = catalog.grouped().await.unwrap();
        assert_eq!(listings.len(), 2);
        assert_eq!(listings[0].group, "Black");
        assert_eq!(listings[0].headers, vec!["Option 1", "Price"]);
        assert_eq!(
            listings[1].headers,
            vec!["Option 1", "Option 2", "Option 3", "Price"]
        );
    }

    #[tokio::test]
    async fn test_update_price_and_not_found() {
        let catalog = catalog();
        let created = catalog
            .create(create_input(json!({"group": "Black", "options": ["A"]})))
            .await
            .unwrap();

        let updated = catalog
            .update_price(&created.id, Some(&PriceInput::Text("7.5".into())))
            .await
            .unwrap();
        assert_eq!(updated.price, 7.5);

        let err = catalog
            .update_price("missing", Some(&PriceInput::Number(1.0)))
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::NotFound(_)));

        let err = catalog.update_price(&created.id, None).await.unwrap_err();
        assert!(matches!(err, CatalogError::Validation(_)));
    }

    #[tokio::test]
    async fn test_bulk_update_is_all_or_nothing_on_invalid_rows() {
        let catalog = catalog();
        let a = catalog
            .create(create_input(json!({"group": "Black", "options": ["A"]})))
            .await
            .unwrap();

        let rows: Vec<PriceUpdate> = parse_body(json!([
            {"_id": a.id, "price": 9},
            {"id": "ghost", "price": "bad"}
        ]))
        .unwrap();
        assert!(catalog.bulk_update(&rows).await.is_err());
        assert_eq!(catalog.store().get(&a.id).await.unwrap().unwrap().price, 0.0);

        let rows: Vec<PriceUpdate> = parse_body(json!([
            {"_id": a.id, "price": 9},
            {"id": "ghost", "price": "2"}
        ]))
        .unwrap();
        let outcome = catalog.bulk_update(&rows).await.unwrap();
        assert_eq!(outcome.updated, 1);
        assert_eq!(outcome.missing, vec!["ghost"]);
        assert_eq!(catalog.store().get(&a.id).await.unwrap().unwrap().price, 9.0);
    }
}
