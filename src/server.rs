//! HTTP API for the admin UI.
//!
//! Thin request/response glue over [`Catalog`] and [`Pipeline`].
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/api/combinations` | Combinations grouped by product and group |
//! | `POST` | `/api/combinations` | Create one combination by hand |
//! | `GET`  | `/api/combinations/{product}` | Combinations of one product (404 if unknown) |
//! | `PUT`  | `/api/combinations/{id}` | Update one price |
//! | `POST` | `/api/combinations/update` | Bulk price update |
//! | `GET`, `POST` | `/api/scrape?url=&mode=&group=` | Run the scrape pipeline |
//! | `GET`  | `/api/scrape-labels?url=` | List select captions on a page |
//! | `GET`  | `/api/configuration` | Field definitions from the last scrape |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! Every failure is a JSON body with a single message:
//!
//! ```json
//! { "error": "group is required" }
//! ```
//!
//! Status codes: 400 for missing or invalid input, 404 for unknown ids,
//! 500 for fetch and storage failures.
//!
//! A `url` parameter must be an `http://` or `https://` address; the
//! server never reads local files on a caller's behalf.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so a browser-based
//! admin UI can be served from anywhere.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{rejection::JsonRejection, rejection::QueryRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use pricegrid_core::store::{FieldSet, Store};

use crate::catalog::{
    parse_body, BulkUpdateOutcome, Catalog, CatalogError, CreateInput, GroupListing, PriceInput,
    PriceUpdate,
};
use crate::config::Config;
use crate::extract::select_labels;
use crate::fetch::{is_http, Fetcher, SourceFetcher};
use crate::pipeline::{Pipeline, ScrapeMode, ScrapeReport, ScrapeRequest};
use crate::schedule::Scheduler;
use crate::sqlite_store::SqliteStore;
use crate::sync::Synchronizer;

/// Shared state passed to every handler.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    store: Arc<dyn Store>,
    pipeline: Arc<Pipeline>,
    catalog: Arc<Catalog>,
}

impl AppState {
    /// Wire the pipeline and catalog around one store and one lock registry.
    pub fn new(config: Config, store: Arc<dyn Store>, fetcher: Arc<dyn Fetcher>) -> Self {
        let synchronizer = Arc::new(Synchronizer::new(
            store.clone(),
            config.scrape.sync_options(),
        ));
        let pipeline = Arc::new(Pipeline::new(fetcher, synchronizer.clone(), &config.scrape));
        let catalog = Arc::new(Catalog::new(synchronizer, config.scrape.product.clone()));
        Self {
            config: Arc::new(config),
            store,
            pipeline,
            catalog,
        }
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route(
            "/api/combinations",
            get(handle_list_combinations).post(handle_create_combination),
        )
        .route("/api/combinations/update", post(handle_bulk_update))
        // One segment: a product name for GET, a combination id for PUT.
        .route(
            "/api/combinations/{key}",
            get(handle_product_combinations).put(handle_update_price),
        )
        .route("/api/scrape", get(handle_scrape).post(handle_scrape))
        .route("/api/scrape-labels", get(handle_scrape_labels))
        .route("/api/configuration", get(handle_configuration))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state)
}

/// Serve the API on an already-bound listener.
pub async fn serve(listener: TcpListener, state: AppState) -> anyhow::Result<()> {
    axum::serve(listener, router(state)).await?;
    Ok(())
}

/// Start the server on `[server].bind`, backed by the configured database.
///
/// When both `[schedule]` and `[scrape].url` are set, a periodic scrape
/// runs alongside the server for as long as it is up.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let store: Arc<dyn Store> = Arc::new(SqliteStore::open(config).await?);
    let fetcher: Arc<dyn Fetcher> = Arc::new(SourceFetcher::new(&config.scrape)?);
    let state = AppState::new(config.clone(), store, fetcher);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    match (&config.schedule, &config.scrape.url) {
        (Some(schedule), Some(url)) => {
            let request = ScrapeRequest::new(url.clone(), config.scrape.mode)
                .with_groups(schedule.groups.iter().cloned());
            let scheduler = Scheduler::new(
                state.pipeline().clone(),
                request,
                Duration::from_secs(schedule.interval_secs),
            );
            tokio::spawn(scheduler.run(shutdown_rx));
        }
        (Some(_), None) => warn!("[schedule] is set but [scrape].url is not; periodic scrape disabled"),
        _ => {}
    }

    let listener = TcpListener::bind(&config.server.bind).await?;
    info!(bind = %config.server.bind, "pricegrid server listening");
    println!("pricegrid server listening on http://{}", config.server.bind);

    let result = serve(listener, state).await;
    let _ = shutdown_tx.send(true);
    result
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

/// Error type that converts into a `{"error": ...}` response.
#[derive(Debug)]
struct AppError {
    status: StatusCode,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorBody {
                error: self.message,
            }),
        )
            .into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        message: message.into(),
    }
}

impl From<CatalogError> for AppError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::Validation(message) => bad_request(message),
            CatalogError::NotFound(id) => not_found(format!("combination not found: {}", id)),
            CatalogError::UnknownProduct(name) => not_found(format!("product not found: {}", name)),
            CatalogError::Store(e) => {
                warn!(error = %e, "storage failure");
                internal(format!("{:#}", e))
            }
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        bad_request(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        bad_request(rejection.body_text())
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ /api/combinations ============

async fn handle_list_combinations(
    State(state): State<AppState>,
) -> Result<Json<Vec<GroupListing>>, AppError> {
    Ok(Json(state.catalog.grouped().await?))
}

async fn handle_product_combinations(
    State(state): State<AppState>,
    Path(product): Path<String>,
) -> Result<Json<Vec<GroupListing>>, AppError> {
    Ok(Json(state.catalog.product(&product).await?))
}

async fn handle_create_combination(
    State(state): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(body) = body?;
    let input: CreateInput = parse_body(body)?;
    let created = state.catalog.create(input).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

#[derive(Deserialize)]
struct PriceBody {
    #[serde(default)]
    price: Option<PriceInput>,
}

async fn handle_update_price(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(body) = body?;
    let input: PriceBody = parse_body(body)?;
    let updated = state.catalog.update_price(&id, input.price.as_ref()).await?;
    Ok(Json(updated))
}

/// Accepts a bare array of rows or an object wrapping it in `updates`.
async fn handle_bulk_update(
    State(state): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<BulkUpdateOutcome>, AppError> {
    let Json(body) = body?;
    let rows = match body {
        Value::Object(mut map) if map.contains_key("updates") => {
            map.remove("updates").unwrap_or(Value::Null)
        }
        other => other,
    };
    let rows: Vec<PriceUpdate> = parse_body(rows)?;
    Ok(Json(state.catalog.bulk_update(&rows).await?))
}

// ============ /api/scrape ============

#[derive(Debug, Deserialize)]
struct ScrapeParams {
    url: Option<String>,
    mode: Option<ScrapeMode>,
    /// Comma-separated group selectors.
    group: Option<String>,
}

/// The page a request names, or the configured default.
///
/// Callers may only name `http(s)://` pages; local paths are reserved for
/// the configured default and the CLI.
fn request_url(state: &AppState, url: Option<String>) -> Result<String, AppError> {
    match url.filter(|u| !u.trim().is_empty()) {
        Some(url) if is_http(&url) => Ok(url),
        Some(_) => Err(bad_request("url must start with http:// or https://")),
        None => state
            .config
            .scrape
            .url
            .clone()
            .ok_or_else(|| bad_request("Missing ?url=")),
    }
}

async fn handle_scrape(
    State(state): State<AppState>,
    params: Result<Query<ScrapeParams>, QueryRejection>,
) -> Result<Json<ScrapeReport>, AppError> {
    let Query(params) = params?;
    let url = request_url(&state, params.url)?;
    let groups: BTreeSet<String> = params
        .group
        .as_deref()
        .unwrap_or("")
        .split(',')
        .map(|g| g.trim().to_string())
        .filter(|g| !g.is_empty())
        .collect();

    let request = ScrapeRequest::new(url, params.mode.unwrap_or(state.config.scrape.mode))
        .with_groups(groups);
    let report = state
        .pipeline
        .run(&request)
        .await
        .map_err(|e| internal(e.to_string()))?;
    Ok(Json(report))
}

#[derive(Debug, Deserialize)]
struct LabelParams {
    url: Option<String>,
}

#[derive(Serialize)]
struct LabelsResponse {
    success: bool,
    count: usize,
    labels: Vec<String>,
}

async fn handle_scrape_labels(
    State(state): State<AppState>,
    params: Result<Query<LabelParams>, QueryRejection>,
) -> Result<Json<LabelsResponse>, AppError> {
    let Query(params) = params?;
    let url = request_url(&state, params.url)?;
    let html = state
        .pipeline
        .fetcher()
        .fetch(&url)
        .await
        .map_err(|e| internal(e.to_string()))?;

    let labels = select_labels(&html);
    Ok(Json(LabelsResponse {
        success: true,
        count: labels.len(),
        labels,
    }))
}

// ============ GET /api/configuration ============

async fn handle_configuration(
    State(state): State<AppState>,
) -> Result<Json<Vec<FieldSet>>, AppError> {
    let sets = state
        .store
        .list_fields()
        .await
        .map_err(|e| internal(format!("{:#}", e)))?;
    Ok(Json(sets))
}
