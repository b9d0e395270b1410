use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::atomic::Ordering;
use thiserror::Error;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tower_http::services::ServeDir;

pub mod blob;
pub mod cache;
pub mod canonical;
pub mod config;
pub mod dedupe;
pub mod fetch;
pub mod gateway;
pub mod key;
pub mod metrics;
pub mod service;

use crate::config::ConfigError;
use crate::key::{Category, Language, Style};
use crate::metrics::METRICS;
use crate::service::ScentService;

/// Blobs are addressed by owner key and never rewritten.
pub const BLOB_CACHE_CONTROL: &str = "public, max-age=31536000, immutable";
pub const NO_CACHE_CONTROL: &str = "no-store";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScentKitError {
    /// Persistent tier failed. Swallowed inside the cache layer.
    #[error("Cache unavailable: {0}")]
    CacheUnavailable(String),
    #[error("Generation failed: {0}")]
    GenerationFailed(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Internal server error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, ScentKitError>;

impl From<ConfigError> for ScentKitError {
    fn from(e: ConfigError) -> Self {
        ScentKitError::Configuration(e.to_string())
    }
}

impl ScentKitError {
    pub fn status(&self) -> StatusCode {
        match self {
            ScentKitError::CacheUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ScentKitError::GenerationFailed(_) => StatusCode::BAD_GATEWAY,
            ScentKitError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ScentKitError::NotFound(_) => StatusCode::NOT_FOUND,
            ScentKitError::Configuration(_) | ScentKitError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ScentKitError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        } else {
            tracing::debug!("Request rejected: {}", self);
        }
        (status, Json(json!({ "ok": false, "error": self.to_string() }))).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct SmellRequest {
    #[serde(alias = "name")]
    pub prompt: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub lang: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ImageRequest {
    pub name: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub style: Option<String>,
    #[serde(default)]
    pub lang: Option<String>,
    #[serde(default)]
    pub universe: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PurgeRequest {
    pub name: String,
}

async fn smell_handler(
    State(service): State<ScentService>,
    Json(req): Json<SmellRequest>,
) -> Result<impl IntoResponse> {
    let category = Category::parse(req.category.as_deref().unwrap_or_default());
    let language = Language::parse(req.lang.as_deref().unwrap_or_default());
    tracing::debug!("Smell request: prompt={:?}, category={}, lang={}", req.prompt, category, language);

    let outcome = service.get_or_generate_text(&req.prompt, category, language).await?;
    Ok(Json(json!({
        "text": outcome.text,
        "officialName": outcome.canonical_name,
        "cacheTier": outcome.tier,
        "cached": outcome.tier.is_hit(),
        "lang": outcome.language,
        "category": outcome.category,
    })))
}

async fn image_common(service: ScentService, req: ImageRequest) -> Result<Json<serde_json::Value>> {
    let category = Category::parse(req.category.as_deref().unwrap_or_default());
    let language = Language::parse(req.lang.as_deref().unwrap_or_default());
    let style = Style::parse(req.style.as_deref().unwrap_or_default());
    tracing::debug!(
        "Image request: name={:?}, category={}, style={}, lang={}, universe={:?}",
        req.name, category, style, language, req.universe
    );

    let outcome = service
        .get_or_generate_image(&req.name, category, &style, language, req.universe.as_deref())
        .await?;
    Ok(Json(json!({
        "ok": true,
        "imageUrl": outcome.image_url,
        "provider": outcome.provider,
        "cacheTier": outcome.tier,
        "cacheHit": outcome.tier.is_hit(),
    })))
}

async fn image_get_handler(
    State(service): State<ScentService>,
    Query(req): Query<ImageRequest>,
) -> Result<Json<serde_json::Value>> {
    image_common(service, req).await
}

async fn image_post_handler(
    State(service): State<ScentService>,
    Json(req): Json<ImageRequest>,
) -> Result<Json<serde_json::Value>> {
    image_common(service, req).await
}

async fn blob_handler(State(service): State<ScentService>, Path(id): Path<String>) -> Result<Response> {
    let blob = service.retrieve_blob(&id).await?;
    let bytes = blob.decode()?;

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&blob.content_type)
            .unwrap_or(HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static(BLOB_CACHE_CONTROL));
    Ok((headers, Body::from(bytes)).into_response())
}

async fn clear_cache_handler(State(service): State<ScentService>) -> impl IntoResponse {
    service.clear_volatile_caches();
    (
        [(header::CACHE_CONTROL, NO_CACHE_CONTROL)],
        Json(json!({ "ok": true, "message": "Memory caches and in-flight registries cleared" })),
    )
}

async fn purge_aliases_handler(
    State(service): State<ScentService>,
    Json(req): Json<PurgeRequest>,
) -> Result<impl IntoResponse> {
    if req.name.trim().is_empty() {
        return Err(ScentKitError::InvalidInput("Missing name".into()));
    }
    let removed = service.purge_aliases(&req.name);
    Ok(Json(json!({ "ok": true, "removed": removed })))
}

/// Health check endpoint
async fn health_handler(State(service): State<ScentService>) -> impl IntoResponse {
    let report = service.health().await;
    Json(json!({
        "status": report.status,
        "version": env!("CARGO_PKG_VERSION"),
        "service": "scentkit",
        "persistent": report.persistent,
        "seeds": report.seeds,
        "aliases": report.aliases,
        "inflight": report.inflight,
    }))
}

/// Cache statistics endpoint
async fn cache_stats_handler(State(service): State<ScentService>) -> impl IntoResponse {
    let stats = service.stats();

    let hits = METRICS.hits();
    let misses = METRICS.misses.load(Ordering::Relaxed);
    let total_requests = hits + misses;
    let hit_rate = if total_requests > 0 {
        (hits as f64 / total_requests as f64) * 100.0
    } else {
        0.0
    };

    Json(json!({
        "cache": stats,
        "requests": {
            "seed_hits": METRICS.seed_hits.load(Ordering::Relaxed),
            "memory_hits": METRICS.memory_hits.load(Ordering::Relaxed),
            "persistent_hits": METRICS.persistent_hits.load(Ordering::Relaxed),
            "misses": misses,
            "total": total_requests,
            "hit_rate_percent": hit_rate,
        },
        "generations": {
            "total": METRICS.generations.load(Ordering::Relaxed),
            "failures": METRICS.generation_failures.load(Ordering::Relaxed),
            "inflight_joins": METRICS.inflight_joins.load(Ordering::Relaxed),
        },
        "store_errors": METRICS.store_errors.load(Ordering::Relaxed),
    }))
}

/// Metrics endpoint (Prometheus-compatible plain text)
async fn metrics_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::render_prometheus(),
    )
}

/// Builds the HTTP surface over `service`.
///
/// Generation routes are rate limited per client IP when the config asks
/// for it; the server must then be run with
/// `into_make_service_with_connect_info::<SocketAddr>()`.
pub fn router(service: ScentService) -> Router {
    let static_dir = service.config().static_dir.clone();
    let rate_limit = service.config().rate_limit;

    // Observability and admin endpoints - NO rate limiting
    let ops_routes = Router::new()
        .route("/health", get(health_handler))
        .route("/stats/cache", get(cache_stats_handler))
        .route("/metrics", get(metrics_handler))
        .route("/api/image/:id", get(blob_handler))
        .route("/admin/clear-cache", post(clear_cache_handler))
        .route("/admin/aliases/purge", post(purge_aliases_handler));

    // Generation endpoints - WITH rate limiting
    let mut generation_routes = Router::new()
        .route("/api/smell", post(smell_handler))
        .route("/api/ai-image", get(image_get_handler).post(image_post_handler));

    match rate_limit {
        Some(limit) => {
            let governor_conf = GovernorConfigBuilder::default()
                .per_second(limit.per_second)
                .burst_size(limit.burst_size)
                .finish();
            match governor_conf {
                Some(conf) => {
                    tracing::info!(
                        "Router configured with rate limiting: {}/sec, burst {}",
                        limit.per_second,
                        limit.burst_size
                    );
                    generation_routes = generation_routes.layer(GovernorLayer {
                        config: Box::leak(Box::new(conf)),
                    });
                }
                None => tracing::warn!("Invalid rate limit settings; rate limiting disabled"),
            }
        }
        None => tracing::info!("Rate limiting disabled"),
    }

    Router::new()
        .merge(ops_routes)
        .merge(generation_routes)
        .fallback_service(ServeDir::new(static_dir))
        .with_state(service)
}
