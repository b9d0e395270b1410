use axum::Router;
use scentkit::config::{MemoryTierConfig, PersistentBackend, ScentKitConfig, DAY};
use scentkit::gateway::{aiml, gemini, AimlImageClient, GeminiClient};
use scentkit::{router, service::ScentService};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

/// ScentKit server entry point.
///
/// Initializes tracing, builds configuration from the environment, wires the
/// providers and cache tiers into a [`ScentService`] and serves the HTTP API.
///
/// # Configuration
/// Environment variables:
/// - `PORT`: HTTP listen port (default: 8080)
/// - `PROMPT_VERSION` / `IMAGE_PROMPT_VERSION`: cache-key namespaces (default: v1)
/// - `SEED_DIR`: directory holding `responses.json` and `character-index.json`
/// - `SLED_PATH`: local persistent tier
/// - `UPSTASH_REDIS_REST_URL` / `UPSTASH_REDIS_REST_TOKEN`: networked persistent tier (wins over sled)
/// - `GEMINI_API_KEY`, `GEMINI_MODEL`: text provider
/// - `AIML_API_KEY`, `IMG_MODEL_PRIMARY`, `IMG_MODEL_FALLBACK`: image provider
/// - `INLINE_REMOTE_IMAGES`: download provider-hosted images into the blob store
/// - `DISABLE_RATE_LIMIT`: turn off per-IP limits on generation routes
/// - `STATIC_DIR`: static frontend (default: ./frontend)
/// - `RUST_LOG`: Logging verbosity (default: "scentkit=debug,tower_http=debug")
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "scentkit=debug,tower_http=debug".into()),
        )
        .init();

    tracing::info!("Starting ScentKit server");

    let cfg = config_from_env();
    cfg.validate()?;

    let http = reqwest::Client::new();
    let gemini_key = env_or("GEMINI_API_KEY", "");
    let aiml_key = env_or("AIML_API_KEY", "");
    if gemini_key.is_empty() {
        tracing::warn!("GEMINI_API_KEY is not set; text generation will fail on cache misses");
    }
    if aiml_key.is_empty() {
        tracing::warn!("AIML_API_KEY is not set; image generation will fail on cache misses");
    }

    let text_gen = GeminiClient::new(
        http.clone(),
        gemini_key,
        env_or("GEMINI_MODEL", gemini::DEFAULT_GEMINI_MODEL),
    );
    let image_gen = AimlImageClient::new(http.clone(), aiml_key).with_models(
        &env_or("IMG_MODEL_PRIMARY", aiml::DEFAULT_PRIMARY_MODEL),
        &env_or("IMG_MODEL_FALLBACK", aiml::DEFAULT_FALLBACK_MODEL),
    );

    let service = ScentService::builder(cfg, Arc::new(text_gen), Arc::new(image_gen))
        .http_client(http)
        .build()?;

    let app = Router::new().merge(router(service));

    // Cloud platforms inject PORT environment variable
    let port = std::env::var("PORT")
        .unwrap_or_else(|_| "8080".to_string())
        .parse::<u16>()
        .unwrap_or(8080);

    // Bind to 0.0.0.0 for external access (required for containerized deployment)
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Server listening on {}", addr);

    axum::serve(
        tokio::net::TcpListener::bind(addr).await?,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_flag(name: &str) -> bool {
    matches!(
        std::env::var(name).map(|v| v.trim().to_lowercase()).as_deref(),
        Ok("1" | "true" | "yes" | "on")
    )
}

fn config_from_env() -> ScentKitConfig {
    let defaults = ScentKitConfig::default();

    let upstash_url = env_or("UPSTASH_REDIS_REST_URL", "");
    let upstash_token = env_or("UPSTASH_REDIS_REST_TOKEN", "");
    let sled_path = env_or("SLED_PATH", "");
    let persistent = if !upstash_url.is_empty() && !upstash_token.is_empty() {
        PersistentBackend::Upstash {
            url: upstash_url,
            token: upstash_token,
        }
    } else if !sled_path.is_empty() {
        PersistentBackend::Sled {
            path: PathBuf::from(sled_path),
        }
    } else {
        PersistentBackend::None
    };

    ScentKitConfig {
        prompt_version: env_or("PROMPT_VERSION", &defaults.prompt_version),
        image_prompt_version: env_or("IMAGE_PROMPT_VERSION", &defaults.image_prompt_version),
        seed_dir: PathBuf::from(env_or("SEED_DIR", "./data")),
        text_memory: MemoryTierConfig {
            capacity: 1000,
            ttl: DAY * 30,
        },
        image_memory: MemoryTierConfig {
            capacity: 500,
            ttl: DAY * 30,
        },
        persistent,
        inline_remote_images: env_flag("INLINE_REMOTE_IMAGES"),
        rate_limit: if std::env::var("DISABLE_RATE_LIMIT").is_ok() {
            None
        } else {
            defaults.rate_limit
        },
        static_dir: PathBuf::from(env_or("STATIC_DIR", "frontend")),
        ..defaults
    }
}
