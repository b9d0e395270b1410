use goose::prelude::*;
use rand::Rng;
use serde_json::json;

/// Load testing suite for the ScentKit cache layer.
///
/// Traffic is shaped around the two things the service exists for:
/// - Repeated lookups of popular characters (seed and memory hits)
/// - Bursts of identical cold requests that must collapse into one
///   provider call
///
/// # Usage
/// ```bash
/// cd loadtest
/// cargo run --release -- --host http://localhost:8080 --users 20 --hatch-rate 5 --run-time 60s
/// ```
///
/// Run the server with `DISABLE_RATE_LIMIT=1`, otherwise the per-IP
/// governor answers most of the generation traffic with 429.
///
/// # Performance Targets
/// - Seed and memory hits: <10ms p95 latency
/// - Persistent hits: <50ms p95 latency
/// - Provider calls per cold key: exactly 1 (see `/stats/cache`)

const POPULAR: [&str; 8] = [
    "Naruto Uzumaki",
    "uzumaki naruto",
    "Son Goku",
    "goku",
    "Lara Croft",
    "Geralt of Rivia",
    "Hermione Granger",
    "Spider-Man",
];

const CATEGORIES: [&str; 5] = ["anime", "games", "movies", "books", "any"];

#[tokio::main]
async fn main() -> Result<(), GooseError> {
    GooseAttack::initialize()?
        .register_scenario(
            scenario!("PopularProfiles")
                // Hot keys, served from seed or memory after warmup
                .register_transaction(transaction!(popular_profile).set_weight(10)?)
                .register_transaction(transaction!(popular_image).set_weight(5)?)
                .register_transaction(transaction!(health_check).set_weight(1)?),
        )
        .register_scenario(
            scenario!("ColdBursts")
                // All users hit the same cold key within the same minute
                .register_transaction(transaction!(shared_cold_profile).set_weight(5)?)
                .register_transaction(transaction!(spanish_profile).set_weight(2)?)
                .register_transaction(transaction!(cache_stats).set_weight(1)?),
        )
        .execute()
        .await?;

    Ok(())
}

/// Requests a profile for a randomly chosen popular name, including alias
/// and word-order variants that must share one cache entry.
async fn popular_profile(user: &mut GooseUser) -> TransactionResult {
    // Pick before await to satisfy Send bounds
    let body = {
        let mut rng = rand::thread_rng();
        json!({
            "prompt": POPULAR[rng.gen_range(0..POPULAR.len())],
            "category": CATEGORIES[rng.gen_range(0..CATEGORIES.len())],
            "lang": "en",
        })
    };

    let _goose = user.post_json("/api/smell", &body).await?;
    Ok(())
}

async fn popular_image(user: &mut GooseUser) -> TransactionResult {
    let path = {
        let mut rng = rand::thread_rng();
        let name = POPULAR[rng.gen_range(0..POPULAR.len())].replace(' ', "%20");
        format!("/api/ai-image?name={}&category=any&style=auto", name)
    };

    let _goose = user.get(&path).await?;
    Ok(())
}

/// Every user asks for the same per-minute name, so the first request of
/// each minute is a miss and the rest should join it or hit memory.
async fn shared_cold_profile(user: &mut GooseUser) -> TransactionResult {
    let minute = chrono::Utc::now().timestamp() / 60;
    let body = json!({
        "prompt": format!("Loadtest Subject {}", minute),
        "category": "games",
    });

    let _goose = user.post_json("/api/smell", &body).await?;
    Ok(())
}

async fn spanish_profile(user: &mut GooseUser) -> TransactionResult {
    let body = {
        let mut rng = rand::thread_rng();
        json!({
            "prompt": POPULAR[rng.gen_range(0..POPULAR.len())],
            "lang": "es",
        })
    };

    let _goose = user.post_json("/api/smell", &body).await?;
    Ok(())
}

async fn cache_stats(user: &mut GooseUser) -> TransactionResult {
    let _goose = user.get("/stats/cache").await?;
    Ok(())
}

/// Baseline latency separate from cache and provider work.
async fn health_check(user: &mut GooseUser) -> TransactionResult {
    let _goose = user.get("/health").await?;
    Ok(())
}
