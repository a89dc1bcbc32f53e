//! Demo binary for hybrid-query-router
//!
//! Builds a router from config, starts the adaptive controller and cache
//! sweeper, and routes a handful of sample queries.
//!
//! ```text
//! hybrid-query-router [router.toml]
//! ```
//!
//! ## Environment Variables
//!
//! - `LOG_FORMAT=json`: structured JSON output (production)
//! - `RUST_LOG=info`: log level filter
//! - `QUERY_ROUTER_*`: config overrides (see `config` module)
//!
//! Without `remote_base_url` the remote backend is simulated in-process.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use hybrid_query_router::config::loader;
use hybrid_query_router::remote::ScriptedTransport;
use hybrid_query_router::{
    init_tracing, metrics, QueryContext, QueryRouter, RemoteAnalysisClient, ThresholdController,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = init_tracing();
    metrics::init_metrics()?;

    let path = std::env::args().nth(1).map(PathBuf::from);
    let config = loader::load(path.as_deref())?;
    info!(
        threshold = config.initial_complexity_threshold,
        ml_enabled = config.ml_enabled,
        remote = config.remote_base_url.as_deref().unwrap_or("simulated"),
        "Starting hybrid-query-router demo"
    );

    let mut router = QueryRouter::from_config(&config)?;
    if config.remote_base_url.is_none() {
        let transport = ScriptedTransport::echo("demo-model").with_delay(Duration::from_millis(25));
        router = router.with_remote(RemoteAnalysisClient::new(Arc::new(transport)));
    }
    let router = Arc::new(router);
    metrics::set_threshold(config.initial_complexity_threshold);

    let shutdown = CancellationToken::new();
    let controller = ThresholdController::new(
        config.controller_config(),
        router.thresholds().clone(),
        router.telemetry().clone(),
    )
    .spawn(shutdown.clone());
    let sweeper = router
        .cache()
        .spawn_sweeper(Duration::from_secs(30), shutdown.clone());

    let demo_queries = [
        ("state:27", "choropleth", "Show population"),
        ("state:27", "bar", "Top 5 counties by median income"),
        ("county:27053", "scatter", "Correlation between income and age with confidence interval"),
        ("state:27", "line", "Forecast housing prices over time near the river"),
        ("state:27", "choropleth", "Show population"),
        ("state:27", "bar", "How many hospitals are there?"),
        ("state:27", "choropleth", "Tell me a joke"),
    ];

    let mut tasks = Vec::with_capacity(demo_queries.len());
    for (i, (geo, hint, text)) in demo_queries.into_iter().enumerate() {
        let router = Arc::clone(&router);
        tasks.push(tokio::spawn(async move {
            // stagger so the repeated query can hit the cache
            tokio::time::sleep(Duration::from_millis(40 * i as u64)).await;
            match router.process(text, QueryContext::new(geo, hint)).await {
                Ok(out) => info!(
                    query = text,
                    served_by = out.served_by.as_str(),
                    score = out.decision.score.as_ref().map(|s| s.score),
                    latency_ms = out.latency.as_secs_f64() * 1_000.0,
                    fidelity = ?out.result.fidelity,
                    "query answered"
                ),
                Err(e) => warn!(query = text, error = %e, "query failed"),
            }
        }));
    }
    for task in tasks {
        task.await?;
    }

    let cache = router.cache().stats();
    info!(
        entries = cache.entries,
        hits = cache.hits,
        misses = cache.misses,
        hit_rate = cache.hit_rate(),
        telemetry_buffered = router.telemetry().len(),
        "Demo finished"
    );
    println!("{}", metrics::gather_metrics());

    shutdown.cancel();
    controller.await?;
    sweeper.await?;
    Ok(())
}
