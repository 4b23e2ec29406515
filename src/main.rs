//! edgecache-node daemon
//!
//! Always-on edge node that predicts which content its local users will
//! want, prefetches it into a bounded cache, and serves intercepted
//! requests from the local copy.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::watch;
use tracing::{info, warn};

use edgecache_node::cache::{CacheManager, CachePolicy, HttpFetcher};
use edgecache_node::catalog::SqliteCatalog;
use edgecache_node::config::Config;
use edgecache_node::feed::{FeedSource, HttpFeedSource};
use edgecache_node::model::{EngagementModel, ModelHandle};
use edgecache_node::overlay::{HttpPeerDirectory, PeerDirectory};
use edgecache_node::predict::{EngagementPredictor, LocalityPredictor, ModelTrainer};
use edgecache_node::proxy::{OriginPatterns, RequestInterceptor};
use edgecache_node::scheduler::Scheduler;
use edgecache_node::server::{create_router, ServerState};

#[derive(Parser)]
#[command(name = "edgecache-node")]
#[command(about = "Predictive edge-caching node for a P2P content overlay")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "edgecache-node.toml")]
    config: String,

    /// Cache root directory (overrides config file)
    #[arg(long, env = "EDGECACHE_CACHE_ROOT")]
    cache_root: Option<String>,

    /// Node ID (overrides config file)
    #[arg(long, env = "EDGECACHE_NODE_ID")]
    node_id: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("edgecache_node=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    info!("Starting edgecache-node");
    info!("Config file: {}", cli.config);

    let mut config = if std::path::Path::new(&cli.config).exists() {
        let content = std::fs::read_to_string(&cli.config)?;
        toml::from_str::<Config>(&content)?
    } else {
        info!("Config file not found, using defaults");
        Config::default()
    };

    if let Some(cache_root) = cli.cache_root {
        config.node.cache_root = PathBuf::from(cache_root);
    }
    if let Some(node_id) = cli.node_id {
        config.node.id = node_id;
    }

    // Nonsensical budgets or periods must stop the node before it serves.
    config.validate()?;

    info!("Node ID: {}", config.node.id);
    info!("Cache root: {}", config.node.cache_root.display());

    // The catalog database lives beside, not inside, the served content
    // tree; only content/ is exposed over HTTP.
    let content_root = config.node.cache_root.join("content");
    std::fs::create_dir_all(&content_root)?;
    let catalog = Arc::new(SqliteCatalog::open(&config.node.cache_root)?);

    let model = Arc::new(ModelHandle::new(EngagementModel::default()));

    let fetch_timeout = Duration::from_secs(config.fetch.timeout_secs);
    let fetcher = Arc::new(HttpFetcher::new(fetch_timeout, config.fetch.retries));
    let cache = Arc::new(CacheManager::new(
        catalog.clone(),
        fetcher,
        content_root.clone(),
        CachePolicy {
            capacity_bytes: config.cache.capacity_bytes,
            grace_cycles: config.cache.grace_cycles,
            retention_ms: config.cache.retention_secs as i64 * 1000,
        },
        config.cache.max_concurrent_fetches,
    ));

    let half_life_ms = config.prediction.decay_half_life_secs as i64 * 1000;

    let feed: Option<Arc<dyn FeedSource>> = config
        .upstream
        .feed_url
        .clone()
        .map(|url| Arc::new(HttpFeedSource::new(url, fetch_timeout)) as Arc<dyn FeedSource>);
    let directory: Option<Arc<dyn PeerDirectory>> =
        config.upstream.directory_url.clone().map(|url| {
            Arc::new(HttpPeerDirectory::new(url, fetch_timeout)) as Arc<dyn PeerDirectory>
        });

    let engagement = match (&feed, config.prediction.engagement_enabled) {
        (Some(feed), true) => Some(Arc::new(EngagementPredictor::new(
            feed.clone(),
            catalog.clone(),
            model.clone(),
            half_life_ms,
            config.prediction.signal_window_secs as i64 * 1000,
        ))),
        (None, true) => {
            warn!("No feed URL configured, engagement prediction disabled");
            None
        }
        _ => None,
    };
    let locality = match (&directory, config.prediction.locality_enabled) {
        (Some(directory), true) => Some(Arc::new(LocalityPredictor::new(
            directory.clone(),
            catalog.clone(),
            config.prediction.locality_scale_km,
        ))),
        (None, true) => {
            warn!("No peer directory URL configured, locality prediction disabled");
            None
        }
        _ => None,
    };
    let trainer = feed.as_ref().map(|feed| {
        Arc::new(ModelTrainer::new(
            catalog.clone(),
            feed.clone(),
            model.clone(),
            half_life_ms,
        ))
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    Scheduler::new(
        engagement,
        locality,
        trainer,
        cache.clone(),
        Duration::from_secs(config.prediction.interval_secs),
        Duration::from_secs(config.cache.clean_interval_secs),
        Duration::from_secs(config.training.interval_secs),
    )
    .spawn(shutdown_rx);

    let interceptor = RequestInterceptor::new(
        OriginPatterns::new()?,
        catalog.clone(),
        cache.clone(),
        config.node.local_host.clone(),
    );
    let state = Arc::new(ServerState {
        interceptor,
        catalog,
        node_id: config.node.id.clone(),
    });
    let app = create_router(state, content_root);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.api.http_port));
    info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutdown signal received");
        })
        .await?;

    // Stops the periodic loops; in-flight fetches finish or clean up on
    // their own.
    shutdown_tx.send(true).ok();
    Ok(())
}
