//! tiercache node
//!
//! Hosts the distributed caches declared in a YAML configuration file,
//! attaches them to the shared store and invalidation bus, and serves
//! health and Prometheus endpoints.
//!
//! The node has no data-plane API. Applications read and write through the
//! library in their own process; the node validates a deployment's cache
//! layout, keeps region L1s swept and invalidated from the bus (string keys,
//! [`StringKeyCodec`]) and reports their counters. Nothing outside the
//! process holds a handle to the caches built here.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       tiercache node                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌──────────┐    ┌──────────────────┐    ┌──────────────┐   │
//! │  │ Regions  │───▶│ DistributedCache │───▶│ Store + Bus  │   │
//! │  │ (L1)     │    │  (per cache)     │    │  (L2)        │   │
//! │  └──────────┘    └──────────────────┘    └──────────────┘   │
//! │        │ janitor          │ stats                           │
//! │        ▼                  ▼                                 │
//! │   expiry sweeps     /metrics  /healthz  /readyz             │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tiercache::cache::{
    display_key_mapper, process_server_id, CacheRegion, ConflictResolver, DistributedCache, DistributedCacheConfig,
    FirstWriteWins, InvalidationConfig, JsonCodec, LastWriteWins, LocalTier, Lz4Codec,
    StringKeyCodec, ValueCodec,
};
use tiercache::config::{BusConfig, CacheConfig, NodeConfig, ResolverKind, StoreConfig, StoreKind};
use tiercache::error::{Error, Result};
use tiercache::metrics::MetricsExporter;
use tiercache::store::{InMemoryStore, NetworkedStore};

type NodeCache = DistributedCache<String, Value>;

// =============================================================================
// CLI Arguments
// =============================================================================

/// tiercache node - distributed two-tier cache
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML configuration file
    #[arg(long, env = "TIERCACHE_CONFIG")]
    config: Option<PathBuf>,

    /// Networked store URL (overrides the configuration file)
    #[arg(long, env = "TIERCACHE_STORE_URL")]
    store_url: Option<String>,

    /// Server id stamped on invalidation messages (random when unset)
    #[arg(long, env = "TIERCACHE_SERVER_ID")]
    server_id: Option<String>,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: String,

    /// Health server bind address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    health_addr: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args);

    let mut config = match &args.config {
        Some(path) => NodeConfig::load(path)?,
        None => NodeConfig::default(),
    };
    if let Some(url) = &args.store_url {
        config.store.url = url.clone();
    }
    let server_id = args
        .server_id
        .clone()
        .unwrap_or_else(|| process_server_id().to_string());

    info!("Starting tiercache node");
    info!("  Server id: {}", server_id);
    info!("  Store: {:?}", config.store.kind);
    info!(
        "  Invalidation: {} (channel {})",
        config.invalidation.enabled, config.invalidation.channel
    );
    info!("  Regions: {}", config.regions.len());

    let metrics_addr = parse_addr(&args.metrics_addr, "metrics")?;
    let health_addr = parse_addr(&args.health_addr, "health")?;

    let store = connect_store(&config.store).await?;
    let exporter = Arc::new(MetricsExporter::new()?);
    let shutdown = CancellationToken::new();

    // Build regions and their caches; held for metrics, bus listeners and shutdown
    let mut regions: Vec<Arc<CacheRegion>> = Vec::new();
    let mut caches: Vec<Arc<NodeCache>> = Vec::new();
    let mut janitors = Vec::new();
    for region_config in &config.regions {
        let region = Arc::new(CacheRegion::new(
            region_config.name.clone(),
            region_config.defaults.clone(),
        )?);

        for cache_config in &region_config.caches {
            let cache = Arc::new(
                build_cache(
                    &region,
                    cache_config,
                    Arc::clone(&store),
                    &config.invalidation,
                    &server_id,
                )
                .await?,
            );
            exporter.register_source(cache.clone());
            caches.push(cache);
        }

        janitors.push(region.spawn_janitor(config.janitor_interval(), shutdown.child_token()));
        info!(
            "Region '{}' ready with caches {:?}",
            region.name(),
            region.cache_names()
        );
        regions.push(region);
    }

    if caches.is_empty() {
        warn!("No caches configured");
    }

    // Start health server
    let health_store = Arc::clone(&store);
    let health_exporter = Arc::clone(&exporter);
    let health_shutdown = shutdown.child_token();
    tokio::spawn(async move {
        let handler = move |req: Request<Incoming>| {
            let store = Arc::clone(&health_store);
            let exporter = Arc::clone(&health_exporter);
            async move { health_response(req, store.as_ref(), &exporter).await }
        };
        if let Err(e) = run_http_server(health_addr, "Health", health_shutdown, handler).await {
            error!("Health server error: {}", e);
        }
    });

    // Start metrics server
    let metrics_exporter = Arc::clone(&exporter);
    let metrics_shutdown = shutdown.child_token();
    tokio::spawn(async move {
        let handler = move |req: Request<Incoming>| {
            let exporter = Arc::clone(&metrics_exporter);
            async move { metrics_response(req, &exporter) }
        };
        if let Err(e) = run_http_server(metrics_addr, "Metrics", metrics_shutdown, handler).await {
            error!("Metrics server error: {}", e);
        }
    });

    info!("Node ready");
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    shutdown.cancel();
    for cache in &caches {
        cache.shutdown().await;
    }
    for janitor in janitors {
        if let Err(e) = janitor.await {
            warn!("Janitor task failed: {}", e);
        }
    }

    info!(
        "Node shutdown complete ({} regions, {} L1 entries held)",
        regions.len(),
        regions.iter().map(|region| region.total_entries()).sum::<usize>()
    );
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = ["hyper=warn", "deadpool=warn", "redis=info"]
        .iter()
        .filter_map(|directive| directive.parse().ok())
        .fold(
            EnvFilter::from_default_env().add_directive(level.into()),
            |filter, directive| filter.add_directive(directive),
        );

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

// =============================================================================
// Cache Bootstrap
// =============================================================================

async fn connect_store(config: &StoreConfig) -> Result<Arc<dyn NetworkedStore>> {
    match config.kind {
        StoreKind::Memory => {
            info!("Using in-memory store; invalidations stay within this process");
            Ok(Arc::new(InMemoryStore::new()))
        }
        StoreKind::Redis => connect_redis(config).await,
    }
}

#[cfg(feature = "redis")]
async fn connect_redis(config: &StoreConfig) -> Result<Arc<dyn NetworkedStore>> {
    use tiercache::store::{RedisStore, RedisStoreConfig};

    let redis_config = RedisStoreConfig {
        url: config.url.clone(),
        pool_size: config.pool_size,
        timeout_ms: config.timeout_ms,
    };
    Ok(Arc::new(RedisStore::connect(&redis_config).await?))
}

#[cfg(not(feature = "redis"))]
async fn connect_redis(_config: &StoreConfig) -> Result<Arc<dyn NetworkedStore>> {
    Err(Error::Config(
        "store kind 'redis' requires building with the `redis` feature".into(),
    ))
}

async fn build_cache(
    region: &CacheRegion,
    config: &CacheConfig,
    store: Arc<dyn NetworkedStore>,
    bus: &BusConfig,
    server_id: &str,
) -> Result<NodeCache> {
    let local = if !config.local {
        LocalTier::Disabled
    } else {
        let local = match &config.local_overrides {
            Some(overrides) => region.cache_with(&config.name, overrides.clone())?,
            None => region.cache(&config.name)?,
        };
        LocalTier::Shared(local)
    };

    let codec: Arc<dyn ValueCodec<Value>> = match config.compress_above {
        Some(threshold) => Arc::new(Lz4Codec::new(JsonCodec::<Value>::new(), threshold)),
        None => Arc::new(JsonCodec::<Value>::new()),
    };

    let mut cache_config =
        DistributedCacheConfig::new(config.name.clone(), store, codec, display_key_mapper())
            .with_sync_strategy(config.sync)
            .with_local(local);
    cache_config.ttl = config.ttl;

    if let Some(kind) = config.resolver {
        let resolver: Arc<dyn ConflictResolver<Value>> = match kind {
            ResolverKind::LastWriteWins => Arc::new(LastWriteWins),
            ResolverKind::FirstWriteWins => Arc::new(FirstWriteWins),
        };
        cache_config = cache_config.with_conflict_resolver(resolver);
    }

    if bus.enabled {
        let mut invalidation = InvalidationConfig::new(server_id, Arc::new(StringKeyCodec))
            .with_channel(bus.channel.clone());
        invalidation.ignore_own_messages = bus.ignore_own_messages;
        cache_config = cache_config.with_invalidation(invalidation);
    }

    DistributedCache::new(cache_config).await
}

// =============================================================================
// HTTP Endpoints
// =============================================================================

fn parse_addr(addr: &str, server: &str) -> Result<SocketAddr> {
    addr.parse()
        .map_err(|e| Error::Config(format!("Invalid {} server address '{}': {}", server, addr, e)))
}

fn text_response(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
}

async fn health_response(
    req: Request<Incoming>,
    store: &dyn NetworkedStore,
    exporter: &MetricsExporter,
) -> Response<Full<Bytes>> {
    match req.uri().path() {
        "/healthz" | "/livez" => text_response(StatusCode::OK, "ok"),
        "/readyz" => match store.ping().await {
            Ok(()) => {
                exporter.set_store_up(true);
                text_response(StatusCode::OK, "ok")
            }
            Err(e) => {
                exporter.set_store_up(false);
                warn!("Readiness check failed: {}", e);
                text_response(StatusCode::SERVICE_UNAVAILABLE, "store unavailable")
            }
        },
        _ => text_response(StatusCode::NOT_FOUND, "not found"),
    }
}

fn metrics_response(req: Request<Incoming>, exporter: &MetricsExporter) -> Response<Full<Bytes>> {
    if req.uri().path() != "/metrics" {
        return text_response(StatusCode::NOT_FOUND, "not found");
    }

    match exporter.gather_text() {
        Ok(body) => {
            let mut response = text_response(StatusCode::OK, body);
            if let Ok(content_type) = HeaderValue::from_str(&exporter.content_type()) {
                response.headers_mut().insert(CONTENT_TYPE, content_type);
            }
            response
        }
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            text_response(StatusCode::INTERNAL_SERVER_ERROR, "metrics unavailable")
        }
    }
}

async fn run_http_server<F, Fut>(
    addr: SocketAddr,
    name: &'static str,
    shutdown: CancellationToken,
    handler: F,
) -> Result<()>
where
    F: Fn(Request<Incoming>) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Response<Full<Bytes>>> + Send + 'static,
{
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Internal(format!("Failed to bind {} server: {}", name, e)))?;

    info!("{} server listening on {}", name, addr);

    loop {
        let (stream, _) = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted
                .map_err(|e| Error::Internal(format!("{} server accept error: {}", name, e)))?,
        };

        let io = TokioIo::new(stream);
        let handler = handler.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req| {
                let handler = handler.clone();
                async move { Ok::<_, Infallible>(handler(req).await) }
            });
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                error!("{} server connection error: {}", name, e);
            }
        });
    }

    info!("{} server stopped", name);
    Ok(())
}
