//! PulseCache Daemon
//!
//! Hosts the cache core with in-memory backends, runs the periodic monitor,
//! purge and warmer jobs, and serves operational endpoints.
//!
//! # Endpoints
//!
//! ```text
//! health server   /healthz /livez        liveness
//!                 /readyz                readiness + threshold evaluation (JSON)
//! metrics server  /metrics               Prometheus text format
//!                 /stats                 current StatsSnapshot (JSON)
//!                 /notices               pending admin notices (JSON)
//!                 GET  /ratelimit        consume one request of quota (429 when denied)
//!                 POST /login/{id}       record activity and warm the identity
//! ```
//!
//! `/ratelimit` keys callers by the `X-User-Id` header when present, otherwise
//! by the hashed client address (first `X-Forwarded-For` entry, else peer).

use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::header::{HeaderName, HeaderValue};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use once_cell::sync::OnceCell;
use tokio::net::TcpListener;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use pulsecache::adapters::{
    AdminNoticeChannel, FileStatsStore, MemoryStatsStore, MemoryStore, MemoryTierDirectory,
    MemoryWarmSource, SystemClock,
};
use pulsecache::domain::{Clock, StatsStore};
use pulsecache::monitor::{HealthCheck, StatsExporter};
use pulsecache::rate_limit::RateLimitDecision;
use pulsecache::{
    CacheMonitor, CacheService, CacheWarmer, ClientInfo, Identity, PulseConfig, RateLimiter,
    Scheduler,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// PulseCache - cache, rate limiting and monitoring core
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML configuration file (defaults apply when omitted)
    #[arg(long, env = "PULSE_CONFIG")]
    config: Option<PathBuf>,

    /// Persist stats snapshots to this JSON file instead of memory
    #[arg(long, env = "PULSE_STATS_FILE")]
    stats_file: Option<PathBuf>,

    /// JSON seed of identities, activity and authoritative values to warm
    #[arg(long, env = "PULSE_WARM_SEED")]
    warm_seed: Option<PathBuf>,

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
// Shared State
// =============================================================================

struct AppState {
    monitor: Arc<CacheMonitor>,
    limiter: Arc<RateLimiter>,
    warmer: Arc<CacheWarmer>,
    warm_source: Arc<MemoryWarmSource>,
    clock: Arc<dyn Clock>,
    health: HealthCheck,
    exporter: StatsExporter,
    notices: Arc<AdminNoticeChannel>,
}

#[derive(Debug, Clone, Copy)]
enum Server {
    Health,
    Metrics,
}

static APP: OnceCell<AppState> = OnceCell::new();

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args);

    info!("Starting PulseCache");

    let config = match &args.config {
        Some(path) => PulseConfig::from_yaml_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => PulseConfig::default(),
    };
    config.validate().context("invalid configuration")?;

    info!("  Default TTL: {}s", config.cache.default_ttl_secs);
    info!("  Cache failure policy: {:?}", config.cache.failure_policy);
    info!(
        "  Rate-limit tiers: {}",
        config
            .rate_limit
            .tiers
            .iter()
            .map(|t| format!("{}={}/{}s", t.name, t.request_limit, t.window_secs))
            .collect::<Vec<_>>()
            .join(", ")
    );
    info!("  Sampling rate: {}", config.monitor.sampling_rate);
    info!("  Warm groups: {:?}", config.warmer.warm_groups);

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    // Cache tiers
    let fast_store = Arc::new(MemoryStore::with_clock("fast", clock.clone()));
    let durable_store = Arc::new(MemoryStore::with_clock("durable", clock.clone()));
    let cache = Arc::new(CacheService::new(
        config.cache.clone(),
        fast_store.clone(),
        durable_store.clone(),
    ));

    // Monitor and alert delivery
    let notices = Arc::new(AdminNoticeChannel::default());
    let channels = config
        .monitor
        .channels
        .build(&notices)
        .context("building alert channels")?;
    let stats_store: Arc<dyn StatsStore> = match &args.stats_file {
        Some(path) => {
            info!("  Stats file: {}", path.display());
            Arc::new(FileStatsStore::new(path, config.monitor.max_snapshots))
        }
        None => Arc::new(MemoryStatsStore::new(config.monitor.max_snapshots)),
    };
    let (monitor, dispatcher) =
        CacheMonitor::new(config.monitor.clone(), clock.clone(), stats_store, channels)?;
    let monitor = Arc::new(monitor);
    cache.subscribe(monitor.clone());

    // Rate limiter
    let counters = Arc::new(MemoryStore::with_clock("counters", clock.clone()));
    let limiter = Arc::new(RateLimiter::new(
        config.rate_limit.clone(),
        counters.clone(),
        Arc::new(MemoryTierDirectory::new()),
        clock.clone(),
    )?);

    // Warmer
    let warm_source = Arc::new(match &args.warm_seed {
        Some(path) => MemoryWarmSource::from_seed_file(path, clock.now())
            .with_context(|| format!("loading warm seed {}", path.display()))?,
        None => MemoryWarmSource::new(),
    });
    let warmer = Arc::new(CacheWarmer::new(
        config.warmer.clone(),
        cache.clone(),
        warm_source.clone(),
        clock.clone(),
    ));

    // Background jobs
    let scheduler = Scheduler::new();
    let dispatcher_handle = tokio::spawn(dispatcher.run(scheduler.cancellation_token()));

    let stats_monitor = monitor.clone();
    scheduler.schedule("log_stats", config.scheduler.stats_interval(), move || {
        let monitor = stats_monitor.clone();
        async move { monitor.log_stats().await.map(|_| ()) }
    })?;

    let cleanup_monitor = monitor.clone();
    scheduler.schedule(
        "cleanup_old_stats",
        config.scheduler.cleanup_interval(),
        move || {
            let monitor = cleanup_monitor.clone();
            async move { monitor.cleanup_old_stats().await.map(|_| ()) }
        },
    )?;

    let purge_stores = [fast_store.clone(), durable_store.clone(), counters.clone()];
    scheduler.schedule("purge_expired", config.scheduler.purge_interval(), move || {
        let stores = purge_stores.clone();
        async move {
            for store in stores.iter() {
                store.purge_expired();
            }
            Ok(())
        }
    })?;

    if config.warmer.enabled {
        let job_warmer = warmer.clone();
        scheduler.schedule(
            "warm_priority_identities",
            config.warmer.interval(),
            move || {
                let warmer = job_warmer.clone();
                async move {
                    warmer.warm_priority_identities().await;
                    Ok(())
                }
            },
        )?;
    }

    info!("Scheduled jobs: {:?}", scheduler.job_names());

    // Operational endpoints
    let state = AppState {
        monitor: monitor.clone(),
        limiter,
        warmer: warmer.clone(),
        warm_source,
        clock: clock.clone(),
        health: HealthCheck::new(
            config.monitor.thresholds.clone(),
            config.monitor.min_samples,
        ),
        exporter: StatsExporter::new("pulse")?,
        notices,
    };
    if APP.set(state).is_err() {
        anyhow::bail!("application state initialized twice");
    }

    let health_addr = args.health_addr.clone();
    tokio::spawn(async move {
        if let Err(e) = run_http_server(Server::Health, &health_addr).await {
            error!("Health server error: {}", e);
        }
    });

    let metrics_addr = args.metrics_addr.clone();
    tokio::spawn(async move {
        if let Err(e) = run_http_server(Server::Metrics, &metrics_addr).await {
            error!("Metrics server error: {}", e);
        }
    });

    if let Some(app) = APP.get() {
        app.health.set_ready(true);
    }
    info!("PulseCache ready");

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("Shutdown signal received");

    if let Some(app) = APP.get() {
        app.health.set_ready(false);
    }
    scheduler.shutdown().await;
    if let Err(e) = dispatcher_handle.await {
        warn!("Alert dispatcher ended abnormally: {}", e);
    }

    // Record a final snapshot so the last interval is not lost
    if let Err(e) = monitor.log_stats().await {
        warn!("Failed to record final stats: {}", e);
    }

    info!("PulseCache shutdown complete");
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

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "reqwest=warn", "tower=warn"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

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
// HTTP Servers
// =============================================================================

fn respond(
    status: StatusCode,
    content_type: &str,
    body: impl Into<Bytes>,
) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    if let Ok(value) = content_type.parse() {
        response
            .headers_mut()
            .insert(hyper::header::CONTENT_TYPE, value);
    }
    response
}

fn respond_json<T: serde::Serialize>(status: StatusCode, value: &T) -> Response<Full<Bytes>> {
    match serde_json::to_vec(value) {
        Ok(body) => respond(status, "application/json", body),
        Err(e) => respond(
            StatusCode::INTERNAL_SERVER_ERROR,
            "text/plain",
            format!("serialization failed: {}", e),
        ),
    }
}

fn not_found() -> Response<Full<Bytes>> {
    respond(StatusCode::NOT_FOUND, "text/plain", "not found")
}

fn health_handler(app: &AppState, req: &Request<Incoming>) -> Response<Full<Bytes>> {
    match req.uri().path() {
        "/healthz" | "/livez" => respond(StatusCode::OK, "text/plain", "ok"),
        "/readyz" => {
            let evaluation = app.health.evaluate(&app.monitor.get_current_stats());
            let status = if app.health.is_ready() && evaluation.status.is_operational() {
                StatusCode::OK
            } else {
                StatusCode::SERVICE_UNAVAILABLE
            };
            respond_json(status, &evaluation)
        }
        _ => not_found(),
    }
}

async fn metrics_handler(
    app: &AppState,
    req: &Request<Incoming>,
    peer: SocketAddr,
) -> Response<Full<Bytes>> {
    let path = req.uri().path();

    match (req.method(), path) {
        (&Method::GET, "/metrics") => {
            app.exporter.update(&app.monitor.get_current_stats());
            app.exporter.update_alerts(app.monitor.alert_manager());
            match app.exporter.encode() {
                Ok(text) => respond(StatusCode::OK, app.exporter.content_type(), text),
                Err(e) => respond(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "text/plain",
                    e.to_string(),
                ),
            }
        }
        (&Method::GET, "/stats") => respond_json(StatusCode::OK, &app.monitor.get_current_stats()),
        (&Method::GET, "/notices") => respond_json(StatusCode::OK, &app.notices.notices()),
        (&Method::GET, "/ratelimit") => {
            let identity = Identity::from_client(&client_info(req, peer));
            let decision = app.limiter.check(&identity).await;
            rate_limited(decision, app.clock.unix_secs())
        }
        (&Method::POST, _) if path.starts_with("/login/") => {
            let identity = &path["/login/".len()..];
            if identity.is_empty() {
                return not_found();
            }
            app.warm_source.record_activity(identity, app.clock.now());
            match app.warmer.on_login(identity).await {
                Some(report) => respond_json(StatusCode::OK, &report),
                None => respond(StatusCode::ACCEPTED, "text/plain", "login warming disabled"),
            }
        }
        _ => not_found(),
    }
}

fn client_info(req: &Request<Incoming>, peer: SocketAddr) -> ClientInfo {
    let header = |name: &str| {
        req.headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    let client = match header("x-user-id") {
        Some(user_id) => ClientInfo::user(user_id),
        None => ClientInfo::anonymous(peer.ip()),
    };
    match header("x-forwarded-for") {
        Some(forwarded) => client.with_forwarded_for(forwarded),
        None => client,
    }
}

fn rate_limited(decision: RateLimitDecision, now: i64) -> Response<Full<Bytes>> {
    let status = if decision.allowed {
        StatusCode::OK
    } else {
        StatusCode::TOO_MANY_REQUESTS
    };
    let mut response = respond_json(status, &decision);

    let mut headers = decision.headers.to_header_map();
    if !decision.allowed {
        headers.insert(
            "Retry-After".to_string(),
            decision.headers.retry_after_secs(now).to_string(),
        );
    }
    for (name, value) in headers {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(&value),
        ) {
            response.headers_mut().insert(name, value);
        }
    }
    response
}

async fn route(server: Server, req: Request<Incoming>, peer: SocketAddr) -> Response<Full<Bytes>> {
    let Some(app) = APP.get() else {
        return respond(StatusCode::SERVICE_UNAVAILABLE, "text/plain", "starting");
    };
    match server {
        Server::Health => health_handler(app, &req),
        Server::Metrics => metrics_handler(app, &req, peer).await,
    }
}

async fn run_http_server(server: Server, addr: &str) -> anyhow::Result<()> {
    let name = match server {
        Server::Health => "health",
        Server::Metrics => "metrics",
    };
    let addr: SocketAddr = addr
        .parse()
        .with_context(|| format!("invalid {} server address {}", name, addr))?;

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {} server", name))?;

    info!("{} server listening on {}", name, addr);

    loop {
        let (stream, peer) = listener
            .accept()
            .await
            .with_context(|| format!("{} server accept error", name))?;

        let io = TokioIo::new(stream);

        tokio::spawn(async move {
            let service = service_fn(move |req: Request<Incoming>| async move {
                Ok::<_, Infallible>(route(server, req, peer).await)
            });
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                error!("{} server connection error: {}", name, e);
            }
        });
    }
}
