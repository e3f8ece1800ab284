//! auxcache node
//!
//! Hosts named caches with a write-behind disk tier, serves the remote cache
//! protocol over HTTP and announces itself to peers.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          auxcache node                          │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  POST /remote ──▶ RequestDispatcher ──▶ CacheHub ──▶ DiskCache  │
//! │  UDP discovery ◀─▶ Broadcaster / Receiver ──▶ PeerRegistry      │
//! │  GET /metrics, /healthz                                         │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use http_body_util::{BodyExt, Collected, Full, LengthLimitError, Limited};
use hyper::body::{Body, Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

use auxcache::cache::CacheHub;
use auxcache::config::{
    DiscoveryConfig, DiskCacheConfig, RemoteListenerConfig, DEFAULT_DISCOVERY_ADDRESS,
    DEFAULT_DISCOVERY_PORT,
};
use auxcache::discovery::{
    bind_discovery_socket, DiscoveryBroadcaster, DiscoveryReceiver, PeerRegistry, UdpChannelFactory,
};
use auxcache::disk::{DiskBackend, InMemoryDiskBackend};
use auxcache::monitoring::CacheMetrics;
use auxcache::remote::{
    HubCacheService, RemoteCacheListener, RemoteUpdateListener, RequestDispatcher,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// auxcache node - disk tier, remote propagation and peer discovery
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Host advertised to peers
    #[arg(long, env = "SERVICE_HOST", default_value = "127.0.0.1")]
    service_host: String,

    /// Port of the remote cache endpoint
    #[arg(long, env = "SERVICE_PORT", default_value = "1110")]
    service_port: u16,

    /// Discovery multicast group
    #[arg(long, env = "DISCOVERY_ADDRESS", default_value = DEFAULT_DISCOVERY_ADDRESS)]
    discovery_address: String,

    /// Discovery UDP port
    #[arg(long, env = "DISCOVERY_PORT", default_value_t = DEFAULT_DISCOVERY_PORT)]
    discovery_port: u16,

    /// Seconds between passive broadcasts
    #[arg(long, env = "BROADCAST_INTERVAL_SECONDS", default_value = "15")]
    broadcast_interval_seconds: u64,

    /// Seconds before a silent peer is evicted (four broadcast intervals when unset)
    #[arg(long, env = "PEER_MAX_AGE_SECONDS")]
    peer_max_age_seconds: Option<u64>,

    /// Caches to create at startup
    #[arg(long, env = "CACHES", value_delimiter = ',', default_value = "default")]
    caches: Vec<String>,

    /// Purgatory capacity per disk cache (unbounded when unset)
    #[arg(long, env = "MAX_PURGATORY_SIZE")]
    max_purgatory_size: Option<usize>,

    /// Invalidate instead of importing remote puts
    #[arg(long, env = "REMOVE_UPON_REMOTE_PUT")]
    remove_upon_remote_put: bool,

    /// Listener id assigned by the remote coordinator (0 = unregistered)
    #[arg(long, env = "LISTENER_ID", default_value = "0")]
    listener_id: u64,

    /// Metrics and health server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

/// Shared by the HTTP handlers
struct NodeState {
    hub: Arc<CacheHub>,
    dispatcher: RequestDispatcher,
    metrics: CacheMetrics,
    peers: Arc<PeerRegistry>,
    broadcaster: Arc<DiscoveryBroadcaster>,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(&args);

    info!("Starting auxcache node");
    info!("  Service endpoint: {}:{}", args.service_host, args.service_port);
    info!("  Discovery: {}:{}", args.discovery_address, args.discovery_port);
    info!("  Caches: {:?}", args.caches);
    info!("  Max purgatory size: {:?}", args.max_purgatory_size);

    let broadcast_interval = Duration::from_secs(args.broadcast_interval_seconds);
    let discovery_config = DiscoveryConfig {
        discovery_address: args.discovery_address.clone(),
        discovery_port: args.discovery_port,
        service_host: args.service_host.clone(),
        service_port: args.service_port,
        peer_max_age: args
            .peer_max_age_seconds
            .map(Duration::from_secs)
            .unwrap_or_else(|| DiscoveryConfig::peer_max_age_for(broadcast_interval)),
        ..DiscoveryConfig::with_broadcast_interval(broadcast_interval)
    };
    discovery_config
        .validate()
        .context("invalid discovery configuration")?;

    // Caches
    let disk_template = DiskCacheConfig {
        max_purgatory_size: args.max_purgatory_size,
        ..Default::default()
    };
    disk_template
        .validate()
        .context("invalid disk cache configuration")?;
    let hub = Arc::new(CacheHub::with_disk(
        disk_template,
        Arc::new(|_: &str| Arc::new(InMemoryDiskBackend::new()) as Arc<dyn DiskBackend>),
    ));
    for cache_name in &args.caches {
        hub.get_cache(cache_name)
            .with_context(|| format!("failed to create cache {cache_name}"))?;
    }

    // Remote propagation
    let listener = Arc::new(RemoteUpdateListener::new(
        RemoteListenerConfig {
            remove_upon_remote_put: args.remove_upon_remote_put,
            ..Default::default()
        },
        hub.clone(),
    ));
    if args.listener_id != 0 {
        listener.set_listener_id(args.listener_id);
    }
    let dispatcher = RequestDispatcher::new(Arc::new(HubCacheService::new(hub.clone(), listener)));

    // Discovery
    let shutdown = CancellationToken::new();
    let channels = Arc::new(UdpChannelFactory::new(
        discovery_config.discovery_address.clone(),
        discovery_config.discovery_port,
    ));
    let broadcaster = Arc::new(
        DiscoveryBroadcaster::start(discovery_config.clone(), Uuid::new_v4(), hub.hosted(), channels).await,
    );
    let peers = Arc::new(PeerRegistry::new());

    {
        let broadcaster = broadcaster.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { broadcaster.run(shutdown).await });
    }

    match bind_discovery_socket(&discovery_config.discovery_address, discovery_config.discovery_port).await {
        Ok(socket) => {
            let receiver = DiscoveryReceiver::new(peers.clone(), broadcaster.clone());
            let shutdown = shutdown.clone();
            tokio::spawn(async move { receiver.run(socket, shutdown).await });
        }
        Err(e) => warn!("Discovery receiver disabled: {}", e),
    }

    spawn_peer_eviction(peers.clone(), discovery_config.peer_max_age, shutdown.clone());

    let state = Arc::new(NodeState {
        hub: hub.clone(),
        dispatcher,
        metrics: CacheMetrics::new().context("failed to register metrics")?,
        peers,
        broadcaster,
    });

    // Remote cache endpoint
    let service_addr: SocketAddr = format!("0.0.0.0:{}", args.service_port)
        .parse()
        .context("invalid service port")?;
    {
        let state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = serve(service_addr, state, Endpoint::Remote).await {
                error!("Remote endpoint error: {:#}", e);
            }
        });
    }

    // Metrics and health
    let metrics_addr: SocketAddr = args
        .metrics_addr
        .parse()
        .context("invalid metrics server address")?;
    {
        let state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = serve(metrics_addr, state, Endpoint::Metrics).await {
                error!("Metrics server error: {:#}", e);
            }
        });
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Shutdown requested");

    shutdown.cancel();
    hub.shutdown().await;

    info!("Node shutdown complete");
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
    for directive in ["hyper=warn", "hyper_util=warn"] {
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
// Background Tasks
// =============================================================================

fn spawn_peer_eviction(peers: Arc<PeerRegistry>, max_age: Duration, shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(max_age);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let evicted = peers.evict_stale(max_age);
                    if evicted > 0 {
                        info!("Evicted {} stale peers", evicted);
                    }
                }
            }
        }
    });
}

// =============================================================================
// HTTP Server
// =============================================================================

/// Largest accepted `POST /remote` body
const MAX_REQUEST_BODY: usize = 16 * 1024 * 1024;

/// Which routes a listener exposes besides the health probes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Endpoint {
    /// `POST /remote`
    Remote,
    /// `GET /metrics`
    Metrics,
}

async fn serve(addr: SocketAddr, state: Arc<NodeState>, endpoint: Endpoint) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    info!("HTTP server listening on {} ({:?})", addr, endpoint);

    loop {
        let (stream, _) = listener.accept().await.context("accept error")?;
        let io = TokioIo::new(stream);
        let state = state.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req: Request<Incoming>| handle(req, state.clone(), endpoint));
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                error!("HTTP connection error: {}", e);
            }
        });
    }
}

async fn handle<B>(
    req: Request<B>,
    state: Arc<NodeState>,
    endpoint: Endpoint,
) -> std::result::Result<Response<Full<Bytes>>, Infallible>
where
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let response = match (endpoint, &method, path.as_str()) {
        (_, _, "/healthz") | (_, _, "/livez") | (_, _, "/readyz") => text(StatusCode::OK, "ok"),
        (Endpoint::Metrics, &Method::GET, "/metrics") => {
            state.metrics.refresh_caches(&state.hub);
            state
                .metrics
                .refresh_discovery(&state.peers, &state.broadcaster);
            match state.metrics.encode() {
                Ok((content_type, body)) => response(StatusCode::OK, &content_type, body),
                Err(e) => text(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
            }
        }
        (Endpoint::Remote, &Method::POST, "/remote") => {
            let body = Limited::new(req.into_body(), MAX_REQUEST_BODY);
            remote(body.collect().await, &state).await
        }
        _ => text(StatusCode::NOT_FOUND, "not found"),
    };
    Ok(response)
}

async fn remote(
    body: std::result::Result<Collected<Bytes>, Box<dyn std::error::Error + Send + Sync>>,
    state: &NodeState,
) -> Response<Full<Bytes>> {
    match body {
        Ok(body) => {
            let reply = state.dispatcher.process_json(&body.to_bytes()).await;
            match serde_json::to_vec(&reply) {
                Ok(json) => response(StatusCode::OK, "application/json", json),
                Err(e) => text(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
            }
        }
        Err(e) if e.is::<LengthLimitError>() => {
            text(StatusCode::PAYLOAD_TOO_LARGE, "request body too large")
        }
        Err(e) => text(StatusCode::BAD_REQUEST, &e.to_string()),
    }
}

fn text(status: StatusCode, body: &str) -> Response<Full<Bytes>> {
    response(status, "text/plain", body.as_bytes().to_vec())
}

fn response(status: StatusCode, content_type: &str, body: Vec<u8>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    if let Ok(value) = content_type.parse() {
        response
            .headers_mut()
            .insert(hyper::header::CONTENT_TYPE, value);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use auxcache::cache::CacheElement;
    use auxcache::remote::{RemoteCacheRequest, RemoteCacheResponse};

    fn node_state() -> Arc<NodeState> {
        let hub = Arc::new(CacheHub::new());
        let listener = Arc::new(RemoteUpdateListener::new(
            RemoteListenerConfig::default(),
            hub.clone(),
        ));
        let dispatcher = RequestDispatcher::new(Arc::new(HubCacheService::new(hub.clone(), listener)));
        let broadcaster = Arc::new(DiscoveryBroadcaster::new(
            DiscoveryConfig::default(),
            Uuid::new_v4(),
            hub.hosted(),
            Arc::new(UdpChannelFactory::new("127.0.0.1", 9)),
        ));
        Arc::new(NodeState {
            hub,
            dispatcher,
            metrics: CacheMetrics::new().unwrap(),
            peers: Arc::new(PeerRegistry::new()),
            broadcaster,
        })
    }

    fn post_remote(body: Vec<u8>) -> Request<Full<Bytes>> {
        Request::builder()
            .method(Method::POST)
            .uri("/remote")
            .body(Full::new(Bytes::from(body)))
            .unwrap()
    }

    #[tokio::test]
    async fn test_remote_endpoint_applies_update() {
        let state = node_state();
        let request = RemoteCacheRequest::update(CacheElement::new("users", "A", "v1")).with_requester(7);
        let body = serde_json::to_vec(&request).unwrap();

        let response = handle(post_remote(body), state.clone(), Endpoint::Remote)
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let reply: RemoteCacheResponse = serde_json::from_slice(&bytes).unwrap();
        assert!(reply.success);
        assert!(state.hub.existing("users").is_some());
    }

    #[tokio::test]
    async fn test_metrics_endpoint_does_not_serve_remote() {
        let state = node_state();
        let body = serde_json::to_vec(&RemoteCacheRequest::remove_all("users")).unwrap();

        let response = handle(post_remote(body), state, Endpoint::Metrics)
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_remote_endpoint_does_not_serve_metrics() {
        let request = Request::builder()
            .uri("/metrics")
            .body(Full::new(Bytes::new()))
            .unwrap();
        let response = handle(request, node_state(), Endpoint::Remote).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_oversized_remote_body_rejected() {
        let response = handle(
            post_remote(vec![b' '; MAX_REQUEST_BODY + 1]),
            node_state(),
            Endpoint::Remote,
        )
        .await
        .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_health_on_both_endpoints() {
        for endpoint in [Endpoint::Remote, Endpoint::Metrics] {
            let request = Request::builder()
                .uri("/healthz")
                .body(Full::new(Bytes::new()))
                .unwrap();
            let response = handle(request, node_state(), endpoint).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
    }
}
