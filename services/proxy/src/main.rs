//! Proxywall
//!
//! Filtering reverse proxy that sits in front of an origin server. Every
//! inbound request runs through the filter chain; allowed requests are
//! streamed to the origin, refused requests get a terminal response from
//! the chain itself.

use proxywall_common::config::Config;
use proxywall_common::geoip::MaxMindGeo;
use proxywall_common::redis::RedisHandle;
use proxywall_common::telemetry;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

mod dos;
mod firewall;
mod handlers;
mod ingress;
mod proxy;
mod store;

use dos::DosDetector;
use firewall::rules::{CookieCheckpoint, DosFilter, IpFilter, SensitiveUrlFilter, StaticFileFilter};
use firewall::{Filter, FirewallChain};
use ingress::AppState;
use proxy::Forwarder;
use store::{BotRegistry, CountryResolver, RedisTier, SessionStore};

const SERVICE_NAME: &str = "proxywall";
const SESSION_SWEEP_PERIOD: Duration = Duration::from_secs(3600);

/// Application error type for main
#[derive(Debug, thiserror::Error)]
enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Initialization error: {0}")]
    Init(#[from] proxywall_common::error::Error),

    #[error("Address parse error: {0}")]
    AddrParse(#[from] std::net::AddrParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let config = Config::load(SERVICE_NAME)?;
    telemetry::init(SERVICE_NAME, &config.telemetry)?;

    info!(
        service = SERVICE_NAME,
        version = env!("CARGO_PKG_VERSION"),
        environment = %config.environment,
        "Starting service"
    );

    // External store handle; a single pool shared by every cache
    let redis = match &config.redis {
        Some(redis_config) if redis_config.enabled => {
            match proxywall_common::redis::create_pool(redis_config) {
                Ok(pool) => {
                    info!(pool_size = redis_config.effective_pool_size(), "External store pool initialized");
                    let handle = RedisHandle::new(pool, redis_config);
                    handle.spawn_probe();
                    handle
                }
                Err(e) => {
                    // degraded local-only mode, never fatal
                    error!(error = %e, "External store unavailable, running local-only");
                    RedisHandle::disabled()
                }
            }
        }
        _ => {
            info!("External store disabled, running local-only");
            RedisHandle::disabled()
        }
    };

    let geo = MaxMindGeo::from_config(&config.firewall.geoip);
    if !geo.is_available() {
        warn!("No geo database configured, country lookups will always miss");
    }

    let firewall_config = &config.firewall;
    let session_ttl = Duration::from_secs(firewall_config.session.ttl_secs);
    let sessions = Arc::new(SessionStore::new(
        RedisTier::new(Arc::clone(&redis), "sessions"),
        session_ttl,
    ));
    sessions.spawn_sweeper(SESSION_SWEEP_PERIOD);

    let countries = Arc::new(CountryResolver::new(
        RedisTier::new(Arc::clone(&redis), "countries"),
        Arc::new(geo),
        Duration::from_secs(3600),
        Duration::from_secs(86_400),
    ));

    let bots = BotRegistry::new(Arc::clone(&redis), firewall_config.bots.clone());
    bots.spawn_refresher();

    let detector = DosDetector::new(&firewall_config.dos);
    detector.spawn_sweeper();

    let filters: Vec<Box<dyn Filter>> = vec![
        Box::new(StaticFileFilter),
        Box::new(IpFilter::new(
            &firewall_config.ip_filter,
            Arc::clone(&bots),
            Arc::clone(&countries),
        )),
        Box::new(DosFilter::new(Arc::clone(&detector))),
        Box::new(CookieCheckpoint::new(Arc::clone(&sessions))),
    ];
    let bot_filters: Vec<Box<dyn Filter>> = vec![Box::new(SensitiveUrlFilter)];
    let chain = Arc::new(FirewallChain::new(filters, bot_filters));

    let forwarder = Arc::new(Forwarder::new(
        &config.origin,
        Duration::from_secs(config.server.request_timeout_secs),
    ));

    let app_state = AppState {
        chain,
        forwarder,
        cookie_name: firewall_config.session.cookie_name.clone(),
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Data-plane server: every request falls through to the chain
    let data_addr: SocketAddr = config.server.listen.parse()?;
    let data_router = axum::Router::new()
        .fallback(ingress::handle)
        .layer(TraceLayer::new_for_http())
        // a panicking request is answered with the auto-refresh page so the
        // client retries instead of seeing a blank 500
        .layer(CatchPanicLayer::custom(|_: Box<dyn std::any::Any + Send>| {
            firewall::responses::refresh_page()
        }))
        .with_state(app_state);
    let data_shutdown_rx = shutdown_rx.clone();

    let data_handle = tokio::spawn(async move {
        info!(addr = %data_addr, "Starting data-plane server");

        let listener = match tokio::net::TcpListener::bind(data_addr).await {
            Ok(l) => l,
            Err(e) => {
                error!(error = %e, addr = %data_addr, "Failed to bind data-plane server");
                return Err(e);
            }
        };

        let shutdown = async move {
            let mut rx = data_shutdown_rx;
            while !*rx.borrow() {
                if rx.changed().await.is_err() {
                    break;
                }
            }
        };

        axum::serve(
            listener,
            data_router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| {
            error!(error = %e, "Data-plane server error");
            e
        })?;

        info!("Data-plane server shut down gracefully");
        Ok(())
    });

    // Admin server: health checks and metrics
    let admin_addr: SocketAddr = config.server.admin_listen.parse()?;
    let admin_router = handlers::admin_router(handlers::AdminState {
        redis: Arc::clone(&redis),
        bots: Arc::clone(&bots),
    });
    let admin_shutdown_rx = shutdown_rx.clone();

    let admin_handle = tokio::spawn(async move {
        info!(addr = %admin_addr, "Starting admin server");

        let listener = match tokio::net::TcpListener::bind(admin_addr).await {
            Ok(l) => l,
            Err(e) => {
                error!(error = %e, addr = %admin_addr, "Failed to bind admin server");
                return Err(e);
            }
        };

        let shutdown = async move {
            let mut rx = admin_shutdown_rx;
            while !*rx.borrow() {
                if rx.changed().await.is_err() {
                    break;
                }
            }
        };

        axum::serve(listener, admin_router)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| {
                error!(error = %e, "Admin server error");
                e
            })?;

        info!("Admin server shut down gracefully");
        Ok(())
    });

    shutdown_signal().await;
    info!("Shutdown signal received, initiating graceful shutdown...");

    if let Err(e) = shutdown_tx.send(true) {
        warn!(error = %e, "Failed to send shutdown signal");
    }

    let shutdown_timeout = Duration::from_secs(30);

    tokio::select! {
        result = data_handle => {
            match result {
                Ok(Ok(())) => info!("Data-plane server shutdown complete"),
                Ok(Err(e)) => error!(error = %e, "Data-plane server encountered error during shutdown"),
                Err(e) => error!(error = %e, "Data-plane server task panicked"),
            }
        }
        _ = tokio::time::sleep(shutdown_timeout) => {
            warn!("Data-plane server shutdown timed out");
        }
    }

    tokio::select! {
        result = admin_handle => {
            match result {
                Ok(Ok(())) => info!("Admin server shutdown complete"),
                Ok(Err(e)) => error!(error = %e, "Admin server encountered error during shutdown"),
                Err(e) => error!(error = %e, "Admin server task panicked"),
            }
        }
        _ = tokio::time::sleep(shutdown_timeout) => {
            warn!("Admin server shutdown timed out");
        }
    }

    info!("Shutdown complete");
    Ok(())
}

/// Wait for shutdown signals (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C signal"),
            Err(e) => error!(error = %e, "Failed to listen for Ctrl+C signal"),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
                info!("Received SIGTERM signal");
            }
            Err(e) => error!(error = %e, "Failed to listen for SIGTERM signal"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
