//! Gateway orchestrator (spec §4.5, C5) with deferred startup lifecycle.
//!
//! Implements the deferred startup pattern: `new()` creates resources,
//! `start()` binds the TCP listener, and `serve()` starts accepting
//! connections, starts the router consumer, and runs the health-sweep
//! background task until shutdown.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use axum::routing::get;
use axum::Router;
use gateway_core::GatewayParams;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

use super::config::NetworkConfig;
use super::connection::ConnectionRegistry;
use super::handlers::{
    health_detail_handler, health_handler, liveness_handler, readiness_handler, stats_handler,
    ws_upgrade_handler, AppState, LocalDeliverer,
};
use super::middleware::build_http_layers;
use super::shutdown::ShutdownController;
use crate::presence::PresenceDirectory;
use crate::router::Router as RouterTransport;

/// Manages the full HTTP/WebSocket server lifecycle.
///
/// Follows the deferred startup pattern:
/// 1. `new()` -- allocates shared state (registry, shutdown controller)
/// 2. `start()` -- binds TCP listener to the configured address
/// 3. `serve()` -- starts C3's consumer, the health sweep, and begins
///    accepting connections until shutdown is signalled
pub struct NetworkModule {
    config: NetworkConfig,
    listener: Option<TcpListener>,
    registry: Arc<ConnectionRegistry>,
    shutdown: Arc<ShutdownController>,
    presence: Arc<dyn PresenceDirectory>,
    router: Arc<dyn RouterTransport>,
    gateway_id: Arc<str>,
    params: GatewayParams,
}

impl NetworkModule {
    #[must_use]
    pub fn new(
        config: NetworkConfig,
        gateway_id: impl Into<Arc<str>>,
        params: GatewayParams,
        presence: Arc<dyn PresenceDirectory>,
        router: Arc<dyn RouterTransport>,
    ) -> Self {
        Self {
            config,
            listener: None,
            registry: Arc::new(ConnectionRegistry::new()),
            shutdown: Arc::new(ShutdownController::new()),
            presence,
            router,
            gateway_id: gateway_id.into(),
            params,
        }
    }

    #[must_use]
    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        Arc::clone(&self.registry)
    }

    #[must_use]
    pub fn shutdown_controller(&self) -> Arc<ShutdownController> {
        Arc::clone(&self.shutdown)
    }

    fn state(&self) -> AppState {
        AppState {
            gateway_id: Arc::clone(&self.gateway_id),
            registry: Arc::clone(&self.registry),
            presence: Arc::clone(&self.presence),
            router: Arc::clone(&self.router),
            params: self.params,
            shutdown: Arc::clone(&self.shutdown),
            config: Arc::new(self.config.clone()),
            start_time: Instant::now(),
        }
    }

    /// Assembles the axum router with all routes and middleware (spec
    /// §4.5 "minimal HTTP surface"):
    /// - `GET /ws` -- WebSocket upgrade
    /// - `GET /health`, `/health/detail`, `/health/live`, `/health/ready`
    /// - `GET /stats`
    #[must_use]
    pub fn build_router(&self) -> Router {
        let state = self.state();
        let layers = build_http_layers(&self.config);

        Router::new()
            .route("/health", get(health_handler))
            .route("/health/detail", get(health_detail_handler))
            .route("/health/live", get(liveness_handler))
            .route("/health/ready", get(readiness_handler))
            .route("/stats", get(stats_handler))
            .route("/ws", get(ws_upgrade_handler))
            .layer(layers)
            .with_state(state)
    }

    /// Binds the TCP listener to the configured host and port.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound (e.g., port in use).
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        let port = listener.local_addr()?.port();

        info!(%addr, port, "TCP listener bound");

        self.listener = Some(listener);
        Ok(port)
    }

    /// Starts the router consumer and health sweep, then serves connections
    /// until the shutdown signal fires.
    ///
    /// # Errors
    ///
    /// Returns an error if `Router::start` fails or the server encounters a
    /// fatal I/O error.
    ///
    /// # Panics
    ///
    /// Panics if `start()` was not called before `serve()`.
    pub async fn serve(self, shutdown: impl Future<Output = ()> + Send + 'static) -> anyhow::Result<()> {
        let registry = Arc::clone(&self.registry);
        let presence = Arc::clone(&self.presence);
        let router_transport = Arc::clone(&self.router);
        let shutdown_ctrl = Arc::clone(&self.shutdown);
        let drain_deadline = self.config.drain_deadline;
        let sweep_interval = self.params.health_sweep_interval;
        let stale_after = self.params.heartbeat_timeout;
        let axum_router = self.build_router();
        let listener = self.listener.expect("start() must be called before serve()");

        router_transport
            .start(Arc::new(LocalDeliverer { registry: Arc::clone(&registry) }))
            .await
            .map_err(|e| anyhow::anyhow!("router failed to start: {e}"))?;

        let (sweep_stop_tx, sweep_stop_rx) = watch::channel(false);
        let sweep_task = tokio::spawn(health_sweep(Arc::clone(&registry), sweep_interval, stale_after, sweep_stop_rx));

        shutdown_ctrl.set_ready();

        let serve_result = if let Some(ref tls_config) = self.config.tls {
            serve_tls(listener, axum_router, tls_config, shutdown).await
        } else {
            serve_plain(listener, axum_router, shutdown).await
        };

        let _ = sweep_stop_tx.send(true);
        let _ = sweep_task.await;
        router_transport.stop().await;
        drain_connections(registry, presence, shutdown_ctrl, drain_deadline).await;

        serve_result
    }
}

/// Background stale-connection sweep (spec §4.5): calls
/// `ConnectionRegistry::sweep_stale` once per `sweep_interval` until told
/// to stop.
async fn health_sweep(
    registry: Arc<ConnectionRegistry>,
    sweep_interval: std::time::Duration,
    stale_after: std::time::Duration,
    mut stop: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(sweep_interval);
    loop {
        tokio::select! {
            _ = stop.changed() => break,
            _ = ticker.tick() => {
                let removed = registry.sweep_stale(stale_after);
                if removed > 0 {
                    info!(removed, "health sweep closed stale connections");
                }
            }
        }
    }
}

async fn serve_plain(
    listener: TcpListener,
    router: Router,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    info!("serving plain HTTP/WS connections");
    axum::serve(listener, router).with_graceful_shutdown(shutdown).await?;
    Ok(())
}

async fn serve_tls(
    listener: TcpListener,
    router: Router,
    tls_config: &super::config::TlsConfig,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    use axum_server::tls_rustls::RustlsConfig;

    let rustls_config = RustlsConfig::from_pem_file(&tls_config.cert_path, &tls_config.key_path)
        .await
        .map_err(|e| anyhow::anyhow!("failed to load TLS certificates: {e}"))?;

    let addr = listener.local_addr()?;
    let std_listener = listener.into_std()?;
    let handle = axum_server::Handle::new();
    let shutdown_handle = handle.clone();

    tokio::spawn(async move {
        shutdown.await;
        shutdown_handle.graceful_shutdown(None);
    });

    info!(%addr, "serving TLS connections");
    axum_server::from_tcp_rustls(std_listener, rustls_config)
        .handle(handle)
        .serve(router.into_make_service())
        .await?;

    Ok(())
}

/// Closes every surviving socket and, as an enhancement over the reference
/// behaviour (spec §9 Open Questions), proactively clears that
/// connection's presence entry instead of relying solely on TTL expiry.
async fn drain_connections(
    registry: Arc<ConnectionRegistry>,
    presence: Arc<dyn PresenceDirectory>,
    shutdown_ctrl: Arc<ShutdownController>,
    drain_deadline: std::time::Duration,
) {
    shutdown_ctrl.trigger_shutdown();

    let handles = registry.drain_all();
    let count = handles.len();
    if count > 0 {
        info!(count, "draining connections");
    }
    for conn in &handles {
        conn.close();
        let user_id = conn.user_id();
        if !user_id.is_empty() {
            if let Err(err) = presence.remove(&user_id, drain_deadline).await {
                warn!(%err, %user_id, "presence cleanup failed during shutdown");
            }
        }
    }

    let drained = shutdown_ctrl.wait_for_drain(drain_deadline).await;
    if drained {
        info!("all connections drained successfully");
    } else {
        warn!("drain timeout expired with in-flight requests remaining");
    }
}
