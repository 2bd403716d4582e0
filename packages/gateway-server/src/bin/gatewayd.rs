//! Gateway orchestrator entry point (spec §6, external collaborator):
//! flag parsing, backend construction, and process lifecycle.

use std::sync::Arc;

use clap::Parser;
use gateway_core::GatewayParams;
use gateway_server::config::{BrokerConfig, GatewayConfig};
use gateway_server::network::{NetworkConfig, NetworkModule};
use gateway_server::presence::PresenceDirectory;
#[cfg(feature = "redis-backend")]
use gateway_server::presence::RedisPresenceDirectory;
use gateway_server::router::Router as RouterTransport;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Horizontally-scalable WebSocket fan-out gateway.
#[derive(Debug, Parser)]
#[command(name = "gatewayd", version)]
struct Cli {
    /// Unique identifier for this instance within the cluster.
    #[arg(long = "id", env = "GATEWAY_ID")]
    id: String,

    /// Port to listen on.
    #[arg(long = "port", env = "GATEWAY_PORT", default_value_t = 8080)]
    port: u16,

    /// Bind address.
    #[arg(long = "host", env = "GATEWAY_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Redis connection string backing the presence directory.
    #[arg(long = "presence-redis-url", env = "GATEWAY_PRESENCE_REDIS_URL", default_value = "redis://127.0.0.1:6379")]
    presence_redis_url: String,

    /// Router transport backend.
    #[arg(long = "router-backend", env = "GATEWAY_ROUTER_BACKEND", default_value = "redis")]
    router_backend: String,

    /// Broker endpoint(s) for the selected router backend -- a Redis URL
    /// or a Kafka bootstrap-servers list, depending on `--router-backend`.
    #[arg(long = "broker", env = "GATEWAY_BROKER", default_value = "redis://127.0.0.1:6379")]
    broker: String,

    /// Prometheus metrics listener address.
    #[arg(long = "metrics-addr", env = "GATEWAY_METRICS_ADDR", default_value = "0.0.0.0:9090")]
    metrics_addr: String,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .json()
        .init();

    if let Err(err) = run().await {
        error!(%err, "fatal startup failure");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let broker = match cli.router_backend.as_str() {
        "redis" => BrokerConfig::Redis { url: cli.broker.clone() },
        "kafka" => BrokerConfig::Kafka { brokers: cli.broker.clone() },
        other => anyhow::bail!("unknown router backend: {other} (expected \"redis\" or \"kafka\")"),
    };

    let config = GatewayConfig {
        gateway_id: cli.id,
        network: NetworkConfig {
            host: cli.host,
            port: cli.port,
            ..NetworkConfig::default()
        },
        params: GatewayParams::default(),
        broker,
        presence_redis_url: cli.presence_redis_url,
    };

    if let Err(addr_err) = start_metrics_exporter(&cli.metrics_addr) {
        error!(%addr_err, "metrics exporter failed to start, continuing without it");
    }

    let presence = build_presence_directory(&config).await?;
    let router = build_router_transport(&config).await?;

    let mut module = NetworkModule::new(
        config.network.clone(),
        config.gateway_id.clone(),
        config.params,
        presence,
        router,
    );

    let port = module.start().await?;
    info!(gateway_id = %config.gateway_id, port, "gateway listening");

    module.serve(shutdown_signal()).await
}

#[cfg(feature = "redis-backend")]
async fn build_presence_directory(config: &GatewayConfig) -> anyhow::Result<Arc<dyn PresenceDirectory>> {
    let client = redis::Client::open(config.presence_redis_url.as_str())?;
    let directory = RedisPresenceDirectory::connect(client).await.map_err(|e| anyhow::anyhow!(e))?;
    Ok(Arc::new(directory))
}

#[cfg(not(feature = "redis-backend"))]
async fn build_presence_directory(_config: &GatewayConfig) -> anyhow::Result<Arc<dyn PresenceDirectory>> {
    anyhow::bail!("the presence directory requires the \"redis-backend\" feature")
}

async fn build_router_transport(config: &GatewayConfig) -> anyhow::Result<Arc<dyn RouterTransport>> {
    match &config.broker {
        BrokerConfig::Redis { url } => {
            #[cfg(feature = "redis-backend")]
            {
                let client = redis::Client::open(url.as_str())?;
                let router = gateway_server::router::pubsub::PubSubRouter::connect(client, config.gateway_id.clone())
                    .await
                    .map_err(|e| anyhow::anyhow!(e))?;
                return Ok(Arc::new(router));
            }
            #[cfg(not(feature = "redis-backend"))]
            {
                let _ = url;
                anyhow::bail!("redis router backend requested but this binary was built without the \"redis-backend\" feature");
            }
        }
        BrokerConfig::Kafka { brokers } => {
            #[cfg(feature = "kafka-backend")]
            {
                let router = gateway_server::router::kafka::KafkaRouter::new(brokers.clone(), config.gateway_id.clone())
                    .map_err(|e| anyhow::anyhow!(e))?;
                return Ok(Arc::new(router));
            }
            #[cfg(not(feature = "kafka-backend"))]
            {
                let _ = brokers;
                anyhow::bail!("kafka router backend requested but this binary was built without the \"kafka-backend\" feature");
            }
        }
    }
}

fn start_metrics_exporter(addr: &str) -> anyhow::Result<()> {
    let socket_addr: std::net::SocketAddr = addr.parse()?;
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(socket_addr)
        .install()?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
    info!("shutdown signal received");
}
