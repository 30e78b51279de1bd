//! `SiteLens` server binary.
//!
//! Connects to the broker (or starts an in-process stub worker with
//! `--broker memory`), starts the classification service and serves the
//! HTTP API until Ctrl-C.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use sitelens_core::{ClassificationResponse, WireFormat};
use sitelens_server::network::{NetworkConfig, NetworkModule};
use sitelens_server::storage::MemoryStore;
use sitelens_server::{
    AmqpBroker, BrokerConfig, BrokerTransport, ClassificationService, ClassificationStore,
    MemoryBroker, ServiceConfig,
};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum BrokerKind {
    /// AMQP broker such as `RabbitMQ`.
    Amqp,
    /// In-process broker with a stub worker; for local development.
    Memory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "sitelens-server", about = "Website and page classification server")]
struct Cli {
    #[arg(long, env = "SITELENS_HOST", default_value = "0.0.0.0")]
    host: String,

    #[arg(long, env = "SITELENS_PORT", default_value_t = 8080)]
    port: u16,

    #[arg(long, value_enum, env = "SITELENS_BROKER", default_value = "amqp")]
    broker: BrokerKind,

    #[arg(long, env = "RABBIT_HOST", default_value = "localhost")]
    rabbit_host: String,

    #[arg(long, env = "RABBIT_PORT", default_value_t = 5672)]
    rabbit_port: u16,

    #[arg(long, env = "RABBIT_USER", default_value = "guest")]
    rabbit_user: String,

    #[arg(long, env = "RABBIT_PASSWORD", default_value = "guest", hide_env_values = true)]
    rabbit_password: String,

    #[arg(long, env = "RABBIT_VHOST", default_value = "")]
    rabbit_vhost: String,

    /// Queue the classification worker consumes from.
    #[arg(long, env = "SITELENS_REQUEST_QUEUE", default_value = "url_queue")]
    request_queue: String,

    #[arg(long, env = "SITELENS_CALL_TIMEOUT_MS", default_value_t = 5000)]
    call_timeout_ms: u64,

    #[arg(long, default_value_t = 3)]
    connect_attempts: u32,

    #[arg(long, default_value_t = 500)]
    connect_backoff_ms: u64,

    /// Buffered events per live subscriber.
    #[arg(long, default_value_t = 64)]
    subscriber_capacity: usize,

    /// Request body encoding: `json` or `msgpack`.
    #[arg(long, value_parser = parse_wire_format, default_value = "json")]
    wire_format: WireFormat,

    #[arg(long, value_enum, env = "SITELENS_LOG_FORMAT", default_value = "text")]
    log_format: LogFormat,

    /// `PostgreSQL` connection string; results are kept in memory when unset.
    #[cfg(feature = "postgres")]
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,
}

impl Cli {
    fn broker_config(&self) -> BrokerConfig {
        BrokerConfig {
            host: self.rabbit_host.clone(),
            port: self.rabbit_port,
            user: self.rabbit_user.clone(),
            password: self.rabbit_password.clone(),
            vhost: self.rabbit_vhost.clone(),
            connect_attempts: self.connect_attempts,
            connect_backoff: Duration::from_millis(self.connect_backoff_ms),
        }
    }

    fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            request_queue: self.request_queue.clone(),
            call_timeout: Duration::from_millis(self.call_timeout_ms),
            wire_format: self.wire_format,
            subscriber_capacity: self.subscriber_capacity,
            ..ServiceConfig::default()
        }
    }

    fn network_config(&self) -> NetworkConfig {
        NetworkConfig {
            host: self.host.clone(),
            port: self.port,
            ..NetworkConfig::default()
        }
    }
}

fn parse_wire_format(name: &str) -> Result<WireFormat, String> {
    WireFormat::from_name(name).ok_or_else(|| format!("unknown wire format {name:?}"))
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }
}

async fn connect_transport(cli: &Cli) -> Result<Arc<dyn BrokerTransport>> {
    match cli.broker {
        BrokerKind::Amqp => {
            let broker = AmqpBroker::connect(&cli.broker_config())
                .await
                .context("failed to connect to broker")?;
            Ok(Arc::new(broker))
        }
        BrokerKind::Memory => {
            let (broker, worker) = MemoryBroker::new();
            // Stub worker: every URL is unclassified.
            worker.spawn_responder(|request| {
                Some(ClassificationResponse {
                    id: request.id,
                    url: request.url,
                    category: "unclassified".to_string(),
                    theme: "unclassified".to_string(),
                    stats: None,
                })
            });
            info!("using in-memory broker with stub worker");
            Ok(Arc::new(broker))
        }
    }
}

#[cfg(feature = "postgres")]
async fn open_store(cli: &Cli) -> Result<Arc<dyn ClassificationStore>> {
    if let Some(url) = &cli.database_url {
        let store = sitelens_server::storage::PgStore::connect(url, 5)
            .await
            .context("failed to connect to database")?;
        info!("persisting classifications to PostgreSQL");
        return Ok(Arc::new(store));
    }
    Ok(Arc::new(MemoryStore::new()))
}

#[cfg(not(feature = "postgres"))]
#[allow(clippy::unused_async)]
async fn open_store(_cli: &Cli) -> Result<Arc<dyn ClassificationStore>> {
    Ok(Arc::new(MemoryStore::new()))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    info!(version = env!("CARGO_PKG_VERSION"), "starting SiteLens server");

    let transport = connect_transport(&cli).await?;
    let store = open_store(&cli).await?;
    let service = Arc::new(ClassificationService::start(
        transport,
        store,
        cli.service_config(),
    )?);

    let mut network = NetworkModule::new(cli.network_config(), Arc::clone(&service));
    let port = network.start().await?;
    info!(port, "SiteLens server listening");

    network.serve(shutdown_signal()).await?;
    // No-op unless serve failed before the signal fired.
    service.shutdown().await;
    Ok(())
}
