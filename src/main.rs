//! iothub - MQTT broker bridge for the core device platform
//!
//! Usage:
//!   iothub [OPTIONS]
//!
//! Options:
//!   -c, --config <FILE>    Configuration file path
//!   -b, --bind <ADDR>      Endpoint bind address (default: 0.0.0.0:8080)
//!   --store <BACKEND>      State store backend (memory, fjall, dapr)
//!   -l, --log-level        Log level (error, warn, info, debug, trace)
//!   -h, --help             Print help

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio::sync::watch;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use iothub::config::{Config, StoreBackend};
use iothub::event_stream::spawn_delivery_monitor;
use iothub::server::Endpoints;
use iothub::{
    BridgeContext, BridgeHooks, BridgeServer, DaprEventStream, DaprStateStore, DownstreamPipeline,
    EmqxPublisher, EventStream, FjallStore, HttpCoreApi, KeyValueStore, MemoryStore, Metrics,
    MetricsServer, SubscriptionManager,
};

/// Log level for CLI
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum LogLevel {
    /// Only errors
    Error,
    /// Warnings and errors
    Warn,
    /// Informational messages
    #[default]
    Info,
    /// Debug messages
    Debug,
    /// Trace messages (very verbose)
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Level {
        match self {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

/// State store backend for CLI
#[derive(Debug, Clone, Copy, ValueEnum)]
enum StoreArg {
    Memory,
    Fjall,
    Dapr,
}

impl From<StoreArg> for StoreBackend {
    fn from(arg: StoreArg) -> Self {
        match arg {
            StoreArg::Memory => StoreBackend::Memory,
            StoreArg::Fjall => StoreBackend::Fjall,
            StoreArg::Dapr => StoreBackend::Dapr,
        }
    }
}

/// iothub - MQTT broker bridge
#[derive(Parser, Debug)]
#[command(name = "iothub")]
#[command(author = "IoTHub Contributors")]
#[command(version)]
#[command(about = "MQTT hook bridge between device brokers and the core entity platform")]
struct Args {
    /// Configuration file path (TOML format)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address for notifications and hook calls
    #[arg(short, long)]
    bind: Option<SocketAddr>,

    /// State store backend
    #[arg(long, value_enum)]
    store: Option<StoreArg>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, value_enum)]
    log_level: Option<LogLevel>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Load configuration file if specified, otherwise defaults plus env overrides
    let loaded = match &args.config {
        Some(path) => Config::load(path),
        None => Config::from_env(),
    };
    let mut config = match loaded {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading configuration: {}", e);
            std::process::exit(1);
        }
    };

    // Setup logging - CLI overrides config, config overrides default (info)
    let log_level = args.log_level.unwrap_or_else(|| {
        match config.log.level.to_lowercase().as_str() {
            "error" => LogLevel::Error,
            "warn" => LogLevel::Warn,
            "debug" => LogLevel::Debug,
            "trace" => LogLevel::Trace,
            _ => LogLevel::Info,
        }
    });

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level.to_tracing_level())
        .with_target(false)
        .with_thread_ids(true)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    if let Some(path) = &args.config {
        info!("Loaded configuration from {:?}", path);
    }

    // CLI args override file config
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    if let Some(store) = args.store {
        config.store.backend = store.into();
    }
    config.validate()?;

    info!("Starting iothub bridge");
    info!("  Endpoint: http://{}", config.server.bind);
    info!("  Core API: {}", config.core.base_url);
    info!("  Broker API: {}", config.broker.base_url);
    info!(
        "  Event stream: {}/{}",
        config.event_stream.pubsub_name, config.event_stream.topic
    );

    let store: Arc<dyn KeyValueStore> = match config.store.backend {
        StoreBackend::Memory => {
            info!("  State store: memory");
            Arc::new(MemoryStore::new())
        }
        StoreBackend::Fjall => {
            info!("  State store: fjall ({})", config.store.path);
            Arc::new(FjallStore::open(&config.store.path)?)
        }
        StoreBackend::Dapr => {
            info!("  State store: dapr ({})", config.store.store_name);
            Arc::new(DaprStateStore::new(
                &config.store.dapr_base_url,
                &config.store.store_name,
                config.store.timeout,
            )?)
        }
    };

    let core = Arc::new(HttpCoreApi::new(&config.core, &config.bridge.source)?);
    let publisher = Arc::new(EmqxPublisher::new(&config.broker)?);
    let stream: Arc<dyn EventStream> = Arc::new(DaprEventStream::new(&config.event_stream)?);

    let mut context = BridgeContext::new(store.clone(), core, publisher, stream.clone(), &config);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Setup metrics if configured
    let metrics = if config.metrics.enabled {
        let metrics = Arc::new(Metrics::new()?);
        info!("  Metrics: enabled (http://{})", config.metrics.bind);

        let metrics_server = MetricsServer::new(metrics.clone(), config.metrics.bind);
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = metrics_server.run(shutdown).await {
                error!("Metrics server error: {}", e);
            }
        });
        context = context.with_metrics(metrics.clone());
        Some(metrics)
    } else {
        info!("  Metrics: disabled");
        None
    };

    let context = Arc::new(context);
    let monitor = spawn_delivery_monitor(stream, metrics, shutdown_rx.clone());

    let subscriptions = Arc::new(SubscriptionManager::new(context.clone()));
    let endpoints = Endpoints {
        hooks: Arc::new(BridgeHooks::new(context.clone())),
        downstream: Arc::new(DownstreamPipeline::new(context.clone(), subscriptions)),
        pubsub_name: config.core.subscription_pubsub.clone(),
        topic: config.core.subscription_topic.clone(),
    };
    let server = BridgeServer::new(endpoints, config.server.bind);
    let server_handle = tokio::spawn(server.run(shutdown_rx));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
        result = server_handle => {
            match result {
                Ok(Err(e)) => error!("Bridge endpoint failed: {}", e),
                Err(e) => error!("Bridge endpoint task panicked: {}", e),
                Ok(Ok(())) => {}
            }
        }
    }

    let _ = shutdown_tx.send(true);
    let _ = monitor.await;
    if let Err(e) = store.flush().await {
        error!("Failed to flush state store: {}", e);
    }
    info!("iothub stopped");

    Ok(())
}
