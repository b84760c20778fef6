use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use sentinel::api::{spawn_api_server, ApiState};
use sentinel::broadcaster::Broadcaster;
use sentinel::bus::Broker;
use sentinel::config::{read_config_file, Config, NotificationConfig, StorageConfig};
use sentinel::monitor::MonitorService;
use sentinel::notify::{DiscordNotifier, FanoutNotifier, Notifier, WebhookNotifier};
use sentinel::scheduler::Scheduler;
use sentinel::store::{MemoryStore, SqliteStore, Store};
use tracing::{error, info, level_filters::LevelFilter, trace};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file (JSON); defaults apply when omitted
    #[arg(short, long)]
    file: Option<String>,
}

fn init() {
    let filter = filter::Targets::new().with_targets(vec![("sentinel", LevelFilter::DEBUG)]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact(),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init();
    let args = Args::parse();
    trace!("started with args: {args:?}");

    let config = match &args.file {
        Some(file) => read_config_file(file)?,
        None => Config::default(),
    };

    if let Err(e) = config.validate() {
        error!("invalid configuration: {e}");
        return Err(anyhow::anyhow!("configuration validation failed: {e}"));
    }

    run(config).await
}

async fn run(config: Config) -> anyhow::Result<()> {
    // Storage
    let store: Arc<dyn Store> = match &config.storage {
        StorageConfig::Sqlite { path } => {
            info!("using SQLite storage at {:?}", path);
            Arc::new(SqliteStore::new(path).await?)
        }
        StorageConfig::None => {
            info!("using in-memory storage (no persistence)");
            Arc::new(MemoryStore::new())
        }
    };

    // Event buses
    let updates = Arc::new(Broker::new());
    let triggers = Arc::new(Broker::new());
    updates.start();
    triggers.start();

    // Notification sinks
    let sinks: Vec<Arc<dyn Notifier>> = config
        .notifications
        .iter()
        .map(|sink| match sink {
            NotificationConfig::Webhook { url } => {
                Arc::new(WebhookNotifier::new(url.clone())) as Arc<dyn Notifier>
            }
            NotificationConfig::Discord { url, user_id } => {
                Arc::new(DiscordNotifier::new(url.clone(), user_id.clone())) as Arc<dyn Notifier>
            }
        })
        .collect();
    info!("{} notification sinks configured", sinks.len());
    let notifier: Arc<dyn Notifier> = Arc::new(FanoutNotifier::new(sinks));

    // Engine
    let monitor = Arc::new(MonitorService::new(
        store.clone(),
        notifier,
        updates.clone(),
        triggers.clone(),
    ));

    let scheduler = Scheduler::new(store.clone(), monitor.clone(), triggers.clone());
    scheduler.start().await?;

    let broadcaster = Broadcaster::new(store.clone(), updates.clone(), triggers.clone());
    broadcaster.start();

    // API surface
    let bind_addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port).parse()?;
    let state = ApiState {
        store: store.clone(),
        monitor: monitor.clone(),
        broadcaster: broadcaster.clone(),
    };
    let addr = spawn_api_server(bind_addr, config.server.enable_cors, state).await?;
    info!("sentinel ready on http://{addr}");

    info!("press Ctrl+C to shutdown gracefully");
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("received shutdown signal"),
        Err(e) => error!("unable to listen for shutdown signal: {e}"),
    }

    // Graceful shutdown: scheduler first so no new checks land in the
    // store, then the fan-out paths, then storage.
    scheduler.stop().await;
    broadcaster.stop();
    triggers.stop();
    updates.stop();
    if let Err(e) = store.close().await {
        error!("error closing store: {e}");
    }

    info!("shutdown complete");
    Ok(())
}
