use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::{net::TcpListener, signal};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use smart_farm_service::{
    api::{self, AppState},
    auth::SessionManager,
    backup::BackupManager,
    config::{Config, StorageBackend},
    control::{CommandSink, ControlService, NullSink},
    db,
    farm::FarmStore,
    ingest::IngestService,
    realtime::{EventHub, LiveState, MqttBridge},
    remote::{FarmApi, RemoteClient},
    store::{FileStore, KvStore, MemoryStore, PgStore},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Env vars may also be set externally
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let config = Config::from_env()?;

    let kv = open_store(&config).await?;
    let events = EventHub::new();
    let store = FarmStore::new(
        kv,
        config.seed_demo_data,
        config.reading_history_limit,
        events,
    );
    let live = LiveState::new();

    let sink: Arc<dyn CommandSink> = match &config.mqtt {
        Some(mqtt) => {
            let ingest = IngestService::new(store.clone(), live.clone());
            Arc::new(MqttBridge::start(mqtt, ingest))
        }
        None => {
            warn!("MQTT_BROKER not set; push updates and device commands are disabled");
            Arc::new(NullSink)
        }
    };

    let control = ControlService::new(
        store.clone(),
        live.clone(),
        sink,
        config.control_interval_secs,
    );
    tokio::spawn(control.clone().run());

    let remote = match &config.upstream {
        Some(upstream) => {
            info!(base_url = %upstream.base_url, "Proxying to upstream farm API");
            Some(RemoteClient::new(upstream)?)
        }
        None => None,
    };

    let state = AppState {
        api: FarmApi::new(remote, store.clone(), control),
        sessions: SessionManager::new(config.secret_key.clone(), config.session_ttl_secs),
        backups: BackupManager::new(config.backup_dir.clone(), store),
        live,
    };

    let addr = format!("{}:{}", config.server_host, config.server_port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(addr = %addr, "HTTP server listening");

    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn open_store(config: &Config) -> Result<Arc<dyn KvStore>> {
    let kv: Arc<dyn KvStore> = match config.storage {
        StorageBackend::Memory => {
            warn!("Using in-memory storage; data is lost on restart");
            Arc::new(MemoryStore::new())
        }
        StorageBackend::File => {
            let store = FileStore::open(config.data_dir.clone()).await?;
            info!(dir = %store.dir().display(), "File storage ready");
            Arc::new(store)
        }
        StorageBackend::Postgres => {
            let url = config
                .database_url
                .as_deref()
                .context("DATABASE_URL is required for postgres storage")?;
            let pool = db::create_pool(url).await?;
            db::run_migrations(&pool).await?;
            info!("Database ready");
            Arc::new(PgStore::new(pool))
        }
    };
    Ok(kv)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
