mod config;
mod models;
mod outcome;
mod relay;
mod storage;

use config::{Config, StoreBackend};
use relay::{
    ChatModel, FactLookup, HookRegistry, OpenAiClient, RelayServer, RelayState,
    TranscriptHook, WikidataLookup,
};
use std::sync::Arc;
use std::time::Duration;
use storage::{KvStore, MemoryStore, SessionState, SqliteStore};

#[tokio::main]
async fn main() {
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {:#}", e);
            std::process::exit(1);
        }
    };

    // Console + daily rolling file
    let log_dir = config.logging.log_dir();
    let _ = std::fs::create_dir_all(&log_dir);

    let file_appender = tracing_appender::rolling::daily(&log_dir, "pulse.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    use tracing_subscriber::prelude::*;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(true)
                .with_target(false),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_target(true)
                .with_writer(non_blocking),
        )
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!("Pulse starting... Log file: {:?}", log_dir.join("pulse.log"));

    let store: Arc<dyn KvStore> = match config.store.backend {
        StoreBackend::Memory => Arc::new(MemoryStore::open()),
        StoreBackend::Sqlite => match SqliteStore::open(config.store.sqlite_path()).await {
            Ok(store) => Arc::new(store),
            Err(e) => {
                eprintln!("Failed to open session store: {:#}", e);
                std::process::exit(1);
            }
        },
    };

    let model: Arc<dyn ChatModel> = match OpenAiClient::new(config.model_settings()) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            eprintln!("Failed to build model client: {}", e);
            std::process::exit(1);
        }
    };
    if config.model.api_key.is_none() {
        tracing::warn!("OPENAI_API_KEY is not set, chat requests will fail until it is configured");
    }

    let facts: Option<Arc<dyn FactLookup>> = if config.facts.enabled {
        match WikidataLookup::new(&config.facts.endpoint, config.facts.timeout_secs) {
            Ok(lookup) => {
                tracing::info!("Fact lookup enabled: {}", config.facts.endpoint);
                Some(Arc::new(lookup))
            }
            Err(e) => {
                tracing::error!("Fact lookup disabled, client setup failed: {}", e);
                None
            }
        }
    } else {
        None
    };

    let hooks = HookRegistry::new();
    if config.transcripts.enabled {
        let dir = config
            .transcripts
            .dir
            .clone()
            .unwrap_or_else(TranscriptHook::default_log_dir);
        let transcripts =
            TranscriptHook::new(dir.clone()).with_retention_days(config.transcripts.retention_days);
        transcripts.cleanup_old_transcripts().await;
        hooks.register(Arc::new(transcripts)).await;
        tracing::info!("Transcripts enabled: {:?}", dir);
    }
    tracing::info!("Exchange hooks registered: {}", hooks.hook_count().await);

    let detectors = match config.detectors() {
        Ok(detectors) => detectors,
        Err(e) => {
            eprintln!("Invalid detection rules: {:#}", e);
            std::process::exit(1);
        }
    };

    let state = RelayState {
        sessions: SessionState::new(store.clone(), config.session_policy()),
        model,
        facts,
        detectors: Arc::new(detectors),
        hooks,
        settings: config.relay_settings(),
    };

    let janitor = spawn_janitor(store.clone(), config.store.purge_interval_secs);

    let addr = match config.socket_addr() {
        Ok(addr) => addr,
        Err(e) => {
            eprintln!("{:#}", e);
            std::process::exit(1);
        }
    };

    let mut server = RelayServer::new(state);
    match server.start(addr).await {
        Ok(bound) => tracing::info!(
            "Pulse listening on http://{} (store: {}, daily limit: {})",
            bound,
            store.backend(),
            config.quota.daily_limit
        ),
        Err(e) => {
            tracing::error!("Failed to start relay server: {:#}", e);
            std::process::exit(1);
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }

    tracing::info!("Shutdown requested");
    janitor.abort();
    if let Err(e) = server.stop().await {
        tracing::error!("Relay server did not stop cleanly: {}", e);
    }
    store.close().await;
    tracing::info!("Pulse stopped");
}

/// Periodically drops expired keys from the session store
fn spawn_janitor(store: Arc<dyn KvStore>, interval_secs: u64) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        interval.tick().await;

        loop {
            interval.tick().await;
            match store.purge_expired().await {
                Ok(0) => {}
                Ok(removed) => tracing::info!("Janitor purged {} expired keys", removed),
                Err(e) => tracing::warn!("Janitor purge failed: {}", e),
            }
        }
    })
}
