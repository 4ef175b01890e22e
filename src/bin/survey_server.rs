//! Survey HTTP Server
//!
//! A standalone server binary exposing the questionnaire over HTTP.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tracing_subscriber::EnvFilter;

use questionnaire::config::{Backend, Command, ServerConfig, USAGE};
use questionnaire::storage::{
    open_database, InMemoryQuestionStore, InMemoryResponseStore, PersistentConfig,
    PersistentStores,
};
use questionnaire::transport;
use questionnaire::SurveyEngine;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Periodically compact the WAL once it outgrows its configured size.
fn spawn_compaction(stores: Arc<PersistentStores>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let stores = Arc::clone(&stores);
            match tokio::task::spawn_blocking(move || stores.maybe_compact()).await {
                Ok(Ok(_)) => {}
                Ok(Err(err)) => tracing::warn!(error = %err, "background compaction failed"),
                Err(err) => tracing::warn!(error = %err, "background compaction task panicked"),
            }
        }
    });
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config = match ServerConfig::from_env()?.apply_args(std::env::args().skip(1))? {
        Command::Run(config) => config,
        Command::Help => {
            print!("{USAGE}");
            return Ok(());
        }
    };

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "survey server starting");

    // Persistent stores hold an exclusive lock for the process lifetime.
    let (engine, stores) = match &config.backend {
        Backend::Memory => {
            tracing::warn!("running on the in-memory backend; data is lost on exit");
            let engine = SurveyEngine::new(
                Arc::new(InMemoryQuestionStore::new()),
                Arc::new(InMemoryResponseStore::new()),
            );
            (engine, None)
        }
        Backend::Persistent {
            data_dir,
            sync_on_write,
        } => {
            tracing::info!(data_dir = %data_dir.display(), "opening database");
            let stores = Arc::new(open_database(
                data_dir,
                Some(PersistentConfig {
                    sync_on_write: *sync_on_write,
                    ..PersistentConfig::default()
                }),
            )?);
            let engine = SurveyEngine::new(stores.questions.clone(), stores.responses.clone());
            (engine, Some(stores))
        }
    };
    let engine = engine.with_transaction_options(config.transaction.clone());

    if let Some(stores) = &stores {
        spawn_compaction(Arc::clone(stores), config.compaction_interval);
    }

    let app = transport::router(engine);
    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    tracing::info!(addr = %config.addr, "listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = signal::ctrl_c().await;
    })
    .await?;

    if let Some(stores) = stores {
        match stores.compact() {
            Ok(result) => tracing::info!(documents = result.documents, "final compaction done"),
            Err(err) => tracing::warn!(error = %err, "final compaction failed"),
        }
    }
    tracing::info!("shut down");
    Ok(())
}
