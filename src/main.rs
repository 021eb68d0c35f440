use std::path::Path;

use livequery::Client;
use livequery::Error;
use livequery::QueryView;
use livequery::Result;
use livequery::Settings;
use livequery::SortKey;
use tokio::signal::unix::signal;
use tokio::signal::unix::SignalKind;
use tokio::task::JoinSet;
use tracing::error;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;

const LOG_DIR_ENV: &str = "LIVEQUERY_LOG_DIR";

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() -> Result<()> {
    // Initializing Logs
    let _guard = init_observability(std::env::var(LOG_DIR_ENV).ok().as_deref())?;

    let settings = Settings::new()?.validate()?;
    info!(?settings, "settings loaded");

    let client = Client::builder(settings.clone()).build()?;
    let channels = &settings.fallback.channels;
    let views = vec![
        client.subscribe(&channels.trending, Some(SortKey::descending("frequency"))),
        client.subscribe(&channels.duplicates, Some(SortKey::descending("count"))),
        client.subscribe(&channels.inactive, Some(SortKey::descending("daysInactive"))),
    ];

    let mut printers = JoinSet::new();
    for view in views {
        printers.spawn(print_projections(view));
    }

    info!("Application started. Waiting for CTRL+C signal...");
    if let Err(e) = graceful_shutdown().await {
        error!("Failed to listen for shutdown signals: {:?}", e);
    }

    client.shutdown().await;
    while printers.join_next().await.is_some() {}

    println!("Exiting program.");
    Ok(())
}

/// Logs every projection of `view` until it stops
async fn print_projections(mut view: QueryView) {
    while let Some(items) = view.changed().await {
        info!(
            channel = %view.channel(),
            source = ?view.source(),
            connected = view.connected(),
            items = items.len(),
            "projection updated"
        );
        for (rank, item) in items.iter().enumerate() {
            info!(channel = %view.channel(), rank = rank + 1, "{}", serde_json::Value::Object(item.clone()));
        }
    }
}

async fn graceful_shutdown() -> Result<()> {
    let mut sigint = signal(SignalKind::interrupt()).map_err(|e| Error::Fatal(e.to_string()))?;
    let mut sigterm = signal(SignalKind::terminate()).map_err(|e| Error::Fatal(e.to_string()))?;
    tokio::select! {
        _ = sigint.recv() => {
            info!("SIGINT detected.");
        },
        _ = sigterm.recv() => {
            info!("SIGTERM detected.");
        },
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl+C detected.");
        },
    }
    info!("Shutting down..");
    Ok(())
}

/// Logs to stderr, or to `<log_dir>/livequery.log` when a directory is given
pub fn init_observability(log_dir: Option<&str>) -> Result<Option<WorkerGuard>> {
    let Some(log_dir) = log_dir else {
        tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer().with_filter(EnvFilter::from_default_env()))
            .init();
        return Ok(None);
    };

    std::fs::create_dir_all(log_dir).map_err(|e| Error::Fatal(format!("cannot create log dir {log_dir}: {e}")))?;
    let file_appender = tracing_appender::rolling::never(Path::new(log_dir), "livequery.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let base_subscriber = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_filter(EnvFilter::from_default_env());
    tracing_subscriber::registry().with(base_subscriber).init();

    Ok(Some(guard))
}
