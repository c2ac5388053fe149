// mashprint entry point.
//
// Startup sequence:
// 1. Initialize tracing (log to file)
// 2. Load config
// 3. Create the session store and dispatcher
// 4. Spawn the TCP listener task
// 5. Spawn the WebSocket listener task, if configured
// 6. Wait for Ctrl+C, then stop the listeners

use std::sync::Arc;

use anyhow::Context;
use mashprint_core::{Dispatcher, SessionStore};
use mashprint_server::{config, tcp_server, ws_server};
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Initialize tracing
    init_tracing()?;
    info!("mashprint starting up");

    // 2. Load config
    let config = config::load_config().context("failed to load configuration")?;
    info!("Config loaded: {}", config.server.tcp_addr());

    // 3. Session store shared by every connection
    let store = Arc::new(SessionStore::new(config.classifier.clone()));
    let settings = store.settings();
    info!(
        "Session store ready: chunk size {}, rebuild on new labeled data: {}",
        settings.mash_chunk_size, settings.rebuild_on_new_labeled_data
    );
    let dispatcher = Dispatcher::new(store);

    // 4. TCP listener
    let tcp_listener = tcp_server::bind(&config.server.tcp_addr()).await?;
    let tcp_dispatcher = dispatcher.clone();
    let limits = config.server.connection_limits();
    let tcp_handle = tokio::spawn(async move {
        if let Err(e) = tcp_server::run(tcp_listener, tcp_dispatcher, limits).await {
            error!("TCP server error: {e:#}");
        }
    });

    // 5. WebSocket listener
    let ws_handle = match config.server.ws_addr() {
        Some(addr) => {
            let listener = ws_server::bind(&addr).await?;
            let ws_dispatcher = dispatcher.clone();
            Some(tokio::spawn(async move {
                if let Err(e) = ws_server::run(listener, ws_dispatcher).await {
                    error!("WebSocket server error: {e:#}");
                }
            }))
        }
        None => None,
    };

    info!("mashprint ready");

    // 6. Run until interrupted
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;
    info!("Shutdown requested");

    tcp_handle.abort();
    if let Some(handle) = ws_handle {
        handle.abort();
    }

    info!(
        "mashprint shut down cleanly ({} session(s) seen)",
        dispatcher.store().session_count()
    );
    Ok(())
}

/// Initialize tracing to log to `logs/mashprint.log`.
fn init_tracing() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let log_dir = std::env::current_dir()?.join("logs");
    std::fs::create_dir_all(&log_dir)?;

    let log_file = std::fs::File::create(log_dir.join("mashprint.log"))?;

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("mashprint=info,warn")),
        )
        .with_writer(log_file)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    Ok(())
}
