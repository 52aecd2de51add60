use std::sync::Arc;

use anyhow::Context;
use lobby::config::{Config, ConfigError, USAGE};
use lobby::server::Server;
use lobby::store::JsonFileStore;
use tokio::net::TcpListener;
use tracing::{info, warn};

fn usage_and_exit() -> ! {
    eprintln!("{USAGE}");
    std::process::exit(2);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,lobby=info".into()),
        )
        .with_target(false)
        .init();

    let cfg = match Config::from_env_and_args() {
        Ok(cfg) => cfg,
        Err(ConfigError::Help) => usage_and_exit(),
        Err(e) => {
            eprintln!("lobby: {e}\n");
            usage_and_exit()
        }
    };

    let store = JsonFileStore::open(&cfg.accounts_path)
        .with_context(|| format!("open accounts {}", cfg.accounts_path.display()))?;
    let listener = TcpListener::bind(cfg.bind)
        .await
        .with_context(|| format!("bind {}", cfg.bind))?;

    info!(
        bind = %cfg.bind,
        accounts = %cfg.accounts_path.display(),
        accounts_loaded = store.len(),
        password_scheme = ?cfg.password_scheme,
        framing = ?cfg.framing,
        idle_timeout_s = cfg.idle_timeout.map(|d| d.as_secs()).unwrap_or(0),
        "lobby listening"
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    Server::new(cfg, Arc::new(store))
        .serve(listener, shutdown_rx)
        .await?;
    info!("bye");
    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            warn!(err = %e, "failed to install SIGTERM handler; only ctrl-c will stop the server");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
