mod address;
mod api;
mod config;
mod smtp;
mod storage;


use anyhow::{Context, Result};
use config::Config;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use smtp::{SmtpLimits, SmtpServer};
use storage::{cancel::Cancellation, fs::FsStorage, retention::spawn_purge_loop, StorageBackend};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with env filter
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("🚀 Starting MailPond");

    let config = Config::load()?;

    info!("📝 Configuration:");
    info!("  Domain: {}", config.mail_domain);
    info!("  SMTP listen: {}", config.smtp_listen);
    info!(
        "  SMTP TLS: {}",
        if config.smtp_tls().is_some() { "STARTTLS" } else { "Disabled" }
    );
    info!("  HTTP listen: {}", config.http_listen);
    info!("  Storage: {}", config.storage_path.display());
    info!("  Retention: {} hours", config.mail_retain_hours);

    // Initialize storage backend
    let storage: Arc<dyn StorageBackend> = match FsStorage::new(&config.storage_path) {
        Ok(storage) => {
            info!("💾 Mail storage opened at {}", storage.root().display());
            Arc::new(storage)
        }
        Err(e) => {
            error!("❌ Cannot init storage at [{}]: {}", config.storage_path.display(), e);
            return Err(e).context("storage initialization failed");
        }
    };

    // Start SMTP server
    let smtp_server = SmtpServer::new(
        storage.clone(),
        config.mail_domain.clone(),
        config.smtp_listen.clone(),
        config.smtp_tls(),
        SmtpLimits {
            max_recipients: config.smtp_max_recipients,
            max_message_bytes: config.smtp_max_message_bytes,
        },
    );
    if let Err(e) = smtp_server.start() {
        error!("❌ Cannot start SMTP service: {:#}", e);
        return Err(e);
    }

    // Start purging expired mail
    let shutdown = Cancellation::new();
    let purge_task = spawn_purge_loop(
        storage.clone(),
        config.mail_retain_duration(),
        config.purge_interval(),
        shutdown.clone(),
    );

    let router = api::create_router(storage, config.http_static_content.as_deref());

    // Set up graceful shutdown signal handling
    let shutdown_signal = async move {
        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(e) => {
                    error!("Failed to install signal handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("🛑 Received Ctrl+C signal");
            },
            _ = terminate => {
                info!("🛑 Received terminate signal");
            },
        }

        shutdown.cancel();
    };

    info!("🔄 Server is running. Press Ctrl+C to stop gracefully...");

    if let Err(e) =
        api::start_server_with_shutdown(router, &config.http_listen, shutdown_signal).await
    {
        // Leave through process exit so the serving SMTP thread cannot keep us alive
        error!("❌ Server error: {:#}", e);
        std::process::exit(1);
    }

    if let Err(e) = purge_task.await {
        error!("Purge task failed: {}", e);
    }

    // The SMTP server has no graceful shutdown, so leave through process exit
    info!("Stopped MailPond");
    std::process::exit(0);
}
