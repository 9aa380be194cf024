pub mod handlers;

use axum::{routing::get, Router};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
};
use tracing::{info, warn};

use crate::storage::StorageBackend;
use handlers::get_mails_of_recipient;

/// Build the API router
pub fn create_router(
    storage: Arc<dyn StorageBackend>,
    static_content: Option<&Path>,
) -> Router {
    let router = Router::new()
        .route(
            "/endpoints/get-mails-of/:address",
            get(get_mails_of_recipient),
        )
        .with_state(storage);

    let router = match static_content.and_then(static_content_folder) {
        // Missing files are 404; index.html only answers directory requests
        Some(folder) => router.fallback_service(ServeDir::new(folder)),
        None => router,
    };

    // CORS for browser front ends served elsewhere
    router.layer(
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    )
}

/// Accept the static content folder only if it is an existing directory
fn static_content_folder(path: &Path) -> Option<PathBuf> {
    match std::fs::metadata(path) {
        Ok(metadata) if metadata.is_dir() => Some(path.to_path_buf()),
        Ok(_) => {
            warn!("Static content storage is not a folder [{}]", path.display());
            None
        }
        Err(e) => {
            warn!("Cannot stat static content storage [{}]: {}", path.display(), e);
            None
        }
    }
}

/// Start the API server with graceful shutdown support
pub async fn start_server_with_shutdown(
    router: Router,
    listen_addr: &str,
    shutdown_signal: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    info!("Starting API server on {}", listen_addr);

    let listener = tokio::net::TcpListener::bind(listen_addr).await?;

    let shutdown_signal = async {
        shutdown_signal.await;
        info!("🛑 Shutdown signal received, stopping server gracefully...");
    };

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    info!("✅ API server stopped gracefully");
    Ok(())
}
