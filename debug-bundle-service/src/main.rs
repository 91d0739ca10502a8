mod error;
mod routes;

use std::path::PathBuf;
use std::sync::Arc;

use actix_web::{App, HttpServer, web};
use debug_bundle_core::{Controller, DebugBundleConfig, Router, observable};
use debug_bundle_kvstore::{KvStore, SqliteKvStore};
use tokio::signal;
use tracing::{error, info};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = match std::env::var("DEBUG_BUNDLE_SERVICE_CONFIG") {
        Ok(path) => DebugBundleConfig::from_file(&PathBuf::from(path)).await?,
        Err(_) => DebugBundleConfig::default(),
    };

    let kv_path = config.data_dir.join("debug-bundle.sqlite");
    if let Some(parent) = kv_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let kv: Arc<dyn KvStore> =
        Arc::new(SqliteKvStore::open(&kv_path).map_err(std::io::Error::other)?);

    let (config_handle, _config_writer) = observable(config);
    let controller = Controller::new(config_handle, kv);
    let router = Router::spawn(controller);
    let router_data = web::Data::new(router.clone());

    let bind_addr = std::env::var("DEBUG_BUNDLE_SERVICE_BIND")
        .unwrap_or_else(|_| "127.0.0.1:8085".to_string());

    info!(addr = %bind_addr, "listening");
    let server = HttpServer::new(move || {
        App::new()
            .app_data(router_data.clone())
            .route("/v1/debug/bundle", web::post().to(routes::initiate))
            .route("/v1/debug/bundle", web::get().to(routes::status))
            .route("/v1/debug/bundle/{job_id}/cancel", web::post().to(routes::cancel))
            .route("/v1/debug/bundle/{job_id}/file", web::get().to(routes::fetch_file))
            .route("/v1/debug/bundle/{job_id}", web::delete().to(routes::delete))
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    tokio::select! {
        result = server => {
            if let Err(e) = result {
                error!("server error: {e}");
            }
        }
        _ = shutdown_signal() => {
            info!("received shutdown signal, draining in-flight operations");
            server_handle.stop(true).await;
        }
    }

    router.shutdown().await;
    info!("debug-bundle-service stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
