use anyhow::{Context, Result};
use config::{AppConfig, MediaBackend};
use services::{
    cloudinary_store::{CloudinaryCredentials, CloudinaryStore},
    listing_repository::SqliteListingRepository,
    listing_service::{ListingService, ListingSettings},
    local_store::LocalMediaStore,
    media_store::MediaStore,
    reconcile_service::Reconciler,
};
use state::{AppState, UploadSettings};
use std::{fs, io::ErrorKind, path::PathBuf, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod config;
mod db;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;
mod state;
#[cfg(test)]
mod test_support;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = AppConfig::from_env_and_args()?;

    tracing::info!("Starting listing-media with config: {:?}", cfg);

    // --- Initialize SQLite connection ---
    tracing::debug!("Connecting using raw URL => {}", cfg.database_url);
    let db = Arc::new(db::connect(&cfg.database_url).await?);
    db::run_migrations(&db).await?;

    // --- Handle migration mode ---
    if migrate {
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }

    // --- Ensure staging directory exists ---
    let upload_dir = PathBuf::from(&cfg.upload_dir);
    if !upload_dir.exists() {
        fs::create_dir_all(&upload_dir)?;
        tracing::info!("Created upload directory at {}", cfg.upload_dir);
    }

    // --- Media store ---
    let (media, local_media) = build_media_store(&cfg)?;
    tracing::info!(backend = media.backend_name(), folder = %cfg.media_folder, "media store ready");

    // --- Initialize core services ---
    let repo = Arc::new(SqliteListingRepository::new(db.clone()));
    let listings = ListingService::new(
        repo.clone(),
        media.clone(),
        ListingSettings {
            folder: cfg.media_folder.clone(),
            require_image: cfg.require_image,
            remote_timeout: cfg.remote_timeout,
            db_timeout: cfg.db_timeout,
        },
    );
    let reconciler = Reconciler::new(
        repo,
        media,
        listings.settings().folder.clone(),
        cfg.reconcile_grace,
        cfg.remote_timeout,
        cfg.db_timeout,
    );
    if let Some(interval) = cfg.reconcile_interval {
        tracing::info!(?interval, grace = ?cfg.reconcile_grace, "scheduling orphan sweeps");
        reconciler.clone().spawn(interval);
    }

    let state = AppState {
        db,
        listings,
        reconciler,
        uploads: UploadSettings {
            dir: upload_dir,
            max_bytes: cfg.max_upload_bytes,
        },
        local_media,
    };

    // --- Build router ---
    let app = routes::routes::app(state);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}

/// The configured media store, plus the local store again when this process
/// also serves the files under `/media`.
fn build_media_store(cfg: &AppConfig) -> Result<(Arc<dyn MediaStore>, Option<LocalMediaStore>)> {
    match cfg.media_backend {
        MediaBackend::Local => {
            if !PathBuf::from(&cfg.media_dir).exists() {
                fs::create_dir_all(&cfg.media_dir)?;
                tracing::info!("Created media directory at {}", cfg.media_dir);
            }
            let store = LocalMediaStore::new(&cfg.media_dir, cfg.media_base_url.clone());
            Ok((Arc::new(store.clone()), Some(store)))
        }
        MediaBackend::Cloudinary => {
            let account = cfg
                .cloudinary
                .clone()
                .context("cloudinary backend selected without credentials")?;
            let client = reqwest::Client::builder()
                .timeout(cfg.remote_timeout)
                .build()
                .context("building HTTP client")?;
            let store = CloudinaryStore::new(
                client,
                account.api_base,
                CloudinaryCredentials {
                    cloud_name: account.cloud_name,
                    api_key: account.api_key,
                    api_secret: account.api_secret,
                },
            );
            Ok((Arc::new(store), None))
        }
    }
}
