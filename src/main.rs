use anyhow::{Context, Result};
use bucket_explorer::{
    AppState,
    config::{AppConfig, BackendKind},
    db, routes,
    services::{
        aws_backend::AwsBackendFactory,
        backend::BackendFactory,
        credential_store::CredentialStore,
        crypto::SecretCipher,
        memory_backend::{MemoryBackend, MemoryBackendFactory},
    },
};
use std::{io::ErrorKind, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = AppConfig::from_env_and_args()?;

    tracing::info!("Starting bucket-explorer with config: {:?}", cfg);

    // --- Initialize SQLite connection ---
    tracing::debug!("Connecting using raw URL => {}", cfg.database_url);
    let pool = db::connect(&cfg.database_url, 5)
        .await
        .with_context(|| format!("opening database {}", cfg.database_url))?;

    // --- Handle migration mode ---
    if migrate {
        db::run_migrations(&pool).await?;
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }
    db::run_migrations(&pool).await?;

    // --- Initialize credential store ---
    let cipher = SecretCipher::load_or_create(&cfg.secret_key_path)
        .with_context(|| format!("loading secret key from {}", cfg.secret_key_path))?;
    let store = CredentialStore::new(Arc::new(pool), Arc::new(cipher));

    let factory: Arc<dyn BackendFactory> = match cfg.backend {
        BackendKind::Aws => Arc::new(AwsBackendFactory),
        BackendKind::Memory => {
            tracing::warn!("Using the in-memory backend; objects are lost on restart");
            Arc::new(MemoryBackendFactory::new(Arc::new(MemoryBackend::new())))
        }
    };

    let state = AppState::new(store, factory, cfg.upload_settings())
        .with_presign_expiry(cfg.presign_expiry());

    // --- Build router ---
    let app = routes::app(state, cfg.max_upload_bytes);

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
