use anyhow::{Context, Result};
use std::sync::Arc;
use switchboard::api::{create_router, ApiState};
use switchboard::clock::SystemClock;
use switchboard::config::{master_key_from_env, SwitchboardConfig};
use switchboard::credentials::{Cipher, CredentialCache, SqliteCredentialStore};
use switchboard::integration::IntegrationService;
use switchboard::mapping::{FieldMappingRegistry, SqliteMappingStore};
use switchboard::pipedrive::PipedriveClient;
use tower_http::cors::CorsLayer;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "switchboard=info".into()),
        )
        .init();

    info!("Switchboard starting...");

    let config = SwitchboardConfig::load().context("Failed to load configuration")?;
    info!(
        credentials_db = %config.credentials.database,
        field_mappings_db = %config.field_mapping.database,
        pipedrive_base_url = %config.pipedrive.base_url,
        api_port = config.api.port,
        "Configuration loaded"
    );

    // Read once; only the derived key is kept
    let cipher = Cipher::from_master_secret(&master_key_from_env()?)
        .context("Invalid credential master key")?;

    let clock = Arc::new(SystemClock);

    let credential_store = Arc::new(
        SqliteCredentialStore::new(&config.credentials.database)
            .context("Failed to initialize credential store")?,
    );
    let credentials = Arc::new(CredentialCache::new(
        credential_store,
        Arc::new(cipher),
        clock.clone(),
        config.credentials.cache_settings()?,
    ));
    info!("Credential cache initialized");

    let pipedrive = Arc::new(
        PipedriveClient::with_base_url(
            config.pipedrive.base_url.clone(),
            config.pipedrive.request_timeout(),
        )
        .context("Failed to initialize Pipedrive client")?,
    );

    let mapping_store = Arc::new(
        SqliteMappingStore::new(&config.field_mapping.database)
            .context("Failed to initialize field mapping store")?,
    );
    let mappings = Arc::new(FieldMappingRegistry::new(
        pipedrive.clone(),
        mapping_store,
        clock,
        config.field_mapping.mapping_settings()?,
    ));
    info!("Field mapping registry initialized");

    let service = Arc::new(IntegrationService::new(
        credentials,
        mappings,
        pipedrive,
        config.pipedrive.request_timeout(),
    ));

    let router = create_router(ApiState { service }).layer(CorsLayer::permissive());
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.api.port))
        .await
        .context("Failed to bind settings API port")?;
    info!(port = config.api.port, "Settings API listening");

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!(error = %e, "Settings API server error");
        }
    });

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl_c signal")?;
    info!("Shutdown signal received");

    server_handle.abort();
    info!("Switchboard stopped");

    Ok(())
}
