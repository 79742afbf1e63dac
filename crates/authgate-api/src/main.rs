//! AuthGate API Server
//!
//! Author: hephaex@gmail.com

use anyhow::Context;
use authgate_api::auth::{
    Argon2Hasher, IdTokenKeys, PgCredentialStore, PgUserRepository, TokenService, UserService,
};
use authgate_api::{create_router, state::AppState};
use authgate_core::config::{AppConfig, LoggingConfig};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const PURGE_INTERVAL: Duration = Duration::from_secs(600);

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},tower_http=info", logging.level)));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if logging.json_format {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config() -> anyhow::Result<AppConfig> {
    let config = match std::env::var("AUTHGATE_CONFIG") {
        Ok(path) => AppConfig::from_file(path)?.with_env_override()?,
        Err(_) => AppConfig::from_env()?,
    };
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config()?;
    init_tracing(&config.logging);

    let keys = IdTokenKeys::from_files(
        &config.tokens.private_key_file,
        &config.tokens.public_key_file,
    )
    .context("failed to load ID token keys")?;

    let pool = PgPoolOptions::new()
        .max_connections(config.database.postgres_pool_size)
        .connect(&config.database.postgres_url)
        .await
        .context("failed to connect to PostgreSQL")?;

    let credential_store = Arc::new(PgCredentialStore::new(pool.clone()));
    credential_store.ensure_schema().await?;
    let user_repository = PgUserRepository::new(pool);
    user_repository.ensure_schema().await?;

    let token_service = TokenService::new(credential_store.clone(), keys, &config.tokens);
    let user_service = UserService::new(Arc::new(user_repository), Arc::new(Argon2Hasher::new()?));

    // Expired markers are never live; this only reclaims space
    let purge_store = credential_store.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PURGE_INTERVAL);
        loop {
            interval.tick().await;
            match purge_store.purge_expired().await {
                Ok(removed) if removed > 0 => {
                    tracing::debug!(removed, "purged expired refresh credentials")
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "failed to purge expired refresh credentials"),
            }
        }
    });

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let base_url = config.server.base_url.clone();
    let state = Arc::new(AppState::new(config, token_service, user_service));
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("AuthGate API Server starting on http://{}", addr);
    tracing::info!("Account endpoints under {}", base_url);
    tracing::info!("OpenAPI document at http://{}/api-docs/openapi.json", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
