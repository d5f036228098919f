//! academico server: migrate the academic schema and serve the admin API.
//!
//! Configure through the environment or a `.env` file (see `Settings`).

use academico::{apply_migrations, app_router, connect, load_catalog, resolve, AppState, Settings, API_PREFIX};
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("academico=info,tower_http=info")),
        )
        .init();

    let settings = Settings::from_env()?;
    let pool = connect(&settings).await?;

    let config = load_catalog(&settings).await?;
    apply_migrations(&pool, &config).await?;
    let model = resolve(&config)?;
    tracing::info!(schema = %settings.schema, entities = model.entities.len(), "catalog ready");

    let app = app_router(AppState::new(pool, model), settings.body_limit);
    let listener = TcpListener::bind(settings.bind).await?;
    tracing::info!("listening on http://{}{}", listener.local_addr()?, API_PREFIX);
    axum::serve(listener, app).await?;
    Ok(())
}
