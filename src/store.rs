//! Database bootstrap: create the database if missing, open the pool, load the catalog.

use crate::config::{catalog, load_from_dir, with_schema_name, FullConfig};
use crate::error::AppError;
use crate::settings::Settings;
use sqlx::postgres::PgPoolOptions;
use sqlx::ConnectOptions;
use sqlx::PgPool;
use std::str::FromStr;

/// Connect to the server's `postgres` database and create the one named in `database_url` if it does not exist.
pub async fn ensure_database_exists(database_url: &str) -> Result<(), AppError> {
    let (admin_url, db_name) = parse_db_name_from_url(database_url)?;
    if db_name.is_empty() || db_name == "postgres" {
        return Ok(());
    }
    let opts = sqlx::postgres::PgConnectOptions::from_str(&admin_url)
        .map_err(|e| AppError::BadRequest(format!("invalid DATABASE_URL: {}", e)))?;
    let mut conn: sqlx::PgConnection = opts.connect().await.map_err(AppError::Db)?;
    let exists: (bool,) = sqlx::query_as("SELECT EXISTS(SELECT 1 FROM pg_database WHERE datname = $1)")
        .bind(&db_name)
        .fetch_one(&mut conn)
        .await
        .map_err(AppError::Db)?;
    if !exists.0 {
        tracing::info!(database = %db_name, "creating database");
        sqlx::query(&format!("CREATE DATABASE {}", quote_ident(&db_name)))
            .execute(&mut conn)
            .await
            .map_err(AppError::Db)?;
    }
    Ok(())
}

fn parse_db_name_from_url(url: &str) -> Result<(String, String), AppError> {
    let path_start = url.rfind('/').ok_or_else(|| AppError::BadRequest("DATABASE_URL: no path".into()))? + 1;
    let path_and_query = url.get(path_start..).unwrap_or("");
    let db_name = path_and_query.split('?').next().unwrap_or("").trim();
    let base = url.get(..path_start).unwrap_or(url);
    let admin_url = format!("{}postgres", base);
    Ok((admin_url, db_name.to_string()))
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub async fn connect(settings: &Settings) -> Result<PgPool, AppError> {
    if settings.create_database {
        ensure_database_exists(&settings.database_url).await?;
    }
    let pool = PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .connect(&settings.database_url)
        .await
        .map_err(AppError::Db)?;
    Ok(pool)
}

/// The embedded catalog, or the one in `catalog_dir`, retargeted at the configured schema.
pub async fn load_catalog(settings: &Settings) -> Result<FullConfig, AppError> {
    let config = match &settings.catalog_dir {
        Some(dir) => {
            tracing::info!(dir = %dir.display(), "loading catalog from directory");
            load_from_dir(dir).await?
        }
        None => catalog::builtin()?,
    };
    Ok(with_schema_name(config, &settings.schema))
}
