//! Academic administration backend: catalog-driven PostgreSQL schema and admin CRUD API.

pub mod config;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod migration;
pub mod response;
pub mod routes;
pub mod service;
pub mod settings;
pub mod sql;
pub mod state;
pub mod store;

pub use config::{catalog, resolve, with_schema_name, FullConfig, ResolvedEntity, ResolvedModel};
pub use error::{AppError, ConfigError};
pub use migration::{apply_migrations, migration_statements};
pub use routes::{app_router, common_routes, entity_routes, API_PREFIX};
pub use service::{preview_delete, CrudService, DeletePreview, RequestValidator};
pub use settings::Settings;
pub use state::AppState;
pub use store::{connect, ensure_database_exists, load_catalog};
