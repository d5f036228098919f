//! Process settings from the environment (after `.env` is loaded).

use crate::error::ConfigError;
use std::net::SocketAddr;
use std::path::PathBuf;

pub const DEFAULT_DATABASE_URL: &str = "postgres://localhost/academico";
pub const DEFAULT_BIND: &str = "0.0.0.0:3000";
pub const DEFAULT_SCHEMA: &str = "academico";
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;
pub const DEFAULT_BODY_LIMIT: usize = 1024 * 1024;

#[derive(Clone, Debug)]
pub struct Settings {
    pub database_url: String,
    pub bind: SocketAddr,
    /// PostgreSQL schema holding the academic tables.
    pub schema: String,
    pub max_connections: u32,
    /// Request body limit in bytes.
    pub body_limit: usize,
    /// Load the catalog from this directory instead of the embedded one.
    pub catalog_dir: Option<PathBuf>,
    /// Create the database named in `database_url` when it does not exist.
    pub create_database: bool,
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from any key lookup; blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let bind_raw = get("ACADEMICO_BIND").unwrap_or_else(|| DEFAULT_BIND.to_string());
        let bind = bind_raw.parse().map_err(|_| ConfigError::Setting {
            name: "ACADEMICO_BIND",
            message: format!("'{}' is not a socket address", bind_raw),
        })?;

        let schema = get("ACADEMICO_SCHEMA").unwrap_or_else(|| DEFAULT_SCHEMA.to_string());
        if !is_identifier(&schema) {
            return Err(ConfigError::Setting {
                name: "ACADEMICO_SCHEMA",
                message: format!("'{}' is not a valid schema name", schema),
            });
        }

        let max_connections = match get("DATABASE_MAX_CONNECTIONS") {
            Some(v) => parse_positive("DATABASE_MAX_CONNECTIONS", &v)?,
            None => DEFAULT_MAX_CONNECTIONS,
        };
        let body_limit = match get("ACADEMICO_BODY_LIMIT") {
            Some(v) => parse_positive("ACADEMICO_BODY_LIMIT", &v)?,
            None => DEFAULT_BODY_LIMIT,
        };
        let create_database = match get("ACADEMICO_CREATE_DATABASE") {
            Some(v) => parse_bool("ACADEMICO_CREATE_DATABASE", &v)?,
            None => true,
        };

        Ok(Settings {
            database_url: get("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            bind,
            schema,
            max_connections,
            body_limit,
            catalog_dir: get("ACADEMICO_CATALOG_DIR").map(PathBuf::from),
            create_database,
        })
    }
}

fn parse_positive<T>(name: &'static str, v: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialOrd + Default,
{
    match v.parse::<T>() {
        Ok(n) if n > T::default() => Ok(n),
        _ => Err(ConfigError::Setting {
            name,
            message: format!("'{}' is not a positive integer", v),
        }),
    }
}

fn parse_bool(name: &'static str, v: &str) -> Result<bool, ConfigError> {
    match v.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Setting {
            name,
            message: format!("'{}' is not a boolean", v),
        }),
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_lowercase() || c == '_')
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        && s.len() <= 63
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(pairs: &[(&str, &str)]) -> Result<Settings, ConfigError> {
        let env: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Settings::from_lookup(|k| env.get(k).cloned())
    }

    #[test]
    fn defaults() {
        let s = settings(&[]).unwrap();
        assert_eq!(s.database_url, DEFAULT_DATABASE_URL);
        assert_eq!(s.bind.port(), 3000);
        assert_eq!(s.schema, "academico");
        assert_eq!(s.max_connections, 5);
        assert_eq!(s.body_limit, 1024 * 1024);
        assert!(s.catalog_dir.is_none());
        assert!(s.create_database);
    }

    #[test]
    fn overrides() {
        let s = settings(&[
            ("DATABASE_URL", "postgres://db/escola"),
            ("ACADEMICO_BIND", "127.0.0.1:8080"),
            ("ACADEMICO_SCHEMA", "escola_2025"),
            ("DATABASE_MAX_CONNECTIONS", "20"),
            ("ACADEMICO_CATALOG_DIR", "/etc/academico"),
            ("ACADEMICO_CREATE_DATABASE", "no"),
        ])
        .unwrap();
        assert_eq!(s.database_url, "postgres://db/escola");
        assert_eq!(s.bind.to_string(), "127.0.0.1:8080");
        assert_eq!(s.schema, "escola_2025");
        assert_eq!(s.max_connections, 20);
        assert_eq!(s.catalog_dir, Some(PathBuf::from("/etc/academico")));
        assert!(!s.create_database);
    }

    #[test]
    fn blank_values_fall_back_to_defaults() {
        let s = settings(&[("ACADEMICO_SCHEMA", "  ")]).unwrap();
        assert_eq!(s.schema, "academico");
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(matches!(
            settings(&[("ACADEMICO_BIND", "localhost")]),
            Err(ConfigError::Setting { name: "ACADEMICO_BIND", .. })
        ));
        assert!(settings(&[("ACADEMICO_SCHEMA", "Bad-Name")]).is_err());
        assert!(settings(&[("DATABASE_MAX_CONNECTIONS", "0")]).is_err());
        assert!(settings(&[("ACADEMICO_BODY_LIMIT", "lots")]).is_err());
        assert!(settings(&[("ACADEMICO_CREATE_DATABASE", "maybe")]).is_err());
    }
}
