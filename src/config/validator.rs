//! Catalog validation: referential integrity and API consistency.

use crate::config::FullConfig;
use crate::error::ConfigError;
use std::collections::{HashMap, HashSet};

const ON_DELETE_ACTIONS: &[&str] = &["CASCADE", "SET NULL", "RESTRICT", "NO ACTION"];

/// Default schema id when configs omit schema_id.
pub fn default_schema_id(config: &FullConfig) -> Result<&str, ConfigError> {
    config
        .schemas
        .first()
        .map(|s| s.id.as_str())
        .ok_or_else(|| ConfigError::Validation("at least one schema required".into()))
}

pub fn validate(config: &FullConfig) -> Result<(), ConfigError> {
    let default_sid = default_schema_id(config)?;
    let schema_ids: HashSet<&str> = config.schemas.iter().map(|s| s.id.as_str()).collect();
    let table_ids: HashSet<&str> = config.tables.iter().map(|t| t.id.as_str()).collect();
    let column_ids: HashSet<&str> = config.columns.iter().map(|c| c.id.as_str()).collect();
    let columns_by_table: HashMap<&str, HashSet<&str>> =
        config.columns.iter().fold(HashMap::new(), |mut m, c| {
            m.entry(c.table_id.as_str()).or_default().insert(c.name.as_str());
            m
        });
    let empty = HashSet::new();

    for e in &config.enums {
        let sid = e.schema_id.as_deref().unwrap_or(default_sid);
        if !schema_ids.contains(sid) {
            return Err(ConfigError::MissingReference {
                kind: "schema",
                id: sid.to_string(),
            });
        }
        if e.values.is_empty() {
            return Err(ConfigError::Validation(format!("enum {} has no values", e.name)));
        }
    }

    for t in &config.tables {
        let sid = t.schema_id.as_deref().unwrap_or(default_sid);
        if !schema_ids.contains(sid) {
            return Err(ConfigError::MissingReference {
                kind: "schema",
                id: sid.to_string(),
            });
        }
        let table_columns = columns_by_table.get(t.id.as_str()).unwrap_or(&empty);
        for pk in t.primary_key.columns() {
            if !table_columns.contains(pk) {
                return Err(ConfigError::InvalidPrimaryKey {
                    table_id: t.id.clone(),
                    column: pk.to_string(),
                });
            }
        }
        for unique in &t.unique {
            if unique.is_empty() {
                return Err(ConfigError::Validation(format!("empty unique constraint on {}", t.id)));
            }
            for col in unique {
                if !table_columns.contains(col.as_str()) {
                    return Err(ConfigError::MissingReference {
                        kind: "unique column",
                        id: format!("{}.{}", t.id, col),
                    });
                }
            }
        }
    }

    for c in &config.columns {
        if !table_ids.contains(c.table_id.as_str()) {
            return Err(ConfigError::MissingReference {
                kind: "table",
                id: c.table_id.clone(),
            });
        }
    }

    for idx in &config.indexes {
        let sid = idx.schema_id.as_deref().unwrap_or(default_sid);
        if !schema_ids.contains(sid) || !table_ids.contains(idx.table_id.as_str()) {
            return Err(ConfigError::MissingReference {
                kind: "schema or table",
                id: format!("{} / {}", sid, idx.table_id),
            });
        }
    }

    for r in &config.relationships {
        if !schema_ids.contains(r.from_schema_id.as_str())
            || !schema_ids.contains(r.to_schema_id.as_str())
            || !table_ids.contains(r.from_table_id.as_str())
            || !table_ids.contains(r.to_table_id.as_str())
            || !column_ids.contains(r.from_column_id.as_str())
            || !column_ids.contains(r.to_column_id.as_str())
        {
            return Err(ConfigError::MissingReference {
                kind: "relationship",
                id: r.id.clone(),
            });
        }
        let action = r.on_delete.as_deref().unwrap_or("NO ACTION").to_uppercase();
        if !ON_DELETE_ACTIONS.contains(&action.as_str()) {
            return Err(ConfigError::Validation(format!(
                "relationship {}: unsupported on_delete '{}'",
                r.id, action
            )));
        }
        if action == "SET NULL" {
            let nullable = config.column_by_id(&r.from_column_id).map(|c| c.nullable).unwrap_or(false);
            if !nullable {
                return Err(ConfigError::Validation(format!(
                    "relationship {}: SET NULL requires a nullable column",
                    r.id
                )));
            }
        }
    }

    let mut path_segments = HashSet::new();
    for api in &config.api_entities {
        if !table_ids.contains(api.entity_id.as_str()) {
            return Err(ConfigError::MissingReference {
                kind: "table",
                id: api.entity_id.clone(),
            });
        }
        if !path_segments.insert(api.path_segment.as_str()) {
            return Err(ConfigError::DuplicatePathSegment(api.path_segment.clone()));
        }
        let table_columns = columns_by_table.get(api.entity_id.as_str()).unwrap_or(&empty);
        let listed = api
            .sensitive_columns
            .iter()
            .chain(&api.hashed_columns)
            .chain(&api.read_only_columns)
            .chain(api.validation.keys());
        for col in listed {
            if !table_columns.contains(col.as_str()) {
                return Err(ConfigError::MissingReference {
                    kind: "column",
                    id: format!("{}.{}", api.entity_id, col),
                });
            }
        }
        for guard in &api.role_guards {
            let target_columns = columns_by_table.get(guard.table_id.as_str()).unwrap_or(&empty);
            if !table_columns.contains(guard.column.as_str()) || !target_columns.contains(guard.role_column.as_str()) {
                return Err(ConfigError::MissingReference {
                    kind: "role guard",
                    id: format!("{}.{}", api.entity_id, guard.column),
                });
            }
            let role_enum = config
                .columns_of(&guard.table_id)
                .find(|c| c.name == guard.role_column)
                .and_then(|c| config.enum_by_name(c.type_.base_name()));
            if let Some(role_enum) = role_enum {
                if let Some(bad) = guard.allowed.iter().find(|v| !role_enum.values.contains(v)) {
                    return Err(ConfigError::Validation(format!(
                        "role guard {}.{}: '{}' is not a value of {}",
                        api.entity_id, guard.column, bad, role_enum.name
                    )));
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::catalog;

    #[test]
    fn builtin_catalog_is_valid() {
        let config = catalog::builtin().expect("catalog parses");
        validate(&config).expect("catalog validates");
    }

    #[test]
    fn duplicate_path_segment_is_rejected() {
        let mut config = catalog::builtin().unwrap();
        let mut dup = config.api_entities[0].clone();
        dup.entity_id = "curso".into();
        config.api_entities.push(dup);
        assert!(matches!(validate(&config), Err(ConfigError::DuplicatePathSegment(p)) if p == "unidade"));
    }

    #[test]
    fn unknown_unique_column_is_rejected() {
        let mut config = catalog::builtin().unwrap();
        let t = config.tables.iter_mut().find(|t| t.id == "curso").unwrap();
        t.unique.push(vec!["sigla".into()]);
        assert!(matches!(
            validate(&config),
            Err(ConfigError::MissingReference { kind: "unique column", .. })
        ));
    }

    #[test]
    fn set_null_on_required_column_is_rejected() {
        let mut config = catalog::builtin().unwrap();
        let rel = config
            .relationships
            .iter_mut()
            .find(|r| r.from_column_id == "departamento.unidade_id")
            .unwrap();
        rel.on_delete = Some("SET NULL".into());
        assert!(matches!(validate(&config), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn role_guard_with_unknown_role_is_rejected() {
        let mut config = catalog::builtin().unwrap();
        let turma = config.api_entities.iter_mut().find(|a| a.entity_id == "turma").unwrap();
        turma.role_guards[0].allowed = vec!["monitor".into()];
        assert!(matches!(validate(&config), Err(ConfigError::Validation(msg)) if msg.contains("monitor")));
    }
}
