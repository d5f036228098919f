//! Load the catalog from a directory of JSON files and resolve it into the runtime model.

use crate::config::resolved::{
    Choice, ColumnInfo, DeleteAction, InboundReference, IncludeDirection, IncludeSpec, PkType, ResolvedEntity,
    ResolvedModel, ResolvedRoleGuard,
};
use crate::config::types::*;
use crate::config::{default_schema_id, validate, FullConfig};
use crate::error::ConfigError;
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// Columns every table gets from migration; never writable through the API.
pub const AUDIT_COLUMNS: &[&str] = &["created_at", "updated_at"];

/// Quote an identifier for PostgreSQL.
pub fn quote_ident(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

/// Build resolved model from full config (validates first).
pub fn resolve(config: &FullConfig) -> Result<ResolvedModel, ConfigError> {
    validate(config)?;
    let default_sid = default_schema_id(config)?;

    let schemas_by_id: HashMap<_, _> = config.schemas.iter().map(|s| (s.id.as_str(), s)).collect();
    let tables_by_id: HashMap<_, _> = config.tables.iter().map(|t| (t.id.as_str(), t)).collect();
    let columns_by_table: HashMap<_, Vec<&ColumnConfig>> = config
        .columns
        .iter()
        .fold(HashMap::new(), |mut m, c| {
            m.entry(c.table_id.as_str()).or_default().push(c);
            m
        });
    let column_id_to_name: HashMap<&str, &str> = config.columns.iter().map(|c| (c.id.as_str(), c.name.as_str())).collect();
    let table_id_to_path: HashMap<&str, &str> = config
        .api_entities
        .iter()
        .map(|api| (api.entity_id.as_str(), api.path_segment.as_str()))
        .collect();
    let default_schema = schemas_by_id
        .get(default_sid)
        .map(|s| s.name.as_str())
        .unwrap_or("public");

    let mut entities = Vec::new();
    let mut entity_by_path = HashMap::new();

    for api in &config.api_entities {
        let table = tables_by_id
            .get(api.entity_id.as_str())
            .ok_or_else(|| ConfigError::MissingReference {
                kind: "table",
                id: api.entity_id.clone(),
            })?;
        let table_sid = table.schema_id.as_deref().unwrap_or(default_sid);
        let schema = schemas_by_id
            .get(table_sid)
            .ok_or_else(|| ConfigError::MissingReference {
                kind: "schema",
                id: table_sid.to_string(),
            })?;
        let table_columns = columns_by_table
            .get(table.id.as_str())
            .map(|v| v.as_slice())
            .unwrap_or(&[]);

        let pk_names: Vec<String> = table.primary_key.columns().into_iter().map(str::to_string).collect();
        let pk_first = pk_names.first().map(String::as_str).unwrap_or_default();
        let pk_col = table_columns
            .iter()
            .find(|c| c.name == pk_first)
            .ok_or_else(|| ConfigError::InvalidPrimaryKey {
                table_id: table.id.clone(),
                column: pk_first.to_string(),
            })?;
        let pk_type = infer_pk_type(pk_col);

        let mut columns: Vec<ColumnInfo> = table_columns
            .iter()
            .map(|c| {
                let is_pk = pk_names.contains(&c.name);
                let enum_cfg = config.enum_by_name(c.type_.base_name());
                ColumnInfo {
                    name: c.name.clone(),
                    pk_type: if is_pk { Some(pk_type.clone()) } else { None },
                    nullable: c.nullable,
                    has_default: c.default.is_some() || is_serial(&c.type_),
                    pg_type: Some(column_pg_type_name(&c.type_, enum_cfg, default_schema)),
                    choices: enum_cfg
                        .map(|e| {
                            e.values
                                .iter()
                                .map(|v| Choice {
                                    value: v.clone(),
                                    label: e.label_for(v).to_string(),
                                })
                                .collect()
                        })
                        .unwrap_or_default(),
                }
            })
            .collect();

        let config_col_names: HashSet<String> = columns.iter().map(|c| c.name.clone()).collect();
        for name in AUDIT_COLUMNS {
            if !config_col_names.contains(*name) {
                columns.push(ColumnInfo {
                    name: name.to_string(),
                    pk_type: None,
                    nullable: false,
                    has_default: true,
                    pg_type: Some("timestamptz".into()),
                    choices: Vec::new(),
                });
            }
        }

        let mut read_only_columns: HashSet<String> = api.read_only_columns.iter().cloned().collect();
        read_only_columns.extend(pk_names.iter().cloned());
        read_only_columns.extend(AUDIT_COLUMNS.iter().map(|s| s.to_string()));

        let validation = derive_validation(table_columns, &columns, &pk_names, &api.validation);
        let includes = build_includes_for_table(
            &table.id,
            &config.relationships,
            &column_id_to_name,
            &table_id_to_path,
        );
        let inbound = config
            .relationships
            .iter()
            .filter(|r| r.to_table_id == table.id)
            .filter_map(|r| {
                Some(InboundReference {
                    from_path_segment: table_id_to_path.get(r.from_table_id.as_str())?.to_string(),
                    from_column: column_id_to_name.get(r.from_column_id.as_str())?.to_string(),
                    on_delete: DeleteAction::parse(r.on_delete.as_deref()),
                })
            })
            .collect();
        let role_guards = api
            .role_guards
            .iter()
            .map(|g| {
                let target = table_id_to_path
                    .get(g.table_id.as_str())
                    .ok_or_else(|| ConfigError::MissingReference {
                        kind: "api entity",
                        id: g.table_id.clone(),
                    })?;
                Ok(ResolvedRoleGuard::from_config(g, target.to_string()))
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;
        let label = api
            .label
            .as_ref()
            .map(|l| l.replace("{schema}", &quote_ident(&schema.name)));

        let entity = ResolvedEntity {
            table_id: table.id.clone(),
            schema_name: schema.name.clone(),
            table_name: table.name.clone(),
            path_segment: api.path_segment.clone(),
            pk_columns: pk_names.clone(),
            pk_type: pk_type.clone(),
            columns,
            operations: api.operations.clone(),
            label,
            sensitive_columns: api.sensitive_columns.iter().cloned().collect(),
            hashed_columns: api.hashed_columns.iter().cloned().collect(),
            read_only_columns,
            includes,
            inbound,
            role_guards,
            validation,
        };
        entity_by_path.insert(api.path_segment.clone(), entity.clone());
        entities.push(entity);
    }

    Ok(ResolvedModel {
        entities,
        entity_by_path,
    })
}

/// Merge configured rules with what the column definitions already imply:
/// NOT NULL without default is required, varchar(n) caps length, enum columns only accept their values.
fn derive_validation(
    table_columns: &[&ColumnConfig],
    resolved: &[ColumnInfo],
    pk_names: &[String],
    configured: &HashMap<String, ValidationRule>,
) -> HashMap<String, ValidationRule> {
    let mut rules = configured.clone();
    for c in table_columns {
        if pk_names.contains(&c.name) {
            continue;
        }
        let rule = rules.entry(c.name.clone()).or_default();
        if !c.nullable && c.default.is_none() && rule.required.is_none() {
            rule.required = Some(true);
        }
        if rule.max_length.is_none() && matches!(c.type_.base_name(), "varchar" | "character varying") {
            rule.max_length = c.type_.params().first().copied();
        }
        if rule.allowed.is_none() {
            if let Some(info) = resolved.iter().find(|r| r.name == c.name && r.is_enum()) {
                rule.allowed = Some(
                    info.choices
                        .iter()
                        .map(|ch| serde_json::Value::String(ch.value.clone()))
                        .collect(),
                );
            }
        }
    }
    rules.retain(|_, r| !is_empty_rule(r));
    rules
}

fn is_empty_rule(r: &ValidationRule) -> bool {
    r.required.is_none()
        && r.format.is_none()
        && r.max_length.is_none()
        && r.min_length.is_none()
        && r.pattern.is_none()
        && r.allowed.is_none()
        && r.minimum.is_none()
        && r.maximum.is_none()
}

fn build_includes_for_table(
    our_table_id: &str,
    relationships: &[RelationshipConfig],
    column_id_to_name: &HashMap<&str, &str>,
    table_id_to_path: &HashMap<&str, &str>,
) -> Vec<IncludeSpec> {
    let mut includes: Vec<IncludeSpec> = Vec::new();
    for rel in relationships {
        let from_col = column_id_to_name.get(rel.from_column_id.as_str()).map(|s| s.to_string());
        let to_col = column_id_to_name.get(rel.to_column_id.as_str()).map(|s| s.to_string());
        let from_path = table_id_to_path.get(rel.from_table_id.as_str()).map(|s| s.to_string());
        let to_path = table_id_to_path.get(rel.to_table_id.as_str()).map(|s| s.to_string());
        if let (Some(our_key), Some(their_key), Some(related_path)) = (from_col.clone(), to_col.clone(), to_path) {
            if rel.from_table_id == our_table_id {
                includes.push(IncludeSpec {
                    name: our_key.strip_suffix("_id").unwrap_or(&our_key).to_string(),
                    direction: IncludeDirection::ToOne,
                    related_path_segment: related_path,
                    our_key_column: our_key,
                    their_key_column: their_key,
                });
            }
        }
        if let (Some(our_key), Some(their_key), Some(related_path)) = (to_col, from_col, from_path) {
            if rel.to_table_id == our_table_id {
                let mut name = related_path.clone();
                if includes.iter().any(|i| i.name == name) {
                    name = format!("{}_{}", related_path, their_key.strip_suffix("_id").unwrap_or(&their_key));
                }
                includes.push(IncludeSpec {
                    name,
                    direction: IncludeDirection::ToMany,
                    related_path_segment: related_path,
                    our_key_column: our_key,
                    their_key_column: their_key,
                });
            }
        }
    }
    includes
}

fn is_serial(ty: &ColumnTypeConfig) -> bool {
    ty.base_name().to_lowercase().contains("serial")
}

/// Type used to cast bound text parameters. Serial types cast to their integer width;
/// enum columns cast to the schema-qualified enum type.
fn column_pg_type_name(ty: &ColumnTypeConfig, enum_cfg: Option<&EnumConfig>, schema: &str) -> String {
    if let Some(e) = enum_cfg {
        return format!("{}.{}", quote_ident(schema), quote_ident(&e.name));
    }
    let lower = ty.base_name().to_lowercase();
    match lower.as_str() {
        "bigserial" | "serial8" => "bigint".into(),
        "serial" | "serial4" => "integer".into(),
        "smallserial" | "serial2" => "smallint".into(),
        "timestamp with time zone" => "timestamptz".into(),
        "character varying" => "varchar".into(),
        _ => lower,
    }
}

fn infer_pk_type(col: &ColumnConfig) -> PkType {
    let type_lower = col.type_.base_name().to_lowercase();
    if type_lower.contains("uuid") {
        PkType::Uuid
    } else if type_lower.contains("bigserial") || type_lower.contains("bigint") {
        PkType::BigInt
    } else if type_lower.contains("serial") || type_lower.contains("int") {
        PkType::Int
    } else {
        PkType::Text
    }
}

/// Retarget the catalog at another PostgreSQL schema. Only the name changes; ids stay stable.
pub fn with_schema_name(mut config: FullConfig, name: &str) -> FullConfig {
    if let Some(s) = config.schemas.first_mut() {
        s.name = name.to_string();
    }
    config
}

/// Load the catalog from `dir`, which holds schemas.json, enums.json, tables.json, columns.json,
/// indexes.json, relationships.json and api_entities.json. indexes.json and enums.json may be absent.
pub async fn load_from_dir(dir: &Path) -> Result<FullConfig, ConfigError> {
    async fn read(dir: &Path, file: &str, optional: bool) -> Result<String, ConfigError> {
        match tokio::fs::read_to_string(dir.join(file)).await {
            Ok(s) => Ok(s),
            Err(e) if optional && e.kind() == std::io::ErrorKind::NotFound => Ok("[]".into()),
            Err(e) => Err(ConfigError::Load(format!("{}: {}", dir.join(file).display(), e))),
        }
    }
    tracing::info!(dir = %dir.display(), "loading catalog");
    parse_catalog(CatalogSources {
        schemas: &read(dir, "schemas.json", false).await?,
        enums: &read(dir, "enums.json", true).await?,
        tables: &read(dir, "tables.json", false).await?,
        columns: &read(dir, "columns.json", false).await?,
        indexes: &read(dir, "indexes.json", true).await?,
        relationships: &read(dir, "relationships.json", false).await?,
        api_entities: &read(dir, "api_entities.json", false).await?,
    })
}

/// Raw JSON text of each catalog file.
pub struct CatalogSources<'a> {
    pub schemas: &'a str,
    pub enums: &'a str,
    pub tables: &'a str,
    pub columns: &'a str,
    pub indexes: &'a str,
    pub relationships: &'a str,
    pub api_entities: &'a str,
}

pub fn parse_catalog(src: CatalogSources<'_>) -> Result<FullConfig, ConfigError> {
    fn parse<T: serde::de::DeserializeOwned>(file: &str, text: &str) -> Result<Vec<T>, ConfigError> {
        serde_json::from_str(text).map_err(|e| ConfigError::Load(format!("{}: {}", file, e)))
    }
    Ok(FullConfig {
        schemas: parse("schemas.json", src.schemas)?,
        enums: parse("enums.json", src.enums)?,
        tables: parse("tables.json", src.tables)?,
        columns: parse("columns.json", src.columns)?,
        indexes: parse("indexes.json", src.indexes)?,
        relationships: parse("relationships.json", src.relationships)?,
        api_entities: parse("api_entities.json", src.api_entities)?,
    })
}
