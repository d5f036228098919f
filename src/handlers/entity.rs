//! Entity CRUD handlers: create, read, update, delete, list, bulk, delete preview, catalog index.

use crate::config::{Choice, IncludeDirection, PkType, ResolvedEntity, ResolvedModel};
use crate::error::AppError;
use crate::extractors::{list_query::ISNULL_SUFFIX, ListQuery};
use crate::response::{created, created_all, listed, one};
use crate::service::{cascade_reach, preview_delete, CrudService, ListParams};
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;

fn parse_id(id_str: &str, pk_type: &PkType) -> Result<Value, AppError> {
    Ok(match pk_type {
        PkType::Uuid => {
            let u = uuid::Uuid::parse_str(id_str).map_err(|_| AppError::BadRequest("invalid uuid".into()))?;
            Value::String(u.to_string())
        }
        PkType::BigInt | PkType::Int => {
            let n: i64 = id_str.parse().map_err(|_| AppError::BadRequest(format!("invalid id '{}'", id_str)))?;
            Value::Number(n.into())
        }
        PkType::Text => Value::String(id_str.to_string()),
    })
}

fn body_to_map(value: Value) -> Result<HashMap<String, Value>, AppError> {
    match value {
        Value::Object(m) => Ok(m.into_iter().collect()),
        _ => Err(AppError::BadRequest("body must be a JSON object".into())),
    }
}

fn body_to_items(value: Value) -> Result<Vec<HashMap<String, Value>>, AppError> {
    match value {
        Value::Array(arr) => arr.into_iter().map(body_to_map).collect(),
        _ => Err(AppError::BadRequest("body must be a JSON array".into())),
    }
}

/// Resolve the entity and check the operation is registered for it.
fn entity_for<'a>(model: &'a ResolvedModel, path_segment: &str, operation: &str) -> Result<&'a ResolvedEntity, AppError> {
    let entity = model
        .entity_by_path(path_segment)
        .ok_or_else(|| AppError::NotFound(format!("entity {}", path_segment)))?;
    if !entity.allows(operation) {
        return Err(AppError::BadRequest(format!("{} not allowed on {}", operation, path_segment)));
    }
    Ok(entity)
}

/// Query filters become exact matches on known, non-sensitive columns. Values bind as text.
fn filters_for(entity: &ResolvedEntity, raw: Vec<(String, String)>) -> Result<Vec<(String, Value)>, AppError> {
    raw.into_iter()
        .map(|(key, v)| {
            let (col, value) = match key.strip_suffix(ISNULL_SUFFIX) {
                Some(col) => match v.as_str() {
                    "true" | "1" => (col.to_string(), Value::Null),
                    _ => {
                        return Err(AppError::BadRequest(format!(
                            "{} only supports true; filter by value instead",
                            key
                        )))
                    }
                },
                None => (key, Value::String(v)),
            };
            if entity.column(&col).is_none() || entity.sensitive_columns.contains(&col) {
                return Err(AppError::BadRequest(format!("cannot filter {} by {}", entity.path_segment, col)));
            }
            Ok((col, value))
        })
        .collect()
}

pub async fn list(
    State(state): State<AppState>,
    Path(path_segment): Path<String>,
    query: ListQuery,
) -> Result<impl IntoResponse, AppError> {
    let entity = entity_for(&state.model, &path_segment, "read")?;
    let params = ListParams {
        filters: filters_for(entity, query.filters)?,
        limit: query.limit,
        offset: query.offset,
        include: query.include,
    };
    let rows = CrudService::list(&state.pool, &state.model, entity, &params).await?;
    Ok(listed(rows))
}

pub async fn create(
    State(state): State<AppState>,
    Path(path_segment): Path<String>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, AppError> {
    let entity = entity_for(&state.model, &path_segment, "create")?;
    let body = body_to_map(body)?;
    let row = CrudService::create(&state.pool, &state.model, entity, body).await?;
    Ok(created(row))
}

pub async fn read(
    State(state): State<AppState>,
    Path((path_segment, id_str)): Path<(String, String)>,
    query: ListQuery,
) -> Result<impl IntoResponse, AppError> {
    let entity = entity_for(&state.model, &path_segment, "read")?;
    let id = parse_id(&id_str, &entity.pk_type)?;
    let row = CrudService::read(&state.pool, &state.model, entity, &id, &query.include)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("{} {}", path_segment, id_str)))?;
    Ok(one(row))
}

pub async fn update(
    State(state): State<AppState>,
    Path((path_segment, id_str)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, AppError> {
    let entity = entity_for(&state.model, &path_segment, "update")?;
    let id = parse_id(&id_str, &entity.pk_type)?;
    let body = body_to_map(body)?;
    let row = CrudService::update(&state.pool, &state.model, entity, &id, body)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("{} {}", path_segment, id_str)))?;
    Ok(one(row))
}

pub async fn delete(
    State(state): State<AppState>,
    Path((path_segment, id_str)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    let entity = entity_for(&state.model, &path_segment, "delete")?;
    let id = parse_id(&id_str, &entity.pk_type)?;
    CrudService::delete(&state.pool, entity, &id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("{} {}", path_segment, id_str)))?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn bulk_create(
    State(state): State<AppState>,
    Path(path_segment): Path<String>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, AppError> {
    let entity = entity_for(&state.model, &path_segment, "bulk_create")?;
    let items = body_to_items(body)?;
    let rows = CrudService::bulk_create(&state.pool, &state.model, entity, items).await?;
    Ok(created_all(rows))
}

pub async fn bulk_update(
    State(state): State<AppState>,
    Path(path_segment): Path<String>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, AppError> {
    let entity = entity_for(&state.model, &path_segment, "bulk_update")?;
    let items = body_to_items(body)?;
    let rows = CrudService::bulk_update(&state.pool, &state.model, entity, items).await?;
    Ok(listed(rows))
}

/// What deleting this row would take with it.
pub async fn dependents(
    State(state): State<AppState>,
    Path((path_segment, id_str)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    let entity = entity_for(&state.model, &path_segment, "delete")?;
    let id = parse_id(&id_str, &entity.pk_type)?;
    let id_num = id
        .as_i64()
        .ok_or_else(|| AppError::BadRequest(format!("delete preview needs an integer key on {}", path_segment)))?;
    CrudService::read(&state.pool, &state.model, entity, &id, &[])
        .await?
        .ok_or_else(|| AppError::NotFound(format!("{} {}", path_segment, id_str)))?;
    let mut conn = state.pool.acquire().await?;
    let preview = preview_delete(&mut *conn, &state.model, entity, id_num).await?;
    Ok(one(preview))
}

#[derive(Serialize)]
struct CatalogColumn {
    name: String,
    #[serde(rename = "type")]
    pg_type: Option<String>,
    nullable: bool,
    read_only: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    choices: Vec<Choice>,
}

#[derive(Serialize)]
struct CatalogInclude {
    name: String,
    direction: IncludeDirection,
    entity: String,
}

#[derive(Serialize)]
struct CatalogEntry {
    path_segment: String,
    table: String,
    operations: Vec<String>,
    columns: Vec<CatalogColumn>,
    includes: Vec<CatalogInclude>,
    cascades_to: Vec<String>,
}

fn catalog_entry(model: &ResolvedModel, entity: &ResolvedEntity) -> CatalogEntry {
    CatalogEntry {
        path_segment: entity.path_segment.clone(),
        table: format!("{}.{}", entity.schema_name, entity.table_name),
        operations: entity.operations.clone(),
        columns: entity
            .columns
            .iter()
            .filter(|c| !entity.sensitive_columns.contains(&c.name))
            .map(|c| CatalogColumn {
                name: c.name.clone(),
                pg_type: c.pg_type.clone(),
                nullable: c.nullable,
                read_only: entity.read_only_columns.contains(&c.name),
                choices: c.choices.clone(),
            })
            .collect(),
        includes: entity
            .includes
            .iter()
            .map(|i| CatalogInclude {
                name: i.name.clone(),
                direction: i.direction.clone(),
                entity: i.related_path_segment.clone(),
            })
            .collect(),
        cascades_to: cascade_reach(model, &entity.path_segment).into_iter().collect(),
    }
}

/// Admin index: every registered entity with its columns, choices and operations.
pub async fn catalog(State(state): State<AppState>) -> impl IntoResponse {
    let entries: Vec<CatalogEntry> = state
        .model
        .entities
        .iter()
        .map(|e| catalog_entry(&state.model, e))
        .collect();
    listed(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{catalog as builtin_catalog, resolve};

    fn pairs(raw: &[(&str, &str)]) -> Vec<(String, String)> {
        raw.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn filters_are_limited_to_visible_columns() {
        let model = resolve(&builtin_catalog::builtin().unwrap()).unwrap();
        let pessoa = model.entity_by_path("pessoa").unwrap();
        let filters = filters_for(pessoa, pairs(&[("papel", "professor"), ("unidade_id__isnull", "true")])).unwrap();
        assert_eq!(
            filters,
            vec![("papel".to_string(), Value::from("professor")), ("unidade_id".to_string(), Value::Null)]
        );
        assert!(filters_for(pessoa, pairs(&[("password", "x")])).is_err());
        assert!(filters_for(pessoa, pairs(&[("idade", "30")])).is_err());
        assert!(filters_for(pessoa, pairs(&[("unidade_id__isnull", "false")])).is_err());
    }

    #[test]
    fn ids_follow_key_type() {
        assert_eq!(parse_id("42", &PkType::BigInt).unwrap(), Value::from(42));
        assert!(parse_id("abc", &PkType::BigInt).is_err());
        assert_eq!(parse_id("abc", &PkType::Text).unwrap(), Value::from("abc"));
    }

    #[test]
    fn catalog_entry_hides_password_and_lists_choices() {
        let model = resolve(&builtin_catalog::builtin().unwrap()).unwrap();
        let pessoa = model.entity_by_path("pessoa").unwrap();
        let entry = serde_json::to_value(catalog_entry(&model, pessoa)).unwrap();
        let columns = entry["columns"].as_array().unwrap();
        assert!(columns.iter().all(|c| c["name"] != "password"));
        let papel = columns.iter().find(|c| c["name"] == "papel").unwrap();
        assert_eq!(papel["choices"].as_array().unwrap().len(), 3);
        let id = columns.iter().find(|c| c["name"] == "id").unwrap();
        assert_eq!(id["read_only"], true);
        assert_eq!(entry["table"], "academico.pessoa");
    }
}
