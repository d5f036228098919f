//! Generic CRUD execution against PostgreSQL.

use crate::config::{ResolvedEntity, ResolvedModel};
use crate::error::AppError;
use crate::service::credentials::hash_password;
use crate::service::roles::RoleGuard;
use crate::service::validation::RequestValidator;
use crate::sql::{delete, insert, select_by_id, select_list, update, IncludeSelect, PgBindValue, QueryBuf};
use serde_json::Value;
use sqlx::postgres::PgArguments;
use sqlx::{Arguments, PgConnection, PgPool};
use std::collections::HashMap;

const DEFAULT_LIMIT: u32 = 100;
const MAX_LIMIT: u32 = 1000;
const BULK_LIMIT: usize = 100;

/// Bind JSON params as text arguments, in order.
pub(crate) fn pg_args(params: &[Value]) -> Result<PgArguments, AppError> {
    let mut args = PgArguments::default();
    for p in params {
        args.add(PgBindValue::from_json(p))
            .map_err(|e| AppError::BadRequest(format!("cannot bind parameter: {}", e)))?;
    }
    Ok(args)
}

pub(crate) fn id_to_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Query-string options for list.
#[derive(Clone, Debug, Default)]
pub struct ListParams {
    /// Exact-match filters; a JSON null filters with IS NULL.
    pub filters: Vec<(String, Value)>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    /// Names of related entities to embed (see `ResolvedEntity::includes`).
    pub include: Vec<String>,
}

pub struct CrudService;

impl CrudService {
    /// List rows with optional filters (exact match), limit (default 100, max 1000), offset (default 0) and includes.
    pub async fn list(
        pool: &PgPool,
        model: &ResolvedModel,
        entity: &ResolvedEntity,
        params: &ListParams,
    ) -> Result<Vec<Value>, AppError> {
        let limit = params.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);
        let offset = params.offset.unwrap_or(0);
        let includes = include_selects(model, entity, &params.include)?;
        let q = select_list(entity, &params.filters, Some(limit), Some(offset), &includes);
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        let rows = sqlx::query_with(&q.sql, pg_args(&q.params)?).fetch_all(pool).await?;
        Ok(rows.iter().map(row_to_json).collect())
    }

    /// Fetch one row by primary key. Returns JSON object or None.
    pub async fn read(
        pool: &PgPool,
        model: &ResolvedModel,
        entity: &ResolvedEntity,
        id: &Value,
        include: &[String],
    ) -> Result<Option<Value>, AppError> {
        let includes = include_selects(model, entity, include)?;
        let q = select_by_id(entity, id, &includes);
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        let row = sqlx::query_with(&q.sql, pg_args(&q.params)?)
            .fetch_optional(pool)
            .await?;
        Ok(row.as_ref().map(row_to_json))
    }

    /// Validate and insert one row. Returns the created row.
    pub async fn create(
        pool: &PgPool,
        model: &ResolvedModel,
        entity: &ResolvedEntity,
        body: HashMap<String, Value>,
    ) -> Result<Value, AppError> {
        let body = prepare_create(entity, body)?;
        let mut tx = pool.begin().await?;
        let row = Self::create_in(&mut tx, model, entity, &body).await?;
        tx.commit().await?;
        tracing::info!(entity = %entity.path_segment, id = %row_id(entity, &row), "created");
        Ok(row)
    }

    /// Validate and apply a partial update by id. Returns the updated row, or None when no row has that id.
    pub async fn update(
        pool: &PgPool,
        model: &ResolvedModel,
        entity: &ResolvedEntity,
        id: &Value,
        body: HashMap<String, Value>,
    ) -> Result<Option<Value>, AppError> {
        let body = prepare_update(entity, body)?;
        let mut tx = pool.begin().await?;
        let row = Self::update_in(&mut tx, model, entity, id, &body).await?;
        tx.commit().await?;
        if row.is_some() {
            tracing::info!(entity = %entity.path_segment, id = %id_to_string(id), "updated");
        }
        Ok(row)
    }

    /// Delete one row by id; dependent rows follow the catalog's ON DELETE actions. Returns the deleted row or None.
    pub async fn delete(pool: &PgPool, entity: &ResolvedEntity, id: &Value) -> Result<Option<Value>, AppError> {
        let q = delete(entity, id);
        let mut conn = pool.acquire().await?;
        let row = Self::fetch_optional(&mut conn, &q).await?;
        if row.is_some() {
            tracing::info!(entity = %entity.path_segment, id = %id_to_string(id), "deleted");
        }
        Ok(row)
    }

    /// Bulk create in a transaction. Returns vec of created rows.
    pub async fn bulk_create(
        pool: &PgPool,
        model: &ResolvedModel,
        entity: &ResolvedEntity,
        items: Vec<HashMap<String, Value>>,
    ) -> Result<Vec<Value>, AppError> {
        if items.len() > BULK_LIMIT {
            return Err(AppError::BadRequest(format!(
                "bulk create limited to {} items",
                BULK_LIMIT
            )));
        }
        let items = items
            .into_iter()
            .map(|body| prepare_create(entity, body))
            .collect::<Result<Vec<_>, _>>()?;
        let mut out = Vec::with_capacity(items.len());
        let mut tx = pool.begin().await?;
        for body in &items {
            out.push(Self::create_in(&mut tx, model, entity, body).await?);
        }
        tx.commit().await?;
        tracing::info!(entity = %entity.path_segment, count = out.len(), "bulk created");
        Ok(out)
    }

    /// Bulk update in a transaction. Each item must carry the primary key. Returns vec of updated rows.
    pub async fn bulk_update(
        pool: &PgPool,
        model: &ResolvedModel,
        entity: &ResolvedEntity,
        items: Vec<HashMap<String, Value>>,
    ) -> Result<Vec<Value>, AppError> {
        if items.len() > BULK_LIMIT {
            return Err(AppError::BadRequest(format!(
                "bulk update limited to {} items",
                BULK_LIMIT
            )));
        }
        let pk = entity.pk();
        let items = items
            .into_iter()
            .map(|mut body| -> Result<(Value, HashMap<String, Value>), AppError> {
                let id = body
                    .remove(pk)
                    .filter(|v| !v.is_null())
                    .ok_or_else(|| AppError::Validation(format!("each item must have '{}'", pk)))?;
                Ok((id, prepare_update(entity, body)?))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let mut out = Vec::with_capacity(items.len());
        let mut tx = pool.begin().await?;
        for (id, body) in &items {
            let row = Self::update_in(&mut tx, model, entity, id, body)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("{} {}", entity.path_segment, id_to_string(id))))?;
            out.push(row);
        }
        tx.commit().await?;
        tracing::info!(entity = %entity.path_segment, count = out.len(), "bulk updated");
        Ok(out)
    }

    async fn create_in(
        conn: &mut PgConnection,
        model: &ResolvedModel,
        entity: &ResolvedEntity,
        body: &HashMap<String, Value>,
    ) -> Result<Value, AppError> {
        RoleGuard::check_references(conn, model, entity, body).await?;
        let q = insert(entity, body);
        let row = Self::fetch_optional(conn, &q)
            .await?
            .ok_or(AppError::Db(sqlx::Error::RowNotFound))?;
        Self::reselect(conn, entity, row).await
    }

    async fn update_in(
        conn: &mut PgConnection,
        model: &ResolvedModel,
        entity: &ResolvedEntity,
        id: &Value,
        body: &HashMap<String, Value>,
    ) -> Result<Option<Value>, AppError> {
        RoleGuard::check_references(conn, model, entity, body).await?;
        RoleGuard::check_role_change(conn, model, entity, id, body).await?;
        let q = update(entity, id, body);
        match Self::fetch_optional(conn, &q).await? {
            Some(row) => Self::reselect(conn, entity, row).await.map(Some),
            None => Ok(None),
        }
    }

    /// Labels computed in RETURNING see the statement's starting snapshot; read the row again for current ones.
    async fn reselect(conn: &mut PgConnection, entity: &ResolvedEntity, row: Value) -> Result<Value, AppError> {
        let Some(id) = row.get(entity.pk()).cloned() else {
            return Ok(row);
        };
        let q = select_by_id(entity, &id, &[]);
        Ok(Self::fetch_optional(conn, &q).await?.unwrap_or(row))
    }

    async fn fetch_optional(conn: &mut PgConnection, q: &QueryBuf) -> Result<Option<Value>, AppError> {
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        let row = sqlx::query_with(&q.sql, pg_args(&q.params)?)
            .fetch_optional(&mut *conn)
            .await?;
        Ok(row.as_ref().map(row_to_json))
    }
}

fn prepare_create(entity: &ResolvedEntity, body: HashMap<String, Value>) -> Result<HashMap<String, Value>, AppError> {
    RequestValidator::check_writable(entity, &body)?;
    RequestValidator::validate(&body, &entity.validation)?;
    hash_columns(entity, body)
}

fn prepare_update(entity: &ResolvedEntity, body: HashMap<String, Value>) -> Result<HashMap<String, Value>, AppError> {
    RequestValidator::check_writable(entity, &body)?;
    RequestValidator::validate_partial(&body, &entity.validation)?;
    hash_columns(entity, body)
}

fn hash_columns(entity: &ResolvedEntity, mut body: HashMap<String, Value>) -> Result<HashMap<String, Value>, AppError> {
    for col in &entity.hashed_columns {
        match body.get(col) {
            None | Some(Value::Null) => {}
            Some(Value::String(raw)) => {
                if raw.is_empty() {
                    return Err(AppError::Validation(format!("{} may not be blank", col)));
                }
                let hashed = hash_password(raw);
                body.insert(col.clone(), Value::String(hashed));
            }
            Some(_) => return Err(AppError::Validation(format!("{} must be a string", col))),
        }
    }
    Ok(body)
}

/// Resolve `?include=` names against the entity's relationships.
fn include_selects<'a>(
    model: &'a ResolvedModel,
    entity: &'a ResolvedEntity,
    names: &'a [String],
) -> Result<Vec<IncludeSelect<'a>>, AppError> {
    names
        .iter()
        .map(|name| {
            let spec = entity.include(name).ok_or_else(|| {
                AppError::BadRequest(format!(
                    "unknown include '{}' for {}; available: {}",
                    name,
                    entity.path_segment,
                    entity.includes.iter().map(|i| i.name.as_str()).collect::<Vec<_>>().join(", ")
                ))
            })?;
            let related = model
                .entity_by_path(&spec.related_path_segment)
                .ok_or_else(|| AppError::NotFound(spec.related_path_segment.clone()))?;
            Ok(IncludeSelect {
                name: spec.name.as_str(),
                direction: spec.direction.clone(),
                related,
                our_key: spec.our_key_column.as_str(),
                their_key: spec.their_key_column.as_str(),
            })
        })
        .collect()
}

fn row_id(entity: &ResolvedEntity, row: &Value) -> String {
    row.get(entity.pk()).map(id_to_string).unwrap_or_default()
}

fn row_to_json(row: &sqlx::postgres::PgRow) -> Value {
    use sqlx::Column;
    use sqlx::Row;
    let mut map = serde_json::Map::new();
    for col in row.columns() {
        let name = col.name();
        let v = cell_to_value(row, name);
        map.insert(name.to_string(), v);
    }
    Value::Object(map)
}

fn cell_to_value(row: &sqlx::postgres::PgRow, name: &str) -> Value {
    use sqlx::Row;
    if let Ok(Some(n)) = row.try_get::<Option<i16>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<i32>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<i64>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<f64>, _>(name) {
        if let Some(n) = serde_json::Number::from_f64(n) {
            return Value::Number(n);
        }
    }
    if let Ok(Some(b)) = row.try_get::<Option<bool>, _>(name) {
        return Value::Bool(b);
    }
    if let Ok(Some(u)) = row.try_get::<Option<uuid::Uuid>, _>(name) {
        return Value::String(u.to_string());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(name) {
        return Value::String(d.to_rfc3339());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::NaiveDateTime>, _>(name) {
        return Value::String(d.format("%Y-%m-%dT%H:%M:%S%.f").to_string());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::NaiveDate>, _>(name) {
        return Value::String(d.format("%Y-%m-%d").to_string());
    }
    if let Ok(Some(s)) = row.try_get::<Option<String>, _>(name) {
        return Value::String(s);
    }
    if let Ok(Some(j)) = row.try_get::<Option<Value>, _>(name) {
        return j;
    }
    Value::Null
}
