//! Builds parameterized INSERT, SELECT, UPDATE, DELETE from a resolved entity.
//! The entity's table is always aliased `main` so label expressions can refer to the row.

use crate::config::{quote_ident as quoted, ColumnInfo, IncludeDirection, ResolvedEntity};
use serde_json::Value;
use std::collections::HashMap;

const MAIN_ALIAS: &str = "main";

/// Key under which each row carries its display label.
pub const LABEL_KEY: &str = "_label";

/// Describes one include for a list/read query: name, direction, related entity, our key column, their key column.
pub struct IncludeSelect<'a> {
    pub name: &'a str,
    pub direction: IncludeDirection,
    pub related: &'a ResolvedEntity,
    pub our_key: &'a str,
    pub their_key: &'a str,
}

/// Full qualified table name.
fn qualified_table(entity: &ResolvedEntity) -> String {
    format!("{}.{}", quoted(&entity.schema_name), quoted(&entity.table_name))
}

#[derive(Debug)]
pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<Value>,
}

impl QueryBuf {
    fn new() -> Self {
        QueryBuf {
            sql: String::new(),
            params: Vec::new(),
        }
    }

    /// Push a parameter and return its placeholder, cast to the column type when known.
    fn push_param(&mut self, v: Value, col: Option<&ColumnInfo>) -> String {
        self.params.push(v);
        let n = self.params.len();
        match col.and_then(|c| c.pg_type.as_deref()) {
            Some(t) => format!("${}::{}", n, t),
            None => format!("${}", n),
        }
    }
}

/// Enum and numeric columns are selected as text so every value decodes without type-specific handling.
fn needs_text_cast(c: &ColumnInfo) -> bool {
    c.is_enum() || c.pg_type.as_deref() == Some("numeric")
}

/// SELECT list for `entity` aliased as `alias`: visible columns plus the label when configured.
/// Sensitive columns are never selected.
fn select_column_list(entity: &ResolvedEntity, alias: &str) -> String {
    let mut parts: Vec<String> = entity
        .columns
        .iter()
        .filter(|c| !entity.sensitive_columns.contains(&c.name))
        .map(|c| {
            let q = quoted(&c.name);
            if needs_text_cast(c) {
                format!("{}.{}::text AS {}", alias, q, q)
            } else {
                format!("{}.{}", alias, q)
            }
        })
        .collect();
    if let Some(label) = &entity.label {
        let label = if alias == MAIN_ALIAS {
            label.clone()
        } else {
            rebind_main(label, alias)
        };
        parts.push(format!("({})::text AS {}", label, quoted(LABEL_KEY)));
    }
    parts.join(", ")
}

/// Label expressions refer to their row as `main.`; inside include subqueries the row has another alias.
fn rebind_main(expr: &str, alias: &str) -> String {
    expr.replace("main.", &format!("{}.", alias))
}

/// SELECT by primary key (single column PK only).
pub fn select_by_id(entity: &ResolvedEntity, id: &Value, includes: &[IncludeSelect<'_>]) -> QueryBuf {
    let mut q = QueryBuf::new();
    let pk = entity.pk();
    let ph = q.push_param(id.clone(), entity.column(pk));
    let mut select_parts = vec![select_column_list(entity, MAIN_ALIAS)];
    select_parts.extend(includes.iter().enumerate().map(|(i, inc)| include_subquery(inc, i)));
    q.sql = format!(
        "SELECT {} FROM {} {} WHERE {}.{} = {}",
        select_parts.join(", "),
        qualified_table(entity),
        MAIN_ALIAS,
        MAIN_ALIAS,
        quoted(pk),
        ph
    );
    q
}

/// Scalar subquery for one include: row_to_json for to_one, json_agg for to_many.
fn include_subquery(inc: &IncludeSelect<'_>, index: usize) -> String {
    let alias = format!("inc{}", index);
    let rel_cols = select_column_list(inc.related, &alias);
    let sub_from = format!(
        "{} {} WHERE {}.{} = {}.{}",
        qualified_table(inc.related),
        alias,
        alias,
        quoted(inc.their_key),
        MAIN_ALIAS,
        quoted(inc.our_key)
    );
    let subquery = match inc.direction {
        IncludeDirection::ToOne => format!(
            "(SELECT row_to_json(sub) FROM (SELECT {} FROM {}) sub)",
            rel_cols, sub_from
        ),
        IncludeDirection::ToMany => format!(
            "(SELECT COALESCE(json_agg(row_to_json(sub)), '[]'::json) FROM (SELECT {} FROM {} ORDER BY {}.{}) sub)",
            rel_cols,
            sub_from,
            alias,
            quoted(inc.related.pk())
        ),
    };
    format!("{} AS {}", subquery, quoted(inc.name))
}

/// SELECT list with optional filters (exact match per column), ORDER BY pk, optional LIMIT/OFFSET and includes.
/// filters: only (col, value) where col is in entity.columns; params bound in filter order.
pub fn select_list(
    entity: &ResolvedEntity,
    filters: &[(String, Value)],
    limit: Option<u32>,
    offset: Option<u32>,
    includes: &[IncludeSelect<'_>],
) -> QueryBuf {
    let mut q = QueryBuf::new();
    let pk = entity.pk();

    let mut select_parts = vec![select_column_list(entity, MAIN_ALIAS)];
    select_parts.extend(includes.iter().enumerate().map(|(i, inc)| include_subquery(inc, i)));

    let mut where_parts = Vec::new();
    for (col, val) in filters {
        let Some(c) = entity.column(col) else { continue };
        if val.is_null() {
            where_parts.push(format!("{}.{} IS NULL", MAIN_ALIAS, quoted(col)));
        } else {
            let ph = q.push_param(val.clone(), Some(c));
            where_parts.push(format!("{}.{} = {}", MAIN_ALIAS, quoted(col), ph));
        }
    }
    let where_clause = if where_parts.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", where_parts.join(" AND "))
    };
    let order_clause = format!(" ORDER BY {}.{}", MAIN_ALIAS, quoted(pk));
    let limit_clause = limit.map(|n| format!(" LIMIT {}", n.min(1000))).unwrap_or_default();
    let offset_clause = offset.map(|n| format!(" OFFSET {}", n)).unwrap_or_default();

    q.sql = format!(
        "SELECT {} FROM {} {}{}{}{}{}",
        select_parts.join(", "),
        qualified_table(entity),
        MAIN_ALIAS,
        where_clause,
        order_clause,
        limit_clause,
        offset_clause
    );
    q
}

/// INSERT: columns and placeholders from entity; values from body.
/// Omits columns with a DB default (serial PK included) when body does not provide a value.
pub fn insert(entity: &ResolvedEntity, body: &HashMap<String, Value>) -> QueryBuf {
    let mut q = QueryBuf::new();
    let mut cols = Vec::new();
    let mut placeholders = Vec::new();
    for c in &entity.columns {
        let val = body.get(&c.name).cloned();
        if val.is_none() && c.has_default {
            continue;
        }
        let ph = q.push_param(val.unwrap_or(Value::Null), Some(c));
        cols.push(quoted(&c.name));
        placeholders.push(ph);
    }
    let values = if cols.is_empty() {
        " DEFAULT VALUES".to_string()
    } else {
        format!(" ({}) VALUES ({})", cols.join(", "), placeholders.join(", "))
    };
    q.sql = format!(
        "INSERT INTO {} AS {}{} RETURNING {}",
        qualified_table(entity),
        MAIN_ALIAS,
        values,
        select_column_list(entity, MAIN_ALIAS)
    );
    q
}

/// UPDATE by id: SET only columns present in body (and in entity columns), always bumping updated_at.
pub fn update(entity: &ResolvedEntity, id: &Value, body: &HashMap<String, Value>) -> QueryBuf {
    let mut q = QueryBuf::new();
    let pk = entity.pk();
    let mut keys: Vec<&String> = body.keys().collect();
    keys.sort();
    let mut sets = Vec::new();
    for k in keys {
        if k == pk || k == "updated_at" {
            continue;
        }
        let Some(c) = entity.column(k) else { continue };
        let ph = q.push_param(body[k].clone(), Some(c));
        sets.push(format!("{} = {}", quoted(k), ph));
    }
    if entity.column("updated_at").is_some() {
        sets.push(format!("{} = NOW()", quoted("updated_at")));
    }
    let id_ph = q.push_param(id.clone(), entity.column(pk));
    if sets.is_empty() {
        q.sql = format!(
            "SELECT {} FROM {} {} WHERE {}.{} = {}",
            select_column_list(entity, MAIN_ALIAS),
            qualified_table(entity),
            MAIN_ALIAS,
            MAIN_ALIAS,
            quoted(pk),
            id_ph
        );
        return q;
    }
    q.sql = format!(
        "UPDATE {} AS {} SET {} WHERE {}.{} = {} RETURNING {}",
        qualified_table(entity),
        MAIN_ALIAS,
        sets.join(", "),
        MAIN_ALIAS,
        quoted(pk),
        id_ph,
        select_column_list(entity, MAIN_ALIAS)
    );
    q
}

/// DELETE by id. Returns the row with the label computed before removal.
pub fn delete(entity: &ResolvedEntity, id: &Value) -> QueryBuf {
    let mut q = QueryBuf::new();
    let pk = entity.pk();
    let ph = q.push_param(id.clone(), entity.column(pk));
    q.sql = format!(
        "DELETE FROM {} AS {} WHERE {}.{} = {} RETURNING {}",
        qualified_table(entity),
        MAIN_ALIAS,
        MAIN_ALIAS,
        quoted(pk),
        ph,
        select_column_list(entity, MAIN_ALIAS)
    );
    q
}

/// Role of one row: `SELECT role_column::text FROM target WHERE pk = $1 FOR SHARE`.
/// The share lock holds the role steady until the referencing write commits.
pub fn select_role(target: &ResolvedEntity, role_column: &str, id: &Value) -> QueryBuf {
    let mut q = QueryBuf::new();
    let pk = target.pk();
    let ph = q.push_param(id.clone(), target.column(pk));
    q.sql = format!(
        "SELECT {}.{}::text FROM {} {} WHERE {}.{} = {} FOR SHARE",
        MAIN_ALIAS,
        quoted(role_column),
        qualified_table(target),
        MAIN_ALIAS,
        MAIN_ALIAS,
        quoted(pk),
        ph
    );
    q
}

/// Lock one row by primary key for the rest of the transaction.
pub fn lock_row(entity: &ResolvedEntity, id: &Value) -> QueryBuf {
    let mut q = QueryBuf::new();
    let pk = entity.pk();
    let ph = q.push_param(id.clone(), entity.column(pk));
    q.sql = format!(
        "SELECT 1 FROM {} {} WHERE {}.{} = {} FOR UPDATE",
        qualified_table(entity),
        MAIN_ALIAS,
        MAIN_ALIAS,
        quoted(pk),
        ph
    );
    q
}

/// Count rows of `entity` whose `column` equals the bound value.
pub fn count_where(entity: &ResolvedEntity, column: &str, value: &Value) -> QueryBuf {
    let mut q = QueryBuf::new();
    let ph = q.push_param(value.clone(), entity.column(column));
    q.sql = format!(
        "SELECT COUNT(*) FROM {} {} WHERE {}.{} = {}",
        qualified_table(entity),
        MAIN_ALIAS,
        MAIN_ALIAS,
        quoted(column),
        ph
    );
    q
}

/// Primary keys of rows whose `column` is in the bound `bigint[]`. Caller binds the id array as $1.
pub fn select_ids_where_in(entity: &ResolvedEntity, column: &str) -> String {
    format!(
        "SELECT {}.{}::bigint FROM {} {} WHERE {}.{} = ANY($1::bigint[])",
        MAIN_ALIAS,
        quoted(entity.pk()),
        qualified_table(entity),
        MAIN_ALIAS,
        MAIN_ALIAS,
        quoted(column)
    )
}
