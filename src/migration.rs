//! Apply the catalog to the database: DDL for schemas, enums, tables, foreign keys and indexes.
//! Order follows PostgreSQL dependencies. Every statement is idempotent so startup can always run it.

use crate::config::types::*;
use crate::config::{default_schema_id, quote_ident as quote, validate, FullConfig, AUDIT_COLUMNS};
use crate::error::{AppError, ConfigError};
use sqlx::PgPool;
use std::collections::{HashMap, HashSet};

fn literal(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

fn missing(kind: &'static str, id: &str) -> ConfigError {
    ConfigError::MissingReference {
        kind,
        id: id.to_string(),
    }
}

/// Build the ordered DDL for `config`. Validates first.
pub fn migration_statements(config: &FullConfig) -> Result<Vec<String>, ConfigError> {
    validate(config)?;
    let default_sid = default_schema_id(config)?;

    let schemas_by_id: HashMap<_, _> = config.schemas.iter().map(|s| (s.id.as_str(), s)).collect();
    let tables_by_id: HashMap<_, _> = config.tables.iter().map(|t| (t.id.as_str(), t)).collect();
    let schema_name = |sid: Option<&str>| -> Result<String, ConfigError> {
        let sid = sid.unwrap_or(default_sid);
        schemas_by_id
            .get(sid)
            .map(|s| quote(&s.name))
            .ok_or_else(|| missing("schema", sid))
    };
    let enum_names: HashMap<&str, String> = config
        .enums
        .iter()
        .map(|e| Ok((e.name.as_str(), format!("{}.{}", schema_name(e.schema_id.as_deref())?, quote(&e.name)))))
        .collect::<Result<_, ConfigError>>()?;

    let mut out = Vec::new();

    for s in &config.schemas {
        out.push(format!("CREATE SCHEMA IF NOT EXISTS {}", quote(&s.name)));
        if let Some(c) = &s.comment {
            out.push(format!("COMMENT ON SCHEMA {} IS {}", quote(&s.name), literal(c)));
        }
    }

    for e in &config.enums {
        let values: Vec<String> = e.values.iter().map(|v| literal(v)).collect();
        out.push(format!(
            "DO $$ BEGIN CREATE TYPE {} AS ENUM ({}); EXCEPTION WHEN duplicate_object THEN NULL; END $$",
            enum_names[e.name.as_str()],
            values.join(", ")
        ));
    }

    for t in &config.tables {
        let full_name = format!("{}.{}", schema_name(t.schema_id.as_deref())?, quote(&t.name));
        let cols: Vec<&ColumnConfig> = config.columns_of(&t.id).collect();
        let mut col_defs: Vec<String> = Vec::new();
        for c in &cols {
            let typ = enum_names
                .get(c.type_.base_name())
                .cloned()
                .unwrap_or_else(|| type_str(&c.type_));
            let mut def = format!("{} {}", quote(&c.name), typ);
            if !c.nullable {
                def.push_str(" NOT NULL");
            }
            if let Some(d) = &c.default {
                def.push_str(" DEFAULT ");
                def.push_str(d.sql());
            }
            col_defs.push(def);
        }

        let config_col_names: HashSet<&str> = cols.iter().map(|c| c.name.as_str()).collect();
        for name in AUDIT_COLUMNS {
            if !config_col_names.contains(name) {
                col_defs.push(format!("{} TIMESTAMPTZ NOT NULL DEFAULT NOW()", quote(name)));
            }
        }

        let pk_cols: Vec<String> = t.primary_key.columns().into_iter().map(quote).collect();
        col_defs.push(format!("PRIMARY KEY ({})", pk_cols.join(", ")));

        for u in &t.unique {
            let cols: Vec<String> = u.iter().map(|s| quote(s)).collect();
            let name = format!("{}_{}_key", t.name, u.join("_"));
            col_defs.push(format!("CONSTRAINT {} UNIQUE ({})", quote(&name), cols.join(", ")));
        }
        for ch in &t.check {
            col_defs.push(format!("CONSTRAINT {} CHECK ({})", quote(&ch.name), ch.expression));
        }

        out.push(format!(
            "CREATE TABLE IF NOT EXISTS {} (\n  {}\n)",
            full_name,
            col_defs.join(",\n  ")
        ));
        if let Some(c) = &t.comment {
            out.push(format!("COMMENT ON TABLE {} IS {}", full_name, literal(c)));
        }
    }

    for rel in &config.relationships {
        let from_table = tables_by_id
            .get(rel.from_table_id.as_str())
            .ok_or_else(|| missing("table", &rel.from_table_id))?;
        let to_table = tables_by_id
            .get(rel.to_table_id.as_str())
            .ok_or_else(|| missing("table", &rel.to_table_id))?;
        let from_col = config
            .column_by_id(&rel.from_column_id)
            .ok_or_else(|| missing("column", &rel.from_column_id))?;
        let to_col = config
            .column_by_id(&rel.to_column_id)
            .ok_or_else(|| missing("column", &rel.to_column_id))?;

        let from_full = format!("{}.{}", schema_name(Some(&rel.from_schema_id))?, quote(&from_table.name));
        let to_full = format!("{}.{}", schema_name(Some(&rel.to_schema_id))?, quote(&to_table.name));
        let constraint_name = rel.name.as_deref().unwrap_or(&rel.id);
        let on_update = rel.on_update.as_deref().unwrap_or("NO ACTION").to_uppercase();
        let on_delete = rel.on_delete.as_deref().unwrap_or("NO ACTION").to_uppercase();

        out.push(format!(
            "DO $$ BEGIN ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({}) ON UPDATE {} ON DELETE {}; \
             EXCEPTION WHEN duplicate_object THEN NULL; END $$",
            from_full,
            quote(constraint_name),
            quote(&from_col.name),
            to_full,
            quote(&to_col.name),
            on_update,
            on_delete
        ));
    }

    for idx in &config.indexes {
        let table = tables_by_id
            .get(idx.table_id.as_str())
            .ok_or_else(|| missing("table", &idx.table_id))?;
        let full_table = format!("{}.{}", schema_name(idx.schema_id.as_deref())?, quote(&table.name));

        let mut col_parts: Vec<String> = Vec::new();
        for col in &idx.columns {
            match col {
                IndexColumnEntry::Name(n) => col_parts.push(quote(n)),
                IndexColumnEntry::Spec { name, direction, .. } => {
                    let dir = direction
                        .as_deref()
                        .map(|d| format!(" {}", d.to_uppercase()))
                        .unwrap_or_default();
                    col_parts.push(format!("{}{}", quote(name), dir));
                }
                IndexColumnEntry::Expression { expression } => col_parts.push(expression.clone()),
            }
        }
        let method = idx.method.as_deref().unwrap_or("btree");
        let unique = if idx.unique { "UNIQUE " } else { "" };
        let where_clause = idx
            .where_
            .as_ref()
            .map(|w| format!(" WHERE {}", w))
            .unwrap_or_default();
        // Index names are schema-scoped in PostgreSQL, so they are not qualified here.
        out.push(format!(
            "CREATE {}INDEX IF NOT EXISTS {} ON {} USING {} ({}){}",
            unique,
            quote(&idx.name),
            full_table,
            method,
            col_parts.join(", "),
            where_clause
        ));
    }

    Ok(out)
}

/// Apply the catalog in a single transaction.
pub async fn apply_migrations(pool: &PgPool, config: &FullConfig) -> Result<(), AppError> {
    let statements = migration_statements(config)?;
    let mut tx = pool.begin().await?;
    for sql in &statements {
        tracing::debug!(sql = %sql, "migration");
        sqlx::query(sql).execute(&mut *tx).await?;
    }
    tx.commit().await?;
    tracing::info!(
        statements = statements.len(),
        tables = config.tables.len(),
        "catalog migrations applied"
    );
    Ok(())
}

fn type_str(ty: &ColumnTypeConfig) -> String {
    let params = ty.params();
    if params.is_empty() {
        ty.base_name().to_string()
    } else {
        let p: Vec<String> = params.iter().map(|n| n.to_string()).collect();
        format!("{}({})", ty.base_name(), p.join(", "))
    }
}
