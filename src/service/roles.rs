//! Role-conditional reference checks.
//!
//! Students, professors and administrators share the `pessoa` table and are told apart by `papel`.
//! A guarded column (`turma.professor_id`, `matricula.aluno_id`) may only reference a pessoa whose
//! role is allowed, and a pessoa's role may not change while guarded rows still reference it.

use crate::config::{ResolvedEntity, ResolvedModel, ResolvedRoleGuard};
use crate::error::AppError;
use crate::service::crud::{id_to_string, pg_args};
use crate::sql::{count_where, lock_row, select_role};
use serde_json::Value;
use sqlx::PgConnection;
use std::collections::HashMap;

pub struct RoleGuard;

impl RoleGuard {
    /// Check every guarded column present in `body` against the referenced row's role.
    pub async fn check_references(
        conn: &mut PgConnection,
        model: &ResolvedModel,
        entity: &ResolvedEntity,
        body: &HashMap<String, Value>,
    ) -> Result<(), AppError> {
        for guard in &entity.role_guards {
            let Some(id) = body.get(&guard.column).filter(|v| !v.is_null()) else {
                continue;
            };
            let target = model
                .entity_by_path(&guard.target_path_segment)
                .ok_or_else(|| AppError::NotFound(guard.target_path_segment.clone()))?;
            let q = select_role(target, &guard.role_column, id);
            tracing::debug!(sql = %q.sql, params = ?q.params, "role lookup");
            let role: Option<String> = sqlx::query_scalar_with(&q.sql, pg_args(&q.params)?)
                .fetch_optional(&mut *conn)
                .await?;
            let role = role.ok_or_else(|| {
                AppError::Validation(format!(
                    "{}: {} {} does not exist",
                    guard.column,
                    target.path_segment,
                    id_to_string(id)
                ))
            })?;
            check_allowed(guard, &target.path_segment, id, &role)?;
        }
        Ok(())
    }

    /// Refuse to move a row out of a role that guarded rows still depend on.
    ///
    /// The row is locked before counting so a concurrent insert that read the old role
    /// either commits first and is counted, or waits and then sees the new role.
    pub async fn check_role_change(
        conn: &mut PgConnection,
        model: &ResolvedModel,
        entity: &ResolvedEntity,
        id: &Value,
        body: &HashMap<String, Value>,
    ) -> Result<(), AppError> {
        let leaving: Vec<_> = model
            .guards_targeting(&entity.path_segment)
            .filter(|(_, guard)| {
                body.get(&guard.role_column)
                    .and_then(Value::as_str)
                    .is_some_and(|new_role| !guard.allowed.iter().any(|r| r == new_role))
            })
            .collect();
        if leaving.is_empty() {
            return Ok(());
        }
        let lock = lock_row(entity, id);
        tracing::debug!(sql = %lock.sql, params = ?lock.params, "role change lock");
        let _: Option<i32> = sqlx::query_scalar_with(&lock.sql, pg_args(&lock.params)?)
            .fetch_optional(&mut *conn)
            .await?;

        for (referencing, guard) in leaving {
            let q = count_where(referencing, &guard.column, id);
            tracing::debug!(sql = %q.sql, params = ?q.params, "role reference count");
            let count: i64 = sqlx::query_scalar_with(&q.sql, pg_args(&q.params)?)
                .fetch_one(&mut *conn)
                .await?;
            if count > 0 {
                return Err(AppError::conflict(format!(
                    "{} {} is referenced by {} {} row(s) through {}; {} must stay one of: {}",
                    entity.path_segment,
                    id_to_string(id),
                    count,
                    referencing.path_segment,
                    guard.column,
                    guard.role_column,
                    guard.allowed.join(", ")
                )));
            }
        }
        Ok(())
    }
}

fn check_allowed(guard: &ResolvedRoleGuard, target: &str, id: &Value, role: &str) -> Result<(), AppError> {
    if guard.allowed.iter().any(|r| r == role) {
        return Ok(());
    }
    Err(AppError::Validation(format!(
        "{} must reference a {} with {} in [{}]; {} {} has {} '{}'",
        guard.column,
        target,
        guard.role_column,
        guard.allowed.join(", "),
        target,
        id_to_string(id),
        guard.role_column,
        role
    )))
}
