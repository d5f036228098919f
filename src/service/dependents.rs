//! Delete preview: what a delete would remove, null out or be blocked by.
//!
//! Walks inbound foreign keys breadth-first from the row being deleted, following the
//! catalog's ON DELETE actions the same way PostgreSQL will when the DELETE runs.

use crate::config::{DeleteAction, PkType, ResolvedEntity, ResolvedModel};
use crate::error::AppError;
use crate::sql::select_ids_where_in;
use async_trait::async_trait;
use serde::Serialize;
use sqlx::PgConnection;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Lookup of rows that reference a set of parent ids.
#[async_trait]
pub trait ReferenceSource: Send {
    /// Primary keys of `entity` rows whose `column` is one of `ids`.
    async fn referencing_ids(
        &mut self,
        entity: &ResolvedEntity,
        column: &str,
        ids: &[i64],
    ) -> Result<Vec<i64>, AppError>;
}

#[async_trait]
impl ReferenceSource for PgConnection {
    async fn referencing_ids(
        &mut self,
        entity: &ResolvedEntity,
        column: &str,
        ids: &[i64],
    ) -> Result<Vec<i64>, AppError> {
        let sql = select_ids_where_in(entity, column);
        tracing::debug!(sql = %sql, count = ids.len(), "referencing ids");
        let found: Vec<i64> = sqlx::query_scalar(&sql).bind(ids).fetch_all(&mut *self).await?;
        Ok(found)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AffectedRows {
    pub entity: String,
    pub count: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AffectedReferences {
    pub entity: String,
    pub column: String,
    pub count: usize,
}

#[derive(Clone, Debug, Serialize)]
pub struct DeletePreview {
    pub entity: String,
    pub id: i64,
    /// Rows removed, including the row itself.
    pub deleted: Vec<AffectedRows>,
    /// References set to NULL on rows that survive the delete.
    pub nulled: Vec<AffectedReferences>,
    /// RESTRICT references that would make the delete fail.
    pub blocked_by: Vec<AffectedReferences>,
}

impl DeletePreview {
    pub fn is_blocked(&self) -> bool {
        !self.blocked_by.is_empty()
    }
}

/// Compute the effect of deleting `entity` row `id`.
pub async fn preview_delete<S>(
    source: &mut S,
    model: &ResolvedModel,
    entity: &ResolvedEntity,
    id: i64,
) -> Result<DeletePreview, AppError>
where
    S: ReferenceSource + ?Sized,
{
    if !matches!(entity.pk_type, PkType::BigInt | PkType::Int) {
        return Err(AppError::BadRequest(format!(
            "delete preview needs an integer key on {}",
            entity.path_segment
        )));
    }
    let mut deleted: BTreeMap<String, BTreeSet<i64>> = BTreeMap::new();
    let mut nulled: BTreeMap<(String, String), BTreeSet<i64>> = BTreeMap::new();
    let mut blocked: BTreeMap<(String, String), BTreeSet<i64>> = BTreeMap::new();
    deleted.entry(entity.path_segment.clone()).or_default().insert(id);

    let mut queue = VecDeque::from([(entity.path_segment.clone(), vec![id])]);
    while let Some((path, ids)) = queue.pop_front() {
        let parent = lookup(model, &path)?;
        for reference in &parent.inbound {
            let child = lookup(model, &reference.from_path_segment)?;
            let found = source.referencing_ids(child, &reference.from_column, &ids).await?;
            if found.is_empty() {
                continue;
            }
            let key = (child.path_segment.clone(), reference.from_column.clone());
            match reference.on_delete {
                DeleteAction::Cascade => {
                    let seen = deleted.entry(child.path_segment.clone()).or_default();
                    let fresh: Vec<i64> = found.into_iter().filter(|i| seen.insert(*i)).collect();
                    if !fresh.is_empty() {
                        queue.push_back((child.path_segment.clone(), fresh));
                    }
                }
                DeleteAction::SetNull => nulled.entry(key).or_default().extend(found),
                DeleteAction::Restrict => blocked.entry(key).or_default().extend(found),
            }
        }
    }

    // Rows that go away through another path are neither nulled nor blocking.
    let survivors = |refs: BTreeMap<(String, String), BTreeSet<i64>>| -> Vec<AffectedReferences> {
        refs.into_iter()
            .filter_map(|((entity, column), ids)| {
                let gone = deleted.get(&entity);
                let count = ids.iter().filter(|i| gone.map_or(true, |g| !g.contains(i))).count();
                (count > 0).then_some(AffectedReferences { entity, column, count })
            })
            .collect()
    };
    let nulled = survivors(nulled);
    let blocked_by = survivors(blocked);

    Ok(DeletePreview {
        entity: entity.path_segment.clone(),
        id,
        deleted: deleted
            .iter()
            .map(|(entity, ids)| AffectedRows { entity: entity.clone(), count: ids.len() })
            .collect(),
        nulled,
        blocked_by,
    })
}

/// Entities a delete on `path` can cascade into, regardless of data.
pub fn cascade_reach(model: &ResolvedModel, path: &str) -> BTreeSet<String> {
    let mut reach = BTreeSet::new();
    let mut queue = VecDeque::from([path.to_string()]);
    while let Some(current) = queue.pop_front() {
        let Some(entity) = model.entity_by_path(&current) else { continue };
        for reference in &entity.inbound {
            if reference.on_delete == DeleteAction::Cascade
                && reference.from_path_segment != path
                && reach.insert(reference.from_path_segment.clone())
            {
                queue.push_back(reference.from_path_segment.clone());
            }
        }
    }
    reach
}

fn lookup<'a>(model: &'a ResolvedModel, path: &str) -> Result<&'a ResolvedEntity, AppError> {
    model
        .entity_by_path(path)
        .ok_or_else(|| AppError::NotFound(format!("entity {}", path)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{catalog, resolve};
    use std::collections::HashMap;

    /// Rows as (path, column) -> [(id, referenced id)].
    #[derive(Default)]
    struct FakeRows {
        refs: HashMap<(String, String), Vec<(i64, i64)>>,
    }

    impl FakeRows {
        fn row(mut self, path: &str, id: i64, column: &str, target: i64) -> Self {
            self.refs
                .entry((path.to_string(), column.to_string()))
                .or_default()
                .push((id, target));
            self
        }
    }

    #[async_trait]
    impl ReferenceSource for FakeRows {
        async fn referencing_ids(
            &mut self,
            entity: &ResolvedEntity,
            column: &str,
            ids: &[i64],
        ) -> Result<Vec<i64>, AppError> {
            Ok(self
                .refs
                .get(&(entity.path_segment.clone(), column.to_string()))
                .map(|rows| rows.iter().filter(|(_, t)| ids.contains(t)).map(|(id, _)| *id).collect())
                .unwrap_or_default())
        }
    }

    fn campus() -> FakeRows {
        FakeRows::default()
            .row("departamento", 10, "unidade_id", 1)
            .row("pessoa", 20, "unidade_id", 1)
            .row("pessoa", 21, "unidade_id", 1)
            .row("pessoa", 22, "unidade_id", 2)
            .row("curso", 30, "departamento_id", 10)
            .row("disciplina", 40, "departamento_id", 10)
            .row("turma", 50, "disciplina_id", 40)
            .row("turma", 50, "professor_id", 20)
            .row("turma", 50, "semestre_id", 60)
            .row("turma", 51, "professor_id", 22)
            .row("matricula", 70, "turma_id", 50)
            .row("matricula", 70, "aluno_id", 21)
            .row("frequencia", 80, "matricula_id", 70)
            .row("avaliacao", 90, "turma_id", 50)
            .row("nota", 100, "avaliacao_id", 90)
            .row("nota", 100, "matricula_id", 70)
            .row("resultadofinal", 110, "matricula_id", 70)
    }

    fn count(preview: &DeletePreview, path: &str) -> usize {
        preview.deleted.iter().find(|r| r.entity == path).map_or(0, |r| r.count)
    }

    #[tokio::test]
    async fn unit_delete_cascades_through_the_hierarchy() {
        let model = resolve(&catalog::builtin().unwrap()).unwrap();
        let unidade = model.entity_by_path("unidade").unwrap();
        let preview = preview_delete(&mut campus(), &model, unidade, 1).await.unwrap();
        for path in [
            "unidade", "departamento", "curso", "disciplina", "turma", "matricula",
            "frequencia", "avaliacao", "nota", "resultadofinal",
        ] {
            assert_eq!(count(&preview, path), 1, "{}", path);
        }
        assert_eq!(count(&preview, "pessoa"), 2);
        assert_eq!(count(&preview, "semestre"), 0);
        // turma 50 is deleted with its disciplina, so its professor reference is not reported
        assert!(preview.nulled.is_empty());
        assert!(!preview.is_blocked());
    }

    #[tokio::test]
    async fn professor_delete_nulls_class_reference() {
        let model = resolve(&catalog::builtin().unwrap()).unwrap();
        let pessoa = model.entity_by_path("pessoa").unwrap();
        let preview = preview_delete(&mut campus(), &model, pessoa, 22).await.unwrap();
        assert_eq!(count(&preview, "turma"), 0);
        assert_eq!(
            preview.nulled,
            vec![AffectedReferences { entity: "turma".into(), column: "professor_id".into(), count: 1 }]
        );
    }

    #[tokio::test]
    async fn student_delete_removes_enrollment_records() {
        let model = resolve(&catalog::builtin().unwrap()).unwrap();
        let pessoa = model.entity_by_path("pessoa").unwrap();
        let preview = preview_delete(&mut campus(), &model, pessoa, 21).await.unwrap();
        for path in ["pessoa", "matricula", "frequencia", "nota", "resultadofinal"] {
            assert_eq!(count(&preview, path), 1, "{}", path);
        }
        assert_eq!(count(&preview, "turma"), 0);
    }

    #[test]
    fn cascade_reach_follows_only_cascading_keys() {
        let model = resolve(&catalog::builtin().unwrap()).unwrap();
        let from_unit = cascade_reach(&model, "unidade");
        assert_eq!(from_unit.len(), 10);
        assert!(!from_unit.contains("semestre"));
        let from_person: Vec<_> = cascade_reach(&model, "pessoa").into_iter().collect();
        assert_eq!(from_person, vec!["frequencia", "matricula", "nota", "resultadofinal"]);
        assert!(cascade_reach(&model, "nota").is_empty());
    }
}
