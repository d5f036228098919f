//! Resolved entity model: catalog validated and flattened for runtime use.

use crate::config::{RoleGuardConfig, ValidationRule};
use serde::Serialize;
use std::collections::{HashMap, HashSet};

/// Direction of a related-include: to_one (we have FK to them) or to_many (they have FK to us).
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IncludeDirection {
    ToOne,
    ToMany,
}

/// Spec for including a related entity in list/read responses. To-one includes are named after the FK
/// column without its `_id` suffix (`professor`); to-many includes after the related path segment (`matricula`).
#[derive(Clone, Debug, Serialize)]
pub struct IncludeSpec {
    pub name: String,
    pub direction: IncludeDirection,
    pub related_path_segment: String,
    /// Our column used in the join (our FK for to_one; our PK for to_many).
    pub our_key_column: String,
    /// Their column used in the join (their PK for to_one; their FK for to_many).
    pub their_key_column: String,
}

/// What the database does to a referencing row when the referenced row is deleted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteAction {
    Cascade,
    SetNull,
    Restrict,
}

impl DeleteAction {
    pub fn parse(s: Option<&str>) -> Self {
        match s.map(|s| s.to_uppercase()).as_deref() {
            Some("CASCADE") => DeleteAction::Cascade,
            Some("SET NULL") => DeleteAction::SetNull,
            _ => DeleteAction::Restrict,
        }
    }
}

/// An inbound foreign key: rows of `from_path_segment` reference this entity through `from_column`.
#[derive(Clone, Debug, Serialize)]
pub struct InboundReference {
    pub from_path_segment: String,
    pub from_column: String,
    pub on_delete: DeleteAction,
}

/// Primary key type for parsing path/body ids.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PkType {
    Uuid,
    BigInt,
    Int,
    Text,
}

#[derive(Clone, Debug, Serialize)]
pub struct ColumnInfo {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pk_type: Option<PkType>,
    pub nullable: bool,
    /// Whether the column has a DB default (e.g. NOW(), CURRENT_DATE, an enum default).
    pub has_default: bool,
    /// PostgreSQL type used to cast bound text parameters (e.g. "bigint", "date", "\"academico\".\"papel\"").
    pub pg_type: Option<String>,
    /// Allowed values when the column is backed by a choice enumeration, with their labels.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub choices: Vec<Choice>,
}

impl ColumnInfo {
    pub fn is_enum(&self) -> bool {
        !self.choices.is_empty()
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct Choice {
    pub value: String,
    pub label: String,
}

#[derive(Clone, Debug)]
pub struct ResolvedEntity {
    pub table_id: String,
    pub schema_name: String,
    pub table_name: String,
    pub path_segment: String,
    pub pk_columns: Vec<String>,
    pub pk_type: PkType,
    pub columns: Vec<ColumnInfo>,
    pub operations: Vec<String>,
    /// SQL label expression with the schema substituted; refers to the row as `main`.
    pub label: Option<String>,
    /// Column names to strip from all API responses (sensitive data).
    pub sensitive_columns: HashSet<String>,
    pub hashed_columns: HashSet<String>,
    /// Columns the client may never write: primary key, audit timestamps and configured read-only columns.
    pub read_only_columns: HashSet<String>,
    /// Available includes (related entities) for ?include=name1,name2. Built from relationships.
    pub includes: Vec<IncludeSpec>,
    pub inbound: Vec<InboundReference>,
    pub role_guards: Vec<ResolvedRoleGuard>,
    pub validation: HashMap<String, ValidationRule>,
}

impl ResolvedEntity {
    pub fn allows(&self, operation: &str) -> bool {
        self.operations.iter().any(|o| o == operation)
    }

    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn pk(&self) -> &str {
        &self.pk_columns[0]
    }

    pub fn include(&self, name: &str) -> Option<&IncludeSpec> {
        self.includes.iter().find(|i| i.name == name)
    }
}

/// Role guard with the referenced table resolved to its entity path.
#[derive(Clone, Debug)]
pub struct ResolvedRoleGuard {
    pub column: String,
    pub target_path_segment: String,
    pub role_column: String,
    pub allowed: Vec<String>,
}

impl ResolvedRoleGuard {
    pub fn from_config(guard: &RoleGuardConfig, target_path_segment: String) -> Self {
        ResolvedRoleGuard {
            column: guard.column.clone(),
            target_path_segment,
            role_column: guard.role_column.clone(),
            allowed: guard.allowed.clone(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ResolvedModel {
    pub entities: Vec<ResolvedEntity>,
    pub entity_by_path: HashMap<String, ResolvedEntity>,
}

impl ResolvedModel {
    pub fn entity_by_path(&self, path: &str) -> Option<&ResolvedEntity> {
        self.entity_by_path.get(path)
    }

    /// Guards on other entities whose column points at `path` and checks `role_column`,
    /// as (referencing entity, guard) pairs.
    pub fn guards_targeting<'a>(
        &'a self,
        path: &'a str,
    ) -> impl Iterator<Item = (&'a ResolvedEntity, &'a ResolvedRoleGuard)> + 'a {
        self.entities.iter().flat_map(move |e| {
            e.role_guards
                .iter()
                .filter(move |g| g.target_path_segment == path)
                .map(move |g| (e, g))
        })
    }
}
