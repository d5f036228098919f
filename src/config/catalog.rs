//! The academic administration catalog shipped with the binary (`catalog/*.json`).

use crate::config::{parse_catalog, CatalogSources, FullConfig};
use crate::error::ConfigError;

pub fn builtin() -> Result<FullConfig, ConfigError> {
    parse_catalog(CatalogSources {
        schemas: include_str!("../../catalog/schemas.json"),
        enums: include_str!("../../catalog/enums.json"),
        tables: include_str!("../../catalog/tables.json"),
        columns: include_str!("../../catalog/columns.json"),
        indexes: include_str!("../../catalog/indexes.json"),
        relationships: include_str!("../../catalog/relationships.json"),
        api_entities: include_str!("../../catalog/api_entities.json"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table<'a>(config: &'a FullConfig, id: &str) -> &'a crate::config::TableConfig {
        config.tables.iter().find(|t| t.id == id).unwrap()
    }

    fn on_delete<'a>(config: &'a FullConfig, column_id: &str) -> &'a str {
        config
            .relationships
            .iter()
            .find(|r| r.from_column_id == column_id)
            .and_then(|r| r.on_delete.as_deref())
            .unwrap()
    }

    #[test]
    fn twelve_tables() {
        let config = builtin().unwrap();
        assert_eq!(config.tables.len(), 12);
        assert_eq!(config.api_entities.len(), 12);
        for t in &config.tables {
            assert!(t.comment.as_deref().is_some_and(|c| !c.is_empty()), "{} has no comment", t.id);
        }
    }

    #[test]
    fn uniqueness_constraints() {
        let config = builtin().unwrap();
        let pairs = |id: &str| table(&config, id).unique.clone();
        assert_eq!(pairs("unidade"), vec![vec!["nome".to_string()]]);
        assert!(pairs("departamento").contains(&vec!["nome".into(), "unidade_id".into()]));
        assert!(pairs("curso").contains(&vec!["nome".into(), "departamento_id".into()]));
        assert!(pairs("disciplina").contains(&vec!["nome".into(), "departamento_id".into()]));
        assert!(pairs("matricula").contains(&vec!["aluno_id".into(), "turma_id".into()]));
        assert!(pairs("nota").contains(&vec!["avaliacao_id".into(), "matricula_id".into()]));
        assert!(pairs("resultado_final").contains(&vec!["matricula_id".into()]));
        let pessoa = pairs("pessoa");
        for col in ["username", "numero_matricula", "numero_documento"] {
            assert!(pessoa.contains(&vec![col.to_string()]), "{}", col);
        }
    }

    #[test]
    fn professor_reference_is_nulled_everything_else_cascades() {
        let config = builtin().unwrap();
        assert_eq!(on_delete(&config, "turma.professor_id"), "SET NULL");
        for r in config.relationships.iter().filter(|r| r.from_column_id != "turma.professor_id") {
            assert_eq!(r.on_delete.as_deref(), Some("CASCADE"), "{}", r.id);
        }
        let professor = config.column_by_id("turma.professor_id").unwrap();
        assert!(professor.nullable);
        let unidade = config.column_by_id("pessoa.unidade_id").unwrap();
        assert!(unidade.nullable);
    }

    #[test]
    fn enum_defaults_match_their_values() {
        let config = builtin().unwrap();
        for c in &config.columns {
            let Some(e) = config.enum_by_name(c.type_.base_name()) else { continue };
            if let Some(d) = &c.default {
                let value = d.sql().trim_matches('\'');
                assert!(e.values.iter().any(|v| v == value), "{} default {}", c.id, value);
            }
        }
    }
}
