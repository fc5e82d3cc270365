//! Config validation: identifiers, references and duplicate names.

use crate::action::Action;
use crate::config::{FullConfig, RelationKind, ResourceConfig};
use crate::error::ConfigError;
use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

static IDENTIFIER: OnceLock<Option<Regex>> = OnceLock::new();

/// SQL identifier check applied to every name that ends up quoted in SQL.
pub fn is_identifier(s: &str) -> bool {
    IDENTIFIER
        .get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").ok())
        .as_ref()
        .is_some_and(|re| re.is_match(s))
}

fn check_identifier(kind: &'static str, value: &str) -> Result<(), ConfigError> {
    if is_identifier(value) {
        Ok(())
    } else {
        Err(ConfigError::InvalidIdentifier {
            kind,
            value: value.to_string(),
        })
    }
}

/// Alias-path segments are joined with '_', so they must not contain one.
fn check_segment(kind: &'static str, value: &str) -> Result<(), ConfigError> {
    check_identifier(kind, value)?;
    if value.contains('_') {
        return Err(ConfigError::Validation(format!(
            "{} '{}' must not contain '_'",
            kind, value
        )));
    }
    Ok(())
}

/// Parameter names of an id path template: ":orgId/:id" -> ["orgId", "id"].
pub fn id_path_params(id_path: &str) -> Vec<String> {
    id_path
        .split('/')
        .filter_map(|seg| seg.strip_prefix(':'))
        .map(str::to_string)
        .collect()
}

pub fn validate_resource(r: &ResourceConfig) -> Result<(), ConfigError> {
    check_segment("resource name", &crate::case::to_camel_case(&r.name))?;
    if let Some(t) = &r.table {
        check_identifier("table", t)?;
    }
    check_identifier("schema", &r.schema)?;
    check_identifier("primary key", &r.primary_key)?;
    check_identifier("soft delete column", &r.soft_delete_column)?;
    if let Some(c) = &r.updated_at_column {
        check_identifier("updated_at column", c)?;
    }

    let params = id_path_params(&r.id_path);
    if params.is_empty() {
        return Err(ConfigError::Validation(format!(
            "{}: id_path '{}' names no parameter",
            r.name, r.id_path
        )));
    }
    for p in &params {
        check_identifier("id path parameter", p)?;
    }

    let mut columns = HashSet::new();
    for c in &r.columns {
        check_identifier("column", &c.name)?;
        if !columns.insert(c.name.as_str()) {
            return Err(ConfigError::Duplicate {
                kind: "column",
                value: c.name.clone(),
            });
        }
    }
    if !columns.is_empty() {
        for required in [&r.primary_key, &r.soft_delete_column] {
            if !columns.contains(required.as_str()) {
                return Err(ConfigError::MissingReference {
                    kind: "column",
                    id: required.clone(),
                });
            }
        }
    }

    let aliases: HashSet<&str> = r.relations.iter().map(|rel| rel.alias.as_str()).collect();
    if aliases.len() != r.relations.len() {
        return Err(ConfigError::Duplicate {
            kind: "relation alias",
            value: r.name.clone(),
        });
    }
    for rel in &r.relations {
        check_segment("relation alias", &rel.alias)?;
        check_identifier("relation table", &rel.table)?;
        if let Some(s) = &rel.schema {
            check_identifier("relation schema", s)?;
        }
        check_identifier("relation column", &rel.local_column)?;
        check_identifier("relation column", &rel.foreign_column)?;
        for c in &rel.columns {
            check_identifier("relation column", c)?;
        }
        if !rel.element_relations.is_empty() && rel.kind != RelationKind::Many {
            return Err(ConfigError::Validation(format!(
                "relation '{}': element relations need a to-many relation",
                rel.alias
            )));
        }
        for el in &rel.element_relations {
            check_segment("element relation alias", &el.alias)?;
            check_identifier("element relation column", &el.key_column)?;
        }
        if let Some(parent) = &rel.parent {
            if !aliases.contains(parent.as_str()) {
                return Err(ConfigError::MissingReference {
                    kind: "relation parent",
                    id: parent.clone(),
                });
            }
        }
    }

    for name in r.includes.iter().flatten().chain(r.excludes.iter()) {
        name.parse::<Action>()
            .map_err(|_| ConfigError::Validation(format!("{}: unknown action '{}'", r.name, name)))?;
    }
    Ok(())
}

pub fn validate(config: &FullConfig) -> Result<(), ConfigError> {
    let mut names = HashSet::new();
    for r in &config.resources {
        validate_resource(r)?;
        if !names.insert(r.name.as_str()) {
            return Err(ConfigError::Duplicate {
                kind: "resource",
                value: r.name.clone(),
            });
        }
    }
    Ok(())
}
