//! Resolve resource declarations and load them from a JSON file.

use crate::action::Action;
use crate::case::{to_camel_case, to_snake_case};
use crate::config::resolved::{ColumnInfo, ResolvedRelation, ResolvedResource};
use crate::config::types::*;
use crate::config::{id_path_params, validate, validate_resource};
use crate::error::ConfigError;
use crate::pluralize::pluralize;
use crate::reshape::RelationAlias;
use std::collections::HashMap;
use std::path::Path;

/// Build a resolved resource from its declaration (validates first).
pub fn resolve(config: &ResourceConfig) -> Result<ResolvedResource, ConfigError> {
    validate_resource(config)?;
    let base_key = to_camel_case(&config.name);

    let by_alias: HashMap<&str, &RelationConfig> =
        config.relations.iter().map(|r| (r.alias.as_str(), r)).collect();
    let mut relations = Vec::with_capacity(config.relations.len());
    for rel in &config.relations {
        let path = relation_path(rel, &by_alias)?;
        if let Some(parent) = rel.parent.as_deref().and_then(|p| by_alias.get(p)) {
            if parent.kind == RelationKind::Many {
                return Err(ConfigError::Validation(format!(
                    "relation '{}' cannot be joined through to-many relation '{}'",
                    rel.alias, parent.alias
                )));
            }
        }
        let mut columns = rel.columns.clone();
        if rel.kind == RelationKind::One && !columns.contains(&rel.foreign_column) {
            columns.insert(0, rel.foreign_column.clone());
        }
        relations.push(ResolvedRelation {
            alias: rel.alias.clone(),
            path,
            parent_alias: rel.parent.clone().unwrap_or_else(|| base_key.clone()),
            schema_name: rel.schema.clone().unwrap_or_else(|| config.schema.clone()),
            table_name: rel.table.clone(),
            kind: rel.kind,
            local_column: rel.local_column.clone(),
            foreign_column: rel.foreign_column.clone(),
            columns,
            element_relations: rel
                .element_relations
                .iter()
                .map(|el| RelationAlias {
                    path: vec![el.alias.clone()],
                    key_column: el.key_column.clone(),
                })
                .collect(),
        });
    }

    let includes = match &config.includes {
        Some(names) => parse_actions(names)?,
        None => Action::ALL.to_vec(),
    };
    let excludes = parse_actions(&config.excludes)?;

    Ok(ResolvedResource {
        name: config.name.clone(),
        plural: config.plural.clone().unwrap_or_else(|| pluralize(&config.name)),
        table_name: config.table.clone().unwrap_or_else(|| to_snake_case(&config.name)),
        base_key,
        schema_name: config.schema.clone(),
        primary_key: config.primary_key.clone(),
        id_path: config.id_path.clone(),
        id_params: id_path_params(&config.id_path),
        soft_delete_column: config.soft_delete_column.clone(),
        updated_at_column: config.updated_at_column.clone(),
        columns: config
            .columns
            .iter()
            .map(|c| ColumnInfo {
                name: c.name.clone(),
                pg_type: c.pg_type.clone(),
                nullable: c.nullable,
                has_default: c.has_default,
            })
            .collect(),
        relations,
        includes,
        excludes,
    })
}

/// Alias segments from the base down to `rel`, following parents. Rejects cycles.
fn relation_path(
    rel: &RelationConfig,
    by_alias: &HashMap<&str, &RelationConfig>,
) -> Result<Vec<String>, ConfigError> {
    let mut path = vec![rel.alias.clone()];
    let mut current = rel;
    while let Some(parent) = current.parent.as_deref() {
        if path.len() > by_alias.len() {
            return Err(ConfigError::Validation(format!(
                "relation '{}' has a cyclic parent chain",
                rel.alias
            )));
        }
        current = by_alias.get(parent).ok_or_else(|| ConfigError::MissingReference {
            kind: "relation parent",
            id: parent.to_string(),
        })?;
        path.insert(0, current.alias.clone());
    }
    Ok(path)
}

fn parse_actions(names: &[String]) -> Result<Vec<Action>, ConfigError> {
    names
        .iter()
        .map(|n| {
            n.parse::<Action>()
                .map_err(|_| ConfigError::Validation(format!("unknown action '{}'", n)))
        })
        .collect()
}

/// Resolve every resource of a full config.
pub fn resolve_all(config: &FullConfig) -> Result<Vec<ResolvedResource>, ConfigError> {
    validate(config)?;
    config.resources.iter().map(resolve).collect()
}

/// Load `{ "resources": [...] }` from a JSON file.
pub async fn load_from_path(path: impl AsRef<Path>) -> Result<FullConfig, ConfigError> {
    let path = path.as_ref();
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))?;
    let config: FullConfig =
        serde_json::from_str(&raw).map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))?;
    validate(&config)?;
    tracing::info!(path = %path.display(), resources = config.resources.len(), "loaded resource config");
    Ok(config)
}
