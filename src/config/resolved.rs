//! Resolved resource: config validated and flattened for runtime use.

use crate::action::Action;
use crate::config::RelationKind;
use crate::reshape::{AliasMap, RelationAlias};

#[derive(Clone, Debug)]
pub struct ColumnInfo {
    pub name: String,
    pub pg_type: Option<String>,
    pub nullable: bool,
    pub has_default: bool,
}

#[derive(Clone, Debug)]
pub struct ResolvedRelation {
    pub alias: String,
    /// Alias segments from the base key down to this relation, e.g. ["owner", "company"].
    pub path: Vec<String>,
    /// SQL alias the join hangs off (the base key or the parent relation alias).
    pub parent_alias: String,
    pub schema_name: String,
    pub table_name: String,
    pub kind: RelationKind,
    pub local_column: String,
    pub foreign_column: String,
    pub columns: Vec<String>,
    /// `many` only: to-one relations nested inside each element.
    pub element_relations: Vec<RelationAlias>,
}

impl ResolvedRelation {
    /// Flat column alias for one of this relation's columns: `<baseKey>_<path>_<column>`.
    pub fn column_alias(&self, base_key: &str, column: &str) -> String {
        format!("{}_{}_{}", base_key, self.path.join("_"), column)
    }
}

#[derive(Clone, Debug)]
pub struct ResolvedResource {
    pub name: String,
    pub plural: String,
    /// camelCase name: SQL alias of the base table and reshaping base key.
    pub base_key: String,
    pub schema_name: String,
    pub table_name: String,
    pub primary_key: String,
    pub id_path: String,
    /// Parameter names appearing in `id_path`, in order.
    pub id_params: Vec<String>,
    pub soft_delete_column: String,
    pub updated_at_column: Option<String>,
    pub columns: Vec<ColumnInfo>,
    pub relations: Vec<ResolvedRelation>,
    pub includes: Vec<Action>,
    pub excludes: Vec<Action>,
}

impl ResolvedResource {
    /// True when `name` may be used as a base-table column. Open schemas accept anything.
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.is_empty() || self.columns.iter().any(|c| c.name == name)
    }

    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn relation(&self, alias: &str) -> Option<&ResolvedRelation> {
        self.relations.iter().find(|r| r.alias == alias)
    }

    /// Relation alias paths and their key columns, for collapsing absent relations on reshape.
    /// Fill missing column types from the database catalog. An open schema takes the
    /// catalog's column list; declared columns keep their settings and only gain a type.
    /// An empty catalog (table not found) leaves the resource unchanged.
    pub fn with_catalog(&self, catalog: &[ColumnInfo]) -> ResolvedResource {
        let mut typed = self.clone();
        if catalog.is_empty() {
            return typed;
        }
        if typed.columns.is_empty() {
            typed.columns = catalog.to_vec();
            return typed;
        }
        for c in typed.columns.iter_mut().filter(|c| c.pg_type.is_none()) {
            c.pg_type = catalog
                .iter()
                .find(|k| k.name == c.name)
                .and_then(|k| k.pg_type.clone());
        }
        typed
    }

    /// True when some column type is unknown, so the catalog has something to add.
    pub fn needs_catalog(&self) -> bool {
        self.columns.is_empty() || self.columns.iter().any(|c| c.pg_type.is_none())
    }

    /// Element relations of `many` relations are keyed by the relation path.
    pub fn alias_map(&self) -> AliasMap {
        let relations = self
            .relations
            .iter()
            .filter(|r| r.kind == RelationKind::One)
            .map(|r| RelationAlias {
                path: r.path.clone(),
                key_column: r.foreign_column.clone(),
            })
            .collect();
        self.relations
            .iter()
            .filter(|r| r.kind == RelationKind::Many && !r.element_relations.is_empty())
            .fold(AliasMap::explicit(&self.base_key, relations), |map, r| {
                map.with_elements(r.path.clone(), r.element_relations.clone())
            })
    }
}
