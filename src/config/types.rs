//! Raw resource declarations as loaded from JSON.

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ColumnConfig {
    pub name: String,
    /// PostgreSQL type used to cast bound parameters (e.g. "timestamptz", "int4").
    #[serde(default, rename = "type")]
    pub pg_type: Option<String>,
    #[serde(default = "default_true")]
    pub nullable: bool,
    /// Whether the column has a DB default (serial ids, NOW() timestamps).
    #[serde(default)]
    pub has_default: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    /// We hold the foreign key: LEFT JOIN, selected as flat alias-path columns.
    One,
    /// They hold the foreign key: selected as a JSON array of rows.
    Many,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RelationConfig {
    /// Alias used in SQL and as the key in reshaped output. No underscores.
    pub alias: String,
    pub table: String,
    #[serde(default)]
    pub schema: Option<String>,
    #[serde(default = "default_kind")]
    pub kind: RelationKind,
    /// Column on the parent side of the join (parent FK for `one`, parent PK for `many`).
    pub local_column: String,
    /// Column on the related table (its PK for `one`, its FK for `many`).
    #[serde(default = "default_id")]
    pub foreign_column: String,
    pub columns: Vec<String>,
    /// Alias of the relation this one is joined through; the base resource when absent.
    #[serde(default)]
    pub parent: Option<String>,
    /// `many` only: to-one relations embedded in each element as `<alias>_<column>` keys.
    #[serde(default)]
    pub element_relations: Vec<ElementRelationConfig>,
}

/// A to-one relation inside the elements of a `many` relation, e.g. `kind` for element keys
/// `kind_id`, `kind_name`. A null key column collapses it to `null`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ElementRelationConfig {
    pub alias: String,
    #[serde(default = "default_id")]
    pub key_column: String,
}

fn default_kind() -> RelationKind {
    RelationKind::One
}

fn default_id() -> String {
    "id".into()
}

fn default_schema() -> String {
    "public".into()
}

fn default_id_path() -> String {
    ":id".into()
}

fn default_soft_delete_column() -> String {
    "deleted_at".into()
}

fn default_updated_at_column() -> Option<String> {
    Some("updated_at".into())
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResourceConfig {
    /// Singular resource name; used in routes and response envelopes.
    pub name: String,
    #[serde(default)]
    pub plural: Option<String>,
    /// Backing table; snake_case of the name when absent.
    #[serde(default)]
    pub table: Option<String>,
    #[serde(default = "default_schema")]
    pub schema: String,
    #[serde(default = "default_id")]
    pub primary_key: String,
    /// Identifier path template, e.g. ":id" or ":orgId/:id".
    #[serde(default = "default_id_path")]
    pub id_path: String,
    #[serde(default = "default_soft_delete_column")]
    pub soft_delete_column: String,
    #[serde(default = "default_updated_at_column")]
    pub updated_at_column: Option<String>,
    /// Known columns. When empty, any well-formed identifier is accepted.
    #[serde(default)]
    pub columns: Vec<ColumnConfig>,
    #[serde(default)]
    pub relations: Vec<RelationConfig>,
    /// Built-in actions to register; all seven when absent.
    #[serde(default)]
    pub includes: Option<Vec<String>>,
    #[serde(default)]
    pub excludes: Vec<String>,
}

impl ResourceConfig {
    /// Minimal declaration with every default applied.
    pub fn named(name: impl Into<String>) -> Self {
        ResourceConfig {
            name: name.into(),
            plural: None,
            table: None,
            schema: default_schema(),
            primary_key: default_id(),
            id_path: default_id_path(),
            soft_delete_column: default_soft_delete_column(),
            updated_at_column: default_updated_at_column(),
            columns: Vec::new(),
            relations: Vec::new(),
            includes: None,
            excludes: Vec::new(),
        }
    }
}

/// All resources served by one process.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FullConfig {
    pub resources: Vec<ResourceConfig>,
}
