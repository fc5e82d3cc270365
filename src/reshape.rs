//! Result reshaper: rebuilds nested objects from flat rows whose keys are underscore-joined
//! alias paths (`widget_owner_email` -> `{ owner: { email } }` under base key `widget`).
//!
//! Rules:
//! - a key `<base>_<rest>` is placed at `rest`; other keys are placed at their own path
//!   (a key whose second segment repeats the base is not stripped);
//! - a relation whose key column (`<prefix>_id` unless the alias map says otherwise) is
//!   null collapses to `null` instead of a half-populated object;
//! - timestamps are rendered in the request identity's timezone;
//! - arrays of objects are nested element-wise by their own keys, with no base stripping;
//! - paths sharing a prefix merge into the same object.

use crate::identity::Identity;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde_json::{Map, Value};

/// One value of a flat row. Timestamps stay typed until formatted for a request.
#[derive(Clone, Debug, PartialEq)]
pub enum Cell {
    Value(Value),
    Timestamp(DateTime<Utc>),
}

impl Cell {
    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Value(Value::Null))
    }
}

impl From<Value> for Cell {
    fn from(v: Value) -> Self {
        Cell::Value(v)
    }
}

impl From<DateTime<Utc>> for Cell {
    fn from(v: DateTime<Utc>) -> Self {
        Cell::Timestamp(v)
    }
}

/// Column alias -> value, in select order.
pub type FlatRow = IndexMap<String, Cell>;

/// Build a flat row from a JSON object (non-objects give an empty row).
pub fn flat_row_from_json(v: &Value) -> FlatRow {
    v.as_object()
        .map(|o| o.iter().map(|(k, v)| (k.clone(), Cell::Value(v.clone()))).collect())
        .unwrap_or_default()
}

/// A to-one relation reachable from the base: its alias path and the column whose null
/// value means "no related row".
#[derive(Clone, Debug, PartialEq)]
pub struct RelationAlias {
    pub path: Vec<String>,
    pub key_column: String,
}

#[derive(Clone, Debug, PartialEq)]
enum Segmentation {
    /// Every underscore starts a new level.
    Split,
    /// Only declared relation prefixes nest; the remainder is one column name.
    Relations(Vec<RelationAlias>),
}

/// To-one relations nested inside the elements of the array at `path`.
#[derive(Clone, Debug, PartialEq)]
struct ElementAliases {
    path: Vec<String>,
    relations: Vec<RelationAlias>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AliasMap {
    base: String,
    segmentation: Segmentation,
    elements: Vec<ElementAliases>,
}

impl AliasMap {
    /// Infer structure from underscores alone; relation key columns are assumed to be `id`.
    pub fn inferred(base: impl Into<String>) -> Self {
        AliasMap {
            base: base.into(),
            segmentation: Segmentation::Split,
            elements: Vec::new(),
        }
    }

    /// Nest only along declared relation paths, so column names may contain underscores.
    pub fn explicit(base: impl Into<String>, relations: Vec<RelationAlias>) -> Self {
        AliasMap {
            base: base.into(),
            segmentation: Segmentation::Relations(relations),
            elements: Vec::new(),
        }
    }

    /// Declare the relations found inside each element of the array at `path`.
    /// Only meaningful for explicit maps; inferred maps split element keys anyway.
    pub fn with_elements(mut self, path: Vec<String>, relations: Vec<RelationAlias>) -> Self {
        self.elements.retain(|e| e.path != path);
        self.elements.push(ElementAliases { path, relations });
        self
    }

    /// Segmentation for the elements of the array at `path`: same style, its own relations.
    fn for_elements(&self, path: Option<&[String]>) -> Segmentation {
        match self.segmentation {
            Segmentation::Split => Segmentation::Split,
            Segmentation::Relations(_) => Segmentation::Relations(
                path.and_then(|p| self.elements.iter().find(|e| e.path == p))
                    .map(|e| e.relations.clone())
                    .unwrap_or_default(),
            ),
        }
    }
}

pub struct Reshaper<'a> {
    aliases: &'a AliasMap,
    identity: &'a Identity,
}

impl<'a> Reshaper<'a> {
    pub fn new(aliases: &'a AliasMap, identity: &'a Identity) -> Self {
        Reshaper { aliases, identity }
    }

    /// Nested object for one row; `None` or an empty row gives `null`.
    pub fn row(&self, row: Option<&FlatRow>) -> Value {
        match row {
            Some(r) if !r.is_empty() => {
                Value::Object(self.nest(r, Some(&self.aliases.base), &self.aliases.segmentation, true))
            }
            _ => Value::Null,
        }
    }

    /// Element-wise `row`, order preserved.
    pub fn rows(&self, rows: &[FlatRow]) -> Vec<Value> {
        rows.iter().map(|r| self.row(Some(r))).collect()
    }

    /// Keys untouched, values rendered (timestamps in the identity timezone).
    pub fn plain(&self, row: &FlatRow) -> Value {
        Value::Object(
            row.iter()
                .map(|(k, cell)| (k.clone(), self.render(cell, None)))
                .collect(),
        )
    }

    /// `top` marks the row itself, whose array paths may have declared element relations.
    fn nest(&self, row: &FlatRow, base: Option<&str>, seg: &Segmentation, top: bool) -> Map<String, Value> {
        let mut out = Map::new();
        let mut collapsed: Vec<Vec<String>> = Vec::new();
        for (key, cell) in row {
            let (stripped, segments) = split_key(key, base, seg);
            if segments.is_empty() {
                continue;
            }
            if collapsed.iter().any(|c| segments.starts_with(c)) {
                continue;
            }
            let absent = (1..segments.len())
                .find(|d| relation_absent(row, stripped.then_some(base).flatten(), &segments[..*d], seg));
            if let Some(depth) = absent {
                let prefix = segments[..depth].to_vec();
                set_path(&mut out, &prefix, Value::Null);
                collapsed.push(prefix);
                continue;
            }
            let value = self.render(cell, top.then_some(segments.as_slice()));
            set_path(&mut out, &segments, value);
        }
        out
    }

    fn render(&self, cell: &Cell, path: Option<&[String]>) -> Value {
        match cell {
            Cell::Timestamp(at) => Value::String(self.identity.format_timestamp(at)),
            Cell::Value(Value::Array(items)) => Value::Array(
                items
                    .iter()
                    .map(|item| match item {
                        Value::Object(_) => {
                            let seg = self.aliases.for_elements(path);
                            Value::Object(self.nest(&flat_row_from_json(item), None, &seg, false))
                        }
                        other => other.clone(),
                    })
                    .collect(),
            ),
            Cell::Value(v) => v.clone(),
        }
    }
}

/// Path segments for a key, and whether the base prefix was stripped.
fn split_key(key: &str, base: Option<&str>, seg: &Segmentation) -> (bool, Vec<String>) {
    let stripped = base.and_then(|b| {
        key.strip_prefix(b)
            .and_then(|r| r.strip_prefix('_'))
            .filter(|rest| !rest.is_empty() && rest.split('_').next() != Some(b))
    });
    let rest = stripped.unwrap_or(key);
    let segments = match seg {
        Segmentation::Split => rest
            .split('_')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        Segmentation::Relations(relations) => {
            let matched = relations
                .iter()
                .filter_map(|r| {
                    let joined = r.path.join("_");
                    rest.strip_prefix(&joined)
                        .and_then(|tail| tail.strip_prefix('_'))
                        .filter(|tail| !tail.is_empty())
                        .map(|tail| (r, tail))
                })
                .max_by_key(|(r, _)| r.path.len());
            match matched {
                Some((r, tail)) => {
                    let mut segments = r.path.clone();
                    segments.push(tail.to_string());
                    segments
                }
                None => vec![rest.to_string()],
            }
        }
    };
    (stripped.is_some(), segments)
}

/// True when the relation at `prefix` has its key column present and null.
fn relation_absent(row: &FlatRow, base: Option<&str>, prefix: &[String], seg: &Segmentation) -> bool {
    let key_column = match seg {
        Segmentation::Split => "id",
        Segmentation::Relations(relations) => match relations.iter().find(|r| r.path == prefix) {
            Some(r) => r.key_column.as_str(),
            None => return false,
        },
    };
    let flat = match base {
        Some(b) => format!("{}_{}_{}", b, prefix.join("_"), key_column),
        None => format!("{}_{}", prefix.join("_"), key_column),
    };
    row.get(&flat).is_some_and(Cell::is_null)
}

/// Write `value` at `path`, creating objects along the way. Non-object intermediates are
/// replaced; existing objects are merged into.
fn set_path(out: &mut Map<String, Value>, path: &[String], value: Value) {
    let Some((last, parents)) = path.split_last() else {
        return;
    };
    let mut node = out;
    for seg in parents {
        let entry = node
            .entry(seg.clone())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        node = match entry {
            Value::Object(map) => map,
            _ => return,
        };
    }
    node.insert(last.clone(), value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn row(v: Value) -> FlatRow {
        flat_row_from_json(&v)
    }

    fn reshape(aliases: &AliasMap, v: Value) -> Value {
        Reshaper::new(aliases, &Identity::default()).row(Some(&row(v)))
    }

    #[test]
    fn null_foreign_key_collapses_relation() {
        let aliases = AliasMap::inferred("r");
        let out = reshape(&aliases, json!({ "r_id": 1, "r_name": "a", "r_owner_id": null, "r_owner_email": "x" }));
        assert_eq!(out, json!({ "id": 1, "name": "a", "owner": null }));
    }

    #[test]
    fn present_relation_nests_and_merges() {
        let aliases = AliasMap::inferred("r");
        let out = reshape(&aliases, json!({ "r_id": 1, "r_owner_id": 2, "r_owner_email": "x", "r_owner_company_id": 3 }));
        assert_eq!(out, json!({ "id": 1, "owner": { "id": 2, "email": "x", "company": { "id": 3 } } }));
    }

    #[test]
    fn arrays_are_reshaped_element_wise() {
        let aliases = AliasMap::inferred("r");
        let out = reshape(&aliases, json!({ "r_id": 1, "r_tags": [{ "id": 5, "label": "x" }, 7] }));
        assert_eq!(out, json!({ "id": 1, "tags": [{ "id": 5, "label": "x" }, 7] }));

        let nested = reshape(&aliases, json!({ "r_tags": [{ "id": 5, "kind_id": null, "kind_name": "k" }] }));
        assert_eq!(nested, json!({ "tags": [{ "id": 5, "kind": null }] }));
    }

    #[test]
    fn keys_outside_the_base_nest_under_their_first_segment() {
        let aliases = AliasMap::inferred("r");
        let out = reshape(&aliases, json!({ "r_id": 1, "owner_id": null, "owner_email": "x", "r": 9, "r_r_x": 2 }));
        assert_eq!(out, json!({ "id": 1, "owner": null, "r": { "r": { "x": 2 } } }));
    }

    #[test]
    fn explicit_map_keeps_underscored_columns() {
        let aliases = AliasMap::explicit(
            "widget",
            vec![
                RelationAlias { path: vec!["owner".into()], key_column: "id".into() },
                RelationAlias { path: vec!["owner".into(), "company".into()], key_column: "code".into() },
            ],
        );
        let out = reshape(
            &aliases,
            json!({
                "widget_id": 1,
                "widget_created_by": "me",
                "widget_owner_id": 2,
                "widget_owner_full_name": "Ann",
                "widget_owner_company_code": null,
                "widget_owner_company_legal_name": "ACME",
                "widget_tags": [{ "tag_name": "t" }]
            }),
        );
        assert_eq!(
            out,
            json!({
                "id": 1,
                "created_by": "me",
                "owner": { "id": 2, "full_name": "Ann", "company": null },
                "tags": [{ "tag_name": "t" }]
            })
        );
    }

    #[test]
    fn explicit_map_nests_declared_element_relations() {
        let kind = RelationAlias { path: vec!["kind".into()], key_column: "id".into() };
        let aliases = AliasMap::explicit("r", Vec::new()).with_elements(vec!["tags".into()], vec![kind]);
        let out = reshape(
            &aliases,
            json!({
                "r_id": 1,
                "r_tags": [
                    { "id": 5, "kind_id": null, "kind_name": "k" },
                    { "id": 6, "kind_id": 2, "kind_name": "k", "sort_key": 1 }
                ],
                "r_other": [{ "kind_id": null }]
            }),
        );
        assert_eq!(
            out,
            json!({
                "id": 1,
                "tags": [
                    { "id": 5, "kind": null },
                    { "id": 6, "kind": { "id": 2, "name": "k" }, "sort_key": 1 }
                ],
                "other": [{ "kind_id": null }]
            })
        );
    }

    #[test]
    fn timestamps_use_identity_timezone() {
        let aliases = AliasMap::inferred("r");
        let identity = Identity::with_timezone(chrono_tz::America::New_York);
        let mut flat = FlatRow::new();
        flat.insert("r_id".into(), Cell::Value(json!(1)));
        flat.insert("r_createdAt".into(), Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap().into());
        let out = Reshaper::new(&aliases, &identity).row(Some(&flat));
        assert_eq!(out, json!({ "id": 1, "createdAt": "2024-01-15T07:00:00-05:00" }));

        let plain = Reshaper::new(&aliases, &identity).plain(&flat);
        assert_eq!(plain, json!({ "r_id": 1, "r_createdAt": "2024-01-15T07:00:00-05:00" }));
    }

    #[test]
    fn empty_and_missing_rows_are_null() {
        let aliases = AliasMap::inferred("r");
        let identity = Identity::default();
        let reshaper = Reshaper::new(&aliases, &identity);
        assert_eq!(reshaper.row(None), Value::Null);
        assert_eq!(reshaper.row(Some(&FlatRow::new())), Value::Null);
        let many = reshaper.rows(&[row(json!({ "r_id": 2 })), row(json!({ "r_id": 1 }))]);
        assert_eq!(many, vec![json!({ "id": 2 }), json!({ "id": 1 })]);
    }
}
