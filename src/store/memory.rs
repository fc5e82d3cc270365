//! In-process store: one vector of rows per table behind a mutex.
//!
//! Mirrors what the PostgreSQL store does for a single table: auto-increment primary keys,
//! timestamp defaults, soft-delete visibility, not-null checks reported with SQLSTATE 23502.
//! Relations are not joined, so relation fields are rejected.

use crate::config::{is_identifier, ResolvedResource};
use crate::error::{AppError, NOT_NULL_VIOLATION};
use crate::query::{CompareOp, Predicate, Query, SortDirection};
use crate::reshape::{Cell, FlatRow};
use crate::store::Store;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
struct MemTable {
    last_id: i64,
    rows: Vec<FlatRow>,
}

#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<HashMap<String, MemTable>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored rows for a resource, soft-deleted ones included.
    pub fn row_count(&self, resource: &ResolvedResource) -> Result<usize, AppError> {
        Ok(self
            .lock()?
            .get(&table_key(resource))
            .map(|t| t.rows.len())
            .unwrap_or(0))
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, MemTable>>, AppError> {
        self.tables
            .lock()
            .map_err(|_| AppError::Internal("Mutex lock failed".to_string()))
    }

    /// Apply `f` to every visible row matching the query, returning the changed rows.
    fn modify(
        &self,
        resource: &ResolvedResource,
        query: &Query,
        mut f: impl FnMut(&mut FlatRow) -> Result<(), AppError>,
    ) -> Result<Vec<FlatRow>, AppError> {
        check_query(resource, query)?;
        let mut tables = self.lock()?;
        let table = tables.entry(table_key(resource)).or_default();
        let mut changed = Vec::new();
        for row in table.rows.iter_mut().filter(|r| selects(resource, query, r)) {
            let mut next = row.clone();
            f(&mut next)?;
            check_not_null(resource, &next)?;
            *row = next.clone();
            changed.push(next);
        }
        Ok(changed)
    }
}

fn table_key(resource: &ResolvedResource) -> String {
    format!("{}.{}", resource.schema_name, resource.table_name)
}

fn unknown_field(field: &str) -> AppError {
    AppError::BadRequest(format!("unknown field '{}'", field))
}

fn check_field(resource: &ResolvedResource, field: &str) -> Result<(), AppError> {
    if field.contains('.') {
        return Err(AppError::BadRequest(format!(
            "relation field '{}' is not supported by the in-memory store",
            field
        )));
    }
    if is_identifier(field) && resource.has_column(field) {
        Ok(())
    } else {
        Err(unknown_field(field))
    }
}

fn check_predicate(resource: &ResolvedResource, pred: &Predicate) -> Result<(), AppError> {
    match pred {
        Predicate::Compare { field, .. } | Predicate::In { field, .. } => check_field(resource, field),
        Predicate::And(parts) | Predicate::Or(parts) => parts.iter().try_for_each(|p| check_predicate(resource, p)),
    }
}

fn check_query(resource: &ResolvedResource, query: &Query) -> Result<(), AppError> {
    if let Some(filter) = &query.filter {
        check_predicate(resource, filter)?;
    }
    query.order_by.iter().try_for_each(|(f, _)| check_field(resource, f))
}

fn check_not_null(resource: &ResolvedResource, row: &FlatRow) -> Result<(), AppError> {
    for c in resource.columns.iter().filter(|c| !c.nullable) {
        if row.get(&c.name).map_or(true, Cell::is_null) {
            return Err(AppError::Persistence {
                code: Some(NOT_NULL_VIOLATION.to_string()),
                message: format!(
                    "null value in column \"{}\" of relation \"{}\" violates not-null constraint",
                    c.name, resource.table_name
                ),
            });
        }
    }
    Ok(())
}

fn selects(resource: &ResolvedResource, query: &Query, row: &FlatRow) -> bool {
    let visible = query.with_deleted
        || row
            .get(&resource.soft_delete_column)
            .map_or(true, Cell::is_null);
    visible && query.filter.as_ref().map_or(true, |p| matches(p, row))
}

fn matches(pred: &Predicate, row: &FlatRow) -> bool {
    match pred {
        Predicate::Compare { field, op, value } => {
            let cell = row.get(field).cloned().unwrap_or(Cell::Value(Value::Null));
            match (value, op) {
                (Value::Null, CompareOp::Eq) => cell.is_null(),
                (Value::Null, CompareOp::Ne) => !cell.is_null(),
                (Value::Null, _) => false,
                _ if cell.is_null() => false,
                _ => compare(&cell, value).is_some_and(|ord| match op {
                    CompareOp::Eq => ord == Ordering::Equal,
                    CompareOp::Ne => ord != Ordering::Equal,
                    CompareOp::Gt => ord == Ordering::Greater,
                    CompareOp::Gte => ord != Ordering::Less,
                    CompareOp::Lt => ord == Ordering::Less,
                    CompareOp::Lte => ord != Ordering::Greater,
                }),
            }
        }
        Predicate::In { field, values } => {
            let cell = row.get(field).cloned().unwrap_or(Cell::Value(Value::Null));
            !cell.is_null() && values.iter().any(|v| compare(&cell, v) == Some(Ordering::Equal))
        }
        Predicate::And(parts) => parts.iter().all(|p| matches(p, row)),
        Predicate::Or(parts) => parts.iter().any(|p| matches(p, row)),
    }
}

fn as_value(cell: &Cell) -> Value {
    match cell {
        Cell::Timestamp(at) => Value::String(at.to_rfc3339()),
        Cell::Value(v) => v.clone(),
    }
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s).ok().map(|d| d.with_timezone(&Utc))
}

/// Compare a stored cell with a filter value, coercing strings the way PostgreSQL casts
/// untyped literals. Incomparable pairs give `None`.
fn compare(cell: &Cell, value: &Value) -> Option<Ordering> {
    match (cell, value) {
        (Cell::Timestamp(at), Value::String(s)) => parse_timestamp(s).map(|other| at.cmp(&other)),
        (Cell::Timestamp(_), _) => None,
        (Cell::Value(v), other) => compare_values(v, other),
    }
}

fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::Number(x), Value::String(s)) => x.as_f64()?.partial_cmp(&s.trim().parse::<f64>().ok()?),
        (Value::String(s), Value::Number(y)) => s.trim().parse::<f64>().ok()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::String(s)) => s.parse::<bool>().ok().map(|y| x.cmp(&y)),
        (x, y) if x == y => Some(Ordering::Equal),
        _ => None,
    }
}

/// PostgreSQL ordering: nulls sort after everything ascending, before everything descending.
fn order_rows(resource: &ResolvedResource, query: &Query, rows: &mut [FlatRow]) {
    let default_order = [(resource.primary_key.clone(), SortDirection::Asc)];
    let order: &[(String, SortDirection)] = if query.order_by.is_empty() {
        &default_order
    } else {
        &query.order_by
    };
    let null = Cell::Value(Value::Null);
    rows.sort_by(|a, b| {
        for (field, dir) in order {
            let x = a.get(field).unwrap_or(&null);
            let y = b.get(field).unwrap_or(&null);
            let ord = match (x.is_null(), y.is_null()) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Greater,
                (false, true) => Ordering::Less,
                (false, false) => compare(x, &as_value(y)).unwrap_or(Ordering::Equal),
            };
            let ord = match dir {
                SortDirection::Asc => ord,
                SortDirection::Desc => ord.reverse(),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
}

/// Read rows carry the base-key alias, as the SQL store selects them.
fn aliased(resource: &ResolvedResource, row: &FlatRow) -> FlatRow {
    row.iter()
        .map(|(k, v)| (format!("{}_{}", resource.base_key, k), v.clone()))
        .collect()
}

fn is_timestamp_column(resource: &ResolvedResource, column: &str) -> bool {
    resource
        .column(column)
        .and_then(|c| c.pg_type.as_deref())
        .is_some_and(|t| t.starts_with("timestamp"))
        || Some(column) == resource.updated_at_column.as_deref()
        || column == resource.soft_delete_column
}

/// Stored form of a written value: timestamp strings become typed timestamps.
fn stored(resource: &ResolvedResource, column: &str, value: &Value) -> Cell {
    match value {
        Value::String(s) if is_timestamp_column(resource, column) => match parse_timestamp(s) {
            Some(at) => Cell::Timestamp(at),
            None => Cell::Value(value.clone()),
        },
        _ => Cell::Value(value.clone()),
    }
}

fn check_payload(resource: &ResolvedResource, values: &Map<String, Value>) -> Result<(), AppError> {
    values.keys().try_for_each(|k| check_field(resource, k))
}

fn stamped_column(resource: &ResolvedResource) -> Option<&str> {
    resource
        .updated_at_column
        .as_deref()
        .filter(|c| resource.has_column(c))
}

#[async_trait]
impl Store for MemoryStore {
    async fn find_and_count(&self, resource: &ResolvedResource, query: &Query) -> Result<(Vec<FlatRow>, u64), AppError> {
        check_query(resource, query)?;
        let tables = self.lock()?;
        let mut rows: Vec<FlatRow> = tables
            .get(&table_key(resource))
            .map(|t| t.rows.iter().filter(|r| selects(resource, query, r)).cloned().collect())
            .unwrap_or_default();
        drop(tables);
        let total = rows.len() as u64;
        order_rows(resource, query, &mut rows);
        let take = if query.take > 0 { query.take as usize } else { usize::MAX };
        let page = rows
            .iter()
            .skip(query.skip as usize)
            .take(take)
            .map(|r| aliased(resource, r))
            .collect();
        Ok((page, total))
    }

    async fn find_one(&self, resource: &ResolvedResource, query: &Query) -> Result<Option<FlatRow>, AppError> {
        let single = Query {
            take: 1,
            skip: 0,
            ..query.clone()
        };
        let (rows, _) = self.find_and_count(resource, &single).await?;
        Ok(rows.into_iter().next())
    }

    async fn insert(&self, resource: &ResolvedResource, values: &Map<String, Value>) -> Result<FlatRow, AppError> {
        check_payload(resource, values)?;
        let mut tables = self.lock()?;
        let table = tables.entry(table_key(resource)).or_default();
        let now = Utc::now();

        let pk = &resource.primary_key;
        let id = match values.get(pk).and_then(Value::as_i64) {
            Some(given) => {
                table.last_id = table.last_id.max(given);
                Value::from(given)
            }
            None => match values.get(pk) {
                Some(other) if !other.is_null() => other.clone(),
                _ => {
                    table.last_id += 1;
                    Value::from(table.last_id)
                }
            },
        };

        let mut row = FlatRow::new();
        row.insert(pk.clone(), Cell::Value(id));
        if resource.columns.is_empty() {
            for (k, v) in values.iter().filter(|(k, _)| *k != pk) {
                row.insert(k.clone(), stored(resource, k, v));
            }
            if let Some(updated_at) = resource.updated_at_column.as_deref() {
                row.entry(updated_at.to_string()).or_insert(Cell::Timestamp(now));
            }
            row.entry(resource.soft_delete_column.clone())
                .or_insert(Cell::Value(Value::Null));
        } else {
            for c in resource.columns.iter().filter(|c| c.name != *pk) {
                let cell = match values.get(&c.name) {
                    Some(v) => stored(resource, &c.name, v),
                    None if c.has_default && is_timestamp_column(resource, &c.name) && c.name != resource.soft_delete_column => {
                        Cell::Timestamp(now)
                    }
                    None => Cell::Value(Value::Null),
                };
                row.insert(c.name.clone(), cell);
            }
        }
        check_not_null(resource, &row)?;
        table.rows.push(row.clone());
        tracing::debug!(table = %table_key(resource), rows = table.rows.len(), "inserted row");
        Ok(row)
    }

    async fn update(
        &self,
        resource: &ResolvedResource,
        query: &Query,
        values: &Map<String, Value>,
    ) -> Result<Vec<FlatRow>, AppError> {
        check_payload(resource, values)?;
        let stamp = stamped_column(resource).filter(|c| !values.contains_key(*c));
        let now = Utc::now();
        self.modify(resource, query, |row| {
            for (k, v) in values.iter().filter(|(k, _)| **k != resource.primary_key) {
                row.insert(k.clone(), stored(resource, k, v));
            }
            if let Some(c) = stamp {
                row.insert(c.to_string(), Cell::Timestamp(now));
            }
            Ok(())
        })
    }

    async fn delete(&self, resource: &ResolvedResource, query: &Query) -> Result<Vec<FlatRow>, AppError> {
        check_query(resource, query)?;
        let mut tables = self.lock()?;
        let table = tables.entry(table_key(resource)).or_default();
        let (removed, kept): (Vec<FlatRow>, Vec<FlatRow>) =
            table.rows.drain(..).partition(|r| selects(resource, query, r));
        table.rows = kept;
        Ok(removed)
    }

    async fn soft_delete(&self, resource: &ResolvedResource, query: &Query) -> Result<Vec<FlatRow>, AppError> {
        let now = Utc::now();
        let column = resource.soft_delete_column.clone();
        self.modify(resource, query, |row| {
            row.insert(column.clone(), Cell::Timestamp(now));
            Ok(())
        })
    }

    async fn restore(&self, resource: &ResolvedResource, query: &Query) -> Result<Vec<FlatRow>, AppError> {
        let column = resource.soft_delete_column.clone();
        self.modify(resource, query, |row| {
            row.insert(column.clone(), Cell::Value(Value::Null));
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{resolve, ColumnConfig, ResourceConfig};
    use serde_json::json;

    fn widget() -> ResolvedResource {
        let col = |name: &str, pg_type: Option<&str>, nullable: bool, has_default: bool| ColumnConfig {
            name: name.into(),
            pg_type: pg_type.map(str::to_string),
            nullable,
            has_default,
        };
        let mut config = ResourceConfig::named("widget");
        config.columns = vec![
            col("id", Some("bigint"), false, true),
            col("title", None, false, false),
            col("rank", None, true, false),
            col("created_at", Some("timestamptz"), false, true),
            col("updated_at", Some("timestamptz"), false, true),
            col("deleted_at", Some("timestamptz"), true, false),
        ];
        resolve(&config).unwrap()
    }

    fn payload(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap_or_default()
    }

    fn by_id(id: i64) -> Query {
        Query {
            filter: Some(Predicate::eq("id", id)),
            ..Query::default()
        }
    }

    #[tokio::test]
    async fn insert_assigns_ids_and_defaults() {
        let store = MemoryStore::new();
        let r = widget();
        let first = store.insert(&r, &payload(json!({ "title": "a" }))).await.unwrap();
        let second = store.insert(&r, &payload(json!({ "title": "b", "rank": 2 }))).await.unwrap();
        assert_eq!(first.get("id"), Some(&Cell::Value(json!(1))));
        assert_eq!(second.get("id"), Some(&Cell::Value(json!(2))));
        assert!(matches!(first.get("created_at"), Some(Cell::Timestamp(_))));
        assert!(first.get("deleted_at").is_some_and(Cell::is_null));
        assert_eq!(store.row_count(&r).unwrap(), 2);
    }

    #[tokio::test]
    async fn not_null_violation_carries_sqlstate() {
        let store = MemoryStore::new();
        let err = store.insert(&widget(), &Map::new()).await.unwrap_err();
        assert_eq!(err.sql_state().as_deref(), Some(NOT_NULL_VIOLATION));
        assert!(err.store_message().contains("\"title\""));
    }

    #[tokio::test]
    async fn find_filters_orders_paginates_and_counts() {
        let store = MemoryStore::new();
        let r = widget();
        for (title, rank) in [("a", json!(3)), ("b", json!(null)), ("c", json!(1))] {
            store.insert(&r, &payload(json!({ "title": title, "rank": rank }))).await.unwrap();
        }
        let query = Query {
            order_by: vec![("rank".into(), SortDirection::Asc)],
            take: 2,
            ..Query::default()
        };
        let (rows, total) = store.find_and_count(&r, &query).await.unwrap();
        assert_eq!(total, 3);
        let titles: Vec<_> = rows.iter().map(|row| row.get("widget_title").cloned()).collect();
        assert_eq!(titles, vec![Some(Cell::Value(json!("c"))), Some(Cell::Value(json!("a")))]);

        let by_string = Query {
            filter: Some(Predicate::eq("rank", "3")),
            ..Query::default()
        };
        let (rows, total) = store.find_and_count(&r, &by_string).await.unwrap();
        assert_eq!((rows.len(), total), (1, 1));
    }

    #[tokio::test]
    async fn soft_delete_hides_rows_until_restored() {
        let store = MemoryStore::new();
        let r = widget();
        store.insert(&r, &payload(json!({ "title": "a" }))).await.unwrap();

        assert_eq!(store.soft_delete(&r, &by_id(1)).await.unwrap().len(), 1);
        assert!(store.find_one(&r, &by_id(1)).await.unwrap().is_none());
        assert!(store.soft_delete(&r, &by_id(1)).await.unwrap().is_empty());

        let all = Query {
            with_deleted: true,
            ..by_id(1)
        };
        let hidden = store.find_one(&r, &all).await.unwrap().unwrap();
        assert!(matches!(hidden.get("widget_deleted_at"), Some(Cell::Timestamp(_))));

        let restored = store.restore(&r, &all).await.unwrap();
        assert!(restored[0].get("deleted_at").is_some_and(Cell::is_null));
        assert!(store.find_one(&r, &by_id(1)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn update_and_delete_return_affected_rows() {
        let store = MemoryStore::new();
        let r = widget();
        store.insert(&r, &payload(json!({ "title": "a" }))).await.unwrap();
        let updated = store.update(&r, &by_id(1), &payload(json!({ "title": "z", "id": 9 }))).await.unwrap();
        assert_eq!(updated[0].get("title"), Some(&Cell::Value(json!("z"))));
        assert_eq!(updated[0].get("id"), Some(&Cell::Value(json!(1))));

        let err = store.update(&r, &by_id(1), &payload(json!({ "title": null }))).await.unwrap_err();
        assert_eq!(err.sql_state().as_deref(), Some(NOT_NULL_VIOLATION));

        assert!(store.delete(&r, &by_id(2)).await.unwrap().is_empty());
        assert_eq!(store.delete(&r, &by_id(1)).await.unwrap().len(), 1);
        assert_eq!(store.row_count(&r).unwrap(), 0);
    }

    #[tokio::test]
    async fn unknown_and_relation_fields_are_rejected() {
        let store = MemoryStore::new();
        let r = widget();
        for field in ["nope", "owner.id"] {
            let query = Query {
                filter: Some(Predicate::eq(field, 1)),
                ..Query::default()
            };
            let err = store.find_and_count(&r, &query).await.unwrap_err();
            assert!(matches!(err, AppError::BadRequest(_)));
        }
        let err = store.insert(&r, &payload(json!({ "title": "a", "bogus": 1 }))).await.unwrap_err();
        assert_eq!(err.to_string(), "unknown field 'bogus'");
    }
}
