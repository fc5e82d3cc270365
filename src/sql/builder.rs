//! Compiles a resolved resource plus a `Query` into parameterized PostgreSQL.
//!
//! Identifiers come from config or from checked field names; every value is a parameter
//! (`$n`), except JSON null which is rendered as `NULL` / `IS NULL`.
//!
//! Reads select base columns as `<baseKey>_<column>` and to-one relation columns as
//! `<baseKey>_<path>_<column>` so the reshaper can nest them. To-many relations come back as
//! one JSON array column per relation. Writes return plain column names.

use crate::config::{is_identifier, RelationKind, ResolvedRelation, ResolvedResource};
use crate::error::AppError;
use crate::query::{CompareOp, Predicate, Query};
use serde_json::{Map, Value};

/// Quote identifier for PostgreSQL.
fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

fn qualified_table(schema: &str, table: &str) -> String {
    format!("{}.{}", quoted(schema), quoted(table))
}

#[derive(Debug, Default)]
pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<Value>,
}

impl QueryBuf {
    fn push_param(&mut self, v: Value) -> u32 {
        let n = self.params.len() as u32 + 1;
        self.params.push(v);
        n
    }
}

fn unknown_field(field: &str) -> AppError {
    AppError::BadRequest(format!("unknown field '{}'", field))
}

/// SQL alias of a relation's joined table: its alias path joined by underscores.
fn relation_sql_alias(rel: &ResolvedRelation) -> String {
    rel.path.join("_")
}

fn parent_sql_alias(resource: &ResolvedResource, rel: &ResolvedRelation) -> String {
    match rel.path.split_last() {
        Some((_, parents)) if !parents.is_empty() => parents.join("_"),
        _ => resource.base_key.clone(),
    }
}

/// Custom enum (schema.typename) and numeric columns are read as text so every row decodes.
fn read_cast(pg_type: Option<&str>) -> &'static str {
    match pg_type {
        Some(t) if t.contains('.') || t == "numeric" || t.starts_with("numeric(") => "::text",
        _ => "",
    }
}

/// A field reference resolved against the resource: SQL expression and declared cast type.
struct FieldRef<'a> {
    expr: String,
    cast: Option<&'a str>,
}

fn resolve_field<'a>(resource: &'a ResolvedResource, field: &str) -> Result<FieldRef<'a>, AppError> {
    let segments: Vec<&str> = field.split('.').collect();
    if !segments.iter().all(|s| is_identifier(s)) {
        return Err(unknown_field(field));
    }
    let Some((column, path)) = segments.split_last() else {
        return Err(unknown_field(field));
    };
    if path.is_empty() {
        if !resource.has_column(column) {
            return Err(unknown_field(field));
        }
        return Ok(FieldRef {
            expr: format!("{}.{}", quoted(&resource.base_key), quoted(column)),
            cast: resource.column(column).and_then(|c| c.pg_type.as_deref()),
        });
    }
    let rel = resource
        .relations
        .iter()
        .filter(|r| r.kind == RelationKind::One)
        .find(|r| r.path.iter().map(String::as_str).eq(path.iter().copied()))
        .or_else(|| match path {
            [alias] => resource.relation(alias).filter(|r| r.kind == RelationKind::One),
            _ => None,
        })
        .ok_or_else(|| unknown_field(field))?;
    if !rel.columns.iter().any(|c| c == column) {
        return Err(unknown_field(field));
    }
    Ok(FieldRef {
        expr: format!("{}.{}", quoted(&relation_sql_alias(rel)), quoted(column)),
        cast: None,
    })
}

fn as_text(v: &Value) -> Value {
    match v {
        Value::String(_) => v.clone(),
        other => Value::String(other.to_string()),
    }
}

/// Compile one comparison operand. Strings against an untyped column compare as text.
fn operand(field: &FieldRef<'_>, value: &Value, text: bool, q: &mut QueryBuf) -> String {
    if text {
        return format!("${}", q.push_param(as_text(value)));
    }
    let n = q.push_param(value.clone());
    match field.cast {
        Some(t) => format!("${}::{}", n, t),
        None => format!("${}", n),
    }
}

fn predicate_sql(resource: &ResolvedResource, pred: &Predicate, q: &mut QueryBuf) -> Result<String, AppError> {
    Ok(match pred {
        Predicate::Compare { field, op, value } => {
            let f = resolve_field(resource, field)?;
            match (value, op) {
                (Value::Null, CompareOp::Eq) => format!("{} IS NULL", f.expr),
                (Value::Null, CompareOp::Ne) => format!("{} IS NOT NULL", f.expr),
                (Value::Null, _) => "FALSE".to_string(),
                _ => {
                    let text = f.cast.is_none() && value.is_string();
                    let lhs = if text { format!("{}::text", f.expr) } else { f.expr.clone() };
                    let rhs = operand(&f, value, text, q);
                    format!("{} {} {}", lhs, op.sql(), rhs)
                }
            }
        }
        Predicate::In { field, values } => {
            let f = resolve_field(resource, field)?;
            if values.is_empty() {
                return Ok("FALSE".to_string());
            }
            let text = f.cast.is_none() && values.iter().any(Value::is_string);
            let lhs = if text { format!("{}::text", f.expr) } else { f.expr.clone() };
            let items: Vec<String> = values
                .iter()
                .map(|v| if v.is_null() { "NULL".to_string() } else { operand(&f, v, text, q) })
                .collect();
            format!("{} IN ({})", lhs, items.join(", "))
        }
        Predicate::And(parts) => junction(resource, parts, " AND ", "TRUE", q)?,
        Predicate::Or(parts) => junction(resource, parts, " OR ", "FALSE", q)?,
    })
}

fn junction(
    resource: &ResolvedResource,
    parts: &[Predicate],
    sep: &str,
    empty: &str,
    q: &mut QueryBuf,
) -> Result<String, AppError> {
    if parts.is_empty() {
        return Ok(empty.to_string());
    }
    let compiled = parts
        .iter()
        .map(|p| predicate_sql(resource, p, q))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(format!("({})", compiled.join(sep)))
}

/// WHERE body: filter AND soft-delete visibility, or `None` when unrestricted.
fn where_sql(resource: &ResolvedResource, query: &Query, q: &mut QueryBuf) -> Result<Option<String>, AppError> {
    let mut parts = Vec::new();
    if let Some(filter) = &query.filter {
        parts.push(predicate_sql(resource, filter, q)?);
    }
    if !query.with_deleted {
        parts.push(format!(
            "{}.{} IS NULL",
            quoted(&resource.base_key),
            quoted(&resource.soft_delete_column)
        ));
    }
    Ok(match parts.len() {
        0 => None,
        _ => Some(parts.join(" AND ")),
    })
}

/// Base table aliased by the base key, LEFT JOINed with every to-one relation.
fn from_sql(resource: &ResolvedResource) -> String {
    let mut from = format!(
        "{} AS {}",
        qualified_table(&resource.schema_name, &resource.table_name),
        quoted(&resource.base_key)
    );
    let mut joins: Vec<&ResolvedRelation> = resource
        .relations
        .iter()
        .filter(|r| r.kind == RelationKind::One)
        .collect();
    joins.sort_by_key(|r| r.path.len());
    for rel in joins {
        let alias = relation_sql_alias(rel);
        from.push_str(&format!(
            " LEFT JOIN {} AS {} ON {}.{} = {}.{}",
            qualified_table(&rel.schema_name, &rel.table_name),
            quoted(&alias),
            quoted(&alias),
            quoted(&rel.foreign_column),
            quoted(&parent_sql_alias(resource, rel)),
            quoted(&rel.local_column)
        ));
    }
    from
}

fn select_list(resource: &ResolvedResource) -> String {
    let base = quoted(&resource.base_key);
    let mut parts: Vec<String> = if resource.columns.is_empty() {
        vec![format!("{}.*", base)]
    } else {
        resource
            .columns
            .iter()
            .map(|c| {
                format!(
                    "{}.{}{} AS {}",
                    base,
                    quoted(&c.name),
                    read_cast(c.pg_type.as_deref()),
                    quoted(&format!("{}_{}", resource.base_key, c.name))
                )
            })
            .collect()
    };
    for rel in &resource.relations {
        match rel.kind {
            RelationKind::One => {
                let alias = quoted(&relation_sql_alias(rel));
                parts.extend(rel.columns.iter().map(|c| {
                    format!("{}.{} AS {}", alias, quoted(c), quoted(&rel.column_alias(&resource.base_key, c)))
                }));
            }
            RelationKind::Many => parts.push(many_subquery(resource, rel)),
        }
    }
    parts.join(", ")
}

/// `(SELECT COALESCE(json_agg(row_to_json(sub)), '[]'::json) FROM (...) sub) AS "<base>_<path>"`
fn many_subquery(resource: &ResolvedResource, rel: &ResolvedRelation) -> String {
    let cols = if rel.columns.is_empty() {
        "*".to_string()
    } else {
        rel.columns.iter().map(|c| quoted(c)).collect::<Vec<_>>().join(", ")
    };
    format!(
        "(SELECT COALESCE(json_agg(row_to_json(sub)), '[]'::json) FROM (SELECT {} FROM {} WHERE {} = {}.{}) sub) AS {}",
        cols,
        qualified_table(&rel.schema_name, &rel.table_name),
        quoted(&rel.foreign_column),
        quoted(&parent_sql_alias(resource, rel)),
        quoted(&rel.local_column),
        quoted(&format!("{}_{}", resource.base_key, rel.path.join("_")))
    )
}

fn order_sql(resource: &ResolvedResource, query: &Query) -> Result<String, AppError> {
    if query.order_by.is_empty() {
        return Ok(format!(
            " ORDER BY {}.{} ASC",
            quoted(&resource.base_key),
            quoted(&resource.primary_key)
        ));
    }
    let parts = query
        .order_by
        .iter()
        .map(|(field, dir)| resolve_field(resource, field).map(|f| format!("{} {}", f.expr, dir.sql())))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(format!(" ORDER BY {}", parts.join(", ")))
}

/// Read query: joins, filter, visibility, order, then LIMIT/OFFSET when set.
/// `single` caps the result at one row regardless of `take`.
pub fn select(resource: &ResolvedResource, query: &Query, single: bool) -> Result<QueryBuf, AppError> {
    let mut q = QueryBuf::default();
    let mut sql = format!("SELECT {} FROM {}", select_list(resource), from_sql(resource));
    if let Some(w) = where_sql(resource, query, &mut q)? {
        sql.push_str(" WHERE ");
        sql.push_str(&w);
    }
    sql.push_str(&order_sql(resource, query)?);
    if single {
        sql.push_str(" LIMIT 1");
    } else {
        if query.take > 0 {
            sql.push_str(&format!(" LIMIT {}", query.take));
        }
        if query.skip > 0 {
            sql.push_str(&format!(" OFFSET {}", query.skip));
        }
    }
    q.sql = sql;
    Ok(q)
}

/// Total matching rows, ignoring order and pagination.
pub fn count(resource: &ResolvedResource, query: &Query) -> Result<QueryBuf, AppError> {
    let mut q = QueryBuf::default();
    let mut sql = format!("SELECT COUNT(*) AS \"count\" FROM {}", from_sql(resource));
    if let Some(w) = where_sql(resource, query, &mut q)? {
        sql.push_str(" WHERE ");
        sql.push_str(&w);
    }
    q.sql = sql;
    Ok(q)
}

fn returning_list(resource: &ResolvedResource) -> String {
    if resource.columns.is_empty() {
        return "*".to_string();
    }
    resource
        .columns
        .iter()
        .map(|c| match read_cast(c.pg_type.as_deref()) {
            "" => quoted(&c.name),
            cast => format!("{}{} AS {}", quoted(&c.name), cast, quoted(&c.name)),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Placeholder for a written value, cast to the declared type when known.
fn write_value(resource: &ResolvedResource, column: &str, value: &Value, q: &mut QueryBuf) -> String {
    if value.is_null() {
        return "NULL".to_string();
    }
    let n = q.push_param(value.clone());
    match resource.column(column).and_then(|c| c.pg_type.as_deref()) {
        Some(t) => format!("${}::{}", n, t),
        None => format!("${}", n),
    }
}

fn check_write_column(resource: &ResolvedResource, column: &str) -> Result<(), AppError> {
    if is_identifier(column) && resource.has_column(column) {
        Ok(())
    } else {
        Err(unknown_field(column))
    }
}

fn target_table(resource: &ResolvedResource) -> String {
    format!(
        "{} AS {}",
        qualified_table(&resource.schema_name, &resource.table_name),
        quoted(&resource.base_key)
    )
}

fn references_relation(pred: &Predicate) -> bool {
    match pred {
        Predicate::Compare { field, .. } | Predicate::In { field, .. } => field.contains('.'),
        Predicate::And(parts) | Predicate::Or(parts) => parts.iter().any(references_relation),
    }
}

/// WHERE body for a write. Relation fields need the joins, so the target rows are then
/// picked by primary key from a joined sub-select.
fn write_where(resource: &ResolvedResource, query: &Query, q: &mut QueryBuf) -> Result<String, AppError> {
    let joined = query.filter.as_ref().is_some_and(references_relation);
    let Some(w) = where_sql(resource, query, q)? else {
        return Ok("TRUE".to_string());
    };
    if !joined {
        return Ok(w);
    }
    let pk = format!("{}.{}", quoted(&resource.base_key), quoted(&resource.primary_key));
    Ok(format!("{} IN (SELECT {} FROM {} WHERE {})", pk, pk, from_sql(resource), w))
}

/// INSERT with the payload's columns in payload order; an empty payload inserts defaults.
pub fn insert(resource: &ResolvedResource, values: &Map<String, Value>) -> Result<QueryBuf, AppError> {
    let mut q = QueryBuf::default();
    let mut cols = Vec::with_capacity(values.len());
    let mut placeholders = Vec::with_capacity(values.len());
    for (column, value) in values {
        check_write_column(resource, column)?;
        placeholders.push(write_value(resource, column, value, &mut q));
        cols.push(quoted(column));
    }
    let body = if cols.is_empty() {
        "DEFAULT VALUES".to_string()
    } else {
        format!("({}) VALUES ({})", cols.join(", "), placeholders.join(", "))
    };
    q.sql = format!(
        "INSERT INTO {} {} RETURNING {}",
        target_table(resource),
        body,
        returning_list(resource)
    );
    Ok(q)
}

/// UPDATE matching rows. The primary key is never written; the updated-at column is
/// stamped with NOW() when configured.
pub fn update(resource: &ResolvedResource, query: &Query, values: &Map<String, Value>) -> Result<QueryBuf, AppError> {
    let mut q = QueryBuf::default();
    let mut sets = Vec::new();
    for (column, value) in values {
        if *column == resource.primary_key {
            continue;
        }
        check_write_column(resource, column)?;
        let rhs = write_value(resource, column, value, &mut q);
        sets.push(format!("{} = {}", quoted(column), rhs));
    }
    if let Some(updated_at) = stamped_column(resource) {
        if !values.contains_key(updated_at) {
            sets.push(format!("{} = NOW()", quoted(updated_at)));
        }
    }
    if sets.is_empty() {
        sets.push(format!(
            "{} = {}.{}",
            quoted(&resource.primary_key),
            quoted(&resource.base_key),
            quoted(&resource.primary_key)
        ));
    }
    finish_write(resource, query, &sets.join(", "), q)
}

fn stamped_column(resource: &ResolvedResource) -> Option<&str> {
    resource
        .updated_at_column
        .as_deref()
        .filter(|c| resource.has_column(c))
}

fn finish_write(resource: &ResolvedResource, query: &Query, set_clause: &str, mut q: QueryBuf) -> Result<QueryBuf, AppError> {
    let w = write_where(resource, query, &mut q)?;
    q.sql = format!(
        "UPDATE {} SET {} WHERE {} RETURNING {}",
        target_table(resource),
        set_clause,
        w,
        returning_list(resource)
    );
    Ok(q)
}

pub fn delete(resource: &ResolvedResource, query: &Query) -> Result<QueryBuf, AppError> {
    let mut q = QueryBuf::default();
    let w = write_where(resource, query, &mut q)?;
    q.sql = format!(
        "DELETE FROM {} WHERE {} RETURNING {}",
        target_table(resource),
        w,
        returning_list(resource)
    );
    Ok(q)
}

/// Stamp the soft-delete column on matching rows.
pub fn soft_delete(resource: &ResolvedResource, query: &Query) -> Result<QueryBuf, AppError> {
    let set = format!("{} = NOW()", quoted(&resource.soft_delete_column));
    finish_write(resource, query, &set, QueryBuf::default())
}

/// Clear the soft-delete column on matching rows.
pub fn restore(resource: &ResolvedResource, query: &Query) -> Result<QueryBuf, AppError> {
    let set = format!("{} = NULL", quoted(&resource.soft_delete_column));
    finish_write(resource, query, &set, QueryBuf::default())
}
