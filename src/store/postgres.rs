//! PostgreSQL store over a sqlx pool.

use crate::config::{ColumnInfo, ResolvedResource, Settings};
use crate::error::AppError;
use crate::query::Query;
use crate::reshape::{Cell, FlatRow};
use crate::sql::{self, PgBindValue, QueryBuf};
use crate::store::Store;
use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Column, Row};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Column names and cast types of a table. Enums are schema-qualified; arrays get no type.
const CATALOG_SQL: &str = "SELECT a.attname::text AS name, \
     CASE WHEN t.typtype = 'e' THEN quote_ident(tn.nspname) || '.' || quote_ident(t.typname) \
          WHEN t.typcategory = 'A' THEN NULL \
          ELSE format_type(a.atttypid, a.atttypmod) END AS pg_type, \
     NOT a.attnotnull AS nullable, \
     (a.atthasdef OR a.attidentity <> '') AS has_default \
     FROM pg_attribute a \
     JOIN pg_class c ON c.oid = a.attrelid \
     JOIN pg_namespace n ON n.oid = c.relnamespace \
     JOIN pg_type t ON t.oid = a.atttypid \
     JOIN pg_namespace tn ON tn.oid = t.typnamespace \
     WHERE n.nspname = $1 AND c.relname = $2 AND a.attnum > 0 AND NOT a.attisdropped \
     ORDER BY a.attnum";

type TypedResources = HashMap<String, Arc<ResolvedResource>>;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    /// Resources with column types completed from the catalog, by table and resource name.
    typed: Arc<RwLock<TypedResources>>,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        PgStore {
            pool,
            typed: Arc::default(),
        }
    }

    /// Open a pool for `database_url` sized from settings.
    pub async fn connect(database_url: &str, settings: &Settings) -> Result<Self, AppError> {
        let pool = PgPoolOptions::new()
            .max_connections(settings.db_max_connections)
            .connect(database_url)
            .await?;
        tracing::info!(max_connections = settings.db_max_connections, "connected to database");
        Ok(PgStore::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Columns of `schema.table` as the catalog describes them.
    pub async fn catalog_columns(&self, schema: &str, table: &str) -> Result<Vec<ColumnInfo>, AppError> {
        let rows = sqlx::query(CATALOG_SQL)
            .bind(schema)
            .bind(table)
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|r| -> Result<ColumnInfo, AppError> {
                Ok(ColumnInfo {
                    name: r.try_get("name")?,
                    pg_type: r.try_get("pg_type")?,
                    nullable: r.try_get("nullable")?,
                    has_default: r.try_get("has_default")?,
                })
            })
            .collect()
    }

    /// The resource with every column type known, so written strings are cast to the
    /// column type instead of being sent as text. Looked up once per resource.
    async fn typed(&self, resource: &ResolvedResource) -> Result<Arc<ResolvedResource>, AppError> {
        let key = format!("{}.{}/{}", resource.schema_name, resource.table_name, resource.name);
        let cached = self
            .typed
            .read()
            .map_err(|_| AppError::Internal("RwLock read failed".to_string()))?
            .get(&key)
            .cloned();
        if let Some(hit) = cached {
            return Ok(hit);
        }
        let typed = if resource.needs_catalog() {
            let catalog = self.catalog_columns(&resource.schema_name, &resource.table_name).await?;
            if catalog.is_empty() {
                tracing::warn!(table = %key, "table not in catalog, column types unknown");
            }
            Arc::new(resource.with_catalog(&catalog))
        } else {
            Arc::new(resource.clone())
        };
        self.typed
            .write()
            .map_err(|_| AppError::Internal("RwLock write failed".to_string()))?
            .insert(key, typed.clone());
        Ok(typed)
    }

    async fn fetch_all(&self, q: &QueryBuf) -> Result<Vec<FlatRow>, AppError> {
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        let mut query = sqlx::query(&q.sql);
        for p in &q.params {
            query = query.bind(PgBindValue::from_json(p));
        }
        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows.iter().map(row_to_flat).collect())
    }

    async fn fetch_count(&self, q: &QueryBuf) -> Result<u64, AppError> {
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        let mut query = sqlx::query(&q.sql);
        for p in &q.params {
            query = query.bind(PgBindValue::from_json(p));
        }
        let row = query.fetch_one(&self.pool).await?;
        let n: i64 = row.try_get("count")?;
        Ok(n.max(0) as u64)
    }
}

#[async_trait]
impl Store for PgStore {
    async fn find_and_count(&self, resource: &ResolvedResource, query: &Query) -> Result<(Vec<FlatRow>, u64), AppError> {
        let resource = self.typed(resource).await?;
        let select = sql::select(&resource, query, false)?;
        let count = sql::count(&resource, query)?;
        tokio::try_join!(self.fetch_all(&select), self.fetch_count(&count))
    }

    async fn find_one(&self, resource: &ResolvedResource, query: &Query) -> Result<Option<FlatRow>, AppError> {
        let q = sql::select(&*self.typed(resource).await?, query, true)?;
        Ok(self.fetch_all(&q).await?.into_iter().next())
    }

    async fn insert(&self, resource: &ResolvedResource, values: &Map<String, Value>) -> Result<FlatRow, AppError> {
        let q = sql::insert(&*self.typed(resource).await?, values)?;
        self.fetch_all(&q)
            .await?
            .into_iter()
            .next()
            .ok_or(AppError::Db(sqlx::Error::RowNotFound))
    }

    async fn update(
        &self,
        resource: &ResolvedResource,
        query: &Query,
        values: &Map<String, Value>,
    ) -> Result<Vec<FlatRow>, AppError> {
        self.fetch_all(&sql::update(&*self.typed(resource).await?, query, values)?).await
    }

    async fn delete(&self, resource: &ResolvedResource, query: &Query) -> Result<Vec<FlatRow>, AppError> {
        self.fetch_all(&sql::delete(&*self.typed(resource).await?, query)?).await
    }

    async fn soft_delete(&self, resource: &ResolvedResource, query: &Query) -> Result<Vec<FlatRow>, AppError> {
        self.fetch_all(&sql::soft_delete(&*self.typed(resource).await?, query)?).await
    }

    async fn restore(&self, resource: &ResolvedResource, query: &Query) -> Result<Vec<FlatRow>, AppError> {
        self.fetch_all(&sql::restore(&*self.typed(resource).await?, query)?).await
    }
}

fn row_to_flat(row: &PgRow) -> FlatRow {
    row.columns()
        .iter()
        .map(|col| (col.name().to_string(), cell(row, col.ordinal())))
        .collect()
}

/// Decode one column by trying the types the compiler can select, most specific first.
fn cell(row: &PgRow, idx: usize) -> Cell {
    if let Ok(Some(n)) = row.try_get::<Option<i16>, _>(idx) {
        return Cell::Value(Value::Number(n.into()));
    }
    if let Ok(Some(n)) = row.try_get::<Option<i32>, _>(idx) {
        return Cell::Value(Value::Number(n.into()));
    }
    if let Ok(Some(n)) = row.try_get::<Option<i64>, _>(idx) {
        return Cell::Value(Value::Number(n.into()));
    }
    if let Ok(Some(n)) = row.try_get::<Option<f32>, _>(idx) {
        if let Some(n) = serde_json::Number::from_f64(n as f64) {
            return Cell::Value(Value::Number(n));
        }
    }
    if let Ok(Some(n)) = row.try_get::<Option<f64>, _>(idx) {
        if let Some(n) = serde_json::Number::from_f64(n) {
            return Cell::Value(Value::Number(n));
        }
    }
    if let Ok(Some(b)) = row.try_get::<Option<bool>, _>(idx) {
        return Cell::Value(Value::Bool(b));
    }
    if let Ok(Some(u)) = row.try_get::<Option<uuid::Uuid>, _>(idx) {
        return Cell::Value(Value::String(u.to_string()));
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(idx) {
        return Cell::Timestamp(d);
    }
    // timestamp without time zone is taken as UTC
    if let Ok(Some(d)) = row.try_get::<Option<chrono::NaiveDateTime>, _>(idx) {
        return Cell::Timestamp(d.and_utc());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::NaiveDate>, _>(idx) {
        return Cell::Value(Value::String(d.format("%Y-%m-%d").to_string()));
    }
    if let Ok(Some(s)) = row.try_get::<Option<String>, _>(idx) {
        return Cell::Value(Value::String(s));
    }
    if let Ok(Some(j)) = row.try_get::<Option<Value>, _>(idx) {
        return Cell::Value(j);
    }
    Cell::Value(Value::Null)
}
