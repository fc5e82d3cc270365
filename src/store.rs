//! The query-capable connection consumed by controllers.
//!
//! A store executes assembled `Query` values against a resource's backing table and hands back
//! flat rows. Reads return keys aliased for the reshaper (`<baseKey>_<column>`); writes return
//! plain column names. Stores are shared across requests and manage their own pooling.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use crate::config::ResolvedResource;
use crate::error::AppError;
use crate::query::Query;
use crate::reshape::FlatRow;
use async_trait::async_trait;
use serde_json::{Map, Value};

#[async_trait]
pub trait Store: Send + Sync + 'static {
    /// One page of matching rows plus the total match count (ignoring skip/take).
    async fn find_and_count(&self, resource: &ResolvedResource, query: &Query) -> Result<(Vec<FlatRow>, u64), AppError>;

    /// First matching row, if any.
    async fn find_one(&self, resource: &ResolvedResource, query: &Query) -> Result<Option<FlatRow>, AppError>;

    async fn insert(&self, resource: &ResolvedResource, values: &Map<String, Value>) -> Result<FlatRow, AppError>;

    async fn update(
        &self,
        resource: &ResolvedResource,
        query: &Query,
        values: &Map<String, Value>,
    ) -> Result<Vec<FlatRow>, AppError>;

    async fn delete(&self, resource: &ResolvedResource, query: &Query) -> Result<Vec<FlatRow>, AppError>;

    /// Stamp the soft-delete column of matching rows.
    async fn soft_delete(&self, resource: &ResolvedResource, query: &Query) -> Result<Vec<FlatRow>, AppError>;

    /// Clear the soft-delete column of matching rows.
    async fn restore(&self, resource: &ResolvedResource, query: &Query) -> Result<Vec<FlatRow>, AppError>;
}
