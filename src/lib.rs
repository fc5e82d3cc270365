//! Resource API: generated CRUD REST controllers with filtering, sorting, pagination,
//! soft delete, lifecycle hooks and nested result reshaping.

pub mod action;
pub mod case;
pub mod config;
pub mod context;
pub mod controller;
pub mod error;
pub mod hooks;
pub mod identity;
pub mod pluralize;
pub mod query;
pub mod reshape;
pub mod response;
pub mod routes;
pub mod sql;
pub mod store;

pub use action::{Action, ActionSet};
pub use config::{load_from_path, resolve, resolve_all, FullConfig, ResolvedResource, ResourceConfig, Settings};
pub use context::{ActionResponse, RequestContext, ResponseContext};
pub use controller::{CustomAction, ResourceController};
pub use error::{AppError, ConfigError};
pub use hooks::{BeforeOutcome, HookPipeline, NoHooks, ResourceHooks};
pub use identity::Identity;
pub use query::{CompareOp, Predicate, Query, SortDirection};
pub use reshape::{AliasMap, Cell, FlatRow, Reshaper};
pub use routes::{build_app, common_routes, resource_router, Middleware, MiddlewareGroup, RouterFactory};
pub use store::{MemoryStore, PgStore, Store};
