//! The resource controller: seven built-in actions over one resource, plus custom actions.
//!
//! Every action runs the same sequence: before-hook, query assembly, one store call,
//! reshaping, after-hook, envelope. The first error aborts the action.

use crate::action::{Action, ActionSet};
use crate::config::ResolvedResource;
use crate::context::{ActionResponse, RequestContext, ResponseContext};
use crate::error::{AppError, NOT_NULL_VIOLATION};
use crate::hooks::{HookPipeline, NoHooks, ResourceHooks};
use crate::query::{assemble_find, assemble_single, flag, single_record_predicate, Query};
use crate::reshape::{AliasMap, FlatRow, Reshaper};
use crate::response;
use crate::routes::{MiddlewareGroup, RouterFactory};
use crate::store::Store;
use axum::http::{Method, StatusCode};
use futures::future::BoxFuture;
use serde_json::{Map, Value};
use std::future::Future;
use std::sync::Arc;

pub type CustomHandler =
    Arc<dyn Fn(Arc<ResourceController>, RequestContext) -> BoxFuture<'static, Result<ActionResponse, AppError>> + Send + Sync>;

/// A named action beyond the built-ins, mounted at `/<resource name><endpoint>`.
#[derive(Clone)]
pub struct CustomAction {
    pub name: String,
    pub method: Method,
    pub endpoint: String,
    pub handler: CustomHandler,
}

impl CustomAction {
    pub fn new<F, Fut>(name: impl Into<String>, method: Method, endpoint: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Arc<ResourceController>, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ActionResponse, AppError>> + Send + 'static,
    {
        CustomAction {
            name: name.into(),
            method,
            endpoint: endpoint.into(),
            handler: Arc::new(move |controller, req| Box::pin(handler(controller, req))),
        }
    }
}

pub struct ResourceController {
    resource: Arc<ResolvedResource>,
    store: Arc<dyn Store>,
    hooks: HookPipeline,
    aliases: AliasMap,
    actions: ActionSet,
    middlewares: Vec<MiddlewareGroup>,
    custom: Vec<CustomAction>,
    router_factory: Option<RouterFactory>,
}

impl ResourceController {
    pub fn new(resource: ResolvedResource, store: Arc<dyn Store>) -> Self {
        let actions = ActionSet::new(resource.includes.clone(), resource.excludes.clone());
        let aliases = resource.alias_map();
        ResourceController {
            resource: Arc::new(resource),
            store,
            hooks: HookPipeline::new(Arc::new(NoHooks)),
            aliases,
            actions,
            middlewares: Vec::new(),
            custom: Vec::new(),
            router_factory: None,
        }
    }

    pub fn with_hooks(mut self, hooks: impl ResourceHooks) -> Self {
        self.hooks = HookPipeline::new(Arc::new(hooks));
        self
    }

    /// Replace the include/exclude sets taken from the resource declaration.
    pub fn with_actions(mut self, actions: ActionSet) -> Self {
        self.actions = actions;
        self
    }

    pub fn with_middleware(mut self, group: MiddlewareGroup) -> Self {
        self.middlewares.push(group);
        self
    }

    pub fn with_custom_action(mut self, action: CustomAction) -> Self {
        self.custom.push(action);
        self
    }

    pub fn with_router_factory(mut self, factory: RouterFactory) -> Self {
        self.router_factory = Some(factory);
        self
    }

    pub fn resource(&self) -> &ResolvedResource {
        &self.resource
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn aliases(&self) -> &AliasMap {
        &self.aliases
    }

    pub fn actions(&self) -> &ActionSet {
        &self.actions
    }

    pub fn middlewares(&self) -> &[MiddlewareGroup] {
        &self.middlewares
    }

    pub fn custom_actions(&self) -> &[CustomAction] {
        &self.custom
    }

    pub fn router_factory(&self) -> Option<&RouterFactory> {
        self.router_factory.as_ref()
    }

    /// Run one built-in action end to end.
    pub async fn dispatch(&self, action: Action, req: RequestContext) -> Result<ActionResponse, AppError> {
        tracing::debug!(resource = %self.resource.name, action = %action, "dispatch");
        let initial = ResponseContext::new(match action {
            Action::Create => StatusCode::CREATED,
            _ => StatusCode::OK,
        });
        let (req, res) = self.hooks.before(action, req, initial).await?;
        match action {
            Action::Find => self.find(req, res).await,
            Action::Get => self.get(req, res).await,
            Action::Create => self.create(req, res).await,
            Action::Update => self.update(req, res).await,
            Action::Delete | Action::SoftDelete | Action::Restore => self.remove(action, req, res).await,
        }
    }

    async fn find(&self, req: RequestContext, res: ResponseContext) -> Result<ActionResponse, AppError> {
        let query = assemble_find(&req, self.hooks.base_restriction(&req));
        let (rows, length) = self.store.find_and_count(&self.resource, &query).await?;
        let models = Reshaper::new(&self.aliases, &req.identity).rows(&rows);
        let models = self.hooks.after_many(&req, &res, models).await?;
        let body = response::collection(&self.resource.plural, models, length);
        Ok(ActionResponse { ctx: res, body })
    }

    async fn get(&self, req: RequestContext, res: ResponseContext) -> Result<ActionResponse, AppError> {
        let query = self.single_query(&req, flag(req.query_param("withDeleted")))?;
        let row = self
            .store
            .find_one(&self.resource, &query)
            .await?
            .ok_or_else(AppError::not_found)?;
        let model = Reshaper::new(&self.aliases, &req.identity).row(Some(&row));
        self.respond(Action::Get, req, res, model).await
    }

    async fn create(&self, req: RequestContext, res: ResponseContext) -> Result<ActionResponse, AppError> {
        let payload = self.payload(&req, true)?;
        let row = self
            .store
            .insert(&self.resource, payload)
            .await
            .map_err(not_null_to_constraint)?;
        let model = Reshaper::new(&self.aliases, &req.identity).plain(&row);
        self.respond(Action::Create, req, res, model).await
    }

    async fn update(&self, req: RequestContext, res: ResponseContext) -> Result<ActionResponse, AppError> {
        let query = self.single_query(&req, flag(req.query_param("withDeleted")))?;
        let payload = self.payload(&req, false)?;
        let rows = self.store.update(&self.resource, &query, payload).await?;
        self.respond_written(Action::Update, req, res, rows).await
    }

    /// delete, softDelete and restore: one terminal write over the single-record query.
    async fn remove(&self, action: Action, req: RequestContext, res: ResponseContext) -> Result<ActionResponse, AppError> {
        let with_deleted = action == Action::Restore || flag(req.query_param("withDeleted"));
        let query = self.single_query(&req, with_deleted)?;
        let rows = match action {
            Action::SoftDelete => self.store.soft_delete(&self.resource, &query).await?,
            Action::Restore => self.store.restore(&self.resource, &query).await?,
            _ => self.store.delete(&self.resource, &query).await?,
        };
        self.respond_written(action, req, res, rows).await
    }

    fn single_query(&self, req: &RequestContext, with_deleted: bool) -> Result<Query, AppError> {
        let id = single_record_predicate(&self.resource, req)?;
        Ok(assemble_single(id, self.hooks.base_restriction(req), with_deleted))
    }

    /// The entity payload under the resource-name key. Create accepts `{}` (all defaults).
    fn payload<'r>(&self, req: &'r RequestContext, allow_empty: bool) -> Result<&'r Map<String, Value>, AppError> {
        req.body_field(&self.resource.name)
            .and_then(Value::as_object)
            .filter(|o| allow_empty || !o.is_empty())
            .ok_or_else(|| AppError::BadRequest(format!("{} object in body is required", self.resource.name)))
    }

    async fn respond_written(
        &self,
        action: Action,
        req: RequestContext,
        res: ResponseContext,
        rows: Vec<FlatRow>,
    ) -> Result<ActionResponse, AppError> {
        let row = rows.into_iter().next().ok_or_else(AppError::not_found)?;
        let model = Reshaper::new(&self.aliases, &req.identity).plain(&row);
        self.respond(action, req, res, model).await
    }

    async fn respond(
        &self,
        action: Action,
        req: RequestContext,
        res: ResponseContext,
        model: Value,
    ) -> Result<ActionResponse, AppError> {
        let model = self.hooks.after_one(action, &req, &res, model).await?;
        let body = response::single(&self.resource.name, model);
        Ok(ActionResponse { ctx: res, body })
    }
}

/// Not-null violations become client errors carrying the store message.
fn not_null_to_constraint(err: AppError) -> AppError {
    if err.sql_state().as_deref() == Some(NOT_NULL_VIOLATION) {
        AppError::Constraint(err.store_message())
    } else {
        err
    }
}
