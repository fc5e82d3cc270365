//! Lifecycle hooks: one optional before/after slot per action, all no-ops by default.
//!
//! A before-hook may replace the request and/or response context. An after-hook may replace
//! the payload (`models` for `find`, `model` otherwise). Returning `None` keeps the computed
//! value. Errors abort the action unchanged.

use crate::action::Action;
use crate::context::{RequestContext, ResponseContext};
use crate::error::AppError;
use crate::query::Predicate;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// Replacement contexts returned by a before-hook.
#[derive(Clone, Debug, Default)]
pub struct BeforeOutcome {
    pub req: Option<RequestContext>,
    pub res: Option<ResponseContext>,
}

impl BeforeOutcome {
    pub fn request(req: RequestContext) -> Self {
        BeforeOutcome {
            req: Some(req),
            res: None,
        }
    }

    pub fn response(res: ResponseContext) -> Self {
        BeforeOutcome {
            req: None,
            res: Some(res),
        }
    }
}

pub type BeforeResult = Result<Option<BeforeOutcome>, AppError>;

/// Overrides a concrete resource provides. Implement only what you need.
#[async_trait]
pub trait ResourceHooks: Send + Sync + 'static {
    /// Restriction AND-combined with every read and write query of this resource.
    fn base_restriction(&self, _req: &RequestContext) -> Option<Predicate> {
        None
    }

    async fn before_find(&self, _req: &RequestContext, _res: &ResponseContext) -> BeforeResult {
        Ok(None)
    }

    async fn after_find(
        &self,
        _req: &RequestContext,
        _res: &ResponseContext,
        _models: &[Value],
    ) -> Result<Option<Vec<Value>>, AppError> {
        Ok(None)
    }

    async fn before_get(&self, _req: &RequestContext, _res: &ResponseContext) -> BeforeResult {
        Ok(None)
    }

    async fn after_get(
        &self,
        _req: &RequestContext,
        _res: &ResponseContext,
        _model: &Value,
    ) -> Result<Option<Value>, AppError> {
        Ok(None)
    }

    async fn before_create(&self, _req: &RequestContext, _res: &ResponseContext) -> BeforeResult {
        Ok(None)
    }

    async fn after_create(
        &self,
        _req: &RequestContext,
        _res: &ResponseContext,
        _model: &Value,
    ) -> Result<Option<Value>, AppError> {
        Ok(None)
    }

    async fn before_update(&self, _req: &RequestContext, _res: &ResponseContext) -> BeforeResult {
        Ok(None)
    }

    async fn after_update(
        &self,
        _req: &RequestContext,
        _res: &ResponseContext,
        _model: &Value,
    ) -> Result<Option<Value>, AppError> {
        Ok(None)
    }

    async fn before_delete(&self, _req: &RequestContext, _res: &ResponseContext) -> BeforeResult {
        Ok(None)
    }

    async fn after_delete(
        &self,
        _req: &RequestContext,
        _res: &ResponseContext,
        _model: &Value,
    ) -> Result<Option<Value>, AppError> {
        Ok(None)
    }

    async fn before_soft_delete(&self, _req: &RequestContext, _res: &ResponseContext) -> BeforeResult {
        Ok(None)
    }

    async fn after_soft_delete(
        &self,
        _req: &RequestContext,
        _res: &ResponseContext,
        _model: &Value,
    ) -> Result<Option<Value>, AppError> {
        Ok(None)
    }

    async fn before_restore(&self, _req: &RequestContext, _res: &ResponseContext) -> BeforeResult {
        Ok(None)
    }

    async fn after_restore(
        &self,
        _req: &RequestContext,
        _res: &ResponseContext,
        _model: &Value,
    ) -> Result<Option<Value>, AppError> {
        Ok(None)
    }
}

/// Resource without overrides.
pub struct NoHooks;

impl ResourceHooks for NoHooks {}

/// Resolves the hook slot for an action and applies its outcome.
#[derive(Clone)]
pub struct HookPipeline {
    hooks: Arc<dyn ResourceHooks>,
}

impl HookPipeline {
    pub fn new(hooks: Arc<dyn ResourceHooks>) -> Self {
        HookPipeline { hooks }
    }

    pub fn base_restriction(&self, req: &RequestContext) -> Option<Predicate> {
        self.hooks.base_restriction(req)
    }

    pub async fn before(
        &self,
        action: Action,
        req: RequestContext,
        res: ResponseContext,
    ) -> Result<(RequestContext, ResponseContext), AppError> {
        let h = &self.hooks;
        let outcome = match action {
            Action::Find => h.before_find(&req, &res).await?,
            Action::Get => h.before_get(&req, &res).await?,
            Action::Create => h.before_create(&req, &res).await?,
            Action::Update => h.before_update(&req, &res).await?,
            Action::Delete => h.before_delete(&req, &res).await?,
            Action::SoftDelete => h.before_soft_delete(&req, &res).await?,
            Action::Restore => h.before_restore(&req, &res).await?,
        };
        Ok(match outcome {
            Some(BeforeOutcome { req: new_req, res: new_res }) => {
                (new_req.unwrap_or(req), new_res.unwrap_or(res))
            }
            None => (req, res),
        })
    }

    pub async fn after_many(
        &self,
        req: &RequestContext,
        res: &ResponseContext,
        models: Vec<Value>,
    ) -> Result<Vec<Value>, AppError> {
        Ok(self.hooks.after_find(req, res, &models).await?.unwrap_or(models))
    }

    pub async fn after_one(
        &self,
        action: Action,
        req: &RequestContext,
        res: &ResponseContext,
        model: Value,
    ) -> Result<Value, AppError> {
        let h = &self.hooks;
        let replaced = match action {
            // collection results go through `after_many`
            Action::Find => None,
            Action::Get => h.after_get(req, res, &model).await?,
            Action::Create => h.after_create(req, res, &model).await?,
            Action::Update => h.after_update(req, res, &model).await?,
            Action::Delete => h.after_delete(req, res, &model).await?,
            Action::SoftDelete => h.after_soft_delete(req, res, &model).await?,
            Action::Restore => h.after_restore(req, res, &model).await?,
        };
        Ok(replaced.unwrap_or(model))
    }
}
