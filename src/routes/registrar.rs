//! Route/action registrar: method + path + middleware triples for a controller, and the axum
//! router built from them.

use crate::action::Action;
use crate::context::RequestContext;
use crate::controller::ResourceController;
use crate::error::ConfigError;
use axum::{
    extract::Request,
    http::Method,
    middleware::{from_fn, Next},
    response::Response,
    routing::{on, MethodFilter, MethodRouter},
    Router,
};
use futures::future::BoxFuture;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

/// Request middleware: may short-circuit or call `next`.
pub type Middleware = Arc<dyn Fn(Request, Next) -> BoxFuture<'static, Response> + Send + Sync>;

/// Wrap an async fn `(Request, Next) -> Response` as a `Middleware`.
pub fn middleware<F, Fut>(f: F) -> Middleware
where
    F: Fn(Request, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    Arc::new(move |req, next| Box::pin(f(req, next)))
}

/// Which actions a middleware group applies to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ActionFilter {
    All,
    Only(Vec<String>),
}

#[derive(Clone)]
pub struct MiddlewareGroup {
    pub actions: ActionFilter,
    pub middlewares: Vec<Middleware>,
}

impl MiddlewareGroup {
    pub fn all(middlewares: Vec<Middleware>) -> Self {
        MiddlewareGroup {
            actions: ActionFilter::All,
            middlewares,
        }
    }

    /// Group for the named actions (built-in names such as "softDelete", or custom names).
    /// A "*" entry matches everything.
    pub fn only(actions: &[&str], middlewares: Vec<Middleware>) -> Self {
        MiddlewareGroup {
            actions: ActionFilter::Only(actions.iter().map(|a| a.to_string()).collect()),
            middlewares,
        }
    }

    pub fn applies_to(&self, action: &str) -> bool {
        match &self.actions {
            ActionFilter::All => true,
            ActionFilter::Only(names) => names.iter().any(|n| n == "*" || n == action),
        }
    }
}

/// Middlewares of every matching group, groups in declaration order.
pub fn middlewares_for(groups: &[MiddlewareGroup], action: &str) -> Vec<Middleware> {
    groups
        .iter()
        .filter(|g| g.applies_to(action))
        .flat_map(|g| g.middlewares.iter().cloned())
        .collect()
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BindingTarget {
    Builtin(Action),
    Custom(String),
}

impl BindingTarget {
    pub fn name(&self) -> &str {
        match self {
            BindingTarget::Builtin(a) => a.name(),
            BindingTarget::Custom(name) => name,
        }
    }
}

#[derive(Clone)]
pub struct RouteBinding {
    pub target: BindingTarget,
    pub method: Method,
    pub path: String,
    pub middlewares: Vec<Middleware>,
}

/// Custom actions first, then the registered built-ins in their fixed order. When two
/// bindings claim the same method and path, the first one wins; simple router-factory
/// routes are registered before any binding and win over both.
pub fn bindings(controller: &ResourceController) -> Vec<RouteBinding> {
    let resource = controller.resource();
    let groups = controller.middlewares();
    let custom = controller.custom_actions().iter().map(|c| {
        (
            BindingTarget::Custom(c.name.clone()),
            c.method.clone(),
            format!("/{}{}", resource.name, c.endpoint),
        )
    });
    let builtin = controller.actions().registered().into_iter().flat_map(|action| {
        action
            .bindings(&resource.name, &resource.plural, &resource.id_path)
            .into_iter()
            .map(move |(method, path)| (BindingTarget::Builtin(action), method, path))
    });

    let mut seen: HashSet<(Method, String)> = controller
        .router_factory()
        .map(|f| f.simple_routes().into_iter().collect())
        .unwrap_or_default();
    let mut out = Vec::new();
    for (target, method, path) in custom.chain(builtin) {
        if !seen.insert((method.clone(), path.clone())) {
            tracing::warn!(resource = %resource.name, %method, %path, action = target.name(), "route already bound, skipped");
            continue;
        }
        let middlewares = middlewares_for(groups, target.name());
        out.push(RouteBinding {
            target,
            method,
            path,
            middlewares,
        });
    }
    out
}

pub(crate) fn method_filter(method: &Method) -> Result<MethodFilter, ConfigError> {
    MethodFilter::try_from(method.clone())
        .map_err(|_| ConfigError::Validation(format!("unsupported route method {}", method)))
}

/// Wrap a method router so the first middleware runs outermost.
pub(crate) fn layer_method(mut route: MethodRouter, middlewares: &[Middleware]) -> MethodRouter {
    for m in middlewares.iter().rev() {
        let m = m.clone();
        route = route.layer(from_fn(move |req: Request, next: Next| m(req, next)));
    }
    route
}

/// Same as `layer_method` for a whole router.
pub(crate) fn layer_router(mut router: Router, middlewares: &[Middleware]) -> Router {
    for m in middlewares.iter().rev() {
        let m = m.clone();
        router = router.layer(from_fn(move |req: Request, next: Next| m(req, next)));
    }
    router
}

/// Router for one controller: its router factory first, then every binding.
pub fn resource_router(controller: Arc<ResourceController>) -> Result<Router, ConfigError> {
    let mut router = Router::new();
    if let Some(factory) = controller.router_factory() {
        router = factory.register(router);
    }
    for binding in bindings(&controller) {
        let filter = method_filter(&binding.method)?;
        let route: MethodRouter = match &binding.target {
            BindingTarget::Builtin(action) => {
                let action = *action;
                let c = controller.clone();
                on(filter, move |req: RequestContext| async move { c.dispatch(action, req).await })
            }
            BindingTarget::Custom(name) => {
                let Some(custom) = controller.custom_actions().iter().find(|a| &a.name == name) else {
                    continue;
                };
                let handler = custom.handler.clone();
                let c = controller.clone();
                on(filter, move |req: RequestContext| handler(c.clone(), req))
            }
        };
        tracing::debug!(method = %binding.method, path = %binding.path, action = binding.target.name(), "route");
        router = router.route(&binding.path, layer_method(route, &binding.middlewares));
    }
    Ok(router)
}
