//! HTTP surface: registrar, router factory, common routes and the application builder.

pub mod app;
pub mod common;
pub mod factory;
pub mod registrar;

pub use app::{build_app, endpoint_list};
pub use common::{common_routes, endpoints_route, EndpointInfo};
pub use factory::{FactoryEntry, RouterFactory};
pub use registrar::{
    bindings, middleware, middlewares_for, resource_router, ActionFilter, BindingTarget, Middleware,
    MiddlewareGroup, RouteBinding,
};
