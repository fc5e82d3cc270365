//! Router factory: hand-written routes and sub-router mounts registered alongside generated
//! resource routes, for nested resource trees such as `/org/:orgId/widget/:id`.

use crate::controller::ResourceController;
use crate::error::ConfigError;
use crate::routes::registrar::{bindings, layer_method, layer_router, method_filter, resource_router, Middleware};
use axum::{
    handler::Handler,
    http::Method,
    routing::{on, MethodRouter},
    Router,
};
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Clone)]
pub enum FactoryEntry {
    Simple {
        method: Method,
        endpoint: String,
        middlewares: Vec<Middleware>,
        handler: MethodRouter,
    },
    /// `None` (or "/") merges the sub-router at the root of the enclosing router.
    /// `routes` lists (method, path) inside the sub-router when known.
    Mount {
        endpoint: Option<String>,
        middlewares: Vec<Middleware>,
        api: Router,
        routes: Vec<(String, String)>,
    },
}

#[derive(Clone, Default)]
pub struct RouterFactory {
    entries: Vec<FactoryEntry>,
}

fn join_path(prefix: &str, path: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    match path {
        "" | "/" if !prefix.is_empty() => prefix.to_string(),
        _ => format!("{}{}", prefix, path),
    }
}

impl RouterFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn simple<H, T>(
        mut self,
        method: Method,
        endpoint: impl Into<String>,
        middlewares: Vec<Middleware>,
        handler: H,
    ) -> Result<Self, ConfigError>
    where
        H: Handler<T, ()>,
        T: 'static,
    {
        let filter = method_filter(&method)?;
        self.entries.push(FactoryEntry::Simple {
            method,
            endpoint: endpoint.into(),
            middlewares,
            handler: on(filter, handler),
        });
        Ok(self)
    }

    /// Mount an arbitrary router; listed as `("*", prefix)`.
    pub fn mount(mut self, endpoint: Option<&str>, middlewares: Vec<Middleware>, api: Router) -> Self {
        self.entries.push(FactoryEntry::Mount {
            endpoint: endpoint.map(str::to_string),
            middlewares,
            api,
            routes: Vec::new(),
        });
        self
    }

    /// Mount a whole resource controller, keeping its routes for the endpoint listing.
    pub fn mount_resource(
        mut self,
        endpoint: Option<&str>,
        middlewares: Vec<Middleware>,
        controller: Arc<ResourceController>,
    ) -> Result<Self, ConfigError> {
        let mut routes = controller
            .router_factory()
            .map(RouterFactory::endpoints)
            .unwrap_or_default();
        routes.extend(bindings(&controller).into_iter().map(|b| (b.method.to_string(), b.path)));
        let api = resource_router(controller)?;
        self.entries.push(FactoryEntry::Mount {
            endpoint: endpoint.map(str::to_string),
            middlewares,
            api,
            routes,
        });
        Ok(self)
    }

    pub fn entries(&self) -> &[FactoryEntry] {
        &self.entries
    }

    /// (method, path) of every simple entry, in declaration order.
    pub fn simple_routes(&self) -> Vec<(Method, String)> {
        self.entries
            .iter()
            .filter_map(|e| match e {
                FactoryEntry::Simple { method, endpoint, .. } => Some((method.clone(), endpoint.clone())),
                FactoryEntry::Mount { .. } => None,
            })
            .collect()
    }

    /// Add every entry to `router`, in declaration order. A simple entry repeating an earlier
    /// method and path is skipped.
    pub fn register(&self, mut router: Router) -> Router {
        let mut seen = HashSet::new();
        for entry in &self.entries {
            router = match entry {
                FactoryEntry::Simple {
                    method,
                    endpoint,
                    middlewares,
                    handler,
                } => {
                    if !seen.insert((method.clone(), endpoint.clone())) {
                        tracing::warn!(%method, path = %endpoint, "factory route already bound, skipped");
                        continue;
                    }
                    router.route(endpoint, layer_method(handler.clone(), middlewares))
                }
                FactoryEntry::Mount {
                    endpoint,
                    middlewares,
                    api,
                    ..
                } => {
                    let api = layer_router(api.clone(), middlewares);
                    match endpoint.as_deref() {
                        None | Some("") | Some("/") => router.merge(api),
                        Some(prefix) => router.nest(prefix, api),
                    }
                }
            };
        }
        router
    }

    /// (method, path) of each simple entry and of each route inside a resource mount;
    /// other mounts are listed as `("*", prefix)`.
    pub fn endpoints(&self) -> Vec<(String, String)> {
        let mut out = Vec::new();
        for e in &self.entries {
            match e {
                FactoryEntry::Simple { method, endpoint, .. } => out.push((method.to_string(), endpoint.clone())),
                FactoryEntry::Mount { endpoint, routes, .. } => {
                    let prefix = endpoint.as_deref().unwrap_or("");
                    if routes.is_empty() {
                        out.push(("*".to_string(), join_path(prefix, "/")));
                    } else {
                        out.extend(routes.iter().map(|(m, p)| (m.clone(), join_path(prefix, p))));
                    }
                }
            }
        }
        out
    }
}
