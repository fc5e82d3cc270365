//! Application router: common routes plus every resource under the API prefix.

use crate::config::Settings;
use crate::controller::ResourceController;
use crate::error::ConfigError;
use crate::routes::common::{common_routes, endpoints_route, EndpointInfo};
use crate::routes::registrar::{bindings, resource_router};
use axum::Router;
use std::sync::Arc;
use tower_http::limit::RequestBodyLimitLayer;

fn prefixed(prefix: &str, path: &str) -> String {
    format!("{}{}", prefix.trim_end_matches('/'), path)
}

/// Every route the resources register, with the API prefix applied.
pub fn endpoint_list(prefix: &str, controllers: &[Arc<ResourceController>]) -> Vec<EndpointInfo> {
    let mut out = Vec::new();
    for c in controllers {
        if let Some(factory) = c.router_factory() {
            out.extend(factory.endpoints().into_iter().map(|(method, path)| EndpointInfo {
                method,
                path: prefixed(prefix, &path),
            }));
        }
        out.extend(bindings(c).into_iter().map(|b| EndpointInfo {
            method: b.method.to_string(),
            path: prefixed(prefix, &b.path),
        }));
    }
    out
}

/// Full application: common routes at the root, resources under `settings.api_prefix`,
/// the endpoint listing (`<prefix>/endpoints`) in develop mode, and the request body limit.
pub fn build_app(settings: &Settings, controllers: &[Arc<ResourceController>]) -> Result<Router, ConfigError> {
    let prefix = settings.api_prefix.trim_end_matches('/');
    let mut api = Router::new();
    for c in controllers {
        api = api.merge(resource_router(c.clone())?);
    }
    if settings.is_develop() {
        api = api.merge(endpoints_route(endpoint_list(prefix, controllers)));
    }
    let app = common_routes();
    let app = if prefix.is_empty() {
        app.merge(api)
    } else {
        app.nest(prefix, api)
    };
    tracing::info!(
        resources = controllers.len(),
        prefix = %settings.api_prefix,
        "routes built"
    );
    Ok(app.layer(RequestBodyLimitLayer::new(settings.body_limit_bytes)))
}
