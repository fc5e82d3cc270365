//! Common routes: liveness, ping, version, and the endpoint listing.

use axum::{routing::get, Json, Router};
use serde::Serialize;
use serde_json::{json, Value};

#[derive(Serialize)]
struct AliveBody {
    #[serde(rename = "alive?")]
    alive: bool,
}

async fn alive() -> Json<AliveBody> {
    Json(AliveBody { alive: true })
}

async fn ping() -> Json<Value> {
    Json(json!({ "pong": 1 }))
}

async fn version() -> Json<Value> {
    Json(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// One registered route, as listed by `GET /endpoints`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct EndpointInfo {
    pub method: String,
    pub path: String,
}

/// Common routes (no state): GET /, GET /ping, GET /version.
pub fn common_routes() -> Router {
    Router::new()
        .route("/", get(alive))
        .route("/ping", get(ping))
        .route("/version", get(version))
}

/// GET /endpoints listing every registered method and path; mounted under the API prefix.
pub fn endpoints_route(endpoints: Vec<EndpointInfo>) -> Router {
    let body = json!({ "endpoints": endpoints });
    Router::new().route("/endpoints", get(move || async move { Json(body) }))
}
