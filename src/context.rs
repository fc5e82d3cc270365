//! Request and response contexts handed to actions and hooks.

use crate::error::AppError;
use crate::identity::Identity;
use async_trait::async_trait;
use axum::{
    body::Bytes,
    extract::{FromRequest, FromRequestParts, Path, Query, Request},
    http::{HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    Json,
};
use indexmap::IndexMap;
use serde_json::Value;
use std::collections::HashMap;

/// Everything an action needs from the inbound request, detached from the transport.
#[derive(Clone, Debug)]
pub struct RequestContext {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    /// Path parameters captured by the router (including those of enclosing mounts).
    pub params: HashMap<String, String>,
    /// Query-string fields in request order; a repeated key keeps its last value.
    pub query: IndexMap<String, String>,
    /// JSON body, `Null` when the request had none.
    pub body: Value,
    pub identity: Identity,
}

impl RequestContext {
    pub fn new(method: Method, uri: &str) -> Self {
        let uri: Uri = uri.parse().unwrap_or_default();
        let query = uri
            .query()
            .map(|q| {
                Query::<Vec<(String, String)>>::try_from_uri(&uri)
                    .map(|Query(pairs)| pairs.into_iter().collect())
                    .unwrap_or_else(|_| {
                        tracing::warn!(query = %q, "unparseable query string ignored");
                        IndexMap::new()
                    })
            })
            .unwrap_or_default();
        RequestContext {
            method,
            uri,
            headers: HeaderMap::new(),
            params: HashMap::new(),
            query,
            body: Value::Null,
            identity: Identity::default(),
        }
    }

    pub fn get(uri: &str) -> Self {
        Self::new(Method::GET, uri)
    }

    pub fn with_param(mut self, name: &str, value: &str) -> Self {
        self.params.insert(name.to_string(), value.to_string());
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = body;
        self
    }

    pub fn with_identity(mut self, identity: Identity) -> Self {
        self.identity = identity;
        self
    }

    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }

    /// Top-level body field, if the body is an object holding it.
    pub fn body_field(&self, name: &str) -> Option<&Value> {
        self.body.as_object().and_then(|o| o.get(name))
    }
}

#[async_trait]
impl<S> FromRequest<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let (mut parts, body) = req.into_parts();
        let params = Path::<HashMap<String, String>>::from_request_parts(&mut parts, state)
            .await
            .map(|Path(p)| p)
            .unwrap_or_default();
        let identity = Identity::from_request_parts(&mut parts, state)
            .await
            .unwrap_or_default();

        let mut ctx = RequestContext::new(parts.method.clone(), &parts.uri.to_string());
        ctx.headers = parts.headers.clone();
        ctx.params = params;
        ctx.identity = identity;

        let bytes = Bytes::from_request(Request::from_parts(parts, body), state)
            .await
            .map_err(|e| match e.status() {
                StatusCode::PAYLOAD_TOO_LARGE => AppError::PayloadTooLarge(e.body_text()),
                _ => AppError::BadRequest(e.body_text()),
            })?;
        if !bytes.iter().all(u8::is_ascii_whitespace) {
            ctx.body = serde_json::from_slice(&bytes)
                .map_err(|e| AppError::BadRequest(format!("body must be valid JSON: {}", e)))?;
        }
        Ok(ctx)
    }
}

/// Response state a before-hook may replace: status and extra headers.
#[derive(Clone, Debug)]
pub struct ResponseContext {
    pub status: StatusCode,
    pub headers: HeaderMap,
}

impl ResponseContext {
    pub fn new(status: StatusCode) -> Self {
        ResponseContext {
            status,
            headers: HeaderMap::new(),
        }
    }
}

impl Default for ResponseContext {
    fn default() -> Self {
        Self::new(StatusCode::OK)
    }
}

/// Final result of an action: response context plus envelope.
#[derive(Clone, Debug)]
pub struct ActionResponse {
    pub ctx: ResponseContext,
    pub body: Value,
}

impl IntoResponse for ActionResponse {
    fn into_response(self) -> Response {
        (self.ctx.status, self.ctx.headers, Json(self.body)).into_response()
    }
}
