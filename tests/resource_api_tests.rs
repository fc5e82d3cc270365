//! End-to-end tests driving the generated router with an in-memory store.

use axum::{
    body::{to_bytes, Body},
    extract::Request,
    http::{Method, StatusCode},
    middleware::Next,
    response::IntoResponse,
    Router,
};
use resource_api::config::ColumnConfig;
use resource_api::identity::{Identity, TIMEZONE_HEADER};
use resource_api::routes::{endpoint_list, middleware};
use resource_api::*;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tower::ServiceExt;

fn widget_config() -> ResourceConfig {
    let col = |name: &str, pg_type: Option<&str>, nullable: bool, has_default: bool| ColumnConfig {
        name: name.into(),
        pg_type: pg_type.map(str::to_string),
        nullable,
        has_default,
    };
    let mut config = ResourceConfig::named("widget");
    config.columns = vec![
        col("id", Some("bigint"), false, true),
        col("title", None, false, false),
        col("color", None, true, false),
        col("created_at", Some("timestamptz"), false, true),
        col("updated_at", Some("timestamptz"), false, true),
        col("deleted_at", Some("timestamptz"), true, false),
    ];
    config
}

fn controller(store: Arc<MemoryStore>) -> ResourceController {
    ResourceController::new(resolve(&widget_config()).unwrap(), store)
}

fn app(controllers: Vec<ResourceController>) -> Router {
    let settings = Settings::from_vars(&HashMap::new()).unwrap();
    let controllers: Vec<_> = controllers.into_iter().map(Arc::new).collect();
    build_app(&settings, &controllers).unwrap()
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let body = body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty);
    let req = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(body)
        .unwrap();
    let res = app.clone().oneshot(req).await.unwrap();
    let status = res.status();
    let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

async fn create(app: &Router, title: &str) -> Value {
    let (status, body) = send(app, Method::POST, "/api/widget", Some(json!({ "widget": { "title": title } }))).await;
    assert_eq!(status, StatusCode::CREATED);
    body
}

#[tokio::test]
async fn create_requires_the_resource_payload() {
    let app = app(vec![controller(Arc::new(MemoryStore::new()))]);
    let (status, body) = send(&app, Method::POST, "/api/widget", Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({ "error": "widget object in body is required" }));

    let body = create(&app, "t").await;
    assert_eq!(body["widget"]["id"], json!(1));
    assert_eq!(body["widget"]["title"], json!("t"));
    assert!(body["widget"]["created_at"].is_string());
}

#[tokio::test]
async fn not_null_violations_are_bad_requests() {
    let app = app(vec![controller(Arc::new(MemoryStore::new()))]);
    let (status, body) = send(&app, Method::POST, "/api/widget", Some(json!({ "widget": { "color": "red" } }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("not-null"));
}

#[tokio::test]
async fn find_pages_filters_and_sorts() {
    let app = app(vec![controller(Arc::new(MemoryStore::new()))]);
    create(&app, "a").await;
    create(&app, "b").await;

    let (status, body) = send(&app, Method::GET, "/api/widgets?skip=0&take=1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["length"], json!(2));
    assert_eq!(body["widgets"].as_array().unwrap().len(), 1);

    let (_, body) = send(&app, Method::GET, "/api/widgets?orderBy=title:desc", None).await;
    let titles: Vec<_> = body["widgets"].as_array().unwrap().iter().map(|w| w["title"].clone()).collect();
    assert_eq!(titles, vec![json!("b"), json!("a")]);

    let (_, body) = send(&app, Method::GET, "/api/widgets?title=b", None).await;
    assert_eq!(body["length"], json!(1));

    let (_, body) = send(&app, Method::GET, "/api/widgets?color=null&take=abc", None).await;
    assert_eq!(body["length"], json!(2));

    let search = json!({ "search": [{ "title": "a" }, { "title": "b" }], "orderBy": { "id": "desc" } });
    let (status, body) = send(&app, Method::POST, "/api/widgets", Some(search)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["length"], json!(2));
    assert_eq!(body["widgets"][0]["id"], json!(2));

    let (status, _) = send(&app, Method::GET, "/api/widgets?nope=1", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn non_numeric_ids_are_rejected_for_every_single_action() {
    let app = app(vec![controller(Arc::new(MemoryStore::new()))]);
    let cases = [
        (Method::GET, "/api/widget/abc"),
        (Method::PATCH, "/api/widget/abc"),
        (Method::DELETE, "/api/widget/abc"),
        (Method::DELETE, "/api/widget/abc/archive"),
        (Method::PATCH, "/api/widget/abc/restore"),
    ];
    for (method, uri) in cases {
        let (status, body) = send(&app, method, uri, Some(json!({ "widget": { "title": "x" } }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{}", uri);
        assert_eq!(body, json!({ "error": "ID is not valid" }));
    }
}

#[tokio::test]
async fn soft_delete_get_and_restore() {
    let app = app(vec![controller(Arc::new(MemoryStore::new()))]);
    create(&app, "a").await;

    let (status, body) = send(&app, Method::DELETE, "/api/widget/1/archive", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["widget"]["deleted_at"].is_string());

    let (status, body) = send(&app, Method::GET, "/api/widget/1", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, json!({ "error": "Resource not found" }));

    let (status, body) = send(&app, Method::GET, "/api/widget/1?withDeleted=true", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(!body["widget"]["deleted_at"].is_null());

    let (_, listed) = send(&app, Method::GET, "/api/widgets", None).await;
    assert_eq!(listed["length"], json!(0));

    let (status, first) = send(&app, Method::PATCH, "/api/widget/1/restore", None).await;
    assert_eq!(status, StatusCode::OK);
    let (_, second) = send(&app, Method::PATCH, "/api/widget/1/restore", None).await;
    assert_eq!(first, second);
    assert!(first["widget"]["deleted_at"].is_null());

    let (status, _) = send(&app, Method::PATCH, "/api/widget/9/restore", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn update_and_delete() {
    let app = app(vec![controller(Arc::new(MemoryStore::new()))]);
    create(&app, "a").await;

    let (status, body) = send(&app, Method::PATCH, "/api/widget/1", Some(json!({ "widget": { "color": "blue" } }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["widget"]["color"], json!("blue"));
    assert_eq!(body["widget"]["title"], json!("a"));

    let (status, _) = send(&app, Method::PATCH, "/api/widget/1", Some(json!({ "other": {} }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, Method::PATCH, "/api/widget/5", Some(json!({ "widget": { "color": "x" } }))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(&app, Method::DELETE, "/api/widget/1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["widget"]["id"], json!(1));
    let (status, _) = send(&app, Method::DELETE, "/api/widget/1", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn timestamps_follow_the_timezone_header() {
    let app = app(vec![controller(Arc::new(MemoryStore::new()))]);
    create(&app, "a").await;
    let req = Request::builder()
        .uri("/api/widget/1")
        .header(TIMEZONE_HEADER, "Asia/Kolkata")
        .body(Body::empty())
        .unwrap();
    let res = app.clone().oneshot(req).await.unwrap();
    let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert!(body["widget"]["created_at"].as_str().unwrap().ends_with("+05:30"));
}

#[tokio::test]
async fn excluded_actions_are_not_routed() {
    let mut config = widget_config();
    config.excludes = vec!["delete".into()];
    let c = ResourceController::new(resolve(&config).unwrap(), Arc::new(MemoryStore::new()));
    let app = app(vec![c]);
    create(&app, "a").await;
    let (status, _) = send(&app, Method::DELETE, "/api/widget/1", None).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    let (status, _) = send(&app, Method::DELETE, "/api/widget/1/archive", None).await;
    assert_eq!(status, StatusCode::OK);
}

struct Stamped;

#[async_trait::async_trait]
impl ResourceHooks for Stamped {
    async fn after_find(
        &self,
        _req: &RequestContext,
        _res: &ResponseContext,
        models: &[Value],
    ) -> Result<Option<Vec<Value>>, AppError> {
        Ok(Some(models.iter().map(|m| json!({ "title": m["title"], "seen": true })).collect()))
    }

    async fn before_delete(
        &self,
        _req: &RequestContext,
        _res: &ResponseContext,
    ) -> Result<Option<BeforeOutcome>, AppError> {
        Err(AppError::BadRequest("widgets cannot be deleted".into()))
    }
}

#[tokio::test]
async fn hooks_replace_payloads_and_abort_actions() {
    let app = app(vec![controller(Arc::new(MemoryStore::new())).with_hooks(Stamped)]);
    create(&app, "a").await;
    let (_, body) = send(&app, Method::GET, "/api/widgets", None).await;
    assert_eq!(body, json!({ "widgets": [{ "title": "a", "seen": true }], "length": 1 }));

    let (status, body) = send(&app, Method::DELETE, "/api/widget/1", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], json!("widgets cannot be deleted"));
}

#[tokio::test]
async fn middleware_groups_run_in_declaration_order() {
    let log = Arc::new(Mutex::new(Vec::<String>::new()));
    let record = |label: &'static str| {
        let log = log.clone();
        middleware(move |req: Request, next: Next| {
            let log = log.clone();
            async move {
                log.lock().unwrap().push(label.to_string());
                next.run(req).await
            }
        })
    };
    let deny = middleware(|_req: Request, _next: Next| async {
        (StatusCode::UNAUTHORIZED, "denied").into_response()
    });
    let c = controller(Arc::new(MemoryStore::new()))
        .with_middleware(MiddlewareGroup::all(vec![record("outer")]))
        .with_middleware(MiddlewareGroup::only(&["find", "create"], vec![record("inner")]))
        .with_middleware(MiddlewareGroup::only(&["delete"], vec![deny]));
    let app = app(vec![c]);

    create(&app, "a").await;
    assert_eq!(*log.lock().unwrap(), vec!["outer", "inner"]);

    log.lock().unwrap().clear();
    send(&app, Method::GET, "/api/widget/1", None).await;
    assert_eq!(*log.lock().unwrap(), vec!["outer"]);

    let (status, _) = send(&app, Method::DELETE, "/api/widget/1", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn identity_from_upstream_middleware() {
    let seen = Arc::new(Mutex::new(None::<String>));
    let sink = seen.clone();
    let auth = middleware(|mut req: Request, next: Next| async move {
        req.extensions_mut().insert(Identity {
            user_id: Some("42".into()),
            timezone: chrono_tz::Tz::UTC,
        });
        next.run(req).await
    });
    let whoami = CustomAction::new("widget-whoami", Method::GET, "/whoami", move |_c, req: RequestContext| {
        let sink = sink.clone();
        async move {
            *sink.lock().unwrap() = req.identity.user_id.clone();
            Ok(ActionResponse {
                ctx: ResponseContext::default(),
                body: json!({ "user": req.identity.user_id }),
            })
        }
    });
    let c = controller(Arc::new(MemoryStore::new()))
        .with_middleware(MiddlewareGroup::all(vec![auth]))
        .with_custom_action(whoami);
    let app = app(vec![c]);
    let (status, body) = send(&app, Method::GET, "/api/widget/whoami", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "user": "42" }));
    assert_eq!(seen.lock().unwrap().as_deref(), Some("42"));
}

#[tokio::test]
async fn custom_actions_reach_the_controller() {
    let publish = CustomAction::new("publish", Method::POST, "/:id/publish", |c: Arc<ResourceController>, req: RequestContext| async move {
        let id = req.params.get("id").cloned().unwrap_or_default();
        let patch = RequestContext::new(Method::PATCH, "/")
            .with_param("id", &id)
            .with_body(json!({ "widget": { "color": "published" } }));
        c.dispatch(Action::Update, patch).await
    });
    let app = app(vec![controller(Arc::new(MemoryStore::new())).with_custom_action(publish)]);
    create(&app, "a").await;
    let (status, body) = send(&app, Method::POST, "/api/widget/1/publish", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["widget"]["color"], json!("published"));
}

#[tokio::test]
async fn router_factory_mounts_nested_resources() {
    let store = Arc::new(MemoryStore::new());
    let mut part = ResourceConfig::named("part");
    part.id_path = ":widgetId/:id".into();
    let parts = Arc::new(ResourceController::new(resolve(&part).unwrap(), store.clone()));

    let factory = RouterFactory::new()
        .simple(Method::GET, "/health", vec![], || async { "ok" })
        .unwrap()
        .simple(Method::GET, "/widget/:id", vec![], || async { "overridden" })
        .unwrap()
        .mount_resource(Some("/scope/:tenant"), vec![], parts)
        .unwrap();
    let app = app(vec![controller(store).with_router_factory(factory)]);

    let (status, body) = send(&app, Method::POST, "/api/scope/acme/part", Some(json!({ "part": { "widgetId": 3 } }))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["part"]["id"], json!(1));

    let (status, body) = send(&app, Method::GET, "/api/scope/acme/part/3/1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["part"]["widgetId"], json!(3));

    let (status, _) = send(&app, Method::GET, "/api/scope/acme/part/4/1", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let req = Request::builder().uri("/api/health").body(Body::empty()).unwrap();
    assert_eq!(app.clone().oneshot(req).await.unwrap().status(), StatusCode::OK);

    let req = Request::builder().uri("/api/widget/1").body(Body::empty()).unwrap();
    let res = app.clone().oneshot(req).await.unwrap();
    let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"overridden");

    let (_, body) = send(&app, Method::GET, "/api/endpoints", None).await;
    let listed = body["endpoints"].as_array().unwrap();
    assert!(listed.contains(&json!({ "method": "GET", "path": "/api/scope/:tenant/part/:widgetId/:id" })));
    assert!(listed.contains(&json!({ "method": "GET", "path": "/api/health" })));
    let widget_gets = listed
        .iter()
        .filter(|e| **e == json!({ "method": "GET", "path": "/api/widget/:id" }))
        .count();
    assert_eq!(widget_gets, 1);
}

#[tokio::test]
async fn common_routes_and_endpoint_listing() {
    let c = Arc::new(controller(Arc::new(MemoryStore::new())));
    let settings = Settings::from_vars(&HashMap::new()).unwrap();
    let app = build_app(&settings, &[c.clone()]).unwrap();

    let (status, body) = send(&app, Method::GET, "/", None).await;
    assert_eq!((status, body), (StatusCode::OK, json!({ "alive?": true })));
    let (_, body) = send(&app, Method::GET, "/ping", None).await;
    assert_eq!(body, json!({ "pong": 1 }));

    let (_, body) = send(&app, Method::GET, "/api/endpoints", None).await;
    let listed = body["endpoints"].as_array().unwrap();
    assert_eq!(listed.len(), 8);
    assert!(listed.contains(&json!({ "method": "DELETE", "path": "/api/widget/:id/archive" })));
    assert_eq!(endpoint_list("/api", &[c]).len(), 8);

    let production: HashMap<String, String> = [("ENVIRONMENT".to_string(), "production".to_string())].into();
    let settings = Settings::from_vars(&production).unwrap();
    let app = build_app(&settings, &[]).unwrap();
    let (status, _) = send(&app, Method::GET, "/api/endpoints", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn oversized_bodies_are_rejected() {
    let vars: HashMap<String, String> = [("BODY_LIMIT_BYTES".to_string(), "64".to_string())].into();
    let settings = Settings::from_vars(&vars).unwrap();
    let c = Arc::new(controller(Arc::new(MemoryStore::new())));
    let app = build_app(&settings, &[c]).unwrap();
    let big = json!({ "widget": { "title": "x".repeat(200) } });
    let (status, _) = send(&app, Method::POST, "/api/widget", Some(big)).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
}
