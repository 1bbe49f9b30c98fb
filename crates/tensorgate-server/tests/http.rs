//! REST surface tests driven through the router without a socket.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;

use tensorgate_core::MemoryPool;
use tensorgate_runtime::SharedState;

use tensorgate_server::http;

fn shared_state() -> Arc<SharedState> {
    Arc::new(SharedState::new(
        tensorgate_workers::default_registry(),
        Arc::new(MemoryPool::new()),
        ["http".to_string(), "metrics".to_string()],
    ))
}

fn router() -> axum::Router {
    http::router(shared_state())
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), 1 << 20)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn post_empty(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn health_endpoints_respond() {
    let app = router();

    let response = app.clone().oneshot(get("/v2/health/live")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["live"], json!(true));

    let response = app.oneshot(get("/v2/health/ready")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn server_metadata_reports_extensions() {
    let app = router();
    let response = app.oneshot(get("/v2")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["name"], json!("tensorgate"));
    assert!(body["extensions"]
        .as_array()
        .unwrap()
        .contains(&json!("metrics")));
}

#[tokio::test]
async fn load_infer_unload_over_rest() {
    let app = router();

    let response = app
        .clone()
        .oneshot(post_empty("/v2/workers/echo/load"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["endpoint"], json!("echo"));

    let response = app
        .clone()
        .oneshot(get("/v2/models/echo/ready"))
        .await
        .unwrap();
    assert_eq!(body_json(response).await["ready"], json!(true));

    let infer = json!({
        "id": "1",
        "inputs": [
            { "name": "input", "shape": [1], "datatype": "UINT32", "data": [7] }
        ]
    });
    let response = app
        .clone()
        .oneshot(post_json("/v2/models/echo/infer", infer))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["model_name"], json!("echo"));
    assert_eq!(body["outputs"][0]["data"], json!([8]));

    let response = app
        .clone()
        .oneshot(post_empty("/v2/workers/echo/unload"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.oneshot(get("/v2/models")).await.unwrap();
    assert_eq!(body_json(response).await["models"], json!([]));
}

#[tokio::test]
async fn unknown_model_maps_to_404() {
    let app = router();
    let infer = json!({
        "inputs": [
            { "name": "input", "shape": [1], "datatype": "UINT32", "data": [7] }
        ]
    });
    let response = app
        .oneshot(post_json("/v2/models/ghost/infer", infer))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn malformed_request_maps_to_400() {
    let app = router();
    let response = app
        .clone()
        .oneshot(post_empty("/v2/workers/echo/load"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // no inputs at all
    let response = app
        .oneshot(post_json("/v2/models/echo/infer", json!({ "inputs": [] })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn metrics_exposition_renders() {
    let app = router();
    let response = app.oneshot(get("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = axum::body::to_bytes(response.into_body(), 1 << 20)
        .await
        .unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("tensorgate_requests_total"));
}

#[tokio::test]
async fn repository_load_resolves_the_platform() {
    let dir = tempfile::tempdir().unwrap();
    let model_dir = dir.path().join("plusone");
    std::fs::create_dir_all(&model_dir).unwrap();
    std::fs::write(
        model_dir.join("config.pbtxt"),
        concat!(
            "platform: \"vitis_xmodel\"\n",
            "parameters { key: \"worker\" value { string_param: \"echo\" } }\n",
        ),
    )
    .unwrap();

    let state = shared_state();
    state.set_repository(dir.path(), false).await;
    let app = http::router(state.clone());

    let response = app
        .clone()
        .oneshot(post_empty("/v2/repository/models/plusone/load"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(state.model_ready("plusone"));

    // the endpoint runs the worker named by the config
    let infer = json!({
        "inputs": [
            { "name": "input", "shape": [1], "datatype": "UINT32", "data": [41] }
        ]
    });
    let response = app
        .clone()
        .oneshot(post_json("/v2/models/plusone/infer", infer))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["outputs"][0]["data"], json!([42]));

    let response = app
        .oneshot(post_empty("/v2/repository/models/plusone/unload"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(!state.model_ready("plusone"));
}

#[tokio::test]
async fn hardware_endpoint_answers() {
    let app = router();
    let response = app
        .oneshot(post_json("/v2/hardware", json!({ "name": "cpu", "num": 1 })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["found"], json!(true));
}
