//! Common test utilities.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use intake_server::app::{build_router, build_state};
use intake_server::config::Config;
use intake_server::store::MemoryStore;
use intake_server::types::{AppState, ToolDefinition};

pub struct TestApp {
    pub store: Arc<MemoryStore>,
    pub state: Arc<AppState>,
}

impl TestApp {
    pub fn router(&self) -> Router {
        build_router(self.state.clone())
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router().oneshot(request).await.unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body).unwrap()
        };
        (status, json)
    }
}

pub fn test_config() -> Config {
    Config {
        webhook_timeout: Duration::from_secs(5),
        execution_timeout: Duration::from_secs(300),
        callback_secret: None,
        default_provider: None,
        ..Config::default()
    }
}

/// App over an in-memory store with no completion provider.
pub fn test_app_with(config: Config) -> TestApp {
    let store = Arc::new(MemoryStore::new());
    let state = build_state(config, store.clone(), store.clone(), store.clone());
    TestApp { store, state }
}

pub fn test_app() -> TestApp {
    test_app_with(test_config())
}

pub fn post_json(uri: &str, body: &str) -> Request<Body> {
    Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

/// Serve `router` on an ephemeral port and return its base URL.
pub async fn spawn_webhook(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

pub fn tool(id: &str, name: &str, description: &str, webhook_url: String) -> ToolDefinition {
    ToolDefinition {
        id: id.to_string(),
        tenant_id: "office-1".to_string(),
        name: name.to_string(),
        description: description.to_string(),
        webhook_url,
        is_active: true,
    }
}
