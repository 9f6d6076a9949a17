//! Integration tests for the HTTP API.

use axum::http::StatusCode;
use axum::{routing::post, Json, Router};
use chrono::Utc;
use serde_json::{json, Value};

mod common;

use common::{get, post_json, spawn_webhook, test_app, test_app_with, test_config, tool};
use intake_server::signing::{sign_body, SIGNATURE_HEADER};
use intake_server::store::ExecutionLedger;
use intake_server::types::{ExecutionRecord, ExecutionStatus};

fn pending_record(correlation_id: &str, conversation_id: &str, age_minutes: i64) -> ExecutionRecord {
    ExecutionRecord {
        id: format!("exec-{correlation_id}"),
        tenant_id: "office-1".to_string(),
        tool_id: "tool-cpf".to_string(),
        correlation_id: correlation_id.to_string(),
        description: "consultar o CPF 123.456.789-00".to_string(),
        status: ExecutionStatus::Pending,
        request_metadata: json!({ "sent": true }),
        response_data: None,
        error_message: None,
        started_at: Utc::now() - chrono::Duration::minutes(age_minutes),
        completed_at: None,
        conversation_id: Some(conversation_id.to_string()),
        agent_id: None,
        retry_of: None,
    }
}

// ============================================================================
// Health
// ============================================================================

#[tokio::test]
async fn test_health() {
    let app = test_app();
    let (status, body) = app.send(get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "ok": true }));
}

// ============================================================================
// Callbacks
// ============================================================================

#[tokio::test]
async fn test_callback_unknown_request_id_is_404() {
    let app = test_app();

    let (status, body) = app
        .send(post_json(
            "/api/tools/callback",
            r#"{"requestId":"does-not-exist","success":true,"result":{"ok":true}}"#,
        ))
        .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["requestId"], json!("does-not-exist"));
    assert!(body["error"].is_string());
    assert_eq!(app.store.execution_count().await, 0);
}

#[tokio::test]
async fn test_callback_finalizes_and_duplicate_reports_stored_status() {
    let app = test_app();
    app.store.insert(&pending_record("corr-1", "conv-1", 1)).await.unwrap();

    let (status, body) = app
        .send(post_json(
            "/api/tools/callback",
            r#"{"requestId":"corr-1","success":true,"result":{"nome":"Maria"},"metadata":{"source":"n8n","executionTime":2.5}}"#,
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "executionId": "exec-corr-1", "status": "SUCCESS" }));

    let (status, body) = app
        .send(post_json(
            "/api/tools/callback",
            r#"{"requestId":"corr-1","success":false,"error":"late"}"#,
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], json!("SUCCESS"));

    let stored = app.store.get("exec-corr-1").await.unwrap().unwrap();
    assert_eq!(stored.status, ExecutionStatus::Success);
    assert_eq!(stored.response_data, Some(json!({ "nome": "Maria" })));
    assert!(stored.error_message.is_none());
}

#[tokio::test]
async fn test_callback_validation_errors_are_400() {
    let app = test_app();

    let (status, body) = app
        .send(post_json("/api/tools/callback", r#"{"success":"yes"}"#))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let details = body["details"].as_array().unwrap();
    assert!(details.contains(&json!("requestId is required")));
    assert!(details.contains(&json!("success must be a boolean")));

    let (status, _) = app.send(post_json("/api/tools/callback", "{not json")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_callback_signature_enforced_when_secret_set() {
    let mut config = test_config();
    config.callback_secret = Some("s3cret".to_string());
    let app = test_app_with(config);
    app.store.insert(&pending_record("corr-2", "conv-1", 1)).await.unwrap();
    let body = r#"{"requestId":"corr-2","success":true}"#;

    let (status, _) = app.send(post_json("/api/tools/callback", body)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let signature = sign_body("s3cret", body.as_bytes()).unwrap();
    let mut request = post_json("/api/tools/callback", body);
    request.headers_mut().insert(
        SIGNATURE_HEADER,
        format!("sha256={signature}").parse().unwrap(),
    );
    let (status, body) = app.send(request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], json!("SUCCESS"));
}

// ============================================================================
// Executions
// ============================================================================

#[tokio::test]
async fn test_get_and_list_executions() {
    let app = test_app();
    app.store.insert(&pending_record("older", "conv-7", 10)).await.unwrap();
    app.store.insert(&pending_record("newer", "conv-7", 1)).await.unwrap();
    app.store.insert(&pending_record("other", "conv-8", 1)).await.unwrap();

    let (status, body) = app.send(get("/api/executions/exec-older")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["correlationId"], json!("older"));
    assert_eq!(body["status"], json!("PENDING"));
    assert_eq!(body["completedAt"], Value::Null);

    let (status, _) = app.send(get("/api/executions/missing")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = app.send(get("/api/conversations/conv-7/executions")).await;
    assert_eq!(status, StatusCode::OK);
    let ids = body
        .as_array()
        .unwrap()
        .iter()
        .map(|record| record["id"].as_str().unwrap().to_string())
        .collect::<Vec<_>>();
    assert_eq!(ids, vec!["exec-newer".to_string(), "exec-older".to_string()]);
}

#[tokio::test]
async fn test_sweep_then_late_callback_is_noop() {
    let app = test_app();
    app.store.insert(&pending_record("stale", "conv-1", 6)).await.unwrap();
    app.store.insert(&pending_record("fresh", "conv-1", 1)).await.unwrap();

    let (status, body) = app.send(post_json("/api/sweeps", "")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "timedOut": 1 }));

    let (status, body) = app
        .send(post_json(
            "/api/tools/callback",
            r#"{"requestId":"stale","success":true,"result":{"ok":true}}"#,
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], json!("TIMEOUT"));

    let stored = app.store.get("exec-stale").await.unwrap().unwrap();
    assert_eq!(stored.status, ExecutionStatus::Timeout);
    assert_eq!(
        stored.error_message.as_deref(),
        Some("No callback received within 5 minutes")
    );
    assert!(stored.response_data.is_none());
}

#[tokio::test]
async fn test_retry_endpoint_status_codes() {
    let base = spawn_webhook(Router::new().route(
        "/cpf",
        post(|| async { Json(json!({ "valid": true })) }),
    ))
    .await;
    let app = test_app();
    app.store
        .put_tool(tool(
            "tool-cpf",
            "Consultar CPF",
            "consulta de CPF para validação de documentos",
            format!("{base}/cpf"),
        ))
        .await;
    app.store.insert(&pending_record("first", "conv-1", 1)).await.unwrap();

    let (status, _) = app.send(post_json("/api/executions/exec-first/retry", "")).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = app.send(post_json("/api/executions/nope/retry", "")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    app.send(post_json(
        "/api/tools/callback",
        r#"{"requestId":"first","success":false,"error":"timeout upstream"}"#,
    ))
    .await;

    let (status, body) = app.send(post_json("/api/executions/exec-first/retry", "")).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["retryOf"], json!("exec-first"));
    assert_eq!(body["status"], json!("completed"));
    assert_ne!(body["correlationId"], json!("first"));

    let retried = app
        .store
        .get(body["executionId"].as_str().unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(retried.status, ExecutionStatus::Success);
    assert_eq!(retried.retry_of.as_deref(), Some("exec-first"));
    assert_eq!(
        app.store.get("exec-first").await.unwrap().unwrap().status,
        ExecutionStatus::Error
    );

    let mut inactive = tool("tool-cpf", "Consultar CPF", "consulta de CPF", format!("{base}/cpf"));
    inactive.is_active = false;
    app.store.put_tool(inactive).await;
    let (status, _) = app.send(post_json("/api/executions/exec-first/retry", "")).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

// ============================================================================
// Agent messages
// ============================================================================

#[tokio::test]
async fn test_agent_message_runs_tools_and_reports_failures() {
    let base = spawn_webhook(
        Router::new()
            .route("/cpf", post(|| async { Json(json!({ "nome": "Maria" })) }))
            .route(
                "/procuracao",
                post(|| async { (StatusCode::SERVICE_UNAVAILABLE, "maintenance") }),
            ),
    )
    .await;
    let app = test_app();
    app.store
        .put_tool(tool(
            "tool-cpf",
            "Consultar CPF",
            "consulta de CPF para validação de documentos",
            format!("{base}/cpf"),
        ))
        .await;
    app.store
        .put_tool(tool(
            "tool-proc",
            "Gerar Procuração",
            "gera procuração ad judicia para o cliente",
            format!("{base}/procuracao"),
        ))
        .await;

    let (status, body) = app
        .send(post_json(
            "/api/conversations/conv-42/agent-messages",
            r#"{"tenantId":"office-1","agentId":"agent-1","text":"Pode consultar o CPF do cliente? Também preciso gerar a procuração."}"#,
        ))
        .await;

    assert_eq!(status, StatusCode::OK);
    let runs = body["runs"].as_array().unwrap();
    assert_eq!(runs.len(), 2);
    assert_eq!(runs[0]["state"], json!("completed"));
    assert_eq!(runs[1]["state"], json!("failed"));
    let reply = body["reply"].as_str().unwrap();
    assert!(reply.contains("An error occurred running \"Gerar Procuração\""));
    assert_eq!(body["transferTo"], Value::Null);

    let (_, listed) = app.send(get("/api/conversations/conv-42/executions")).await;
    assert_eq!(listed.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_agent_message_requires_tenant_and_text() {
    let app = test_app();
    let (status, _) = app
        .send(post_json(
            "/api/conversations/conv-1/agent-messages",
            r#"{"tenantId":" ","text":"oi"}"#,
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_agent_message_handover_tags() {
    let app = test_app();
    let (status, body) = app
        .send(post_json(
            "/api/conversations/conv-1/agent-messages",
            r#"{"tenantId":"office-1","text":"Quero falar com um advogado sobre a aposentadoria"}"#,
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["transferTo"], json!("human"));
    assert_eq!(body["tags"], json!(["previdenciario"]));
    assert_eq!(body["runs"], json!([]));
    assert_eq!(body["reply"], json!(""));
}

#[tokio::test]
async fn test_providers_health_without_providers_is_empty() {
    let app = test_app();
    let (status, body) = app.send(get("/api/tenants/office-1/providers/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([]));
}
