use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde_json::json;
use tracing::{error, warn};

use crate::callback::{parse_callback, CallbackOutcome};
use crate::dispatcher::DispatchOutcome;
use crate::error::RetryError;
use crate::pipeline::compose_reply;
use crate::signing::{verify_signature, SIGNATURE_HEADER};
use crate::store::ExecutionLedger;
use crate::types::{AgentMessageBody, AppState};

const AGENT_SYSTEM_PROMPT: &str = "You are the intake assistant of a law office. \
Answer briefly in the customer's language. Tool results are appended after your \
reply, so do not invent their outcome.";

pub async fn health() -> impl IntoResponse {
    Json(json!({ "ok": true }))
}

pub async fn tool_callback(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    if let Some(secret) = state.config.callback_secret.as_deref() {
        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|value| value.to_str().ok());
        if !verify_signature(secret, signature, &body) {
            warn!("Rejected tool callback with invalid signature");
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": "invalid signature" })),
            )
                .into_response();
        }
    }

    let payload = match parse_callback(&body) {
        Ok(payload) => payload,
        Err(details) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "invalid callback payload", "details": details })),
            )
                .into_response();
        }
    };

    match state.correlator.handle(&payload).await {
        Ok(CallbackOutcome::Applied {
            execution_id,
            status,
        })
        | Ok(CallbackOutcome::Duplicate {
            execution_id,
            status,
        }) => (
            StatusCode::OK,
            Json(json!({ "executionId": execution_id, "status": status })),
        )
            .into_response(),
        Ok(CallbackOutcome::UnknownCorrelation) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "execution not found", "requestId": payload.request_id })),
        )
            .into_response(),
        Err(err) => {
            error!(error = %err, "Callback correlation failed");
            internal_error()
        }
    }
}

pub async fn get_execution(
    State(state): State<Arc<AppState>>,
    Path(execution_id): Path<String>,
) -> impl IntoResponse {
    match state.ledger.get(&execution_id).await {
        Ok(Some(record)) => Json(record).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "execution not found" })),
        )
            .into_response(),
        Err(err) => {
            error!(execution_id = %execution_id, error = %err, "Failed to load execution");
            internal_error()
        }
    }
}

pub async fn list_conversation_executions(
    State(state): State<Arc<AppState>>,
    Path(conversation_id): Path<String>,
) -> impl IntoResponse {
    match state.ledger.list_for_conversation(&conversation_id).await {
        Ok(records) => Json(records).into_response(),
        Err(err) => {
            error!(conversation_id = %conversation_id, error = %err, "Failed to list executions");
            internal_error()
        }
    }
}

pub async fn retry_execution(
    State(state): State<Arc<AppState>>,
    Path(execution_id): Path<String>,
) -> impl IntoResponse {
    match state.retry.retry(&execution_id).await {
        Ok(result) => match result.outcome {
            DispatchOutcome::Rejected {
                execution_id,
                status,
                ..
            } => (
                StatusCode::BAD_GATEWAY,
                Json(json!({
                    "error": format!("tool rejected the request with HTTP {status}"),
                    "executionId": execution_id,
                })),
            )
                .into_response(),
            outcome => (
                StatusCode::ACCEPTED,
                Json(json!({
                    "executionId": outcome.execution_id(),
                    "correlationId": outcome.correlation_id(),
                    "retryOf": result.retry_of,
                    "status": outcome.state(),
                })),
            )
                .into_response(),
        },
        Err(RetryError::NotFound(_)) | Err(RetryError::ToolMissing(_)) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "execution or tool not found" })),
        )
            .into_response(),
        Err(RetryError::StillPending(_)) => (
            StatusCode::CONFLICT,
            Json(json!({ "error": "execution is still pending" })),
        )
            .into_response(),
        Err(RetryError::ToolInactive(_)) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({ "error": "tool is inactive" })),
        )
            .into_response(),
        Err(RetryError::Dispatch(err)) => match err.execution_id() {
            Some(new_execution_id) => (
                StatusCode::BAD_GATEWAY,
                Json(json!({ "error": err.to_string(), "executionId": new_execution_id })),
            )
                .into_response(),
            None => {
                error!(execution_id = %execution_id, error = %err, "Retry could not be recorded");
                internal_error()
            }
        },
        Err(RetryError::Store(err)) => {
            error!(execution_id = %execution_id, error = %err, "Retry failed");
            internal_error()
        }
    }
}

pub async fn agent_message(
    State(state): State<Arc<AppState>>,
    Path(conversation_id): Path<String>,
    Json(body): Json<AgentMessageBody>,
) -> impl IntoResponse {
    let tenant_id = body.tenant_id.trim();
    if tenant_id.is_empty() || body.text.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "tenantId and text are required" })),
        )
            .into_response();
    }

    let runs_future = state.pipeline.process_message(
        tenant_id,
        Some(&conversation_id),
        body.agent_id.as_deref(),
        &body.text,
    );
    let (runs, agent_text) = tokio::join!(runs_future, draft_agent_text(&state, tenant_id, &body.text));
    let classification = state.pipeline.classify(&body.text);

    (
        StatusCode::OK,
        Json(json!({
            "reply": compose_reply(&agent_text, &runs),
            "runs": runs,
            "tags": classification.tags,
            "transferTo": classification.transfer_to,
        })),
    )
        .into_response()
}

async fn draft_agent_text(state: &Arc<AppState>, tenant_id: &str, text: &str) -> String {
    if state.providers.handle(tenant_id).await.is_empty() {
        if let Err(err) = state
            .providers
            .refresh_from(state.provider_configs.as_ref(), tenant_id)
            .await
        {
            warn!(tenant_id, error = %err, "Failed to load provider configuration");
        }
    }
    state
        .providers
        .complete(tenant_id, AGENT_SYSTEM_PROMPT, text)
        .await
        .unwrap_or_else(|err| {
            warn!(tenant_id, error = %err, "Agent completion unavailable");
            String::new()
        })
}

pub async fn run_sweep(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.sweeper.sweep_once(Utc::now()).await {
        Ok(count) => Json(json!({ "timedOut": count })).into_response(),
        Err(err) => {
            error!(error = %err, "On-demand sweep failed");
            internal_error()
        }
    }
}

pub async fn providers_health(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<String>,
) -> impl IntoResponse {
    if let Err(err) = state
        .providers
        .refresh_from(state.provider_configs.as_ref(), &tenant_id)
        .await
    {
        error!(tenant_id = %tenant_id, error = %err, "Failed to load provider configuration");
        return internal_error();
    }

    let mut report = Vec::new();
    for provider in state.providers.handle(&tenant_id).await {
        let entry = match provider.test_connectivity().await {
            Ok(()) => json!({ "provider": provider.name(), "ok": true }),
            Err(err) => json!({ "provider": provider.name(), "ok": false, "error": err.to_string() }),
        };
        report.push(entry);
    }
    Json(report).into_response()
}

fn internal_error() -> axum::response::Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "internal error" })),
    )
        .into_response()
}
