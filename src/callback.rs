//! Inbound callback reconciliation.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::error::StoreResult;
use crate::store::ExecutionLedger;
use crate::types::{CallbackMetadata, CallbackPayload, ExecutionStatus, Finalization};

const DEFAULT_FAILURE_MESSAGE: &str = "Tool reported failure without an error message";

#[derive(Debug, Clone, PartialEq)]
pub enum CallbackOutcome {
    Applied {
        execution_id: String,
        status: ExecutionStatus,
    },
    /// The record had already left PENDING; `status` is what is stored.
    Duplicate {
        execution_id: String,
        status: ExecutionStatus,
    },
    UnknownCorrelation,
}

#[derive(Clone)]
pub struct CallbackCorrelator {
    ledger: Arc<dyn ExecutionLedger>,
}

impl CallbackCorrelator {
    pub fn new(ledger: Arc<dyn ExecutionLedger>) -> Self {
        Self { ledger }
    }

    pub async fn handle(&self, payload: &CallbackPayload) -> StoreResult<CallbackOutcome> {
        let Some(record) = self.ledger.find_by_correlation(&payload.request_id).await? else {
            warn!(
                correlation_id = %payload.request_id,
                "Callback for unknown correlation id"
            );
            return Ok(CallbackOutcome::UnknownCorrelation);
        };

        let outcome = if payload.success {
            Finalization::success(payload.result.clone())
        } else {
            let message = payload
                .error
                .as_deref()
                .map(str::trim)
                .filter(|message| !message.is_empty())
                .unwrap_or(DEFAULT_FAILURE_MESSAGE);
            Finalization::error(message, payload.result.clone())
        };

        if self.ledger.finalize(&record.correlation_id, &outcome).await? {
            info!(
                execution_id = %record.id,
                status = %outcome.status,
                actor = "callback",
                "Execution finalized"
            );
            self.note_callback(&record.id, payload.metadata.as_ref()).await;
            return Ok(CallbackOutcome::Applied {
                execution_id: record.id,
                status: outcome.status,
            });
        }

        // Lost the race or a redelivery; report what won.
        let stored = self
            .ledger
            .get(&record.id)
            .await?
            .map(|current| current.status)
            .unwrap_or(record.status);
        info!(
            execution_id = %record.id,
            stored_status = %stored,
            "Duplicate callback ignored"
        );
        Ok(CallbackOutcome::Duplicate {
            execution_id: record.id,
            status: stored,
        })
    }

    async fn note_callback(&self, execution_id: &str, metadata: Option<&CallbackMetadata>) {
        let metadata = metadata.cloned().unwrap_or_default();
        let patch = json!({
            "callback": {
                "receivedAt": Utc::now().to_rfc3339(),
                "source": metadata.source,
                "executionTime": metadata.execution_time,
                "toolName": metadata.tool_name,
            }
        });
        if let Err(err) = self.ledger.merge_request_metadata(execution_id, &patch).await {
            warn!(execution_id, error = %err, "Failed to record callback metadata");
        }
    }
}

/// Validate a raw callback body, collecting every problem for the 400 response.
pub fn parse_callback(body: &[u8]) -> Result<CallbackPayload, Vec<String>> {
    let value: Value = match serde_json::from_slice(body) {
        Ok(value) => value,
        Err(err) => return Err(vec![format!("body is not valid JSON: {err}")]),
    };
    let Some(object) = value.as_object() else {
        return Err(vec!["body must be a JSON object".to_string()]);
    };

    let mut details = Vec::new();
    match object.get("requestId") {
        Some(Value::String(id)) if !id.trim().is_empty() => {}
        Some(Value::String(_)) => details.push("requestId must not be empty".to_string()),
        Some(_) => details.push("requestId must be a string".to_string()),
        None => details.push("requestId is required".to_string()),
    }
    match object.get("success") {
        Some(Value::Bool(_)) => {}
        Some(_) => details.push("success must be a boolean".to_string()),
        None => details.push("success is required".to_string()),
    }
    if !matches!(object.get("error"), None | Some(Value::Null) | Some(Value::String(_))) {
        details.push("error must be a string".to_string());
    }
    if !matches!(object.get("metadata"), None | Some(Value::Null) | Some(Value::Object(_))) {
        details.push("metadata must be an object".to_string());
    }
    if !details.is_empty() {
        return Err(details);
    }

    serde_json::from_value::<CallbackPayload>(value).map_err(|err| vec![err.to_string()])
}
