//! Outbound webhook dispatch.
//!
//! The ledger row is written before any network I/O so a crash mid-call
//! still leaves a PENDING trace for the sweeper.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use reqwest::header::CONTENT_TYPE;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::error::DispatchError;
use crate::signing::{sign_body, SIGNATURE_HEADER};
use crate::store::ExecutionLedger;
use crate::types::{
    DispatchContext, ExecutionRecord, ExecutionStatus, Finalization, ToolCall, WebhookEnvelope,
    WebhookEnvelopeMetadata,
};

const BODY_SNIPPET_CHARS: usize = 300;

/// Result of a dispatch that did not fail.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// The record is SUCCESS, from the response itself or an earlier callback.
    Completed {
        execution_id: String,
        correlation_id: String,
        response: Value,
    },
    /// Accepted for asynchronous completion; the record stays PENDING.
    Processing {
        execution_id: String,
        correlation_id: String,
    },
    /// Non-2xx answer below 500; the record is ERROR. Not retried automatically.
    Rejected {
        execution_id: String,
        correlation_id: String,
        status: u16,
        body: Option<Value>,
    },
}

impl DispatchOutcome {
    pub fn execution_id(&self) -> &str {
        match self {
            DispatchOutcome::Completed { execution_id, .. }
            | DispatchOutcome::Processing { execution_id, .. }
            | DispatchOutcome::Rejected { execution_id, .. } => execution_id,
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            DispatchOutcome::Completed { correlation_id, .. }
            | DispatchOutcome::Processing { correlation_id, .. }
            | DispatchOutcome::Rejected { correlation_id, .. } => correlation_id,
        }
    }

    pub fn state(&self) -> &'static str {
        match self {
            DispatchOutcome::Completed { .. } => "completed",
            DispatchOutcome::Processing { .. } => "processing",
            DispatchOutcome::Rejected { .. } => "rejected",
        }
    }
}

enum Failure {
    Timeout,
    Connect(String),
    Http { status: u16, snippet: String },
    Unknown(String),
}

impl Failure {
    fn from_reqwest(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Failure::Timeout
        } else if err.is_connect() {
            Failure::Connect(err.to_string())
        } else {
            Failure::Unknown(err.to_string())
        }
    }
}

#[derive(Clone)]
pub struct WebhookDispatcher {
    client: reqwest::Client,
    ledger: Arc<dyn ExecutionLedger>,
    timeout: Duration,
    signing_secret: Option<String>,
}

impl WebhookDispatcher {
    pub fn new(
        client: reqwest::Client,
        ledger: Arc<dyn ExecutionLedger>,
        timeout: Duration,
        signing_secret: Option<String>,
    ) -> Self {
        Self {
            client,
            ledger,
            timeout,
            signing_secret,
        }
    }

    pub async fn dispatch(
        &self,
        call: &ToolCall,
        context: DispatchContext,
    ) -> Result<DispatchOutcome, DispatchError> {
        let record = ExecutionRecord::pending(call, &context);
        self.ledger.insert(&record).await?;
        info!(
            tool = %call.tool_name,
            execution_id = %record.id,
            correlation_id = %record.correlation_id,
            retry_of = ?record.retry_of,
            "Dispatching tool webhook"
        );

        let envelope = WebhookEnvelope {
            description: call.matched_description.clone(),
            request_id: call.correlation_id.clone(),
            timestamp: Utc::now().to_rfc3339(),
            metadata: WebhookEnvelopeMetadata {
                tool_name: call.tool_name.clone(),
                execution_id: record.id.clone(),
                office_id: call.tool.tenant_id.clone(),
            },
        };
        let body = match serde_json::to_vec(&envelope) {
            Ok(body) => body,
            Err(err) => {
                return self
                    .fail(call, &record, Failure::Unknown(format!("envelope encoding failed: {err}")))
                    .await;
            }
        };

        let mut request = self
            .client
            .post(&call.tool.webhook_url)
            .timeout(self.timeout)
            .header(CONTENT_TYPE, "application/json")
            .header("x-request-id", &call.correlation_id)
            .header("x-tool-id", &call.tool.id)
            .header("x-execution-id", &record.id);
        if let Some(signature) = self
            .signing_secret
            .as_deref()
            .and_then(|secret| sign_body(secret, &body))
        {
            request = request.header(SIGNATURE_HEADER, format!("sha256={signature}"));
        }

        let sent_at = Utc::now();
        let response = match request.body(body).send().await {
            Ok(response) => response,
            Err(err) => {
                self.note_sent(&record.id, sent_at, None).await;
                return self.fail(call, &record, Failure::from_reqwest(&err)).await;
            }
        };

        let status = response.status();
        self.note_sent(&record.id, sent_at, Some(status.as_u16())).await;
        let text = match response.text().await {
            Ok(text) => text,
            Err(err) => return self.fail(call, &record, Failure::from_reqwest(&err)).await,
        };

        if status.is_server_error() {
            let failure = Failure::Http {
                status: status.as_u16(),
                snippet: snippet(&text),
            };
            return self.fail(call, &record, failure).await;
        }

        let payload = parse_payload(&text);

        if !status.is_success() {
            let message = format!("HTTP {}: request rejected by webhook", status.as_u16());
            let rejection = Finalization::error(message, payload.clone());
            if !self.finalize(&record, rejection, "rejected").await? {
                return self.settled(call, &record).await;
            }
            return Ok(DispatchOutcome::Rejected {
                execution_id: record.id,
                correlation_id: record.correlation_id,
                status: status.as_u16(),
                body: payload,
            });
        }

        match payload {
            Some(response) if !wants_async(&response) => {
                let success = Finalization::success(Some(response.clone()));
                if !self.finalize(&record, success, "sync").await? {
                    return self.settled(call, &record).await;
                }
                Ok(DispatchOutcome::Completed {
                    execution_id: record.id,
                    correlation_id: record.correlation_id,
                    response,
                })
            }
            _ => {
                info!(
                    tool = %call.tool_name,
                    execution_id = %record.id,
                    "Webhook accepted request; awaiting callback"
                );
                // A callback may already have landed while the response was in flight.
                self.settled(call, &record).await
            }
        }
    }

    /// Report whatever the ledger holds for `record`.
    async fn settled(
        &self,
        call: &ToolCall,
        record: &ExecutionRecord,
    ) -> Result<DispatchOutcome, DispatchError> {
        let Some(stored) = self.ledger.get(&record.id).await? else {
            return Ok(DispatchOutcome::Processing {
                execution_id: record.id.clone(),
                correlation_id: record.correlation_id.clone(),
            });
        };
        match stored.status {
            ExecutionStatus::Pending => Ok(DispatchOutcome::Processing {
                execution_id: stored.id,
                correlation_id: stored.correlation_id,
            }),
            ExecutionStatus::Success => Ok(DispatchOutcome::Completed {
                execution_id: stored.id,
                correlation_id: stored.correlation_id,
                response: stored.response_data.unwrap_or(Value::Null),
            }),
            status @ (ExecutionStatus::Error | ExecutionStatus::Timeout) => {
                Err(DispatchError::Finalized {
                    tool_name: call.tool_name.clone(),
                    execution_id: stored.id,
                    correlation_id: stored.correlation_id,
                    status,
                    message: stored.error_message.unwrap_or_default(),
                })
            }
        }
    }

    /// Record the failure durably, then hand back the typed error. If another
    /// actor finalized first, its outcome is reported instead.
    async fn fail(
        &self,
        call: &ToolCall,
        record: &ExecutionRecord,
        failure: Failure,
    ) -> Result<DispatchOutcome, DispatchError> {
        let seconds = self.timeout.as_secs();
        let finalization = match &failure {
            Failure::Timeout => Finalization::timeout(format!(
                "Timeout: webhook did not respond within {seconds}s"
            )),
            Failure::Connect(detail) => {
                Finalization::error(format!("Connection failed: {detail}"), None)
            }
            Failure::Http { status, snippet } => {
                Finalization::error(format!("HTTP error {status}: {snippet}"), None)
            }
            Failure::Unknown(detail) => Finalization::error(format!("Unknown error: {detail}"), None),
        };
        warn!(
            tool = %call.tool_name,
            execution_id = %record.id,
            error = ?finalization.error_message,
            "Tool webhook dispatch failed"
        );
        if !self.finalize(record, finalization, "dispatch failure").await? {
            return self.settled(call, record).await;
        }

        let tool_name = call.tool_name.clone();
        let execution_id = record.id.clone();
        let correlation_id = record.correlation_id.clone();
        Err(match failure {
            Failure::Timeout => DispatchError::Timeout {
                tool_name,
                execution_id,
                correlation_id,
                seconds,
            },
            Failure::Http { status, .. } => DispatchError::Http {
                tool_name,
                execution_id,
                correlation_id,
                status,
            },
            Failure::Connect(message) => DispatchError::Transport {
                tool_name,
                execution_id,
                correlation_id,
                message: format!("connection failed: {message}"),
            },
            Failure::Unknown(message) => DispatchError::Transport {
                tool_name,
                execution_id,
                correlation_id,
                message,
            },
        })
    }

    async fn finalize(
        &self,
        record: &ExecutionRecord,
        outcome: Finalization,
        actor: &str,
    ) -> Result<bool, DispatchError> {
        let applied = self.ledger.finalize(&record.correlation_id, &outcome).await?;
        if applied {
            info!(
                execution_id = %record.id,
                status = %outcome.status,
                actor,
                "Execution finalized"
            );
        } else {
            debug!(
                execution_id = %record.id,
                actor,
                "Execution already finalized; dispatcher result not applied"
            );
        }
        Ok(applied)
    }

    async fn note_sent(&self, execution_id: &str, sent_at: DateTime<Utc>, http_status: Option<u16>) {
        let patch = json!({
            "sent": true,
            "sentAt": sent_at.to_rfc3339(),
            "httpStatus": http_status,
        });
        if let Err(err) = self.ledger.merge_request_metadata(execution_id, &patch).await {
            warn!(execution_id, error = %err, "Failed to record request metadata");
        }
    }
}

/// `None` means the webhook had nothing to report.
fn parse_payload(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Null) => None,
        Ok(Value::String(s)) if s.trim().is_empty() => None,
        Ok(Value::Object(map)) if map.is_empty() => None,
        Ok(value) => Some(value),
        Err(_) => Some(Value::String(trimmed.to_string())),
    }
}

fn wants_async(payload: &Value) -> bool {
    payload.get("async").and_then(Value::as_bool) == Some(true)
}

fn snippet(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return "empty response body".to_string();
    }
    trimmed.chars().take(BODY_SNIPPET_CHARS).collect()
}
