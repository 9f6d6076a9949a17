use std::{fmt, str::FromStr, sync::Arc};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::{
    callback::CallbackCorrelator, config::Config, pipeline::ToolPipeline,
    providers::ProviderRegistry, retry::RetryInitiator,
    store::{ExecutionLedger, ProviderConfigSource},
    sweeper::TimeoutSweeper,
};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
    pub description: String,
    pub webhook_url: String,
    pub is_active: bool,
}

impl ToolDefinition {
    /// Text the intent matcher scores against.
    pub fn match_text(&self) -> String {
        format!("{} {}", self.name, self.description)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum MatchKind {
    Phrase,
    Contextual,
}

#[derive(Debug, Clone)]
pub struct ToolCall {
    pub tool_name: String,
    pub matched_description: String,
    pub correlation_id: String,
    pub tool: ToolDefinition,
    pub score: f64,
    pub kind: MatchKind,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Pending,
    Success,
    Error,
    Timeout,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "PENDING",
            ExecutionStatus::Success => "SUCCESS",
            ExecutionStatus::Error => "ERROR",
            ExecutionStatus::Timeout => "TIMEOUT",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionStatus::Pending)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Ok(ExecutionStatus::Pending),
            "SUCCESS" => Ok(ExecutionStatus::Success),
            "ERROR" => Ok(ExecutionStatus::Error),
            "TIMEOUT" => Ok(ExecutionStatus::Timeout),
            other => Err(format!("unknown execution status '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub id: String,
    pub tenant_id: String,
    pub tool_id: String,
    pub correlation_id: String,
    pub description: String,
    pub status: ExecutionStatus,
    pub request_metadata: Value,
    pub response_data: Option<Value>,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub conversation_id: Option<String>,
    pub agent_id: Option<String>,
    pub retry_of: Option<String>,
}

impl ExecutionRecord {
    pub fn pending(call: &ToolCall, context: &DispatchContext) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            tenant_id: call.tool.tenant_id.clone(),
            tool_id: call.tool.id.clone(),
            correlation_id: call.correlation_id.clone(),
            description: call.matched_description.clone(),
            status: ExecutionStatus::Pending,
            request_metadata: json!({
                "sent": false,
                "webhookUrl": call.tool.webhook_url,
            }),
            response_data: None,
            error_message: None,
            started_at: Utc::now(),
            completed_at: None,
            conversation_id: context.conversation_id.clone(),
            agent_id: context.agent_id.clone(),
            retry_of: context.retry_of.clone(),
        }
    }
}

/// Back-references attached to a dispatch.
#[derive(Debug, Clone, Default)]
pub struct DispatchContext {
    pub conversation_id: Option<String>,
    pub agent_id: Option<String>,
    pub retry_of: Option<String>,
}

/// Terminal state written by exactly one finalizer.
#[derive(Debug, Clone)]
pub struct Finalization {
    pub status: ExecutionStatus,
    pub response_data: Option<Value>,
    pub error_message: Option<String>,
    pub completed_at: DateTime<Utc>,
}

impl Finalization {
    pub fn success(response_data: Option<Value>) -> Self {
        Self {
            status: ExecutionStatus::Success,
            response_data,
            error_message: None,
            completed_at: Utc::now(),
        }
    }

    pub fn error(message: impl Into<String>, response_data: Option<Value>) -> Self {
        Self {
            status: ExecutionStatus::Error,
            response_data,
            error_message: Some(message.into()),
            completed_at: Utc::now(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            status: ExecutionStatus::Timeout,
            response_data: None,
            error_message: Some(message.into()),
            completed_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEnvelope {
    pub description: String,
    pub request_id: String,
    pub timestamp: String,
    pub metadata: WebhookEnvelopeMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEnvelopeMetadata {
    pub tool_name: String,
    pub execution_id: String,
    pub office_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CallbackPayload {
    pub request_id: String,
    pub success: bool,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub metadata: Option<CallbackMetadata>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CallbackMetadata {
    #[serde(default)]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub execution_time: Option<f64>,
    #[serde(default)]
    pub source: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentMessageBody {
    pub tenant_id: String,
    #[serde(default)]
    pub agent_id: Option<String>,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    pub provider: String,
    pub base_url: String,
    pub api_key: String,
    pub model: String,
}

pub struct AppState {
    pub config: Config,
    pub ledger: Arc<dyn ExecutionLedger>,
    pub provider_configs: Arc<dyn ProviderConfigSource>,
    pub correlator: CallbackCorrelator,
    pub sweeper: TimeoutSweeper,
    pub retry: RetryInitiator,
    pub pipeline: ToolPipeline,
    pub providers: ProviderRegistry,
}
