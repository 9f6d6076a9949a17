use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::RwLock;

use super::{ExecutionLedger, ProviderConfigSource, ToolRegistry, merge_object};
use crate::error::{StoreError, StoreResult};
use crate::types::{ExecutionRecord, ExecutionStatus, Finalization, ProviderConfig, ToolDefinition};

#[derive(Default)]
struct MemoryInner {
    tools: Vec<ToolDefinition>,
    executions: HashMap<String, ExecutionRecord>,
    by_correlation: HashMap<String, String>,
    providers: HashMap<String, Vec<ProviderConfig>>,
}

/// In-process store used by tests and local runs without Postgres.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, replacing any existing definition with the same id.
    pub async fn put_tool(&self, tool: ToolDefinition) {
        let mut inner = self.inner.write().await;
        if let Some(existing) = inner.tools.iter_mut().find(|t| t.id == tool.id) {
            *existing = tool;
        } else {
            inner.tools.push(tool);
        }
    }

    pub async fn put_provider_config(&self, tenant_id: &str, config: ProviderConfig) {
        self.inner
            .write()
            .await
            .providers
            .entry(tenant_id.to_string())
            .or_default()
            .push(config);
    }

    pub async fn execution_count(&self) -> usize {
        self.inner.read().await.executions.len()
    }
}

#[async_trait]
impl ToolRegistry for MemoryStore {
    async fn active_tools(&self, tenant_id: &str) -> StoreResult<Vec<ToolDefinition>> {
        let inner = self.inner.read().await;
        Ok(inner
            .tools
            .iter()
            .filter(|t| t.tenant_id == tenant_id && t.is_active)
            .cloned()
            .collect())
    }

    async fn get_tool(&self, tool_id: &str) -> StoreResult<Option<ToolDefinition>> {
        let inner = self.inner.read().await;
        Ok(inner.tools.iter().find(|t| t.id == tool_id).cloned())
    }
}

#[async_trait]
impl ExecutionLedger for MemoryStore {
    async fn insert(&self, record: &ExecutionRecord) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if inner.by_correlation.contains_key(&record.correlation_id) {
            return Err(StoreError::DuplicateCorrelation(
                record.correlation_id.clone(),
            ));
        }
        inner
            .by_correlation
            .insert(record.correlation_id.clone(), record.id.clone());
        inner.executions.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn get(&self, execution_id: &str) -> StoreResult<Option<ExecutionRecord>> {
        Ok(self.inner.read().await.executions.get(execution_id).cloned())
    }

    async fn find_by_correlation(
        &self,
        correlation_id: &str,
    ) -> StoreResult<Option<ExecutionRecord>> {
        let inner = self.inner.read().await;
        Ok(inner
            .by_correlation
            .get(correlation_id)
            .and_then(|id| inner.executions.get(id))
            .cloned())
    }

    async fn finalize(&self, correlation_id: &str, outcome: &Finalization) -> StoreResult<bool> {
        let mut inner = self.inner.write().await;
        let Some(id) = inner.by_correlation.get(correlation_id).cloned() else {
            return Ok(false);
        };
        let Some(record) = inner.executions.get_mut(&id) else {
            return Ok(false);
        };
        if record.status != ExecutionStatus::Pending || !outcome.status.is_terminal() {
            return Ok(false);
        }
        record.status = outcome.status;
        record.response_data = outcome.response_data.clone();
        record.error_message = outcome.error_message.clone();
        record.completed_at = Some(outcome.completed_at);
        Ok(true)
    }

    async fn merge_request_metadata(&self, execution_id: &str, patch: &Value) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if let Some(record) = inner.executions.get_mut(execution_id) {
            merge_object(&mut record.request_metadata, patch);
        }
        Ok(())
    }

    async fn stale_pending(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<ExecutionRecord>> {
        let inner = self.inner.read().await;
        let mut stale = inner
            .executions
            .values()
            .filter(|r| r.status == ExecutionStatus::Pending && r.started_at < cutoff)
            .cloned()
            .collect::<Vec<_>>();
        stale.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        stale.truncate(limit);
        Ok(stale)
    }

    async fn list_for_conversation(
        &self,
        conversation_id: &str,
    ) -> StoreResult<Vec<ExecutionRecord>> {
        let inner = self.inner.read().await;
        let mut records = inner
            .executions
            .values()
            .filter(|r| r.conversation_id.as_deref() == Some(conversation_id))
            .cloned()
            .collect::<Vec<_>>();
        records.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(records)
    }
}

#[async_trait]
impl ProviderConfigSource for MemoryStore {
    async fn provider_configs(&self, tenant_id: &str) -> StoreResult<Vec<ProviderConfig>> {
        Ok(self
            .inner
            .read()
            .await
            .providers
            .get(tenant_id)
            .cloned()
            .unwrap_or_default())
    }
}
