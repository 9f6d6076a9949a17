use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{postgres::PgRow, PgPool, Row};

use super::{ExecutionLedger, ProviderConfigSource, ToolRegistry};
use crate::error::{StoreError, StoreResult};
use crate::types::{ExecutionRecord, ExecutionStatus, Finalization, ProviderConfig, ToolDefinition};

const EXECUTION_COLUMNS: &str = "id, tenant_id, tool_id, correlation_id, description, status, \
     request_metadata, response_data, error_message, started_at, completed_at, \
     conversation_id, agent_id, retry_of";

const UNIQUE_VIOLATION: &str = "23505";

#[derive(Clone)]
pub struct PgStore {
    db: PgPool,
}

impl PgStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

fn parse_tool_row(row: &PgRow) -> StoreResult<ToolDefinition> {
    Ok(ToolDefinition {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        webhook_url: row.try_get("webhook_url")?,
        is_active: row.try_get("is_active")?,
    })
}

fn parse_execution_row(row: &PgRow) -> StoreResult<ExecutionRecord> {
    let status_raw: String = row.try_get("status")?;
    let status = status_raw
        .parse::<ExecutionStatus>()
        .map_err(|err| StoreError::decode("tool_executions", err))?;
    Ok(ExecutionRecord {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        tool_id: row.try_get("tool_id")?,
        correlation_id: row.try_get("correlation_id")?,
        description: row.try_get("description")?,
        status,
        request_metadata: row.try_get("request_metadata")?,
        response_data: row.try_get("response_data")?,
        error_message: row.try_get("error_message")?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
        conversation_id: row.try_get("conversation_id")?,
        agent_id: row.try_get("agent_id")?,
        retry_of: row.try_get("retry_of")?,
    })
}

#[async_trait]
impl ToolRegistry for PgStore {
    async fn active_tools(&self, tenant_id: &str) -> StoreResult<Vec<ToolDefinition>> {
        let rows = sqlx::query(
            "SELECT id, tenant_id, name, description, webhook_url, is_active FROM tools \
             WHERE tenant_id = $1 AND is_active = true \
             ORDER BY created_at ASC, id ASC",
        )
        .bind(tenant_id)
        .fetch_all(&self.db)
        .await?;
        rows.iter().map(parse_tool_row).collect()
    }

    async fn get_tool(&self, tool_id: &str) -> StoreResult<Option<ToolDefinition>> {
        let row = sqlx::query(
            "SELECT id, tenant_id, name, description, webhook_url, is_active FROM tools WHERE id = $1",
        )
        .bind(tool_id)
        .fetch_optional(&self.db)
        .await?;
        row.as_ref().map(parse_tool_row).transpose()
    }
}

#[async_trait]
impl ExecutionLedger for PgStore {
    async fn insert(&self, record: &ExecutionRecord) -> StoreResult<()> {
        let result = sqlx::query(
            "INSERT INTO tool_executions \
             (id, tenant_id, tool_id, correlation_id, description, status, request_metadata, \
              response_data, error_message, started_at, completed_at, conversation_id, agent_id, retry_of) \
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14)",
        )
        .bind(&record.id)
        .bind(&record.tenant_id)
        .bind(&record.tool_id)
        .bind(&record.correlation_id)
        .bind(&record.description)
        .bind(record.status.as_str())
        .bind(&record.request_metadata)
        .bind(&record.response_data)
        .bind(&record.error_message)
        .bind(record.started_at)
        .bind(record.completed_at)
        .bind(&record.conversation_id)
        .bind(&record.agent_id)
        .bind(&record.retry_of)
        .execute(&self.db)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(err)
                if err
                    .as_database_error()
                    .and_then(|db_err| db_err.code())
                    .is_some_and(|code| code == UNIQUE_VIOLATION) =>
            {
                Err(StoreError::DuplicateCorrelation(record.correlation_id.clone()))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn get(&self, execution_id: &str) -> StoreResult<Option<ExecutionRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {EXECUTION_COLUMNS} FROM tool_executions WHERE id = $1"
        ))
        .bind(execution_id)
        .fetch_optional(&self.db)
        .await?;
        row.as_ref().map(parse_execution_row).transpose()
    }

    async fn find_by_correlation(
        &self,
        correlation_id: &str,
    ) -> StoreResult<Option<ExecutionRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {EXECUTION_COLUMNS} FROM tool_executions WHERE correlation_id = $1"
        ))
        .bind(correlation_id)
        .fetch_optional(&self.db)
        .await?;
        row.as_ref().map(parse_execution_row).transpose()
    }

    async fn finalize(&self, correlation_id: &str, outcome: &Finalization) -> StoreResult<bool> {
        if !outcome.status.is_terminal() {
            return Ok(false);
        }
        let result = sqlx::query(
            "UPDATE tool_executions \
             SET status = $2, response_data = $3, error_message = $4, completed_at = $5 \
             WHERE correlation_id = $1 AND status = 'PENDING'",
        )
        .bind(correlation_id)
        .bind(outcome.status.as_str())
        .bind(&outcome.response_data)
        .bind(&outcome.error_message)
        .bind(outcome.completed_at)
        .execute(&self.db)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn merge_request_metadata(&self, execution_id: &str, patch: &Value) -> StoreResult<()> {
        sqlx::query(
            "UPDATE tool_executions SET request_metadata = request_metadata || $2 WHERE id = $1",
        )
        .bind(execution_id)
        .bind(patch)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn stale_pending(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<ExecutionRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {EXECUTION_COLUMNS} FROM tool_executions \
             WHERE status = 'PENDING' AND started_at < $1 \
             ORDER BY started_at ASC LIMIT $2"
        ))
        .bind(cutoff)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.db)
        .await?;
        rows.iter().map(parse_execution_row).collect()
    }

    async fn list_for_conversation(
        &self,
        conversation_id: &str,
    ) -> StoreResult<Vec<ExecutionRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {EXECUTION_COLUMNS} FROM tool_executions \
             WHERE conversation_id = $1 ORDER BY started_at DESC"
        ))
        .bind(conversation_id)
        .fetch_all(&self.db)
        .await?;
        rows.iter().map(parse_execution_row).collect()
    }
}

#[async_trait]
impl ProviderConfigSource for PgStore {
    async fn provider_configs(&self, tenant_id: &str) -> StoreResult<Vec<ProviderConfig>> {
        let rows = sqlx::query(
            "SELECT provider, base_url, api_key, model FROM ai_providers \
             WHERE tenant_id = $1 AND enabled = true ORDER BY created_at ASC",
        )
        .bind(tenant_id)
        .fetch_all(&self.db)
        .await?;
        rows.iter()
            .map(|row| -> StoreResult<ProviderConfig> {
                Ok(ProviderConfig {
                    provider: row.try_get("provider")?,
                    base_url: row.try_get("base_url")?,
                    api_key: row.try_get("api_key")?,
                    model: row.try_get("model")?,
                })
            })
            .collect()
    }
}
