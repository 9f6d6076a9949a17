//! Storage traits the tool automation core depends on.
//!
//! `PgStore` backs the running service; `MemoryStore` keeps everything in
//! process and applies the same PENDING guard under a single lock.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::StoreResult;
use crate::types::{ExecutionRecord, Finalization, ProviderConfig, ToolDefinition};

/// Tenant-scoped tool definitions. The core only reads from it.
#[async_trait]
pub trait ToolRegistry: Send + Sync {
    /// Active tools for a tenant in stable creation order.
    async fn active_tools(&self, tenant_id: &str) -> StoreResult<Vec<ToolDefinition>>;

    async fn get_tool(&self, tool_id: &str) -> StoreResult<Option<ToolDefinition>>;
}

/// Append-only record of dispatch attempts.
#[async_trait]
pub trait ExecutionLedger: Send + Sync {
    /// Persist a new PENDING record. Fails if the correlation id is taken.
    async fn insert(&self, record: &ExecutionRecord) -> StoreResult<()>;

    async fn get(&self, execution_id: &str) -> StoreResult<Option<ExecutionRecord>>;

    async fn find_by_correlation(&self, correlation_id: &str)
    -> StoreResult<Option<ExecutionRecord>>;

    /// Conditionally move a record out of PENDING.
    ///
    /// The status check and the write are one atomic operation. Returns
    /// `false` when the record was already finalized (or does not exist).
    async fn finalize(&self, correlation_id: &str, outcome: &Finalization) -> StoreResult<bool>;

    /// Shallow-merge diagnostic fields into `request_metadata`. Never touches status.
    async fn merge_request_metadata(&self, execution_id: &str, patch: &Value) -> StoreResult<()>;

    /// Oldest PENDING records started before `cutoff`.
    async fn stale_pending(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<ExecutionRecord>>;

    /// Records for a conversation, newest first.
    async fn list_for_conversation(&self, conversation_id: &str)
    -> StoreResult<Vec<ExecutionRecord>>;
}

/// Per-tenant completion provider rows.
#[async_trait]
pub trait ProviderConfigSource: Send + Sync {
    async fn provider_configs(&self, tenant_id: &str) -> StoreResult<Vec<ProviderConfig>>;
}

fn merge_object(target: &mut Value, patch: &Value) {
    let Some(patch) = patch.as_object() else {
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Default::default());
    }
    if let Some(target) = target.as_object_mut() {
        for (key, value) in patch {
            target.insert(key.clone(), value.clone());
        }
    }
}
