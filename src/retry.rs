use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use crate::dispatcher::{DispatchOutcome, WebhookDispatcher};
use crate::error::RetryError;
use crate::store::{ExecutionLedger, ToolRegistry};
use crate::types::{DispatchContext, MatchKind, ToolCall};

#[derive(Debug, Clone)]
pub struct RetryResult {
    pub retry_of: String,
    pub outcome: DispatchOutcome,
}

/// Re-dispatches a finalized execution as a brand-new attempt.
#[derive(Clone)]
pub struct RetryInitiator {
    ledger: Arc<dyn ExecutionLedger>,
    tools: Arc<dyn ToolRegistry>,
    dispatcher: WebhookDispatcher,
}

impl RetryInitiator {
    pub fn new(
        ledger: Arc<dyn ExecutionLedger>,
        tools: Arc<dyn ToolRegistry>,
        dispatcher: WebhookDispatcher,
    ) -> Self {
        Self {
            ledger,
            tools,
            dispatcher,
        }
    }

    /// The original record is only read, never written.
    pub async fn retry(&self, execution_id: &str) -> Result<RetryResult, RetryError> {
        let original = self
            .ledger
            .get(execution_id)
            .await?
            .ok_or_else(|| RetryError::NotFound(execution_id.to_string()))?;
        if !original.status.is_terminal() {
            return Err(RetryError::StillPending(original.id));
        }

        let tool = self
            .tools
            .get_tool(&original.tool_id)
            .await?
            .ok_or_else(|| RetryError::ToolMissing(original.tool_id.clone()))?;
        if !tool.is_active {
            return Err(RetryError::ToolInactive(tool.id));
        }

        let call = ToolCall {
            tool_name: tool.name.clone(),
            matched_description: original.description.clone(),
            correlation_id: Uuid::new_v4().to_string(),
            tool,
            score: 1.0,
            kind: MatchKind::Phrase,
        };
        info!(
            retry_of = %original.id,
            correlation_id = %call.correlation_id,
            "Retrying tool execution"
        );

        let outcome = self
            .dispatcher
            .dispatch(
                &call,
                DispatchContext {
                    conversation_id: original.conversation_id.clone(),
                    agent_id: original.agent_id.clone(),
                    retry_of: Some(original.id.clone()),
                },
            )
            .await?;

        Ok(RetryResult {
            retry_of: original.id,
            outcome,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback::CallbackCorrelator;
    use crate::error::DispatchError;
    use crate::store::MemoryStore;
    use crate::types::{CallbackPayload, ExecutionStatus, ToolDefinition};
    use axum::{http::StatusCode, routing::post, Router};
    use serde_json::json;
    use std::time::Duration;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}/hook")
    }

    fn tool(url: &str, active: bool) -> ToolDefinition {
        ToolDefinition {
            id: "tool-doc".to_string(),
            tenant_id: "office-1".to_string(),
            name: "Gerar Procuração".to_string(),
            description: "gerar documento de procuração".to_string(),
            webhook_url: url.to_string(),
            is_active: active,
        }
    }

    fn initiator(store: &Arc<MemoryStore>) -> (RetryInitiator, WebhookDispatcher) {
        let dispatcher = WebhookDispatcher::new(
            reqwest::Client::new(),
            store.clone(),
            Duration::from_secs(5),
            None,
        );
        (
            RetryInitiator::new(store.clone(), store.clone(), dispatcher.clone()),
            dispatcher,
        )
    }

    async fn first_attempt(store: &Arc<MemoryStore>, dispatcher: &WebhookDispatcher) -> String {
        let tool = store.get_tool("tool-doc").await.unwrap().unwrap();
        let call = ToolCall {
            tool_name: tool.name.clone(),
            matched_description: "gerar a procuração do cliente".to_string(),
            correlation_id: Uuid::new_v4().to_string(),
            tool,
            score: 0.6,
            kind: MatchKind::Phrase,
        };
        let context = DispatchContext {
            conversation_id: Some("conv-1".to_string()),
            agent_id: Some("agent-1".to_string()),
            retry_of: None,
        };
        match dispatcher.dispatch(&call, context).await {
            Ok(outcome) => outcome.execution_id().to_string(),
            Err(err) => err.execution_id().unwrap().to_string(),
        }
    }

    #[tokio::test]
    async fn retry_creates_new_record_and_leaves_original() {
        let url = serve(Router::new().route(
            "/hook",
            post(|| async { (StatusCode::SERVICE_UNAVAILABLE, "busy") }),
        ))
        .await;
        let store = Arc::new(MemoryStore::new());
        store.put_tool(tool(&url, true)).await;
        let (retry, dispatcher) = initiator(&store);
        let original_id = first_attempt(&store, &dispatcher).await;
        let original = store.get(&original_id).await.unwrap().unwrap();
        assert_eq!(original.status, ExecutionStatus::Error);

        let err = retry.retry(&original_id).await.unwrap_err();
        let RetryError::Dispatch(DispatchError::Http { execution_id, correlation_id, .. }) = err
        else {
            panic!("expected http dispatch failure");
        };

        assert_ne!(execution_id, original_id);
        assert_ne!(correlation_id, original.correlation_id);
        let fresh = store.get(&execution_id).await.unwrap().unwrap();
        assert_eq!(fresh.retry_of.as_deref(), Some(original_id.as_str()));
        assert_eq!(fresh.description, original.description);
        assert_eq!(fresh.conversation_id.as_deref(), Some("conv-1"));
        assert_eq!(fresh.agent_id.as_deref(), Some("agent-1"));
        assert_eq!(store.get(&original_id).await.unwrap().unwrap(), original);
    }

    #[tokio::test]
    async fn successful_retry_reports_lineage() {
        let url = serve(Router::new().route(
            "/hook",
            post(|| async { axum::Json(json!({ "documentUrl": "https://docs/1.pdf" })) }),
        ))
        .await;
        let store = Arc::new(MemoryStore::new());
        store.put_tool(tool(&url, true)).await;
        let (retry, dispatcher) = initiator(&store);
        let original_id = first_attempt(&store, &dispatcher).await;

        let result = retry.retry(&original_id).await.unwrap();

        assert_eq!(result.retry_of, original_id);
        assert!(matches!(result.outcome, DispatchOutcome::Completed { .. }));
        assert_eq!(store.execution_count().await, 2);
    }

    #[tokio::test]
    async fn pending_record_cannot_be_retried() {
        let url = serve(Router::new().route("/hook", post(|| async { StatusCode::ACCEPTED }))).await;
        let store = Arc::new(MemoryStore::new());
        store.put_tool(tool(&url, true)).await;
        let (retry, dispatcher) = initiator(&store);
        let original_id = first_attempt(&store, &dispatcher).await;

        let err = retry.retry(&original_id).await.unwrap_err();

        assert!(matches!(err, RetryError::StillPending(_)));
        assert_eq!(store.execution_count().await, 1);

        let original = store.get(&original_id).await.unwrap().unwrap();
        CallbackCorrelator::new(store.clone())
            .handle(&CallbackPayload {
                request_id: original.correlation_id,
                success: false,
                result: None,
                error: Some("template missing".to_string()),
                metadata: None,
            })
            .await
            .unwrap();
        assert!(retry.retry(&original_id).await.is_ok());
    }

    #[tokio::test]
    async fn unknown_and_inactive_are_rejected() {
        let url = serve(Router::new().route(
            "/hook",
            post(|| async { (StatusCode::BAD_REQUEST, "bad") }),
        ))
        .await;
        let store = Arc::new(MemoryStore::new());
        store.put_tool(tool(&url, true)).await;
        let (retry, dispatcher) = initiator(&store);
        let original_id = first_attempt(&store, &dispatcher).await;

        assert!(matches!(
            retry.retry("nope").await.unwrap_err(),
            RetryError::NotFound(_)
        ));

        store.put_tool(tool(&url, false)).await;
        assert!(matches!(
            retry.retry(&original_id).await.unwrap_err(),
            RetryError::ToolInactive(_)
        ));
        assert_eq!(store.execution_count().await, 1);
    }
}
