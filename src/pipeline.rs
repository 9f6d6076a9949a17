//! Agent-facing orchestration: match, dispatch, and turn the results into
//! something the agent can say in the same conversation turn.

use std::sync::Arc;

use futures_util::future::join_all;
use serde::Serialize;
use tracing::{info, warn};

use crate::classifier::Classifier;
use crate::dispatcher::{DispatchOutcome, WebhookDispatcher};
use crate::error::DispatchError;
use crate::intent::IntentMatcher;
use crate::prompting::{
    render_tool_reply, render_tool_run_line, ToolReplyContext, ToolRunLineContext,
};
use crate::store::ToolRegistry;
use crate::types::{DispatchContext, ToolCall};

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Completed,
    Processing,
    Rejected,
    Failed,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Completed => "completed",
            RunState::Processing => "processing",
            RunState::Rejected => "rejected",
            RunState::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolRun {
    pub tool_name: String,
    pub execution_id: Option<String>,
    pub state: RunState,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct Classification {
    pub tags: Vec<String>,
    pub transfer_to: Option<String>,
}

#[derive(Clone)]
pub struct ToolPipeline {
    matcher: Arc<IntentMatcher>,
    tools: Arc<dyn ToolRegistry>,
    dispatcher: WebhookDispatcher,
    classifier: Option<Arc<dyn Classifier>>,
}

impl ToolPipeline {
    pub fn new(
        matcher: Arc<IntentMatcher>,
        tools: Arc<dyn ToolRegistry>,
        dispatcher: WebhookDispatcher,
    ) -> Self {
        Self {
            matcher,
            tools,
            dispatcher,
            classifier: None,
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn Classifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    /// Runs every matched tool concurrently. Never fails; a broken tool
    /// becomes a `Failed` run.
    pub async fn process_message(
        &self,
        tenant_id: &str,
        conversation_id: Option<&str>,
        agent_id: Option<&str>,
        text: &str,
    ) -> Vec<ToolRun> {
        let tools = match self.tools.active_tools(tenant_id).await {
            Ok(tools) => tools,
            Err(err) => {
                warn!(tenant_id, error = %err, "Failed to load tools; skipping tool matching");
                return Vec::new();
            }
        };
        let calls = self.matcher.match_tools(text, &tools);
        if calls.is_empty() {
            return Vec::new();
        }
        info!(tenant_id, count = calls.len(), "Matched tool calls");

        let context = DispatchContext {
            conversation_id: conversation_id.map(str::to_string),
            agent_id: agent_id.map(str::to_string),
            retry_of: None,
        };
        let dispatches = calls.iter().map(|call| {
            let context = context.clone();
            async move {
                let result = self.dispatcher.dispatch(call, context).await;
                to_run(call, result)
            }
        });
        join_all(dispatches).await
    }

    pub fn classify(&self, text: &str) -> Classification {
        match &self.classifier {
            Some(classifier) => Classification {
                tags: classifier.suggest_tags(text),
                transfer_to: classifier.transfer_target(text),
            },
            None => Classification::default(),
        }
    }
}

fn to_run(call: &ToolCall, result: Result<DispatchOutcome, DispatchError>) -> ToolRun {
    let (state, execution_id, detail) = match result {
        Ok(DispatchOutcome::Completed { execution_id, .. }) => {
            (RunState::Completed, Some(execution_id), String::new())
        }
        Ok(DispatchOutcome::Processing { execution_id, .. }) => {
            (RunState::Processing, Some(execution_id), String::new())
        }
        Ok(DispatchOutcome::Rejected {
            execution_id,
            status,
            ..
        }) => (
            RunState::Rejected,
            Some(execution_id),
            format!("the tool answered HTTP {status}"),
        ),
        Err(err) => {
            let detail = match &err {
                DispatchError::Timeout { .. } => "the request timed out".to_string(),
                DispatchError::Transport { .. } => "the tool could not be reached".to_string(),
                DispatchError::Http { status, .. } => format!("the tool answered HTTP {status}"),
                DispatchError::Finalized { message, .. } if !message.trim().is_empty() => {
                    message.trim().trim_end_matches('.').to_string()
                }
                DispatchError::Finalized { .. } => "the request did not complete".to_string(),
                DispatchError::Store(_) => "the request could not be recorded".to_string(),
            };
            (
                RunState::Failed,
                err.execution_id().map(str::to_string),
                detail,
            )
        }
    };
    let message = render_tool_run_line(&ToolRunLineContext {
        tool_name: &call.tool_name,
        state: state.as_str(),
        detail: &detail,
    });
    ToolRun {
        tool_name: call.tool_name.clone(),
        execution_id,
        state,
        message,
    }
}

/// The agent's own text followed by one line per tool run.
pub fn compose_reply(agent_text: &str, runs: &[ToolRun]) -> String {
    let lines = runs.iter().map(|run| run.message.clone()).collect::<Vec<_>>();
    render_tool_reply(&ToolReplyContext {
        agent_text,
        lines: &lines,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::KeywordClassifier;
    use crate::store::{ExecutionLedger, MemoryStore};
    use crate::types::{ExecutionStatus, ToolDefinition};
    use axum::{http::StatusCode, routing::post, Json, Router};
    use serde_json::json;
    use std::time::Duration;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn tool(id: &str, name: &str, description: &str, url: String) -> ToolDefinition {
        ToolDefinition {
            id: id.to_string(),
            tenant_id: "office-1".to_string(),
            name: name.to_string(),
            description: description.to_string(),
            webhook_url: url,
            is_active: true,
        }
    }

    async fn pipeline_with_tools() -> (ToolPipeline, Arc<MemoryStore>) {
        let base = serve(
            Router::new()
                .route("/cpf", post(|| async { Json(json!({ "nome": "Maria" })) }))
                .route(
                    "/procuracao",
                    post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "template missing") }),
                ),
        )
        .await;
        let store = Arc::new(MemoryStore::new());
        store
            .put_tool(tool(
                "tool-cpf",
                "Consultar CPF",
                "consulta de CPF para validação de documentos",
                format!("{base}/cpf"),
            ))
            .await;
        store
            .put_tool(tool(
                "tool-proc",
                "Gerar Procuração",
                "gera procuração ad judicia para o cliente",
                format!("{base}/procuracao"),
            ))
            .await;
        let dispatcher = WebhookDispatcher::new(
            reqwest::Client::new(),
            store.clone(),
            Duration::from_secs(5),
            None,
        );
        let pipeline = ToolPipeline::new(Arc::new(IntentMatcher::new()), store.clone(), dispatcher);
        (pipeline, store)
    }

    #[tokio::test]
    async fn failed_tool_does_not_abort_the_turn() {
        let (pipeline, store) = pipeline_with_tools().await;

        let runs = pipeline
            .process_message(
                "office-1",
                Some("conv-1"),
                None,
                "Pode consultar o CPF do cliente? Também preciso gerar a procuração.",
            )
            .await;

        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].tool_name, "Consultar CPF");
        assert_eq!(runs[0].state, RunState::Completed);
        assert_eq!(runs[1].tool_name, "Gerar Procuração");
        assert_eq!(runs[1].state, RunState::Failed);
        assert_eq!(
            runs[1].message,
            "An error occurred running \"Gerar Procuração\": the tool answered HTTP 500."
        );

        let failed = store
            .get(runs[1].execution_id.as_deref().unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(failed.status, ExecutionStatus::Error);
        assert_eq!(failed.conversation_id.as_deref(), Some("conv-1"));

        let reply = compose_reply("Claro, vou verificar.", &runs);
        assert!(reply.starts_with("Claro, vou verificar.\n\n"));
        assert!(reply.ends_with(&runs[1].message));
    }

    #[tokio::test]
    async fn no_match_means_no_runs() {
        let (pipeline, store) = pipeline_with_tools().await;

        let runs = pipeline
            .process_message("office-1", None, None, "Bom dia, tudo bem?")
            .await;

        assert!(runs.is_empty());
        assert_eq!(store.execution_count().await, 0);
        assert_eq!(compose_reply("Bom dia!", &runs), "Bom dia!");
    }

    #[tokio::test]
    async fn unknown_tenant_has_no_tools() {
        let (pipeline, _) = pipeline_with_tools().await;
        let runs = pipeline
            .process_message("office-2", None, None, "Pode consultar o CPF do cliente?")
            .await;
        assert!(runs.is_empty());
    }

    #[tokio::test]
    async fn classifier_is_optional() {
        let (pipeline, _) = pipeline_with_tools().await;
        let text = "Quero falar com um advogado sobre meu benefício do INSS";

        let bare = pipeline.classify(text);
        assert!(bare.tags.is_empty());
        assert!(bare.transfer_to.is_none());

        let classified = pipeline
            .with_classifier(Arc::new(KeywordClassifier::default()))
            .classify(text);
        assert_eq!(classified.tags, vec!["previdenciario".to_string()]);
        assert_eq!(classified.transfer_to.as_deref(), Some("human"));
    }
}
