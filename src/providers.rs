//! Completion providers and the per-tenant registry that owns them.

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::error::{ProviderError, StoreResult};
use crate::store::ProviderConfigSource;
use crate::types::ProviderConfig;

const COMPLETION_TIMEOUT: Duration = Duration::from_secs(30);

#[async_trait]
pub trait CompletionProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(&self, system: &str, user: &str) -> Result<String, ProviderError>;

    /// Cheapest round trip that proves credentials and endpoint work.
    async fn test_connectivity(&self) -> Result<(), ProviderError>;
}

/// Any endpoint speaking the OpenAI chat-completions protocol.
pub struct OpenAiCompatibleProvider {
    client: reqwest::Client,
    config: ProviderConfig,
    timeout: Duration,
}

impl OpenAiCompatibleProvider {
    pub fn new(client: reqwest::Client, config: ProviderConfig) -> Self {
        Self {
            client,
            config,
            timeout: COMPLETION_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn chat(&self, body: Value) -> Result<Value, ProviderError> {
        if self.config.api_key.trim().is_empty() {
            return Err(ProviderError::NotConfigured(self.config.provider.clone()));
        }
        let url = format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );
        let response = self
            .client
            .post(url)
            .timeout(self.timeout)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status { status, body });
        }
        Ok(response.json::<Value>().await?)
    }
}

#[async_trait]
impl CompletionProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        &self.config.provider
    }

    async fn complete(&self, system: &str, user: &str) -> Result<String, ProviderError> {
        let payload = self
            .chat(json!({
                "model": self.config.model,
                "messages": [
                    { "role": "system", "content": system },
                    { "role": "user", "content": user }
                ],
                "temperature": 0.1
            }))
            .await?;
        let text = payload
            .get("choices")
            .and_then(Value::as_array)
            .and_then(|choices| choices.first())
            .and_then(|choice| choice.get("message"))
            .and_then(|msg| msg.get("content"))
            .and_then(Value::as_str)
            .map(str::trim)
            .unwrap_or("")
            .to_string();
        if text.is_empty() {
            return Err(ProviderError::EmptyContent);
        }
        Ok(text)
    }

    async fn test_connectivity(&self) -> Result<(), ProviderError> {
        self.chat(json!({
            "model": self.config.model,
            "messages": [{ "role": "user", "content": "ping" }],
            "max_tokens": 1
        }))
        .await
        .map(|_| ())
    }
}

type TenantProviders = HashMap<String, Vec<Arc<dyn CompletionProvider>>>;

/// Cloneable handle over the per-tenant provider instances.
///
/// Nothing is rebuilt implicitly; callers decide when to `refresh`.
#[derive(Clone)]
pub struct ProviderRegistry {
    client: reqwest::Client,
    default_config: Option<ProviderConfig>,
    tenants: Arc<RwLock<TenantProviders>>,
}

impl ProviderRegistry {
    pub fn new(client: reqwest::Client, default_config: Option<ProviderConfig>) -> Self {
        Self {
            client,
            default_config,
            tenants: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn handle(&self, tenant_id: &str) -> Vec<Arc<dyn CompletionProvider>> {
        self.tenants
            .read()
            .await
            .get(tenant_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Replace a tenant's providers. An empty config list falls back to the
    /// environment default, if one is configured.
    pub async fn refresh(&self, tenant_id: &str, configs: &[ProviderConfig]) -> usize {
        let configs: Vec<ProviderConfig> = if configs.is_empty() {
            self.default_config.iter().cloned().collect()
        } else {
            configs.to_vec()
        };
        let providers: Vec<Arc<dyn CompletionProvider>> = configs
            .into_iter()
            .map(|config| {
                Arc::new(OpenAiCompatibleProvider::new(self.client.clone(), config))
                    as Arc<dyn CompletionProvider>
            })
            .collect();
        let count = providers.len();
        self.tenants
            .write()
            .await
            .insert(tenant_id.to_string(), providers);
        info!(tenant_id, count, "Provider registry refreshed");
        count
    }

    pub async fn refresh_from(
        &self,
        source: &dyn ProviderConfigSource,
        tenant_id: &str,
    ) -> StoreResult<usize> {
        let configs = source.provider_configs(tenant_id).await?;
        Ok(self.refresh(tenant_id, &configs).await)
    }

    /// First provider that answers wins.
    pub async fn complete(
        &self,
        tenant_id: &str,
        system: &str,
        user: &str,
    ) -> Result<String, ProviderError> {
        let providers = self.handle(tenant_id).await;
        let mut last_error = ProviderError::NotConfigured(tenant_id.to_string());
        for provider in providers {
            match provider.complete(system, user).await {
                Ok(text) => return Ok(text),
                Err(err) => {
                    warn!(provider = provider.name(), error = %err, "Completion provider failed");
                    last_error = err;
                }
            }
        }
        Err(last_error)
    }
}
