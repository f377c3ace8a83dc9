//! **Collaborator contracts** consumed by the turn-taking core.
//!
//! The core never indexes documents or negotiates media; it only needs three calls:
//! 1. `retrieve_context(query)`: best-effort supporting text (CV excerpts) for a question.
//! 2. `fetch_session_credential()`: one-shot ephemeral token before the channel opens.
//! 3. `fetch_runtime_config()`: model, voice and persona, read once at startup.
//!
//! HTTP implementations talk to the interview backend (`/api/rag`, `/api/session`,
//! `/api/config`). Failures never block a turn: use [`context_or_empty`] and
//! [`load_runtime_config`] at call sites to degrade to empty/default values.

use crate::config::{BackendConfig, RuntimeConfig};
use crate::error::{CoreError, CoreResult};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

// -----------------------------------------------------------------------------
// Context retrieval
// -----------------------------------------------------------------------------

/// Turns a text query into supporting context. Empty string means "nothing found".
#[async_trait]
pub trait ContextRetriever: Send + Sync {
    async fn retrieve_context(&self, query: &str) -> CoreResult<String>;
}

/// Retriever for sessions without a document backend.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoContext;

#[async_trait]
impl ContextRetriever for NoContext {
    async fn retrieve_context(&self, _query: &str) -> CoreResult<String> {
        Ok(String::new())
    }
}

/// Returns the same context for every query.
#[derive(Debug, Clone, Default)]
pub struct StaticContext(pub String);

#[async_trait]
impl ContextRetriever for StaticContext {
    async fn retrieve_context(&self, _query: &str) -> CoreResult<String> {
        Ok(self.0.clone())
    }
}

#[derive(Deserialize)]
struct RagResponse {
    #[serde(default)]
    context: String,
}

/// `POST {base_url}/api/rag` with `{"query": ...}`, reading `{"context": ...}`.
#[derive(Debug, Clone)]
pub struct HttpContextRetriever {
    endpoint: String,
    min_query_len: usize,
    client: reqwest::Client,
}

impl HttpContextRetriever {
    pub fn new(backend: &BackendConfig) -> CoreResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(backend.request_timeout())
            .build()?;
        Ok(Self {
            endpoint: backend.endpoint("/api/rag"),
            min_query_len: backend.min_query_len,
            client,
        })
    }
}

#[async_trait]
impl ContextRetriever for HttpContextRetriever {
    async fn retrieve_context(&self, query: &str) -> CoreResult<String> {
        let query = query.trim();
        if query.chars().count() < self.min_query_len {
            return Ok(String::new());
        }

        let res = self
            .client
            .post(&self.endpoint)
            .json(&serde_json::json!({ "query": query }))
            .send()
            .await?;

        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(CoreError::Retrieval(format!("RAG endpoint {}: {}", status, body)));
        }

        let parsed: RagResponse = res.json().await?;
        Ok(parsed.context)
    }
}

/// Best-effort retrieval: any failure is logged and treated as empty context.
pub async fn context_or_empty(retriever: &dyn ContextRetriever, query: &str) -> String {
    match retriever.retrieve_context(query).await {
        Ok(ctx) => ctx,
        Err(e) => {
            warn!(target: "viva::backend", error = %e, "context retrieval failed; continuing without context");
            String::new()
        }
    }
}

// -----------------------------------------------------------------------------
// Session credential
// -----------------------------------------------------------------------------

/// Ephemeral token used once to establish the realtime channel.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionCredential {
    pub token: String,
}

impl std::fmt::Debug for SessionCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCredential")
            .field("token", &"<redacted>")
            .finish()
    }
}

#[async_trait]
pub trait CredentialSource: Send + Sync {
    async fn fetch_session_credential(&self) -> CoreResult<SessionCredential>;
}

#[derive(Deserialize)]
struct SessionResponse {
    #[serde(rename = "ephemeralKey")]
    ephemeral_key: Option<String>,
}

/// `GET {base_url}/api/session`, reading `{"ephemeralKey": ...}`.
#[derive(Debug, Clone)]
pub struct HttpCredentialSource {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpCredentialSource {
    pub fn new(backend: &BackendConfig) -> CoreResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(backend.request_timeout())
            .build()?;
        Ok(Self {
            endpoint: backend.endpoint("/api/session"),
            client,
        })
    }
}

#[async_trait]
impl CredentialSource for HttpCredentialSource {
    async fn fetch_session_credential(&self) -> CoreResult<SessionCredential> {
        let res = self.client.get(&self.endpoint).send().await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(CoreError::Credential(format!("session endpoint {}: {}", status, body)));
        }
        let parsed: SessionResponse = res.json().await?;
        let token = parsed
            .ephemeral_key
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .ok_or_else(|| CoreError::Credential("response carried no ephemeralKey".to_string()))?;
        debug!(target: "viva::backend", "session credential issued");
        Ok(SessionCredential { token })
    }
}

// -----------------------------------------------------------------------------
// Runtime config
// -----------------------------------------------------------------------------

#[async_trait]
pub trait RuntimeConfigSource: Send + Sync {
    async fn fetch_runtime_config(&self) -> CoreResult<RuntimeConfig>;
}

/// Fixed runtime config (defaults unless constructed otherwise).
#[derive(Debug, Clone, Default)]
pub struct StaticRuntimeConfig(pub RuntimeConfig);

#[async_trait]
impl RuntimeConfigSource for StaticRuntimeConfig {
    async fn fetch_runtime_config(&self) -> CoreResult<RuntimeConfig> {
        Ok(self.0.clone())
    }
}

/// `GET {base_url}/api/config`, reading `{"model", "voice", "systemPrompt"}`.
#[derive(Debug, Clone)]
pub struct HttpRuntimeConfigSource {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpRuntimeConfigSource {
    pub fn new(backend: &BackendConfig) -> CoreResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(backend.request_timeout())
            .build()?;
        Ok(Self {
            endpoint: backend.endpoint("/api/config"),
            client,
        })
    }
}

#[async_trait]
impl RuntimeConfigSource for HttpRuntimeConfigSource {
    async fn fetch_runtime_config(&self) -> CoreResult<RuntimeConfig> {
        let res = self.client.get(&self.endpoint).send().await?;
        if !res.status().is_success() {
            return Err(CoreError::RuntimeConfig(format!("config endpoint {}", res.status())));
        }
        let cfg: RuntimeConfig = res.json().await?;
        Ok(cfg)
    }
}

/// Fetch runtime config once; on failure fall back to built-in defaults.
pub async fn load_runtime_config(source: &dyn RuntimeConfigSource) -> RuntimeConfig {
    match source.fetch_runtime_config().await {
        Ok(cfg) => cfg.or_defaults(),
        Err(e) => {
            warn!(target: "viva::backend", error = %e, "runtime config unavailable; using defaults");
            RuntimeConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingRetriever;

    #[async_trait]
    impl ContextRetriever for FailingRetriever {
        async fn retrieve_context(&self, _query: &str) -> CoreResult<String> {
            Err(CoreError::Retrieval("index offline".to_string()))
        }
    }

    struct FailingConfig;

    #[async_trait]
    impl RuntimeConfigSource for FailingConfig {
        async fn fetch_runtime_config(&self) -> CoreResult<RuntimeConfig> {
            Err(CoreError::RuntimeConfig("unreachable".to_string()))
        }
    }

    #[tokio::test]
    async fn retrieval_failure_degrades_to_empty() {
        assert_eq!(context_or_empty(&FailingRetriever, "rust experience").await, "");
        assert_eq!(context_or_empty(&NoContext, "rust experience").await, "");
        assert_eq!(
            context_or_empty(&StaticContext("Senior engineer".into()), "x").await,
            "Senior engineer"
        );
    }

    #[tokio::test]
    async fn short_queries_skip_the_network() {
        let backend = BackendConfig {
            // nothing listens here; a request would fail
            base_url: "http://127.0.0.1:9".to_string(),
            ..Default::default()
        };
        let retriever = HttpContextRetriever::new(&backend).unwrap();
        assert_eq!(retriever.retrieve_context("hi").await.unwrap(), "");
        assert!(retriever.retrieve_context("distributed systems").await.is_err());
    }

    #[tokio::test]
    async fn runtime_config_falls_back_to_defaults() {
        let cfg = load_runtime_config(&FailingConfig).await;
        assert_eq!(cfg, RuntimeConfig::default());

        let custom = RuntimeConfig {
            voice: "alloy".to_string(),
            ..Default::default()
        };
        let cfg = load_runtime_config(&StaticRuntimeConfig(custom)).await;
        assert_eq!(cfg.voice, "alloy");
    }

    #[test]
    fn credential_debug_is_redacted() {
        let c = SessionCredential { token: "ek_secret".to_string() };
        assert!(!format!("{:?}", c).contains("ek_secret"));
    }
}
