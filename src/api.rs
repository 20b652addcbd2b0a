//! REST client for the comparison backend.
//!
//! [`Backend`] is the seam consumed by the lifecycle manager, the history
//! reconciler and the model catalog; [`ApiClient`] is its HTTP implementation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::auth::{acquire_token, AuthStatus, Identity};
use crate::config::{ArenaConfig, TokenRetryPolicy};
use crate::error::{ArenaError, Result};
use crate::models::{AiModel, GroupedModels, ModelCapabilities, ModelStats};
use crate::protocol::{ComparisonResult, CreateSessionRequest, Session, SubmitPromptRequest};

#[async_trait]
pub trait Backend: Send + Sync {
    /// `GET /models`
    async fn list_models(&self) -> Result<Vec<AiModel>>;
    /// `GET /models/grouped`
    async fn grouped_models(&self) -> Result<GroupedModels>;
    /// `GET /models/providers`
    async fn providers(&self) -> Result<Vec<String>>;
    /// `GET /models/capabilities`
    async fn capabilities(&self) -> Result<ModelCapabilities>;
    /// `GET /models/stats`
    async fn model_stats(&self) -> Result<ModelStats>;
    /// `POST /sessions`
    async fn create_session(&self, models: &[String]) -> Result<Session>;
    /// `GET /sessions/{id}`; a 404 is `Ok(None)`.
    async fn get_session(&self, session_id: &str) -> Result<Option<Session>>;
    /// `DELETE /sessions/{id}`
    async fn end_session(&self, session_id: &str) -> Result<()>;
    /// `POST /prompts/{sessionId}` (non-streaming fallback)
    async fn submit_prompt_http(&self, session_id: &str, prompt: &str) -> Result<ComparisonResult>;
    /// `GET /prompts/history`
    async fn history(&self) -> Result<Vec<ComparisonResult>>;
    /// `GET /prompts/sessions/{id}/history`
    async fn session_history(&self, session_id: &str) -> Result<Vec<ComparisonResult>>;
}

/// Error body shape the backend uses for non-2xx replies.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<serde_json::Value>,
}

pub struct ApiClient {
    base_url: String,
    client: reqwest::Client,
    identity: Option<Arc<dyn Identity>>,
    token_retry: TokenRetryPolicy,
}

impl ApiClient {
    pub fn builder(base_url: impl Into<String>) -> ApiClientBuilder {
        ApiClientBuilder::new(base_url)
    }

    /// Build from the `[backend]` and `[auth]` config sections.
    pub fn from_config(cfg: &ArenaConfig, identity: Option<Arc<dyn Identity>>) -> Self {
        let mut b = ApiClient::builder(cfg.backend.api_url.clone())
            .request_timeout(cfg.request_timeout())
            .connect_timeout(cfg.connect_timeout())
            .token_retry(cfg.auth.token_retry);
        if let Some(id) = identity {
            b = b.identity(id);
        }
        b.build()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    /// Bearer token for this request, if the user is signed in.
    async fn bearer(&self, url: &str) -> Option<String> {
        let identity = self.identity.as_ref()?;
        if identity.status() != AuthStatus::SignedIn {
            return None;
        }
        let token = acquire_token(identity.as_ref(), &self.token_retry).await;
        if token.is_none() {
            warn!(url, "no token available, sending request unauthenticated");
        }
        token
    }

    async fn send<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<reqwest::Response> {
        let url = self.url(path);
        let mut req = self.client.request(method.clone(), &url);
        if let Some(token) = self.bearer(&url).await {
            req = req.bearer_auth(token);
        }
        if let Some(b) = body {
            req = req.json(b);
        }
        debug!(%method, url = %url, "backend request");

        let resp = req.send().await.map_err(|e| {
            if e.is_timeout() {
                error!(url = %url, "request timeout");
                ArenaError::Timeout { url: url.clone() }
            } else {
                error!(url = %url, error = %e, "connection failed, backend may be down");
                ArenaError::Connect {
                    url: url.clone(),
                    detail: e.to_string(),
                }
            }
        })?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        Err(Self::status_error(status, url, resp).await)
    }

    async fn status_error(status: StatusCode, url: String, resp: reqwest::Response) -> ArenaError {
        match status.as_u16() {
            401 => {
                error!(url = %url, "401 unauthorized: token missing, invalid or expired");
                return ArenaError::Unauthorized { url };
            }
            429 => warn!(url = %url, "rate limit exceeded"),
            s if s >= 500 => error!(url = %url, status = s, "server error"),
            _ => {}
        }
        let message = resp
            .bytes()
            .await
            .ok()
            .and_then(|b| serde_json::from_slice::<ErrorBody>(&b).ok())
            .and_then(|b| b.message)
            .map(|m| match m {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            });
        ArenaError::Http {
            status: status.as_u16(),
            url,
            message,
        }
    }

    async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
        let url = resp.url().to_string();
        let bytes = resp.bytes().await.map_err(|e| ArenaError::Decode {
            url: url.clone(),
            detail: e.to_string(),
        })?;
        serde_json::from_slice::<T>(&bytes).map_err(|e| ArenaError::Decode {
            url,
            detail: e.to_string(),
        })
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let resp = self.send::<()>(Method::GET, path, None).await?;
        Self::decode(resp).await
    }
}

#[async_trait]
impl Backend for ApiClient {
    async fn list_models(&self) -> Result<Vec<AiModel>> {
        self.get("/models").await
    }

    async fn grouped_models(&self) -> Result<GroupedModels> {
        self.get("/models/grouped").await
    }

    async fn providers(&self) -> Result<Vec<String>> {
        self.get("/models/providers").await
    }

    async fn capabilities(&self) -> Result<ModelCapabilities> {
        self.get("/models/capabilities").await
    }

    async fn model_stats(&self) -> Result<ModelStats> {
        self.get("/models/stats").await
    }

    async fn create_session(&self, models: &[String]) -> Result<Session> {
        let body = CreateSessionRequest {
            selected_models: models.to_vec(),
        };
        let resp = self.send(Method::POST, "/sessions", Some(&body)).await?;
        Self::decode(resp).await
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<Session>> {
        let path = format!("/sessions/{session_id}");
        match self.send::<()>(Method::GET, &path, None).await {
            Ok(resp) => Self::decode(resp).await.map(Some),
            Err(ArenaError::Http { status: 404, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn end_session(&self, session_id: &str) -> Result<()> {
        let path = format!("/sessions/{session_id}");
        self.send::<()>(Method::DELETE, &path, None).await?;
        Ok(())
    }

    async fn submit_prompt_http(&self, session_id: &str, prompt: &str) -> Result<ComparisonResult> {
        let path = format!("/prompts/{session_id}");
        let body = SubmitPromptRequest {
            prompt: prompt.to_string(),
        };
        let resp = self.send(Method::POST, &path, Some(&body)).await?;
        Self::decode(resp).await
    }

    async fn history(&self) -> Result<Vec<ComparisonResult>> {
        self.get("/prompts/history").await
    }

    async fn session_history(&self, session_id: &str) -> Result<Vec<ComparisonResult>> {
        self.get(&format!("/prompts/sessions/{session_id}/history")).await
    }
}

/// Builder for [`ApiClient`].
///
/// # Example
/// ```rust,ignore
/// let api = ApiClient::builder("http://localhost:3000")
///     .identity(Arc::clone(&identity))
///     .request_timeout(Duration::from_secs(60))
///     .build();
/// ```
pub struct ApiClientBuilder {
    base_url: String,
    connect_timeout: Duration,
    request_timeout: Duration,
    identity: Option<Arc<dyn Identity>>,
    token_retry: TokenRetryPolicy,
}

impl ApiClientBuilder {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(60),
            identity: None,
            token_retry: TokenRetryPolicy::default(),
        }
    }

    /// Attach the identity whose token is sent on each request.
    pub fn identity(mut self, identity: Arc<dyn Identity>) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Single generous timeout covering model-generation latency (default 60 s).
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn token_retry(mut self, policy: TokenRetryPolicy) -> Self {
        self.token_retry = policy;
        self
    }

    pub fn build(self) -> ApiClient {
        // reqwest::Client::builder() can fail in extreme environments;
        // fall back to a default client instead of panicking.
        let client = reqwest::Client::builder()
            .connect_timeout(self.connect_timeout)
            .timeout(self.request_timeout)
            .build()
            .unwrap_or_default();
        ApiClient {
            base_url: self.base_url,
            client,
            identity: self.identity,
            token_retry: self.token_retry,
        }
    }
}
