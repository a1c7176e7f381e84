//! The Upstream Client: talks to exactly one configured provider.
//!
//! Contract (§4.A): `list_models`, `chat`, `chat_raw`, `embed`, all against
//! one base URL, all carrying a bearer credential if configured. The
//! client never retries — it classifies failures and hands a
//! [`GatewayError`] back to the caller, who decides what to do (the Router
//! Core quarantines on transport/fatal-upstream errors; everything else is
//! surfaced as-is, per §7).

use reqwest::Response;
use serde_json::Value;

use crate::error::GatewayError;
use crate::upstream::http_pool::{get_or_create_client, DEFAULT_REQUEST_TIMEOUT, LIST_MODELS_TIMEOUT};

/// One upstream chat-completion provider, reachable at `base_url`.
#[derive(Clone)]
pub struct UpstreamClient {
    base_url: String,
    credential: Option<String>,
    http: reqwest::Client,
}

impl UpstreamClient {
    pub fn new(base_url: impl Into<String>, credential: Option<String>) -> Self {
        let base_url = base_url.into();
        let http = get_or_create_client(&base_url);
        UpstreamClient {
            base_url,
            credential,
            http,
        }
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.credential {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<Response, GatewayError> {
        builder.send().await.map_err(|err| GatewayError::classify_transport(err.to_string()))
    }

    /// `GET /models`, capped at the 5 s ceiling (§4.A, §5).
    pub async fn list_models(&self) -> Result<Vec<String>, GatewayError> {
        let builder = self
            .authorize(self.http.get(self.url("/models")))
            .timeout(LIST_MODELS_TIMEOUT);
        let response = self.send(builder).await?;
        let response = Self::check_status(response).await?;
        let body: Value = response
            .json()
            .await
            .map_err(|err| GatewayError::Transport(err.to_string()))?;
        let ids = body
            .get("data")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(|entry| entry.get("id").and_then(Value::as_str))
            .map(str::to_string)
            .collect();
        Ok(ids)
    }

    /// `POST /chat/completions`, fully decoded, non-streaming.
    pub async fn chat(&self, request_body: &Value) -> Result<Value, GatewayError> {
        let builder = self
            .authorize(self.http.post(self.url("/chat/completions")))
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .json(request_body);
        let response = self.send(builder).await?;
        let response = Self::check_status(response).await?;
        response
            .json()
            .await
            .map_err(|err| GatewayError::Transport(err.to_string()))
    }

    /// `POST /chat/completions` with an open streaming body and response headers,
    /// for the router to splice through (§4.E).
    pub async fn chat_raw(&self, request_body: &Value) -> Result<Response, GatewayError> {
        let builder = self
            .authorize(self.http.post(self.url("/chat/completions")))
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .json(request_body);
        let response = self.send(builder).await?;
        Self::check_status(response).await
    }

    /// `POST /embeddings`, forwarded unchanged (§6).
    pub async fn embed(&self, request_body: &Value) -> Result<Value, GatewayError> {
        let builder = self
            .authorize(self.http.post(self.url("/embeddings")))
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .json(request_body);
        let response = self.send(builder).await?;
        let response = Self::check_status(response).await?;
        response
            .json()
            .await
            .map_err(|err| GatewayError::Transport(err.to_string()))
    }

    /// Check a response's status and fully drain the body on failure so the
    /// connection can be returned to the pool (§4.A: "Body is always fully
    /// drained or explicitly closed").
    async fn check_status(response: Response) -> Result<Response, GatewayError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        if let Some(fatal) = GatewayError::fatal_marker_in(&body) {
            return Err(fatal);
        }
        Err(GatewayError::UpstreamStatus {
            status: status.as_u16(),
            body,
        })
    }
}
