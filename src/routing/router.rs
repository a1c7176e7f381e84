//! The Router Core (§4.E): the public completion/embedding/model-listing
//! surface, built on top of the Provider Registry and Model Index.

use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::stream::{Stream, StreamExt};
use serde_json::Value;

use crate::error::GatewayError;
use crate::estimator::TokenEstimator;
use crate::provider::ProviderRegistry;
use crate::routing::model_index::ModelIndex;
use crate::upstream::sse::{line_stream, scan_line, ScannedLine};

/// Wraps a streaming completion body so the provider's `active` counter is
/// decremented exactly once, whichever comes first: the stream running out
/// (`poll_next` returning `None`) or the stream being dropped before that —
/// the client-disconnect case, since `Body::from_stream`'s consuming future
/// is simply dropped mid-stream rather than polled to exhaustion (§4.E, §5).
struct ActiveCountedStream {
    inner: Pin<Box<dyn Stream<Item = Result<String, GatewayError>> + Send>>,
    active: Arc<AtomicU32>,
    decremented: bool,
}

impl ActiveCountedStream {
    fn decrement_once(&mut self) {
        if !self.decremented {
            self.decremented = true;
            let _ = self.active.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| Some(v.saturating_sub(1)));
        }
    }
}

impl Stream for ActiveCountedStream {
    type Item = Result<String, GatewayError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let poll = self.inner.as_mut().poll_next(cx);
        if let Poll::Ready(None) = poll {
            self.decrement_once();
        }
        poll
    }
}

impl Drop for ActiveCountedStream {
    fn drop(&mut self) {
        self.decrement_once();
    }
}

/// Owns the registry and index together so quarantine can purge the index
/// under one consistent lock ordering (registry map mutation is lock-free
/// per-provider atomics; index purge takes the index's own write lock).
pub struct RouterCore {
    registry: ProviderRegistry,
    index: ModelIndex,
}

impl RouterCore {
    pub fn new(registry: ProviderRegistry) -> Self {
        RouterCore {
            registry,
            index: ModelIndex::new(),
        }
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn index(&self) -> &ModelIndex {
        &self.index
    }

    /// Quarantine `provider_name` and purge it from the index — the two
    /// steps the spec describes as happening together "under the write
    /// lock" (§4.C).
    async fn quarantine_and_purge(&self, provider_name: &str, reason: &str) {
        self.registry.quarantine(provider_name, reason);
        self.index.purge_provider(provider_name).await;
    }

    fn extract_model(request: &Value) -> Result<&str, GatewayError> {
        request
            .get("model")
            .and_then(Value::as_str)
            .ok_or_else(|| GatewayError::InvalidRequest("missing \"model\" field".to_string()))
    }

    fn extract_prompt_texts(request: &Value) -> Vec<String> {
        request
            .get("messages")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(|m| m.get("content").and_then(Value::as_str))
            .map(str::to_string)
            .collect()
    }

    /// Non-streaming completion (§4.E).
    pub async fn complete(&self, request: Value) -> Result<Value, GatewayError> {
        let model = Self::extract_model(&request)?;
        let provider_name = self.index.select(model, &self.registry).await?;
        let provider = self.registry.get(&provider_name).expect("selected provider must exist");

        provider.incr_active();
        let prompt_texts = Self::extract_prompt_texts(&request);
        let mut estimator = TokenEstimator::new(&prompt_texts);

        let result = provider.client().chat(&request).await;
        let response = match result {
            Ok(response) => response,
            Err(err) => {
                provider.decr_active();
                if err.quarantines_provider() {
                    self.quarantine_and_purge(&provider_name, &err.to_string()).await;
                }
                return Err(err);
            }
        };

        let completion_text = response
            .get("choices")
            .and_then(Value::as_array)
            .and_then(|c| c.first())
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(Value::as_str)
            .unwrap_or("");
        estimator.feed_complete(completion_text);

        let mut response = response;
        if response.get("usage").is_none() {
            if let Some(obj) = response.as_object_mut() {
                obj.insert("usage".to_string(), serde_json::to_value(estimator.finish()).unwrap());
            }
        }

        provider.decr_active();
        Ok(response)
    }

    /// Streaming completion (§4.E): returns a stream of SSE lines, already
    /// usage-patched where needed, ready to be flushed one at a time by the
    /// HTTP layer.
    pub async fn complete_stream(
        &self,
        request: Value,
    ) -> Result<impl Stream<Item = Result<String, GatewayError>> + 'static, GatewayError> {
        let model = Self::extract_model(&request)?;
        let provider_name = self.index.select(model, &self.registry).await?;
        let provider = self.registry.get(&provider_name).expect("selected provider must exist");

        provider.incr_active();
        let prompt_texts = Self::extract_prompt_texts(&request);
        let estimator = TokenEstimator::new(&prompt_texts);

        let response = match provider.client().chat_raw(&request).await {
            Ok(response) => response,
            Err(err) => {
                provider.decr_active();
                if err.quarantines_provider() {
                    self.quarantine_and_purge(&provider_name, &err.to_string()).await;
                }
                return Err(err);
            }
        };

        let active_handle = provider.active_handle();
        let lines = line_stream(response);
        let stream = futures_util::stream::unfold(
            (lines, estimator),
            move |(mut lines, mut estimator)| async move {
                let line = lines.next().await?;
                let line = match line {
                    Ok(line) => line,
                    Err(err) => return Some((Err(err), (lines, estimator))),
                };
                let scanned = scan_line(&line, &mut estimator);
                let out = match scanned {
                    ScannedLine::PassThrough(s) => s,
                    ScannedLine::Patched(s) => s,
                    ScannedLine::Done => line,
                    ScannedLine::Other(s) => s,
                };
                Some((Ok(out), (lines, estimator)))
            },
        );

        // `active` is decremented exactly once by `ActiveCountedStream`,
        // whether this stream runs to exhaustion or is dropped early on
        // client disconnect (§4.E, §5).
        Ok(ActiveCountedStream {
            inner: Box::pin(stream),
            active: active_handle,
            decremented: false,
        })
    }

    /// Forward an embedding request unchanged after selecting a provider (§6).
    pub async fn embed(&self, request: Value) -> Result<Value, GatewayError> {
        let model = Self::extract_model(&request)?;
        let provider_name = self.index.select(model, &self.registry).await?;
        let provider = self.registry.get(&provider_name).expect("selected provider must exist");
        provider.client().embed(&request).await
    }

    /// Refresh the index, then return sorted model ids (§4.E, §6).
    pub async fn refresh_and_list_models(&self) -> Vec<String> {
        self.index.refresh(&self.registry).await;
        self.index.model_ids_sorted().await
    }
}
