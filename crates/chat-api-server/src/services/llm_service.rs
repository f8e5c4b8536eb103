use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::Stream;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::settings::LlmConfig;
use crate::models::chat::ChatMessage;
use crate::services::cache::{CacheLayer, NS_MODELS};
use crate::utils::error::ApiError;

pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, ApiError>> + Send>>;

/// Upstream completion capability. The chat flow and tests depend on this
/// seam, not on the concrete client.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn generate_stream(
        &self,
        model: &str,
        messages: Vec<ChatMessage>,
    ) -> Result<TokenStream, ApiError>;

    async fn list_models(&self) -> Result<Vec<String>, ApiError>;
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChunk {
    choices: Vec<ChoiceChunk>,
}

#[derive(Debug, Deserialize)]
struct ChoiceChunk {
    delta: Delta,
}

#[derive(Debug, Deserialize)]
struct Delta {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelList {
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}

#[derive(Debug, PartialEq)]
enum StreamEvent {
    Delta(String),
    Done,
}

/// Pops one complete line off the SSE buffer, or None until more bytes land.
fn next_line(buf: &mut String) -> Option<String> {
    let pos = buf.find('\n')?;
    let line = buf[..pos].trim_end_matches('\r').to_string();
    buf.drain(..=pos);
    Some(line)
}

fn parse_sse_line(line: &str) -> Option<StreamEvent> {
    let data = line.strip_prefix("data: ")?;
    if data == "[DONE]" {
        return Some(StreamEvent::Done);
    }
    let chunk: ChatCompletionChunk = match serde_json::from_str(data) {
        Ok(chunk) => chunk,
        Err(e) => {
            debug!("skipping unparseable completion chunk: {}", e);
            return None;
        }
    };
    chunk
        .choices
        .first()
        .and_then(|c| c.delta.content.clone())
        .map(StreamEvent::Delta)
}

fn request_error(e: reqwest::Error) -> ApiError {
    if e.is_timeout() {
        ApiError::UpstreamTimeout("completion request timed out".to_string())
    } else {
        ApiError::UpstreamFailure(format!("failed to reach completion API: {}", e))
    }
}

fn status_error(status: reqwest::StatusCode, body: &str) -> ApiError {
    match status.as_u16() {
        401 => ApiError::UpstreamFailure("completion API rejected the key".to_string()),
        408 => ApiError::UpstreamTimeout("completion API timed out".to_string()),
        _ => ApiError::UpstreamFailure(format!("completion API error: {} - {}", status, body)),
    }
}

#[derive(Clone)]
pub struct LlmService {
    client: Client,
    config: LlmConfig,
    cache: Arc<CacheLayer>,
}

impl LlmService {
    pub fn new(config: LlmConfig, cache: Arc<CacheLayer>) -> Self {
        Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(config.timeout_seconds))
                .build()
                .expect("Failed to create HTTP client"),
            config,
            cache,
        }
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }
}

#[async_trait]
impl CompletionProvider for LlmService {
    /// Streams content deltas from `{base_url}/v1/chat/completions`.
    async fn generate_stream(
        &self,
        model: &str,
        messages: Vec<ChatMessage>,
    ) -> Result<TokenStream, ApiError> {
        debug!(%model, "starting completion stream with {} messages", messages.len());

        let request = ChatCompletionRequest {
            model: model.to_string(),
            messages,
            stream: true,
        };

        let response = self
            .authorized(
                self.client
                    .post(format!("{}/v1/chat/completions", self.config.base_url)),
            )
            .json(&request)
            .send()
            .await
            .map_err(request_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body));
        }

        let mut byte_stream = Box::pin(response.bytes_stream());

        let parsed = async_stream::stream! {
            let mut buf = String::new();
            while let Some(chunk) = byte_stream.next().await {
                match chunk {
                    Ok(bytes) => {
                        buf.push_str(&String::from_utf8_lossy(&bytes));
                        while let Some(line) = next_line(&mut buf) {
                            match parse_sse_line(&line) {
                                Some(StreamEvent::Delta(text)) => yield Ok(text),
                                Some(StreamEvent::Done) => return,
                                None => {}
                            }
                        }
                    }
                    Err(e) => {
                        yield Err(if e.is_timeout() {
                            ApiError::UpstreamTimeout("completion stream timed out".to_string())
                        } else {
                            ApiError::UpstreamFailure(format!("completion stream failed: {}", e))
                        });
                        return;
                    }
                }
            }
        };

        Ok(Box::pin(parsed))
    }

    /// Model ids from the upstream, read through the `models` cache namespace.
    async fn list_models(&self) -> Result<Vec<String>, ApiError> {
        if let Some(models) = self.cache.get::<Vec<String>>(NS_MODELS, "list").await {
            return Ok(models);
        }

        let response = self
            .authorized(self.client.get(format!("{}/v1/models", self.config.base_url)))
            .send()
            .await
            .map_err(request_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body));
        }

        let list: ModelList = response
            .json()
            .await
            .map_err(|e| ApiError::UpstreamFailure(format!("failed to parse model list: {}", e)))?;
        let models: Vec<String> = list.data.into_iter().map(|m| m.id).collect();

        if models.is_empty() {
            warn!("completion API returned an empty model list");
        }
        self.cache.set(NS_MODELS, "list", &models, None).await;
        Ok(models)
    }
}
