use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{BoxStream, StreamExt};
use reqwest::header::{HeaderMap, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use tracing::{debug, warn};

use crate::error::{ChatError, ChatResult};
use crate::protocol::{
    BackendStatus, ChatRequest, ErrorBody, RefineRequest, RefineResponse,
    RelatedQuestionsRequest, RelatedQuestionsResponse, ResultItem, SearchResponse,
};

pub const EVENT_STREAM: &str = "text/event-stream";

/// Raw body reads of a streaming response.
pub type ByteStream = BoxStream<'static, ChatResult<Vec<u8>>>;

pub enum ChatResponse {
    /// The body is an event stream; nothing has been read yet.
    Streaming(ByteStream),
    /// A single JSON document of results.
    Buffered(SearchResponse),
}

impl std::fmt::Debug for ChatResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChatResponse::Streaming(_) => f.write_str("ChatResponse::Streaming(..)"),
            ChatResponse::Buffered(body) => f
                .debug_tuple("ChatResponse::Buffered")
                .field(&body.results.len())
                .finish(),
        }
    }
}

/// Everything the session needs from the backend. No method retries.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn chat(&self, request: &ChatRequest) -> ChatResult<ChatResponse>;

    async fn refine(&self, query: &str) -> ChatResult<RefineResponse>;

    async fn related_questions(&self, query: &str, response: &str) -> ChatResult<Vec<String>>;

    async fn status(&self) -> ChatResult<BackendStatus>;

    /// `Ok(None)` when the backend has no such article.
    async fn article(&self, number: &str) -> ChatResult<Option<ResultItem>>;
}

#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
}

impl HttpTransport {
    /// Only connecting is bounded by `connect_timeout`; a long answer is
    /// never cut off mid-stream.
    pub fn new(base_url: &str, connect_timeout: Duration) -> ChatResult<Self> {
        let client = Client::builder().connect_timeout(connect_timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn chat(&self, request: &ChatRequest) -> ChatResult<ChatResponse> {
        let response = self
            .client
            .post(self.url("/api/chat"))
            .json(request)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "chat request failed");
                ChatError::from(e)
            })?;

        let status = response.status();
        if status.is_success() && is_event_stream(response.headers()) {
            let body = response
                .bytes_stream()
                .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(ChatError::from))
                .boxed();
            return Ok(ChatResponse::Streaming(body));
        }

        let body = response.bytes().await?;
        match serde_json::from_slice::<SearchResponse>(&body) {
            Ok(results) => Ok(ChatResponse::Buffered(results)),
            Err(err) if status.is_success() => Err(ChatError::http_status(
                status.as_u16(),
                format!("unreadable response body: {}", err),
            )),
            Err(_) => {
                let message = error_message(status, &body);
                warn!(status = status.as_u16(), %message, "chat request rejected");
                Err(ChatError::http_status(status.as_u16(), message))
            }
        }
    }

    async fn refine(&self, query: &str) -> ChatResult<RefineResponse> {
        let response = self
            .client
            .post(self.url("/api/refine"))
            .json(&RefineRequest { query })
            .send()
            .await
            .map_err(auxiliary)?;

        if !response.status().is_success() {
            return Err(ChatError::Auxiliary(format!(
                "refine returned {}",
                response.status()
            )));
        }
        response.json().await.map_err(auxiliary)
    }

    async fn related_questions(&self, query: &str, answer: &str) -> ChatResult<Vec<String>> {
        let response = self
            .client
            .post(self.url("/api/related-questions"))
            .json(&RelatedQuestionsRequest {
                query,
                response: answer,
            })
            .send()
            .await
            .map_err(auxiliary)?;

        if !response.status().is_success() {
            return Err(ChatError::Auxiliary(format!(
                "related-questions returned {}",
                response.status()
            )));
        }
        let body: RelatedQuestionsResponse = response.json().await.map_err(auxiliary)?;
        Ok(body.questions)
    }

    async fn status(&self) -> ChatResult<BackendStatus> {
        let response = self.client.get(self.url("/api/status")).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.bytes().await.unwrap_or_default();
            return Err(ChatError::http_status(status.as_u16(), error_message(status, &body)));
        }
        Ok(response.json().await?)
    }

    async fn article(&self, number: &str) -> ChatResult<Option<ResultItem>> {
        let url = self.url(&format!("/api/article/{}", number.trim()));
        let response = self.client.get(url).send().await?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            debug!(number, "article not found");
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.bytes().await.unwrap_or_default();
            return Err(ChatError::http_status(status.as_u16(), error_message(status, &body)));
        }
        Ok(Some(response.json().await?))
    }
}

fn is_event_stream(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_ascii_lowercase().contains(EVENT_STREAM))
        .unwrap_or(false)
}

fn auxiliary(err: reqwest::Error) -> ChatError {
    ChatError::Auxiliary(err.to_string())
}

/// Prefer the body's `error` field, then the status reason.
fn error_message(status: StatusCode, body: &[u8]) -> String {
    serde_json::from_slice::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.error)
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("unexpected status")
                .to_string()
        })
}
