use chrono::{DateTime, Utc};
use reqwest::{RequestBuilder, Response, StatusCode};
use tracing::debug;

use super::error::{ApiError, ApiResult};
use super::types::*;
use crate::models::PageCursor;

/// Server search query length bounds.
pub const MIN_QUERY_CHARS: usize = 2;
pub const MAX_QUERY_CHARS: usize = 100;

/// Typed client for the chat backend's JSON-over-HTTPS endpoints.
///
/// Owner-bound calls carry a bearer token when one is configured;
/// anonymous sessions work without one.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    auth_token: Option<String>,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth_token: None,
        }
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.auth_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Send one chat turn.
    pub async fn send_chat(&self, request: &ChatRequest) -> ApiResult<ChatResponse> {
        debug!(model = ?request.model, "sending chat turn");
        let response = self
            .authed(self.http.post(self.url("/api/chat")).json(request))
            .send()
            .await?;
        Self::decode(response).await
    }

    /// Persist a message pair; callers treat this as fire-and-forget.
    pub async fn save_messages(
        &self,
        request: &SaveMessagesRequest,
    ) -> ApiResult<SaveMessagesResponse> {
        let response = self
            .authed(self.http.post(self.url("/api/messages")).json(request))
            .send()
            .await?;
        Self::decode(response).await
    }

    /// Push every locally known owned conversation in one batch.
    pub async fn push_sync(&self, request: &SyncPushRequest) -> ApiResult<SyncPushResponse> {
        let response = self
            .authed(self.http.post(self.url("/api/sync")).json(request))
            .send()
            .await?;
        Self::decode(response).await
    }

    /// Pull one page of conversation summaries.
    pub async fn list_conversations(
        &self,
        limit: u32,
        cursor: Option<&PageCursor>,
    ) -> ApiResult<ListConversationsResponse> {
        let mut query: Vec<(&str, String)> = vec![
            ("limit", limit.to_string()),
            ("summary_only", "true".to_string()),
        ];
        if let Some(cursor) = cursor {
            query.push(("cursor_ts", cursor.ts.to_string()));
            query.push(("cursor_id", cursor.id.clone()));
        }
        let response = self
            .authed(self.http.get(self.url("/api/sync")).query(&query))
            .send()
            .await?;
        Self::decode(response).await
    }

    /// Load a conversation's messages, optionally only those after
    /// `since` (incremental revalidation).
    pub async fn load_messages(
        &self,
        session_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> ApiResult<MessagesResponse> {
        let mut query: Vec<(&str, String)> = vec![("session_id", session_id.to_string())];
        if let Some(since) = since {
            query.push(("since_ts", since.timestamp_millis().to_string()));
        }
        let response = self
            .authed(self.http.get(self.url("/api/messages")).query(&query))
            .send()
            .await?;
        Self::decode(response).await
    }

    pub async fn delete_conversation(&self, id: &str) -> ApiResult<DeleteResponse> {
        let response = self
            .authed(
                self.http
                    .delete(self.url("/api/sessions"))
                    .query(&[("id", id)]),
            )
            .send()
            .await?;
        Self::decode(response).await
    }

    pub async fn clear_all_conversations(&self) -> ApiResult<ClearAllResponse> {
        let response = self
            .authed(self.http.delete(self.url("/api/sessions/clear-all")))
            .send()
            .await?;
        Self::decode(response).await
    }

    pub async fn update_title(
        &self,
        request: &UpdateTitleRequest,
    ) -> ApiResult<UpdateTitleResponse> {
        let response = self
            .authed(self.http.post(self.url("/api/session")).json(request))
            .send()
            .await?;
        Self::decode(response).await
    }

    /// Server full-text search; the query must be 2..=100 characters.
    pub async fn search(&self, query: &str, limit: u32) -> ApiResult<SearchResponse> {
        let chars = query.chars().count();
        if !(MIN_QUERY_CHARS..=MAX_QUERY_CHARS).contains(&chars) {
            return Err(ApiError::InvalidQuery(format!(
                "query must be {MIN_QUERY_CHARS}..={MAX_QUERY_CHARS} characters, got {chars}"
            )));
        }
        let response = self
            .authed(
                self.http
                    .get(self.url("/api/search"))
                    .query(&[("q", query.to_string()), ("limit", limit.to_string())]),
            )
            .send()
            .await?;
        Self::decode(response).await
    }

    /// Upload inline image payloads, returning durable references.
    pub async fn persist_images(
        &self,
        request: &PersistImagesRequest,
    ) -> ApiResult<PersistImagesResponse> {
        let response = self
            .authed(self.http.post(self.url("/api/images")).json(request))
            .send()
            .await?;
        Self::decode(response).await
    }

    pub async fn post_error_events(
        &self,
        request: &TelemetryRequest,
    ) -> ApiResult<TelemetryResponse> {
        let response = self
            .http
            .post(self.url("/api/telemetry/errors"))
            .json(request)
            .send()
            .await?;
        Self::decode(response).await
    }

    pub async fn post_usage_events(
        &self,
        request: &TelemetryRequest,
    ) -> ApiResult<TelemetryResponse> {
        let response = self
            .http
            .post(self.url("/api/telemetry/usage"))
            .json(request)
            .send()
            .await?;
        Self::decode(response).await
    }

    /// Decode a 2xx body, or classify a non-2xx into a coded server error.
    async fn decode<T: serde::de::DeserializeOwned>(response: Response) -> ApiResult<T> {
        let status = response.status();
        let body = response.text().await?;
        if status.is_success() {
            return Ok(serde_json::from_str(&body)?);
        }
        let parsed: ErrorBody = serde_json::from_str(&body).unwrap_or_default();
        Err(ApiError::Server {
            status: status.as_u16(),
            code: parsed
                .code
                .or(parsed.error)
                .unwrap_or_else(|| default_code_for(status).to_string()),
            message: parsed
                .message
                .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string()),
            retry_after: parsed.retry_after,
            upstream_code: parsed.upstream_code,
            upstream_message: parsed.upstream_message,
        })
    }
}

fn default_code_for(status: StatusCode) -> &'static str {
    match status.as_u16() {
        429 => "rate_limit_exceeded",
        400 => "validation_error",
        401 | 403 => "unauthorized",
        502 | 503 => "upstream_error",
        _ => "server_error",
    }
}
