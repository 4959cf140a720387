use std::future::Future;

use chrono::{DateTime, Utc};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use uuid::Uuid;

use parley_shared::types::api::{ApiErrorResponse, ApiResponse};
use parley_shared::{
    ChannelDetail, ChannelInfo, ChannelSummary, CreateChannelRequest, CursorPage, MarkSeenRequest,
    MessageView, SendMessageRequest, UnreadCount, WatermarkRow,
};

use crate::error::{ClientError, ClientResult};

/// The server operations a feed session depends on.
pub trait FeedSource: Send + Sync + 'static {
    /// One page of messages, newest first, continuing after `cursor`.
    fn list_messages(
        &self,
        channel_id: Uuid,
        cursor: Option<String>,
        limit: u32,
    ) -> impl Future<Output = ClientResult<CursorPage<MessageView>>> + Send;

    fn mark_seen(
        &self,
        channel_id: Uuid,
        last_seen_at: DateTime<Utc>,
    ) -> impl Future<Output = ClientResult<WatermarkRow>> + Send;
}

/// HTTP client for the Parley REST API.
#[derive(Clone)]
pub struct ParleyApi {
    client: Client,
    base_url: String,
    token: String,
}

impl ParleyApi {
    pub fn new(base_url: &str, token: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base_url, path))
            .header("Authorization", format!("Bearer {}", self.token))
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> ClientResult<T> {
        let response = request.send().await?;
        let status = response.status();
        let body = response.bytes().await?;
        decode_envelope(status, &body)
    }

    pub async fn list_channels(&self) -> ClientResult<Vec<ChannelSummary>> {
        self.send(self.request(Method::GET, "/channels")).await
    }

    pub async fn create_channel(&self, req: &CreateChannelRequest) -> ClientResult<ChannelInfo> {
        self.send(self.request(Method::POST, "/channels").json(req)).await
    }

    pub async fn channel_detail(&self, channel_id: Uuid) -> ClientResult<ChannelDetail> {
        self.send(self.request(Method::GET, &format!("/channels/{channel_id}"))).await
    }

    pub async fn send_message(&self, channel_id: Uuid, req: &SendMessageRequest) -> ClientResult<MessageView> {
        self.send(
            self.request(Method::POST, &format!("/channels/{channel_id}/messages"))
                .json(req),
        )
        .await
    }

    pub async fn watermarks(&self, channel_id: Uuid) -> ClientResult<Vec<WatermarkRow>> {
        self.send(self.request(Method::GET, &format!("/channels/{channel_id}/watermarks")))
            .await
    }

    pub async fn unread(&self) -> ClientResult<Vec<UnreadCount>> {
        self.send(self.request(Method::GET, "/unread")).await
    }
}

impl FeedSource for ParleyApi {
    async fn list_messages(
        &self,
        channel_id: Uuid,
        cursor: Option<String>,
        limit: u32,
    ) -> ClientResult<CursorPage<MessageView>> {
        let mut query = vec![("limit", limit.to_string())];
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor));
        }
        self.send(
            self.request(Method::GET, &format!("/channels/{channel_id}/messages"))
                .query(&query),
        )
        .await
    }

    async fn mark_seen(&self, channel_id: Uuid, last_seen_at: DateTime<Utc>) -> ClientResult<WatermarkRow> {
        self.send(
            self.request(Method::POST, &format!("/channels/{channel_id}/seen"))
                .json(&MarkSeenRequest { last_seen_at }),
        )
        .await
    }
}

/// Unwrap the `ApiResponse` envelope, or turn an error envelope into
/// `ClientError::Api`.
pub(crate) fn decode_envelope<T: DeserializeOwned>(status: StatusCode, body: &[u8]) -> ClientResult<T> {
    if status.is_success() {
        let envelope: ApiResponse<T> = serde_json::from_slice(body)?;
        return Ok(envelope.data);
    }

    match serde_json::from_slice::<ApiErrorResponse>(body) {
        Ok(err) => {
            tracing::debug!(status = %status, code = %err.error.code, "api error");
            Err(ClientError::api(err.error.code, err.error.message))
        }
        Err(_) => Err(ClientError::api("E0001", format!("unexpected response status {status}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_envelope_yields_data() {
        let body = br#"{"success":true,"data":{"user_id":null,"last_seen_at":"2025-01-15T10:00:00Z"}}"#;
        let row: WatermarkRow = decode_envelope(StatusCode::OK, body).unwrap();
        assert_eq!(row.user_id, None);
        assert_eq!(row.last_seen_at.to_rfc3339(), "2025-01-15T10:00:00+00:00");
    }

    #[test]
    fn error_envelope_becomes_api_error() {
        let body = br#"{"success":false,"error":{"code":"E3002","message":"not a member"}}"#;
        let err = decode_envelope::<WatermarkRow>(StatusCode::FORBIDDEN, body).unwrap_err();
        assert!(err.is_authorization());
        assert_eq!(err.to_string(), "not a member (E3002)");
    }

    #[test]
    fn non_envelope_failure_is_internal() {
        let err = decode_envelope::<WatermarkRow>(StatusCode::BAD_GATEWAY, b"<html>").unwrap_err();
        assert_eq!(err.code(), Some(parley_shared::ErrorCode::InternalError));
    }

    #[test]
    fn base_url_trailing_slash_is_dropped() {
        let api = ParleyApi::new("http://localhost:3004/", "t");
        assert_eq!(api.base_url, "http://localhost:3004");
    }
}
