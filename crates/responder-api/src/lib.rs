//! REST client for the responder messaging API.
//!
//! [`ResponderApiClient`] implements [`chat_sync::MessageTransport`] over
//! HTTP so a [`chat_sync::ChatSyncEngine`] can talk to the real backend.

use std::time::Duration;

use async_trait::async_trait;
use chat_sync::{ApiResponse, MessageTransport, RawMessage, SendRequest, TransportError};
use reqwest::{Client, Response, Url};
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(8);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Clone)]
pub struct ResponderApiClient {
    http: Client,
    base_url: Url,
    token: String,
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to build http client: {0}")]
    Build(#[from] reqwest::Error),
    #[error("invalid base url {url}: {reason}")]
    InvalidBaseUrl { url: String, reason: String },
}

#[derive(Debug, Serialize)]
struct PostMessageBody<'a> {
    message: &'a str,
    file_urls: &'a [String],
    sender_type: &'a str,
}

impl ResponderApiClient {
    pub fn new(base_url: impl AsRef<str>, token: impl Into<String>) -> Result<Self, ClientError> {
        Self::with_timeout(base_url, token, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(
        base_url: impl AsRef<str>,
        token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ClientError> {
        let raw = base_url.as_ref().trim();
        let base_url = Url::parse(raw).map_err(|err| ClientError::InvalidBaseUrl {
            url: raw.to_string(),
            reason: err.to_string(),
        })?;
        if base_url.cannot_be_a_base() || !matches!(base_url.scheme(), "http" | "https") {
            return Err(ClientError::InvalidBaseUrl {
                url: raw.to_string(),
                reason: "expected an http(s) url".into(),
            });
        }
        let http = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT.min(timeout))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            base_url,
            token: token.into(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Appends percent-encoded `segments` to the base url.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, TransportError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| TransportError::Network(format!("cannot extend {}", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

#[async_trait]
impl MessageTransport for ResponderApiClient {
    async fn list_messages(
        &self,
        conversation_id: &str,
    ) -> Result<ApiResponse<Vec<RawMessage>>, TransportError> {
        let url = self.endpoint(&["tasks", conversation_id, "messages"])?;
        debug!(target: "responder_api", %url, "listing messages");
        let res = self
            .http
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(network)?;
        envelope(res).await
    }

    async fn send(&self, request: SendRequest) -> Result<ApiResponse<RawMessage>, TransportError> {
        let url = self.endpoint(&["tasks", &request.conversation_id, "messages"])?;
        debug!(
            target: "responder_api",
            %url,
            attachments = request.file_urls.len(),
            "posting message"
        );
        let body = PostMessageBody {
            message: &request.text,
            file_urls: &request.file_urls,
            sender_type: &request.sender_marker,
        };
        let res = self
            .http
            .post(url)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .map_err(network)?;
        envelope(res).await
    }

    async fn delete(&self, message_id: &str) -> Result<ApiResponse<()>, TransportError> {
        let url = self.endpoint(&["messages", message_id])?;
        debug!(target: "responder_api", %url, "deleting message");
        let res = self
            .http
            .delete(url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(network)?;
        let response: ApiResponse<IgnoredAny> = envelope(res).await?;
        Ok(response.map(|_| ()))
    }
}

fn network(err: reqwest::Error) -> TransportError {
    TransportError::Network(err.to_string())
}

/// Decodes the response envelope. A non-2xx status still counts as an
/// application answer when its body is a refusal envelope.
async fn envelope<T>(res: Response) -> Result<ApiResponse<T>, TransportError>
where
    T: DeserializeOwned,
{
    let status = res.status();
    let body = res.text().await.map_err(network)?;

    if status.is_success() {
        return serde_json::from_str(&body).map_err(|err| TransportError::Decode(err.to_string()));
    }

    match serde_json::from_str::<ApiResponse<IgnoredAny>>(&body) {
        Ok(refusal) if !refusal.success => {
            debug!(target: "responder_api", status = status.as_u16(), "request refused");
            Ok(ApiResponse {
                success: false,
                data: None,
                message: refusal.message,
            })
        }
        _ => {
            warn!(target: "responder_api", status = status.as_u16(), "unexpected status");
            Err(TransportError::UnexpectedStatus {
                status: status.as_u16(),
                body,
            })
        }
    }
}
