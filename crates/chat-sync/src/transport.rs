use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use crate::model::RawMessage;

/// Response envelope shared by every message endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(default)]
    pub data: Option<T>,
    #[serde(default)]
    pub message: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message.into()),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ApiResponse<U> {
        ApiResponse {
            success: self.success,
            data: self.data.map(f),
            message: self.message,
        }
    }
}

/// Payload for [`MessageTransport::send`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendRequest {
    pub conversation_id: String,
    pub text: String,
    pub file_urls: Vec<String>,
    pub sender_marker: String,
}

/// A call that never produced an application-level answer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("network error: {0}")]
    Network(String),
    #[error("unexpected status: {status} body={body}")]
    UnexpectedStatus { status: u16, body: String },
    #[error("failed to decode response: {0}")]
    Decode(String),
}

/// Message storage the engine talks to. `Err` is a network-level failure;
/// `Ok` with `success == false` is the server refusing the request.
#[async_trait]
pub trait MessageTransport: Send + Sync {
    async fn list_messages(
        &self,
        conversation_id: &str,
    ) -> Result<ApiResponse<Vec<RawMessage>>, TransportError>;

    async fn send(&self, request: SendRequest) -> Result<ApiResponse<RawMessage>, TransportError>;

    async fn delete(&self, message_id: &str) -> Result<ApiResponse<()>, TransportError>;
}

/// Scripted outcome for an [`InMemoryTransport`] operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Failure {
    Network(String),
    Rejected(Option<String>),
}

#[derive(Default)]
struct Faults {
    list: Option<Failure>,
    send: Option<Failure>,
    delete: Option<Failure>,
}

#[derive(Default)]
struct Gates {
    list: Option<Arc<Notify>>,
    send: Option<Arc<Notify>>,
    delete: Option<Arc<Notify>>,
}

/// In-memory transport for tests and early wiring.
///
/// Conversations are plain vectors that tests can rewrite between calls.
/// Failures can be scripted per operation, and calls can be held at a gate
/// until the test releases them.
#[derive(Default)]
pub struct InMemoryTransport {
    conversations: Mutex<HashMap<String, Vec<RawMessage>>>,
    faults: Mutex<Faults>,
    gates: Mutex<Gates>,
    next_id: AtomicUsize,
    list_calls: AtomicUsize,
    send_calls: AtomicUsize,
    delete_calls: AtomicUsize,
}

impl InMemoryTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Replaces what `list_messages` returns for `conversation_id`.
    pub fn set_messages(&self, conversation_id: &str, messages: Vec<RawMessage>) {
        self.conversations
            .lock()
            .insert(conversation_id.to_string(), messages);
    }

    /// Adds a message as if the other party had posted it.
    pub fn push_message(&self, conversation_id: &str, message: RawMessage) {
        self.conversations
            .lock()
            .entry(conversation_id.to_string())
            .or_default()
            .push(message);
    }

    pub fn messages(&self, conversation_id: &str) -> Vec<RawMessage> {
        self.conversations
            .lock()
            .get(conversation_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn fail_list(&self, failure: Option<Failure>) {
        self.faults.lock().list = failure;
    }

    pub fn fail_send(&self, failure: Option<Failure>) {
        self.faults.lock().send = failure;
    }

    pub fn fail_delete(&self, failure: Option<Failure>) {
        self.faults.lock().delete = failure;
    }

    /// Holds every later `list_messages` call until the returned handle is
    /// notified once per held call.
    pub fn gate_lists(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.gates.lock().list = Some(gate.clone());
        gate
    }

    /// Holds every later `send` call until the returned handle is notified.
    pub fn gate_sends(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.gates.lock().send = Some(gate.clone());
        gate
    }

    /// Holds every later `delete` call until the returned handle is notified.
    pub fn gate_deletes(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.gates.lock().delete = Some(gate.clone());
        gate
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn send_calls(&self) -> usize {
        self.send_calls.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }
}

fn scripted<T>(failure: Option<Failure>) -> Option<Result<ApiResponse<T>, TransportError>> {
    failure.map(|failure| match failure {
        Failure::Network(reason) => Err(TransportError::Network(reason)),
        Failure::Rejected(message) => Ok(ApiResponse {
            success: false,
            data: None,
            message,
        }),
    })
}

#[async_trait]
impl MessageTransport for InMemoryTransport {
    async fn list_messages(
        &self,
        conversation_id: &str,
    ) -> Result<ApiResponse<Vec<RawMessage>>, TransportError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.gates.lock().list.clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let fault = self.faults.lock().list.clone();
        if let Some(outcome) = scripted(fault) {
            return outcome;
        }
        Ok(ApiResponse::ok(self.messages(conversation_id)))
    }

    async fn send(&self, request: SendRequest) -> Result<ApiResponse<RawMessage>, TransportError> {
        self.send_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.gates.lock().send.clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let fault = self.faults.lock().send.clone();
        if let Some(outcome) = scripted(fault) {
            return outcome;
        }
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let record = RawMessage {
            id: format!("srv{n}"),
            message: Some(request.text),
            sender_type: request.sender_marker,
            created_at: Utc::now(),
            file_urls: Some(request.file_urls),
        };
        self.push_message(&request.conversation_id, record.clone());
        Ok(ApiResponse::ok(record))
    }

    async fn delete(&self, message_id: &str) -> Result<ApiResponse<()>, TransportError> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.gates.lock().delete.clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let fault = self.faults.lock().delete.clone();
        if let Some(outcome) = scripted(fault) {
            return outcome;
        }
        let mut conversations = self.conversations.lock();
        for messages in conversations.values_mut() {
            if let Some(index) = messages.iter().position(|m| m.id == message_id) {
                messages.remove(index);
                return Ok(ApiResponse::ok(()));
            }
        }
        Ok(ApiResponse::failure("message not found"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_assigns_sequential_ids_and_stores_message() {
        let transport = InMemoryTransport::new();
        let request = SendRequest {
            conversation_id: "t1".into(),
            text: "hello".into(),
            file_urls: Vec::new(),
            sender_marker: "responder".into(),
        };
        let first = transport.send(request.clone()).await.unwrap();
        let second = transport.send(request).await.unwrap();
        assert_eq!(first.data.unwrap().id, "srv1");
        assert_eq!(second.data.unwrap().id, "srv2");
        assert_eq!(transport.messages("t1").len(), 2);
        assert_eq!(transport.send_calls(), 2);
    }

    #[tokio::test]
    async fn scripted_failures_surface_per_operation() {
        let transport = InMemoryTransport::new();
        transport.fail_list(Some(Failure::Network("offline".into())));
        transport.fail_delete(Some(Failure::Rejected(Some("nope".into()))));

        let listed = transport.list_messages("t1").await;
        assert_eq!(listed, Err(TransportError::Network("offline".into())));

        let deleted = transport.delete("x").await.unwrap();
        assert!(!deleted.success);
        assert_eq!(deleted.message.as_deref(), Some("nope"));
    }

    #[tokio::test]
    async fn delete_of_unknown_id_is_rejected() {
        let transport = InMemoryTransport::new();
        let response = transport.delete("missing").await.unwrap();
        assert!(!response.success);
    }
}
