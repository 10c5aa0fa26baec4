use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Identifier of a message in a conversation.
///
/// Server ids come back from the transport. Temporary ids are minted locally
/// for sends that have not been confirmed yet and never reach the server.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageId {
    Server(String),
    Temp(String),
}

impl MessageId {
    pub fn server(id: impl Into<String>) -> Self {
        MessageId::Server(id.into())
    }

    pub fn as_str(&self) -> &str {
        match self {
            MessageId::Server(id) | MessageId::Temp(id) => id,
        }
    }

    pub fn is_temp(&self) -> bool {
        matches!(self, MessageId::Temp(_))
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which side of the two-party conversation authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sender {
    /// The logged-in responder.
    Own,
    /// The task's client.
    Other,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: MessageId,
    pub text: String,
    pub sender: Sender,
    pub timestamp: DateTime<Utc>,
    pub is_read: bool,
    pub file_urls: Vec<String>,
}

impl Message {
    /// Maps a wire record. `self_marker` is the `sender_type` value that
    /// identifies the local side; fetched records count as already read.
    pub fn from_raw(raw: RawMessage, self_marker: &str) -> Self {
        let sender = if raw.sender_type == self_marker {
            Sender::Own
        } else {
            Sender::Other
        };
        Self {
            id: MessageId::Server(raw.id),
            text: raw.message.unwrap_or_default(),
            sender,
            timestamp: raw.created_at,
            is_read: true,
            file_urls: raw.file_urls.unwrap_or_default(),
        }
    }
}

/// Maps a fetched batch and orders it oldest first. The sort is stable, so
/// records sharing a timestamp keep the order the transport returned.
pub fn map_batch(raw: Vec<RawMessage>, self_marker: &str) -> Vec<Message> {
    let mut messages: Vec<Message> = raw
        .into_iter()
        .map(|record| Message::from_raw(record, self_marker))
        .collect();
    messages.sort_by_key(|m| m.timestamp);
    messages
}

/// A message record as the REST API returns it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawMessage {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default, alias = "text", alias = "content")]
    pub message: Option<String>,
    pub sender_type: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub file_urls: Option<Vec<String>>,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum WireId {
        Text(String),
        Unsigned(u64),
        Signed(i64),
    }

    Ok(match WireId::deserialize(deserializer)? {
        WireId::Text(id) => id,
        WireId::Unsigned(id) => id.to_string(),
        WireId::Signed(id) => id.to_string(),
    })
}

/// A file that has already been uploaded and is referenced by URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub url: String,
}

impl Attachment {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

/// Mints temporary ids of the form `<prefix><unix-millis>-<n>`.
#[derive(Debug)]
pub struct TempIdGenerator {
    prefix: String,
    counter: AtomicU64,
}

impl TempIdGenerator {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            counter: AtomicU64::new(0),
        }
    }

    pub fn next(&self, now: DateTime<Utc>) -> MessageId {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        MessageId::Temp(format!("{}{}-{}", self.prefix, now.timestamp_millis(), n))
    }
}
