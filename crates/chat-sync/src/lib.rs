//! Message synchronization for a responder's task conversation.
//!
//! [`ChatSyncEngine`] owns the message list for one conversation:
//! - loads it in full when a conversation is bound
//! - polls for new messages while the view is in the foreground
//! - applies sends and deletes optimistically, rolling back on failure
//!
//! The engine reaches the outside world only through three seams:
//! [`MessageTransport`], [`ActivitySignal`] and [`CurrentUserProvider`].

pub mod activity;
pub mod config;
pub mod conversation;
pub mod engine;
pub mod error;
pub mod model;
pub mod optimistic;
pub mod transport;
pub mod user;

pub use activity::{ActivitySignal, AlwaysForeground, ManualActivity};
pub use config::SyncConfig;
pub use conversation::Conversation;
pub use engine::{ChatEvent, ChatSnapshot, ChatSyncEngine, Phase, Polling};
pub use error::ChatSyncError;
pub use model::{Attachment, Message, MessageId, RawMessage, Sender};
pub use transport::{ApiResponse, InMemoryTransport, MessageTransport, SendRequest, TransportError};
pub use user::{CurrentUserProvider, StaticUserProvider, User};
