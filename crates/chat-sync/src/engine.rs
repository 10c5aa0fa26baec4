use std::collections::HashSet;
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use crate::activity::ActivitySignal;
use crate::config::SyncConfig;
use crate::conversation::Conversation;
use crate::error::{ChatSyncError, DELETE_FAILED, LOAD_FAILED, SEND_FAILED};
use crate::model::{map_batch, Attachment, Message, MessageId, Sender, TempIdGenerator};
use crate::optimistic::{Optimistic, Reconciled};
use crate::transport::{ApiResponse, MessageTransport, SendRequest, TransportError};
use crate::user::CurrentUserProvider;

const EVENT_CAPACITY: usize = 256;

/// Where the engine is in its per-conversation lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    InitialLoading,
    Ready(Polling),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polling {
    Active,
    Paused,
}

/// Change notifications for whoever renders the conversation.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    PhaseChanged(Phase),
    /// The initial load replaced the whole sequence.
    Replaced(Vec<Message>),
    Appended(Vec<Message>),
    /// A pending send was confirmed and now carries its server id.
    Confirmed { temp_id: MessageId, message: Message },
    Removed(MessageId),
    /// A failed delete put the previous sequence back.
    Restored(Vec<Message>),
    Error(String),
}

/// Point-in-time copy of everything a view needs.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatSnapshot {
    pub conversation_id: Option<String>,
    pub phase: Phase,
    pub messages: Vec<Message>,
    pub is_loading: bool,
    pub is_sending: bool,
    pub is_polling: bool,
    pub draft: String,
    pub last_error: Option<String>,
    pub high_water_mark: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Stage {
    #[default]
    Idle,
    InitialLoading,
    Ready,
}

#[derive(Default)]
struct State {
    conversation_id: Option<String>,
    /// Bumped on every bind/unbind; responses tagged with an older value are dropped.
    generation: u64,
    stage: Stage,
    conversation: Conversation,
    /// Ids deleted, or being deleted, in this binding. Fetches skip them so a
    /// response the server built before the delete cannot bring them back.
    tombstones: HashSet<MessageId>,
    /// Set once the post-load delay has passed; until then foregrounding
    /// does not start the poller.
    start_delay_elapsed: bool,
    draft: String,
    is_loading: bool,
    is_sending: bool,
    last_error: Option<String>,
    poller: Option<JoinHandle<()>>,
    delayed_start: Option<JoinHandle<()>>,
    watcher: Option<JoinHandle<()>>,
}

impl State {
    fn is_polling(&self) -> bool {
        self.poller.as_ref().is_some_and(|h| !h.is_finished())
    }

    fn phase(&self) -> Phase {
        match self.stage {
            Stage::Idle => Phase::Idle,
            Stage::InitialLoading => Phase::InitialLoading,
            Stage::Ready if self.is_polling() => Phase::Ready(Polling::Active),
            Stage::Ready => Phase::Ready(Polling::Paused),
        }
    }

    /// Forgets everything tied to the current binding and invalidates
    /// in-flight responses.
    fn reset(&mut self, conversation_id: Option<String>) {
        self.cancel_tasks();
        self.generation += 1;
        self.conversation.clear();
        self.tombstones.clear();
        self.start_delay_elapsed = false;
        self.draft.clear();
        self.is_loading = false;
        self.is_sending = false;
        self.stage = if conversation_id.is_some() {
            Stage::InitialLoading
        } else {
            Stage::Idle
        };
        self.conversation_id = conversation_id;
    }

    fn without_tombstones(&self, batch: Vec<Message>) -> Vec<Message> {
        if self.tombstones.is_empty() {
            return batch;
        }
        batch
            .into_iter()
            .filter(|m| !self.tombstones.contains(&m.id))
            .collect()
    }

    fn cancel_tasks(&mut self) {
        for handle in [
            self.poller.take(),
            self.delayed_start.take(),
            self.watcher.take(),
        ]
        .into_iter()
        .flatten()
        {
            handle.abort();
        }
    }
}

struct Shared {
    transport: Arc<dyn MessageTransport>,
    activity: Arc<dyn ActivitySignal>,
    users: Arc<dyn CurrentUserProvider>,
    config: SyncConfig,
    temp_ids: TempIdGenerator,
    events: broadcast::Sender<ChatEvent>,
    state: Mutex<State>,
}

/// Keeps one task conversation loaded, deduplicated and fresh.
///
/// The engine loads the full list on [`bind`](Self::bind), then polls the
/// transport on a fixed interval while the [`ActivitySignal`] reads
/// foreground. Sends and deletes are applied locally first and rolled back
/// if the transport refuses them.
///
/// Background work runs on the ambient Tokio runtime; `bind` and
/// `start_polling` must be called from within one. Dropping the engine
/// cancels all of it.
pub struct ChatSyncEngine {
    shared: Arc<Shared>,
}

impl ChatSyncEngine {
    pub fn new(
        transport: Arc<dyn MessageTransport>,
        activity: Arc<dyn ActivitySignal>,
        users: Arc<dyn CurrentUserProvider>,
        config: SyncConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let temp_ids = TempIdGenerator::new(config.temp_id_prefix.clone());
        Self {
            shared: Arc::new(Shared {
                transport,
                activity,
                users,
                config,
                temp_ids,
                events,
                state: Mutex::new(State::default()),
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.shared.events.subscribe()
    }

    pub fn snapshot(&self) -> ChatSnapshot {
        let state = self.shared.state.lock();
        ChatSnapshot {
            conversation_id: state.conversation_id.clone(),
            phase: state.phase(),
            messages: state.conversation.snapshot(),
            is_loading: state.is_loading,
            is_sending: state.is_sending,
            is_polling: state.is_polling(),
            draft: state.draft.clone(),
            last_error: state.last_error.clone(),
            high_water_mark: state.conversation.high_water_mark(),
        }
    }

    pub fn messages(&self) -> Vec<Message> {
        self.shared.state.lock().conversation.snapshot()
    }

    pub fn conversation_id(&self) -> Option<String> {
        self.shared.state.lock().conversation_id.clone()
    }

    pub fn phase(&self) -> Phase {
        self.shared.state.lock().phase()
    }

    pub fn is_loading(&self) -> bool {
        self.shared.state.lock().is_loading
    }

    pub fn is_sending(&self) -> bool {
        self.shared.state.lock().is_sending
    }

    pub fn is_polling(&self) -> bool {
        self.shared.state.lock().is_polling()
    }

    pub fn unread_count(&self) -> usize {
        self.shared.state.lock().conversation.unread_count()
    }

    pub fn last_error(&self) -> Option<String> {
        self.shared.state.lock().last_error.clone()
    }

    pub fn draft(&self) -> String {
        self.shared.state.lock().draft.clone()
    }

    pub fn set_draft(&self, draft: impl Into<String>) {
        self.shared.state.lock().draft = draft.into();
    }

    /// Binds the engine to `conversation_id`, or to nothing for `None` or a
    /// blank id.
    ///
    /// Whatever was running for the previous conversation is cancelled
    /// before the new initial load starts. The load error, if any, is
    /// returned after it has been reported; the engine still ends up
    /// `Ready` and polling recovers on its own.
    pub async fn bind(&self, conversation_id: Option<&str>) -> Result<(), ChatSyncError> {
        let shared = &self.shared;
        let id = conversation_id
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string);

        let generation = {
            let mut state = shared.state.lock();
            state.reset(id.clone());
            state.last_error = None;
            shared.emit(ChatEvent::PhaseChanged(state.phase()));
            state.generation
        };

        let Some(id) = id else {
            debug!(target: "chat_sync::engine", "engine unbound");
            return Ok(());
        };
        info!(target: "chat_sync::engine", conversation = %id, "binding conversation");

        let loaded = shared.load(generation, id).await;
        if matches!(loaded, Err(ChatSyncError::Superseded)) {
            return loaded;
        }

        {
            let mut state = shared.state.lock();
            if state.generation != generation {
                return Err(ChatSyncError::Superseded);
            }
            state.stage = Stage::Ready;
            shared.emit(ChatEvent::PhaseChanged(state.phase()));
        }

        shared.watch_activity(generation);
        shared.schedule_polling(generation);
        loaded
    }

    /// Drops the conversation and returns to `Idle`.
    pub fn unbind(&self) {
        let mut state = self.shared.state.lock();
        state.reset(None);
        self.shared.emit(ChatEvent::PhaseChanged(state.phase()));
        debug!(target: "chat_sync::engine", "engine unbound");
    }

    /// Reloads the whole conversation, replacing the local sequence.
    pub async fn fetch_all(&self) -> Result<(), ChatSyncError> {
        let (generation, id) = self.shared.current()?;
        self.shared.load(generation, id).await
    }

    /// Fetches once and appends unseen messages. Returns how many were
    /// appended. Failures are logged, never reported to the user.
    pub async fn poll_once(&self) -> Result<usize, ChatSyncError> {
        let (generation, _) = self.shared.current()?;
        self.shared.poll(generation).await
    }

    /// User-triggered poll.
    pub async fn refresh(&self) -> Result<usize, ChatSyncError> {
        debug!(target: "chat_sync::engine", "manual refresh");
        self.poll_once().await
    }

    /// Starts the polling loop. No-op while a loop is already running, while
    /// nothing is bound, or while the view is in the background.
    pub fn start_polling(&self) {
        self.shared.start_polling();
    }

    /// Cancels the polling loop if there is one.
    pub fn stop_polling(&self) {
        self.shared.stop_polling();
    }

    /// Sends `text` plus already-uploaded `attachments`.
    ///
    /// The message shows up at the end of the sequence under a temporary id
    /// before the transport is called and the draft is cleared. On success
    /// it is swapped for the confirmed message at the same index; on failure
    /// it is removed and the draft gets `text` back.
    pub async fn send_message(
        &self,
        text: &str,
        attachments: &[Attachment],
    ) -> Result<Message, ChatSyncError> {
        let shared = &self.shared;
        let trimmed = text.trim();

        let (generation, request, placeholder, change) = {
            let mut state = shared.state.lock();
            if trimmed.is_empty() && attachments.is_empty() {
                return Err(ChatSyncError::EmptyMessage);
            }
            if state.is_sending {
                return Err(ChatSyncError::SendInFlight);
            }
            let conversation_id = state
                .conversation_id
                .clone()
                .ok_or(ChatSyncError::NotBound)?;
            let user = shared
                .users
                .current_user()
                .ok_or(ChatSyncError::NoCurrentUser)?;

            let now = Utc::now();
            let file_urls: Vec<String> = attachments.iter().map(|a| a.url.clone()).collect();
            let placeholder = Message {
                id: shared.temp_ids.next(now),
                text: trimmed.to_string(),
                sender: Sender::Own,
                timestamp: now,
                is_read: false,
                file_urls: file_urls.clone(),
            };
            let change = Optimistic::insert(&mut state.conversation, placeholder.clone());
            state.is_sending = true;
            state.draft.clear();
            shared.emit(ChatEvent::Appended(vec![placeholder.clone()]));
            debug!(
                target: "chat_sync::engine",
                conversation = %conversation_id,
                user = %user.id,
                temp_id = %placeholder.id,
                attachments = file_urls.len(),
                "sending message"
            );

            let request = SendRequest {
                conversation_id,
                text: trimmed.to_string(),
                file_urls,
                sender_marker: shared.config.self_marker.clone(),
            };
            (state.generation, request, placeholder, change)
        };

        let outcome = accept(shared.transport.send(request).await);

        let mut state = shared.state.lock();
        if state.generation != generation {
            debug!(target: "chat_sync::engine", temp_id = %placeholder.id, "dropping send result for a previous conversation");
            return Err(ChatSyncError::Superseded);
        }
        state.is_sending = false;

        match outcome {
            Ok(raw) => {
                let confirmed = Message {
                    id: MessageId::Server(raw.id),
                    timestamp: raw.created_at,
                    is_read: true,
                    ..placeholder.clone()
                };
                match change.commit(&mut state.conversation, Some(confirmed.clone())) {
                    Reconciled::InPlace(_) => shared.emit(ChatEvent::Confirmed {
                        temp_id: placeholder.id.clone(),
                        message: confirmed.clone(),
                    }),
                    Reconciled::AlreadyPresent => {
                        shared.emit(ChatEvent::Removed(placeholder.id.clone()))
                    }
                    Reconciled::Missing | Reconciled::Unchanged => {
                        if state.conversation.push(confirmed.clone()) {
                            shared.emit(ChatEvent::Appended(vec![confirmed.clone()]));
                        }
                    }
                }
                info!(
                    target: "chat_sync::engine",
                    temp_id = %placeholder.id,
                    message_id = %confirmed.id,
                    "message confirmed"
                );
                Ok(confirmed)
            }
            Err(err) => {
                change.rollback(&mut state.conversation);
                shared.emit(ChatEvent::Removed(placeholder.id.clone()));
                state.draft = text.to_string();
                shared.report(&mut state, &err, SEND_FAILED);
                Err(err)
            }
        }
    }

    /// Deletes a confirmed message. It disappears locally right away; if the
    /// transport refuses, it goes back where it was. Polls that land while
    /// the delete is pending, or after it succeeded, do not re-add it.
    pub async fn delete_message(&self, id: &MessageId) -> Result<(), ChatSyncError> {
        let shared = &self.shared;
        if id.is_temp() {
            return Err(ChatSyncError::PendingMessage(id.clone()));
        }

        let (generation, change) = {
            let mut state = shared.state.lock();
            if state.conversation_id.is_none() {
                return Err(ChatSyncError::NotBound);
            }
            if !state.conversation.contains(id) {
                return Err(ChatSyncError::UnknownMessage(id.clone()));
            }
            state.tombstones.insert(id.clone());
            let change = Optimistic::remove(&mut state.conversation, id);
            shared.emit(ChatEvent::Removed(id.clone()));
            (state.generation, change)
        };

        let outcome = acknowledge(shared.transport.delete(id.as_str()).await);

        let mut state = shared.state.lock();
        if state.generation != generation {
            return outcome;
        }
        match outcome {
            Ok(()) => {
                let _ = change.commit(&mut state.conversation, None);
                info!(target: "chat_sync::engine", message_id = %id, "message deleted");
                Ok(())
            }
            Err(err) => {
                state.tombstones.remove(id);
                change.rollback(&mut state.conversation);
                shared.emit(ChatEvent::Restored(state.conversation.snapshot()));
                shared.report(&mut state, &err, DELETE_FAILED);
                Err(err)
            }
        }
    }
}

impl Drop for ChatSyncEngine {
    fn drop(&mut self) {
        self.shared.state.lock().cancel_tasks();
    }
}

impl Shared {
    fn emit(&self, event: ChatEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn report(&self, state: &mut State, err: &ChatSyncError, fallback: &str) {
        let text = err.user_message(fallback);
        warn!(target: "chat_sync::engine", error = %err, "{fallback}");
        state.last_error = Some(text.clone());
        self.emit(ChatEvent::Error(text));
    }

    fn current(&self) -> Result<(u64, String), ChatSyncError> {
        let state = self.state.lock();
        let id = state
            .conversation_id
            .clone()
            .ok_or(ChatSyncError::NotBound)?;
        Ok((state.generation, id))
    }

    fn is_current(&self, generation: u64) -> bool {
        let state = self.state.lock();
        state.generation == generation && state.conversation_id.is_some()
    }

    async fn load(&self, generation: u64, conversation_id: String) -> Result<(), ChatSyncError> {
        {
            let mut state = self.state.lock();
            if state.generation != generation {
                return Err(ChatSyncError::Superseded);
            }
            state.is_loading = true;
        }

        let outcome = accept(self.transport.list_messages(&conversation_id).await);

        let mut state = self.state.lock();
        if state.generation != generation {
            debug!(target: "chat_sync::engine", conversation = %conversation_id, "dropping stale initial load");
            return Err(ChatSyncError::Superseded);
        }
        state.is_loading = false;
        match outcome {
            Ok(raw) => {
                let batch = state.without_tombstones(map_batch(raw, &self.config.self_marker));
                state.conversation.replace_all(batch);
                state.last_error = None;
                info!(
                    target: "chat_sync::engine",
                    conversation = %conversation_id,
                    messages = state.conversation.len(),
                    "conversation loaded"
                );
                self.emit(ChatEvent::Replaced(state.conversation.snapshot()));
                Ok(())
            }
            Err(err) => {
                state.conversation.clear();
                self.report(&mut state, &err, LOAD_FAILED);
                Err(err)
            }
        }
    }

    async fn poll(&self, generation: u64) -> Result<usize, ChatSyncError> {
        let conversation_id = {
            let state = self.state.lock();
            if state.generation != generation {
                return Err(ChatSyncError::Superseded);
            }
            state
                .conversation_id
                .clone()
                .ok_or(ChatSyncError::NotBound)?
        };

        let outcome = accept(self.transport.list_messages(&conversation_id).await);

        let mut state = self.state.lock();
        if state.generation != generation {
            return Err(ChatSyncError::Superseded);
        }
        match outcome {
            Ok(raw) => {
                let batch = state.without_tombstones(map_batch(raw, &self.config.self_marker));
                let appended = state.conversation.append_new(batch);
                trace!(
                    target: "chat_sync::engine",
                    conversation = %conversation_id,
                    appended = appended.len(),
                    "poll complete"
                );
                let count = appended.len();
                if count > 0 {
                    self.emit(ChatEvent::Appended(appended));
                }
                Ok(count)
            }
            Err(err) => {
                debug!(
                    target: "chat_sync::engine",
                    conversation = %conversation_id,
                    error = %err,
                    "poll failed; retrying on next tick"
                );
                Err(err)
            }
        }
    }

    fn start_polling(self: &Arc<Self>) {
        let mut state = self.state.lock();
        if state.conversation_id.is_none() || state.is_polling() {
            return;
        }
        if !self.activity.is_foreground() {
            trace!(target: "chat_sync::engine", "view in background; not starting poller");
            return;
        }

        let generation = state.generation;
        let period = self.config.poll_interval();
        let weak = Arc::downgrade(self);
        state.poller = Some(tokio::spawn(poll_loop(weak, generation, period)));
        debug!(
            target: "chat_sync::engine",
            interval_ms = period.as_millis() as u64,
            "polling started"
        );
        self.emit(ChatEvent::PhaseChanged(state.phase()));
    }

    fn stop_polling(&self) {
        let mut state = self.state.lock();
        if let Some(handle) = state.poller.take() {
            handle.abort();
            debug!(target: "chat_sync::engine", "polling stopped");
            self.emit(ChatEvent::PhaseChanged(state.phase()));
        }
    }

    fn schedule_polling(self: &Arc<Self>, generation: u64) {
        let weak = Arc::downgrade(self);
        let delay = self.config.poll_start_delay();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(shared) = weak.upgrade() else {
                return;
            };
            if !shared.is_current(generation) {
                return;
            }
            shared.state.lock().start_delay_elapsed = true;
            shared.start_polling();
        });

        let mut state = self.state.lock();
        if state.generation == generation {
            state.delayed_start = Some(handle);
        } else {
            handle.abort();
        }
    }

    fn watch_activity(self: &Arc<Self>, generation: u64) {
        let mut rx = self.activity.subscribe();
        rx.borrow_and_update();
        let weak = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let foreground = *rx.borrow_and_update();
                let Some(shared) = weak.upgrade() else {
                    break;
                };
                if !shared.is_current(generation) {
                    break;
                }
                if foreground {
                    if !shared.state.lock().start_delay_elapsed {
                        trace!(target: "chat_sync::engine", "view foregrounded before start delay; waiting");
                        continue;
                    }
                    debug!(target: "chat_sync::engine", "view foregrounded; resuming polling");
                    shared.start_polling();
                } else {
                    debug!(target: "chat_sync::engine", "view backgrounded; pausing polling");
                    shared.stop_polling();
                }
            }
        });

        let mut state = self.state.lock();
        if state.generation == generation {
            state.watcher = Some(handle);
        } else {
            handle.abort();
        }
    }
}

async fn poll_loop(weak: Weak<Shared>, generation: u64, period: std::time::Duration) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let Some(shared) = weak.upgrade() else {
            break;
        };
        if let Err(ChatSyncError::Superseded | ChatSyncError::NotBound) =
            shared.poll(generation).await
        {
            break;
        }
    }
}

/// Unwraps a data-carrying response. A refusal, or a success with no data,
/// becomes [`ChatSyncError::Rejected`].
fn accept<T>(outcome: Result<ApiResponse<T>, TransportError>) -> Result<T, ChatSyncError> {
    match outcome? {
        ApiResponse {
            success: true,
            data: Some(data),
            ..
        } => Ok(data),
        ApiResponse { message, .. } => Err(ChatSyncError::Rejected { message }),
    }
}

fn acknowledge(outcome: Result<ApiResponse<()>, TransportError>) -> Result<(), ChatSyncError> {
    let response = outcome?;
    if response.success {
        Ok(())
    } else {
        Err(ChatSyncError::Rejected {
            message: response.message,
        })
    }
}
