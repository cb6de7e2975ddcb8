use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use roomkeeper_common::{ConversationError, Dispatcher};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::filter::MessageFilter;
use super::message::{ActionMessage, MessageEvent, Scene, TypingEvent};
use crate::audio::OutboundAudioStream;
use crate::participant::PresenceRecord;

pub const DEFAULT_HISTORY_LIMIT: usize = 50;

const AUDIO_STREAM_BUFFER: usize = 16;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Application state of one room, fed by its session.
pub struct ConversationState {
    key: String,
    history_limit: usize,
    messages: Mutex<VecDeque<ActionMessage>>,
    participants: RwLock<HashMap<String, PresenceRecord>>,
    remote_typing: Mutex<HashMap<String, bool>>,
    scene: Mutex<Option<Scene>>,
    typing: Arc<TypingCounter>,
    audio_streams: mpsc::Sender<OutboundAudioStream>,
    updated: Dispatcher<()>,
    local_messages: Dispatcher<MessageEvent>,
    remote_messages: Dispatcher<MessageEvent>,
    typing_events: Dispatcher<TypingEvent>,
}

impl std::fmt::Debug for ConversationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationState")
            .field("key", &self.key)
            .field("messages", &self.message_count())
            .field("typing", &self.typing.count.load(Ordering::SeqCst))
            .finish()
    }
}

impl ConversationState {
    /// Returns the state and the receiving end of its outbound audio
    /// streams, which the owning session drains onto the transport.
    pub fn new(
        key: impl Into<String>,
        history_limit: usize,
    ) -> (Self, mpsc::Receiver<OutboundAudioStream>) {
        let (audio_tx, audio_rx) = mpsc::channel(AUDIO_STREAM_BUFFER);
        let state = Self {
            key: key.into(),
            history_limit: history_limit.max(1),
            messages: Mutex::new(VecDeque::new()),
            participants: RwLock::new(HashMap::new()),
            remote_typing: Mutex::new(HashMap::new()),
            scene: Mutex::new(None),
            typing: Arc::new(TypingCounter::default()),
            audio_streams: audio_tx,
            updated: Dispatcher::new("updated"),
            local_messages: Dispatcher::new("localmessage"),
            remote_messages: Dispatcher::new("remotemessage"),
            typing_events: Dispatcher::new("typing"),
        };
        (state, audio_rx)
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn history_limit(&self) -> usize {
        self.history_limit
    }

    pub fn updated(&self) -> &Dispatcher<()> {
        &self.updated
    }

    /// Messages that arrived from the room.
    pub fn local_messages(&self) -> &Dispatcher<MessageEvent> {
        &self.local_messages
    }

    /// Messages this participant is sending to the room.
    pub fn remote_messages(&self) -> &Dispatcher<MessageEvent> {
        &self.remote_messages
    }

    pub fn typing_events(&self) -> &Dispatcher<TypingEvent> {
        &self.typing_events
    }

    // -- history --

    fn push_message(&self, message: ActionMessage) {
        let mut messages = lock(&self.messages);
        messages.push_back(message);
        while messages.len() > self.history_limit {
            messages.pop_front();
        }
    }

    pub fn message_count(&self) -> usize {
        lock(&self.messages).len()
    }

    /// A message that arrived from the room. Hidden messages are dispatched
    /// but kept out of history.
    pub async fn add_local_message(&self, message: ActionMessage) {
        if let Some(typing) = message.typing_flag() {
            lock(&self.remote_typing).insert(message.user_id.clone(), typing);
        }

        let visible = !message.hidden;
        if visible {
            self.push_message(message.clone());
        }

        let sender = self.participant(&message.user_id);
        if sender.is_none() {
            debug!(room = %self.key, user_id = %message.user_id, "Message from unknown participant");
        }
        let event = MessageEvent { sender, message };

        if visible {
            tokio::join!(self.updated.emit(()), self.local_messages.emit(event));
        } else {
            self.local_messages.emit(event).await;
        }
    }

    /// A message this participant sends. Resolves once the session has
    /// forwarded it and update listeners have settled.
    pub async fn add_local_and_remote_message(&self, message: ActionMessage) {
        if !message.hidden {
            self.push_message(message.clone());
        }
        let event = MessageEvent {
            sender: None,
            message,
        };
        tokio::join!(self.remote_messages.emit(event), self.updated.emit(()));
    }

    pub fn get_cached_messages(
        &self,
        filter: &MessageFilter,
    ) -> Result<Vec<ActionMessage>, ConversationError> {
        filter.apply(lock(&self.messages).iter())
    }

    /// Hand an outbound audio stream to the session for transmission.
    pub async fn add_audio_stream(&self, stream: OutboundAudioStream) {
        let id = stream.id.clone();
        if self.audio_streams.send(stream).await.is_err() {
            warn!(room = %self.key, stream_id = %id, "Dropping audio stream, session is closed");
        }
    }

    // -- typing --

    /// Run `f` while showing this participant as typing. Overlapping calls
    /// produce a single start and a single end.
    pub async fn typing<F, Fut, T>(&self, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let mut guard = TypingGuard {
            counter: &self.typing,
            events: &self.typing_events,
            armed: false,
        };
        {
            let _turn = self.typing.gate.lock().await;
            guard.armed = true;
            if self.typing.count.fetch_add(1, Ordering::SeqCst) == 0 {
                self.typing_events.emit(TypingEvent::Start).await;
            }
        }

        let out = f().await;

        {
            let _turn = self.typing.gate.lock().await;
            guard.armed = false;
            if self.typing.count.fetch_sub(1, Ordering::SeqCst) == 1 {
                self.typing_events.emit(TypingEvent::End).await;
            }
        }
        out
    }

    pub fn is_typing(&self) -> bool {
        self.typing.count.load(Ordering::SeqCst) > 0
    }

    /// Remote participants currently typing.
    pub fn typing_participants(&self) -> Vec<String> {
        let mut ids: Vec<String> = lock(&self.remote_typing)
            .iter()
            .filter(|(_, typing)| **typing)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    // -- participants --

    pub fn participant(&self, participant_id: &str) -> Option<PresenceRecord> {
        self.participants
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(participant_id)
            .cloned()
    }

    pub fn participants(&self) -> Vec<PresenceRecord> {
        let mut records: Vec<PresenceRecord> = self
            .participants
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .cloned()
            .collect();
        records.sort_by(|a, b| a.participant_id.cmp(&b.participant_id));
        records
    }

    pub(crate) fn upsert_participant(&self, record: PresenceRecord) {
        self.participants
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(record.participant_id.clone(), record);
    }

    pub(crate) fn remove_participant(&self, participant_id: &str) -> Option<PresenceRecord> {
        lock(&self.remote_typing).remove(participant_id);
        self.participants
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(participant_id)
    }

    // -- scene --

    pub fn scene(&self) -> Option<Scene> {
        lock(&self.scene).clone()
    }

    pub fn set_scene(&self, scene: Option<Scene>) {
        *lock(&self.scene) = scene;
    }

    /// History and participants flattened into one string for embedding.
    pub fn embedding_string(&self) -> String {
        let mut lines: Vec<String> = lock(&self.messages)
            .iter()
            .map(ActionMessage::summary_line)
            .collect();
        let participants =
            serde_json::to_string(&self.participants()).unwrap_or_else(|_| "[]".into());
        lines.push(participants);
        lines.join("\n")
    }
}

/// Local typing depth. `count` only changes while `gate` is held, and the
/// start/end edge is emitted before `gate` is released.
#[derive(Default)]
struct TypingCounter {
    count: AtomicUsize,
    gate: tokio::sync::Mutex<()>,
}

/// Balances the typing counter when a `typing` future is dropped or panics
/// before its body finishes.
struct TypingGuard<'a> {
    counter: &'a Arc<TypingCounter>,
    events: &'a Dispatcher<TypingEvent>,
    armed: bool,
}

impl Drop for TypingGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            self.counter.count.fetch_sub(1, Ordering::SeqCst);
            return;
        };
        let counter = Arc::clone(self.counter);
        let events = self.events.clone();
        handle.spawn(async move {
            let _turn = counter.gate.lock().await;
            if counter.count.fetch_sub(1, Ordering::SeqCst) == 1 {
                events.emit(TypingEvent::End).await;
            }
        });
    }
}
