use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use futures_util::future::{join_all, BoxFuture};
use roomkeeper_common::{Dispatcher, ListenerId, MembershipError, RoomkeeperError};
use tokio::sync::RwLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::options::ManagerOptions;
use crate::audio::{AudioDevices, AudioPipeline, OutboundAudioStream};
use crate::conversation::{ActionMessage, ConversationState, MessageFilter};
use crate::membership::{LoadState, RoomMembershipStore, RoomSpec};
use crate::participant::Participant;
use crate::serializer::KeyedSerializer;
use crate::session::{RoomSession, SessionDisconnect, Transport};

/// Session lifecycle notifications, so the action executor can bind to
/// each room's conversation.
#[derive(Clone)]
pub enum SessionEvent {
    Opened {
        spec: RoomSpec,
        conversation: Arc<ConversationState>,
    },
    Closed {
        spec: RoomSpec,
    },
}

/// Subscriptions held while live, released together by `destroy`.
struct LiveBinding {
    cancel: CancellationToken,
    join_listener: ListenerId,
    leave_listener: ListenerId,
}

struct ManagerInner {
    participant: Participant,
    membership: Arc<RoomMembershipStore>,
    transport: Arc<dyn Transport>,
    devices: AudioDevices,
    options: ManagerOptions,
    serializer: KeyedSerializer<String>,
    sessions: RwLock<HashMap<String, Arc<RoomSession>>>,
    live: Mutex<Option<LiveBinding>>,
    session_events: Dispatcher<SessionEvent>,
}

/// Keeps one live session per declared room.
#[derive(Clone)]
pub struct RoomConnectionManager {
    inner: Arc<ManagerInner>,
}

impl RoomConnectionManager {
    pub fn new(
        participant: Participant,
        membership: Arc<RoomMembershipStore>,
        transport: Arc<dyn Transport>,
        devices: AudioDevices,
        options: ManagerOptions,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                participant,
                membership,
                transport,
                devices,
                options,
                serializer: KeyedSerializer::new(),
                sessions: RwLock::new(HashMap::new()),
                live: Mutex::new(None),
                session_events: Dispatcher::new("session"),
            }),
        }
    }

    pub fn participant(&self) -> &Participant {
        &self.inner.participant
    }

    pub fn membership(&self) -> &Arc<RoomMembershipStore> {
        &self.inner.membership
    }

    pub fn session_events(&self) -> &Dispatcher<SessionEvent> {
        &self.inner.session_events
    }

    // -- lifecycle --

    /// Start reconciling: subscribe to membership changes, then load the
    /// persisted rooms, which opens a session for each.
    pub async fn live(&self) {
        {
            let mut live = self.inner.live_slot();
            if live.is_some() {
                return;
            }

            let weak = Arc::downgrade(&self.inner);
            let join_listener = self.inner.membership.join_events().subscribe(move |spec| {
                let weak = Weak::clone(&weak);
                async move {
                    if let Some(inner) = weak.upgrade() {
                        inner.open_room(spec).await;
                    }
                    Ok(())
                }
            });

            let weak = Arc::downgrade(&self.inner);
            let leave_listener = self.inner.membership.leave_events().subscribe(move |spec| {
                let weak = Weak::clone(&weak);
                async move {
                    if let Some(inner) = weak.upgrade() {
                        inner.close_room(spec).await;
                    }
                    Ok(())
                }
            });

            *live = Some(LiveBinding {
                cancel: CancellationToken::new(),
                join_listener,
                leave_listener,
            });
        }

        info!(participant = %self.inner.participant.id, "Room manager live");
        let membership = &self.inner.membership;
        let loaded_earlier = membership.load_state() != LoadState::Unloaded;
        membership.load().await;

        // Joins emitted before we subscribed have no session yet.
        if loaded_earlier {
            let rooms = membership.rooms().await;
            join_all(rooms.into_iter().map(|spec| self.inner.open_room(spec))).await;
        }
    }

    /// Stop reconciling and close every session. No rejoin fires for the
    /// sessions closed here.
    pub async fn destroy(&self) {
        let Some(binding) = self.inner.live_slot().take() else {
            return;
        };
        let membership = &self.inner.membership;
        membership.join_events().unsubscribe(binding.join_listener);
        membership.leave_events().unsubscribe(binding.leave_listener);
        binding.cancel.cancel();

        let keys: Vec<String> = self.inner.sessions.read().await.keys().cloned().collect();
        join_all(keys.into_iter().map(|key| self.inner.close_key(key))).await;
        info!(participant = %self.inner.participant.id, "Room manager destroyed");
    }

    pub fn is_live(&self) -> bool {
        self.inner.live_token().is_some()
    }

    // -- membership passthrough --

    pub async fn join(&self, spec: RoomSpec) -> Result<(), MembershipError> {
        self.inner.membership.join(spec).await
    }

    pub async fn leave(&self, spec: &RoomSpec) -> Result<(), MembershipError> {
        self.inner.membership.leave(spec).await
    }

    pub async fn leave_all(&self) -> Result<(), MembershipError> {
        self.inner.membership.leave_all().await
    }

    // -- sessions --

    pub async fn session(&self, spec: &RoomSpec) -> Option<Arc<RoomSession>> {
        self.inner.sessions.read().await.get(&spec.key()).cloned()
    }

    pub async fn conversation(&self, spec: &RoomSpec) -> Option<Arc<ConversationState>> {
        self.session(spec)
            .await
            .map(|session| Arc::clone(session.conversation()))
    }

    pub async fn session_count(&self) -> usize {
        self.inner.sessions.read().await.len()
    }

    pub async fn session_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.inner.sessions.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// When the host should next check in, or `None` with no sessions open.
    pub async fn keepalive_deadline(&self) -> Option<Instant> {
        if self.inner.sessions.read().await.is_empty() {
            return None;
        }
        Some(Instant::now() + self.inner.options.keepalive_interval)
    }

    // -- conversation passthrough --

    pub async fn get_cached_messages(
        &self,
        spec: &RoomSpec,
        filter: &MessageFilter,
    ) -> Result<Vec<ActionMessage>, RoomkeeperError> {
        let conversation = self.connected_conversation(spec).await?;
        Ok(conversation.get_cached_messages(filter)?)
    }

    pub async fn add_local_and_remote_message(
        &self,
        spec: &RoomSpec,
        message: ActionMessage,
    ) -> Result<(), RoomkeeperError> {
        let conversation = self.connected_conversation(spec).await?;
        conversation.add_local_and_remote_message(message).await;
        Ok(())
    }

    pub async fn add_audio_stream(
        &self,
        spec: &RoomSpec,
        stream: OutboundAudioStream,
    ) -> Result<(), RoomkeeperError> {
        let conversation = self.connected_conversation(spec).await?;
        conversation.add_audio_stream(stream).await;
        Ok(())
    }

    async fn connected_conversation(
        &self,
        spec: &RoomSpec,
    ) -> Result<Arc<ConversationState>, RoomkeeperError> {
        self.conversation(spec)
            .await
            .ok_or_else(|| MembershipError::NotJoined(spec.key()).into())
    }
}

impl ManagerInner {
    fn live_slot(&self) -> MutexGuard<'_, Option<LiveBinding>> {
        self.live
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// The live token, if live and not yet destroyed.
    fn live_token(&self) -> Option<CancellationToken> {
        self.live_slot()
            .as_ref()
            .map(|binding| binding.cancel.clone())
            .filter(|token| !token.is_cancelled())
    }

    async fn open_room(self: &Arc<Self>, spec: RoomSpec) {
        let key = spec.key();
        self.serializer
            .wait_for_turn(key, || self.connect_locked(spec))
            .await;
    }

    async fn close_room(self: &Arc<Self>, spec: RoomSpec) {
        self.close_key(spec.key()).await;
    }

    async fn close_key(self: &Arc<Self>, key: String) {
        self.serializer
            .wait_for_turn(key.clone(), || self.close_locked(key))
            .await;
    }

    /// Open a session for `spec`. Caller holds the room's turn.
    async fn connect_locked(self: &Arc<Self>, spec: RoomSpec) {
        let key = spec.key();
        let Some(cancel) = self.live_token() else {
            debug!(room = %key, "Not live, skipping connect");
            return;
        };
        // A leave may have taken the turn between our declare and now.
        if !self.membership.contains(&spec).await {
            debug!(room = %key, "Room no longer declared, skipping connect");
            return;
        }
        if self.sessions.read().await.contains_key(&key) {
            debug!(room = %key, "Room already connected");
            return;
        }

        let session_cancel = cancel.child_token();
        let (conversation, audio_streams) =
            ConversationState::new(key.clone(), self.options.history_limit);
        let conversation = Arc::new(conversation);
        let audio = Arc::new(AudioPipeline::new(
            self.participant.clone(),
            Arc::clone(&conversation),
            self.devices.clone(),
            self.options.audio.clone(),
            session_cancel.child_token(),
        ));
        let session = Arc::new(RoomSession::new(
            spec.clone(),
            self.participant.clone(),
            Arc::clone(&conversation),
            audio,
            audio_streams,
            session_cancel,
        ));

        let weak = Arc::downgrade(self);
        session
            .on_disconnect()
            .subscribe(move |event: SessionDisconnect| {
                let weak = Weak::clone(&weak);
                async move {
                    if let Some(inner) = weak.upgrade() {
                        inner.handle_disconnect(event).await;
                    }
                    Ok(())
                }
            });

        info!(room = %key, "Connecting room");
        if let Err(e) = session.connect(self.transport.as_ref()).await {
            warn!(room = %key, error = %e, "Failed to connect room");
            session.close().await;
            return;
        }
        if cancel.is_cancelled() {
            session.close().await;
            return;
        }

        self.sessions
            .write()
            .await
            .insert(key.clone(), Arc::clone(&session));
        info!(room = %key, local_player_id = session.local_player_id(), "Room connected");
        self.session_events
            .emit(SessionEvent::Opened { spec, conversation })
            .await;
    }

    /// Close the session for `key`, if any. Caller holds the room's turn.
    async fn close_locked(&self, key: String) {
        let Some(session) = self.sessions.write().await.remove(&key) else {
            debug!(room = %key, "Room not connected");
            return;
        };
        session.close().await;
        info!(room = %key, "Room disconnected");
        self.session_events
            .emit(SessionEvent::Closed {
                spec: session.spec().clone(),
            })
            .await;
    }

    /// The transport dropped a session. Rejoin if the room is still declared.
    /// Boxed because it re-enters `connect_locked`, which subscribes it.
    fn handle_disconnect(self: &Arc<Self>, event: SessionDisconnect) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let key = event.spec.key();
            self.serializer
                .wait_for_turn(key.clone(), || async {
                    let current = {
                        let mut sessions = self.sessions.write().await;
                        let ours = sessions
                            .get(&key)
                            .is_some_and(|s| s.local_player_id() == event.local_player_id);
                        if ours {
                            sessions.remove(&key)
                        } else {
                            None
                        }
                    };
                    if let Some(session) = current {
                        session.close().await;
                        self.session_events
                            .emit(SessionEvent::Closed {
                                spec: event.spec.clone(),
                            })
                            .await;
                    }

                    if self.live_token().is_none() {
                        return;
                    }
                    if self.membership.contains(&event.spec).await {
                        info!(room = %key, "Rejoining dropped room");
                        self.connect_locked(event.spec.clone()).await;
                    } else {
                        debug!(room = %key, "Dropped room no longer declared");
                    }
                })
                .await;
        })
    }
}
