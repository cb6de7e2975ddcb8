use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use roomkeeper_common::{next_local_player_id, Dispatcher, ListenerError, ListenerId, TransportError};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::transport::{Transport, TransportEvent, TransportHandle, PLAYER_SPEC_KEY};
use crate::audio::{AudioPipeline, OutboundAudioStream};
use crate::conversation::{ActionMessage, ConversationState, MessageEvent, TypingEvent};
use crate::membership::RoomSpec;
use crate::participant::{Participant, PresenceRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Connected,
    /// Terminal.
    Disconnected,
}

/// Emitted when the transport drops a session that was not closed locally.
#[derive(Debug, Clone)]
pub struct SessionDisconnect {
    pub spec: RoomSpec,
    pub local_player_id: u64,
    pub reason: Option<String>,
}

struct Bindings {
    remote: ListenerId,
    typing: ListenerId,
}

/// A live connection to one room.
///
/// Construction does no I/O. Subscribe to [`on_disconnect`](Self::on_disconnect)
/// first, then [`connect`](Self::connect).
pub struct RoomSession {
    spec: RoomSpec,
    key: String,
    local_player_id: u64,
    participant: Participant,
    conversation: Arc<ConversationState>,
    audio: Arc<AudioPipeline>,
    state: Mutex<SessionState>,
    handle: OnceLock<Arc<dyn TransportHandle>>,
    audio_streams: Mutex<Option<mpsc::Receiver<OutboundAudioStream>>>,
    bindings: Mutex<Option<Bindings>>,
    cancel: CancellationToken,
    disconnected: Dispatcher<SessionDisconnect>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl RoomSession {
    pub fn new(
        spec: RoomSpec,
        participant: Participant,
        conversation: Arc<ConversationState>,
        audio: Arc<AudioPipeline>,
        audio_streams: mpsc::Receiver<OutboundAudioStream>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            key: spec.key(),
            spec,
            local_player_id: next_local_player_id(),
            participant,
            conversation,
            audio,
            state: Mutex::new(SessionState::Connecting),
            handle: OnceLock::new(),
            audio_streams: Mutex::new(Some(audio_streams)),
            bindings: Mutex::new(None),
            cancel,
            disconnected: Dispatcher::new("disconnect"),
        }
    }

    pub fn spec(&self) -> &RoomSpec {
        &self.spec
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Distinguishes this session from earlier ones for the same room.
    pub fn local_player_id(&self) -> u64 {
        self.local_player_id
    }

    pub fn state(&self) -> SessionState {
        *lock(&self.state)
    }

    fn set_state(&self, state: SessionState) -> SessionState {
        std::mem::replace(&mut *lock(&self.state), state)
    }

    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
            && self.handle.get().is_some_and(|h| h.is_connected())
    }

    pub fn conversation(&self) -> &Arc<ConversationState> {
        &self.conversation
    }

    pub fn audio(&self) -> &Arc<AudioPipeline> {
        &self.audio
    }

    pub fn participants(&self) -> Vec<PresenceRecord> {
        self.conversation.participants()
    }

    pub fn on_disconnect(&self) -> &Dispatcher<SessionDisconnect> {
        &self.disconnected
    }

    /// Connect, publish our presence, and start handling events. Resolves
    /// once the transport reports the room connected.
    pub async fn connect(self: &Arc<Self>, transport: &dyn Transport) -> Result<(), TransportError> {
        if self.handle.get().is_some() {
            return Err(TransportError::Protocol("session already connected".into()));
        }

        let connection = match transport.connect(&self.spec, &self.participant).await {
            Ok(connection) => connection,
            Err(e) => {
                self.set_state(SessionState::Disconnected);
                return Err(e);
            }
        };
        let handle = connection.handle;

        if self.cancel.is_cancelled() || self.handle.set(Arc::clone(&handle)).is_err() {
            handle.disconnect().await;
            self.set_state(SessionState::Disconnected);
            return Err(TransportError::Closed);
        }
        self.set_state(SessionState::Connected);
        info!(room = %self.key, local_player_id = self.local_player_id, "Session connected");

        if let Err(e) = handle.set_local_player(&self.participant.to_presence()).await {
            warn!(room = %self.key, error = %e, "Failed to publish player spec");
        }
        self.bind_conversation(&handle);

        if let Some(streams) = lock(&self.audio_streams).take() {
            tokio::spawn(forward_audio_streams(
                Arc::clone(&handle),
                streams,
                self.cancel.clone(),
                self.key.clone(),
            ));
        }
        tokio::spawn(Arc::clone(self).run(connection.events));

        if let Err(e) = self.audio.start_capture().await {
            warn!(room = %self.key, error = %e, "Failed to start audio capture");
        }
        Ok(())
    }

    /// Close locally. Listeners are removed before the transport is
    /// disconnected, so no disconnect event fires.
    pub async fn close(&self) {
        self.disconnected.clear();
        self.cancel.cancel();
        self.unbind_conversation();
        self.audio.close().await;
        if let Some(handle) = self.handle.get() {
            handle.disconnect().await;
        }
        if self.set_state(SessionState::Disconnected) != SessionState::Disconnected {
            info!(room = %self.key, local_player_id = self.local_player_id, "Session closed");
        }
    }

    // -- outbound --

    fn bind_conversation(&self, handle: &Arc<dyn TransportHandle>) {
        let h = Arc::clone(handle);
        let remote = self
            .conversation
            .remote_messages()
            .subscribe(move |event: MessageEvent| {
                let h = Arc::clone(&h);
                async move {
                    if !h.is_connected() {
                        return Err::<(), ListenerError>(TransportError::Closed.into());
                    }
                    h.send_chat_message(&event.message).await?;
                    Ok(())
                }
            });

        let h = Arc::clone(handle);
        let (id, name) = (self.participant.id.clone(), self.participant.name.clone());
        let typing = self
            .conversation
            .typing_events()
            .subscribe(move |event: TypingEvent| {
                let h = Arc::clone(&h);
                let ping = ActionMessage::typing(&id, &name, event == TypingEvent::Start);
                async move {
                    if h.is_connected() {
                        h.send_chat_message(&ping).await?;
                    }
                    Ok::<(), ListenerError>(())
                }
            });

        *lock(&self.bindings) = Some(Bindings { remote, typing });
    }

    fn unbind_conversation(&self) {
        if let Some(bindings) = lock(&self.bindings).take() {
            self.conversation.remote_messages().unsubscribe(bindings.remote);
            self.conversation.typing_events().unsubscribe(bindings.typing);
        }
    }

    // -- inbound --

    async fn run(self: Arc<Self>, mut events: mpsc::Receiver<TransportEvent>) {
        let reason = loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    debug!(room = %self.key, "Session event loop cancelled");
                    return;
                }
                event = events.recv() => match event {
                    Some(TransportEvent::Disconnected { reason }) => break reason,
                    Some(event) => self.handle_event(event).await,
                    None => break Some("event stream closed".to_string()),
                },
            }
        };
        if self.cancel.is_cancelled() {
            return;
        }

        self.cancel.cancel();
        self.set_state(SessionState::Disconnected);
        self.unbind_conversation();
        self.audio.close().await;
        info!(
            room = %self.key,
            local_player_id = self.local_player_id,
            reason = reason.as_deref().unwrap_or("unknown"),
            "Session disconnected by transport"
        );
        self.disconnected
            .emit(SessionDisconnect {
                spec: self.spec.clone(),
                local_player_id: self.local_player_id,
                reason,
            })
            .await;
    }

    async fn handle_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::Chat {
                participant_id,
                message,
            } => {
                if participant_id == self.participant.id {
                    return;
                }
                self.conversation.add_local_message(message).await;
            }
            TransportEvent::PresenceJoin {
                participant_id,
                player_spec,
            } => {
                let record = player_spec
                    .map(|mut r| {
                        r.participant_id = participant_id.clone();
                        r
                    })
                    .unwrap_or_else(|| PresenceRecord::anonymous(&participant_id));
                debug!(room = %self.key, participant_id = %participant_id, "Participant joined");
                self.conversation.upsert_participant(record);
            }
            TransportEvent::PresenceUpdate {
                participant_id,
                key,
                value,
            } => {
                if key != PLAYER_SPEC_KEY {
                    debug!(room = %self.key, participant_id = %participant_id, key = %key, "Ignoring presence update");
                    return;
                }
                match PresenceRecord::from_player_spec(&participant_id, &value) {
                    Ok(record) => self.conversation.upsert_participant(record),
                    Err(e) => {
                        warn!(room = %self.key, participant_id = %participant_id, error = %e, "Bad player spec")
                    }
                }
            }
            TransportEvent::PresenceLeave { participant_id } => {
                debug!(room = %self.key, participant_id = %participant_id, "Participant left");
                self.conversation.remove_participant(&participant_id);
                self.audio.drop_participant(&participant_id).await;
            }
            TransportEvent::AudioStart {
                participant_id,
                stream_id,
                media_type,
            } => {
                self.audio
                    .handle_audio_start(&participant_id, &stream_id, &media_type)
                    .await;
            }
            TransportEvent::Audio {
                stream_id, data, ..
            } => self.audio.handle_audio(&stream_id, &data).await,
            TransportEvent::AudioEnd { stream_id, .. } => {
                self.audio.handle_audio_end(&stream_id).await
            }
            TransportEvent::SceneChanged(scene) => self.conversation.set_scene(scene),
            TransportEvent::Disconnected { .. } => {}
        }
    }
}

/// Sends each outbound stream as source-add, data chunks, source-remove.
async fn forward_audio_streams(
    handle: Arc<dyn TransportHandle>,
    mut streams: mpsc::Receiver<OutboundAudioStream>,
    cancel: CancellationToken,
    key: String,
) {
    loop {
        let stream = tokio::select! {
            _ = cancel.cancelled() => break,
            stream = streams.recv() => match stream {
                Some(stream) => stream,
                None => break,
            },
        };
        let stream_id = stream.id.clone();
        if let Err(e) = send_audio_stream(handle.as_ref(), stream, &cancel).await {
            warn!(room = %key, stream_id = %stream_id, error = %e, "Failed to send audio stream");
        }
    }
}

async fn send_audio_stream(
    handle: &dyn TransportHandle,
    mut stream: OutboundAudioStream,
    cancel: &CancellationToken,
) -> Result<(), TransportError> {
    handle
        .add_audio_source(&stream.id, &stream.media_type)
        .await?;

    let mut sent = Ok(());
    loop {
        let chunk = tokio::select! {
            _ = cancel.cancelled() => None,
            chunk = stream.chunks.recv() => chunk,
        };
        let Some(chunk) = chunk else { break };
        if let Err(e) = handle.send_audio(&stream.id, &chunk).await {
            sent = Err(e);
            break;
        }
    }

    let removed = handle.remove_audio_source(&stream.id).await;
    sent.and(removed)
}
