//! The realtime transport contract a session runs on.

use std::sync::Arc;

use async_trait::async_trait;
use roomkeeper_common::TransportError;
use tokio::sync::mpsc;

use crate::conversation::{ActionMessage, Scene};
use crate::membership::RoomSpec;
use crate::participant::{Participant, PresenceRecord};

/// Presence key that carries a participant's published record.
pub const PLAYER_SPEC_KEY: &str = "playerSpec";

/// Inbound events, delivered in arrival order.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// The connection dropped. No further events follow.
    Disconnected { reason: Option<String> },
    Chat {
        participant_id: String,
        message: ActionMessage,
    },
    PresenceJoin {
        participant_id: String,
        player_spec: Option<PresenceRecord>,
    },
    PresenceUpdate {
        participant_id: String,
        key: String,
        value: serde_json::Value,
    },
    PresenceLeave { participant_id: String },
    AudioStart {
        participant_id: String,
        stream_id: String,
        media_type: String,
    },
    Audio {
        participant_id: String,
        stream_id: String,
        data: Vec<u8>,
    },
    AudioEnd {
        participant_id: String,
        stream_id: String,
    },
    SceneChanged(Option<Scene>),
}

/// A connected room.
pub struct TransportConnection {
    pub handle: Arc<dyn TransportHandle>,
    pub events: mpsc::Receiver<TransportEvent>,
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Resolves once the room is connected.
    async fn connect(
        &self,
        spec: &RoomSpec,
        participant: &Participant,
    ) -> Result<TransportConnection, TransportError>;
}

/// Outbound side of a connection.
#[async_trait]
pub trait TransportHandle: Send + Sync {
    fn is_connected(&self) -> bool;

    /// Publish our own presence record as the `playerSpec` value.
    async fn set_local_player(&self, record: &PresenceRecord) -> Result<(), TransportError>;

    async fn send_chat_message(&self, message: &ActionMessage) -> Result<(), TransportError>;

    async fn add_audio_source(&self, stream_id: &str, media_type: &str) -> Result<(), TransportError>;

    async fn send_audio(&self, stream_id: &str, data: &[u8]) -> Result<(), TransportError>;

    async fn remove_audio_source(&self, stream_id: &str) -> Result<(), TransportError>;

    /// Leave the room. Does not produce a `Disconnected` event.
    async fn disconnect(&self);
}
