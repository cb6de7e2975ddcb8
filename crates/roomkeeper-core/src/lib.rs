//! Room membership reconciliation for an autonomous chat participant.
//!
//! A [`RoomMembershipStore`] holds the persisted set of rooms this
//! participant should be in. A [`RoomConnectionManager`] keeps one live
//! [`RoomSession`] per declared room, rejoining rooms that drop while still
//! declared. Each session feeds a [`ConversationState`] (history, typing,
//! scene) and an [`AudioPipeline`] (capture, voice detection, playback
//! with ducking).

pub mod audio;
pub mod conversation;
pub mod manager;
pub mod membership;
pub mod participant;
pub mod realtime;
pub mod serializer;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

pub use audio::{
    AudioDevices, AudioEncoder, AudioEvent, AudioPipeline, CaptureDevice, EnergyVad,
    OutboundAudioStream, PcmEncoder, PlaybackFactory, PlaybackStream, Segment, SpeakerMap,
    Transcriber, VoiceActivityDetector, VoiceSegmenter,
};
pub use conversation::{
    ActionMessage, AgentFilter, ConversationState, MessageEvent, MessageFilter, Scene,
    TypingEvent, DEFAULT_HISTORY_LIMIT, TYPING_METHOD,
};
pub use manager::{ManagerOptions, RoomConnectionManager, SessionEvent};
pub use membership::{
    LoadState, MemoryPersistence, RoomMembershipStore, RoomPersistence, RoomSpec,
    SqlitePersistence,
};
pub use participant::{Participant, PresenceRecord};
pub use realtime::WsTransport;
pub use serializer::KeyedSerializer;
pub use session::{
    RoomSession, SessionDisconnect, SessionState, Transport, TransportConnection, TransportEvent,
    TransportHandle, PLAYER_SPEC_KEY,
};
