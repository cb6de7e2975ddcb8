use std::path::PathBuf;

/// Boxed error returned by event listeners. Listener failures are logged by
/// the dispatcher and never reach the emitter.
pub type ListenerError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("config parse error: {0}")]
    ParseError(String),

    #[error("config validation error: {0}")]
    ValidationError(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PersistenceError {
    /// The row already exists. Joins treat this as success.
    #[error("persistence conflict: row {0} already exists")]
    Conflict(String),

    #[error("persistence error: {0}")]
    Backend(String),
}

#[derive(Debug, thiserror::Error)]
pub enum MembershipError {
    #[error("invalid room specification: {0}")]
    InvalidSpec(String),

    #[error("room not joined: {0}")]
    NotJoined(String),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("transport connect error: {0}")]
    Connect(String),

    #[error("transport closed")]
    Closed,

    #[error("transport protocol error: {0}")]
    Protocol(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConversationError {
    #[error("unsupported message filter: {0}")]
    UnsupportedFilter(String),
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum AudioError {
    #[error("audio device error: {0}")]
    Device(String),

    #[error("audio codec error: {0}")]
    Codec(String),
}

#[derive(Debug, thiserror::Error)]
pub enum RoomkeeperError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Membership(#[from] MembershipError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Conversation(#[from] ConversationError),

    #[error(transparent)]
    Audio(#[from] AudioError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}
