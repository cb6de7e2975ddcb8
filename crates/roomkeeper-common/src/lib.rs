pub mod errors;
pub mod events;
pub mod id;

pub use errors::{
    AudioError, ConfigError, ConversationError, ListenerError, MembershipError, PersistenceError,
    RoomkeeperError, TransportError,
};
pub use events::{Dispatcher, ListenerId};
pub use id::{new_id, new_stream_id, next_local_player_id};

pub type Result<T> = std::result::Result<T, RoomkeeperError>;
