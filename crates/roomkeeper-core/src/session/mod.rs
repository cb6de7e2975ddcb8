//! One live connection to one room.

mod room;
mod transport;


pub use room::{RoomSession, SessionDisconnect, SessionState};
pub use transport::{
    Transport, TransportConnection, TransportEvent, TransportHandle, PLAYER_SPEC_KEY,
};
