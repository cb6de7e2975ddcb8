//! WebSocket implementation of the session transport.

mod connection;
pub mod protocol;

pub use connection::WsTransport;
pub use protocol::{frame_to_events, Frame, Peer};
