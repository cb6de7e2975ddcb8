//! Declared room membership: the rooms this participant should be in.
//!
//! [`RoomMembershipStore`] is the source of truth. It persists every change
//! through a [`RoomPersistence`] backend and announces joins and leaves on
//! extendable dispatchers so the connection manager can finish opening or
//! closing a session before the call returns.

mod persistence;
mod spec;
mod sqlite;
mod store;


pub use persistence::{MemoryPersistence, RoomPersistence};
pub use spec::RoomSpec;
pub use sqlite::SqlitePersistence;
pub use store::{LoadState, RoomMembershipStore};
