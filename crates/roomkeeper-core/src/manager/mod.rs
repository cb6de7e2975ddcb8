//! Reconciliation of live sessions against declared membership.
//!
//! [`RoomConnectionManager`] subscribes to the membership store's join and
//! leave events and to each session's disconnect event. Every open, close
//! and rejoin for a room runs under that room's [`KeyedSerializer`] turn, so
//! at most one session exists per room and a drop that races an explicit
//! leave resolves one way or the other, never both.
//!
//! [`KeyedSerializer`]: crate::serializer::KeyedSerializer

mod options;
mod reconcile;


pub use options::ManagerOptions;
pub use reconcile::{RoomConnectionManager, SessionEvent};
