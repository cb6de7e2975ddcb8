//! Per-room conversation state: bounded history, typing indicators, the
//! scene mirror, and fan-out of local and outbound messages.

mod filter;
mod message;
mod state;


pub use filter::{AgentFilter, MessageFilter};
pub use message::{ActionMessage, MessageEvent, Scene, TypingEvent, TYPING_METHOD};
pub use state::{ConversationState, DEFAULT_HISTORY_LIMIT};
