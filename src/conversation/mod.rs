//! Per-channel conversation state: message records, channel configuration
//! and the token-bounded history window.

mod config;
mod message;
mod window;

pub use config::{ChannelConfig, ConfigUpdate, LanguageModel, UnknownModel};
pub use message::{MessageRecord, NewMessage, Role};
pub use window::{ConversationWindow, SAFETY_BUFFER};
