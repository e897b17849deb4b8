//! Two-person chat core: message visibility, reactions, optimistic sends and
//! "clear for me", plus the thin warp server that exposes them.

pub mod bulk_clear;
pub mod config;
pub mod conversation;
pub mod error;
pub mod messages;
pub mod model;
pub mod probe;
pub mod reactions;
pub mod reconciler;
pub mod server;
pub mod session;
pub mod store;
pub mod tls;
pub mod visibility;

pub use error::{ChatError, ChatResult};
pub use model::{DeletionScope, Message, MessageId, TempId, UserId};
pub use session::ChatSession;
pub use store::{MemoryStore, MessageStore};
