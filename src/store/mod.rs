//! Collaborators the transport calls into: message persistence, moderation
//! and the channel directory.
//!
//! The transport never awaits these on the broadcast path. Persistence runs in
//! a spawned task after delivery; moderation is consulted before a
//! connection enters a hub.

mod memory;
mod postgres;
mod traits;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;
pub use traits::{
    ChannelDirectory, ChannelInfo, ChannelKind, MessageStore, ModerationPolicy, StoreError,
    StoredMessage,
};
