//! Core protocol types.

mod message;
mod presence;
mod reply;

pub use message::{Folder, FullMessage, MessageSummary};
pub use presence::{PresenceEntry, PresenceStatus, ServerStats, UnknownStatus};
pub use reply::{Reply, ReplyCode};
