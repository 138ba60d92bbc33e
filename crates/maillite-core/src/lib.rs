//! # maillite-core
//!
//! Client session engine for `MailLite`.
//!
//! This crate provides:
//! - **Session** - Login, folder listings, message retrieval and submission
//! - **Recovery** - Reconnect and resubmit when the command connection dies
//! - **Notifications** - New-mail observer fed by the datagram listener
//! - **Read State** - Locally persisted set of opened messages

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod error;
pub mod read_state;
pub mod session;

pub use error::{Error, Result};
pub use maillite_proto::{
    Folder, FullMessage, MessageSummary, NotificationObserver, PresenceEntry, PresenceStatus,
    ServerStats,
};
pub use read_state::ReadStateCache;
pub use session::{ConnectionState, Session, SessionConfig, SessionConfigBuilder};
