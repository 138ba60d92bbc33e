//! # maillite-proto
//!
//! Client side of the MailLite line protocol.
//!
//! ## Features
//!
//! - **Wire codec**: command serialization and status-code classification of
//!   reply lines, including multi-line framing for listings, presence and
//!   full messages
//! - **Single-flight command channel**: one request in flight at a time,
//!   with bounded idle timeouts and the three-step message submission
//! - **New-mail listener**: datagram receive loop that hands
//!   `NOTIFY NEWMAIL` pushes to a registered observer
//!
//! ## Quick Start
//!
//! ```ignore
//! use maillite_proto::command::Command;
//! use maillite_proto::connection::{CommandChannel, Connector, TcpConnector, DEFAULT_IO_TIMEOUT};
//! use maillite_proto::types::ReplyCode;
//!
//! #[tokio::main]
//! async fn main() -> maillite_proto::Result<()> {
//!     let stream = TcpConnector::default().connect("localhost", 1234).await?;
//!     let channel = CommandChannel::with_stream(stream, DEFAULT_IO_TIMEOUT);
//!
//!     channel
//!         .request(&Command::Helo { username: "alice".into(), notify_port: 5555 })
//!         .await?
//!         .expect(ReplyCode::OK)?;
//!
//!     let stats = channel.request(&Command::Stat).await?;
//!     println!("{stats}");
//!
//!     channel.quit().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Reply Codes
//!
//! ```text
//! 211  statistics (single line)
//! 212  presence row      ─┐
//! 213  listing row        ├─ multi-line, ends with "<code> END"
//! 214  message field     ─┘
//! 235  authenticated
//! 250  ok
//! 354  continue submission
//! 550  not found
//! ```
//!
//! ## Modules
//!
//! - [`command`]: Command builders and recipient normalization
//! - [`connection`]: Connectors, line framing and the command channel
//! - [`notify`]: New-mail notification listener
//! - [`parser`]: Reply framing and payload parsers
//! - [`types`]: Replies, folders, messages and presence

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod command;
pub mod connection;
mod error;
pub mod notify;
pub mod parser;
pub mod types;

pub use command::{Command, Submission};
pub use connection::{CommandChannel, Connector, TcpConnector};
pub use error::{Error, Result};
pub use notify::{NotificationListener, NotificationObserver, ObserverSlot};
pub use types::{
    Folder, FullMessage, MessageSummary, PresenceEntry, PresenceStatus, Reply, ReplyCode,
    ServerStats,
};

/// Default command port.
pub const DEFAULT_PORT: u16 = 1234;

/// Default notification port announced in `HELO`.
pub const DEFAULT_NOTIFY_PORT: u16 = 5555;

/// Default upper bound on a message body, in bytes.
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;
