//! Command connection management.
//!
//! This module provides:
//! - Transport establishment behind the [`Connector`] trait
//! - Line framing over any async byte stream
//! - The single-flight [`CommandChannel`]

mod channel;
mod framed;
mod stream;

pub use channel::{CommandChannel, DEFAULT_IO_TIMEOUT};
pub use framed::LineStream;
pub use stream::{Connector, DEFAULT_CONNECT_TIMEOUT, TcpConnector};
