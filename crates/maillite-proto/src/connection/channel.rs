//! Single-flight command channel.
//!
//! The protocol is strictly one request at a time. [`CommandChannel`] holds
//! the connection behind an async mutex that stays locked from the first
//! written byte of a request until its last reply line has been read, so
//! concurrent callers queue instead of interleaving on the wire.
//!
//! A read timeout, an I/O error or an early close drops the connection: the
//! reply stream can no longer be trusted, and every later call fails with
//! [`Error::Disconnected`] until a new stream is attached.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;

use super::framed::LineStream;
use crate::command::{Command, Submission};
use crate::parser::ReplyFramer;
use crate::types::{Reply, ReplyCode};
use crate::{Error, Result};

/// Default idle timeout for reads and writes.
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound on the time spent sending `QUIT` during shutdown.
const QUIT_TIMEOUT: Duration = Duration::from_secs(1);

/// Command connection shared by concurrent callers.
pub struct CommandChannel<S> {
    stream: Mutex<Option<LineStream<S>>>,
    io_timeout: Duration,
}

impl<S> std::fmt::Debug for CommandChannel<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandChannel")
            .field("io_timeout", &self.io_timeout)
            .finish_non_exhaustive()
    }
}

impl<S> CommandChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Creates a channel with no connection attached.
    #[must_use]
    pub fn new(io_timeout: Duration) -> Self {
        Self {
            stream: Mutex::new(None),
            io_timeout,
        }
    }

    /// Creates a channel around an established stream.
    #[must_use]
    pub fn with_stream(stream: S, io_timeout: Duration) -> Self {
        Self {
            stream: Mutex::new(Some(LineStream::new(stream))),
            io_timeout,
        }
    }

    /// Returns the idle timeout.
    #[must_use]
    pub const fn io_timeout(&self) -> Duration {
        self.io_timeout
    }

    /// Attaches a fresh stream, dropping any previous one.
    pub async fn attach(&self, stream: S) {
        *self.stream.lock().await = Some(LineStream::new(stream));
    }

    /// Returns true if a connection is attached.
    pub async fn is_open(&self) -> bool {
        self.stream.lock().await.is_some()
    }

    /// Drops the connection without sending anything.
    pub async fn close(&self) {
        let stream = self.stream.lock().await.take();
        if let Some(mut stream) = stream {
            let _ = tokio::time::timeout(QUIT_TIMEOUT, stream.shutdown()).await;
            tracing::debug!("Command connection closed");
        }
    }

    /// Sends `QUIT` without waiting for a reply, then drops the connection.
    pub async fn quit(&self) {
        let stream = self.stream.lock().await.take();
        if let Some(mut stream) = stream {
            tracing::debug!("C: QUIT");
            let bye = async {
                stream.write_all(&Command::Quit.serialize()).await?;
                stream.shutdown().await
            };
            match tokio::time::timeout(QUIT_TIMEOUT, bye).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::debug!(error = %e, "QUIT not delivered"),
                Err(_) => tracing::debug!("QUIT timed out"),
            }
        }
    }

    /// Sends a command and reads its single-line reply.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Disconnected`] if no connection is attached or the
    /// peer closed it, [`Error::Timeout`] if the reply does not arrive in
    /// time and [`Error::ProtocolViolation`] if the reply line carries no
    /// status code.
    pub async fn request(&self, command: &Command) -> Result<Reply> {
        command.validate()?;
        let mut guard = self.stream.lock().await;
        let stream = guard.as_mut().ok_or(Error::Disconnected)?;

        let result: Result<Reply> = async {
            self.send(stream, command).await?;
            self.read_reply(stream).await
        }
        .await;

        settle(&mut *guard, result)
    }

    /// Sends a command and reads lines until the reply is complete.
    ///
    /// The terminating line is included in the result.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Truncated`] carrying the lines read so far if the
    /// connection closes before the terminator, and otherwise the same
    /// errors as [`Self::request`].
    pub async fn multi_request(&self, command: &Command) -> Result<Vec<String>> {
        command.validate()?;
        let mut guard = self.stream.lock().await;
        let stream = guard.as_mut().ok_or(Error::Disconnected)?;

        let result: Result<Vec<String>> = async {
            self.send(stream, command).await?;

            let mut framer = ReplyFramer::new();
            let mut collected = Vec::new();
            loop {
                let Some(line) = self.read_line(stream).await? else {
                    if collected.is_empty() {
                        return Err(Error::Disconnected);
                    }
                    tracing::warn!(
                        verb = command.verb(),
                        lines = collected.len(),
                        "Connection closed mid-reply"
                    );
                    return Err(Error::Truncated { collected });
                };
                let done = framer.is_terminator(&line);
                collected.push(line);
                if done {
                    return Ok(collected);
                }
            }
        }
        .await;

        settle(&mut *guard, result)
    }

    /// Runs the three-step message submission.
    ///
    /// `SEND` and the header line must each be answered with 354, the body
    /// with 250. Returns the server-generated id if the final reply carries
    /// one. The exchange holds the channel for its whole duration and is not
    /// resumed step by step: any failure aborts it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Rejected`] or [`Error::NotFound`] if a step is
    /// refused, and the errors of [`Self::request`] otherwise.
    pub async fn submit(&self, submission: &Submission) -> Result<Option<String>> {
        let mut guard = self.stream.lock().await;
        let stream = guard.as_mut().ok_or(Error::Disconnected)?;

        let result: Result<Option<String>> = async {
            self.send(stream, &Command::Send).await?;
            self.read_reply(stream).await?.expect(ReplyCode::CONTINUE)?;

            self.send(stream, &submission.header()).await?;
            self.read_reply(stream).await?.expect(ReplyCode::CONTINUE)?;

            tracing::debug!("C: <body, {} chars>", submission.body().chars().count());
            self.write(stream, &submission.body_bytes()).await?;
            let reply = self.read_reply(stream).await?.expect(ReplyCode::OK)?;

            Ok(reply.message_id().map(ToString::to_string))
        }
        .await;

        settle(&mut *guard, result)
    }

    async fn send(&self, stream: &mut LineStream<S>, command: &Command) -> Result<()> {
        tracing::debug!("C: {}", command.redacted());
        self.write(stream, &command.serialize()).await
    }

    async fn write(&self, stream: &mut LineStream<S>, data: &[u8]) -> Result<()> {
        tokio::time::timeout(self.io_timeout, stream.write_all(data))
            .await
            .map_err(|_| Error::Timeout(self.io_timeout))?
            .map_err(io_fault)
    }

    async fn read_line(&self, stream: &mut LineStream<S>) -> Result<Option<String>> {
        let line = tokio::time::timeout(self.io_timeout, stream.read_line())
            .await
            .map_err(|_| Error::Timeout(self.io_timeout))?
            .map_err(io_fault)?;
        if let Some(line) = &line {
            tracing::debug!("S: {line}");
        }
        Ok(line)
    }

    async fn read_reply(&self, stream: &mut LineStream<S>) -> Result<Reply> {
        let line = self.read_line(stream).await?.ok_or(Error::Disconnected)?;
        Reply::parse(&line)
    }
}

/// Drops the connection if `result` reports a connection fault.
fn settle<S, T>(slot: &mut Option<LineStream<S>>, result: Result<T>) -> Result<T> {
    if let Err(e) = &result
        && e.is_connection_fault()
    {
        tracing::warn!(error = %e, "Dropping command connection");
        *slot = None;
    }
    result
}

/// Maps a transport error to a disconnect.
fn io_fault(error: Error) -> Error {
    match error {
        Error::Io(e) => {
            tracing::debug!(error = %e, "Command connection I/O error");
            Error::Disconnected
        }
        other => other,
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;
    use crate::types::Folder;
    use tokio_test::io::{Builder, Mock};

    fn channel(mock: Mock) -> CommandChannel<Mock> {
        CommandChannel::with_stream(mock, DEFAULT_IO_TIMEOUT)
    }

    #[tokio::test]
    async fn test_request() {
        let mock = Builder::new().write(b"NOOP\n").read(b"250 OK\n").build();
        let channel = channel(mock);

        let reply = channel.request(&Command::Noop).await.unwrap();
        assert_eq!(reply.code, ReplyCode::OK);
        assert!(channel.is_open().await);
    }

    #[tokio::test]
    async fn test_request_unclassifiable_reply_keeps_connection() {
        let mock = Builder::new().write(b"NOOP\n").read(b"hello\n").build();
        let channel = channel(mock);

        let result = channel.request(&Command::Noop).await;
        assert!(matches!(result, Err(Error::ProtocolViolation(_))));
        assert!(channel.is_open().await);
    }

    #[tokio::test]
    async fn test_request_without_connection() {
        let channel: CommandChannel<Mock> = CommandChannel::new(DEFAULT_IO_TIMEOUT);
        let result = channel.request(&Command::Noop).await;
        assert!(matches!(result, Err(Error::Disconnected)));
    }

    #[tokio::test]
    async fn test_request_rejects_line_breaks_before_writing() {
        let channel = channel(Builder::new().build());
        let result = channel
            .request(&Command::Mark {
                id: "1\nQUIT".into(),
            })
            .await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
        assert!(channel.is_open().await);
    }

    #[tokio::test]
    async fn test_request_peer_closed() {
        let mock = Builder::new().write(b"STAT\n").build();
        let channel = channel(mock);

        let result = channel.request(&Command::Stat).await;
        assert!(matches!(result, Err(Error::Disconnected)));
        assert!(!channel.is_open().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_timeout_drops_connection() {
        let mock = Builder::new()
            .write(b"NOOP\n")
            .wait(Duration::from_secs(120))
            .build();
        let channel = channel(mock);

        let result = channel.request(&Command::Noop).await;
        assert!(matches!(result, Err(Error::Timeout(t)) if t == DEFAULT_IO_TIMEOUT));
        assert!(!channel.is_open().await);
    }

    #[tokio::test]
    async fn test_multi_request() {
        let mock = Builder::new()
            .write(b"LIST INBOX\n")
            .read(b"213 1 bob 5 1700000000000 Hi\r\n213 2 carol 9 1700000000001\r\n")
            .read(b"213 END\r\n")
            .build();
        let channel = channel(mock);

        let lines = channel
            .multi_request(&Command::List {
                folder: Folder::Inbox,
            })
            .await
            .unwrap();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[2], "213 END");
    }

    #[tokio::test]
    async fn test_oversized_line_drops_connection() {
        use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

        let (client, server) = tokio::io::duplex(4096);
        let server = tokio::spawn(async move {
            let (read, mut write) = tokio::io::split(server);
            let mut lines = BufReader::new(read).lines();
            let mut received = Vec::new();

            while let Ok(Some(line)) = lines.next_line().await {
                if line.starts_with("LIST") {
                    let mut reply = b"213 1 bob 5 17 ".to_vec();
                    reply.extend(std::iter::repeat_n(b'a', 1_200_000));
                    reply.extend_from_slice(b"\n213 END\n");
                    let _ = write.write_all(&reply).await;
                } else {
                    let _ = write.write_all(b"250 OK\n").await;
                }
                received.push(line);
            }
            received
        });

        let channel = CommandChannel::with_stream(client, DEFAULT_IO_TIMEOUT);
        let list = Command::List {
            folder: Folder::Inbox,
        };
        let result = channel.multi_request(&list).await;
        assert!(matches!(result, Err(Error::LineTooLong(_))));
        assert!(!channel.is_open().await);

        // Later requests must not read what is left of the listing.
        let result = channel.request(&Command::Mark { id: "1".into() }).await;
        assert!(matches!(result, Err(Error::Disconnected)));

        assert_eq!(server.await.unwrap(), vec!["LIST INBOX"]);
    }

    #[tokio::test]
    async fn test_multi_request_not_found() {
        let mock = Builder::new()
            .write(b"RETR 7\n")
            .read(b"550 No such message\n")
            .build();
        let channel = channel(mock);

        let lines = channel
            .multi_request(&Command::Retr { id: "7".into() })
            .await
            .unwrap();
        assert_eq!(lines, vec!["550 No such message"]);
    }

    #[tokio::test]
    async fn test_multi_request_truncated() {
        let mock = Builder::new()
            .write(b"WHO\n")
            .read(b"212U alice ACTIVE\n212U bob BUSY\n")
            .build();
        let channel = channel(mock);

        let result = channel.multi_request(&Command::Who).await;
        match result {
            Err(Error::Truncated { collected }) => {
                assert_eq!(collected, vec!["212U alice ACTIVE", "212U bob BUSY"]);
            }
            other => panic!("expected truncation, got {other:?}"),
        }
        assert!(!channel.is_open().await);
    }

    #[tokio::test]
    async fn test_multi_request_closed_before_any_line() {
        let mock = Builder::new().write(b"WHO\n").build();
        let channel = channel(mock);

        let result = channel.multi_request(&Command::Who).await;
        assert!(matches!(result, Err(Error::Disconnected)));
    }

    #[tokio::test]
    async fn test_submit() {
        let mock = Builder::new()
            .write(b"SEND\n")
            .read(b"354 Send header\n")
            .write(b"FROM:alice TO:bob,carol SUBJ:Hi BODYLEN:11\n")
            .read(b"354 Send body\n")
            .write(b"hello\nthere\n")
            .read(b"250 MSGID 1700000000000-1\n")
            .build();
        let channel = channel(mock);

        let submission = Submission::new("alice", "bob, ,carol", "Hi", "hello\nthere", 65536)
            .unwrap();
        let id = channel.submit(&submission).await.unwrap();
        assert_eq!(id.as_deref(), Some("1700000000000-1"));
    }

    #[tokio::test]
    async fn test_submit_without_id() {
        let mock = Builder::new()
            .write(b"SEND\n")
            .read(b"354\n")
            .write(b"FROM:alice TO:bob SUBJ:Hi BODYLEN:2\n")
            .read(b"354\n")
            .write(b"yo\n")
            .read(b"250 OK\n")
            .build();
        let channel = channel(mock);

        let submission = Submission::new("alice", "bob", "Hi", "yo", 65536).unwrap();
        assert_eq!(channel.submit(&submission).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_submit_rejected_header() {
        let mock = Builder::new()
            .write(b"SEND\n")
            .read(b"354\n")
            .write(b"FROM:alice TO:nobody SUBJ:Hi BODYLEN:2\n")
            .read(b"550 Unknown recipient nobody\n")
            .build();
        let channel = channel(mock);

        let submission = Submission::new("alice", "nobody", "Hi", "yo", 65536).unwrap();
        let result = channel.submit(&submission).await;
        assert!(matches!(result, Err(Error::NotFound(_))));
        assert!(channel.is_open().await);
    }

    #[tokio::test]
    async fn test_quit() {
        let mock = Builder::new().write(b"QUIT\n").build();
        let channel = channel(mock);

        channel.quit().await;
        assert!(!channel.is_open().await);
        // A second quit is a no-op.
        channel.quit().await;
    }
}
