//! Session with login, recovery and the mail operations.
//!
//! A [`Session`] owns one [`CommandChannel`] and, once logged in, one
//! [`NotificationListener`]. The two share no socket: the command path is
//! single-flight through the channel, and notifications reach the registered
//! observer on the listener task.
//!
//! ## Recovery
//!
//! A timeout or socket fault on the command connection moves the session to
//! [`ConnectionState::Degraded`]. Only message submission recovers from
//! that: it reconnects and repeats the full handshake with the credentials
//! cached at login, then retries the submission once. Every other operation
//! fails fast with a disconnect while degraded.
//!
//! ## Example
//!
//! ```ignore
//! use maillite_core::{Session, SessionConfig};
//! use maillite_proto::Folder;
//!
//! let session = Session::new(SessionConfig::new("localhost"));
//! session.login("alice", "secret").await?;
//!
//! session.on_new_mail(|user: &str, count: u32| {
//!     println!("{count} new message(s) for {user}");
//! });
//!
//! for summary in session.list_folder(Folder::Inbox).await? {
//!     println!("{} {}", summary.from, summary.subject);
//! }
//!
//! session.send_message("bob, carol", "Lunch", "Noon?").await?;
//! session.logout().await;
//! ```

mod config;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use maillite_proto::connection::{CommandChannel, Connector, TcpConnector};
use maillite_proto::notify::{NotificationListener, NotificationObserver, ObserverSlot};
use maillite_proto::parser::{ensure_completed, parse_full_message, parse_listing, parse_presence};
use maillite_proto::{
    Command, Folder, FullMessage, MessageSummary, PresenceEntry, PresenceStatus, ReplyCode,
    ServerStats, Submission,
};
use tokio::net::UdpSocket;
use tokio::sync::{Mutex, watch};

pub use config::{SessionConfig, SessionConfigBuilder};
pub use state::ConnectionState;

use crate::read_state::ReadStateCache;
use crate::{Error, Result};

type ProtoError = maillite_proto::Error;

/// Credentials cached for recovery.
#[derive(Clone)]
struct Credentials {
    username: String,
    password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"****")
            .finish()
    }
}

/// Client session.
///
/// All operations take `&self`; share the session behind an [`Arc`] to use
/// it from several tasks. Concurrent operations queue on the command
/// channel.
///
/// While [`ConnectionState::Degraded`], every operation except
/// [`Session::send_message`] fails with a disconnect. Call
/// [`Session::send_message`] (which reconnects first) or
/// [`Session::login`] again to leave that state.
pub struct Session<C: Connector = TcpConnector> {
    config: SessionConfig,
    connector: C,
    channel: CommandChannel<C::Stream>,
    state: watch::Sender<ConnectionState>,
    credentials: Mutex<Option<Credentials>>,
    listener: Mutex<Option<NotificationListener>>,
    observer: ObserverSlot,
    read_state: Mutex<ReadStateCache>,
    /// Serializes login, recovery and logout.
    lifecycle: Mutex<()>,
}

impl<C: Connector> std::fmt::Debug for Session<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("host", &self.config.host)
            .field("port", &self.config.port)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Creates a disconnected session that connects over TCP.
    #[must_use]
    pub fn new(config: SessionConfig) -> Self {
        let connector = TcpConnector::new(config.connect_timeout);
        Self::with_connector(config, connector)
    }
}

impl<C: Connector> Session<C> {
    /// Creates a disconnected session using `connector` for every connect.
    #[must_use]
    pub fn with_connector(config: SessionConfig, connector: C) -> Self {
        let channel = CommandChannel::new(config.io_timeout);
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            config,
            connector,
            channel,
            state,
            credentials: Mutex::new(None),
            listener: Mutex::new(None),
            observer: ObserverSlot::new(),
            read_state: Mutex::new(ReadStateCache::in_memory()),
            lifecycle: Mutex::new(()),
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Returns the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Subscribes to connection state changes.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Returns the logged-in username.
    pub async fn username(&self) -> Option<String> {
        self.credentials
            .lock()
            .await
            .as_ref()
            .map(|c| c.username.clone())
    }

    /// Returns the address the notification socket is bound to.
    pub async fn notification_addr(&self) -> Option<SocketAddr> {
        self.listener
            .lock()
            .await
            .as_ref()
            .map(NotificationListener::local_addr)
    }

    /// Registers the new-mail observer, replacing any previous one.
    ///
    /// The observer runs on the listener task and must not block.
    pub fn on_new_mail(&self, observer: impl NotificationObserver + 'static) {
        self.observer.set(Arc::new(observer));
    }

    /// Removes the new-mail observer.
    pub fn clear_new_mail_observer(&self) {
        self.observer.clear();
    }

    /// Logs in.
    ///
    /// Binds the notification socket first so that `HELO` can announce the
    /// port actually bound, then sends `AUTH`. Once both are accepted the
    /// notification loop is started and the read-state cache loaded. Any
    /// existing connection is closed first.
    ///
    /// # Errors
    ///
    /// Returns [`maillite_proto::Error::AuthRejected`] if either step is
    /// refused, a connect or I/O error if the server cannot be reached, and
    /// an I/O error if the notification socket cannot be bound. On error the
    /// session is left disconnected.
    pub async fn login(&self, username: &str, password: &str) -> Result<()> {
        validate_username(username)?;
        let _lifecycle = self.lifecycle.lock().await;

        self.teardown().await;
        *self.credentials.lock().await = None;
        self.set_state(ConnectionState::Connecting);
        tracing::info!(
            host = %self.config.host,
            port = self.config.port,
            username,
            "Logging in"
        );

        let (socket, notify_port) = match self.bind_notification_socket().await {
            Ok(bound) => bound,
            Err(e) => {
                tracing::warn!(addr = %self.config.notify_addr(), error = %e, "Notification socket unavailable");
                self.set_state(ConnectionState::Disconnected);
                return Err(e);
            }
        };

        if let Err(e) = self.handshake(username, password, notify_port).await {
            tracing::warn!(username, error = %e, "Login failed");
            self.channel.close().await;
            self.set_state(ConnectionState::Disconnected);
            return Err(e);
        }

        let listener = match NotificationListener::spawn(
            socket,
            self.config.notify_poll_interval,
            self.observer.clone(),
        ) {
            Ok(listener) => listener,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to start notification listener");
                self.channel.quit().await;
                self.set_state(ConnectionState::Disconnected);
                return Err(e.into());
            }
        };
        *self.listener.lock().await = Some(listener);

        if let Some(path) = &self.config.read_state_path {
            *self.read_state.lock().await = ReadStateCache::load(path).await;
        }

        *self.credentials.lock().await = Some(Credentials {
            username: username.to_string(),
            password: password.to_string(),
        });
        self.set_state(ConnectionState::Authenticated);
        tracing::info!(username, "Logged in");
        Ok(())
    }

    /// Logs out.
    ///
    /// Sends `QUIT`, closes the command connection, and stops the
    /// notification listener, waiting for it up to the configured join
    /// timeout.
    pub async fn logout(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        self.teardown().await;
        *self.credentials.lock().await = None;
        self.set_state(ConnectionState::Disconnected);
        tracing::info!("Logged out");
    }

    /// Lists a folder.
    ///
    /// Read flags are pre-seeded from the folder and then overlaid with the
    /// local read-state cache.
    ///
    /// # Errors
    ///
    /// Returns an error if the session is not authenticated or the request
    /// fails. A reply cut short by a closed connection is reported as
    /// [`maillite_proto::Error::Truncated`].
    pub async fn list_folder(&self, folder: Folder) -> Result<Vec<MessageSummary>> {
        self.ensure_authenticated()?;
        let lines = self.observe(self.channel.multi_request(&Command::List { folder }).await)?;
        ensure_completed(&lines)?;

        let mut summaries = parse_listing(&lines, folder);
        self.read_state.lock().await.merge(&mut summaries);
        tracing::debug!(%folder, count = summaries.len(), "Listed folder");
        Ok(summaries)
    }

    /// Fetches a full message.
    ///
    /// Returns `Ok(None)` if the server does not know the id.
    ///
    /// # Errors
    ///
    /// Returns an error if the session is not authenticated or the request
    /// fails.
    pub async fn fetch_message(&self, id: &str) -> Result<Option<FullMessage>> {
        self.ensure_authenticated()?;
        let command = Command::Retr { id: id.to_string() };
        let lines = self.observe(self.channel.multi_request(&command).await)?;

        let message = parse_full_message(id, &lines)?;
        if message.is_none() {
            tracing::debug!(id, "Message not found");
        }
        Ok(message)
    }

    /// Sends a message.
    ///
    /// `to` is a comma-separated recipient list; blank entries are dropped.
    /// Input is validated before anything is written. If the connection is
    /// found dead the session reconnects once and retries the whole
    /// submission once.
    ///
    /// Returns the server-generated message id, if the server reported one.
    ///
    /// # Errors
    ///
    /// Returns [`maillite_proto::Error::InvalidRecipients`],
    /// [`maillite_proto::Error::InvalidInput`] or
    /// [`maillite_proto::Error::MessageTooLarge`] for bad input, and the
    /// submission or recovery error otherwise.
    pub async fn send_message(&self, to: &str, subject: &str, body: &str) -> Result<Option<String>> {
        let from = self.username().await.unwrap_or_default();
        let submission = Submission::new(from, to, subject, body, self.config.max_message_size)?;

        let mut recovered = false;
        match self.state() {
            ConnectionState::Authenticated => {}
            ConnectionState::Degraded => {
                self.recover().await?;
                recovered = true;
            }
            ConnectionState::Disconnected | ConnectionState::Connecting => {
                return Err(ProtoError::Disconnected.into());
            }
        }

        loop {
            match self.channel.submit(&submission).await {
                Ok(id) => {
                    tracing::info!(
                        to = ?submission.recipients(),
                        id = id.as_deref().unwrap_or("-"),
                        "Message sent"
                    );
                    return Ok(id);
                }
                Err(e) if e.is_disconnected() && !recovered => {
                    self.degrade(&e);
                    self.recover().await?;
                    recovered = true;
                }
                Err(e) => return self.observe(Err(e)),
            }
        }
    }

    /// Marks a message read.
    ///
    /// The id is recorded in the local cache first; `MARK` is only sent if
    /// it was not already there. Returns true if `MARK` was sent and
    /// accepted.
    ///
    /// # Errors
    ///
    /// Returns an error if `MARK` was needed and failed. The local record is
    /// kept either way.
    pub async fn mark_read(&self, id: &str) -> Result<bool> {
        let newly_seen = match self.read_state.lock().await.mark_seen(id).await {
            Ok(newly_seen) => newly_seen,
            Err(e) => {
                tracing::warn!(id, error = %e, "Failed to persist read state");
                true
            }
        };
        if !newly_seen {
            return Ok(false);
        }

        self.simple(Command::Mark { id: id.to_string() }).await?;
        Ok(true)
    }

    /// Returns true if the message has been marked read locally.
    pub async fn is_seen(&self, id: &str) -> bool {
        self.read_state.lock().await.is_seen(id)
    }

    /// Moves a message to the archive.
    ///
    /// # Errors
    ///
    /// Returns an error if the session is not authenticated or the server
    /// does not answer 250.
    pub async fn archive(&self, id: &str) -> Result<()> {
        self.simple(Command::Dele { id: id.to_string() }).await
    }

    /// Restores an archived message.
    ///
    /// # Errors
    ///
    /// Returns an error if the session is not authenticated or the server
    /// does not answer 250.
    pub async fn restore(&self, id: &str) -> Result<()> {
        self.simple(Command::Restore { id: id.to_string() }).await
    }

    /// Sets the user's presence status.
    ///
    /// # Errors
    ///
    /// Returns an error if the session is not authenticated or the server
    /// does not answer 250.
    pub async fn set_presence(&self, status: PresenceStatus) -> Result<()> {
        self.simple(Command::SetStat { status }).await
    }

    /// Lists online users.
    ///
    /// # Errors
    ///
    /// Returns an error if the session is not authenticated or the request
    /// fails.
    pub async fn get_presence(&self) -> Result<Vec<PresenceEntry>> {
        self.ensure_authenticated()?;
        let lines = self.observe(self.channel.multi_request(&Command::Who).await)?;
        ensure_completed(&lines)?;
        Ok(parse_presence(&lines))
    }

    /// Returns the server statistics line.
    ///
    /// Never fails: if the query cannot be answered the zero-valued line
    /// `211 M:0 S:0 U:0` is returned. Use [`ServerStats::parse`] for the
    /// individual counters.
    pub async fn get_stats(&self) -> String {
        if self.ensure_authenticated().is_err() {
            return ServerStats::DEFAULT_LINE.to_string();
        }
        match self.observe(self.channel.request(&Command::Stat).await) {
            Ok(reply) => reply.to_string(),
            Err(e) => {
                tracing::debug!(error = %e, "Statistics unavailable");
                ServerStats::DEFAULT_LINE.to_string()
            }
        }
    }

    /// Probes the connection with `NOOP`.
    ///
    /// Returns true if the server answered 250.
    pub async fn ping(&self) -> bool {
        if self.ensure_authenticated().is_err() {
            return false;
        }
        self.observe(self.channel.request(&Command::Noop).await)
            .is_ok_and(|reply| reply.is(ReplyCode::OK))
    }

    /// Sends a single-line command that must be answered with 250.
    async fn simple(&self, command: Command) -> Result<()> {
        self.ensure_authenticated()?;
        let reply = self.observe(self.channel.request(&command).await)?;
        reply.expect(ReplyCode::OK)?;
        Ok(())
    }

    /// Binds the notification socket and returns it with its port.
    async fn bind_notification_socket(&self) -> Result<(UdpSocket, u16)> {
        let socket = UdpSocket::bind(self.config.notify_addr()).await?;
        let port = socket.local_addr()?.port();
        Ok((socket, port))
    }

    /// Connects and runs `HELO` + `AUTH`, announcing `notify_port`.
    async fn handshake(&self, username: &str, password: &str, notify_port: u16) -> Result<()> {
        let stream = self
            .connector
            .connect(&self.config.host, self.config.port)
            .await?;
        self.channel.attach(stream).await;

        let helo = self
            .channel
            .request(&Command::Helo {
                username: username.to_string(),
                notify_port,
            })
            .await?;
        if !helo.is(ReplyCode::OK) {
            return Err(ProtoError::AuthRejected(helo.to_string()).into());
        }

        let auth = self
            .channel
            .request(&Command::Auth {
                username: username.to_string(),
                password: password.to_string(),
            })
            .await?;
        if !auth.is(ReplyCode::AUTH_ACCEPTED) {
            return Err(ProtoError::AuthRejected(auth.to_string()).into());
        }
        Ok(())
    }

    /// Re-establishes the command connection with the cached credentials.
    ///
    /// On failure the session gives up: it ends disconnected and needs a
    /// fresh login.
    async fn recover(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;

        match self.state() {
            ConnectionState::Degraded => {}
            // Another task recovered while we waited.
            ConnectionState::Authenticated => return Ok(()),
            ConnectionState::Disconnected | ConnectionState::Connecting => {
                return Err(ProtoError::Disconnected.into());
            }
        }

        let Some(credentials) = self.credentials.lock().await.clone() else {
            self.set_state(ConnectionState::Disconnected);
            return Err(ProtoError::Disconnected.into());
        };

        tracing::info!(
            host = %self.config.host,
            port = self.config.port,
            username = %credentials.username,
            "Attempting to reconnect"
        );
        self.channel.close().await;

        let notify_port = self
            .notification_addr()
            .await
            .map_or(self.config.notify_port, |addr| addr.port());
        match self
            .handshake(&credentials.username, &credentials.password, notify_port)
            .await
        {
            Ok(()) => {
                self.set_state(ConnectionState::Authenticated);
                tracing::info!(username = %credentials.username, "Reconnected");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "Reconnect failed, giving up");
                self.teardown().await;
                *self.credentials.lock().await = None;
                self.set_state(ConnectionState::Disconnected);
                Err(e)
            }
        }
    }

    /// Closes the command connection and stops the listener.
    async fn teardown(&self) {
        self.channel.quit().await;
        let listener = self.listener.lock().await.take();
        if let Some(listener) = listener {
            listener.shutdown(self.config.listener_join_timeout).await;
        }
    }

    fn ensure_authenticated(&self) -> Result<()> {
        if self.state().is_authenticated() {
            Ok(())
        } else {
            Err(ProtoError::Disconnected.into())
        }
    }

    /// Moves to `Degraded` if `result` reports a connection fault.
    fn observe<T>(&self, result: maillite_proto::Result<T>) -> Result<T> {
        if let Err(e) = &result {
            self.degrade(e);
        }
        result.map_err(Error::from)
    }

    fn degrade(&self, error: &ProtoError) {
        if !error.is_connection_fault() {
            return;
        }
        let changed = self.state.send_if_modified(|state| {
            if *state == ConnectionState::Authenticated {
                *state = ConnectionState::Degraded;
                true
            } else {
                false
            }
        });
        if changed {
            tracing::warn!(error = %error, "Command connection lost");
        }
    }

    fn set_state(&self, next: ConnectionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            tracing::debug!(from = %previous, to = %next, "Session state changed");
        }
    }
}

fn validate_username(username: &str) -> Result<()> {
    if username.is_empty() || username.contains(char::is_whitespace) {
        return Err(ProtoError::InvalidInput(
            "username must be a single non-empty word".into(),
        )
        .into());
    }
    Ok(())
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

    #[test]
    fn test_new_session_is_disconnected() {
        let session = Session::new(SessionConfig::new("localhost"));
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert!(!session.watch_state().borrow().is_authenticated());
    }

    #[test]
    fn test_credentials_debug_is_redacted() {
        let credentials = Credentials {
            username: "alice".into(),
            password: "secret".into(),
        };
        let debug = format!("{credentials:?}");
        assert!(debug.contains("alice"));
        assert!(!debug.contains("secret"));
    }

    #[test]
    fn test_validate_username() {
        assert!(validate_username("alice").is_ok());
        assert!(validate_username("").is_err());
        assert!(validate_username("al ice").is_err());
    }

    #[tokio::test]
    async fn test_operations_require_login() {
        let session = Session::new(SessionConfig::new("localhost"));

        assert!(
            session
                .list_folder(Folder::Inbox)
                .await
                .unwrap_err()
                .is_disconnected()
        );
        assert!(session.fetch_message("1").await.unwrap_err().is_disconnected());
        assert!(session.archive("1").await.unwrap_err().is_disconnected());
        assert!(
            session
                .send_message("bob", "Hi", "body")
                .await
                .unwrap_err()
                .is_disconnected()
        );
        assert_eq!(session.get_stats().await, "211 M:0 S:0 U:0");
        assert!(!session.ping().await);
    }

    #[tokio::test]
    async fn test_send_validates_before_state() {
        let session = Session::new(SessionConfig::new("localhost"));
        let err = session.send_message(" , ", "Hi", "body").await.unwrap_err();
        assert!(matches!(
            err.protocol(),
            Some(ProtoError::InvalidRecipients(_))
        ));
    }
}
