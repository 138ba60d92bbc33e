//! Integration tests for the session.
//!
//! Each connect hands out the next scripted transport, so reconnects can be
//! observed step by step.

use std::collections::VecDeque;
use std::io;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio_test::io::{Builder, Mock};

use maillite_core::{
    ConnectionState, Folder, PresenceStatus, ServerStats, Session, SessionConfig,
};
use maillite_proto::{Connector, Error as ProtoError};

/// Connector that replays one scripted transport per connect.
///
/// A `None` entry refuses that connect.
struct ScriptedConnector {
    scripts: Mutex<VecDeque<Option<Mock>>>,
    attempts: Arc<AtomicUsize>,
}

impl ScriptedConnector {
    fn new(scripts: Vec<Option<Mock>>) -> (Self, Arc<AtomicUsize>) {
        let attempts = Arc::new(AtomicUsize::new(0));
        let connector = Self {
            scripts: Mutex::new(scripts.into()),
            attempts: Arc::clone(&attempts),
        };
        (connector, attempts)
    }
}

impl Connector for ScriptedConnector {
    type Stream = Mock;

    async fn connect(&self, host: &str, port: u16) -> maillite_proto::Result<Mock> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let next = self.scripts.lock().unwrap().pop_front().flatten();
        next.ok_or_else(|| ProtoError::ConnectFailed {
            addr: format!("{host}:{port}"),
            source: io::Error::from(io::ErrorKind::ConnectionRefused),
        })
    }
}

/// Reserves a free local datagram port for the session to bind.
fn free_port() -> u16 {
    std::net::UdpSocket::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

fn config(notify_port: u16) -> SessionConfig {
    SessionConfig::builder("mail.test")
        .notify_port(notify_port)
        .notify_bind(IpAddr::V4(Ipv4Addr::LOCALHOST))
        .io_timeout(Duration::from_secs(5))
        .notify_poll_interval(Duration::from_millis(50))
        .build()
}

/// Script with a successful `HELO` + `AUTH` for alice.
fn login_script(notify_port: u16) -> Builder {
    let mut builder = Builder::new();
    builder
        .write(format!("HELO alice UDP:{notify_port}\n").as_bytes())
        .read(b"250 Hello alice\n")
        .write(b"AUTH alice secret\n")
        .read(b"235 Authenticated\n");
    builder
}

fn session(
    notify_port: u16,
    scripts: Vec<Option<Mock>>,
) -> (Session<ScriptedConnector>, Arc<AtomicUsize>) {
    let (connector, attempts) = ScriptedConnector::new(scripts);
    (Session::with_connector(config(notify_port), connector), attempts)
}

#[tokio::test]
async fn test_login_and_logout() {
    let port = free_port();
    let transport = login_script(port).write(b"QUIT\n").build();
    let (session, attempts) = session(port, vec![Some(transport)]);
    let mut states = session.watch_state();

    session.login("alice", "secret").await.unwrap();
    assert_eq!(session.state(), ConnectionState::Authenticated);
    assert!(states.has_changed().unwrap());
    assert_eq!(*states.borrow_and_update(), ConnectionState::Authenticated);
    assert_eq!(session.username().await.as_deref(), Some("alice"));
    assert_eq!(attempts.load(Ordering::SeqCst), 1);

    let addr = session.notification_addr().await.unwrap();
    assert_ne!(addr.port(), 0);

    session.logout().await;
    assert_eq!(session.state(), ConnectionState::Disconnected);
    assert!(session.notification_addr().await.is_none());
    assert!(session.username().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_login_passes_through_connecting() {
    let port = free_port();
    let transport = Builder::new()
        .write(format!("HELO alice UDP:{port}\n").as_bytes())
        .wait(Duration::from_secs(1))
        .read(b"250 Hello alice\n")
        .write(b"AUTH alice secret\n")
        .read(b"235 Authenticated\n")
        .write(b"QUIT\n")
        .build();
    let (session, _) = session(port, vec![Some(transport)]);
    let mut states = session.watch_state();
    assert_eq!(*states.borrow_and_update(), ConnectionState::Disconnected);

    let watcher = async {
        let mut seen = Vec::new();
        while !matches!(
            seen.last(),
            Some(ConnectionState::Authenticated | ConnectionState::Disconnected)
        ) {
            states.changed().await.unwrap();
            seen.push(*states.borrow_and_update());
        }
        seen
    };
    let (login, seen) = tokio::join!(session.login("alice", "secret"), watcher);

    login.unwrap();
    assert_eq!(
        seen,
        vec![ConnectionState::Connecting, ConnectionState::Authenticated]
    );

    session.logout().await;
}

/// Connector handing out one in-memory pipe.
struct PipeConnector {
    client: Mutex<Option<DuplexStream>>,
}

impl Connector for PipeConnector {
    type Stream = DuplexStream;

    async fn connect(&self, host: &str, port: u16) -> maillite_proto::Result<DuplexStream> {
        let next = self.client.lock().unwrap().take();
        next.ok_or_else(|| ProtoError::ConnectFailed {
            addr: format!("{host}:{port}"),
            source: io::Error::from(io::ErrorKind::ConnectionRefused),
        })
    }
}

#[tokio::test]
async fn test_ephemeral_notify_port_is_announced() {
    let (client, server) = tokio::io::duplex(4096);
    let server = tokio::spawn(async move {
        let (read, mut write) = tokio::io::split(server);
        let mut lines = BufReader::new(read).lines();
        let mut helo = None;

        while let Some(line) = lines.next_line().await.unwrap() {
            let reply: &[u8] = if line.starts_with("HELO") {
                helo = Some(line);
                b"250 Hello\n"
            } else if line.starts_with("AUTH") {
                b"235 Authenticated\n"
            } else {
                break;
            };
            write.write_all(reply).await.unwrap();
        }
        helo
    });

    let connector = PipeConnector {
        client: Mutex::new(Some(client)),
    };
    let session = Session::with_connector(config(0), connector);
    session.login("alice", "secret").await.unwrap();

    let addr = session.notification_addr().await.unwrap();
    assert_ne!(addr.port(), 0);

    session.logout().await;
    let helo = server.await.unwrap().unwrap();
    assert_eq!(helo, format!("HELO alice UDP:{}", addr.port()));
}

#[tokio::test]
async fn test_login_auth_rejected() {
    let port = free_port();
    let transport = Builder::new()
        .write(format!("HELO alice UDP:{port}\n").as_bytes())
        .read(b"250 Hello alice\n")
        .write(b"AUTH alice wrong\n")
        .read(b"535 Authentication failed\n")
        .build();
    let (session, _) = session(port, vec![Some(transport)]);

    let err = session.login("alice", "wrong").await.unwrap_err();
    match err.protocol() {
        Some(ProtoError::AuthRejected(reply)) => assert!(reply.starts_with("535")),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(session.state(), ConnectionState::Disconnected);
    assert!(session.notification_addr().await.is_none());
}

#[tokio::test]
async fn test_login_helo_rejected() {
    let port = free_port();
    let transport = Builder::new()
        .write(format!("HELO alice UDP:{port}\n").as_bytes())
        .read(b"550 Unknown user\n")
        .build();
    let (session, _) = session(port, vec![Some(transport)]);

    let err = session.login("alice", "secret").await.unwrap_err();
    assert!(matches!(err.protocol(), Some(ProtoError::AuthRejected(_))));
    assert_eq!(session.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_login_connect_refused() {
    let port = free_port();
    let (session, attempts) = session(port, vec![None]);

    let err = session.login("alice", "secret").await.unwrap_err();
    assert!(matches!(
        err.protocol(),
        Some(ProtoError::ConnectFailed { .. })
    ));
    assert_eq!(session.state(), ConnectionState::Disconnected);
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_login_rejects_bad_username_without_connecting() {
    let port = free_port();
    let (session, attempts) = session(port, vec![]);

    let err = session.login("al ice", "secret").await.unwrap_err();
    assert!(matches!(err.protocol(), Some(ProtoError::InvalidInput(_))));
    assert_eq!(attempts.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_send_blank_recipients_sends_nothing() {
    let port = free_port();
    let transport = login_script(port).write(b"QUIT\n").build();
    let (session, _) = session(port, vec![Some(transport)]);
    session.login("alice", "secret").await.unwrap();

    let err = session.send_message(" , ,", "Hi", "body").await.unwrap_err();
    assert!(matches!(
        err.protocol(),
        Some(ProtoError::InvalidRecipients(_))
    ));
    assert_eq!(session.state(), ConnectionState::Authenticated);

    session.logout().await;
}

#[tokio::test]
async fn test_send_message() {
    let port = free_port();
    let transport = login_script(port)
        .write(b"SEND\n")
        .read(b"354 Continue\n")
        .write(b"FROM:alice TO:bob,carol SUBJ:Lunch BODYLEN:5\n")
        .read(b"354 Send body\n")
        .write(b"Noon?\n")
        .read(b"250 MSGID 1700000000000-1\n")
        .write(b"QUIT\n")
        .build();
    let (session, _) = session(port, vec![Some(transport)]);
    session.login("alice", "secret").await.unwrap();

    let id = session
        .send_message("bob, ca rol ,", "Lunch", "Noon?")
        .await
        .unwrap();
    assert_eq!(id.as_deref(), Some("1700000000000-1"));

    session.logout().await;
}

#[tokio::test]
async fn test_send_reconnects_and_retries_once() {
    let port = free_port();
    let dead = login_script(port).write(b"SEND\n").build();
    let fresh = login_script(port)
        .write(b"SEND\n")
        .read(b"354 Continue\n")
        .write(b"FROM:alice TO:bob SUBJ:Hi BODYLEN:2\n")
        .read(b"354 Send body\n")
        .write(b"yo\n")
        .read(b"250 OK\n")
        .write(b"QUIT\n")
        .build();
    let (session, attempts) = session(port, vec![Some(dead), Some(fresh)]);
    session.login("alice", "secret").await.unwrap();

    let id = session.send_message("bob", "Hi", "yo").await.unwrap();
    assert_eq!(id, None);
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert_eq!(session.state(), ConnectionState::Authenticated);

    session.logout().await;
}

#[tokio::test]
async fn test_send_gives_up_when_reconnect_fails() {
    let port = free_port();
    let dead = login_script(port).write(b"SEND\n").build();
    let (session, attempts) = session(port, vec![Some(dead), None]);
    session.login("alice", "secret").await.unwrap();

    let err = session.send_message("bob", "Hi", "yo").await.unwrap_err();
    assert!(matches!(
        err.protocol(),
        Some(ProtoError::ConnectFailed { .. })
    ));
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert_eq!(session.state(), ConnectionState::Disconnected);
    assert!(session.notification_addr().await.is_none());

    // A fresh login is required now.
    assert!(session.send_message("bob", "Hi", "yo").await.unwrap_err().is_disconnected());
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_send_retries_only_once() {
    let port = free_port();
    let first = login_script(port).write(b"SEND\n").build();
    let second = login_script(port).write(b"SEND\n").build();
    let (session, attempts) = session(port, vec![Some(first), Some(second)]);
    session.login("alice", "secret").await.unwrap();

    let err = session.send_message("bob", "Hi", "yo").await.unwrap_err();
    assert!(err.is_disconnected());
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert_eq!(session.state(), ConnectionState::Degraded);

    // Other operations fail fast while degraded.
    let err = session.list_folder(Folder::Inbox).await.unwrap_err();
    assert!(err.is_disconnected());
    assert_eq!(attempts.load(Ordering::SeqCst), 2);

    session.logout().await;
    assert_eq!(session.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_send_rejected_step_keeps_connection() {
    let port = free_port();
    let transport = login_script(port)
        .write(b"SEND\n")
        .read(b"354 Continue\n")
        .write(b"FROM:alice TO:nobody SUBJ:Hi BODYLEN:2\n")
        .read(b"550 Unknown recipient nobody\n")
        .write(b"NOOP\n")
        .read(b"250 OK\n")
        .write(b"QUIT\n")
        .build();
    let (session, attempts) = session(port, vec![Some(transport)]);
    session.login("alice", "secret").await.unwrap();

    let err = session.send_message("nobody", "Hi", "yo").await.unwrap_err();
    assert!(matches!(err.protocol(), Some(ProtoError::NotFound(_))));
    assert_eq!(session.state(), ConnectionState::Authenticated);
    assert!(session.ping().await);
    assert_eq!(attempts.load(Ordering::SeqCst), 1);

    session.logout().await;
}

#[tokio::test]
async fn test_fetch_message() {
    let port = free_port();
    let transport = login_script(port)
        .write(b"RETR 1700000000000-1\n")
        .read(b"214 FROM:bob\n214 TO: alice\n214 SUBJ:Hi\n214 TIMESTAMP:1700000000000\n")
        .read(b"214 BODY\nline one\n\n214 looks like a reply\n214 END\n")
        .write(b"RETR 9\n")
        .read(b"550 No such message\n")
        .write(b"QUIT\n")
        .build();
    let (session, _) = session(port, vec![Some(transport)]);
    session.login("alice", "secret").await.unwrap();

    let message = session
        .fetch_message("1700000000000-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(message.from, "bob");
    assert_eq!(message.to, "alice");
    assert_eq!(message.subject, "Hi");
    assert_eq!(message.timestamp_ms, 1_700_000_000_000);
    assert_eq!(message.body, "line one\n\n214 looks like a reply");

    assert!(session.fetch_message("9").await.unwrap().is_none());
    assert_eq!(session.state(), ConnectionState::Authenticated);

    session.logout().await;
}

#[tokio::test]
async fn test_mark_read_is_local_first() {
    let port = free_port();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("read_state.json");

    let transport = login_script(port)
        .write(b"MARK 1\n")
        .read(b"250 OK\n")
        .write(b"LIST INBOX\n")
        .read(b"213 1 bob 5 1700000000000 Hello\n")
        .read(b"213 2 carol 6 1700000000001 Hey there\n213 END\n")
        .write(b"QUIT\n")
        .build();
    let (connector, _) = ScriptedConnector::new(vec![Some(transport)]);
    let config = SessionConfig {
        read_state_path: Some(path.clone()),
        ..config(port)
    };
    let session = Session::with_connector(config, connector);
    session.login("alice", "secret").await.unwrap();

    assert!(session.mark_read("1").await.unwrap());
    // Already seen: no traffic.
    assert!(!session.mark_read("1").await.unwrap());
    assert!(session.is_seen("1").await);

    let summaries = session.list_folder(Folder::Inbox).await.unwrap();
    let flags: Vec<_> = summaries.iter().map(|s| (s.id.as_str(), s.read)).collect();
    assert_eq!(flags, vec![("1", true), ("2", false)]);
    assert_eq!(summaries[1].subject, "Hey there");

    session.logout().await;

    let contents = std::fs::read_to_string(&path).unwrap();
    assert!(contents.contains("\"1\""));
}

#[tokio::test]
async fn test_list_sent_is_read() {
    let port = free_port();
    let transport = login_script(port)
        .write(b"LIST SENT\n")
        .read(b"213 5 alice 3 1700000000000\n213 END\n")
        .write(b"QUIT\n")
        .build();
    let (session, _) = session(port, vec![Some(transport)]);
    session.login("alice", "secret").await.unwrap();

    let summaries = session.list_folder(Folder::Sent).await.unwrap();
    assert_eq!(summaries.len(), 1);
    assert!(summaries[0].read);
    assert_eq!(summaries[0].subject, "No Subject");

    session.logout().await;
}

#[tokio::test]
async fn test_truncated_listing_degrades() {
    let port = free_port();
    let transport = login_script(port)
        .write(b"LIST INBOX\n")
        .read(b"213 1 bob 5 1700000000000 Hello\n")
        .build();
    let (session, _) = session(port, vec![Some(transport)]);
    session.login("alice", "secret").await.unwrap();

    let err = session.list_folder(Folder::Inbox).await.unwrap_err();
    match err.protocol() {
        Some(ProtoError::Truncated { collected }) => assert_eq!(collected.len(), 1),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(session.state(), ConnectionState::Degraded);

    session.logout().await;
}

#[tokio::test]
async fn test_folder_moves_and_presence() {
    let port = free_port();
    let transport = login_script(port)
        .write(b"DELE 1\n")
        .read(b"250 OK\n")
        .write(b"RESTORE 1\n")
        .read(b"250 OK\n")
        .write(b"DELE 2\n")
        .read(b"550 No such message\n")
        .write(b"SETSTAT BUSY\n")
        .read(b"250 OK\n")
        .write(b"WHO\n")
        .read(b"212U alice BUSY 127.0.0.1:5555 1700000000000\n212U bob\n212 END\n")
        .write(b"QUIT\n")
        .build();
    let (session, _) = session(port, vec![Some(transport)]);
    session.login("alice", "secret").await.unwrap();

    session.archive("1").await.unwrap();
    session.restore("1").await.unwrap();
    let err = session.archive("2").await.unwrap_err();
    assert!(matches!(err.protocol(), Some(ProtoError::NotFound(_))));

    session.set_presence(PresenceStatus::Busy).await.unwrap();
    let online = session.get_presence().await.unwrap();
    assert_eq!(online.len(), 2);
    assert_eq!(online[0].status, PresenceStatus::Busy);
    assert_eq!(online[0].address.as_deref(), Some("127.0.0.1:5555"));
    assert_eq!(online[1].username, "bob");
    assert_eq!(online[1].status, PresenceStatus::Active);

    session.logout().await;
}

#[tokio::test]
async fn test_stats_and_ping() {
    let port = free_port();
    let transport = login_script(port)
        .write(b"STAT\n")
        .read(b"211 M:4 S:2 U:1\n")
        .write(b"NOOP\n")
        .read(b"250 OK\n")
        .write(b"QUIT\n")
        .build();
    let (session, _) = session(port, vec![Some(transport)]);
    session.login("alice", "secret").await.unwrap();

    let line = session.get_stats().await;
    assert_eq!(line, "211 M:4 S:2 U:1");
    let stats = ServerStats::parse(&line).unwrap();
    assert_eq!(stats.mail, 4);
    assert_eq!(stats.users_online, 1);

    assert!(session.ping().await);

    session.logout().await;
    assert_eq!(session.get_stats().await, ServerStats::DEFAULT_LINE);
}

#[tokio::test]
async fn test_new_mail_notification_reaches_observer() {
    let port = free_port();
    let transport = login_script(port).write(b"QUIT\n").build();
    let (session, _) = session(port, vec![Some(transport)]);

    let (tx, mut rx) = mpsc::unbounded_channel();
    session.on_new_mail(move |user: &str, count: u32| {
        let _ = tx.send((user.to_string(), count));
    });
    session.login("alice", "secret").await.unwrap();

    let addr = session.notification_addr().await.unwrap();
    let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    sender.send_to(b"garbage", addr).await.unwrap();
    sender.send_to(b"NOTIFY NEWMAIL alice 3", addr).await.unwrap();

    let received = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received, ("alice".to_string(), 3));

    session.logout().await;
}

#[tokio::test(start_paused = true)]
async fn test_timeout_degrades_then_send_recovers() {
    let port = free_port();
    let stalled = login_script(port)
        .write(b"NOOP\n")
        .wait(Duration::from_secs(60))
        .build();
    let fresh = login_script(port)
        .write(b"SEND\n")
        .read(b"354 Continue\n")
        .write(b"FROM:alice TO:bob SUBJ:Hi BODYLEN:2\n")
        .read(b"354 Send body\n")
        .write(b"yo\n")
        .read(b"250 MSGID 7\n")
        .write(b"QUIT\n")
        .build();
    let (session, attempts) = session(port, vec![Some(stalled), Some(fresh)]);
    session.login("alice", "secret").await.unwrap();

    assert!(!session.ping().await);
    assert_eq!(session.state(), ConnectionState::Degraded);
    assert_eq!(session.get_stats().await, "211 M:0 S:0 U:0");
    assert!(
        session
            .fetch_message("1")
            .await
            .unwrap_err()
            .is_disconnected()
    );
    assert_eq!(attempts.load(Ordering::SeqCst), 1);

    let id = session.send_message("bob", "Hi", "yo").await.unwrap();
    assert_eq!(id.as_deref(), Some("7"));
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert_eq!(session.state(), ConnectionState::Authenticated);

    session.logout().await;
}

#[tokio::test]
async fn test_relogin_replaces_connection() {
    let port = free_port();
    let first = login_script(port).write(b"QUIT\n").build();
    let second = login_script(port).write(b"QUIT\n").build();
    let (session, attempts) = session(port, vec![Some(first), Some(second)]);

    session.login("alice", "secret").await.unwrap();
    session.login("alice", "secret").await.unwrap();
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert_eq!(session.state(), ConnectionState::Authenticated);

    session.logout().await;
}
