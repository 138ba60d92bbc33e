//! Integration tests for the command channel.
//!
//! These tests run the channel against in-process fake servers over
//! in-memory pipes and loopback TCP.

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::net::TcpListener;

use maillite_proto::parser::{parse_full_message, parse_listing};
use maillite_proto::{
    Command, CommandChannel, Connector, Error, Folder, ReplyCode, Submission, TcpConnector,
};

/// Serves `commands` requests, failing if the client writes anything while a
/// reply is still owed.
async fn strict_server(stream: DuplexStream, commands: usize) -> Vec<String> {
    let (read, mut write) = tokio::io::split(stream);
    let mut reader = BufReader::new(read);
    let mut received = Vec::new();

    for _ in 0..commands {
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        let line = line.trim_end().to_string();

        let early = tokio::time::timeout(Duration::from_millis(100), reader.fill_buf()).await;
        assert!(early.is_err(), "client sent data before the reply to {line:?}");

        if line.starts_with("LIST") {
            write.write_all(b"213 1 bob 5 1700000000000 One\n").await.unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
            write.write_all(b"213 2 carol 6 1700000000001 Two\n213 END\n").await.unwrap();
        } else {
            write.write_all(b"250 OK\n").await.unwrap();
        }
        received.push(line);
    }
    received
}

#[tokio::test]
async fn test_concurrent_requests_are_serialized() {
    let (client, server) = tokio::io::duplex(4096);
    let channel = CommandChannel::with_stream(client, Duration::from_secs(5));
    let server = tokio::spawn(strict_server(server, 3));

    let list = Command::List {
        folder: Folder::Inbox,
    };
    let mark_cmd = Command::Mark { id: "1".into() };
    let (noop, listing, mark) = tokio::join!(
        channel.request(&Command::Noop),
        channel.multi_request(&list),
        channel.request(&mark_cmd),
    );

    assert_eq!(noop.unwrap().code, ReplyCode::OK);
    assert_eq!(mark.unwrap().code, ReplyCode::OK);
    let summaries = parse_listing(&listing.unwrap(), Folder::Inbox);
    assert_eq!(summaries.len(), 2);

    let mut received = server.await.unwrap();
    received.sort();
    assert_eq!(received, vec!["LIST INBOX", "MARK 1", "NOOP"]);
}

#[tokio::test]
async fn test_session_exchange_over_tcp() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let (read, mut write) = socket.into_split();
        let mut lines = BufReader::new(read).lines();
        let mut transcript = Vec::new();

        while let Some(line) = lines.next_line().await.unwrap() {
            let reply: &[u8] = match line.as_str() {
                l if l.starts_with("HELO") => b"250 Hello alice\r\n",
                l if l.starts_with("AUTH") => b"235 Authenticated\r\n",
                "SEND" => b"354 Go ahead\r\n",
                l if l.starts_with("FROM:") => b"354 Send body\r\n",
                "hello bob" => b"250 MSGID 1700000000000-4\r\n",
                "RETR 1700000000000-4" => {
                    b"214 FROM:alice\r\n214 TO:bob\r\n214 SUBJ:Hi\r\n\
                      214 TIMESTAMP:1700000000000\r\n214 BODY\r\nhello bob\r\n214 END\r\n"
                }
                "RETR 99" => b"550 No such message\r\n",
                "QUIT" => {
                    transcript.push(line);
                    break;
                }
                _ => b"500 Unknown command\r\n",
            };
            transcript.push(line);
            write.write_all(reply).await.unwrap();
        }
        transcript
    });

    let stream = TcpConnector::default().connect("127.0.0.1", port).await.unwrap();
    let channel = CommandChannel::with_stream(stream, Duration::from_secs(5));

    channel
        .request(&Command::Helo {
            username: "alice".into(),
            notify_port: 5555,
        })
        .await
        .unwrap()
        .expect(ReplyCode::OK)
        .unwrap();
    channel
        .request(&Command::Auth {
            username: "alice".into(),
            password: "secret".into(),
        })
        .await
        .unwrap()
        .expect(ReplyCode::AUTH_ACCEPTED)
        .unwrap();

    let submission = Submission::new("alice", "bob", "Hi", "hello bob", 65536).unwrap();
    let id = channel.submit(&submission).await.unwrap().unwrap();
    assert_eq!(id, "1700000000000-4");

    let lines = channel
        .multi_request(&Command::Retr { id: id.clone() })
        .await
        .unwrap();
    let message = parse_full_message(&id, &lines).unwrap().unwrap();
    assert_eq!(message.from, "alice");
    assert_eq!(message.body, "hello bob");

    let lines = channel
        .multi_request(&Command::Retr { id: "99".into() })
        .await
        .unwrap();
    assert_eq!(parse_full_message("99", &lines).unwrap(), None);

    let unknown = channel.request(&Command::Who).await;
    assert!(matches!(unknown, Ok(reply) if reply.code.as_u16() == 500));

    channel.quit().await;
    assert!(matches!(
        channel.request(&Command::Noop).await,
        Err(Error::Disconnected)
    ));

    let transcript = server.await.unwrap();
    assert_eq!(transcript.first().map(String::as_str), Some("HELO alice UDP:5555"));
    assert_eq!(transcript.last().map(String::as_str), Some("QUIT"));
}
