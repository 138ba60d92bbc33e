//! Datagram receive loop.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::{ObserverSlot, parse_notification};
use crate::{Error, Result};

/// Default receive timeout between stop-signal checks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Largest datagram read; longer payloads are truncated by the socket.
pub const MAX_DATAGRAM_SIZE: usize = 1024;

/// Background task receiving new-mail notifications.
///
/// The task owns the socket. Dropping the listener signals it to stop
/// without waiting; call [`NotificationListener::shutdown`] to wait for
/// the socket to close.
#[derive(Debug)]
pub struct NotificationListener {
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl NotificationListener {
    /// Binds the socket and starts the receive loop.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the socket cannot be bound.
    pub async fn bind(
        addr: SocketAddr,
        poll_interval: Duration,
        observer: ObserverSlot,
    ) -> Result<Self> {
        let socket = UdpSocket::bind(addr).await.map_err(Error::Io)?;
        Self::spawn(socket, poll_interval, observer)
    }

    /// Starts the receive loop on an already bound socket.
    ///
    /// Lets the caller learn the bound port before notifications are
    /// dispatched.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the socket's local address is unavailable.
    pub fn spawn(
        socket: UdpSocket,
        poll_interval: Duration,
        observer: ObserverSlot,
    ) -> Result<Self> {
        let local_addr = socket.local_addr()?;
        let (shutdown, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(run(socket, poll_interval, observer, shutdown_rx));
        tracing::info!(%local_addr, "Notification listener started");

        Ok(Self {
            local_addr,
            shutdown,
            task: Some(task),
        })
    }

    /// Returns the bound address.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Returns true while the receive loop is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Signals the receive loop to stop without waiting for it.
    pub fn stop(&self) {
        self.shutdown.send_replace(true);
    }

    /// Stops the receive loop and waits up to `join_timeout` for it to exit.
    ///
    /// Returns true if the loop exited in time. A loop that does not is
    /// aborted.
    pub async fn shutdown(mut self, join_timeout: Duration) -> bool {
        self.stop();
        let Some(mut task) = self.task.take() else {
            return true;
        };

        match tokio::time::timeout(join_timeout, &mut task).await {
            Ok(_) => {
                tracing::info!(local_addr = %self.local_addr, "Notification listener stopped");
                true
            }
            Err(_) => {
                tracing::warn!(
                    local_addr = %self.local_addr,
                    ?join_timeout,
                    "Notification listener did not stop in time, aborting"
                );
                task.abort();
                false
            }
        }
    }
}

impl Drop for NotificationListener {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run(
    socket: UdpSocket,
    poll_interval: Duration,
    observer: ObserverSlot,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut buf = [0u8; MAX_DATAGRAM_SIZE];

    loop {
        if *shutdown.borrow_and_update() {
            break;
        }

        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            received = tokio::time::timeout(poll_interval, socket.recv_from(&mut buf)) => {
                match received {
                    // Receive timeout; only there to re-check the stop flag.
                    Err(_) => {}
                    Ok(Ok((len, peer))) => dispatch(&buf[..len], peer, &observer),
                    Ok(Err(e)) => {
                        tracing::warn!(error = %e, "Notification receive failed");
                        tokio::time::sleep(poll_interval).await;
                    }
                }
            }
        }
    }
}

fn dispatch(payload: &[u8], peer: SocketAddr, observer: &ObserverSlot) {
    let text = String::from_utf8_lossy(payload);
    let text = text.trim();

    match parse_notification(text) {
        Some(notification) => {
            tracing::debug!(
                %peer,
                username = %notification.username,
                count = notification.count,
                "New mail notification"
            );
            if !observer.notify(&notification) {
                tracing::debug!("No notification observer registered");
            }
        }
        None => tracing::warn!(%peer, payload = %text, "Discarding malformed notification"),
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
    use std::sync::Arc;
    use tokio::sync::mpsc;

    async fn listener_with_channel() -> (NotificationListener, mpsc::UnboundedReceiver<(String, u32)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let slot = ObserverSlot::new();
        slot.set(Arc::new(move |user: &str, count: u32| {
            let _ = tx.send((user.to_string(), count));
        }));
        let listener = NotificationListener::bind(
            "127.0.0.1:0".parse().unwrap(),
            Duration::from_millis(50),
            slot,
        )
        .await
        .unwrap();
        (listener, rx)
    }

    async fn send(listener: &NotificationListener, payload: &[u8]) {
        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        sender.send_to(payload, listener.local_addr()).await.unwrap();
    }

    #[tokio::test]
    async fn test_notification_delivered_once() {
        let (listener, mut rx) = listener_with_channel().await;

        send(&listener, b"NOTIFY NEWMAIL alice 3").await;

        let received = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, ("alice".to_string(), 3));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(rx.try_recv().is_err());

        assert!(listener.shutdown(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_malformed_notification_ignored() {
        let (listener, mut rx) = listener_with_channel().await;

        send(&listener, b"NOTIFY NEWMAIL alice").await;
        send(&listener, b"\xff\xfe garbage").await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(rx.try_recv().is_err());

        // The loop survives malformed payloads.
        send(&listener, b"NOTIFY NEWMAIL bob 1\n").await;
        let received = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, ("bob".to_string(), 1));
        assert!(rx.try_recv().is_err());

        listener.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_spawn_on_bound_socket() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let slot = ObserverSlot::new();
        slot.set(Arc::new(move |user: &str, count: u32| {
            let _ = tx.send((user.to_string(), count));
        }));

        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        let listener = NotificationListener::spawn(socket, Duration::from_millis(50), slot).unwrap();
        assert_eq!(listener.local_addr(), addr);

        send(&listener, b"NOTIFY NEWMAIL carol 2").await;
        let received = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, ("carol".to_string(), 2));

        assert!(listener.shutdown(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_shutdown_releases_socket() {
        let (listener, _rx) = listener_with_channel().await;
        let addr = listener.local_addr();
        assert!(listener.is_running());

        assert!(listener.shutdown(Duration::from_secs(1)).await);

        // The port can be bound again once the loop has exited.
        assert!(UdpSocket::bind(addr).await.is_ok());
    }

    #[tokio::test]
    async fn test_bind_conflict() {
        let (listener, _rx) = listener_with_channel().await;
        let result = NotificationListener::bind(
            listener.local_addr(),
            DEFAULT_POLL_INTERVAL,
            ObserverSlot::new(),
        )
        .await;
        assert!(matches!(result, Err(Error::Io(_))));
    }
}
