//! New-mail push notifications.
//!
//! The server announces new mail with `NOTIFY NEWMAIL <username> <count>`
//! datagrams sent to the port the client announced in `HELO`. Delivery is
//! fire-and-forget: datagrams may be lost or duplicated, so observers must
//! treat every notification as a hint to refresh.

use std::sync::{Arc, PoisonError, RwLock};

mod listener;

pub use listener::{DEFAULT_POLL_INTERVAL, MAX_DATAGRAM_SIZE, NotificationListener};

/// A parsed new-mail notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// User the mail arrived for.
    pub username: String,
    /// Number of new messages reported.
    pub count: u32,
}

/// Parses a `NOTIFY NEWMAIL <username> <count>` payload.
///
/// Trailing tokens are ignored. Returns `None` for anything else.
#[must_use]
pub fn parse_notification(payload: &str) -> Option<Notification> {
    let mut tokens = payload.split_whitespace();
    if tokens.next()? != "NOTIFY" || tokens.next()? != "NEWMAIL" {
        return None;
    }
    let username = tokens.next()?;
    let count = tokens.next()?.parse().ok()?;

    Some(Notification {
        username: username.to_string(),
        count,
    })
}

/// Receives new-mail notifications.
///
/// Called on the listener task. Implementations must return quickly and hand
/// slow work such as a refetch to another task.
pub trait NotificationObserver: Send + Sync {
    /// Handles a new-mail notification.
    fn on_new_mail(&self, username: &str, count: u32);
}

impl<F> NotificationObserver for F
where
    F: Fn(&str, u32) + Send + Sync,
{
    fn on_new_mail(&self, username: &str, count: u32) {
        self(username, count);
    }
}

/// Single-subscriber slot shared between a session and its listener.
///
/// Registering a new observer replaces the previous one.
#[derive(Clone, Default)]
pub struct ObserverSlot {
    inner: Arc<RwLock<Option<Arc<dyn NotificationObserver>>>>,
}

impl ObserverSlot {
    /// Creates an empty slot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs an observer, replacing any previous one.
    pub fn set(&self, observer: Arc<dyn NotificationObserver>) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = Some(observer);
    }

    /// Removes the observer.
    pub fn clear(&self) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Returns true if an observer is installed.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Delivers a notification to the observer, if any.
    ///
    /// Returns true if an observer was called.
    pub fn notify(&self, notification: &Notification) -> bool {
        // Clone out of the lock so the callback never runs under it.
        let observer = self
            .inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match observer {
            Some(observer) => {
                observer.on_new_mail(&notification.username, notification.count);
                true
            }
            None => false,
        }
    }
}

impl std::fmt::Debug for ObserverSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverSlot")
            .field("is_set", &self.is_set())
            .finish()
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
    use std::sync::Mutex;

    #[test]
    fn test_parse_notification() {
        assert_eq!(
            parse_notification("NOTIFY NEWMAIL alice 3"),
            Some(Notification {
                username: "alice".into(),
                count: 3
            })
        );
        assert_eq!(
            parse_notification("  NOTIFY NEWMAIL bob 1 extra\n").map(|n| n.count),
            Some(1)
        );
    }

    #[test]
    fn test_parse_notification_malformed() {
        assert_eq!(parse_notification(""), None);
        assert_eq!(parse_notification("NOTIFY NEWMAIL alice"), None);
        assert_eq!(parse_notification("NOTIFY NEWMAIL alice many"), None);
        assert_eq!(parse_notification("NOTIFY NEWMAIL alice -1"), None);
        assert_eq!(parse_notification("NOTIFY PRESENCE alice 3"), None);
        assert_eq!(parse_notification("notify newmail alice 3"), None);
    }

    #[test]
    fn test_slot_delivers_to_latest_observer() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let slot = ObserverSlot::new();
        let notification = parse_notification("NOTIFY NEWMAIL alice 2").unwrap();

        assert!(!slot.notify(&notification));

        let replaced = Arc::new(Mutex::new(0u32));
        let replaced_sink = Arc::clone(&replaced);
        slot.set(Arc::new(move |_: &str, _: u32| {
            *replaced_sink.lock().unwrap() += 1;
        }));
        let sink = Arc::clone(&seen);
        slot.set(Arc::new(move |user: &str, count: u32| {
            sink.lock().unwrap().push((user.to_string(), count));
        }));

        assert!(slot.notify(&notification));
        assert_eq!(*seen.lock().unwrap(), vec![("alice".to_string(), 2)]);
        assert_eq!(*replaced.lock().unwrap(), 0);

        slot.clear();
        assert!(!slot.is_set());
        assert!(!slot.notify(&notification));
    }
}
