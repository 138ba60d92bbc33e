//! Folder and message types.

use chrono::{DateTime, Utc};

/// One of the three fixed message partitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Folder {
    /// Messages received by the user.
    Inbox,
    /// Messages the user sent.
    Sent,
    /// Messages the user archived.
    Archive,
}

impl Folder {
    /// All folders, in display order.
    pub const ALL: [Self; 3] = [Self::Inbox, Self::Sent, Self::Archive];

    /// Returns the wire name of the folder.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Inbox => "INBOX",
            Self::Sent => "SENT",
            Self::Archive => "ARCHIVE",
        }
    }

    /// Returns true if every message listed in this folder counts as read.
    ///
    /// The listing endpoint cannot report per-recipient read state, so
    /// only folders whose contents the user has already handled are
    /// pre-seeded as read.
    #[must_use]
    pub const fn is_always_read(self) -> bool {
        matches!(self, Self::Sent | Self::Archive)
    }

    /// Parses a folder name, ignoring ASCII case.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|folder| folder.as_str().eq_ignore_ascii_case(name))
    }
}

impl std::fmt::Display for Folder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Listing entry for a message.
///
/// Recipients and body are not part of a listing; fetch the message by id
/// to get them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageSummary {
    /// Opaque message identifier.
    pub id: String,
    /// Sender username.
    pub from: String,
    /// Size in bytes as reported by the server.
    pub size: u64,
    /// Timestamp in milliseconds since the Unix epoch.
    pub timestamp_ms: i64,
    /// Message subject.
    pub subject: String,
    /// Whether the message counts as read.
    pub read: bool,
}

impl MessageSummary {
    /// Returns the timestamp as a UTC date.
    #[must_use]
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.timestamp_ms)
    }
}

/// A message fetched by id.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FullMessage {
    /// Opaque message identifier.
    pub id: String,
    /// Sender username.
    pub from: String,
    /// Comma-separated recipient list.
    pub to: String,
    /// Message subject.
    pub subject: String,
    /// Message body.
    pub body: String,
    /// Timestamp in milliseconds since the Unix epoch.
    pub timestamp_ms: i64,
}

impl FullMessage {
    /// Returns the timestamp as a UTC date.
    #[must_use]
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.timestamp_ms)
    }

    /// Returns the individual recipients.
    pub fn recipients(&self) -> impl Iterator<Item = &str> {
        self.to.split(',').map(str::trim).filter(|r| !r.is_empty())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn folder_names() {
        assert_eq!(Folder::Inbox.as_str(), "INBOX");
        assert_eq!(Folder::Sent.to_string(), "SENT");
        assert_eq!(Folder::from_name("archive"), Some(Folder::Archive));
        assert_eq!(Folder::from_name("drafts"), None);
    }

    #[test]
    fn always_read_folders() {
        assert!(!Folder::Inbox.is_always_read());
        assert!(Folder::Sent.is_always_read());
        assert!(Folder::Archive.is_always_read());
    }

    #[test]
    fn timestamp_conversion() {
        let summary = MessageSummary {
            id: "1".into(),
            from: "bob".into(),
            size: 12,
            timestamp_ms: 1_700_000_000_000,
            subject: "hi".into(),
            read: false,
        };
        assert_eq!(summary.timestamp().unwrap().timestamp(), 1_700_000_000);
    }

    #[test]
    fn recipients_split() {
        let message = FullMessage {
            to: "alice, bob,,carol".into(),
            ..FullMessage::default()
        };
        let recipients: Vec<_> = message.recipients().collect();
        assert_eq!(recipients, vec!["alice", "bob", "carol"]);
    }
}
