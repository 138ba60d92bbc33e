//! Command builder.

use crate::error::{Error, Result};
use crate::types::{Folder, PresenceStatus};

/// Client command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// HELO - Greeting that announces the notification port
    Helo {
        /// Username
        username: String,
        /// Local datagram port for push notifications
        notify_port: u16,
    },
    /// AUTH - Authenticate
    Auth {
        /// Username
        username: String,
        /// Password
        password: String,
    },
    /// SEND - Begin message submission
    Send,
    /// Submission header line, sent after the first 354
    SendHeader {
        /// Sender username
        from: String,
        /// Normalized, comma-joined recipients
        to: String,
        /// Subject
        subject: String,
        /// Body length in characters
        body_len: usize,
    },
    /// LIST - List a folder
    List {
        /// Folder to list
        folder: Folder,
    },
    /// RETR - Fetch a full message
    Retr {
        /// Message id
        id: String,
    },
    /// WHO - Presence listing
    Who,
    /// MARK - Mark a message read
    Mark {
        /// Message id
        id: String,
    },
    /// DELE - Archive a message
    Dele {
        /// Message id
        id: String,
    },
    /// RESTORE - Restore an archived message
    Restore {
        /// Message id
        id: String,
    },
    /// SETSTAT - Set own presence status
    SetStat {
        /// New status
        status: PresenceStatus,
    },
    /// STAT - Server statistics
    Stat,
    /// NOOP - No operation
    Noop,
    /// QUIT - Close connection
    Quit,
}

impl Command {
    /// Returns the command verb.
    #[must_use]
    pub const fn verb(&self) -> &'static str {
        match self {
            Self::Helo { .. } => "HELO",
            Self::Auth { .. } => "AUTH",
            Self::Send => "SEND",
            Self::SendHeader { .. } => "FROM",
            Self::List { .. } => "LIST",
            Self::Retr { .. } => "RETR",
            Self::Who => "WHO",
            Self::Mark { .. } => "MARK",
            Self::Dele { .. } => "DELE",
            Self::Restore { .. } => "RESTORE",
            Self::SetStat { .. } => "SETSTAT",
            Self::Stat => "STAT",
            Self::Noop => "NOOP",
            Self::Quit => "QUIT",
        }
    }

    /// Serializes the command to a single line, without the terminator.
    #[must_use]
    pub fn to_line(&self) -> String {
        match self {
            Self::Helo {
                username,
                notify_port,
            } => format!("HELO {username} UDP:{notify_port}"),
            Self::Auth { username, password } => format!("AUTH {username} {password}"),
            Self::SendHeader {
                from,
                to,
                subject,
                body_len,
            } => format!("FROM:{from} TO:{to} SUBJ:{subject} BODYLEN:{body_len}"),
            Self::List { folder } => format!("LIST {folder}"),
            Self::Retr { id } => format!("RETR {id}"),
            Self::Mark { id } => format!("MARK {id}"),
            Self::Dele { id } => format!("DELE {id}"),
            Self::Restore { id } => format!("RESTORE {id}"),
            Self::SetStat { status } => format!("SETSTAT {status}"),
            Self::Send | Self::Who | Self::Stat | Self::Noop | Self::Quit => {
                self.verb().to_string()
            }
        }
    }

    /// Serializes the command to bytes, including the line terminator.
    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = self.to_line().into_bytes();
        buf.push(b'\n');
        buf
    }

    /// Returns the line as it should appear in logs.
    ///
    /// Credentials are masked.
    #[must_use]
    pub fn redacted(&self) -> String {
        match self {
            Self::Auth { username, .. } => format!("AUTH {username} ****"),
            _ => self.to_line(),
        }
    }

    /// Checks that every argument fits on a single line.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if an argument contains CR or LF.
    pub fn validate(&self) -> Result<()> {
        let fields: Vec<(&str, &str)> = match self {
            Self::Helo { username, .. } => vec![("username", username)],
            Self::Auth { username, password } => {
                vec![("username", username), ("password", password)]
            }
            Self::SendHeader {
                from, to, subject, ..
            } => vec![("from", from), ("to", to), ("subject", subject)],
            Self::Retr { id }
            | Self::Mark { id }
            | Self::Dele { id }
            | Self::Restore { id } => vec![("id", id)],
            _ => Vec::new(),
        };

        for (name, value) in fields {
            ensure_single_line(name, value)?;
        }
        Ok(())
    }
}

/// Rejects values that would break line framing.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] if `value` contains CR or LF.
pub fn ensure_single_line(field: &str, value: &str) -> Result<()> {
    if value.contains(['\r', '\n']) {
        return Err(Error::InvalidInput(format!(
            "{field} must not contain line breaks"
        )));
    }
    Ok(())
}

/// Normalizes a comma-separated recipient list.
///
/// Whitespace inside each entry is removed, blank entries are dropped and
/// input order is kept.
///
/// # Errors
///
/// Returns [`Error::InvalidRecipients`] if no recipient remains.
pub fn normalize_recipients(raw: &str) -> Result<Vec<String>> {
    let recipients: Vec<String> = raw
        .split(',')
        .map(|entry| entry.chars().filter(|c| !c.is_whitespace()).collect::<String>())
        .filter(|entry| !entry.is_empty())
        .collect();

    if recipients.is_empty() {
        return Err(Error::InvalidRecipients(raw.to_string()));
    }
    Ok(recipients)
}

/// A message ready for the three-step submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    from: String,
    to: Vec<String>,
    subject: String,
    body: String,
}

impl Submission {
    /// Builds and validates a submission.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRecipients`] if `to` holds no recipient,
    /// [`Error::InvalidInput`] if the subject is empty or a header field
    /// contains a line break, and [`Error::MessageTooLarge`] if the body
    /// exceeds `max_body_size` bytes.
    pub fn new(
        from: impl Into<String>,
        to: &str,
        subject: impl Into<String>,
        body: impl Into<String>,
        max_body_size: usize,
    ) -> Result<Self> {
        let from = from.into();
        let subject = subject.into();
        let body = body.into();

        ensure_single_line("to", to)?;
        let to = normalize_recipients(to)?;

        if subject.trim().is_empty() {
            return Err(Error::InvalidInput("subject must not be empty".into()));
        }
        ensure_single_line("subject", &subject)?;
        ensure_single_line("from", &from)?;

        if body.len() > max_body_size {
            return Err(Error::MessageTooLarge(body.len()));
        }

        Ok(Self {
            from,
            to,
            subject,
            body,
        })
    }

    /// Returns the normalized recipients.
    #[must_use]
    pub fn recipients(&self) -> &[String] {
        &self.to
    }

    /// Returns the subject.
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Returns the body.
    #[must_use]
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Returns the header command sent after the first 354.
    #[must_use]
    pub fn header(&self) -> Command {
        Command::SendHeader {
            from: self.from.clone(),
            to: self.to.join(","),
            subject: self.subject.clone(),
            body_len: self.body.chars().count(),
        }
    }

    /// Serializes the raw body followed by a line terminator.
    #[must_use]
    pub fn body_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.body.len() + 1);
        buf.extend_from_slice(self.body.as_bytes());
        buf.push(b'\n');
        buf
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
    use proptest::prelude::*;

    #[test]
    fn test_helo_command() {
        let cmd = Command::Helo {
            username: "alice".to_string(),
            notify_port: 5555,
        };
        assert_eq!(cmd.serialize(), b"HELO alice UDP:5555\n");
    }

    #[test]
    fn test_auth_command() {
        let cmd = Command::Auth {
            username: "alice".to_string(),
            password: "secret".to_string(),
        };
        assert_eq!(cmd.serialize(), b"AUTH alice secret\n");
        assert_eq!(cmd.redacted(), "AUTH alice ****");
    }

    #[test]
    fn test_simple_commands() {
        assert_eq!(Command::Send.serialize(), b"SEND\n");
        assert_eq!(Command::Who.serialize(), b"WHO\n");
        assert_eq!(Command::Stat.serialize(), b"STAT\n");
        assert_eq!(Command::Noop.serialize(), b"NOOP\n");
        assert_eq!(Command::Quit.serialize(), b"QUIT\n");
    }

    #[test]
    fn test_id_commands() {
        let id = "1700000000000-3".to_string();
        assert_eq!(
            Command::Retr { id: id.clone() }.to_line(),
            "RETR 1700000000000-3"
        );
        assert_eq!(
            Command::Mark { id: id.clone() }.to_line(),
            "MARK 1700000000000-3"
        );
        assert_eq!(
            Command::Dele { id: id.clone() }.to_line(),
            "DELE 1700000000000-3"
        );
        assert_eq!(Command::Restore { id }.to_line(), "RESTORE 1700000000000-3");
    }

    #[test]
    fn test_list_and_setstat() {
        assert_eq!(
            Command::List {
                folder: Folder::Archive
            }
            .to_line(),
            "LIST ARCHIVE"
        );
        assert_eq!(
            Command::SetStat {
                status: PresenceStatus::Away
            }
            .to_line(),
            "SETSTAT AWAY"
        );
    }

    #[test]
    fn test_validate_rejects_line_breaks() {
        let cmd = Command::Retr {
            id: "1\nQUIT".to_string(),
        };
        assert!(matches!(cmd.validate(), Err(Error::InvalidInput(_))));
        assert!(Command::Retr { id: "1".into() }.validate().is_ok());
    }

    #[test]
    fn test_normalize_recipients() {
        assert_eq!(normalize_recipients("a, ,b").unwrap(), vec!["a", "b"]);
        assert_eq!(
            normalize_recipients(" bo b ,carol").unwrap(),
            vec!["bob", "carol"]
        );
        assert!(matches!(
            normalize_recipients(" , ,"),
            Err(Error::InvalidRecipients(_))
        ));
        assert!(matches!(
            normalize_recipients(""),
            Err(Error::InvalidRecipients(_))
        ));
    }

    #[test]
    fn test_submission_header() {
        let submission = Submission::new("alice", "bob, carol", "Hi", "héllo", 65536).unwrap();
        assert_eq!(
            submission.header().to_line(),
            "FROM:alice TO:bob,carol SUBJ:Hi BODYLEN:5"
        );
        assert_eq!(submission.body_bytes(), "héllo\n".as_bytes());
    }

    #[test]
    fn test_submission_validation() {
        assert!(matches!(
            Submission::new("alice", " , ", "Hi", "body", 65536),
            Err(Error::InvalidRecipients(_))
        ));
        assert!(matches!(
            Submission::new("alice", "bob", "  ", "body", 65536),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            Submission::new("alice", "bob", "Hi\r\nQUIT", "body", 65536),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            Submission::new("alice", "bob", "Hi", "x".repeat(11), 10),
            Err(Error::MessageTooLarge(11))
        ));
    }

    proptest! {
        #[test]
        fn normalized_recipients_are_clean(raw in "[a-z ,\t]{0,40}") {
            if let Ok(recipients) = normalize_recipients(&raw) {
                prop_assert!(!recipients.is_empty());
                for recipient in &recipients {
                    prop_assert!(!recipient.is_empty());
                    prop_assert!(!recipient.contains(char::is_whitespace));
                    prop_assert!(!recipient.contains(','));
                }
            } else {
                prop_assert!(raw.chars().all(|c| c == ',' || c.is_whitespace()));
            }
        }

        #[test]
        fn normalization_preserves_order(names in proptest::collection::vec("[a-z]{1,8}", 1..6)) {
            let raw = names.join(" , ");
            prop_assert_eq!(normalize_recipients(&raw).unwrap(), names);
        }
    }
}
