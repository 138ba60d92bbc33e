//! Reply framing and payload parsers.

use chrono::Utc;

use crate::error::{Error, Result};
use crate::types::{
    Folder, FullMessage, MessageSummary, PresenceEntry, PresenceStatus, Reply, ReplyCode,
};

/// Subject shown for listing rows that carry none.
pub const DEFAULT_SUBJECT: &str = "No Subject";

const BODY_MARKER: &str = "214 BODY";
const BODY_END: &str = "214 END";

/// Decides where a multi-line reply ends.
///
/// Payload streams (212, 213, 214) end with `<code> END`. Outside a message
/// body the first line carrying any other status code also ends the stream,
/// so a server that answers a listing with `550` or a bare `250` is not
/// waited on until timeout. Inside a `214 BODY` section every line is raw
/// body text and only `214 END` terminates.
#[derive(Debug, Default, Clone)]
pub struct ReplyFramer {
    in_body: bool,
}

impl ReplyFramer {
    /// Creates a framer for a fresh reply.
    #[must_use]
    pub const fn new() -> Self {
        Self { in_body: false }
    }

    /// Feeds one line and returns true if it terminates the reply.
    pub fn is_terminator(&mut self, line: &str) -> bool {
        let line = line.trim_end_matches(['\r', '\n']);

        if self.in_body {
            return line == BODY_END;
        }
        if line == BODY_MARKER {
            self.in_body = true;
            return false;
        }

        // Unclassifiable lines never end a stream; the caller's parser decides
        // what to do with them.
        Reply::parse(line).is_ok_and(|reply| is_end_marker(&reply) || !reply.code.is_payload())
    }

    /// Returns true while inside a message body.
    #[must_use]
    pub const fn in_body(&self) -> bool {
        self.in_body
    }
}

fn is_end_marker(reply: &Reply) -> bool {
    reply.code.is_payload() && reply.text == "END"
}

/// Checks the terminating line of a complete multi-line reply.
///
/// Streams ending in an `END` marker or a 2xx status are accepted.
///
/// # Errors
///
/// Returns [`Error::NotFound`] for a 550 terminator, [`Error::Rejected`] for
/// any other error status and [`Error::ProtocolViolation`] for an empty or
/// unclassifiable reply.
pub fn ensure_completed(lines: &[String]) -> Result<()> {
    let last = lines
        .last()
        .ok_or_else(|| Error::ProtocolViolation("empty reply".into()))?;
    let reply = Reply::parse(last)?;
    if reply.code.as_u16() < 400 {
        return Ok(());
    }
    reply.expect(ReplyCode::OK).map(|_| ())
}

/// Returns true if a line from a `LIST` reply is a message row.
///
/// The end marker and bare `213 <count>` lines are not rows.
#[must_use]
pub fn is_listing_row(line: &str) -> bool {
    let Some(rest) = line.trim_end_matches(['\r', '\n']).strip_prefix("213 ") else {
        return false;
    };
    let rest = rest.trim();
    !rest.is_empty() && rest != "END" && !rest.bytes().all(|b| b.is_ascii_digit())
}

/// Splits off the next whitespace-delimited token.
fn next_token(input: &str) -> Option<(&str, &str)> {
    let input = input.trim_start();
    if input.is_empty() {
        return None;
    }
    match input.split_once(char::is_whitespace) {
        Some((token, rest)) => Some((token, rest)),
        None => Some((input, "")),
    }
}

/// Parses a listing row `213 <id> <from> <size> <timestamp> [<subject>]`.
///
/// The read flag is pre-seeded from the folder. Returns `None` for lines
/// that are not rows or whose numeric fields do not parse.
#[must_use]
pub fn parse_summary_row(line: &str, folder: Folder) -> Option<MessageSummary> {
    if !is_listing_row(line) {
        return None;
    }
    let rest = line.trim_end_matches(['\r', '\n']).strip_prefix("213 ")?;

    let (id, rest) = next_token(rest)?;
    let (from, rest) = next_token(rest)?;
    let (size, rest) = next_token(rest)?;
    let (timestamp, rest) = next_token(rest)?;

    let subject = rest.trim();
    let subject = if subject.is_empty() {
        DEFAULT_SUBJECT
    } else {
        subject
    };

    Some(MessageSummary {
        id: id.to_string(),
        from: from.to_string(),
        size: size.parse().ok()?,
        timestamp_ms: timestamp.parse().ok()?,
        subject: subject.to_string(),
        read: folder.is_always_read(),
    })
}

/// Parses every row of a `LIST` reply, skipping markers and malformed rows.
#[must_use]
pub fn parse_listing(lines: &[String], folder: Folder) -> Vec<MessageSummary> {
    lines
        .iter()
        .filter(|line| is_listing_row(line))
        .filter_map(|line| {
            let summary = parse_summary_row(line, folder);
            if summary.is_none() {
                tracing::debug!(%folder, line = %line, "Skipping malformed listing row");
            }
            summary
        })
        .collect()
}

/// Parses a `RETR` reply.
///
/// Returns `Ok(None)` if the server answered 550.
///
/// # Errors
///
/// Returns [`Error::ProtocolViolation`] if the reply is empty or starts with
/// an unexpected status code.
pub fn parse_full_message(id: &str, lines: &[String]) -> Result<Option<FullMessage>> {
    let first = lines
        .first()
        .ok_or_else(|| Error::ProtocolViolation("empty RETR reply".into()))?;
    let first = Reply::parse(first)?;
    if first.is(ReplyCode::NOT_FOUND) {
        return Ok(None);
    }
    if !first.is(ReplyCode::MESSAGE_FIELD) {
        return Err(Error::rejected(first.code.as_u16(), first.text));
    }

    let mut message = FullMessage {
        id: id.to_string(),
        ..FullMessage::default()
    };
    let mut body: Vec<&str> = Vec::new();
    let mut in_body = false;

    for line in lines {
        let line = line.trim_end_matches(['\r', '\n']);
        if in_body {
            if line == BODY_END {
                break;
            }
            body.push(line);
        } else if line == BODY_MARKER {
            in_body = true;
        } else if let Some(from) = line.strip_prefix("214 FROM:") {
            message.from = from.to_string();
        } else if let Some(to) = line.strip_prefix("214 TO:") {
            message.to = to.trim().to_string();
        } else if let Some(subject) = line.strip_prefix("214 SUBJ:") {
            message.subject = subject.to_string();
        } else if let Some(timestamp) = line.strip_prefix("214 TIMESTAMP:") {
            message.timestamp_ms = timestamp.trim().parse().unwrap_or_else(|_| {
                tracing::debug!(id, value = timestamp, "Unparsable timestamp, using now");
                Utc::now().timestamp_millis()
            });
        }
    }

    message.body = body.join("\n");
    Ok(Some(message))
}

/// Parses a presence row `212U <user> [<status> [<address> [<lastSeenMs>]]]`.
///
/// A row that only names a user counts as active. Returns `None` for other
/// lines and for rows with an unknown status.
#[must_use]
pub fn parse_presence_row(line: &str) -> Option<PresenceEntry> {
    let rest = line.trim_end_matches(['\r', '\n']).strip_prefix("212U")?;

    let (username, rest) = next_token(rest)?;
    let (status, rest) = match next_token(rest) {
        Some((word, rest)) => match word.parse::<PresenceStatus>() {
            Ok(status) => (status, rest),
            Err(e) => {
                tracing::warn!(username, error = %e, "Skipping presence row");
                return None;
            }
        },
        None => (PresenceStatus::Active, ""),
    };
    let (address, rest) = next_token(rest).map_or((None, ""), |(a, r)| (Some(a.to_string()), r));
    let last_seen_ms = next_token(rest).and_then(|(t, _)| t.parse().ok());

    Some(PresenceEntry {
        username: username.to_string(),
        status,
        address,
        last_seen_ms,
    })
}

/// Parses every row of a `WHO` reply.
#[must_use]
pub fn parse_presence(lines: &[String]) -> Vec<PresenceEntry> {
    lines.iter().filter_map(|line| parse_presence_row(line)).collect()
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

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(ToString::to_string).collect()
    }

    /// Returns the index of the terminating line, if any.
    fn frame(raw: &[&str]) -> Option<usize> {
        let mut framer = ReplyFramer::new();
        raw.iter().position(|line| framer.is_terminator(line))
    }

    #[test]
    fn test_framer_end_markers() {
        assert_eq!(frame(&["213 1 a 1 1 x", "213 END"]), Some(1));
        assert_eq!(frame(&["212U alice ACTIVE", "212 END"]), Some(1));
        assert_eq!(frame(&["213 END"]), Some(0));
    }

    #[test]
    fn test_framer_defensive_terminators() {
        assert_eq!(frame(&["213 1 a 1 1 x", "250 OK"]), Some(1));
        assert_eq!(frame(&["550 No such message"]), Some(0));
        assert_eq!(frame(&["211 M:0 S:0 U:0"]), Some(0));
        assert_eq!(frame(&["503 Not authenticated"]), Some(0));
    }

    #[test]
    fn test_framer_count_line_is_not_terminator() {
        assert_eq!(frame(&["213 2", "213 1 a 1 1 x", "213 END"]), Some(2));
    }

    #[test]
    fn test_framer_body_only_ends_on_body_end() {
        let raw = [
            "214 FROM:bob",
            "214 BODY",
            "250 looks like a reply",
            "213 END",
            "plain text",
            "214 END",
        ];
        assert_eq!(frame(&raw), Some(5));
    }

    #[test]
    fn test_framer_unclassifiable_continues() {
        assert_eq!(frame(&["garbage", "213 END"]), Some(1));
        assert_eq!(frame(&["garbage"]), None);
    }

    #[test]
    fn test_ensure_completed() {
        assert!(ensure_completed(&lines(&["213 1 a 1 1 x", "213 END"])).is_ok());
        assert!(ensure_completed(&lines(&["250 OK"])).is_ok());
        assert!(matches!(
            ensure_completed(&lines(&["550 Unknown folder"])),
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            ensure_completed(&lines(&["503 Login first"])),
            Err(Error::Rejected { code: 503, .. })
        ));
        assert!(matches!(
            ensure_completed(&[]),
            Err(Error::ProtocolViolation(_))
        ));
    }

    #[test]
    fn test_is_listing_row() {
        assert!(is_listing_row("213 1 bob 10 1700000000000 Hello"));
        assert!(!is_listing_row("213 END"));
        assert!(!is_listing_row("213 42"));
        assert!(!is_listing_row("213 "));
        assert!(!is_listing_row("250 OK"));
    }

    #[test]
    fn test_parse_summary_row() {
        let summary =
            parse_summary_row("213 17-2 bob 128 1700000000000 Lunch plans today", Folder::Inbox)
                .unwrap();
        assert_eq!(summary.id, "17-2");
        assert_eq!(summary.from, "bob");
        assert_eq!(summary.size, 128);
        assert_eq!(summary.timestamp_ms, 1700000000000);
        assert_eq!(summary.subject, "Lunch plans today");
        assert!(!summary.read);
    }

    #[test]
    fn test_parse_summary_row_default_subject() {
        let summary = parse_summary_row("213 1 bob 5 1700000000000", Folder::Sent).unwrap();
        assert_eq!(summary.subject, DEFAULT_SUBJECT);
        assert!(summary.read);
    }

    #[test]
    fn test_parse_summary_row_malformed() {
        assert!(parse_summary_row("213 1 bob big 1700000000000 x", Folder::Inbox).is_none());
        assert!(parse_summary_row("213 1 bob", Folder::Inbox).is_none());
    }

    #[test]
    fn test_parse_listing_excludes_markers() {
        let reply = lines(&[
            "213 2",
            "213 1 bob 5 1700000000000 One",
            "213 broken row",
            "213 2 carol 7 1700000000001 Two",
            "213 END",
        ]);
        let summaries = parse_listing(&reply, Folder::Archive);
        let ids: Vec<_> = summaries.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2"]);
        assert!(summaries.iter().all(|s| s.read));
    }

    #[test]
    fn test_parse_full_message() {
        let reply = lines(&[
            "214 FROM:bob",
            "214 TO: alice,carol ",
            "214 SUBJ:Status",
            "214 TIMESTAMP:1700000000000",
            "214 BODY",
            "line one",
            "",
            "250 not a terminator",
            "214 END",
        ]);
        let message = parse_full_message("9", &reply).unwrap().unwrap();
        assert_eq!(message.id, "9");
        assert_eq!(message.from, "bob");
        assert_eq!(message.to, "alice,carol");
        assert_eq!(message.subject, "Status");
        assert_eq!(message.timestamp_ms, 1700000000000);
        assert_eq!(message.body, "line one\n\n250 not a terminator");
    }

    #[test]
    fn test_parse_full_message_not_found() {
        let reply = lines(&["550 No such message"]);
        assert_eq!(parse_full_message("9", &reply).unwrap(), None);
    }

    #[test]
    fn test_parse_full_message_bad_timestamp_uses_now() {
        let before = Utc::now().timestamp_millis();
        let reply = lines(&["214 TIMESTAMP:soon", "214 BODY", "214 END"]);
        let message = parse_full_message("1", &reply).unwrap().unwrap();
        assert!(message.timestamp_ms >= before);
        assert_eq!(message.body, "");
    }

    #[test]
    fn test_parse_full_message_errors() {
        assert!(matches!(
            parse_full_message("1", &[]),
            Err(Error::ProtocolViolation(_))
        ));
        assert!(matches!(
            parse_full_message("1", &lines(&["503 Bad sequence"])),
            Err(Error::Rejected { code: 503, .. })
        ));
    }

    #[test]
    fn test_parse_presence_rows() {
        let entry = parse_presence_row("212U alice busy 10.0.0.2 1700000000000").unwrap();
        assert_eq!(entry.username, "alice");
        assert_eq!(entry.status, PresenceStatus::Busy);
        assert_eq!(entry.address.as_deref(), Some("10.0.0.2"));
        assert_eq!(entry.last_seen_ms, Some(1700000000000));

        let bare = parse_presence_row("212U bob").unwrap();
        assert_eq!(bare.status, PresenceStatus::Active);
        assert_eq!(bare.address, None);

        assert!(parse_presence_row("212U carol SLEEPING").is_none());
        assert!(parse_presence_row("212 END").is_none());
    }

    #[test]
    fn test_parse_presence() {
        let reply = lines(&["212U alice ACTIVE", "212U bob AWAY 10.0.0.3", "212 END"]);
        let entries = parse_presence(&reply);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].status, PresenceStatus::Away);
    }
}
