//! Reply lines and status codes.

use crate::error::{Error, Result};

/// Status code at the start of every reply line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReplyCode(u16);

impl ReplyCode {
    /// Creates a new reply code.
    #[must_use]
    pub const fn new(code: u16) -> Self {
        Self(code)
    }

    /// Returns the numeric code.
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self.0
    }

    /// Returns true if this code belongs to a multi-line payload stream.
    #[must_use]
    pub const fn is_payload(self) -> bool {
        matches!(self.0, 212..=214)
    }
}

impl std::fmt::Display for ReplyCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// Codes used by the protocol
impl ReplyCode {
    /// 211 Single-line statistics
    pub const STATS: Self = Self(211);
    /// 212 Presence listing row
    pub const PRESENCE: Self = Self(212);
    /// 213 Folder listing row
    pub const LISTING: Self = Self(213);
    /// 214 Full message field
    pub const MESSAGE_FIELD: Self = Self(214);
    /// 235 Authentication accepted
    pub const AUTH_ACCEPTED: Self = Self(235);
    /// 250 Requested action completed
    pub const OK: Self = Self(250);
    /// 354 Continue with the next submission step
    pub const CONTINUE: Self = Self(354);
    /// 550 Not found or rejected
    pub const NOT_FOUND: Self = Self(550);
}

/// A classified reply line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Leading status code.
    pub code: ReplyCode,
    /// Everything after the code, with one separating space removed.
    pub text: String,
}

impl Reply {
    /// Creates a new reply.
    #[must_use]
    pub fn new(code: ReplyCode, text: impl Into<String>) -> Self {
        Self {
            code,
            text: text.into(),
        }
    }

    /// Classifies a raw line by its three-digit prefix.
    ///
    /// The code may be followed by the end of the line, a space, or a marker
    /// character glued to the code (as in `212U alice ACTIVE`).
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProtocolViolation`] if the line does not start with
    /// three ASCII digits.
    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        let digits = line
            .get(..3)
            .filter(|d| d.bytes().all(|b| b.is_ascii_digit()))
            .ok_or_else(|| Error::ProtocolViolation(format!("unclassifiable line: {line:?}")))?;

        let code = digits
            .parse::<u16>()
            .map_err(|_| Error::ProtocolViolation(format!("invalid status code: {digits}")))?;

        let rest = &line[3..];
        let text = rest.strip_prefix(' ').unwrap_or(rest);

        Ok(Self::new(ReplyCode::new(code), text))
    }

    /// Returns true if the reply carries the given code.
    #[must_use]
    pub fn is(&self, code: ReplyCode) -> bool {
        self.code == code
    }

    /// Converts a reply that is not `expected` into an error.
    ///
    /// 550 maps to [`Error::NotFound`]; everything else to
    /// [`Error::Rejected`].
    ///
    /// # Errors
    ///
    /// Returns an error if the code differs from `expected`.
    pub fn expect(self, expected: ReplyCode) -> Result<Self> {
        if self.code == expected {
            Ok(self)
        } else if self.code == ReplyCode::NOT_FOUND {
            Err(Error::NotFound(self.text))
        } else {
            Err(Error::rejected(self.code.as_u16(), self.text))
        }
    }

    /// Extracts the identifier from a `250 MSGID <id>` confirmation.
    #[must_use]
    pub fn message_id(&self) -> Option<&str> {
        if self.code != ReplyCode::OK {
            return None;
        }
        let mut tokens = self.text.split_whitespace();
        match (tokens.next(), tokens.next()) {
            (Some("MSGID"), Some(id)) => Some(id),
            _ => None,
        }
    }
}

impl std::fmt::Display for Reply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.text.is_empty() {
            write!(f, "{}", self.code)
        } else {
            write!(f, "{} {}", self.code, self.text)
        }
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

    mod reply_code_tests {
        use super::*;

        #[test]
        fn payload_codes() {
            assert!(ReplyCode::PRESENCE.is_payload());
            assert!(ReplyCode::LISTING.is_payload());
            assert!(ReplyCode::MESSAGE_FIELD.is_payload());
            assert!(!ReplyCode::OK.is_payload());
            assert!(!ReplyCode::STATS.is_payload());
        }

        #[test]
        fn display() {
            assert_eq!(format!("{}", ReplyCode::OK), "250");
            assert_eq!(format!("{}", ReplyCode::CONTINUE), "354");
        }
    }

    mod reply_tests {
        use super::*;

        #[test]
        fn parse_with_text() {
            let reply = Reply::parse("250 OK welcome").unwrap();
            assert_eq!(reply.code, ReplyCode::OK);
            assert_eq!(reply.text, "OK welcome");
        }

        #[test]
        fn parse_bare_code() {
            let reply = Reply::parse("354").unwrap();
            assert_eq!(reply.code, ReplyCode::CONTINUE);
            assert_eq!(reply.text, "");
        }

        #[test]
        fn parse_glued_marker() {
            let reply = Reply::parse("212U alice ACTIVE").unwrap();
            assert_eq!(reply.code, ReplyCode::PRESENCE);
            assert_eq!(reply.text, "U alice ACTIVE");
        }

        #[test]
        fn parse_strips_crlf() {
            let reply = Reply::parse("235 Authenticated\r\n").unwrap();
            assert_eq!(reply.code, ReplyCode::AUTH_ACCEPTED);
            assert_eq!(reply.text, "Authenticated");
        }

        #[test]
        fn parse_rejects_garbage() {
            assert!(matches!(
                Reply::parse("hello"),
                Err(Error::ProtocolViolation(_))
            ));
            assert!(matches!(Reply::parse("25"), Err(Error::ProtocolViolation(_))));
            assert!(matches!(Reply::parse(""), Err(Error::ProtocolViolation(_))));
        }

        #[test]
        fn expect_maps_codes() {
            let ok = Reply::parse("250 OK").unwrap();
            assert!(ok.expect(ReplyCode::OK).is_ok());

            let missing = Reply::parse("550 No such message").unwrap();
            assert!(matches!(
                missing.expect(ReplyCode::OK),
                Err(Error::NotFound(text)) if text == "No such message"
            ));

            let other = Reply::parse("503 Bad sequence").unwrap();
            assert!(matches!(
                other.expect(ReplyCode::CONTINUE),
                Err(Error::Rejected { code: 503, .. })
            ));
        }

        #[test]
        fn message_id() {
            let reply = Reply::parse("250 MSGID 1700000000123-7").unwrap();
            assert_eq!(reply.message_id(), Some("1700000000123-7"));

            let bare = Reply::parse("250 OK").unwrap();
            assert_eq!(bare.message_id(), None);

            let wrong = Reply::parse("354 MSGID 1").unwrap();
            assert_eq!(wrong.message_id(), None);
        }

        #[test]
        fn display_round() {
            assert_eq!(Reply::parse("250 MSGID 42").unwrap().to_string(), "250 MSGID 42");
            assert_eq!(Reply::parse("354").unwrap().to_string(), "354");
        }
    }
}
