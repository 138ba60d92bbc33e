//! Presence and statistics types.

use std::str::FromStr;

use chrono::{DateTime, Utc};

/// A user's online status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PresenceStatus {
    /// Available.
    #[default]
    Active,
    /// Online but busy.
    Busy,
    /// Online but away.
    Away,
}

impl PresenceStatus {
    /// Returns the wire spelling of the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Busy => "BUSY",
            Self::Away => "AWAY",
        }
    }
}

impl std::fmt::Display for PresenceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a status word is not recognized.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown presence status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for PresenceStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ACTIVE" => Ok(Self::Active),
            "BUSY" => Ok(Self::Busy),
            "AWAY" => Ok(Self::Away),
            _ => Err(UnknownStatus(s.to_string())),
        }
    }
}

/// One row of a presence listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceEntry {
    /// Username.
    pub username: String,
    /// Reported status.
    pub status: PresenceStatus,
    /// Address the user connected from, if reported.
    pub address: Option<String>,
    /// Last activity in milliseconds since the Unix epoch, if reported.
    pub last_seen_ms: Option<i64>,
}

impl PresenceEntry {
    /// Returns the last activity as a UTC date.
    #[must_use]
    pub fn last_seen(&self) -> Option<DateTime<Utc>> {
        self.last_seen_ms.and_then(DateTime::from_timestamp_millis)
    }
}

/// Server statistics from a `211 M:<mail> S:<sent> U:<users>` reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ServerStats {
    /// Messages stored for the user.
    pub mail: u64,
    /// Messages sent by the user.
    pub sent: u64,
    /// Users currently online.
    pub users_online: u64,
}

impl ServerStats {
    /// Statistics line reported when the server gives no answer.
    pub const DEFAULT_LINE: &'static str = "211 M:0 S:0 U:0";

    /// Parses a statistics line.
    ///
    /// Unknown keys are ignored; missing keys stay zero. Returns `None` if
    /// the line is not a 211 reply or a value is not a number.
    #[must_use]
    pub fn parse(line: &str) -> Option<Self> {
        let rest = line.trim().strip_prefix("211")?;
        let mut stats = Self::default();
        for token in rest.split_whitespace() {
            let Some((key, value)) = token.split_once(':') else {
                continue;
            };
            let value = value.parse().ok()?;
            match key {
                "M" => stats.mail = value,
                "S" => stats.sent = value,
                "U" => stats.users_online = value,
                _ => {}
            }
        }
        Some(stats)
    }
}

impl std::fmt::Display for ServerStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "211 M:{} S:{} U:{}",
            self.mail, self.sent, self.users_online
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn status_parse_is_case_insensitive() {
        assert_eq!("active".parse(), Ok(PresenceStatus::Active));
        assert_eq!("BUSY".parse(), Ok(PresenceStatus::Busy));
        assert_eq!("Away".parse(), Ok(PresenceStatus::Away));
        assert_eq!(
            "offline".parse::<PresenceStatus>(),
            Err(UnknownStatus("offline".into()))
        );
    }

    #[test]
    fn status_display() {
        assert_eq!(PresenceStatus::Busy.to_string(), "BUSY");
    }

    #[test]
    fn stats_parse() {
        let stats = ServerStats::parse("211 M:12 S:3 U:4").unwrap();
        assert_eq!(stats.mail, 12);
        assert_eq!(stats.sent, 3);
        assert_eq!(stats.users_online, 4);
    }

    #[test]
    fn stats_default_line_round_trips() {
        assert_eq!(
            ServerStats::parse(ServerStats::DEFAULT_LINE),
            Some(ServerStats::default())
        );
        assert_eq!(ServerStats::default().to_string(), ServerStats::DEFAULT_LINE);
    }

    #[test]
    fn stats_rejects_other_codes() {
        assert_eq!(ServerStats::parse("250 OK"), None);
        assert_eq!(ServerStats::parse("211 M:x S:1 U:1"), None);
    }

    #[test]
    fn last_seen_conversion() {
        let entry = PresenceEntry {
            username: "alice".into(),
            status: PresenceStatus::Active,
            address: Some("127.0.0.1".into()),
            last_seen_ms: Some(1_700_000_000_000),
        };
        assert_eq!(entry.last_seen().unwrap().timestamp(), 1_700_000_000);
    }
}
