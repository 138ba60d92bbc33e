//! Connection state of a session.

/// Lifecycle state of a session.
///
/// ```text
/// Disconnected ──login──▶ Connecting ──▶ Authenticated ◀──▶ Degraded
///       ▲                     │                                 │
///       └─────── failure ─────┴──────────── recovery failed ────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No connection; a fresh login is required.
    #[default]
    Disconnected,
    /// Login handshake in progress.
    Connecting,
    /// Logged in with a live command connection.
    Authenticated,
    /// The command connection failed and has not been re-established.
    Degraded,
}

impl ConnectionState {
    /// Returns true if commands can be issued.
    #[must_use]
    pub const fn is_authenticated(self) -> bool {
        matches!(self, Self::Authenticated)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Authenticated => "authenticated",
            Self::Degraded => "degraded",
        };
        f.write_str(name)
    }
}
