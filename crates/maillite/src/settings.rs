//! Client settings file.

use std::path::{Path, PathBuf};

use maillite_core::SessionConfig;
use serde::{Deserialize, Serialize};

/// Environment variable holding the account password.
pub const PASSWORD_VAR: &str = "MAILLITE_PASSWORD";

/// Contents of `config.json`.
///
/// Session options sit at the top level next to `username`. The password is
/// never stored here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Account to log in as.
    pub username: Option<String>,
    /// Connection options.
    #[serde(flatten)]
    pub session: SessionConfig,
}

impl Settings {
    /// Loads settings from `path`, falling back to defaults if it is missing.
    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = match tokio::fs::read_to_string(path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "No settings file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(e.into()),
        };

        let settings = serde_json::from_str(&contents)?;
        tracing::info!(path = %path.display(), "Loaded settings");
        Ok(settings)
    }

    /// Fills in the read-state location if the file left it unset.
    pub fn with_default_read_state(mut self) -> Self {
        if self.session.read_state_path.is_none() {
            self.session.read_state_path = Some(read_state_path());
        }
        self
    }
}

/// Default settings location.
pub fn settings_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("maillite")
        .join("config.json")
}

fn read_state_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("maillite")
        .join("read_state.json")
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
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load(&dir.path().join("config.json")).await.unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.session.port, 1234);
    }

    #[tokio::test]
    async fn test_flattened_session_options() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"username": "alice", "host": "mail.lan", "notify_port": 6000, "io_timeout_ms": 2000}"#,
        )
        .unwrap();

        let settings = Settings::load(&path).await.unwrap();
        assert_eq!(settings.username.as_deref(), Some("alice"));
        assert_eq!(settings.session.host, "mail.lan");
        assert_eq!(settings.session.notify_port, 6000);
        assert_eq!(settings.session.io_timeout, Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_invalid_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();

        assert!(Settings::load(&path).await.is_err());
    }

    #[test]
    fn test_default_read_state_keeps_explicit_path() {
        let mut settings = Settings::default();
        settings.session.read_state_path = Some(PathBuf::from("/tmp/seen.json"));
        let settings = settings.with_default_read_state();
        assert_eq!(
            settings.session.read_state_path,
            Some(PathBuf::from("/tmp/seen.json"))
        );

        let filled = Settings::default().with_default_read_state();
        assert!(filled.session.read_state_path.unwrap().ends_with("read_state.json"));
    }
}
