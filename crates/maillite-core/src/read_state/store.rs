//! On-disk format of the read-state cache.
//!
//! A small versioned JSON document:
//!
//! ```json
//! { "version": 1, "ids": ["1700000000000-1", "1700000000000-2"] }
//! ```

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Current format version.
pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct ReadStateFile {
    version: u32,
    ids: Vec<String>,
}

/// Reads the id set stored at `path`.
///
/// Returns `Ok(None)` if the file does not exist.
pub async fn read(path: &Path) -> Result<Option<BTreeSet<String>>> {
    let contents = match tokio::fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let file: ReadStateFile = serde_json::from_str(&contents)?;
    if file.version != FORMAT_VERSION {
        return Err(Error::InvalidState(format!(
            "unsupported read-state version {}",
            file.version
        )));
    }
    Ok(Some(file.ids.into_iter().collect()))
}

/// Writes the id set to `path`, replacing the previous file atomically.
pub async fn write(path: &Path, ids: &BTreeSet<String>) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent).await?;
    }

    let file = ReadStateFile {
        version: FORMAT_VERSION,
        ids: ids.iter().cloned().collect(),
    };
    let contents = serde_json::to_string_pretty(&file)?;

    let tmp = temp_path(path);
    tokio::fs::write(&tmp, contents).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}
