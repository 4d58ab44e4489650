//! Durable "was printing" marker.
//!
//! The file is the state: it is rewritten after every printer check and read
//! back at the start of every supervisor pass, so a restart mid-print still
//! sees the lock.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Marker content meaning "printing". Anything else reads as idle.
pub const PRINTING_SENTINEL: &str = "printing";

#[derive(Debug, Error)]
pub enum LockError {
    #[error("Failed to write print lock '{}': {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone)]
pub struct PrintStateLock {
    path: PathBuf,
}

impl PrintStateLock {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| OsString::from("printlock"));
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    /// `true` only when the marker exists and holds the sentinel.
    pub async fn read(&self) -> bool {
        match fs::read_to_string(&self.path).await {
            Ok(content) => {
                let printing = content.trim() == PRINTING_SENTINEL;
                tracing::debug!(content = %content.trim(), printing, "Read print lock");
                printing
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => {
                tracing::warn!("Failed to read print lock '{}': {}", self.path.display(), e);
                false
            }
        }
    }

    /// Replace the marker with the latest decision via write-to-temp and rename.
    pub async fn write(&self, printing: bool) -> Result<(), LockError> {
        let content = if printing { PRINTING_SENTINEL } else { "" };
        let tmp_path = self.temp_path();
        let wrap = |source: std::io::Error| LockError::Write {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await.map_err(wrap)?;
            }
        }

        let mut file = fs::File::create(&tmp_path).await.map_err(wrap)?;
        file.write_all(content.as_bytes()).await.map_err(wrap)?;
        file.sync_all().await.map_err(wrap)?;
        drop(file);

        if let Err(e) = fs::rename(&tmp_path, &self.path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(wrap(e));
        }
        Ok(())
    }
}
