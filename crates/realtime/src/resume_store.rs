//! Resumption data persisted across process restarts.
//!
//! Holds the connection id, key and last processed serial in a JSON file so a
//! restarted client can ask the service to resume where it left off.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Errors from resume store operations.
#[derive(Debug, thiserror::Error)]
pub enum ResumeStoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// What is needed to resume a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeData {
    pub id: String,
    pub key: String,
    pub serial: i64,
}

/// JSON file holding the latest [`ResumeData`].
#[derive(Debug, Clone)]
pub struct ResumeStore {
    path: PathBuf,
}

impl ResumeStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the stored data. A missing file is not an error.
    pub fn load(&self) -> Result<Option<ResumeData>, ResumeStoreError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let data = std::fs::read_to_string(&self.path)?;
        let resume: ResumeData = serde_json::from_str(&data)?;
        debug!(id = %resume.id, serial = resume.serial, "loaded resume data from {:?}", self.path);
        Ok(Some(resume))
    }

    /// Writes the data, creating parent directories as needed.
    pub fn save(&self, resume: &ResumeData) -> Result<(), ResumeStoreError> {
        let json = serde_json::to_string_pretty(resume)?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, json)?;
        debug!(id = %resume.id, serial = resume.serial, "persisted resume data to {:?}", self.path);
        Ok(())
    }

    /// Removes the file. A missing file is not an error.
    pub fn clear(&self) -> Result<(), ResumeStoreError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                debug!("cleared resume data at {:?}", self.path);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
