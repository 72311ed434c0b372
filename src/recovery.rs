//! Recovery marker persistence
//!
//! The executor records the stable id of the step it is about to dispatch and
//! removes the record once the step returns normally. After a crash or reboot
//! the marker names the step that was running, and the caller can resume from
//! there.
//!
//! The file store writes the marker to a sibling temp file and renames it into
//! place, so a crash mid-write leaves either the old marker or the new one.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{Result, WorkflowError};

/// Durable storage for the current-step marker
pub trait RecoveryStore {
    /// Record `step_id` as the step in progress
    fn save(&mut self, step_id: &str) -> Result<()>;

    /// Remove the marker; removing a missing marker is not an error
    fn clear(&mut self) -> Result<()>;

    /// The recorded step id, if any
    fn load(&self) -> Result<Option<String>>;
}

/// Marker kept in memory only; used in tests and for stages without a target disk
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryRecoveryStore {
    current: Option<String>,
    /// Every id ever saved, in order
    history: Vec<String>,
}

impl MemoryRecoveryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn history(&self) -> &[String] {
        &self.history
    }
}

impl RecoveryStore for MemoryRecoveryStore {
    fn save(&mut self, step_id: &str) -> Result<()> {
        self.current = Some(step_id.to_string());
        self.history.push(step_id.to_string());
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        self.current = None;
        Ok(())
    }

    fn load(&self) -> Result<Option<String>> {
        Ok(self.current.clone())
    }
}

/// Marker stored as a one-line file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecoveryStore {
    path: PathBuf,
}

impl FileRecoveryStore {
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
            .unwrap_or_else(|| "step".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl RecoveryStore for FileRecoveryStore {
    fn save(&mut self, step_id: &str) -> Result<()> {
        let tmp = self.temp_path();
        let write = || -> std::io::Result<()> {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(step_id.as_bytes())?;
            file.sync_all()?;
            fs::rename(&tmp, &self.path)
        };
        write().map_err(|e| {
            WorkflowError::recovery(format!("cannot write {}: {}", self.path.display(), e))
        })?;
        log::debug!("Recovery marker set to '{}'", step_id);
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(WorkflowError::recovery(format!(
                "cannot remove {}: {}",
                self.path.display(),
                e
            ))),
        }
    }

    fn load(&self) -> Result<Option<String>> {
        match fs::read_to_string(&self.path) {
            Ok(content) => {
                let id = content.trim();
                Ok((!id.is_empty()).then(|| id.to_string()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
