//! Durable rotation cursor
//!
//! The store keeps `{ "lastIndex": n }` in a small JSON file so a restart
//! resumes the pool rotation where it stopped. Persistence is best-effort:
//! a missing or corrupt file loads as the default cursor, and write failures
//! are logged and otherwise ignored. Losing the cursor only means one identity
//! may repeat.
//!
//! # Example
//!
//! ```no_run
//! use afk_rotator::storage::{RotationState, RotationStateStore};
//! use std::path::Path;
//!
//! let mut store = RotationStateStore::new(Path::new("data/rotation-state.json"));
//! let mut state = store.load();
//! state.advance(3);
//! store.save(&state);
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

// ============================================================================
// Rotation State
// ============================================================================

/// Rotation progress that survives restarts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RotationState {
    /// Index into the pool most recently issued; -1 before the first issue
    pub last_index: i64,

    /// Identity most recently issued from the pool
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_identity: Option<String>,

    /// When the cursor last moved
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Default for RotationState {
    fn default() -> Self {
        Self {
            last_index: -1,
            last_identity: None,
            updated_at: None,
        }
    }
}

impl RotationState {
    /// Move the cursor forward one slot in a pool of `len` entries and return the new index
    ///
    /// `len` must be non-zero.
    pub fn advance(&mut self, len: usize) -> usize {
        debug_assert!(len > 0, "advance on an empty pool");
        let next = (self.last_index + 1).rem_euclid(len as i64);
        self.last_index = next;
        self.updated_at = Some(Utc::now());
        next as usize
    }

    /// Index the next advance would produce, without moving the cursor
    pub fn peek_next(&self, len: usize) -> Option<usize> {
        if len == 0 {
            return None;
        }
        Some((self.last_index + 1).rem_euclid(len as i64) as usize)
    }

    /// Whether the cursor is valid for a pool of `len` entries
    pub fn is_in_range(&self, len: usize) -> bool {
        self.last_index >= -1 && self.last_index < len as i64
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Rotation state read/write failure
#[derive(Error, Debug)]
pub enum PersistenceError {
    /// Filesystem failure
    #[error("rotation state I/O error during {operation} at {path}: {source}")]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The state could not be encoded
    #[error("rotation state serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl PersistenceError {
    fn io(operation: &'static str, path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            operation,
            path: path.to_path_buf(),
            source,
        }
    }
}

// ============================================================================
// Store
// ============================================================================

/// File-backed (or in-memory) rotation state store
#[derive(Debug)]
pub struct RotationStateStore {
    /// State file; `None` keeps everything in memory
    path: Option<PathBuf>,

    /// Last state written, used when there is no file
    memory: Option<RotationState>,

    /// Set while writes are failing, so repeated failures log once
    degraded: bool,
}

impl RotationStateStore {
    /// Create a store backed by `path`
    pub fn new(path: &Path) -> Self {
        Self {
            path: Some(path.to_path_buf()),
            memory: None,
            degraded: false,
        }
    }

    /// Create a store that never touches the filesystem
    pub fn in_memory() -> Self {
        Self {
            path: None,
            memory: None,
            degraded: false,
        }
    }

    /// Create from an optional path
    pub fn from_path(path: Option<&Path>) -> Self {
        match path {
            Some(path) => Self::new(path),
            None => Self::in_memory(),
        }
    }

    /// State file path, if file-backed
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Whether the last write failed
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// Load the persisted state; absent or malformed input yields the default
    pub fn load(&self) -> RotationState {
        let Some(path) = self.path.as_deref() else {
            return self.memory.clone().unwrap_or_default();
        };

        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No rotation state file, starting fresh");
                return RotationState::default();
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to read rotation state, starting fresh");
                return RotationState::default();
            }
        };

        match serde_json::from_str::<RotationState>(&content) {
            Ok(state) => {
                tracing::debug!(path = %path.display(), last_index = state.last_index, "Rotation state loaded");
                state
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Malformed rotation state ignored");
                RotationState::default()
            }
        }
    }

    /// Write the state, returning the failure instead of logging it
    pub fn try_save(&mut self, state: &RotationState) -> Result<(), PersistenceError> {
        let Some(path) = self.path.clone() else {
            self.memory = Some(state.clone());
            return Ok(());
        };

        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|e| PersistenceError::io("create_dir", dir, e))?;
        }

        // Write to temp file first, then rename
        let mut temp_name = path.as_os_str().to_owned();
        temp_name.push(".tmp");
        let temp_path = PathBuf::from(temp_name);

        let file = File::create(&temp_path)
            .map_err(|e| PersistenceError::io("create", &temp_path, e))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, state)?;
        writer
            .flush()
            .map_err(|e| PersistenceError::io("write", &temp_path, e))?;
        drop(writer);

        fs::rename(&temp_path, &path).map_err(|e| PersistenceError::io("rename", &path, e))?;

        tracing::debug!(path = %path.display(), last_index = state.last_index, "Rotation state saved");
        Ok(())
    }

    /// Best-effort write; returns whether it succeeded
    ///
    /// The first failure after a success is logged as a warning, later ones at
    /// debug level, and the first success afterwards logs the recovery.
    pub fn save(&mut self, state: &RotationState) -> bool {
        match self.try_save(state) {
            Ok(()) => {
                if self.degraded {
                    tracing::info!("Rotation state persistence recovered");
                    self.degraded = false;
                }
                true
            }
            Err(e) => {
                if self.degraded {
                    tracing::debug!(error = %e, "Rotation state still not persisted");
                } else {
                    tracing::warn!(error = %e, "Rotation state not persisted; continuing with in-memory cursor");
                    self.degraded = true;
                }
                self.memory = Some(state.clone());
                false
            }
        }
    }

    /// Delete the persisted state
    pub fn reset(&mut self) -> Result<(), PersistenceError> {
        self.memory = None;
        if let Some(path) = self.path.as_deref() {
            if path.exists() {
                fs::remove_file(path).map_err(|e| PersistenceError::io("remove", path, e))?;
                tracing::debug!(path = %path.display(), "Rotation state deleted");
            }
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
