//! Session checkpoint and progress log.
//!
//! The checkpoint (`checkpoint.json`) is the small machine-readable
//! record that lets a brand-new process resume a run: iteration
//! counter, last-known working-tree marker, timestamp. It is owned
//! exclusively by the orchestrator and written atomically at every
//! `Checkpointing` transition.
//!
//! The progress log (`agent_progress.txt`) is the human-readable side:
//! an append-only text file of per-session note blocks. It is never
//! machine-parsed -- its tail is prepended verbatim to the next
//! session's prompt so the agent can reconstruct narrative context.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::StoreError;
use crate::fs_util::write_atomic;

// ---------------------------------------------------------------------------
// Checkpoint
// ---------------------------------------------------------------------------

/// Durable per-run record, reloaded at the start of every session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Number of completed sessions.
    pub iteration: u64,
    /// Last-known working-tree marker (e.g. a git commit hash), if any.
    pub tree_marker: Option<String>,
    /// When this checkpoint was written.
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    /// The checkpoint written after session zero, before any coding
    /// session has run.
    pub fn initial() -> Self {
        Self {
            iteration: 0,
            tree_marker: None,
            updated_at: Utc::now(),
        }
    }

    /// Load a checkpoint; `Ok(None)` if the file does not exist.
    pub fn load(path: &Path) -> Result<Option<Self>, StoreError> {
        let contents = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::io(path, e)),
        };
        let checkpoint =
            serde_json::from_str(&contents).map_err(|e| StoreError::parse(path, e.to_string()))?;
        Ok(Some(checkpoint))
    }

    /// Persist atomically.
    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        debug!(path = %path.display(), iteration = self.iteration, "writing checkpoint");
        let mut buf = serde_json::to_string_pretty(self)
            .map_err(|e| StoreError::parse(path, e.to_string()))?;
        buf.push('\n');
        write_atomic(path, &buf)
    }
}

// ---------------------------------------------------------------------------
// Progress log
// ---------------------------------------------------------------------------

/// Append-only free-text session notes.
#[derive(Debug, Clone)]
pub struct ProgressLog {
    path: PathBuf,
}

impl ProgressLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Append one session note block. Every session appends exactly one,
    /// on every outcome path, so the log is a complete run narrative.
    pub fn append_note(
        &self,
        session: u64,
        status: &str,
        body: &str,
    ) -> Result<(), StoreError> {
        let mut block = format!(
            "=== session {session} | {} | {status} ===\n",
            Utc::now().format("%Y-%m-%dT%H:%M:%SZ")
        );
        block.push_str(body.trim_end());
        block.push_str("\n\n");

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| StoreError::io(&self.path, e))?;
        file.write_all(block.as_bytes())
            .map_err(|e| StoreError::io(&self.path, e))?;
        Ok(())
    }

    /// Read at most the last `max_bytes` of the log (on a char
    /// boundary). Missing file reads as empty.
    pub fn read_tail(&self, max_bytes: usize) -> Result<String, StoreError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(String::new()),
            Err(e) => return Err(StoreError::io(&self.path, e)),
        };
        if contents.len() <= max_bytes {
            return Ok(contents);
        }
        let mut start = contents.len() - max_bytes;
        while start < contents.len() && !contents.is_char_boundary(start) {
            start += 1;
        }
        Ok(contents[start..].to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkpoint_roundtrips() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("checkpoint.json");
        let checkpoint = Checkpoint {
            iteration: 7,
            tree_marker: Some("abc123".into()),
            updated_at: Utc::now(),
        };
        checkpoint.save(&path).unwrap();
        let loaded = Checkpoint::load(&path).unwrap().unwrap();
        assert_eq!(loaded.iteration, 7);
        assert_eq!(loaded.tree_marker.as_deref(), Some("abc123"));
    }

    #[test]
    fn missing_checkpoint_is_none() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("checkpoint.json");
        assert!(Checkpoint::load(&path).unwrap().is_none());
    }

    #[test]
    fn crash_resume_is_idempotent() {
        // Saving, "crashing", and reloading yields the same state as
        // never having crashed: load-after-save equals the saved value.
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("checkpoint.json");
        let checkpoint = Checkpoint {
            iteration: 3,
            tree_marker: None,
            updated_at: Utc::now(),
        };
        checkpoint.save(&path).unwrap();
        let first = Checkpoint::load(&path).unwrap().unwrap();
        let second = Checkpoint::load(&path).unwrap().unwrap();
        assert_eq!(first, second);
        assert_eq!(first.iteration, 3);
    }

    #[test]
    fn progress_log_appends_blocks() {
        let tmp = tempfile::tempdir().unwrap();
        let log = ProgressLog::new(tmp.path().join("agent_progress.txt"));
        log.append_note(1, "completed", "did the login form").unwrap();
        log.append_note(2, "failed", "tests broke").unwrap();

        let contents = log.read_tail(usize::MAX).unwrap();
        assert!(contents.contains("=== session 1 |"));
        assert!(contents.contains("did the login form"));
        assert!(contents.contains("=== session 2 |"));
        let first = contents.find("session 1").unwrap();
        let second = contents.find("session 2").unwrap();
        assert!(first < second, "notes must stay in append order");
    }

    #[test]
    fn read_tail_bounds_output() {
        let tmp = tempfile::tempdir().unwrap();
        let log = ProgressLog::new(tmp.path().join("agent_progress.txt"));
        log.append_note(1, "completed", &"x".repeat(4096)).unwrap();
        let tail = log.read_tail(100).unwrap();
        assert!(tail.len() <= 100);
    }

    #[test]
    fn read_tail_of_missing_log_is_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let log = ProgressLog::new(tmp.path().join("agent_progress.txt"));
        assert_eq!(log.read_tail(100).unwrap(), "");
    }
}
