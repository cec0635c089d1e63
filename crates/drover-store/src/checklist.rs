//! The feature checklist: an ordered, monotonic list of
//! [`FeatureEntry`] records persisted as `feature_list.json`.
//!
//! Backend agents rewrite the file themselves to assert progress; the
//! harness never trusts that rewrite blindly. At checkpoint time the
//! on-disk list is merged back through [`FeatureList::merge_assertions`],
//! which applies `false -> true` transitions and rejects everything
//! else (regressions, entry count changes, identity edits).

use std::fs;
use std::path::Path;

use tracing::debug;

use crate::error::StoreError;
use crate::fs_util::write_atomic;
use crate::models::FeatureEntry;

/// The ordered feature checklist.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FeatureList {
    entries: Vec<FeatureEntry>,
}

/// Result of merging a session's on-disk pass assertions.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MergeOutcome {
    /// Indices that transitioned `false -> true` in this merge.
    pub newly_passing: Vec<usize>,
    /// Number of `true -> false` regressions that were rejected.
    pub regressions_rejected: usize,
    /// The asserted list changed entry count or identity; nothing was
    /// merged and the persisted monotonic copy wins.
    pub identity_mismatch: bool,
}

impl FeatureList {
    /// Build a list from entries.
    pub fn new(entries: Vec<FeatureEntry>) -> Self {
        Self { entries }
    }

    /// Load a checklist from a JSON array file.
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let contents = fs::read_to_string(path).map_err(|e| StoreError::io(path, e))?;
        let entries: Vec<FeatureEntry> = serde_json::from_str(&contents)
            .map_err(|e| StoreError::parse(path, e.to_string()))?;
        debug!(path = %path.display(), entries = entries.len(), "checklist loaded");
        Ok(Self { entries })
    }

    /// Persist the checklist atomically (temp file + rename).
    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        debug!(path = %path.display(), entries = self.entries.len(), "writing checklist");
        let mut buf = serde_json::to_string_pretty(&self.entries)
            .map_err(|e| StoreError::parse(path, e.to_string()))?;
        buf.push('\n');
        write_atomic(path, &buf)
    }

    /// All entries, in checklist order.
    pub fn entries(&self) -> &[FeatureEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of entries currently passing.
    pub fn passing_count(&self) -> usize {
        self.entries.iter().filter(|e| e.passes).count()
    }

    /// Whether there is no remaining work.
    ///
    /// An empty list is vacuously complete; a caller that requires the
    /// initializer to have produced work must check [`Self::is_empty`]
    /// separately.
    pub fn is_complete(&self) -> bool {
        self.entries.iter().all(|e| e.passes)
    }

    /// Flip entry `index` to passing. Returns `true` if the entry
    /// transitioned, `false` if it was already passing.
    pub fn mark_passing(&mut self, index: usize) -> Result<bool, StoreError> {
        let len = self.entries.len();
        let entry = self.entries.get_mut(index).ok_or_else(|| {
            StoreError::Corrupt(format!("feature index {index} out of bounds (len {len})"))
        })?;
        if entry.passes {
            return Ok(false);
        }
        entry.passes = true;
        Ok(true)
    }

    /// Merge the pass assertions from a list an agent wrote to disk.
    ///
    /// Only `false -> true` transitions are applied. Regressions are
    /// rejected (the entry stays passing) and counted. If the asserted
    /// list has a different entry count, or any entry's identity
    /// (category/description/steps) differs, the merge is abandoned
    /// entirely and `identity_mismatch` is set -- a corrupted rewrite
    /// must not be allowed to destroy recorded progress.
    pub fn merge_assertions(&mut self, asserted: &FeatureList) -> MergeOutcome {
        let mut outcome = MergeOutcome::default();

        if asserted.len() != self.len() {
            outcome.identity_mismatch = true;
            return outcome;
        }
        let identity_ok = self.entries.iter().zip(asserted.entries.iter()).all(|(a, b)| {
            a.category == b.category && a.description == b.description && a.steps == b.steps
        });
        if !identity_ok {
            outcome.identity_mismatch = true;
            return outcome;
        }

        for (index, (ours, theirs)) in self
            .entries
            .iter_mut()
            .zip(asserted.entries.iter())
            .enumerate()
        {
            match (ours.passes, theirs.passes) {
                (false, true) => {
                    ours.passes = true;
                    outcome.newly_passing.push(index);
                }
                (true, false) => outcome.regressions_rejected += 1,
                _ => {}
            }
        }

        outcome
    }
}
