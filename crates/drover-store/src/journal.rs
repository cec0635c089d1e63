//! Append-only transition journal for the feature checklist.
//!
//! The checklist file itself gets rewritten by backend agents, so it
//! cannot be the source of truth for "what happened". The journal is:
//! one JSON record per line, appended (never rewritten) by the
//! harness -- `created` records when the initializer populates the
//! list, `passed` records when a merge applies a transition. Replaying
//! the journal against the current checklist detects a corrupted
//! rewrite instead of trusting it blindly.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::checklist::FeatureList;
use crate::error::StoreError;

/// One journal line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JournalRecord {
    /// A feature entry was created at `index`.
    Created { index: usize, description: String },
    /// The entry at `index` transitioned to passing.
    Passed { index: usize },
}

/// Result of verifying the checklist against the journal.
#[derive(Debug, Clone, Default)]
pub struct JournalCheck {
    /// Problems found; empty means the checklist is consistent.
    pub issues: Vec<String>,
}

impl JournalCheck {
    pub fn is_consistent(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Handle to the on-disk journal file.
#[derive(Debug, Clone)]
pub struct TransitionJournal {
    path: PathBuf,
}

impl TransitionJournal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a single record.
    pub fn append(&self, record: &JournalRecord) -> Result<(), StoreError> {
        self.append_all(std::slice::from_ref(record))
    }

    /// Append several records in one write.
    pub fn append_all(&self, records: &[JournalRecord]) -> Result<(), StoreError> {
        if records.is_empty() {
            return Ok(());
        }
        let mut buf = String::new();
        for record in records {
            let line = serde_json::to_string(record)
                .map_err(|e| StoreError::parse(&self.path, e.to_string()))?;
            buf.push_str(&line);
            buf.push('\n');
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| StoreError::io(&self.path, e))?;
        file.write_all(buf.as_bytes())
            .map_err(|e| StoreError::io(&self.path, e))?;
        Ok(())
    }

    /// Read every record back. A missing file is an empty journal.
    pub fn replay(&self) -> Result<Vec<JournalRecord>, StoreError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(&self.path, e)),
        };
        let mut records = Vec::new();
        for (lineno, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let record: JournalRecord = serde_json::from_str(line).map_err(|e| {
                StoreError::parse(&self.path, format!("line {}: {e}", lineno + 1))
            })?;
            records.push(record);
        }
        Ok(records)
    }

    /// Replay the journal and cross-check it against `list`.
    ///
    /// Detects: entry count drift, description edits, entries marked
    /// passing without a recorded transition, and recorded transitions
    /// the list no longer reflects.
    pub fn verify(&self, list: &FeatureList) -> Result<JournalCheck, StoreError> {
        let records = self.replay()?;
        let mut check = JournalCheck::default();

        let mut created: Vec<Option<String>> = Vec::new();
        let mut passed = std::collections::BTreeSet::new();

        for record in &records {
            match record {
                JournalRecord::Created { index, description } => {
                    if created.len() <= *index {
                        created.resize(*index + 1, None);
                    }
                    created[*index] = Some(description.clone());
                }
                JournalRecord::Passed { index } => {
                    passed.insert(*index);
                }
            }
        }

        if created.len() != list.len() {
            check.issues.push(format!(
                "journal records {} created entries, checklist has {}",
                created.len(),
                list.len()
            ));
        }

        for (index, entry) in list.entries().iter().enumerate() {
            match created.get(index).and_then(|d| d.as_deref()) {
                Some(description) if description != entry.description => {
                    check.issues.push(format!(
                        "entry {index} description drifted: journal {description:?}, checklist {:?}",
                        entry.description
                    ));
                }
                None => {
                    check
                        .issues
                        .push(format!("entry {index} has no creation record"));
                }
                _ => {}
            }

            let journaled = passed.contains(&index);
            if entry.passes && !journaled {
                check.issues.push(format!(
                    "entry {index} is passing without a journaled transition"
                ));
            }
            if !entry.passes && journaled {
                check.issues.push(format!(
                    "entry {index} regressed: journaled as passed but checklist says failing"
                ));
            }
        }

        for index in &passed {
            if *index >= list.len() {
                check
                    .issues
                    .push(format!("journaled pass for out-of-range entry {index}"));
            }
        }

        Ok(check)
    }

    /// Journal the bulk creation of a fresh checklist.
    pub fn record_creation(&self, list: &FeatureList) -> Result<(), StoreError> {
        let records: Vec<JournalRecord> = list
            .entries()
            .iter()
            .enumerate()
            .map(|(index, entry)| JournalRecord::Created {
                index,
                description: entry.description.clone(),
            })
            .collect();
        self.append_all(&records)
    }

    /// Journal a set of newly-passing indices from a merge.
    pub fn record_passes(&self, indices: &[usize]) -> Result<(), StoreError> {
        let records: Vec<JournalRecord> = indices
            .iter()
            .map(|&index| JournalRecord::Passed { index })
            .collect();
        self.append_all(&records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FeatureCategory, FeatureEntry};

    fn list() -> FeatureList {
        FeatureList::new(vec![
            FeatureEntry::new(FeatureCategory::Functional, "a", vec![]),
            FeatureEntry::new(FeatureCategory::Functional, "b", vec![]),
        ])
    }

    #[test]
    fn empty_journal_replays_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let journal = TransitionJournal::new(tmp.path().join("journal.jsonl"));
        assert!(journal.replay().unwrap().is_empty());
    }

    #[test]
    fn append_and_replay_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let journal = TransitionJournal::new(tmp.path().join("journal.jsonl"));
        journal
            .append(&JournalRecord::Created {
                index: 0,
                description: "a".into(),
            })
            .unwrap();
        journal.append(&JournalRecord::Passed { index: 0 }).unwrap();
        let records = journal.replay().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1], JournalRecord::Passed { index: 0 });
    }

    #[test]
    fn verify_accepts_consistent_state() {
        let tmp = tempfile::tempdir().unwrap();
        let journal = TransitionJournal::new(tmp.path().join("journal.jsonl"));
        let mut l = list();
        journal.record_creation(&l).unwrap();
        l.mark_passing(1).unwrap();
        journal.record_passes(&[1]).unwrap();

        let check = journal.verify(&l).unwrap();
        assert!(check.is_consistent(), "issues: {:?}", check.issues);
    }

    #[test]
    fn verify_flags_unjournaled_pass() {
        let tmp = tempfile::tempdir().unwrap();
        let journal = TransitionJournal::new(tmp.path().join("journal.jsonl"));
        let mut l = list();
        journal.record_creation(&l).unwrap();
        l.mark_passing(0).unwrap();
        // No record_passes call.
        let check = journal.verify(&l).unwrap();
        assert!(!check.is_consistent());
    }

    #[test]
    fn verify_flags_count_drift() {
        let tmp = tempfile::tempdir().unwrap();
        let journal = TransitionJournal::new(tmp.path().join("journal.jsonl"));
        journal.record_creation(&list()).unwrap();
        let shrunk = FeatureList::new(vec![FeatureEntry::new(
            FeatureCategory::Functional,
            "a",
            vec![],
        )]);
        let check = journal.verify(&shrunk).unwrap();
        assert!(!check.is_consistent());
    }

    #[test]
    fn replay_rejects_garbage_line() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("journal.jsonl");
        std::fs::write(&path, "{\"event\":\"passed\",\"index\":0}\nnot json\n").unwrap();
        let journal = TransitionJournal::new(&path);
        assert!(matches!(journal.replay(), Err(StoreError::Parse { .. })));
    }
}
