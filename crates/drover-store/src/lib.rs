//! Durable, append-safe persistence for a drover project.
//!
//! Everything the harness must remember between processes lives in a
//! handful of project-local files, each written with an atomic
//! replace discipline so a crash mid-write can never corrupt state:
//!
//! - `feature_list.json` -- the ordered feature checklist
//! - `feature_journal.jsonl` -- append-only creation/pass journal
//! - `checkpoint.json` -- iteration counter + working-tree marker
//! - `agent_progress.txt` -- append-only free-text session notes
//!
//! The checklist is monotonic: entries are created once (in bulk, by
//! the initializer session) and afterwards only ever flip
//! `passes: false -> true`. [`FeatureList::merge_assertions`] enforces
//! that invariant against whatever a backend agent wrote to disk.

pub mod checklist;
pub mod checkpoint;
pub mod error;
pub mod journal;
pub mod models;
pub mod project;

mod fs_util;

pub use checklist::{FeatureList, MergeOutcome};
pub use checkpoint::{Checkpoint, ProgressLog};
pub use error::StoreError;
pub use journal::{JournalCheck, JournalRecord, TransitionJournal};
pub use models::{FeatureCategory, FeatureEntry};
pub use project::ProjectStore;
