//! Project directory layout and state probes.

use std::path::{Path, PathBuf};

use crate::checklist::FeatureList;
use crate::checkpoint::{Checkpoint, ProgressLog};
use crate::error::StoreError;
use crate::journal::TransitionJournal;

/// All durable harness state for one project, rooted at the project
/// directory the backend agents work in.
#[derive(Debug, Clone)]
pub struct ProjectStore {
    root: PathBuf,
}

impl ProjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create the project directory if needed.
    pub fn ensure_root(&self) -> Result<(), StoreError> {
        std::fs::create_dir_all(&self.root).map_err(|e| StoreError::io(&self.root, e))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    // -- paths --------------------------------------------------------

    pub fn checklist_path(&self) -> PathBuf {
        self.root.join("feature_list.json")
    }

    pub fn journal_path(&self) -> PathBuf {
        self.root.join("feature_journal.jsonl")
    }

    pub fn checkpoint_path(&self) -> PathBuf {
        self.root.join("checkpoint.json")
    }

    pub fn progress_path(&self) -> PathBuf {
        self.root.join("agent_progress.txt")
    }

    pub fn spec_path(&self) -> PathBuf {
        self.root.join("app_spec.txt")
    }

    // -- probes (used for run-mode auto-detection) --------------------

    pub fn has_checklist(&self) -> bool {
        self.checklist_path().exists()
    }

    pub fn has_checkpoint(&self) -> bool {
        self.checkpoint_path().exists()
    }

    pub fn has_progress(&self) -> bool {
        self.progress_path().exists()
    }

    pub fn has_git(&self) -> bool {
        self.root.join(".git").exists()
    }

    pub fn has_spec(&self) -> bool {
        self.spec_path().exists()
    }

    // -- typed accessors ----------------------------------------------

    pub fn load_checklist(&self) -> Result<FeatureList, StoreError> {
        FeatureList::load(&self.checklist_path())
    }

    pub fn save_checklist(&self, list: &FeatureList) -> Result<(), StoreError> {
        list.save(&self.checklist_path())
    }

    pub fn load_checkpoint(&self) -> Result<Option<Checkpoint>, StoreError> {
        Checkpoint::load(&self.checkpoint_path())
    }

    pub fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), StoreError> {
        checkpoint.save(&self.checkpoint_path())
    }

    pub fn progress_log(&self) -> ProgressLog {
        ProgressLog::new(self.progress_path())
    }

    pub fn journal(&self) -> TransitionJournal {
        TransitionJournal::new(self.journal_path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FeatureCategory, FeatureEntry};

    #[test]
    fn paths_are_rooted_in_project_dir() {
        let store = ProjectStore::new("/proj");
        assert_eq!(
            store.checklist_path(),
            PathBuf::from("/proj/feature_list.json")
        );
        assert_eq!(
            store.checkpoint_path(),
            PathBuf::from("/proj/checkpoint.json")
        );
        assert_eq!(
            store.progress_path(),
            PathBuf::from("/proj/agent_progress.txt")
        );
    }

    #[test]
    fn probes_reflect_files_on_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ProjectStore::new(tmp.path());
        assert!(!store.has_checklist());
        assert!(!store.has_checkpoint());
        assert!(!store.has_git());

        let list = FeatureList::new(vec![FeatureEntry::new(
            FeatureCategory::Functional,
            "a",
            vec![],
        )]);
        store.save_checklist(&list).unwrap();
        std::fs::create_dir(tmp.path().join(".git")).unwrap();

        assert!(store.has_checklist());
        assert!(store.has_git());
        assert_eq!(store.load_checklist().unwrap(), list);
    }
}
