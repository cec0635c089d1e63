//! Multi-session control loop.
//!
//! Drives the phase machine
//! `Uninitialized -> Initializing -> Working -> Checkpointing ->
//! (Working | Terminated)` over the durable [`ProjectStore`]:
//!
//! - With no prior checkpoint, session zero runs an initializer prompt
//!   that must populate the feature checklist.
//! - Each `Working` phase opens exactly one bounded backend session --
//!   never more than one against the same store -- and relays its
//!   events to the observer.
//! - `Checkpointing` always runs at session end, on every outcome
//!   path: merge the agent's checklist assertions monotonically,
//!   journal the transitions, persist checklist + checkpoint
//!   atomically, and append a human-readable progress note.
//!
//! Nothing in memory is trusted across process restarts: on startup,
//! state is reconstructed purely from the persisted files, so a crash
//! that never reached `Checkpointing` simply resumes from the last
//! checkpoint.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use drover_store::{Checkpoint, FeatureList, ProjectStore, TransitionJournal};

use crate::backend::{Backend, BackendRegistry, SessionRequest};
use crate::lifecycle::{SessionStatus, run_session};
use crate::parser::AgentEvent;
use crate::prompt;
use crate::services::ServiceMap;

// ---------------------------------------------------------------------------
// Phase machine
// ---------------------------------------------------------------------------

/// Phases of the orchestrator run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Uninitialized,
    Initializing,
    Working,
    Checkpointing,
    Terminated,
}

impl SessionPhase {
    /// Whether `from -> to` is an edge of the phase graph.
    ///
    /// ```text
    /// uninitialized -> initializing
    /// initializing  -> working
    /// working       -> checkpointing
    /// checkpointing -> working
    /// checkpointing -> terminated
    /// ```
    pub fn is_valid_transition(from: Self, to: Self) -> bool {
        matches!(
            (from, to),
            (Self::Uninitialized, Self::Initializing)
                | (Self::Initializing, Self::Working)
                | (Self::Working, Self::Checkpointing)
                | (Self::Checkpointing, Self::Working)
                | (Self::Checkpointing, Self::Terminated)
        )
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Uninitialized => "uninitialized",
            Self::Initializing => "initializing",
            Self::Working => "working",
            Self::Checkpointing => "checkpointing",
            Self::Terminated => "terminated",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Configuration & outcomes
// ---------------------------------------------------------------------------

/// How session zero chooses its initializer prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    /// Enhancement when the project already has a git history,
    /// greenfield otherwise.
    #[default]
    Auto,
    /// Build a new project from the spec.
    Greenfield,
    /// Add the spec's features to an existing codebase.
    Enhancement,
}

impl FromStr for RunMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "auto" => Ok(Self::Auto),
            "greenfield" => Ok(Self::Greenfield),
            "enhancement" => Ok(Self::Enhancement),
            other => anyhow::bail!("invalid mode '{other}' (auto, greenfield, enhancement)"),
        }
    }
}

/// Orchestrator settings for one run.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Backend adapter to drive. Unknown names fail at startup.
    pub backend: String,
    /// Model override forwarded to backends that honor one.
    pub model: Option<String>,
    /// Maximum number of coding sessions; `None` runs to completion.
    pub max_iterations: Option<u64>,
    /// Wall-clock budget per coding session.
    pub session_timeout: Duration,
    /// Wall-clock budget for session zero, which legitimately runs
    /// much longer.
    pub initializer_timeout: Duration,
    /// Initializer selection.
    pub mode: RunMode,
    /// Declared auxiliary tool services.
    pub services: ServiceMap,
    /// Spec file to copy into the project when it has none.
    pub spec_source: Option<PathBuf>,
}

/// Why a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every checklist entry passes.
    AllPassing,
    /// The iteration budget ran out with work remaining.
    BudgetExhausted,
    /// An external stop request; resumable from the same checkpoint.
    Stopped,
    /// Session zero did not produce a usable feature checklist.
    InitializerFailed,
    /// The backend hit an API rate limit; resumable once it resets.
    RateLimited,
}

// ---------------------------------------------------------------------------
// Run loop
// ---------------------------------------------------------------------------

/// Run the autonomous loop to an outcome.
///
/// `observer` sees every event of every session, for live display.
/// Persistence failures abort with `Err` -- proceeding with unsaved
/// state would forfeit the monotonic-progress guarantee.
pub async fn run_autonomous(
    store: &ProjectStore,
    registry: &BackendRegistry,
    config: &OrchestratorConfig,
    cancel: CancellationToken,
    observer: &mut (dyn FnMut(&AgentEvent) + Send),
) -> Result<RunOutcome> {
    store.ensure_root()?;
    let backend = registry.get_required(&config.backend)?;
    prompt::ensure_spec(store, config.spec_source.as_deref())?;

    let mut phase = SessionPhase::Uninitialized;

    // Crash recovery: trust only the persisted files. A checklist plus
    // checkpoint means initialization finished, whatever happened to
    // the process since.
    if store.has_checklist() && store.has_checkpoint() {
        info!(root = %store.root().display(), "resuming from existing checkpoint");
        phase = SessionPhase::Working;
    } else {
        transition(&mut phase, SessionPhase::Initializing);
        match initialize(store, backend, config, &cancel, observer).await? {
            InitResult::Ready => transition(&mut phase, SessionPhase::Working),
            InitResult::Outcome(outcome) => return Ok(outcome),
        }
    }

    let journal = store.journal();
    let mut checklist = store.load_checklist()?;
    let mut checkpoint = store
        .load_checkpoint()?
        .context("checkpoint missing after initialization")?;

    // A corrupted rewrite is detected by replay, not trusted blindly.
    match journal.verify(&checklist) {
        Ok(check) if !check.is_consistent() => {
            warn!(issues = ?check.issues, "checklist does not replay from its journal");
        }
        Err(e) => warn!(error = %e, "could not verify checklist journal"),
        _ => {}
    }

    let mut last_error: Option<String> = None;

    loop {
        // These checks re-evaluate the continue-vs-stop decision of the
        // (possibly previous process's) Checkpointing phase; on the
        // resume path no in-process Checkpointing preceded them.
        if checklist.is_complete() {
            if checklist.is_empty() {
                warn!("checklist is empty; nothing to do");
            }
            info!(total = checklist.len(), "all features passing");
            return Ok(RunOutcome::AllPassing);
        }
        if let Some(max) = config.max_iterations {
            if checkpoint.iteration >= max {
                info!(iterations = checkpoint.iteration, "iteration budget exhausted");
                return Ok(RunOutcome::BudgetExhausted);
            }
        }
        if cancel.is_cancelled() {
            info!("stop requested before next session; pausing run");
            return Ok(RunOutcome::Stopped);
        }

        // One bounded session. At most one backend session is ever
        // live against this store.
        info!(
            iteration = checkpoint.iteration + 1,
            passing = checklist.passing_count(),
            total = checklist.len(),
            "opening coding session"
        );
        let request = session_request(
            store,
            config,
            prompt::build_session_prompt(
                prompt::CODING_PROMPT,
                &prompt::progress_tail(store),
                last_error.as_deref(),
            ),
        );
        let session_result =
            run_session(backend, &request, config.session_timeout, &cancel, observer).await;

        // Working -> Checkpointing, unconditionally.
        transition(&mut phase, SessionPhase::Checkpointing);

        match session_result {
            Ok(report) => {
                let merge_summary = apply_assertions(store, &mut checklist, &journal)?;
                let note = session_note(&report.status, &merge_summary, report.tool_calls, report.denied_commands);
                checkpoint_session(store, &mut checkpoint, &checklist, report.status.label(), &note)?;

                match report.status {
                    SessionStatus::Completed => {
                        last_error = None;
                        transition(&mut phase, SessionPhase::Working);
                    }
                    SessionStatus::Failed { message } => {
                        // Counts against the budget; the next session
                        // retries the same pending features.
                        warn!(error = %message, "session failed; will retry remaining features");
                        last_error = Some(message);
                        transition(&mut phase, SessionPhase::Working);
                    }
                    SessionStatus::TimedOut => {
                        last_error = Some(
                            "the previous session exceeded its time budget and was \
                             terminated; pick a smaller next step"
                                .to_string(),
                        );
                        transition(&mut phase, SessionPhase::Working);
                    }
                    SessionStatus::Cancelled => {
                        info!("run paused by stop request; resumable from this checkpoint");
                        transition(&mut phase, SessionPhase::Terminated);
                        return Ok(RunOutcome::Stopped);
                    }
                    SessionStatus::RateLimited { message } => {
                        warn!(%message, "pausing run until the rate limit resets");
                        transition(&mut phase, SessionPhase::Terminated);
                        return Ok(RunOutcome::RateLimited);
                    }
                }
            }
            Err(spawn_error) => {
                // SpawnFailure is session-fatal and not retried: a
                // missing binary will not heal between iterations.
                // Still checkpoint so the attempt is on the record.
                error!(error = %spawn_error, "backend session could not be started");
                let note = format!("backend failed to start: {spawn_error:#}");
                checkpoint_session(store, &mut checkpoint, &checklist, "spawn failed", &note)?;
                transition(&mut phase, SessionPhase::Terminated);
                return Err(spawn_error.context("backend session could not be started"));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Session zero
// ---------------------------------------------------------------------------

enum InitResult {
    Ready,
    Outcome(RunOutcome),
}

/// Run the initializer session and validate what it produced.
async fn initialize(
    store: &ProjectStore,
    backend: &dyn Backend,
    config: &OrchestratorConfig,
    cancel: &CancellationToken,
    observer: &mut (dyn FnMut(&AgentEvent) + Send),
) -> Result<InitResult> {
    let template = match config.mode {
        RunMode::Greenfield => prompt::INITIALIZER_PROMPT,
        RunMode::Enhancement => prompt::ENHANCEMENT_INITIALIZER_PROMPT,
        RunMode::Auto => {
            if store.has_git() {
                info!("existing git history detected; using enhancement initializer");
                prompt::ENHANCEMENT_INITIALIZER_PROMPT
            } else {
                info!("fresh project; using greenfield initializer");
                prompt::INITIALIZER_PROMPT
            }
        }
    };

    info!("running initializer session (this can take a while)");
    let request = session_request(
        store,
        config,
        prompt::build_session_prompt(template, &prompt::progress_tail(store), None),
    );
    let report = run_session(
        backend,
        &request,
        config.initializer_timeout,
        cancel,
        observer,
    )
    .await?;

    match report.status {
        SessionStatus::Cancelled => return Ok(InitResult::Outcome(RunOutcome::Stopped)),
        SessionStatus::RateLimited { message } => {
            warn!(%message, "rate limited during initialization");
            return Ok(InitResult::Outcome(RunOutcome::RateLimited));
        }
        _ => {}
    }

    // The initializer has one hard deliverable: a valid, non-empty
    // feature checklist. Without it there is no work to iterate on.
    if !store.has_checklist() {
        error!("initializer finished without creating feature_list.json");
        store
            .progress_log()
            .append_note(0, "initializer failed", "no feature_list.json was created")?;
        return Ok(InitResult::Outcome(RunOutcome::InitializerFailed));
    }

    let checklist = match store.load_checklist() {
        Ok(list) if !list.is_empty() => list,
        Ok(_) => {
            error!("initializer produced an empty feature checklist");
            store
                .progress_log()
                .append_note(0, "initializer failed", "feature_list.json is empty")?;
            return Ok(InitResult::Outcome(RunOutcome::InitializerFailed));
        }
        Err(e) => {
            error!(error = %e, "initializer produced an unreadable feature checklist");
            store.progress_log().append_note(
                0,
                "initializer failed",
                &format!("feature_list.json is invalid: {e}"),
            )?;
            return Ok(InitResult::Outcome(RunOutcome::InitializerFailed));
        }
    };

    // Canonicalize the file, journal the creation, and write the
    // first checkpoint. From here on the run is resumable.
    store.save_checklist(&checklist)?;
    let journal = store.journal();
    journal.record_creation(&checklist)?;
    let pre_passing: Vec<usize> = checklist
        .entries()
        .iter()
        .enumerate()
        .filter(|(_, e)| e.passes)
        .map(|(i, _)| i)
        .collect();
    journal.record_passes(&pre_passing)?;

    let checkpoint = Checkpoint {
        iteration: 0,
        tree_marker: read_tree_marker(store.root()),
        updated_at: Utc::now(),
    };
    store.save_checkpoint(&checkpoint)?;
    store.progress_log().append_note(
        0,
        "initialized",
        &format!("feature checklist created with {} entries", checklist.len()),
    )?;

    info!(features = checklist.len(), "initialization complete");
    Ok(InitResult::Ready)
}

// ---------------------------------------------------------------------------
// Checkpointing helpers
// ---------------------------------------------------------------------------

/// Merge the checklist the agent left on disk into the persisted
/// monotonic copy, journaling every applied transition. Returns a
/// human-readable summary for the progress note.
fn apply_assertions(
    store: &ProjectStore,
    checklist: &mut FeatureList,
    journal: &TransitionJournal,
) -> Result<String> {
    let mut lines = Vec::new();

    match store.load_checklist() {
        Ok(on_disk) => {
            let outcome = checklist.merge_assertions(&on_disk);
            if outcome.identity_mismatch {
                warn!("checklist rewrite changed entry identity; keeping persisted copy");
                lines.push("checklist rewrite rejected (entries changed); kept persisted copy".to_string());
            }
            if !outcome.newly_passing.is_empty() {
                journal.record_passes(&outcome.newly_passing)?;
                lines.push(format!(
                    "features newly passing: {}",
                    outcome
                        .newly_passing
                        .iter()
                        .map(|i| (i + 1).to_string())
                        .collect::<Vec<_>>()
                        .join(", ")
                ));
            }
            if outcome.regressions_rejected > 0 {
                warn!(
                    count = outcome.regressions_rejected,
                    "rejected pass regressions from agent rewrite"
                );
                lines.push(format!(
                    "rejected {} pass regression(s)",
                    outcome.regressions_rejected
                ));
            }
        }
        Err(e) => {
            warn!(error = %e, "checklist unreadable after session; keeping persisted copy");
            lines.push(format!("checklist unreadable after session ({e}); kept persisted copy"));
        }
    }

    Ok(lines.join("\n"))
}

/// The `Checkpointing` phase body: bump the counter, refresh the tree
/// marker, persist checklist and checkpoint atomically, and append the
/// session note. Any failure here is a persistence failure and aborts
/// the run.
fn checkpoint_session(
    store: &ProjectStore,
    checkpoint: &mut Checkpoint,
    checklist: &FeatureList,
    status: &str,
    note: &str,
) -> Result<()> {
    checkpoint.iteration += 1;
    checkpoint.tree_marker = read_tree_marker(store.root());
    checkpoint.updated_at = Utc::now();

    store.save_checklist(checklist)?;
    store.save_checkpoint(checkpoint)?;
    store
        .progress_log()
        .append_note(checkpoint.iteration, status, note)?;

    info!(
        iteration = checkpoint.iteration,
        passing = checklist.passing_count(),
        total = checklist.len(),
        "checkpoint written"
    );
    Ok(())
}

/// Compose the harness-side session note (the agent writes its own
/// narrative into the progress log as well).
fn session_note(
    status: &SessionStatus,
    merge_summary: &str,
    tool_calls: usize,
    denied: usize,
) -> String {
    let mut note = match status {
        SessionStatus::Completed => "session completed".to_string(),
        SessionStatus::Failed { message } => format!("session failed: {message}"),
        SessionStatus::TimedOut => "session timed out and was terminated".to_string(),
        SessionStatus::Cancelled => "session cancelled by stop request".to_string(),
        SessionStatus::RateLimited { message } => format!("rate limited: {message}"),
    };
    note.push_str(&format!("\ntool calls: {tool_calls}, denied: {denied}"));
    if !merge_summary.is_empty() {
        note.push('\n');
        note.push_str(merge_summary);
    }
    note
}

fn session_request(
    store: &ProjectStore,
    config: &OrchestratorConfig,
    prompt: String,
) -> SessionRequest {
    let mut request = SessionRequest::new(prompt, store.root());
    request.model = config.model.clone();
    request.services = config.services.clone();
    request
}

/// Best-effort working-tree marker for the checkpoint.
fn read_tree_marker(root: &Path) -> Option<String> {
    let output = std::process::Command::new("git")
        .args(["rev-parse", "HEAD"])
        .current_dir(root)
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let marker = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!marker.is_empty()).then_some(marker)
}

/// Assert-and-advance for the phase machine. Transitions are fixed at
/// compile time, so a violation is a harness bug; it is logged loudly
/// rather than silently accepted.
fn transition(phase: &mut SessionPhase, to: SessionPhase) {
    if !SessionPhase::is_valid_transition(*phase, to) {
        error!(from = %phase, to = %to, "invalid phase transition");
        debug_assert!(false, "invalid phase transition {phase} -> {to}");
    }
    *phase = to;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_graph_edges() {
        use SessionPhase::*;
        assert!(SessionPhase::is_valid_transition(Uninitialized, Initializing));
        assert!(SessionPhase::is_valid_transition(Initializing, Working));
        assert!(SessionPhase::is_valid_transition(Working, Checkpointing));
        assert!(SessionPhase::is_valid_transition(Checkpointing, Working));
        assert!(SessionPhase::is_valid_transition(Checkpointing, Terminated));
    }

    #[test]
    fn phase_graph_rejects_shortcuts() {
        use SessionPhase::*;
        assert!(!SessionPhase::is_valid_transition(Uninitialized, Working));
        assert!(!SessionPhase::is_valid_transition(Working, Terminated));
        assert!(!SessionPhase::is_valid_transition(Working, Working));
        assert!(!SessionPhase::is_valid_transition(Terminated, Working));
        assert!(!SessionPhase::is_valid_transition(Initializing, Checkpointing));
    }

    #[test]
    fn run_mode_parses() {
        assert_eq!("auto".parse::<RunMode>().unwrap(), RunMode::Auto);
        assert_eq!(
            "greenfield".parse::<RunMode>().unwrap(),
            RunMode::Greenfield
        );
        assert_eq!(
            "enhancement".parse::<RunMode>().unwrap(),
            RunMode::Enhancement
        );
        assert!("yolo".parse::<RunMode>().is_err());
    }

    #[test]
    fn session_note_carries_failure_detail() {
        let note = session_note(
            &SessionStatus::Failed {
                message: "exit 2".into(),
            },
            "features newly passing: 1",
            5,
            1,
        );
        assert!(note.contains("exit 2"));
        assert!(note.contains("tool calls: 5, denied: 1"));
        assert!(note.contains("newly passing: 1"));
    }

    #[test]
    fn tree_marker_outside_a_repo_is_none() {
        let tmp = tempfile::tempdir().unwrap();
        assert_eq!(read_tree_marker(tmp.path()), None);
    }
}
