//! Session prompt templates and composition.
//!
//! Three templates: the greenfield initializer (session zero on an
//! empty project), the enhancement initializer (session zero on an
//! existing codebase), and the coding prompt every later session gets.
//! [`build_session_prompt`] layers the durable narrative context on
//! top: the tail of the progress log, and -- when the previous session
//! failed -- an error-context preamble so the agent adapts instead of
//! repeating the failure.

use std::path::Path;

use anyhow::{Context, Result, bail};
use drover_store::ProjectStore;

/// How much of the progress log tail is carried into a prompt.
const PROGRESS_TAIL_BYTES: usize = 16 * 1024;

/// Session-zero prompt for an empty project.
pub const INITIALIZER_PROMPT: &str = r#"You are starting a brand-new project.

Read app_spec.txt in the current directory. It describes the
application you are going to build across many work sessions.

Your job in THIS session:

1. Create feature_list.json in the current directory: a JSON array of
   feature objects, each with exactly these fields:
     - "category": "functional" or "style"
     - "description": what the feature is
     - "steps": an array of strings, the steps to verify it end to end
     - "passes": false
   Cover every requirement in app_spec.txt. Be thorough; one feature
   per testable behavior. Every entry starts with "passes": false.
2. Initialize a git repository and make an initial commit.
3. Create agent_progress.txt with a short note describing the project
   setup and what the next session should start on.
4. If there is time left, scaffold the project (build files, directory
   layout, a hello-world entry point) and commit again.

Rules that apply to every session:
- Never delete or reorder entries in feature_list.json.
- Never change a feature's category, description, or steps.
- Only flip "passes" from false to true, and only after you have
  verified the feature by following its steps yourself.
"#;

/// Session-zero prompt for an existing codebase.
pub const ENHANCEMENT_INITIALIZER_PROMPT: &str = r#"You are adding features to an existing project.

Read app_spec.txt in the current directory. It describes the features
to add to this codebase.

Your job in THIS session:

1. Explore the existing code: layout, build system, conventions, how
   it runs, what already works.
2. Create feature_list.json in the current directory: a JSON array of
   feature objects, each with exactly these fields:
     - "category": "functional" or "style"
     - "description": what the feature is
     - "steps": an array of strings, the steps to verify it end to end
     - "passes": false
   Cover every requirement in app_spec.txt that the codebase does not
   already satisfy. Every entry starts with "passes": false.
3. Append a note to agent_progress.txt (create it if missing)
   summarizing the codebase and what the next session should start on.

Rules that apply to every session:
- Never delete or reorder entries in feature_list.json.
- Never change a feature's category, description, or steps.
- Only flip "passes" from false to true, and only after you have
  verified the feature by following its steps yourself.
"#;

/// Prompt for every coding session after initialization.
pub const CODING_PROMPT: &str = r#"You are continuing work on the project in the current directory.

Get oriented first:
1. Read agent_progress.txt for the story so far.
2. Read feature_list.json and find the FIRST entry with "passes": false.
3. Run git log --oneline -20 to see recent work.

Then work on that one feature:
- Implement it completely.
- Verify it by following the feature's "steps" yourself, end to end.
- Only when verification succeeds, edit feature_list.json and flip that
  entry's "passes" to true. Do not touch any other entry.
- Commit your work with a descriptive message.
- Append a note to agent_progress.txt: what you did, what you verified,
  and what the next session should pick up.

Hard rules:
- Work on features in checklist order; do not skip ahead because
  something looks easier.
- Never flip "passes" on a feature you did not verify this session.
- Never set a "passes" value from true back to false, never delete or
  reorder entries, never edit descriptions or steps.
- Prefer finishing one feature well over starting several.
"#;

/// Compose the full prompt for one session.
pub fn build_session_prompt(
    base: &str,
    progress_tail: &str,
    previous_error: Option<&str>,
) -> String {
    let mut prompt = String::new();

    if let Some(error) = previous_error {
        prompt.push_str(&error_context_block(error));
    }

    if !progress_tail.trim().is_empty() {
        prompt.push_str("Progress notes from earlier sessions (most recent last):\n\n");
        prompt.push_str(progress_tail.trim_end());
        prompt.push_str("\n\n---\n\n");
    }

    prompt.push_str(base);
    prompt
}

/// Preamble injected when the previous session ended in an error, so
/// the agent adapts its approach instead of repeating the failure.
pub fn error_context_block(error: &str) -> String {
    format!(
        "IMPORTANT: The previous session encountered an error. Adapt your \
         approach to avoid repeating it.\n\n\
         Previous error:\n{error}\n\n\
         Do NOT repeat the exact action that caused this error. If a tool \
         response was too large, use parameters that produce smaller \
         responses. Acknowledge the error and state your adapted approach \
         before proceeding.\n\n---\n\n"
    )
}

/// Make sure `app_spec.txt` exists in the project.
///
/// If the project already has one it is left alone; otherwise `source`
/// is copied in. With no spec and no source the run cannot start --
/// the initializer would have nothing to build from.
pub fn ensure_spec(store: &ProjectStore, source: Option<&Path>) -> Result<()> {
    if store.has_spec() {
        return Ok(());
    }
    match source {
        Some(source) => {
            std::fs::copy(source, store.spec_path()).with_context(|| {
                format!(
                    "failed to copy spec from {} to {}",
                    source.display(),
                    store.spec_path().display()
                )
            })?;
            tracing::info!(spec = %store.spec_path().display(), "copied app spec into project");
            Ok(())
        }
        None => bail!(
            "no app_spec.txt found in {} and no --spec file given; \
             create one describing what to build",
            store.root().display()
        ),
    }
}

/// Read the bounded progress tail used for prompt composition.
pub fn progress_tail(store: &ProjectStore) -> String {
    store
        .progress_log()
        .read_tail(PROGRESS_TAIL_BYTES)
        .unwrap_or_default()
}
