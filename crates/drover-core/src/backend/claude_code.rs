//! Claude Code backend adapter.
//!
//! Spawns `claude -p --output-format stream-json` as a subprocess with
//! a project-scoped permission settings file, writes the task prompt
//! to stdin, and streams output through the shared normalizer.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use futures::Stream;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::debug;

use crate::parser::AgentEvent;
use crate::services;

use super::stream::{self, ProcessMap};
use super::trait_def::Backend;
use super::types::{ProcessState, SessionHandle, SessionRequest};

/// Tools the agent may use inside its own runtime.
const ALLOWED_TOOLS: &str = "Bash,Read,Edit,Write,Glob,Grep,WebFetch,WebSearch";

/// System prompt appended to every session.
const SYSTEM_PROMPT: &str =
    "You are an expert full-stack developer building a production-quality application.";

/// Backend adapter for the Claude Code CLI.
#[derive(Clone)]
pub struct ClaudeCodeBackend {
    /// Path to the `claude` binary. Defaults to `"claude"` on `$PATH`.
    binary_path: String,
    /// Whether to require an API credential in the environment before
    /// spawning. Disabled by [`Self::with_binary`] so tests can drive
    /// scripted stand-ins.
    require_credentials: bool,
    /// Per-process bookkeeping, keyed by OS pid.
    processes: ProcessMap,
}

impl std::fmt::Debug for ClaudeCodeBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClaudeCodeBackend")
            .field("binary_path", &self.binary_path)
            .finish()
    }
}

impl ClaudeCodeBackend {
    /// Adapter that looks for `claude` on `$PATH`.
    pub fn new() -> Self {
        Self {
            binary_path: "claude".to_string(),
            require_credentials: true,
            processes: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Adapter with a custom binary path. Skips the credential check,
    /// since a custom binary is typically a test stand-in.
    pub fn with_binary(path: impl Into<String>) -> Self {
        Self {
            binary_path: path.into(),
            require_credentials: false,
            processes: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Permission settings restricting the agent to its project
    /// directory, written next to the project so the paths in it stay
    /// relative to the session's working dir.
    fn settings_json() -> serde_json::Value {
        serde_json::json!({
            "sandbox": { "enabled": true, "autoAllowBashIfSandboxed": true },
            "permissions": {
                "defaultMode": "acceptEdits",
                "allow": [
                    "Read(./**)",
                    "Write(./**)",
                    "Edit(./**)",
                    "Glob(./**)",
                    "Grep(./**)",
                    "Bash(*)",
                    "WebFetch(*)",
                    "WebSearch",
                ],
            },
        })
    }
}

impl Default for ClaudeCodeBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backend for ClaudeCodeBackend {
    fn name(&self) -> &str {
        "claude-code"
    }

    async fn start_session(&self, request: &SessionRequest) -> Result<SessionHandle> {
        if self.require_credentials
            && std::env::var("CLAUDE_CODE_OAUTH_TOKEN").is_err()
            && std::env::var("ANTHROPIC_API_KEY").is_err()
        {
            bail!(
                "no Claude credential found -- set CLAUDE_CODE_OAUTH_TOKEN \
                 (run `claude setup-token`) or ANTHROPIC_API_KEY"
            );
        }

        // Config material lives under .drover/ inside the project.
        let config_dir = request.working_dir.join(".drover");
        std::fs::create_dir_all(&config_dir)
            .with_context(|| format!("failed to create {}", config_dir.display()))?;

        let settings_path = config_dir.join("claude_settings.json");
        std::fs::write(
            &settings_path,
            serde_json::to_string_pretty(&Self::settings_json())?,
        )
        .with_context(|| format!("failed to write {}", settings_path.display()))?;

        let mut cmd = Command::new(&self.binary_path);
        cmd.arg("-p")
            .arg("--output-format")
            .arg("stream-json")
            .arg("--verbose")
            .arg("--allowedTools")
            .arg(ALLOWED_TOOLS)
            .arg("--append-system-prompt")
            .arg(SYSTEM_PROMPT)
            .arg("--settings")
            .arg(&settings_path);

        if let Some(model) = &request.model {
            cmd.arg("--model").arg(model);
        }

        // Declared auxiliary services, for backends that understand
        // MCP-style tool servers.
        if !request.services.is_empty() {
            let mcp_path = config_dir.join("mcp_servers.json");
            std::fs::write(
                &mcp_path,
                serde_json::to_string_pretty(&services::to_mcp_config_json(&request.services))?,
            )
            .with_context(|| format!("failed to write {}", mcp_path.display()))?;
            cmd.arg("--mcp-config").arg(&mcp_path);
        }

        cmd.current_dir(&request.working_dir);
        // Host environment is inherited (credential passthrough);
        // adapter additions are merged on top, never replacing it.
        for (key, value) in &request.env {
            cmd.env(key, value);
        }

        cmd.stdin(std::process::Stdio::piped());
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());

        let mut child = cmd.spawn().with_context(|| {
            format!(
                "failed to spawn claude binary at '{}' -- is it installed and on PATH?",
                self.binary_path
            )
        })?;

        let pid = child.id().context("child process has no pid")?;

        // The prompt goes in on stdin; closing it starts processing.
        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(request.prompt.as_bytes())
                .await
                .context("failed to write prompt to agent stdin")?;
            drop(stdin);
        }

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        {
            let mut processes = self.processes.lock().await;
            processes.insert(
                pid,
                ProcessState {
                    child,
                    stdout,
                    stderr,
                    working_dir: request.working_dir.clone(),
                },
            );
        }

        debug!(pid, session = %request.session_id, "spawned claude-code session");

        Ok(SessionHandle {
            pid,
            session_id: request.session_id,
            backend_name: self.name().to_string(),
        })
    }

    fn events(&self, handle: &SessionHandle) -> Pin<Box<dyn Stream<Item = AgentEvent> + Send>> {
        stream::event_stream(Arc::clone(&self.processes), handle.pid)
    }

    async fn cancel(&self, handle: &SessionHandle) -> Result<()> {
        stream::terminate(&self.processes, handle.pid).await
    }

    async fn is_running(&self, handle: &SessionHandle) -> bool {
        stream::check_running(&self.processes, handle.pid).await
    }
}
