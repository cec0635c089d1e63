//! GitHub Copilot CLI backend adapter.
//!
//! Spawns `copilot -p <prompt> --allow-all-tools --add-dir <workdir>`
//! with a project-local configuration directory (via
//! `XDG_CONFIG_HOME`), materializing declared auxiliary services into
//! the CLI's `mcp-config.json`. The prompt travels on the command
//! line; output parsing is the same shared normalizer as every other
//! backend.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::Stream;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::debug;

use crate::parser::AgentEvent;
use crate::services;

use super::stream::{self, ProcessMap};
use super::trait_def::Backend;
use super::types::{ProcessState, SessionHandle, SessionRequest};

/// Backend adapter for the GitHub Copilot CLI.
#[derive(Clone)]
pub struct CopilotBackend {
    /// Path to the `copilot` binary. Defaults to `"copilot"` on `$PATH`.
    binary_path: String,
    /// Per-process bookkeeping, keyed by OS pid.
    processes: ProcessMap,
}

impl std::fmt::Debug for CopilotBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CopilotBackend")
            .field("binary_path", &self.binary_path)
            .finish()
    }
}

impl CopilotBackend {
    /// Adapter that looks for `copilot` on `$PATH`.
    pub fn new() -> Self {
        Self {
            binary_path: "copilot".to_string(),
            processes: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Adapter with a custom binary path (tests, non-standard installs).
    pub fn with_binary(path: impl Into<String>) -> Self {
        Self {
            binary_path: path.into(),
            processes: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl Default for CopilotBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backend for CopilotBackend {
    fn name(&self) -> &str {
        "copilot"
    }

    async fn start_session(&self, request: &SessionRequest) -> Result<SessionHandle> {
        // Project-local config dir so per-project MCP config does not
        // leak into (or read from) the user's global Copilot setup.
        let config_dir = request.working_dir.join(".copilot");
        std::fs::create_dir_all(&config_dir)
            .with_context(|| format!("failed to create {}", config_dir.display()))?;

        // Declared services the CLI can honor; ones it cannot express
        // are simply absent from the rendered config, never fatal.
        if !request.services.is_empty() {
            let mcp_path = config_dir.join("mcp-config.json");
            std::fs::write(
                &mcp_path,
                serde_json::to_string_pretty(&services::to_mcp_config_json(&request.services))?,
            )
            .with_context(|| format!("failed to write {}", mcp_path.display()))?;
        }

        let mut cmd = Command::new(&self.binary_path);
        cmd.arg("-p")
            .arg(&request.prompt)
            // Autonomous operation without confirmation prompts.
            .arg("--allow-all-tools")
            // Trust the project directory.
            .arg("--add-dir")
            .arg(&request.working_dir);

        cmd.current_dir(&request.working_dir);
        cmd.env("XDG_CONFIG_HOME", &config_dir);
        for (key, value) in &request.env {
            cmd.env(key, value);
        }

        cmd.stdin(std::process::Stdio::null());
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());

        let mut child = cmd.spawn().with_context(|| {
            format!(
                "failed to spawn copilot binary at '{}' -- is it installed and on PATH?",
                self.binary_path
            )
        })?;

        let pid = child.id().context("child process has no pid")?;
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

        debug!(pid, session = %request.session_id, "spawned copilot session");

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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::ServiceDecl;

    #[test]
    fn backend_name_is_copilot() {
        assert_eq!(CopilotBackend::new().name(), "copilot");
    }

    #[tokio::test]
    async fn spawn_binary_not_found_returns_error() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = CopilotBackend::with_binary("/nonexistent/copilot");
        let request = SessionRequest::new("prompt", tmp.path());
        assert!(backend.start_session(&request).await.is_err());
    }

    #[tokio::test]
    async fn services_are_materialized_into_project_config() {
        let tmp = tempfile::tempdir().unwrap();
        // Use /bin/true as a stand-in binary that exits immediately.
        let backend = CopilotBackend::with_binary("/bin/true");
        let mut request = SessionRequest::new("prompt", tmp.path());
        request.services.insert(
            "docs".to_string(),
            ServiceDecl::Http {
                url: "http://127.0.0.1:3000/mcp".to_string(),
            },
        );

        let handle = backend.start_session(&request).await.unwrap();
        let config = tmp.path().join(".copilot/mcp-config.json");
        assert!(config.exists());
        let parsed: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(config).unwrap()).unwrap();
        assert_eq!(parsed["mcpServers"]["docs"]["url"], "http://127.0.0.1:3000/mcp");

        backend.cancel(&handle).await.unwrap();
    }
}
