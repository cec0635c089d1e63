//! The `Backend` trait -- the uniform client interface all adapters
//! satisfy.
//!
//! The trait is intentionally object-safe so adapters can be stored as
//! `Box<dyn Backend>` in the [`super::BackendRegistry`]; the
//! orchestrator never knows which concrete backend is active.

use std::pin::Pin;

use anyhow::Result;
use async_trait::async_trait;
use futures::Stream;

use crate::parser::AgentEvent;

use super::types::{SessionHandle, SessionRequest};

/// Adapter interface for spawning and supervising coding-agent CLIs.
///
/// Implementors wrap a specific agent binary (e.g. `claude`,
/// `copilot`) and translate its process I/O into the common
/// [`AgentEvent`] stream via the shared normalizer.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Stable adapter name (e.g. "claude-code"), used for registry
    /// lookup and configuration.
    fn name(&self) -> &str;

    /// Spawn one external process for the session.
    ///
    /// The adapter must:
    /// 1. Build the subprocess invocation with its backend-specific
    ///    flags (non-interactive, auto-approve, trusted directory).
    /// 2. Run in `request.working_dir`.
    /// 3. Inherit the host environment and merge `request.env` on top.
    /// 4. Deliver `request.prompt` (stdin or argv, adapter's choice).
    ///
    /// A spawn failure (missing binary, permission denied) is
    /// session-fatal and surfaced as an error here; retry policy
    /// belongs to the orchestrator.
    async fn start_session(&self, request: &SessionRequest) -> Result<SessionHandle>;

    /// The session's lazy event sequence.
    ///
    /// Yields events until the process exits, then exactly one
    /// terminal `Completion` (exit 0) or `Error` (anything else) and
    /// nothing further. Denied tool calls surface as non-terminal
    /// `Error` events mid-stream.
    fn events(&self, handle: &SessionHandle) -> Pin<Box<dyn Stream<Item = AgentEvent> + Send>>;

    /// Terminate the session's process: SIGTERM, bounded grace wait,
    /// then SIGKILL. The child is reaped on every path.
    async fn cancel(&self, handle: &SessionHandle) -> Result<()>;

    /// Whether the session's process is still alive.
    async fn is_running(&self, handle: &SessionHandle) -> bool;
}

// Compile-time assertion: Backend must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn Backend) {}
};

#[cfg(test)]
mod tests {
    use super::*;

    /// Trivial backend proving the trait is implementable and usable
    /// as `dyn Backend`.
    struct NoopBackend;

    #[async_trait]
    impl Backend for NoopBackend {
        fn name(&self) -> &str {
            "noop"
        }

        async fn start_session(&self, request: &SessionRequest) -> Result<SessionHandle> {
            Ok(SessionHandle {
                pid: 0,
                session_id: request.session_id,
                backend_name: "noop".to_string(),
            })
        }

        fn events(
            &self,
            _handle: &SessionHandle,
        ) -> Pin<Box<dyn Stream<Item = AgentEvent> + Send>> {
            Box::pin(futures::stream::empty())
        }

        async fn cancel(&self, _handle: &SessionHandle) -> Result<()> {
            Ok(())
        }

        async fn is_running(&self, _handle: &SessionHandle) -> bool {
            false
        }
    }

    #[test]
    fn backend_is_object_safe() {
        let backend: Box<dyn Backend> = Box::new(NoopBackend);
        assert_eq!(backend.name(), "noop");
    }

    #[tokio::test]
    async fn noop_backend_start_and_query() {
        use futures::StreamExt;

        let backend: Box<dyn Backend> = Box::new(NoopBackend);
        let request = SessionRequest::new("do things", "/tmp");
        let handle = backend.start_session(&request).await.unwrap();
        assert_eq!(handle.session_id, request.session_id);
        assert_eq!(handle.backend_name, "noop");
        assert!(!backend.is_running(&handle).await);

        let events: Vec<AgentEvent> = backend.events(&handle).collect().await;
        assert!(events.is_empty());

        backend.cancel(&handle).await.unwrap();
    }
}
