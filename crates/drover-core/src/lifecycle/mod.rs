//! Single-session lifecycle: spawn a backend, consume its event
//! stream under a wall-clock budget, and classify how it ended.
//!
//! The lifecycle never touches durable state -- it returns a
//! [`SessionReport`] and the orchestrator checkpoints. Whatever
//! partial output exists when a session is cancelled or times out is
//! still carried in the report, so no session silently loses its
//! recorded progress.

use std::time::Duration;

use anyhow::{Context, Result};
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::backend::{Backend, SessionRequest};
use crate::parser::{AgentEvent, TextKind};

/// Bound on the raw-output tail carried into session notes.
const TEXT_TAIL_BYTES: usize = 8 * 1024;

/// Denial errors injected by the gate start with this prefix.
const DENIAL_PREFIX: &str = "command blocked:";

/// How one session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    /// Backend exited cleanly.
    Completed,
    /// Backend exited nonzero, or its stream failed.
    Failed { message: String },
    /// The wall-clock budget expired; the backend was cancelled.
    TimedOut,
    /// An external stop request cancelled the session.
    Cancelled,
    /// The backend reported an API rate limit; the run should pause
    /// until the limit resets.
    RateLimited { message: String },
}

impl SessionStatus {
    /// Short label used in progress-note headers.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed { .. } => "failed",
            Self::TimedOut => "timed out",
            Self::Cancelled => "cancelled",
            Self::RateLimited { .. } => "rate limited",
        }
    }
}

/// What happened during one session.
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub status: SessionStatus,
    /// Bounded tail of the raw output, for the progress note.
    pub text_tail: String,
    /// Tool calls surfaced by the normalizer.
    pub tool_calls: usize,
    /// Tool calls the security gate denied.
    pub denied_commands: usize,
    /// Name of the last tool the backend invoked.
    pub last_tool: Option<String>,
}

/// Run one bounded session against a backend.
///
/// Consumes the event stream until its terminal event, the timeout, or
/// an external cancellation. Timeout and cancellation both take the
/// graceful termination path (`Backend::cancel`: SIGTERM, bounded
/// grace, SIGKILL). Every event is relayed to `observer` before being
/// interpreted. A spawn failure propagates as `Err` -- session-fatal,
/// never retried here.
pub async fn run_session(
    backend: &dyn Backend,
    request: &SessionRequest,
    timeout: Duration,
    cancel: &CancellationToken,
    observer: &mut (dyn FnMut(&AgentEvent) + Send),
) -> Result<SessionReport> {
    let handle = backend
        .start_session(request)
        .await
        .context("failed to start backend session")?;

    info!(
        session = %request.session_id,
        backend = %handle.backend_name,
        pid = handle.pid,
        "session started"
    );

    let mut stream = backend.events(&handle);
    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);

    let mut report = SessionReport {
        status: SessionStatus::Completed,
        text_tail: String::new(),
        tool_calls: 0,
        denied_commands: 0,
        last_tool: None,
    };
    let mut terminal: Option<AgentEvent> = None;
    let mut decided: Option<SessionStatus> = None;

    loop {
        // Biased so an external stop always wins over pending output.
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!(session = %request.session_id, "stop requested, cancelling session");
                if let Err(e) = backend.cancel(&handle).await {
                    warn!(error = %e, "failed to cancel backend");
                }
                decided = Some(SessionStatus::Cancelled);
                break;
            }
            _ = &mut deadline => {
                warn!(session = %request.session_id, "session wall-clock budget exhausted");
                if let Err(e) = backend.cancel(&handle).await {
                    warn!(error = %e, "failed to cancel timed-out backend");
                }
                decided = Some(SessionStatus::TimedOut);
                break;
            }
            event = stream.next() => {
                let Some(event) = event else { break };
                observer(&event);

                match &event {
                    AgentEvent::Text { content, kind } => {
                        if matches!(kind, TextKind::Raw | TextKind::Plain) {
                            if let Some(message) = detect_rate_limit(content) {
                                warn!(session = %request.session_id, "rate limit reported by backend");
                                if let Err(e) = backend.cancel(&handle).await {
                                    warn!(error = %e, "failed to cancel rate-limited backend");
                                }
                                decided = Some(SessionStatus::RateLimited { message });
                                break;
                            }
                        }
                        if matches!(kind, TextKind::Raw) {
                            push_bounded(&mut report.text_tail, content, TEXT_TAIL_BYTES);
                        }
                    }
                    AgentEvent::ToolCall { name, .. } => {
                        report.tool_calls += 1;
                        report.last_tool = Some(name.clone());
                    }
                    AgentEvent::Error { message } if message.starts_with(DENIAL_PREFIX) => {
                        report.denied_commands += 1;
                    }
                    AgentEvent::Completion { .. } | AgentEvent::Error { .. } => {
                        terminal = Some(event.clone());
                    }
                    AgentEvent::StructuredPayload { .. } => {}
                }
            }
        }
    }

    report.status = match decided {
        Some(status) => status,
        None => match terminal {
            Some(AgentEvent::Completion { .. }) => SessionStatus::Completed,
            Some(AgentEvent::Error { message }) => SessionStatus::Failed { message },
            _ => SessionStatus::Failed {
                message: "backend stream ended without a terminal event".to_string(),
            },
        },
    };

    info!(
        session = %request.session_id,
        status = report.status.label(),
        tool_calls = report.tool_calls,
        denied = report.denied_commands,
        "session finished"
    );

    Ok(report)
}

/// Backend-agnostic rate-limit sniffing, matching the message shape
/// the agent APIs emit ("Limit reached ... resets ...").
fn detect_rate_limit(content: &str) -> Option<String> {
    if content.contains("Limit reached") && content.contains("resets") {
        Some(
            content
                .lines()
                .find(|l| l.contains("Limit reached"))
                .unwrap_or(content)
                .trim()
                .to_string(),
        )
    } else {
        None
    }
}

/// Append to `buf`, discarding from the front (on a char boundary)
/// once it exceeds `max` bytes.
fn push_bounded(buf: &mut String, chunk: &str, max: usize) {
    buf.push_str(chunk);
    if buf.len() > max {
        let mut cut = buf.len() - max;
        while cut < buf.len() && !buf.is_char_boundary(cut) {
            cut += 1;
        }
        buf.drain(..cut);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SessionHandle;
    use async_trait::async_trait;
    use futures::Stream;
    use std::pin::Pin;
    use std::sync::Mutex;

    /// In-memory backend that replays a canned event sequence.
    struct ScriptedBackend {
        events: Mutex<Vec<AgentEvent>>,
    }

    impl ScriptedBackend {
        fn new(events: Vec<AgentEvent>) -> Self {
            Self {
                events: Mutex::new(events),
            }
        }
    }

    #[async_trait]
    impl Backend for ScriptedBackend {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn start_session(&self, request: &SessionRequest) -> Result<SessionHandle> {
            Ok(SessionHandle {
                pid: 1234,
                session_id: request.session_id,
                backend_name: "scripted".to_string(),
            })
        }

        fn events(
            &self,
            _handle: &SessionHandle,
        ) -> Pin<Box<dyn Stream<Item = AgentEvent> + Send>> {
            let events = std::mem::take(&mut *self.events.lock().unwrap());
            Box::pin(futures::stream::iter(events))
        }

        async fn cancel(&self, _handle: &SessionHandle) -> Result<()> {
            Ok(())
        }

        async fn is_running(&self, _handle: &SessionHandle) -> bool {
            false
        }
    }

    fn request() -> SessionRequest {
        SessionRequest::new("prompt", "/tmp")
    }

    async fn run(backend: &ScriptedBackend) -> SessionReport {
        let cancel = CancellationToken::new();
        let mut seen = Vec::new();
        let report = run_session(
            backend,
            &request(),
            Duration::from_secs(5),
            &cancel,
            &mut |event| seen.push(event.clone()),
        )
        .await
        .unwrap();
        report
    }

    #[tokio::test]
    async fn clean_completion_is_completed() {
        let backend = ScriptedBackend::new(vec![
            AgentEvent::raw("working...\n"),
            AgentEvent::shell_call("git status"),
            AgentEvent::Completion { exit_status: 0 },
        ]);
        let report = run(&backend).await;
        assert_eq!(report.status, SessionStatus::Completed);
        assert_eq!(report.tool_calls, 1);
        assert_eq!(report.last_tool.as_deref(), Some("shell"));
        assert!(report.text_tail.contains("working"));
    }

    #[tokio::test]
    async fn terminal_error_is_failed() {
        let backend = ScriptedBackend::new(vec![
            AgentEvent::raw("oops\n"),
            AgentEvent::Error {
                message: "backend exited with status 2".into(),
            },
        ]);
        let report = run(&backend).await;
        assert_eq!(
            report.status,
            SessionStatus::Failed {
                message: "backend exited with status 2".into()
            }
        );
    }

    #[tokio::test]
    async fn denial_error_is_counted_but_not_terminal() {
        let backend = ScriptedBackend::new(vec![
            AgentEvent::shell_call("rm -rf /"),
            AgentEvent::Error {
                message: "command blocked: rm -rf / (destructive pattern)".into(),
            },
            AgentEvent::Completion { exit_status: 0 },
        ]);
        let report = run(&backend).await;
        assert_eq!(report.status, SessionStatus::Completed);
        assert_eq!(report.denied_commands, 1);
    }

    #[tokio::test]
    async fn rate_limit_text_pauses_the_session() {
        let backend = ScriptedBackend::new(vec![AgentEvent::raw(
            "Limit reached for today. Your quota resets at 5pm.\n",
        )]);
        let report = run(&backend).await;
        match report.status {
            SessionStatus::RateLimited { message } => {
                assert!(message.contains("Limit reached"));
            }
            other => panic!("expected rate limited, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn pre_cancelled_token_cancels_immediately() {
        let backend = ScriptedBackend::new(vec![AgentEvent::Completion { exit_status: 0 }]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let report = run_session(
            &backend,
            &request(),
            Duration::from_secs(5),
            &cancel,
            &mut |_| {},
        )
        .await
        .unwrap();
        assert_eq!(report.status, SessionStatus::Cancelled);
    }

    #[tokio::test]
    async fn stream_ending_without_terminal_is_failed() {
        let backend = ScriptedBackend::new(vec![AgentEvent::raw("partial")]);
        let report = run(&backend).await;
        assert!(matches!(report.status, SessionStatus::Failed { .. }));
    }

    #[test]
    fn push_bounded_keeps_the_tail() {
        let mut buf = String::new();
        push_bounded(&mut buf, &"a".repeat(100), 50);
        assert_eq!(buf.len(), 50);
        push_bounded(&mut buf, "zz", 50);
        assert_eq!(buf.len(), 50);
        assert!(buf.ends_with("zz"));
    }
}
