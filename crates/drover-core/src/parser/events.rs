//! The normalized event vocabulary shared by every backend adapter.

use serde_json::Value;

/// How a [`AgentEvent::Text`] event was produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextKind {
    /// Verbatim passthrough of a raw output chunk, emitted for
    /// observability before any reinterpretation. Raw events are the
    /// only events that depend on chunk boundaries.
    Raw,
    /// Final-answer text extracted from a structured payload.
    Plain,
    /// The body of a fenced code block, with its language hint.
    Code { lang: Option<String> },
}

/// One normalized event from a backend's output stream.
///
/// A session's event sequence is terminated by exactly one
/// [`AgentEvent::Completion`] (process exited 0) or one terminal
/// [`AgentEvent::Error`] (nonzero exit, spawn failure, stream
/// failure); nothing follows the terminator. `Error` events may also
/// appear mid-stream -- the adapters inject one after each
/// [`AgentEvent::ToolCall`] the security gate denies, so the driving
/// agent can adapt.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    /// Narrative or code text.
    Text { content: String, kind: TextKind },
    /// A side-effecting action the backend wants (or reports) to run.
    ToolCall { name: String, arguments: Value },
    /// A whole structured object the backend emitted.
    StructuredPayload { payload: Value },
    /// The backend process exited cleanly.
    Completion { exit_status: i32 },
    /// An error -- terminal when it ends the stream, advisory when it
    /// annotates a denied tool call.
    Error { message: String },
}

impl AgentEvent {
    /// Raw passthrough text.
    pub fn raw(content: impl Into<String>) -> Self {
        Self::Text {
            content: content.into(),
            kind: TextKind::Raw,
        }
    }

    /// A `shell` tool call for a single command line.
    pub fn shell_call(cmd: impl Into<String>) -> Self {
        Self::ToolCall {
            name: "shell".to_string(),
            arguments: serde_json::json!({ "cmd": cmd.into() }),
        }
    }

    /// A `file_op` tool call.
    pub fn file_op(op: impl Into<String>, path: impl Into<String>) -> Self {
        Self::ToolCall {
            name: "file_op".to_string(),
            arguments: serde_json::json!({ "op": op.into(), "path": path.into() }),
        }
    }

    /// Whether this is a raw passthrough text event. Useful for
    /// filtering chunk-boundary-dependent events out of comparisons.
    pub fn is_raw_text(&self) -> bool {
        matches!(
            self,
            Self::Text {
                kind: TextKind::Raw,
                ..
            }
        )
    }
}
