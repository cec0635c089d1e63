//! Backend adapter interface for external coding-agent CLIs.
//!
//! This module defines the [`Backend`] trait every adapter implements,
//! the supporting types ([`SessionRequest`], [`SessionHandle`]), the
//! [`BackendRegistry`] for runtime lookup, and the two shipped
//! adapters.
//!
//! # Architecture
//!
//! ```text
//! Orchestrator
//!     |
//!     v
//! BackendRegistry --get("claude-code")--> &dyn Backend
//!     |                                        |
//!     |   start_session(request) --------------+
//!     |        |
//!     |        v
//!     |   SessionHandle { pid, session_id, ... }
//!     |        |
//!     |   events(handle) --> Stream<AgentEvent>
//!     |   cancel(handle)
//!     |   is_running(handle)
//! ```
//!
//! Adapters differ only in process invocation details; every one of
//! them streams stdout/stderr through the same
//! [`crate::parser::OutputParser`] and routes surfaced tool calls
//! through the same [`crate::gate`].

pub mod claude_code;
pub mod copilot;
pub mod registry;
mod stream;
pub mod trait_def;
pub mod types;

pub use claude_code::ClaudeCodeBackend;
pub use copilot::CopilotBackend;
pub use registry::BackendRegistry;
pub use trait_def::Backend;
pub use types::{SessionHandle, SessionRequest};
