//! Supporting types for the backend adapter interface.

use std::collections::HashMap;
use std::path::PathBuf;

use tokio::process::{Child, ChildStderr, ChildStdout};
use uuid::Uuid;

use crate::services::ServiceMap;

/// Everything an adapter needs to open one bounded session.
#[derive(Debug, Clone)]
pub struct SessionRequest {
    /// Identity of this session (also used in logs and notes).
    pub session_id: Uuid,
    /// The full task prompt for the backend agent.
    pub prompt: String,
    /// Directory the agent works in; also the scope the security gate
    /// and adapter-written permission settings are anchored to.
    pub working_dir: PathBuf,
    /// Model override, honored by backends that support one.
    pub model: Option<String>,
    /// Adapter-specific extra environment variables. The host process
    /// environment is always inherited as a read-only snapshot taken
    /// at spawn time; these are merged on top.
    pub env: HashMap<String, String>,
    /// Declared auxiliary tool services. Backends that cannot honor a
    /// declaration ignore it rather than failing the session.
    pub services: ServiceMap,
}

impl SessionRequest {
    /// A request with fresh identity and empty extras.
    pub fn new(prompt: impl Into<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            prompt: prompt.into(),
            working_dir: working_dir.into(),
            model: None,
            env: HashMap::new(),
            services: ServiceMap::new(),
        }
    }
}

/// Runtime handle for one live backend process.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    /// OS pid of the spawned process.
    pub pid: u32,
    /// The session this process belongs to.
    pub session_id: Uuid,
    /// Name of the adapter that spawned it.
    pub backend_name: String,
}

/// Per-process bookkeeping an adapter keeps between `start_session`
/// and stream consumption / termination.
pub(crate) struct ProcessState {
    /// The child handle, for waiting and killing.
    pub(crate) child: Child,
    /// Stdout pipe; `Option` so the event stream can `.take()` it once.
    pub(crate) stdout: Option<ChildStdout>,
    /// Stderr pipe, merged into the same normalizer.
    pub(crate) stderr: Option<ChildStderr>,
    /// Working directory, anchor for gate decisions.
    pub(crate) working_dir: PathBuf,
}
