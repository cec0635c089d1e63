//! Backend registry -- a named collection of available adapters.
//!
//! The orchestrator looks backends up by the configured name. Unknown
//! names are a startup-time fatal error for the caller, never silently
//! defaulted to something else.

use std::collections::HashMap;

use anyhow::{Result, bail};

use super::trait_def::Backend;

/// Registered [`Backend`] implementations, keyed by name.
#[derive(Default)]
pub struct BackendRegistry {
    backends: HashMap<String, Box<dyn Backend>>,
}

impl BackendRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a backend under the name it reports.
    ///
    /// Replaces and returns any previously registered backend with the
    /// same name.
    pub fn register(&mut self, backend: impl Backend + 'static) -> Option<Box<dyn Backend>> {
        let name = backend.name().to_string();
        self.backends.insert(name, Box::new(backend))
    }

    /// Look up a backend by name.
    pub fn get(&self, name: &str) -> Option<&dyn Backend> {
        self.backends.get(name).map(|b| b.as_ref())
    }

    /// Look up a backend, failing with the list of known names when it
    /// is absent.
    pub fn get_required(&self, name: &str) -> Result<&dyn Backend> {
        match self.get(name) {
            Some(backend) => Ok(backend),
            None => {
                let mut known = self.list();
                known.sort_unstable();
                bail!(
                    "unknown backend '{name}' (known backends: {})",
                    known.join(", ")
                )
            }
        }
    }

    /// Names of all registered backends (unordered).
    pub fn list(&self) -> Vec<&str> {
        self.backends.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("backends", &self.backends.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::types::{SessionHandle, SessionRequest};
    use crate::parser::AgentEvent;
    use anyhow::Result;
    use async_trait::async_trait;
    use futures::Stream;
    use std::pin::Pin;

    struct FakeBackend {
        backend_name: String,
    }

    impl FakeBackend {
        fn new(name: &str) -> Self {
            Self {
                backend_name: name.to_string(),
            }
        }
    }

    #[async_trait]
    impl Backend for FakeBackend {
        fn name(&self) -> &str {
            &self.backend_name
        }

        async fn start_session(&self, request: &SessionRequest) -> Result<SessionHandle> {
            Ok(SessionHandle {
                pid: 42,
                session_id: request.session_id,
                backend_name: self.backend_name.clone(),
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
    fn registry_starts_empty() {
        let registry = BackendRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn register_and_get() {
        let mut registry = BackendRegistry::new();
        assert!(registry.register(FakeBackend::new("alpha")).is_none());
        assert_eq!(registry.get("alpha").unwrap().name(), "alpha");
    }

    #[test]
    fn register_replaces_existing() {
        let mut registry = BackendRegistry::new();
        registry.register(FakeBackend::new("alpha"));
        let old = registry.register(FakeBackend::new("alpha"));
        assert!(old.is_some());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn unknown_name_is_a_fatal_error_listing_known_backends() {
        let mut registry = BackendRegistry::new();
        registry.register(FakeBackend::new("claude-code"));
        registry.register(FakeBackend::new("copilot"));

        let err = registry.get_required("gpt-shell").err().unwrap();
        let message = format!("{err:#}");
        assert!(message.contains("gpt-shell"));
        assert!(message.contains("claude-code"));
        assert!(message.contains("copilot"));
    }

    #[test]
    fn get_missing_returns_none() {
        assert!(BackendRegistry::new().get("nope").is_none());
    }
}
