//! Core harness for driving autonomous coding-agent backends.
//!
//! The pieces, leaf-first:
//!
//! - [`parser`] -- incremental normalizer turning raw backend output
//!   into typed [`parser::AgentEvent`]s.
//! - [`gate`] -- pure allowlist decision function for shell commands.
//! - [`backend`] -- the uniform [`backend::Backend`] trait plus one
//!   adapter per supported external agent CLI.
//! - [`lifecycle`] -- runs one bounded session against a backend.
//! - [`orchestrator`] -- the multi-session control loop over the
//!   durable project store.
//! - [`prompt`] / [`services`] -- session prompt composition and
//!   auxiliary tool-service declarations.

pub mod backend;
pub mod gate;
pub mod lifecycle;
pub mod orchestrator;
pub mod parser;
pub mod prompt;
pub mod services;
