//! Shared process plumbing for backend adapters.
//!
//! Adapters differ in how they invoke their CLI; everything after the
//! spawn is identical and lives here: pumping stdout/stderr in raw
//! 4096-byte chunks through one [`OutputParser`] per session, routing
//! surfaced tool calls through the security gate, mapping process exit
//! into exactly one terminal event, and the SIGTERM-then-SIGKILL
//! termination path that guarantees the child is reaped.

use std::collections::HashMap;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures::Stream;
use tokio::io::AsyncReadExt;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, warn};

use crate::gate;
use crate::parser::{AgentEvent, OutputParser};

use super::types::ProcessState;

/// How long to wait after SIGTERM before forcing SIGKILL.
const TERM_GRACE: Duration = Duration::from_secs(5);

/// Shared per-adapter process table, keyed by OS pid.
pub(crate) type ProcessMap = Arc<Mutex<HashMap<u32, ProcessState>>>;

/// Build the event stream for the process registered under `pid`.
///
/// Yields normalized events as output arrives, then exactly one
/// terminal event: `Completion { 0 }` when the process exits cleanly,
/// `Error` otherwise. Nothing is yielded after the terminal event.
pub(crate) fn event_stream(
    processes: ProcessMap,
    pid: u32,
) -> Pin<Box<dyn Stream<Item = AgentEvent> + Send>> {
    let stream = async_stream::stream! {
        // Take the pipes out of the process table; they can be
        // consumed only once.
        let taken = {
            let mut procs = processes.lock().await;
            procs.get_mut(&pid).map(|state| {
                (
                    state.stdout.take(),
                    state.stderr.take(),
                    state.working_dir.clone(),
                )
            })
        };

        let Some((stdout, stderr, working_dir)) = taken else {
            warn!(pid, "events requested for unknown pid");
            yield AgentEvent::Error {
                message: "backend process not found (already reaped?)".to_string(),
            };
            return;
        };

        let Some(stdout) = stdout else {
            warn!(pid, "events requested twice for the same session");
            yield AgentEvent::Error {
                message: "backend output already consumed for this session".to_string(),
            };
            return;
        };

        // Pump both pipes into one channel, preserving arrival order
        // per pipe; the normalizer sees interleaved raw chunks exactly
        // as the harness received them.
        let (tx, mut rx) = mpsc::channel::<String>(16);
        let mut pumps = Vec::new();
        pumps.push(tokio::spawn(pump_pipe(stdout, tx.clone())));
        if let Some(stderr) = stderr {
            pumps.push(tokio::spawn(pump_pipe(stderr, tx.clone())));
        }
        drop(tx);

        let mut parser = OutputParser::new();
        while let Some(chunk) = rx.recv().await {
            for event in parser.feed(&chunk) {
                for routed in route_through_gate(event, &working_dir) {
                    yield routed;
                }
            }
        }
        for pump in pumps {
            let _ = pump.await;
        }

        // Flush the parser's carry-over state (trailing line, open
        // fence) before the terminal event.
        for event in parser.finish() {
            for routed in route_through_gate(event, &working_dir) {
                yield routed;
            }
        }

        // Reap the child and emit the single terminal event.
        let child = processes.lock().await.remove(&pid).map(|state| state.child);
        match child {
            Some(mut child) => match child.wait().await {
                Ok(status) => {
                    let code = status.code().unwrap_or(-1);
                    if code == 0 {
                        debug!(pid, "backend exited cleanly");
                        yield AgentEvent::Completion { exit_status: 0 };
                    } else {
                        yield AgentEvent::Error {
                            message: format!("backend exited with status {code}"),
                        };
                    }
                }
                Err(e) => {
                    yield AgentEvent::Error {
                        message: format!("failed to reap backend process: {e}"),
                    };
                }
            },
            None => {
                // Terminated out from under us (e.g. cancel()).
                yield AgentEvent::Error {
                    message: "backend process was terminated".to_string(),
                };
            }
        }
    };

    Box::pin(stream)
}

/// Read a pipe to EOF in raw chunks, decoding lossily.
async fn pump_pipe<R>(mut pipe: R, tx: mpsc::Sender<String>)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut buf = [0u8; 4096];
    loop {
        match pipe.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let chunk = String::from_utf8_lossy(&buf[..n]).into_owned();
                if tx.send(chunk).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!(error = %e, "error reading backend pipe");
                break;
            }
        }
    }
}

/// Pass one event through the security gate.
///
/// Shell tool calls are evaluated; a denial injects a non-terminal
/// `Error` right after the call so the driving agent sees why its
/// action did not take effect, rather than having it silently dropped.
fn route_through_gate(event: AgentEvent, working_dir: &Path) -> Vec<AgentEvent> {
    let decision = match &event {
        AgentEvent::ToolCall { name, arguments } if name == "shell" => arguments
            .get("cmd")
            .and_then(|v| v.as_str())
            .map(|cmd| gate::evaluate(cmd, working_dir, None)),
        AgentEvent::ToolCall { name, arguments } if name == "file_op" => {
            let op = arguments.get("op").and_then(|v| v.as_str()).unwrap_or("");
            arguments
                .get("path")
                .and_then(|v| v.as_str())
                .map(|path| gate::evaluate_file_op(op, path, working_dir))
        }
        _ => None,
    };

    let denial = decision.and_then(|decision| {
        if decision.allowed {
            debug!(command = %decision.normalized_command, "gate allowed tool call");
            None
        } else {
            warn!(
                command = %decision.normalized_command,
                reason = %decision.reason,
                "gate denied tool call"
            );
            Some(AgentEvent::Error {
                message: format!(
                    "command blocked: {} ({})",
                    decision.normalized_command, decision.reason
                ),
            })
        }
    });

    let mut out = vec![event];
    out.extend(denial);
    out
}

/// Graceful termination: SIGTERM, bounded grace wait, SIGKILL
/// fallback. The child is removed from the table and reaped on every
/// path, so no orphans survive cancellation.
pub(crate) async fn terminate(processes: &ProcessMap, pid: u32) -> Result<()> {
    let mut procs = processes.lock().await;

    if let Some(state) = procs.get_mut(&pid) {
        #[cfg(unix)]
        {
            // SAFETY: pid came from a child we spawned.
            let ret = unsafe { libc::kill(pid as i32, libc::SIGTERM) };
            if ret != 0 {
                warn!(pid, "SIGTERM failed, proceeding to SIGKILL");
            }
        }

        let exited = tokio::time::timeout(TERM_GRACE, state.child.wait()).await;
        match exited {
            Ok(Ok(_status)) => {
                debug!(pid, "backend exited after SIGTERM");
            }
            _ => {
                debug!(pid, "backend did not exit after SIGTERM, sending SIGKILL");
                let _ = state.child.kill().await;
            }
        }

        procs.remove(&pid);
    } else {
        debug!(pid, "terminate called but process not in table (already exited?)");
    }

    Ok(())
}

/// Liveness probe; reaps and forgets the process when it has exited.
pub(crate) async fn check_running(processes: &ProcessMap, pid: u32) -> bool {
    let mut procs = processes.lock().await;

    if let Some(state) = procs.get_mut(&pid) {
        match state.child.try_wait() {
            Ok(Some(_status)) => {
                procs.remove(&pid);
                false
            }
            Ok(None) => true,
            Err(e) => {
                warn!(pid, error = %e, "error checking backend status");
                false
            }
        }
    } else {
        false
    }
}
