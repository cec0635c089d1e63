//! Adapter streaming tests against scripted fake binaries.
//!
//! Exercises the full adapter path: spawn, chunked stdout/stderr
//! reading, normalization, gate routing, terminal-event mapping, and
//! process reaping.

use futures::StreamExt;

use drover_core::backend::{Backend, ClaudeCodeBackend, CopilotBackend, SessionRequest};
use drover_core::parser::{AgentEvent, TextKind};
use drover_test_utils::{TestProject, emit_script, sleeper_script, write_script};

async fn collect_events(backend: &dyn Backend, request: &SessionRequest) -> Vec<AgentEvent> {
    let handle = backend.start_session(request).await.unwrap();
    backend.events(&handle).collect().await
}

fn claude_with(script: &std::path::Path) -> ClaudeCodeBackend {
    ClaudeCodeBackend::with_binary(script.to_str().unwrap())
}

#[tokio::test]
async fn payload_stream_yields_structured_events_and_completion() {
    let project = TestProject::new();
    let script = write_script(
        &project.bin_dir(),
        "agent.sh",
        &emit_script(
            &[r#"{"final":"ok","tool_calls":[{"name":"shell","args":{"cmd":"ls"}}]}"#],
            0,
        ),
    );
    let backend = claude_with(&script);
    let request = SessionRequest::new("prompt", project.project_dir());

    let events = collect_events(&backend, &request).await;

    assert!(
        events
            .iter()
            .any(|e| matches!(e, AgentEvent::StructuredPayload { .. }))
    );
    assert!(events.contains(&AgentEvent::shell_call("ls")));
    assert!(events.contains(&AgentEvent::Text {
        content: "ok".into(),
        kind: TextKind::Plain,
    }));

    // Exactly one terminal event, and it is last.
    assert_eq!(
        events.last().unwrap(),
        &AgentEvent::Completion { exit_status: 0 }
    );
    let terminals = events
        .iter()
        .filter(|e| matches!(e, AgentEvent::Completion { .. }))
        .count();
    assert_eq!(terminals, 1);
}

#[tokio::test]
async fn denied_command_is_annotated_not_dropped() {
    let project = TestProject::new();
    let script = write_script(
        &project.bin_dir(),
        "agent.sh",
        &emit_script(&["$ rm -rf /", "$ git status"], 0),
    );
    let backend = claude_with(&script);
    let request = SessionRequest::new("prompt", project.project_dir());

    let events = collect_events(&backend, &request).await;

    // The denied tool call is still surfaced...
    let denied_pos = events
        .iter()
        .position(|e| *e == AgentEvent::shell_call("rm -rf /"))
        .expect("tool call should be surfaced");
    // ...immediately followed by the denial error.
    match &events[denied_pos + 1] {
        AgentEvent::Error { message } => {
            assert!(message.starts_with("command blocked:"), "{message}");
        }
        other => panic!("expected denial error after tool call, got {other:?}"),
    }

    // The allowed command gets no such annotation.
    let allowed_pos = events
        .iter()
        .position(|e| *e == AgentEvent::shell_call("git status"))
        .expect("allowed call should be surfaced");
    assert!(!matches!(&events[allowed_pos + 1], AgentEvent::Error { .. }));

    // The denial was not terminal: the stream still completed.
    assert_eq!(
        events.last().unwrap(),
        &AgentEvent::Completion { exit_status: 0 }
    );
}

#[tokio::test]
async fn nonzero_exit_maps_to_terminal_error() {
    let project = TestProject::new();
    let script = write_script(
        &project.bin_dir(),
        "agent.sh",
        &emit_script(&["doing work"], 3),
    );
    let backend = claude_with(&script);
    let request = SessionRequest::new("prompt", project.project_dir());

    let events = collect_events(&backend, &request).await;

    match events.last().unwrap() {
        AgentEvent::Error { message } => assert!(message.contains("status 3"), "{message}"),
        other => panic!("expected terminal error, got {other:?}"),
    }
    assert!(
        !events
            .iter()
            .any(|e| matches!(e, AgentEvent::Completion { .. }))
    );
}

#[tokio::test]
async fn stderr_flows_through_the_same_normalizer() {
    let project = TestProject::new();
    let script = write_script(
        &project.bin_dir(),
        "agent.sh",
        "echo '$ git status' 1>&2\nexit 0",
    );
    let backend = claude_with(&script);
    let request = SessionRequest::new("prompt", project.project_dir());

    let events = collect_events(&backend, &request).await;
    assert!(events.contains(&AgentEvent::shell_call("git status")));
}

#[tokio::test]
async fn unterminated_fence_is_flushed_before_the_terminal_event() {
    let project = TestProject::new();
    let script = write_script(
        &project.bin_dir(),
        "agent.sh",
        "printf '```python\\nprint(1)\\n'\nexit 0",
    );
    let backend = claude_with(&script);
    let request = SessionRequest::new("prompt", project.project_dir());

    let events = collect_events(&backend, &request).await;
    let fence_pos = events
        .iter()
        .position(|e| {
            matches!(
                e,
                AgentEvent::Text {
                    kind: TextKind::Code { .. },
                    ..
                }
            )
        })
        .expect("buffered fence content must be flushed");
    let terminal_pos = events.len() - 1;
    assert!(fence_pos < terminal_pos);
    assert_eq!(
        events[terminal_pos],
        AgentEvent::Completion { exit_status: 0 }
    );
}

#[tokio::test]
async fn cancel_terminates_and_reaps_the_process() {
    let project = TestProject::new();
    let script = write_script(&project.bin_dir(), "agent.sh", &sleeper_script());
    let backend = claude_with(&script);
    let request = SessionRequest::new("prompt", project.project_dir());

    let handle = backend.start_session(&request).await.unwrap();
    assert!(backend.is_running(&handle).await);

    backend.cancel(&handle).await.unwrap();
    assert!(!backend.is_running(&handle).await);
}

#[tokio::test]
async fn environment_and_workdir_reach_the_agent() {
    let project = TestProject::new();
    // The script reports its env var and cwd as payload finals.
    let script = write_script(
        &project.bin_dir(),
        "agent.sh",
        "echo \"{\\\"final\\\": \\\"$DROVER_TEST_VALUE\\\"}\"\n\
         echo \"{\\\"final\\\": \\\"$(pwd)\\\"}\"",
    );
    let backend = claude_with(&script);
    let mut request = SessionRequest::new("prompt", project.project_dir());
    request
        .env
        .insert("DROVER_TEST_VALUE".to_string(), "marker-123".to_string());

    let events = collect_events(&backend, &request).await;

    assert!(events.contains(&AgentEvent::Text {
        content: "marker-123".into(),
        kind: TextKind::Plain,
    }));

    let canonical_project = project.project_dir().canonicalize().unwrap();
    let has_workdir = events.iter().any(|e| match e {
        AgentEvent::Text {
            content,
            kind: TextKind::Plain,
        } => std::path::Path::new(content)
            .canonicalize()
            .map(|p| p == canonical_project)
            .unwrap_or(false),
        _ => false,
    });
    assert!(has_workdir, "expected working directory in events: {events:?}");
}

#[tokio::test]
async fn events_called_twice_reports_consumed_stream() {
    let project = TestProject::new();
    let script = write_script(&project.bin_dir(), "agent.sh", &emit_script(&["hi"], 0));
    let backend = claude_with(&script);
    let request = SessionRequest::new("prompt", project.project_dir());

    let handle = backend.start_session(&request).await.unwrap();
    let first: Vec<AgentEvent> = backend.events(&handle).collect().await;
    assert_eq!(
        first.last().unwrap(),
        &AgentEvent::Completion { exit_status: 0 }
    );

    let second: Vec<AgentEvent> = backend.events(&handle).collect().await;
    assert!(matches!(second.last().unwrap(), AgentEvent::Error { .. }));
}

#[tokio::test]
async fn copilot_adapter_drives_the_same_normalizer() {
    let project = TestProject::new();
    // Copilot receives the prompt as argv; this stand-in ignores it
    // and emits a shell-prompt line.
    let script = write_script(
        &project.bin_dir(),
        "copilot.sh",
        &emit_script(&["$ cargo build"], 0),
    );
    let backend = CopilotBackend::with_binary(script.to_str().unwrap());
    let request = SessionRequest::new("prompt", project.project_dir());

    let events = collect_events(&backend, &request).await;
    assert!(events.contains(&AgentEvent::shell_call("cargo build")));
    assert_eq!(
        events.last().unwrap(),
        &AgentEvent::Completion { exit_status: 0 }
    );
}
