//! Live rendering of session events and progress summaries.
//!
//! Raw backend output streams straight through; tool calls and denials
//! get one-line annotations. Structured payloads are not re-printed --
//! their bytes already went by in the raw stream.

use std::io::Write;

use drover_core::parser::{AgentEvent, TextKind};
use drover_store::ProjectStore;

/// Longest argument preview shown for a tool call.
const ARG_PREVIEW_LEN: usize = 200;

pub struct EventRenderer {
    /// Whether the last thing printed was streamed raw text (used to
    /// place annotations on their own line).
    mid_line: bool,
}

impl EventRenderer {
    pub fn new() -> Self {
        Self { mid_line: false }
    }

    pub fn render(&mut self, event: &AgentEvent) {
        match event {
            AgentEvent::Text {
                content,
                kind: TextKind::Raw,
            } => {
                print!("{content}");
                let _ = std::io::stdout().flush();
                self.mid_line = !content.ends_with('\n');
            }
            AgentEvent::Text { .. } => {
                // Plain/code text was already visible in the raw stream.
            }
            AgentEvent::ToolCall { name, arguments } => {
                self.break_line();
                println!("[tool] {name} {}", preview(arguments));
            }
            AgentEvent::StructuredPayload { .. } => {}
            AgentEvent::Error { message } => {
                self.break_line();
                println!("[error] {message}");
            }
            AgentEvent::Completion { .. } => {
                self.break_line();
                println!("[session complete]");
            }
        }
    }

    pub fn finish(&mut self) {
        self.break_line();
    }

    fn break_line(&mut self) {
        if self.mid_line {
            println!();
            self.mid_line = false;
        }
    }
}

impl Default for EventRenderer {
    fn default() -> Self {
        Self::new()
    }
}

fn preview(arguments: &serde_json::Value) -> String {
    let rendered = arguments.to_string();
    if rendered.len() > ARG_PREVIEW_LEN {
        let mut cut = ARG_PREVIEW_LEN;
        while cut < rendered.len() && !rendered.is_char_boundary(cut) {
            cut += 1;
        }
        format!("{}...", &rendered[..cut])
    } else {
        rendered
    }
}

/// Print the `passing/total` progress line for a project.
pub fn print_progress_summary(store: &ProjectStore) {
    match store.load_checklist() {
        Ok(list) if !list.is_empty() => {
            let passing = list.passing_count();
            let total = list.len();
            let pct = (passing as f64 / total as f64) * 100.0;
            println!("\nprogress: {passing}/{total} features passing ({pct:.1}%)");
        }
        _ => println!("\nprogress: feature checklist not yet created"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_truncates_long_arguments() {
        let arguments = serde_json::json!({ "cmd": "x".repeat(500) });
        let p = preview(&arguments);
        assert!(p.len() <= ARG_PREVIEW_LEN + 3);
        assert!(p.ends_with("..."));
    }

    #[test]
    fn preview_keeps_short_arguments() {
        let arguments = serde_json::json!({ "cmd": "ls" });
        assert_eq!(preview(&arguments), r#"{"cmd":"ls"}"#);
    }
}
