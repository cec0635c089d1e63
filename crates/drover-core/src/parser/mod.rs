//! Incremental output normalizer.
//!
//! [`OutputParser::feed`] consumes raw text chunks exactly as they
//! arrive from a backend process -- no assumption that chunk
//! boundaries align with lines, payloads, or fences -- and produces
//! typed [`AgentEvent`]s.
//!
//! Interpretation is committed only at points that are deterministic
//! with respect to the total byte stream: newline arrival and
//! [`OutputParser::finish`]. That is what makes the split-invariance
//! property hold by construction: for any chunking of the same bytes,
//! the non-raw event sequence is identical.
//!
//! Per complete line, in priority order:
//!
//! 1. structured-payload extraction (first `{` .. last `}` parses as a
//!    JSON object) -- wins over every heuristic for that line;
//! 2. fence open/close handling (an explicit idle/in-fence state
//!    machine, carried across `feed` calls);
//! 3. `$ command` shell-prompt lines;
//! 4. file-mutation verb + path lines.
//!
//! Malformed payloads never error; the line falls through to the
//! heuristics. The parser itself never emits `Completion`/`Error` --
//! process termination is the adapter's job.

pub mod events;

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use tracing::warn;

pub use events::{AgentEvent, TextKind};

/// Upper bound on the buffered partial line. A single line longer than
/// this is dropped from heuristic scanning (its bytes were already
/// surfaced by the raw passthrough), which keeps memory bounded when a
/// backend emits megabytes without a newline.
const MAX_PENDING_BYTES: usize = 1024 * 1024;

static SHELL_LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*\$\s+(?P<cmd>.+)$").expect("shell line regex"));

static CODE_FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^```(?P<lang>\w+)?\s*$").expect("code fence regex"));

static FILE_OP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?P<op>Create|Update|Edit|Modify|Delete)\s+(?:file\s+)?(?P<path>\S+)")
        .expect("file op regex")
});

/// Line-scanning state carried between `feed` calls.
#[derive(Debug)]
enum ScanState {
    Idle,
    InFence {
        lang: Option<String>,
        lines: Vec<String>,
    },
}

/// Incremental, stateful normalizer for one backend session.
///
/// Each live session owns exactly one parser instance; partial-parse
/// state never crosses sessions.
#[derive(Debug)]
pub struct OutputParser {
    /// Trailing partial line, waiting for its newline.
    pending: String,
    /// Set when the pending line blew past [`MAX_PENDING_BYTES`]; the
    /// remainder of that line is skipped when its newline arrives.
    oversized: bool,
    state: ScanState,
}

impl Default for OutputParser {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputParser {
    pub fn new() -> Self {
        Self {
            pending: String::new(),
            oversized: false,
            state: ScanState::Idle,
        }
    }

    /// Feed one raw chunk; returns the events it produced.
    pub fn feed(&mut self, chunk: &str) -> Vec<AgentEvent> {
        let mut events = Vec::new();
        if chunk.is_empty() {
            return events;
        }

        // 1. Raw passthrough, always, so nothing is lost from logs even
        //    when the content is reinterpreted below.
        events.push(AgentEvent::raw(chunk));

        self.pending.push_str(chunk);

        loop {
            match self.pending.find('\n') {
                Some(newline) => {
                    let rest = self.pending.split_off(newline + 1);
                    let mut line = std::mem::replace(&mut self.pending, rest);
                    while line.ends_with('\n') || line.ends_with('\r') {
                        line.pop();
                    }
                    let skip = self.oversized || line.len() > MAX_PENDING_BYTES;
                    self.oversized = false;
                    if skip {
                        warn!(len = line.len(), "skipping oversized output line");
                    } else {
                        self.scan_line(&line, &mut events);
                    }
                }
                None => {
                    if self.pending.len() > MAX_PENDING_BYTES {
                        warn!(
                            len = self.pending.len(),
                            "pending output exceeded buffer cap; dropping partial line"
                        );
                        self.pending.clear();
                        self.oversized = true;
                    }
                    break;
                }
            }
        }

        events
    }

    /// Flush at end-of-stream: process the trailing unterminated line,
    /// then emit any still-open fence as a best-effort code text event
    /// rather than losing it.
    pub fn finish(&mut self) -> Vec<AgentEvent> {
        let mut events = Vec::new();

        let trailing = std::mem::take(&mut self.pending);
        let trailing = trailing.trim_end_matches('\r');
        if !trailing.is_empty() {
            if self.oversized {
                warn!(len = trailing.len(), "skipping oversized trailing line");
                self.oversized = false;
            } else {
                self.scan_line(trailing, &mut events);
            }
        }

        if let ScanState::InFence { lang, lines } =
            std::mem::replace(&mut self.state, ScanState::Idle)
        {
            let code = lines.join("\n");
            if !code.is_empty() {
                events.push(AgentEvent::Text {
                    content: code,
                    kind: TextKind::Code { lang },
                });
            }
        }

        events
    }

    /// Scan one complete line.
    fn scan_line(&mut self, line: &str, events: &mut Vec<AgentEvent>) {
        if let ScanState::InFence { lang, lines } = &mut self.state {
            if CODE_FENCE_RE.is_match(line.trim()) {
                let code = lines.join("\n");
                let lang = lang.clone();
                self.state = ScanState::Idle;
                Self::emit_fence(code, lang, events);
            } else {
                lines.push(line.to_owned());
            }
            return;
        }

        // Structured-payload priority: a parsable object claims the
        // whole line and suppresses the heuristics below.
        if let Some(payload) = extract_json_object(line) {
            emit_payload(payload, events);
            return;
        }

        if let Some(caps) = CODE_FENCE_RE.captures(line.trim()) {
            self.state = ScanState::InFence {
                lang: caps.name("lang").map(|m| m.as_str().to_owned()),
                lines: Vec::new(),
            };
            return;
        }

        if let Some(caps) = SHELL_LINE_RE.captures(line) {
            events.push(AgentEvent::shell_call(caps["cmd"].trim()));
            return;
        }

        if let Some(caps) = FILE_OP_RE.captures(line) {
            events.push(AgentEvent::file_op(&caps["op"], &caps["path"]));
        }
    }

    /// Emit events for a closed fence: the code text, plus a shell tool
    /// call when the fence was a shell dialect or the body is
    /// prompt-prefixed.
    fn emit_fence(code: String, lang: Option<String>, events: &mut Vec<AgentEvent>) {
        let is_shell = matches!(
            lang.as_deref(),
            Some("sh") | Some("bash") | Some("shell") | Some("zsh")
        );
        let prompt_prefixed = code.trim_start().starts_with("$ ");

        events.push(AgentEvent::Text {
            content: code.clone(),
            kind: TextKind::Code { lang },
        });

        if is_shell || prompt_prefixed {
            let cmd = code.trim().trim_start_matches(['$', ' ']).trim();
            if !cmd.is_empty() {
                events.push(AgentEvent::shell_call(cmd));
            }
        }
    }
}

/// Locate the first `{` and last `}` in a line and try to parse the
/// span as a JSON object. Anything malformed is simply not a payload.
fn extract_json_object(line: &str) -> Option<Value> {
    let start = line.find('{')?;
    let end = line.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<Value>(&line[start..=end])
        .ok()
        .filter(Value::is_object)
}

/// Emit the event fan-out for a parsed structured payload: the payload
/// itself, one `ToolCall` per embedded invocation, and the final-answer
/// text when present.
fn emit_payload(payload: Value, events: &mut Vec<AgentEvent>) {
    events.push(AgentEvent::StructuredPayload {
        payload: payload.clone(),
    });

    if let Some(calls) = payload.get("tool_calls").and_then(Value::as_array) {
        for call in calls {
            let name = call
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_owned();
            let arguments = call.get("args").cloned().unwrap_or(Value::Null);
            events.push(AgentEvent::ToolCall { name, arguments });
        }
    }

    let final_text = payload
        .get("final")
        .or_else(|| payload.get("final_text"))
        .and_then(Value::as_str);
    if let Some(text) = final_text {
        if !text.is_empty() {
            events.push(AgentEvent::Text {
                content: text.to_owned(),
                kind: TextKind::Plain,
            });
        }
    }
}
