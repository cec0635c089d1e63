//! Command security gate.
//!
//! A pure, stateless decision function over shell commands surfaced by
//! backend output. Policy is allowlist-based: a fixed set of permitted
//! program names plus argument-shape restrictions, with a denylist of
//! destructive patterns on top. The gate never executes anything --
//! callers act only on `allowed == true`, and the harness itself never
//! runs tool calls at all (denials are fed back into the agent's event
//! stream instead).
//!
//! Decisions are deterministic: same input, same output, no shared
//! state.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

/// The result of evaluating one command request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandDecision {
    /// Whether the command may execute.
    pub allowed: bool,
    /// Human-readable explanation, also useful in the denial event fed
    /// back to the agent.
    pub reason: String,
    /// The command as it would actually execute (whitespace
    /// normalized).
    pub normalized_command: String,
}

/// Programs a backend agent may run.
///
/// File inspection, version control, package/runtime tooling, and
/// process introspection. Process termination (`kill`/`pkill`) is
/// listed but further restricted by argument shape below.
const ALLOWED_PROGRAMS: &[&str] = &[
    // file inspection & light manipulation
    "ls", "cat", "head", "tail", "grep", "find", "wc", "pwd", "echo", "which", "du", "stat",
    "diff", "file", "mkdir", "touch", "cp", "mv", "sed", "awk", "sort", "uniq", "tr", "xargs",
    "tar", "gzip", "gunzip", "unzip", "chmod", "ln", "env", "date", "sleep", "true", "false",
    "test", "sh", "bash",
    // version control
    "git",
    // package / runtime tooling
    "npm", "npx", "node", "yarn", "pnpm", "python", "python3", "pip", "pip3", "uv", "uvicorn",
    "cargo", "rustc", "rustup", "make", "cmake", "go", "tsc", "jest", "vitest", "pytest",
    "curl", "wget",
    // process introspection & scoped termination
    "ps", "lsof", "pgrep", "top", "kill", "pkill",
];

/// Process names `pkill` may target: project-scoped dev servers only.
const KILLABLE_PROCESSES: &[&str] = &[
    "node", "npm", "npx", "vite", "next", "webpack", "esbuild", "nodemon", "ts-node", "deno",
    "bun", "python", "python3", "uvicorn", "gunicorn", "flask", "streamlit",
];

/// Destructive patterns that deny the whole command regardless of the
/// per-segment program checks.
static DENY_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    let patterns: &[(&str, &str)] = &[
        (
            r"(?i)\brm\s+(-[a-z]*\s+)*-[a-z]*[rf][a-z]*\s+(-[a-z]*\s+)*(/|/\*|~|\$HOME)(\s|$)",
            "recursive delete of a root or home path",
        ),
        (r"(?i)^\s*sudo\b|\|\s*sudo\b|[;&]\s*sudo\b", "privilege escalation via sudo"),
        (
            r"(?i)\b(shutdown|reboot|poweroff|halt)\b",
            "host power management",
        ),
        (r"(?i)\bmkfs\b", "filesystem creation"),
        (r"(?i)\bdd\b[^|;&]*\bof=/dev/", "raw write to a device node"),
        (r"(?i)>\s*/dev/sd", "redirect onto a block device"),
        (r"(?i)\bchmod\s+(-[a-z]*\s+)*777\s+/(\s|$)", "world-writable root"),
        (r":\(\)\s*\{.*\};\s*:", "fork bomb"),
        (
            r"(?i)\b(curl|wget)\b[^|;&]*\|\s*(sh|bash|zsh)\b",
            "piping a download into a shell",
        ),
        (r"(?i)\bkill\b\s+(-[a-z0-9]+\s+)*-?1(\s|$)", "signalling pid 1 or all processes"),
    ];
    patterns
        .iter()
        .map(|(pattern, reason)| (Regex::new(pattern).expect("deny pattern"), *reason))
        .collect()
});

/// Evaluate a command request.
///
/// `working_dir` and `declared_intent` are advisory context carried
/// into the decision reason; the policy itself depends only on the
/// command text, which keeps decisions reproducible.
pub fn evaluate(
    command: &str,
    working_dir: &Path,
    declared_intent: Option<&str>,
) -> CommandDecision {
    let normalized = normalize(command);
    let _ = working_dir;

    if normalized.is_empty() {
        return deny(normalized, "empty command");
    }

    for (pattern, reason) in DENY_PATTERNS.iter() {
        if pattern.is_match(&normalized) {
            return deny(normalized.clone(), format!("destructive pattern: {reason}"));
        }
    }

    for segment in split_segments(&normalized) {
        let tokens: Vec<&str> = segment.split_whitespace().collect();
        let Some(program) = program_name(&tokens) else {
            continue;
        };

        if !ALLOWED_PROGRAMS.contains(&program) {
            return deny(
                normalized.clone(),
                format!("program '{program}' is not on the allowlist"),
            );
        }

        if let Some(reason) = check_kill_scope(program, &tokens) {
            return deny(normalized.clone(), reason);
        }
    }

    let reason = match declared_intent {
        Some(intent) => format!("allowed ({intent})"),
        None => "allowed".to_string(),
    };
    CommandDecision {
        allowed: true,
        reason,
        normalized_command: normalized,
    }
}

/// Evaluate a file-mutation request surfaced by backend output.
///
/// File operations are scoped to the working directory: relative paths
/// are fine, absolute paths must sit inside `working_dir`.
pub fn evaluate_file_op(op: &str, path: &str, working_dir: &Path) -> CommandDecision {
    let normalized = format!("{} {}", op.trim(), path.trim());
    let target = Path::new(path.trim());

    if target.as_os_str().is_empty() {
        return deny(normalized, "file operation without a path");
    }
    if target.is_absolute() && !target.starts_with(working_dir) {
        return deny(
            normalized,
            format!(
                "path {} is outside the project directory {}",
                target.display(),
                working_dir.display()
            ),
        );
    }
    if path.split('/').any(|component| component == "..") {
        return deny(normalized, "path traversal outside the project directory");
    }

    CommandDecision {
        allowed: true,
        reason: "allowed".to_string(),
        normalized_command: normalized,
    }
}

fn deny(normalized: String, reason: impl Into<String>) -> CommandDecision {
    CommandDecision {
        allowed: false,
        reason: reason.into(),
        normalized_command: normalized,
    }
}

/// Collapse runs of whitespace so pattern checks and logs see the
/// command as it would actually execute.
fn normalize(command: &str) -> String {
    command.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Split a compound command on shell control operators. Every segment
/// must independently pass the allowlist.
fn split_segments(command: &str) -> Vec<&str> {
    static SEPARATORS: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\|\||&&|;|\||&").expect("separator regex"));
    SEPARATORS
        .split(command)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

/// First meaningful token of a segment: skips environment-variable
/// assignments and strips any leading path.
fn program_name<'a>(tokens: &[&'a str]) -> Option<&'a str> {
    for token in tokens {
        if token.contains('=') && !token.starts_with('=') && !token.starts_with('-') {
            // FOO=bar prefix assignment.
            let (name, _) = token.split_once('=').unwrap();
            if name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                continue;
            }
        }
        return Some(token.rsplit('/').next().unwrap_or(token));
    }
    None
}

/// Argument-shape restriction for process termination: `kill` may only
/// target numeric pids (never pid 1), `pkill` only known project-scoped
/// dev processes.
fn check_kill_scope(program: &str, tokens: &[&str]) -> Option<String> {
    match program {
        "kill" => {
            for arg in &tokens[1..] {
                if arg.starts_with('-') {
                    continue; // signal flag
                }
                match arg.parse::<i64>() {
                    Ok(1) => return Some("kill may not target pid 1".to_string()),
                    Ok(pid) if pid < 0 => {
                        return Some("kill may not signal process groups".to_string());
                    }
                    Ok(_) => {}
                    Err(_) => {
                        return Some(format!("kill target '{arg}' is not a numeric pid"));
                    }
                }
            }
            None
        }
        "pkill" => {
            let target = tokens[1..].iter().find(|t| !t.starts_with('-'))?;
            if KILLABLE_PROCESSES.contains(target) {
                None
            } else {
                Some(format!(
                    "pkill target '{target}' is not a known project-scoped process"
                ))
            }
        }
        _ => None,
    }
}
