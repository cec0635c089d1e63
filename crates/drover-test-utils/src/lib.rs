//! Shared scaffolding for drover integration tests.
//!
//! Real backend CLIs are not available (or wanted) in tests, so the
//! adapters are pointed at small shell scripts that emit scripted
//! output and manipulate the checklist the way a real agent would.

use std::path::{Path, PathBuf};

/// A temporary project directory pre-seeded with an app spec, plus a
/// sibling directory for fake backend scripts (kept outside the
/// project so agent-side file probes never see them).
pub struct TestProject {
    root: tempfile::TempDir,
}

impl TestProject {
    pub fn new() -> Self {
        let root = tempfile::tempdir().expect("failed to create temp dir");
        let project = root.path().join("project");
        std::fs::create_dir(&project).expect("failed to create project dir");
        std::fs::write(
            project.join("app_spec.txt"),
            "Build a small note-taking web application.\n",
        )
        .expect("failed to write app spec");
        std::fs::create_dir(root.path().join("bin")).expect("failed to create bin dir");
        Self { root }
    }

    /// The directory the agent works in.
    pub fn project_dir(&self) -> PathBuf {
        self.root.path().join("project")
    }

    /// Where fake backend scripts live.
    pub fn bin_dir(&self) -> PathBuf {
        self.root.path().join("bin")
    }
}

impl Default for TestProject {
    fn default() -> Self {
        Self::new()
    }
}

/// Write an executable `#!/bin/sh` script and return its path.
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("failed to write script");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
            .expect("failed to chmod script");
    }
    path
}

/// Script body for a fake agent that behaves like the real loop: on
/// first run it creates a checklist of `features` entries, and on
/// every later run it flips the first failing entry to passing.
pub fn stepper_script(features: usize) -> String {
    let entries: Vec<String> = (0..features)
        .map(|i| {
            format!(
                r#"  {{
    "category": "functional",
    "description": "feature {n}",
    "steps": ["verify feature {n}"],
    "passes": false
  }}"#,
                n = i + 1
            )
        })
        .collect();
    let checklist = format!("[\n{}\n]", entries.join(",\n"));

    format!(
        r#"if [ ! -f feature_list.json ]; then
cat > feature_list.json <<'FEATURES'
{checklist}
FEATURES
  echo "created feature list"
else
  sed -i '0,/"passes": false/s//"passes": true/' feature_list.json
  echo "marked one feature passing"
fi"#
    )
}

/// Script body that emits fixed lines and exits with `code`.
pub fn emit_script(lines: &[&str], code: i32) -> String {
    let mut body = String::new();
    for line in lines {
        body.push_str(&format!("echo '{line}'\n"));
    }
    body.push_str(&format!("exit {code}"));
    body
}

/// Script body that sleeps forever (until killed). `exec` so the
/// signal lands on the sleep itself, not a wrapping shell.
pub fn sleeper_script() -> String {
    "exec sleep 3600".to_string()
}
