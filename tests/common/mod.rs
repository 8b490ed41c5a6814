#![allow(dead_code)]

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

const BIN: &str = env!("CARGO_BIN_EXE_project-pilot");

/// A throwaway project plus its own durable snapshot base, so tests never
/// touch the real temp dir or each other.
pub struct TestProject {
    dir: tempfile::TempDir,
}

impl TestProject {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("app")).unwrap();
        fs::create_dir_all(dir.path().join("durable")).unwrap();
        Self { dir }
    }

    pub fn root(&self) -> PathBuf {
        self.dir.path().join("app")
    }

    pub fn durable_base(&self) -> PathBuf {
        self.dir.path().join("durable")
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.root().join(rel)
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(BIN);
        cmd.env("PROJECT_PILOT_SNAPSHOT_DIR", self.durable_base())
            .env_remove("PROJECT_PILOT_LOG")
            .current_dir(self.root())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }

    /// Run the binary in hook mode with `stdin` as the event.
    pub fn hook(&self, stdin: &str) -> (i32, String, String) {
        let mut child = self.command().spawn().expect("failed to spawn binary");
        child
            .stdin
            .as_mut()
            .unwrap()
            .write_all(stdin.as_bytes())
            .unwrap();
        collect(child.wait_with_output().unwrap())
    }

    /// Run an operator subcommand against this project.
    pub fn run(&self, args: &[&str]) -> (i32, String, String) {
        let mut cmd = self.command();
        cmd.args(args).arg("--dir").arg(self.root()).stdin(Stdio::null());
        collect(cmd.output().unwrap())
    }

    /// `init`, a generated `CLAUDE.md`, then `finalize`. The ledger is reset
    /// to an old watermark so later entries are pending even within the
    /// same second.
    pub fn initialized() -> Self {
        let p = Self::new();
        assert_eq!(p.run(&["init"]).0, 0);
        fs::write(p.path("CLAUDE.md"), "# app\n").unwrap();
        fs::write(p.path(".pilot/architecture.md"), "# Architecture\n").unwrap();
        assert_eq!(p.run(&["finalize"]).0, 0);
        fs::write(
            p.path(".pilot/internal/change-ledger.log"),
            "# Project Pilot Change Ledger\n",
        )
        .unwrap();
        fs::write(p.path(".pilot/internal/.last-synthesis"), "2000-01-01T00:00:00Z\n").unwrap();
        p
    }

    pub fn common(&self) -> String {
        common(&self.root())
    }

    pub fn ledger(&self) -> String {
        fs::read_to_string(self.path(".pilot/internal/change-ledger.log")).unwrap_or_default()
    }

    // ---------------------------------------------------------------
    // Event builders
    // ---------------------------------------------------------------

    pub fn pre_bash(&self, command: &str) -> (i32, String, String) {
        let common = self.common();
        self.hook(&format!(
            r#"{{ {common},
                "hook_event_name": "PreToolUse",
                "tool_name": "Bash",
                "tool_input": {{ "command": "{command}" }},
                "tool_use_id": "toolu_001"
            }}"#
        ))
    }

    pub fn post_bash(&self, command: &str) -> (i32, String, String) {
        let common = self.common();
        self.hook(&format!(
            r#"{{ {common},
                "hook_event_name": "PostToolUse",
                "tool_name": "Bash",
                "tool_input": {{ "command": "{command}" }},
                "tool_response": {{ "stdout": "", "stderr": "" }},
                "tool_use_id": "toolu_001"
            }}"#
        ))
    }

    pub fn post_edit(&self, tool: &str, file_path: &str) -> (i32, String, String) {
        let common = self.common();
        self.hook(&format!(
            r#"{{ {common},
                "hook_event_name": "PostToolUse",
                "tool_name": "{tool}",
                "tool_input": {{ "file_path": "{file_path}", "content": "x" }},
                "tool_use_id": "toolu_002"
            }}"#
        ))
    }

    pub fn session_start(&self, source: &str) -> (i32, String, String) {
        let common = self.common();
        self.hook(&format!(
            r#"{{ {common}, "hook_event_name": "SessionStart", "source": "{source}" }}"#
        ))
    }

    pub fn stop(&self, stop_hook_active: bool) -> (i32, String, String) {
        let common = self.common();
        self.hook(&format!(
            r#"{{ {common}, "hook_event_name": "Stop", "stop_hook_active": {stop_hook_active} }}"#
        ))
    }

    pub fn pre_compact(&self) -> (i32, String, String) {
        let common = self.common();
        self.hook(&format!(
            r#"{{ {common}, "hook_event_name": "PreCompact", "trigger": "auto" }}"#
        ))
    }
}

fn collect(output: std::process::Output) -> (i32, String, String) {
    (
        output.status.code().unwrap_or(-1),
        String::from_utf8_lossy(&output.stdout).to_string(),
        String::from_utf8_lossy(&output.stderr).to_string(),
    )
}

pub fn common(cwd: &Path) -> String {
    format!(
        r#"
    "session_id": "test-session",
    "transcript_path": "/tmp/t.jsonl",
    "cwd": "{}",
    "permission_mode": "default"
"#,
        cwd.display()
    )
}
