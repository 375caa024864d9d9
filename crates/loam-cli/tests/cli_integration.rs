//! CLI subprocess integration tests.
//!
//! These tests invoke the `loam` binary as a subprocess and verify exit
//! codes, stdout content, and JSON output.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

struct Sandbox {
    home: tempfile::TempDir,
    store: tempfile::TempDir,
    work: tempfile::TempDir,
}

impl Sandbox {
    fn new() -> Self {
        Self {
            home: tempfile::tempdir().unwrap(),
            store: tempfile::tempdir().unwrap(),
            work: tempfile::tempdir().unwrap(),
        }
    }

    fn loam(&self, args: &[&str]) -> Output {
        Command::new(env!("CARGO_BIN_EXE_loam"))
            .env("HOME", self.home.path())
            .env_remove("LOAM_STORE")
            .env_remove("LOAM_LOG")
            .arg("--store")
            .arg(self.store.path())
            .args(args)
            .output()
            .unwrap()
    }

    fn target(&self) -> PathBuf {
        self.work.path().join("out").join("motd")
    }

    fn write_manifest(&self, body: &str) -> PathBuf {
        let path = self.work.path().join("loam.toml");
        std::fs::write(&path, body).unwrap();
        path
    }

    fn site_manifest(&self, content: &str) -> PathBuf {
        self.write_manifest(&format!(
            r#"manifest_version = 1

[stack]
name = "dev"

[[component]]
name = "files"
type = "group"
key = "files"

[component.spec]
children = [
  {{ type = "file", name = "motd", key = "motd", spec = {{ path = "{}", content = "{content}" }} }},
]

[[component]]
name = "tail"
type = "group"
depends_on = ["files"]
"#,
            self.target().display()
        ))
    }
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

fn path_arg(path: &Path) -> &str {
    path.to_str().unwrap()
}

#[test]
fn cli_version_exits_zero() {
    let output = Sandbox::new().loam(&["--version"]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("loam"));
}

#[test]
fn cli_help_lists_commands() {
    let output = Sandbox::new().loam(&["--help"]);
    assert!(output.status.success());
    let out = stdout(&output);
    for command in ["apply", "reconcile", "rm", "refresh", "ls", "order"] {
        assert!(out.contains(command), "help must list '{command}': {out}");
    }
}

#[test]
fn apply_writes_files_and_lists_the_tree() {
    let sandbox = Sandbox::new();
    let manifest = sandbox.site_manifest("hello");
    let output = sandbox.loam(&["apply", path_arg(&manifest)]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert!(stdout(&output).contains("2 created"));
    assert_eq!(std::fs::read_to_string(sandbox.target()).unwrap(), "hello");

    let output = sandbox.loam(&["--json", "ls", "dev"]);
    assert!(output.status.success());
    let components: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    let names: Vec<&str> = components
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["name"].as_str().unwrap())
        .collect();
    assert_eq!(names.len(), 3);
    for name in ["files", "motd", "tail"] {
        assert!(names.contains(&name), "{names:?}");
    }

    let output = sandbox.loam(&["ls"]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("dev"));
}

#[test]
fn apply_json_reports_summary_and_tasks() {
    let sandbox = Sandbox::new();
    let manifest = sandbox.site_manifest("hello");
    let output = sandbox.loam(&["--json", "apply", path_arg(&manifest)]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let payload: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(payload["summary"]["stack"], "dev");
    assert_eq!(payload["summary"]["created"].as_array().unwrap().len(), 2);
    let tasks = payload["tasks"].as_array().unwrap();
    assert!(!tasks.is_empty());
    assert!(tasks.iter().all(|t| t["status"] == "success"));
}

#[test]
fn reapplying_an_edited_manifest_updates_in_place() {
    let sandbox = Sandbox::new();
    let first = sandbox.loam(&["apply", path_arg(&sandbox.site_manifest("one"))]);
    assert!(first.status.success(), "stderr: {}", stderr(&first));
    let second = sandbox.loam(&["apply", path_arg(&sandbox.site_manifest("two"))]);
    assert!(second.status.success(), "stderr: {}", stderr(&second));
    assert!(stdout(&second).contains("1 updated"));
    assert_eq!(std::fs::read_to_string(sandbox.target()).unwrap(), "two");
}

#[test]
fn order_prints_layers() {
    let sandbox = Sandbox::new();
    let manifest = sandbox.site_manifest("hello");
    assert!(sandbox.loam(&["apply", path_arg(&manifest)]).status.success());
    let output = sandbox.loam(&["--json", "order", "dev"]);
    assert!(output.status.success());
    let layers: Vec<Vec<String>> = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(layers, vec![vec!["files".to_owned()], vec!["tail".to_owned()]]);
}

#[test]
fn rm_removes_the_subtree_and_its_files() {
    let sandbox = Sandbox::new();
    let manifest = sandbox.site_manifest("hello");
    assert!(sandbox.loam(&["apply", path_arg(&manifest)]).status.success());
    let output = sandbox.loam(&["rm", "dev", "files"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert!(!sandbox.target().exists());

    let output = sandbox.loam(&["--json", "ls", "dev"]);
    let components: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(components.as_array().unwrap().len(), 1);
}

#[test]
fn reconcile_and_refresh_succeed_on_a_healthy_stack() {
    let sandbox = Sandbox::new();
    let manifest = sandbox.site_manifest("hello");
    assert!(sandbox.loam(&["apply", path_arg(&manifest)]).status.success());
    let output = sandbox.loam(&["reconcile", "dev"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let output = sandbox.loam(&["reconcile", "dev", "files"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let output = sandbox.loam(&["refresh", "dev", "motd"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
}

#[test]
fn invalid_manifest_exits_with_manifest_code() {
    let sandbox = Sandbox::new();
    let manifest = sandbox.write_manifest("manifest_version = 2\n[stack]\nname = \"dev\"\n");
    let output = sandbox.loam(&["apply", path_arg(&manifest)]);
    assert_eq!(output.status.code(), Some(2));
    assert!(stderr(&output).contains("manifest error"));
}

#[test]
fn missing_manifest_exits_with_manifest_code() {
    let sandbox = Sandbox::new();
    let missing = sandbox.work.path().join("nope.toml");
    let output = sandbox.loam(&["apply", path_arg(&missing)]);
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn unknown_component_type_fails_the_job() {
    let sandbox = Sandbox::new();
    let manifest = sandbox.write_manifest(
        "manifest_version = 1\n[stack]\nname = \"dev\"\n[[component]]\nname = \"w\"\ntype = \"widget\"\n",
    );
    let output = sandbox.loam(&["apply", path_arg(&manifest)]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("unsupported component type: widget"));
}

#[test]
fn unknown_stack_is_an_error() {
    let output = Sandbox::new().loam(&["reconcile", "ghost"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("stack not found"));
}

#[test]
fn completions_generate_a_script() {
    let output = Sandbox::new().loam(&["completions", "bash"]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("loam"));
}
