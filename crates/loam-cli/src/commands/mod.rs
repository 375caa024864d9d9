pub mod apply;
pub mod completions;
pub mod ls;
pub mod order;
pub mod reconcile;
pub mod refresh;
pub mod rm;

use indicatif::{ProgressBar, ProgressStyle};
use loam_core::{CoreError, Engine, StoreLock};
use loam_store::StoreLayout;
use loam_task::{TaskDescription, TaskStatus};
use std::path::Path;
use std::time::Duration;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_MANIFEST_ERROR: u8 = 2;
pub const EXIT_STORE_ERROR: u8 = 3;

/// What every command gets from `main`.
pub struct Context<'a> {
    pub engine: &'a Engine,
    pub store_path: &'a Path,
    pub json: bool,
}

impl Context<'_> {
    pub fn lock(&self) -> Result<StoreLock, String> {
        let layout = StoreLayout::new(self.store_path);
        StoreLock::acquire(&layout.lock_file()).map_err(|e| format!("store lock: {e}"))
    }

    pub fn spinner(&self, msg: &str) -> Option<ProgressBar> {
        if self.json {
            None
        } else {
            Some(spinner(msg))
        }
    }
}

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

fn style(template: &str) -> ProgressStyle {
    ProgressStyle::with_template(template).unwrap_or_else(|_| ProgressStyle::default_spinner())
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        style("{spinner:.cyan} {msg}")
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    pb.set_style(style("{msg}"));
    pb.finish_with_message(format!("✓ {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    pb.set_style(style("{msg}"));
    pb.finish_with_message(format!("✗ {msg}"));
}

pub fn colorize_state(state: &str) -> String {
    use console::Style;
    match state {
        "active" | "success" => Style::new().green().apply_to(state).to_string(),
        "running" => Style::new().cyan().bold().apply_to(state).to_string(),
        "pending" => Style::new().yellow().apply_to(state).to_string(),
        "disposed" => Style::new().dim().apply_to(state).to_string(),
        "failure" => Style::new().red().bold().apply_to(state).to_string(),
        other => other.to_owned(),
    }
}

pub fn print_tasks(tasks: &[TaskDescription]) {
    println!("{:<10} {:<32} MESSAGE", "STATUS", "TASK");
    for task in tasks {
        let status = colorize_state(&task.status.to_string());
        println!("{status:<10} {:<32} {}", task.name, task.message);
    }
}

/// Wait for the job's follow-up reconciles, then fold the job's own outcome
/// and any failed task into one result. Failed tasks go to stderr.
pub async fn settle<T>(
    ctx: &Context<'_>,
    pb: Option<ProgressBar>,
    done: &str,
    result: Result<T, CoreError>,
) -> Result<(T, Vec<TaskDescription>), String> {
    ctx.engine.wait_idle().await;
    let tasks = ctx.engine.tasks(None);
    let failed: Vec<&TaskDescription> = tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Failure)
        .collect();

    let outcome = match result {
        Err(e) => Err(e.to_string()),
        Ok(_) if !failed.is_empty() => Err(format!("{} task(s) failed", failed.len())),
        Ok(value) => Ok(value),
    };
    if let Some(pb) = &pb {
        match &outcome {
            Ok(_) => spin_ok(pb, done),
            Err(_) => spin_fail(pb, "failed"),
        }
    }
    for task in &failed {
        eprintln!("task {} failed: {}", task.name, task.message);
    }
    outcome.map(|value| (value, tasks))
}

/// Print a job's tasks, as JSON or as a table.
pub fn report(ctx: &Context<'_>, tasks: &[TaskDescription]) -> Result<u8, String> {
    if ctx.json {
        println!("{}", json_pretty(&tasks)?);
    } else {
        print_tasks(tasks);
    }
    Ok(EXIT_SUCCESS)
}
