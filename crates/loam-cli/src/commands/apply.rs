use super::{json_pretty, print_tasks, settle, Context, EXIT_SUCCESS};
use loam_core::CoreError;
use loam_schema::parse_manifest_file;
use std::path::Path;

pub async fn run(ctx: &Context<'_>, manifest: &Path) -> Result<u8, String> {
    let manifest = parse_manifest_file(manifest).map_err(|e| CoreError::from(e).to_string())?;
    let _lock = ctx.lock()?;

    let pb = ctx.spinner(&format!("applying stack {}...", manifest.stack.name));
    let result = ctx.engine.apply_manifest(&manifest).await;
    let (summary, tasks) = settle(ctx, pb, "stack applied", result).await?;

    if ctx.json {
        let payload = serde_json::json!({
            "summary": summary,
            "tasks": tasks,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!(
            "applied stack '{}': {} created, {} updated, {} disposed, {} unchanged",
            summary.stack,
            summary.created.len(),
            summary.updated.len(),
            summary.disposed.len(),
            summary.unchanged.len()
        );
        print_tasks(&tasks);
    }
    Ok(EXIT_SUCCESS)
}
