use super::{report, settle, Context};

pub async fn run(ctx: &Context<'_>, stack: &str, component: &str) -> Result<u8, String> {
    let _lock = ctx.lock()?;
    let pb = ctx.spinner(&format!("removing {component}..."));
    let result = ctx.engine.dispose_component(Some(stack), component).await;
    let (_, tasks) = settle(ctx, pb, &format!("removed {component}"), result).await?;
    report(ctx, &tasks)
}
