use super::{report, settle, Context};

pub async fn run(ctx: &Context<'_>, stack: &str, component: &str) -> Result<u8, String> {
    let _lock = ctx.lock()?;
    let result = ctx.engine.refresh_component(Some(stack), component).await;
    let (_, tasks) = settle(ctx, None, "", result).await?;
    report(ctx, &tasks)
}
