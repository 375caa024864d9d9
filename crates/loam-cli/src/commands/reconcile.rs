use super::{report, settle, Context};

pub async fn run(ctx: &Context<'_>, stack: &str, component: Option<&str>) -> Result<u8, String> {
    let _lock = ctx.lock()?;
    let target = component.unwrap_or(stack);
    let pb = ctx.spinner(&format!("reconciling {target}..."));
    let result = match component {
        Some(component) => {
            ctx.engine
                .reconcile_component(Some(stack), component)
                .await
        }
        None => ctx.engine.reconcile_stack(stack).await,
    };
    let (_, tasks) = settle(ctx, pb, &format!("reconciled {target}"), result).await?;
    report(ctx, &tasks)
}
