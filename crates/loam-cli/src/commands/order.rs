use super::{json_pretty, Context, EXIT_SUCCESS};

pub fn run(ctx: &Context<'_>, stack: &str, verbose: bool) -> Result<u8, String> {
    let layers: Vec<Vec<String>> = ctx
        .engine
        .reconciliation_order(stack)
        .map_err(|e| e.to_string())?
        .into_iter()
        .map(|layer| layer.into_iter().map(|c| c.name).collect())
        .collect();

    if ctx.json {
        println!("{}", json_pretty(&layers)?);
        return Ok(EXIT_SUCCESS);
    }
    if layers.is_empty() {
        println!("stack '{stack}' has no components");
    }
    for (index, layer) in layers.iter().enumerate() {
        println!("{index}: {}", layer.join(", "));
    }
    if verbose {
        let graph = ctx.engine.dependency_graph(stack).map_err(|e| e.to_string())?;
        print!("{}", graph.dump());
    }
    Ok(EXIT_SUCCESS)
}
