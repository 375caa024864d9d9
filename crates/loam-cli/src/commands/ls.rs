use super::{colorize_state, json_pretty, Context, EXIT_SUCCESS};
use loam_schema::ComponentId;
use loam_store::Component;
use std::collections::BTreeMap;

pub fn run(ctx: &Context<'_>, stack: Option<&str>) -> Result<u8, String> {
    match stack {
        None => list_stacks(ctx),
        Some(stack) => list_components(ctx, stack),
    }
}

fn list_stacks(ctx: &Context<'_>) -> Result<u8, String> {
    let stacks = ctx.engine.stacks().map_err(|e| e.to_string())?;
    if ctx.json {
        println!("{}", json_pretty(&stacks)?);
    } else if stacks.is_empty() {
        println!("no stacks found");
    } else {
        println!("{:<20} {:<11} STACK_ID", "NAME", "COMPONENTS");
        for stack in &stacks {
            let count = ctx
                .engine
                .components(stack.id.as_str())
                .map_err(|e| e.to_string())?
                .len();
            println!("{:<20} {:<11} {}", stack.name, count, stack.id);
        }
    }
    Ok(EXIT_SUCCESS)
}

fn list_components(ctx: &Context<'_>, stack: &str) -> Result<u8, String> {
    let components = ctx.engine.components(stack).map_err(|e| e.to_string())?;
    if ctx.json {
        println!("{}", json_pretty(&components)?);
        return Ok(EXIT_SUCCESS);
    }
    if components.is_empty() {
        println!("stack '{stack}' has no components");
        return Ok(EXIT_SUCCESS);
    }

    let mut by_parent: BTreeMap<Option<&ComponentId>, Vec<&Component>> = BTreeMap::new();
    for component in &components {
        by_parent
            .entry(component.parent_id.as_ref())
            .or_default()
            .push(component);
    }
    for siblings in by_parent.values_mut() {
        siblings.sort_by(|a, b| a.name.cmp(&b.name));
    }

    println!("{:<32} {:<10} {:<10} COMPONENT_ID", "NAME", "TYPE", "STATE");
    print_tree(&by_parent, None, 0);
    Ok(EXIT_SUCCESS)
}

fn print_tree(
    by_parent: &BTreeMap<Option<&ComponentId>, Vec<&Component>>,
    parent: Option<&ComponentId>,
    depth: usize,
) {
    for component in by_parent.get(&parent).into_iter().flatten() {
        let name = format!("{}{}", "  ".repeat(depth), component.name);
        let state = if component.is_disposed() || component.initialized.is_some() {
            component.state().to_string()
        } else {
            "pending".to_owned()
        };
        println!(
            "{name:<32} {:<10} {:<10} {}",
            component.component_type,
            colorize_state(&state),
            component.id
        );
        print_tree(by_parent, Some(&component.id), depth + 1);
    }
}
