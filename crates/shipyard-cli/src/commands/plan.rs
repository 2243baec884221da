//! Provisioning plan command.

use anyhow::{Context, Result};

use super::build_stack;

pub fn plan(path: &str) -> Result<()> {
    let (config, stack) = build_stack(path)?;
    let order = stack
        .graph
        .topological_order()
        .context("Failed to order resource graph")?;

    println!("Plan for {} ({} nodes)", config.app_name, order.len());
    for (i, id) in order.iter().enumerate() {
        let kind = stack
            .graph
            .node(id)
            .map(|n| n.kind.type_name())
            .unwrap_or("?");
        println!("  {:>3}. {:<40} {}", i + 1, id, kind);
    }

    let patches: Vec<_> = stack.graph.patches().collect();
    if !patches.is_empty() {
        println!("\nDeferred patches:");
        for patch in patches {
            let sources: Vec<String> = patch
                .references()
                .iter()
                .map(ToString::to_string)
                .collect();
            println!(
                "  {}.{} <- {}",
                patch.target,
                patch.attribute,
                sources.join(", ")
            );
        }
    }

    println!("\nOutputs:");
    for name in stack.graph.outputs().keys() {
        println!("  {}", name);
    }
    Ok(())
}
