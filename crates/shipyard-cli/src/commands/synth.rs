//! Graph rendering command.

use anyhow::{Context, Result};

use super::build_stack;

pub fn synth(path: &str, out: Option<&str>) -> Result<()> {
    let (_, stack) = build_stack(path)?;
    let document = serde_json::to_string_pretty(&stack.graph.render())
        .context("Failed to serialize resource graph")?;

    match out {
        Some(out) => {
            std::fs::write(out, &document)
                .with_context(|| format!("Failed to write {}", out))?;
            println!("Wrote {} nodes to {}", stack.graph.len(), out);
        }
        None => println!("{}", document),
    }
    eprintln!("fingerprint: {}", stack.graph.fingerprint());
    Ok(())
}
