//! Graph application command.

use anyhow::{Context, Result};
use shipyard_stack::{Applier, ApplyReport, SimulatedProvisioner, Stack};
use std::sync::Arc;

use super::build_stack;

/// Apply a built stack through the simulated provisioner.
pub async fn apply_stack(
    stack: &mut Stack,
    region: &str,
    fail_on: Option<String>,
) -> Result<ApplyReport> {
    let mut provisioner = SimulatedProvisioner::new(region);
    if let Some(node) = fail_on {
        provisioner = provisioner.fail_on(node);
    }

    Applier::new(Arc::new(provisioner))
        .apply(&mut stack.graph)
        .await
        .context("Apply failed")
}

pub async fn apply(path: &str, fail_on: Option<String>) -> Result<()> {
    let (config, mut stack) = build_stack(path)?;
    println!("Applying {} ({} nodes)\n", config.app_name, stack.graph.len());

    let report = apply_stack(&mut stack, &config.region, fail_on).await?;

    for id in &report.provisioned {
        let identifier = report
            .state
            .get(id)
            .map(|s| s.provisioned.identifier.as_str())
            .unwrap_or_default();
        println!("✓ {:<40} {}", id, identifier);
    }
    for (node, attribute) in &report.patched {
        println!("✓ patched {}.{}", node, attribute);
    }

    println!("\nOutputs:");
    for (name, value) in &report.outputs {
        println!("  {} = {}", name, value);
    }
    Ok(())
}
