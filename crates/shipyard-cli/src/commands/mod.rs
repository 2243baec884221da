//! CLI command implementations.

pub mod apply;
pub mod plan;
pub mod release;
pub mod synth;

use anyhow::{Context, Result};
use shipyard_config::{AppConfig, VariableContext, load_app_config_file};
use shipyard_stack::{GraphBuilder, Stack};
use std::path::Path;

/// Load, interpolate and validate a configuration file.
pub fn load_config(path: &str) -> Result<AppConfig> {
    let vars = VariableContext::from_env();
    load_app_config_file(Path::new(path), &vars)
        .with_context(|| format!("Failed to load config file: {}", path))
}

pub fn build_stack(path: &str) -> Result<(AppConfig, Stack)> {
    let config = load_config(path)?;
    let stack = GraphBuilder::new(&config)
        .build()
        .with_context(|| format!("Failed to build stack for {}", config.app_name))?;
    Ok((config, stack))
}

pub fn validate(path: &str) -> Result<()> {
    let config = load_config(path)?;
    println!("Configuration is valid");
    println!("  app:      {} ({})", config.app_name, config.region);
    println!(
        "  network:  {}",
        if config.create_vpc { "custom VPC" } else { "default VPC" }
    );
    println!(
        "  database: {}",
        if config.db.create_database { "enabled" } else { "disabled" }
    );
    println!(
        "  backup:   {}",
        if config.backup.enabled {
            format!("enabled (copy to {})", config.backup.secondary_region)
        } else {
            "disabled".to_string()
        }
    );
    Ok(())
}
