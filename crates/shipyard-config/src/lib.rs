//! KDL configuration parsing for Shipyard.
//!
//! This crate handles:
//! - Stack configuration (shipyard.kdl)
//! - Validation of every configured value
//! - Variable interpolation for credentials and notification settings

pub mod app;
pub mod error;
pub mod variables;

pub use app::{AppConfig, load_app_config, load_app_config_file, parse_app_config};
pub use error::{ConfigError, ConfigResult};
pub use variables::{AppContext, VariableContext, VariableContextBuilder};
