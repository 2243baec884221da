//! Variable interpolation for configuration values.
//!
//! Supports variables like:
//! - `${app.name}` - Application name
//! - `${app.region}` - Primary region
//! - `${env.VAR_NAME}` - Environment variable
//! - `${name}` - Custom variable

use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

use crate::{ConfigError, ConfigResult};

/// Variables available for interpolation.
#[derive(Debug, Clone, Default)]
pub struct VariableContext {
    pub app: AppContext,
    /// Environment variables
    pub env: HashMap<String, String>,
    /// Custom variables defined by the caller
    pub custom: HashMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct AppContext {
    pub name: String,
    pub region: String,
}

// Regex for matching ${...} variables
static VAR_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([a-zA-Z_][a-zA-Z0-9_]*(?:\.[a-zA-Z_][a-zA-Z0-9_]*)?)\}").unwrap()
});

impl VariableContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context seeded with the current process environment.
    pub fn from_env() -> Self {
        let mut ctx = Self::new();
        ctx.populate_env();
        ctx
    }

    pub fn populate_env(&mut self) {
        for (key, value) in std::env::vars() {
            self.env.insert(key, value);
        }
    }

    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        self.custom.insert(name.to_string(), value.into());
    }

    /// Copy of this context with the app variables filled in.
    pub fn for_app(&self, name: &str, region: &str) -> Self {
        Self {
            app: AppContext {
                name: name.to_string(),
                region: region.to_string(),
            },
            ..self.clone()
        }
    }

    /// Resolve a variable name to its value.
    pub fn resolve(&self, var_name: &str) -> Option<String> {
        let parts: Vec<&str> = var_name.split('.').collect();

        match parts.as_slice() {
            ["app", "name"] if !self.app.name.is_empty() => Some(self.app.name.clone()),
            ["app", "region"] if !self.app.region.is_empty() => Some(self.app.region.clone()),
            ["env", name] => self.env.get(*name).cloned(),
            [name] => self.custom.get(*name).cloned(),
            _ => None,
        }
    }

    /// Interpolate all variables in a string. Unknown variables are left as
    /// written.
    pub fn interpolate(&self, input: &str) -> String {
        VAR_REGEX
            .replace_all(input, |caps: &regex::Captures| {
                let var_name = &caps[1];
                self.resolve(var_name)
                    .unwrap_or_else(|| format!("${{{}}}", var_name))
            })
            .to_string()
    }

    /// Interpolate a value that must resolve completely.
    pub fn interpolate_required(&self, field: &str, input: &str) -> ConfigResult<String> {
        if let Some(caps) = VAR_REGEX
            .captures_iter(input)
            .find(|caps| self.resolve(&caps[1]).is_none())
        {
            return Err(ConfigError::MissingCredential {
                field: field.to_string(),
                variable: caps[0].to_string(),
            });
        }
        Ok(self.interpolate(input))
    }

    /// Names of the variables a string refers to.
    pub fn variables_in(input: &str) -> Vec<String> {
        VAR_REGEX
            .captures_iter(input)
            .map(|caps| caps[1].to_string())
            .collect()
    }
}

/// Builder for creating VariableContext.
pub struct VariableContextBuilder {
    ctx: VariableContext,
}

impl VariableContextBuilder {
    pub fn new() -> Self {
        Self {
            ctx: VariableContext::new(),
        }
    }

    pub fn with_app(mut self, name: impl Into<String>, region: impl Into<String>) -> Self {
        self.ctx.app.name = name.into();
        self.ctx.app.region = region.into();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.ctx.env.insert(key.into(), value.into());
        self
    }

    pub fn with_custom(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.ctx.custom.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> VariableContext {
        self.ctx
    }
}

impl Default for VariableContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_variables() {
        let ctx = VariableContextBuilder::new()
            .with_env("DB_USERNAME", "admin")
            .with_env("DB_NAME", "wordpress")
            .build();

        let result = ctx.interpolate("${env.DB_USERNAME}@${env.DB_NAME}");
        assert_eq!(result, "admin@wordpress");
    }

    #[test]
    fn test_app_variables() {
        let ctx = VariableContext::new().for_app("app-name", "us-east-1");
        assert_eq!(
            ctx.interpolate("com.amazonaws.${app.region}.s3"),
            "com.amazonaws.us-east-1.s3"
        );
        assert_eq!(ctx.interpolate("/${app.name}/db-host"), "/app-name/db-host");
    }

    #[test]
    fn test_unknown_variable_preserved() {
        let ctx = VariableContext::new();
        let result = ctx.interpolate("Unknown: ${unknown.var}");
        assert_eq!(result, "Unknown: ${unknown.var}");
    }

    #[test]
    fn test_custom_variables() {
        let mut ctx = VariableContext::new();
        ctx.set("stage", "prod");
        assert_eq!(ctx.interpolate("db-${stage}"), "db-prod");
    }

    #[test]
    fn test_interpolate_required_reports_first_unresolved() {
        let ctx = VariableContextBuilder::new()
            .with_env("DB_USERNAME", "admin")
            .build();

        assert_eq!(
            ctx.interpolate_required("db username", "${env.DB_USERNAME}")
                .unwrap(),
            "admin"
        );

        let err = ctx
            .interpolate_required("db password", "${env.DB_PASSWORD}")
            .unwrap_err();
        match err {
            ConfigError::MissingCredential { field, variable } => {
                assert_eq!(field, "db password");
                assert_eq!(variable, "${env.DB_PASSWORD}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_variables_in() {
        let vars = VariableContext::variables_in("${env.A}-${app.name}-plain");
        assert_eq!(vars, vec!["env.A", "app.name"]);
    }
}
