//! Resource naming.

/// Builds `<app>-<suffix>` names for every named resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Naming {
    app: String,
}

impl Naming {
    pub fn new(app: impl Into<String>) -> Self {
        Self { app: app.into() }
    }

    pub fn app(&self) -> &str {
        &self.app
    }

    pub fn name(&self, suffix: &str) -> String {
        format!("{}-{}", self.app, suffix)
    }
}
