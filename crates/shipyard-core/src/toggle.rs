//! Feature toggles for optional subsystems.
//!
//! Each optional subsystem is resolved once, at the start of a build, into a
//! tagged choice. Downstream components match on it instead of checking
//! nullable fields.

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase", tag = "state", content = "params")]
pub enum Toggle<T> {
    Enabled(T),
    Disabled,
}

impl<T> Toggle<T> {
    /// Resolve a flag, building the parameters only when enabled.
    pub fn from_flag(enabled: bool, params: impl FnOnce() -> T) -> Self {
        if enabled {
            Toggle::Enabled(params())
        } else {
            Toggle::Disabled
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, Toggle::Enabled(_))
    }

    pub fn as_ref(&self) -> Toggle<&T> {
        match self {
            Toggle::Enabled(t) => Toggle::Enabled(t),
            Toggle::Disabled => Toggle::Disabled,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Toggle<U> {
        match self {
            Toggle::Enabled(t) => Toggle::Enabled(f(t)),
            Toggle::Disabled => Toggle::Disabled,
        }
    }

    /// Like `map`, for a fallible builder.
    pub fn try_map<U, E>(self, f: impl FnOnce(T) -> Result<U, E>) -> Result<Toggle<U>, E> {
        match self {
            Toggle::Enabled(t) => Ok(Toggle::Enabled(f(t)?)),
            Toggle::Disabled => Ok(Toggle::Disabled),
        }
    }
}

/// Network shape: the platform's default network, or a dedicated one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase", tag = "mode")]
pub enum NetworkMode {
    Default,
    Custom { cidr: String },
}

impl NetworkMode {
    pub const CUSTOM_CIDR: &'static str = "172.17.0.0/16";

    pub fn from_flag(create_vpc: bool) -> Self {
        if create_vpc {
            NetworkMode::Custom {
                cidr: Self::CUSTOM_CIDR.to_string(),
            }
        } else {
            NetworkMode::Default
        }
    }
}
