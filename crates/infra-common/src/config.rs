//! Config file loading and environment overrides

use serde::de::DeserializeOwned;
use std::path::Path;

use crate::errors::types::{Error, Result};

/// Parse a TOML document into `T`
pub fn parse_toml<T: DeserializeOwned>(content: &str) -> Result<T> {
    Ok(toml::from_str(content)?)
}

/// Read and parse a TOML file
pub fn load_toml<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
    parse_toml(&content)
}

/// Value of an environment variable, ignoring unset and blank values
pub fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Replace `target` with the variable's value when it is set.
/// Returns whether an override happened.
pub fn override_from_env(target: &mut String, key: &str) -> bool {
    match env_value(key) {
        Some(value) => {
            *target = value;
            true
        }
        None => false,
    }
}
