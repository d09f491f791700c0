// Configuration loading shared by every vistag crate

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, warn};

/// Prefix for environment overrides (`VISTAG_RESOLUTION`, ...)
pub const ENV_PREFIX: &str = "VISTAG_";

/// Config file formats understood by [`from_str`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Toml,
    Yaml,
}

/// Load configuration from a string.
///
/// JSON is tried first, then TOML, then YAML. The first format that parses
/// wins.
pub fn from_str<T: DeserializeOwned>(content: &str) -> Result<T> {
    from_str_with_format(content).map(|(config, _)| config)
}

/// Same as [`from_str`], also reporting which format matched
pub fn from_str_with_format<T: DeserializeOwned>(content: &str) -> Result<(T, ConfigFormat)> {
    if content.trim().is_empty() {
        return Err(Error::Configuration("Configuration is empty".to_string()));
    }

    if let Ok(config) = serde_json::from_str::<T>(content) {
        return Ok((config, ConfigFormat::Json));
    }

    if let Ok(config) = toml::from_str::<T>(content) {
        return Ok((config, ConfigFormat::Toml));
    }

    if let Ok(config) = serde_yaml::from_str::<T>(content) {
        return Ok((config, ConfigFormat::Yaml));
    }

    Err(Error::Deserialization(
        "Unknown format (expected JSON, TOML or YAML)".to_string(),
    ))
}

/// Load configuration from a file.
/// SECURITY: rejects paths containing traversal sequences
pub fn from_file<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let shown = path.display().to_string();

    if shown.contains("..") || shown.contains("\\\\") {
        return Err(Error::Configuration(format!(
            "Path traversal detected: '{}'",
            shown
        )));
    }

    let content = std::fs::read_to_string(path)?;
    let (config, format) = from_str_with_format(&content)?;
    debug!("Loaded {:?} configuration from {}", format, shown);
    Ok(config)
}

/// Read `VISTAG_<key>` and parse it.
///
/// Unset variables yield `None`; unparsable values are logged and ignored so
/// a typo in the environment never prevents startup.
pub fn env_override<T: FromStr>(key: &str) -> Option<T> {
    let name = format!("{}{}", ENV_PREFIX, key);
    let raw = std::env::var(&name).ok()?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring {}={:?}: not a valid value", name, raw);
            None
        }
    }
}
