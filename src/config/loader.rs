//! Layered configuration resolution.
//!
//! Precedence, low to high: built-in defaults, user-global file, project
//! file, environment overrides. Malformed or missing documents are treated
//! as absent, never fatal. The hard ceilings are echoed back into the
//! resolved configuration after all layers apply.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::warn;

use crate::budget::{HARD_SAFETY_CAP, MAX_AUTO_ESCALATIONS};
use crate::config::env::apply_env_overrides_from;
use crate::config::schema::{QuillConfig, QuillConfigOverlay};

/// Project-local configuration file name, looked up at the project root.
pub const PROJECT_CONFIG_FILE: &str = ".quill.toml";

/// Keys that are informational echoes and may not be written.
const READ_ONLY_KEYS: &[&str] = &["limits.hard_safety_cap", "limits.max_auto_escalations"];

/// Errors from explicit configuration edits (the `config set` path).
///
/// Loading never fails; only writes do.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("TOML error: {0}")]
    Toml(String),

    #[error("unknown or read-only configuration key: {0}")]
    InvalidKey(String),
}

/// Per-user global configuration path.
pub fn user_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("quill")
        .join("config.toml")
}

/// Project-local configuration path.
pub fn project_config_path(root: &Path) -> PathBuf {
    root.join(PROJECT_CONFIG_FILE)
}

/// Resolve the configuration for a project root.
pub fn load(root: &Path) -> QuillConfig {
    load_layered(
        Some(&user_config_path()),
        Some(&project_config_path(root)),
        |var| std::env::var(var).ok(),
    )
}

/// Resolve with explicit layer paths and env lookup (injectable for tests).
pub fn load_layered(
    user_file: Option<&Path>,
    project_file: Option<&Path>,
    env_lookup: impl Fn(&str) -> Option<String>,
) -> QuillConfig {
    let mut config = QuillConfig::default();
    if let Some(overlay) = user_file.and_then(read_overlay) {
        overlay.apply(&mut config);
    }
    if let Some(overlay) = project_file.and_then(read_overlay) {
        overlay.apply(&mut config);
    }
    apply_env_overrides_from(&mut config, env_lookup);
    echo_hard_limits(&mut config);
    config
}

/// Read one layer. Missing or malformed content is absent, never fatal.
fn read_overlay(path: &Path) -> Option<QuillConfigOverlay> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return None,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "config file unreadable, treating as absent");
            return None;
        }
    };
    match toml::from_str::<QuillConfigOverlay>(&raw) {
        Ok(overlay) => Some(overlay),
        Err(err) => {
            warn!(path = %path.display(), error = %err, "config file malformed, treating as absent");
            None
        }
    }
}

/// Overwrite the informational echo fields with the immutable constants,
/// regardless of what any layer attempted to put there.
fn echo_hard_limits(config: &mut QuillConfig) {
    config.limits.hard_safety_cap = HARD_SAFETY_CAP;
    config.limits.max_auto_escalations = MAX_AUTO_ESCALATIONS;
}

/// Read a value out of the resolved configuration by dotted path.
pub fn get_value(config: &QuillConfig, dotted: &str) -> Option<toml::Value> {
    let root = toml::Value::try_from(config).ok()?;
    let mut current = &root;
    for segment in dotted.split('.') {
        current = current.get(segment)?;
    }
    Some(current.clone())
}

/// Write a scalar into the project configuration file by dotted path.
///
/// The raw string is interpreted as bool, integer, or float when it parses
/// as one, else stored as a string. Intermediate tables are created as
/// needed; sibling keys in the file are preserved.
pub fn set_value(project_file: &Path, dotted: &str, raw: &str) -> Result<(), ConfigError> {
    if dotted.is_empty() || READ_ONLY_KEYS.contains(&dotted) {
        return Err(ConfigError::InvalidKey(dotted.to_string()));
    }

    let mut document = match fs::read_to_string(project_file) {
        Ok(existing) => toml::from_str::<toml::Value>(&existing)
            .ok()
            .filter(toml::Value::is_table)
            .unwrap_or_else(|| toml::Value::Table(toml::map::Map::new())),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            toml::Value::Table(toml::map::Map::new())
        }
        Err(err) => return Err(ConfigError::Io(err)),
    };

    let segments: Vec<&str> = dotted.split('.').collect();
    let Some((leaf, tables)) = segments.split_last() else {
        return Err(ConfigError::InvalidKey(dotted.to_string()));
    };
    let mut current = &mut document;
    for segment in tables {
        let table = current
            .as_table_mut()
            .ok_or_else(|| ConfigError::InvalidKey(dotted.to_string()))?;
        current = table
            .entry(segment.to_string())
            .or_insert_with(|| toml::Value::Table(toml::map::Map::new()));
    }
    let table = current
        .as_table_mut()
        .ok_or_else(|| ConfigError::InvalidKey(dotted.to_string()))?;
    table.insert(leaf.to_string(), parse_scalar(raw));

    let rendered =
        toml::to_string_pretty(&document).map_err(|err| ConfigError::Toml(err.to_string()))?;
    if let Some(parent) = project_file.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(project_file, rendered)?;
    Ok(())
}

fn parse_scalar(raw: &str) -> toml::Value {
    let trimmed = raw.trim();
    if let Ok(value) = trimmed.parse::<bool>() {
        return toml::Value::Boolean(value);
    }
    if let Ok(value) = trimmed.parse::<i64>() {
        return toml::Value::Integer(value);
    }
    if let Ok(value) = trimmed.parse::<f64>() {
        return toml::Value::Float(value);
    }
    toml::Value::String(trimmed.to_string())
}
