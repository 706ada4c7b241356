use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::errors::{AppError, AppResult};
use crate::security::InputValidator;

const DEFAULT_MAX_LENGTH: u64 = 10 * 1024 * 1024; // 10MB
const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Upload settings, fixed for the lifetime of a queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_field")]
    pub field: String,
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default = "default_max_length")]
    pub max_length: u64,
    /// Comma-separated extensions without leading dots, e.g. "png,jpg"
    #[serde(default)]
    pub exts: Option<String>,
    #[serde(default)]
    pub with_credentials: bool,
    #[serde(default)]
    pub auto_upload: bool,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_field() -> String {
    "file".to_string()
}

fn default_max_length() -> u64 {
    DEFAULT_MAX_LENGTH
}

fn default_event_capacity() -> usize {
    DEFAULT_EVENT_CAPACITY
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            field: default_field(),
            fields: BTreeMap::new(),
            headers: BTreeMap::new(),
            max_length: DEFAULT_MAX_LENGTH,
            exts: None,
            with_credentials: false,
            auto_upload: false,
            timeout_secs: None,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl UploadConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }
}

pub fn default_config_path() -> AppResult<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| AppError::Config("Could not find config directory".to_string()))?
        .join("upload-queue");

    Ok(config_dir.join("config.json"))
}

pub fn load_config(path: &Path) -> AppResult<UploadConfig> {
    let config_str = fs::read_to_string(path)?;
    let config: UploadConfig = serde_json::from_str(&config_str)?;
    log::info!("Loaded upload configuration from {}", path.display());
    Ok(config)
}

/// Explicit path must exist; otherwise use the default location if present
pub fn load_config_or_default(path: Option<&Path>) -> AppResult<UploadConfig> {
    if let Some(path) = path {
        return load_config(path);
    }

    let default_path = default_config_path()?;
    if default_path.exists() {
        load_config(&default_path)
    } else {
        log::debug!(
            "No configuration at {}, using defaults",
            default_path.display()
        );
        Ok(UploadConfig::default())
    }
}

pub fn save_config(config: &UploadConfig, path: &Path) -> AppResult<()> {
    validate_config(config)?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    // Create backup of existing config
    if path.exists() {
        let backup_path = path.with_extension("json.bak");
        if let Err(e) = fs::copy(path, &backup_path) {
            log::warn!("Failed to create config backup: {}", e);
        }
    }

    let config_str = serde_json::to_string_pretty(config)?;
    fs::write(path, config_str)?;

    log::info!("Configuration saved to {}", path.display());
    Ok(())
}

pub fn validate_config(config: &UploadConfig) -> AppResult<()> {
    InputValidator::validate_endpoint_url(&config.url)?;

    if config.field.trim().is_empty() {
        return Err(AppError::validation("field", "Form field name cannot be empty"));
    }

    if config.max_length == 0 {
        return Err(AppError::validation("maxLength", "Must be greater than 0"));
    }

    if let Some(exts) = config.exts.as_deref() {
        InputValidator::validate_extension_list(exts)?;
    }

    for name in config.headers.keys() {
        InputValidator::validate_header_name(name)?;
    }

    if config.event_capacity == 0 {
        return Err(AppError::validation("eventCapacity", "Must be greater than 0"));
    }

    if config.timeout_secs == Some(0) {
        return Err(AppError::validation("timeoutSecs", "Must be greater than 0"));
    }

    Ok(())
}
