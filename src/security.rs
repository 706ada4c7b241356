use regex::Regex;
use reqwest::header::HeaderName;
use reqwest::Url;

use crate::config::UploadConfig;
use crate::errors::{AppError, AppResult};
use crate::uploader::item::SourceFile;

pub struct InputValidator;

impl InputValidator {
    /// Size and extension checks applied to every file before it is queued
    pub fn validate_upload_file(file: &SourceFile, config: &UploadConfig) -> AppResult<()> {
        Self::validate_file_size(file, config.max_length)?;
        if let Some(exts) = config.exts.as_deref() {
            Self::validate_file_extension(file, exts)?;
        }
        Ok(())
    }

    pub fn validate_file_size(file: &SourceFile, max_length: u64) -> AppResult<()> {
        if file.size() > max_length {
            return Err(AppError::file_too_large(file.name(), max_length));
        }
        Ok(())
    }

    /// Case-sensitive `.ext` suffix match against a comma-separated list
    pub fn validate_file_extension(file: &SourceFile, exts: &str) -> AppResult<()> {
        let allowed = Self::parse_extensions(exts);
        if allowed.is_empty() {
            return Ok(());
        }

        let name = file.name();
        let matches = allowed.iter().any(|ext| {
            name.strip_suffix(ext.as_str())
                .is_some_and(|stem| stem.ends_with('.'))
        });

        if !matches {
            return Err(AppError::invalid_file_type(name, exts));
        }
        Ok(())
    }

    pub fn parse_extensions(exts: &str) -> Vec<String> {
        exts.split(',')
            .map(str::trim)
            .filter(|ext| !ext.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn validate_extension_list(exts: &str) -> AppResult<()> {
        let ext_pattern = Regex::new(r"^[A-Za-z0-9_+\-]+$")
            .map_err(|e| AppError::Internal(e.to_string()))?;

        for ext in Self::parse_extensions(exts) {
            if !ext_pattern.is_match(&ext) {
                return Err(AppError::validation(
                    "exts",
                    &format!("Invalid extension '{}' (use e.g. png,jpg without dots)", ext),
                ));
            }
        }
        Ok(())
    }

    pub fn validate_endpoint_url(url: &str) -> AppResult<()> {
        let trimmed = url.trim();
        if trimmed.is_empty() {
            return Err(AppError::validation("url", "Upload URL cannot be empty"));
        }

        let parsed = Url::parse(trimmed)
            .map_err(|e| AppError::validation("url", &format!("Invalid upload URL: {}", e)))?;

        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(AppError::validation(
                "url",
                "Upload URL must use http or https",
            ));
        }
        Ok(())
    }

    pub fn validate_header_name(name: &str) -> AppResult<()> {
        HeaderName::from_bytes(name.as_bytes())
            .map(|_| ())
            .map_err(|_| AppError::validation("headers", &format!("Invalid header name '{}'", name)))
    }
}
