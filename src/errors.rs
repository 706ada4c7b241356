use crate::uploader::events::{EventSender, UploadEvent};
use crate::uploader::item::{FailureCategory, UploadItem};
use crate::uploader::progress_tracker::{QueueEntries, QueueState};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Validation error: {field} - {message}")]
    Validation { field: String, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),

    // Per-item upload failures. The Display text is what ends up in the item's error.
    #[error("File size cannot exceed {}M, file name: {}", megabytes(.limit), .name)]
    FileTooLarge { name: String, limit: u64 },

    #[error("File format must be one of: {exts}")]
    InvalidFileType { name: String, exts: String },

    #[error("Failed to read file: {reason}")]
    PreviewRead { name: String, reason: String },

    #[error("File upload error")]
    Transport { reason: String },

    #[error("File upload error: 404")]
    NotFound,

    #[error("Uploaded file is too large{}", detail_suffix(.detail))]
    PayloadTooLarge { detail: Option<String> },

    #[error("File upload error: {}", server_detail(.status, .detail))]
    Server { status: u16, detail: Option<String> },

    #[error("File upload error")]
    ResponseParse { reason: String },
}

/// Custom result type
pub type AppResult<T> = Result<T, AppError>;

fn megabytes(bytes: &u64) -> f64 {
    *bytes as f64 / 1024.0 / 1024.0
}

fn detail_suffix(detail: &Option<String>) -> String {
    detail
        .as_ref()
        .map(|d| format!(": {}", d))
        .unwrap_or_default()
}

fn server_detail(status: &u16, detail: &Option<String>) -> String {
    match detail {
        Some(d) => d.clone(),
        None => format!("HTTP {}", status),
    }
}

impl AppError {
    pub fn validation(field: &str, message: &str) -> Self {
        Self::Validation {
            field: field.to_string(),
            message: message.to_string(),
        }
    }

    pub fn file_too_large(name: &str, limit: u64) -> Self {
        Self::FileTooLarge {
            name: name.to_string(),
            limit,
        }
    }

    pub fn invalid_file_type(name: &str, exts: &str) -> Self {
        Self::InvalidFileType {
            name: name.to_string(),
            exts: exts.to_string(),
        }
    }

    /// Which part of the pipeline an item failure belongs to.
    pub fn category(&self) -> Option<FailureCategory> {
        match self {
            AppError::FileTooLarge { .. }
            | AppError::InvalidFileType { .. }
            | AppError::PreviewRead { .. }
            | AppError::Validation { .. } => Some(FailureCategory::Validation),
            AppError::Transport { .. } | AppError::Network(_) | AppError::Io(_) => {
                Some(FailureCategory::Transport)
            }
            AppError::NotFound | AppError::PayloadTooLarge { .. } | AppError::Server { .. } => {
                Some(FailureCategory::Server)
            }
            AppError::ResponseParse { .. } | AppError::Json(_) => {
                Some(FailureCategory::ResponseParse)
            }
            AppError::Config(_) | AppError::Internal(_) => None,
        }
    }
}

/// Safe queue state update
pub fn safe_state_update<F, R>(state: &QueueState, operation: &str, f: F) -> Option<R>
where
    F: FnOnce(&mut QueueEntries) -> R,
{
    match state.lock() {
        Ok(mut entries) => Some(f(&mut entries)),
        Err(e) => {
            log::error!("Failed to acquire queue lock for {}: {}", operation, e);
            None
        }
    }
}

pub fn safe_state_read<F, R>(state: &QueueState, operation: &str, f: F) -> Option<R>
where
    F: FnOnce(&QueueEntries) -> R,
{
    match state.lock() {
        Ok(entries) => Some(f(&entries)),
        Err(e) => {
            log::error!("Failed to acquire queue lock for {}: {}", operation, e);
            None
        }
    }
}

/// Run `f` against the item with the given key, if it is still queued
pub fn safe_item_update<F, R>(state: &QueueState, key: u64, operation: &str, f: F) -> Option<R>
where
    F: FnOnce(&mut UploadItem) -> R,
{
    safe_state_update(state, operation, |entries| {
        match entries.items.iter_mut().find(|item| item.key == key) {
            Some(item) => Some(f(item)),
            None => {
                log::warn!("Item {} not found for {} operation", key, operation);
                None
            }
        }
    })
    .flatten()
}

/// Emit a queue event; having no subscribers is not an error
pub fn safe_emit_event(events: &EventSender, event: UploadEvent) -> bool {
    let name = event.event;
    match events.send(event) {
        Ok(receivers) => {
            log::debug!("Emitted '{}' to {} subscriber(s)", name, receivers);
            true
        }
        Err(_) => {
            log::debug!("No subscribers for '{}' event", name);
            false
        }
    }
}
