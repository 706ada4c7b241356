use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::UploadConfig;

use super::item::SourceFile;

/// Everything needed to POST one file as `multipart/form-data`
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub url: String,
    pub field: String,
    pub fields: BTreeMap<String, String>,
    pub headers: BTreeMap<String, String>,
    pub with_credentials: bool,
    pub file: SourceFile,
}

impl TransferRequest {
    pub fn from_config(config: &UploadConfig, file: SourceFile) -> Self {
        Self {
            url: config.url.clone(),
            field: config.field.clone(),
            fields: config.fields.clone(),
            headers: config.headers.clone(),
            with_credentials: config.with_credentials,
            file,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferProgress {
    pub loaded: u64,
    /// `None` when the transport cannot tell the total size
    pub total: Option<u64>,
}

impl TransferProgress {
    pub fn percent(&self) -> u8 {
        match self.total {
            Some(total) if total > 0 => {
                let percent = (self.loaded as f64 * 100.0 / total as f64).round();
                percent.clamp(0.0, 100.0) as u8
            }
            _ => 0,
        }
    }
}

pub type ProgressCallback = Arc<dyn Fn(TransferProgress) + Send + Sync>;

/// How a single transfer ended, before the response is interpreted
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    Completed { status: u16, body: String },
    Aborted,
    Failed { reason: String },
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Resolves once the transfer reached a terminal state.
    /// `on_progress` may be called any number of times before that.
    async fn send(&self, request: TransferRequest, on_progress: ProgressCallback)
        -> TransferOutcome;
}
