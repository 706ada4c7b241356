use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::errors::{AppError, AppResult};

#[derive(Debug, Clone)]
enum FileContent {
    Memory(Arc<Vec<u8>>),
    Disk(PathBuf),
}

/// A file handed to the queue: name, size and a way to get at the bytes.
#[derive(Debug, Clone, Serialize)]
pub struct SourceFile {
    name: String,
    size: u64,
    #[serde(skip)]
    content: FileContent,
}

impl SourceFile {
    pub fn from_bytes(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            size: bytes.len() as u64,
            content: FileContent::Memory(Arc::new(bytes)),
        }
    }

    /// Size is taken from the file metadata now; bytes are read lazily.
    pub fn from_path(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let metadata = std::fs::metadata(path)?;
        if !metadata.is_file() {
            return Err(AppError::validation("file_path", "Path is not a file"));
        }

        let name = path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string();

        Ok(Self {
            name,
            size: metadata.len(),
            content: FileContent::Disk(path.to_path_buf()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn path(&self) -> Option<&Path> {
        match &self.content {
            FileContent::Disk(path) => Some(path),
            FileContent::Memory(_) => None,
        }
    }

    pub async fn read(&self) -> AppResult<Vec<u8>> {
        match &self.content {
            FileContent::Memory(bytes) => Ok(bytes.to_vec()),
            FileContent::Disk(path) => Ok(tokio::fs::read(path).await?),
        }
    }

    pub fn extension(&self) -> Option<&str> {
        Path::new(&self.name).extension().and_then(|e| e.to_str())
    }

    pub fn mime_type(&self) -> &'static str {
        match self.extension().map(|e| e.to_ascii_lowercase()).as_deref() {
            Some("png") => "image/png",
            Some("jpg") | Some("jpeg") => "image/jpeg",
            Some("webp") => "image/webp",
            Some("gif") => "image/gif",
            Some("bmp") => "image/bmp",
            Some("svg") => "image/svg+xml",
            Some("pdf") => "application/pdf",
            Some("json") => "application/json",
            Some("zip") => "application/zip",
            Some("txt") => "text/plain",
            Some("csv") => "text/csv",
            Some("mp4") => "video/mp4",
            Some("mp3") => "audio/mpeg",
            _ => "application/octet-stream",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    Pending,
    Ready,
    Uploading,
    Success,
    Fail,
    Cancel,
}

impl UploadStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UploadStatus::Success | UploadStatus::Fail | UploadStatus::Cancel
        )
    }

    /// Statuses only move forward; nothing goes back to `Ready`.
    pub fn can_transition_to(&self, next: UploadStatus) -> bool {
        use UploadStatus::*;
        matches!(
            (*self, next),
            (Pending, Ready) | (Pending, Fail) | (Ready, Uploading) | (Uploading, Success)
                | (Uploading, Fail)
                | (Uploading, Cancel)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UploadStatus::Pending => "pending",
            UploadStatus::Ready => "ready",
            UploadStatus::Uploading => "uploading",
            UploadStatus::Success => "success",
            UploadStatus::Fail => "fail",
            UploadStatus::Cancel => "cancel",
        }
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    /// Rejected before any network call (size, extension, unreadable file)
    Validation,
    Transport,
    Server,
    ResponseParse,
}

/// One file's upload record. Values handed out by the queue are snapshots.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadItem {
    #[serde(skip)]
    pub(crate) key: u64,
    pub id: String,
    pub file: SourceFile,
    pub status: UploadStatus,
    pub progress: u8,
    pub preview_url: Option<Arc<str>>,
    pub result_url: Option<String>,
    pub error: Option<String>,
    pub failure: Option<FailureCategory>,
    pub added_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl UploadItem {
    pub(crate) fn new(key: u64, file: SourceFile) -> Self {
        Self {
            key,
            id: item_id(&file),
            file,
            status: UploadStatus::Pending,
            progress: 0,
            preview_url: None,
            result_url: None,
            error: None,
            failure: None,
            added_at: Utc::now(),
            finished_at: None,
        }
    }
}

/// Size followed by name. Two files sharing both get the same id.
pub fn item_id(file: &SourceFile) -> String {
    format!("{}{}", file.size(), file.name())
}
