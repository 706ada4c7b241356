use serde::Serialize;
use std::fmt;
use tokio::sync::broadcast;

use super::item::UploadItem;

pub type EventSender = broadcast::Sender<UploadEvent>;
pub type EventReceiver = broadcast::Receiver<UploadEvent>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UploadEventKind {
    #[serde(rename = "ready")]
    Ready,
    #[serde(rename = "progress")]
    Progress,
    #[serde(rename = "cancel")]
    Cancel,
    #[serde(rename = "error")]
    Error,
    #[serde(rename = "complete")]
    Complete,
    #[serde(rename = "completeAll")]
    CompleteAll,
}

impl UploadEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadEventKind::Ready => "ready",
            UploadEventKind::Progress => "progress",
            UploadEventKind::Cancel => "cancel",
            UploadEventKind::Error => "error",
            UploadEventKind::Complete => "complete",
            UploadEventKind::CompleteAll => "completeAll",
        }
    }
}

impl fmt::Display for UploadEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// One record on the queue's event stream. Only `completeAll` has no item.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadEvent {
    pub event: UploadEventKind,
    pub file_item: Option<UploadItem>,
}

impl UploadEvent {
    pub fn new(event: UploadEventKind, item: &UploadItem) -> Self {
        Self {
            event,
            file_item: Some(item.clone()),
        }
    }

    pub fn complete_all() -> Self {
        Self {
            event: UploadEventKind::CompleteAll,
            file_item: None,
        }
    }
}
