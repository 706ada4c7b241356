use chrono::Utc;
use serde::Serialize;
use std::sync::{Arc, Mutex};

use crate::errors::{safe_item_update, AppError};

use super::item::{UploadItem, UploadStatus};

/// Shared queue state type
pub type QueueState = Arc<Mutex<QueueEntries>>;

/// Backing collection plus the flag that keeps a single drain running
#[derive(Debug, Default)]
pub struct QueueEntries {
    pub items: Vec<UploadItem>,
    pub draining: bool,
    next_key: u64,
}

impl QueueEntries {
    pub fn next_key(&mut self) -> u64 {
        self.next_key += 1;
        self.next_key
    }

    /// Move the first `Ready` item (collection order) to `Uploading`
    pub fn claim_next_ready(&mut self) -> Option<UploadItem> {
        let item = self
            .items
            .iter_mut()
            .find(|item| item.status == UploadStatus::Ready)?;

        item.status = UploadStatus::Uploading;
        item.progress = 0;
        Some(item.clone())
    }

    pub fn summary(&self) -> QueueSummary {
        let mut summary = QueueSummary {
            total: self.items.len(),
            active: self.draining,
            ..QueueSummary::default()
        };

        for item in &self.items {
            match item.status {
                UploadStatus::Pending => summary.pending += 1,
                UploadStatus::Ready => summary.ready += 1,
                UploadStatus::Uploading => summary.uploading += 1,
                UploadStatus::Success => summary.success += 1,
                UploadStatus::Fail => summary.fail += 1,
                UploadStatus::Cancel => summary.cancel += 1,
            }
        }

        summary
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueSummary {
    pub total: usize,
    pub pending: usize,
    pub ready: usize,
    pub uploading: usize,
    pub success: usize,
    pub fail: usize,
    pub cancel: usize,
    pub active: bool,
}

impl QueueSummary {
    pub fn finished(&self) -> usize {
        self.success + self.fail + self.cancel
    }
}

fn transition(item: &mut UploadItem, next: UploadStatus) -> bool {
    if item.status.can_transition_to(next) {
        item.status = next;
        if next.is_terminal() {
            item.finished_at = Some(Utc::now());
        }
        true
    } else {
        log::warn!(
            "Ignoring {} -> {} for {} (status only moves forward)",
            item.status,
            next,
            item.id
        );
        false
    }
}

/// Record a failure on an item that is not shared yet (validation)
pub fn fail_item(item: &mut UploadItem, error: &AppError) -> bool {
    if !transition(item, UploadStatus::Fail) {
        return false;
    }
    item.error = Some(error.to_string());
    item.failure = error.category();
    true
}

/// Preview is in memory; the item can be picked up by the drain
pub fn mark_ready(state: &QueueState, key: u64, preview_url: String) -> Option<UploadItem> {
    safe_item_update(state, key, "ready update", |item| {
        if !transition(item, UploadStatus::Ready) {
            return None;
        }
        item.preview_url = Some(Arc::from(preview_url));
        log::debug!("Ready: {}", item.id);
        Some(item.clone())
    })
    .flatten()
}

pub fn update_progress(state: &QueueState, key: u64, percent: u8) -> Option<UploadItem> {
    safe_item_update(state, key, "progress update", |item| {
        if item.status != UploadStatus::Uploading {
            return None;
        }
        item.progress = percent;
        log::debug!("Progress: {} {}%", item.id, percent);
        Some(item.clone())
    })
    .flatten()
}

pub fn mark_success(
    state: &QueueState,
    key: u64,
    result_url: Option<String>,
) -> Option<UploadItem> {
    safe_item_update(state, key, "success update", |item| {
        if !transition(item, UploadStatus::Success) {
            return None;
        }
        item.result_url = result_url;
        log::info!(
            "Successfully uploaded {} -> {}",
            item.id,
            item.result_url.as_deref().unwrap_or("<no url>")
        );
        Some(item.clone())
    })
    .flatten()
}

pub fn mark_failure(state: &QueueState, key: u64, error: &AppError) -> Option<UploadItem> {
    safe_item_update(state, key, "failure update", |item| {
        if !fail_item(item, error) {
            return None;
        }
        log::warn!("Failed to upload {} - {:?}", item.id, error);
        Some(item.clone())
    })
    .flatten()
}

pub fn mark_cancelled(state: &QueueState, key: u64) -> Option<UploadItem> {
    safe_item_update(state, key, "cancel update", |item| {
        if !transition(item, UploadStatus::Cancel) {
            return None;
        }
        log::info!("Upload of {} was aborted", item.id);
        Some(item.clone())
    })
    .flatten()
}
