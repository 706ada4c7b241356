use serde::Deserialize;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

use crate::config::UploadConfig;
use crate::errors::{
    safe_emit_event, safe_state_read, safe_state_update, AppError, AppResult,
};
use crate::security::InputValidator;

use super::events::{EventReceiver, EventSender, UploadEvent, UploadEventKind};
use super::item::{SourceFile, UploadItem, UploadStatus};
use super::preview::PreviewReader;
use super::progress_tracker::*;
use super::transport::{
    ProgressCallback, TransferOutcome, TransferProgress, TransferRequest, Transport,
};

/// Response body of the upload endpoint
#[derive(Debug, Deserialize)]
struct UploadResponse {
    #[serde(default)]
    url: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

/// Uploads files one at a time, reporting progress and outcomes as events.
///
/// Cloning is cheap and every clone drives the same queue. Must be used
/// from within a tokio runtime.
#[derive(Clone)]
pub struct UploadQueue {
    inner: Arc<QueueShared>,
}

struct QueueShared {
    config: UploadConfig,
    session_id: String,
    state: QueueState,
    events: EventSender,
    reader: Arc<dyn PreviewReader>,
    transport: Arc<dyn Transport>,
}

impl UploadQueue {
    pub fn new(
        config: UploadConfig,
        reader: Arc<dyn PreviewReader>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let session_id = uuid::Uuid::new_v4().to_string();
        log::info!("Created upload queue {} for {}", session_id, config.url);

        Self {
            inner: Arc::new(QueueShared {
                config,
                session_id,
                state: Arc::new(Mutex::new(QueueEntries::default())),
                events,
                reader,
                transport,
            }),
        }
    }

    pub fn config(&self) -> &UploadConfig {
        &self.inner.config
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    /// Receive every event emitted from now on. Earlier events are not replayed.
    pub fn subscribe(&self) -> EventReceiver {
        self.inner.events.subscribe()
    }

    /// Validate and enqueue files, returning their ids in input order.
    ///
    /// Rejected files are kept at `Fail`. Accepted ones become `Ready` once
    /// their preview has been read, in whatever order those reads finish.
    pub fn add_files<I>(&self, files: I) -> Vec<String>
    where
        I: IntoIterator<Item = SourceFile>,
    {
        let mut ids = Vec::new();

        for file in files {
            let validation = InputValidator::validate_upload_file(&file, &self.inner.config);

            let Some(item) = safe_state_update(&self.inner.state, "add file", |entries| {
                let mut item = UploadItem::new(entries.next_key(), file);
                if let Err(e) = &validation {
                    fail_item(&mut item, e);
                }
                entries.items.push(item.clone());
                item
            }) else {
                continue;
            };

            ids.push(item.id.clone());

            match validation {
                Ok(()) => {
                    log::info!(
                        "Queued {} ({} bytes) in session {}",
                        item.file.name(),
                        item.file.size(),
                        self.inner.session_id
                    );
                    self.spawn_preview(item.key, item.file.clone());
                }
                Err(e) => {
                    log::warn!("Rejected {}: {}", item.file.name(), e);
                    self.emit(UploadEventKind::Error, &item);
                }
            }
        }

        if self.inner.config.auto_upload {
            self.upload_all();
        }

        ids
    }

    /// Start draining `Ready` items, one transfer at a time.
    ///
    /// Returns false without touching anything when no item is `Ready` or a
    /// drain is already running (it will pick up newly ready items itself).
    pub fn upload_all(&self) -> bool {
        let claimed = safe_state_update(&self.inner.state, "start queue", |entries| {
            if entries.draining {
                return None;
            }
            let item = entries.claim_next_ready()?;
            entries.draining = true;
            Some(item)
        })
        .flatten();

        match claimed {
            Some(item) => {
                log::info!("Starting uploads for session {}", self.inner.session_id);
                let queue = self.clone();
                tokio::spawn(async move { queue.drain(item).await });
                true
            }
            None => {
                log::debug!(
                    "Nothing to start for session {}",
                    self.inner.session_id
                );
                false
            }
        }
    }

    pub fn items(&self) -> Vec<UploadItem> {
        safe_state_read(&self.inner.state, "items snapshot", |entries| {
            entries.items.clone()
        })
        .unwrap_or_default()
    }

    /// First item with the given id (ids can collide)
    pub fn item(&self, id: &str) -> Option<UploadItem> {
        safe_state_read(&self.inner.state, "item lookup", |entries| {
            entries.items.iter().find(|item| item.id == id).cloned()
        })
        .flatten()
    }

    pub fn summary(&self) -> QueueSummary {
        safe_state_read(&self.inner.state, "summary", QueueEntries::summary).unwrap_or_default()
    }

    pub fn is_active(&self) -> bool {
        safe_state_read(&self.inner.state, "activity check", |entries| entries.draining)
            .unwrap_or(false)
    }

    /// Drop every item except the one currently uploading. Returns how many went.
    pub fn clear(&self) -> usize {
        safe_state_update(&self.inner.state, "clear", |entries| {
            let before = entries.items.len();
            entries
                .items
                .retain(|item| item.status == UploadStatus::Uploading);
            before - entries.items.len()
        })
        .unwrap_or(0)
    }

    fn emit(&self, kind: UploadEventKind, item: &UploadItem) {
        safe_emit_event(&self.inner.events, UploadEvent::new(kind, item));
    }

    fn spawn_preview(&self, key: u64, file: SourceFile) {
        let queue = self.clone();
        tokio::spawn(async move {
            let state = &queue.inner.state;
            let updated = match queue.inner.reader.read_data_url(&file).await {
                Ok(url) => mark_ready(state, key, url).map(|item| (UploadEventKind::Ready, item)),
                Err(e) => {
                    let error = AppError::PreviewRead {
                        name: file.name().to_string(),
                        reason: e.to_string(),
                    };
                    mark_failure(state, key, &error).map(|item| (UploadEventKind::Error, item))
                }
            };

            if let Some((kind, item)) = updated {
                queue.emit(kind, &item);
                if kind == UploadEventKind::Ready && queue.inner.config.auto_upload {
                    queue.upload_all();
                }
            }
        });
    }

    async fn drain(self, first: UploadItem) {
        let mut current = Some(first);
        let mut transferred = 0usize;

        while let Some(item) = current {
            self.transfer_one(item).await;
            transferred += 1;
            current = self.advance_to_next();
        }

        log::info!(
            "Session {} drained after {} transfer(s)",
            self.inner.session_id,
            transferred
        );
        safe_emit_event(&self.inner.events, UploadEvent::complete_all());
    }

    /// Claim the next `Ready` item, or end the drain when there is none
    fn advance_to_next(&self) -> Option<UploadItem> {
        safe_state_update(&self.inner.state, "advance queue", |entries| {
            let next = entries.claim_next_ready();
            if next.is_none() {
                entries.draining = false;
            }
            next
        })
        .flatten()
    }

    async fn transfer_one(&self, item: UploadItem) {
        log::info!(
            "Uploading {} ({} bytes) to {}",
            item.file.name(),
            item.file.size(),
            self.inner.config.url
        );

        let request = TransferRequest::from_config(&self.inner.config, item.file.clone());
        let outcome = self
            .inner
            .transport
            .send(request, self.progress_callback(item.key))
            .await;

        let state = &self.inner.state;
        let updated = match outcome {
            TransferOutcome::Aborted => {
                mark_cancelled(state, item.key).map(|item| (UploadEventKind::Cancel, item))
            }
            TransferOutcome::Failed { reason } => {
                let error = AppError::Transport { reason };
                mark_failure(state, item.key, &error).map(|item| (UploadEventKind::Error, item))
            }
            TransferOutcome::Completed { status, body } => {
                match interpret_response(status, &body) {
                    Ok(url) => mark_success(state, item.key, url)
                        .map(|item| (UploadEventKind::Complete, item)),
                    Err(error) => mark_failure(state, item.key, &error)
                        .map(|item| (UploadEventKind::Error, item)),
                }
            }
        };

        if let Some((kind, item)) = updated {
            self.emit(kind, &item);
        }
    }

    fn progress_callback(&self, key: u64) -> ProgressCallback {
        let state = self.inner.state.clone();
        let events = self.inner.events.clone();
        Arc::new(move |progress: TransferProgress| {
            if let Some(item) = update_progress(&state, key, progress.percent()) {
                safe_emit_event(&events, UploadEvent::new(UploadEventKind::Progress, &item));
            }
        })
    }
}

/// Map a finished HTTP exchange to the uploaded file's URL or an item error
pub fn interpret_response(status: u16, body: &str) -> AppResult<Option<String>> {
    match status {
        404 => Err(AppError::NotFound),
        413 => {
            // The body is optional here; a parse failure keeps the plain message
            let detail = serde_json::from_str::<UploadResponse>(body)
                .ok()
                .and_then(|response| response.error)
                .and_then(|error| error_text(&error));
            Err(AppError::PayloadTooLarge { detail })
        }
        _ => {
            let response: UploadResponse =
                serde_json::from_str(body).map_err(|e| AppError::ResponseParse {
                    reason: e.to_string(),
                })?;
            let detail = response.error.as_ref().and_then(error_text);

            match (status, detail) {
                (200, None) => Ok(response.url.as_ref().and_then(url_text)),
                (status, detail) => Err(AppError::Server { status, detail }),
            }
        }
    }
}

/// The returned `url` as text; non-string values are kept in their JSON form
fn url_text(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Text of a JSON `error` field, or `None` when it is falsy
fn error_text(value: &serde_json::Value) -> Option<String> {
    use serde_json::Value;

    match value {
        Value::Null | Value::Bool(false) => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) if n.as_f64() == Some(0.0) => None,
        other => Some(other.to_string()),
    }
}
