mod common;

use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast::error::TryRecvError;
use tokio::sync::Semaphore;

use upload_queue::errors::{AppError, AppResult};
use upload_queue::uploader::{
    FailureCategory, PreviewReader, ProgressCallback, SourceFile, TransferOutcome,
    TransferProgress, TransferRequest, Transport, UploadEventKind, UploadQueue, UploadStatus,
};
use upload_queue::UploadConfig;

use common::{collect_until, next_event, outcomes, wait_ready};

struct InstantReader;

#[async_trait]
impl PreviewReader for InstantReader {
    async fn read_data_url(&self, file: &SourceFile) -> AppResult<String> {
        Ok(format!("data:{};base64,", file.mime_type()))
    }
}

struct FailingReader;

#[async_trait]
impl PreviewReader for FailingReader {
    async fn read_data_url(&self, _file: &SourceFile) -> AppResult<String> {
        Err(AppError::Io(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "permission denied",
        )))
    }
}

/// Holds back the preview of one file until a permit is released
struct GatedReader {
    held: &'static str,
    gate: Arc<Semaphore>,
}

#[async_trait]
impl PreviewReader for GatedReader {
    async fn read_data_url(&self, file: &SourceFile) -> AppResult<String> {
        if file.name() == self.held {
            let permit = self
                .gate
                .acquire()
                .await
                .map_err(|e| AppError::Internal(e.to_string()))?;
            permit.forget();
        }
        Ok("data:application/octet-stream;base64,".to_string())
    }
}

/// Answers per file name; unknown files get a 200 with a CDN url
#[derive(Default)]
struct ScriptedTransport {
    outcomes: Mutex<HashMap<String, TransferOutcome>>,
    requests: Mutex<Vec<TransferRequest>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    /// Released each time a transfer starts
    release_on_send: Option<Arc<Semaphore>>,
}

impl ScriptedTransport {
    fn respond(self, name: &str, outcome: TransferOutcome) -> Self {
        self.outcomes
            .lock()
            .unwrap()
            .insert(name.to_string(), outcome);
        self
    }

    fn release_on_send(mut self, gate: Arc<Semaphore>) -> Self {
        self.release_on_send = Some(gate);
        self
    }

    fn sent(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|request| request.file.name().to_string())
            .collect()
    }
}

fn completed(status: u16, body: serde_json::Value) -> TransferOutcome {
    TransferOutcome::Completed {
        status,
        body: body.to_string(),
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(
        &self,
        request: TransferRequest,
        on_progress: ProgressCallback,
    ) -> TransferOutcome {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let name = request.file.name().to_string();
        let total = request.file.size();
        self.requests.lock().unwrap().push(request);
        if let Some(gate) = &self.release_on_send {
            gate.add_permits(1);
        }

        on_progress(TransferProgress {
            loaded: total / 2,
            total: Some(total),
        });
        tokio::time::sleep(Duration::from_millis(5)).await;
        on_progress(TransferProgress {
            loaded: total,
            total: Some(total),
        });

        let outcome = self
            .outcomes
            .lock()
            .unwrap()
            .get(&name)
            .cloned()
            .unwrap_or_else(|| {
                completed(200, json!({ "url": format!("https://cdn.example/{}", name) }))
            });

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        outcome
    }
}

fn test_config() -> UploadConfig {
    UploadConfig::new("https://files.example.com/upload")
}

fn file(name: &str, size: usize) -> SourceFile {
    SourceFile::from_bytes(name, vec![1u8; size])
}

fn queue_with(config: UploadConfig, transport: Arc<ScriptedTransport>) -> UploadQueue {
    UploadQueue::new(config, Arc::new(InstantReader), transport)
}

#[tokio::test]
async fn test_success_then_server_error_then_complete_all() {
    let transport = Arc::new(
        ScriptedTransport::default().respond("b.png", completed(500, json!({ "error": "boom" }))),
    );
    let queue = queue_with(test_config(), transport.clone());
    let mut events = queue.subscribe();

    let ids = queue.add_files(vec![file("a.png", 10), file("b.png", 20)]);
    assert_eq!(ids, vec!["10a.png", "20b.png"]);
    wait_ready(&mut events, 2).await;

    assert!(queue.upload_all());
    let seen = collect_until(&mut events, UploadEventKind::CompleteAll).await;

    assert_eq!(
        outcomes(&seen),
        vec![
            (UploadEventKind::Complete, Some("a.png".to_string())),
            (UploadEventKind::Error, Some("b.png".to_string())),
            (UploadEventKind::CompleteAll, None),
        ]
    );
    assert_eq!(transport.sent(), vec!["a.png", "b.png"]);

    let a = queue.item("10a.png").unwrap();
    assert_eq!(a.status, UploadStatus::Success);
    assert_eq!(a.result_url.as_deref(), Some("https://cdn.example/a.png"));
    assert!(a.finished_at.is_some());

    let b = queue.item("20b.png").unwrap();
    assert_eq!(b.status, UploadStatus::Fail);
    assert!(b.error.as_deref().unwrap().contains("boom"));
    assert_eq!(b.failure, Some(FailureCategory::Server));
    assert!(!queue.is_active());
}

#[tokio::test]
async fn test_oversized_file_is_rejected_without_transfer() {
    let transport = Arc::new(ScriptedTransport::default());
    let mut config = test_config();
    config.max_length = 1024 * 1024;
    let queue = queue_with(config, transport.clone());
    let mut events = queue.subscribe();

    queue.add_files(vec![file("big.bin", 1024 * 1024 + 1)]);

    let event = next_event(&mut events).await;
    assert_eq!(event.event, UploadEventKind::Error);
    let item = event.file_item.unwrap();
    assert_eq!(item.status, UploadStatus::Fail);
    assert_eq!(
        item.error.as_deref(),
        Some("File size cannot exceed 1M, file name: big.bin")
    );
    assert_eq!(item.failure, Some(FailureCategory::Validation));

    // Rejected items stay visible
    assert_eq!(queue.items().len(), 1);
    assert!(!queue.upload_all());
    assert!(transport.sent().is_empty());
}

#[tokio::test]
async fn test_extension_allow_list_is_case_sensitive() {
    let transport = Arc::new(ScriptedTransport::default());
    let mut config = test_config();
    config.exts = Some("png,jpg".to_string());
    let queue = queue_with(config, transport.clone());
    let mut events = queue.subscribe();

    queue.add_files(vec![
        file("ok.png", 3),
        file("notes.txt", 3),
        file("SHOUT.PNG", 3),
    ]);

    let first = next_event(&mut events).await;
    let second = next_event(&mut events).await;
    for (event, name) in [(first, "notes.txt"), (second, "SHOUT.PNG")] {
        assert_eq!(event.event, UploadEventKind::Error);
        let item = event.file_item.unwrap();
        assert_eq!(item.file.name(), name);
        assert_eq!(
            item.error.as_deref(),
            Some("File format must be one of: png,jpg")
        );
    }

    wait_ready(&mut events, 1).await;
    assert!(queue.upload_all());
    collect_until(&mut events, UploadEventKind::CompleteAll).await;

    assert_eq!(transport.sent(), vec!["ok.png"]);
    let summary = queue.summary();
    assert_eq!(summary.success, 1);
    assert_eq!(summary.fail, 2);
}

#[tokio::test]
async fn test_only_one_transfer_in_flight() {
    let transport = Arc::new(ScriptedTransport::default());
    let queue = queue_with(test_config(), transport.clone());
    let mut events = queue.subscribe();

    let names: Vec<String> = (0..5).map(|i| format!("photo{}.png", i)).collect();
    queue.add_files(names.iter().map(|name| file(name, 8)));
    wait_ready(&mut events, 5).await;

    assert!(queue.upload_all());
    // A second call while draining does not start another transfer
    assert!(!queue.upload_all());

    loop {
        let event = next_event(&mut events).await;
        assert!(queue.summary().uploading <= 1);
        if event.event == UploadEventKind::CompleteAll {
            break;
        }
    }

    assert_eq!(transport.max_in_flight.load(Ordering::SeqCst), 1);
    assert_eq!(transport.sent(), names);
    assert_eq!(queue.summary().success, 5);
}

#[tokio::test]
async fn test_progress_events_report_percent() {
    let transport = Arc::new(ScriptedTransport::default());
    let queue = queue_with(test_config(), transport);
    let mut events = queue.subscribe();

    queue.add_files(vec![file("a.png", 10)]);
    wait_ready(&mut events, 1).await;
    queue.upload_all();

    let seen = collect_until(&mut events, UploadEventKind::CompleteAll).await;
    let progress: Vec<u8> = seen
        .iter()
        .filter(|event| event.event == UploadEventKind::Progress)
        .map(|event| event.file_item.as_ref().unwrap().progress)
        .collect();
    assert_eq!(progress, vec![50, 100]);

    for event in seen.iter().filter(|e| e.event == UploadEventKind::Progress) {
        assert_eq!(
            event.file_item.as_ref().unwrap().status,
            UploadStatus::Uploading
        );
    }
}

#[tokio::test]
async fn test_not_found_fails_and_advances() {
    let transport = Arc::new(
        ScriptedTransport::default().respond("a.png", completed(404, json!({ "url": "ignored" }))),
    );
    let queue = queue_with(test_config(), transport.clone());
    let mut events = queue.subscribe();

    queue.add_files(vec![file("a.png", 4), file("b.png", 4)]);
    wait_ready(&mut events, 2).await;
    queue.upload_all();
    collect_until(&mut events, UploadEventKind::CompleteAll).await;

    let a = queue.item("4a.png").unwrap();
    assert_eq!(a.status, UploadStatus::Fail);
    assert_eq!(a.error.as_deref(), Some("File upload error: 404"));
    assert!(a.result_url.is_none());
    assert_eq!(queue.item("4b.png").unwrap().status, UploadStatus::Success);
    assert_eq!(transport.sent(), vec!["a.png", "b.png"]);
}

#[tokio::test]
async fn test_payload_too_large_merges_server_error() {
    let transport = Arc::new(
        ScriptedTransport::default()
            .respond("a.png", completed(413, json!({ "error": "too big" })))
            .respond(
                "b.png",
                TransferOutcome::Completed {
                    status: 413,
                    body: "<html>Request Entity Too Large</html>".to_string(),
                },
            ),
    );
    let queue = queue_with(test_config(), transport.clone());
    let mut events = queue.subscribe();

    queue.add_files(vec![file("a.png", 4), file("b.png", 4), file("c.png", 4)]);
    wait_ready(&mut events, 3).await;
    queue.upload_all();
    collect_until(&mut events, UploadEventKind::CompleteAll).await;

    let a = queue.item("4a.png").unwrap();
    assert_eq!(a.status, UploadStatus::Fail);
    assert!(a.error.as_deref().unwrap().contains("too big"));

    let b = queue.item("4b.png").unwrap();
    assert_eq!(b.error.as_deref(), Some("Uploaded file is too large"));

    assert_eq!(queue.item("4c.png").unwrap().status, UploadStatus::Success);
}

#[tokio::test]
async fn test_malformed_response_fails_and_still_advances() {
    let transport = Arc::new(ScriptedTransport::default().respond(
        "a.png",
        TransferOutcome::Completed {
            status: 200,
            body: "<html>upstream proxy page</html>".to_string(),
        },
    ));
    let queue = queue_with(test_config(), transport.clone());
    let mut events = queue.subscribe();

    queue.add_files(vec![file("a.png", 4), file("b.png", 4)]);
    wait_ready(&mut events, 2).await;
    queue.upload_all();
    let seen = collect_until(&mut events, UploadEventKind::CompleteAll).await;

    assert_eq!(
        outcomes(&seen),
        vec![
            (UploadEventKind::Error, Some("a.png".to_string())),
            (UploadEventKind::Complete, Some("b.png".to_string())),
            (UploadEventKind::CompleteAll, None),
        ]
    );

    let a = queue.item("4a.png").unwrap();
    assert_eq!(a.error.as_deref(), Some("File upload error"));
    assert_eq!(a.failure, Some(FailureCategory::ResponseParse));
}

#[tokio::test]
async fn test_abort_and_transport_error_advance_the_queue() {
    let transport = Arc::new(
        ScriptedTransport::default()
            .respond("a.png", TransferOutcome::Aborted)
            .respond(
                "b.png",
                TransferOutcome::Failed {
                    reason: "connection reset".to_string(),
                },
            ),
    );
    let queue = queue_with(test_config(), transport.clone());
    let mut events = queue.subscribe();

    queue.add_files(vec![file("a.png", 4), file("b.png", 4), file("c.png", 4)]);
    wait_ready(&mut events, 3).await;
    queue.upload_all();
    let seen = collect_until(&mut events, UploadEventKind::CompleteAll).await;

    assert_eq!(
        outcomes(&seen),
        vec![
            (UploadEventKind::Cancel, Some("a.png".to_string())),
            (UploadEventKind::Error, Some("b.png".to_string())),
            (UploadEventKind::Complete, Some("c.png".to_string())),
            (UploadEventKind::CompleteAll, None),
        ]
    );

    assert_eq!(queue.item("4a.png").unwrap().status, UploadStatus::Cancel);
    let b = queue.item("4b.png").unwrap();
    assert_eq!(b.error.as_deref(), Some("File upload error"));
    assert_eq!(b.failure, Some(FailureCategory::Transport));
}

#[tokio::test]
async fn test_upload_all_without_ready_items_is_a_no_op() {
    let transport = Arc::new(ScriptedTransport::default());
    let queue = queue_with(test_config(), transport.clone());
    let mut events = queue.subscribe();

    assert!(!queue.upload_all());
    assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));

    queue.add_files(vec![file("a.png", 4)]);
    wait_ready(&mut events, 1).await;
    queue.upload_all();
    collect_until(&mut events, UploadEventKind::CompleteAll).await;

    let before = queue.items();
    assert!(!queue.upload_all());
    assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));

    let after = queue.items();
    assert_eq!(before.len(), after.len());
    assert_eq!(after[0].status, UploadStatus::Success);
    assert_eq!(transport.sent().len(), 1);
}

#[tokio::test]
async fn test_pending_items_are_not_uploaded() {
    let transport = Arc::new(ScriptedTransport::default());
    let gate = Arc::new(Semaphore::new(0));
    let reader = Arc::new(GatedReader {
        held: "a.png",
        gate: gate.clone(),
    });
    let queue = UploadQueue::new(test_config(), reader, transport.clone());
    let mut events = queue.subscribe();

    queue.add_files(vec![file("a.png", 4)]);
    tokio::task::yield_now().await;

    assert_eq!(queue.summary().pending, 1);
    assert!(!queue.upload_all());

    gate.add_permits(1);
    let ready = next_event(&mut events).await;
    assert_eq!(ready.event, UploadEventKind::Ready);
    let item = ready.file_item.unwrap();
    assert_eq!(
        item.preview_url.as_deref(),
        Some("data:application/octet-stream;base64,")
    );

    assert!(queue.upload_all());
    collect_until(&mut events, UploadEventKind::CompleteAll).await;
    assert_eq!(transport.sent(), vec!["a.png"]);
}

#[tokio::test]
async fn test_item_ready_mid_drain_joins_running_drain() {
    let gate = Arc::new(Semaphore::new(0));
    let transport = Arc::new(ScriptedTransport::default().release_on_send(gate.clone()));
    let reader = Arc::new(GatedReader {
        held: "b.png",
        gate,
    });
    let queue = UploadQueue::new(test_config(), reader, transport.clone());
    let mut events = queue.subscribe();

    queue.add_files(vec![file("a.png", 4), file("b.png", 4)]);
    wait_ready(&mut events, 1).await;
    assert_eq!(queue.summary().pending, 1);
    assert!(queue.upload_all());

    // b.png's preview is released by the first transfer
    let mut complete_all = 0;
    loop {
        let event = next_event(&mut events).await;
        match event.event {
            UploadEventKind::Ready => {
                assert_eq!(event.file_item.unwrap().file.name(), "b.png");
                assert!(queue.is_active());
                assert!(!queue.upload_all());
            }
            UploadEventKind::CompleteAll => {
                complete_all += 1;
                break;
            }
            _ => {}
        }
    }

    tokio::time::sleep(Duration::from_millis(50)).await;
    while let Ok(event) = events.try_recv() {
        assert_ne!(event.event, UploadEventKind::CompleteAll);
    }

    assert_eq!(complete_all, 1);
    assert_eq!(transport.sent(), vec!["a.png", "b.png"]);
    assert_eq!(transport.max_in_flight.load(Ordering::SeqCst), 1);
    assert_eq!(queue.summary().success, 2);
}

#[tokio::test]
async fn test_auto_upload_drains_without_explicit_start() {
    let transport = Arc::new(ScriptedTransport::default());
    let mut config = test_config();
    config.auto_upload = true;
    let queue = queue_with(config, transport.clone());
    let mut events = queue.subscribe();

    queue.add_files(vec![file("a.png", 4), file("b.png", 4), file("c.png", 4)]);

    loop {
        let event = next_event(&mut events).await;
        if event.event == UploadEventKind::CompleteAll && queue.summary().success == 3 {
            break;
        }
    }

    assert_eq!(transport.sent().len(), 3);
    assert_eq!(transport.max_in_flight.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_unreadable_file_fails_before_upload() {
    let transport = Arc::new(ScriptedTransport::default());
    let queue = UploadQueue::new(test_config(), Arc::new(FailingReader), transport.clone());
    let mut events = queue.subscribe();

    queue.add_files(vec![file("a.png", 4)]);

    let event = next_event(&mut events).await;
    assert_eq!(event.event, UploadEventKind::Error);
    let item = event.file_item.unwrap();
    assert_eq!(item.status, UploadStatus::Fail);
    assert!(item
        .error
        .as_deref()
        .unwrap()
        .starts_with("Failed to read file:"));
    assert_eq!(item.failure, Some(FailureCategory::Validation));

    assert!(!queue.upload_all());
    assert!(transport.sent().is_empty());
}

#[tokio::test]
async fn test_duplicate_ids_are_both_tracked() {
    let transport = Arc::new(ScriptedTransport::default());
    let queue = queue_with(test_config(), transport.clone());
    let mut events = queue.subscribe();

    let ids = queue.add_files(vec![file("same.png", 4), file("same.png", 4)]);
    assert_eq!(ids[0], ids[1]);
    wait_ready(&mut events, 2).await;

    queue.upload_all();
    collect_until(&mut events, UploadEventKind::CompleteAll).await;

    assert_eq!(queue.items().len(), 2);
    assert_eq!(queue.summary().success, 2);
    assert_eq!(transport.sent(), vec!["same.png", "same.png"]);
}

#[tokio::test]
async fn test_request_carries_configured_form_and_headers() {
    let transport = Arc::new(ScriptedTransport::default());
    let mut config = test_config();
    config.field = "avatar".to_string();
    config.fields.insert("folder".to_string(), "team".to_string());
    config.headers.insert("X-Upload-Token".to_string(), "secret".to_string());
    config.with_credentials = true;
    let queue = queue_with(config, transport.clone());
    let mut events = queue.subscribe();

    queue.add_files(vec![file("a.png", 4)]);
    wait_ready(&mut events, 1).await;
    queue.upload_all();
    collect_until(&mut events, UploadEventKind::CompleteAll).await;

    let requests = transport.requests.lock().unwrap();
    let request = &requests[0];
    assert_eq!(request.url, "https://files.example.com/upload");
    assert_eq!(request.field, "avatar");
    assert_eq!(request.fields.get("folder").map(String::as_str), Some("team"));
    assert_eq!(
        request.headers.get("X-Upload-Token").map(String::as_str),
        Some("secret")
    );
    assert!(request.with_credentials);
}

#[tokio::test]
async fn test_clear_removes_finished_items() {
    let transport = Arc::new(ScriptedTransport::default());
    let mut config = test_config();
    config.max_length = 4;
    let queue = queue_with(config, transport);
    let mut events = queue.subscribe();

    queue.add_files(vec![file("a.png", 4), file("big.png", 5)]);
    wait_ready(&mut events, 1).await;
    queue.upload_all();
    collect_until(&mut events, UploadEventKind::CompleteAll).await;

    assert_eq!(queue.clear(), 2);
    assert!(queue.items().is_empty());
    assert_eq!(queue.summary().total, 0);
}
