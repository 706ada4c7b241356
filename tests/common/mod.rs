#![allow(dead_code)]

use std::time::Duration;
use upload_queue::uploader::{EventReceiver, UploadEvent, UploadEventKind};

pub async fn next_event(events: &mut EventReceiver) -> UploadEvent {
    tokio::time::timeout(Duration::from_secs(10), events.recv())
        .await
        .expect("timed out waiting for a queue event")
        .expect("event stream closed")
}

/// Collect events up to and including the first one of `kind`
pub async fn collect_until(events: &mut EventReceiver, kind: UploadEventKind) -> Vec<UploadEvent> {
    let mut seen = Vec::new();
    loop {
        let event = next_event(events).await;
        let done = event.event == kind;
        seen.push(event);
        if done {
            return seen;
        }
    }
}

pub async fn wait_ready(events: &mut EventReceiver, count: usize) {
    let mut ready = 0;
    while ready < count {
        if next_event(events).await.event == UploadEventKind::Ready {
            ready += 1;
        }
    }
}

/// (event name, file name) pairs for terminal and batch events only
pub fn outcomes(events: &[UploadEvent]) -> Vec<(UploadEventKind, Option<String>)> {
    events
        .iter()
        .filter(|event| {
            !matches!(
                event.event,
                UploadEventKind::Progress | UploadEventKind::Ready
            )
        })
        .map(|event| {
            (
                event.event,
                event
                    .file_item
                    .as_ref()
                    .map(|item| item.file.name().to_string()),
            )
        })
        .collect()
}
