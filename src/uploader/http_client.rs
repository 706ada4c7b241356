use async_trait::async_trait;
use reqwest::{multipart, Body, Client};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::time::Duration;

use crate::config::UploadConfig;
use crate::errors::{AppError, AppResult};

use super::transport::{
    ProgressCallback, TransferOutcome, TransferProgress, TransferRequest, Transport,
};

/// Granularity of upload progress notifications
const PROGRESS_CHUNK_BYTES: usize = 64 * 1024;

/// Aborts whatever transfer the owning `HttpTransport` has in flight
#[derive(Debug, Clone, Default)]
pub struct AbortHandle {
    notify: Arc<Notify>,
}

impl AbortHandle {
    pub fn abort(&self) {
        log::info!("Abort requested for in-flight upload");
        self.notify.notify_waiters();
    }
}

/// Multipart POST transport backed by reqwest
pub struct HttpTransport {
    client: Client,
    credentialed: Client,
    abort: AbortHandle,
}

impl HttpTransport {
    pub fn new(config: &UploadConfig) -> AppResult<Self> {
        Ok(Self {
            client: build_client(config, false)?,
            credentialed: build_client(config, true)?,
            abort: AbortHandle::default(),
        })
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    async fn exchange(
        &self,
        request: &TransferRequest,
        on_progress: ProgressCallback,
    ) -> AppResult<(u16, String)> {
        let form = build_form(request, on_progress).await?;

        let client = if request.with_credentials {
            &self.credentialed
        } else {
            &self.client
        };

        let mut builder = client.post(&request.url).multipart(form);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;

        log::debug!(
            "Upload response {} (first 300 chars): {}",
            status,
            body.chars().take(300).collect::<String>()
        );
        Ok((status, body))
    }
}

fn build_client(config: &UploadConfig, with_credentials: bool) -> AppResult<Client> {
    let mut builder = Client::builder().cookie_store(with_credentials);
    if let Some(secs) = config.timeout_secs {
        builder = builder.timeout(Duration::from_secs(secs));
    }
    Ok(builder.build()?)
}

/// File part first, then the extra text fields
async fn build_form(
    request: &TransferRequest,
    on_progress: ProgressCallback,
) -> AppResult<multipart::Form> {
    let bytes = request.file.read().await?;
    let total = bytes.len() as u64;

    let chunks: Vec<Vec<u8>> = bytes
        .chunks(PROGRESS_CHUNK_BYTES)
        .map(<[u8]>::to_vec)
        .collect();

    // Progress is reported as the body stream is pulled by the connection
    let mut loaded = 0u64;
    let stream = futures::stream::iter(chunks.into_iter().map(move |chunk| {
        loaded += chunk.len() as u64;
        on_progress(TransferProgress {
            loaded,
            total: Some(total),
        });
        Ok::<_, std::io::Error>(chunk)
    }));

    let part = multipart::Part::stream_with_length(Body::wrap_stream(stream), total)
        .file_name(request.file.name().to_string())
        .mime_str(request.file.mime_type())?;

    let mut form = multipart::Form::new().part(request.field.clone(), part);
    for (key, value) in &request.fields {
        form = form.text(key.clone(), value.clone());
    }

    Ok(form)
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        request: TransferRequest,
        on_progress: ProgressCallback,
    ) -> TransferOutcome {
        // Registered before the request starts so an early abort is not missed
        let aborted = self.abort.notify.notified();

        tokio::select! {
            result = self.exchange(&request, on_progress) => match result {
                Ok((status, body)) => TransferOutcome::Completed { status, body },
                Err(e) => {
                    log::warn!("Transfer of {} failed: {}", request.file.name(), e);
                    TransferOutcome::Failed {
                        reason: e.to_string(),
                    }
                }
            },
            _ = aborted => {
                log::info!("Transfer of {} aborted", request.file.name());
                TransferOutcome::Aborted
            }
        }
    }
}
