use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;

use upload_queue::config::{self, UploadConfig};
use upload_queue::uploader::{
    AbortHandle, DataUrlReader, EventReceiver, HttpTransport, QueueSummary, SourceFile,
    UploadEvent, UploadEventKind, UploadItem, UploadQueue, UploadStatus,
};

/// Upload files one at a time to a multipart/form-data endpoint
#[derive(Debug, Parser)]
#[command(name = "upload-queue", version, about)]
struct Cli {
    /// Config file (defaults to <config dir>/upload-queue/config.json when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Upload endpoint
    #[arg(long)]
    url: Option<String>,

    /// Form field that carries the file
    #[arg(long)]
    field: Option<String>,

    /// Maximum file size in bytes
    #[arg(long)]
    max_length: Option<u64>,

    /// Allowed extensions, comma-separated without dots (e.g. png,jpg)
    #[arg(long)]
    exts: Option<String>,

    /// Extra request header, repeatable
    #[arg(long = "header", value_name = "NAME=VALUE", value_parser = parse_key_value)]
    headers: Vec<(String, String)>,

    /// Extra form field, repeatable
    #[arg(long = "form", value_name = "NAME=VALUE", value_parser = parse_key_value)]
    fields: Vec<(String, String)>,

    /// Keep and send cookies
    #[arg(long)]
    with_credentials: bool,

    /// Give up on a transfer after this many seconds
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Write the effective configuration back to the config file
    #[arg(long)]
    save_config: bool,

    #[arg(required = true)]
    files: Vec<PathBuf>,
}

impl Cli {
    fn apply_overrides(&self, config: &mut UploadConfig) {
        if let Some(url) = &self.url {
            config.url = url.clone();
        }
        if let Some(field) = &self.field {
            config.field = field.clone();
        }
        if let Some(max_length) = self.max_length {
            config.max_length = max_length;
        }
        if let Some(exts) = &self.exts {
            config.exts = Some(exts.clone());
        }
        if let Some(timeout) = self.timeout_secs {
            config.timeout_secs = Some(timeout);
        }
        if self.with_credentials {
            config.with_credentials = true;
        }
        config.headers.extend(self.headers.iter().cloned());
        config.fields.extend(self.fields.iter().cloned());
    }
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{}'", raw))?;
    if key.trim().is_empty() {
        return Err(format!("missing name in '{}'", raw));
    }
    Ok((key.trim().to_string(), value.to_string()))
}

#[tokio::main]
async fn main() {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(2),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Returns whether every file was uploaded successfully
async fn run(cli: Cli) -> anyhow::Result<bool> {
    let mut config = config::load_config_or_default(cli.config.as_deref())
        .context("Failed to load configuration")?;
    cli.apply_overrides(&mut config);
    config::validate_config(&config).context("Invalid configuration")?;

    if cli.save_config {
        let path = match &cli.config {
            Some(path) => path.clone(),
            None => config::default_config_path()?,
        };
        config::save_config(&config, &path)
            .with_context(|| format!("Failed to save configuration to {}", path.display()))?;
    }

    let files = cli
        .files
        .iter()
        .map(|path| {
            SourceFile::from_path(path).with_context(|| format!("Cannot open {}", path.display()))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let transport = HttpTransport::new(&config).context("Failed to build HTTP client")?;
    let abort = transport.abort_handle();
    let queue = UploadQueue::new(config, Arc::new(DataUrlReader), Arc::new(transport));

    let mut events = queue.subscribe();
    queue.add_files(files);

    let (interrupt_tx, mut interrupts) = mpsc::channel(4);
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if interrupt_tx.send(()).await.is_err() {
                break;
            }
        }
    });

    drive_queue(&queue, &mut events, &abort, &mut interrupts).await;

    while let Ok(event) = events.try_recv() {
        print_event(&event);
    }

    let items = queue.items();
    print_summary(&items);

    let summary = queue.summary();
    log::info!(
        "{} of {} item(s) finished ({} succeeded, {} failed, {} cancelled)",
        summary.finished(),
        summary.total,
        summary.success,
        summary.fail,
        summary.cancel
    );

    Ok(items
        .iter()
        .all(|item| item.status == UploadStatus::Success))
}

/// Nothing left to start and no drain running
fn batch_finished(summary: &QueueSummary) -> bool {
    summary.pending == 0 && summary.ready == 0 && !summary.active
}

/// Follow the queue until every file settled or the user interrupted.
///
/// A first interrupt aborts the transfer in flight (or stops before anything
/// started), a second one stops waiting.
async fn drive_queue(
    queue: &UploadQueue,
    events: &mut EventReceiver,
    abort: &AbortHandle,
    interrupts: &mut mpsc::Receiver<()>,
) {
    let mut started = false;
    let mut interrupted = false;

    loop {
        // Start once every preview has settled, so all files go in one drain
        if !started && !interrupted && queue.summary().pending == 0 {
            started = queue.upload_all() || queue.is_active();
            if !started {
                break;
            }
        }

        tokio::select! {
            received = events.recv() => match received {
                Ok(event) => {
                    print_event(&event);
                    let stop = match event.event {
                        // With autoUpload a drain can end while previews are still pending
                        UploadEventKind::CompleteAll => batch_finished(&queue.summary()),
                        // The abort can land between two transfers
                        UploadEventKind::Cancel
                        | UploadEventKind::Complete
                        | UploadEventKind::Error => interrupted,
                        _ => false,
                    };
                    if stop {
                        break;
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    log::warn!("Missed {} queue events", missed);
                }
                Err(RecvError::Closed) => break,
            },
            Some(()) = interrupts.recv() => {
                if interrupted {
                    log::warn!("Interrupted again, not waiting for the upload to finish");
                    break;
                }
                interrupted = true;
                if queue.is_active() {
                    log::warn!("Interrupted, aborting the current upload");
                    abort.abort();
                } else {
                    log::warn!("Interrupted before any upload started");
                    break;
                }
            }
        }
    }
}

fn print_event(event: &UploadEvent) {
    let Some(item) = &event.file_item else {
        println!("[{}]", event.event);
        return;
    };

    match event.event {
        UploadEventKind::Progress => {
            println!("[{}] {} {}%", event.event, item.file.name(), item.progress)
        }
        UploadEventKind::Complete => println!(
            "[{}] {} -> {}",
            event.event,
            item.file.name(),
            item.result_url.as_deref().unwrap_or("-")
        ),
        UploadEventKind::Error => println!(
            "[{}] {}: {}",
            event.event,
            item.file.name(),
            item.error.as_deref().unwrap_or("unknown error")
        ),
        _ => println!("[{}] {}", event.event, item.file.name()),
    }
}

fn print_summary(items: &[UploadItem]) {
    println!();
    for item in items {
        let detail = match item.status {
            UploadStatus::Success => item.result_url.clone().unwrap_or_default(),
            UploadStatus::Fail => item.error.clone().unwrap_or_default(),
            _ => String::new(),
        };
        println!("{:<10} {:<40} {}", item.status, item.id, detail);
    }
}
