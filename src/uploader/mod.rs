// Upload queue module - sequential multipart uploads with status events
//
// Items are validated, given a preview, then sent one at a time through a
// `Transport`. Everything observable is reported on the queue's event stream.

pub mod events;
pub mod http_client;
pub mod item;
pub mod preview;
pub mod progress_tracker;
pub mod transport;
pub mod upload_queue;

pub use events::{EventReceiver, UploadEvent, UploadEventKind};
pub use http_client::{AbortHandle, HttpTransport};
pub use item::{FailureCategory, SourceFile, UploadItem, UploadStatus};
pub use preview::{DataUrlReader, PreviewReader};
pub use progress_tracker::QueueSummary;
pub use transport::{
    ProgressCallback, TransferOutcome, TransferProgress, TransferRequest, Transport,
};
pub use upload_queue::{interpret_response, UploadQueue};
