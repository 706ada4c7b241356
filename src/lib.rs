pub mod config;
pub mod errors;
pub mod security;
pub mod uploader;

pub use config::UploadConfig;
pub use errors::{AppError, AppResult};
pub use uploader::{
    UploadEvent, UploadEventKind, UploadItem, UploadQueue, UploadStatus,
};
