use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::errors::AppResult;

use super::item::SourceFile;

/// Produces the preview shown for a queued file before it is uploaded
#[async_trait]
pub trait PreviewReader: Send + Sync {
    async fn read_data_url(&self, file: &SourceFile) -> AppResult<String>;
}

/// Reads the whole file and encodes it as a base64 `data:` URL
#[derive(Debug, Default, Clone, Copy)]
pub struct DataUrlReader;

#[async_trait]
impl PreviewReader for DataUrlReader {
    async fn read_data_url(&self, file: &SourceFile) -> AppResult<String> {
        let bytes = file.read().await?;
        Ok(encode_data_url(file.mime_type(), &bytes))
    }
}

pub fn encode_data_url(mime_type: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", mime_type, STANDARD.encode(bytes))
}
