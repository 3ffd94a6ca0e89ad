use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};

use crate::llm::media::ReferenceImage;

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("provider request failed: {0}")]
    Request(String),
    #[error("provider request failed with status {status}: {detail}")]
    Status { status: u16, detail: String },
    #[error("provider response could not be parsed: {0}")]
    Parse(String),
    #[error("provider call timed out after {0:?}")]
    Timeout(Duration),
    #[error("provider refused the request: {0}")]
    Blocked(String),
}

/// One unit of a provider response payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponsePart {
    /// A part that carried nothing this crate understands.
    Empty,
    Text(String),
    /// Base64 payload exactly as delivered by the provider.
    Binary { mime_type: String, data: String },
}

impl ResponsePart {
    pub fn text(value: impl Into<String>) -> Self {
        ResponsePart::Text(value.into())
    }

    pub fn binary(mime_type: impl Into<String>, bytes: &[u8]) -> Self {
        ResponsePart::Binary {
            mime_type: mime_type.into(),
            data: general_purpose::STANDARD.encode(bytes),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelResponse {
    pub parts: Vec<ResponsePart>,
}

impl ModelResponse {
    pub fn new(parts: Vec<ResponsePart>) -> Self {
        Self { parts }
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate_text(&self, prompt: &str) -> Result<ModelResponse, ProviderError>;
}

#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate_image(
        &self,
        prompt: &str,
        reference: &ReferenceImage,
    ) -> Result<ModelResponse, ProviderError>;
}
