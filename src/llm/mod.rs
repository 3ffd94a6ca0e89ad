pub mod extract;
pub mod gemini;
pub mod media;
pub mod provider;

pub use extract::{extract, ExtractError, PartKind, Payload};
pub use gemini::{GeminiClient, GeminiImageConfig};
pub use media::{MediaError, ReferenceImage};
pub use provider::{ImageGenerator, ModelResponse, ProviderError, ResponsePart, TextGenerator};
