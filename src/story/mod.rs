pub mod document;
pub mod export;
pub mod illustrate;
pub mod pipeline;
pub mod scenarios;
pub mod theme;

use crate::llm::{ExtractError, ProviderError};

pub use document::{assemble, DocumentError};
pub use export::{document_filename, export_page_images, page_filename};
pub use illustrate::{render_pages, IllustratedPage, RenderFailure, RenderOptions, RenderOutcome, RenderReport};
pub use pipeline::{run_story, ScenarioSource, StoryRequest, StoryRun};
pub use scenarios::{clean_scenario_lines, generate_scenarios};
pub use theme::Theme;

/// Run-level failures. Anything here stops the pipeline before rendering.
#[derive(Debug, thiserror::Error)]
pub enum StoryError {
    #[error("subject name must not be empty")]
    EmptySubject,
    #[error("theme label must not be empty")]
    EmptyTheme,
    #[error("scenario count must be at least 1")]
    ZeroCount,
    #[error("cannot produce a story: {0}")]
    Provider(#[from] ProviderError),
    #[error("cannot produce a story: {0}")]
    Extract(#[from] ExtractError),
    #[error("cannot produce a story: the provider returned no text")]
    NoText,
    #[error("cannot produce a story: no usable scenarios")]
    NoScenarios,
    #[error("theme \"{0}\" has no preset scenarios")]
    NoPresets(String),
    #[error(transparent)]
    Document(#[from] DocumentError),
}
