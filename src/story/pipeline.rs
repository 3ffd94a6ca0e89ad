use tracing::{info, warn};

use crate::llm::{ImageGenerator, ReferenceImage, TextGenerator};
use crate::story::document::assemble;
use crate::story::export::document_filename;
use crate::story::illustrate::{render_pages, RenderOptions, RenderOutcome, RenderReport};
use crate::story::scenarios::generate_scenarios;
use crate::story::theme::Theme;
use crate::story::StoryError;
use crate::utils::timing::RunTimer;

/// Where a run's scenario phrases come from. `Custom` entries are used as
/// given, only trimmed; blank entries are dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScenarioSource {
    Generated,
    Preset,
    Custom(Vec<String>),
}

#[derive(Debug, Clone)]
pub struct StoryRequest {
    pub subject_name: String,
    pub theme: Theme,
    pub source: ScenarioSource,
    pub count: usize,
}

#[derive(Debug)]
pub struct StoryRun {
    pub scenarios: Vec<String>,
    pub render: RenderReport,
    pub document: Vec<u8>,
    pub document_filename: String,
}

async fn select_scenarios(
    text: &dyn TextGenerator,
    request: &StoryRequest,
    subject_name: &str,
) -> Result<Vec<String>, StoryError> {
    match &request.source {
        ScenarioSource::Generated => {
            generate_scenarios(text, &request.theme, subject_name, request.count).await
        }
        ScenarioSource::Preset => {
            let mut presets = request
                .theme
                .preset_scenarios(subject_name)
                .ok_or_else(|| StoryError::NoPresets(request.theme.label().to_string()))?;
            presets.truncate(request.count);
            Ok(presets)
        }
        ScenarioSource::Custom(prompts) => {
            let mut scenarios: Vec<String> = prompts
                .iter()
                .map(|prompt| prompt.trim())
                .filter(|prompt| !prompt.is_empty())
                .map(str::to_string)
                .collect();
            if scenarios.is_empty() {
                return Err(StoryError::NoScenarios);
            }
            scenarios.truncate(request.count);
            Ok(scenarios)
        }
    }
}

/// Produce one storybook: pick scenarios, illustrate them, and lay out the PDF.
///
/// Scenario selection failures abort the run. Pages that fail to render are
/// reported in `render` and left out of the document.
pub async fn run_story(
    text: &dyn TextGenerator,
    images: &dyn ImageGenerator,
    reference: &ReferenceImage,
    request: &StoryRequest,
    options: &RenderOptions,
) -> Result<StoryRun, StoryError> {
    let subject_name = request.subject_name.trim();
    if subject_name.is_empty() {
        return Err(StoryError::EmptySubject);
    }
    if request.count == 0 {
        return Err(StoryError::ZeroCount);
    }

    let theme_label = request.theme.label();
    let mut timer = RunTimer::start(subject_name, theme_label, request.count);

    let scenarios = match select_scenarios(text, request, subject_name).await {
        Ok(scenarios) => scenarios,
        Err(err) => {
            timer.complete("error", Some(err.to_string()));
            return Err(err);
        }
    };
    info!(
        subject = subject_name,
        theme = theme_label,
        count = scenarios.len(),
        "Scenarios ready for illustration"
    );

    let render = render_pages(images, reference, &scenarios, options).await;
    if render.outcome() == RenderOutcome::AllFailed {
        warn!(theme = theme_label, "No scenario produced an illustration");
    }

    let document = match assemble(subject_name, theme_label, &render.pages) {
        Ok(document) => document,
        Err(err) => {
            timer.complete("error", Some(err.to_string()));
            return Err(err.into());
        }
    };

    let status = match render.outcome() {
        RenderOutcome::Complete | RenderOutcome::NothingRequested => "success",
        RenderOutcome::Partial => "partial",
        RenderOutcome::AllFailed => "no_pages",
    };
    timer.complete(status, Some(render.summary()));

    Ok(StoryRun {
        scenarios,
        document_filename: document_filename(subject_name, theme_label),
        render,
        document,
    })
}
