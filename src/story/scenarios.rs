use tracing::{info, warn};

use crate::llm::extract::{extract, PartKind, Payload};
use crate::llm::TextGenerator;
use crate::story::theme::Theme;
use crate::story::StoryError;

const REALISM_RULE: &str = "Keep every scenario logically consistent with its setting: if the setting needs special clothing or equipment, mention it (for example, an underwater scene must include a diving suit or snorkel gear, and a space scene must include a space suit).";

fn is_list_marker(c: char) -> bool {
    c.is_ascii_digit() || c == '.' || c == '-' || c.is_whitespace()
}

/// Turn raw model text into scenario phrases: one per line, blank lines
/// dropped, leading numbering/bullets (digits, periods, hyphens, spaces) and
/// surrounding whitespace removed.
pub fn clean_scenario_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(|line| line.trim_start_matches(is_list_marker).trim_end())
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn build_scenario_prompt(theme: &Theme, subject_name: &str, count: usize) -> String {
    format!(
        "Write {count} short scenarios for a children's picture book starring a child named {subject_name}. \
The theme of the book is \"{theme}\". {rule} {realism} \
Return exactly one scenario per line, with no numbering, titles, quotation marks or extra commentary.",
        theme = theme.label(),
        rule = theme.phrasing_rule(subject_name),
        realism = REALISM_RULE,
    )
}

/// Ask the text model for up to `count` scenario phrases.
///
/// A provider failure, a response without text, or a response whose lines are
/// all blank is an error. Fewer lines than requested is not.
pub async fn generate_scenarios(
    provider: &dyn TextGenerator,
    theme: &Theme,
    subject_name: &str,
    count: usize,
) -> Result<Vec<String>, StoryError> {
    let subject_name = subject_name.trim();
    if subject_name.is_empty() {
        return Err(StoryError::EmptySubject);
    }
    if count == 0 {
        return Err(StoryError::ZeroCount);
    }

    let prompt = build_scenario_prompt(theme, subject_name, count);
    let response = provider.generate_text(&prompt).await?;

    let Some(Payload::Text(text)) = extract(&response, PartKind::Text)? else {
        warn!(theme = theme.label(), "Scenario request returned no text parts");
        return Err(StoryError::NoText);
    };

    let mut scenarios = clean_scenario_lines(&text);
    if scenarios.is_empty() {
        return Err(StoryError::NoScenarios);
    }
    if scenarios.len() > count {
        scenarios.truncate(count);
    } else if scenarios.len() < count {
        warn!(
            "Scenario model returned {} of {} requested scenarios; continuing with what was returned",
            scenarios.len(),
            count
        );
    }

    info!(
        theme = theme.label(),
        subject = subject_name,
        count = scenarios.len(),
        "Generated scenarios"
    );
    Ok(scenarios)
}
