use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};
use dotenvy::dotenv;
use tracing::{error, info, warn};

use storybook_generator::config::Config;
use storybook_generator::llm::media::mime_for_extension;
use storybook_generator::llm::{GeminiClient, ReferenceImage};
use storybook_generator::story::{
    export_page_images, run_story, RenderOptions, RenderOutcome, ScenarioSource, StoryRequest,
    Theme,
};
use storybook_generator::utils::logging::init_logging;

fn usage() -> &'static str {
    "Usage: storybook --photo <path> --name <name> --theme <label> [--count <n>] [--preset] [--prompt <text>]... [--out <dir>] [--pages]"
}

#[derive(Debug)]
struct CliArgs {
    photo: PathBuf,
    subject_name: String,
    theme: String,
    count: Option<usize>,
    preset: bool,
    prompts: Vec<String>,
    out_dir: Option<PathBuf>,
    pages: bool,
}

fn required_value<'a>(args: &'a [String], index: usize, flag: &str) -> anyhow::Result<&'a String> {
    args.get(index)
        .ok_or_else(|| anyhow!("Missing value for {flag}"))
}

fn parse_args(args: &[String]) -> anyhow::Result<CliArgs> {
    let mut photo: Option<PathBuf> = None;
    let mut subject_name: Option<String> = None;
    let mut theme: Option<String> = None;
    let mut count = None;
    let mut preset = false;
    let mut prompts = Vec::new();
    let mut out_dir = None;
    let mut pages = false;

    let mut index = 1;
    while index < args.len() {
        match args[index].as_str() {
            "--photo" => {
                index += 1;
                photo = Some(PathBuf::from(required_value(args, index, "--photo")?));
            }
            "--name" => {
                index += 1;
                subject_name = Some(required_value(args, index, "--name")?.clone());
            }
            "--theme" => {
                index += 1;
                theme = Some(required_value(args, index, "--theme")?.clone());
            }
            "--count" => {
                index += 1;
                let value = required_value(args, index, "--count")?;
                let parsed = value
                    .parse::<usize>()
                    .map_err(|_| anyhow!("Invalid --count value: {value}"))?;
                if parsed == 0 {
                    return Err(anyhow!("--count must be at least 1"));
                }
                count = Some(parsed);
            }
            "--preset" => {
                preset = true;
            }
            "--prompt" => {
                index += 1;
                prompts.push(required_value(args, index, "--prompt")?.clone());
            }
            "--out" => {
                index += 1;
                out_dir = Some(PathBuf::from(required_value(args, index, "--out")?));
            }
            "--pages" => {
                pages = true;
            }
            "--help" | "-h" => {
                return Err(anyhow!(usage()));
            }
            other => {
                return Err(anyhow!("Unknown argument: {other}\n{}", usage()));
            }
        }
        index += 1;
    }

    if preset && !prompts.is_empty() {
        return Err(anyhow!("--preset and --prompt cannot be combined"));
    }

    Ok(CliArgs {
        photo: photo.ok_or_else(|| anyhow!("--photo is required\n{}", usage()))?,
        subject_name: subject_name.ok_or_else(|| anyhow!("--name is required\n{}", usage()))?,
        theme: theme.ok_or_else(|| anyhow!("--theme is required\n{}", usage()))?,
        count,
        preset,
        prompts,
        out_dir,
        pages,
    })
}

async fn load_reference(path: &Path) -> anyhow::Result<ReferenceImage> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read photo {}", path.display()))?;
    let declared = path
        .extension()
        .and_then(|ext| ext.to_str())
        .and_then(mime_for_extension);
    ReferenceImage::from_bytes(bytes, declared)
        .with_context(|| format!("Unusable photo {}", path.display()))
}

async fn write_output(dir: &Path, filename: &str, bytes: &[u8]) -> anyhow::Result<PathBuf> {
    let path = dir.join(filename);
    tokio::fs::write(&path, bytes)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let args: Vec<String> = std::env::args().collect();
    let cli = parse_args(&args)?;

    let config = Config::load()?;
    let _guards = init_logging(&config.log_level, &config.log_dir);

    let reference = load_reference(&cli.photo).await?;
    let source = if cli.preset {
        ScenarioSource::Preset
    } else if !cli.prompts.is_empty() {
        ScenarioSource::Custom(cli.prompts.clone())
    } else {
        ScenarioSource::Generated
    };
    let request = StoryRequest {
        subject_name: cli.subject_name.clone(),
        theme: Theme::parse(&cli.theme)?,
        source,
        count: cli.count.unwrap_or(config.scenario_count),
    };

    let client = GeminiClient::from_config(&config);
    let options = RenderOptions::from_config(&config);
    info!(
        subject = request.subject_name.as_str(),
        theme = request.theme.label(),
        count = request.count,
        "Generating storybook"
    );

    let run = match run_story(&client, &client, &reference, &request, &options).await {
        Ok(run) => run,
        Err(err) => {
            error!("Storybook generation failed: {err}");
            return Err(err.into());
        }
    };

    match run.render.outcome() {
        RenderOutcome::NothingRequested => println!("No scenarios to illustrate."),
        RenderOutcome::AllFailed => {
            warn!("Every illustration failed");
            println!(
                "{}. The storybook only has its covers; try again or pick another theme.",
                run.render.summary()
            );
        }
        RenderOutcome::Complete | RenderOutcome::Partial => {
            println!("{}.", run.render.summary());
        }
    }
    for failure in &run.render.failures {
        println!("  skipped #{}: {} ({})", failure.index + 1, failure.scenario, failure.error);
    }

    let out_dir = cli.out_dir.unwrap_or_else(|| config.output_dir.clone());
    tokio::fs::create_dir_all(&out_dir)
        .await
        .with_context(|| format!("Failed to create {}", out_dir.display()))?;

    let pdf_path = write_output(&out_dir, &run.document_filename, &run.document).await?;
    println!("Storybook saved to {}", pdf_path.display());

    if cli.pages {
        for (filename, bytes) in export_page_images(request.subject_name.trim(), &run.render.pages) {
            let path = write_output(&out_dir, &filename, &bytes).await?;
            println!("Page saved to {}", path.display());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(items: &[&str]) -> Vec<String> {
        std::iter::once("storybook")
            .chain(items.iter().copied())
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn parses_a_full_command_line() {
        let cli = parse_args(&args(&[
            "--photo", "mia.png", "--name", "Mia", "--theme", "Cultural Landmarks", "--count",
            "3", "--out", "books", "--pages",
        ]))
        .unwrap();

        assert_eq!(cli.photo, PathBuf::from("mia.png"));
        assert_eq!(cli.subject_name, "Mia");
        assert_eq!(cli.theme, "Cultural Landmarks");
        assert_eq!(cli.count, Some(3));
        assert_eq!(cli.out_dir, Some(PathBuf::from("books")));
        assert!(cli.pages);
        assert!(!cli.preset);
    }

    #[test]
    fn collects_repeated_prompts() {
        let cli = parse_args(&args(&[
            "--photo", "mia.jpg", "--name", "Mia", "--theme", "Space", "--prompt", "Mia on Mars",
            "--prompt", "Mia on the Moon",
        ]))
        .unwrap();

        assert_eq!(cli.prompts, vec!["Mia on Mars", "Mia on the Moon"]);
        assert_eq!(cli.count, None);
    }

    #[test]
    fn rejects_missing_and_invalid_values() {
        assert!(parse_args(&args(&["--name", "Mia", "--theme", "Space"])).is_err());
        assert!(parse_args(&args(&["--photo", "a.png", "--name"])).is_err());
        assert!(parse_args(&args(&[
            "--photo", "a.png", "--name", "Mia", "--theme", "Space", "--count", "0"
        ]))
        .is_err());
        assert!(parse_args(&args(&["--photo", "a.png", "--bogus"])).is_err());
        assert!(parse_args(&args(&[
            "--photo", "a.png", "--name", "Mia", "--theme", "Space", "--preset", "--prompt", "x"
        ]))
        .is_err());
    }
}
