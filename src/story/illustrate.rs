use std::time::Duration;

use futures_util::stream::{self, StreamExt};
use image::DynamicImage;
use tracing::{info, warn};

use crate::config::Config;
use crate::llm::extract::{extract, ExtractError, PartKind, Payload};
use crate::llm::gemini::gemini_call_budget;
use crate::llm::{ImageGenerator, ProviderError, ReferenceImage};

const DEFAULT_CALL_TIMEOUT_SECS: u64 = 90;

#[derive(Debug, Clone)]
pub struct RenderOptions {
    /// Maximum provider calls in flight. 1 renders strictly one after another.
    pub concurrency: usize,
    /// Bound on one scenario's provider call, transport retries included.
    pub call_timeout: Duration,
    pub aspect_ratio: String,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            concurrency: 1,
            call_timeout: Duration::from_secs(DEFAULT_CALL_TIMEOUT_SECS),
            aspect_ratio: "1:1".to_string(),
        }
    }
}

impl RenderOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            concurrency: config.render_concurrency.max(1),
            call_timeout: gemini_call_budget(
                config.provider_timeout,
                config.gemini_max_retry_attempts,
            ),
            aspect_ratio: config.image_aspect_ratio.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct IllustratedPage {
    pub scenario: String,
    pub image: DynamicImage,
}

/// Why a single scenario produced no page.
#[derive(Debug, thiserror::Error)]
pub enum PageError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("no response within {0:?}")]
    Timeout(Duration),
    #[error("response contained no image")]
    NoImage,
    #[error(transparent)]
    Extract(#[from] ExtractError),
    #[error("returned {mime_type} bytes are not a decodable image: {source}")]
    Decode {
        mime_type: String,
        #[source]
        source: image::ImageError,
    },
}

#[derive(Debug)]
pub struct RenderFailure {
    pub index: usize,
    pub scenario: String,
    pub error: PageError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderOutcome {
    NothingRequested,
    Complete,
    Partial,
    AllFailed,
}

#[derive(Debug, Default)]
pub struct RenderReport {
    pub requested: usize,
    pub pages: Vec<IllustratedPage>,
    pub failures: Vec<RenderFailure>,
}

impl RenderReport {
    pub fn outcome(&self) -> RenderOutcome {
        if self.requested == 0 {
            RenderOutcome::NothingRequested
        } else if self.pages.is_empty() {
            RenderOutcome::AllFailed
        } else if self.failures.is_empty() {
            RenderOutcome::Complete
        } else {
            RenderOutcome::Partial
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "{} of {} scenarios illustrated",
            self.pages.len(),
            self.requested
        )
    }
}

pub fn build_illustration_prompt(scenario: &str, aspect_ratio: &str) -> String {
    format!(
        "Create a single-page, full-color, stylized 3D illustration for a children's storybook, \
featuring the child in the attached reference photo. Preserve the child's face shape, hairstyle, \
eye color, skin tone and every other identifying feature. Use consistent soft lighting and natural \
proportions, and compose the page with a {aspect_ratio} aspect ratio. \
Scene: {scenario}. Return only the image, with no text in or around it."
    )
}

async fn render_one(
    provider: &dyn ImageGenerator,
    reference: &ReferenceImage,
    prompt: &str,
    call_timeout: Duration,
) -> Result<DynamicImage, PageError> {
    let response =
        match tokio::time::timeout(call_timeout, provider.generate_image(prompt, reference)).await
        {
            Ok(result) => result?,
            Err(_) => return Err(PageError::Timeout(call_timeout)),
        };

    let Some(Payload::Image { mime_type, bytes }) = extract(&response, PartKind::Image)? else {
        return Err(PageError::NoImage);
    };

    image::load_from_memory(&bytes).map_err(|source| PageError::Decode { mime_type, source })
}

/// Illustrate each scenario with one image-generation call.
///
/// Pages come back in scenario order. A scenario whose call fails, times out,
/// or yields no decodable image is left out of `pages` and recorded in
/// `failures`; this never fails as a whole.
pub async fn render_pages(
    provider: &dyn ImageGenerator,
    reference: &ReferenceImage,
    scenarios: &[String],
    options: &RenderOptions,
) -> RenderReport {
    let concurrency = options.concurrency.max(1);
    let results: Vec<(usize, &String, Result<DynamicImage, PageError>)> =
        stream::iter(scenarios.iter().enumerate())
            .map(|(index, scenario)| async move {
                let prompt = build_illustration_prompt(scenario, &options.aspect_ratio);
                let result = render_one(provider, reference, &prompt, options.call_timeout).await;
                (index, scenario, result)
            })
            .buffered(concurrency)
            .collect()
            .await;

    let mut report = RenderReport {
        requested: scenarios.len(),
        ..RenderReport::default()
    };
    for (index, scenario, result) in results {
        match result {
            Ok(image) => report.pages.push(IllustratedPage {
                scenario: scenario.clone(),
                image,
            }),
            Err(error) => {
                warn!(
                    index = index + 1,
                    scenario = scenario.as_str(),
                    error = %error,
                    "Skipping scenario without an illustration"
                );
                report.failures.push(RenderFailure {
                    index,
                    scenario: scenario.clone(),
                    error,
                });
            }
        }
    }

    info!("{}", report.summary());
    report
}

#[cfg(test)]
pub(crate) mod tests {
    use async_trait::async_trait;
    use parking_lot::Mutex;

    use super::*;
    use crate::llm::media::sample_png;
    use crate::llm::{ModelResponse, ResponsePart};

    type Behaviour = Box<dyn Fn(usize, &str) -> Result<ModelResponse, ProviderError> + Send + Sync>;

    pub(crate) struct StubImages {
        behaviour: Behaviour,
        delay: Box<dyn Fn(usize) -> Duration + Send + Sync>,
        calls: Mutex<usize>,
    }

    impl StubImages {
        pub(crate) fn new(
            behaviour: impl Fn(usize, &str) -> Result<ModelResponse, ProviderError>
                + Send
                + Sync
                + 'static,
        ) -> Self {
            Self {
                behaviour: Box::new(behaviour),
                delay: Box::new(|_| Duration::ZERO),
                calls: Mutex::new(0),
            }
        }

        pub(crate) fn always_ok() -> Self {
            Self::new(|_, _| Ok(png_response()))
        }

        fn with_delay(mut self, delay: impl Fn(usize) -> Duration + Send + Sync + 'static) -> Self {
            self.delay = Box::new(delay);
            self
        }

        pub(crate) fn calls(&self) -> usize {
            *self.calls.lock()
        }
    }

    #[async_trait]
    impl ImageGenerator for StubImages {
        async fn generate_image(
            &self,
            prompt: &str,
            _reference: &ReferenceImage,
        ) -> Result<ModelResponse, ProviderError> {
            let call = {
                let mut calls = self.calls.lock();
                *calls += 1;
                *calls - 1
            };
            let delay = (self.delay)(call);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            (self.behaviour)(call, prompt)
        }
    }

    pub(crate) fn png_response() -> ModelResponse {
        ModelResponse::new(vec![
            ResponsePart::text("Here is the illustration."),
            ResponsePart::binary("image/png", &sample_png(8, 6)),
        ])
    }

    pub(crate) fn reference() -> ReferenceImage {
        ReferenceImage::from_bytes(sample_png(4, 4), None).unwrap()
    }

    fn scenarios(items: &[&str]) -> Vec<String> {
        items.iter().map(|item| item.to_string()).collect()
    }

    #[tokio::test]
    async fn failing_second_call_yields_only_the_first_page() {
        let provider = StubImages::new(|call, _| {
            if call == 1 {
                Err(ProviderError::Status {
                    status: 500,
                    detail: "internal".to_string(),
                })
            } else {
                Ok(png_response())
            }
        });

        let report = render_pages(
            &provider,
            &reference(),
            &scenarios(&["Mia the doctor", "Mia the pilot"]),
            &RenderOptions::default(),
        )
        .await;

        assert_eq!(report.pages.len(), 1);
        assert_eq!(report.pages[0].scenario, "Mia the doctor");
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].scenario, "Mia the pilot");
        assert_eq!(report.outcome(), RenderOutcome::Partial);
        assert_eq!(report.summary(), "1 of 2 scenarios illustrated");
    }

    #[tokio::test]
    async fn all_successes_keep_every_scenario_with_decoded_images() {
        let provider = StubImages::always_ok();
        let input = scenarios(&["Mia the chef", "Mia the vet", "Mia the astronaut"]);

        let report = render_pages(&provider, &reference(), &input, &RenderOptions::default()).await;

        assert_eq!(report.pages.len(), input.len());
        assert_eq!(report.outcome(), RenderOutcome::Complete);
        assert_eq!(report.pages[2].image.width(), 8);
        assert_eq!(report.pages[2].image.height(), 6);
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test]
    async fn concurrent_rendering_restores_input_order() {
        // Earlier calls finish last.
        let provider = StubImages::new(|call, prompt| {
            if call == 2 || prompt.contains("Mia the pilot") {
                Err(ProviderError::Request("flaky".to_string()))
            } else {
                Ok(png_response())
            }
        })
        .with_delay(|call| Duration::from_millis(60 - 10 * call as u64));
        let input = scenarios(&[
            "Mia the doctor",
            "Mia the pilot",
            "Mia the firefighter",
            "Mia the scientist",
            "Mia the baker",
        ]);
        let options = RenderOptions {
            concurrency: 5,
            ..RenderOptions::default()
        };

        let report = render_pages(&provider, &reference(), &input, &options).await;

        let rendered: Vec<&str> = report.pages.iter().map(|p| p.scenario.as_str()).collect();
        let mut positions = rendered
            .iter()
            .map(|s| input.iter().position(|i| i == s).unwrap())
            .collect::<Vec<_>>();
        let sorted = {
            let mut copy = positions.clone();
            copy.sort_unstable();
            copy
        };
        assert_eq!(positions, sorted);
        positions.dedup();
        assert_eq!(positions.len(), rendered.len());
        assert!(report.pages.len() <= input.len());
        assert!(!rendered.contains(&"Mia the pilot"));
    }

    #[tokio::test]
    async fn unusable_responses_are_skipped_not_fatal() {
        let provider = StubImages::new(|call, _| match call {
            0 => Ok(ModelResponse::new(vec![ResponsePart::text("I cannot draw that")])),
            1 => Ok(ModelResponse::new(vec![ResponsePart::binary(
                "image/png",
                b"definitely not a png",
            )])),
            2 => Ok(ModelResponse::new(vec![ResponsePart::Binary {
                mime_type: "image/png".to_string(),
                data: "***".to_string(),
            }])),
            _ => Err(ProviderError::Blocked("IMAGE_SAFETY".to_string())),
        });
        let input = scenarios(&["a", "b", "c", "d"]);

        let report = render_pages(&provider, &reference(), &input, &RenderOptions::default()).await;

        assert!(report.pages.is_empty());
        assert_eq!(report.outcome(), RenderOutcome::AllFailed);
        let errors: Vec<&PageError> = report.failures.iter().map(|f| &f.error).collect();
        assert!(matches!(errors[0], PageError::NoImage));
        assert!(matches!(errors[1], PageError::Decode { .. }));
        assert!(matches!(errors[2], PageError::Extract(_)));
        assert!(matches!(errors[3], PageError::Provider(ProviderError::Blocked(_))));
    }

    #[tokio::test]
    async fn slow_calls_time_out_like_any_other_failure() {
        let provider = StubImages::always_ok().with_delay(|call| {
            if call == 0 {
                Duration::from_millis(500)
            } else {
                Duration::ZERO
            }
        });
        let options = RenderOptions {
            call_timeout: Duration::from_millis(50),
            ..RenderOptions::default()
        };

        let report = render_pages(
            &provider,
            &reference(),
            &scenarios(&["slow", "fast"]),
            &options,
        )
        .await;

        assert_eq!(report.pages.len(), 1);
        assert_eq!(report.pages[0].scenario, "fast");
        assert!(matches!(report.failures[0].error, PageError::Timeout(_)));
    }

    #[tokio::test]
    async fn empty_input_is_nothing_requested() {
        let provider = StubImages::always_ok();
        let report = render_pages(&provider, &reference(), &[], &RenderOptions::default()).await;
        assert_eq!(report.outcome(), RenderOutcome::NothingRequested);
        assert_eq!(provider.calls(), 0);
    }

    #[test]
    fn configured_call_timeout_leaves_room_for_retries() {
        let config = Config::from_lookup(|name| match name {
            "GEMINI_API_KEY" => Some("key".to_string()),
            "PROVIDER_TIMEOUT_SECONDS" => Some("10".to_string()),
            "GEMINI_MAX_RETRY_ATTEMPTS" => Some("3".to_string()),
            _ => None,
        })
        .unwrap();

        let options = RenderOptions::from_config(&config);

        assert!(options.call_timeout >= Duration::from_secs(30) + Duration::from_millis(2700));
    }

    #[test]
    fn prompt_carries_style_directive_and_scenario() {
        let prompt = build_illustration_prompt("Mia at the Taj Mahal, India", "4:3");
        assert!(prompt.contains("single-page, full-color, stylized 3D illustration"));
        assert!(prompt.contains("face shape, hairstyle"));
        assert!(prompt.contains("soft lighting"));
        assert!(prompt.contains("4:3 aspect ratio"));
        assert!(prompt.contains("Scene: Mia at the Taj Mahal, India."));
    }
}
