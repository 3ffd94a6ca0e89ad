use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::config::{Config, SafetyProfile};
use crate::llm::media::ReferenceImage;
use crate::llm::provider::{
    ImageGenerator, ModelResponse, ProviderError, ResponsePart, TextGenerator,
};
use crate::utils::http::get_http_client;
use crate::utils::timing::log_llm_timing;

const GEMINI_RETRY_BASE_DELAY_MS: u64 = 900;
const GEMINI_CALL_BUDGET_GRACE_MS: u64 = 500;
const BLOCKING_FINISH_REASONS: &[&str] = &[
    "SAFETY",
    "PROHIBITED_CONTENT",
    "BLOCKLIST",
    "SPII",
    "IMAGE_SAFETY",
    "RECITATION",
];

#[derive(Debug, Clone, Default)]
pub struct GeminiImageConfig {
    pub aspect_ratio: Option<String>,
    pub image_size: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
    prompt_feedback: Option<GeminiPromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    content: Option<GeminiContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    parts: Option<Vec<GeminiPart>>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum GeminiPart {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: GeminiInlineData,
    },
    Other(Value),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiInlineData {
    mime_type: String,
    data: String,
}

/// Gemini `generateContent` client serving both the text and the image model.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    api_key: String,
    api_base: String,
    text_model: String,
    image_model: String,
    temperature: f32,
    safety_profile: SafetyProfile,
    max_attempts: usize,
    request_timeout: Duration,
    image_config: GeminiImageConfig,
}

impl GeminiClient {
    pub fn from_config(config: &Config) -> Self {
        Self {
            api_key: config.gemini_api_key.clone(),
            api_base: config.gemini_api_base.clone(),
            text_model: config.gemini_text_model.clone(),
            image_model: config.gemini_image_model.clone(),
            temperature: config.gemini_temperature,
            safety_profile: config.gemini_safety_settings,
            max_attempts: config.gemini_max_retry_attempts.max(1),
            request_timeout: config.provider_timeout,
            image_config: GeminiImageConfig {
                aspect_ratio: Some(config.image_aspect_ratio.clone()),
                image_size: config.image_size.clone(),
            },
        }
    }

    pub fn call_budget(&self) -> Duration {
        gemini_call_budget(self.request_timeout, self.max_attempts)
    }

    fn redact(&self, text: &str) -> String {
        let key = self.api_key.trim();
        if key.is_empty() {
            return text.to_string();
        }
        text.replace(key, "[redacted]")
    }

    async fn call_api(&self, model: &str, payload: Value) -> Result<GeminiResponse, ProviderError> {
        let client = get_http_client();
        let url = format!("{}/models/{}:generateContent", self.api_base, model);

        if tracing::enabled!(tracing::Level::DEBUG) {
            let payload_summary = summarize_gemini_payload(&payload);
            debug!(target: "llm.gemini", model = model, payload = %payload_summary);
        }

        let mut attempt = 0usize;
        loop {
            attempt += 1;
            let response = match client
                .post(&url)
                .header("x-goog-api-key", &self.api_key)
                .timeout(self.request_timeout)
                .json(&payload)
                .send()
                .await
            {
                Ok(response) => response,
                Err(err) => {
                    let err_text = self.redact(&err.to_string());
                    let should_retry =
                        gemini_should_retry_error(&err) && attempt < self.max_attempts;
                    warn!(
                        "Gemini request failed to send: {} (timeout={}, connect={}, retrying={})",
                        err_text,
                        err.is_timeout(),
                        err.is_connect(),
                        should_retry
                    );
                    if should_retry {
                        tokio::time::sleep(gemini_retry_delay(attempt)).await;
                        continue;
                    }
                    if err.is_timeout() {
                        return Err(ProviderError::Timeout(self.request_timeout));
                    }
                    return Err(ProviderError::Request(err_text));
                }
            };

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                let (message, body_summary) = summarize_error_body(&self.redact(&body));
                let should_retry =
                    gemini_should_retry_status(status) && attempt < self.max_attempts;
                warn!(
                    "Gemini API error: status={}, body={}, retrying={}",
                    status, body_summary, should_retry
                );
                if should_retry {
                    tokio::time::sleep(gemini_retry_delay(attempt)).await;
                    continue;
                }
                return Err(ProviderError::Status {
                    status: status.as_u16(),
                    detail: message.unwrap_or(body_summary),
                });
            }

            let body = response
                .text()
                .await
                .map_err(|err| ProviderError::Request(self.redact(&err.to_string())))?;
            let value = serde_json::from_str::<GeminiResponse>(&body)
                .map_err(|err| ProviderError::Parse(err.to_string()))?;
            if tracing::enabled!(tracing::Level::DEBUG) {
                let response_summary = summarize_gemini_response(&value);
                debug!(target: "llm.gemini", model = model, response = %response_summary);
            }
            return Ok(value);
        }
    }
}

#[async_trait]
impl TextGenerator for GeminiClient {
    async fn generate_text(&self, prompt: &str) -> Result<ModelResponse, ProviderError> {
        let payload = build_text_payload(prompt, self.temperature, self.safety_profile);
        let model = self.text_model.as_str();
        log_llm_timing("gemini", model, "generate_scenarios", None, || async {
            let response = self.call_api(model, payload).await?;
            into_model_response(response)
        })
        .await
    }
}

#[async_trait]
impl ImageGenerator for GeminiClient {
    async fn generate_image(
        &self,
        prompt: &str,
        reference: &ReferenceImage,
    ) -> Result<ModelResponse, ProviderError> {
        let payload =
            build_image_payload(prompt, reference, &self.image_config, self.safety_profile);
        let model = self.image_model.as_str();
        let metadata = json!({ "referenceBytes": reference.len(), "mimeType": reference.mime_type() });
        log_llm_timing("gemini", model, "render_page", Some(metadata), || async {
            let response = self.call_api(model, payload).await?;
            into_model_response(response)
        })
        .await
    }
}

fn gemini_should_retry_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}

fn gemini_should_retry_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}

fn gemini_retry_delay(attempt: usize) -> Duration {
    let attempt = attempt.max(1) as u64;
    Duration::from_millis(GEMINI_RETRY_BASE_DELAY_MS.saturating_mul(attempt))
}

/// Upper bound on one logical call: every attempt running to its timeout plus
/// the back-off between attempts. Callers that wrap a call in their own
/// timeout must allow at least this much or retries never get to run.
pub fn gemini_call_budget(request_timeout: Duration, max_attempts: usize) -> Duration {
    let attempts = max_attempts.max(1);
    let waiting: Duration = (1..attempts).map(gemini_retry_delay).sum();
    request_timeout.saturating_mul(attempts as u32)
        + waiting
        + Duration::from_millis(GEMINI_CALL_BUDGET_GRACE_MS)
}

fn build_safety_settings(profile: SafetyProfile) -> Vec<Value> {
    let threshold = match profile {
        SafetyProfile::Standard => "BLOCK_MEDIUM_AND_ABOVE",
        SafetyProfile::Permissive => "OFF",
    };

    vec![
        json!({ "category": "HARM_CATEGORY_HARASSMENT", "threshold": threshold }),
        json!({ "category": "HARM_CATEGORY_HATE_SPEECH", "threshold": threshold }),
        json!({ "category": "HARM_CATEGORY_SEXUALLY_EXPLICIT", "threshold": threshold }),
        json!({ "category": "HARM_CATEGORY_DANGEROUS_CONTENT", "threshold": threshold }),
    ]
}

fn build_image_config(config: &GeminiImageConfig) -> Option<Value> {
    let mut map = Map::new();

    if let Some(aspect_ratio) = config.aspect_ratio.as_deref() {
        let trimmed = aspect_ratio.trim();
        if !trimmed.is_empty() {
            map.insert("aspectRatio".to_string(), json!(trimmed));
        }
    }

    if let Some(image_size) = config.image_size.as_deref() {
        let trimmed = image_size.trim();
        if !trimmed.is_empty() {
            map.insert("imageSize".to_string(), json!(trimmed));
        }
    }

    if map.is_empty() {
        None
    } else {
        Some(Value::Object(map))
    }
}

fn build_text_payload(prompt: &str, temperature: f32, safety_profile: SafetyProfile) -> Value {
    json!({
        "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
        "generationConfig": {
            "temperature": temperature,
            "responseModalities": ["TEXT"],
        },
        "safetySettings": build_safety_settings(safety_profile),
    })
}

fn build_image_payload(
    prompt: &str,
    reference: &ReferenceImage,
    image_config: &GeminiImageConfig,
    safety_profile: SafetyProfile,
) -> Value {
    let parts = vec![
        json!({ "text": prompt }),
        json!({
            "inlineData": {
                "mimeType": reference.mime_type(),
                "data": general_purpose::STANDARD.encode(reference.bytes()),
            }
        }),
    ];

    let mut generation_config = json!({
        "responseModalities": ["TEXT", "IMAGE"]
    });
    if let Some(image_config) = build_image_config(image_config) {
        if let Some(config_object) = generation_config.as_object_mut() {
            config_object.insert("imageConfig".to_string(), image_config);
        }
    }

    json!({
        "contents": [{ "role": "user", "parts": parts }],
        "generationConfig": generation_config,
        "safetySettings": build_safety_settings(safety_profile),
    })
}

fn into_model_response(response: GeminiResponse) -> Result<ModelResponse, ProviderError> {
    let block_reason = response
        .prompt_feedback
        .as_ref()
        .and_then(|feedback| feedback.block_reason.clone());

    let mut parts = Vec::new();
    let mut finish_reasons = Vec::new();
    for candidate in response.candidates.unwrap_or_default() {
        if let Some(reason) = candidate.finish_reason {
            finish_reasons.push(reason);
        }
        let Some(content) = candidate.content else {
            continue;
        };
        for part in content.parts.unwrap_or_default() {
            parts.push(match part {
                GeminiPart::Text { text } => ResponsePart::Text(text),
                GeminiPart::InlineData { inline_data } => ResponsePart::Binary {
                    mime_type: inline_data.mime_type,
                    data: inline_data.data,
                },
                GeminiPart::Other(_) => ResponsePart::Empty,
            });
        }
    }

    if parts.is_empty() {
        if let Some(reason) = block_reason {
            return Err(ProviderError::Blocked(reason));
        }
        if let Some(reason) = finish_reasons
            .into_iter()
            .find(|reason| BLOCKING_FINISH_REASONS.contains(&reason.as_str()))
        {
            return Err(ProviderError::Blocked(reason));
        }
    }

    Ok(ModelResponse::new(parts))
}

fn truncate_for_log(value: &str, limit: usize) -> String {
    if value.chars().count() <= limit {
        return value.to_string();
    }
    let truncated: String = value.chars().take(limit).collect();
    format!("{truncated}... (truncated)")
}

fn summarize_gemini_payload(payload: &Value) -> Value {
    let parts = payload
        .pointer("/contents/0/parts")
        .and_then(|value| value.as_array())
        .map(|parts| {
            parts
                .iter()
                .map(|part| {
                    if let Some(text) = part.get("text").and_then(|value| value.as_str()) {
                        json!({ "text": truncate_for_log(text, 200) })
                    } else if let Some(inline_data) = part.get("inlineData") {
                        let mime_type = inline_data
                            .get("mimeType")
                            .and_then(|value| value.as_str())
                            .unwrap_or("unknown");
                        let data_len = inline_data
                            .get("data")
                            .and_then(|value| value.as_str())
                            .map(|value| value.len())
                            .unwrap_or(0);
                        json!({ "inlineData": { "mimeType": mime_type, "dataLen": data_len } })
                    } else {
                        json!({ "unknownPart": true })
                    }
                })
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    json!({
        "parts": parts,
        "generationConfig": payload.get("generationConfig").cloned().unwrap_or(Value::Null),
    })
}

fn summarize_gemini_response(response: &GeminiResponse) -> Value {
    let mut text_parts = 0usize;
    let mut image_parts = 0usize;
    let mut text_preview = None;

    for candidate in response.candidates.as_deref().unwrap_or(&[]) {
        let Some(parts) = candidate.content.as_ref().and_then(|c| c.parts.as_ref()) else {
            continue;
        };
        for part in parts {
            match part {
                GeminiPart::Text { text } => {
                    text_parts += 1;
                    if text_preview.is_none() && !text.trim().is_empty() {
                        text_preview = Some(truncate_for_log(text, 200));
                    }
                }
                GeminiPart::InlineData { inline_data } => {
                    if inline_data.mime_type.starts_with("image/") {
                        image_parts += 1;
                    }
                }
                GeminiPart::Other(_) => {}
            }
        }
    }

    json!({
        "candidates": response.candidates.as_ref().map(|candidates| candidates.len()).unwrap_or(0),
        "textParts": text_parts,
        "imageParts": image_parts,
        "textPreview": text_preview,
    })
}

fn summarize_error_body(body: &str) -> (Option<String>, String) {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return (None, "empty response body".to_string());
    }

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        let message = value
            .pointer("/error/message")
            .and_then(|v| v.as_str())
            .map(|v| v.to_string())
            .or_else(|| {
                value
                    .get("message")
                    .and_then(|v| v.as_str())
                    .map(|v| v.to_string())
            });
        return (message, truncate_for_log(&value.to_string(), 2000));
    }

    (None, truncate_for_log(trimmed, 2000))
}
