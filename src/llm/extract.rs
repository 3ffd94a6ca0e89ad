use base64::{engine::general_purpose, Engine as _};

use crate::llm::media::{is_image_mime, normalize_mime_type};
use crate::llm::provider::{ModelResponse, ResponsePart};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartKind {
    Text,
    Image,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Image { mime_type: String, bytes: Vec<u8> },
}

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("image part ({mime_type}) is not valid base64: {source}")]
    Undecodable {
        mime_type: String,
        #[source]
        source: base64::DecodeError,
    },
}

/// Locate the payload of the requested kind.
///
/// Text parts are concatenated in order, skipping blank ones. For images only
/// the first `image/*` part is honoured. A response with nothing matching is
/// `Ok(None)`; only a matching image whose data is not valid base64 is an error.
pub fn extract(response: &ModelResponse, kind: PartKind) -> Result<Option<Payload>, ExtractError> {
    match kind {
        PartKind::Text => Ok(extract_text(response).map(Payload::Text)),
        PartKind::Image => Ok(extract_image(response)?
            .map(|(mime_type, bytes)| Payload::Image { mime_type, bytes })),
    }
}

pub fn extract_text(response: &ModelResponse) -> Option<String> {
    let mut text_parts: Vec<&str> = Vec::new();
    for part in &response.parts {
        match part {
            ResponsePart::Text(text) => {
                if !text.trim().is_empty() {
                    text_parts.push(text);
                }
            }
            ResponsePart::Binary { .. } | ResponsePart::Empty => {}
        }
    }

    if text_parts.is_empty() {
        None
    } else {
        Some(text_parts.join("\n"))
    }
}

pub fn extract_image(response: &ModelResponse) -> Result<Option<(String, Vec<u8>)>, ExtractError> {
    for part in &response.parts {
        match part {
            ResponsePart::Binary { mime_type, data } if is_image_mime(mime_type) => {
                let mime_type = normalize_mime_type(mime_type);
                let bytes = general_purpose::STANDARD
                    .decode(data.trim())
                    .map_err(|source| ExtractError::Undecodable {
                        mime_type: mime_type.clone(),
                        source,
                    })?;
                if bytes.is_empty() {
                    continue;
                }
                return Ok(Some((mime_type, bytes)));
            }
            ResponsePart::Binary { .. } | ResponsePart::Text(_) | ResponsePart::Empty => {}
        }
    }
    Ok(None)
}
