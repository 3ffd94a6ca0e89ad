use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("reference image is empty")]
    Empty,
    #[error("unsupported reference image type: {0} (expected PNG or JPEG)")]
    Unsupported(String),
}

pub fn detect_mime_type(data: &[u8]) -> Option<String> {
    infer::get(data).map(|kind| kind.mime_type().to_string())
}

pub fn normalize_mime_type(mime_type: &str) -> String {
    let lowered = mime_type.trim().to_ascii_lowercase();
    match lowered.as_str() {
        "image/jpg" | "image/pjpeg" => "image/jpeg".to_string(),
        "image/x-png" => "image/png".to_string(),
        _ => lowered,
    }
}

pub fn is_image_mime(mime_type: &str) -> bool {
    normalize_mime_type(mime_type).starts_with("image/")
}

fn is_supported_reference_mime(mime_type: &str) -> bool {
    matches!(mime_type, "image/png" | "image/jpeg")
}

/// The uploaded photo, shared read-only by every illustration request of a run.
#[derive(Debug, Clone)]
pub struct ReferenceImage {
    bytes: Arc<[u8]>,
    mime_type: String,
}

impl ReferenceImage {
    /// Sniffed content wins over the declared type; the declared type is only
    /// consulted when the bytes are not recognised.
    pub fn from_bytes(bytes: Vec<u8>, declared_mime: Option<&str>) -> Result<Self, MediaError> {
        if bytes.is_empty() {
            return Err(MediaError::Empty);
        }

        let mime_type = detect_mime_type(&bytes)
            .or_else(|| declared_mime.map(str::to_string))
            .map(|value| normalize_mime_type(&value))
            .unwrap_or_else(|| "application/octet-stream".to_string());

        if !is_supported_reference_mime(&mime_type) {
            return Err(MediaError::Unsupported(mime_type));
        }

        Ok(Self {
            bytes: Arc::from(bytes),
            mime_type,
        })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Guess a reference image mime type from a file extension.
pub fn mime_for_extension(extension: &str) -> Option<&'static str> {
    match extension.trim().to_ascii_lowercase().as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        _ => None,
    }
}

#[cfg(test)]
pub(crate) fn sample_png(width: u32, height: u32) -> Vec<u8> {
    use image::{ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    let image = RgbImage::from_pixel(width, height, Rgb([200, 120, 40]));
    let mut buffer = Cursor::new(Vec::new());
    image
        .write_to(&mut buffer, ImageFormat::Png)
        .expect("encode sample png");
    buffer.into_inner()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_png_by_content() {
        let image = ReferenceImage::from_bytes(sample_png(4, 4), Some("image/jpeg")).unwrap();
        assert_eq!(image.mime_type(), "image/png");
        assert!(!image.is_empty());
    }

    #[test]
    fn rejects_empty_and_unsupported_bytes() {
        assert!(matches!(
            ReferenceImage::from_bytes(Vec::new(), Some("image/png")),
            Err(MediaError::Empty)
        ));
        assert!(matches!(
            ReferenceImage::from_bytes(b"GIF89a\x01\x00\x01\x00".to_vec(), None),
            Err(MediaError::Unsupported(mime)) if mime == "image/gif"
        ));
    }

    #[test]
    fn declared_type_is_a_fallback_only() {
        let err = ReferenceImage::from_bytes(b"not an image".to_vec(), None).unwrap_err();
        assert!(matches!(err, MediaError::Unsupported(_)));

        let image = ReferenceImage::from_bytes(b"opaque".to_vec(), Some("image/jpg")).unwrap();
        assert_eq!(image.mime_type(), "image/jpeg");
    }

    #[test]
    fn maps_extensions() {
        assert_eq!(mime_for_extension("JPG"), Some("image/jpeg"));
        assert_eq!(mime_for_extension("png"), Some("image/png"));
        assert_eq!(mime_for_extension("gif"), None);
    }
}
