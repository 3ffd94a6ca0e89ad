use std::io::Cursor;

use image::ImageFormat;
use tracing::warn;

use crate::story::illustrate::IllustratedPage;

fn filename_component(value: &str) -> String {
    value
        .trim()
        .chars()
        .map(|c| match c {
            ' ' | '/' | '\\' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}

/// `{subject}_{theme with spaces as underscores}_storybook.pdf`
pub fn document_filename(subject_name: &str, theme_label: &str) -> String {
    format!(
        "{}_{}_storybook.pdf",
        filename_component(subject_name),
        filename_component(theme_label)
    )
}

/// `{subject}_page_{n}.png`, with `n` starting at 1.
pub fn page_filename(subject_name: &str, page_number: usize) -> String {
    format!("{}_page_{}.png", filename_component(subject_name), page_number)
}

pub fn encode_page_png(page: &IllustratedPage) -> Result<Vec<u8>, image::ImageError> {
    let mut buffer = Cursor::new(Vec::new());
    page.image.write_to(&mut buffer, ImageFormat::Png)?;
    Ok(buffer.into_inner())
}

/// Encode every page as a standalone PNG. Pages that fail to encode are
/// logged and left out; numbering follows story order either way.
pub fn export_page_images(subject_name: &str, story: &[IllustratedPage]) -> Vec<(String, Vec<u8>)> {
    story
        .iter()
        .enumerate()
        .filter_map(|(index, page)| match encode_page_png(page) {
            Ok(bytes) => Some((page_filename(subject_name, index + 1), bytes)),
            Err(err) => {
                warn!(page = index + 1, error = %err, "Failed to encode page image");
                None
            }
        })
        .collect()
}
