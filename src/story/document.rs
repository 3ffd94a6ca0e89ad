//! Storybook PDF assembly.
//!
//! Every page is a 612 x 612 pt square with a 36 pt margin. Layout is computed
//! first as plain data ([`PageLayout`]) and only then written out with lopdf,
//! so page count and placement depend on nothing but the inputs.

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::DynamicImage;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream, StringFormat};
use tracing::{info, warn};

use crate::story::illustrate::IllustratedPage;
use crate::story::theme::{cover_color_for, Rgb};

pub const PAGE_SIZE: f32 = 612.0;
pub const MARGIN: f32 = 36.0;

const TITLE_FONT_SIZE: f32 = 34.0;
const TITLE_FONT_SIZES: [f32; 3] = [TITLE_FONT_SIZE, 26.0, 20.0];
const TITLE_WRAP_CHARS: usize = 20;
const TITLE_TOP_PADDING: f32 = 24.0;
const COVER_THUMB_FRACTION: f32 = 0.45;
const MIN_COVER_THUMB_HEIGHT: f32 = 120.0;
const CONTENT_IMAGE_FRACTION: f32 = 0.8;
const MIN_CONTENT_IMAGE_HEIGHT: f32 = 180.0;
const CAPTION_FONT_SIZE: f32 = 16.0;
const CAPTION_FONT_SIZES: [f32; 3] = [CAPTION_FONT_SIZE, 13.0, 11.0];
const CAPTION_WRAP_CHARS: usize = 48;
const CAPTION_GAP: f32 = 14.0;
const LINE_SPACING: f32 = 1.25;
const BACK_COVER_FONT_SIZE: f32 = 18.0;
const BACK_COVER_TEXT: &str = "Made with love by the Kids' Storybook Generator";

const CONTENT_BACKGROUND: Rgb = [250, 248, 242];
const BACK_COVER_BACKGROUND: Rgb = [38, 41, 56];
const TITLE_COLOR: Rgb = [44, 44, 66];
const CAPTION_COLOR: Rgb = [66, 66, 66];
const BACK_COVER_TEXT_COLOR: Rgb = [255, 255, 255];

const MAX_EMBED_DIMENSION: u32 = 1600;
const JPEG_QUALITY: u8 = 88;

#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("failed to build PDF: {0}")]
    Pdf(#[from] lopdf::Error),
    #[error("failed to write PDF: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Font {
    Bold,
    Oblique,
    Regular,
}

impl Font {
    fn resource_name(self) -> &'static str {
        match self {
            Font::Bold => "F1",
            Font::Oblique => "F2",
            Font::Regular => "F3",
        }
    }

    fn base_font(self) -> &'static str {
        match self {
            Font::Bold => "Helvetica-Bold",
            Font::Oblique => "Helvetica-Oblique",
            Font::Regular => "Helvetica",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextLine {
    pub text: String,
    pub font: Font,
    pub size: f32,
    /// Left edge of the baseline.
    pub x: f32,
    pub y: f32,
}

/// An image placed on a page; `story_index` points into the story.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlacedImage {
    pub story_index: usize,
    pub rect: Rect,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PageLayout {
    pub background: Rgb,
    pub text_color: Rgb,
    pub image: Option<PlacedImage>,
    pub lines: Vec<TextLine>,
}

pub fn cover_title(subject_name: &str, theme_label: &str) -> String {
    format!("{subject_name}'s {theme_label} Storybook")
}

/// Greedy word wrap. Words longer than `max_chars` get a line of their own.
pub fn wrap_text(text: &str, max_chars: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        if current.is_empty() {
            current.push_str(word);
        } else if current.chars().count() + 1 + word.chars().count() <= max_chars {
            current.push(' ');
            current.push_str(word);
        } else {
            lines.push(std::mem::take(&mut current));
            current.push_str(word);
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

/// Approximate Helvetica advance widths, in thousandths of an em.
fn glyph_width(c: char) -> f32 {
    match c {
        'i' | 'j' | 'l' | '\'' | '.' | ',' | ':' | ';' | '!' | '|' => 278.0,
        ' ' | 'f' | 't' | 'I' => 278.0,
        'r' | '-' | '(' | ')' => 333.0,
        'm' => 833.0,
        'w' => 722.0,
        'M' => 833.0,
        'W' => 944.0,
        c if c.is_ascii_uppercase() => 700.0,
        _ => 556.0,
    }
}

pub fn text_width(text: &str, font: Font, size: f32) -> f32 {
    let em: f32 = text.chars().map(glyph_width).sum();
    let weight = if font == Font::Bold { 1.06 } else { 1.0 };
    em * weight * size / 1000.0
}

fn centered_line(text: String, font: Font, size: f32, y: f32) -> TextLine {
    let width = text_width(&text, font, size);
    TextLine {
        x: ((PAGE_SIZE - width) / 2.0).max(MARGIN),
        text,
        font,
        size,
        y,
    }
}

/// Scale `width` x `height` to fill `max_width`, shrinking further when that
/// would exceed `max_height`. Aspect ratio is preserved.
pub fn fit_within(width: u32, height: u32, max_width: f32, max_height: f32) -> (f32, f32) {
    if width == 0 || height == 0 || max_width <= 0.0 || max_height <= 0.0 {
        return (0.0, 0.0);
    }
    let (w, h) = (width as f32, height as f32);
    let scale = (max_width / w).min(max_height / h);
    (w * scale, h * scale)
}

/// Text wrapped at the largest of `sizes` (descending) whose line count stays
/// within `max_lines(size)`. At the smallest size, lines past the limit are
/// cut and the last kept line ends in "...".
#[derive(Debug, Clone, PartialEq)]
struct TextBlock {
    size: f32,
    lines: Vec<String>,
    /// True when the text had to shrink or was cut.
    squeezed: bool,
}

fn fit_text_block(
    text: &str,
    sizes: &[f32],
    base_size: f32,
    base_wrap: usize,
    max_lines: impl Fn(f32) -> usize,
) -> TextBlock {
    let wrap_at = |size: f32| ((base_wrap as f32 * base_size / size) as usize).max(1);
    let mut last = None;
    for (step, &size) in sizes.iter().enumerate() {
        let lines = wrap_text(text, wrap_at(size));
        if lines.len() <= max_lines(size) {
            return TextBlock {
                size,
                lines,
                squeezed: step > 0,
            };
        }
        last = Some((size, lines));
    }

    let Some((size, mut lines)) = last else {
        return TextBlock {
            size: base_size,
            lines: wrap_text(text, base_wrap),
            squeezed: false,
        };
    };
    let limit = max_lines(size).max(1);
    lines.truncate(limit);
    if let Some(line) = lines.last_mut() {
        let keep = wrap_at(size).saturating_sub(3);
        let cut: String = line.chars().take(keep).collect();
        *line = format!("{}...", cut.trim_end());
    }
    TextBlock {
        size,
        lines,
        squeezed: true,
    }
}

pub fn cover_layout(
    subject_name: &str,
    theme_label: &str,
    thumbnail: Option<(usize, u32, u32)>,
) -> PageLayout {
    // Title lines above, a thumbnail of at least MIN_COVER_THUMB_HEIGHT below.
    let title = fit_text_block(
        &cover_title(subject_name, theme_label),
        &TITLE_FONT_SIZES,
        TITLE_FONT_SIZE,
        TITLE_WRAP_CHARS,
        |size| {
            let room = PAGE_SIZE
                - 2.0 * MARGIN
                - 2.0 * (size + TITLE_TOP_PADDING)
                - MIN_COVER_THUMB_HEIGHT;
            (room / (size * LINE_SPACING)).max(0.0) as usize + 1
        },
    );
    if title.squeezed {
        warn!(
            theme = theme_label,
            font_size = title.size,
            "Cover title shrunk to stay within the page"
        );
    }

    let size = title.size;
    let line_height = size * LINE_SPACING;
    let mut y = PAGE_SIZE - MARGIN - size - TITLE_TOP_PADDING;
    let mut lines = Vec::new();
    for text in title.lines {
        lines.push(centered_line(text, Font::Bold, size, y));
        y -= line_height;
    }

    let image = thumbnail.and_then(|(story_index, width, height)| {
        let top = y + line_height - size - TITLE_TOP_PADDING;
        let max_height = top - MARGIN;
        let (w, h) = fit_within(width, height, PAGE_SIZE * COVER_THUMB_FRACTION, max_height);
        if w <= 0.0 || h <= 0.0 {
            warn!(width, height, "Cover thumbnail has no room; leaving it out");
            return None;
        }
        Some(PlacedImage {
            story_index,
            rect: Rect {
                x: (PAGE_SIZE - w) / 2.0,
                y: top - h,
                width: w,
                height: h,
            },
        })
    });

    PageLayout {
        background: cover_color_for(theme_label),
        text_color: TITLE_COLOR,
        image,
        lines,
    }
}

pub fn content_layout(story_index: usize, caption: &str, width: u32, height: u32) -> PageLayout {
    let caption_room = PAGE_SIZE - 2.0 * MARGIN - CAPTION_GAP - MIN_CONTENT_IMAGE_HEIGHT;
    let caption = fit_text_block(
        caption,
        &CAPTION_FONT_SIZES,
        CAPTION_FONT_SIZE,
        CAPTION_WRAP_CHARS,
        |size| (caption_room / (size * LINE_SPACING)).max(0.0) as usize,
    );
    if caption.squeezed {
        warn!(
            page = story_index + 1,
            font_size = caption.size,
            "Caption shrunk to keep the illustration on the page"
        );
    }

    let size = caption.size;
    let line_height = size * LINE_SPACING;
    let caption_block = caption.lines.len() as f32 * line_height;

    let max_height = PAGE_SIZE - 2.0 * MARGIN - CAPTION_GAP - caption_block;
    let (w, h) = fit_within(
        width,
        height,
        PAGE_SIZE * CONTENT_IMAGE_FRACTION,
        max_height,
    );
    if w <= 0.0 || h <= 0.0 {
        warn!(
            page = story_index + 1,
            width,
            height,
            "Illustration has no drawable area; page keeps its caption only"
        );
    }

    // Image and caption form one block, centered vertically.
    let block = h + CAPTION_GAP + caption_block;
    let top = (PAGE_SIZE + block) / 2.0;
    let image_rect = Rect {
        x: (PAGE_SIZE - w) / 2.0,
        y: top - h,
        width: w,
        height: h,
    };

    let mut y = image_rect.y - CAPTION_GAP - size;
    let mut lines = Vec::new();
    for text in caption.lines {
        lines.push(centered_line(text, Font::Oblique, size, y));
        y -= line_height;
    }

    PageLayout {
        background: CONTENT_BACKGROUND,
        text_color: CAPTION_COLOR,
        image: (w > 0.0 && h > 0.0).then_some(PlacedImage {
            story_index,
            rect: image_rect,
        }),
        lines,
    }
}

pub fn back_cover_layout() -> PageLayout {
    let line_height = BACK_COVER_FONT_SIZE * LINE_SPACING;
    let wrapped = wrap_text(BACK_COVER_TEXT, 36);
    let mut y = PAGE_SIZE / 2.0 + (wrapped.len() as f32 - 1.0) * line_height / 2.0;
    let mut lines = Vec::new();
    for text in wrapped {
        lines.push(centered_line(text, Font::Regular, BACK_COVER_FONT_SIZE, y));
        y -= line_height;
    }
    PageLayout {
        background: BACK_COVER_BACKGROUND,
        text_color: BACK_COVER_TEXT_COLOR,
        image: None,
        lines,
    }
}

/// Cover, one page per story entry, back cover.
pub fn plan_pages(subject_name: &str, theme_label: &str, story: &[IllustratedPage]) -> Vec<PageLayout> {
    let mut layouts = Vec::with_capacity(story.len() + 2);
    let thumbnail = story
        .first()
        .map(|page| (0, page.image.width(), page.image.height()));
    layouts.push(cover_layout(subject_name, theme_label, thumbnail));
    for (index, page) in story.iter().enumerate() {
        layouts.push(content_layout(
            index,
            &page.scenario,
            page.image.width(),
            page.image.height(),
        ));
    }
    layouts.push(back_cover_layout());
    layouts
}

fn encode_win_ansi(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| match c {
            '\u{2018}' => 0x91,
            '\u{2019}' => 0x92,
            '\u{201C}' => 0x93,
            '\u{201D}' => 0x94,
            '\u{2013}' => 0x96,
            '\u{2014}' => 0x97,
            '\u{2026}' => 0x85,
            c if (c as u32) < 0x100 => c as u32 as u8,
            _ => b'?',
        })
        .collect()
}

fn encode_jpeg(image: &DynamicImage) -> Result<(u32, u32, Vec<u8>), image::ImageError> {
    let image = if image.width() > MAX_EMBED_DIMENSION || image.height() > MAX_EMBED_DIMENSION {
        image.resize(MAX_EMBED_DIMENSION, MAX_EMBED_DIMENSION, FilterType::Triangle)
    } else {
        image.clone()
    };
    let rgb = image.to_rgb8();
    let mut buffer = Cursor::new(Vec::new());
    JpegEncoder::new_with_quality(&mut buffer, JPEG_QUALITY).encode_image(&rgb)?;
    Ok((rgb.width(), rgb.height(), buffer.into_inner()))
}

fn color_operands(color: Rgb) -> Vec<Object> {
    color
        .iter()
        .map(|channel| Object::from(f32::from(*channel) / 255.0))
        .collect()
}

fn page_operations(layout: &PageLayout, image_name: Option<&str>) -> Vec<Operation> {
    let mut ops = vec![
        Operation::new("q", vec![]),
        Operation::new("rg", color_operands(layout.background)),
        Operation::new(
            "re",
            vec![0.0f32.into(), 0.0f32.into(), PAGE_SIZE.into(), PAGE_SIZE.into()],
        ),
        Operation::new("f", vec![]),
        Operation::new("Q", vec![]),
    ];

    if let (Some(placed), Some(name)) = (layout.image, image_name) {
        let rect = placed.rect;
        ops.push(Operation::new("q", vec![]));
        ops.push(Operation::new(
            "cm",
            vec![
                rect.width.into(),
                0.0f32.into(),
                0.0f32.into(),
                rect.height.into(),
                rect.x.into(),
                rect.y.into(),
            ],
        ));
        ops.push(Operation::new("Do", vec![Object::Name(name.as_bytes().to_vec())]));
        ops.push(Operation::new("Q", vec![]));
    }

    for line in &layout.lines {
        ops.push(Operation::new("BT", vec![]));
        ops.push(Operation::new(
            "Tf",
            vec![
                Object::Name(line.font.resource_name().as_bytes().to_vec()),
                line.size.into(),
            ],
        ));
        ops.push(Operation::new("rg", color_operands(layout.text_color)));
        ops.push(Operation::new("Td", vec![line.x.into(), line.y.into()]));
        ops.push(Operation::new(
            "Tj",
            vec![Object::String(encode_win_ansi(&line.text), StringFormat::Literal)],
        ));
        ops.push(Operation::new("ET", vec![]));
    }
    ops
}

fn font_resources(doc: &mut Document) -> Dictionary {
    let mut fonts = Dictionary::new();
    for font in [Font::Bold, Font::Oblique, Font::Regular] {
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => font.base_font(),
            "Encoding" => "WinAnsiEncoding",
        });
        fonts.set(font.resource_name(), font_id);
    }
    fonts
}

/// Embed every story image once; pages that fail to encode get `None`.
fn embed_images(doc: &mut Document, story: &[IllustratedPage]) -> Vec<Option<ObjectId>> {
    story
        .iter()
        .enumerate()
        .map(|(index, page)| match encode_jpeg(&page.image) {
            Ok((width, height, jpeg)) => {
                let stream = Stream::new(
                    dictionary! {
                        "Type" => "XObject",
                        "Subtype" => "Image",
                        "Width" => i64::from(width),
                        "Height" => i64::from(height),
                        "ColorSpace" => "DeviceRGB",
                        "BitsPerComponent" => 8i64,
                        "Filter" => "DCTDecode",
                    },
                    jpeg,
                );
                Some(doc.add_object(stream))
            }
            Err(err) => {
                warn!(
                    page = index + 1,
                    error = %err,
                    "Could not embed illustration; keeping caption only"
                );
                None
            }
        })
        .collect()
}

/// Build the storybook PDF. An empty story still yields cover and back cover.
pub fn assemble(
    subject_name: &str,
    theme_label: &str,
    story: &[IllustratedPage],
) -> Result<Vec<u8>, DocumentError> {
    let layouts = plan_pages(subject_name, theme_label, story);

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let fonts = font_resources(&mut doc);
    let images = embed_images(&mut doc, story);

    let mut kids: Vec<Object> = Vec::with_capacity(layouts.len());
    for layout in &layouts {
        let image_id = layout
            .image
            .and_then(|placed| images.get(placed.story_index).copied().flatten());

        let mut xobjects = Dictionary::new();
        if let Some(image_id) = image_id {
            xobjects.set("Im0", image_id);
        }
        let operations = page_operations(layout, image_id.map(|_| "Im0"));
        let content_id = doc.add_object(Stream::new(
            Dictionary::new(),
            Content { operations }.encode()?,
        ));

        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![Object::Integer(0), Object::Integer(0), PAGE_SIZE.into(), PAGE_SIZE.into()],
            "Contents" => content_id,
            "Resources" => dictionary! {
                "Font" => fonts.clone(),
                "XObject" => xobjects,
            },
        });
        kids.push(page_id.into());
    }

    let page_count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => page_count,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    let info_id = doc.add_object(dictionary! {
        "Title" => Object::string_literal(encode_win_ansi(&cover_title(subject_name, theme_label))),
        "Producer" => Object::string_literal("storybook-generator"),
    });
    doc.trailer.set("Info", info_id);

    let mut buffer = Vec::new();
    doc.save_to(&mut buffer)?;
    info!(
        pages = page_count,
        bytes = buffer.len(),
        "Assembled storybook document"
    );
    Ok(buffer)
}
