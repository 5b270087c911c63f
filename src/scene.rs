use std::ops::Range;
use std::sync::Arc;

use base64::Engine as _;

use crate::error::{ContextError, ErrorKind};
use crate::font::{FontSet, FontWeight};
use crate::layout::{measure_row, wrap_text, MeasuredRow, PageGeometry, TableStyle};

/// An RGB color with 8 bits per component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Color { r, g, b }
    }

    pub const BLACK: Color = Color::rgb(0, 0, 0);
    pub const WHITE: Color = Color::rgb(255, 255, 255);

    /// Components scaled to the `0.0..=1.0` range used by PDF color operators.
    pub fn components(&self) -> [f32; 3] {
        [self.r, self.g, self.b].map(|component| f32::from(component) / 255.0)
    }
}

const TEXT_COLOR: Color = Color::rgb(33, 37, 41);
const MUTED_COLOR: Color = Color::rgb(108, 117, 125);
const HEADER_FILL: Color = Color::rgb(31, 56, 100);
const ZEBRA_FILL: Color = Color::rgb(243, 246, 250);
const BORDER_COLOR: Color = Color::rgb(191, 198, 208);

/// Height reserved above a table for the section title.
const TITLE_BLOCK_HEIGHT: f32 = 30.0;
const TITLE_FONT_SIZE: f32 = 14.0;
const FOOTER_FONT_SIZE: f32 = 8.0;
const OVERVIEW_LINE_HEIGHT: f32 = 13.0;

/// An image decoded to 8-bit RGBA pixels, with straight (non-premultiplied) alpha.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

impl DecodedImage {
    /// Decodes PNG or JPEG bytes. Decoding is complete when this returns, so the dimensions can
    /// be used for layout right away.
    pub fn decode(bytes: &[u8]) -> Result<Self, ContextError> {
        let decoded = image::load_from_memory(bytes).map_err(|error| {
            ContextError::with_error(ErrorKind::LayoutError, "Unable to decode the image", &error)
        })?;
        let rgba = decoded.to_rgba8();
        let (width, height) = rgba.dimensions();

        Ok(DecodedImage {
            width,
            height,
            rgba: rgba.into_raw(),
        })
    }
}

/// Where the pixels of an image placed on a page come from.
#[derive(Debug, Clone, PartialEq)]
pub enum ImageSource {
    /// Pixels carried by the page itself.
    Embedded(Arc<DecodedImage>),
    /// A reference to a resource outside of the page, which cannot be drawn safely.
    External(String),
}

impl ImageSource {
    /// Inlines `data:` URIs, every other reference stays external.
    pub fn from_href(href: &str) -> ImageSource {
        match parse_data_uri(href).map(|bytes| DecodedImage::decode(&bytes)) {
            Some(Ok(image)) => ImageSource::Embedded(Arc::new(image)),
            Some(Err(error)) => {
                log::warn!("Unable to inline the image data URI: {}", error);
                ImageSource::External(href.to_string())
            }
            None => ImageSource::External(href.to_string()),
        }
    }

    /// Width over height, when the pixels are known.
    fn aspect_ratio(&self) -> Option<f32> {
        match self {
            ImageSource::Embedded(image) if image.height > 0 => {
                Some(image.width as f32 / image.height as f32)
            }
            _ => None,
        }
    }
}

fn parse_data_uri(href: &str) -> Option<Vec<u8>> {
    let (header, payload) = href.strip_prefix("data:")?.split_once(',')?;
    if !header.ends_with(";base64") {
        return None;
    }
    base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .ok()
}

/// One drawing primitive. Coordinates are in points from the top-left corner of the page.
#[derive(Debug, Clone, PartialEq)]
pub enum Element {
    Rect {
        x: f32,
        y: f32,
        width: f32,
        height: f32,
        fill: Option<Color>,
        stroke: Option<(Color, f32)>,
    },
    Rule {
        from: [f32; 2],
        to: [f32; 2],
        color: Color,
        line_width: f32,
    },
    /// A single line of text; `y` is the baseline.
    Text {
        x: f32,
        y: f32,
        text: String,
        font_size: f32,
        weight: FontWeight,
        color: Color,
    },
    Image {
        x: f32,
        y: f32,
        width: f32,
        height: f32,
        source: ImageSource,
    },
}

/// A fully composed page, the common input of both rendering strategies.
#[derive(Debug, Clone, PartialEq)]
pub struct Scene {
    pub width: f32,
    pub height: f32,
    pub elements: Vec<Element>,
}

impl Scene {
    pub fn new(geometry: &PageGeometry) -> Self {
        Scene {
            width: geometry.width,
            height: geometry.height,
            elements: Vec::new(),
        }
    }

    pub fn push(&mut self, element: Element) {
        self.elements.push(element);
    }

    /// Removes every image from the page, returning how many were removed.
    pub fn strip_images(&mut self) -> usize {
        let before = self.elements.len();
        self.elements
            .retain(|element| !matches!(element, Element::Image { .. }));
        before - self.elements.len()
    }

    fn text(&mut self, x: f32, y: f32, text: &str, font_size: f32, weight: FontWeight, color: Color) {
        if text.is_empty() {
            return;
        }
        self.push(Element::Text {
            x,
            y,
            text: text.to_string(),
            font_size,
            weight,
            color,
        });
    }

    fn centered_text(
        &mut self,
        fonts: &FontSet,
        center_x: f32,
        y: f32,
        text: &str,
        font_size: f32,
        weight: FontWeight,
        color: Color,
    ) {
        let width = fonts.get(weight).text_width(text, font_size);
        self.text(center_x - width / 2.0, y, text, font_size, weight, color);
    }
}

/// Label and page numbering printed at the bottom of every page but the cover.
#[derive(Debug, Clone, PartialEq)]
pub struct Footer {
    pub label: String,
    pub page_number: usize,
    pub page_count: usize,
}

/// What the cover page shows, independent of the rendering strategy.
#[derive(Debug, Clone, PartialEq)]
pub struct CoverContent {
    pub logo: Option<ImageSource>,
    pub brand_line: String,
    pub title: String,
    pub project_line: String,
    pub detail_lines: Vec<String>,
}

/// The statistics of one section, as listed on the overview page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionStat {
    pub key: String,
    pub title: String,
    /// 1-based number of the first page of the section.
    pub start_page: usize,
    pub page_count: usize,
    pub row_count: usize,
}

/// A table with its column widths and every row already wrapped.
#[derive(Debug, Clone, PartialEq)]
pub struct LaidOutTable {
    pub title: String,
    pub widths: Vec<u32>,
    pub header: MeasuredRow,
    pub rows: Vec<MeasuredRow>,
}

impl LaidOutTable {
    /// Wraps the header with the bold font and the body with the regular font.
    pub fn new(
        title: &str,
        columns: &[String],
        rows: &[Vec<String>],
        widths: Vec<u32>,
        fonts: &FontSet,
        style: &TableStyle,
    ) -> Result<Self, ContextError> {
        let header = measure_row(columns, &widths, &fonts.bold, style)?;
        let rows = rows
            .iter()
            .map(|row| measure_row(row, &widths, &fonts.regular, style))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(LaidOutTable {
            title: title.to_string(),
            widths,
            header,
            rows,
        })
    }
}

/// Vertical space left for table rows below the section title and the header row.
pub fn table_body_space(geometry: &PageGeometry, header_height: f32) -> f32 {
    geometry.content_bottom() - geometry.margin_top - TITLE_BLOCK_HEIGHT - header_height
}

pub fn compose_cover(cover: &CoverContent, fonts: &FontSet, geometry: &PageGeometry) -> Scene {
    const LOGO_MAX_WIDTH: f32 = 200.0;
    const LOGO_MAX_HEIGHT: f32 = 90.0;

    let mut scene = Scene::new(geometry);
    let center_x = geometry.width / 2.0;
    let mut cursor = geometry.margin_top + 70.0;

    if let Some(logo) = &cover.logo {
        let (width, height) = match logo.aspect_ratio() {
            Some(ratio) if ratio >= LOGO_MAX_WIDTH / LOGO_MAX_HEIGHT => {
                (LOGO_MAX_WIDTH, LOGO_MAX_WIDTH / ratio)
            }
            Some(ratio) => (LOGO_MAX_HEIGHT * ratio, LOGO_MAX_HEIGHT),
            None => (LOGO_MAX_WIDTH, LOGO_MAX_HEIGHT),
        };
        scene.push(Element::Image {
            x: center_x - width / 2.0,
            y: cursor,
            width,
            height,
            source: logo.clone(),
        });
        cursor += height + 40.0;
    } else {
        cursor += 60.0;
    }

    scene.centered_text(fonts, center_x, cursor, &cover.brand_line, 11.0, FontWeight::Regular, MUTED_COLOR);
    cursor += 44.0;

    let title_lines = wrap_text(&cover.title, &fonts.bold, 26.0, geometry.content_width())
        .unwrap_or_else(|_| vec![cover.title.clone()]);
    for line in &title_lines {
        scene.centered_text(fonts, center_x, cursor, line, 26.0, FontWeight::Bold, TEXT_COLOR);
        cursor += 32.0;
    }
    cursor += 8.0;

    scene.centered_text(fonts, center_x, cursor, &cover.project_line, 14.0, FontWeight::Bold, HEADER_FILL);
    cursor += 22.0;
    scene.push(Element::Rule {
        from: [center_x - 120.0, cursor],
        to: [center_x + 120.0, cursor],
        color: BORDER_COLOR,
        line_width: 0.75,
    });
    cursor += 28.0;

    for line in &cover.detail_lines {
        scene.centered_text(fonts, center_x, cursor, line, 11.0, FontWeight::Regular, TEXT_COLOR);
        cursor += 18.0;
    }

    scene
}

pub fn compose_overview(
    fields: &[(String, String)],
    stats: &[SectionStat],
    footer: &Footer,
    fonts: &FontSet,
    geometry: &PageGeometry,
    style: &TableStyle,
) -> Result<Scene, ContextError> {
    let mut scene = Scene::new(geometry);
    let left = geometry.margin_left;
    let mut cursor = geometry.margin_top + 18.0;
    scene.text(left, cursor, "Overview", 18.0, FontWeight::Bold, TEXT_COLOR);
    cursor += 26.0;

    // Two columns of label/value pairs; a grid row is as tall as its longest value
    let column_width = geometry.content_width() / 2.0;
    for pair in fields.chunks(2) {
        let mut line_count = 1;
        for (column, (label, value)) in pair.iter().enumerate() {
            let x = left + column as f32 * column_width;
            scene.text(x, cursor, label, 8.0, FontWeight::Bold, MUTED_COLOR);
            let lines = wrap_text(value, &fonts.regular, 10.5, column_width - 12.0)?;
            for (line_index, line) in lines.iter().enumerate() {
                let y = cursor + OVERVIEW_LINE_HEIGHT * (line_index + 1) as f32;
                scene.text(x, y, line, 10.5, FontWeight::Regular, TEXT_COLOR);
            }
            line_count = line_count.max(lines.len());
        }
        cursor += OVERVIEW_LINE_HEIGHT * line_count as f32 + 19.0;
    }
    cursor += 14.0;

    scene.text(left, cursor, "Contents", 12.0, FontWeight::Bold, TEXT_COLOR);
    cursor += 10.0;

    let columns = ["Section", "Start page", "Pages", "Rows"].map(String::from);
    let rows: Vec<Vec<String>> = stats
        .iter()
        .map(|stat| {
            vec![
                stat.title.clone(),
                stat.start_page.to_string(),
                stat.page_count.to_string(),
                stat.row_count.to_string(),
            ]
        })
        .collect();
    let widths = crate::layout::column_widths(geometry.table_width(), &[5.0, 1.0, 1.0, 1.0]);
    let table = LaidOutTable::new("Contents", &columns, &rows, widths, fonts, style)?;
    draw_table(&mut scene, fonts, style, left, cursor, &table, 0..table.rows.len());

    draw_footer(&mut scene, footer, fonts, geometry);
    Ok(scene)
}

/// One page of a table section. `part` is the 0-based index of the page within the section.
pub fn compose_table_page(
    table: &LaidOutTable,
    rows: Range<usize>,
    part: usize,
    footer: &Footer,
    fonts: &FontSet,
    geometry: &PageGeometry,
    style: &TableStyle,
) -> Scene {
    let mut scene = Scene::new(geometry);
    let left = geometry.margin_left;
    let title = if part == 0 {
        table.title.clone()
    } else {
        format!("{} (continued)", table.title)
    };
    scene.text(left, geometry.margin_top + TITLE_FONT_SIZE, &title, TITLE_FONT_SIZE, FontWeight::Bold, TEXT_COLOR);

    let top = geometry.margin_top + TITLE_BLOCK_HEIGHT;
    let bottom = draw_table(&mut scene, fonts, style, left, top, table, rows);
    if table.rows.is_empty() {
        scene.text(
            left + style.horizontal_padding,
            bottom + 18.0,
            "No rows registered for this section.",
            style.font_size + 1.0,
            FontWeight::Regular,
            MUTED_COLOR,
        );
    }

    draw_footer(&mut scene, footer, fonts, geometry);
    scene
}

/// Draws the header row and the given body rows, returning the y coordinate below the table.
fn draw_table(
    scene: &mut Scene,
    fonts: &FontSet,
    style: &TableStyle,
    x: f32,
    y: f32,
    table: &LaidOutTable,
    rows: Range<usize>,
) -> f32 {
    let mut cursor = y;
    draw_row(scene, fonts, style, x, cursor, &table.widths, &table.header, Some(HEADER_FILL), Color::WHITE, FontWeight::Bold);
    cursor += table.header.height;

    for (index, row) in table.rows[rows].iter().enumerate() {
        let fill = (index % 2 == 1).then_some(ZEBRA_FILL);
        draw_row(scene, fonts, style, x, cursor, &table.widths, row, fill, TEXT_COLOR, FontWeight::Regular);
        cursor += row.height;
    }

    cursor
}

#[allow(clippy::too_many_arguments)]
fn draw_row(
    scene: &mut Scene,
    fonts: &FontSet,
    style: &TableStyle,
    x: f32,
    y: f32,
    widths: &[u32],
    row: &MeasuredRow,
    fill: Option<Color>,
    text_color: Color,
    weight: FontWeight,
) {
    let ascent = fonts.get(weight).ascent(style.font_size);
    let mut cell_x = x;
    for (lines, width) in row.cells.iter().zip(widths) {
        let width = *width as f32;
        scene.push(Element::Rect {
            x: cell_x,
            y,
            width,
            height: row.height,
            fill,
            stroke: Some((BORDER_COLOR, 0.5)),
        });
        for (index, line) in lines.iter().enumerate() {
            let baseline = y + style.vertical_padding + ascent + index as f32 * style.line_height;
            scene.text(cell_x + style.horizontal_padding, baseline, line, style.font_size, weight, text_color);
        }
        cell_x += width;
    }
}

fn draw_footer(scene: &mut Scene, footer: &Footer, fonts: &FontSet, geometry: &PageGeometry) {
    let rule_y = geometry.content_bottom() + 6.0;
    scene.push(Element::Rule {
        from: [geometry.margin_left, rule_y],
        to: [geometry.width - geometry.margin_right, rule_y],
        color: BORDER_COLOR,
        line_width: 0.5,
    });

    let baseline = geometry.height - geometry.margin_bottom - 4.0;
    scene.text(geometry.margin_left, baseline, &footer.label, FOOTER_FONT_SIZE, FontWeight::Regular, MUTED_COLOR);
    let numbering = format!("Page {} of {}", footer.page_number, footer.page_count);
    let width = fonts.regular.text_width(&numbering, FOOTER_FONT_SIZE);
    scene.text(
        geometry.width - geometry.margin_right - width,
        baseline,
        &numbering,
        FOOTER_FONT_SIZE,
        FontWeight::Regular,
        MUTED_COLOR,
    );
}
