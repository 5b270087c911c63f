use std::ops::Range;

use crate::error::{ContextError, ErrorKind};
use crate::font::FontFace;

/// Fixed geometry shared by every page of the document, in points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageGeometry {
    pub width: f32,
    pub height: f32,
    pub margin_top: f32,
    pub margin_bottom: f32,
    pub margin_left: f32,
    pub margin_right: f32,
    /// Band reserved above the bottom margin for the page footer.
    pub footer_height: f32,
}

impl PageGeometry {
    /// Landscape A4.
    pub const LANDSCAPE_A4: PageGeometry = PageGeometry {
        width: 841.89,
        height: 595.28,
        margin_top: 36.0,
        margin_bottom: 36.0,
        margin_left: 36.0,
        margin_right: 36.0,
        footer_height: 24.0,
    };

    pub fn content_width(&self) -> f32 {
        self.width - self.margin_left - self.margin_right
    }

    /// Width available to tables, rounded down to whole points so column widths stay integral.
    pub fn table_width(&self) -> u32 {
        self.content_width().max(0.0).floor() as u32
    }

    /// Lowest y coordinate (from the top of the page) content may reach before the footer band.
    pub fn content_bottom(&self) -> f32 {
        self.height - self.margin_bottom - self.footer_height
    }
}

impl Default for PageGeometry {
    fn default() -> Self {
        PageGeometry::LANDSCAPE_A4
    }
}

/// Typographic settings of the table sections.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TableStyle {
    pub font_size: f32,
    pub line_height: f32,
    pub vertical_padding: f32,
    pub horizontal_padding: f32,
    pub min_row_height: f32,
}

impl Default for TableStyle {
    fn default() -> Self {
        TableStyle {
            font_size: 8.5,
            line_height: 10.5,
            vertical_padding: 4.0,
            horizontal_padding: 4.0,
            min_row_height: 18.0,
        }
    }
}

impl TableStyle {
    /// `max(min_row_height, lines * line_height + 2 * vertical_padding)`
    pub fn row_height(&self, line_count: usize) -> f32 {
        (line_count as f32 * self.line_height + 2.0 * self.vertical_padding)
            .max(self.min_row_height)
    }
}

/// Splits `table_width` proportionally to the weights. Every column but the last gets the floor
/// of its share and the last one absorbs the remainder, so the widths always sum to
/// `table_width` exactly.
pub fn column_widths(table_width: u32, weights: &[f64]) -> Vec<u32> {
    if weights.is_empty() {
        return Vec::new();
    }
    let weights: Vec<f64> = weights
        .iter()
        .map(|weight| if weight.is_finite() && *weight > 0.0 { *weight } else { 0.0 })
        .collect();
    let total: f64 = weights.iter().sum();
    let weights = if total > 0.0 {
        weights
    } else {
        vec![1.0; weights.len()]
    };
    let total: f64 = weights.iter().sum();

    let mut widths = Vec::with_capacity(weights.len());
    let mut allocated: u32 = 0;
    for weight in &weights[..weights.len() - 1] {
        let width = ((f64::from(table_width) * weight / total).floor() as u32)
            .min(table_width - allocated);
        allocated += width;
        widths.push(width);
    }
    widths.push(table_width - allocated);

    widths
}

/// Wraps the text into lines no wider than `max_width` when set in `font` at `font_size`.
///
/// Explicit newlines start new paragraphs and an empty paragraph still yields an empty line.
/// Words are placed greedily; a word wider than the line is broken between characters, placing
/// at least one character per line, so the result never drops text even when a single character
/// is wider than `max_width`.
pub fn wrap_text(
    text: &str,
    font: &FontFace,
    font_size: f32,
    max_width: f32,
) -> Result<Vec<String>, ContextError> {
    if !(max_width.is_finite() && max_width > 0.0) {
        return Err(ContextError::with_context(
            ErrorKind::LayoutError,
            format!("Unable to place {:?} in a line {} points wide", text, max_width),
        ));
    }
    let fits = |candidate: &str| font.text_width(candidate, font_size) <= max_width;

    let mut lines = Vec::new();
    for paragraph in text.replace("\r\n", "\n").split('\n') {
        let mut line = String::new();
        for word in paragraph.split_whitespace() {
            let candidate = if line.is_empty() {
                word.to_string()
            } else {
                format!("{line} {word}")
            };
            if fits(&candidate) {
                line = candidate;
                continue;
            }
            if !line.is_empty() {
                lines.push(std::mem::take(&mut line));
            }
            if fits(word) {
                line = word.to_string();
                continue;
            }
            for character in word.chars() {
                let mut candidate = line.clone();
                candidate.push(character);
                if line.is_empty() || fits(&candidate) {
                    line = candidate;
                } else {
                    lines.push(std::mem::replace(&mut line, character.to_string()));
                }
            }
        }
        lines.push(line);
    }

    Ok(lines)
}

/// Fixed-size slices of the rows. An empty table still produces one (empty) chunk, so that the
/// section gets a page of its own.
pub fn chunk_rows<T>(rows: &[T], rows_per_page: usize) -> Vec<&[T]> {
    if rows.is_empty() {
        return vec![rows];
    }
    rows.chunks(rows_per_page.max(1)).collect()
}

/// A table row wrapped into its columns.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasuredRow {
    /// The wrapped lines of every cell.
    pub cells: Vec<Vec<String>>,
    pub height: f32,
}

/// Wraps every cell of the row into its column and computes the row height from the tallest cell.
pub fn measure_row(
    cells: &[String],
    widths: &[u32],
    font: &FontFace,
    style: &TableStyle,
) -> Result<MeasuredRow, ContextError> {
    let mut wrapped_cells = Vec::with_capacity(cells.len());
    for (cell, width) in cells.iter().zip(widths) {
        let available = (*width as f32 - 2.0 * style.horizontal_padding).max(1.0);
        wrapped_cells.push(wrap_text(cell, font, style.font_size, available)?);
    }
    let line_count = wrapped_cells.iter().map(Vec::len).max().unwrap_or(1);

    Ok(MeasuredRow {
        cells: wrapped_cells,
        height: style.row_height(line_count),
    })
}

/// Groups consecutive rows into pages by their measured height. A row that would cross the
/// available space starts a new page; a row taller than a whole page is still placed alone on
/// its own page. The first page may have less space (it carries the section title).
pub fn paginate_measured(
    row_heights: &[f32],
    first_page_space: f32,
    page_space: f32,
) -> Vec<Range<usize>> {
    let mut pages = Vec::new();
    let mut start = 0;
    let mut used = 0.0;
    let mut space = first_page_space;

    for (index, height) in row_heights.iter().enumerate() {
        if index > start && used + height > space {
            pages.push(start..index);
            start = index;
            used = 0.0;
            space = page_space;
        }
        used += height;
    }
    pages.push(start..row_heights.len());

    pages
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::font::BuiltinFont;
    use proptest::prelude::*;

    fn helvetica() -> FontFace {
        FontFace::Builtin(BuiltinFont::Helvetica)
    }

    #[test]
    fn column_widths_floor_all_but_the_last() {
        assert_eq!(column_widths(100, &[1.0, 1.0, 1.0]), vec![33, 33, 34]);
        assert_eq!(column_widths(769, &[2.0, 1.0]), vec![512, 257]);
        assert_eq!(column_widths(10, &[0.0, 0.0]), vec![5, 5]);
        assert_eq!(column_widths(10, &[]), Vec::<u32>::new());
        assert_eq!(column_widths(10, &[f64::NAN, 1.0]), vec![0, 10]);
    }

    #[test]
    fn wrap_text_keeps_short_text_on_one_line() {
        let lines = wrap_text("Weld 12", &helvetica(), 10.0, 200.0).unwrap();
        assert_eq!(lines, vec!["Weld 12"]);
    }

    #[test]
    fn wrap_text_breaks_between_words() {
        // "aaaa" is 22.24pt wide at 10pt, two words do not fit in 30pt
        let lines = wrap_text("aaaa aaaa aaaa", &helvetica(), 10.0, 30.0).unwrap();
        assert_eq!(lines, vec!["aaaa", "aaaa", "aaaa"]);
    }

    #[test]
    fn wrap_text_preserves_paragraphs_and_blank_lines() {
        let lines = wrap_text("first\r\n\nsecond", &helvetica(), 10.0, 200.0).unwrap();
        assert_eq!(lines, vec!["first", "", "second"]);
        assert_eq!(wrap_text("", &helvetica(), 10.0, 50.0).unwrap(), vec![""]);
    }

    #[test]
    fn wrap_text_splits_long_words_by_character() {
        // Each "a" is 5.56pt wide at 10pt, so three fit in 17pt
        let lines = wrap_text("aaaaaaa", &helvetica(), 10.0, 17.0).unwrap();
        assert_eq!(lines, vec!["aaa", "aaa", "a"]);
    }

    #[test]
    fn wrap_text_places_one_character_per_line_when_nothing_fits() {
        let lines = wrap_text("abc", &helvetica(), 10.0, 0.5).unwrap();
        assert_eq!(lines, vec!["a", "b", "c"]);
    }

    #[test]
    fn wrap_text_rejects_unusable_widths() {
        for width in [0.0, -3.0, f32::NAN] {
            let error = wrap_text("x", &helvetica(), 10.0, width).unwrap_err();
            assert_eq!(error.kind, ErrorKind::LayoutError);
        }
    }

    #[test]
    fn chunk_rows_slices_by_count() {
        let rows: Vec<u32> = (0..7).collect();
        let chunks = chunk_rows(&rows, 3);
        assert_eq!(chunks, vec![&[0, 1, 2][..], &[3, 4, 5][..], &[6][..]]);
        let empty: Vec<u32> = Vec::new();
        assert_eq!(chunk_rows(&empty, 3).len(), 1);
        assert_eq!(chunk_rows(&rows, 0).len(), 7);
    }

    #[test]
    fn row_height_respects_the_minimum() {
        let style = TableStyle::default();
        assert_eq!(style.row_height(1), style.min_row_height);
        assert_eq!(style.row_height(3), 3.0 * 10.5 + 8.0);
    }

    #[test]
    fn measure_row_uses_the_tallest_cell() {
        let style = TableStyle::default();
        let cells = vec!["short".to_string(), "one\ntwo\nthree".to_string()];
        let measured = measure_row(&cells, &[100, 100], &helvetica(), &style).unwrap();
        assert_eq!(measured.cells[1].len(), 3);
        assert_eq!(measured.height, style.row_height(3));
    }

    #[test]
    fn paginate_measured_moves_overflowing_rows() {
        let pages = paginate_measured(&[10.0, 10.0, 10.0, 10.0], 25.0, 30.0);
        assert_eq!(pages, vec![0..2, 2..4]);
        let pages = paginate_measured(&[50.0, 5.0], 20.0, 20.0);
        assert_eq!(pages, vec![0..1, 1..2]);
        assert_eq!(paginate_measured(&[], 20.0, 20.0), vec![0..0]);
    }

    proptest! {
        #[test]
        fn column_widths_always_sum_to_the_table_width(
            weights in prop::collection::vec(0.0f64..50.0, 1..16),
            extra in 0u32..5000,
        ) {
            let table_width = weights.len() as u32 + extra;
            let widths = column_widths(table_width, &weights);
            prop_assert_eq!(widths.len(), weights.len());
            prop_assert_eq!(widths.iter().sum::<u32>(), table_width);
        }

        #[test]
        fn wrap_text_never_loses_characters(
            text in "[a-zA-Z0-9 ]{0,80}",
            max_width in 0.1f32..120.0,
        ) {
            let lines = wrap_text(&text, &helvetica(), 10.0, max_width).unwrap();
            prop_assert!(!lines.is_empty());
            let original: String = text.split_whitespace().collect();
            let wrapped: String = lines.concat().split_whitespace().collect();
            prop_assert_eq!(original, wrapped);
        }
    }
}
