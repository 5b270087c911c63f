use std::cmp::Ordering;
use std::ops::Range;
use std::sync::Arc;

use time::OffsetDateTime;

use crate::archive::crc32;
use crate::error::{ContextError, ErrorKind};
use crate::font::FontSet;
use crate::layout::{chunk_rows, paginate_measured, PageGeometry};
use crate::raster::Rasterizer;
use crate::records::{
    AttachmentRef, LogoSource, ProcedureDocument, ProcedureKind, ProjectMeta, SectionData, SectionKey,
    Selection,
};
use crate::render::{render_document, RenderJob, RenderOptions, RenderOutcome};
use crate::scene::{table_body_space, CoverContent, DecodedImage, ImageSource, LaidOutTable, SectionStat};

/// Printed in place of every missing value.
pub const PLACEHOLDER: &str = "-";

/// One section of the document as a plain table of display strings.
#[derive(Debug, Clone, PartialEq)]
pub struct DocTable {
    pub key: SectionKey,
    pub title: String,
    pub columns: Vec<String>,
    /// Relative column widths.
    pub weights: Vec<f64>,
    /// Every row has exactly one cell per column.
    pub rows: Vec<Vec<String>>,
}

impl DocTable {
    fn new(key: SectionKey, columns: &[(&str, f64)]) -> Self {
        DocTable {
            key,
            title: key.title().to_string(),
            columns: columns.iter().map(|(title, _)| title.to_string()).collect(),
            weights: columns.iter().map(|(_, weight)| *weight).collect(),
            rows: Vec::new(),
        }
    }

    fn push_row(&mut self, cells: Vec<String>) {
        debug_assert_eq!(cells.len(), self.columns.len());
        self.rows.push(cells);
    }
}

fn cell(value: &str) -> String {
    let value = value.trim();
    if value.is_empty() {
        PLACEHOLDER.to_string()
    } else {
        value.to_string()
    }
}

fn optional_cell(value: &Option<String>) -> String {
    cell(value.as_deref().unwrap_or_default())
}

fn attachment_cell(attachment: &Option<AttachmentRef>) -> String {
    cell(attachment
        .as_ref()
        .map(|attachment| attachment.file_name.as_str())
        .unwrap_or_default())
}

/// Builds the table of one section from its records.
pub fn build_table(section: SectionKey, data: &SectionData) -> DocTable {
    match section {
        SectionKey::WorkOrder => {
            let mut table = DocTable::new(
                section,
                &[("Work order", 1.2), ("Title", 2.0), ("Customer", 1.5), ("Status", 1.0), ("Due date", 1.0), ("Description", 3.0)],
            );
            for work_order in &data.work_orders {
                table.push_row(vec![
                    cell(&work_order.number),
                    optional_cell(&work_order.title),
                    optional_cell(&work_order.customer),
                    optional_cell(&work_order.status),
                    optional_cell(&work_order.due_date),
                    optional_cell(&work_order.description),
                ]);
            }
            table
        }
        SectionKey::Drawings => {
            let mut table = DocTable::new(
                section,
                &[("Drawing number", 1.5), ("Revision", 0.7), ("Title", 3.0), ("Status", 1.0), ("File", 2.0)],
            );
            for drawing in &data.drawings {
                table.push_row(vec![
                    cell(&drawing.drawing_number),
                    optional_cell(&drawing.revision),
                    optional_cell(&drawing.title),
                    optional_cell(&drawing.status),
                    attachment_cell(&drawing.file),
                ]);
            }
            table
        }
        SectionKey::Traceability => {
            let mut table = DocTable::new(
                section,
                &[("Pos.", 0.6), ("Component", 2.0), ("Material", 1.5), ("Dimension", 1.2), ("Heat number", 1.2), ("Certificate", 1.5)],
            );
            for record in &data.traceability {
                table.push_row(vec![
                    optional_cell(&record.position),
                    optional_cell(&record.component),
                    optional_cell(&record.material),
                    optional_cell(&record.dimension),
                    optional_cell(&record.heat_number),
                    optional_cell(&record.certificate_number),
                ]);
            }
            table
        }
        SectionKey::WeldLog => {
            let mut table = DocTable::new(
                section,
                &[("Weld", 0.8), ("Drawing", 1.2), ("Joint", 0.8), ("Welder", 0.9), ("WPS", 1.0), ("Date", 1.0), ("NDT", 1.2), ("Status", 0.9)],
            );
            for entry in &data.weld_log {
                table.push_row(vec![
                    cell(&entry.weld_number),
                    optional_cell(&entry.drawing_number),
                    optional_cell(&entry.joint_type),
                    optional_cell(&entry.welder_id),
                    optional_cell(&entry.wps_number),
                    optional_cell(&entry.weld_date),
                    optional_cell(&entry.ndt_methods),
                    optional_cell(&entry.status),
                ]);
            }
            table
        }
        SectionKey::Procedures => {
            let mut table = DocTable::new(
                section,
                &[("Type", 0.7), ("Document number", 1.6), ("Revision", 0.8), ("Process", 1.2), ("Material group", 1.4), ("Thickness range", 1.4)],
            );
            for (kind, procedure) in sorted_procedures(data) {
                table.push_row(vec![
                    kind.label().to_string(),
                    cell(&procedure.document_number),
                    optional_cell(&procedure.revision),
                    optional_cell(&procedure.process),
                    optional_cell(&procedure.material_group),
                    optional_cell(&procedure.thickness_range),
                ]);
            }
            table
        }
        SectionKey::InspectionReports => {
            let mut table = DocTable::new(
                section,
                &[("Report number", 1.4), ("Method", 0.9), ("Date", 1.0), ("Inspector", 1.3), ("Result", 1.0), ("Scope", 3.0)],
            );
            for report in &data.inspection_reports {
                table.push_row(vec![
                    cell(&report.report_number),
                    optional_cell(&report.method),
                    optional_cell(&report.inspection_date),
                    optional_cell(&report.inspector),
                    optional_cell(&report.result),
                    optional_cell(&report.scope),
                ]);
            }
            table
        }
    }
}

/// The tables of the selected sections, in canonical order.
pub fn build_tables(selection: &Selection, data: &SectionData) -> Vec<DocTable> {
    selection
        .sections()
        .into_iter()
        .map(|section| build_table(section, data))
        .collect()
}

/// WPS and WPQR documents merged, each tagged with the list it came from, sorted by kind and
/// then by document number.
pub fn sorted_procedures(data: &SectionData) -> Vec<(ProcedureKind, &ProcedureDocument)> {
    let mut procedures: Vec<(ProcedureKind, &ProcedureDocument)> = data
        .wps
        .iter()
        .map(|procedure| (ProcedureKind::Wps, procedure))
        .chain(data.wpqr.iter().map(|procedure| (ProcedureKind::Wpqr, procedure)))
        .collect();
    procedures.sort_by(|(left_kind, left), (right_kind, right)| {
        left_kind
            .cmp(right_kind)
            .then_with(|| natural_cmp(&left.document_number, &right.document_number))
    });
    procedures
}

#[derive(Debug, PartialEq, Eq)]
enum NaturalToken {
    Number(String),
    Text(String),
}

fn natural_tokens(value: &str) -> Vec<NaturalToken> {
    let mut tokens = Vec::new();
    let mut characters = value.chars().peekable();
    while let Some(&first) = characters.peek() {
        let is_digit = first.is_ascii_digit();
        let mut token = String::new();
        while let Some(&character) = characters.peek() {
            if character.is_ascii_digit() != is_digit {
                break;
            }
            token.extend(character.to_lowercase());
            characters.next();
        }
        if is_digit {
            let trimmed = token.trim_start_matches('0');
            tokens.push(NaturalToken::Number(if trimmed.is_empty() { "0".into() } else { trimmed.into() }));
        } else {
            tokens.push(NaturalToken::Text(token));
        }
    }
    tokens
}

/// Case-insensitive ordering where runs of digits compare by their numeric value, so that
/// `WPS-9` sorts before `WPS-10`.
pub fn natural_cmp(left: &str, right: &str) -> Ordering {
    let left_tokens = natural_tokens(left);
    let right_tokens = natural_tokens(right);
    for (left_token, right_token) in left_tokens.iter().zip(&right_tokens) {
        let ordering = match (left_token, right_token) {
            (NaturalToken::Number(left), NaturalToken::Number(right)) => {
                left.len().cmp(&right.len()).then_with(|| left.cmp(right))
            }
            (NaturalToken::Text(left), NaturalToken::Text(right)) => left.cmp(right),
            (NaturalToken::Number(_), NaturalToken::Text(_)) => Ordering::Less,
            (NaturalToken::Text(_), NaturalToken::Number(_)) => Ordering::Greater,
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    left_tokens
        .len()
        .cmp(&right_tokens.len())
        .then_with(|| left.cmp(right))
}

/// How table rows are distributed over pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pagination {
    /// Literal slices of at most this many rows.
    FixedCount(usize),
    /// By measured row height against the space left above the footer.
    Measured,
}

/// One page of the document, before composition.
#[derive(Debug, Clone, PartialEq)]
pub enum PageDescriptor {
    Cover,
    /// Reserved before the sections are laid out, the statistics are filled in afterwards.
    Overview { stats: Vec<SectionStat> },
    TablePart {
        /// Index of the table in the document.
        table: usize,
        /// Index of this page within the section.
        part: usize,
        rows: Range<usize>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct DocumentPlan {
    pub pages: Vec<PageDescriptor>,
    pub stats: Vec<SectionStat>,
}

/// Sequences the pages: the optional cover, the overview, then every table section. The
/// overview slot is reserved first and backfilled once every section knows its pages.
pub fn plan_document(
    cover: bool,
    tables: &[DocTable],
    laid_out: &[LaidOutTable],
    pagination: Pagination,
    geometry: &PageGeometry,
) -> DocumentPlan {
    let mut pages = Vec::new();
    if cover {
        pages.push(PageDescriptor::Cover);
    }
    let overview_index = pages.len();
    pages.push(PageDescriptor::Overview { stats: Vec::new() });

    let mut stats = Vec::with_capacity(tables.len());
    for (index, (table, laid_out_table)) in tables.iter().zip(laid_out).enumerate() {
        let row_ranges = match pagination {
            Pagination::FixedCount(rows_per_page) => {
                let mut start = 0;
                chunk_rows(&laid_out_table.rows, rows_per_page)
                    .into_iter()
                    .map(|chunk| {
                        let range = start..start + chunk.len();
                        start = range.end;
                        range
                    })
                    .collect::<Vec<_>>()
            }
            Pagination::Measured => {
                let heights: Vec<f32> = laid_out_table.rows.iter().map(|row| row.height).collect();
                let space = table_body_space(geometry, laid_out_table.header.height);
                paginate_measured(&heights, space, space)
            }
        };

        let start_page = pages.len() + 1;
        log::debug!(
            "Section {:?} starts on page {} and spans {} pages",
            table.key.key(),
            start_page,
            row_ranges.len()
        );
        stats.push(SectionStat {
            key: table.key.key().to_string(),
            title: table.title.clone(),
            start_page,
            page_count: row_ranges.len(),
            row_count: table.rows.len(),
        });
        for (part, rows) in row_ranges.into_iter().enumerate() {
            pages.push(PageDescriptor::TablePart { table: index, part, rows });
        }
    }

    pages[overview_index] = PageDescriptor::Overview { stats: stats.clone() };

    DocumentPlan { pages, stats }
}

/// `YYYY-MM-DD HH:MM UTC`
pub fn format_generated_at(date: &OffsetDateTime) -> String {
    let date = date.to_offset(time::UtcOffset::UTC);
    format!(
        "{:04}-{:02}-{:02} {:02}:{:02} UTC",
        date.year(),
        u8::from(date.month()),
        date.day(),
        date.hour(),
        date.minute()
    )
}

fn decode_logo(logo: &LogoSource) -> Option<ImageSource> {
    match logo {
        LogoSource::Inline { data } => match DecodedImage::decode(data) {
            Ok(image) => Some(ImageSource::Embedded(Arc::new(image))),
            Err(error) => {
                log::warn!("Leaving the logo out of the cover: {}", error);
                None
            }
        },
        LogoSource::Href { href } => Some(ImageSource::from_href(href)),
    }
}

/// The content of the cover, with the logo already decoded.
pub fn cover_content(project: &ProjectMeta, options: &RenderOptions) -> CoverContent {
    let mut detail_lines = Vec::new();
    if let Some(customer) = project.customer.as_deref().filter(|value| !value.trim().is_empty()) {
        detail_lines.push(format!("Customer: {}", customer.trim()));
    }
    if let Some(work_order) = project.work_order.as_deref().filter(|value| !value.trim().is_empty()) {
        detail_lines.push(format!("Work order: {}", work_order.trim()));
    }
    detail_lines.push(format!("Generated: {}", format_generated_at(&options.generated_at)));

    CoverContent {
        logo: project.logo.as_ref().and_then(decode_logo),
        brand_line: options.brand_line.clone(),
        title: if project.name.trim().is_empty() {
            "Documentation package".to_string()
        } else {
            project.name.trim().to_string()
        },
        project_line: format!("Project {}", cell(&project.project_number)),
        detail_lines,
    }
}

/// Label/value pairs of the overview grid.
pub fn overview_fields(project: &ProjectMeta, tables: &[DocTable], options: &RenderOptions) -> Vec<(String, String)> {
    let total_rows: usize = tables.iter().map(|table| table.rows.len()).sum();
    vec![
        ("Project number".to_string(), cell(&project.project_number)),
        ("Project name".to_string(), cell(&project.name)),
        ("Customer".to_string(), optional_cell(&project.customer)),
        ("Work order".to_string(), optional_cell(&project.work_order)),
        ("Description".to_string(), optional_cell(&project.description)),
        ("Generated".to_string(), format_generated_at(&options.generated_at)),
        ("Sections".to_string(), tables.len().to_string()),
        ("Registered rows".to_string(), total_rows.to_string()),
    ]
}

/// 32 hexadecimal characters derived from the project and the generation time.
pub fn document_identifier(project: &ProjectMeta, generated_at: &OffsetDateTime) -> String {
    let timestamp = generated_at.unix_timestamp().to_string();
    let combined = format!("{}\n{}\n{}", project.project_number, project.name, timestamp);
    format!(
        "{:08x}{:08x}{:08x}{:08x}",
        crc32(project.project_number.as_bytes()),
        crc32(project.name.as_bytes()),
        crc32(timestamp.as_bytes()),
        crc32(combined.as_bytes())
    )
}

/// Compiles the PDF report of the selected sections.
///
/// A selection without any section besides the cover is rejected before anything is laid out.
/// The returned outcome reports which rendering strategy produced the document together with
/// the per-section statistics printed on the overview page.
pub fn compile_document_package(
    project: &ProjectMeta,
    selection: &Selection,
    data: &SectionData,
    options: &RenderOptions,
    fonts: &FontSet,
    rasterizer: &dyn Rasterizer,
) -> Result<RenderOutcome, ContextError> {
    if selection.sections().is_empty() {
        return Err(ContextError::with_context(
            ErrorKind::InvalidSelection,
            "At least one section besides the cover must be selected",
        ));
    }

    let tables = build_tables(selection, data);
    log::info!(
        "Compiling {} sections for project {:?}",
        tables.len(),
        project.project_number
    );

    let job = RenderJob {
        tables: &tables,
        cover: selection.cover.then(|| cover_content(project, options)),
        overview_fields: overview_fields(project, &tables, options),
        footer_label: project.label(),
        title: project.label(),
        identifier: document_identifier(project, &options.generated_at),
        options,
        fonts,
    };
    render_document(&job, rasterizer)
}
