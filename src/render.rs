use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::assemble::{plan_document, DocTable, DocumentPlan, PageDescriptor, Pagination};
use crate::error::{ContextError, ErrorKind};
use crate::font::FontSet;
use crate::layout::{column_widths, PageGeometry, TableStyle};
use crate::pdf::{DocumentInfo, ImageXObject, PdfDocument};
use crate::raster::{RasterError, RasterImage, Rasterizer};
use crate::scene::{
    compose_cover, compose_overview, compose_table_page, CoverContent, Element, Footer,
    ImageSource, LaidOutTable, Scene, SectionStat,
};

/// Which strategy produced the document.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum RenderStrategy {
    /// Every page is a full-bleed raster image.
    Rasterized,
    /// Every page is drawn with vector primitives and text.
    Native,
}

/// Settings of one compile.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderOptions {
    pub geometry: PageGeometry,
    pub table_style: TableStyle,
    /// Rows per page under the rasterized strategy.
    pub rows_per_page: usize,
    /// Try the rasterized strategy first.
    pub rasterize: bool,
    pub brand_line: String,
    pub generated_at: OffsetDateTime,
}

impl RenderOptions {
    pub fn new(generated_at: OffsetDateTime) -> Self {
        RenderOptions {
            geometry: PageGeometry::default(),
            table_style: TableStyle::default(),
            rows_per_page: 14,
            rasterize: true,
            brand_line: "Document Package".to_string(),
            generated_at,
        }
    }
}

/// Everything the renderer needs, independent of the records it was built from.
pub struct RenderJob<'a> {
    pub tables: &'a [DocTable],
    pub cover: Option<CoverContent>,
    pub overview_fields: Vec<(String, String)>,
    pub footer_label: String,
    pub title: String,
    /// 32 characters, the first part of the PDF `ID`.
    pub identifier: String,
    pub options: &'a RenderOptions,
    pub fonts: &'a FontSet,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderOutcome {
    pub pdf: Vec<u8>,
    pub strategy: RenderStrategy,
    pub stats: Vec<SectionStat>,
    pub page_count: usize,
    /// Whether the images were stripped after the page surface got tainted.
    pub images_stripped: bool,
}

/// Renders the whole document, rasterized when possible and natively otherwise.
///
/// A tainted page surface is retried once with every image removed from every page. Any
/// further rasterization failure regenerates the whole document with native drawing, so that
/// rasterized and native pages are never mixed. A failure of the native drawing is fatal.
pub fn render_document(
    job: &RenderJob,
    rasterizer: &dyn Rasterizer,
) -> Result<RenderOutcome, ContextError> {
    let laid_out = lay_out_tables(job)?;

    if job.options.rasterize {
        match render_rasterized(job, &laid_out, rasterizer) {
            Ok(outcome) => {
                log::info!("Rendered {} rasterized pages", outcome.page_count);
                return Ok(outcome);
            }
            Err(error) => log::warn!(
                "Falling back to native drawing for the whole document: {}",
                error
            ),
        }
    } else {
        log::debug!("Rasterization is disabled, drawing natively");
    }

    let outcome = render_native(job, &laid_out)
        .map_err(|error| error.into_kind(ErrorKind::RasterizationFatal))?;
    log::info!("Rendered {} native pages", outcome.page_count);
    Ok(outcome)
}

/// Widths and wrapped rows of every table. Both strategies draw the same wrapped cells.
fn lay_out_tables(job: &RenderJob) -> Result<Vec<LaidOutTable>, ContextError> {
    let table_width = job.options.geometry.table_width();
    job.tables
        .iter()
        .map(|table| {
            LaidOutTable::new(
                &table.title,
                &table.columns,
                &table.rows,
                column_widths(table_width, &table.weights),
                job.fonts,
                &job.options.table_style,
            )
        })
        .collect()
}

fn compose_pages(
    job: &RenderJob,
    laid_out: &[LaidOutTable],
    plan: &DocumentPlan,
) -> Result<Vec<Scene>, ContextError> {
    let geometry = &job.options.geometry;
    let style = &job.options.table_style;
    let page_count = plan.pages.len();

    plan.pages
        .iter()
        .enumerate()
        .map(|(index, descriptor)| {
            let footer = Footer {
                label: job.footer_label.clone(),
                page_number: index + 1,
                page_count,
            };
            match descriptor {
                PageDescriptor::Cover => {
                    let cover = job.cover.as_ref().ok_or_else(|| {
                        ContextError::with_context(ErrorKind::PdfError, "The cover page has no content")
                    })?;
                    Ok(compose_cover(cover, job.fonts, geometry))
                }
                PageDescriptor::Overview { stats } => {
                    compose_overview(&job.overview_fields, stats, &footer, job.fonts, geometry, style)
                }
                PageDescriptor::TablePart { table, part, rows } => {
                    let table = laid_out.get(*table).ok_or_else(|| {
                        ContextError::with_context(
                            ErrorKind::PdfError,
                            format!("Page {} refers to a missing table", index + 1),
                        )
                    })?;
                    Ok(compose_table_page(table, rows.clone(), *part, &footer, job.fonts, geometry, style))
                }
            }
        })
        .collect()
}

fn rasterize_pages(
    scenes: &[Scene],
    fonts: &FontSet,
    rasterizer: &dyn Rasterizer,
) -> Result<Vec<RasterImage>, RasterError> {
    scenes
        .iter()
        .map(|scene| rasterizer.render_page(scene, fonts))
        .collect()
}

fn rasterization_error(error: RasterError) -> ContextError {
    ContextError::with_error(
        ErrorKind::RasterizationError,
        "Unable to rasterize the document",
        &error,
    )
}

fn render_rasterized(
    job: &RenderJob,
    laid_out: &[LaidOutTable],
    rasterizer: &dyn Rasterizer,
) -> Result<RenderOutcome, ContextError> {
    let geometry = &job.options.geometry;
    let plan = plan_document(
        job.cover.is_some(),
        job.tables,
        laid_out,
        Pagination::FixedCount(job.options.rows_per_page),
        geometry,
    );
    let mut scenes = compose_pages(job, laid_out, &plan)?;

    let mut images_stripped = false;
    let rasters = match rasterize_pages(&scenes, job.fonts, rasterizer) {
        Ok(rasters) => rasters,
        Err(RasterError::Tainted(reason)) => {
            log::warn!("Page surface tainted ({}), retrying once without images", reason);
            let stripped: usize = scenes.iter_mut().map(Scene::strip_images).sum();
            log::debug!("Stripped {} images from the document", stripped);
            images_stripped = true;
            rasterize_pages(&scenes, job.fonts, rasterizer).map_err(rasterization_error)?
        }
        Err(error) => return Err(rasterization_error(error)),
    };

    let mut document = PdfDocument::new(job.identifier.clone(), job.fonts);
    for raster in rasters {
        let page = document.add_page(geometry.width, geometry.height);
        document.place_image(
            page,
            ImageXObject::from_raster(raster),
            [0.0, 0.0, geometry.width, geometry.height],
        )?;
    }

    Ok(RenderOutcome {
        pdf: finish_document(document, job)?,
        strategy: RenderStrategy::Rasterized,
        page_count: plan.pages.len(),
        stats: plan.stats,
        images_stripped,
    })
}

fn render_native(job: &RenderJob, laid_out: &[LaidOutTable]) -> Result<RenderOutcome, ContextError> {
    let geometry = &job.options.geometry;
    let plan = plan_document(job.cover.is_some(), job.tables, laid_out, Pagination::Measured, geometry);
    let scenes = compose_pages(job, laid_out, &plan)?;

    let mut document = PdfDocument::new(job.identifier.clone(), job.fonts);
    for scene in &scenes {
        let page = document.add_page(scene.width, scene.height);
        draw_scene(&mut document, page, scene)?;
    }

    Ok(RenderOutcome {
        pdf: finish_document(document, job)?,
        strategy: RenderStrategy::Native,
        page_count: plan.pages.len(),
        stats: plan.stats,
        images_stripped: false,
    })
}

/// Draws the scene with vector primitives, flipping it into PDF user space.
fn draw_scene(document: &mut PdfDocument, page: usize, scene: &Scene) -> Result<(), ContextError> {
    let flip = |y: f32| scene.height - y;

    for element in &scene.elements {
        match element {
            Element::Rect {
                x,
                y,
                width,
                height,
                fill,
                stroke,
            } => {
                let rect = [*x, flip(y + height), *width, *height];
                if let Some(fill) = fill {
                    document.fill_rect(page, rect, *fill)?;
                }
                if let Some((color, line_width)) = stroke {
                    document.stroke_rect(page, rect, *color, *line_width)?;
                }
            }
            Element::Rule {
                from,
                to,
                color,
                line_width,
            } => {
                document.draw_line(
                    page,
                    [from[0], flip(from[1])],
                    [to[0], flip(to[1])],
                    *color,
                    *line_width,
                )?;
            }
            Element::Text {
                x,
                y,
                text,
                font_size,
                weight,
                color,
            } => {
                document.write_text(page, text, *weight, *font_size, *color, [*x, flip(*y)])?;
            }
            Element::Image {
                x,
                y,
                width,
                height,
                source,
            } => match source {
                ImageSource::Embedded(image) => {
                    document.place_image(
                        page,
                        ImageXObject::from_decoded(image),
                        [*x, flip(y + height), *width, *height],
                    )?;
                }
                ImageSource::External(href) => {
                    log::warn!("Leaving out the external image {:?}", href);
                }
            },
        }
    }

    Ok(())
}

fn finish_document(mut document: PdfDocument, job: &RenderJob) -> Result<Vec<u8>, ContextError> {
    document.write_all(&DocumentInfo {
        title: job.title.clone(),
        subject: "Documentation package".to_string(),
        creation_date: job.options.generated_at,
        instance_id: format!("{:032x}", job.options.generated_at.unix_timestamp()),
    })?;
    document.optimize();
    document.save_to_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assemble::build_tables;
    use crate::records::{Drawing, SectionData, Selection};
    use crate::scene::DecodedImage;
    use std::cell::RefCell;
    use std::sync::Arc;

    /// Fails every page with the configured error and counts the calls.
    struct ScriptedRasterizer {
        results: RefCell<Vec<Result<(), RasterError>>>,
        calls: RefCell<usize>,
    }

    impl ScriptedRasterizer {
        fn new(results: Vec<Result<(), RasterError>>) -> Self {
            ScriptedRasterizer {
                results: RefCell::new(results),
                calls: RefCell::new(0),
            }
        }
    }

    impl Rasterizer for ScriptedRasterizer {
        fn render_page(&self, scene: &Scene, _fonts: &FontSet) -> Result<RasterImage, RasterError> {
            *self.calls.borrow_mut() += 1;
            let mut results = self.results.borrow_mut();
            let result = if results.len() > 1 {
                results.remove(0)
            } else {
                results[0].clone()
            };
            result.map(|_| RasterImage {
                width: 4,
                height: 3,
                rgb: vec![u8::from(scene.elements.is_empty()); 4 * 3 * 3],
            })
        }
    }

    fn job_parts() -> (Vec<DocTable>, RenderOptions) {
        let selection = Selection {
            drawings: true,
            ..Selection::default()
        };
        let data = SectionData {
            drawings: vec![Drawing {
                drawing_number: "D-1".into(),
                ..Drawing::default()
            }],
            ..SectionData::default()
        };
        (
            build_tables(&selection, &data),
            RenderOptions::new(OffsetDateTime::from_unix_timestamp(1_710_498_642).unwrap()),
        )
    }

    fn job<'a>(tables: &'a [DocTable], options: &'a RenderOptions, fonts: &'a FontSet) -> RenderJob<'a> {
        RenderJob {
            tables,
            cover: Some(CoverContent {
                logo: Some(ImageSource::Embedded(Arc::new(DecodedImage {
                    width: 1,
                    height: 1,
                    rgba: vec![0, 0, 0, 255],
                }))),
                brand_line: "Document Package".into(),
                title: "Bridge".into(),
                project_line: "Project P-100".into(),
                detail_lines: vec![],
            }),
            overview_fields: vec![("Project number".into(), "P-100".into())],
            footer_label: "P-100 - Bridge".into(),
            title: "P-100 - Bridge".into(),
            identifier: "0".repeat(32),
            options,
            fonts,
        }
    }

    #[test]
    fn rasterized_pages_are_full_bleed_images() {
        let (tables, options) = job_parts();
        let fonts = FontSet::builtin();
        let rasterizer = ScriptedRasterizer::new(vec![Ok(())]);
        let outcome = render_document(&job(&tables, &options, &fonts), &rasterizer).unwrap();
        assert_eq!(outcome.strategy, RenderStrategy::Rasterized);
        assert_eq!(outcome.page_count, 3);
        assert_eq!(*rasterizer.calls.borrow(), 3);
        assert!(!outcome.images_stripped);

        let document = lopdf::Document::load_mem(&outcome.pdf).unwrap();
        assert_eq!(document.get_pages().len(), 3);
    }

    #[test]
    fn taint_strips_images_and_retries_once() {
        let (tables, options) = job_parts();
        let fonts = FontSet::builtin();
        let rasterizer = ScriptedRasterizer::new(vec![Err(RasterError::Tainted("logo".into())), Ok(())]);
        let outcome = render_document(&job(&tables, &options, &fonts), &rasterizer).unwrap();
        assert_eq!(outcome.strategy, RenderStrategy::Rasterized);
        assert!(outcome.images_stripped);
        // One tainted page, then the three pages again
        assert_eq!(*rasterizer.calls.borrow(), 4);
    }

    #[test]
    fn persistent_taint_falls_back_to_native_drawing() {
        let (tables, options) = job_parts();
        let fonts = FontSet::builtin();
        let rasterizer = ScriptedRasterizer::new(vec![Err(RasterError::Tainted("logo".into()))]);
        let outcome = render_document(&job(&tables, &options, &fonts), &rasterizer).unwrap();
        assert_eq!(outcome.strategy, RenderStrategy::Native);
        assert_eq!(*rasterizer.calls.borrow(), 2);
        assert_eq!(outcome.stats[0].start_page, 3);

        let document = lopdf::Document::load_mem(&outcome.pdf).unwrap();
        assert_eq!(document.get_pages().len(), outcome.page_count);
    }

    #[test]
    fn disabled_rasterization_never_calls_the_rasterizer() {
        let (tables, mut options) = job_parts();
        options.rasterize = false;
        let fonts = FontSet::builtin();
        let rasterizer = ScriptedRasterizer::new(vec![Ok(())]);
        let outcome = render_document(&job(&tables, &options, &fonts), &rasterizer).unwrap();
        assert_eq!(outcome.strategy, RenderStrategy::Native);
        assert_eq!(*rasterizer.calls.borrow(), 0);
    }

    #[test]
    fn native_drawing_flips_into_pdf_space() {
        let fonts = FontSet::builtin();
        let mut document = PdfDocument::new("0".repeat(32), &fonts);
        let page = document.add_page(100.0, 50.0);
        let mut scene = Scene::new(&PageGeometry {
            width: 100.0,
            height: 50.0,
            ..PageGeometry::default()
        });
        scene.push(Element::Rect {
            x: 10.0,
            y: 5.0,
            width: 20.0,
            height: 10.0,
            fill: Some(crate::scene::Color::BLACK),
            stroke: None,
        });
        draw_scene(&mut document, page, &scene).unwrap();
        let rectangle = document.pages[0]
            .layer
            .operations
            .iter()
            .find(|operation| operation.operator == "re")
            .unwrap()
            .operands
            .iter()
            .map(|operand| operand.as_float().unwrap())
            .collect::<Vec<_>>();
        assert_eq!(rectangle, vec![10.0, 35.0, 20.0, 10.0]);
    }
}
