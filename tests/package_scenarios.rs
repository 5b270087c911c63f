use std::io::{Cursor, Read as _};

use docpack::{
    assemble::compile_document_package,
    attachments::{DUPLICATE_NOTE, RENAMED_NOTE},
    error::{ContextError, ErrorKind},
    font::FontSet,
    package::{compile_package, MAIN_DOCUMENT_NAME},
    raster::{RasterError, RasterImage, Rasterizer, SkiaRasterizer},
    records::{
        AttachmentRef, Drawing, InspectionReport, PackageRequest, ProcedureDocument, ProjectMeta,
        SectionData, Selection,
    },
    render::{RenderOptions, RenderStrategy},
    scene::Scene,
};
use time::OffsetDateTime;

/// Paints every page white at one pixel per point.
struct BlankRasterizer;

impl Rasterizer for BlankRasterizer {
    fn render_page(&self, scene: &Scene, _fonts: &FontSet) -> Result<RasterImage, RasterError> {
        let width = scene.width.round() as u32;
        let height = scene.height.round() as u32;
        Ok(RasterImage {
            width,
            height,
            rgb: vec![255; (width * height * 3) as usize],
        })
    }
}

/// Reports every page as tainted, whatever it holds.
struct TaintedRasterizer;

impl Rasterizer for TaintedRasterizer {
    fn render_page(&self, _scene: &Scene, _fonts: &FontSet) -> Result<RasterImage, RasterError> {
        Err(RasterError::Tainted("cross-origin logo".into()))
    }
}

fn options() -> RenderOptions {
    RenderOptions::new(OffsetDateTime::from_unix_timestamp(1_717_228_800).unwrap())
}

fn project() -> ProjectMeta {
    ProjectMeta {
        project_number: "P-2041".into(),
        name: "Støttekonstruksjon kai 3".into(),
        customer: Some("Havnevesenet".into()),
        ..ProjectMeta::default()
    }
}

fn file(file_id: &str, file_name: &str) -> Option<AttachmentRef> {
    Some(AttachmentRef {
        file_id: file_id.into(),
        file_name: file_name.into(),
        content_type: Some("application/pdf".into()),
    })
}

fn three_drawings() -> SectionData {
    SectionData {
        drawings: ["D-100", "D-101", "D-102"]
            .into_iter()
            .map(|number| Drawing {
                drawing_number: number.into(),
                revision: Some("A".into()),
                title: Some("Bjelke".into()),
                ..Drawing::default()
            })
            .collect(),
        ..SectionData::default()
    }
}

fn cover_and_drawings() -> Selection {
    Selection {
        cover: true,
        drawings: true,
        ..Selection::default()
    }
}

fn page_count(pdf: &[u8]) -> usize {
    lopdf::Document::load_mem(pdf).unwrap().get_pages().len()
}

fn archive_entries(archive: Vec<u8>) -> Vec<(String, Vec<u8>)> {
    let mut reader = zip::ZipArchive::new(Cursor::new(archive)).unwrap();
    (0..reader.len())
        .map(|index| {
            let mut file = reader.by_index(index).unwrap();
            let mut data = Vec::new();
            file.read_to_end(&mut data).unwrap();
            (file.name().to_string(), data)
        })
        .collect()
}

#[test]
fn drawings_start_after_the_cover_and_the_overview() {
    let outcome = compile_document_package(
        &project(),
        &cover_and_drawings(),
        &three_drawings(),
        &options(),
        &FontSet::builtin(),
        &BlankRasterizer,
    )
    .unwrap();

    assert_eq!(outcome.strategy, RenderStrategy::Rasterized);
    assert_eq!(outcome.stats.len(), 1);
    assert_eq!(outcome.stats[0].key, "drawings");
    assert_eq!(outcome.stats[0].start_page, 3);
    assert_eq!(outcome.stats[0].row_count, 3);
    assert_eq!(outcome.stats[0].page_count, 1);
    assert!(outcome.page_count >= 3);
    assert_eq!(page_count(&outcome.pdf), outcome.page_count);
}

#[test]
fn pages_with_outline_fonts_are_rasterized() {
    let fonts_directory = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("fonts/DejaVu");
    let fonts = FontSet::from_font_files(
        Some(&fonts_directory.join("DejaVuSans.ttf")),
        Some(&fonts_directory.join("DejaVuSans-Bold.ttf")),
    )
    .unwrap();

    let outcome = compile_document_package(
        &project(),
        &cover_and_drawings(),
        &three_drawings(),
        &options(),
        &fonts,
        &SkiaRasterizer::new(40),
    )
    .unwrap();

    assert_eq!(outcome.strategy, RenderStrategy::Rasterized);
    assert!(!outcome.images_stripped);
    assert_eq!(outcome.page_count, 3);
    assert_eq!(page_count(&outcome.pdf), 3);
}

#[test]
fn compiling_twice_gives_the_same_document() {
    let compile = || {
        compile_document_package(
            &project(),
            &Selection::all(),
            &three_drawings(),
            &options(),
            &FontSet::builtin(),
            &TaintedRasterizer,
        )
        .unwrap()
    };
    let first = compile();
    let second = compile();
    assert_eq!(first.stats, second.stats);
    assert_eq!(first.pdf, second.pdf);
}

#[test]
fn a_tainted_surface_still_produces_a_valid_document() {
    let outcome = compile_document_package(
        &project(),
        &cover_and_drawings(),
        &three_drawings(),
        &options(),
        &FontSet::builtin(),
        &TaintedRasterizer,
    )
    .unwrap();

    assert_eq!(outcome.strategy, RenderStrategy::Native);
    assert!(outcome.pdf.starts_with(b"%PDF-"));
    assert_eq!(page_count(&outcome.pdf), outcome.page_count);
    assert_eq!(outcome.stats[0].start_page, 3);
}

#[test]
fn a_selection_with_only_the_cover_is_rejected() {
    let selection = Selection {
        cover: true,
        ..Selection::default()
    };
    let error = compile_document_package(
        &project(),
        &selection,
        &three_drawings(),
        &options(),
        &FontSet::builtin(),
        &BlankRasterizer,
    )
    .unwrap_err();
    assert_eq!(error.kind, ErrorKind::InvalidSelection);
}

#[test]
fn a_file_referenced_twice_is_stored_once() {
    let mut data = three_drawings();
    data.drawings[0].file = file("abc", "Tegning D-100.pdf");
    data.inspection_reports.push(InspectionReport {
        report_number: "NDT-7".into(),
        file: file("abc", "Tegning D-100.pdf"),
        ..InspectionReport::default()
    });
    let request = PackageRequest {
        project: project(),
        selection: Selection::all(),
        data,
    };

    let mut fetched = Vec::new();
    let package = compile_package(&request, &options(), &FontSet::builtin(), &BlankRasterizer, |attachment| {
        fetched.push(attachment.file_id.clone());
        Ok(b"%PDF-1.4 drawing".to_vec())
    })
    .unwrap();

    assert_eq!(fetched, vec!["abc"]);
    assert_eq!(package.manifest_rows.len(), 2);
    assert_eq!(package.manifest_rows[0].target_path, "01_Tegninger/D-100_revA.pdf");
    assert_eq!(package.manifest_rows[1].target_path, package.manifest_rows[0].target_path);
    assert_eq!(package.manifest_rows[1].note, DUPLICATE_NOTE);

    let names: Vec<String> = archive_entries(package.archive)
        .into_iter()
        .map(|(name, _)| name)
        .collect();
    assert_eq!(
        names,
        vec![MAIN_DOCUMENT_NAME, "01_Tegninger/D-100_revA.pdf", "manifest.csv", "README.txt"]
    );
}

#[test]
fn colliding_procedure_names_are_suffixed() {
    let procedure = |file_id: &str| ProcedureDocument {
        document_number: "100".into(),
        file: file(file_id, "wps.pdf"),
        ..ProcedureDocument::default()
    };
    let request = PackageRequest {
        project: project(),
        selection: Selection {
            procedures: true,
            ..Selection::default()
        },
        data: SectionData {
            wps: vec![procedure("first"), procedure("second")],
            ..SectionData::default()
        },
    };

    let package = compile_package(&request, &options(), &FontSet::builtin(), &BlankRasterizer, |attachment| {
        Ok(attachment.file_id.as_bytes().to_vec())
    })
    .unwrap();
    assert_eq!(package.manifest_rows[1].note, RENAMED_NOTE);

    let entries = archive_entries(package.archive);
    assert_eq!(entries[1], ("03_Sveiseprosedyrer/WPS_100.pdf".to_string(), b"first".to_vec()));
    assert_eq!(entries[2], ("03_Sveiseprosedyrer/WPS_100_2.pdf".to_string(), b"second".to_vec()));

    let manifest = String::from_utf8(entries[3].1.clone()).unwrap();
    assert!(manifest.starts_with("\u{feff}target_path,source,file_id,original_label,note\r\n"));
    assert!(manifest.contains("03_Sveiseprosedyrer/WPS_100_2.pdf,Welding procedures (WPS/WPQR),second,wps.pdf,renamed (name collision)\r\n"));
}

#[test]
fn a_failed_fetch_aborts_the_package() {
    let mut data = three_drawings();
    data.drawings[1].file = file("missing", "d101.pdf");
    let request = PackageRequest {
        project: project(),
        selection: Selection::all(),
        data,
    };
    let error = compile_package(&request, &options(), &FontSet::builtin(), &BlankRasterizer, |_| {
        Err(ContextError::with_context(ErrorKind::AttachmentFetchError, "Object store unavailable"))
    })
    .unwrap_err();
    assert_eq!(error.kind, ErrorKind::AttachmentFetchError);
}
