use crate::archive::{create_archive, ArchiveEntry};
use crate::assemble::compile_document_package;
use crate::attachments::{build_attachment_manifest, ResolvedAttachment, ZipManifestRow};
use crate::error::ContextError;
use crate::font::FontSet;
use crate::raster::Rasterizer;
use crate::records::PackageRequest;
use crate::render::{RenderOptions, RenderOutcome};

/// Name of the compiled report inside the archive.
pub const MAIN_DOCUMENT_NAME: &str = "00_Hoveddokumentasjon.pdf";

/// Merges the report, the attachments and the manifest entries into one archive, in that order.
pub fn bundle(
    main_pdf: ArchiveEntry,
    attachments: Vec<ArchiveEntry>,
    manifest_entries: Vec<ArchiveEntry>,
) -> Result<Vec<u8>, ContextError> {
    let mut entries = Vec::with_capacity(1 + attachments.len() + manifest_entries.len());
    entries.push(main_pdf);
    entries.extend(attachments);
    entries.extend(manifest_entries);
    log::debug!("Bundling {} archive entries", entries.len());

    create_archive(&entries)
}

/// A finished package.
#[derive(Debug, Clone, PartialEq)]
pub struct PackageOutput {
    pub archive: Vec<u8>,
    /// How the report inside the archive was rendered.
    pub outcome: RenderOutcome,
    pub manifest_rows: Vec<ZipManifestRow>,
}

/// Compiles the report, collects the attachments through `fetch` and bundles everything.
///
/// Nothing is returned unless every step succeeded, a failed fetch discards the rendered report.
pub fn compile_package<F>(
    request: &PackageRequest,
    options: &RenderOptions,
    fonts: &FontSet,
    rasterizer: &dyn Rasterizer,
    fetch: F,
) -> Result<PackageOutput, ContextError>
where
    F: FnMut(&ResolvedAttachment) -> Result<Vec<u8>, ContextError>,
{
    let outcome = compile_document_package(
        &request.project,
        &request.selection,
        &request.data,
        options,
        fonts,
        rasterizer,
    )?;
    let plan = build_attachment_manifest(
        &request.project,
        &request.selection,
        &request.data,
        options.generated_at,
    )?;
    let attachments = plan.fetch(fetch)?;

    let main_pdf = ArchiveEntry::new(MAIN_DOCUMENT_NAME, outcome.pdf.clone()).with_timestamp(options.generated_at);
    let archive = bundle(main_pdf, attachments, plan.manifest_entries)?;
    log::info!(
        "Packaged {} attachments next to a {} page report ({} bytes)",
        plan.attachments.len(),
        outcome.page_count,
        archive.len()
    );

    Ok(PackageOutput {
        archive,
        outcome,
        manifest_rows: plan.rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{CENTRAL_DIRECTORY_RECORD_SIZE, END_OF_CENTRAL_DIRECTORY_SIZE, LOCAL_FILE_HEADER_SIZE};

    #[test]
    fn bundle_keeps_the_entry_order() {
        let archive = bundle(
            ArchiveEntry::new(MAIN_DOCUMENT_NAME, b"%PDF".to_vec()),
            vec![ArchiveEntry::new("01_Tegninger/a.pdf", b"a".to_vec())],
            vec![ArchiveEntry::new("manifest.csv", b"m".to_vec())],
        )
        .unwrap();

        let first_name = &archive[LOCAL_FILE_HEADER_SIZE..LOCAL_FILE_HEADER_SIZE + MAIN_DOCUMENT_NAME.len()];
        assert_eq!(first_name, MAIN_DOCUMENT_NAME.as_bytes());

        let names_length = MAIN_DOCUMENT_NAME.len() + "01_Tegninger/a.pdf".len() + "manifest.csv".len();
        let expected_length = 3 * (LOCAL_FILE_HEADER_SIZE + CENTRAL_DIRECTORY_RECORD_SIZE)
            + 2 * names_length
            + 4
            + 1
            + 1
            + END_OF_CENTRAL_DIRECTORY_SIZE;
        assert_eq!(archive.len(), expected_length);
    }

    #[test]
    fn duplicate_archive_names_are_rejected() {
        let error = bundle(
            ArchiveEntry::new(MAIN_DOCUMENT_NAME, Vec::new()),
            vec![ArchiveEntry::new(MAIN_DOCUMENT_NAME, Vec::new())],
            Vec::new(),
        )
        .unwrap_err();
        assert_eq!(error.kind, crate::error::ErrorKind::ArchiveEncodingError);
    }
}
