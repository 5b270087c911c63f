use std::collections::{HashMap, HashSet};

use serde::Serialize;
use time::OffsetDateTime;
use unicode_normalization::{char::is_combining_mark, UnicodeNormalization as _};

use crate::archive::ArchiveEntry;
use crate::assemble::format_generated_at;
use crate::error::{ContextError, ErrorKind};
use crate::package::MAIN_DOCUMENT_NAME;
use crate::records::{AttachmentRef, ProjectMeta, SectionData, SectionKey, Selection};

pub const MANIFEST_NAME: &str = "manifest.csv";
pub const README_NAME: &str = "README.txt";
/// Manifest note of a repeated reference to an already collected file.
pub const DUPLICATE_NOTE: &str = "duplicate reference";
/// Manifest note of a file whose proposed name was already taken.
pub const RENAMED_NOTE: &str = "renamed (name collision)";
/// Manifest note of a reference without a file id; nothing is stored for it.
pub const SKIPPED_NOTE: &str = "skipped (missing file id)";

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// A source document proposed for the archive, before name collisions are resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentCandidate {
    /// The file id; candidates with the same id are the same file.
    pub source_ref: String,
    pub folder: String,
    /// Normalized file name, extension included.
    pub proposed_name: String,
    /// The name the file was uploaded with.
    pub original_label: String,
    /// Title of the section the document belongs to.
    pub source: String,
}

/// A unique file of the archive with its final path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAttachment {
    pub file_id: String,
    pub target_path: String,
    pub original_label: String,
}

/// One line of `manifest.csv`.
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct ZipManifestRow {
    pub target_path: String,
    pub source: String,
    pub file_id: String,
    pub original_label: String,
    pub note: String,
}

fn transliterate(character: char) -> Option<&'static str> {
    Some(match character {
        'æ' => "ae",
        'Æ' => "AE",
        'ø' => "o",
        'Ø' => "O",
        'ß' => "ss",
        'đ' | 'ð' => "d",
        'Đ' | 'Ð' => "D",
        'þ' => "th",
        'Þ' => "Th",
        'ł' => "l",
        'Ł' => "L",
        'œ' => "oe",
        'Œ' => "OE",
        _ => return None,
    })
}

/// Strips diacritics and every character that is unsafe in a path, turning whitespace runs into
/// a single underscore.
fn sanitize_stem(stem: &str) -> String {
    let mut sanitized = String::with_capacity(stem.len());
    for character in stem.nfd().filter(|character| !is_combining_mark(*character)) {
        if let Some(replacement) = transliterate(character) {
            sanitized.push_str(replacement);
        } else if character.is_whitespace() || character == '_' {
            if !sanitized.ends_with('_') {
                sanitized.push('_');
            }
        } else if character.is_ascii_alphanumeric() || "-.+()".contains(character) {
            sanitized.push(character);
        }
    }

    let sanitized = sanitized.trim_matches(|character| character == '_' || character == '.');
    if sanitized.is_empty() {
        "file".to_string()
    } else {
        sanitized.to_string()
    }
}

fn extension_for_content_type(content_type: &str) -> Option<&'static str> {
    let essence = content_type.split(';').next().unwrap_or_default().trim();
    Some(match essence.to_ascii_lowercase().as_str() {
        "application/pdf" => "pdf",
        "image/png" => "png",
        "image/jpeg" | "image/jpg" => "jpg",
        "image/tiff" => "tif",
        "image/gif" => "gif",
        "text/plain" => "txt",
        "text/csv" => "csv",
        "application/zip" => "zip",
        "application/msword" => "doc",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => "docx",
        "application/vnd.ms-excel" => "xls",
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet" => "xlsx",
        "image/vnd.dwg" | "application/acad" => "dwg",
        "image/vnd.dxf" => "dxf",
        _ => return None,
    })
}

/// The extension of an uploaded file name, if it looks like one.
fn label_extension(original_label: &str) -> Option<String> {
    let (_, extension) = original_label.rsplit_once('.')?;
    let is_plausible = !extension.is_empty()
        && extension.len() <= 5
        && extension.chars().all(|character| character.is_ascii_alphanumeric());
    is_plausible.then(|| extension.to_ascii_lowercase())
}

fn label_stem(original_label: &str) -> &str {
    match label_extension(original_label) {
        Some(extension) => &original_label[..original_label.len() - extension.len() - 1],
        None => original_label,
    }
}

/// Builds a portable file name from a base name: diacritics and unsafe characters removed,
/// whitespace collapsed to underscores, and a lowercase extension taken from the content type,
/// else from the original label, else `pdf`.
pub fn normalize_file_name(base: &str, content_type: Option<&str>, original_label: &str) -> String {
    let extension = content_type
        .and_then(extension_for_content_type)
        .map(str::to_string)
        .or_else(|| label_extension(original_label))
        .unwrap_or_else(|| "pdf".to_string());
    format!("{}.{}", sanitize_stem(base), extension)
}

fn candidate(section: SectionKey, folder: &str, attachment: &AttachmentRef, base: &str) -> AttachmentCandidate {
    let base = if base.trim().is_empty() {
        label_stem(&attachment.file_name)
    } else {
        base
    };

    AttachmentCandidate {
        source_ref: attachment.file_id.trim().to_string(),
        folder: folder.to_string(),
        proposed_name: normalize_file_name(base, attachment.content_type.as_deref(), &attachment.file_name),
        original_label: attachment.file_name.clone(),
        source: section.title().to_string(),
    }
}

/// One candidate per attached document of the selected sections, in canonical section order.
pub fn collect_candidates(selection: &Selection, data: &SectionData) -> Vec<AttachmentCandidate> {
    let mut candidates = Vec::new();
    for section in selection.sections() {
        let Some(folder) = section.attachment_folder() else {
            continue;
        };
        match section {
            SectionKey::Drawings => {
                for drawing in &data.drawings {
                    let Some(file) = &drawing.file else { continue };
                    let base = match drawing.revision.as_deref().map(str::trim) {
                        Some(revision) if !revision.is_empty() && !drawing.drawing_number.trim().is_empty() => {
                            format!("{}_rev{}", drawing.drawing_number.trim(), revision)
                        }
                        _ => drawing.drawing_number.trim().to_string(),
                    };
                    candidates.push(candidate(section, folder, file, &base));
                }
            }
            SectionKey::Traceability => {
                for record in &data.traceability {
                    let Some(file) = &record.certificate else { continue };
                    let base = record.certificate_number.as_deref().unwrap_or_default().trim();
                    candidates.push(candidate(section, folder, file, base));
                }
            }
            SectionKey::Procedures => {
                for (kind, procedure) in crate::assemble::sorted_procedures(data) {
                    let Some(file) = &procedure.file else { continue };
                    let base = if procedure.document_number.trim().is_empty() {
                        String::new()
                    } else {
                        format!("{}_{}", kind.label(), procedure.document_number.trim())
                    };
                    candidates.push(candidate(section, folder, file, &base));
                }
            }
            SectionKey::InspectionReports => {
                for report in &data.inspection_reports {
                    let Some(file) = &report.file else { continue };
                    candidates.push(candidate(section, folder, file, report.report_number.trim()));
                }
            }
            SectionKey::WorkOrder | SectionKey::WeldLog => {}
        }
    }
    candidates
}

fn split_extension(file_name: &str) -> (&str, Option<&str>) {
    match file_name.rsplit_once('.') {
        Some((stem, extension)) if !stem.is_empty() => (stem, Some(extension)),
        _ => (file_name, None),
    }
}

/// Assigns every unique file a collision-free path. Repeated references reuse the path of their
/// first occurrence; colliding names get `_2`, `_3`, ... before the extension. Paths compare
/// case-insensitively. Candidates without a file id only get a manifest row with an empty path.
pub fn resolve_candidates(candidates: &[AttachmentCandidate]) -> (Vec<ResolvedAttachment>, Vec<ZipManifestRow>) {
    let mut resolved = Vec::new();
    let mut rows = Vec::with_capacity(candidates.len());
    let mut paths_by_reference = HashMap::<&str, String>::new();
    let mut taken_paths = HashSet::<String>::new();

    for candidate in candidates {
        if candidate.source_ref.is_empty() {
            log::warn!(
                "Skipping the attachment {:?} of {:?} without a file id",
                candidate.original_label,
                candidate.source
            );
            rows.push(ZipManifestRow {
                target_path: String::new(),
                source: candidate.source.clone(),
                file_id: String::new(),
                original_label: candidate.original_label.clone(),
                note: SKIPPED_NOTE.to_string(),
            });
            continue;
        }
        if let Some(target_path) = paths_by_reference.get(candidate.source_ref.as_str()) {
            log::warn!(
                "The file {:?} is referenced more than once, keeping {:?}",
                candidate.source_ref,
                target_path
            );
            rows.push(ZipManifestRow {
                target_path: target_path.clone(),
                source: candidate.source.clone(),
                file_id: candidate.source_ref.clone(),
                original_label: candidate.original_label.clone(),
                note: DUPLICATE_NOTE.to_string(),
            });
            continue;
        }

        let (stem, extension) = split_extension(&candidate.proposed_name);
        let mut target_path = format!("{}/{}", candidate.folder, candidate.proposed_name);
        let mut suffix = 1;
        while taken_paths.contains(&target_path.to_lowercase()) {
            suffix += 1;
            target_path = match extension {
                Some(extension) => format!("{}/{}_{}.{}", candidate.folder, stem, suffix, extension),
                None => format!("{}/{}_{}", candidate.folder, stem, suffix),
            };
        }
        log::debug!("Resolved {:?} to {:?}", candidate.source_ref, target_path);
        taken_paths.insert(target_path.to_lowercase());
        paths_by_reference.insert(&candidate.source_ref, target_path.clone());

        rows.push(ZipManifestRow {
            target_path: target_path.clone(),
            source: candidate.source.clone(),
            file_id: candidate.source_ref.clone(),
            original_label: candidate.original_label.clone(),
            note: if suffix > 1 { RENAMED_NOTE.to_string() } else { String::new() },
        });
        resolved.push(ResolvedAttachment {
            file_id: candidate.source_ref.clone(),
            target_path,
            original_label: candidate.original_label.clone(),
        });
    }

    (resolved, rows)
}

/// The manifest as UTF-8 CSV with a byte order mark, quoted where needed. The header is written
/// even when no attachment was collected.
pub fn manifest_csv(rows: &[ZipManifestRow]) -> Result<Vec<u8>, ContextError> {
    let csv_error = |error: &dyn std::error::Error| {
        ContextError::with_error(ErrorKind::ArchiveEncodingError, "Failed to write the manifest", error)
    };

    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .terminator(csv::Terminator::CRLF)
        .from_writer(UTF8_BOM.to_vec());
    writer
        .write_record(["target_path", "source", "file_id", "original_label", "note"])
        .map_err(|error| csv_error(&error))?;
    for row in rows {
        writer.serialize(row).map_err(|error| csv_error(&error))?;
    }
    writer.into_inner().map_err(|error| csv_error(error.error()))
}

/// A human readable description of the archive.
pub fn readme_text(project: &ProjectMeta, rows: &[ZipManifestRow], generated_at: &OffsetDateTime) -> String {
    let unique_rows: Vec<&ZipManifestRow> = rows
        .iter()
        .filter(|row| row.note != DUPLICATE_NOTE && row.note != SKIPPED_NOTE)
        .collect();
    let duplicate_count = rows.iter().filter(|row| row.note == DUPLICATE_NOTE).count();
    let skipped_count = rows.iter().filter(|row| row.note == SKIPPED_NOTE).count();

    let mut readme = String::new();
    readme.push_str("Documentation package\r\n=====================\r\n\r\n");
    readme.push_str(&format!("Project: {}\r\n", project.label()));
    readme.push_str(&format!("Generated: {}\r\n\r\n", format_generated_at(generated_at)));
    readme.push_str("Contents\r\n--------\r\n");
    readme.push_str(&format!("{:<28}Main document with every selected section\r\n", MAIN_DOCUMENT_NAME));
    for section in SectionKey::CANONICAL_ORDER {
        let Some(folder) = section.attachment_folder() else {
            continue;
        };
        let prefix = format!("{folder}/");
        let count = unique_rows
            .iter()
            .filter(|row| row.target_path.starts_with(&prefix))
            .count();
        if count > 0 {
            readme.push_str(&format!("{:<28}{} ({} files)\r\n", prefix, section.title(), count));
        }
    }
    readme.push_str(&format!("{:<28}Archive paths mapped to the original uploads\r\n", MANIFEST_NAME));
    readme.push_str(&format!(
        "\r\nAttachments: {} files, {} duplicate references.\r\n",
        unique_rows.len(),
        duplicate_count
    ));
    if skipped_count > 0 {
        readme.push_str(&format!(
            "{} references without a file id were skipped, see {}.\r\n",
            skipped_count, MANIFEST_NAME
        ));
    }
    readme
}

/// The resolved attachments of a package and the synthetic manifest entries describing them.
#[derive(Debug, Clone, PartialEq)]
pub struct AttachmentPlan {
    /// One per unique file, in candidate order.
    pub attachments: Vec<ResolvedAttachment>,
    pub rows: Vec<ZipManifestRow>,
    /// `manifest.csv` and `README.txt`.
    pub manifest_entries: Vec<ArchiveEntry>,
    pub generated_at: OffsetDateTime,
}

impl AttachmentPlan {
    /// Retrieves the bytes of every unique attachment, in order. The first failure aborts the
    /// whole fetch, an archive is never built with a missing file.
    pub fn fetch<F>(&self, mut fetch: F) -> Result<Vec<ArchiveEntry>, ContextError>
    where
        F: FnMut(&ResolvedAttachment) -> Result<Vec<u8>, ContextError>,
    {
        self.attachments
            .iter()
            .map(|attachment| {
                let data = fetch(attachment).map_err(|error| {
                    ContextError::with_error(
                        ErrorKind::AttachmentFetchError,
                        format!(
                            "Unable to fetch the attachment {:?} for {:?}",
                            attachment.file_id, attachment.target_path
                        ),
                        &error,
                    )
                })?;
                Ok(ArchiveEntry::new(attachment.target_path.clone(), data).with_timestamp(self.generated_at))
            })
            .collect()
    }
}

/// Resolves the attachments of the selected sections and writes the manifest entries.
pub fn build_attachment_manifest(
    project: &ProjectMeta,
    selection: &Selection,
    data: &SectionData,
    generated_at: OffsetDateTime,
) -> Result<AttachmentPlan, ContextError> {
    let candidates = collect_candidates(selection, data);
    let (attachments, rows) = resolve_candidates(&candidates);
    log::info!(
        "Collected {} attachments from {} references",
        attachments.len(),
        candidates.len()
    );

    let manifest_entries = vec![
        ArchiveEntry::new(MANIFEST_NAME, manifest_csv(&rows)?).with_timestamp(generated_at),
        ArchiveEntry::new(README_NAME, readme_text(project, &rows, &generated_at).into_bytes())
            .with_timestamp(generated_at),
    ];

    Ok(AttachmentPlan {
        attachments,
        rows,
        manifest_entries,
        generated_at,
    })
}
