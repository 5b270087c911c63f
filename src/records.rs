use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ContextError, ErrorKind};

/// A reference to an uploaded file, resolved to bytes by the caller when the package is built.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct AttachmentRef {
    /// Identity of the stored file, two references with the same id are the same file.
    pub file_id: String,
    /// The name the file was uploaded with.
    pub file_name: String,
    pub content_type: Option<String>,
}

/// Where the cover logo comes from.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum LogoSource {
    /// The encoded PNG or JPEG bytes.
    Inline { data: Vec<u8> },
    /// A URL, `data:` URIs are inlined.
    Href { href: String },
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct ProjectMeta {
    pub project_number: String,
    pub name: String,
    pub customer: Option<String>,
    pub work_order: Option<String>,
    pub description: Option<String>,
    pub logo: Option<LogoSource>,
}

impl ProjectMeta {
    /// The label printed in the footer of every content page.
    pub fn label(&self) -> String {
        match (self.project_number.trim(), self.name.trim()) {
            ("", name) => name.to_string(),
            (number, "") => number.to_string(),
            (number, name) => format!("{number} - {name}"),
        }
    }
}

/// The sections of a document package, in their canonical order.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum SectionKey {
    WorkOrder,
    Drawings,
    Traceability,
    WeldLog,
    Procedures,
    InspectionReports,
}

impl SectionKey {
    pub const CANONICAL_ORDER: [SectionKey; 6] = [
        SectionKey::WorkOrder,
        SectionKey::Drawings,
        SectionKey::Traceability,
        SectionKey::WeldLog,
        SectionKey::Procedures,
        SectionKey::InspectionReports,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            SectionKey::WorkOrder => "workOrder",
            SectionKey::Drawings => "drawings",
            SectionKey::Traceability => "traceability",
            SectionKey::WeldLog => "weldLog",
            SectionKey::Procedures => "procedures",
            SectionKey::InspectionReports => "inspectionReports",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            SectionKey::WorkOrder => "Work order",
            SectionKey::Drawings => "Drawings",
            SectionKey::Traceability => "Material traceability",
            SectionKey::WeldLog => "Weld log",
            SectionKey::Procedures => "Welding procedures (WPS/WPQR)",
            SectionKey::InspectionReports => "NDT reports",
        }
    }

    /// Archive folder of the section's attachments, `None` for sections without source documents.
    pub fn attachment_folder(&self) -> Option<&'static str> {
        match self {
            SectionKey::Drawings => Some("01_Tegninger"),
            SectionKey::Traceability => Some("02_Materialsertifikater"),
            SectionKey::Procedures => Some("03_Sveiseprosedyrer"),
            SectionKey::InspectionReports => Some("04_NDT_Rapporter"),
            SectionKey::WorkOrder | SectionKey::WeldLog => None,
        }
    }
}

/// Which parts of the package to compile.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct Selection {
    pub cover: bool,
    pub work_order: bool,
    pub drawings: bool,
    pub traceability: bool,
    pub weld_log: bool,
    pub procedures: bool,
    pub inspection_reports: bool,
}

impl Selection {
    /// Every section, with a cover.
    pub fn all() -> Self {
        Selection {
            cover: true,
            work_order: true,
            drawings: true,
            traceability: true,
            weld_log: true,
            procedures: true,
            inspection_reports: true,
        }
    }

    pub fn includes(&self, section: SectionKey) -> bool {
        match section {
            SectionKey::WorkOrder => self.work_order,
            SectionKey::Drawings => self.drawings,
            SectionKey::Traceability => self.traceability,
            SectionKey::WeldLog => self.weld_log,
            SectionKey::Procedures => self.procedures,
            SectionKey::InspectionReports => self.inspection_reports,
        }
    }

    /// The selected sections in canonical order.
    pub fn sections(&self) -> Vec<SectionKey> {
        SectionKey::CANONICAL_ORDER
            .into_iter()
            .filter(|section| self.includes(*section))
            .collect()
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct WorkOrder {
    pub number: String,
    pub title: Option<String>,
    pub customer: Option<String>,
    pub status: Option<String>,
    pub due_date: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct Drawing {
    pub drawing_number: String,
    pub revision: Option<String>,
    pub title: Option<String>,
    pub status: Option<String>,
    pub file: Option<AttachmentRef>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct TraceabilityRecord {
    pub position: Option<String>,
    pub component: Option<String>,
    pub material: Option<String>,
    pub dimension: Option<String>,
    pub heat_number: Option<String>,
    pub certificate_number: Option<String>,
    pub certificate: Option<AttachmentRef>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct WeldLogEntry {
    pub weld_number: String,
    pub drawing_number: Option<String>,
    pub joint_type: Option<String>,
    pub welder_id: Option<String>,
    pub wps_number: Option<String>,
    pub weld_date: Option<String>,
    pub ndt_methods: Option<String>,
    pub status: Option<String>,
}

/// The type of a welding procedure document, given by the list it arrives in.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "camelCase")]
pub enum ProcedureKind {
    Wps,
    Wpqr,
}

impl ProcedureKind {
    pub fn label(&self) -> &'static str {
        match self {
            ProcedureKind::Wps => "WPS",
            ProcedureKind::Wpqr => "WPQR",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct ProcedureDocument {
    pub document_number: String,
    pub revision: Option<String>,
    pub process: Option<String>,
    pub material_group: Option<String>,
    pub thickness_range: Option<String>,
    pub file: Option<AttachmentRef>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct InspectionReport {
    pub report_number: String,
    pub method: Option<String>,
    pub inspection_date: Option<String>,
    pub inspector: Option<String>,
    pub result: Option<String>,
    pub scope: Option<String>,
    pub file: Option<AttachmentRef>,
}

/// The already assembled rows of every section. WPS and WPQR documents arrive in separate lists,
/// which is what tells them apart.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct SectionData {
    pub work_orders: Vec<WorkOrder>,
    pub drawings: Vec<Drawing>,
    pub traceability: Vec<TraceabilityRecord>,
    pub weld_log: Vec<WeldLogEntry>,
    pub wps: Vec<ProcedureDocument>,
    pub wpqr: Vec<ProcedureDocument>,
    pub inspection_reports: Vec<InspectionReport>,
}

/// Everything needed to compile one package, as read by the binary.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct PackageRequest {
    pub project: ProjectMeta,
    pub selection: Selection,
    pub data: SectionData,
}

impl PackageRequest {
    pub fn from_path(request_file_path: &Path) -> Result<Self, ContextError> {
        let request_file_contents = std::fs::read_to_string(request_file_path).map_err(|error| {
            ContextError::with_error(
                ErrorKind::ConfigurationError,
                format!("Failed to read the package request {:?}", request_file_path),
                &error,
            )
        })?;
        let request: PackageRequest = serde_json::from_str(&request_file_contents).map_err(|error| {
            ContextError::with_error(
                ErrorKind::ConfigurationError,
                "Failed to parse the package request",
                &error,
            )
        })?;

        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requests_deserialize_from_camel_case_json() {
        let request: PackageRequest = serde_json::from_str(
            r#"{
                "project": {
                    "projectNumber": "P-100",
                    "name": "Bridge",
                    "logo": { "kind": "href", "href": "https://example.com/logo.png" }
                },
                "selection": { "cover": true, "drawings": true },
                "data": {
                    "drawings": [{
                        "drawingNumber": "D-1",
                        "revision": "B",
                        "file": { "fileId": "abc", "fileName": "d1.pdf", "contentType": "application/pdf" }
                    }],
                    "wpqr": [{ "documentNumber": "Q-7" }]
                }
            }"#,
        )
        .unwrap();
        assert_eq!(request.project.label(), "P-100 - Bridge");
        assert!(request.selection.drawings && !request.selection.weld_log);
        assert_eq!(request.selection.sections(), vec![SectionKey::Drawings]);
        assert_eq!(request.data.drawings[0].file.as_ref().unwrap().file_id, "abc");
        assert_eq!(request.data.wpqr[0].document_number, "Q-7");
        assert_eq!(
            request.project.logo,
            Some(LogoSource::Href {
                href: "https://example.com/logo.png".into()
            })
        );
    }

    #[test]
    fn only_document_sections_have_folders() {
        let folders: Vec<_> = SectionKey::CANONICAL_ORDER
            .iter()
            .filter_map(SectionKey::attachment_folder)
            .collect();
        assert_eq!(
            folders,
            vec!["01_Tegninger", "02_Materialsertifikater", "03_Sveiseprosedyrer", "04_NDT_Rapporter"]
        );
    }
}
