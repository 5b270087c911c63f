//! Docpack compiles project records into a print-faithful PDF report and bundles that report,
//! together with the source documents the records point at, into one uncompressed ZIP archive.
//!
//! The report is laid out as a list of page scenes. Every scene is first rasterized and embedded
//! as a full-page image; when that is not possible the whole document is drawn again with native
//! PDF vector operations, so a report never mixes both kinds of pages.

/// The uncompressed ZIP writer: CRC-32, MS-DOS timestamps, local headers, central directory and
/// end of central directory record.
pub mod archive;

/// Section tables, page planning with the overview backfill, and `compile_document_package`.
pub mod assemble;

/// Collection, naming and fetching of the attached source documents, with the manifest and
/// README entries describing them.
pub mod attachments;

/// The JSON configuration file of the compiler.
pub mod configuration;

/// This module contains the `ContextError` type which is the error type used throughout this library.
///
/// Every error carries an `ErrorKind`, so that callers can tell a failed fetch from a contract
/// violation, a human readable context and, when the error was propagated, the message of its source.
pub mod error;

/// Font metrics for measuring text, and the PDF font resources.
///
/// Helvetica and Helvetica-Bold are always available through their standard widths. TrueType fonts
/// are parsed with `owned_ttf_parser` and embedded as Type0 fonts with an Identity-H encoding.
pub mod font;

/// Column widths, word wrapping, row measurement and pagination.
pub mod layout;

/// The final archive: report, attachments and manifest entries.
pub mod package;

/// The module were the `PdfDocument` interface for working with PDF documents is presented.
///
/// # Disclaimer
///
/// This work was partially adapted from the one of [fschutt](https://github.com/fschutt) for the crate [printpdf](https://github.com/fschutt/printpdf).
/// The identifiers of the documents are derived from their contents rather than generated
/// randomly, so that the same input always produces the same bytes.
///
/// # Introduction
///
/// The main component of this module is the struct `PdfDocument`, which offers page creation, vector
/// drawing, text, image placement, `write_all` and `save_to_bytes`, while keeping the object
/// bookkeeping of `lopdf` hidden below a curtain of private methods.
pub mod pdf;

/// Page rasterization behind the `Rasterizer` trait.
pub mod raster;

/// The input records of a package.
pub mod records;

/// The rendering strategies and their fallback.
pub mod render;

/// Page scenes: positioned rectangles, rules, text runs and images, and the composition of the
/// cover, overview and table pages.
pub mod scene;
