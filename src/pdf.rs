use lopdf::content::Operation;
use nalgebra_glm as glm;
use std::{collections::BTreeMap, io::BufWriter, mem};
use time::OffsetDateTime;

use crate::error::{ContextError, ErrorKind};
use crate::font::{FontFace, FontSet, FontWeight};
use crate::raster::RasterImage;
use crate::scene::{Color, DecodedImage};

/// The content operations of one page, wrapped in an isolated graphics state when encoded.
#[derive(Debug, Clone, Default)]
pub struct PdfLayer {
    pub(crate) operations: Vec<Operation>,
}

impl PdfLayer {
    fn into_stream(self) -> Result<lopdf::Stream, ContextError> {
        let mut operations = Vec::with_capacity(self.operations.len() + 2);
        operations.push(Operation::new("q", vec![]));
        operations.extend(self.operations);
        operations.push(Operation::new("Q", vec![]));

        let stream_content = lopdf::content::Content { operations };
        let encoded = stream_content.encode().map_err(|error| {
            ContextError::with_error(ErrorKind::PdfError, "Failed to encode the page content", &error)
        })?;
        Ok(lopdf::Stream::new(lopdf::Dictionary::new(), encoded))
    }
}

/// The low-level image representation for a PDF document: 8-bit RGB samples with an optional
/// 8-bit soft mask for transparency.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageXObject {
    /// Width of the image in pixels.
    pub width: u32,
    /// Height of the image in pixels.
    pub height: u32,
    /// Should the image be interpolated when scaled?
    pub interpolate: bool,
    /// RGB samples, row by row.
    pub image_data: Vec<u8>,
    /// Alpha samples, `None` when the image is fully opaque.
    pub soft_mask: Option<Vec<u8>>,
}

impl ImageXObject {
    pub fn from_raster(image: RasterImage) -> Self {
        ImageXObject {
            width: image.width,
            height: image.height,
            interpolate: false,
            image_data: image.rgb,
            soft_mask: None,
        }
    }

    /// Splits the straight RGBA pixels into color samples and a soft mask.
    pub fn from_decoded(image: &DecodedImage) -> Self {
        let pixel_count = (image.width as usize) * (image.height as usize);
        let mut image_data = Vec::with_capacity(pixel_count * 3);
        let mut alpha = Vec::with_capacity(pixel_count);
        for pixel in image.rgba.chunks_exact(4) {
            image_data.extend_from_slice(&pixel[..3]);
            alpha.push(pixel[3]);
        }
        let opaque = alpha.iter().all(|sample| *sample == u8::MAX);

        ImageXObject {
            width: image.width,
            height: image.height,
            interpolate: true,
            image_data,
            soft_mask: (!opaque).then_some(alpha),
        }
    }

    /// Inserts the image (and its soft mask) into the document, returning the image stream.
    fn into_stream(self, inner_document: &mut lopdf::Document) -> lopdf::Stream {
        use lopdf::Object::*;

        let mut dictionary = lopdf::Dictionary::from_iter(vec![
            ("Type", Name("XObject".into())),
            ("Subtype", Name("Image".into())),
            ("Width", Integer(i64::from(self.width))),
            ("Height", Integer(i64::from(self.height))),
            ("ColorSpace", Name("DeviceRGB".into())),
            ("BitsPerComponent", Integer(8)),
            ("Interpolate", Boolean(self.interpolate)),
        ]);
        if let Some(alpha) = self.soft_mask {
            let mask = lopdf::Stream::new(
                lopdf::Dictionary::from_iter(vec![
                    ("Type", Name("XObject".into())),
                    ("Subtype", Name("Image".into())),
                    ("Width", Integer(i64::from(self.width))),
                    ("Height", Integer(i64::from(self.height))),
                    ("ColorSpace", Name("DeviceGray".into())),
                    ("BitsPerComponent", Integer(8)),
                ]),
                alpha,
            );
            dictionary.set("SMask", Reference(inner_document.add_object(mask)));
        }

        lopdf::Stream::new(dictionary, self.image_data)
    }
}

/// Named reference to an `XObject`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct XObjectReference(String);

impl XObjectReference {
    /// Creates a new reference for an `XObject` from a number.
    pub fn new(index: usize) -> Self {
        Self(format!("X{index}"))
    }
}

/// The association between the `XObject` names used in the content and the images themselves.
#[derive(Default, Debug, Clone)]
pub struct XObjectMap(BTreeMap<XObjectReference, ImageXObject>);

impl XObjectMap {
    /// Inserts the `XObject`s into the document, simultaneously constructing a PDF dictionary of them.
    fn into_with_document(self, document: &mut lopdf::Document) -> lopdf::Dictionary {
        self.0
            .into_iter()
            .map(|(name, image)| {
                let stream = image.into_stream(document);
                let object_reference = document.add_object(stream);
                (name.0, lopdf::Object::Reference(object_reference))
            })
            .collect()
    }
}

/// The representation of a PDF page, sized in points.
#[derive(Debug, Clone)]
pub struct PdfPage {
    pub width: f32,
    pub height: f32,
    pub(crate) layer: PdfLayer,
    pub(crate) xobjects: XObjectMap,
}

/// Metadata written to the document information dictionary.
#[derive(Debug, Clone)]
pub struct DocumentInfo {
    pub title: String,
    pub subject: String,
    pub creation_date: OffsetDateTime,
    /// The second part of the trailer `ID`, 32 characters long.
    pub instance_id: String,
}

/// A font registered in the document under its resource name (`F0`, `F1`, ...).
#[derive(Debug, Clone)]
struct PdfFont {
    resource_name: String,
    object_id: lopdf::ObjectId,
    face: FontFace,
}

/// This struct represents the actual PDF document on a high-level. It is an interface to the
/// underlying `lopdf::Document` with the addition of the pages, the document ID and the fonts.
///
/// All coordinates are PDF user space coordinates: points, origin at the bottom-left corner.
pub struct PdfDocument {
    /// The regular font first, then the bold one.
    fonts: Vec<(FontWeight, PdfFont)>,
    pub inner_document: lopdf::Document,
    /// The identifier of the document, it is used to set the first part of the PDF `ID`.
    pub identifier: String,
    pub(crate) pages: Vec<PdfPage>,
}

impl PdfDocument {
    /// Creates a PDF 1.5 document using the given fonts for regular and bold text.
    pub fn new(pdf_document_identifier: String, fonts: &FontSet) -> Self {
        let mut inner_document = lopdf::Document::with_version("1.5");
        let fonts = [FontWeight::Regular, FontWeight::Bold]
            .into_iter()
            .enumerate()
            .map(|(index, weight)| {
                let font = PdfFont {
                    resource_name: format!("F{index}"),
                    object_id: inner_document.new_object_id(),
                    face: fonts.get(weight).clone(),
                };
                (weight, font)
            })
            .collect();

        PdfDocument {
            fonts,
            inner_document,
            identifier: pdf_document_identifier,
            pages: Vec::new(),
        }
    }

    /// Adds an empty page of the given size in points, returning its index.
    pub fn add_page(&mut self, page_width: f32, page_height: f32) -> usize {
        self.pages.push(PdfPage {
            width: page_width,
            height: page_height,
            layer: PdfLayer::default(),
            xobjects: XObjectMap::default(),
        });
        self.pages.len() - 1
    }

    /// Fills the rectangle `[x, y, width, height]`, where `(x, y)` is its lower-left corner.
    pub fn fill_rect(&mut self, page_index: usize, rect: [f32; 4], color: Color) -> Result<(), ContextError> {
        let [x, y, width, height] = rect;
        self.add_operations_to_page(
            page_index,
            vec![
                color_operation("rg", color),
                Operation::new("re", vec![x.into(), y.into(), width.into(), height.into()]),
                Operation::new("f", vec![]),
            ],
        )
    }

    pub fn stroke_rect(
        &mut self,
        page_index: usize,
        rect: [f32; 4],
        color: Color,
        line_width: f32,
    ) -> Result<(), ContextError> {
        let [x, y, width, height] = rect;
        self.add_operations_to_page(
            page_index,
            vec![
                color_operation("RG", color),
                Operation::new("w", vec![line_width.into()]),
                Operation::new("re", vec![x.into(), y.into(), width.into(), height.into()]),
                Operation::new("S", vec![]),
            ],
        )
    }

    pub fn draw_line(
        &mut self,
        page_index: usize,
        from: [f32; 2],
        to: [f32; 2],
        color: Color,
        line_width: f32,
    ) -> Result<(), ContextError> {
        self.add_operations_to_page(
            page_index,
            vec![
                color_operation("RG", color),
                Operation::new("w", vec![line_width.into()]),
                Operation::new("m", vec![from[0].into(), from[1].into()]),
                Operation::new("l", vec![to[0].into(), to[1].into()]),
                Operation::new("S", vec![]),
            ],
        )
    }

    /// Writes one line of text with its baseline starting at `caret_position`.
    pub fn write_text(
        &mut self,
        page_index: usize,
        text: &str,
        weight: FontWeight,
        font_size: f32,
        color: Color,
        caret_position: [f32; 2],
    ) -> Result<(), ContextError> {
        let font = self.get_font(weight)?;
        let resource_name = font.resource_name.clone();
        let (encoded_text, string_format) = font.face.encode(text);
        let [x, y] = caret_position;

        self.add_operations_to_page(
            page_index,
            vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec![resource_name.into(), font_size.into()]),
                Operation::new("Td", vec![x.into(), y.into()]),
                color_operation("rg", color),
                Operation::new("Tj", vec![lopdf::Object::String(encoded_text, string_format)]),
                Operation::new("ET", vec![]),
            ],
        )
    }

    /// Draws the image stretched over the rectangle `[x, y, width, height]`.
    pub fn place_image(
        &mut self,
        page_index: usize,
        image: ImageXObject,
        rect: [f32; 4],
    ) -> Result<(), ContextError> {
        let [x, y, width, height] = rect;
        let page = self.get_mut_page(page_index)?;
        let reference = XObjectReference::new(page.xobjects.0.len());
        page.xobjects.0.insert(reference.clone(), image);

        // The image occupies the unit square, map it onto the target rectangle
        let transform = glm::scale2d(&glm::translation2d(&glm::vec2(x, y)), &glm::vec2(width, height));
        self.add_operations_to_page(
            page_index,
            vec![
                Operation::new("q", vec![]),
                Operation::new(
                    "cm",
                    vec![
                        transform[(0, 0)].into(),
                        transform[(1, 0)].into(),
                        transform[(0, 1)].into(),
                        transform[(1, 1)].into(),
                        transform[(0, 2)].into(),
                        transform[(1, 2)].into(),
                    ],
                ),
                Operation::new("Do", vec![lopdf::Object::Name(reference.0.into_bytes())]),
                Operation::new("Q", vec![]),
            ],
        )
    }

    /// Write the pages, the fonts and the document information into the underlying document.
    pub fn write_all(&mut self, info: &DocumentInfo) -> Result<(), ContextError> {
        use lopdf::Object::*;
        use lopdf::StringFormat::*;

        let creation_date = to_pdf_timestamp_format(&info.creation_date);
        let document_info = lopdf::Dictionary::from_iter(vec![
            ("Trapped", "False".into()),
            ("CreationDate", String(creation_date.clone().into_bytes(), Literal)),
            ("ModDate", String(creation_date.into_bytes(), Literal)),
            ("Title", String(info.title.clone().into_bytes(), Literal)),
            ("Subject", String(info.subject.clone().into_bytes(), Literal)),
            ("Creator", String(b"docpack".to_vec(), Literal)),
            ("Producer", String(b"docpack".to_vec(), Literal)),
            ("Identifier", String(self.identifier.clone().into_bytes(), Literal)),
        ]);
        let document_info_id = self.inner_document.add_object(Dictionary(document_info));

        let pages_id = self.inner_document.new_object_id();
        let catalog = lopdf::Dictionary::from_iter(vec![
            ("Type", "Catalog".into()),
            ("PageLayout", "OneColumn".into()),
            ("PageMode", "UseNone".into()),
            ("Pages", Reference(pages_id)),
        ]);
        let catalog_id = self.inner_document.add_object(catalog);

        self.inner_document.trailer.set("Root", Reference(catalog_id));
        self.inner_document.trailer.set("Info", Reference(document_info_id));
        self.inner_document.trailer.set(
            "ID",
            Array(vec![
                String(self.identifier.clone().into_bytes(), Literal),
                String(info.instance_id.clone().into_bytes(), Literal),
            ]),
        );

        let fonts_dictionary = self.insert_fonts_into_document();
        let fonts_dictionary_id = self.inner_document.add_object(fonts_dictionary);

        let mut page_ids = Vec::<lopdf::Object>::new();
        for page in mem::take(&mut self.pages) {
            let media_box: lopdf::Object =
                vec![0.into(), 0.into(), page.width.into(), page.height.into()].into();
            let mut page_dictionary = lopdf::Dictionary::from_iter(vec![
                ("Type", "Page".into()),
                ("Rotate", Integer(0)),
                ("MediaBox", media_box.clone()),
                ("TrimBox", media_box.clone()),
                ("CropBox", media_box),
                ("Parent", Reference(pages_id)),
            ]);

            let mut resource_dictionary = lopdf::Dictionary::new();
            resource_dictionary.set("Font", Reference(fonts_dictionary_id));
            let xobjects_dictionary = page.xobjects.into_with_document(&mut self.inner_document);
            if !xobjects_dictionary.is_empty() {
                resource_dictionary.set("XObject", Dictionary(xobjects_dictionary));
            }
            let resources_page_id = self
                .inner_document
                .add_object(Dictionary(resource_dictionary));
            page_dictionary.set("Resources", Reference(resources_page_id));

            let page_content_id = self.inner_document.add_object(page.layer.into_stream()?);
            page_dictionary.set("Contents", Reference(page_content_id));

            let page_id = self.inner_document.add_object(page_dictionary);
            page_ids.push(Reference(page_id));
        }

        let pages = lopdf::Dictionary::from_iter(vec![
            ("Type", "Pages".into()),
            ("Count", Integer(page_ids.len() as i64)),
            ("Kids", Array(page_ids)),
        ]);
        self.inner_document
            .objects
            .insert(pages_id, Dictionary(pages));

        Ok(())
    }

    /// Optimize the PDF document (only superficially), compressing every stream.
    pub fn optimize(&mut self) {
        self.inner_document.prune_objects();
        self.inner_document.delete_zero_length_streams();
        self.inner_document.renumber_objects();
        self.inner_document.compress();
    }

    /// Save the `PdfDocument` to bytes in order for it to be written to a file or further processed.
    pub fn save_to_bytes(&mut self) -> Result<Vec<u8>, ContextError> {
        let mut pdf_document_bytes = Vec::new();
        let mut writer = BufWriter::new(&mut pdf_document_bytes);
        self.inner_document.save_to(&mut writer).map_err(|error| {
            ContextError::with_error(
                ErrorKind::PdfError,
                "Error while saving the PDF document to bytes",
                &error,
            )
        })?;
        mem::drop(writer);

        Ok(pdf_document_bytes)
    }

    /// Converts the fonts into a dictionary and inserts them into the document.
    fn insert_fonts_into_document(&mut self) -> lopdf::Dictionary {
        use lopdf::Object::*;
        let mut font_dictionary = lopdf::Dictionary::new();

        for (_, font) in &self.fonts {
            let collected_font_dictionary = match &font.face {
                FontFace::Builtin(builtin) => lopdf::Dictionary::from_iter(vec![
                    ("Type", Name("Font".into())),
                    ("Subtype", Name("Type1".into())),
                    ("BaseFont", Name(builtin.base_font().into())),
                    ("Encoding", Name("WinAnsiEncoding".into())),
                ]),
                FontFace::Embedded(embedded) => {
                    embedded.insert_into_document(&mut self.inner_document, &font.resource_name)
                }
            };
            self.inner_document
                .objects
                .insert(font.object_id, Dictionary(collected_font_dictionary));
            font_dictionary.set(font.resource_name.clone(), Reference(font.object_id));
        }

        font_dictionary
    }

    fn add_operations_to_page(
        &mut self,
        page_index: usize,
        operations: Vec<Operation>,
    ) -> Result<(), ContextError> {
        self.get_mut_page(page_index)?
            .layer
            .operations
            .extend(operations);
        Ok(())
    }

    fn get_font(&self, weight: FontWeight) -> Result<&PdfFont, ContextError> {
        self.fonts
            .iter()
            .find(|(font_weight, _)| *font_weight == weight)
            .map(|(_, font)| font)
            .ok_or_else(|| {
                ContextError::with_context(
                    ErrorKind::PdfError,
                    format!("Failed to find the {:?} font in the document", weight),
                )
            })
    }

    fn get_mut_page(&mut self, page_index: usize) -> Result<&mut PdfPage, ContextError> {
        self.pages.get_mut(page_index).ok_or_else(|| {
            ContextError::with_context(
                ErrorKind::PdfError,
                format!("Failed to find the page with index {}", page_index),
            )
        })
    }
}

fn color_operation(operator: &str, color: Color) -> Operation {
    Operation::new(
        operator,
        color.components().into_iter().map(lopdf::Object::Real).collect(),
    )
}

/// Formats the given time so that it matches what the PDF specification expects.
/// An example of it is the following: D:20170505150224+02'00'.
pub fn to_pdf_timestamp_format(date: &OffsetDateTime) -> String {
    let offset = date.offset();
    let offset_sign = if offset.is_negative() { '-' } else { '+' };
    format!(
        "D:{:04}{:02}{:02}{:02}{:02}{:02}{offset_sign}{:02}'{:02}'",
        date.year(),
        u8::from(date.month()),
        date.day(),
        date.hour(),
        date.minute(),
        date.second(),
        offset.whole_hours().abs(),
        offset.minutes_past_hour().abs(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::content::Content;

    fn info() -> DocumentInfo {
        DocumentInfo {
            title: "P-100".into(),
            subject: "Documentation package".into(),
            creation_date: OffsetDateTime::from_unix_timestamp(1_710_498_642).unwrap(),
            instance_id: "0".repeat(32),
        }
    }

    fn operators(document: &lopdf::Document, page_id: lopdf::ObjectId) -> Vec<String> {
        let content = document.get_page_content(page_id).unwrap();
        Content::decode(&content)
            .unwrap()
            .operations
            .into_iter()
            .map(|operation| operation.operator)
            .collect()
    }

    #[test]
    fn timestamps_follow_the_pdf_date_format() {
        let date = OffsetDateTime::from_unix_timestamp(1_710_498_642).unwrap();
        assert_eq!(to_pdf_timestamp_format(&date), "D:20240315103042+00'00'");
    }

    #[test]
    fn writes_vector_pages_with_builtin_fonts() {
        let mut document = PdfDocument::new("1".repeat(32), &FontSet::builtin());
        let page = document.add_page(841.89, 595.28);
        document.fill_rect(page, [36.0, 36.0, 100.0, 20.0], Color::BLACK).unwrap();
        document
            .draw_line(page, [36.0, 30.0], [805.0, 30.0], Color::BLACK, 0.5)
            .unwrap();
        document
            .write_text(page, "Weld (12) – OK", FontWeight::Bold, 10.0, Color::BLACK, [40.0, 40.0])
            .unwrap();
        document.write_all(&info()).unwrap();
        document.optimize();
        let bytes = document.save_to_bytes().unwrap();

        let loaded = lopdf::Document::load_mem(&bytes).unwrap();
        let pages = loaded.get_pages();
        assert_eq!(pages.len(), 1);
        let page_id = pages[&1];
        let operators = operators(&loaded, page_id);
        for expected in ["re", "f", "m", "l", "BT", "Tf", "Tj", "ET"] {
            assert!(operators.iter().any(|operator| operator == expected), "missing {expected}");
        }
        let media_box = loaded
            .get_dictionary(page_id)
            .unwrap()
            .get(b"MediaBox")
            .unwrap()
            .as_array()
            .unwrap()
            .iter()
            .map(|value| value.as_float().unwrap())
            .collect::<Vec<_>>();
        assert!((media_box[2] - 841.89).abs() < 0.01);
        assert!((media_box[3] - 595.28).abs() < 0.01);
    }

    #[test]
    fn images_become_xobjects_with_soft_masks() {
        let mut document = PdfDocument::new("2".repeat(32), &FontSet::builtin());
        let page = document.add_page(100.0, 100.0);
        let image = DecodedImage {
            width: 2,
            height: 1,
            rgba: vec![255, 0, 0, 255, 0, 0, 255, 0],
        };
        let xobject = ImageXObject::from_decoded(&image);
        assert_eq!(xobject.image_data, vec![255, 0, 0, 0, 0, 255]);
        assert_eq!(xobject.soft_mask, Some(vec![255, 0]));
        document.place_image(page, xobject, [10.0, 20.0, 30.0, 40.0]).unwrap();
        document.write_all(&info()).unwrap();
        let bytes = document.save_to_bytes().unwrap();

        let loaded = lopdf::Document::load_mem(&bytes).unwrap();
        let page_id = loaded.get_pages()[&1];
        let content = Content::decode(&loaded.get_page_content(page_id).unwrap()).unwrap();
        let matrix = content
            .operations
            .iter()
            .find(|operation| operation.operator == "cm")
            .unwrap()
            .operands
            .iter()
            .map(|operand| operand.as_float().unwrap())
            .collect::<Vec<_>>();
        assert_eq!(matrix, vec![30.0, 0.0, 0.0, 40.0, 10.0, 20.0]);
        assert!(content.operations.iter().any(|operation| operation.operator == "Do"));

        let images = loaded
            .objects
            .values()
            .filter_map(|object| object.as_stream().ok())
            .filter(|stream| {
                stream
                    .dict
                    .get(b"Subtype")
                    .and_then(|subtype| subtype.as_name())
                    .map(|name| name == b"Image")
                    .unwrap_or(false)
            })
            .count();
        assert_eq!(images, 2);
    }

    #[test]
    fn opaque_images_have_no_soft_mask() {
        let image = DecodedImage {
            width: 1,
            height: 1,
            rgba: vec![1, 2, 3, 255],
        };
        assert_eq!(ImageXObject::from_decoded(&image).soft_mask, None);
    }

    #[test]
    fn unknown_pages_are_reported() {
        let mut document = PdfDocument::new("3".repeat(32), &FontSet::builtin());
        let error = document
            .fill_rect(4, [0.0, 0.0, 1.0, 1.0], Color::WHITE)
            .unwrap_err();
        assert_eq!(error.kind, ErrorKind::PdfError);
    }
}
