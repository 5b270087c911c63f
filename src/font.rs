use lopdf::{Object, StringFormat};
use owned_ttf_parser::{AsFaceRef as _, Face, OwnedFace};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, HashMap},
    path::Path,
    sync::Arc,
};
use unicode_normalization::UnicodeNormalization as _;

use crate::error::{ContextError, ErrorKind};

/// The weight of a font, the compiler only distinguishes body text from headings.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum FontWeight {
    Regular,
    Bold,
}

/// The (insofar) relevant vertical metrics of a font.
#[derive(Clone, Copy, Debug, Default)]
pub struct FontMetrics {
    /// The ascent of the font.
    pub ascent: i16,
    /// The descent of the font.
    pub descent: i16,
    /// The number of units per em of the font.
    pub units_per_em: u16,
}

/// The (insofar) relevant metrics associated to a single glyph of a font.
#[derive(Clone, Copy, Debug, Default)]
pub struct GlyphMetrics {
    /// The width of the glyph.
    pub width: u32,
    /// The height of the glyph.
    pub height: u32,
}

/// A font face loaded from a TTF font, together with its measure of units per em.
#[derive(Clone, Debug)]
pub struct TtfFontFace {
    /// The underlying font face which is represented through the `ttf_parser` crate.
    inner: Arc<OwnedFace>,
    /// The number of units per em of the font face.
    units_per_em: u16,
}

impl TtfFontFace {
    /// Constructs a font face from the underlying raw data extracted from the TTF font file.
    pub fn from_bytes(data: &[u8]) -> Result<Self, ContextError> {
        let face = OwnedFace::from_vec(data.to_vec(), 0).map_err(|error| {
            ContextError::with_error(ErrorKind::FontError, "Failed to parse font", &error)
        })?;
        let units_per_em = face.as_face_ref().units_per_em();

        Ok(Self {
            inner: Arc::new(face),
            units_per_em,
        })
    }

    /// Retrieve the font metrics from the associated font face.
    pub fn font_metrics(&self) -> FontMetrics {
        FontMetrics {
            ascent: self.face().ascender(),
            descent: self.face().descender(),
            units_per_em: self.units_per_em,
        }
    }

    /// Retrieve the glyph ID of a specific codepoint, which in our case is just a `char`.
    pub fn glyph_id(&self, codepoint: char) -> Option<u16> {
        self.face()
            .glyph_index(codepoint)
            .map(|glyph_id| glyph_id.0)
    }

    /// The glyph drawn for a codepoint, `.notdef` (glyph 0) when the font lacks it.
    pub fn glyph_or_notdef(&self, codepoint: char) -> u16 {
        self.glyph_id(codepoint).unwrap_or(0)
    }

    /// Horizontal advance of a glyph in font units.
    pub fn glyph_advance(&self, glyph_id: u16) -> Option<u16> {
        self.face()
            .glyph_hor_advance(owned_ttf_parser::GlyphId(glyph_id))
    }

    /// Horizontal advance of a glyph in font units, half an em when the font has no metrics for it.
    pub fn advance_units(&self, glyph_id: u16) -> f32 {
        self.glyph_advance(glyph_id)
            .map(f32::from)
            .unwrap_or(self.units_per_em.max(1) as f32 / 2.0)
    }

    /// Retrieve the mapping between the glyph IDs and the characters (codepoints) of the font.
    fn glyph_ids(&self) -> HashMap<u16, char> {
        let font_subtables = self.face().tables().cmap.map(|cmap| {
            cmap.subtables
                .into_iter()
                .filter(|font_subtable| font_subtable.is_unicode())
        });
        let Some(font_subtables) = font_subtables else {
            return HashMap::new();
        };

        let mut gid_to_codepoint_map =
            HashMap::with_capacity(self.face().number_of_glyphs().into());
        for font_subtable in font_subtables {
            font_subtable.codepoints(|codepoint| {
                if let Ok(character) = char::try_from(codepoint) {
                    // Only keep glyphs which actually exist (index 0 is `.notdef`)
                    if let Some(glyph_index) = font_subtable
                        .glyph_index(codepoint)
                        .filter(|index| index.0 > 0)
                    {
                        gid_to_codepoint_map
                            .entry(glyph_index.0)
                            .or_insert(character);
                    }
                }
            })
        }

        gid_to_codepoint_map
    }

    /// Retrieve the total number of glyphs present in the font face.
    fn glyph_count(&self) -> u16 {
        self.face().number_of_glyphs()
    }

    /// Attempt to calculate the metrics of a glyph from the associated glyph ID.
    fn glyph_metrics(&self, glyph_id: u16) -> Option<GlyphMetrics> {
        let glyph_id = owned_ttf_parser::GlyphId(glyph_id);

        let width = self.face().glyph_hor_advance(glyph_id)? as u32;
        // The height is corrected by the descender, valid for horizontally-laid fonts
        let height = self
            .face()
            .glyph_bounding_box(glyph_id)
            .map(|bounding_box| bounding_box.y_max - bounding_box.y_min - self.face().descender())
            .unwrap_or(1000) as u32;

        Some(GlyphMetrics { width, height })
    }

    /// Retrieve the underlying font face as a reference.
    pub fn face(&self) -> &Face<'_> {
        self.inner.as_face_ref()
    }

    pub fn units_per_em(&self) -> u16 {
        self.units_per_em
    }
}

/// A TrueType font to be embedded in the PDF document, together with the bytes it was loaded from.
#[derive(Debug, Clone)]
pub struct EmbeddedFont {
    /// The byte data the font was loaded from.
    bytes: Vec<u8>,
    /// The actual font face, together with its measure of units per em.
    ttf_face: TtfFontFace,
}

impl EmbeddedFont {
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, ContextError> {
        let ttf_face = TtfFontFace::from_bytes(&bytes)?;
        Ok(EmbeddedFont { bytes, ttf_face })
    }

    pub fn face(&self) -> &TtfFontFace {
        &self.ttf_face
    }

    /// Takes a well-formed font and inserts it into the PDF document as a `Type0` font with an
    /// `Identity-H` encoding, returning the associated PDF dictionary.
    pub(crate) fn insert_into_document(
        &self,
        inner_document: &mut lopdf::Document,
        face_identifier: &str,
    ) -> lopdf::Dictionary {
        use lopdf::Object::*;
        let face_metrics = self.ttf_face.font_metrics();

        let font_stream = lopdf::Stream::new(
            lopdf::Dictionary::from_iter(vec![("Length1", Integer(self.bytes.len() as i64))]),
            self.bytes.clone(),
        );

        let mut font_vector: Vec<(::std::string::String, lopdf::Object)> = vec![
            ("Type".into(), Name("Font".into())),
            ("Subtype".into(), Name("Type0".into())),
            ("BaseFont".into(), Name(face_identifier.as_bytes().to_vec())),
            // `Identity-H` is used for horizontal writing
            ("Encoding".into(), Name("Identity-H".into())),
        ];

        let mut font_descriptor_vector: Vec<(::std::string::String, lopdf::Object)> = vec![
            ("Type".into(), Name("FontDescriptor".into())),
            ("FontName".into(), Name(face_identifier.as_bytes().to_vec())),
            ("Ascent".into(), Integer(i64::from(face_metrics.ascent))),
            ("Descent".into(), Integer(i64::from(face_metrics.descent))),
            ("CapHeight".into(), Integer(i64::from(face_metrics.ascent))),
            ("ItalicAngle".into(), Integer(0)),
            // Nonsymbolic font using the standard Latin character set
            ("Flags".into(), Integer(32)),
            ("StemV".into(), Integer(80)),
        ];

        let mut maximum_character_height = 0;
        let mut total_width = 0;
        // Glyph ID -> (codepoint, width, height)
        let mut gid_to_glyph_properties_map = BTreeMap::<u32, (u32, u32, u32)>::new();
        gid_to_glyph_properties_map.insert(0, (0, 1000, 1000));

        for (glyph_id, character) in self.ttf_face.glyph_ids() {
            if let Some(glyph_metrics) = self.ttf_face.glyph_metrics(glyph_id) {
                maximum_character_height = maximum_character_height.max(glyph_metrics.height);
                total_width += glyph_metrics.width;
                gid_to_glyph_properties_map.insert(
                    glyph_id as u32,
                    (character as u32, glyph_metrics.width, glyph_metrics.height),
                );
            }
        }

        // Glyph IDs of one `beginbfchar` block must share their high byte and a block holds
        // at most 100 entries
        let mut current_high_byte: u16 = 0;
        let mut all_gid_to_character_blocks = Vec::new();
        let mut current_gid_to_character_block = Vec::new();
        for (glyph_id, (character, _glyph_width, _glyph_height)) in
            gid_to_glyph_properties_map.iter()
        {
            if (*glyph_id >> 8) as u16 != current_high_byte
                || current_gid_to_character_block.len() >= 100
            {
                all_gid_to_character_blocks
                    .push(std::mem::take(&mut current_gid_to_character_block));
                current_high_byte = (*glyph_id >> 8) as u16;
            }
            current_gid_to_character_block.push((*glyph_id, *character));
        }
        all_gid_to_character_blocks.push(current_gid_to_character_block);

        let cid_to_unicode_map =
            generate_cid_to_unicode_map(face_identifier, all_gid_to_character_blocks);
        let cid_to_unicode_map_stream = lopdf::Stream::new(
            lopdf::Dictionary::new(),
            cid_to_unicode_map.as_bytes().to_vec(),
        );
        let cid_to_unicode_map_stream_id = inner_document.add_object(cid_to_unicode_map_stream);

        // Widths are encoded as runs `first_gid [w1 w2 ...]` of consecutive glyph IDs, scaled to
        // a 1000 unit em square (see page 439 in the PDF 1.7 reference)
        let mut width_objects = Vec::<Object>::new();
        let mut current_lesser_glyph_id = 0;
        let mut current_upper_gid = 0;
        let mut current_widths_vector = Vec::<Object>::new();
        let percentage_font_scaling = 1000.0 / (face_metrics.units_per_em.max(1) as f32);

        for glyph_id in 0..self.ttf_face.glyph_count() {
            let Some(GlyphMetrics { width, .. }) = self.ttf_face.glyph_metrics(glyph_id) else {
                log::warn!(
                    "Glyph ID {} for the font {:?} has no width, skipping it",
                    glyph_id,
                    face_identifier
                );
                continue;
            };
            if glyph_id == current_upper_gid {
                current_widths_vector.push(Integer((width as f32 * percentage_font_scaling) as i64));
                current_upper_gid += 1;
            } else {
                width_objects.push(Integer(current_lesser_glyph_id as i64));
                width_objects.push(Array(std::mem::take(&mut current_widths_vector)));

                current_widths_vector.push(Integer((width as f32 * percentage_font_scaling) as i64));
                current_lesser_glyph_id = glyph_id;
                current_upper_gid = glyph_id + 1;
            }
        }
        width_objects.push(Integer(current_lesser_glyph_id as i64));
        width_objects.push(Array(std::mem::take(&mut current_widths_vector)));

        let mut font_descriptors = lopdf::Dictionary::from_iter(vec![
            ("Type", Name("Font".into())),
            ("Subtype", Name("CIDFontType2".into())),
            ("BaseFont", Name(face_identifier.as_bytes().to_vec())),
            (
                "CIDSystemInfo",
                Dictionary(lopdf::Dictionary::from_iter(vec![
                    ("Registry", String("Adobe".into(), StringFormat::Literal)),
                    ("Ordering", String("Identity".into(), StringFormat::Literal)),
                    ("Supplement", Integer(0)),
                ])),
            ),
            ("W", Array(width_objects)),
            ("DW", Integer(1000)),
        ]);

        let font_bounding_box = vec![
            Integer(0),
            Integer(maximum_character_height as i64),
            Integer(total_width as i64),
            Integer(maximum_character_height as i64),
        ];
        font_descriptor_vector.push((
            "FontFile2".into(),
            Reference(inner_document.add_object(font_stream)),
        ));
        // Not strictly needed, but Adobe Reader asks for it
        font_descriptor_vector.push(("FontBBox".into(), Array(font_bounding_box)));

        let font_descriptor_vector_id =
            inner_document.add_object(lopdf::Dictionary::from_iter(font_descriptor_vector));
        font_descriptors.set("FontDescriptor", Reference(font_descriptor_vector_id));

        font_vector.push((
            "DescendantFonts".into(),
            Array(vec![Dictionary(font_descriptors)]),
        ));
        font_vector.push(("ToUnicode".into(), Reference(cid_to_unicode_map_stream_id)));

        lopdf::Dictionary::from_iter(font_vector)
    }
}

/// The standard Type 1 fonts every PDF reader provides, used when no TrueType font is configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinFont {
    Helvetica,
    HelveticaBold,
}

/// Advance widths (per 1000 em) of the printable ASCII range 0x20..=0x7E.
#[rustfmt::skip]
const HELVETICA_WIDTHS: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278,
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, 278, 278, 584, 584, 584, 556,
    1015, 667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833, 722, 778,
    667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, 278, 278, 278, 469, 556,
    333, 556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833, 556, 556,
    556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500, 334, 260, 334, 584,
];

#[rustfmt::skip]
const HELVETICA_BOLD_WIDTHS: [u16; 95] = [
    278, 333, 474, 556, 556, 889, 722, 238, 333, 333, 389, 584, 278, 333, 278, 278,
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, 333, 333, 584, 584, 584, 611,
    975, 722, 722, 722, 722, 667, 611, 778, 722, 278, 556, 722, 611, 833, 722, 778,
    667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, 333, 278, 333, 584, 556,
    333, 556, 611, 556, 611, 556, 333, 611, 611, 278, 278, 556, 278, 889, 611, 611,
    611, 611, 389, 556, 333, 611, 556, 778, 556, 556, 500, 389, 280, 389, 584,
];

impl BuiltinFont {
    pub fn base_font(&self) -> &'static str {
        match self {
            BuiltinFont::Helvetica => "Helvetica",
            BuiltinFont::HelveticaBold => "Helvetica-Bold",
        }
    }

    /// Advance width of a character, per 1000 em.
    pub fn char_width(&self, character: char) -> u16 {
        let (table, bold) = match self {
            BuiltinFont::Helvetica => (&HELVETICA_WIDTHS, false),
            BuiltinFont::HelveticaBold => (&HELVETICA_BOLD_WIDTHS, true),
        };
        match character {
            ' '..='~' => table[character as usize - 0x20],
            '\u{a0}' => 278,
            'Æ' | '—' => 1000,
            'æ' => 889,
            'Ø' => 778,
            'ø' | 'ß' => 611,
            '°' => 400,
            '•' => 350,
            '–' | '€' => 556,
            '‘' | '’' => if bold { 278 } else { 222 },
            '“' | '”' => if bold { 500 } else { 333 },
            _ => {
                // Accented letters take the width of their base letter
                let base = std::iter::once(character).nfd().next().unwrap_or(character);
                if base != character && (' '..='~').contains(&base) {
                    table[base as usize - 0x20]
                } else {
                    556
                }
            }
        }
    }

    /// Encodes text in `WinAnsiEncoding`, replacing characters outside of it with `?`.
    pub fn encode(&self, text: &str) -> Vec<u8> {
        text.nfc()
            .map(|character| match character {
                ' '..='~' | '\u{a0}'..='\u{ff}' => character as u32 as u8,
                '\t' => b' ',
                '€' => 0x80,
                '‚' => 0x82,
                '„' => 0x84,
                '…' => 0x85,
                '‘' => 0x91,
                '’' => 0x92,
                '“' => 0x93,
                '”' => 0x94,
                '•' => 0x95,
                '–' => 0x96,
                '—' => 0x97,
                '™' => 0x99,
                _ => b'?',
            })
            .collect()
    }
}

/// A font usable both for measuring text and for drawing it into the PDF document.
#[derive(Debug, Clone)]
pub enum FontFace {
    Builtin(BuiltinFont),
    Embedded(Arc<EmbeddedFont>),
}

impl FontFace {
    /// Width in points of the text set at the given size.
    pub fn text_width(&self, text: &str, font_size: f32) -> f32 {
        match self {
            FontFace::Builtin(font) => {
                let units: u32 = text.nfc().map(|c| u32::from(font.char_width(c))).sum();
                units as f32 * font_size / 1000.0
            }
            FontFace::Embedded(font) => {
                let face = font.face();
                let units_per_em = face.units_per_em().max(1) as f32;
                let units: f32 = text
                    .nfc()
                    .map(|character| face.advance_units(face.glyph_or_notdef(character)))
                    .sum();
                units * font_size / units_per_em
            }
        }
    }

    /// Distance in points from the baseline to the top of the tallest glyphs.
    pub fn ascent(&self, font_size: f32) -> f32 {
        match self {
            FontFace::Builtin(_) => 0.718 * font_size,
            FontFace::Embedded(font) => {
                let metrics = font.face().font_metrics();
                f32::from(metrics.ascent) * font_size / metrics.units_per_em.max(1) as f32
            }
        }
    }

    /// Encodes the text into the bytes of a PDF string operand for this font.
    pub fn encode(&self, text: &str) -> (Vec<u8>, StringFormat) {
        match self {
            FontFace::Builtin(font) => (font.encode(text), StringFormat::Literal),
            FontFace::Embedded(font) => {
                let mut glyph_id_bytes = Vec::with_capacity(text.len() * 2);
                for character in text.nfc() {
                    let glyph_id = font.face().glyph_or_notdef(character);
                    if glyph_id == 0 {
                        log::warn!("Unable to find the character {:?} in the font, using .notdef", character);
                    }
                    glyph_id_bytes.extend_from_slice(&glyph_id.to_be_bytes());
                }
                (glyph_id_bytes, StringFormat::Hexadecimal)
            }
        }
    }

    /// Whether glyph outlines are available for rasterization.
    pub fn has_outlines(&self) -> bool {
        matches!(self, FontFace::Embedded(_))
    }
}

/// The fonts used by one compile: one for body text and one for headings.
#[derive(Debug, Clone)]
pub struct FontSet {
    pub regular: FontFace,
    pub bold: FontFace,
}

impl FontSet {
    /// Helvetica and Helvetica-Bold, which need no font files.
    pub fn builtin() -> Self {
        FontSet {
            regular: FontFace::Builtin(BuiltinFont::Helvetica),
            bold: FontFace::Builtin(BuiltinFont::HelveticaBold),
        }
    }

    /// Load the TrueType fonts associated to each weight, defaulting to the built-in fonts for
    /// the weights without an association.
    pub fn from_font_files(
        regular: Option<&Path>,
        bold: Option<&Path>,
    ) -> Result<Self, ContextError> {
        let mut font_set = FontSet::builtin();
        if let Some(path) = regular {
            font_set.regular = load_font_file(path)?;
        }
        if let Some(path) = bold {
            font_set.bold = load_font_file(path)?;
        }
        Ok(font_set)
    }

    pub fn get(&self, weight: FontWeight) -> &FontFace {
        match weight {
            FontWeight::Regular => &self.regular,
            FontWeight::Bold => &self.bold,
        }
    }
}

/// Read and parse a TTF/OTF font file.
pub fn load_font_file(font_path: &Path) -> Result<FontFace, ContextError> {
    let font_bytes = std::fs::read(font_path).map_err(|error| {
        ContextError::with_error(
            ErrorKind::FontError,
            format!("Failed to read font {:?}", font_path),
            &error,
        )
    })?;
    let font = EmbeddedFont::from_bytes(font_bytes)?;
    log::debug!("Loaded font {:?}", font_path);
    Ok(FontFace::Embedded(Arc::new(font)))
}

type GlyphId = u32;
type UnicodeCodePoint = u32;
type CmapBlock = Vec<(GlyphId, UnicodeCodePoint)>;

const CMAP_PROLOGUE: &str = "/CIDInit /ProcSet findresource begin\n\
12 dict begin\n\
begincmap\n\
/CIDSystemInfo << /Registry (Adobe) /Ordering (UCS) /Supplement 0 >> def\n\
/CMapType 2 def\n\
1 begincodespacerange\n\
<0000> <ffff>\n\
endcodespacerange\n";

const CMAP_EPILOGUE: &str = "endcmap\n\
CMapName currentdict /CMap defineresource pop\n\
end\n\
end\n";

/// Generates the `ToUnicode` character map from the glyph ID blocks.
fn generate_cid_to_unicode_map(face_name: &str, all_cmap_blocks: Vec<CmapBlock>) -> String {
    let mut cid_to_unicode_map = String::from(CMAP_PROLOGUE);
    cid_to_unicode_map.push_str(&format!("/CMapName /{face_name}-UCS def\n"));

    for cmap_block in all_cmap_blocks.into_iter().filter(|block| !block.is_empty()) {
        cid_to_unicode_map.push_str(&format!("{} beginbfchar\n", cmap_block.len()));
        for (glyph_id, unicode) in cmap_block {
            cid_to_unicode_map.push_str(&format!("<{glyph_id:04x}> <{unicode:04x}>\n"));
        }
        cid_to_unicode_map.push_str("endbfchar\n");
    }

    cid_to_unicode_map.push_str(CMAP_EPILOGUE);
    cid_to_unicode_map
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn helvetica_widths_follow_the_metrics_tables() {
        let regular = FontFace::Builtin(BuiltinFont::Helvetica);
        // H(722) + i(222) = 944 units
        assert!((regular.text_width("Hi", 10.0) - 9.44).abs() < 1e-4);
        let bold = FontFace::Builtin(BuiltinFont::HelveticaBold);
        assert!(bold.text_width("Hi", 10.0) > regular.text_width("Hi", 10.0));
        assert_eq!(regular.text_width("", 12.0), 0.0);
    }

    #[test]
    fn accented_letters_measure_like_their_base() {
        let font = BuiltinFont::Helvetica;
        assert_eq!(font.char_width('é'), font.char_width('e'));
        assert_eq!(font.char_width('Å'), font.char_width('A'));
        assert_eq!(font.char_width('ø'), 611);
    }

    #[test]
    fn win_ansi_encoding_keeps_latin1_and_replaces_the_rest() {
        let font = BuiltinFont::Helvetica;
        assert_eq!(font.encode("Søk – 1"), vec![b'S', 0xF8, b'k', b' ', 0x96, b' ', b'1']);
        assert_eq!(font.encode("日"), vec![b'?']);
    }

    #[test]
    fn missing_characters_are_encoded_as_notdef_and_measured_alike() {
        let font_path = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("fonts/DejaVu/DejaVuSans.ttf");
        let font = load_font_file(&font_path).unwrap();
        let FontFace::Embedded(embedded) = &font else {
            panic!("expected an embedded font");
        };
        let face = embedded.face();
        let glyph_a = face.glyph_id('A').unwrap();
        assert_eq!(face.glyph_id('日'), None);

        let (bytes, format) = font.encode("A日A");
        assert!(matches!(format, StringFormat::Hexadecimal));
        let glyph_ids: Vec<u16> = bytes
            .chunks(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        assert_eq!(glyph_ids, vec![glyph_a, 0, glyph_a]);

        let encoded_units: f32 = glyph_ids.iter().map(|glyph_id| face.advance_units(*glyph_id)).sum();
        let expected_width = encoded_units * 10.0 / face.units_per_em() as f32;
        assert!((font.text_width("A日A", 10.0) - expected_width).abs() < 1e-4);
        assert!(font.text_width("A日A", 10.0) > font.text_width("AA", 10.0));
    }

    #[test]
    fn cmap_contains_one_block_per_group() {
        let map = generate_cid_to_unicode_map("F0", vec![vec![(1, 0x41), (2, 0x42)], vec![]]);
        assert!(map.contains("2 beginbfchar\n<0001> <0041>\n<0002> <0042>\nendbfchar"));
        assert!(map.contains("/CMapName /F0-UCS def"));
        assert!(map.ends_with(CMAP_EPILOGUE));
    }
}
