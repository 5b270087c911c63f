use owned_ttf_parser::{GlyphId, OutlineBuilder};
use tiny_skia::{
    FillRule, FilterQuality, Paint, Path, PathBuilder, Pixmap, PixmapPaint, Rect, Stroke,
    Transform,
};
use unicode_normalization::UnicodeNormalization as _;

use crate::font::{FontFace, FontSet};
use crate::scene::{Color, DecodedImage, Element, ImageSource, Scene};

/// The pixels of one rasterized page, 8-bit RGB without alpha.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterImage {
    pub width: u32,
    pub height: u32,
    pub rgb: Vec<u8>,
}

/// Why a page could not be rasterized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RasterError {
    /// The page references content the rasterizer refuses to read back, stripping the images
    /// of the page may help.
    Tainted(String),
    /// Any other failure, nothing on the page can be changed to recover.
    Failed(String),
}

impl std::fmt::Display for RasterError {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RasterError::Tainted(reason) => write!(formatter, "tainted surface: {}", reason),
            RasterError::Failed(reason) => write!(formatter, "rasterization failed: {}", reason),
        }
    }
}

impl std::error::Error for RasterError {}

/// Turns a composed page into a bitmap.
pub trait Rasterizer {
    fn render_page(&self, scene: &Scene, fonts: &FontSet) -> Result<RasterImage, RasterError>;
}

/// A rasterizer for environments without raster support, every page fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableRasterizer;

impl Rasterizer for UnavailableRasterizer {
    fn render_page(&self, _scene: &Scene, _fonts: &FontSet) -> Result<RasterImage, RasterError> {
        Err(RasterError::Failed("no rasterizer is available".into()))
    }
}

/// Software rasterizer drawing the page at the configured resolution.
///
/// Text is drawn from the glyph outlines of the fonts, so only embedded TrueType fonts can be
/// rasterized. External images are never fetched: a page holding one is reported as tainted.
#[derive(Debug, Clone, Copy)]
pub struct SkiaRasterizer {
    pub dpi: u32,
}

impl SkiaRasterizer {
    pub fn new(dpi: u32) -> Self {
        SkiaRasterizer { dpi: dpi.max(1) }
    }

    /// Pixels per point.
    fn scale(&self) -> f32 {
        self.dpi as f32 / 72.0
    }
}

impl Default for SkiaRasterizer {
    fn default() -> Self {
        SkiaRasterizer::new(110)
    }
}

impl Rasterizer for SkiaRasterizer {
    fn render_page(&self, scene: &Scene, fonts: &FontSet) -> Result<RasterImage, RasterError> {
        let scale = self.scale();
        let width = (scene.width * scale).round() as u32;
        let height = (scene.height * scale).round() as u32;
        let mut pixmap = Pixmap::new(width, height).ok_or_else(|| {
            RasterError::Failed(format!("unable to allocate a {width}x{height} surface"))
        })?;
        pixmap.fill(tiny_skia::Color::WHITE);
        let base_transform = Transform::from_scale(scale, scale);

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
                    let Some(rect) = Rect::from_xywh(*x, *y, *width, *height) else {
                        continue;
                    };
                    if let Some(fill) = fill {
                        pixmap.fill_rect(rect, &paint(*fill), base_transform, None);
                    }
                    if let Some((color, line_width)) = stroke {
                        let path = PathBuilder::from_rect(rect);
                        stroke_path(&mut pixmap, &path, *color, *line_width, base_transform);
                    }
                }
                Element::Rule {
                    from,
                    to,
                    color,
                    line_width,
                } => {
                    let mut builder = PathBuilder::new();
                    builder.move_to(from[0], from[1]);
                    builder.line_to(to[0], to[1]);
                    if let Some(path) = builder.finish() {
                        stroke_path(&mut pixmap, &path, *color, *line_width, base_transform);
                    }
                }
                Element::Text {
                    x,
                    y,
                    text,
                    font_size,
                    weight,
                    color,
                } => {
                    let FontFace::Embedded(font) = fonts.get(*weight) else {
                        return Err(RasterError::Failed(format!(
                            "the {:?} font has no glyph outlines",
                            weight
                        )));
                    };
                    let face = font.face();
                    let glyph_scale = font_size / face.units_per_em().max(1) as f32;
                    let paint = paint(*color);
                    let mut pen_x = *x;
                    for character in text.nfc() {
                        let glyph_id = face.glyph_or_notdef(character);
                        let mut builder = GlyphPathBuilder::new(glyph_scale);
                        if face.face().outline_glyph(GlyphId(glyph_id), &mut builder).is_some() {
                            if let Some(path) = builder.finish() {
                                // Glyph outlines point upwards
                                let local = Transform::from_row(1.0, 0.0, 0.0, -1.0, pen_x, *y);
                                pixmap.fill_path(
                                    &path,
                                    &paint,
                                    FillRule::Winding,
                                    base_transform.pre_concat(local),
                                    None,
                                );
                            }
                        }
                        pen_x += face.advance_units(glyph_id) * glyph_scale;
                    }
                }
                Element::Image {
                    x,
                    y,
                    width,
                    height,
                    source,
                } => {
                    let image = match source {
                        ImageSource::Embedded(image) => image,
                        ImageSource::External(href) => {
                            return Err(RasterError::Tainted(format!(
                                "the image {:?} is not embedded in the page",
                                href
                            )));
                        }
                    };
                    let Some(image_pixmap) = premultiplied_pixmap(image) else {
                        log::warn!("Skipping an empty {}x{} image", image.width, image.height);
                        continue;
                    };
                    let image_transform = Transform::from_row(
                        width / image.width as f32,
                        0.0,
                        0.0,
                        height / image.height as f32,
                        *x,
                        *y,
                    );
                    pixmap.draw_pixmap(
                        0,
                        0,
                        image_pixmap.as_ref(),
                        &PixmapPaint {
                            quality: FilterQuality::Bilinear,
                            ..PixmapPaint::default()
                        },
                        base_transform.pre_concat(image_transform),
                        None,
                    );
                }
            }
        }

        // The surface is opaque, so the premultiplied channels are the final colors
        let rgb = pixmap
            .data()
            .chunks_exact(4)
            .flat_map(|pixel| [pixel[0], pixel[1], pixel[2]])
            .collect();

        Ok(RasterImage { width, height, rgb })
    }
}

fn paint(color: Color) -> Paint<'static> {
    let mut paint = Paint::default();
    paint.set_color_rgba8(color.r, color.g, color.b, 255);
    paint.anti_alias = true;
    paint
}

fn stroke_path(pixmap: &mut Pixmap, path: &Path, color: Color, line_width: f32, transform: Transform) {
    let stroke = Stroke {
        width: line_width,
        ..Stroke::default()
    };
    pixmap.stroke_path(path, &paint(color), &stroke, transform, None);
}

fn premultiplied_pixmap(image: &DecodedImage) -> Option<Pixmap> {
    let mut pixmap = Pixmap::new(image.width, image.height)?;
    for (source, destination) in image
        .rgba
        .chunks_exact(4)
        .zip(pixmap.data_mut().chunks_exact_mut(4))
    {
        let alpha = source[3];
        destination[0] = premultiply(source[0], alpha);
        destination[1] = premultiply(source[1], alpha);
        destination[2] = premultiply(source[2], alpha);
        destination[3] = alpha;
    }
    Some(pixmap)
}

fn premultiply(channel: u8, alpha: u8) -> u8 {
    let product = u16::from(channel) * u16::from(alpha) + 127;
    ((product + (product >> 8)) >> 8) as u8
}

/// Collects the outline of a glyph into a path, scaled from font units to points.
struct GlyphPathBuilder {
    builder: PathBuilder,
    scale: f32,
}

impl GlyphPathBuilder {
    fn new(scale: f32) -> Self {
        GlyphPathBuilder {
            builder: PathBuilder::new(),
            scale,
        }
    }

    fn finish(self) -> Option<Path> {
        self.builder.finish()
    }
}

impl OutlineBuilder for GlyphPathBuilder {
    fn move_to(&mut self, x: f32, y: f32) {
        self.builder.move_to(x * self.scale, y * self.scale);
    }

    fn line_to(&mut self, x: f32, y: f32) {
        self.builder.line_to(x * self.scale, y * self.scale);
    }

    fn quad_to(&mut self, x1: f32, y1: f32, x: f32, y: f32) {
        self.builder
            .quad_to(x1 * self.scale, y1 * self.scale, x * self.scale, y * self.scale);
    }

    fn curve_to(&mut self, x1: f32, y1: f32, x2: f32, y2: f32, x: f32, y: f32) {
        self.builder.cubic_to(
            x1 * self.scale,
            y1 * self.scale,
            x2 * self.scale,
            y2 * self.scale,
            x * self.scale,
            y * self.scale,
        );
    }

    fn close(&mut self) {
        self.builder.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::font::FontWeight;
    use crate::layout::PageGeometry;
    use std::ops::Range;
    use std::sync::Arc;

    fn small_geometry() -> PageGeometry {
        PageGeometry {
            width: 72.0,
            height: 36.0,
            ..PageGeometry::default()
        }
    }

    #[test]
    fn fills_shapes_at_the_requested_resolution() {
        let mut scene = Scene::new(&small_geometry());
        scene.push(Element::Rect {
            x: 0.0,
            y: 0.0,
            width: 36.0,
            height: 36.0,
            fill: Some(Color::BLACK),
            stroke: None,
        });
        let image = SkiaRasterizer::new(144)
            .render_page(&scene, &FontSet::builtin())
            .unwrap();
        assert_eq!((image.width, image.height), (144, 72));
        assert_eq!(image.rgb.len(), 144 * 72 * 3);
        // Left half black, right half white
        let row = 36 * 144 * 3;
        assert_eq!(&image.rgb[row + 10 * 3..row + 10 * 3 + 3], &[0, 0, 0]);
        assert_eq!(&image.rgb[row + 130 * 3..row + 130 * 3 + 3], &[255, 255, 255]);
    }

    #[test]
    fn draws_embedded_images() {
        let mut scene = Scene::new(&small_geometry());
        scene.push(Element::Image {
            x: 0.0,
            y: 0.0,
            width: 72.0,
            height: 36.0,
            source: ImageSource::Embedded(Arc::new(DecodedImage {
                width: 2,
                height: 1,
                rgba: vec![255, 0, 0, 255, 255, 0, 0, 255],
            })),
        });
        let image = SkiaRasterizer::new(72)
            .render_page(&scene, &FontSet::builtin())
            .unwrap();
        let center = (18 * 72 + 36) * 3;
        assert_eq!(&image.rgb[center..center + 3], &[255, 0, 0]);
    }

    #[test]
    fn external_images_taint_the_page() {
        let mut scene = Scene::new(&small_geometry());
        scene.push(Element::Image {
            x: 0.0,
            y: 0.0,
            width: 10.0,
            height: 10.0,
            source: ImageSource::External("https://example.com/logo.png".into()),
        });
        let error = SkiaRasterizer::default()
            .render_page(&scene, &FontSet::builtin())
            .unwrap_err();
        assert!(matches!(error, RasterError::Tainted(_)));
    }

    fn dejavu_fonts() -> FontSet {
        let fonts_directory = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("fonts/DejaVu");
        FontSet::from_font_files(
            Some(&fonts_directory.join("DejaVuSans.ttf")),
            Some(&fonts_directory.join("DejaVuSans-Bold.ttf")),
        )
        .unwrap()
    }

    fn is_dark(image: &RasterImage, x: u32, y: u32) -> bool {
        let offset = ((y * image.width + x) * 3) as usize;
        image.rgb[offset..offset + 3].iter().all(|channel| *channel < 128)
    }

    fn dark_pixels(image: &RasterImage, columns: Range<u32>, rows: Range<u32>) -> usize {
        rows.flat_map(|y| columns.clone().map(move |x| (x, y)))
            .filter(|(x, y)| is_dark(image, *x, *y))
            .count()
    }

    #[test]
    fn text_is_drawn_upright_on_its_baseline() {
        let mut scene = Scene::new(&small_geometry());
        scene.push(Element::Text {
            x: 2.0,
            y: 20.0,
            text: "HHHH".into(),
            font_size: 12.0,
            weight: FontWeight::Regular,
            color: Color::BLACK,
        });
        let image = SkiaRasterizer::new(72).render_page(&scene, &dejavu_fonts()).unwrap();

        // The cap height of the glyphs sits above the baseline, nothing hangs below it
        assert!(dark_pixels(&image, 2..12, 12..20) > 0);
        assert_eq!(dark_pixels(&image, 0..72, 22..36), 0);
        assert_eq!(dark_pixels(&image, 0..72, 0..8), 0);
        // Four advances of about 9pt each put the last glyph past 28pt and stop before 42pt
        assert!(dark_pixels(&image, 29..40, 12..20) > 0);
        assert_eq!(dark_pixels(&image, 42..72, 0..36), 0);
    }

    #[test]
    fn text_without_outlines_fails() {
        let mut scene = Scene::new(&small_geometry());
        scene.push(Element::Text {
            x: 2.0,
            y: 20.0,
            text: "Weld".into(),
            font_size: 10.0,
            weight: FontWeight::Regular,
            color: Color::BLACK,
        });
        let error = SkiaRasterizer::default()
            .render_page(&scene, &FontSet::builtin())
            .unwrap_err();
        assert!(matches!(error, RasterError::Failed(_)));
        assert!(matches!(
            UnavailableRasterizer.render_page(&Scene::new(&small_geometry()), &FontSet::builtin()),
            Err(RasterError::Failed(_))
        ));
    }
}
