use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::{ContextError, ErrorKind};
use crate::font::{FontSet, FontWeight};
use crate::raster::{Rasterizer, SkiaRasterizer, UnavailableRasterizer};
use crate::render::RenderOptions;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct CompilerConfiguration {
    /// Table rows per page when the pages are rasterized.
    pub rows_per_page: usize,
    pub raster_dpi: u32,
    /// Disabling rasterization draws every document natively.
    pub rasterize: bool,
    pub brand_line: String,
    pub font_associations: Vec<FontAssociation>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FontAssociation {
    pub font_weight: FontWeight,
    pub font_file_path: PathBuf,
}

impl Default for CompilerConfiguration {
    fn default() -> Self {
        CompilerConfiguration {
            rows_per_page: 14,
            raster_dpi: 110,
            rasterize: true,
            brand_line: "Document Package".to_string(),
            font_associations: Vec::new(),
        }
    }
}

impl CompilerConfiguration {
    pub fn from_path(configuration_file_path: &Path) -> Result<Self, ContextError> {
        let configuration_file_contents =
            std::fs::read_to_string(configuration_file_path).map_err(|error| {
                ContextError::with_error(
                    ErrorKind::ConfigurationError,
                    format!("Failed to read the configuration file {:?}", configuration_file_path),
                    &error,
                )
            })?;
        let configuration: CompilerConfiguration =
            serde_json::from_str(&configuration_file_contents).map_err(|error| {
                ContextError::with_error(
                    ErrorKind::ConfigurationError,
                    "Failed to parse the configuration file",
                    &error,
                )
            })?;

        if configuration.rows_per_page == 0 {
            return Err(ContextError::with_context(
                ErrorKind::ConfigurationError,
                "The number of rows per page must be positive",
            ));
        }
        if configuration.raster_dpi == 0 {
            return Err(ContextError::with_context(
                ErrorKind::ConfigurationError,
                "The raster resolution must be positive",
            ));
        }

        Ok(configuration)
    }

    pub fn get_font_path(&self, font_weight: FontWeight) -> Option<PathBuf> {
        self.font_associations
            .iter()
            .find(|font_association| font_association.font_weight == font_weight)
            .map(|font_association| font_association.font_file_path.clone())
    }

    /// The associated fonts, built-in metrics for the weights without a font file.
    pub fn load_fonts(&self) -> Result<FontSet, ContextError> {
        FontSet::from_font_files(
            self.get_font_path(FontWeight::Regular).as_deref(),
            self.get_font_path(FontWeight::Bold).as_deref(),
        )
    }

    pub fn render_options(&self, generated_at: OffsetDateTime) -> RenderOptions {
        RenderOptions {
            rows_per_page: self.rows_per_page,
            rasterize: self.rasterize,
            brand_line: self.brand_line.clone(),
            ..RenderOptions::new(generated_at)
        }
    }

    pub fn rasterizer(&self) -> Box<dyn Rasterizer> {
        if self.rasterize {
            Box::new(SkiaRasterizer::new(self.raster_dpi))
        } else {
            Box::new(UnavailableRasterizer)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_configuration(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("docpack-{}-{}.json", name, std::process::id()));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn missing_fields_take_the_defaults() {
        let path = write_configuration(
            "partial",
            r#"{
                "rowsPerPage": 20,
                "fontAssociations": [{ "fontWeight": "bold", "fontFilePath": "fonts/Bold.ttf" }]
            }"#,
        );
        let configuration = CompilerConfiguration::from_path(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(configuration.rows_per_page, 20);
        assert_eq!(configuration.raster_dpi, 110);
        assert!(configuration.rasterize);
        assert_eq!(configuration.get_font_path(FontWeight::Bold), Some(PathBuf::from("fonts/Bold.ttf")));
        assert_eq!(configuration.get_font_path(FontWeight::Regular), None);

        let options = configuration.render_options(OffsetDateTime::UNIX_EPOCH);
        assert_eq!(options.rows_per_page, 20);
        assert_eq!(options.brand_line, "Document Package");
    }

    #[test]
    fn invalid_configurations_are_rejected() {
        let path = write_configuration("zero-rows", r#"{ "rowsPerPage": 0 }"#);
        let error = CompilerConfiguration::from_path(&path).unwrap_err();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(error.kind, ErrorKind::ConfigurationError);

        let error = CompilerConfiguration::from_path(Path::new("/nonexistent/docpack.json")).unwrap_err();
        assert_eq!(error.kind, ErrorKind::ConfigurationError);
    }

    #[test]
    fn fonts_default_to_the_builtin_metrics() {
        let fonts = CompilerConfiguration::default().load_fonts().unwrap();
        assert!(!fonts.regular.has_outlines());
        assert!(!fonts.bold.has_outlines());
    }
}
