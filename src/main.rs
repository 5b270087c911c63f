#![warn(clippy::unwrap_used)]

use std::path::{Path, PathBuf};

use clap::Parser;
use docpack::{
    assemble::compile_document_package,
    attachments::ResolvedAttachment,
    configuration::CompilerConfiguration,
    error::{ContextError, ErrorKind},
    package::compile_package,
    records::PackageRequest,
};
use time::OffsetDateTime;

#[derive(Parser, Debug)]
#[command(version, long_about = None)]
struct CliArguments {
    #[arg(short = 'r', long = "request", value_name = "json_file")]
    request_path: PathBuf,
    #[arg(short = 'o', long = "output", value_name = "file_path")]
    output_file_path: PathBuf,
    #[arg(short = 'c', long = "configuration", value_name = "json_file")]
    configuration_path: Option<PathBuf>,
    #[arg(
        short = 'a',
        long = "attachments",
        value_name = "directory",
        help = "Directory holding the attachments, each stored under its file id"
    )]
    attachments_directory: Option<PathBuf>,
    #[arg(long = "pdf-only", help = "Write the compiled report instead of the whole package")]
    pdf_only: bool,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    if let Err(error) = fallible_main() {
        log::error!("{}", error);
        std::process::exit(1);
    }
}

fn read_attachment(directory: Option<&Path>, attachment: &ResolvedAttachment) -> Result<Vec<u8>, ContextError> {
    let Some(directory) = directory else {
        return Err(ContextError::with_context(
            ErrorKind::AttachmentFetchError,
            "No attachment directory was given",
        ));
    };
    let attachment_path = directory.join(&attachment.file_id);
    std::fs::read(&attachment_path).map_err(|error| {
        ContextError::with_error(
            ErrorKind::AttachmentFetchError,
            format!("Failed to read {:?}", attachment_path),
            &error,
        )
    })
}

fn write_output(output_file_path: &Path, output: &[u8]) -> Result<(), ContextError> {
    std::fs::write(output_file_path, output).map_err(|error| {
        ContextError::with_error(
            ErrorKind::OutputError,
            format!("Failed to write the output file {:?}", output_file_path),
            &error,
        )
    })
}

fn fallible_main() -> Result<(), ContextError> {
    let arguments = CliArguments::parse();
    log::debug!("{:?}", arguments);

    let configuration = match &arguments.configuration_path {
        Some(configuration_path) => CompilerConfiguration::from_path(configuration_path)?,
        None => CompilerConfiguration::default(),
    };
    let request = PackageRequest::from_path(&arguments.request_path)?;
    let fonts = configuration.load_fonts()?;
    let rasterizer = configuration.rasterizer();
    let options = configuration.render_options(OffsetDateTime::now_utc());

    let output = if arguments.pdf_only {
        let outcome = compile_document_package(
            &request.project,
            &request.selection,
            &request.data,
            &options,
            &fonts,
            rasterizer.as_ref(),
        )?;
        log::info!("Rendered {} pages with the {:?} strategy", outcome.page_count, outcome.strategy);
        outcome.pdf
    } else {
        let attachments_directory = arguments.attachments_directory.as_deref();
        let package = compile_package(&request, &options, &fonts, rasterizer.as_ref(), |attachment| {
            read_attachment(attachments_directory, attachment)
        })?;
        log::info!(
            "Rendered {} pages with the {:?} strategy",
            package.outcome.page_count,
            package.outcome.strategy
        );
        package.archive
    };

    write_output(&arguments.output_file_path, &output)?;
    log::info!("Saved the output file to the path: {:?}", arguments.output_file_path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unwritable_output_is_an_output_error() {
        let output_file_path = std::env::temp_dir()
            .join("docpack-missing-directory")
            .join("nested")
            .join("package.zip");
        let error = write_output(&output_file_path, b"PK").unwrap_err();
        assert_eq!(error.kind, ErrorKind::OutputError);
        assert!(error.to_string().starts_with("Failed to write the output file"));
    }
}
