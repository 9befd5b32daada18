use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum UploaderError {
    #[error("invalid accession: {0}")]
    InvalidAccession(String),

    #[error("invalid library type: {0} (expected metagenome or metatranscriptome)")]
    InvalidLibraryType(String),

    #[error("invalid hold date: {0} (expected dd-mm-yyyy)")]
    InvalidHoldDate(String),

    #[error("ENA_WEBIN and ENA_WEBIN_PASSWORD must be set for private queries")]
    MissingCredentials,

    #[error("ENA request failed: {0}")]
    EnaHttp(String),

    #[error("ENA returned status {status}: {message}")]
    EnaStatus { status: u16, message: String },

    #[error("could not find {0} in ENA")]
    AccessionNotFound(String),

    #[error("failed to read metadata CSV at {path}: {message}")]
    CsvRead { path: PathBuf, message: String },

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("failed to render XML: {0}")]
    Xml(String),
}
