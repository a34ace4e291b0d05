use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum SyncError {
    #[error("invalid collection name: {0}")]
    InvalidCollection(String),

    #[error("invalid item identifier: {0}")]
    InvalidIdentifier(String),

    #[error("unknown download format: {0}")]
    #[diagnostic(help("known formats: zip, torrent"))]
    UnknownFormat(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("failed to build HTTP client: {0}")]
    HttpClient(String),

    #[error("catalog request failed: {0}")]
    CatalogHttp(String),

    #[error("catalog returned status {status}: {message}")]
    CatalogUnavailable { status: u16, message: String },

    #[error("catalog response could not be decoded: {0}")]
    CatalogResponse(String),

    #[error("malformed manifest {path} at line {line}: {detail}")]
    #[diagnostic(help("fix or remove the manifest file; it is never repaired automatically"))]
    ManifestParse {
        path: String,
        line: usize,
        detail: String,
    },

    #[error("download of {url} failed: {detail}")]
    ItemFetch { url: String, detail: String },

    #[error("download of {url} returned status {status}")]
    ItemStatus { url: String, status: u16 },

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

impl SyncError {
    pub fn is_catalog(&self) -> bool {
        matches!(
            self,
            SyncError::CatalogHttp(_)
                | SyncError::CatalogUnavailable { .. }
                | SyncError::CatalogResponse(_)
        )
    }
}
