//! Typed errors for module boundaries callers must branch on. Everything
//! above the module boundary (main.rs, publisher setup) uses `anyhow`.

use thiserror::Error;

/// Errors from saving the product catalog document. Read errors never
/// surface here: `persistence::load_catalog` treats a missing, empty, or
/// malformed file as an empty catalog and logs a warning instead of
/// failing, so there is no read-error path that produces a typed error.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to write catalog at {path}: {source}")]
    Write {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to create catalog directory {path}: {source}")]
    CreateDir {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("catalog document at {path} is malformed: {source}")]
    Malformed {
        path: std::path::PathBuf,
        #[source]
        source: serde_json::Error,
    },
}
