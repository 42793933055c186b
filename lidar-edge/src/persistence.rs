//! Catalog persistence: loads/stores the product catalog as a single JSON
//! document at a configured path. Writes are whole-file replacements,
//! performed synchronously so a mutation never reports success before the
//! document hits disk.

use std::path::Path;

use lidar_types::CatalogDocument;
use tracing::{info, warn};

use crate::error::CatalogError;

/// Loads the catalog document from `path`. Returns an empty document (the
/// evaluator seeds an example product in that case) if the file is absent,
/// empty, or cannot be parsed — the latter is logged at `warn` per the
/// configuration-error handling rule, not surfaced as a fatal error.
pub fn load_catalog(path: &Path) -> CatalogDocument {
    if !path.exists() {
        info!("persistence: no catalog at {}, starting empty", path.display());
        return CatalogDocument::default();
    }

    match std::fs::read_to_string(path) {
        Ok(data) if data.trim().is_empty() => CatalogDocument::default(),
        Ok(data) => match serde_json::from_str::<CatalogDocument>(&data) {
            Ok(doc) => {
                info!(
                    "persistence: loaded {} products from {}",
                    doc.products.len(),
                    path.display()
                );
                doc
            }
            Err(e) => {
                warn!("persistence: catalog at {} is malformed: {e}, starting empty", path.display());
                CatalogDocument::default()
            }
        },
        Err(e) => {
            warn!("persistence: failed to read {}: {e}, starting empty", path.display());
            CatalogDocument::default()
        }
    }
}

/// Saves the catalog document as a whole-file JSON replacement. Creates the
/// parent directory if missing.
pub fn save_catalog(path: &Path, doc: &CatalogDocument) -> Result<(), CatalogError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|source| CatalogError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }
    }

    let json = serde_json::to_string_pretty(doc).map_err(|source| CatalogError::Malformed {
        path: path.to_path_buf(),
        source,
    })?;

    std::fs::write(path, json).map_err(|source| CatalogError::Write {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use lidar_types::ProductConfig;

    #[test]
    fn missing_file_yields_empty_document() {
        let path = std::env::temp_dir().join("lidar_catalog_missing_test.json");
        let _ = std::fs::remove_file(&path);
        let doc = load_catalog(&path);
        assert!(doc.products.is_empty());
    }

    #[test]
    fn save_then_load_round_trips() {
        let path = std::env::temp_dir().join("lidar_catalog_roundtrip_test.json");
        let doc = CatalogDocument {
            active_product_id: Some(1),
            products: vec![ProductConfig::example()],
        };
        save_catalog(&path, &doc).expect("save succeeds");
        let loaded = load_catalog(&path);
        assert_eq!(loaded.active_product_id, Some(1));
        assert_eq!(loaded.products.len(), 1);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn malformed_document_yields_empty() {
        let path = std::env::temp_dir().join("lidar_catalog_malformed_test.json");
        std::fs::write(&path, "{not json").unwrap();
        let doc = load_catalog(&path);
        assert!(doc.products.is_empty());
        let _ = std::fs::remove_file(&path);
    }
}
