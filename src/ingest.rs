//! Photo manifest import
//!
//! Walks a folder for `*.json` manifests and inserts every photo they
//! describe into the catalog. Photos already present (same image ID) are
//! skipped, never overwritten, so re-importing a folder is harmless.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::ExplorerConfig;
use crate::error::{IngestError, StoreError};
use crate::state::data::Photo;
use crate::state::store::{ConditionalPut, KeyValueStore, PutCondition, IMAGE_ID_ATTRIBUTE};

/// Result of a folder import operation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportResult {
    pub imported_count: usize,
    pub skipped_count: usize,
    /// Photos the store refused (missing attributes and the like)
    pub rejected_count: usize,
    /// Manifests that could not be read or parsed
    pub failed_files: Vec<PathBuf>,
}

/// A manifest holds either a list of photos or a single one
#[derive(Deserialize)]
#[serde(untagged)]
enum Manifest {
    Many(Vec<Photo>),
    One(Box<Photo>),
}

impl Manifest {
    fn into_photos(self) -> Vec<Photo> {
        match self {
            Manifest::Many(photos) => photos,
            Manifest::One(photo) => vec![*photo],
        }
    }
}

pub async fn import_folder(
    store: &dyn KeyValueStore,
    config: &ExplorerConfig,
    folder: &Path,
) -> Result<ImportResult, IngestError> {
    if !folder.is_dir() {
        return Err(IngestError::FolderNotFound(folder.display().to_string()));
    }

    info!("Scanning folder: {}", folder.display());
    let mut result = ImportResult::default();

    // Walk the directory tree recursively
    for entry in WalkDir::new(folder)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        if !path.is_file() || !is_manifest(path) {
            continue;
        }

        let photos = match read_manifest(path) {
            Ok(photos) => photos,
            Err(e) => {
                warn!("Skipping manifest {}: {}", path.display(), e);
                result.failed_files.push(path.to_path_buf());
                continue;
            }
        };
        debug!("{} photos in {}", photos.len(), path.display());

        for photo in photos {
            import_photo(store, config, photo, &mut result).await?;
        }
    }

    info!(
        "Import complete: {} new, {} skipped, {} rejected",
        result.imported_count, result.skipped_count, result.rejected_count
    );
    Ok(result)
}

async fn import_photo(
    store: &dyn KeyValueStore,
    config: &ExplorerConfig,
    mut photo: Photo,
    result: &mut ImportResult,
) -> Result<(), IngestError> {
    photo.url = photo.url.map(|url| sanitize_url(&url));

    let item = match photo.to_record() {
        Ok(item) => item,
        Err(e) => {
            warn!("Could not encode photo {}: {}", photo.image_id, e);
            result.rejected_count += 1;
            return Ok(());
        }
    };

    let put = ConditionalPut {
        table: config.photos_table.clone(),
        item,
        condition: PutCondition::AttributeNotExists(IMAGE_ID_ATTRIBUTE.to_string()),
    };

    match store.conditional_put(put).await {
        Ok(()) => {
            result.imported_count += 1;
            if result.imported_count % 100 == 0 {
                info!("Imported {} photos...", result.imported_count);
            }
        }
        Err(StoreError::ConditionalCheckFailed { .. }) => result.skipped_count += 1,
        // The store itself is failing: stop instead of rejecting every photo
        Err(e @ (StoreError::Unavailable(_) | StoreError::Database(_))) => return Err(e.into()),
        Err(e) => {
            warn!("Error importing {}: {}", photo.image_id, e);
            result.rejected_count += 1;
        }
    }

    Ok(())
}

fn is_manifest(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}

fn read_manifest(path: &Path) -> Result<Vec<Photo>, String> {
    let text = fs::read_to_string(path).map_err(|e| e.to_string())?;
    let manifest: Manifest = serde_json::from_str(&text).map_err(|e| e.to_string())?;
    Ok(manifest.into_photos())
}

/// Image URLs in the raw feeds contain unescaped '#'
fn sanitize_url(url: &str) -> String {
    url.replace('#', "%23")
}
