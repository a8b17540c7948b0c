//! Flat on-disk store for uploaded files.
//!
//! Every upload is written to `{root}/{uuid}.{ext}`. Converted outputs land in
//! the same directory next to their inputs.

use crate::error::ApiError;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// Metadata for a stored upload.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub id: Uuid,
    pub original_name: String,
    pub extension: Option<String>,
    pub storage_path: PathBuf,
    pub mime_type: String,
    pub size_bytes: u64,
}

impl UploadedFile {
    /// Name of the file inside the uploads directory.
    pub fn stored_name(&self) -> String {
        stored_name(&self.id, self.extension.as_deref())
    }
}

#[derive(Debug, Clone)]
pub struct UploadStore {
    root: PathBuf,
}

impl UploadStore {
    /// Open the store, creating the directory if needed. The root is kept
    /// as an absolute path so reported file paths are absolute too.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .with_context(|| format!("Failed to create upload directory: {:?}", root))?;
        let root = tokio::fs::canonicalize(&root)
            .await
            .with_context(|| format!("Failed to resolve upload directory: {:?}", root))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Persist raw bytes under a fresh unique name.
    pub async fn save(
        &self,
        original_name: &str,
        mime_type: Option<&str>,
        data: &[u8],
    ) -> Result<UploadedFile, ApiError> {
        let id = Uuid::new_v4();
        let extension = extension_of(original_name);
        let storage_path = self.root.join(stored_name(&id, extension.as_deref()));

        tokio::fs::write(&storage_path, data)
            .await
            .map_err(|source| ApiError::Storage {
                operation: format!("write {}", storage_path.display()),
                source,
            })?;

        debug!(
            "Stored upload '{}' as {:?} ({} bytes)",
            original_name,
            storage_path,
            data.len()
        );

        Ok(UploadedFile {
            id,
            original_name: original_name.to_string(),
            extension,
            storage_path,
            mime_type: mime_type
                .filter(|m| !m.is_empty())
                .unwrap_or(DEFAULT_MIME_TYPE)
                .to_string(),
            size_bytes: data.len() as u64,
        })
    }

    /// Map a client-supplied file name to a path inside the store.
    ///
    /// Only bare names are accepted; anything that could address a file
    /// outside the store is rejected.
    pub fn resolve(&self, file_name: &str) -> Result<PathBuf, ApiError> {
        let is_bare = !file_name.is_empty()
            && file_name != "."
            && file_name != ".."
            && !file_name.contains(['/', '\\', '\0']);
        if !is_bare {
            return Err(ApiError::validation(format!(
                "Invalid input file name: {:?}",
                file_name
            )));
        }
        Ok(self.root.join(file_name))
    }
}

fn stored_name(id: &Uuid, extension: Option<&str>) -> String {
    match extension {
        Some(ext) => format!("{}.{}", id, ext),
        None => id.to_string(),
    }
}

/// Extension after the last dot, if it is plain ASCII alphanumerics.
fn extension_of(file_name: &str) -> Option<String> {
    let (_, ext) = file_name.rsplit_once('.')?;
    if ext.is_empty() || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_string())
}
