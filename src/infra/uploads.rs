//! Photo file storage.
//!
//! Payloads land under the uploads root as `{photoId}.{ext}`. The id
//! is generated server-side so the file name never contains client
//! input.

use std::path::{Path, PathBuf};

use tracing::warn;

use crate::domain::types::PhotoExt;

use super::error::InfraError;

pub struct PhotoStore {
    directory: PathBuf,
}

impl PhotoStore {
    pub fn open(directory: impl Into<PathBuf>) -> Result<Self, InfraError> {
        let directory = directory.into();
        std::fs::create_dir_all(&directory)?;
        Ok(Self { directory })
    }

    pub fn file_name(photo_id: i64, ext: PhotoExt) -> String {
        format!("{photo_id}.{}", ext.as_str())
    }

    pub fn path_for(&self, photo_id: i64, ext: PhotoExt) -> PathBuf {
        self.directory.join(Self::file_name(photo_id, ext))
    }

    pub fn save(&self, photo_id: i64, ext: PhotoExt, bytes: &[u8]) -> Result<(), InfraError> {
        std::fs::write(self.path_for(photo_id, ext), bytes)?;
        Ok(())
    }

    /// Remove the payload; a missing file is logged and ignored so a
    /// cascading ad delete never fails halfway.
    pub fn remove(&self, photo_id: i64, ext: PhotoExt) {
        let path = self.path_for(photo_id, ext);
        if let Err(err) = std::fs::remove_file(&path)
            && err.kind() != std::io::ErrorKind::NotFound
        {
            warn!(
                target = "vetrina::uploads",
                path = %path.display(),
                error = %err,
                "Failed to remove photo payload"
            );
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }
}
