use std::path::{Component, Path, PathBuf};

use crate::error::{AppError, AppResult};

/// File-backed object storage for Item and Model image payloads.
///
/// Callers store the relative path they wrote (`models/{id}/primary.jpg`)
/// in the owning document; this store only moves bytes. No image
/// processing happens here.
#[derive(Debug, Clone)]
pub struct MediaStore {
    root: PathBuf,
}

impl MediaStore {
    pub fn new(root: impl Into<PathBuf>) -> AppResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(AppError::from)?;
        Ok(MediaStore { root })
    }

    /// Write bytes at a relative path, creating parent directories.
    pub fn put_bytes(&self, relative: &str, bytes: &[u8]) -> AppResult<PathBuf> {
        let path = self.resolve(relative)?;
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(AppError::from)?;
        }
        std::fs::write(&path, bytes).map_err(AppError::from)?;
        Ok(path)
    }

    pub fn delete(&self, relative: &str) -> AppResult<()> {
        let path = self.resolve(relative)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(AppError::from(err).with_context("path", relative.to_string())),
        }
    }

    /// Absolute path for a stored object. Rejects absolute inputs and any
    /// path that steps outside the root.
    pub fn resolve(&self, relative: &str) -> AppResult<PathBuf> {
        let candidate = Path::new(relative);
        let traversal = candidate
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if relative.is_empty() || traversal {
            return Err(
                AppError::new("MEDIA/INVALID_PATH", "Media paths must be relative")
                    .with_context("path", relative.to_string()),
            );
        }
        Ok(self.root.join(candidate))
    }
}
