use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::error::ConversionError;
use crate::log_warn;

/// Scoped temporary directory for intermediate artifacts of one conversion.
///
/// The directory is removed by [`TemporaryStorage::release`] or, failing that,
/// when the value is dropped. Two conversions must not share a directory.
#[derive(Debug)]
pub(super) struct TemporaryStorage {
    path: PathBuf,
    released: bool,
}

impl TemporaryStorage {
    /// Create `path` fresh, clearing anything a previous run left behind.
    pub(super) fn allocate(path: &Path) -> Result<Self, ConversionError> {
        if path.exists() {
            fs::remove_dir_all(path).map_err(|source| ConversionError::resource(path, source))?;
        }
        fs::create_dir_all(path).map_err(|source| ConversionError::resource(path, source))?;
        Ok(Self {
            path: path.to_path_buf(),
            released: false,
        })
    }

    pub(super) fn path(&self) -> &Path {
        &self.path
    }

    /// Write `bytes` to `name` inside the storage directory.
    pub(super) fn write(&self, name: &str, bytes: &[u8]) -> Result<PathBuf, ConversionError> {
        let target = self.path.join(name);
        fs::write(&target, bytes).map_err(|source| ConversionError::resource(&target, source))?;
        Ok(target)
    }

    /// Delete the directory and everything in it.
    pub(super) fn release(mut self) -> Result<(), ConversionError> {
        self.released = true;
        if !self.path.exists() {
            return Ok(());
        }
        fs::remove_dir_all(&self.path)
            .map_err(|source| ConversionError::resource(&self.path, source))
    }
}

impl Drop for TemporaryStorage {
    fn drop(&mut self) {
        if self.released || !self.path.exists() {
            return;
        }
        if let Err(e) = fs::remove_dir_all(&self.path) {
            log_warn!(
                "Failed to remove temporary storage {}: {}",
                self.path.display(),
                e
            );
        }
    }
}
