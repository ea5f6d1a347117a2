//! Content-addressed blob files for the disk cache.

use std::fs;
use std::io::{self, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tracing::{trace, warn};

use crate::domain::entities::ImageId;
use crate::domain::ports::{ByteStore, CacheError, CacheResult};

/// Stores each blob as `<hex sha-256 prefix of key>.img` in one directory.
///
/// Writes go through a temporary file in the same directory and are renamed
/// into place, so a reader never sees a partial file.
#[derive(Debug, Clone)]
pub struct FileByteStore {
    dir: PathBuf,
}

impl FileByteStore {
    /// Opens the store, creating `dir` if needed.
    ///
    /// # Errors
    /// Returns error if the directory cannot be created.
    pub fn new(dir: impl Into<PathBuf>) -> CacheResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .map_err(|e| CacheError::IoError(format!("Failed to create cache dir: {e}")))?;
        Ok(Self { dir })
    }

    /// Returns the storage directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the path of the blob for `key`.
    #[must_use]
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.img", ImageId::from_uri(key)))
    }
}

impl ByteStore for FileByteStore {
    fn write(&self, key: &str, source: &mut dyn Read) -> CacheResult<u64> {
        let path = self.path_for(key);
        let mut temp_file = tempfile::NamedTempFile::new_in(&self.dir)?;
        let written = io::copy(source, &mut temp_file)?;
        temp_file.flush()?;
        temp_file
            .persist(&path)
            .map_err(|e| CacheError::IoError(format!("Failed to persist cache file: {}", e.error)))?;
        trace!(key, path = %path.display(), size = written, "Wrote cache file");
        Ok(written)
    }

    fn read(&self, key: &str) -> CacheResult<Bytes> {
        let path = self.path_for(key);
        match fs::read(&path) {
            Ok(bytes) => Ok(Bytes::from(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(CacheError::NotFound(key.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    fn delete(&self, key: &str) -> CacheResult<()> {
        let path = self.path_for(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => {
                warn!(key, path = %path.display(), error = %e, "Failed to remove cache file");
                Err(e.into())
            }
        }
    }

    fn exists(&self, key: &str) -> bool {
        self.path_for(key).is_file()
    }

    fn size_of(&self, key: &str) -> Option<u64> {
        fs::metadata(self.path_for(key)).ok().map(|meta| meta.len())
    }
}
