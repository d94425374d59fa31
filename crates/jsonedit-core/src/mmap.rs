//! Read-only memory mapping of the on-disk base file.

use std::fs::File;
use std::path::{Path, PathBuf};

/// A file mapped read-only for the lifetime of the document.
///
/// The mapping is the base layer of a lazy-mode buffer: it is never written
/// through, and edits live in the overlay. Keeping the `File` alive alongside
/// the map pins the descriptor for the mapping's lifetime.
#[derive(Debug)]
pub struct MappedFile {
    _file: File,
    map: memmap2::Mmap,
    path: PathBuf,
}

impl MappedFile {
    /// Map `path` read-only.
    pub fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        // SAFETY: the file is opened read-only, the handle lives as long as
        // the mapping, and callers only ever see immutable byte slices.
        let map = unsafe { memmap2::Mmap::map(&file)? };
        Ok(Self {
            _file: file,
            map,
            path,
        })
    }

    /// Bytes in `[start, end)`, clamped to the file length.
    pub fn slice(&self, start: usize, end: usize) -> &[u8] {
        let start = start.min(self.map.len());
        let end = end.min(self.map.len()).max(start);
        &self.map[start..end]
    }

    /// The whole mapping.
    pub fn as_bytes(&self) -> &[u8] {
        &self.map
    }

    /// Mapped length in bytes.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Whether the mapped file is empty.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Path of the mapped file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}
