//! Line offset table for lazy-mode documents.
//!
//! One forward scan over the mapped bytes records the byte offset of every
//! line start, giving O(log n) translation between line numbers and byte
//! offsets. The table indexes the *base* (on-disk) bytes and is immutable
//! after construction; logical-coordinate adjustments for overlay edits are
//! handled by the buffer's checkpoint table.
//!
//! Line counting follows the rope convention: a document has
//! `newline count + 1` lines, so `"a\n"` has a final empty line and an empty
//! document has one empty line.

use std::sync::atomic::{AtomicU32, Ordering};

/// Immutable table of line-start byte offsets.
#[derive(Debug, Clone)]
pub struct LineIndex {
    starts: Vec<usize>,
    len_bytes: usize,
}

impl LineIndex {
    /// Scan `bytes` and record every line start.
    pub fn build(bytes: &[u8]) -> Self {
        let mut starts = Vec::with_capacity(bytes.len() / 40 + 1);
        starts.push(0);
        for pos in memchr::memchr_iter(b'\n', bytes) {
            starts.push(pos + 1);
        }
        Self {
            starts,
            len_bytes: bytes.len(),
        }
    }

    /// Scan with percent progress reported through `progress`, for files
    /// large enough that opening is user-visible.
    pub fn build_with_progress(bytes: &[u8], progress: &AtomicU32) -> Self {
        const STEP: usize = 16 * 1024 * 1024;
        let mut starts = Vec::with_capacity(bytes.len() / 40 + 1);
        starts.push(0);

        let total = bytes.len().max(1);
        let mut scanned = 0;
        while scanned < bytes.len() {
            let end = (scanned + STEP).min(bytes.len());
            for pos in memchr::memchr_iter(b'\n', &bytes[scanned..end]) {
                starts.push(scanned + pos + 1);
            }
            scanned = end;
            progress.store(((scanned as f64 / total as f64) * 100.0) as u32, Ordering::Relaxed);
        }
        progress.store(100, Ordering::Relaxed);

        Self {
            starts,
            len_bytes: bytes.len(),
        }
    }

    /// Number of lines (newline count + 1).
    pub fn line_count(&self) -> usize {
        self.starts.len()
    }

    /// Total bytes scanned.
    pub fn len_bytes(&self) -> usize {
        self.len_bytes
    }

    /// Byte offset of the start of `line`, clamped to the end of content.
    pub fn line_start(&self, line: usize) -> usize {
        self.starts.get(line).copied().unwrap_or(self.len_bytes)
    }

    /// Byte offset one past the end of `line` (including its newline).
    pub fn line_end(&self, line: usize) -> usize {
        self.starts.get(line + 1).copied().unwrap_or(self.len_bytes)
    }

    /// Byte range of `line`, including its trailing newline.
    pub fn line_range(&self, line: usize) -> std::ops::Range<usize> {
        self.line_start(line)..self.line_end(line)
    }

    /// Line containing the byte `offset` (clamped to the last line).
    pub fn offset_to_line(&self, offset: usize) -> usize {
        self.starts.partition_point(|&s| s <= offset).saturating_sub(1)
    }
}
