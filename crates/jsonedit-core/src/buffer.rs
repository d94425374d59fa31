//! Hybrid document buffer.
//!
//! The backing is chosen once at open time: files below the resident
//! threshold are loaded whole into a rope (O(log n) edits anywhere); files
//! at or above it are memory-mapped read-only with a line offset table and a
//! sparse per-line edit overlay. Every read composes overlay over base, so
//! the logical document other components see is identical in both modes and
//! a `read_line` issued after a `write` to the same line always observes the
//! written value.
//!
//! Lazy-mode memory use is O(line index + overlay + caller caches),
//! independent of file size.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use ropey::Rope;

use crate::cache::{DEFAULT_CACHE_BYTES, DEFAULT_CACHE_LINES};
use crate::error::CoreError;
use crate::line_index::LineIndex;
use crate::mmap::MappedFile;
use crate::tokenizer::SliceRead;

/// Default resident/lazy threshold: files this large or larger are mapped
/// instead of loaded (10 MiB).
pub const DEFAULT_RESIDENT_THRESHOLD: usize = 10 * 1024 * 1024;
/// Default streaming-save chunk size (8 MiB).
pub const DEFAULT_SAVE_CHUNK_BYTES: usize = 8 * 1024 * 1024;

/// Tunable policy constants.
///
/// These are deliberately configuration, not structure: nothing in the
/// engine depends on their exact values.
#[derive(Debug, Clone)]
pub struct CoreOptions {
    /// Files smaller than this are held resident in a rope.
    pub resident_threshold: usize,
    /// Line cache entry bound.
    pub cache_max_lines: usize,
    /// Line cache decoded-byte bound.
    pub cache_max_bytes: usize,
    /// Chunk size for streaming saves.
    pub save_chunk_bytes: usize,
}

impl Default for CoreOptions {
    fn default() -> Self {
        Self {
            resident_threshold: DEFAULT_RESIDENT_THRESHOLD,
            cache_max_lines: DEFAULT_CACHE_LINES,
            cache_max_bytes: DEFAULT_CACHE_BYTES,
            save_chunk_bytes: DEFAULT_SAVE_CHUNK_BYTES,
        }
    }
}

/// What an edit did to the logical document, for cache invalidation and
/// scoped re-indexing.
#[derive(Debug, Clone)]
pub struct EditOutcome {
    /// Logical line that was written.
    pub line: usize,
    /// Logical byte range of the replacement text.
    pub range: Range<usize>,
    /// Change in logical length in bytes.
    pub byte_delta: isize,
    /// Change in logical line count.
    pub line_delta: isize,
}

/// Precomputed translation point for one overlay entry: everything needed to
/// map logical line/byte coordinates across the entry's length deltas.
#[derive(Debug, Clone, Copy)]
struct Checkpoint {
    base_line: usize,
    /// First logical line of this entry.
    logical_line: usize,
    /// Logical byte offset of the entry start.
    logical_start: usize,
    /// Logical lines this entry contributes (0 for a deleted line).
    entry_lines: usize,
    entry_bytes: usize,
    /// Cumulative line delta for content after this entry.
    lines_after: isize,
    /// Cumulative byte delta for content after this entry.
    bytes_after: isize,
}

/// Lazy-mode state: immutable base plus sparse overlay.
#[derive(Debug)]
pub(crate) struct LazyDoc {
    map: Arc<MappedFile>,
    base: Arc<LineIndex>,
    /// Replacement content per base line. An entry may span several logical
    /// lines (embedded newlines) or none (empty string deletes the line).
    overlay: BTreeMap<usize, String>,
    checkpoints: Vec<Checkpoint>,
    logical_bytes: usize,
    logical_lines: usize,
}

impl LazyDoc {
    fn new(map: MappedFile, base: LineIndex) -> Self {
        let logical_bytes = base.len_bytes();
        let logical_lines = base.line_count();
        Self {
            map: Arc::new(map),
            base: Arc::new(base),
            overlay: BTreeMap::new(),
            checkpoints: Vec::new(),
            logical_bytes,
            logical_lines,
        }
    }

    fn entry_line_count(text: &str) -> usize {
        if text.is_empty() {
            0
        } else {
            text.split_inclusive('\n').count()
        }
    }

    /// Recompute the checkpoint table after an overlay change. O(edited
    /// lines); this is what keeps line-number queries exact after edits that
    /// add or remove newlines.
    fn rebuild_checkpoints(&mut self) {
        self.checkpoints.clear();
        let mut lines_delta = 0isize;
        let mut bytes_delta = 0isize;
        for (&line, text) in &self.overlay {
            let base_start = self.base.line_start(line);
            let base_len = self.base.line_end(line) - base_start;
            let entry_lines = Self::entry_line_count(text);
            let logical_line = (line as isize + lines_delta) as usize;
            let logical_start = (base_start as isize + bytes_delta) as usize;
            lines_delta += entry_lines as isize - 1;
            bytes_delta += text.len() as isize - base_len as isize;
            self.checkpoints.push(Checkpoint {
                base_line: line,
                logical_line,
                logical_start,
                entry_lines,
                entry_bytes: text.len(),
                lines_after: lines_delta,
                bytes_after: bytes_delta,
            });
        }
        self.logical_bytes = (self.base.len_bytes() as isize + bytes_delta).max(0) as usize;
        self.logical_lines = (self.base.line_count() as isize + lines_delta).max(0) as usize;
    }

    /// Map a logical line to its base segment and the sub-line within that
    /// segment's overlay entry (0 for unedited segments).
    fn segment_of_line(&self, line: usize) -> (usize, usize) {
        let idx = self
            .checkpoints
            .partition_point(|cp| cp.logical_line <= line);
        if idx == 0 {
            return (line, 0);
        }
        let cp = &self.checkpoints[idx - 1];
        if line < cp.logical_line + cp.entry_lines {
            (cp.base_line, line - cp.logical_line)
        } else {
            ((line as isize - cp.lines_after).max(0) as usize, 0)
        }
    }

    /// Base segment containing the logical `offset`, plus the logical offset
    /// at which that segment starts.
    fn segment_of_offset(&self, offset: usize) -> (usize, usize) {
        let idx = self
            .checkpoints
            .partition_point(|cp| cp.logical_start <= offset);
        if idx == 0 {
            let seg = self.base.offset_to_line(offset);
            return (seg, self.base.line_start(seg));
        }
        let cp = &self.checkpoints[idx - 1];
        if offset < cp.logical_start + cp.entry_bytes {
            (cp.base_line, cp.logical_start)
        } else {
            let base_off = (offset as isize - cp.bytes_after).max(0) as usize;
            let seg = self.base.offset_to_line(base_off);
            (
                seg,
                (self.base.line_start(seg) as isize + cp.bytes_after).max(0) as usize,
            )
        }
    }

    /// Current bytes of one base segment: overlay entry if present, else the
    /// mapped slice.
    fn segment_bytes(&self, seg: usize) -> Cow<'_, [u8]> {
        match self.overlay.get(&seg) {
            Some(entry) => Cow::Borrowed(entry.as_bytes()),
            None => {
                let range = self.base.line_range(seg);
                Cow::Borrowed(self.map.slice(range.start, range.end))
            }
        }
    }

    fn read_line(&self, line: usize) -> String {
        if line >= self.logical_lines {
            return String::new();
        }
        let (seg, sub) = self.segment_of_line(line);
        match self.overlay.get(&seg) {
            Some(entry) => entry
                .split_inclusive('\n')
                .nth(sub)
                .unwrap_or("")
                .to_string(),
            None => {
                let range = self.base.line_range(seg);
                String::from_utf8_lossy(self.map.slice(range.start, range.end)).into_owned()
            }
        }
    }

    fn read_range(&self, start: usize, end: usize) -> Vec<u8> {
        let end = end.min(self.logical_bytes);
        if start >= end {
            return Vec::new();
        }
        let (first_seg, seg_start) = self.segment_of_offset(start);
        let mut out = Vec::with_capacity(end - start);
        let mut cursor = seg_start;
        let mut seg = first_seg;
        while cursor < end && seg < self.base.line_count() {
            let content = self.segment_bytes(seg);
            let len = content.len();
            let lo = start.saturating_sub(cursor).min(len);
            let hi = (end - cursor).min(len);
            if lo < hi {
                out.extend_from_slice(&content[lo..hi]);
            }
            cursor += len;
            seg += 1;
        }
        out
    }

    fn line_to_offset(&self, line: usize) -> usize {
        let idx = self
            .checkpoints
            .partition_point(|cp| cp.logical_line <= line);
        if idx == 0 {
            return self.base.line_start(line);
        }
        let cp = &self.checkpoints[idx - 1];
        if line < cp.logical_line + cp.entry_lines {
            let entry = self
                .overlay
                .get(&cp.base_line)
                .map(String::as_str)
                .unwrap_or("");
            let mut offset = cp.logical_start;
            for (i, part) in entry.split_inclusive('\n').enumerate() {
                if i == line - cp.logical_line {
                    break;
                }
                offset += part.len();
            }
            offset
        } else {
            let base_line = (line as isize - cp.lines_after).max(0) as usize;
            (self.base.line_start(base_line) as isize + cp.bytes_after).max(0) as usize
        }
    }

    fn offset_to_line(&self, offset: usize) -> usize {
        let idx = self
            .checkpoints
            .partition_point(|cp| cp.logical_start <= offset);
        if idx == 0 {
            return self.base.offset_to_line(offset);
        }
        let cp = &self.checkpoints[idx - 1];
        if offset < cp.logical_start + cp.entry_bytes {
            let entry = self
                .overlay
                .get(&cp.base_line)
                .map(String::as_str)
                .unwrap_or("");
            let within = (offset - cp.logical_start).min(entry.len());
            let newlines = memchr::memchr_iter(b'\n', &entry.as_bytes()[..within]).count();
            cp.logical_line + newlines
        } else {
            let base_off = (offset as isize - cp.bytes_after).max(0) as usize;
            (self.base.offset_to_line(base_off) as isize + cp.lines_after).max(0) as usize
        }
    }

    fn write_line(&mut self, line: usize, text: String) {
        let (mut seg, sub) = self.segment_of_line(line);
        if seg >= self.base.line_count() {
            seg = self.base.line_count().saturating_sub(1);
        }
        match self.overlay.get(&seg) {
            None => {
                self.overlay.insert(seg, text);
            }
            Some(entry) => {
                let mut parts: Vec<String> =
                    entry.split_inclusive('\n').map(str::to_string).collect();
                if sub < parts.len() {
                    parts[sub] = text;
                } else {
                    parts.push(text);
                }
                self.overlay.insert(seg, parts.concat());
            }
        }
        self.rebuild_checkpoints();
    }

    /// Number of edited base lines.
    fn overlay_len(&self) -> usize {
        self.overlay.len()
    }
}

enum Backing {
    Resident(Rope),
    Lazy(LazyDoc),
}

/// The logical, possibly-edited document.
pub struct Buffer {
    backing: Backing,
    path: Option<PathBuf>,
    modified: bool,
    version: u64,
    options: CoreOptions,
    load_progress: Arc<AtomicU32>,
}

impl Buffer {
    /// Open `path`, choosing resident or lazy backing by file size.
    pub fn open(path: impl AsRef<Path>, options: CoreOptions) -> Result<Self, CoreError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| CoreError::io(path, e))?;
        let len = file
            .metadata()
            .map_err(|e| CoreError::io(path, e))?
            .len() as usize;

        let load_progress = Arc::new(AtomicU32::new(0));
        let backing = if len < options.resident_threshold {
            let rope =
                Rope::from_reader(BufReader::new(file)).map_err(|e| CoreError::io(path, e))?;
            load_progress.store(100, Ordering::Relaxed);
            Backing::Resident(rope)
        } else {
            drop(file);
            let map = MappedFile::open(path).map_err(|e| CoreError::io(path, e))?;
            let base = LineIndex::build_with_progress(map.as_bytes(), &load_progress);
            Backing::Lazy(LazyDoc::new(map, base))
        };

        Ok(Self {
            backing,
            path: Some(path.to_path_buf()),
            modified: false,
            version: 0,
            options,
            load_progress,
        })
    }

    /// Build an in-memory (resident) buffer from text. Used by tests and by
    /// callers that create documents from scratch.
    pub fn from_text(text: &str, options: CoreOptions) -> Self {
        Self {
            backing: Backing::Resident(Rope::from_str(text)),
            path: None,
            modified: false,
            version: 0,
            options,
            load_progress: Arc::new(AtomicU32::new(100)),
        }
    }

    /// Whether the buffer is in lazy (mapped) mode.
    pub fn is_lazy(&self) -> bool {
        matches!(self.backing, Backing::Lazy(_))
    }

    /// Associated file path, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Rebind the buffer to a new path (save-as).
    pub fn set_path(&mut self, path: impl Into<PathBuf>) {
        self.path = Some(path.into());
    }

    /// Whether there are unsaved edits.
    pub fn is_modified(&self) -> bool {
        self.modified
    }

    /// Clear the modified flag after a completed save.
    pub fn mark_saved(&mut self) {
        self.modified = false;
    }

    /// Edit counter; bumped by every mutation.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Percent progress of the open-time line scan (always 100 once open
    /// returns; readable from another thread during open).
    pub fn load_progress(&self) -> u32 {
        self.load_progress.load(Ordering::Relaxed)
    }

    /// The active policy options.
    pub fn options(&self) -> &CoreOptions {
        &self.options
    }

    /// Number of edited lines in the overlay (0 in resident mode).
    pub fn overlay_len(&self) -> usize {
        match &self.backing {
            Backing::Resident(_) => 0,
            Backing::Lazy(doc) => doc.overlay_len(),
        }
    }

    /// Logical line count.
    pub fn line_count(&self) -> usize {
        match &self.backing {
            Backing::Resident(rope) => rope.len_lines(),
            Backing::Lazy(doc) => doc.logical_lines,
        }
    }

    /// Logical length in bytes.
    pub fn len_bytes(&self) -> usize {
        match &self.backing {
            Backing::Resident(rope) => rope.len_bytes(),
            Backing::Lazy(doc) => doc.logical_bytes,
        }
    }

    /// Content of one logical line, including its terminator.
    pub fn read_line(&self, line: usize) -> String {
        match &self.backing {
            Backing::Resident(rope) => {
                if line >= rope.len_lines() {
                    String::new()
                } else {
                    rope.line(line).to_string()
                }
            }
            Backing::Lazy(doc) => doc.read_line(line),
        }
    }

    /// Logical bytes in `[start, end)`, composing overlay over base without
    /// gaps or duplication across edited-line boundaries.
    pub fn read_range(&self, start: usize, end: usize) -> Vec<u8> {
        match &self.backing {
            Backing::Resident(rope) => {
                let end = end.min(rope.len_bytes());
                if start >= end {
                    return Vec::new();
                }
                let (chunks, chunk_start, _, _) = rope.chunks_at_byte(start);
                let mut out = Vec::with_capacity(end - start);
                let mut pos = chunk_start;
                for chunk in chunks {
                    if pos >= end {
                        break;
                    }
                    let bytes = chunk.as_bytes();
                    let lo = start.saturating_sub(pos).min(bytes.len());
                    let hi = (end - pos).min(bytes.len());
                    if lo < hi {
                        out.extend_from_slice(&bytes[lo..hi]);
                    }
                    pos += bytes.len();
                }
                out
            }
            Backing::Lazy(doc) => doc.read_range(start, end),
        }
    }

    /// Logical byte offset of the start of `line`.
    pub fn line_to_offset(&self, line: usize) -> usize {
        match &self.backing {
            Backing::Resident(rope) => {
                if line >= rope.len_lines() {
                    rope.len_bytes()
                } else {
                    rope.line_to_byte(line)
                }
            }
            Backing::Lazy(doc) => doc.line_to_offset(line),
        }
    }

    /// Logical line containing the byte `offset`.
    pub fn offset_to_line(&self, offset: usize) -> usize {
        match &self.backing {
            Backing::Resident(rope) => rope.byte_to_line(offset.min(rope.len_bytes())),
            Backing::Lazy(doc) => doc.offset_to_line(offset),
        }
    }

    /// Replace the content of `line` with `text` (terminator included).
    ///
    /// Writing an empty string deletes the line; text with embedded newlines
    /// splits it. Resident mode mutates the rope in place; lazy mode writes
    /// the overlay entry for the line's base segment.
    pub fn write(&mut self, line: usize, text: &str) -> EditOutcome {
        let line = line.min(self.line_count().saturating_sub(1));
        let lines_before = self.line_count() as isize;
        let bytes_before = self.len_bytes() as isize;

        match &mut self.backing {
            Backing::Resident(rope) => {
                let start_char = rope.line_to_char(line);
                let end_char = if line + 1 < rope.len_lines() {
                    rope.line_to_char(line + 1)
                } else {
                    rope.len_chars()
                };
                rope.remove(start_char..end_char);
                rope.insert(start_char, text);
            }
            Backing::Lazy(doc) => doc.write_line(line, text.to_string()),
        }

        self.modified = true;
        self.version += 1;

        let start = self.line_to_offset(line);
        EditOutcome {
            line,
            range: start..start + text.len(),
            byte_delta: self.len_bytes() as isize - bytes_before,
            line_delta: self.line_count() as isize - lines_before,
        }
    }

    fn clamp_to_char_boundary(text: &str, mut col: usize) -> usize {
        col = col.min(text.len());
        while col > 0 && !text.is_char_boundary(col) {
            col -= 1;
        }
        col
    }

    /// Insert one character at a byte column within a line.
    pub fn insert_char(&mut self, line: usize, col: usize, ch: char) -> EditOutcome {
        let mut text = self.read_line(line);
        let col = Self::clamp_to_char_boundary(&text, col);
        text.insert(col, ch);
        self.write(line, &text)
    }

    /// Delete the character at a byte column within a line.
    pub fn delete_char(&mut self, line: usize, col: usize) -> EditOutcome {
        let mut text = self.read_line(line);
        let col = Self::clamp_to_char_boundary(&text, col);
        if col < text.len() {
            text.remove(col);
        }
        self.write(line, &text)
    }

    /// Insert a new line (without embedded newlines) before `line`, or at
    /// the end when `line` is past the last line.
    pub fn insert_line(&mut self, line: usize, text: &str) -> EditOutcome {
        if line >= self.line_count() {
            let last = self.line_count().saturating_sub(1);
            let mut merged = self.read_line(last);
            if !merged.is_empty() && !merged.ends_with('\n') {
                merged.push('\n');
            }
            merged.push_str(text);
            self.write(last, &merged)
        } else {
            let merged = format!("{}\n{}", text, self.read_line(line));
            self.write(line, &merged)
        }
    }

    /// Remove `line` entirely, including its terminator.
    pub fn delete_line(&mut self, line: usize) -> EditOutcome {
        self.write(line, "")
    }

    /// Capture the state a save works from. Cheap: rope clones share
    /// structure, lazy captures the map handle plus a copy of the sparse
    /// overlay, so edits made after this call cannot tear the save.
    pub(crate) fn snapshot(&self) -> BufferSnapshot {
        match &self.backing {
            Backing::Resident(rope) => BufferSnapshot::Resident(rope.clone()),
            Backing::Lazy(doc) => BufferSnapshot::Lazy {
                map: Arc::clone(&doc.map),
                base: Arc::clone(&doc.base),
                overlay: doc.overlay.clone(),
            },
        }
    }
}

impl SliceRead for Buffer {
    fn len_bytes(&self) -> usize {
        Buffer::len_bytes(self)
    }

    fn read_range(&self, start: usize, end: usize) -> Vec<u8> {
        Buffer::read_range(self, start, end)
    }
}

/// Point-in-time capture of the logical document for the save pipeline.
pub(crate) enum BufferSnapshot {
    /// Resident content; the clone shares the rope's tree.
    Resident(Rope),
    /// Lazy content: mapped base plus overlay copy.
    Lazy {
        map: Arc<MappedFile>,
        base: Arc<LineIndex>,
        overlay: BTreeMap<usize, String>,
    },
}
