//! Document facade: the surface consumed by the command grammar, renderer,
//! undo/redo log, and structural navigation.
//!
//! A document owns the shared buffer, the render-path line cache, and the
//! background indexer. Reads are served from the cache first and fall back
//! to the buffer (one short-lived read lock); edits update the overlay
//! synchronously and enqueue a scoped re-index. The ordering guarantee for
//! callers: `read_line` after `write` to the same line always observes the
//! written value, while structural queries may lag an edit by one indexing
//! pass.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use crate::buffer::{Buffer, CoreOptions, EditOutcome};
use crate::cache::LineCache;
use crate::error::CoreError;
use crate::indexer::Indexer;
use crate::node::{Node, NodeId};
use crate::save::{SaveJob, SaveReport, spawn_save};

/// An open document: hybrid buffer + line cache + background indexer.
pub struct Document {
    buffer: Arc<RwLock<Buffer>>,
    cache: LineCache,
    indexer: Indexer,
    options: CoreOptions,
}

impl Document {
    /// Open `path` with default options.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        Self::open_with(path, CoreOptions::default())
    }

    /// Open `path` with explicit policy options.
    pub fn open_with(path: impl AsRef<Path>, options: CoreOptions) -> Result<Self, CoreError> {
        let buffer = Buffer::open(path, options.clone())?;
        Ok(Self::from_buffer(buffer, options))
    }

    /// Create an unsaved in-memory document.
    pub fn from_text(text: &str, options: CoreOptions) -> Self {
        let buffer = Buffer::from_text(text, options.clone());
        Self::from_buffer(buffer, options)
    }

    fn from_buffer(buffer: Buffer, options: CoreOptions) -> Self {
        let len = buffer.len_bytes();
        let buffer = Arc::new(RwLock::new(buffer));
        let indexer = Indexer::spawn(Arc::clone(&buffer));
        indexer.request_reindex(0..len);
        Self {
            buffer,
            cache: LineCache::new(options.cache_max_lines, options.cache_max_bytes),
            indexer,
            options,
        }
    }

    /// Shut the document down, joining the background indexer. Equivalent
    /// to dropping it; provided for explicit call sites.
    pub fn close(self) {}

    // ----- reads -------------------------------------------------------

    /// Content of one logical line (terminator included), through the line
    /// cache.
    pub fn read_line(&mut self, line: usize) -> String {
        if let Some(text) = self.cache.get(line) {
            return text.to_string();
        }
        let guard = self.buffer.read();
        if line >= guard.line_count() {
            return String::new();
        }
        let text = guard.read_line(line);
        drop(guard);
        self.cache.insert(line, text.clone());
        text
    }

    /// Logical bytes in `[start, end)`; bypasses the line cache.
    pub fn read_range(&self, start: usize, end: usize) -> Vec<u8> {
        self.buffer.read().read_range(start, end)
    }

    /// Logical line count.
    pub fn line_count(&self) -> usize {
        self.buffer.read().line_count()
    }

    /// Logical length in bytes.
    pub fn len_bytes(&self) -> usize {
        self.buffer.read().len_bytes()
    }

    /// Whether the buffer is memory-mapped rather than resident.
    pub fn is_lazy(&self) -> bool {
        self.buffer.read().is_lazy()
    }

    /// Whether there are unsaved edits.
    pub fn is_modified(&self) -> bool {
        self.buffer.read().is_modified()
    }

    /// Associated file path, if any.
    pub fn path(&self) -> Option<PathBuf> {
        self.buffer.read().path().map(Path::to_path_buf)
    }

    /// Edit counter; bumped by every mutation.
    pub fn version(&self) -> u64 {
        self.buffer.read().version()
    }

    /// Logical byte offset of the start of `line`.
    pub fn line_to_offset(&self, line: usize) -> usize {
        self.buffer.read().line_to_offset(line)
    }

    /// Logical line containing byte `offset`.
    pub fn offset_to_line(&self, offset: usize) -> usize {
        self.buffer.read().offset_to_line(offset)
    }

    /// Cached line count and decoded bytes, for the statistics overlay.
    pub fn cache_stats(&self) -> (usize, usize) {
        (self.cache.len(), self.cache.bytes())
    }

    // ----- edits -------------------------------------------------------

    fn after_edit(&mut self, outcome: EditOutcome) {
        if outcome.line_delta != 0 {
            // Lines were renumbered; cached entries keyed by line number
            // are no longer trustworthy.
            self.cache.clear();
        } else {
            self.cache.invalidate(outcome.line);
        }
        self.indexer.notify_edit(&outcome);
    }

    /// Replace the content of `line` with `text`.
    pub fn write(&mut self, line: usize, text: &str) {
        let outcome = self.buffer.write().write(line, text);
        self.after_edit(outcome);
    }

    /// Insert one character at a byte column within a line.
    pub fn insert_char(&mut self, line: usize, col: usize, ch: char) {
        let outcome = self.buffer.write().insert_char(line, col, ch);
        self.after_edit(outcome);
    }

    /// Delete the character at a byte column within a line.
    pub fn delete_char(&mut self, line: usize, col: usize) {
        let outcome = self.buffer.write().delete_char(line, col);
        self.after_edit(outcome);
    }

    /// Insert a new line before `line` (or at the end).
    pub fn insert_line(&mut self, line: usize, text: &str) {
        let outcome = self.buffer.write().insert_line(line, text);
        self.after_edit(outcome);
    }

    /// Remove `line` entirely.
    pub fn delete_line(&mut self, line: usize) {
        let outcome = self.buffer.write().delete_line(line);
        self.after_edit(outcome);
    }

    // ----- structure ---------------------------------------------------

    /// Deepest node containing byte `offset`.
    ///
    /// Identifiers stay valid across scoped rebuilds for nodes outside the
    /// rebuilt subtree; always re-resolve after waiting for indexing if the
    /// document was edited.
    pub fn node_at_offset(&self, offset: usize) -> Option<NodeId> {
        self.indexer.with_index(|index| index.node_at_offset(offset))
    }

    /// Deepest node that exclusively owns `line`.
    pub fn node_at_line(&self, line: usize) -> Option<NodeId> {
        self.indexer.with_index(|index| index.node_at_line(line))
    }

    /// Copy of the node behind `id`, if it is still live.
    pub fn node(&self, id: NodeId) -> Option<Node> {
        self.indexer.with_index(|index| index.get(id).cloned())
    }

    /// Parent of `id`.
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.indexer.with_index(|index| index.parent(id))
    }

    /// Ordered children of `id`.
    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        self.indexer.with_index(|index| index.children(id).to_vec())
    }

    /// Next sibling of `id` in document order.
    pub fn next_sibling(&self, id: NodeId) -> Option<NodeId> {
        self.indexer.with_index(|index| index.next_sibling(id))
    }

    /// Previous sibling of `id` in document order.
    pub fn prev_sibling(&self, id: NodeId) -> Option<NodeId> {
        self.indexer.with_index(|index| index.prev_sibling(id))
    }

    /// Block until pending indexing completes (bounded by `timeout`).
    /// Structural queries are eventually consistent; this is the fence.
    pub fn wait_for_indexing(&self, timeout: Duration) -> bool {
        self.indexer.wait_idle(timeout)
    }

    // ----- save --------------------------------------------------------

    /// Start a background save to `path`, or to the document's own path.
    ///
    /// The returned job reports fractional progress and yields the terminal
    /// result from [`SaveJob::wait`]; pass it to [`Document::finish_save`]
    /// to also clear the modified flag.
    pub fn save(&self, path: Option<&Path>) -> Result<SaveJob, CoreError> {
        let guard = self.buffer.read();
        let target = match path {
            Some(p) => p.to_path_buf(),
            None => guard.path().ok_or(CoreError::NoPath)?.to_path_buf(),
        };
        let snapshot = guard.snapshot();
        drop(guard);
        Ok(spawn_save(snapshot, target, self.options.save_chunk_bytes))
    }

    /// Save to a new path and rebind the document to it.
    pub fn save_as(&mut self, path: impl Into<PathBuf>) -> Result<SaveJob, CoreError> {
        self.buffer.write().set_path(path.into());
        self.save(None)
    }

    /// Wait for `job` and clear the modified flag on success.
    pub fn finish_save(&mut self, job: SaveJob) -> Result<SaveReport, CoreError> {
        let report = job.wait()?;
        self.buffer.write().mark_saved();
        Ok(report)
    }
}
