//! Background indexer coordinator.
//!
//! Tokenization and index building run on a dedicated worker thread, driven
//! by messages rather than shared calls: the interactive path enqueues work
//! and never blocks on parsing. Pending requests are coalesced into their
//! union, so a burst of edits costs one pass.
//!
//! Shared state discipline: the buffer and the index table sit behind
//! reader-writer locks. Query paths take short-lived read guards; the worker
//! reads the buffer the same way (one guard per chunk fetch) and takes the
//! index write lock only to install a finished subtree; never while
//! tokenizing. Structural queries may observe a stale index for the duration
//! of a pass; that staleness is bounded by pass completion and is the price
//! of a render path that never waits.

use std::ops::Range;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::RwLock;

use crate::buffer::{Buffer, EditOutcome};
use crate::index::StructuralIndex;
use crate::tokenizer::{SliceRead, Tokenizer};

enum IndexerMsg {
    /// Re-tokenize and re-index the given logical byte range.
    Reindex(Range<usize>),
    /// An edit happened: shift ranges past it, then re-index around it.
    Edit {
        range: Range<usize>,
        byte_delta: isize,
        line_delta: isize,
    },
    Shutdown,
}

/// Handle to the background indexing thread.
///
/// Dropping the handle shuts the worker down and joins it.
pub struct Indexer {
    tx: Sender<IndexerMsg>,
    handle: Option<thread::JoinHandle<()>>,
    index: Arc<RwLock<StructuralIndex>>,
    submitted: Arc<AtomicU64>,
    completed: Arc<AtomicU64>,
}

/// Reads document bytes through the shared buffer lock, one short-lived
/// read guard per chunk request.
struct SharedSource<'a> {
    buffer: &'a RwLock<Buffer>,
}

impl SliceRead for SharedSource<'_> {
    fn len_bytes(&self) -> usize {
        self.buffer.read().len_bytes()
    }

    fn read_range(&self, start: usize, end: usize) -> Vec<u8> {
        self.buffer.read().read_range(start, end)
    }
}

impl Indexer {
    /// Start the worker thread over a shared buffer.
    pub fn spawn(buffer: Arc<RwLock<Buffer>>) -> Self {
        let (tx, rx) = unbounded();
        let index = Arc::new(RwLock::new(StructuralIndex::new()));
        let submitted = Arc::new(AtomicU64::new(0));
        let completed = Arc::new(AtomicU64::new(0));

        let worker_index = Arc::clone(&index);
        let worker_completed = Arc::clone(&completed);
        let handle = thread::spawn(move || worker(rx, buffer, worker_index, worker_completed));

        Self {
            tx,
            handle: Some(handle),
            index,
            submitted,
            completed,
        }
    }

    /// Enqueue a re-index of `range`. Non-blocking.
    pub fn request_reindex(&self, range: Range<usize>) {
        self.submitted.fetch_add(1, Ordering::SeqCst);
        let _ = self.tx.send(IndexerMsg::Reindex(range));
    }

    /// Tell the worker about a completed edit so it can shift the index and
    /// schedule a scoped rebuild. Non-blocking.
    pub fn notify_edit(&self, outcome: &EditOutcome) {
        self.submitted.fetch_add(1, Ordering::SeqCst);
        let _ = self.tx.send(IndexerMsg::Edit {
            range: outcome.range.clone(),
            byte_delta: outcome.byte_delta,
            line_delta: outcome.line_delta,
        });
    }

    /// Run `f` against the current index under a short-lived read guard.
    /// Callers must not hold the guard across a frame; do the lookup and
    /// copy out what you need.
    pub fn with_index<R>(&self, f: impl FnOnce(&StructuralIndex) -> R) -> R {
        let guard = self.index.read();
        f(&guard)
    }

    /// Whether every submitted request has been processed.
    pub fn is_idle(&self) -> bool {
        self.completed.load(Ordering::SeqCst) >= self.submitted.load(Ordering::SeqCst)
    }

    /// Block until the worker drains its queue or the timeout expires.
    /// Returns whether the queue drained.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while !self.is_idle() {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(1));
        }
        true
    }
}

impl Drop for Indexer {
    fn drop(&mut self) {
        let _ = self.tx.send(IndexerMsg::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn worker(
    rx: Receiver<IndexerMsg>,
    buffer: Arc<RwLock<Buffer>>,
    index: Arc<RwLock<StructuralIndex>>,
    completed: Arc<AtomicU64>,
) {
    while let Ok(first) = rx.recv() {
        // Drain whatever else is queued so overlapping requests coalesce
        // into one pass.
        let mut batch = vec![first];
        while let Ok(extra) = rx.try_recv() {
            batch.push(extra);
        }

        let mut dirty: Vec<Range<usize>> = Vec::new();
        let mut shutdown = false;
        let mut processed = 0u64;
        for msg in batch {
            match msg {
                IndexerMsg::Reindex(range) => {
                    dirty.push(range);
                    processed += 1;
                }
                IndexerMsg::Edit {
                    range,
                    byte_delta,
                    line_delta,
                } => {
                    index.write().shift_after(range.start, byte_delta, line_delta);
                    dirty.push(range);
                    processed += 1;
                }
                IndexerMsg::Shutdown => shutdown = true,
            }
        }

        for range in coalesce(dirty) {
            reindex_range(&buffer, &index, range);
        }
        completed.fetch_add(processed, Ordering::SeqCst);

        if shutdown {
            break;
        }
    }
}

/// Merge overlapping and adjacent ranges into their union; requests subsumed
/// by a wider one disappear here.
fn coalesce(mut ranges: Vec<Range<usize>>) -> Vec<Range<usize>> {
    if ranges.is_empty() {
        return ranges;
    }
    ranges.sort_by_key(|r| r.start);
    let mut merged: Vec<Range<usize>> = Vec::with_capacity(ranges.len());
    for range in ranges {
        match merged.last_mut() {
            Some(last) if range.start <= last.end => {
                last.end = last.end.max(range.end);
            }
            _ => merged.push(range),
        }
    }
    merged
}

/// One indexing pass: widen the dirty range to the smallest complete
/// container (or the whole document), tokenize it in isolation, and install
/// the finished subtree under a brief write lock.
fn reindex_range(buffer: &RwLock<Buffer>, index: &RwLock<StructuralIndex>, range: Range<usize>) {
    let source = SharedSource { buffer };

    let target = {
        let guard = index.read();
        guard
            .enclosing_container(range.start, range.end)
            .and_then(|id| {
                guard
                    .get(id)
                    .map(|node| (id, node.start, node.end, node.line_start))
            })
    };

    match target {
        Some((id, start, end, line_start)) => {
            let column = {
                let guard = buffer.read();
                start.saturating_sub(guard.line_to_offset(line_start))
            };
            let tokens =
                Tokenizer::with_window(&source, start, end, line_start, column).tokenize_all();
            let sub = StructuralIndex::build(&tokens);
            index.write().replace_subtree(id, sub);
        }
        None => {
            let len = source.len_bytes();
            let tokens = Tokenizer::with_window(&source, 0, len, 0, 0).tokenize_all();
            let fresh = StructuralIndex::build(&tokens);
            *index.write() = fresh;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::CoreOptions;
    use crate::node::NodeKind;

    const WAIT: Duration = Duration::from_secs(5);

    fn shared(text: &str) -> Arc<RwLock<Buffer>> {
        Arc::new(RwLock::new(Buffer::from_text(text, CoreOptions::default())))
    }

    #[test]
    fn test_initial_build() {
        let buffer = shared(r#"{"a": [1, 2, 3]}"#);
        let len = buffer.read().len_bytes();
        let indexer = Indexer::spawn(Arc::clone(&buffer));

        indexer.request_reindex(0..len);
        assert!(indexer.wait_idle(WAIT));

        indexer.with_index(|index| {
            let root = index.root().unwrap();
            assert_eq!(index.get(root).unwrap().kind, NodeKind::Object);
            assert_eq!(index.covered_range().unwrap(), 0..len);
        });
    }

    #[test]
    fn test_edit_triggers_scoped_rebuild() {
        let buffer = shared("{\"a\": [1, 2],\n \"b\": 3}\n");
        let len = buffer.read().len_bytes();
        let indexer = Indexer::spawn(Arc::clone(&buffer));
        indexer.request_reindex(0..len);
        assert!(indexer.wait_idle(WAIT));

        // Replace line 0 so the inner array gains an element.
        let outcome = buffer.write().write(0, "{\"a\": [1, 2, 9],\n");
        indexer.notify_edit(&outcome);
        assert!(indexer.wait_idle(WAIT));

        let text = String::from_utf8(buffer.read().read_range(0, usize::MAX)).unwrap();
        let nine = text.find('9').unwrap();
        indexer.with_index(|index| {
            let id = index.node_at_offset(nine).unwrap();
            assert_eq!(index.get(id).unwrap().kind, NodeKind::Number);
            assert_eq!(
                index.get(index.parent(id).unwrap()).unwrap().kind,
                NodeKind::Array
            );
        });
    }

    #[test]
    fn test_queries_stay_available_during_passes() {
        let buffer = shared("[1, 2, 3]");
        let indexer = Indexer::spawn(Arc::clone(&buffer));
        indexer.request_reindex(0..9);
        // A read before the pass completes must not block or fail; an empty
        // result is an acceptable (stale) answer.
        indexer.with_index(|index| {
            let _ = index.node_at_offset(1);
        });
        assert!(indexer.wait_idle(WAIT));
        indexer.with_index(|index| {
            assert!(index.node_at_offset(1).is_some());
        });
    }

    #[test]
    fn test_coalesce_unions_overlaps() {
        let merged = coalesce(vec![5..10, 0..6, 20..25, 9..12]);
        assert_eq!(merged, vec![0..12, 20..25]);

        let merged = coalesce(vec![3..4]);
        assert_eq!(merged, vec![3..4]);

        assert!(coalesce(Vec::new()).is_empty());
    }

    #[test]
    fn test_drop_joins_worker() {
        let buffer = shared("[]");
        let indexer = Indexer::spawn(buffer);
        indexer.request_reindex(0..2);
        drop(indexer); // must not hang
    }
}
