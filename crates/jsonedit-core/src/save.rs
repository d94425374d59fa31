//! Crash-safe save pipeline.
//!
//! A save never touches the original file until its final atomic rename, so
//! interrupting it (crash, kill, disk full) leaves the document on disk
//! exactly as it was. Two strategies:
//!
//! - **Copy-on-write**: when every overlay line is byte-length-identical to
//!   the base line it replaces and the filesystem can clone blocks, the file
//!   is reflinked to a temporary and only the edited ranges are patched in
//!   place. Any clone or patch error falls back to streaming.
//! - **Streaming**: the logical document (base content with overlay
//!   substitutions) is written to a temporary file in the same directory in
//!   buffered chunks, without ever materializing the whole document.
//!
//! Both produce byte-identical output to what `read_line` reported at the
//! moment the snapshot was taken; edits made while the save streams cannot
//! tear it because the snapshot owns its own copy of the overlay.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;

use crate::buffer::BufferSnapshot;
use crate::error::CoreError;
use crate::line_index::LineIndex;

/// Which strategy a completed save used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveStrategy {
    /// Block-clone plus in-place patches of edited ranges.
    CopyOnWrite,
    /// Chunked rewrite of the logical document.
    Streaming,
}

/// Summary of a finished save.
#[derive(Debug, Clone)]
pub struct SaveReport {
    /// Strategy that actually ran (after any fallback).
    pub strategy: SaveStrategy,
    /// Bytes written to disk (patched bytes for copy-on-write).
    pub bytes_written: u64,
}

/// Handle to a background save.
///
/// Progress is readable from any thread while the save streams; `wait`
/// joins and returns the terminal result.
pub struct SaveJob {
    progress: Arc<AtomicU32>,
    target: PathBuf,
    handle: Option<thread::JoinHandle<Result<SaveReport, CoreError>>>,
}

impl SaveJob {
    /// Fractional progress in `[0.0, 1.0]`.
    pub fn progress(&self) -> f32 {
        self.progress.load(Ordering::Relaxed) as f32 / 100.0
    }

    /// Whether the background thread has finished (successfully or not).
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(|h| h.is_finished())
    }

    /// Path being saved to.
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Block until the save completes and return its result.
    pub fn wait(mut self) -> Result<SaveReport, CoreError> {
        match self.handle.take() {
            Some(handle) => handle.join().unwrap_or_else(|_| {
                Err(CoreError::save(
                    "worker",
                    self.target.clone(),
                    std::io::Error::other("save thread panicked"),
                ))
            }),
            None => Err(CoreError::save(
                "worker",
                self.target.clone(),
                std::io::Error::other("save already waited"),
            )),
        }
    }
}

/// Start a background save of `snapshot` to `target`.
pub(crate) fn spawn_save(
    snapshot: BufferSnapshot,
    target: PathBuf,
    chunk_bytes: usize,
) -> SaveJob {
    let progress = Arc::new(AtomicU32::new(0));
    let thread_progress = Arc::clone(&progress);
    let thread_target = target.clone();
    let handle =
        thread::spawn(move || run_save(snapshot, thread_target, chunk_bytes, &thread_progress));
    SaveJob {
        progress,
        target,
        handle: Some(handle),
    }
}

fn run_save(
    snapshot: BufferSnapshot,
    target: PathBuf,
    chunk_bytes: usize,
    progress: &AtomicU32,
) -> Result<SaveReport, CoreError> {
    if let BufferSnapshot::Lazy { map, base, overlay } = &snapshot {
        let patchable = overlay
            .iter()
            .all(|(&line, text)| text.len() == base.line_range(line).len());
        if patchable {
            match save_copy_on_write(map.path(), &target, base, overlay, progress) {
                Ok(report) => return Ok(report),
                Err(_) => progress.store(0, Ordering::Relaxed),
            }
        }
    }
    save_streaming(&snapshot, &target, chunk_bytes, progress)
}

/// Temporary sibling of `target` in the same directory, so the final rename
/// never crosses a filesystem boundary.
fn temp_path(target: &Path) -> PathBuf {
    let mut name = target.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    target.with_file_name(name)
}

fn save_copy_on_write(
    original: &Path,
    target: &Path,
    base: &LineIndex,
    overlay: &BTreeMap<usize, String>,
    progress: &AtomicU32,
) -> Result<SaveReport, CoreError> {
    let temp = temp_path(target);

    let result = (|| {
        reflink_copy::reflink(original, &temp).map_err(|e| CoreError::save("clone", target, e))?;
        progress.store(10, Ordering::Relaxed);

        let mut file = OpenOptions::new()
            .write(true)
            .open(&temp)
            .map_err(|e| CoreError::save("patch", target, e))?;

        let total = overlay.len().max(1);
        let mut bytes_written = 0u64;
        for (i, (&line, text)) in overlay.iter().enumerate() {
            file.seek(SeekFrom::Start(base.line_start(line) as u64))
                .map_err(|e| CoreError::save("patch", target, e))?;
            file.write_all(text.as_bytes())
                .map_err(|e| CoreError::save("patch", target, e))?;
            bytes_written += text.len() as u64;
            progress.store((10 + i * 80 / total) as u32, Ordering::Relaxed);
        }

        file.sync_all()
            .map_err(|e| CoreError::save("flush", target, e))?;
        drop(file);

        fs::rename(&temp, target).map_err(|e| CoreError::save("rename", target, e))?;
        progress.store(100, Ordering::Relaxed);

        Ok(SaveReport {
            strategy: SaveStrategy::CopyOnWrite,
            bytes_written,
        })
    })();

    if result.is_err() {
        let _ = fs::remove_file(&temp);
    }
    result
}

fn save_streaming(
    snapshot: &BufferSnapshot,
    target: &Path,
    chunk_bytes: usize,
    progress: &AtomicU32,
) -> Result<SaveReport, CoreError> {
    let temp = temp_path(target);

    let result = (|| {
        let file = File::create(&temp).map_err(|e| CoreError::save("create", target, e))?;
        let mut writer = BufWriter::with_capacity(chunk_bytes.max(4096), file);

        let total = match snapshot {
            BufferSnapshot::Resident(rope) => rope.len_bytes() as u64,
            BufferSnapshot::Lazy { base, overlay, .. } => {
                let mut total = base.len_bytes() as i64;
                for (&line, text) in overlay {
                    total += text.len() as i64 - base.line_range(line).len() as i64;
                }
                total.max(0) as u64
            }
        }
        .max(1);

        let mut written = 0u64;
        let mut last_pct = 0u32;
        let mut push = |writer: &mut BufWriter<File>, bytes: &[u8]| -> Result<(), CoreError> {
            writer
                .write_all(bytes)
                .map_err(|e| CoreError::save("stream", target, e))?;
            written += bytes.len() as u64;
            let pct = ((written * 95) / total) as u32;
            if pct != last_pct {
                last_pct = pct;
                progress.store(pct.min(95), Ordering::Relaxed);
            }
            Ok(())
        };

        match snapshot {
            BufferSnapshot::Resident(rope) => {
                for chunk in rope.chunks() {
                    push(&mut writer, chunk.as_bytes())?;
                }
            }
            BufferSnapshot::Lazy { map, base, overlay } => {
                for seg in 0..base.line_count() {
                    match overlay.get(&seg) {
                        Some(text) => push(&mut writer, text.as_bytes())?,
                        None => {
                            let range = base.line_range(seg);
                            push(&mut writer, map.slice(range.start, range.end))?;
                        }
                    }
                }
            }
        }

        let bytes_written = written;
        let file = writer
            .into_inner()
            .map_err(|e| CoreError::save("flush", target, e.into_error()))?;
        file.sync_all()
            .map_err(|e| CoreError::save("flush", target, e))?;
        drop(file);

        fs::rename(&temp, target).map_err(|e| CoreError::save("rename", target, e))?;
        progress.store(100, Ordering::Relaxed);

        Ok(SaveReport {
            strategy: SaveStrategy::Streaming,
            bytes_written,
        })
    })();

    if result.is_err() {
        let _ = fs::remove_file(&temp);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{Buffer, CoreOptions};
    use std::io::Write as _;

    fn lazy_options() -> CoreOptions {
        CoreOptions {
            resident_threshold: 0,
            ..CoreOptions::default()
        }
    }

    fn write_file(path: &Path, content: &str) {
        let mut file = File::create(path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
    }

    #[test]
    fn test_streaming_roundtrip_resident() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.json");
        let buffer = Buffer::from_text("{\"a\": 1}\n", CoreOptions::default());

        let job = spawn_save(buffer.snapshot(), target.clone(), 4096);
        let report = job.wait().unwrap();
        assert_eq!(report.strategy, SaveStrategy::Streaming);
        assert_eq!(fs::read(&target).unwrap(), b"{\"a\": 1}\n");
    }

    #[test]
    fn test_unedited_lazy_save_is_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("in.json");
        let content = "{\"k\": [1, 2, 3]}\nrest\n";
        write_file(&source, content);

        let buffer = Buffer::open(&source, lazy_options()).unwrap();
        let job = spawn_save(buffer.snapshot(), source.clone(), 4096);
        job.wait().unwrap();
        assert_eq!(fs::read(&source).unwrap(), content.as_bytes());
    }

    #[test]
    fn test_overlay_applied_on_save() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("in.json");
        write_file(&source, "aaa\nbbb\nccc\n");

        let mut buffer = Buffer::open(&source, lazy_options()).unwrap();
        buffer.write(1, "EDITED\n");

        let target = dir.path().join("out.json");
        let job = spawn_save(buffer.snapshot(), target.clone(), 4096);
        let report = job.wait().unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"aaa\nEDITED\nccc\n");
        assert!(report.bytes_written > 0);
    }

    #[test]
    fn test_same_length_edit_saves_correctly() {
        // Eligible for copy-on-write; must be byte-correct whether the
        // filesystem supports cloning or the streaming fallback runs.
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("in.json");
        write_file(&source, "aaa\nbbb\nccc\n");

        let mut buffer = Buffer::open(&source, lazy_options()).unwrap();
        buffer.write(1, "BBB\n");

        let job = spawn_save(buffer.snapshot(), source.clone(), 4096);
        job.wait().unwrap();
        assert_eq!(fs::read(&source).unwrap(), b"aaa\nBBB\nccc\n");
    }

    #[test]
    fn test_save_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("in.json");
        write_file(&source, "x\ny\nz\n");

        let mut buffer = Buffer::open(&source, lazy_options()).unwrap();
        buffer.write(0, "X\n");

        spawn_save(buffer.snapshot(), source.clone(), 4096)
            .wait()
            .unwrap();
        let first = fs::read(&source).unwrap();
        spawn_save(buffer.snapshot(), source.clone(), 4096)
            .wait()
            .unwrap();
        let second = fs::read(&source).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_snapshot_isolates_in_flight_edits() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("in.json");
        write_file(&source, "one\ntwo\n");

        let mut buffer = Buffer::open(&source, lazy_options()).unwrap();
        buffer.write(0, "ONE\n");
        let snapshot = buffer.snapshot();
        // Edits after the snapshot must not appear in the saved bytes.
        buffer.write(1, "TWO\n");

        let target = dir.path().join("out.json");
        spawn_save(snapshot, target.clone(), 4096).wait().unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"ONE\ntwo\n");
    }

    #[test]
    fn test_progress_completes() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.json");
        let buffer = Buffer::from_text("data\n", CoreOptions::default());

        let job = spawn_save(buffer.snapshot(), target, 4096);
        let progress = Arc::clone(&job.progress);
        job.wait().unwrap();
        assert_eq!(progress.load(Ordering::Relaxed), 100);
    }

    #[test]
    fn test_failed_save_leaves_original_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("in.json");
        write_file(&source, "keep\n");
        let buffer = Buffer::open(&source, lazy_options()).unwrap();

        // Target directory does not exist: create fails before any rename.
        let target = dir.path().join("missing").join("out.json");
        let err = spawn_save(buffer.snapshot(), target, 4096).wait();
        assert!(err.is_err());
        assert_eq!(fs::read(&source).unwrap(), b"keep\n");
    }
}
