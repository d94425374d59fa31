//! Error taxonomy for the editor core.
//!
//! Only I/O and save-finalization failures are surfaced to callers. Malformed
//! JSON is absorbed into the structural index as `Error` spans, cache growth
//! is recovered by eviction, and concurrent edits during a save are resolved
//! by snapshotting: none of those produce an `Err`.

use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by the editor core.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Opening or reading a file failed.
    #[error("i/o error on {}: {source}", path.display())]
    Io {
        /// Path of the file being accessed.
        path: PathBuf,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// A save failed. `phase` names the step that failed; if the phase is
    /// anything before `"rename"`, the original file is untouched. A rename
    /// failure also leaves the original untouched; only the temporary file
    /// is affected.
    #[error("save failed during {phase} for {}: {source}", path.display())]
    Save {
        /// The save step that failed: `"create"`, `"clone"`, `"patch"`,
        /// `"stream"`, `"flush"`, `"rename"`, or `"worker"`.
        phase: &'static str,
        /// The save target path.
        path: PathBuf,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// `save()` was called on a document that has no associated path.
    #[error("document has no associated path")]
    NoPath,
}

impl CoreError {
    /// Wrap an I/O error with the path it occurred on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CoreError::Io {
            path: path.into(),
            source,
        }
    }

    /// Wrap a save-phase error with its path and phase label.
    pub fn save(phase: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CoreError::Save {
            phase,
            path: path.into(),
            source,
        }
    }
}
