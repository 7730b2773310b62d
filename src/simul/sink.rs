//! Append-only per-task text logs.
//!
//! One line per finished utterance and task. Writing is best-effort: a failure
//! is logged and counted, never returned to the policy.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::telemetry::metrics::record_sink_failure;

/// Writes finished utterances to `<dir>/<file>`.
///
/// Cloning shares the write lock, so sessions logging into the same directory
/// never interleave partial lines.
#[derive(Debug, Clone)]
pub struct TextSink {
    dir: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl TextSink {
    /// Create a sink rooted at `dir`. The directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// Directory holding the logs.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Append `text` as one line to `file`. Returns whether the write succeeded.
    pub fn append_line(&self, file: &str, text: &str) -> bool {
        let _guard = self.lock.lock();
        match self.try_append(file, text) {
            Ok(()) => {
                debug!(file, "Appended utterance to sink");
                true
            }
            Err(e) => {
                warn!(file, dir = %self.dir.display(), error = %e, "Failed to write utterance to sink");
                record_sink_failure();
                false
            }
        }
    }

    fn try_append(&self, file: &str, text: &str) -> std::io::Result<()> {
        fs::create_dir_all(&self.dir)?;
        let mut handle = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.dir.join(file))?;
        writeln!(handle, "{}", text)
    }
}
