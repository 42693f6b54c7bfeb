//! Append-only record of every solution found locally.
//!
//! One line per solution: `<checksummed address>:<combined key hex>`, written
//! whatever happens to the submission afterwards. Workers hand solutions to a
//! [`SolutionRecorder`]; a dedicated writer thread owns the file.

use crate::problem::Solution;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Solution log file
#[derive(Debug)]
pub struct SolutionLog {
    path: PathBuf,
    file: File,
}

impl SolutionLog {
    /// Open `path` for appending, creating it owner-readable only
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut options = OpenOptions::new();
        options.append(true).create(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let file = options.open(&path)?;
        Ok(Self { path, file })
    }

    /// Path of the log file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one solution
    pub fn record(&self, solution: &Solution) -> io::Result<()> {
        let combined = solution
            .combined_key()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let line = format_line(&combined.address().to_checksum(None), &combined.to_hex());

        // single write so concurrent appenders never interleave within a line
        (&self.file).write_all(line.as_bytes())?;
        debug!(target: "infinity::solution_log", problem = %solution.problem_id, "Solution recorded");
        Ok(())
    }

    /// Move the log onto its own writer thread.
    ///
    /// The thread exits once every [`SolutionRecorder`] clone is dropped and
    /// the backlog is written.
    pub fn spawn_writer(self) -> io::Result<(SolutionRecorder, SolutionWriter)> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Solution>();
        let written = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&written);

        let handle = thread::Builder::new().name("infinity-solution-log".to_string()).spawn(move || {
            while let Some(solution) = rx.blocking_recv() {
                match self.record(&solution) {
                    Ok(()) => {
                        counter.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        warn!(target: "infinity::solution_log", path = %self.path.display(), error = %e, "Failed to record solution");
                    }
                }
            }
        })?;

        Ok((SolutionRecorder { tx: Some(tx) }, SolutionWriter { handle: Some(handle), written }))
    }
}

/// Cheap, non-blocking handle for queueing solutions to the log
#[derive(Debug, Clone, Default)]
pub struct SolutionRecorder {
    tx: Option<mpsc::UnboundedSender<Solution>>,
}

impl SolutionRecorder {
    /// Recorder that drops everything
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Queue `solution` for writing; never blocks
    pub fn record(&self, solution: &Solution) {
        if let Some(tx) = &self.tx {
            // only fails once the writer is gone
            let _ = tx.send(solution.clone());
        }
    }
}

/// The writer thread behind a [`SolutionRecorder`]
#[derive(Debug)]
pub struct SolutionWriter {
    handle: Option<JoinHandle<()>>,
    written: Arc<AtomicU64>,
}

impl SolutionWriter {
    /// Lines written so far
    pub fn written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }

    /// Wait for the backlog to be flushed. Every recorder must be dropped
    /// first or this blocks forever.
    pub fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn format_line(address: &str, key_hex: &str) -> String {
    format!("{address}:{key_hex}\n")
}
