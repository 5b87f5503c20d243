//! Named-pipe channel between the external tracer and the trace parser
//!
//! Lifecycle of a [`TraceSession`]:
//!
//! 1. [`TraceSession::open`] creates a private temp dir with a FIFO inside,
//!    opens the FIFO read-write as the *sentinel writer*, opens the read end,
//!    then hands the read end to the reader thread. Holding a writer means
//!    the reader can never see end-of-stream before the tracer has even
//!    started, or after it failed to start.
//! 2. The tracer writes into [`TraceSession::pipe_path`].
//! 3. [`TraceSession::finish`] takes proof that the traced process has been
//!    reaped, closes the sentinel, waits on the reader's one-shot completion
//!    channel, and only then removes the temp dir.
//!
//! The wait in step 3 is bounded by the drain timeout. A descendant that
//! escaped reaping can keep the FIFO open indefinitely; in that case the
//! reader is detached and the temp dir is removed by the reader itself once
//! the stream finally ends. Dropping an unfinished session performs the same
//! teardown, so the temp dir is never removed under a running reader.

use anyhow::{anyhow, Result};
use crossbeam::channel::{bounded, Receiver, RecvTimeoutError};
use nix::sys::stat::Mode;
use nix::unistd::mkfifo;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tempfile::TempDir;

use crate::collaborators::TraceParser;
use crate::error::StartraceError;
use crate::launcher::Reaped;
use crate::strace::ExecveTiming;

const PIPE_NAME: &str = "strace.fifo";

/// Default bound on waiting for the stream to end after the process exited
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// A live trace channel owned by exactly one trial
#[derive(Debug)]
pub struct TraceSession {
    /// Shared with the reader thread; the last owner removes it
    dir: Option<Arc<TempDir>>,
    pipe_path: PathBuf,
    sentinel: Option<File>,
    completion: Receiver<Result<ExecveTiming>>,
    reader: Option<JoinHandle<()>>,
    drain_timeout: Duration,
}

impl TraceSession {
    /// Create the pipe and start the background reader
    ///
    /// Failures here are fatal for the whole run.
    pub fn open(parser: Arc<dyn TraceParser>) -> Result<Self, StartraceError> {
        let dir = tempfile::Builder::new()
            .prefix("exec-trace")
            .tempdir()
            .map_err(|e| StartraceError::TraceSetup(format!("cannot create temp dir: {}", e)))?;
        let pipe_path = dir.path().join(PIPE_NAME);

        mkfifo(&pipe_path, Mode::from_bits_truncate(0o640)).map_err(|e| {
            StartraceError::TraceSetup(format!("cannot create {}: {}", pipe_path.display(), e))
        })?;

        // O_RDWR on a FIFO never blocks and counts as a writer
        let sentinel = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&pipe_path)
            .map_err(|e| {
                StartraceError::TraceSetup(format!("cannot open {}: {}", pipe_path.display(), e))
            })?;

        // opened here rather than in the reader: with the sentinel present
        // this cannot block, and EOF can only follow the sentinel's close
        let read_end = File::open(&pipe_path).map_err(|e| {
            StartraceError::TraceSetup(format!("cannot open {}: {}", pipe_path.display(), e))
        })?;

        let dir = Arc::new(dir);
        let reader_dir = Arc::clone(&dir);
        let (tx, completion) = bounded(1);
        let reader = thread::Builder::new()
            .name("trace-reader".to_string())
            .spawn(move || {
                let result = parser.parse(read_end, None);
                // receiver gone means the session was torn down; nothing to report
                let _ = tx.send(result);
                drop(reader_dir);
            })
            .map_err(|e| StartraceError::TraceSetup(format!("cannot start reader: {}", e)))?;

        tracing::debug!(pipe = %pipe_path.display(), "trace session opened");
        Ok(Self {
            dir: Some(dir),
            pipe_path,
            sentinel: Some(sentinel),
            completion,
            reader: Some(reader),
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        })
    }

    /// Bound the wait for end-of-stream once the traced process is gone
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// FIFO the tracer must write to
    pub fn pipe_path(&self) -> &Path {
        &self.pipe_path
    }

    /// Directory holding the FIFO, removed by teardown
    pub fn dir_path(&self) -> Option<&Path> {
        self.dir.as_deref().map(TempDir::path)
    }

    /// Tear down after the traced process exited and return the parse result
    pub fn finish(mut self, _exited: &Reaped) -> Result<ExecveTiming> {
        let result = self.drain();
        if let Some(dir) = self.dir.take() {
            match Arc::try_unwrap(dir) {
                Ok(dir) => {
                    let path = dir.path().to_path_buf();
                    if let Err(e) = dir.close() {
                        tracing::warn!(dir = %path.display(), "failed to remove trace dir: {}", e);
                    }
                }
                Err(_) => tracing::debug!("trace dir left to the detached reader"),
            }
        }
        tracing::debug!("trace session closed");
        result
    }

    /// Close the sentinel, then wait a bounded time for the reader to report
    fn drain(&mut self) -> Result<ExecveTiming> {
        drop(self.sentinel.take());
        let received = match Instant::now().checked_add(self.drain_timeout) {
            Some(deadline) => self.completion.recv_deadline(deadline),
            None => self.completion.recv().map_err(RecvTimeoutError::from),
        };
        match received {
            Ok(result) => {
                self.join_reader();
                result
            }
            Err(RecvTimeoutError::Timeout) => {
                // someone outside the reaped process still holds the FIFO
                drop(self.reader.take());
                tracing::warn!(timeout = ?self.drain_timeout, "trace stream still open, detaching reader");
                Err(anyhow!(
                    "trace stream still open {:?} after the traced process exited",
                    self.drain_timeout
                ))
            }
            Err(RecvTimeoutError::Disconnected) => {
                self.join_reader();
                Err(anyhow!("trace reader exited without a result"))
            }
        }
    }

    fn join_reader(&mut self) {
        if let Some(reader) = self.reader.take() {
            if reader.join().is_err() {
                tracing::warn!("trace reader thread panicked");
            }
        }
    }
}

impl Drop for TraceSession {
    fn drop(&mut self) {
        if self.reader.is_some() {
            let _ = self.drain();
        }
        // `dir` drops after this; removed here unless a detached reader holds it
    }
}
