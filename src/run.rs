//! Run identity and orchestration.
//!
//! A run id is derived from the input path alone: the path is made absolute,
//! `.` and `..` components are resolved lexically, and the components are
//! hashed with SHA-256. Re-running the same file therefore finds the same
//! checkpoint. File contents do not participate.
//!
//! [`RunCoordinator`] wraps a [`ChunkedPipeline`] and enforces that at most
//! one run per id is active at a time.

use crate::checkpoint::current_timestamp_ms;
use crate::error::{ErrorKind, ImportError, Result};
use crate::io::glob::expand_glob;
use crate::mapper::RecordMapper;
use crate::pipeline::{CancellationToken, ChunkedPipeline};
use crate::sink::Sink;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use tracing::{debug, info};

/// Hex digits kept from the path digest.
const RUN_ID_LEN: usize = 32;

/// Deterministic identifier of a run over one input path.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    /// Id for `path`, see [`normalize_path`].
    ///
    /// # Errors
    ///
    /// Returns [`ImportError::ResourceUnavailable`] if the path cannot be made
    /// absolute (for example, an empty path).
    pub fn for_path(path: impl AsRef<Path>) -> Result<Self> {
        let normalized = normalize_path(path.as_ref())?;
        Ok(Self::from_normalized(&normalized))
    }

    fn from_normalized(path: &Path) -> Self {
        let key = path
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let digest = format!("{:x}", Sha256::digest(key.as_bytes()));
        Self(digest[..RUN_ID_LEN].to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Absolute form of `path` with `.` and `..` resolved without touching the
/// filesystem. Symlinks are not followed.
///
/// # Errors
///
/// Returns [`ImportError::ResourceUnavailable`] if the current directory is
/// needed and unavailable, or `path` is empty.
pub fn normalize_path(path: &Path) -> Result<PathBuf> {
    let absolute = std::path::absolute(path).map_err(|source| ImportError::ResourceUnavailable {
        path: path.to_path_buf(),
        source,
    })?;
    let mut out = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    Ok(out)
}

/// Parameters threaded through one run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunDescriptor {
    pub id: RunId,
    /// Normalized absolute input path.
    pub path: PathBuf,
    /// Milliseconds since the epoch.
    pub created_at: u64,
}

/// Normalize `path` and derive its run id.
///
/// # Errors
///
/// See [`normalize_path`].
pub fn prepare_run(path: impl AsRef<Path>) -> Result<RunDescriptor> {
    let path = normalize_path(path.as_ref())?;
    Ok(RunDescriptor {
        id: RunId::from_normalized(&path),
        path,
        created_at: current_timestamp_ms(),
    })
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Completed,
    Failed,
    Cancelled,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RunStatus::Completed => "COMPLETED",
            RunStatus::Failed => "FAILED",
            RunStatus::Cancelled => "CANCELLED",
        })
    }
}

/// Final report of one run. Counts are always filled in, also on failure.
///
/// Counts cover this execution only; `resumed_from` tells how many data rows
/// an earlier execution had already committed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: RunId,
    pub path: PathBuf,
    pub status: RunStatus,
    pub read_count: u64,
    pub skip_count: u64,
    pub fail_count: u64,
    pub write_count: u64,
    pub commit_count: u64,
    pub resumed_from: u64,
    pub started_at: u64,
    pub finished_at: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl RunResult {
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.status == RunStatus::Completed
    }
}

type ActiveRuns = Arc<Mutex<HashSet<RunId>>>;

/// Marks a run id active until dropped.
struct ActiveGuard {
    active: ActiveRuns,
    id: RunId,
}

impl ActiveGuard {
    fn acquire(active: &ActiveRuns, id: &RunId) -> Result<Self> {
        let mut set = active.lock().unwrap_or_else(PoisonError::into_inner);
        if !set.insert(id.clone()) {
            return Err(ImportError::RunAlreadyActive {
                run_id: id.to_string(),
            });
        }
        Ok(Self {
            active: Arc::clone(active),
            id: id.clone(),
        })
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

/// Handle to a run executing on its own thread.
pub struct RunHandle {
    descriptor: RunDescriptor,
    cancel: CancellationToken,
    join: JoinHandle<RunResult>,
}

impl RunHandle {
    #[must_use]
    pub fn descriptor(&self) -> &RunDescriptor {
        &self.descriptor
    }

    /// Ask the run to stop at the next row boundary.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the run to finish.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker thread panicked.
    pub fn join(self) -> anyhow::Result<RunResult> {
        self.join
            .join()
            .map_err(|_| anyhow::anyhow!("run {} panicked", self.descriptor.id))
    }
}

/// Entry point for executing runs against one pipeline.
///
/// Cloning is cheap and clones share the active-run registry.
pub struct RunCoordinator<M, S> {
    pipeline: Arc<ChunkedPipeline<M, S>>,
    active: ActiveRuns,
}

impl<M, S> Clone for RunCoordinator<M, S> {
    fn clone(&self) -> Self {
        Self {
            pipeline: Arc::clone(&self.pipeline),
            active: Arc::clone(&self.active),
        }
    }
}

impl<M, S> RunCoordinator<M, S>
where
    M: RecordMapper + 'static,
    S: Sink<M::Record> + 'static,
{
    pub fn new(pipeline: ChunkedPipeline<M, S>) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            active: Arc::default(),
        }
    }

    #[must_use]
    pub fn pipeline(&self) -> &ChunkedPipeline<M, S> {
        &self.pipeline
    }

    /// Whether a run with `id` is executing right now.
    #[must_use]
    pub fn is_active(&self, id: &RunId) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(id)
    }

    /// Run `path` on the calling thread.
    ///
    /// Problems with the input itself (missing file, bad rows, sink errors)
    /// produce a `FAILED` [`RunResult`].
    ///
    /// # Errors
    ///
    /// `Err` only when the run cannot start: the path cannot be normalized, or
    /// [`ImportError::RunAlreadyActive`].
    pub fn execute(&self, path: impl AsRef<Path>) -> Result<RunResult> {
        self.execute_with(path, &CancellationToken::new())
    }

    /// Like [`execute`](Self::execute) with an external cancellation token.
    ///
    /// # Errors
    ///
    /// See [`execute`](Self::execute).
    pub fn execute_with(&self, path: impl AsRef<Path>, cancel: &CancellationToken) -> Result<RunResult> {
        let descriptor = prepare_run(path)?;
        let _guard = ActiveGuard::acquire(&self.active, &descriptor.id)?;
        Ok(self.pipeline.run(&descriptor, cancel))
    }

    /// Start a run for `path` on a new thread.
    ///
    /// The run id is claimed before the thread starts, so a concurrent
    /// `execute` or `spawn` for the same file fails immediately.
    ///
    /// # Errors
    ///
    /// As [`execute`](Self::execute), plus [`ImportError::Io`] if the thread
    /// cannot be spawned.
    pub fn spawn(&self, path: impl AsRef<Path>) -> Result<RunHandle> {
        let descriptor = prepare_run(path)?;
        let guard = ActiveGuard::acquire(&self.active, &descriptor.id)?;
        let cancel = CancellationToken::new();

        let pipeline = Arc::clone(&self.pipeline);
        let worker_descriptor = descriptor.clone();
        let worker_cancel = cancel.clone();
        let join = std::thread::Builder::new()
            .name(format!("flatbatch-{}", &descriptor.id.as_str()[..8]))
            .spawn(move || {
                let _guard = guard;
                pipeline.run(&worker_descriptor, &worker_cancel)
            })?;
        debug!(run_id = %descriptor.id, "run spawned");

        Ok(RunHandle {
            descriptor,
            cancel,
            join,
        })
    }

    /// Run several inputs concurrently on a dedicated rayon pool.
    ///
    /// Results come back in input order. `threads` defaults to the number of
    /// CPUs. Two inputs that resolve to the same run id are not run twice:
    /// the duplicate reports `RunAlreadyActive` if the first is still running,
    /// or runs again (and finds nothing to resume) otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`ImportError::Config`] if the pool cannot be built.
    pub fn execute_all<P>(&self, paths: &[P], threads: Option<usize>) -> Result<Vec<Result<RunResult>>>
    where
        P: AsRef<Path> + Sync,
    {
        let threads = threads.unwrap_or_else(num_cpus::get).max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("flatbatch-worker-{i}"))
            .build()
            .map_err(|e| ImportError::Config(format!("cannot build worker pool: {e}")))?;
        info!(inputs = paths.len(), threads, "executing runs");

        Ok(pool.install(|| paths.par_iter().map(|p| self.execute(p)).collect()))
    }

    /// Expand `pattern` and run every matching file, see
    /// [`execute_all`](Self::execute_all).
    ///
    /// # Errors
    ///
    /// Returns [`ImportError::Config`] for an invalid pattern or one that
    /// matches no files.
    pub fn execute_glob(&self, pattern: &str, threads: Option<usize>) -> Result<Vec<Result<RunResult>>> {
        let files = expand_glob(pattern).map_err(|e| ImportError::Config(format!("{e:#}")))?;
        if files.is_empty() {
            return Err(ImportError::Config(format!(
                "no files found matching pattern: {pattern}"
            )));
        }
        self.execute_all(&files, threads)
    }
}
