//! Execution state and restart checkpoints.
//!
//! After every committed chunk the pipeline records how many data rows of the
//! input have been fully handled. A later run with the same [`RunId`] loads
//! that state and resumes reading after those rows, so chunks already
//! accepted by the sink are not delivered again. A run that completes clears
//! its checkpoint.
//!
//! Two stores ship with the crate:
//! - [`InMemoryCheckpointStore`] - resumption within one process lifetime
//! - [`FileCheckpointStore`] - survives restarts (feature `checkpointing`)
//!
//! # Usage
//!
//! ```no_run
//! use flatbatch::checkpoint::FileCheckpointStore;
//! use flatbatch::{ChunkedPipeline, MessageMapper, PipelineConfig};
//! use flatbatch::sink::ConsoleSink;
//! use std::sync::Arc;
//!
//! # fn main() -> anyhow::Result<()> {
//! let store = FileCheckpointStore::new("./checkpoints")?;
//! let pipeline = ChunkedPipeline::new(PipelineConfig::default(), MessageMapper, ConsoleSink::stdout())?
//!     .with_checkpoint_store(Arc::new(store));
//! # let _ = pipeline;
//! # Ok(())
//! # }
//! ```

use crate::run::RunId;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

#[cfg(feature = "checkpointing")]
use anyhow::{Context, anyhow};
#[cfg(feature = "checkpointing")]
use std::fs::{File, create_dir_all, remove_file};
#[cfg(feature = "checkpointing")]
use std::io::{Read, Write};
#[cfg(feature = "checkpointing")]
use std::path::{Path, PathBuf};

/// Counters for one run, also the payload of a checkpoint.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionState {
    /// Data rows (records and skipped rows, comments excluded) handled
    /// through the last commit, counted from the start of the file. This is
    /// the resume offset.
    pub current_item_count: u64,
    /// Rows tokenized and mapped successfully.
    pub read_count: u64,
    /// Row-level failures tolerated because the run is not strict.
    pub skip_count: u64,
    /// Rows or records lost to the failure that ended the run.
    pub fail_count: u64,
    /// Records accepted by the sink.
    pub write_count: u64,
    /// Chunks accepted by the sink.
    pub commit_count: u64,
    /// Offset this run started from.
    pub resumed_from: u64,
    /// Milliseconds since the epoch of the last update.
    pub updated_at: u64,
}

/// Persistence for [`ExecutionState`] keyed by run id.
pub trait CheckpointStore: Send + Sync {
    /// State saved for `run_id`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if stored state exists but cannot be read or verified.
    fn load(&self, run_id: &RunId) -> Result<Option<ExecutionState>>;

    /// Replace the state for `run_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be persisted.
    fn save(&self, run_id: &RunId, state: &ExecutionState) -> Result<()>;

    /// Forget `run_id`. Clearing an unknown id is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if existing state cannot be removed.
    fn clear(&self, run_id: &RunId) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    states: Mutex<HashMap<RunId, ExecutionState>>,
}

impl InMemoryCheckpointStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CheckpointStore for InMemoryCheckpointStore {
    fn load(&self, run_id: &RunId) -> Result<Option<ExecutionState>> {
        let states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(states.get(run_id).cloned())
    }

    fn save(&self, run_id: &RunId, state: &ExecutionState) -> Result<()> {
        let mut states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        states.insert(run_id.clone(), state.clone());
        Ok(())
    }

    fn clear(&self, run_id: &RunId) -> Result<()> {
        let mut states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        states.remove(run_id);
        Ok(())
    }
}

/// On-disk checkpoint record.
#[cfg(feature = "checkpointing")]
#[derive(Serialize, Deserialize)]
struct CheckpointFile {
    run_id: String,
    state: ExecutionState,
    /// SHA-256 over the run id and resume offset.
    checksum: String,
}

#[cfg(feature = "checkpointing")]
fn state_checksum(run_id: &str, state: &ExecutionState) -> String {
    compute_checksum(
        format!(
            "{run_id}:{}:{}:{}",
            state.current_item_count, state.commit_count, state.updated_at
        )
        .as_bytes(),
    )
}

/// Checkpoints stored as one postcard-encoded file per run id.
///
/// Files are written to a temporary sibling and renamed into place, so a
/// crash mid-write leaves the previous checkpoint intact.
#[cfg(feature = "checkpointing")]
#[derive(Clone, Debug)]
pub struct FileCheckpointStore {
    directory: PathBuf,
}

#[cfg(feature = "checkpointing")]
impl FileCheckpointStore {
    /// Use `directory`, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn new(directory: impl Into<PathBuf>) -> Result<Self> {
        let directory = directory.into();
        create_dir_all(&directory)
            .with_context(|| format!("create checkpoint directory {}", directory.display()))?;
        Ok(Self { directory })
    }

    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// File holding the checkpoint for `run_id`.
    #[must_use]
    pub fn path_for(&self, run_id: &RunId) -> PathBuf {
        self.directory.join(format!("checkpoint_{run_id}.bin"))
    }
}

#[cfg(feature = "checkpointing")]
impl CheckpointStore for FileCheckpointStore {
    fn load(&self, run_id: &RunId) -> Result<Option<ExecutionState>> {
        let path = self.path_for(run_id);
        let mut file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("open checkpoint {}", path.display()));
            }
        };
        let mut encoded = Vec::new();
        file.read_to_end(&mut encoded)
            .with_context(|| format!("read checkpoint {}", path.display()))?;

        let record: CheckpointFile = postcard::from_bytes(&encoded)
            .with_context(|| format!("decode checkpoint {}", path.display()))?;
        if record.run_id != run_id.as_str() {
            return Err(anyhow!(
                "checkpoint {} belongs to run {}",
                path.display(),
                record.run_id
            ));
        }
        if state_checksum(&record.run_id, &record.state) != record.checksum {
            return Err(anyhow!(
                "checkpoint integrity check failed: checksum mismatch in {}",
                path.display()
            ));
        }
        Ok(Some(record.state))
    }

    fn save(&self, run_id: &RunId, state: &ExecutionState) -> Result<()> {
        let record = CheckpointFile {
            run_id: run_id.to_string(),
            state: state.clone(),
            checksum: state_checksum(run_id.as_str(), state),
        };
        let encoded = postcard::to_allocvec(&record).context("serialize checkpoint")?;

        let path = self.path_for(run_id);
        let mut tmp = tempfile::NamedTempFile::new_in(&self.directory)
            .context("create temporary checkpoint file")?;
        tmp.write_all(&encoded).context("write checkpoint")?;
        tmp.as_file()
            .sync_all()
            .context("sync checkpoint to disk")?;
        tmp.persist(&path)
            .with_context(|| format!("move checkpoint into {}", path.display()))?;
        Ok(())
    }

    fn clear(&self, run_id: &RunId) -> Result<()> {
        let path = self.path_for(run_id);
        match remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("remove checkpoint {}", path.display())),
        }
    }
}

/// Lowercase hex SHA-256 of `data`.
#[must_use]
pub fn compute_checksum(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Current time in milliseconds since the Unix epoch.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
