//! The chunked read-map-write loop.
//!
//! A run moves through `Idle -> HeaderRead -> Streaming -> Draining ->
//! Completed`, with `Failed` and `Cancelled` as the other terminal states.
//! Rows are pulled lazily from a [`RecordStream`], buffered, and handed to the
//! [`Sink`] in chunks of `chunk_size` records. Each accepted chunk is a commit
//! boundary: counters are updated and, with `save_state`, the resume offset is
//! checkpointed. A final partial chunk is delivered at end of input.

use crate::checkpoint::{CheckpointStore, ExecutionState, InMemoryCheckpointStore, current_timestamp_ms};
use crate::config::PipelineConfig;
use crate::error::{ImportError, Result};
use crate::header::{Header, parse_header};
use crate::mapper::RecordMapper;
use crate::reader::LineSource;
use crate::run::{RunDescriptor, RunResult, RunStatus};
use crate::sink::{Chunk, Sink};
use crate::tokenizer::RowTokenizer;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error, info, info_span, warn};

/// Result of pulling one data row.
#[derive(Debug)]
pub enum RowOutcome<R> {
    Record { line: u64, record: R },
    /// A row-level error tolerated because the run is not strict.
    Skipped(ImportError),
    /// An error that ends the stream.
    Fatal(ImportError),
}

/// Lifecycle of one run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    HeaderRead,
    Streaming,
    Draining,
    Completed,
    Failed,
    Cancelled,
}

impl PipelineState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PipelineState::Completed | PipelineState::Failed | PipelineState::Cancelled
        )
    }

    fn advance(&mut self, next: PipelineState) {
        debug!(from = ?*self, to = ?next, "pipeline state");
        *self = next;
    }
}

/// Cooperative stop signal shared between a run and its handle.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Lazy, single-pass sequence of mapped rows from one input.
///
/// After a [`RowOutcome::Fatal`] the stream is exhausted. Dropping the stream
/// closes the input.
pub struct RecordStream<'a, M> {
    source: LineSource,
    header: Header,
    tokenizer: RowTokenizer,
    mapper: &'a M,
    strict: bool,
    consumed: u64,
    max_item_count: Option<u64>,
    done: bool,
}

impl<M: RecordMapper> RecordStream<'_, M> {
    #[must_use]
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Data rows consumed so far, counted from the start of the input
    /// (restart offset included).
    #[must_use]
    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    fn row_error(&mut self, err: ImportError) -> RowOutcome<M::Record> {
        if !err.is_skippable() || self.strict {
            self.done = true;
            return RowOutcome::Fatal(err);
        }
        RowOutcome::Skipped(err)
    }
}

impl<M: RecordMapper> Iterator for RecordStream<'_, M> {
    type Item = RowOutcome<M::Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if self.max_item_count.is_some_and(|max| self.consumed >= max) {
            self.done = true;
            return None;
        }
        let row = match self.source.next_row() {
            Ok(Some(row)) => row,
            Ok(None) => {
                self.done = true;
                return None;
            }
            Err(err) => {
                if err.is_skippable() {
                    self.consumed += 1;
                }
                return Some(self.row_error(err));
            }
        };
        self.consumed += 1;

        let mapped = self
            .tokenizer
            .tokenize(&row, &self.header)
            .and_then(|fields| self.mapper.map(&fields));
        Some(match mapped {
            Ok(record) => RowOutcome::Record {
                line: row.line,
                record,
            },
            Err(err) => self.row_error(err),
        })
    }
}

/// Reads one input, maps its rows and delivers them to the sink in chunks.
///
/// The mapper and sink are fixed at construction. A pipeline can serve many
/// runs, sequentially or from several threads at once.
pub struct ChunkedPipeline<M, S> {
    config: PipelineConfig,
    mapper: M,
    sink: S,
    checkpoints: Arc<dyn CheckpointStore>,
}

impl<M, S> ChunkedPipeline<M, S>
where
    M: RecordMapper,
    S: Sink<M::Record>,
{
    /// Build a pipeline with an in-memory checkpoint store.
    ///
    /// # Errors
    ///
    /// Returns [`ImportError::Config`] if `config` does not validate.
    pub fn new(config: PipelineConfig, mapper: M, sink: S) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            mapper,
            sink,
            checkpoints: Arc::new(InMemoryCheckpointStore::new()),
        })
    }

    #[must_use]
    pub fn with_checkpoint_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoints = store;
        self
    }

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    #[must_use]
    pub fn sink(&self) -> &S {
        &self.sink
    }

    #[must_use]
    pub fn checkpoints(&self) -> &Arc<dyn CheckpointStore> {
        &self.checkpoints
    }

    /// Open `path`, read its header and position the stream after `start_at`
    /// data rows.
    ///
    /// # Errors
    ///
    /// [`ImportError::ResourceUnavailable`] if the input cannot be opened,
    /// [`ImportError::EmptyInput`] if no header line remains after
    /// `lines_to_skip` and comments, or an I/O error while skipping.
    pub fn open(&self, path: &Path, start_at: u64) -> Result<RecordStream<'_, M>> {
        let mut source = LineSource::open(path, &self.config)?;
        source.skip_lines(self.config.lines_to_skip)?;
        let first = source.next_row()?;
        let header = parse_header(
            first.as_ref().map(|row| row.content.as_str()),
            &self.config.delimiter,
            path,
        )?;

        let mut consumed = 0;
        while consumed < start_at {
            match source.next_row() {
                Ok(Some(_)) | Err(ImportError::Decode { .. }) => consumed += 1,
                Ok(None) => break,
                Err(e) => return Err(e),
            }
        }

        Ok(RecordStream {
            source,
            header,
            tokenizer: RowTokenizer::from_config(&self.config),
            mapper: &self.mapper,
            strict: self.config.strict,
            consumed,
            max_item_count: self.config.max_item_count,
            done: false,
        })
    }

    /// Execute one run to a terminal state. Failures are reported in the
    /// returned [`RunResult`], never as a panic or an `Err`.
    pub fn run(&self, run: &RunDescriptor, cancel: &CancellationToken) -> RunResult {
        let span = info_span!("run", run_id = %run.id, path = %run.path.display());
        let _enter = span.enter();

        let started_at = current_timestamp_ms();
        let mut state = ExecutionState::default();
        let mut phase = PipelineState::Idle;

        let (status, failure) = match self.drive(run, cancel, &mut state, &mut phase) {
            Ok(status) => (status, None),
            Err(err) => {
                error!(error = %err, read = state.read_count, written = state.write_count, "run failed");
                (RunStatus::Failed, Some(err))
            }
        };
        phase.advance(match status {
            RunStatus::Completed => PipelineState::Completed,
            RunStatus::Failed => PipelineState::Failed,
            RunStatus::Cancelled => PipelineState::Cancelled,
        });

        info!(
            status = %status,
            read = state.read_count,
            skipped = state.skip_count,
            failed = state.fail_count,
            written = state.write_count,
            chunks = state.commit_count,
            "run finished"
        );

        RunResult {
            run_id: run.id.clone(),
            path: run.path.clone(),
            status,
            read_count: state.read_count,
            skip_count: state.skip_count,
            fail_count: state.fail_count,
            write_count: state.write_count,
            commit_count: state.commit_count,
            resumed_from: state.resumed_from,
            started_at,
            finished_at: current_timestamp_ms(),
            error: failure.as_ref().map(ToString::to_string),
            error_kind: failure.as_ref().map(ImportError::kind),
        }
    }

    fn drive(
        &self,
        run: &RunDescriptor,
        cancel: &CancellationToken,
        state: &mut ExecutionState,
        phase: &mut PipelineState,
    ) -> Result<RunStatus> {
        let resume = if self.config.save_state {
            self.checkpoints
                .load(&run.id)
                .map_err(ImportError::Checkpoint)?
                .map_or(0, |saved| saved.current_item_count)
        } else {
            0
        };
        if resume > 0 {
            info!(resumed_from = resume, "resuming from checkpoint");
        }
        state.resumed_from = resume;
        state.current_item_count = resume;

        let mut stream = self.open(&run.path, resume)?;
        phase.advance(PipelineState::HeaderRead);
        debug!(columns = ?stream.header(), "header read");
        phase.advance(PipelineState::Streaming);

        let chunk_size = self.config.chunk_size;
        let mut buffer = Vec::with_capacity(chunk_size);
        while let Some(outcome) = stream.next() {
            // Observed once the next row is in hand; a cancel that arrives
            // after the last row belongs to the drain below.
            if cancel.is_cancelled() {
                info!(discarded = buffer.len(), "run cancelled while streaming");
                return Ok(RunStatus::Cancelled);
            }
            match outcome {
                RowOutcome::Record { record, .. } => {
                    state.read_count += 1;
                    buffer.push(record);
                    if buffer.len() >= chunk_size {
                        self.commit(run, &mut buffer, state, stream.consumed())?;
                    }
                }
                RowOutcome::Skipped(err) => {
                    state.skip_count += 1;
                    warn!(line = ?err.line(), error = %err, "row skipped");
                    if let Some(limit) = self.config.skip_limit
                        && state.skip_count > limit
                    {
                        return Err(ImportError::SkipLimitExceeded { limit });
                    }
                }
                RowOutcome::Fatal(err) => {
                    if err.is_skippable() {
                        state.fail_count += 1;
                    }
                    return Err(err);
                }
            }
        }

        phase.advance(PipelineState::Draining);
        if cancel.is_cancelled() {
            let flush = self.config.flush_on_cancel;
            info!(buffered = buffer.len(), flush, "run cancelled while draining");
            if flush && !buffer.is_empty() {
                self.commit(run, &mut buffer, state, stream.consumed())?;
            }
            return Ok(RunStatus::Cancelled);
        }
        if !buffer.is_empty() {
            self.commit(run, &mut buffer, state, stream.consumed())?;
        }
        drop(stream);

        if self.config.save_state {
            self.checkpoints
                .clear(&run.id)
                .map_err(ImportError::Checkpoint)?;
        }
        Ok(RunStatus::Completed)
    }

    /// Deliver the buffer as one chunk and record the commit.
    fn commit(
        &self,
        run: &RunDescriptor,
        buffer: &mut Vec<M::Record>,
        state: &mut ExecutionState,
        consumed: u64,
    ) -> Result<()> {
        let records = std::mem::replace(buffer, Vec::with_capacity(self.config.chunk_size));
        let len = records.len() as u64;
        let sequence = state.commit_count + 1;
        let chunk = Chunk {
            run_id: run.id.clone(),
            sequence,
            records,
        };
        if let Err(source) = self.sink.write(chunk) {
            state.fail_count += len;
            return Err(ImportError::Sink {
                chunk: sequence,
                source,
            });
        }

        state.write_count += len;
        state.commit_count = sequence;
        state.current_item_count = consumed;
        state.updated_at = current_timestamp_ms();
        debug!(chunk = sequence, records = len, offset = consumed, "chunk committed");

        if self.config.save_state {
            self.checkpoints
                .save(&run.id, state)
                .map_err(ImportError::Checkpoint)?;
        }
        Ok(())
    }
}
