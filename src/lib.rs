//! # Flatbatch
//!
//! A **chunked import pipeline** for delimited text files. Flatbatch streams a
//! file line by line, turns every data row into a typed record through a
//! header-driven mapping, and hands the records to a sink in fixed-size
//! chunks. Malformed rows are either skipped or fatal, and an interrupted run
//! resumes after the last committed chunk.
//!
//! ## Key Features
//!
//! - **Header-driven rows** - columns come from the first line; rows are
//!   accessed by column name through [`FieldSet`]
//! - **Pluggable mapping** - implement [`RecordMapper`] or wrap a closure in [`FnMapper`]
//! - **Chunked delivery** - one [`Sink::write`] call per chunk, final partial chunk included
//! - **Fault tolerance** - `strict = false` counts row errors as skips, with an optional skip limit
//! - **Restartable runs** - run ids derived from the input path key a [`CheckpointStore`]
//! - **Concurrent runs** - spawn runs on worker threads, cancel them, or run many files on a rayon pool
//! - **Transparent input handling** - encodings via `encoding_rs`, gzip/zstd/bzip2/xz inputs
//!
//! ## Quick Start
//!
//! ```no_run
//! use flatbatch::sink::ConsoleSink;
//! use flatbatch::{ChunkedPipeline, MessageMapper, PipelineConfig, RunCoordinator};
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = PipelineConfig::default().chunk_size(500).strict(false);
//! let pipeline = ChunkedPipeline::new(config, MessageMapper, ConsoleSink::stdout())?;
//! let coordinator = RunCoordinator::new(pipeline);
//!
//! let result = coordinator.execute("messages.csv")?;
//! println!("{} read, {} skipped: {}", result.read_count, result.skip_count, result.status);
//! # Ok(())
//! # }
//! ```
//!
//! ## Core Concepts
//!
//! ### Header and rows
//!
//! The first line left after `lines_to_skip` and comment lines is the
//! [`Header`]. Every later line is a [`RawRow`], split by the [`RowTokenizer`]
//! into a [`FieldSet`]. A row whose field count differs from the header is
//! malformed unless the tokenizer runs in [`TokenizerMode::Lenient`].
//!
//! ### Chunks and commits
//!
//! [`ChunkedPipeline`] buffers mapped records and delivers them as a [`Chunk`]
//! whenever `chunk_size` records are waiting, and once more at end of input.
//! A chunk accepted by the sink is committed: it is never delivered again by
//! the same run id.
//!
//! ### Runs
//!
//! [`RunCoordinator::execute`] normalizes the path, derives its [`RunId`] and
//! executes the pipeline, returning a [`RunResult`] with counters and a
//! [`RunStatus`]. At most one run per id is active at a time.
//!
//! ## Feature Flags
//!
//! - `io-jsonl` (default) - [`sink::JsonlSink`]
//! - `io-csv` (default) - [`sink::CsvSink`]
//! - `compression-gzip`, `compression-zstd`, `compression-bzip2`, `compression-xz` (default) - compressed inputs and outputs
//! - `checkpointing` (default) - [`checkpoint::FileCheckpointStore`]

pub mod checkpoint;
pub mod config;
pub mod error;
pub mod header;
pub mod io;
pub mod logging;
pub mod mapper;
pub mod pipeline;
pub mod reader;
pub mod run;
pub mod sink;
pub mod testing;
pub mod tokenizer;

pub use checkpoint::{CheckpointStore, ExecutionState, InMemoryCheckpointStore};
pub use config::{DEFAULT_CHUNK_SIZE, PipelineConfig, TokenizerMode};
pub use error::{ErrorKind, ImportError, Result};
pub use header::{Header, parse_header};
pub use mapper::{ColumnMapMapper, FnMapper, Message, MessageMapper, RecordMapper};
pub use pipeline::{CancellationToken, ChunkedPipeline, PipelineState, RecordStream, RowOutcome};
pub use run::{RunCoordinator, RunDescriptor, RunHandle, RunId, RunResult, RunStatus, prepare_run};
pub use sink::{Chunk, FnSink, Sink};
pub use tokenizer::{FieldSet, RawRow, RowTokenizer};

#[cfg(feature = "checkpointing")]
pub use checkpoint::FileCheckpointStore;
