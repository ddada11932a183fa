//! Test support for pipelines built on flatbatch.
//!
//! - **Sinks**: [`RecordingSink`] keeps every delivered chunk, [`FailingSink`]
//!   rejects a chosen delivery
//! - **Inputs**: [`TempInput`] writes text (optionally compressed) to a
//!   temporary file that disappears on drop
//! - **Fixtures**: generators for `type,value` inputs and the matching records
//! - **Assertions**: chunk sizes, run status and counters
//!
//! # Quick Start
//!
//! ```no_run
//! use flatbatch::testing::*;
//! use flatbatch::{ChunkedPipeline, MessageMapper, PipelineConfig, RunCoordinator};
//! use std::sync::Arc;
//!
//! # fn main() -> anyhow::Result<()> {
//! let input = TempInput::new(&type_value_rows(5))?;
//! let sink = Arc::new(RecordingSink::new());
//! let config = PipelineConfig::default().chunk_size(2);
//! let coordinator = RunCoordinator::new(ChunkedPipeline::new(config, MessageMapper, Arc::clone(&sink))?);
//!
//! let result = coordinator.execute(input.path())?;
//! assert_run_completed(&result);
//! assert_chunk_sizes(&sink.chunks(), &[2, 2, 1]);
//! assert_eq!(sink.records(), expected_messages(5));
//! # Ok(())
//! # }
//! ```

pub mod assertions;
pub mod fixtures;
pub mod mock_io;
pub mod sinks;

pub use assertions::*;
pub use fixtures::*;
pub use mock_io::*;
pub use sinks::*;
