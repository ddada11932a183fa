//! Assertions over run results and deliveries.

use crate::error::ErrorKind;
use crate::run::{RunResult, RunStatus};
use crate::sink::Chunk;
use std::fmt::Debug;

/// Assert that the chunks have exactly the given sizes, in order.
///
/// # Panics
///
/// Panics if the number of chunks or any size differs.
///
/// # Example
///
/// ```
/// use flatbatch::testing::assert_chunk_sizes;
///
/// let chunks: Vec<flatbatch::Chunk<u32>> = Vec::new();
/// assert_chunk_sizes(&chunks, &[]);
/// ```
pub fn assert_chunk_sizes<R>(chunks: &[Chunk<R>], expected: &[usize]) {
    let actual: Vec<usize> = chunks.iter().map(Chunk::len).collect();
    assert_eq!(
        actual, expected,
        "Chunk size mismatch:\n  Expected: {expected:?}\n  Actual: {actual:?}"
    );
}

/// Assert that the chunks carry sequence numbers `1..=n`.
///
/// # Panics
///
/// Panics on a gap or reordering.
pub fn assert_sequential<R>(chunks: &[Chunk<R>]) {
    for (i, chunk) in chunks.iter().enumerate() {
        assert_eq!(
            chunk.sequence,
            i as u64 + 1,
            "Chunk at position {i} has sequence {}",
            chunk.sequence
        );
    }
}

/// Assert that two record lists are equal in order and content.
///
/// # Panics
///
/// Panics if the lists differ in length or content.
pub fn assert_records_equal<T: Debug + PartialEq>(actual: &[T], expected: &[T]) {
    assert_eq!(
        actual.len(),
        expected.len(),
        "Record count mismatch:\n  Expected: {}\n  Actual: {}\n  Expected records: {expected:?}\n  Actual records: {actual:?}",
        expected.len(),
        actual.len()
    );
    for (i, (a, e)) in actual.iter().zip(expected.iter()).enumerate() {
        assert_eq!(a, e, "Record mismatch at index {i}:\n  Expected: {e:?}\n  Actual: {a:?}");
    }
}

/// # Panics
///
/// Panics unless the run completed.
pub fn assert_run_completed(result: &RunResult) {
    assert_eq!(
        result.status,
        RunStatus::Completed,
        "Run {} did not complete: {:?}",
        result.run_id,
        result.error
    );
}

/// # Panics
///
/// Panics unless the run failed with an error of `kind`.
pub fn assert_run_failed(result: &RunResult, kind: ErrorKind) {
    assert_eq!(result.status, RunStatus::Failed, "Run {} did not fail", result.run_id);
    assert_eq!(
        result.error_kind,
        Some(kind),
        "Run {} failed with unexpected error: {:?}",
        result.run_id,
        result.error
    );
}

/// Assert the read and skip counters.
///
/// # Panics
///
/// Panics if either counter differs.
pub fn assert_counts(result: &RunResult, read: u64, skipped: u64) {
    assert_eq!(
        (result.read_count, result.skip_count),
        (read, skipped),
        "Counter mismatch (read, skipped) for run {}",
        result.run_id
    );
}
