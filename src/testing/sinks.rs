//! In-memory sinks for asserting on deliveries.

use crate::sink::{Chunk, Sink};
use anyhow::{Result, bail};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

/// Keeps every chunk it receives, in delivery order.
///
/// Share it with the pipeline through an `Arc` and inspect it afterwards.
#[derive(Debug)]
pub struct RecordingSink<R> {
    chunks: Mutex<Vec<Chunk<R>>>,
}

impl<R> Default for RecordingSink<R> {
    fn default() -> Self {
        Self {
            chunks: Mutex::new(Vec::new()),
        }
    }
}

impl<R: Clone> RecordingSink<R> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the chunks received so far.
    #[must_use]
    pub fn chunks(&self) -> Vec<Chunk<R>> {
        self.chunks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// All records received, concatenated in delivery order.
    #[must_use]
    pub fn records(&self) -> Vec<R> {
        self.chunks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .flat_map(|c| c.records.iter().cloned())
            .collect()
    }

    #[must_use]
    pub fn chunk_sizes(&self) -> Vec<usize> {
        self.chunks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(Chunk::len)
            .collect()
    }

    #[must_use]
    pub fn delivery_count(&self) -> usize {
        self.chunks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn clear(&self) {
        self.chunks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl<R: Send> Sink<R> for RecordingSink<R> {
    fn write(&self, chunk: Chunk<R>) -> Result<()> {
        self.chunks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(chunk);
        Ok(())
    }
}

/// Rejects one delivery (or all of them) and records the rest.
///
/// Deliveries are counted across runs, so a rerun after the failure goes
/// through.
#[derive(Debug)]
pub struct FailingSink<R> {
    fail_on: Option<u64>,
    calls: AtomicU64,
    accepted: RecordingSink<R>,
}

impl<R: Clone> FailingSink<R> {
    /// Fail the `n`-th delivery (1-based) only.
    #[must_use]
    pub fn on_delivery(n: u64) -> Self {
        Self {
            fail_on: Some(n),
            calls: AtomicU64::new(0),
            accepted: RecordingSink::new(),
        }
    }

    /// Fail every delivery.
    #[must_use]
    pub fn always() -> Self {
        Self {
            fail_on: None,
            calls: AtomicU64::new(0),
            accepted: RecordingSink::new(),
        }
    }

    /// Deliveries attempted so far, failed ones included.
    #[must_use]
    pub fn attempts(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Chunks that were accepted.
    #[must_use]
    pub fn accepted(&self) -> &RecordingSink<R> {
        &self.accepted
    }
}

impl<R: Send> Sink<R> for FailingSink<R> {
    fn write(&self, chunk: Chunk<R>) -> Result<()> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_on.is_none_or(|n| n == call) {
            bail!("delivery #{call} rejected");
        }
        self.accepted.write(chunk)
    }
}
