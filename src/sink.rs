//! Chunk consumers.
//!
//! A [`Sink`] receives each committed [`Chunk`] by value, once per chunk, in
//! input order for a given run. Once `write` returns `Ok` the chunk counts as
//! handed off and is never delivered again by that run (nor by a resumed run
//! with the same id). Sinks shared between concurrent runs must be
//! thread-safe; every sink in this module serialises deliveries so that one
//! chunk is written contiguously.
//!
//! Built-in sinks:
//! - [`ConsoleSink`] - one `Display` line per record
//! - [`JsonlSink`] - JSON Lines file, compressed by extension
//! - [`CsvSink`] - CSV file with a header row (feature `io-csv`)
//! - [`FnSink`] - wraps a closure

use crate::io::compression::{OutputStream, encode_output};
use crate::run::RunId;
use anyhow::{Context, Result};
use serde::Serialize;
use std::fmt::Display;
use std::fs::{File, create_dir_all};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

/// One delivery: up to `chunk_size` records in input order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Chunk<R> {
    pub run_id: RunId,
    /// 1-based position of this chunk within the run that delivered it.
    pub sequence: u64,
    pub records: Vec<R>,
}

impl<R> Chunk<R> {
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[must_use]
    pub fn into_records(self) -> Vec<R> {
        self.records
    }
}

/// Downstream consumer of chunks.
pub trait Sink<R>: Send + Sync {
    /// Accept one chunk.
    ///
    /// # Errors
    ///
    /// Any error fails the run. Chunks accepted earlier are not rolled back.
    fn write(&self, chunk: Chunk<R>) -> Result<()>;
}

impl<R, S: Sink<R> + ?Sized> Sink<R> for Arc<S> {
    fn write(&self, chunk: Chunk<R>) -> Result<()> {
        (**self).write(chunk)
    }
}

impl<R, S: Sink<R> + ?Sized> Sink<R> for Box<S> {
    fn write(&self, chunk: Chunk<R>) -> Result<()> {
        (**self).write(chunk)
    }
}

/// Writes each record's `Display` form on its own line.
pub struct ConsoleSink {
    out: Mutex<Box<dyn Write + Send>>,
}

impl ConsoleSink {
    #[must_use]
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }

    pub fn new(out: impl Write + Send + 'static) -> Self {
        Self {
            out: Mutex::new(Box::new(out)),
        }
    }
}

impl<R: Display> Sink<R> for ConsoleSink {
    fn write(&self, chunk: Chunk<R>) -> Result<()> {
        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        for record in &chunk.records {
            writeln!(out, "{record}").context("write record to console")?;
        }
        out.flush().context("flush console")?;
        Ok(())
    }
}

fn create_output(path: &Path) -> Result<OutputStream> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        create_dir_all(parent).with_context(|| format!("mkdir -p {}", parent.display()))?;
    }
    let f = File::create(path).with_context(|| format!("create {}", path.display()))?;
    encode_output(f, path).with_context(|| format!("setup compression for {}", path.display()))
}

/// Appends records to a JSON Lines file.
///
/// Compressed outputs are finalised when the sink is dropped or
/// [`finish`](JsonlSink::finish) is called.
#[cfg(feature = "io-jsonl")]
pub struct JsonlSink {
    path: PathBuf,
    out: Mutex<Option<OutputStream>>,
}

#[cfg(feature = "io-jsonl")]
impl JsonlSink {
    /// Create (or truncate) `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file or its parent directory cannot be created.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        Ok(Self {
            path: path.to_path_buf(),
            out: Mutex::new(Some(create_output(path)?)),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush and close the file. Later writes fail.
    ///
    /// # Errors
    ///
    /// Returns an error if the final flush fails.
    pub fn finish(&self) -> Result<()> {
        let mut guard = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(mut w) = guard.take() {
            w.flush()
                .with_context(|| format!("flush {}", self.path.display()))?;
        }
        Ok(())
    }
}

#[cfg(feature = "io-jsonl")]
impl<R: Serialize> Sink<R> for JsonlSink {
    fn write(&self, chunk: Chunk<R>) -> Result<()> {
        let mut guard = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        let w = guard
            .as_mut()
            .with_context(|| format!("{} is already closed", self.path.display()))?;
        for (i, record) in chunk.records.iter().enumerate() {
            serde_json::to_writer(&mut *w, record).with_context(|| {
                format!(
                    "serialize record #{} of chunk {} to {}",
                    i + 1,
                    chunk.sequence,
                    self.path.display()
                )
            })?;
            w.write_all(b"\n")?;
        }
        w.flush()
            .with_context(|| format!("flush {}", self.path.display()))?;
        Ok(())
    }
}

/// Writes records as CSV rows; the header row comes from the first record's
/// field names.
#[cfg(feature = "io-csv")]
pub struct CsvSink {
    path: PathBuf,
    out: Mutex<Option<csv::Writer<OutputStream>>>,
}

#[cfg(feature = "io-csv")]
impl CsvSink {
    /// Create (or truncate) `path`, writing fields separated by `delimiter`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file or its parent directory cannot be created.
    pub fn create(path: impl AsRef<Path>, delimiter: u8) -> Result<Self> {
        let path = path.as_ref();
        let wtr = csv::WriterBuilder::new()
            .delimiter(delimiter)
            .has_headers(true)
            .from_writer(create_output(path)?);
        Ok(Self {
            path: path.to_path_buf(),
            out: Mutex::new(Some(wtr)),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush and close the file. Later writes fail.
    ///
    /// # Errors
    ///
    /// Returns an error if the final flush fails.
    pub fn finish(&self) -> Result<()> {
        let mut guard = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(mut wtr) = guard.take() {
            wtr.flush()
                .with_context(|| format!("flush {}", self.path.display()))?;
        }
        Ok(())
    }
}

#[cfg(feature = "io-csv")]
impl<R: Serialize> Sink<R> for CsvSink {
    fn write(&self, chunk: Chunk<R>) -> Result<()> {
        let mut guard = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        let wtr = guard
            .as_mut()
            .with_context(|| format!("{} is already closed", self.path.display()))?;
        for (i, record) in chunk.records.iter().enumerate() {
            wtr.serialize(record).with_context(|| {
                format!(
                    "serialize CSV row #{} of chunk {} to {}",
                    i + 1,
                    chunk.sequence,
                    self.path.display()
                )
            })?;
        }
        wtr.flush()
            .with_context(|| format!("flush {}", self.path.display()))?;
        Ok(())
    }
}

/// Adapts a closure into a [`Sink`].
pub struct FnSink<F> {
    f: F,
}

impl<F> FnSink<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<R, F> Sink<R> for FnSink<F>
where
    F: Fn(Chunk<R>) -> Result<()> + Send + Sync,
{
    fn write(&self, chunk: Chunk<R>) -> Result<()> {
        (self.f)(chunk)
    }
}
