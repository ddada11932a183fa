//! Temporary input files and output readers.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tempfile::{NamedTempFile, TempDir};

/// An input file that is deleted when dropped.
pub struct TempInput {
    #[allow(dead_code)]
    temp_file: NamedTempFile,
    path: PathBuf,
}

impl TempInput {
    /// Write `contents` to a new `.csv` file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created or written.
    pub fn new(contents: &str) -> std::io::Result<Self> {
        Self::from_bytes(contents.as_bytes(), "csv")
    }

    /// Write `contents` to a new file ending in `.{extension}`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created or written.
    pub fn with_extension(contents: &str, extension: &str) -> std::io::Result<Self> {
        Self::from_bytes(contents.as_bytes(), extension)
    }

    /// Write raw bytes, e.g. a non-UTF-8 encoding or a pre-compressed stream.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created or written.
    pub fn from_bytes(bytes: &[u8], extension: &str) -> std::io::Result<Self> {
        let mut temp_file = tempfile::Builder::new()
            .prefix("flatbatch-")
            .suffix(&format!(".{extension}"))
            .tempfile()?;
        temp_file.write_all(bytes)?;
        temp_file.flush()?;
        let path = temp_file.path().to_path_buf();
        Ok(Self { temp_file, path })
    }

    /// Gzip `contents` into a new `.csv.gz` file.
    ///
    /// # Errors
    ///
    /// Returns an error if compression or the write fails.
    #[cfg(feature = "compression-gzip")]
    pub fn gzip(contents: &str) -> std::io::Result<Self> {
        use flate2::Compression;
        use flate2::write::GzEncoder;

        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(contents.as_bytes())?;
        Self::from_bytes(&enc.finish()?, "csv.gz")
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// A temporary directory that is deleted when dropped.
pub struct TempDirPath {
    #[allow(dead_code)]
    temp_dir: TempDir,
    path: PathBuf,
}

impl TempDirPath {
    /// Create a new temporary directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn new() -> std::io::Result<Self> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().to_path_buf();
        Ok(Self { temp_dir, path })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of `filename` inside this directory.
    #[must_use]
    pub fn file_path(&self, filename: &str) -> PathBuf {
        self.path.join(filename)
    }

    /// Create `filename` inside this directory with `contents`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn write_file(&self, filename: &str, contents: &str) -> std::io::Result<PathBuf> {
        let path = self.file_path(filename);
        std::fs::write(&path, contents)?;
        Ok(path)
    }
}

/// Read a JSON Lines file produced by [`JsonlSink`](crate::sink::JsonlSink).
///
/// # Errors
///
/// Returns an error if the file cannot be read or a line does not parse.
pub fn read_jsonl_output<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<Vec<T>> {
    let path = path.as_ref();
    let f = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let reader = crate::io::compression::decode_input(f, path)
        .with_context(|| format!("setup decompression for {}", path.display()))?;
    let mut out = Vec::new();
    for (i, line) in BufReader::new(reader).lines().enumerate() {
        let line = line.with_context(|| format!("read line {} in {}", i + 1, path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        let v = serde_json::from_str(&line)
            .with_context(|| format!("parse JSON at line {} in {}", i + 1, path.display()))?;
        out.push(v);
    }
    Ok(out)
}
