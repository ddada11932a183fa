//! Line-oriented input source.
//!
//! [`LineSource`] owns the open input for a run. It decompresses and decodes
//! the byte stream, numbers physical lines from 1, drops comment lines and
//! strips line terminators. Lines are pulled one at a time; nothing beyond
//! the current line is held in memory.

use crate::config::PipelineConfig;
use crate::error::{ImportError, Result};
use crate::io::compression::{InputStream, decode_input};
use crate::tokenizer::RawRow;
use encoding_rs::{Encoding, UTF_8};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::debug;

const BOM: char = '\u{feff}';

pub struct LineSource {
    path: PathBuf,
    reader: BufReader<InputStream>,
    encoding: &'static Encoding,
    comment_prefixes: Vec<String>,
    line_number: u64,
    buf: Vec<u8>,
}

impl LineSource {
    /// Open `path` for streaming.
    ///
    /// # Errors
    ///
    /// Returns [`ImportError::ResourceUnavailable`] if the file cannot be
    /// opened or its compression wrapper cannot be set up, and
    /// [`ImportError::Config`] for an unknown encoding.
    pub fn open(path: &Path, config: &PipelineConfig) -> Result<Self> {
        let encoding = config.resolve_encoding()?;
        let file = File::open(path).map_err(|source| ImportError::ResourceUnavailable {
            path: path.to_path_buf(),
            source,
        })?;
        let stream = decode_input(file, path).map_err(|e| ImportError::ResourceUnavailable {
            path: path.to_path_buf(),
            source: std::io::Error::other(format!("{e:#}")),
        })?;
        debug!(path = %path.display(), encoding = encoding.name(), "input opened");
        Ok(Self::from_stream(path, stream, encoding, config.comment_prefixes.clone()))
    }

    /// Wrap an already-open stream. `path` is only used for diagnostics.
    pub fn from_stream(
        path: impl Into<PathBuf>,
        stream: InputStream,
        encoding: &'static Encoding,
        comment_prefixes: Vec<String>,
    ) -> Self {
        Self {
            path: path.into(),
            reader: BufReader::new(stream),
            encoding,
            comment_prefixes,
            line_number: 0,
            buf: Vec::with_capacity(256),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of physical lines consumed so far.
    #[must_use]
    pub fn line_number(&self) -> u64 {
        self.line_number
    }

    /// Discard up to `n` physical lines, comments included. Returns how many
    /// were actually skipped.
    ///
    /// # Errors
    ///
    /// Propagates read failures as [`ImportError::Io`].
    pub fn skip_lines(&mut self, n: usize) -> Result<usize> {
        let mut skipped = 0;
        while skipped < n && self.read_physical()? {
            skipped += 1;
        }
        Ok(skipped)
    }

    /// Next non-comment line.
    ///
    /// `Ok(None)` marks the end of input. A line that does not decode in the
    /// configured encoding yields [`ImportError::Decode`]; the source stays
    /// usable and the following call moves on to the next line.
    ///
    /// # Errors
    ///
    /// [`ImportError::Io`] for read failures, [`ImportError::Decode`] as above.
    pub fn next_row(&mut self) -> Result<Option<RawRow>> {
        loop {
            if !self.read_physical()? {
                return Ok(None);
            }
            let line = self.line_number;
            let text = self.decode_current()?;
            if self.is_comment(&text) {
                continue;
            }
            return Ok(Some(RawRow::new(line, text)));
        }
    }

    fn is_comment(&self, text: &str) -> bool {
        self.comment_prefixes
            .iter()
            .any(|prefix| !prefix.is_empty() && text.starts_with(prefix.as_str()))
    }

    /// Read one physical line into `buf` without its terminator.
    fn read_physical(&mut self) -> Result<bool> {
        self.buf.clear();
        let n = self.reader.read_until(b'\n', &mut self.buf)?;
        if n == 0 {
            return Ok(false);
        }
        if self.buf.last() == Some(&b'\n') {
            self.buf.pop();
            if self.buf.last() == Some(&b'\r') {
                self.buf.pop();
            }
        }
        self.line_number += 1;
        Ok(true)
    }

    fn decode_current(&self) -> Result<String> {
        let decoded = self
            .encoding
            .decode_without_bom_handling_and_without_replacement(&self.buf)
            .ok_or(ImportError::Decode {
                line: self.line_number,
                encoding: self.encoding.name(),
            })?;
        let mut text = decoded.into_owned();
        if self.line_number == 1 && self.encoding == UTF_8 && text.starts_with(BOM) {
            text.drain(..BOM.len_utf8());
        }
        Ok(text)
    }
}
