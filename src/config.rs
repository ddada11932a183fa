//! Run configuration.
//!
//! [`PipelineConfig`] bundles every knob the pipeline recognises. It is built
//! in code with the chainable setters, or loaded from JSON:
//!
//! ```no_run
//! use flatbatch::PipelineConfig;
//!
//! let config = PipelineConfig::default()
//!     .delimiter(";")
//!     .chunk_size(1_000)
//!     .strict(false);
//! config.validate()?;
//!
//! let from_disk = PipelineConfig::from_json_file("import.json")?;
//! # Ok::<(), anyhow::Error>(())
//! ```

use crate::error::{ImportError, Result};
use anyhow::Context;
use encoding_rs::Encoding;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Default number of records per delivered chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 500;

/// How the tokenizer treats rows whose field count differs from the header.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenizerMode {
    /// A field-count mismatch is a malformed row.
    #[default]
    Strict,
    /// Missing trailing fields become empty strings; extra fields are dropped.
    Lenient,
}

/// Configuration for one pipeline instance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Field separator, shared by header and data rows.
    pub delimiter: String,
    /// Quote character for data rows. `None` disables quote handling.
    pub quote: Option<char>,
    /// Maximum number of records per chunk.
    pub chunk_size: usize,
    /// Row-level errors abort the run when `true`, and are skipped otherwise.
    pub strict: bool,
    pub tokenizer_mode: TokenizerMode,
    /// Encoding label understood by `encoding_rs` (e.g. `UTF-8`, `latin1`).
    pub encoding: String,
    /// Lines discarded before the header is read.
    pub lines_to_skip: usize,
    /// Upper bound on data rows processed per run, counting any restart offset.
    pub max_item_count: Option<u64>,
    /// Lines starting with any of these prefixes are ignored.
    pub comment_prefixes: Vec<String>,
    /// Maximum tolerated skips before the run fails.
    pub skip_limit: Option<u64>,
    /// Deliver the buffered final chunk when cancellation is observed after
    /// the last row was read. A run cancelled while rows remain always
    /// discards its uncommitted buffer.
    pub flush_on_cancel: bool,
    /// Persist execution state after each commit so a rerun can resume.
    pub save_state: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            delimiter: ",".to_string(),
            quote: Some('"'),
            chunk_size: DEFAULT_CHUNK_SIZE,
            strict: true,
            tokenizer_mode: TokenizerMode::Strict,
            encoding: "UTF-8".to_string(),
            lines_to_skip: 0,
            max_item_count: None,
            comment_prefixes: vec!["#".to_string()],
            skip_limit: None,
            flush_on_cancel: true,
            save_state: true,
        }
    }
}

impl PipelineConfig {
    #[must_use]
    pub fn delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.delimiter = delimiter.into();
        self
    }

    #[must_use]
    pub fn quote(mut self, quote: Option<char>) -> Self {
        self.quote = quote;
        self
    }

    #[must_use]
    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    #[must_use]
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    #[must_use]
    pub fn tokenizer_mode(mut self, mode: TokenizerMode) -> Self {
        self.tokenizer_mode = mode;
        self
    }

    #[must_use]
    pub fn encoding(mut self, label: impl Into<String>) -> Self {
        self.encoding = label.into();
        self
    }

    #[must_use]
    pub fn lines_to_skip(mut self, lines: usize) -> Self {
        self.lines_to_skip = lines;
        self
    }

    #[must_use]
    pub fn max_item_count(mut self, max: Option<u64>) -> Self {
        self.max_item_count = max;
        self
    }

    /// Replace the comment prefixes. An empty list disables comment handling.
    #[must_use]
    pub fn comment_prefixes<I, S>(mut self, prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.comment_prefixes = prefixes.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn skip_limit(mut self, limit: Option<u64>) -> Self {
        self.skip_limit = limit;
        self
    }

    #[must_use]
    pub fn flush_on_cancel(mut self, flush: bool) -> Self {
        self.flush_on_cancel = flush;
        self
    }

    #[must_use]
    pub fn save_state(mut self, save: bool) -> Self {
        self.save_state = save;
        self
    }

    /// Check the configuration for values the pipeline cannot work with.
    ///
    /// # Errors
    ///
    /// Returns [`ImportError::Config`] for an empty delimiter, a zero chunk
    /// size, an unknown or non-ASCII-compatible encoding (UTF-16), or a quote
    /// character that is not ASCII or also appears in the delimiter.
    pub fn validate(&self) -> Result<()> {
        if self.delimiter.is_empty() {
            return Err(ImportError::Config("delimiter must not be empty".into()));
        }
        if self.chunk_size == 0 {
            return Err(ImportError::Config("chunk_size must be at least 1".into()));
        }
        if let Some(q) = self.quote
            && !q.is_ascii()
        {
            return Err(ImportError::Config(format!(
                "quote character {q:?} must be ASCII"
            )));
        }
        if let Some(q) = self.quote
            && self.delimiter.contains(q)
        {
            return Err(ImportError::Config(format!(
                "quote character {q:?} conflicts with delimiter {:?}",
                self.delimiter
            )));
        }
        let encoding = self.resolve_encoding()?;
        if !encoding.is_ascii_compatible() {
            return Err(ImportError::Config(format!(
                "encoding {} is not line-oriented",
                encoding.name()
            )));
        }
        Ok(())
    }

    /// Look up the configured encoding.
    ///
    /// # Errors
    ///
    /// Returns [`ImportError::Config`] if the label is unknown.
    pub fn resolve_encoding(&self) -> Result<&'static Encoding> {
        Encoding::for_label(self.encoding.trim().as_bytes())
            .ok_or_else(|| ImportError::Config(format!("unknown encoding {:?}", self.encoding)))
    }

    /// Load a configuration from a JSON document. Missing keys take their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_json_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let f = File::open(path).with_context(|| format!("open {}", path.display()))?;
        let config: Self = serde_json::from_reader(BufReader::new(f))
            .with_context(|| format!("parse pipeline config {}", path.display()))?;
        Ok(config)
    }
}
