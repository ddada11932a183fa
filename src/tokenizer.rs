//! Row tokenization: raw line + header -> [`FieldSet`].

use crate::config::{PipelineConfig, TokenizerMode};
use crate::error::{ImportError, Result};
use crate::header::Header;
use std::collections::HashMap;

/// A line of input text with its 1-based line number.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawRow {
    pub line: u64,
    pub content: String,
}

impl RawRow {
    pub fn new(line: u64, content: impl Into<String>) -> Self {
        Self {
            line,
            content: content.into(),
        }
    }
}

/// One tokenized row: the run's header paired with this row's values.
///
/// Values are stored positionally; lookups by name resolve to the first
/// column carrying that name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldSet {
    line: u64,
    header: Header,
    values: Vec<String>,
}

impl FieldSet {
    /// Pair `values` with `header`. The caller guarantees equal lengths.
    pub(crate) fn new(line: u64, header: Header, values: Vec<String>) -> Self {
        debug_assert_eq!(header.len(), values.len());
        Self {
            line,
            header,
            values,
        }
    }

    /// Line the row came from.
    #[must_use]
    pub fn line(&self) -> u64 {
        self.line
    }

    #[must_use]
    pub fn header(&self) -> &Header {
        &self.header
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[must_use]
    pub fn get(&self, column: &str) -> Option<&str> {
        self.header
            .index_of(column)
            .map(|idx| self.values[idx].as_str())
    }

    /// Value of `column`, or `""` when the header has no such column.
    #[must_use]
    pub fn get_or_empty(&self, column: &str) -> &str {
        self.get(column).unwrap_or_default()
    }

    #[must_use]
    pub fn get_index(&self, idx: usize) -> Option<&str> {
        self.values.get(idx).map(String::as_str)
    }

    #[must_use]
    pub fn values(&self) -> &[String] {
        &self.values
    }

    /// `(column, value)` pairs in header order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.header
            .iter()
            .zip(self.values.iter().map(String::as_str))
    }

    /// Build a mapping error for this row.
    pub fn mapping_error(&self, reason: impl Into<String>) -> ImportError {
        ImportError::Mapping {
            line: self.line,
            reason: reason.into(),
        }
    }

    /// Column -> value map. Duplicate columns keep their first value.
    #[must_use]
    pub fn into_map(self) -> HashMap<String, String> {
        let mut map = HashMap::with_capacity(self.values.len());
        for (name, value) in self.header.iter().zip(self.values) {
            map.entry(name.to_string()).or_insert(value);
        }
        map
    }
}

/// Splits raw lines into fields and checks them against the header.
#[derive(Clone, Debug)]
pub struct RowTokenizer {
    delimiter: String,
    quote: Option<char>,
    mode: TokenizerMode,
}

impl RowTokenizer {
    pub fn new(delimiter: impl Into<String>, quote: Option<char>, mode: TokenizerMode) -> Self {
        Self {
            delimiter: delimiter.into(),
            quote,
            mode,
        }
    }

    #[must_use]
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.delimiter.clone(), config.quote, config.tokenizer_mode)
    }

    /// Split `line` on the delimiter.
    ///
    /// Single-byte delimiters go through the `csv` reader: with a quote
    /// character configured, a field that opens with it runs to the matching
    /// close quote and may contain the delimiter, and a doubled quote inside
    /// it stands for one literal quote. Multi-byte delimiters split verbatim.
    ///
    /// # Errors
    ///
    /// Returns the reader's error if the line cannot be parsed.
    pub fn split(&self, line: &str) -> csv::Result<Vec<String>> {
        let [delimiter] = self.delimiter.as_bytes() else {
            return Ok(line.split(self.delimiter.as_str()).map(str::to_string).collect());
        };

        let mut builder = csv::ReaderBuilder::new();
        builder
            .has_headers(false)
            .flexible(true)
            .delimiter(*delimiter)
            .terminator(csv::Terminator::Any(b'\n'))
            .buffer_capacity(line.len() + 1);
        match self
            .quote
            .filter(char::is_ascii)
            .and_then(|q| u8::try_from(q).ok())
        {
            Some(q) => builder.quote(q),
            None => builder.quoting(false),
        };

        let mut reader = builder.from_reader(line.as_bytes());
        let mut record = csv::StringRecord::new();
        // The reader drops empty lines; a blank row is one empty field.
        if !reader.read_record(&mut record)? {
            return Ok(vec![String::new()]);
        }
        Ok(record.iter().map(str::to_string).collect())
    }

    /// Tokenize `row` against `header`.
    ///
    /// # Errors
    ///
    /// In [`TokenizerMode::Strict`], returns [`ImportError::MalformedRow`] when
    /// the field count differs from the header length.
    pub fn tokenize(&self, row: &RawRow, header: &Header) -> Result<FieldSet> {
        let mut values = self.split(&row.content).map_err(std::io::Error::from)?;
        let expected = header.len();
        if values.len() != expected {
            match self.mode {
                TokenizerMode::Strict => {
                    return Err(ImportError::MalformedRow {
                        line: row.line,
                        expected,
                        actual: values.len(),
                        content: row.content.clone(),
                    });
                }
                TokenizerMode::Lenient => values.resize(expected, String::new()),
            }
        }
        Ok(FieldSet::new(row.line, header.clone(), values))
    }
}
