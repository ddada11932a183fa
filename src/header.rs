//! Header parsing.
//!
//! The header is the first line of the input that survives `lines_to_skip`
//! and comment filtering. Quote characters are stripped blindly (no RFC-4180
//! quoting) and the remainder is split on the configured delimiter. The
//! resulting column list is immutable for the rest of the run.

use crate::error::{ImportError, Result};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Ordered column names for one run.
///
/// Cloning is cheap: every [`FieldSet`](crate::FieldSet) produced during the
/// run shares the same column list.
#[derive(Clone, PartialEq, Eq)]
pub struct Header {
    columns: Arc<[String]>,
}

impl Header {
    /// Build a header from explicit column names.
    ///
    /// # Errors
    ///
    /// Returns [`ImportError::Config`] when `columns` is empty.
    pub fn new<I, S>(columns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let columns: Vec<String> = columns.into_iter().map(Into::into).collect();
        if columns.is_empty() {
            return Err(ImportError::Config("a header needs at least one column".into()));
        }
        Ok(Self {
            columns: columns.into(),
        })
    }

    /// Parse a header line: strip every `"` and split on `delimiter`.
    ///
    /// Returns `None` for a line that is blank once quotes are removed.
    #[must_use]
    pub fn parse(line: &str, delimiter: &str) -> Option<Self> {
        let stripped = line.replace('"', "");
        if stripped.trim().is_empty() {
            return None;
        }
        let columns: Vec<String> = stripped.split(delimiter).map(str::to_string).collect();
        Some(Self {
            columns: columns.into(),
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Always `false`; kept for API symmetry with `len`.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.columns
    }

    /// Position of the first column called `name`.
    #[must_use]
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(String::as_str)
    }
}

impl fmt::Debug for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.columns.iter()).finish()
    }
}

/// Turn the first line of `path` into a [`Header`].
///
/// `first_line` is `None` when the input had no lines left after skipping.
///
/// # Errors
///
/// Returns [`ImportError::EmptyInput`] when there is no line, or the line is blank.
pub fn parse_header(first_line: Option<&str>, delimiter: &str, path: &Path) -> Result<Header> {
    first_line
        .and_then(|line| Header::parse(line, delimiter))
        .ok_or_else(|| ImportError::EmptyInput {
            path: path.to_path_buf(),
        })
}
