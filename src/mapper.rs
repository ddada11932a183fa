//! Record mapping: [`FieldSet`] -> output record.
//!
//! The mapper is the per-deployment customisation point. It is resolved once
//! when the pipeline is built and then applied to every row.

use crate::error::Result;
use crate::tokenizer::FieldSet;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;

/// Converts a tokenized row into the pipeline's output record.
///
/// Returning an error marks the row as unmappable; the pipeline treats it
/// like any other row-level failure (skipped or fatal depending on `strict`).
pub trait RecordMapper: Send + Sync {
    type Record: Send + 'static;

    /// Map one row.
    ///
    /// # Errors
    ///
    /// Implementations return [`ImportError::Mapping`](crate::ImportError::Mapping),
    /// usually built with [`FieldSet::mapping_error`].
    fn map(&self, fields: &FieldSet) -> Result<Self::Record>;
}

/// A `{type, value}` pair read from the columns of the same name.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
}

impl Message {
    pub fn new(kind: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            value: value.into(),
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Message{{type='{}', value='{}'}}", self.kind, self.value)
    }
}

/// Maps the `type` and `value` columns into a [`Message`].
///
/// Absent columns map to empty strings, so this mapper never fails.
#[derive(Clone, Copy, Debug, Default)]
pub struct MessageMapper;

impl RecordMapper for MessageMapper {
    type Record = Message;

    fn map(&self, fields: &FieldSet) -> Result<Message> {
        Ok(Message::new(
            fields.get_or_empty("type"),
            fields.get_or_empty("value"),
        ))
    }
}

/// Passes every column through as a `column -> value` map.
#[derive(Clone, Copy, Debug, Default)]
pub struct ColumnMapMapper;

impl RecordMapper for ColumnMapMapper {
    type Record = HashMap<String, String>;

    fn map(&self, fields: &FieldSet) -> Result<Self::Record> {
        let mut map = HashMap::with_capacity(fields.len());
        for (name, value) in fields.iter() {
            map.entry(name.to_string())
                .or_insert_with(|| value.to_string());
        }
        Ok(map)
    }
}

/// Adapts a closure into a [`RecordMapper`].
///
/// ```
/// use flatbatch::{FnMapper, RecordMapper};
///
/// let mapper = FnMapper::new(|fields: &flatbatch::FieldSet| {
///     fields
///         .get_or_empty("amount")
///         .parse::<i64>()
///         .map_err(|e| fields.mapping_error(format!("amount: {e}")))
/// });
/// # let _ = &mapper;
/// ```
pub struct FnMapper<F, R> {
    f: F,
    _r: PhantomData<fn() -> R>,
}

impl<F, R> FnMapper<F, R>
where
    F: Fn(&FieldSet) -> Result<R> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f, _r: PhantomData }
    }
}

impl<F, R> RecordMapper for FnMapper<F, R>
where
    F: Fn(&FieldSet) -> Result<R> + Send + Sync,
    R: Send + 'static,
{
    type Record = R;

    fn map(&self, fields: &FieldSet) -> Result<R> {
        (self.f)(fields)
    }
}
