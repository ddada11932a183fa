//! Generated inputs and the records they map to.

use crate::mapper::Message;
use std::fmt::Write;

/// The three-row example used throughout the docs.
pub const SAMPLE_INPUT: &str = "type,value\nA,1\nB,2\nC,3";

const KINDS: [&str; 3] = ["A", "B", "C"];

/// `type,value` header followed by `n` rows `A,1`, `B,2`, `C,3`, `A,4`, ...
///
/// ```
/// use flatbatch::testing::type_value_rows;
///
/// assert_eq!(type_value_rows(2), "type,value\nA,1\nB,2\n");
/// ```
#[must_use]
pub fn type_value_rows(n: usize) -> String {
    let mut out = String::from("type,value\n");
    for i in 0..n {
        let _ = writeln!(out, "{},{}", KINDS[i % KINDS.len()], i + 1);
    }
    out
}

/// The messages [`type_value_rows`] maps to.
#[must_use]
pub fn expected_messages(n: usize) -> Vec<Message> {
    (0..n)
        .map(|i| Message::new(KINDS[i % KINDS.len()], (i + 1).to_string()))
        .collect()
}

/// Like [`type_value_rows`], with a one-field row inserted after the first
/// `after` data rows.
#[must_use]
pub fn rows_with_malformed(n: usize, after: usize) -> String {
    let mut out = String::from("type,value\n");
    for i in 0..n {
        if i == after {
            out.push_str("BROKEN\n");
        }
        let _ = writeln!(out, "{},{}", KINDS[i % KINDS.len()], i + 1);
    }
    if after >= n {
        out.push_str("BROKEN\n");
    }
    out
}
