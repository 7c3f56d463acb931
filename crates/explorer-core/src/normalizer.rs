//! Canonical formatting and content hashing of explorer documents
//!
//! # Guarantees
//!
//! - **Idempotent**: `format_document(format_document(x)) == format_document(x)`
//! - **Deterministic**: same input always produces same output
//! - **Shape preserving**: no row or cell is removed except trailing blank rows
//!   and repeated blank separator rows

use sha2::{Digest, Sha256};

use crate::parser::grid::{is_blank_row, GridDocument};

/// Rewrite a document in canonical form.
///
/// - `\r\n` line endings become `\n`
/// - surrounding whitespace is trimmed from every cell
/// - whitespace-only cells become empty
/// - runs of blank rows collapse to one, trailing blank rows are dropped
/// - output ends with exactly one newline (empty documents stay empty)
pub fn format_document(text: &str, delimiter: char) -> String {
    let grid = GridDocument::parse(text, delimiter);
    let mut out = String::new();
    let mut pending_blank = false;

    for row in grid.rows() {
        if is_blank_row(row) {
            pending_blank = !out.is_empty();
            continue;
        }
        if pending_blank {
            out.push('\n');
            pending_blank = false;
        }
        let line: Vec<&str> = row.iter().map(|c| c.raw_value.trim()).collect();
        out.push_str(&line.join(&delimiter.to_string()));
        out.push('\n');
    }

    out
}

/// Hex SHA-256 of a grid's text
///
/// Line endings are normalised by the grid, so `a\r\nb` and `a\nb\n` hash
/// identically.
pub fn content_hash(grid: &GridDocument) -> String {
    let mut hasher = Sha256::new();
    hasher.update(grid.to_text().as_bytes());
    format!("{:x}", hasher.finalize())
}
