//! Grid document — splits delimited text into a position-addressable cell matrix
//!
//! Rows are separated by `\n` (a trailing `\r` is stripped), fields by a
//! single delimiter character, tab by default. Rows may have any length.
//!
//! Guarantees:
//! - Never fails: any text yields a grid, possibly with empty cells
//! - Deterministic: unchanged text always produces identical cells at identical positions

use serde::{Deserialize, Serialize};

use crate::diagnostic::Position;

/// Field delimiter used by explorer documents
pub const DEFAULT_DELIMITER: char = '\t';

/// Prefix marking a comment row
pub const COMMENT_PREFIX: &str = "##";

/// A single cell with its stable position
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cell {
    pub row: usize,
    pub col: usize,
    pub raw_value: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parse_errors: Vec<String>,
}

impl Cell {
    pub fn new(row: usize, col: usize, raw_value: impl Into<String>) -> Self {
        Cell {
            row,
            col,
            raw_value: raw_value.into(),
            parse_errors: Vec::new(),
        }
    }

    pub fn position(&self) -> Position {
        Position::new(self.row, self.col)
    }

    pub fn value(&self) -> &str {
        &self.raw_value
    }

    pub fn is_empty(&self) -> bool {
        self.raw_value.trim().is_empty()
    }

    /// Copy of this cell carrying one more parse error
    pub fn with_error(&self, message: impl Into<String>) -> Self {
        let mut cell = self.clone();
        cell.parse_errors.push(message.into());
        cell
    }
}

/// Jagged matrix of cells parsed from delimited text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridDocument {
    delimiter: char,
    rows: Vec<Vec<Cell>>,
}

impl GridDocument {
    /// Parse text into a grid. Never fails.
    pub fn parse(text: &str, delimiter: char) -> Self {
        let body = text.strip_suffix('\n').unwrap_or(text);
        let rows = if text.is_empty() {
            Vec::new()
        } else {
            body.split('\n')
                .enumerate()
                .map(|(row, line)| {
                    let line = line.strip_suffix('\r').unwrap_or(line);
                    line.split(delimiter)
                        .enumerate()
                        .map(|(col, value)| Cell::new(row, col, value))
                        .collect()
                })
                .collect()
        };

        GridDocument { delimiter, rows }
    }

    pub fn delimiter(&self) -> char {
        self.delimiter
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    pub fn row(&self, index: usize) -> Option<&[Cell]> {
        self.rows.get(index).map(Vec::as_slice)
    }

    pub fn cell(&self, row: usize, col: usize) -> Option<&Cell> {
        self.rows.get(row).and_then(|r| r.get(col))
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// True when no row holds a non-blank cell
    pub fn is_blank(&self) -> bool {
        self.rows.iter().all(|row| is_blank_row(row))
    }

    /// Join the cells back into text, one line per row
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for row in &self.rows {
            for (i, cell) in row.iter().enumerate() {
                if i > 0 {
                    out.push(self.delimiter);
                }
                out.push_str(&cell.raw_value);
            }
            out.push('\n');
        }
        out
    }
}

/// A row with no non-whitespace content
pub fn is_blank_row(row: &[Cell]) -> bool {
    row.iter().all(Cell::is_empty)
}

/// A row whose first non-empty cell starts with `##`
pub fn is_comment_row(row: &[Cell]) -> bool {
    row.iter()
        .find(|c| !c.is_empty())
        .is_some_and(|c| c.raw_value.trim_start().starts_with(COMMENT_PREFIX))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(grid: &GridDocument) -> Vec<Vec<&str>> {
        grid.rows()
            .iter()
            .map(|r| r.iter().map(Cell::value).collect())
            .collect()
    }

    #[test]
    fn test_parse_rows_and_cells() {
        let grid = GridDocument::parse("a\tb\tc\nd\te", DEFAULT_DELIMITER);
        assert_eq!(values(&grid), vec![vec!["a", "b", "c"], vec!["d", "e"]]);
    }

    #[test]
    fn test_strips_carriage_returns() {
        let grid = GridDocument::parse("a\tb\r\nc\r\n", DEFAULT_DELIMITER);
        assert_eq!(values(&grid), vec![vec!["a", "b"], vec!["c"]]);
    }

    #[test]
    fn test_trailing_newline_adds_no_row() {
        let grid = GridDocument::parse("a\n", DEFAULT_DELIMITER);
        assert_eq!(grid.row_count(), 1);
    }

    #[test]
    fn test_empty_input() {
        let grid = GridDocument::parse("", DEFAULT_DELIMITER);
        assert_eq!(grid.row_count(), 0);
        assert!(grid.is_blank());
    }

    #[test]
    fn test_blank_lines_are_kept_as_rows() {
        let grid = GridDocument::parse("a\n\nb", DEFAULT_DELIMITER);
        assert_eq!(grid.row_count(), 3);
        assert!(is_blank_row(grid.row(1).unwrap()));
    }

    #[test]
    fn test_custom_delimiter() {
        let grid = GridDocument::parse("a,b\nc", ',');
        assert_eq!(values(&grid), vec![vec!["a", "b"], vec!["c"]]);
        assert_eq!(grid.to_text(), "a,b\nc\n");
    }

    #[test]
    fn test_cell_positions() {
        let grid = GridDocument::parse("x\ty\n\tz", DEFAULT_DELIMITER);
        let cell = grid.cell(1, 1).unwrap();
        assert_eq!(cell.value(), "z");
        assert_eq!(cell.position(), Position::new(1, 1));
        assert!(grid.cell(1, 5).is_none());
    }

    #[test]
    fn test_comment_rows() {
        let grid = GridDocument::parse("## note\n\t## indented\n#single", DEFAULT_DELIMITER);
        assert!(is_comment_row(grid.row(0).unwrap()));
        assert!(is_comment_row(grid.row(1).unwrap()));
        assert!(!is_comment_row(grid.row(2).unwrap()));
    }

    #[test]
    fn test_with_error_leaves_original_untouched() {
        let cell = Cell::new(0, 0, "maybe");
        let flagged = cell.with_error("expected true or false");
        assert!(cell.parse_errors.is_empty());
        assert_eq!(flagged.parse_errors, vec!["expected true or false".to_string()]);
    }

    #[test]
    fn test_reparse_determinism_100_iterations() {
        let input = "explorerTitle\tCO2\ngraphers\n\tMetric Dropdown\tyVariableIds\n\tCO2\t1\r\n";
        let first = GridDocument::parse(input, DEFAULT_DELIMITER);
        for i in 0..100 {
            let again = GridDocument::parse(input, DEFAULT_DELIMITER);
            assert_eq!(first, again, "Determinism failure at iteration {}", i);
        }
    }
}
