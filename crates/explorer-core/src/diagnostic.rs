//! Positioned diagnostics shared by the parser and the decision matrix
//!
//! Nothing in the document pipeline throws. Every problem found while
//! reading a grid, applying the grammar, or building the decision matrix is
//! recorded here with the cell it came from, and parsing carries on.

use serde::{Deserialize, Serialize};

/// Cell position in a grid document (0-based, displayed 1-based)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Position {
    pub row: usize,
    pub col: usize,
}

impl Position {
    pub fn new(row: usize, col: usize) -> Self {
        Position { row, col }
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}:{}", self.row + 1, self.col + 1)
    }
}

/// Severity level for diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Makes the program invalid
    Error,
    Warning,
}

/// Category of document issue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticKind {
    /// Row/column shape problems; rows are padded or truncated, never dropped
    Grid,
    /// Unknown, misplaced, missing or mistyped keywords and values
    Grammar,
    /// Repeated config keys or repeated decision-row combinations
    Duplicate,
}

impl std::fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            DiagnosticKind::Grid => write!(f, "grid"),
            DiagnosticKind::Grammar => write!(f, "grammar"),
            DiagnosticKind::Duplicate => write!(f, "duplicate"),
        }
    }
}

/// A single positioned diagnostic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub kind: DiagnosticKind,
    pub message: String,
    pub position: Option<Position>,
}

impl Diagnostic {
    pub fn is_fatal(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let prefix = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        if let Some(ref position) = self.position {
            write!(f, "{} [{}] at {}: {}", prefix, self.kind, position, self.message)
        } else {
            write!(f, "{} [{}]: {}", prefix, self.kind, self.message)
        }
    }
}

/// Ordered accumulation of diagnostics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Diagnostics {
    items: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if no fatal diagnostics were recorded (warnings are OK)
    pub fn is_valid(&self) -> bool {
        !self.items.iter().any(Diagnostic::is_fatal)
    }

    pub fn all(&self) -> &[Diagnostic] {
        &self.items
    }

    pub fn errors(&self) -> Vec<&Diagnostic> {
        self.items.iter().filter(|d| d.is_fatal()).collect()
    }

    pub fn warnings(&self) -> Vec<&Diagnostic> {
        self.items.iter().filter(|d| !d.is_fatal()).collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub(crate) fn error(&mut self, kind: DiagnosticKind, message: String, position: Option<Position>) {
        self.items.push(Diagnostic {
            severity: Severity::Error,
            kind,
            message,
            position,
        });
    }

    pub(crate) fn warning(
        &mut self,
        kind: DiagnosticKind,
        message: String,
        position: Option<Position>,
    ) {
        self.items.push(Diagnostic {
            severity: Severity::Warning,
            kind,
            message,
            position,
        });
    }

    pub(crate) fn extend(&mut self, other: &Diagnostics) {
        self.items.extend(other.items.iter().cloned());
    }

    /// Strict mode: every warning becomes fatal.
    pub(crate) fn promote_warnings(&mut self) {
        for item in &mut self.items {
            item.severity = Severity::Error;
        }
    }
}

impl<'a> IntoIterator for &'a Diagnostics {
    type Item = &'a Diagnostic;
    type IntoIter = std::slice::Iter<'a, Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}
