//! Explorer Core - grid-based configuration language for data explorers
//!
//! An explorer document is tab-separated text declaring selectable
//! dimensions and a decision table that maps each combination of choices to
//! chart configuration. This crate parses such documents, resolves user
//! choices to exactly one table row, and keeps those choices stable in URL
//! query strings across versions.
//!
//! # Architecture
//!
//! ```text
//! Text → Grid → Parser (+ Grammar) → Program ─→ DecisionMatrix
//!                      ↓                              ↑ ChoiceState
//!                 Diagnostics        query ⇄ URL codec ⇄ MigrationRegistry
//! ```
//!
//! # Guarantees
//!
//! - **Fault-tolerant**: parsing never fails; problems are positioned diagnostics
//! - **Deterministic**: same document and query always resolve to the same row
//! - **Lossless**: no data row is dropped and no query parameter is lost
//! - **Versioned**: grammars and URL versions coexist; old links keep working

pub mod diagnostic;
pub mod error;
pub mod explorer;
pub mod grammar;
pub mod matrix;
pub mod migration;
pub mod normalizer;
pub mod parser;
pub mod url;

pub use diagnostic::{Diagnostic, DiagnosticKind, Diagnostics, Position, Severity};
pub use error::{Error, Result};
pub use explorer::{ConfigValue, Explorer, ExplorerStore, ResolvedConfig, View};
pub use grammar::{BlockType, ControlType, Grammar, GrammarSet, KeywordSpec, TypedValue, ValueType};
pub use matrix::{ChoiceControl, ChoiceOption, ChoiceState, DecisionMatrix, Fallback, FallbackOutcome, Resolution};
pub use migration::{FnMigration, Migration, MigrationRegistry, QueryParams, RenameParam, RewriteValue};
pub use parser::ast::{Block, ColumnDef, ColumnHeader, HeaderRole, Program, Row, Table};
pub use parser::grid::{Cell, GridDocument};
pub use parser::{parse, parse_program, ParseOptions};
