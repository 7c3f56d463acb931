//! Program parser — grid document + grammar → best-effort Program
//!
//! The parser never fails. It partitions the grid into blocks, applies the
//! grammar selected by the document's `schemaVersion`, and records every
//! problem as a positioned diagnostic next to the program it still returns.
//!
//! # Guarantees
//! - Deterministic: same grid and grammar always produce the same Program
//! - Complete: reports all problems, not just the first
//! - No-drop: every data row of a table block appears in the Program

pub mod ast;
pub mod grid;

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::debug;

use crate::diagnostic::{DiagnosticKind, Diagnostics, Position};
use crate::grammar::{
    BlockType, Cardinality, ControlType, Grammar, GrammarSet, TypedValue, ValueType,
    DIMENSIONS_KEYWORD, SCHEMA_VERSION_KEYWORD,
};
use crate::normalizer::content_hash;
use crate::url::VERSION_KEY;

use ast::{Block, ColumnDef, ColumnHeader, HeaderRole, Program, Row, Table};
use grid::{is_blank_row, is_comment_row, Cell, GridDocument, DEFAULT_DELIMITER};

/// Parser settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseOptions {
    pub delimiter: char,
    /// Promote every warning to a fatal error
    pub strict: bool,
}

impl Default for ParseOptions {
    fn default() -> Self {
        ParseOptions {
            delimiter: DEFAULT_DELIMITER,
            strict: false,
        }
    }
}

/// Parse explorer text into a Program
///
/// # Example
/// ```ignore
/// let program = parse("co2", text, &GrammarSet::standard(), &ParseOptions::default());
/// if !program.is_valid() { ... }
/// ```
pub fn parse(source_id: &str, text: &str, grammars: &GrammarSet, options: &ParseOptions) -> Program {
    let grid = GridDocument::parse(text, options.delimiter);
    parse_program(source_id, &grid, grammars, options)
}

impl Program {
    pub fn parse(source_id: &str, text: &str, grammars: &GrammarSet, options: &ParseOptions) -> Self {
        parse(source_id, text, grammars, options)
    }
}

/// Parse an already-split grid into a Program
pub fn parse_program(
    source_id: &str,
    grid: &GridDocument,
    grammars: &GrammarSet,
    options: &ParseOptions,
) -> Program {
    let mut diags = Diagnostics::new();
    let hash = content_hash(grid);

    if grid.is_blank() {
        diags.error(
            DiagnosticKind::Grid,
            "document has no content".to_string(),
            None,
        );
        if options.strict {
            diags.promote_warnings();
        }
        return Program {
            source_id: source_id.to_string(),
            schema_version: grammars.oldest().version(),
            content_hash: hash,
            blocks: Vec::new(),
            config_values: BTreeMap::new(),
            column_defs: Vec::new(),
            decision_table: Table::default(),
            parse_errors: diags,
        };
    }

    let (declared, declared_at) = declared_schema_version(grid, grammars);
    let selection = grammars.select(declared.as_deref());
    if let Some(problem) = selection.problem {
        diags.warning(DiagnosticKind::Grammar, problem, declared_at);
    }
    let grammar = selection.grammar;

    let blocks = split_blocks(grid, grammar, &mut diags);

    let mut state = ProgramBuilder::new(grammar);
    for block in &blocks {
        match block.block_type {
            BlockType::Config => state.read_config(grid, block, &mut diags),
            BlockType::Graphers | BlockType::Columns => state.read_table(grid, block, &mut diags),
        }
    }
    let decision_table = state.finish_decision_table(&mut diags);
    let column_defs = state.finish_column_defs(&mut diags);
    state.check_required(&mut diags);

    if options.strict {
        diags.promote_warnings();
    }

    debug!(
        source = source_id,
        schema_version = grammar.version(),
        blocks = blocks.len(),
        rows = decision_table.len(),
        diagnostics = diags.len(),
        "parsed explorer program"
    );

    Program {
        source_id: source_id.to_string(),
        schema_version: grammar.version(),
        content_hash: hash,
        blocks,
        config_values: state.config_values,
        column_defs,
        decision_table,
        parse_errors: diags,
    }
}

// ── Block partitioning ─────────────────────────────────────

fn first_value(row: &[Cell]) -> &str {
    row.first().map(|c| c.value().trim()).unwrap_or("")
}

fn is_skipped(row: &[Cell]) -> bool {
    is_blank_row(row) || is_comment_row(row)
}

/// Find `schemaVersion` among the rows that precede the first block keyword
/// known to any grammar.
fn declared_schema_version(
    grid: &GridDocument,
    grammars: &GrammarSet,
) -> (Option<String>, Option<Position>) {
    let any_block_start = |keyword: &str| {
        grammars
            .versions()
            .into_iter()
            .filter_map(|v| grammars.get(v))
            .any(|g| g.block_start(keyword).is_some())
    };
    for row in grid.rows() {
        let keyword = first_value(row);
        if any_block_start(keyword) {
            break;
        }
        if keyword == SCHEMA_VERSION_KEYWORD {
            let value = row.get(1);
            return (
                Some(value.map(|c| c.value().to_string()).unwrap_or_default()),
                Some(value.unwrap_or(&row[0]).position()),
            );
        }
    }
    (None, None)
}

fn split_blocks(grid: &GridDocument, grammar: &Grammar, diags: &mut Diagnostics) -> Vec<Block> {
    let mut blocks = Vec::new();
    let mut current = Block {
        block_type: BlockType::Config,
        start_row: 0,
        end_row: 0,
        implicit: true,
    };

    for (index, row) in grid.rows().iter().enumerate() {
        let Some(block_type) = grammar.block_start(first_value(row)) else {
            continue;
        };
        current.end_row = index;
        if !(current.implicit && current.start_row == current.end_row) {
            blocks.push(current);
        }
        if let Some(extra) = row.iter().skip(1).find(|c| !c.is_empty()) {
            diags.warning(
                DiagnosticKind::Grammar,
                format!(
                    "unexpected value '{}' after block keyword '{}'",
                    extra.value(),
                    first_value(row)
                ),
                Some(extra.position()),
            );
        }
        current = Block {
            block_type,
            start_row: index,
            end_row: index,
            implicit: false,
        };
    }

    current.end_row = grid.row_count();
    if !(current.implicit && current.start_row == current.end_row) {
        blocks.push(current);
    }
    blocks
}

// ── Program assembly ───────────────────────────────────────

/// A table block after header detection, before merging
struct RawTable {
    block_type: BlockType,
    header: Vec<Cell>,
    rows: Vec<(usize, Vec<Cell>)>,
}

struct ProgramBuilder<'g> {
    grammar: &'g Grammar,
    config_values: BTreeMap<String, TypedValue>,
    seen: HashMap<String, Position>,
    graphers: Option<RawTable>,
    columns: Option<RawTable>,
}

impl<'g> ProgramBuilder<'g> {
    fn new(grammar: &'g Grammar) -> Self {
        ProgramBuilder {
            grammar,
            config_values: BTreeMap::new(),
            seen: HashMap::new(),
            graphers: None,
            columns: None,
        }
    }

    // ── Config block ───────────────────────────────────────

    fn read_config(&mut self, grid: &GridDocument, block: &Block, diags: &mut Diagnostics) {
        for row in &grid.rows()[block.start_row..block.end_row] {
            if is_skipped(row) {
                continue;
            }
            let key_cell = &row[0];
            if key_cell.is_empty() {
                let cell = row.iter().find(|c| !c.is_empty()).unwrap_or(key_cell);
                diags.warning(
                    DiagnosticKind::Grid,
                    "indented row outside a table block is ignored".to_string(),
                    Some(cell.position()),
                );
                continue;
            }

            let keyword = key_cell.value().trim();
            let Some(spec) = self.grammar.lookup(keyword, BlockType::Config) else {
                diags.warning(
                    DiagnosticKind::Grammar,
                    format!("unknown keyword '{}'", keyword),
                    Some(key_cell.position()),
                );
                continue;
            };

            if let Some(first) = self.seen.get(keyword) {
                diags.warning(
                    DiagnosticKind::Duplicate,
                    format!("duplicate keyword '{}' (first declared at {})", keyword, first),
                    Some(key_cell.position()),
                );
                continue;
            }
            self.seen.insert(keyword.to_string(), key_cell.position());

            let value_cells: Vec<&Cell> = row[1..].iter().filter(|c| !c.is_empty()).collect();
            if spec.cardinality == Cardinality::Single && value_cells.len() > 1 {
                diags.warning(
                    DiagnosticKind::Grammar,
                    format!("'{}' takes one value; extra values ignored", keyword),
                    Some(value_cells[1].position()),
                );
            }
            let values: Vec<&str> = value_cells.iter().map(|c| c.value()).collect();
            match spec.parse(&values) {
                Ok(value) => {
                    self.config_values.insert(keyword.to_string(), value);
                }
                Err(message) => {
                    let at = value_cells.first().map_or(key_cell.position(), |c| c.position());
                    diags.warning(
                        DiagnosticKind::Grammar,
                        format!("invalid value for '{}': {}", keyword, message),
                        Some(at),
                    );
                }
            }
        }
    }

    // ── Table blocks ───────────────────────────────────────

    fn read_table(&mut self, grid: &GridDocument, block: &Block, diags: &mut Diagnostics) {
        let keyword_row = block.start_row;
        self.seen
            .entry(block.block_type.to_string())
            .or_insert(Position::new(keyword_row, 0));

        let mut lines = (keyword_row + 1..block.end_row)
            .filter_map(|i| grid.row(i).map(|r| (i, r)))
            .filter(|(_, r)| !is_skipped(r));

        let Some((_, header_cells)) = lines.next() else {
            diags.warning(
                DiagnosticKind::Grid,
                format!("'{}' block has no header row", block.block_type),
                Some(Position::new(keyword_row, 0)),
            );
            return;
        };

        let indented = header_cells.len() > 1 && header_cells[0].is_empty();
        let strip = usize::from(indented);
        let mut header: Vec<Cell> = header_cells[strip..].to_vec();
        while header.last().is_some_and(Cell::is_empty) {
            header.pop();
        }

        let mut rows = Vec::new();
        for (index, cells) in lines {
            let data = if indented && !cells[0].is_empty() {
                diags.warning(
                    DiagnosticKind::Grid,
                    "row is not indented like its header".to_string(),
                    Some(cells[0].position()),
                );
                cells.to_vec()
            } else {
                cells[strip..].to_vec()
            };
            rows.push((index, fit_row(data, index, strip, &header, diags)));
        }

        let incoming = RawTable {
            block_type: block.block_type,
            header,
            rows,
        };
        let slot = match block.block_type {
            BlockType::Graphers => &mut self.graphers,
            _ => &mut self.columns,
        };
        if let Some(existing) = slot {
            append_table(existing, incoming, diags);
        } else {
            *slot = Some(incoming);
        }
    }

    fn finish_decision_table(&mut self, diags: &mut Diagnostics) -> Table {
        let Some(raw) = self.graphers.take() else {
            return Table::default();
        };

        let explicit: Option<Vec<String>> = self
            .config_values
            .get(DIMENSIONS_KEYWORD)
            .and_then(TypedValue::as_list)
            .map(<[String]>::to_vec);

        let mut names = BTreeSet::new();
        let mut header = Vec::with_capacity(raw.header.len());
        for cell in &raw.header {
            let column = classify_header(self.grammar, cell, explicit.as_deref());
            if cell.is_empty() {
                diags.warning(
                    DiagnosticKind::Grid,
                    "empty column header".to_string(),
                    Some(cell.position()),
                );
            } else if !names.insert(column.name().to_string()) {
                diags.warning(
                    DiagnosticKind::Duplicate,
                    format!("duplicate column '{}'; the first one is used", column.name()),
                    Some(cell.position()),
                );
            }
            if column.is_dimension() && column.name() == VERSION_KEY {
                diags.warning(
                    DiagnosticKind::Grammar,
                    format!("dimension '{}' collides with the reserved query key", VERSION_KEY),
                    Some(cell.position()),
                );
            }
            header.push(column);
        }

        if let Some(explicit) = &explicit {
            for name in explicit {
                if !header.iter().any(|h| h.is_dimension() && h.name() == name) {
                    diags.warning(
                        DiagnosticKind::Grammar,
                        format!("dimension '{}' is not a column of the decision table", name),
                        None,
                    );
                }
            }
        }

        let rows = raw
            .rows
            .into_iter()
            .enumerate()
            .map(|(index, (source_row, cells))| {
                let cells = cells
                    .into_iter()
                    .zip(&header)
                    .map(|(cell, column)| self.type_output_cell(cell, column, diags))
                    .collect();
                Row {
                    index,
                    source_row,
                    cells,
                }
            })
            .collect();

        Table { header, rows }
    }

    fn type_output_cell(&self, cell: Cell, column: &ColumnHeader, diags: &mut Diagnostics) -> Cell {
        let HeaderRole::Output { keyword, .. } = &column.role else {
            return cell;
        };
        if cell.is_empty() {
            return cell;
        }
        let Some(spec) = self.grammar.lookup(keyword, BlockType::Graphers) else {
            return cell;
        };
        match spec.value_type.parse_cell(cell.value()) {
            Ok(_) => cell,
            Err(message) => {
                diags.warning(
                    DiagnosticKind::Grammar,
                    format!("invalid value for '{}': {}", keyword, message),
                    Some(cell.position()),
                );
                cell.with_error(message)
            }
        }
    }

    fn finish_column_defs(&mut self, diags: &mut Diagnostics) -> Vec<ColumnDef> {
        let Some(raw) = self.columns.take() else {
            return Vec::new();
        };

        let mut keywords = Vec::with_capacity(raw.header.len());
        for cell in &raw.header {
            let keyword = cell.value();
            if self.grammar.lookup(keyword, BlockType::Columns).is_none() {
                diags.warning(
                    DiagnosticKind::Grammar,
                    format!("unknown column keyword '{}'", keyword),
                    Some(cell.position()),
                );
            }
            keywords.push(keyword.to_string());
        }

        for spec in self.grammar.keywords_in(BlockType::Columns).filter(|s| s.required) {
            if !keywords.iter().any(|k| k == spec.keyword) {
                diags.error(
                    DiagnosticKind::Grammar,
                    format!("columns block is missing required column '{}'", spec.keyword),
                    raw.header.first().map(Cell::position),
                );
            }
        }

        let mut defs = Vec::with_capacity(raw.rows.len());
        for (source_row, cells) in raw.rows {
            let mut def = ColumnDef {
                source_row,
                ..ColumnDef::default()
            };
            for (keyword, cell) in keywords.iter().zip(&cells) {
                if cell.is_empty() {
                    continue;
                }
                let value_type = self
                    .grammar
                    .lookup(keyword, BlockType::Columns)
                    .map_or(ValueType::Text, |spec| spec.value_type);
                match value_type.parse_cell(cell.value()) {
                    Ok(value) => def.set(keyword, &value),
                    Err(message) => diags.warning(
                        DiagnosticKind::Grammar,
                        format!("invalid value for column '{}': {}", keyword, message),
                        Some(cell.position()),
                    ),
                }
            }
            if def.slug.is_empty() && keywords.iter().any(|k| k == "slug") {
                diags.warning(
                    DiagnosticKind::Grammar,
                    "column definition has no slug".to_string(),
                    cells.first().map(Cell::position),
                );
            }
            defs.push(def);
        }
        defs
    }

    fn check_required(&self, diags: &mut Diagnostics) {
        for spec in self.grammar.required() {
            if !self.seen.contains_key(spec.keyword) {
                diags.error(
                    DiagnosticKind::Grammar,
                    format!("missing required keyword '{}'", spec.keyword),
                    None,
                );
            }
        }
    }
}

/// Pad or truncate a data row to the header width, recording the change
fn fit_row(
    mut cells: Vec<Cell>,
    row: usize,
    strip: usize,
    header: &[Cell],
    diags: &mut Diagnostics,
) -> Vec<Cell> {
    let width = header.len();
    let found = cells.len();
    if found < width {
        diags.warning(
            DiagnosticKind::Grid,
            format!("row has {} values, expected {}; padded with empty values", found, width),
            Some(Position::new(row, strip + found)),
        );
        for col in found..width {
            cells.push(Cell::new(row, strip + col, ""));
        }
    } else if found > width {
        let extra = cells[width..].iter().find(|c| !c.is_empty()).map(Cell::position);
        if let Some(at) = extra {
            diags.warning(
                DiagnosticKind::Grid,
                format!("row has {} values, expected {}; extra values ignored", found, width),
                Some(at),
            );
        }
        cells.truncate(width);
    }
    cells
}

/// Fold a repeated table block into the first one of its type
fn append_table(existing: &mut RawTable, incoming: RawTable, diags: &mut Diagnostics) {
    let same_header = existing.header.len() == incoming.header.len()
        && existing
            .header
            .iter()
            .zip(&incoming.header)
            .all(|(a, b)| a.value() == b.value());

    if same_header {
        existing.rows.extend(incoming.rows);
        return;
    }

    diags.warning(
        DiagnosticKind::Grid,
        format!(
            "header differs from the first '{}' block; rows are matched by column name",
            existing.block_type
        ),
        incoming.header.first().map(Cell::position),
    );
    for (source_row, cells) in incoming.rows {
        let mapped = existing
            .header
            .iter()
            .enumerate()
            .map(|(col, column)| {
                incoming
                    .header
                    .iter()
                    .position(|h| h.value() == column.value())
                    .and_then(|i| cells.get(i).cloned())
                    .unwrap_or_else(|| Cell::new(source_row, col, ""))
            })
            .collect();
        existing.rows.push((source_row, mapped));
    }
}

/// Decide whether a decision-table header is a dimension or an output field
fn classify_header(grammar: &Grammar, cell: &Cell, explicit: Option<&[String]>) -> ColumnHeader {
    let raw = cell.value().trim();
    let suffixed = ControlType::split_header(raw);
    let dimension = |name: &str, control: ControlType| HeaderRole::Dimension {
        name: name.to_string(),
        control,
    };
    let output = |keyword: &str| HeaderRole::Output {
        keyword: keyword.to_string(),
        list: grammar
            .lookup(keyword, BlockType::Graphers)
            .is_some_and(|spec| spec.value_type == ValueType::List),
    };

    let role = match explicit {
        Some(names) => {
            let listed = |name: &str| names.iter().any(|n| n == name);
            match suffixed {
                Some((name, control)) if listed(name) || listed(raw) => dimension(name, control),
                _ if listed(raw) => dimension(raw, ControlType::Dropdown),
                _ => output(raw),
            }
        }
        None => match suffixed {
            Some((name, control)) => dimension(name, control),
            None if grammar.lookup(raw, BlockType::Graphers).is_some() => output(raw),
            None => dimension(raw, ControlType::Dropdown),
        },
    };

    ColumnHeader {
        raw: raw.to_string(),
        position: cell.position(),
        role,
    }
}
