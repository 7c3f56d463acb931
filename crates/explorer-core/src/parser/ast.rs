//! Program types — the structured result of parsing an explorer document
//!
//! A [`Program`] is immutable after construction. Any edit to the source
//! text produces a new `Program`; nothing here is patched in place.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::diagnostic::{Diagnostics, Position};
use crate::grammar::{BlockType, ControlType, TypedValue};
use crate::parser::grid::Cell;

/// A contiguous vertical region of the document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub block_type: BlockType,
    /// First document row of the block (the keyword row for table blocks)
    pub start_row: usize,
    /// One past the last document row of the block
    pub end_row: usize,
    /// True for the config rows that precede any block keyword
    pub implicit: bool,
}

/// Whether a decision-table column narrows rows or carries output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum HeaderRole {
    Dimension { name: String, control: ControlType },
    Output { keyword: String, list: bool },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnHeader {
    pub raw: String,
    pub position: Position,
    #[serde(flatten)]
    pub role: HeaderRole,
}

impl ColumnHeader {
    /// Dimension name (suffix stripped) or output keyword
    pub fn name(&self) -> &str {
        match &self.role {
            HeaderRole::Dimension { name, .. } => name,
            HeaderRole::Output { keyword, .. } => keyword,
        }
    }

    pub fn is_dimension(&self) -> bool {
        matches!(self.role, HeaderRole::Dimension { .. })
    }

    pub fn control(&self) -> Option<ControlType> {
        match self.role {
            HeaderRole::Dimension { control, .. } => Some(control),
            HeaderRole::Output { .. } => None,
        }
    }
}

/// One data row of a table, always exactly as wide as the header
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Row {
    /// 0-based index among the table's data rows
    pub index: usize,
    /// Document row the data came from
    pub source_row: usize,
    pub cells: Vec<Cell>,
}

impl Row {
    pub fn value(&self, col: usize) -> &str {
        self.cells.get(col).map(|c| c.raw_value.trim()).unwrap_or("")
    }

    pub fn has_errors(&self) -> bool {
        self.cells.iter().any(|c| !c.parse_errors.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub header: Vec<ColumnHeader>,
    pub rows: Vec<Row>,
}

impl Table {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Header index of the first column with this dimension name or keyword
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.header.iter().position(|h| h.name() == name)
    }

    /// `(column index, header)` of every dimension, in declared order
    pub fn dimensions(&self) -> impl Iterator<Item = (usize, &ColumnHeader)> {
        self.header.iter().enumerate().filter(|(_, h)| h.is_dimension())
    }

    pub fn outputs(&self) -> impl Iterator<Item = (usize, &ColumnHeader)> {
        self.header.iter().enumerate().filter(|(_, h)| !h.is_dimension())
    }

    pub fn dimension_names(&self) -> Vec<String> {
        self.dimensions().map(|(_, h)| h.name().to_string()).collect()
    }
}

/// One row of a `columns` block
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnDef {
    pub slug: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub column_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub short_unit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_link: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tolerance: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transform: Option<String>,
    /// Headers the grammar does not know, kept verbatim
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
    pub source_row: usize,
}

impl ColumnDef {
    pub(crate) fn set(&mut self, keyword: &str, value: &TypedValue) {
        let text = value.to_strings().join(" ");
        match keyword {
            "slug" => self.slug = text,
            "name" => self.name = Some(text),
            "type" => self.column_type = Some(text),
            "unit" => self.unit = Some(text),
            "shortUnit" => self.short_unit = Some(text),
            "description" => self.description = Some(text),
            "sourceName" => self.source_name = Some(text),
            "sourceLink" => self.source_link = Some(text),
            "color" => self.color = Some(text),
            "tolerance" => {
                if let TypedValue::Integer(n) = value {
                    self.tolerance = Some(*n);
                }
            }
            "transform" => self.transform = Some(text),
            other => {
                self.extra.insert(other.to_string(), text);
            }
        }
    }
}

/// A parsed explorer document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Program {
    pub(crate) source_id: String,
    pub(crate) schema_version: u32,
    pub(crate) content_hash: String,
    pub(crate) blocks: Vec<Block>,
    pub(crate) config_values: BTreeMap<String, TypedValue>,
    pub(crate) column_defs: Vec<ColumnDef>,
    pub(crate) decision_table: Table,
    pub(crate) parse_errors: Diagnostics,
}

impl Program {
    /// True when no fatal errors were recorded
    pub fn is_valid(&self) -> bool {
        self.parse_errors.is_valid()
    }

    pub fn parse_errors(&self) -> &Diagnostics {
        &self.parse_errors
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    /// Version of the grammar the document was parsed with
    pub fn schema_version(&self) -> u32 {
        self.schema_version
    }

    /// Hex SHA-256 of the grid's canonical text
    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn config_values(&self) -> &BTreeMap<String, TypedValue> {
        &self.config_values
    }

    pub fn config_value(&self, keyword: &str) -> Option<&TypedValue> {
        self.config_values.get(keyword)
    }

    pub fn title(&self) -> Option<&str> {
        self.config_value("explorerTitle").and_then(TypedValue::as_text)
    }

    pub fn column_defs(&self) -> &[ColumnDef] {
        &self.column_defs
    }

    pub fn column_def(&self, slug: &str) -> Option<&ColumnDef> {
        self.column_defs.iter().find(|c| c.slug == slug)
    }

    pub fn decision_table(&self) -> &Table {
        &self.decision_table
    }

    pub fn dimension_names(&self) -> Vec<String> {
        self.decision_table.dimension_names()
    }
}
