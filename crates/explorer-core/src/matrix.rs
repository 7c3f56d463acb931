//! Decision matrix — resolves a choice state to exactly one decision-table row
//!
//! Built once per [`Program`](crate::Program) from its decision table and
//! cached alongside it. Construction checks the table for duplicate
//! dimension combinations; resolution is a linear scan.
//!
//! # Guarantees
//!
//! - Deterministic: the same state always resolves to the same row
//! - Latest wins: among several matching rows the one declared last is chosen
//! - Total fallback: any non-empty table yields some row via
//!   [`DecisionMatrix::resolve_with_fallback`]

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::diagnostic::{DiagnosticKind, Diagnostics, Position};
use crate::grammar::ControlType;
use crate::parser::ast::Table;

// ── Choice state ───────────────────────────────────────────

/// Current dimension → value selections for one view
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChoiceState {
    choices: BTreeMap<String, String>,
}

impl ChoiceState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, dimension: &str) -> Option<&str> {
        self.choices.get(dimension).map(String::as_str)
    }

    /// Set a choice, returning the previous value
    pub fn set(&mut self, dimension: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.choices.insert(dimension.into(), value.into())
    }

    pub fn remove(&mut self, dimension: &str) -> Option<String> {
        self.choices.remove(dimension)
    }

    pub fn contains(&self, dimension: &str) -> bool {
        self.choices.contains_key(dimension)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.choices.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.choices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.choices.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ChoiceState {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        ChoiceState {
            choices: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

// ── Resolution results ─────────────────────────────────────

/// Outcome of an exact lookup. A miss is an ordinary value, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "row", rename_all = "lowercase")]
pub enum Resolution {
    Found(usize),
    NotFound,
}

impl Resolution {
    pub fn row(self) -> Option<usize> {
        match self {
            Resolution::Found(row) => Some(row),
            Resolution::NotFound => None,
        }
    }
}

/// Which step of the fallback ladder produced a row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "dimension", rename_all = "camelCase")]
pub enum FallbackOutcome {
    Exact,
    /// Matched after ignoring this dimension's choice
    DroppedDimension(String),
    /// Nothing matched; the first row is shown
    Default,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fallback {
    pub row: usize,
    pub outcome: FallbackOutcome,
}

/// One option of a picker control
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChoiceOption {
    pub value: String,
    /// False when no row is consistent with this value and the other choices
    pub available: bool,
}

/// Everything a picker needs to draw one dimension
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChoiceControl {
    pub name: String,
    pub control: ControlType,
    pub options: Vec<ChoiceOption>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected: Option<String>,
}

// ── Matrix ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimension {
    pub name: String,
    pub control: ControlType,
    /// Header index in the decision table
    pub column: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct DecisionRow {
    /// Dimension values in declared dimension order
    values: Vec<String>,
    shadowed: bool,
}

/// Precomputed index over a decision table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecisionMatrix {
    dimensions: Vec<Dimension>,
    rows: Vec<DecisionRow>,
    diagnostics: Diagnostics,
}

impl DecisionMatrix {
    /// Index a decision table. Never fails; problems land in [`diagnostics`](Self::diagnostics).
    pub fn build(table: &Table) -> Self {
        let mut diags = Diagnostics::new();

        let mut dimensions: Vec<Dimension> = Vec::new();
        for (column, header) in table.dimensions() {
            // Duplicate headers were reported by the parser; the first one is used
            if dimensions.iter().any(|d| d.name == header.name()) {
                continue;
            }
            dimensions.push(Dimension {
                name: header.name().to_string(),
                control: header.control().unwrap_or_default(),
                column,
            });
        }

        let mut rows: Vec<DecisionRow> = Vec::with_capacity(table.len());
        let mut seen: HashMap<Vec<String>, usize> = HashMap::new();

        for (position, row) in table.rows.iter().enumerate() {
            let values: Vec<String> = dimensions
                .iter()
                .map(|d| row.value(d.column).to_string())
                .collect();

            for (dim, value) in dimensions.iter().zip(&values) {
                if dim.control == ControlType::Checkbox
                    && !value.is_empty()
                    && value != "true"
                    && value != "false"
                {
                    diags.warning(
                        DiagnosticKind::Grammar,
                        format!(
                            "checkbox '{}' expects 'true' or 'false', found '{}'",
                            dim.name, value
                        ),
                        row.cells.get(dim.column).map(|c| c.position()),
                    );
                }
            }

            if let Some(earlier) = seen.insert(values.clone(), position) {
                rows[earlier].shadowed = true;
                let earlier_row = &table.rows[earlier];
                diags.error(
                    DiagnosticKind::Duplicate,
                    format!(
                        "row {} repeats the choices of row {}; row {} is ignored",
                        row.source_row + 1,
                        earlier_row.source_row + 1,
                        earlier_row.source_row + 1
                    ),
                    Some(Position::new(earlier_row.source_row, 0)),
                );
            }

            rows.push(DecisionRow {
                values,
                shadowed: false,
            });
        }

        debug!(
            dimensions = dimensions.len(),
            rows = rows.len(),
            shadowed = rows.iter().filter(|r| r.shadowed).count(),
            "built decision matrix"
        );

        DecisionMatrix {
            dimensions,
            rows,
            diagnostics: diags,
        }
    }

    /// Strict mode: checkbox warnings become fatal.
    pub(crate) fn promote_warnings(&mut self) {
        self.diagnostics.promote_warnings();
    }

    pub fn dimensions(&self) -> &[Dimension] {
        &self.dimensions
    }

    pub fn dimension_names(&self) -> Vec<String> {
        self.dimensions.iter().map(|d| d.name.clone()).collect()
    }

    pub fn dimension(&self, name: &str) -> Option<&Dimension> {
        self.dimensions.iter().find(|d| d.name == name)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// True when a later row with the same choices replaced this one
    pub fn is_shadowed(&self, row: usize) -> bool {
        self.rows.get(row).is_some_and(|r| r.shadowed)
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// Indices of dimensions constrained by the state, optionally excluding one
    fn constraints<'s>(&self, state: &'s ChoiceState, except: Option<&str>) -> Vec<(usize, &'s str)> {
        self.dimensions
            .iter()
            .enumerate()
            .filter(|(_, d)| Some(d.name.as_str()) != except)
            .filter_map(|(i, d)| state.get(&d.name).map(|v| (i, v)))
            .collect()
    }

    fn live_rows(&self) -> impl DoubleEndedIterator<Item = (usize, &DecisionRow)> {
        self.rows.iter().enumerate().filter(|(_, r)| !r.shadowed)
    }

    fn matches(row: &DecisionRow, constraints: &[(usize, &str)]) -> bool {
        constraints.iter().all(|(i, v)| row.values[*i] == *v)
    }

    /// Exact lookup. Dimensions absent from the state are unconstrained;
    /// keys that are not dimensions are ignored.
    pub fn resolve(&self, state: &ChoiceState) -> Resolution {
        let constraints = self.constraints(state, None);
        self.live_rows()
            .rev()
            .find(|(_, row)| Self::matches(row, &constraints))
            .map_or(Resolution::NotFound, |(index, _)| Resolution::Found(index))
    }

    /// Exact lookup, then one retry without the most recently changed
    /// dimension, then the first row. `None` only for an empty table.
    pub fn resolve_with_fallback(&self, state: &ChoiceState, last_changed: Option<&str>) -> Option<Fallback> {
        if let Resolution::Found(row) = self.resolve(state) {
            return Some(Fallback {
                row,
                outcome: FallbackOutcome::Exact,
            });
        }

        let dropped = last_changed
            .filter(|name| self.dimension(name).is_some() && state.contains(name))
            .map(str::to_string)
            .or_else(|| {
                self.dimensions
                    .iter()
                    .rev()
                    .find(|d| state.contains(&d.name))
                    .map(|d| d.name.clone())
            });

        if let Some(name) = dropped {
            let mut reduced = state.clone();
            reduced.remove(&name);
            if !self.constraints(&reduced, None).is_empty() {
                if let Resolution::Found(row) = self.resolve(&reduced) {
                    return Some(Fallback {
                        row,
                        outcome: FallbackOutcome::DroppedDimension(name),
                    });
                }
            }
        }

        self.live_rows().next().map(|(row, _)| Fallback {
            row,
            outcome: FallbackOutcome::Default,
        })
    }

    /// Distinct values of `dimension` among rows consistent with every
    /// other choice in the state, in first-seen order.
    pub fn available_values_for(&self, dimension: &str, state: &ChoiceState) -> Vec<String> {
        let Some(index) = self.dimensions.iter().position(|d| d.name == dimension) else {
            return Vec::new();
        };
        let constraints = self.constraints(state, Some(dimension));
        let mut values: Vec<String> = Vec::new();
        for (_, row) in self.live_rows() {
            let value = &row.values[index];
            if value.is_empty() || !Self::matches(row, &constraints) {
                continue;
            }
            if !values.contains(value) {
                values.push(value.clone());
            }
        }
        values
    }

    /// Picker model for every dimension, in declared order
    pub fn controls(&self, state: &ChoiceState) -> Vec<ChoiceControl> {
        self.dimensions
            .iter()
            .enumerate()
            .map(|(index, dim)| {
                let available = self.available_values_for(&dim.name, state);
                let mut options: Vec<ChoiceOption> = Vec::new();
                for (_, row) in self.live_rows() {
                    let value = &row.values[index];
                    if value.is_empty() || options.iter().any(|o| &o.value == value) {
                        continue;
                    }
                    options.push(ChoiceOption {
                        value: value.clone(),
                        available: available.contains(value),
                    });
                }
                ChoiceControl {
                    name: dim.name.clone(),
                    control: dim.control,
                    options,
                    selected: state.get(&dim.name).map(str::to_string),
                }
            })
            .collect()
    }
}
