//! Explorer — a parsed Program and its DecisionMatrix, built and cached together
//!
//! [`Explorer`] is the unit callers hold on to: parse once, then resolve any
//! number of query strings against it. [`ExplorerStore`] keeps the current
//! Explorer per source id and swaps whole pairs on reload, so readers never
//! see a Program paired with another Program's matrix.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::diagnostic::Diagnostics;
use crate::grammar::{GrammarSet, TypedValue};
use crate::matrix::{ChoiceControl, ChoiceState, DecisionMatrix, FallbackOutcome};
use crate::migration::MigrationRegistry;
use crate::normalizer::content_hash;
use crate::parser::ast::{HeaderRole, Program};
use crate::parser::grid::GridDocument;
use crate::parser::{parse_program, ParseOptions};
use crate::url;

/// One value of a resolved configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Text(String),
    List(Vec<String>),
}

/// Config-block values overlaid by the chosen row's non-empty outputs
pub type ResolvedConfig = BTreeMap<String, ConfigValue>;

/// Everything needed to render one view of an explorer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct View {
    pub choices: ChoiceState,
    pub passthrough: Vec<(String, String)>,
    pub applied_migrations: Vec<String>,
    /// Index of the decision-table row shown, `None` for an empty table
    pub row: Option<usize>,
    pub outcome: Option<FallbackOutcome>,
    pub config: ResolvedConfig,
    pub controls: Vec<ChoiceControl>,
    /// Canonical re-encoding of the decoded query
    pub canonical_query: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Explorer {
    program: Program,
    matrix: DecisionMatrix,
}

impl Explorer {
    pub fn new(program: Program) -> Self {
        let matrix = DecisionMatrix::build(program.decision_table());
        Explorer { program, matrix }
    }

    pub fn parse(source_id: &str, text: &str, grammars: &GrammarSet, options: &ParseOptions) -> Self {
        let grid = GridDocument::parse(text, options.delimiter);
        Self::from_grid(source_id, &grid, grammars, options)
    }

    fn from_grid(source_id: &str, grid: &GridDocument, grammars: &GrammarSet, options: &ParseOptions) -> Self {
        let program = parse_program(source_id, grid, grammars, options);
        let mut matrix = DecisionMatrix::build(program.decision_table());
        if options.strict {
            matrix.promote_warnings();
        }
        Explorer { program, matrix }
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn matrix(&self) -> &DecisionMatrix {
        &self.matrix
    }

    pub fn dimension_names(&self) -> Vec<String> {
        self.matrix.dimension_names()
    }

    /// Parse diagnostics followed by decision-matrix diagnostics
    pub fn diagnostics(&self) -> Diagnostics {
        let mut all = self.program.parse_errors().clone();
        all.extend(self.matrix.diagnostics());
        all
    }

    pub fn is_valid(&self) -> bool {
        self.program.is_valid() && self.matrix.diagnostics().is_valid()
    }

    /// Decode, migrate and resolve a query string into a renderable view
    pub fn resolve_query(&self, query: &str, registry: &MigrationRegistry) -> View {
        let dimensions = self.dimension_names();
        let current = registry.current_version();
        let decoded = url::decode(query, registry, current, &dimensions);
        let fallback = self.matrix.resolve_with_fallback(&decoded.choices, None);

        debug!(
            source = self.program.source_id(),
            row = ?fallback.as_ref().map(|f| f.row),
            migrations = decoded.applied_migrations.len(),
            "resolved query"
        );

        let config = match &fallback {
            Some(f) => self.resolved_config(f.row),
            None => self.base_config(),
        };
        let canonical_query = url::encode(&decoded.choices, &decoded.passthrough, &dimensions, current);

        View {
            controls: self.matrix.controls(&decoded.choices),
            passthrough: decoded
                .passthrough
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            applied_migrations: decoded.applied_migrations,
            row: fallback.as_ref().map(|f| f.row),
            outcome: fallback.map(|f| f.outcome),
            config,
            canonical_query,
            choices: decoded.choices,
        }
    }

    /// Canonical form of a query string for this explorer
    pub fn canonical_query(&self, query: &str, registry: &MigrationRegistry) -> String {
        let dimensions = self.dimension_names();
        let current = registry.current_version();
        let decoded = url::decode(query, registry, current, &dimensions);
        url::encode(&decoded.choices, &decoded.passthrough, &dimensions, current)
    }

    /// Config values with the given row's outputs laid over them
    pub fn resolved_config(&self, row: usize) -> ResolvedConfig {
        let mut config = self.base_config();
        let table = self.program.decision_table();
        let Some(data) = table.rows.get(row) else {
            return config;
        };
        for (column, header) in table.outputs() {
            let value = data.value(column);
            if value.is_empty() {
                continue;
            }
            let value = match header.role {
                HeaderRole::Output { list: true, .. } => {
                    ConfigValue::List(value.split_whitespace().map(str::to_string).collect())
                }
                _ => ConfigValue::Text(value.to_string()),
            };
            config.insert(header.name().to_string(), value);
        }
        config
    }

    fn base_config(&self) -> ResolvedConfig {
        self.program
            .config_values()
            .iter()
            .map(|(key, value)| {
                let value = match value {
                    TypedValue::List(items) => ConfigValue::List(items.clone()),
                    other => ConfigValue::Text(other.to_strings().join(" ")),
                };
                (key.clone(), value)
            })
            .collect()
    }
}

// ── Store ──────────────────────────────────────────────────

/// Current Explorer per source id, swapped atomically on reload
#[derive(Debug, Default)]
pub struct ExplorerStore {
    grammars: GrammarSet,
    options: ParseOptions,
    explorers: RwLock<HashMap<String, Arc<Explorer>>>,
}

impl ExplorerStore {
    pub fn new(grammars: GrammarSet, options: ParseOptions) -> Self {
        ExplorerStore {
            grammars,
            options,
            explorers: RwLock::new(HashMap::new()),
        }
    }

    /// Parse `text` for `source_id` unless the cached Explorer already has
    /// the same content hash.
    pub fn load(&self, source_id: &str, text: &str) -> Arc<Explorer> {
        let grid = GridDocument::parse(text, self.options.delimiter);
        let hash = content_hash(&grid);

        if let Some(current) = self.get(source_id) {
            if current.program().content_hash() == hash {
                debug!(source = source_id, "explorer unchanged, keeping cached build");
                return current;
            }
        }

        let explorer = Arc::new(Explorer::from_grid(source_id, &grid, &self.grammars, &self.options));
        let mut explorers = self.explorers.write().unwrap_or_else(PoisonError::into_inner);
        explorers.insert(source_id.to_string(), Arc::clone(&explorer));
        info!(source = source_id, hash = %hash, valid = explorer.is_valid(), "loaded explorer");
        explorer
    }

    pub fn get(&self, source_id: &str) -> Option<Arc<Explorer>> {
        let explorers = self.explorers.read().unwrap_or_else(PoisonError::into_inner);
        explorers.get(source_id).cloned()
    }

    pub fn remove(&self, source_id: &str) -> Option<Arc<Explorer>> {
        let mut explorers = self.explorers.write().unwrap_or_else(PoisonError::into_inner);
        explorers.remove(source_id)
    }

    pub fn source_ids(&self) -> Vec<String> {
        let explorers = self.explorers.read().unwrap_or_else(PoisonError::into_inner);
        let mut ids: Vec<String> = explorers.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.explorers.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::Fallback;
    use crate::migration::RewriteValue;

    const COVID: &str = "explorerTitle\tCOVID\nexplorerSubtitle\tDaily data\nselection\tFRA\tESP\ngraphers\nmetric\tperCapita\tyVariableIds\ttitle\ndeaths\tfalse\t123\tDeaths\ndeaths\ttrue\t124 125\t\n";

    fn explorer(text: &str) -> Explorer {
        Explorer::parse("covid", text, &GrammarSet::standard(), &ParseOptions::default())
    }

    fn registry() -> MigrationRegistry {
        MigrationRegistry::builder(1)
            .register(RewriteValue {
                id: "per-capita-bool".into(),
                version: 2,
                key: "perCapita".into(),
                from: "1".into(),
                to: "true".into(),
            })
            .build()
            .unwrap()
    }

    #[test]
    fn test_resolved_config_overlays_outputs() {
        let e = explorer(COVID);
        let config = e.resolved_config(0);
        assert_eq!(config.get("explorerTitle"), Some(&ConfigValue::Text("COVID".into())));
        assert_eq!(config.get("title"), Some(&ConfigValue::Text("Deaths".into())));
        assert_eq!(
            config.get("selection"),
            Some(&ConfigValue::List(vec!["FRA".into(), "ESP".into()]))
        );
        assert_eq!(config.get("yVariableIds"), Some(&ConfigValue::List(vec!["123".into()])));

        let config = e.resolved_config(1);
        assert_eq!(
            config.get("yVariableIds"),
            Some(&ConfigValue::List(vec!["124".into(), "125".into()]))
        );
        // Empty outputs leave nothing behind
        assert!(config.get("title").is_none());
        assert!(config.get("metric").is_none());
    }

    #[test]
    fn test_strict_mode_promotes_matrix_warnings() {
        let text = "explorerTitle\tShares\ngraphers\nShare Checkbox\tyVariableIds\nyes\t1\nfalse\t2\n";
        let lenient = explorer(text);
        assert!(lenient.is_valid());
        assert_eq!(lenient.diagnostics().warnings().len(), 1);

        let strict_options = ParseOptions {
            strict: true,
            ..ParseOptions::default()
        };
        let strict = Explorer::parse("shares", text, &GrammarSet::standard(), &strict_options);
        assert!(!strict.is_valid());
        assert!(strict.diagnostics().warnings().is_empty());
        assert_eq!(strict.diagnostics().errors().len(), 1);
    }

    #[test]
    fn test_resolve_query_with_migration() {
        let e = explorer(COVID);
        let view = e.resolve_query("?metric=deaths&perCapita=1&time=2021", &registry());
        assert_eq!(view.row, Some(1));
        assert_eq!(view.outcome, Some(FallbackOutcome::Exact));
        assert_eq!(view.applied_migrations, vec!["per-capita-bool"]);
        assert_eq!(view.passthrough, vec![("time".to_string(), "2021".to_string())]);
        assert_eq!(view.canonical_query, "metric=deaths&perCapita=true&time=2021&v=2");
        assert_eq!(view.controls.len(), 2);
    }

    #[test]
    fn test_resolve_query_falls_back() {
        let e = explorer(COVID);
        let view = e.resolve_query("metric=cases", &MigrationRegistry::empty());
        assert_eq!(view.row, Some(0));
        assert_eq!(view.outcome, Some(FallbackOutcome::Default));
        assert_eq!(view.config.get("title"), Some(&ConfigValue::Text("Deaths".into())));
    }

    #[test]
    fn test_resolve_query_on_empty_table() {
        let e = explorer("explorerTitle\tEmpty\ngraphers\nmetric\n");
        let view = e.resolve_query("", &MigrationRegistry::empty());
        assert_eq!(view.row, None);
        assert_eq!(view.config.get("explorerTitle"), Some(&ConfigValue::Text("Empty".into())));
    }

    #[test]
    fn test_canonical_query_is_stable() {
        let e = explorer(COVID);
        let reg = registry();
        let once = e.canonical_query("perCapita=1&metric=deaths", &reg);
        assert_eq!(once, "metric=deaths&perCapita=true&v=2");
        assert_eq!(e.canonical_query(&once, &reg), once);
    }

    #[test]
    fn test_diagnostics_include_matrix() {
        let e = explorer("explorerTitle\tA\ngraphers\nx\ta\n");
        assert!(e.is_valid());
        let e = explorer("explorerTitle\tA\ngraphers\nx\ty\na\t1\na\t1\n");
        assert!(e.program().is_valid());
        assert!(!e.is_valid());
        assert_eq!(e.diagnostics().errors().len(), 1);
    }

    #[test]
    fn test_matrix_agrees_with_program() {
        let e = explorer(COVID);
        assert_eq!(e.dimension_names(), e.program().dimension_names());
        assert_eq!(
            e.matrix().resolve_with_fallback(&ChoiceState::new(), None),
            Some(Fallback {
                row: 1,
                outcome: FallbackOutcome::Exact
            })
        );
    }

    #[test]
    fn test_store_skips_unchanged_reload() {
        let store = ExplorerStore::default();
        let first = store.load("covid", COVID);
        let again = store.load("covid", &COVID.replace('\n', "\r\n"));
        assert!(Arc::ptr_eq(&first, &again));

        let edited = store.load("covid", &COVID.replace("COVID", "COVID-19"));
        assert!(!Arc::ptr_eq(&first, &edited));
        assert_eq!(store.get("covid").unwrap().program().title(), Some("COVID-19"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_store_keeps_sources_apart() {
        let store = ExplorerStore::new(GrammarSet::standard(), ParseOptions::default());
        store.load("b", COVID);
        store.load("a", "explorerTitle\tA\ngraphers\nx\n1\n");
        assert_eq!(store.source_ids(), vec!["a", "b"]);
        assert!(store.remove("b").is_some());
        assert!(store.get("b").is_none());
        assert!(!store.is_empty());
    }

    #[test]
    fn test_store_is_shareable_across_threads() {
        let store = Arc::new(ExplorerStore::default());
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    let e = store.load("covid", COVID);
                    e.resolve_query(&format!("metric=deaths&n={}", i), &MigrationRegistry::empty())
                        .row
                })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), Some(1));
        }
    }
}
