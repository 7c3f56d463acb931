//! Property-based tests for the explorer pipeline
//!
//! - query strings round-trip through encode/decode
//! - migrating twice is the same as migrating once, whatever the registration order
//! - resolution is deterministic and picks the latest matching row
//! - table blocks never lose data rows
//! - formatting is idempotent
//! - each missing required keyword is reported exactly once

use explorer_core::{
    url, ChoiceState, DecisionMatrix, GrammarSet, MigrationRegistry, ParseOptions, Program,
    QueryParams, RenameParam, Resolution, RewriteValue,
};
use explorer_core::normalizer::format_document;
use proptest::prelude::*;

const DIMENSIONS: [&str; 3] = ["metric", "perCapita", "region"];

fn dimensions() -> Vec<String> {
    DIMENSIONS.iter().map(|s| s.to_string()).collect()
}

fn parse(text: &str) -> Program {
    Program::parse("prop", text, &GrammarSet::standard(), &ParseOptions::default())
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
        // Registered after the rewrite it feeds
        .register(RenameParam {
            id: "per-capita-snake".into(),
            version: 2,
            from: "per_capita".into(),
            to: "perCapita".into(),
        })
        .register(RenameParam {
            id: "country-to-region".into(),
            version: 3,
            from: "country".into(),
            to: "region".into(),
        })
        .build()
        .expect("registry builds")
}

/// Choices for a subset of the fixed dimensions, any printable value
fn choices_strategy() -> impl Strategy<Value = ChoiceState> {
    prop::collection::vec(prop::option::of("\\PC{0,12}"), DIMENSIONS.len()).prop_map(|values| {
        DIMENSIONS
            .iter()
            .zip(values)
            .filter_map(|(name, value)| value.map(|v| (name.to_string(), v)))
            .collect()
    })
}

/// Passthrough pairs whose keys are neither dimensions nor the version key
fn passthrough_strategy() -> impl Strategy<Value = QueryParams> {
    prop::collection::vec(("[a-z]{1,6}", "\\PC{0,12}"), 0..5).prop_map(|pairs| {
        pairs
            .into_iter()
            .filter(|(k, _)| k != url::VERSION_KEY && !DIMENSIONS.contains(&k.as_str()))
            .collect()
    })
}

fn legacy_params_strategy() -> impl Strategy<Value = QueryParams> {
    let key = prop::sample::select(vec!["perCapita", "per_capita", "country", "region", "metric", "time"]);
    let value = prop::sample::select(vec!["1", "true", "FRA", "x", ""]);
    prop::collection::vec((key, value), 0..6).prop_map(|pairs| pairs.into_iter().collect())
}

/// Decision-table rows over a small alphabet so matches and duplicates occur
fn table_rows_strategy() -> impl Strategy<Value = Vec<(String, String)>> {
    let value = prop::sample::select(vec!["a", "b", "c"]);
    prop::collection::vec((value.clone(), value), 1..12)
        .prop_map(|rows| rows.into_iter().map(|(x, y)| (x.to_string(), y.to_string())).collect())
}

fn state_strategy() -> impl Strategy<Value = ChoiceState> {
    let value = prop::sample::select(vec!["a", "b", "c", "z"]);
    (prop::option::of(value.clone()), prop::option::of(value)).prop_map(|(x, y)| {
        let mut state = ChoiceState::new();
        if let Some(x) = x {
            state.set("x", x);
        }
        if let Some(y) = y {
            state.set("y", y);
        }
        state
    })
}

proptest! {
    #[test]
    fn prop_query_round_trip(choices in choices_strategy(), passthrough in passthrough_strategy()) {
        let registry = registry();
        let current = registry.current_version();
        let dims = dimensions();
        let encoded = url::encode(&choices, &passthrough, &dims, current);
        let decoded = url::decode(&encoded, &registry, current, &dims);
        prop_assert_eq!(&decoded.choices, &choices);
        prop_assert_eq!(&decoded.passthrough, &passthrough);
        prop_assert!(decoded.applied_migrations.is_empty());

        // Canonical: re-encoding the decoded query is byte-identical
        let again = url::encode(&decoded.choices, &decoded.passthrough, &dims, current);
        prop_assert_eq!(again, encoded);
    }

    #[test]
    fn prop_migration_idempotent(params in legacy_params_strategy()) {
        let registry = registry();
        let current = registry.current_version();
        let once = registry.migrate(params, 1, current);
        let twice = registry.migrate(once.params.clone(), 1, current);
        prop_assert_eq!(&once.params, &twice.params);
        prop_assert!(twice.applied.is_empty());
        prop_assert!(!once.params.contains("per_capita"));
        prop_assert!(once.params.iter().all(|(k, v)| k != "perCapita" || v != "1"));
    }

    #[test]
    fn prop_resolve_deterministic_and_latest(rows in table_rows_strategy(), state in state_strategy()) {
        let mut text = String::from("explorerTitle\tP\ngraphers\nx\ty\ttitle\n");
        for (i, (x, y)) in rows.iter().enumerate() {
            text.push_str(&format!("{}\t{}\trow {}\n", x, y, i));
        }
        let program = parse(&text);
        prop_assert_eq!(program.decision_table().len(), rows.len());

        let matrix = DecisionMatrix::build(program.decision_table());
        let first = matrix.resolve(&state);
        for _ in 0..10 {
            prop_assert_eq!(matrix.resolve(&state), first);
        }

        let matches = |i: usize| {
            let (x, y) = &rows[i];
            state.get("x").map_or(true, |v| v == x) && state.get("y").map_or(true, |v| v == y)
        };
        match first {
            Resolution::Found(row) => {
                prop_assert!(matches(row));
                prop_assert!(!matrix.is_shadowed(row));
                prop_assert!((row + 1..rows.len()).all(|later| !matches(later)));
            }
            Resolution::NotFound => prop_assert!((0..rows.len()).all(|i| !matches(i))),
        }

        let fallback = matrix.resolve_with_fallback(&state, None);
        prop_assert!(fallback.is_some());
    }

    #[test]
    fn prop_no_row_dropped(rows in prop::collection::vec(prop::collection::vec("[a-z0-9]{1,5}", 1..6), 0..20)) {
        let mut text = String::from("explorerTitle\tP\ngraphers\na\tb\tc\n");
        for row in &rows {
            text.push_str(&row.join("\t"));
            text.push('\n');
        }
        let program = parse(&text);
        let table = program.decision_table();
        prop_assert_eq!(table.len(), rows.len());
        prop_assert!(table.rows.iter().all(|r| r.cells.len() == 3));
    }

    #[test]
    fn prop_format_idempotent(text in "[a-z \t\r\n#]{0,60}") {
        let once = format_document(&text, '\t');
        prop_assert_eq!(format_document(&once, '\t'), once);
    }

    #[test]
    fn prop_missing_required_reported_once(has_title in any::<bool>(), has_graphers in any::<bool>(), repeats in 1usize..3) {
        let mut text = String::from("explorerSubtitle\tS\n");
        if has_title {
            text.push_str("explorerTitle\tT\n");
        }
        if has_graphers {
            for _ in 0..repeats {
                text.push_str("graphers\nx\n1\n");
            }
        }
        let program = parse(&text);
        let errors = program.parse_errors().errors();
        let expected = usize::from(!has_title) + usize::from(!has_graphers);
        prop_assert_eq!(errors.len(), expected);
        if !has_title {
            prop_assert_eq!(errors.iter().filter(|e| e.message.contains("'explorerTitle'")).count(), 1);
        }
        if !has_graphers {
            prop_assert_eq!(errors.iter().filter(|e| e.message.contains("'graphers'")).count(), 1);
        }
    }
}
