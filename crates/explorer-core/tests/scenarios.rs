//! End-to-end scenarios through the public API

use explorer_core::{
    ChoiceState, DecisionMatrix, DiagnosticKind, Explorer, FallbackOutcome, GrammarSet,
    MigrationRegistry, ParseOptions, Position, Program, Resolution, RewriteValue, Severity,
};

const COVID: &str = "explorerTitle\tCOVID\ngraphers\nmetric\tperCapita\tyVariableIds\ndeaths\tfalse\t123\ndeaths\ttrue\t124\n";

fn parse(text: &str) -> Program {
    Program::parse("scenario", text, &GrammarSet::standard(), &ParseOptions::default())
}

fn state(pairs: &[(&str, &str)]) -> ChoiceState {
    pairs.iter().copied().collect()
}

#[test]
fn scenario_exact_resolution() {
    let program = parse(COVID);
    assert!(program.is_valid());
    let matrix = DecisionMatrix::build(program.decision_table());

    let resolution = matrix.resolve(&state(&[("metric", "deaths"), ("perCapita", "true")]));
    assert_eq!(resolution, Resolution::Found(1));

    let row = &program.decision_table().rows[1];
    let column = program.decision_table().column_index("yVariableIds").unwrap();
    assert_eq!(row.value(column), "124");
}

#[test]
fn scenario_miss_then_default_row() {
    let program = parse(COVID);
    let matrix = DecisionMatrix::build(program.decision_table());
    let cases = state(&[("metric", "cases")]);

    assert_eq!(matrix.resolve(&cases), Resolution::NotFound);
    let fallback = matrix.resolve_with_fallback(&cases, Some("metric")).unwrap();
    assert_eq!(fallback.row, 0);
    assert_eq!(fallback.outcome, FallbackOutcome::Default);
}

#[test]
fn scenario_legacy_url_is_migrated() {
    let registry = MigrationRegistry::builder(1)
        .register(RewriteValue {
            id: "per-capita-bool".into(),
            version: 2,
            key: "perCapita".into(),
            from: "1".into(),
            to: "true".into(),
        })
        .build()
        .unwrap();
    let dims = vec!["metric".to_string(), "perCapita".to_string()];

    let decoded = explorer_core::url::decode("?perCapita=1", &registry, 2, &dims);
    assert_eq!(decoded.choices, state(&[("perCapita", "true")]));
}

#[test]
fn scenario_duplicate_title_keeps_first() {
    let program = parse("explorerTitle\tFirst\nexplorerTitle\tSecond\ngraphers\nx\n1\n");
    assert_eq!(program.title(), Some("First"));

    let duplicates: Vec<_> = program
        .parse_errors()
        .all()
        .iter()
        .filter(|d| d.kind == DiagnosticKind::Duplicate)
        .collect();
    assert_eq!(duplicates.len(), 1);
    assert_eq!(duplicates[0].position, Some(Position::new(1, 0)));
}

#[test]
fn scenario_short_row_is_padded() {
    let program = parse("explorerTitle\tA\ngraphers\nh1\th2\th3\nval1\tval2\n");
    let table = program.decision_table();
    assert_eq!(table.len(), 1);
    let values: Vec<&str> = (0..3).map(|c| table.rows[0].value(c)).collect();
    assert_eq!(values, vec!["val1", "val2", ""]);

    let grid_errors: Vec<_> = program
        .parse_errors()
        .all()
        .iter()
        .filter(|d| d.kind == DiagnosticKind::Grid)
        .collect();
    assert_eq!(grid_errors.len(), 1);
    assert_eq!(grid_errors[0].severity, Severity::Warning);
}

#[test]
fn fixture_explorer_resolves_end_to_end() {
    let text = include_str!("../../../tests/fixtures/explorers/valid/co2.explorer.tsv");
    let migrations = include_str!("../../../tests/fixtures/migrations/co2.migrations.tsv");
    let registry = MigrationRegistry::from_grid(migrations).unwrap();
    let explorer = Explorer::parse("co2", text, &GrammarSet::standard(), &ParseOptions::default());
    assert!(explorer.is_valid(), "{:?}", explorer.diagnostics());

    let view = explorer.resolve_query("?gas=co2&perCapita=1&country=FRA~DEU", &registry);
    assert_eq!(view.outcome, Some(FallbackOutcome::Exact));
    assert_eq!(view.choices.get("Per capita"), Some("true"));
    assert_eq!(view.choices.get("Gas"), Some("CO₂"));
    assert_eq!(
        view.canonical_query,
        "Gas=CO%E2%82%82&Per+capita=true&selection=FRA%7EDEU&v=3"
    );
}
