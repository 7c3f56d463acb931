//! URL codec — query string ⇄ choice state, across URL versions
//!
//! Decoding reads the reserved version key, runs the migrations between
//! that version and the current one, then splits the result into dimension
//! choices and passthrough parameters. Encoding writes a canonical string:
//! dimensions in declared order, passthrough in original order, version last.
//!
//! # Guarantees
//!
//! - Round-trip: `decode(encode(s, p))` yields `s` and `p` again
//! - Canonical: equal inputs encode to byte-identical strings
//! - Lossless: parameters that are not dimensions are carried through untouched

use tracing::warn;
use ::url::form_urlencoded;

use crate::matrix::ChoiceState;
use crate::migration::{MigrationRegistry, QueryParams};

/// Reserved query key carrying the URL version
pub const VERSION_KEY: &str = "v";

/// A query string after migration, split by role
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedQuery {
    pub choices: ChoiceState,
    /// Non-dimension parameters, in original order
    pub passthrough: QueryParams,
    /// Ids of migrations that ran, in order
    pub applied_migrations: Vec<String>,
    /// Version the query was written with
    pub source_version: u32,
}

/// Decode a query string into choices for `dimensions`.
///
/// Without a usable version key the registry's base version is assumed.
/// When a dimension appears twice the first value is kept.
pub fn decode(
    query: &str,
    registry: &MigrationRegistry,
    current_version: u32,
    dimensions: &[String],
) -> DecodedQuery {
    let mut params = QueryParams::parse(query);

    let versions = params.remove(VERSION_KEY);
    let source_version = match versions.first() {
        None => registry.base_version(),
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(version = %raw, "unreadable url version, assuming base version");
            registry.base_version()
        }),
    };

    let migrated = registry.migrate(params, source_version, current_version);

    let mut choices = ChoiceState::new();
    let mut passthrough = QueryParams::new();
    for (key, value) in migrated.params.iter() {
        if !dimensions.iter().any(|d| d == key) {
            passthrough.push(key, value);
        } else if choices.contains(key) {
            warn!(dimension = key, value, "duplicate query key discarded");
        } else {
            choices.set(key, value);
        }
    }

    DecodedQuery {
        choices,
        passthrough,
        applied_migrations: migrated.applied,
        source_version,
    }
}

/// Encode choices and passthrough parameters as a canonical query string
/// (no leading `?`). Choices for keys outside `dimensions` are not written.
pub fn encode(
    choices: &ChoiceState,
    passthrough: &QueryParams,
    dimensions: &[String],
    current_version: u32,
) -> String {
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for dimension in dimensions {
        if let Some(value) = choices.get(dimension) {
            serializer.append_pair(dimension, value);
        }
    }
    for (key, value) in passthrough.iter() {
        serializer.append_pair(key, value);
    }
    serializer.append_pair(VERSION_KEY, &current_version.to_string());
    serializer.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::RewriteValue;

    fn dims(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn per_capita_registry() -> MigrationRegistry {
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
    fn test_decode_migrates_old_values() {
        let registry = per_capita_registry();
        let decoded = decode("?perCapita=1", &registry, 2, &dims(&["metric", "perCapita"]));
        assert_eq!(decoded.choices.get("perCapita"), Some("true"));
        assert_eq!(decoded.choices.len(), 1);
        assert_eq!(decoded.applied_migrations, vec!["per-capita-bool"]);
        assert_eq!(decoded.source_version, 1);
    }

    #[test]
    fn test_decode_current_version_skips_migrations() {
        let registry = per_capita_registry();
        let decoded = decode("perCapita=1&v=2", &registry, 2, &dims(&["perCapita"]));
        assert_eq!(decoded.choices.get("perCapita"), Some("1"));
        assert!(decoded.applied_migrations.is_empty());
    }

    #[test]
    fn test_decode_bad_version_assumes_base() {
        let registry = per_capita_registry();
        let decoded = decode("perCapita=1&v=two", &registry, 2, &dims(&["perCapita"]));
        assert_eq!(decoded.source_version, 1);
        assert_eq!(decoded.choices.get("perCapita"), Some("true"));
    }

    #[test]
    fn test_decode_splits_passthrough() {
        let decoded = decode(
            "time=2000..2020&Metric=Per+capita&country=FRA~ESP&tab=map",
            &MigrationRegistry::empty(),
            1,
            &dims(&["Metric"]),
        );
        assert_eq!(decoded.choices.get("Metric"), Some("Per capita"));
        let passthrough: Vec<(&str, &str)> = decoded.passthrough.iter().collect();
        assert_eq!(
            passthrough,
            vec![("time", "2000..2020"), ("country", "FRA~ESP"), ("tab", "map")]
        );
    }

    #[test]
    fn test_decode_first_duplicate_wins() {
        let decoded = decode("metric=deaths&metric=cases", &MigrationRegistry::empty(), 1, &dims(&["metric"]));
        assert_eq!(decoded.choices.get("metric"), Some("deaths"));
        assert!(decoded.passthrough.is_empty());
    }

    #[test]
    fn test_encode_is_canonical() {
        let choices: ChoiceState = [("perCapita", "true"), ("metric", "deaths")].into_iter().collect();
        let passthrough = QueryParams::parse("tab=map&time=2020");
        let encoded = encode(&choices, &passthrough, &dims(&["metric", "perCapita"]), 2);
        assert_eq!(encoded, "metric=deaths&perCapita=true&tab=map&time=2020&v=2");
    }

    #[test]
    fn test_encode_escapes() {
        let choices: ChoiceState = [("Metric", "Per capita & total")].into_iter().collect();
        let encoded = encode(&choices, &QueryParams::new(), &dims(&["Metric"]), 1);
        assert_eq!(encoded, "Metric=Per+capita+%26+total&v=1");
    }

    #[test]
    fn test_round_trip() {
        let registry = per_capita_registry();
        let dimensions = dims(&["metric", "perCapita"]);
        let choices: ChoiceState = [("metric", "cases = 1%"), ("perCapita", "1")].into_iter().collect();
        let passthrough = QueryParams::parse("b=2&a=1&b=3");
        let encoded = encode(&choices, &passthrough, &dimensions, registry.current_version());
        let decoded = decode(&encoded, &registry, registry.current_version(), &dimensions);
        assert_eq!(decoded.choices, choices);
        assert_eq!(decoded.passthrough, passthrough);
        assert!(decoded.applied_migrations.is_empty());
    }

    #[test]
    fn test_encode_determinism_100_iterations() {
        let choices: ChoiceState = [("metric", "deaths")].into_iter().collect();
        let passthrough = QueryParams::parse("tab=chart");
        let dimensions = dims(&["metric"]);
        let first = encode(&choices, &passthrough, &dimensions, 3);
        for i in 0..100 {
            assert_eq!(first, encode(&choices, &passthrough, &dimensions, 3), "Encoding changed at iteration {}", i);
        }
    }
}
