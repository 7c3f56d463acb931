//! Migration registry — upgrades query parameters written by older URL versions
//!
//! A migration is a pure transform over ordered query parameters, gated by
//! the URL version it introduces and by an `applies_to` predicate. Every
//! migration carries witnesses: sample inputs it must accept, and whose
//! output it must no longer accept. [`MigrationRegistryBuilder::build`] runs
//! the witnesses and refuses to produce a registry that could loop.
//!
//! # Guarantees
//!
//! - Ordered: migrations run in registration order
//! - Idempotent: migrating already-migrated parameters changes nothing
//! - Checked at start-up: cycles are an [`Error`], never a runtime surprise

use std::collections::BTreeSet;

use tracing::{debug, info};
use ::url::form_urlencoded;

use crate::diagnostic::Position;
use crate::error::{Error, Result};
use crate::parser::grid::{is_blank_row, is_comment_row, GridDocument, DEFAULT_DELIMITER};

// ── Query parameters ───────────────────────────────────────

/// Flat, ordered `key=value` pairs; keys may repeat
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct QueryParams {
    pairs: Vec<(String, String)>,
}

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `application/x-www-form-urlencoded` text; a leading `?` is ignored
    pub fn parse(query: &str) -> Self {
        let query = query.strip_prefix('?').unwrap_or(query);
        form_urlencoded::parse(query.as_bytes())
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()
    }

    /// First value for `key`
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.pairs.iter().any(|(k, _)| k == key)
    }

    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.pairs.push((key.into(), value.into()));
    }

    /// Replace the first value of `key`, or append it
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        match self.pairs.iter_mut().find(|(k, _)| k == key) {
            Some(pair) => pair.1 = value,
            None => self.pairs.push((key.to_string(), value)),
        }
    }

    /// Remove every pair for `key`, returning the removed values
    pub fn remove(&mut self, key: &str) -> Vec<String> {
        let mut removed = Vec::new();
        self.pairs.retain(|(k, v)| {
            if k == key {
                removed.push(v.clone());
                false
            } else {
                true
            }
        });
        removed
    }

    /// Rename `from` to `to` in place. When `to` is already present the
    /// existing value wins and `from` is dropped.
    pub fn rename(&mut self, from: &str, to: &str) {
        if self.contains(to) {
            self.remove(from);
            return;
        }
        for (k, _) in &mut self.pairs {
            if k == from {
                *k = to.to_string();
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn to_query_string(&self) -> String {
        let mut serializer = form_urlencoded::Serializer::new(String::new());
        for (k, v) in &self.pairs {
            serializer.append_pair(k, v);
        }
        serializer.finish()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for QueryParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        QueryParams {
            pairs: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl std::fmt::Display for QueryParams {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "?{}", self.to_query_string())
    }
}

// ── Migrations ─────────────────────────────────────────────

/// A version-to-version transform of decoded query parameters
pub trait Migration: std::fmt::Debug + Send + Sync {
    fn id(&self) -> &str;

    /// URL version that introduced this migration
    fn version(&self) -> u32;

    fn applies_to(&self, params: &QueryParams) -> bool;

    fn apply(&self, params: QueryParams) -> QueryParams;

    /// Inputs `applies_to` must accept and `apply` must fully migrate
    fn witnesses(&self) -> Vec<QueryParams>;
}

/// Rename a query key, e.g. `country` → `selection`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenameParam {
    pub id: String,
    pub version: u32,
    pub from: String,
    pub to: String,
}

impl Migration for RenameParam {
    fn id(&self) -> &str {
        &self.id
    }

    fn version(&self) -> u32 {
        self.version
    }

    fn applies_to(&self, params: &QueryParams) -> bool {
        params.contains(&self.from)
    }

    fn apply(&self, mut params: QueryParams) -> QueryParams {
        params.rename(&self.from, &self.to);
        params
    }

    fn witnesses(&self) -> Vec<QueryParams> {
        vec![[(self.from.as_str(), "x")].into_iter().collect()]
    }
}

/// Replace one value of one key, e.g. `perCapita=1` → `perCapita=true`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriteValue {
    pub id: String,
    pub version: u32,
    pub key: String,
    pub from: String,
    pub to: String,
}

impl Migration for RewriteValue {
    fn id(&self) -> &str {
        &self.id
    }

    fn version(&self) -> u32 {
        self.version
    }

    fn applies_to(&self, params: &QueryParams) -> bool {
        params.iter().any(|(k, v)| k == self.key && v == self.from)
    }

    fn apply(&self, params: QueryParams) -> QueryParams {
        params
            .iter()
            .map(|(k, v)| {
                if k == self.key && v == self.from {
                    (k, self.to.as_str())
                } else {
                    (k, v)
                }
            })
            .collect()
    }

    fn witnesses(&self) -> Vec<QueryParams> {
        vec![[(self.key.as_str(), self.from.as_str())].into_iter().collect()]
    }
}

/// Code-defined migration for transforms the declarative kinds cannot express
#[derive(Debug, Clone)]
pub struct FnMigration {
    pub id: String,
    pub version: u32,
    pub applies_to: fn(&QueryParams) -> bool,
    pub apply: fn(QueryParams) -> QueryParams,
    pub witnesses: Vec<QueryParams>,
}

impl Migration for FnMigration {
    fn id(&self) -> &str {
        &self.id
    }

    fn version(&self) -> u32 {
        self.version
    }

    fn applies_to(&self, params: &QueryParams) -> bool {
        (self.applies_to)(params)
    }

    fn apply(&self, params: QueryParams) -> QueryParams {
        (self.apply)(params)
    }

    fn witnesses(&self) -> Vec<QueryParams> {
        self.witnesses.clone()
    }
}

// ── Registry ───────────────────────────────────────────────

/// Result of running the registry over one set of parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migrated {
    pub params: QueryParams,
    /// Ids of the migrations that ran, in order
    pub applied: Vec<String>,
}

/// Ordered, cycle-checked set of migrations
#[derive(Debug)]
pub struct MigrationRegistry {
    base_version: u32,
    current_version: u32,
    migrations: Vec<Box<dyn Migration>>,
}

#[derive(Debug)]
pub struct MigrationRegistryBuilder {
    base_version: u32,
    migrations: Vec<Box<dyn Migration>>,
}

impl MigrationRegistryBuilder {
    pub fn register(mut self, migration: impl Migration + 'static) -> Self {
        self.migrations.push(Box::new(migration));
        self
    }

    pub fn register_boxed(mut self, migration: Box<dyn Migration>) -> Self {
        self.migrations.push(migration);
        self
    }

    /// Validate every migration against its witnesses.
    ///
    /// Fails on duplicate ids, on witnesses the migration does not accept,
    /// and on any migration (or chain of migrations) that still applies to
    /// its own output.
    pub fn build(self) -> Result<MigrationRegistry> {
        let mut ids = BTreeSet::new();
        for migration in &self.migrations {
            if !ids.insert(migration.id().to_string()) {
                return Err(Error::DuplicateMigration(migration.id().to_string()));
            }
        }

        for migration in &self.migrations {
            for witness in migration.witnesses() {
                if !migration.applies_to(&witness) {
                    return Err(Error::InvalidWitness {
                        id: migration.id().to_string(),
                        witness: witness.to_string(),
                    });
                }
                let output = migration.apply(witness.clone());
                if migration.applies_to(&output) {
                    return Err(Error::MigrationCycle {
                        id: migration.id().to_string(),
                        witness: witness.to_string(),
                    });
                }
            }
        }

        let current_version = self
            .migrations
            .iter()
            .map(|m| m.version())
            .max()
            .unwrap_or(self.base_version)
            .max(self.base_version);

        let registry = MigrationRegistry {
            base_version: self.base_version,
            current_version,
            migrations: self.migrations,
        };

        // A chain can undo an earlier step; a second full pass must be a no-op
        for migration in &registry.migrations {
            for witness in migration.witnesses() {
                let once = registry.run(witness.clone(), registry.base_version, current_version);
                let twice = registry.run(once.params.clone(), registry.base_version, current_version);
                if let Some(id) = twice.applied.into_iter().next() {
                    return Err(Error::MigrationCycle {
                        id,
                        witness: witness.to_string(),
                    });
                }
            }
        }

        debug!(
            migrations = registry.migrations.len(),
            base_version = registry.base_version,
            current_version,
            "built migration registry"
        );
        Ok(registry)
    }
}

impl MigrationRegistry {
    /// Start a registry whose unversioned URLs are `base_version`
    pub fn builder(base_version: u32) -> MigrationRegistryBuilder {
        MigrationRegistryBuilder {
            base_version,
            migrations: Vec::new(),
        }
    }

    /// Registry with no migrations, at version 1
    pub fn empty() -> Self {
        MigrationRegistry {
            base_version: 1,
            current_version: 1,
            migrations: Vec::new(),
        }
    }

    /// Version assumed for URLs without a version key
    pub fn base_version(&self) -> u32 {
        self.base_version
    }

    /// Highest version any migration targets
    pub fn current_version(&self) -> u32 {
        self.current_version
    }

    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.migrations.iter().map(|m| m.id()).collect()
    }

    /// Run every migration newer than `source_version` and no newer than
    /// `target_version` whose `applies_to` holds, in registration order,
    /// until none applies.
    pub fn migrate(&self, params: QueryParams, source_version: u32, target_version: u32) -> Migrated {
        let migrated = self.run(params, source_version, target_version);
        for id in &migrated.applied {
            info!(migration = %id, source_version, target_version, "applied url migration");
        }
        migrated
    }

    /// Passes over the gated migrations repeat until one applies nothing, so
    /// a later step can feed an earlier one. Bounded by the migration count.
    fn run(&self, mut params: QueryParams, source_version: u32, target_version: u32) -> Migrated {
        let gated: Vec<&dyn Migration> = self
            .migrations
            .iter()
            .map(|m| m.as_ref())
            .filter(|m| m.version() > source_version && m.version() <= target_version)
            .collect();

        let mut applied = Vec::new();
        for _ in 0..=gated.len() {
            let before = applied.len();
            for migration in &gated {
                if migration.applies_to(&params) {
                    params = migration.apply(params);
                    applied.push(migration.id().to_string());
                }
            }
            if applied.len() == before {
                break;
            }
        }
        Migrated { params, applied }
    }

    /// Load declarative migrations from a tab-separated grid.
    ///
    /// ```text
    /// baseVersion	1
    /// renameParam	country-to-selection	2	country	selection
    /// rewriteValue	per-capita-bool	2	perCapita	1	true
    /// ```
    pub fn from_grid(text: &str) -> Result<Self> {
        let grid = GridDocument::parse(text, DEFAULT_DELIMITER);
        let mut base_version = 1;
        let mut migrations: Vec<Box<dyn Migration>> = Vec::new();

        for row in grid.rows() {
            if is_blank_row(row) || is_comment_row(row) {
                continue;
            }
            let values: Vec<&str> = row.iter().map(|c| c.value().trim()).collect();
            let at = row[0].position();
            match values[0] {
                "baseVersion" => {
                    let [_, version] = expect_fields::<2>(&values, at)?;
                    base_version = parse_version(version, at)?;
                }
                "renameParam" => {
                    let [_, id, version, from, to] = expect_fields::<5>(&values, at)?;
                    migrations.push(Box::new(RenameParam {
                        id: id.to_string(),
                        version: parse_version(version, at)?,
                        from: from.to_string(),
                        to: to.to_string(),
                    }));
                }
                "rewriteValue" => {
                    let [_, id, version, key, from, to] = expect_fields::<6>(&values, at)?;
                    migrations.push(Box::new(RewriteValue {
                        id: id.to_string(),
                        version: parse_version(version, at)?,
                        key: key.to_string(),
                        from: from.to_string(),
                        to: to.to_string(),
                    }));
                }
                other => {
                    return Err(Error::MigrationSpec {
                        position: at.to_string(),
                        message: format!(
                            "unknown migration kind '{}' (expected baseVersion, renameParam or rewriteValue)",
                            other
                        ),
                    })
                }
            }
        }

        migrations
            .into_iter()
            .fold(MigrationRegistry::builder(base_version), |builder, m| builder.register_boxed(m))
            .build()
    }
}

impl Default for MigrationRegistry {
    fn default() -> Self {
        Self::empty()
    }
}

/// Exactly `N` non-empty leading fields; trailing empty cells are allowed
fn expect_fields<'a, const N: usize>(values: &[&'a str], at: Position) -> Result<[&'a str; N]> {
    let used = values.iter().rposition(|v| !v.is_empty()).map_or(0, |i| i + 1);
    let fields: Vec<&'a str> = values[..used].to_vec();
    let missing = fields.iter().take(N).any(|v| v.is_empty());
    match <[&'a str; N]>::try_from(fields) {
        Ok(fields) if !missing => Ok(fields),
        _ => Err(Error::MigrationSpec {
            position: at.to_string(),
            message: format!("'{}' takes {} values, found {}", values[0], N - 1, used.saturating_sub(1)),
        }),
    }
}

fn parse_version(raw: &str, at: Position) -> Result<u32> {
    raw.parse().map_err(|_| Error::MigrationSpec {
        position: at.to_string(),
        message: format!("expected a version number, found '{}'", raw),
    })
}
