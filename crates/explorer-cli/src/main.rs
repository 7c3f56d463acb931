use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::process;

use explorer_core::normalizer::{content_hash, format_document};
use explorer_core::{
    BlockType, Diagnostic, Diagnostics, Explorer, FallbackOutcome, Grammar,
    GrammarSet, GridDocument, MigrationRegistry, ParseOptions, Severity,
};
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter
const LOG_ENV: &str = "EXPLORER_LOG";

/// Explorer — grid-based data explorer configuration
///
/// Validate explorer documents, resolve URL queries to views, and inspect
/// the grammar.
#[derive(Parser)]
#[command(name = "explorer", version, about, long_about = None)]
struct Cli {
    /// Suppress non-essential output
    #[arg(long, short, global = true)]
    quiet: bool,

    /// Log parser and resolver activity to stderr
    #[arg(long, short, global = true, conflicts_with = "quiet")]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate an explorer document (grammar + decision table)
    Validate {
        /// Path to explorer file
        file: PathBuf,
        /// Output as JSON
        #[arg(long)]
        json: bool,
        /// Treat warnings as errors
        #[arg(long)]
        strict: bool,
    },

    /// Resolve a query string to a decision-table row and its config
    Resolve {
        /// Path to explorer file
        file: PathBuf,
        /// Query string, e.g. "?Metric=Deaths&Per+capita=true"
        #[arg(long, default_value = "")]
        query: String,
        /// Migration file (tab-separated renameParam / rewriteValue rows)
        #[arg(long)]
        migrations: Option<PathBuf>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List every dimension with its options and availability
    Choices {
        /// Path to explorer file
        file: PathBuf,
        /// Current choices as a query string
        #[arg(long, default_value = "")]
        query: String,
        /// Migration file
        #[arg(long)]
        migrations: Option<PathBuf>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the canonical form of a query string
    Url {
        /// Path to explorer file
        file: PathBuf,
        /// Query string to canonicalise
        #[arg(long)]
        query: String,
        /// Migration file
        #[arg(long)]
        migrations: Option<PathBuf>,
    },

    /// List the keywords of a grammar version
    Grammar {
        /// Schema version (defaults to the newest)
        #[arg(long = "schema-version")]
        schema_version: Option<u32>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Compute the content hash (SHA-256) of an explorer document
    Hash {
        /// Path to explorer file
        file: PathBuf,
    },

    /// Format an explorer document to canonical layout
    Fmt {
        /// Path to explorer file
        file: PathBuf,
        /// Write result back to file (default: stdout)
        #[arg(long)]
        write: bool,
    },

    /// Show version information
    Version,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.quiet, cli.verbose);

    let quiet = cli.quiet;
    let exit_code = match cli.command {
        Commands::Validate { file, json, strict } => cmd_validate(&file, json, strict, quiet),
        Commands::Resolve {
            file,
            query,
            migrations,
            json,
        } => cmd_resolve(&file, &query, migrations.as_deref(), json, quiet),
        Commands::Choices {
            file,
            query,
            migrations,
            json,
        } => cmd_choices(&file, &query, migrations.as_deref(), json),
        Commands::Url {
            file,
            query,
            migrations,
        } => cmd_url(&file, &query, migrations.as_deref()),
        Commands::Grammar {
            schema_version,
            json,
        } => cmd_grammar(schema_version, json),
        Commands::Hash { file } => cmd_hash(&file),
        Commands::Fmt { file, write } => cmd_fmt(&file, write, quiet),
        Commands::Version => {
            println!(
                "explorer {} (explorer-core {})",
                env!("CARGO_PKG_VERSION"),
                env!("CARGO_PKG_VERSION")
            );
            let versions = GrammarSet::standard().versions();
            println!(
                "Grammar versions: {}",
                versions
                    .iter()
                    .map(u32::to_string)
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            0
        }
    };

    process::exit(exit_code);
}

fn init_logging(quiet: bool, verbose: bool) {
    let default = if verbose {
        "debug"
    } else if quiet {
        "error"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

// ── Helpers ───────────────────────────────────────────────

fn read_file(path: &Path) -> Result<String, i32> {
    std::fs::read_to_string(path).map_err(|e| {
        eprintln!("{} {}: {}", "error:".red().bold(), path.display(), e);
        2
    })
}

fn load_explorer(path: &Path, options: &ParseOptions) -> Result<Explorer, i32> {
    let text = read_file(path)?;
    let source_id = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    debug!(file = %path.display(), bytes = text.len(), "loading explorer");
    Ok(Explorer::parse(&source_id, &text, &GrammarSet::standard(), options))
}

fn load_registry(path: Option<&Path>) -> Result<MigrationRegistry, i32> {
    let Some(path) = path else {
        return Ok(MigrationRegistry::empty());
    };
    let text = read_file(path)?;
    MigrationRegistry::from_grid(&text).map_err(|e| {
        eprintln!("{} {}: {}", "error:".red().bold(), path.display(), e);
        2
    })
}

fn print_diagnostic(diag: &Diagnostic) {
    let prefix = match diag.severity {
        Severity::Error => "error".red().bold(),
        Severity::Warning => "warning".yellow().bold(),
    };
    let location = diag
        .position
        .map(|p| format!(" at {}", p))
        .unwrap_or_default();
    eprintln!("{} [{}]{}: {}", prefix, diag.kind, location, diag.message);
}

fn print_diagnostics(diags: &Diagnostics, quiet: bool) {
    for diag in diags {
        if quiet && !diag.is_fatal() {
            continue;
        }
        print_diagnostic(diag);
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|e| format!("{{\"error\": \"{}\"}}", e))
}

// ── Commands ──────────────────────────────────────────────

fn cmd_validate(file: &Path, json: bool, strict: bool, quiet: bool) -> i32 {
    let options = ParseOptions {
        strict,
        ..ParseOptions::default()
    };
    let explorer = match load_explorer(file, &options) {
        Ok(e) => e,
        Err(code) => return code,
    };
    let diags = explorer.diagnostics();
    let valid = explorer.is_valid();

    if json {
        let report = serde_json::json!({
            "file": file.display().to_string(),
            "valid": valid,
            "schemaVersion": explorer.program().schema_version(),
            "rows": explorer.matrix().len(),
            "dimensions": explorer.dimension_names(),
            "errors": diags.errors().len(),
            "warnings": diags.warnings().len(),
            "diagnostics": diags,
        });
        println!("{}", to_json(&report));
    } else {
        print_diagnostics(&diags, quiet);
        if !quiet {
            if valid {
                println!(
                    "{} {} is valid ({} rows, {} dimensions, {} warnings)",
                    "✓".green().bold(),
                    file.display(),
                    explorer.matrix().len(),
                    explorer.matrix().dimensions().len(),
                    diags.warnings().len()
                );
            } else {
                eprintln!(
                    "{} {} has {} error(s)",
                    "✗".red().bold(),
                    file.display(),
                    diags.errors().len()
                );
            }
        }
    }

    if valid {
        0
    } else {
        1
    }
}

fn cmd_resolve(file: &Path, query: &str, migrations: Option<&Path>, json: bool, quiet: bool) -> i32 {
    let explorer = match load_explorer(file, &ParseOptions::default()) {
        Ok(e) => e,
        Err(code) => return code,
    };
    let registry = match load_registry(migrations) {
        Ok(r) => r,
        Err(code) => return code,
    };
    if !quiet {
        print_diagnostics(&explorer.diagnostics(), true);
    }

    let view = explorer.resolve_query(query, &registry);
    let exact = view.outcome == Some(FallbackOutcome::Exact);

    if json {
        println!("{}", to_json(&view));
    } else if !quiet {
        match (&view.row, &view.outcome) {
            (Some(row), Some(FallbackOutcome::Exact)) => {
                println!("{} row {}", "matched".green().bold(), row + 1)
            }
            (Some(row), Some(FallbackOutcome::DroppedDimension(name))) => println!(
                "{} row {} (ignoring '{}')",
                "fallback".yellow().bold(),
                row + 1,
                name
            ),
            (Some(row), _) => println!("{} row {} (default)", "fallback".yellow().bold(), row + 1),
            (None, _) => println!("{} decision table is empty", "no match".red().bold()),
        }
        for (key, value) in &view.config {
            let value = serde_json::to_string(value).unwrap_or_default();
            println!("  {} = {}", key.bold(), value);
        }
        println!("{} ?{}", "url".dimmed(), view.canonical_query);
    }

    if exact {
        0
    } else {
        1
    }
}

fn cmd_choices(file: &Path, query: &str, migrations: Option<&Path>, json: bool) -> i32 {
    let explorer = match load_explorer(file, &ParseOptions::default()) {
        Ok(e) => e,
        Err(code) => return code,
    };
    let registry = match load_registry(migrations) {
        Ok(r) => r,
        Err(code) => return code,
    };

    let view = explorer.resolve_query(query, &registry);
    if json {
        println!("{}", to_json(&view.controls));
        return 0;
    }

    for control in &view.controls {
        println!("{} ({})", control.name.bold(), control.control);
        for option in &control.options {
            let marker = if control.selected.as_deref() == Some(option.value.as_str()) {
                "●".green().to_string()
            } else {
                "○".to_string()
            };
            let label = if option.available {
                option.value.normal()
            } else {
                option.value.dimmed()
            };
            println!("  {} {}", marker, label);
        }
    }
    0
}

fn cmd_url(file: &Path, query: &str, migrations: Option<&Path>) -> i32 {
    let explorer = match load_explorer(file, &ParseOptions::default()) {
        Ok(e) => e,
        Err(code) => return code,
    };
    let registry = match load_registry(migrations) {
        Ok(r) => r,
        Err(code) => return code,
    };
    println!("?{}", explorer.canonical_query(query, &registry));
    0
}

fn cmd_grammar(schema_version: Option<u32>, json: bool) -> i32 {
    let grammars = GrammarSet::standard();
    let grammar: &Grammar = match schema_version {
        None => grammars.newest(),
        Some(v) => match grammars.get(v) {
            Some(g) => g,
            None => {
                eprintln!(
                    "{} unknown schema version {} (known: {:?})",
                    "error:".red().bold(),
                    v,
                    grammars.versions()
                );
                return 2;
            }
        },
    };

    if json {
        let keywords: Vec<serde_json::Value> = grammar
            .keywords()
            .iter()
            .map(|spec| {
                serde_json::json!({
                    "keyword": spec.keyword,
                    "block": spec.block,
                    "cardinality": spec.cardinality,
                    "required": spec.required,
                    "type": spec.value_type.to_string(),
                    "description": spec.description,
                })
            })
            .collect();
        let report = serde_json::json!({
            "version": grammar.version(),
            "keywords": keywords,
        });
        println!("{}", to_json(&report));
        return 0;
    }

    println!("{} {}", "schema version".bold(), grammar.version());
    for block in [BlockType::Config, BlockType::Graphers, BlockType::Columns] {
        println!();
        println!("{}", block.to_string().bold());
        for spec in grammar.keywords_in(block) {
            let required = if spec.required {
                " (required)".red().to_string()
            } else {
                String::new()
            };
            println!(
                "  {:<22} {:<28} {}{}",
                spec.keyword,
                spec.value_type.to_string(),
                spec.description,
                required
            );
        }
    }
    0
}

fn cmd_hash(file: &Path) -> i32 {
    let text = match read_file(file) {
        Ok(t) => t,
        Err(code) => return code,
    };
    let grid = GridDocument::parse(&text, ParseOptions::default().delimiter);
    println!("{}", content_hash(&grid));
    0
}

fn cmd_fmt(file: &Path, write: bool, quiet: bool) -> i32 {
    let text = match read_file(file) {
        Ok(t) => t,
        Err(code) => return code,
    };
    let formatted = format_document(&text, ParseOptions::default().delimiter);

    if !write {
        print!("{}", formatted);
        return 0;
    }

    if let Err(e) = std::fs::write(file, &formatted) {
        eprintln!("{} {}: {}", "error:".red().bold(), file.display(), e);
        return 2;
    }
    if !quiet {
        let state = if formatted == text { "unchanged" } else { "formatted" };
        eprintln!("{} {}", state, file.display());
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_global_flags() {
        let cli = Cli::try_parse_from(["explorer", "--quiet", "validate", "a.tsv", "--strict"]).unwrap();
        assert!(cli.quiet);
        assert!(matches!(cli.command, Commands::Validate { strict: true, .. }));
    }

    #[test]
    fn test_quiet_and_verbose_conflict() {
        assert!(Cli::try_parse_from(["explorer", "-q", "-v", "version"]).is_err());
    }

    #[test]
    fn test_url_requires_query() {
        assert!(Cli::try_parse_from(["explorer", "url", "a.tsv"]).is_err());
    }
}
