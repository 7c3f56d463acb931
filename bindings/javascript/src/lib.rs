//! JavaScript/TypeScript bindings for explorer documents
//!
//! Thin wrapper around `explorer-core` compiled to WebAssembly.
//! Every result crosses the boundary as a JSON string.

use explorer_core::normalizer::content_hash;
use explorer_core::{Explorer, GrammarSet, GridDocument, MigrationRegistry, ParseOptions};
use wasm_bindgen::prelude::*;

fn explorer(text: &str) -> Explorer {
    Explorer::parse("wasm", text, &GrammarSet::standard(), &ParseOptions::default())
}

fn registry(migrations: Option<String>) -> Result<MigrationRegistry, JsError> {
    match migrations {
        Some(text) => MigrationRegistry::from_grid(&text).map_err(|e| JsError::new(&e.to_string())),
        None => Ok(MigrationRegistry::empty()),
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, JsError> {
    serde_json::to_string_pretty(value)
        .map_err(|e| JsError::new(&format!("Serialization error: {}", e)))
}

/// Parse an explorer document and return the Program as JSON.
///
/// Parsing never throws; problems are listed under `parseErrors`.
#[wasm_bindgen(js_name = "parseExplorer")]
pub fn parse_explorer(text: &str) -> Result<String, JsError> {
    to_json(explorer(text).program())
}

/// Validate an explorer document.
///
/// @returns JSON string: { valid: boolean, diagnostics: [...] }
#[wasm_bindgen]
pub fn validate(text: &str) -> Result<String, JsError> {
    let explorer = explorer(text);
    let output = serde_json::json!({
        "valid": explorer.is_valid(),
        "diagnostics": explorer.diagnostics(),
    });
    to_json(&output)
}

/// Resolve a URL query string against an explorer document.
///
/// @param text - explorer document
/// @param query - query string, with or without the leading `?`
/// @param migrations - optional migration table
/// @returns JSON View: choices, matched row, resolved config and controls
/// @throws Error if the migration table is malformed
#[wasm_bindgen(js_name = "resolveQuery")]
pub fn resolve_query(text: &str, query: &str, migrations: Option<String>) -> Result<String, JsError> {
    let registry = registry(migrations)?;
    to_json(&explorer(text).resolve_query(query, &registry))
}

/// Canonical, current-version form of a query string.
#[wasm_bindgen(js_name = "canonicalQuery")]
pub fn canonical_query(text: &str, query: &str, migrations: Option<String>) -> Result<String, JsError> {
    let registry = registry(migrations)?;
    Ok(explorer(text).canonical_query(query, &registry))
}

/// Hex SHA-256 of the document, independent of line endings.
#[wasm_bindgen(js_name = "contentHash")]
pub fn hash(text: &str) -> String {
    content_hash(&GridDocument::parse(text, ParseOptions::default().delimiter))
}
