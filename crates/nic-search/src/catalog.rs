/// Loader for NIC catalog exports.
///
/// A catalog is a JSON array of objects with the column names of the NIC spreadsheet:
/// `Section`, `Section_Description`, `Division` (older exports spell it `Divison`),
/// `Division_Description`, `Group`, `Group_Description`, `Class`, `Class_Description`,
/// `Sub-Class`, `Sub-Class_Description` and `Description`. Values may be strings,
/// numbers or null. An optional `Vector-Embedding_SubClass` (or `embeddings`) array
/// carries a precomputed embedding.
use std::collections::HashSet;
use std::path::Path;

use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::error::AppError;
use crate::model::CatalogRecord;

const EMBEDDING_KEYS: [&str; 2] = ["Vector-Embedding_SubClass", "embeddings"];

/// Read and parse a catalog file. Returns the raw bytes too, for fingerprinting.
pub fn load_catalog(path: &Path) -> Result<(Vec<CatalogRecord>, Vec<u8>), AppError> {
    let bytes = std::fs::read(path)
        .map_err(|e| AppError::Catalog(format!("failed to read {}: {e}", path.display())))?;
    let records = parse_catalog(&bytes)?;
    info!(path = %path.display(), records = records.len(), "catalog loaded");
    Ok((records, bytes))
}

pub fn parse_catalog(bytes: &[u8]) -> Result<Vec<CatalogRecord>, AppError> {
    let entries: Vec<Value> = serde_json::from_slice(bytes)
        .map_err(|e| AppError::Catalog(format!("catalog is not a JSON array: {e}")))?;

    let mut seen = HashSet::new();
    let mut records = Vec::with_capacity(entries.len());
    for (position, entry) in entries.iter().enumerate() {
        let Some(obj) = entry.as_object() else {
            warn!(position, "skipping non-object catalog entry");
            continue;
        };
        let record = parse_record(obj, position);
        if !seen.insert(record.id.clone()) {
            warn!(id = %record.id, position, "skipping duplicate catalog id");
            continue;
        }
        records.push(record);
    }
    Ok(records)
}

fn parse_record(obj: &Map<String, Value>, position: usize) -> CatalogRecord {
    let id = obj
        .get("_id")
        .and_then(id_text)
        .unwrap_or_else(|| position.to_string());

    CatalogRecord {
        id,
        section: field(obj, &["Section"]),
        section_description: field(obj, &["Section_Description"]),
        division: field(obj, &["Division", "Divison"]),
        division_description: field(obj, &["Division_Description", "Divison_Description"]),
        group: field(obj, &["Group"]),
        group_description: field(obj, &["Group_Description"]),
        class: field(obj, &["Class"]),
        class_description: field(obj, &["Class_Description"]),
        subclass: field(obj, &["Sub-Class"]),
        subclass_description: field(obj, &["Sub-Class_Description"]),
        description: field(obj, &["Description"]),
        embedding: EMBEDDING_KEYS
            .iter()
            .find_map(|key| obj.get(*key).and_then(embedding_values)),
    }
}

/// First present, non-null value among `keys`, rendered as text.
fn field(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| obj.get(*key).and_then(scalar_text))
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(number_text(n)),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

/// Spreadsheet exports store codes like `111` as `111.0`; render integral floats bare.
fn number_text(n: &serde_json::Number) -> String {
    match n.as_f64() {
        Some(f) if n.is_f64() && f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", f as i64),
        _ => n.to_string(),
    }
}

fn id_text(value: &Value) -> Option<String> {
    match value {
        Value::Object(obj) => obj.get("$oid").and_then(Value::as_str).map(str::to_string),
        other => scalar_text(other).filter(|s| !s.is_empty()),
    }
}

fn embedding_values(value: &Value) -> Option<Vec<f32>> {
    let items = value.as_array()?;
    if items.is_empty() {
        return None;
    }
    items
        .iter()
        .map(|v| v.as_f64().map(|f| f as f32))
        .collect()
}

/// Text that represents a record in vector space.
///
/// The Sub-Class description is the most specific wording; broader levels are only used
/// when it is missing.
pub fn compose_embedding_text(record: &CatalogRecord) -> String {
    [
        &record.subclass_description,
        &record.class_description,
        &record.description,
    ]
    .into_iter()
    .filter_map(|v| v.as_deref().map(str::trim))
    .find(|s| !s.is_empty())
    .unwrap_or_default()
    .to_string()
}
