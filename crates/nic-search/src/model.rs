use serde::{Deserialize, Serialize};

/// Code values that mean "no code here" in the NIC catalog.
const UNUSABLE_CODES: [&str; 5] = ["", "n/a", "nan", "undefined", "null"];

/// One row of the NIC catalog (an industry classification at Sub-Class granularity).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CatalogRecord {
    /// Stable identifier, taken from `_id` or the record's position in the file.
    pub id: String,
    pub section: Option<String>,
    pub section_description: Option<String>,
    pub division: Option<String>,
    pub division_description: Option<String>,
    pub group: Option<String>,
    pub group_description: Option<String>,
    pub class: Option<String>,
    pub class_description: Option<String>,
    pub subclass: Option<String>,
    pub subclass_description: Option<String>,
    pub description: Option<String>,
    /// Embedding shipped with the catalog, if any.
    pub embedding: Option<Vec<f32>>,
}

impl CatalogRecord {
    /// Classify the record for display. `None` means the record is not shown at all.
    pub fn tier(&self) -> Option<Tier> {
        if is_usable_code(self.subclass.as_deref()) {
            Some(Tier::Valid)
        } else if is_usable_code(self.class.as_deref()) {
            Some(Tier::Other)
        } else {
            None
        }
    }

    pub fn title(&self) -> &str {
        non_empty(&self.subclass_description)
            .or_else(|| non_empty(&self.class_description))
            .unwrap_or("No Title")
    }

    pub fn display_description(&self) -> &str {
        non_empty(&self.description)
            .or_else(|| non_empty(&self.subclass_description))
            .or_else(|| non_empty(&self.class_description))
            .unwrap_or("No description available")
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// A code is usable when present and not one of the placeholder values.
/// The comparison trims whitespace and ignores case.
pub fn is_usable_code(value: Option<&str>) -> bool {
    match value {
        Some(v) => {
            let v = v.trim().to_lowercase();
            !UNUSABLE_CODES.contains(&v.as_str())
        }
        None => false,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Usable Sub-Class code.
    Valid,
    /// Only the Class code is usable.
    Other,
}

/// A ranked match returned from `/search`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    /// 1-based position after filtering.
    pub rank: usize,
    pub id: String,
    pub title: String,
    pub description: String,
    pub section: Option<String>,
    pub section_description: Option<String>,
    pub division: Option<String>,
    pub division_description: Option<String>,
    pub group: Option<String>,
    pub group_description: Option<String>,
    pub class: Option<String>,
    pub class_description: Option<String>,
    pub subclass: Option<String>,
    pub subclass_description: Option<String>,
    /// Cosine similarity in [0, 1].
    pub similarity: f32,
    pub similarity_percent: f64,
    pub tier: Tier,
}

impl SearchResult {
    pub fn from_record(record: &CatalogRecord, similarity: f32, tier: Tier) -> Self {
        let similarity = similarity.clamp(0.0, 1.0);
        Self {
            rank: 0,
            id: record.id.clone(),
            title: record.title().to_string(),
            description: record.display_description().to_string(),
            section: record.section.clone(),
            section_description: record.section_description.clone(),
            division: record.division.clone(),
            division_description: record.division_description.clone(),
            group: record.group.clone(),
            group_description: record.group_description.clone(),
            class: record.class.clone(),
            class_description: record.class_description.clone(),
            subclass: record.subclass.clone(),
            subclass_description: record.subclass_description.clone(),
            similarity,
            similarity_percent: round2(f64::from(similarity) * 100.0),
            tier,
        }
    }
}

/// Timing breakdown for one search, only returned when requested.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SearchMetrics {
    pub total_time_ms: f64,
    pub embedding_time_ms: f64,
    pub index_time_ms: f64,
    /// Raw index hits before threshold and tier filtering.
    pub results_count: usize,
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
