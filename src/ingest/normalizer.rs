//! Best-effort mapping from raw catalog records to typed table rows.
//!
//! Nothing here rejects a record. Any field that is missing or cannot be
//! coerced to its column type becomes `None` and is stored as NULL.

use serde_json::Value;

use crate::api::pager::RawRecord;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataRow {
    pub id: Option<i64>,
    pub title: Option<String>,
    pub culture: Option<String>,
    pub period: Option<String>,
    pub century: Option<String>,
    pub medium: Option<String>,
    pub dimensions: Option<String>,
    pub description: Option<String>,
    pub department: Option<String>,
    pub classification: Option<String>,
    pub accession_year: Option<i64>,
    pub accession_method: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaRow {
    pub object_id: Option<i64>,
    pub image_count: Option<i64>,
    pub media_count: Option<i64>,
    pub color_count: Option<i64>,
    pub rank: Option<i64>,
    pub date_begin: Option<i64>,
    pub date_end: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColorRow {
    pub object_id: Option<i64>,
    pub color: Option<String>,
    pub spectrum: Option<String>,
    pub hue: Option<String>,
    pub percent: Option<f64>,
    pub css3: Option<String>,
}

/// The three row kinds one raw record expands into.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRecord {
    pub metadata: MetadataRow,
    pub media: MediaRow,
    pub colors: Vec<ColorRow>,
}

impl NormalizedRecord {
    pub fn artifact_id(&self) -> Option<i64> {
        self.metadata.id
    }
}

pub fn normalize(record: &RawRecord) -> NormalizedRecord {
    let id = int_field(record, "id");

    let metadata = MetadataRow {
        id,
        title: text_field(record, "title"),
        culture: text_field(record, "culture"),
        period: text_field(record, "period"),
        century: text_field(record, "century"),
        medium: text_field(record, "medium"),
        dimensions: text_field(record, "dimensions"),
        description: text_field(record, "description"),
        department: text_field(record, "department"),
        classification: text_field(record, "classification"),
        accession_year: int_field(record, "accessionyear"),
        accession_method: text_field(record, "accessionmethod"),
    };

    let media = MediaRow {
        object_id: id,
        image_count: int_field(record, "imagecount"),
        media_count: int_field(record, "mediacount"),
        color_count: int_field(record, "colorcount"),
        rank: int_field(record, "rank"),
        date_begin: int_field(record, "datebegin"),
        date_end: int_field(record, "dateend"),
    };

    let colors = match record.get("colors") {
        Some(Value::Array(entries)) => entries
            .iter()
            .filter_map(Value::as_object)
            .map(|entry| ColorRow {
                object_id: id,
                color: text_field(entry, "color"),
                spectrum: text_field(entry, "spectrum"),
                hue: text_field(entry, "hue"),
                percent: float_field(entry, "percent"),
                css3: text_field(entry, "css3"),
            })
            .collect(),
        _ => Vec::new(),
    };

    NormalizedRecord { metadata, media, colors }
}

fn text_field(record: &RawRecord, key: &str) -> Option<String> {
    match record.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn int_field(record: &RawRecord, key: &str) -> Option<i64> {
    match record.get(key)? {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                .map(|f| f as i64)
        }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn float_field(record: &RawRecord, key: &str) -> Option<f64> {
    match record.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
