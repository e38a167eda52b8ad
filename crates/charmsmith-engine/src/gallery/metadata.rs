use std::fmt;
use std::fs;
use std::io;
use std::path::Path;
use std::str::FromStr;

use charmsmith_contracts::analysis::ImageAnalysis;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::atomic::write_atomic;
use crate::error::{GalleryError, GalleryResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SalesTier {
    A,
    #[default]
    B,
    C,
    D,
}

impl SalesTier {
    pub fn as_str(self) -> &'static str {
        match self {
            SalesTier::A => "A",
            SalesTier::B => "B",
            SalesTier::C => "C",
            SalesTier::D => "D",
        }
    }
}

impl fmt::Display for SalesTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SalesTier {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "A" => Ok(SalesTier::A),
            "B" => Ok(SalesTier::B),
            "C" => Ok(SalesTier::C),
            "D" => Ok(SalesTier::D),
            other => Err(format!("unknown sales tier `{other}` (expected A, B, C or D)")),
        }
    }
}

/// One stored exemplar design. Field names match the gallery's on-disk
/// `metadata.json` shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceItem {
    pub id: String,
    pub filename: String,
    #[serde(rename = "uploadTime", alias = "createdAt")]
    pub created_at: String,
    #[serde(default)]
    pub analysis: ImageAnalysis,
    #[serde(default)]
    pub sales_tier: SalesTier,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_sha256: Option<String>,
}

#[derive(Serialize)]
struct MetadataDocument<'a> {
    items: &'a [ReferenceItem],
}

/// Loads `metadata.json`. A missing file is an empty gallery; a file that
/// is not JSON is an error so it is never silently overwritten. Individual
/// malformed records are skipped.
pub fn load_metadata(path: &Path) -> GalleryResult<Vec<ReferenceItem>> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(GalleryError::at("read", path, err)),
    };
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    let value: Value = serde_json::from_str(&raw).map_err(|err| {
        GalleryError::at(
            "parse",
            path,
            io::Error::new(io::ErrorKind::InvalidData, err),
        )
    })?;

    let rows = match &value {
        Value::Object(obj) => obj.get("items").and_then(Value::as_array),
        Value::Array(rows) => Some(rows),
        _ => None,
    };
    let Some(rows) = rows else {
        warn!(path = %path.display(), "metadata has no item list; treating gallery as empty");
        return Ok(Vec::new());
    };

    let mut items: Vec<ReferenceItem> = Vec::with_capacity(rows.len());
    for (index, row) in rows.iter().enumerate() {
        match decode_record(row) {
            Ok(item) if item.id.trim().is_empty() || item.filename.trim().is_empty() => {
                warn!(index, "skipping metadata record without id or filename");
            }
            Ok(item) if items.iter().any(|existing| existing.id == item.id) => {
                warn!(index, id = %item.id, "skipping duplicate metadata record");
            }
            Ok(item) => items.push(item),
            Err(err) => warn!(index, error = %err, "skipping malformed metadata record"),
        }
    }
    Ok(items)
}

/// Decodes one stored record. The analysis goes through the same validated
/// ingestion as fresh analyzer output, so nulls and legacy shapes fill with
/// defaults instead of dropping the record.
fn decode_record(row: &Value) -> Result<ReferenceItem, String> {
    let mut fields = row
        .as_object()
        .cloned()
        .ok_or_else(|| "record is not an object".to_string())?;
    fields.retain(|_, value| !value.is_null());
    let analysis = match fields.remove("analysis") {
        Some(raw) => ImageAnalysis::from_value(&raw).unwrap_or_else(|err| {
            warn!(error = %err, "stored analysis unreadable; keeping record as degraded");
            ImageAnalysis::degraded()
        }),
        None => ImageAnalysis::default(),
    };
    let mut item: ReferenceItem =
        serde_json::from_value(Value::Object(fields)).map_err(|err| err.to_string())?;
    item.analysis = analysis;
    Ok(item)
}

pub fn save_metadata(path: &Path, items: &[ReferenceItem]) -> GalleryResult<()> {
    let bytes = serde_json::to_vec_pretty(&MetadataDocument { items })?;
    write_atomic(path, &bytes)
}
