use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::warn;

pub const DEGRADED_MOOD: &str = "unknown";

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("model output contains no JSON object")]
    NoJson,
    #[error("model output is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("analysis has an invalid shape: {0}")]
    Shape(String),
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ElementItem {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub color: String,
    #[serde(default)]
    pub material: String,
    #[serde(default)]
    pub count: u32,
}

impl ElementItem {
    pub fn new(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            ..Self::default()
        }
    }

    pub fn with_color(mut self, color: &str) -> Self {
        self.color = color.to_string();
        self
    }

    pub fn with_material(mut self, material: &str) -> Self {
        self.material = material.to_string();
        self
    }

    pub fn with_count(mut self, count: u32) -> Self {
        self.count = count;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ElementGroups {
    #[serde(default)]
    pub primary: Vec<ElementItem>,
    #[serde(default)]
    pub secondary: Vec<ElementItem>,
    #[serde(default)]
    pub hardware: Vec<ElementItem>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StyleInfo {
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub mood: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhysicalSpecs {
    #[serde(default)]
    pub length_cm: f64,
    #[serde(default)]
    pub weight_g: f64,
}

/// Structured description of a design, as produced by the vision analyzer.
///
/// Every optional field is filled at the ingestion boundary, so consumers
/// never need to branch on a missing value. `degraded` marks a placeholder
/// built after the upstream output could not be parsed.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ImageAnalysis {
    #[serde(default)]
    pub elements: ElementGroups,
    #[serde(default)]
    pub style: StyleInfo,
    #[serde(default, rename = "physicalSpecs")]
    pub physical_specs: PhysicalSpecs,
    #[serde(default)]
    pub suggestions: Vec<String>,
    #[serde(default)]
    pub degraded: bool,
}

impl ImageAnalysis {
    pub fn degraded() -> Self {
        Self {
            style: StyleInfo {
                tags: Vec::new(),
                mood: DEGRADED_MOOD.to_string(),
            },
            degraded: true,
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.elements.primary.is_empty()
            && self.elements.secondary.is_empty()
            && self.elements.hardware.is_empty()
            && self.style.tags.is_empty()
    }

    pub fn joined_tags(&self) -> String {
        self.style.tags.join(" ")
    }

    /// Validates an analysis payload and fills defaults.
    ///
    /// Accepts both the camelCase wire shape and snake_case keys. Elements
    /// without a type are dropped, counts may arrive as numeric strings,
    /// and physical measurements are clamped to be non-negative.
    pub fn from_value(value: &Value) -> Result<Self, AnalysisError> {
        let obj = value
            .as_object()
            .ok_or_else(|| AnalysisError::Shape("analysis must be a JSON object".to_string()))?;

        let elements = match obj.get("elements") {
            Some(Value::Object(groups)) => ElementGroups {
                primary: element_list(groups.get("primary")),
                secondary: element_list(groups.get("secondary")),
                hardware: element_list(groups.get("hardware")),
            },
            // Older payloads carried a flat element list.
            Some(Value::Array(_)) => ElementGroups {
                primary: element_list(obj.get("elements")),
                ..ElementGroups::default()
            },
            Some(Value::Null) | None => ElementGroups::default(),
            Some(_) => {
                return Err(AnalysisError::Shape(
                    "elements must be an object or a list".to_string(),
                ))
            }
        };

        let style = obj.get("style").and_then(Value::as_object);
        let specs = obj
            .get("physicalSpecs")
            .or_else(|| obj.get("physical_specs"))
            .and_then(Value::as_object);

        Ok(Self {
            elements,
            style: StyleInfo {
                tags: string_list(style.and_then(|row| row.get("tags"))),
                mood: style
                    .and_then(|row| row.get("mood"))
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .unwrap_or("")
                    .to_string(),
            },
            physical_specs: PhysicalSpecs {
                length_cm: non_negative(spec_field(specs, "lengthCm", "length_cm")),
                weight_g: non_negative(spec_field(specs, "weightG", "weight_g")),
            },
            suggestions: string_list(obj.get("suggestions")),
            degraded: obj.get("degraded").and_then(Value::as_bool).unwrap_or(false),
        })
    }
}

/// Extracts the outermost JSON object from free-form model text.
pub fn parse_model_output(text: &str) -> Result<ImageAnalysis, AnalysisError> {
    let start = text.find('{').ok_or(AnalysisError::NoJson)?;
    let end = text.rfind('}').ok_or(AnalysisError::NoJson)?;
    if end < start {
        return Err(AnalysisError::NoJson);
    }
    let value: Value = serde_json::from_str(&text[start..=end])?;
    ImageAnalysis::from_value(&value)
}

pub fn parse_model_output_or_degraded(text: &str) -> ImageAnalysis {
    match parse_model_output(text) {
        Ok(analysis) => analysis,
        Err(err) => {
            let preview: String = text.chars().take(200).collect();
            warn!(error = %err, preview = %preview, "analysis output unparseable; using degraded analysis");
            ImageAnalysis::degraded()
        }
    }
}

fn element_list(value: Option<&Value>) -> Vec<ElementItem> {
    let Some(rows) = value.and_then(Value::as_array) else {
        return Vec::new();
    };
    rows.iter().filter_map(element_item).collect()
}

fn element_item(value: &Value) -> Option<ElementItem> {
    if let Some(text) = value.as_str() {
        let kind = text.trim();
        return (!kind.is_empty()).then(|| ElementItem::new(kind));
    }
    let row = value.as_object()?;
    let kind = text_field(row, "type");
    if kind.is_empty() {
        return None;
    }
    Some(ElementItem {
        kind,
        color: text_field(row, "color"),
        material: text_field(row, "material"),
        count: row.get("count").and_then(count_value).unwrap_or(0),
    })
}

fn text_field(row: &Map<String, Value>, key: &str) -> String {
    row.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or("")
        .to_string()
}

fn count_value(value: &Value) -> Option<u32> {
    match value {
        Value::Number(number) => number
            .as_u64()
            .or_else(|| number.as_f64().filter(|v| *v > 0.0).map(|v| v.round() as u64))
            .map(|v| v.min(u64::from(u32::MAX)) as u32),
        Value::String(text) => text.trim().parse::<u32>().ok(),
        _ => None,
    }
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    let Some(rows) = value.and_then(Value::as_array) else {
        return Vec::new();
    };
    rows.iter()
        .filter_map(Value::as_str)
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
        .collect()
}

fn spec_field(specs: Option<&Map<String, Value>>, camel: &str, snake: &str) -> f64 {
    let Some(specs) = specs else {
        return 0.0;
    };
    match specs.get(camel).or_else(|| specs.get(snake)) {
        Some(Value::Number(number)) => number.as_f64().unwrap_or(0.0),
        Some(Value::String(text)) => text.trim().parse::<f64>().unwrap_or(0.0),
        _ => 0.0,
    }
}

fn non_negative(value: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn from_value_fills_defaults_for_missing_fields() -> anyhow::Result<()> {
        let analysis = ImageAnalysis::from_value(&json!({
            "elements": {"primary": [{"type": "shell", "color": "white"}]}
        }))?;
        assert_eq!(analysis.elements.primary.len(), 1);
        assert_eq!(analysis.elements.primary[0].material, "");
        assert_eq!(analysis.elements.primary[0].count, 0);
        assert!(analysis.elements.hardware.is_empty());
        assert_eq!(analysis.style.mood, "");
        assert_eq!(analysis.physical_specs.length_cm, 0.0);
        assert!(!analysis.degraded);
        Ok(())
    }

    #[test]
    fn from_value_normalizes_loose_shapes() -> anyhow::Result<()> {
        let analysis = ImageAnalysis::from_value(&json!({
            "elements": {
                "secondary": [{"type": "珠子", "count": "5"}, {"color": "red"}, "流苏"],
                "hardware": [{"type": " 龙虾扣 ", "material": "银色", "count": 1.0}]
            },
            "style": {"tags": ["海洋风", " ", "可爱"], "mood": " 清新 "},
            "physicalSpecs": {"lengthCm": -3, "weightG": "8.5"}
        }))?;
        assert_eq!(analysis.elements.secondary.len(), 2);
        assert_eq!(analysis.elements.secondary[0].count, 5);
        assert_eq!(analysis.elements.secondary[1].kind, "流苏");
        assert_eq!(analysis.elements.hardware[0].kind, "龙虾扣");
        assert_eq!(analysis.elements.hardware[0].count, 1);
        assert_eq!(analysis.style.tags, vec!["海洋风", "可爱"]);
        assert_eq!(analysis.style.mood, "清新");
        assert_eq!(analysis.physical_specs.length_cm, 0.0);
        assert_eq!(analysis.physical_specs.weight_g, 8.5);
        Ok(())
    }

    #[test]
    fn from_value_rejects_non_objects() {
        assert!(matches!(
            ImageAnalysis::from_value(&json!(["shell"])),
            Err(AnalysisError::Shape(_))
        ));
        assert!(matches!(
            ImageAnalysis::from_value(&json!({"elements": 3})),
            Err(AnalysisError::Shape(_))
        ));
    }

    #[test]
    fn parse_model_output_extracts_embedded_json() -> anyhow::Result<()> {
        let text = "Here is the analysis:\n```json\n{\"style\": {\"tags\": [\"ocean\"], \"mood\": \"calm\"}}\n```";
        let analysis = parse_model_output(text)?;
        assert_eq!(analysis.style.tags, vec!["ocean"]);
        assert_eq!(analysis.style.mood, "calm");
        Ok(())
    }

    #[test]
    fn unparseable_output_is_flagged_as_degraded() {
        assert!(matches!(
            parse_model_output("no structure here"),
            Err(AnalysisError::NoJson)
        ));
        let analysis = parse_model_output_or_degraded("{ not json }");
        assert!(analysis.degraded);
        assert_eq!(analysis.style.mood, DEGRADED_MOOD);
        assert!(analysis.is_empty());

        let genuine = parse_model_output_or_degraded("{}");
        assert!(!genuine.degraded);
        assert!(genuine.is_empty());
    }

    #[test]
    fn serde_shape_uses_wire_field_names() -> anyhow::Result<()> {
        let analysis = ImageAnalysis {
            elements: ElementGroups {
                primary: vec![ElementItem::new("shell").with_color("white")],
                ..ElementGroups::default()
            },
            physical_specs: PhysicalSpecs {
                length_cm: 12.0,
                weight_g: 8.0,
            },
            ..ImageAnalysis::default()
        };
        let value = serde_json::to_value(&analysis)?;
        assert_eq!(value["elements"]["primary"][0]["type"], json!("shell"));
        assert_eq!(value["physicalSpecs"]["lengthCm"], json!(12.0));
        let back: ImageAnalysis = serde_json::from_value(value)?;
        assert_eq!(back, analysis);
        Ok(())
    }
}
