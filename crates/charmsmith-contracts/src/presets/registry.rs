use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::records::{ProductTypePreset, StylePreset, TechnicalConfig};
use crate::classify::{DetectionRules, Rule, FALLBACK_PRODUCT_TYPE, FALLBACK_STYLE};

pub const BUILTIN_PRESETS: &str = include_str!("../../resources/presets.json");

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PresetSummary {
    pub id: String,
    pub name: String,
    pub name_en: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PresetListing {
    pub product_types: Vec<PresetSummary>,
    pub styles: Vec<PresetSummary>,
    pub default_product_type: String,
    pub default_style: String,
}

/// Immutable style and product-type presets plus the detection tables that
/// reference them. Built once at startup and shared read-only.
#[derive(Debug, Clone)]
pub struct PresetRegistry {
    product_types: IndexMap<String, ProductTypePreset>,
    styles: IndexMap<String, StylePreset>,
    structure_patterns: IndexMap<String, String>,
    rules: DetectionRules,
    technical: TechnicalConfig,
    fallback_product: ProductTypePreset,
    fallback_style: StylePreset,
}

impl Default for PresetRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl PresetRegistry {
    pub fn builtin() -> Self {
        match Self::from_json_str(BUILTIN_PRESETS) {
            Ok(registry) => registry,
            Err(err) => {
                warn!(error = %format!("{err:#}"), "embedded presets unreadable; using safe defaults");
                Self::empty()
            }
        }
    }

    /// Reads an override document, falling back to the embedded presets when
    /// the file is missing or not JSON.
    pub fn load(path: &Path) -> Self {
        let loaded = fs::read_to_string(path)
            .with_context(|| format!("failed to read presets file {}", path.display()))
            .and_then(|raw| Self::from_json_str(&raw));
        match loaded {
            Ok(registry) => {
                debug!(path = %path.display(), "loaded presets");
                registry
            }
            Err(err) => {
                warn!(error = %format!("{err:#}"), "falling back to embedded presets");
                Self::builtin()
            }
        }
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(raw).context("presets document is not JSON")?;
        if !value.is_object() {
            anyhow::bail!("presets document must be a JSON object");
        }
        Ok(Self::from_value(&value))
    }

    /// Builds a registry from an already-parsed document. Malformed entries
    /// are logged and skipped, never fatal.
    pub fn from_value(value: &Value) -> Self {
        let product_types = parse_records(value.get("product_types"), |row: &ProductTypePreset| {
            row.id.clone()
        });
        let styles = parse_records(value.get("styles"), |row: &StylePreset| row.id.clone());

        let mut structure_patterns = IndexMap::new();
        if let Some(rows) = value.get("structure_patterns").and_then(Value::as_object) {
            for (key, template) in rows {
                match template.as_str() {
                    Some(text) => {
                        structure_patterns.insert(key.clone(), text.to_string());
                    }
                    None => warn!(pattern = %key, "skipping non-text structure pattern"),
                }
            }
        }

        let technical = match value.get("technical") {
            Some(raw) => serde_json::from_value::<TechnicalConfig>(raw.clone()).unwrap_or_else(
                |err| {
                    warn!(error = %err, "invalid technical section; using defaults");
                    TechnicalConfig::default()
                },
            ),
            None => TechnicalConfig::default(),
        };

        let defaults = value.get("defaults").and_then(Value::as_object);
        let default_product_type = resolve_default(
            defaults,
            "product_type",
            FALLBACK_PRODUCT_TYPE,
            product_types.keys(),
        );
        let default_style = resolve_default(defaults, "style", FALLBACK_STYLE, styles.keys());

        let detection = value.get("detection_rules").and_then(Value::as_object);
        let section = |name: &str| detection.and_then(|rows| rows.get(name));
        let rules = DetectionRules {
            product_rules: parse_rules(section("product_type"), "product_type", |id| {
                product_types.contains_key(id)
            }),
            hardware_rules: parse_rules(section("hardware"), "product_type", |id| {
                product_types.contains_key(id)
            }),
            style_rules: parse_rules(section("style"), "style", |id| styles.contains_key(id)),
            default_product_type,
            default_style,
        };

        Self {
            product_types,
            styles,
            structure_patterns,
            rules,
            technical,
            fallback_product: ProductTypePreset::safe_default(),
            fallback_style: StylePreset::safe_default(),
        }
    }

    fn empty() -> Self {
        Self {
            product_types: IndexMap::new(),
            styles: IndexMap::new(),
            structure_patterns: IndexMap::new(),
            rules: DetectionRules::default(),
            technical: TechnicalConfig::default(),
            fallback_product: ProductTypePreset::safe_default(),
            fallback_style: StylePreset::safe_default(),
        }
    }

    /// Unknown ids resolve to the configured default, then to a built-in
    /// record, so callers always get a usable preset.
    pub fn get_product_type(&self, id: &str) -> &ProductTypePreset {
        self.product_types
            .get(id)
            .or_else(|| self.product_types.get(&self.rules.default_product_type))
            .unwrap_or(&self.fallback_product)
    }

    pub fn get_style(&self, id: &str) -> &StylePreset {
        self.styles
            .get(id)
            .or_else(|| self.styles.get(&self.rules.default_style))
            .unwrap_or(&self.fallback_style)
    }

    pub fn has_product_type(&self, id: &str) -> bool {
        self.product_types.contains_key(id)
    }

    pub fn has_style(&self, id: &str) -> bool {
        self.styles.contains_key(id)
    }

    pub fn product_types(&self) -> impl Iterator<Item = &ProductTypePreset> {
        self.product_types.values()
    }

    pub fn styles(&self) -> impl Iterator<Item = &StylePreset> {
        self.styles.values()
    }

    pub fn list_all(&self) -> PresetListing {
        PresetListing {
            product_types: self
                .product_types
                .values()
                .map(|row| PresetSummary {
                    id: row.id.clone(),
                    name: row.name.clone(),
                    name_en: row.name_en.clone(),
                })
                .collect(),
            styles: self
                .styles
                .values()
                .map(|row| PresetSummary {
                    id: row.id.clone(),
                    name: row.name.clone(),
                    name_en: row.name_en.clone(),
                })
                .collect(),
            default_product_type: self.rules.default_product_type.clone(),
            default_style: self.rules.default_style.clone(),
        }
    }

    pub fn rules(&self) -> &DetectionRules {
        &self.rules
    }

    pub fn technical(&self) -> &TechnicalConfig {
        &self.technical
    }

    pub fn structure_pattern(&self, id: &str) -> Option<&str> {
        self.structure_patterns.get(id).map(String::as_str)
    }
}

fn parse_records<T, F>(value: Option<&Value>, key: F) -> IndexMap<String, T>
where
    T: serde::de::DeserializeOwned,
    F: Fn(&T) -> String,
{
    let mut out = IndexMap::new();
    let Some(rows) = value.and_then(Value::as_array) else {
        return out;
    };
    for (index, row) in rows.iter().enumerate() {
        let record = match serde_json::from_value::<T>(row.clone()) {
            Ok(record) => record,
            Err(err) => {
                warn!(index, error = %err, "skipping malformed preset entry");
                continue;
            }
        };
        let id = key(&record);
        if id.trim().is_empty() {
            warn!(index, "skipping preset entry without an id");
            continue;
        }
        if out.contains_key(&id) {
            warn!(id = %id, "duplicate preset id; keeping the first entry");
            continue;
        }
        out.insert(id, record);
    }
    out
}

fn resolve_default<'a>(
    defaults: Option<&Map<String, Value>>,
    key: &str,
    fallback: &str,
    known: impl Iterator<Item = &'a String> + Clone,
) -> String {
    let configured = defaults
        .and_then(|row| row.get(key))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|text| !text.is_empty());
    if let Some(id) = configured {
        if known.clone().any(|row| row == id) {
            return id.to_string();
        }
        warn!(key, id, "configured default is not a known preset");
    }
    let mut known = known;
    if known.clone().any(|row| row == fallback) {
        return fallback.to_string();
    }
    known
        .next()
        .cloned()
        .unwrap_or_else(|| fallback.to_string())
}

fn parse_rules(value: Option<&Value>, target_key: &str, known: impl Fn(&str) -> bool) -> Vec<Rule> {
    let mut out = Vec::new();
    let Some(rows) = value.and_then(Value::as_array) else {
        return out;
    };
    for (index, row) in rows.iter().enumerate() {
        let Some(target) = row.get(target_key).and_then(Value::as_str) else {
            warn!(index, target_key, "skipping detection rule without a target");
            continue;
        };
        if !known(target) {
            warn!(index, target, "skipping detection rule for unknown preset");
            continue;
        }
        if let Some(pattern) = row.get("pattern").and_then(Value::as_str) {
            match Rule::pattern(pattern, target) {
                Ok(rule) => out.push(rule),
                Err(err) => warn!(index, pattern, error = %err, "skipping invalid rule pattern"),
            }
            continue;
        }
        let Some(keywords) = row.get("keywords").and_then(Value::as_array) else {
            warn!(index, "skipping detection rule without keywords or pattern");
            continue;
        };
        out.extend(
            keywords
                .iter()
                .filter_map(Value::as_str)
                .filter(|keyword| !keyword.trim().is_empty())
                .map(|keyword| Rule::keyword(keyword, target)),
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::classify::Matcher;

    use super::*;

    #[test]
    fn builtin_registry_ships_expected_catalog() {
        let registry = PresetRegistry::builtin();
        assert_eq!(registry.product_types().count(), 5);
        assert_eq!(registry.styles().count(), 8);
        assert_eq!(registry.rules().default_product_type, "keychain");
        assert_eq!(registry.rules().default_style, "ocean_kawaii");
        assert!(registry.structure_pattern("cluster").is_some());
        assert!(!registry.technical().negative.is_empty());

        let listing = registry.list_all();
        assert_eq!(listing.product_types[0].id, "keychain");
        assert_eq!(listing.styles.len(), 8);
    }

    #[test]
    fn unknown_ids_fall_back_to_defaults() {
        let registry = PresetRegistry::builtin();
        assert_eq!(registry.get_product_type("earring").id, "keychain");
        assert_eq!(registry.get_style("space_opera").id, "ocean_kawaii");
        assert_eq!(registry.get_style("gothic_dark").id, "gothic_dark");
    }

    #[test]
    fn malformed_entries_and_bad_patterns_are_skipped() {
        let registry = PresetRegistry::from_value(&json!({
            "defaults": {"product_type": "missing", "style": "calm"},
            "product_types": [
                {"id": "charm", "name": "挂饰", "identity": "A charm"},
                {"name": "no id or identity"},
                {"id": "charm", "name": "dup", "identity": "dup"}
            ],
            "styles": [{"id": "calm", "name": "Calm"}, 42],
            "detection_rules": {
                "product_type": [
                    {"pattern": "(unclosed", "product_type": "charm"},
                    {"keywords": ["trinket", " "], "product_type": "charm"},
                    {"keywords": ["widget"], "product_type": "ghost"},
                    {"keywords": ["nothing"]}
                ]
            }
        }));
        assert_eq!(registry.product_types().count(), 1);
        assert_eq!(registry.get_product_type("charm").name, "挂饰");
        assert_eq!(registry.styles().count(), 1);
        assert_eq!(registry.rules().default_product_type, "charm");
        assert_eq!(registry.rules().default_style, "calm");

        let rules = &registry.rules().product_rules;
        assert_eq!(rules.len(), 1);
        assert!(matches!(&rules[0].matcher, Matcher::Keyword(keyword) if keyword == "trinket"));
    }

    #[test]
    fn empty_document_still_answers_lookups() {
        let registry = PresetRegistry::from_value(&json!({}));
        assert_eq!(registry.get_product_type("anything").id, "keychain");
        assert_eq!(registry.get_style("anything").id, "ocean_kawaii");
        assert!(registry.rules().product_rules.is_empty());
    }

    #[test]
    fn rule_order_follows_document_order() {
        let registry = PresetRegistry::builtin();
        let targets: Vec<&str> = registry
            .rules()
            .style_rules
            .iter()
            .map(|rule| rule.target.as_str())
            .collect();
        assert_eq!(targets.first(), Some(&"ocean_kawaii"));
        assert_eq!(targets.last(), Some(&"festive_holiday"));
        assert!(registry
            .rules()
            .product_rules
            .iter()
            .any(|rule| matches!(rule.matcher, Matcher::Pattern(_))));
    }

    #[test]
    fn load_falls_back_when_file_is_missing_or_broken() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let missing = PresetRegistry::load(&temp.path().join("missing.json"));
        assert_eq!(missing.styles().count(), 8);

        let broken = temp.path().join("broken.json");
        fs::write(&broken, "{ not json")?;
        assert_eq!(PresetRegistry::load(&broken).product_types().count(), 5);

        let custom = temp.path().join("custom.json");
        fs::write(
            &custom,
            serde_json::to_string(&json!({
                "product_types": [{"id": "tag", "name": "Tag", "identity": "A luggage tag"}],
                "styles": [{"id": "plain", "name": "Plain"}]
            }))?,
        )?;
        let loaded = PresetRegistry::load(&custom);
        assert_eq!(loaded.get_product_type("unknown").id, "tag");
        assert_eq!(loaded.get_style("unknown").id, "plain");
        Ok(())
    }
}
