use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ColorPalette {
    #[serde(default)]
    pub primary: Vec<String>,
    #[serde(default)]
    pub secondary: Vec<String>,
    #[serde(default)]
    pub accent: Vec<String>,
}

impl ColorPalette {
    pub fn colors(&self) -> impl Iterator<Item = &str> {
        self.primary
            .iter()
            .chain(self.secondary.iter())
            .chain(self.accent.iter())
            .map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductTypePreset {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub name_en: String,
    pub identity: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub typical_materials: Vec<String>,
    #[serde(default)]
    pub typical_hardware: Vec<String>,
    #[serde(default = "default_structure")]
    pub typical_structure: String,
    #[serde(default = "default_length_cm")]
    pub default_length_cm: [f64; 2],
    #[serde(default = "default_weight_g")]
    pub default_weight_g: [f64; 2],
    #[serde(default)]
    pub description: String,
}

impl ProductTypePreset {
    pub fn display_name(&self) -> &str {
        if self.name_en.is_empty() {
            &self.name
        } else {
            &self.name_en
        }
    }

    pub(crate) fn safe_default() -> Self {
        Self {
            id: "keychain".to_string(),
            name: "钥匙扣".to_string(),
            name_en: "Keychain".to_string(),
            identity: "A keychain charm pendant".to_string(),
            keywords: vec!["keychain".to_string()],
            typical_materials: Vec::new(),
            typical_hardware: vec!["lobster clasp".to_string()],
            typical_structure: default_structure(),
            default_length_cm: [8.0, 12.0],
            default_weight_g: default_weight_g(),
            description: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StylePreset {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub name_en: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub typical_materials: Vec<String>,
    #[serde(default)]
    pub color_palette: ColorPalette,
    #[serde(default)]
    pub mood_keywords: Vec<String>,
    #[serde(default)]
    pub style_injection: String,
}

impl StylePreset {
    pub(crate) fn safe_default() -> Self {
        Self {
            id: "ocean_kawaii".to_string(),
            name: "海洋风少女系".to_string(),
            name_en: "Ocean Kawaii".to_string(),
            keywords: vec!["ocean".to_string(), "kawaii".to_string()],
            typical_materials: vec!["shell".to_string(), "pearl".to_string()],
            color_palette: ColorPalette::default(),
            mood_keywords: vec!["fresh".to_string(), "summer".to_string()],
            style_injection: "ocean-themed kawaii aesthetic".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TechnicalConfig {
    /// `{product}` is replaced with the product's display name.
    #[serde(default = "default_category_lock")]
    pub category_lock: String,
    #[serde(default = "default_modification_marker")]
    pub modification_marker: String,
    #[serde(default)]
    pub directives: Vec<String>,
    #[serde(default)]
    pub negative: Vec<String>,
}

impl Default for TechnicalConfig {
    fn default() -> Self {
        Self {
            category_lock: default_category_lock(),
            modification_marker: default_modification_marker(),
            directives: Vec::new(),
            negative: Vec::new(),
        }
    }
}

fn default_structure() -> String {
    "single_pendant".to_string()
}

fn default_length_cm() -> [f64; 2] {
    [8.0, 15.0]
}

fn default_weight_g() -> [f64; 2] {
    [5.0, 20.0]
}

fn default_category_lock() -> String {
    "The product must remain a {product}; do not change the product category.".to_string()
}

fn default_modification_marker() -> String {
    "[PRIORITY EDIT]".to_string()
}
