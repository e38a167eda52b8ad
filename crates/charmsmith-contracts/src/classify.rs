use regex::{Regex, RegexBuilder};
use serde::Serialize;

use crate::analysis::ImageAnalysis;
use crate::lexicon::style_term;

pub const FALLBACK_PRODUCT_TYPE: &str = "keychain";
pub const FALLBACK_STYLE: &str = "ocean_kawaii";

#[derive(Debug, Clone)]
pub enum Matcher {
    /// Lower-cased substring.
    Keyword(String),
    Pattern(Regex),
}

impl Matcher {
    fn matches(&self, haystack: &str) -> bool {
        match self {
            Matcher::Keyword(keyword) => haystack.contains(keyword.as_str()),
            Matcher::Pattern(pattern) => pattern.is_match(haystack),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Rule {
    pub matcher: Matcher,
    pub target: String,
}

impl Rule {
    pub fn keyword(keyword: &str, target: &str) -> Self {
        Self {
            matcher: Matcher::Keyword(keyword.trim().to_lowercase()),
            target: target.to_string(),
        }
    }

    pub fn pattern(pattern: &str, target: &str) -> Result<Self, regex::Error> {
        let regex = RegexBuilder::new(pattern).case_insensitive(true).build()?;
        Ok(Self {
            matcher: Matcher::Pattern(regex),
            target: target.to_string(),
        })
    }
}

/// Ordered rule tables. Evaluation is first-match-wins, so table order is
/// significant and must be preserved from configuration.
#[derive(Debug, Clone)]
pub struct DetectionRules {
    pub product_rules: Vec<Rule>,
    pub hardware_rules: Vec<Rule>,
    pub style_rules: Vec<Rule>,
    pub default_product_type: String,
    pub default_style: String,
}

impl Default for DetectionRules {
    fn default() -> Self {
        Self {
            product_rules: Vec::new(),
            hardware_rules: Vec::new(),
            style_rules: Vec::new(),
            default_product_type: FALLBACK_PRODUCT_TYPE.to_string(),
            default_style: FALLBACK_STYLE.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    Keyword,
    Hardware,
    StyleTag,
    Default,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub product_type: String,
    pub style: String,
    pub product_resolution: Resolution,
    pub style_resolution: Resolution,
}

fn first_match<'a>(rules: &'a [Rule], haystack: &str) -> Option<&'a str> {
    if haystack.is_empty() {
        return None;
    }
    rules
        .iter()
        .find(|rule| rule.matcher.matches(haystack))
        .map(|rule| rule.target.as_str())
}

/// Resolves a `(product_type, style)` pair from free text and an optional
/// analysis. Always terminates with a concrete pair.
pub fn classify(
    rules: &DetectionRules,
    text: &str,
    analysis: Option<&ImageAnalysis>,
) -> Classification {
    let mut combined = text.to_lowercase();
    if let Some(analysis) = analysis {
        for tag in &analysis.style.tags {
            combined.push(' ');
            combined.push_str(&tag.to_lowercase());
        }
    }
    let combined = combined.trim();

    let (product_type, product_resolution) =
        if let Some(target) = first_match(&rules.product_rules, combined) {
            (target.to_string(), Resolution::Keyword)
        } else if let Some(target) = analysis.and_then(|row| hardware_match(rules, row)) {
            (target.to_string(), Resolution::Hardware)
        } else {
            (rules.default_product_type.clone(), Resolution::Default)
        };

    let (style, style_resolution) = if let Some(target) = first_match(&rules.style_rules, combined)
    {
        (target.to_string(), Resolution::Keyword)
    } else if let Some(target) = analysis.and_then(|row| style_tag_match(rules, row)) {
        (target.to_string(), Resolution::StyleTag)
    } else {
        (rules.default_style.clone(), Resolution::Default)
    };

    Classification {
        product_type,
        style,
        product_resolution,
        style_resolution,
    }
}

fn hardware_match<'a>(rules: &'a DetectionRules, analysis: &ImageAnalysis) -> Option<&'a str> {
    analysis
        .elements
        .hardware
        .iter()
        .find_map(|item| first_match(&rules.hardware_rules, &item.kind.to_lowercase()))
}

fn style_tag_match<'a>(rules: &'a DetectionRules, analysis: &ImageAnalysis) -> Option<&'a str> {
    let mut translated: Vec<String> = analysis
        .style
        .tags
        .iter()
        .map(|tag| style_term(tag).to_lowercase())
        .collect();
    if !analysis.style.mood.is_empty() {
        translated.push(style_term(&analysis.style.mood).to_lowercase());
    }
    first_match(&rules.style_rules, translated.join(" ").trim())
}
