use crate::analysis::ImageAnalysis;
use crate::lexicon::{color_term, element_term, material_term, style_term};

const DESCRIPTION_PREFIX: &str = "keychain charm accessory pendant";
const MAX_STYLE_TAGS: usize = 5;

/// Canonical English description of an analysis, used as embedding input.
///
/// The output is a pure function of the analysis so that re-embedding the
/// same record always produces the same text.
pub fn search_description(analysis: &ImageAnalysis) -> String {
    let mut parts = vec![DESCRIPTION_PREFIX.to_string()];
    let elements = &analysis.elements;

    if !elements.primary.is_empty() {
        let primary = elements
            .primary
            .iter()
            .map(|item| {
                let kind = element_term(&item.kind);
                if item.color.is_empty() {
                    kind.to_string()
                } else {
                    format!("{} {}", color_term(&item.color), kind)
                }
            })
            .collect::<Vec<String>>();
        parts.push(format!("main elements: {}", primary.join(", ")));
    }

    if !elements.secondary.is_empty() {
        let secondary = elements
            .secondary
            .iter()
            .map(|item| {
                let kind = element_term(&item.kind);
                if item.count > 0 {
                    format!("{} {}s", item.count, kind)
                } else {
                    kind.to_string()
                }
            })
            .collect::<Vec<String>>();
        parts.push(format!("decorations: {}", secondary.join(", ")));
    }

    if !elements.hardware.is_empty() {
        let hardware = elements
            .hardware
            .iter()
            .map(|item| {
                let kind = element_term(&item.kind);
                if item.material.is_empty() {
                    kind.to_string()
                } else {
                    format!("{} {}", material_term(&item.material), kind)
                }
            })
            .collect::<Vec<String>>();
        parts.push(format!("hardware: {}", hardware.join(", ")));
    }

    if !analysis.style.tags.is_empty() {
        let tags = analysis
            .style
            .tags
            .iter()
            .take(MAX_STYLE_TAGS)
            .map(|tag| style_term(tag))
            .collect::<Vec<&str>>();
        parts.push(format!("style: {}", tags.join(", ")));
    }

    if !analysis.style.mood.is_empty() {
        parts.push(format!("mood: {}", style_term(&analysis.style.mood)));
    }

    parts.join("; ")
}
