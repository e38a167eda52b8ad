use tracing::debug;

use super::{
    ComposeMode, ComposedPrompt, Directive, EnhancedPrompt, LayerFragment, PromptLayer,
    PromptRequest,
};
use crate::analysis::{ElementItem, ImageAnalysis};
use crate::classify::{classify, Classification};
use crate::lexicon::{color_term, element_term, material_term, style_term};
use crate::presets::{PresetRegistry, ProductTypePreset, StylePreset};

const MAX_SECONDARY_MATERIALS: usize = 2;
const MAX_HARDWARE_MATERIALS: usize = 2;
const ENHANCED_PRIMARY: usize = 3;
const ENHANCED_SECONDARY: usize = 2;
const ENHANCED_TAGS: usize = 3;
const DEFAULT_STRUCTURE: &str = "a single pendant hanging from {hardware}";
const RECREATE_INSTRUCTION: &str = "Recreate the reference design";

/// Assembles generation directives from presets, classification and an
/// optional reference analysis. Never calls a model.
pub struct PromptComposer<'a> {
    presets: &'a PresetRegistry,
}

impl<'a> PromptComposer<'a> {
    pub fn new(presets: &'a PresetRegistry) -> Self {
        Self { presets }
    }

    pub fn compose(&self, request: &PromptRequest, mode: ComposeMode) -> Directive {
        match mode {
            ComposeMode::Layered => Directive::Layered(self.compose_layered(request)),
            ComposeMode::Enhanced => Directive::Enhanced(self.compose_enhanced(request)),
        }
    }

    pub fn compose_layered(&self, request: &PromptRequest) -> ComposedPrompt {
        let classification = self.classify(request);
        let product = self.resolve_product(request, &classification);
        let style = self.resolve_style(request, &classification);
        let analysis = request.analysis.as_ref();

        let layers: Vec<LayerFragment> = PromptLayer::ORDER
            .iter()
            .map(|layer| LayerFragment {
                layer: *layer,
                text: match layer {
                    PromptLayer::Modification => self.modification_layer(&request.instruction),
                    PromptLayer::Identity => self.identity_layer(product),
                    PromptLayer::Structure => self.structure_layer(product, analysis),
                    PromptLayer::Materials => materials_layer(analysis),
                    PromptLayer::Style => style_layer(style),
                    PromptLayer::Technical => self.technical_layer(),
                },
            })
            .collect();

        let text = layers
            .iter()
            .map(|row| row.text.trim())
            .filter(|text| !text.is_empty())
            .collect::<Vec<&str>>()
            .join("\n\n");

        debug!(
            product_type = %product.id,
            style = %style.id,
            chars = text.len(),
            "composed layered prompt"
        );

        ComposedPrompt {
            layers,
            negative: self.presets.technical().negative.clone(),
            product_type: product.id.clone(),
            style: style.id.clone(),
            classification,
            text,
        }
    }

    pub fn compose_enhanced(&self, request: &PromptRequest) -> EnhancedPrompt {
        let classification = self.classify(request);
        let product = self.resolve_product(request, &classification);
        let style = self.resolve_style(request, &classification);

        let instruction = request.instruction.trim();
        let instruction = if instruction.is_empty() {
            RECREATE_INSTRUCTION
        } else {
            instruction
        };
        let mut parts = vec![sentence(&format!(
            "{} as a {} in a {} style",
            instruction.trim_end_matches(['.', '。']),
            product.display_name().to_lowercase(),
            display_style(style).to_lowercase()
        ))];
        if let Some(summary) = request.analysis.as_ref().and_then(enhanced_summary) {
            parts.push(summary);
        }

        EnhancedPrompt {
            product_type: product.id.clone(),
            style: style.id.clone(),
            text: parts.join(" "),
        }
    }

    fn classify(&self, request: &PromptRequest) -> Classification {
        classify(
            self.presets.rules(),
            &request.instruction,
            request.analysis.as_ref(),
        )
    }

    /// An explicit product type wins only when it names a known preset.
    fn resolve_product(
        &self,
        request: &PromptRequest,
        classification: &Classification,
    ) -> &'a ProductTypePreset {
        let id = request
            .product_type
            .as_deref()
            .map(str::trim)
            .filter(|id| self.presets.has_product_type(id))
            .unwrap_or(&classification.product_type);
        self.presets.get_product_type(id)
    }

    fn resolve_style(&self, request: &PromptRequest, classification: &Classification) -> &'a StylePreset {
        let id = request
            .style
            .as_deref()
            .map(str::trim)
            .filter(|id| self.presets.has_style(id))
            .unwrap_or(&classification.style);
        self.presets.get_style(id)
    }

    fn modification_layer(&self, instruction: &str) -> String {
        let instruction = instruction.trim();
        if instruction.is_empty() {
            return String::new();
        }
        format!(
            "{} {}",
            self.presets.technical().modification_marker,
            instruction
        )
    }

    fn identity_layer(&self, product: &ProductTypePreset) -> String {
        let lock = self
            .presets
            .technical()
            .category_lock
            .replace("{product}", &product.display_name().to_lowercase());
        let identity = product.identity.trim().trim_end_matches('.');
        if identity.is_empty() {
            return lock;
        }
        format!("{identity}. {lock}")
    }

    fn structure_layer(&self, product: &ProductTypePreset, analysis: Option<&ImageAnalysis>) -> String {
        let template = self
            .presets
            .structure_pattern(&product.typical_structure)
            .unwrap_or(DEFAULT_STRUCTURE);

        let mut hardware: Vec<String> = analysis
            .map(|row| row.elements.hardware.iter().map(hardware_phrase).collect())
            .unwrap_or_default();
        if hardware.is_empty() {
            hardware = product.typical_hardware.clone();
        }
        let hardware = if hardware.is_empty() {
            "its hanging hardware".to_string()
        } else {
            join_phrases(&hardware)
        };

        let [low, high] = product.default_length_cm;
        format!(
            "Structure: {}; overall length {}-{} cm.",
            template.replace("{hardware}", &hardware),
            low,
            high
        )
    }

    fn technical_layer(&self) -> String {
        let technical = self.presets.technical();
        let mut parts = Vec::new();
        if !technical.directives.is_empty() {
            parts.push(sentence(&format!(
                "Technical: {}",
                technical.directives.join(", ")
            )));
        }
        if !technical.negative.is_empty() {
            parts.push(sentence(&format!("Negative: {}", technical.negative.join(", "))));
        }
        parts.join(" ")
    }
}

fn materials_layer(analysis: Option<&ImageAnalysis>) -> String {
    let Some(analysis) = analysis else {
        return String::new();
    };
    let elements = &analysis.elements;
    let phrases: Vec<String> = elements
        .primary
        .iter()
        .map(colored_phrase)
        .chain(
            elements
                .secondary
                .iter()
                .take(MAX_SECONDARY_MATERIALS)
                .map(counted_phrase),
        )
        .chain(
            elements
                .hardware
                .iter()
                .take(MAX_HARDWARE_MATERIALS)
                .map(hardware_phrase),
        )
        .collect();
    if phrases.is_empty() {
        return String::new();
    }
    sentence(&format!("Materials: {}", phrases.join(", ")))
}

fn style_layer(style: &StylePreset) -> String {
    let mut parts = Vec::new();
    if !style.style_injection.trim().is_empty() {
        parts.push(style.style_injection.trim().to_string());
    }
    if !style.keywords.is_empty() {
        parts.push(format!("keywords: {}", style.keywords.join(", ")));
    }
    let palette: Vec<&str> = style.color_palette.colors().collect();
    if !palette.is_empty() {
        parts.push(format!("color palette: {}", palette.join(", ")));
    }
    if !style.mood_keywords.is_empty() {
        parts.push(format!("mood: {}", style.mood_keywords.join(", ")));
    }
    if parts.is_empty() {
        return String::new();
    }
    sentence(&format!("Style: {}", parts.join("; ")))
}

fn enhanced_summary(analysis: &ImageAnalysis) -> Option<String> {
    let elements = &analysis.elements;
    let mut parts = Vec::new();
    let primary: Vec<&str> = elements
        .primary
        .iter()
        .take(ENHANCED_PRIMARY)
        .map(|item| element_term(&item.kind))
        .collect();
    if !primary.is_empty() {
        parts.push(format!("main elements {}", primary.join(", ")));
    }
    let secondary: Vec<String> = elements
        .secondary
        .iter()
        .filter(|item| item.count > 0)
        .take(ENHANCED_SECONDARY)
        .map(counted_phrase)
        .collect();
    if !secondary.is_empty() {
        parts.push(format!("decorations {}", secondary.join(", ")));
    }
    let tags: Vec<&str> = analysis
        .style
        .tags
        .iter()
        .take(ENHANCED_TAGS)
        .map(|tag| style_term(tag))
        .collect();
    if !tags.is_empty() {
        parts.push(format!("style {}", tags.join(", ")));
    }
    if !analysis.style.mood.is_empty() && !analysis.degraded {
        parts.push(format!("mood {}", style_term(&analysis.style.mood)));
    }
    if parts.is_empty() {
        return None;
    }
    Some(sentence(&format!("Reference: {}", parts.join("; "))))
}

fn colored_phrase(item: &ElementItem) -> String {
    let kind = element_term(&item.kind);
    if item.color.is_empty() {
        kind.to_string()
    } else {
        format!("{} {}", color_term(&item.color), kind)
    }
}

fn counted_phrase(item: &ElementItem) -> String {
    let base = colored_phrase(item);
    if item.count > 1 {
        format!("{} {}", item.count, base)
    } else {
        base
    }
}

fn hardware_phrase(item: &ElementItem) -> String {
    let kind = element_term(&item.kind);
    if item.material.is_empty() {
        kind.to_string()
    } else {
        format!("{} {}", material_term(&item.material), kind)
    }
}

fn display_style(style: &StylePreset) -> &str {
    if style.name_en.is_empty() {
        &style.name
    } else {
        &style.name_en
    }
}

fn join_phrases(items: &[String]) -> String {
    match items {
        [] => String::new(),
        [only] => only.clone(),
        [rest @ .., last] => format!("{} and {}", rest.join(", "), last),
    }
}

fn sentence(text: &str) -> String {
    let text = text.trim();
    if text.ends_with(['.', '!', '?']) {
        text.to_string()
    } else {
        format!("{text}.")
    }
}

#[cfg(test)]
mod tests {
    use crate::analysis::{ElementGroups, ElementItem, ImageAnalysis, StyleInfo};
    use crate::classify::Resolution;
    use crate::presets::PresetRegistry;

    use super::*;

    fn reference_analysis() -> ImageAnalysis {
        ImageAnalysis {
            elements: ElementGroups {
                primary: vec![
                    ElementItem::new("贝壳").with_color("白色"),
                    ElementItem::new("海星"),
                ],
                secondary: vec![
                    ElementItem::new("珍珠").with_count(5),
                    ElementItem::new("玻璃珠").with_color("蓝色").with_count(3),
                    ElementItem::new("流苏"),
                ],
                hardware: vec![ElementItem::new("龙虾扣").with_material("银色")],
            },
            style: StyleInfo {
                tags: vec!["海洋风".to_string(), "可爱".to_string()],
                mood: "清新".to_string(),
            },
            ..ImageAnalysis::default()
        }
    }

    #[test]
    fn empty_instruction_starts_with_identity_and_ends_with_technical() {
        let presets = PresetRegistry::builtin();
        let composer = PromptComposer::new(&presets);
        let request = PromptRequest::new("")
            .with_product_type("keychain")
            .with_style("ocean_kawaii");
        let prompt = composer.compose_layered(&request);

        assert_eq!(prompt.layer(PromptLayer::Modification), "");
        assert!(prompt.text.starts_with(prompt.layer(PromptLayer::Identity)));
        assert!(prompt.text.ends_with(prompt.layer(PromptLayer::Technical)));
        assert!(prompt.text.contains("Negative: necklace"));
        assert_eq!(prompt.layers.len(), 6);
        assert_eq!(prompt.product_type, "keychain");
        assert_eq!(prompt.style, "ocean_kawaii");
        assert!(!prompt.text.contains("\n\n\n"));
    }

    #[test]
    fn instruction_leads_behind_priority_marker() {
        let presets = PresetRegistry::builtin();
        let composer = PromptComposer::new(&presets);
        let prompt = composer.compose_layered(&PromptRequest::new("  swap the shell for a starfish "));
        let marker = &presets.technical().modification_marker;
        assert!(prompt.text.starts_with(marker.as_str()));
        assert!(prompt
            .layer(PromptLayer::Modification)
            .ends_with("swap the shell for a starfish"));
    }

    #[test]
    fn layers_follow_fixed_order() {
        let presets = PresetRegistry::builtin();
        let composer = PromptComposer::new(&presets);
        let prompt = composer.compose_layered(
            &PromptRequest::new("make it sparkle").with_analysis(reference_analysis()),
        );
        let order: Vec<PromptLayer> = prompt.layers.iter().map(|row| row.layer).collect();
        assert_eq!(order, PromptLayer::ORDER.to_vec());

        let mut cursor = 0;
        for layer in PromptLayer::ORDER {
            let fragment = prompt.layer(layer);
            assert!(!fragment.is_empty(), "{} should be present", layer.as_str());
            let found = prompt.text[cursor..]
                .find(fragment)
                .map(|offset| offset + cursor);
            assert!(found.is_some(), "{} out of order", layer.as_str());
            cursor = found.unwrap_or(cursor) + fragment.len();
        }
    }

    #[test]
    fn materials_are_translated_and_capped() {
        let presets = PresetRegistry::builtin();
        let composer = PromptComposer::new(&presets);
        let prompt =
            composer.compose_layered(&PromptRequest::new("").with_analysis(reference_analysis()));
        assert_eq!(
            prompt.layer(PromptLayer::Materials),
            "Materials: white shell, starfish, 5 pearl, 3 blue glass bead, silver lobster clasp."
        );
        assert!(prompt
            .layer(PromptLayer::Structure)
            .contains("silver lobster clasp"));
    }

    #[test]
    fn materials_layer_is_empty_without_analysis() {
        let presets = PresetRegistry::builtin();
        let composer = PromptComposer::new(&presets);
        let prompt = composer.compose_layered(&PromptRequest::new("bag charm please"));
        assert_eq!(prompt.layer(PromptLayer::Materials), "");
        assert_eq!(prompt.product_type, "bag_charm");
        assert!(prompt.layer(PromptLayer::Structure).contains("carabiner"));
        assert!(prompt.layer(PromptLayer::Structure).contains("12-20 cm"));
    }

    #[test]
    fn unknown_explicit_product_defers_to_classifier() {
        let presets = PresetRegistry::builtin();
        let composer = PromptComposer::new(&presets);
        let prompt = composer.compose_layered(
            &PromptRequest::new("a phone strap with beads").with_product_type("earring"),
        );
        assert_eq!(prompt.product_type, "phone_strap");
        assert_eq!(prompt.classification.product_resolution, Resolution::Keyword);
        assert!(prompt.layer(PromptLayer::Identity).contains("phone strap"));
    }

    #[test]
    fn enhanced_mode_is_a_single_short_directive() {
        let presets = PresetRegistry::builtin();
        let composer = PromptComposer::new(&presets);
        let request = PromptRequest::new("")
            .with_product_type("keychain")
            .with_analysis(reference_analysis());
        let directive = composer.compose(&request, ComposeMode::Enhanced);

        let Directive::Enhanced(prompt) = &directive else {
            panic!("expected an enhanced directive");
        };
        assert!(prompt
            .text
            .starts_with("Recreate the reference design as a keychain in a ocean kawaii style."));
        assert!(prompt.text.contains("main elements shell, starfish"));
        assert!(prompt.text.contains("decorations 5 pearl, 3 blue glass bead"));
        assert!(prompt.text.contains("style ocean style, cute"));
        assert!(prompt.text.ends_with("mood fresh."));
        assert!(!prompt.text.contains("Negative:"));
        assert_eq!(directive.product_type(), "keychain");
    }

    #[test]
    fn compose_mode_selects_one_variant() {
        let presets = PresetRegistry::builtin();
        let composer = PromptComposer::new(&presets);
        let request = PromptRequest::new("add pearls");
        assert!(matches!(
            composer.compose(&request, ComposeMode::Layered),
            Directive::Layered(_)
        ));
        assert!(matches!(
            composer.compose(&request, ComposeMode::Enhanced),
            Directive::Enhanced(_)
        ));
    }
}
