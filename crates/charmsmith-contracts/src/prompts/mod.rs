mod composer;

use serde::Serialize;

use crate::analysis::ImageAnalysis;
use crate::classify::Classification;

pub use composer::PromptComposer;

/// Emission order of the layered directive. Empty layers keep their slot
/// but contribute no text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptLayer {
    Modification,
    Identity,
    Structure,
    Materials,
    Style,
    Technical,
}

impl PromptLayer {
    pub const ORDER: [PromptLayer; 6] = [
        PromptLayer::Modification,
        PromptLayer::Identity,
        PromptLayer::Structure,
        PromptLayer::Materials,
        PromptLayer::Style,
        PromptLayer::Technical,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PromptLayer::Modification => "modification",
            PromptLayer::Identity => "identity",
            PromptLayer::Structure => "structure",
            PromptLayer::Materials => "materials",
            PromptLayer::Style => "style",
            PromptLayer::Technical => "technical",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ComposeMode {
    #[default]
    Layered,
    Enhanced,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PromptRequest {
    pub instruction: String,
    pub analysis: Option<ImageAnalysis>,
    pub product_type: Option<String>,
    pub style: Option<String>,
}

impl PromptRequest {
    pub fn new(instruction: impl Into<String>) -> Self {
        Self {
            instruction: instruction.into(),
            ..Self::default()
        }
    }

    pub fn with_analysis(mut self, analysis: ImageAnalysis) -> Self {
        self.analysis = Some(analysis);
        self
    }

    pub fn with_product_type(mut self, product_type: impl Into<String>) -> Self {
        self.product_type = Some(product_type.into());
        self
    }

    pub fn with_style(mut self, style: impl Into<String>) -> Self {
        self.style = Some(style.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayerFragment {
    pub layer: PromptLayer,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComposedPrompt {
    /// Always six entries, in [`PromptLayer::ORDER`].
    pub layers: Vec<LayerFragment>,
    pub negative: Vec<String>,
    pub product_type: String,
    pub style: String,
    pub classification: Classification,
    pub text: String,
}

impl ComposedPrompt {
    pub fn layer(&self, layer: PromptLayer) -> &str {
        self.layers
            .iter()
            .find(|row| row.layer == layer)
            .map(|row| row.text.as_str())
            .unwrap_or("")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnhancedPrompt {
    pub product_type: String,
    pub style: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Directive {
    Layered(ComposedPrompt),
    Enhanced(EnhancedPrompt),
}

impl Directive {
    pub fn text(&self) -> &str {
        match self {
            Directive::Layered(prompt) => &prompt.text,
            Directive::Enhanced(prompt) => &prompt.text,
        }
    }

    pub fn product_type(&self) -> &str {
        match self {
            Directive::Layered(prompt) => &prompt.product_type,
            Directive::Enhanced(prompt) => &prompt.product_type,
        }
    }

    pub fn style(&self) -> &str {
        match self {
            Directive::Layered(prompt) => &prompt.style,
            Directive::Enhanced(prompt) => &prompt.style,
        }
    }
}
