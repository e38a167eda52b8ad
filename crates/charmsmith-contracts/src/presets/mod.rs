mod records;
mod registry;

pub use records::{ColorPalette, ProductTypePreset, StylePreset, TechnicalConfig};
pub use registry::{PresetListing, PresetRegistry, PresetSummary, BUILTIN_PRESETS};
