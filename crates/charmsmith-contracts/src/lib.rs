//! Pure data model and deterministic logic shared by the charmsmith engine
//! and CLI: analysis records, the bilingual lexicon, presets, classification,
//! prompt composition and the gallery event journal.

pub mod analysis;
pub mod classify;
pub mod describe;
pub mod events;
pub mod lexicon;
pub mod presets;
pub mod prompts;
