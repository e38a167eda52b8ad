//! Storage and provider side of charmsmith: the persisted embedding store,
//! the reference gallery, embedding and image-generation providers and
//! environment settings.

pub mod atomic;
pub mod embedding;
pub mod error;
pub mod gallery;
pub mod generation;
pub mod settings;
pub mod vectors;

pub use error::{GalleryError, GalleryResult};
pub use gallery::{Gallery, GalleryEntry, ReembedSummary, ReferenceItem, SalesTier, SimilarReference};
pub use settings::Settings;
