use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use charmsmith_contracts::presets::PresetRegistry;
use tracing::{debug, warn};

use crate::embedding::{
    EmbeddingProvider, HashingEmbeddingProvider, OpenAiEmbeddingProvider, DEFAULT_EMBEDDING_MODEL,
    DEFAULT_HASHING_DIM, DEFAULT_OPENAI_API_BASE,
};

pub const DEFAULT_GALLERY_DIR: &str = "data/gallery";
pub const DEFAULT_EMBEDDING_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingBackend {
    OpenAi,
    Hashing,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub gallery_dir: PathBuf,
    pub presets_path: Option<PathBuf>,
    pub embedding_backend: EmbeddingBackend,
    pub openai_api_base: String,
    pub openai_api_key: Option<String>,
    pub embedding_model: String,
    pub embedding_timeout: Duration,
    pub hashing_dim: usize,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(non_empty_env)
    }

    /// Builds settings from an arbitrary key lookup. Blank values count as
    /// unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let openai_api_key = get("OPENAI_API_KEY");
        let embedding_backend = match get("CHARMSMITH_EMBEDDING_PROVIDER").as_deref() {
            Some(raw) => match raw.to_ascii_lowercase().as_str() {
                "openai" => EmbeddingBackend::OpenAi,
                "hashing" | "offline" => EmbeddingBackend::Hashing,
                other => bail!("unknown CHARMSMITH_EMBEDDING_PROVIDER `{other}` (expected openai or hashing)"),
            },
            None if openai_api_key.is_some() => EmbeddingBackend::OpenAi,
            None => EmbeddingBackend::Hashing,
        };

        let embedding_timeout = match get("CHARMSMITH_EMBEDDING_TIMEOUT_SECS") {
            Some(raw) => match raw.parse::<u64>() {
                Ok(secs) if secs > 0 => Duration::from_secs(secs),
                _ => bail!("CHARMSMITH_EMBEDDING_TIMEOUT_SECS must be a positive integer, got `{raw}`"),
            },
            None => Duration::from_secs(DEFAULT_EMBEDDING_TIMEOUT_SECS),
        };

        let hashing_dim = match get("CHARMSMITH_HASHING_DIM") {
            Some(raw) => match raw.parse::<usize>() {
                Ok(dim) if dim > 0 => dim,
                _ => bail!("CHARMSMITH_HASHING_DIM must be a positive integer, got `{raw}`"),
            },
            None => DEFAULT_HASHING_DIM,
        };

        Ok(Self {
            gallery_dir: get("CHARMSMITH_GALLERY_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_GALLERY_DIR)),
            presets_path: get("CHARMSMITH_PRESETS").map(PathBuf::from),
            embedding_backend,
            openai_api_base: get("OPENAI_API_BASE")
                .map(|value| value.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_OPENAI_API_BASE.to_string()),
            openai_api_key,
            embedding_model: get("CHARMSMITH_EMBEDDING_MODEL")
                .unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.to_string()),
            embedding_timeout,
            hashing_dim,
        })
    }

    pub fn build_embedding_provider(&self) -> Arc<dyn EmbeddingProvider> {
        match self.embedding_backend {
            EmbeddingBackend::OpenAi => {
                if self.openai_api_key.is_none() {
                    warn!("OPENAI_API_KEY not set; gallery embeddings will be unavailable");
                }
                debug!(model = %self.embedding_model, api_base = %self.openai_api_base, "using openai embeddings");
                Arc::new(OpenAiEmbeddingProvider::new(
                    &self.openai_api_base,
                    self.openai_api_key.clone(),
                    &self.embedding_model,
                ))
            }
            EmbeddingBackend::Hashing => {
                debug!(dim = self.hashing_dim, "using offline hashing embeddings");
                Arc::new(HashingEmbeddingProvider::new(self.hashing_dim))
            }
        }
    }

    pub fn load_presets(&self) -> PresetRegistry {
        match &self.presets_path {
            Some(path) => PresetRegistry::load(path),
            None => PresetRegistry::builtin(),
        }
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn settings(pairs: &[(&str, &str)]) -> Result<Settings> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        Settings::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_without_environment() -> anyhow::Result<()> {
        let settings = settings(&[])?;
        assert_eq!(settings.gallery_dir, PathBuf::from("data/gallery"));
        assert_eq!(settings.embedding_backend, EmbeddingBackend::Hashing);
        assert_eq!(settings.openai_api_base, "https://api.openai.com/v1");
        assert_eq!(settings.embedding_model, "text-embedding-3-small");
        assert_eq!(settings.embedding_timeout, Duration::from_secs(60));
        assert_eq!(settings.hashing_dim, 256);
        assert!(settings.presets_path.is_none());
        assert_eq!(settings.build_embedding_provider().name(), "hashing");
        Ok(())
    }

    #[test]
    fn api_key_selects_openai_unless_overridden() -> anyhow::Result<()> {
        let with_key = settings(&[("OPENAI_API_KEY", "sk-test"), ("OPENAI_API_BASE", "http://proxy/v1/")])?;
        assert_eq!(with_key.embedding_backend, EmbeddingBackend::OpenAi);
        assert_eq!(with_key.openai_api_base, "http://proxy/v1");
        assert_eq!(with_key.build_embedding_provider().name(), "openai");

        let forced = settings(&[("OPENAI_API_KEY", "sk-test"), ("CHARMSMITH_EMBEDDING_PROVIDER", "Hashing")])?;
        assert_eq!(forced.embedding_backend, EmbeddingBackend::Hashing);
        Ok(())
    }

    #[test]
    fn blank_values_count_as_unset() -> anyhow::Result<()> {
        let settings = settings(&[("CHARMSMITH_GALLERY_DIR", "  "), ("OPENAI_API_KEY", "")])?;
        assert_eq!(settings.gallery_dir, PathBuf::from("data/gallery"));
        assert!(settings.openai_api_key.is_none());
        Ok(())
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(settings(&[("CHARMSMITH_EMBEDDING_PROVIDER", "vertex")]).is_err());
        assert!(settings(&[("CHARMSMITH_EMBEDDING_TIMEOUT_SECS", "0")]).is_err());
        assert!(settings(&[("CHARMSMITH_HASHING_DIM", "wide")]).is_err());
    }
}
