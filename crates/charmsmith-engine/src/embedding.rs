use std::time::Duration;

use reqwest::blocking::Client as HttpClient;
use reqwest::header::AUTHORIZATION;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

use crate::vectors::normalize_l2_in_place;

pub const DEFAULT_OPENAI_API_BASE: &str = "https://api.openai.com/v1";
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";
pub const DEFAULT_HASHING_DIM: usize = 256;

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding transport failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("embedding response rejected: {0}")]
    Response(String),
    #[error("embedding provider returned an invalid vector: {0}")]
    InvalidVector(String),
}

#[derive(Debug, Clone, Copy)]
pub struct EmbeddingRequest<'a> {
    pub text: &'a str,
    pub image: Option<&'a [u8]>,
    pub timeout: Duration,
}

impl<'a> EmbeddingRequest<'a> {
    pub fn text(text: &'a str, timeout: Duration) -> Self {
        Self {
            text,
            image: None,
            timeout,
        }
    }
}

/// `Unavailable` is an expected outcome (no credentials, nothing to embed),
/// distinct from a provider failure.
#[derive(Debug, Clone, PartialEq)]
pub enum EmbeddingOutcome {
    Vector(Vec<f32>),
    Unavailable(String),
}

pub trait EmbeddingProvider: Send + Sync {
    fn name(&self) -> &str;
    fn embed(&self, request: &EmbeddingRequest<'_>) -> Result<EmbeddingOutcome, EmbeddingError>;
}

/// OpenAI-compatible `/embeddings` client.
pub struct OpenAiEmbeddingProvider {
    api_base: String,
    api_key: Option<String>,
    model: String,
    http: HttpClient,
}

impl OpenAiEmbeddingProvider {
    pub fn new(api_base: &str, api_key: Option<String>, model: &str) -> Self {
        let api_base = api_base.trim().trim_end_matches('/');
        Self {
            api_base: if api_base.is_empty() {
                DEFAULT_OPENAI_API_BASE.to_string()
            } else {
                api_base.to_string()
            },
            api_key: api_key
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty()),
            model: model.to_string(),
            http: HttpClient::new(),
        }
    }
}

impl EmbeddingProvider for OpenAiEmbeddingProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn embed(&self, request: &EmbeddingRequest<'_>) -> Result<EmbeddingOutcome, EmbeddingError> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Ok(EmbeddingOutcome::Unavailable(
                "OPENAI_API_KEY not set".to_string(),
            ));
        };
        let text = request.text.trim();
        if text.is_empty() {
            return Ok(EmbeddingOutcome::Unavailable("empty input text".to_string()));
        }

        let endpoint = format!("{}/embeddings", self.api_base);
        let response = self
            .http
            .post(&endpoint)
            .header(AUTHORIZATION, format!("Bearer {api_key}"))
            .timeout(request.timeout)
            .json(&json!({
                "model": self.model,
                "input": text,
            }))
            .send()?;

        let status = response.status();
        let body = response.text()?;
        if !status.is_success() {
            return Err(EmbeddingError::Response(format!(
                "embeddings request failed ({}): {}",
                status.as_u16(),
                truncate_text(&body, 512)
            )));
        }
        let payload: Value = serde_json::from_str(&body).map_err(|err| {
            EmbeddingError::Response(format!("embeddings returned invalid JSON: {err}"))
        })?;
        let vector = parse_embedding_response(&payload)?;
        debug!(model = %self.model, dim = vector.len(), "embedded text");
        Ok(EmbeddingOutcome::Vector(vector))
    }
}

/// Extracts and normalizes `data[0].embedding`.
pub fn parse_embedding_response(payload: &Value) -> Result<Vec<f32>, EmbeddingError> {
    let rows = payload
        .get("data")
        .and_then(Value::as_array)
        .and_then(|rows| rows.first())
        .and_then(|row| row.get("embedding"))
        .and_then(Value::as_array)
        .ok_or_else(|| EmbeddingError::Response("response has no data[0].embedding".to_string()))?;

    let mut vector = Vec::with_capacity(rows.len());
    for value in rows {
        let number = value
            .as_f64()
            .ok_or_else(|| EmbeddingError::InvalidVector("non-numeric component".to_string()))?;
        vector.push(number as f32);
    }
    if vector.is_empty() {
        return Err(EmbeddingError::InvalidVector("empty embedding".to_string()));
    }
    if vector.iter().any(|value| !value.is_finite()) || !normalize_l2_in_place(&mut vector) {
        return Err(EmbeddingError::InvalidVector(
            "embedding is not finite or has zero norm".to_string(),
        ));
    }
    Ok(vector)
}

/// Offline provider that hashes word tokens into signed buckets.
///
/// Deterministic across processes, so it suits tests and installs without
/// network credentials. Texts sharing vocabulary score higher.
pub struct HashingEmbeddingProvider {
    dim: usize,
}

impl HashingEmbeddingProvider {
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(1) }
    }

    fn vectorize(&self, text: &str) -> Vec<f32> {
        let mut values = vec![0.0_f32; self.dim];
        for token in tokens(text) {
            let digest = Sha256::digest(token.as_bytes());
            let mut bucket_bytes = [0u8; 8];
            bucket_bytes.copy_from_slice(&digest[..8]);
            let bucket = (u64::from_le_bytes(bucket_bytes) % self.dim as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            values[bucket] += sign;
        }
        values
    }
}

impl Default for HashingEmbeddingProvider {
    fn default() -> Self {
        Self::new(DEFAULT_HASHING_DIM)
    }
}

impl EmbeddingProvider for HashingEmbeddingProvider {
    fn name(&self) -> &str {
        "hashing"
    }

    fn embed(&self, request: &EmbeddingRequest<'_>) -> Result<EmbeddingOutcome, EmbeddingError> {
        let mut values = self.vectorize(request.text);
        if !normalize_l2_in_place(&mut values) {
            return Ok(EmbeddingOutcome::Unavailable(
                "no tokens to embed".to_string(),
            ));
        }
        Ok(EmbeddingOutcome::Vector(values))
    }
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|ch: char| !ch.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
