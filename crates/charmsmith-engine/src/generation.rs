use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use image::{Rgb, RgbImage};
use serde::Serialize;
use sha2::{Digest, Sha256};
use serde_json::json;
use tracing::{info, warn};

use crate::atomic::write_atomic;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum AspectRatio {
    #[default]
    #[serde(rename = "1:1")]
    Square,
    #[serde(rename = "3:4")]
    Portrait,
    #[serde(rename = "4:3")]
    Landscape,
    #[serde(rename = "9:16")]
    Tall,
}

impl AspectRatio {
    /// Dimensions with the long edge equal to `long_edge`.
    pub fn dims(self, long_edge: u32) -> (u32, u32) {
        let long_edge = long_edge.max(1);
        let (w, h) = match self {
            AspectRatio::Square => (1, 1),
            AspectRatio::Portrait => (3, 4),
            AspectRatio::Landscape => (4, 3),
            AspectRatio::Tall => (9, 16),
        };
        let short = |part: u32, whole: u32| ((long_edge as u64 * part as u64) / whole as u64).max(1) as u32;
        if w >= h {
            (long_edge, short(h, w))
        } else {
            (short(w, h), long_edge)
        }
    }
}

impl FromStr for AspectRatio {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim() {
            "1:1" | "square" => Ok(AspectRatio::Square),
            "3:4" | "portrait" => Ok(AspectRatio::Portrait),
            "4:3" | "landscape" => Ok(AspectRatio::Landscape),
            "9:16" | "tall" => Ok(AspectRatio::Tall),
            other => bail!("unsupported aspect ratio `{other}`"),
        }
    }
}

/// Resolves `1K`/`2K`/`4K` presets or a plain pixel count to a long edge.
pub fn parse_size(raw: &str) -> Result<u32> {
    let raw = raw.trim().to_ascii_uppercase();
    let edge = match raw.as_str() {
        "1K" => 1024,
        "2K" => 2048,
        "4K" => 4096,
        other => other
            .parse::<u32>()
            .with_context(|| format!("invalid size `{other}`"))?,
    };
    if edge == 0 || edge > 4096 {
        bail!("size must be between 1 and 4096 pixels, got {edge}");
    }
    Ok(edge)
}

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub prompt: String,
    pub negative: Vec<String>,
    pub long_edge: u32,
    pub aspect: AspectRatio,
    pub seed: Option<u64>,
    /// Images the model should treat as visual references.
    pub reference_images: Vec<PathBuf>,
    pub out_dir: PathBuf,
    /// Upper bound for remote providers; the dryrun ignores it.
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeneratedImage {
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub seed: Option<u64>,
    /// JSON record of the request that produced the image.
    pub receipt: PathBuf,
}

/// Hands a composed directive to an image model.
pub trait ImageGenerator: Send + Sync {
    fn name(&self) -> &str;
    fn generate(&self, request: &GenerationRequest) -> Result<GeneratedImage>;
}

/// Offline generator that writes a flat placeholder whose colour is derived
/// from the prompt and seed.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryrunGenerator;

impl ImageGenerator for DryrunGenerator {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn generate(&self, request: &GenerationRequest) -> Result<GeneratedImage> {
        if request.prompt.trim().is_empty() {
            bail!("generation prompt is empty");
        }
        fs::create_dir_all(&request.out_dir)
            .with_context(|| format!("failed to create {}", request.out_dir.display()))?;
        let (width, height) = request.aspect.dims(request.long_edge);
        let seed = request.seed.unwrap_or_default();
        let stem = format!("dryrun-{}", short_id(&request.prompt, seed));
        let path = request.out_dir.join(format!("{stem}.png"));
        write_dryrun_image(&path, width, height, &request.prompt, seed)?;

        for reference in &request.reference_images {
            if !reference.is_file() {
                warn!(reference = %reference.display(), "reference image not found");
            }
        }
        let receipt = request.out_dir.join(format!("{stem}.json"));
        let record = json!({
            "generator": self.name(),
            "prompt": request.prompt,
            "negative": request.negative,
            "reference_images": request.reference_images,
            "width": width,
            "height": height,
            "aspect": request.aspect,
            "seed": request.seed,
            "image": path,
        });
        write_atomic(&receipt, &serde_json::to_vec_pretty(&record)?)?;
        info!(path = %path.display(), width, height, "wrote dryrun image");
        Ok(GeneratedImage {
            path,
            width,
            height,
            seed: request.seed,
            receipt,
        })
    }
}

fn write_dryrun_image(path: &Path, width: u32, height: u32, prompt: &str, seed: u64) -> Result<()> {
    let (r, g, b) = color_from_prompt(prompt, seed);
    let image = RgbImage::from_pixel(width, height, Rgb([r, g, b]));
    image
        .save(path)
        .with_context(|| format!("failed to save {}", path.display()))?;
    Ok(())
}

fn color_from_prompt(prompt: &str, seed: u64) -> (u8, u8, u8) {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    hasher.update(seed.to_be_bytes());
    let digest = hasher.finalize();
    (digest[0], digest[1], digest[2])
}

fn short_id(prompt: &str, seed: u64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    hasher.update(seed.to_le_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..4])
}
