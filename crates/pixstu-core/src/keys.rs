//! Deterministic cache keys for generation requests.
//!
//! A key is the SHA-256 of the canonical JSON form of exactly the inputs
//! that determine a pipeline's output. Object fields are serialized in
//! sorted order, floats are rounded to four decimals, and images enter the
//! key only through their fingerprint.

use crate::codec;
use crate::error::Result;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::fmt;

/// Default diffusion model identity.
pub const DEFAULT_MODEL_ID: &str = "stabilityai/stable-diffusion-xl-base-1.0";

/// Generation pipelines that share the cache, one namespace each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Pipeline {
    Txt2Img,
    Img2Img,
    Inpaint,
}

impl Pipeline {
    pub fn namespace(&self) -> &'static str {
        match self {
            Pipeline::Txt2Img => "txt2img",
            Pipeline::Img2Img => "img2img",
            Pipeline::Inpaint => "inpaint",
        }
    }
}

impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.namespace())
    }
}

/// A LoRA adapter and the weight it is applied with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoraSelection {
    pub name: String,
    pub weight: f32,
}

impl LoraSelection {
    pub fn new(name: impl Into<String>, weight: f32) -> Self {
        Self {
            name: name.into(),
            weight,
        }
    }
}

fn round4(value: f32) -> f64 {
    (f64::from(value) * 10_000.0).round() / 10_000.0
}

fn loras_value(loras: &[LoraSelection]) -> Value {
    // Adapter order is significant: it is the order weights are applied in.
    Value::Array(
        loras
            .iter()
            .map(|l| json!({ "name": l.name, "weight": round4(l.weight) }))
            .collect(),
    )
}

/// SHA-256 hex digest of raw bytes.
pub fn bytes_fingerprint(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Fingerprint of an image's pixels, via its PNG encoding.
pub fn image_fingerprint(image: &DynamicImage) -> Result<String> {
    Ok(bytes_fingerprint(&codec::encode_png(image)?))
}

/// Key for `payload` in `pipeline`.
///
/// `serde_json` maps keep their keys sorted, so two payloads with the same
/// fields produce the same key regardless of construction order.
pub fn fingerprint<T: Serialize>(pipeline: Pipeline, payload: &T) -> Result<String> {
    let value = json!({
        "pipeline": pipeline.namespace(),
        "payload": serde_json::to_value(payload)?,
    });
    let canonical = serde_json::to_string(&value)?;
    Ok(bytes_fingerprint(canonical.as_bytes()))
}

/// Text-to-image request inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Txt2ImgRequest {
    pub model: String,
    pub prompt: String,
    pub negative: String,
    pub steps: u32,
    pub guidance_scale: f32,
    pub width: u32,
    pub height: u32,
    pub seed: Option<u64>,
    pub loras: Vec<LoraSelection>,
}

impl Default for Txt2ImgRequest {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL_ID.to_string(),
            prompt: String::new(),
            negative: String::new(),
            steps: 40,
            guidance_scale: 7.5,
            width: 768,
            height: 768,
            seed: None,
            loras: Vec::new(),
        }
    }
}

impl Txt2ImgRequest {
    pub fn cache_key(&self) -> Result<String> {
        fingerprint(
            Pipeline::Txt2Img,
            &json!({
                "model": self.model,
                "prompt": self.prompt,
                "negative": self.negative,
                "steps": self.steps,
                "guidance": round4(self.guidance_scale),
                "width": self.width,
                "height": self.height,
                "seed": self.seed,
                "loras": loras_value(&self.loras),
            }),
        )
    }
}

/// Image-to-image request inputs. `init_image` is a fingerprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Img2ImgRequest {
    pub model: String,
    pub prompt: String,
    pub negative: String,
    pub strength: f32,
    pub steps: u32,
    pub guidance_scale: f32,
    pub seed: Option<u64>,
    pub loras: Vec<LoraSelection>,
    pub init_image: String,
}

impl Img2ImgRequest {
    pub fn cache_key(&self) -> Result<String> {
        fingerprint(
            Pipeline::Img2Img,
            &json!({
                "model": self.model,
                "prompt": self.prompt,
                "negative": self.negative,
                "strength": round4(self.strength),
                "steps": self.steps,
                "guidance": round4(self.guidance_scale),
                "seed": self.seed,
                "loras": loras_value(&self.loras),
                "init": self.init_image,
            }),
        )
    }
}

/// Inpainting request inputs. Image fields are fingerprints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InpaintRequest {
    pub model: String,
    pub prompt: String,
    pub steps: u32,
    pub guidance_scale: f32,
    pub seed: Option<u64>,
    pub base_image: String,
    pub mask: String,
    pub reference: Option<String>,
}

impl InpaintRequest {
    pub fn cache_key(&self) -> Result<String> {
        fingerprint(
            Pipeline::Inpaint,
            &json!({
                "model": self.model,
                "prompt": self.prompt,
                "steps": self.steps,
                "guidance": round4(self.guidance_scale),
                "seed": self.seed,
                "base": self.base_image,
                "mask": self.mask,
                "ref": self.reference,
            }),
        )
    }
}
