//! fal.ai media generator
//!
//! Synchronous `https://fal.run/<model>` endpoint with `Key` authorization.
//! Images come back as `images[0]`, either an object with a `url` or a bare
//! base64 payload; videos as `video.url`.

use super::{MediaError, MediaGenerator, MediaKind, MediaRequest};
use crate::llm::MediaStyle;
use async_trait::async_trait;
use rand::Rng;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

const FAL_RUN_URL: &str = "https://fal.run";
pub const DEFAULT_IMAGE_MODEL: &str = "fal-ai/flux/dev";

/// Prompt sent to the backend: the user prompt plus the house style
pub fn enhance_prompt(prompt: &str, style: MediaStyle) -> String {
    format!(
        "{prompt}, cyberpunk neon glitch smoke {} vibes, highly detailed, 8k, cinematic lighting, \
         volumetric fog, emissive glow, futuristic, trending on artstation, unreal engine",
        style.as_str()
    )
}

pub struct FalMediaGenerator {
    client: Client,
    api_key: Option<String>,
    image_model: String,
    video_model: Option<String>,
}

impl FalMediaGenerator {
    pub fn new(api_key: Option<String>) -> Result<Self, MediaError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|e| MediaError::Network(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_key,
            image_model: DEFAULT_IMAGE_MODEL.to_string(),
            video_model: None,
        })
    }

    #[must_use]
    pub fn with_image_model(mut self, model: impl Into<String>) -> Self {
        self.image_model = model.into();
        self
    }

    #[must_use]
    pub fn with_video_model(mut self, model: Option<String>) -> Self {
        self.video_model = model;
        self
    }

    fn model_for(&self, kind: MediaKind) -> Result<&str, MediaError> {
        match kind {
            MediaKind::Image => Ok(&self.image_model),
            MediaKind::Video => self
                .video_model
                .as_deref()
                .ok_or(MediaError::Unsupported(MediaKind::Video)),
        }
    }
}

fn request_body(request: &MediaRequest, seed: u32) -> Value {
    let prompt = enhance_prompt(&request.prompt, request.style);
    match request.kind {
        MediaKind::Image => json!({
            "prompt": prompt,
            "image_size": "square_hd",
            "num_inference_steps": 28,
            "seed": seed,
        }),
        MediaKind::Video => json!({
            "prompt": prompt,
            "seed": seed,
        }),
    }
}

fn extract_media_url(kind: MediaKind, body: &Value) -> Result<String, MediaError> {
    let url = match kind {
        MediaKind::Image => match body.pointer("/images/0") {
            Some(Value::Object(image)) => image.get("url").and_then(Value::as_str).map(str::to_string),
            Some(Value::String(s)) if s.starts_with("http") || s.starts_with("data:") => Some(s.clone()),
            Some(Value::String(b64)) => Some(format!("data:image/png;base64,{b64}")),
            _ => None,
        },
        MediaKind::Video => body
            .pointer("/video/url")
            .and_then(Value::as_str)
            .map(str::to_string),
    };

    url.filter(|u| !u.is_empty()).ok_or_else(|| {
        MediaError::InvalidResponse(format!("no {} in response", kind.as_str()))
    })
}

#[async_trait]
impl MediaGenerator for FalMediaGenerator {
    async fn generate(&self, request: &MediaRequest) -> Result<String, MediaError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(MediaError::MissingCredential("FAL_KEY"))?;
        let model = self.model_for(request.kind)?;
        let url = format!("{FAL_RUN_URL}/{model}");
        let seed = rand::thread_rng().gen_range(0..1_000_000);

        let start = std::time::Instant::now();
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Key {api_key}"))
            .json(&request_body(request, seed))
            .send()
            .await
            .map_err(|e| MediaError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(model, status = status.as_u16(), body = %body, "Media backend rejected request");
            return Err(MediaError::Backend(format!("HTTP {status}")));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| MediaError::InvalidResponse(e.to_string()))?;
        let media_url = extract_media_url(request.kind, &body)?;

        tracing::info!(
            model,
            kind = request.kind.as_str(),
            duration_ms = %start.elapsed().as_millis(),
            "Media generated"
        );
        Ok(media_url)
    }
}
