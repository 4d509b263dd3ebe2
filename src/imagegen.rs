// Image generator: sends the prompt to an ordered chain of image models and
// returns the first image any of them produces.

use crate::config::Settings;
use crate::errors::{truncate_body, AppError, AppResult};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};

pub const PRIMARY_MODEL: &str = "gemini-3-pro-image-preview";
pub const FALLBACK_MODEL: &str = "gemini-2.5-flash-image";

const DIAGNOSTIC_BODY_CHARS: usize = 200;

/// One candidate in the generation chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageModel {
    pub name: String,
    /// Whether `imageConfig.imageSize` is accepted by this model.
    pub supports_image_size: bool,
}

impl ImageModel {
    pub fn new(name: &str, supports_image_size: bool) -> Self {
        ImageModel {
            name: name.to_string(),
            supports_image_size,
        }
    }

    fn endpoint(&self, base_url: &str) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            base_url.trim_end_matches('/'),
            self.name
        )
    }
}

/// Default chain: the pro model first, then the flash model once.
pub fn default_models() -> Vec<ImageModel> {
    vec![
        ImageModel::new(PRIMARY_MODEL, true),
        ImageModel::new(FALLBACK_MODEL, false),
    ]
}

/// What to draw. Built once per run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub aspect_ratio: String,
    pub image_size: String,
}

impl GenerationRequest {
    pub fn new(prompt: &str) -> Self {
        GenerationRequest {
            prompt: prompt.trim().to_string(),
            aspect_ratio: "16:9".into(),
            image_size: "2K".into(),
        }
    }

    pub fn with_aspect_ratio(mut self, aspect_ratio: &str) -> Self {
        self.aspect_ratio = aspect_ratio.to_string();
        self
    }

    pub fn with_image_size(mut self, image_size: &str) -> Self {
        self.image_size = image_size.to_string();
        self
    }

    fn full_prompt(&self, style: Option<&str>) -> String {
        match style {
            Some(style) => format!("Generate an image: {}. Style: {}", self.prompt, style),
            None => format!("Generate an image: {}", self.prompt),
        }
    }
}

/// Raw image bytes plus what produced them.
#[derive(Debug, Clone)]
pub struct GeneratedImage {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub model: String,
}

impl GeneratedImage {
    pub fn extension(&self) -> &'static str {
        match self.mime_type.as_str() {
            "image/jpeg" | "image/jpg" => "jpg",
            "image/webp" => "webp",
            "image/gif" => "gif",
            _ => "png",
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentBody<'a> {
    contents: [Content<'a>; 1],
    generation_config: GenerationConfig<'a>,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: [TextPart<'a>; 1],
}

#[derive(Serialize)]
struct TextPart<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig<'a> {
    response_modalities: [&'static str; 2],
    image_config: ImageConfig<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ImageConfig<'a> {
    aspect_ratio: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_size: Option<&'a str>,
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    error: Option<ApiErrorBody>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    inline_data: Option<InlineData>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    data: String,
    mime_type: Option<String>,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    message: String,
}

impl GenerateContentResponse {
    fn first_inline_image(&self) -> Option<&InlineData> {
        self.candidates
            .iter()
            .filter_map(|c| c.content.as_ref())
            .flat_map(|c| c.parts.iter())
            .find_map(|p| p.inline_data.as_ref())
    }
}

/// Calls the image models in order until one returns image data.
pub struct ImageGenerator {
    client: Client,
    api_key: String,
    base_url: String,
    style: Option<String>,
    models: Vec<ImageModel>,
}

impl ImageGenerator {
    pub fn new(settings: &Settings) -> AppResult<Self> {
        let client = Client::builder().timeout(settings.http_timeout).build()?;
        Ok(ImageGenerator {
            client,
            api_key: settings.gemini_api_key.clone(),
            base_url: settings.gemini_base_url.clone(),
            style: settings.image_style.clone(),
            models: default_models(),
        })
    }

    pub fn with_models(mut self, models: Vec<ImageModel>) -> Self {
        self.models = models;
        self
    }

    pub fn models(&self) -> &[ImageModel] {
        &self.models
    }

    /// Try each model once, in order. The error carries the last model's
    /// status and a truncated body.
    pub fn generate(&self, req: &GenerationRequest) -> AppResult<GeneratedImage> {
        let prompt = req.full_prompt(self.style.as_deref());
        let mut last_failure = String::from("no image models configured");

        for model in &self.models {
            log::info!("Generating image with {}", model.name);
            match self.attempt(model, req, &prompt) {
                Ok(image) => {
                    log::info!("{} returned {} bytes", model.name, image.bytes.len());
                    return Ok(image);
                }
                Err(failure) => {
                    log::warn!("{} produced no image: {}", model.name, failure);
                    last_failure = format!("{}: {}", model.name, failure);
                }
            }
        }

        Err(AppError::Generation {
            detail: last_failure,
        })
    }

    fn attempt(
        &self,
        model: &ImageModel,
        req: &GenerationRequest,
        prompt: &str,
    ) -> Result<GeneratedImage, String> {
        let body = GenerateContentBody {
            contents: [Content {
                parts: [TextPart { text: prompt }],
            }],
            generation_config: GenerationConfig {
                response_modalities: ["TEXT", "IMAGE"],
                image_config: ImageConfig {
                    aspect_ratio: &req.aspect_ratio,
                    image_size: model
                        .supports_image_size
                        .then_some(req.image_size.as_str()),
                },
            },
        };

        let res = self
            .client
            .post(model.endpoint(&self.base_url))
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .map_err(|e| format!("request failed: {}", e))?;

        let status = res.status();
        let text = res
            .text()
            .map_err(|e| format!("HTTP {} - unreadable body: {}", status.as_u16(), e))?;
        let diagnostic = || {
            format!(
                "HTTP {} - {}",
                status.as_u16(),
                truncate_body(&text, DIAGNOSTIC_BODY_CHARS)
            )
        };

        if !status.is_success() {
            return Err(diagnostic());
        }

        let parsed: GenerateContentResponse =
            serde_json::from_str(&text).map_err(|_| diagnostic())?;
        if let Some(err) = &parsed.error {
            return Err(format!("HTTP {} - {}", status.as_u16(), err.message));
        }

        let inline = parsed.first_inline_image().ok_or_else(diagnostic)?;
        let bytes = STANDARD
            .decode(inline.data.trim())
            .map_err(|e| format!("invalid base64 image data: {}", e))?;
        if bytes.is_empty() {
            return Err(diagnostic());
        }

        Ok(GeneratedImage {
            bytes,
            mime_type: inline
                .mime_type
                .clone()
                .unwrap_or_else(|| "image/png".into()),
            model: model.name.clone(),
        })
    }
}
