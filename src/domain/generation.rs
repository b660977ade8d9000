use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use thiserror::Error;
use validator::Validate;

pub const DEFAULT_VARIATION_STRENGTH: u8 = 5;

const VARIATION_BASE_PROMPT: &str = "Keep the identity, pose and overall composition of the reference image recognisable while applying the changes.";

const FORMAT_TEMPLATE_PROMPT: &str = "The provided image is a black template that defines the required aspect ratio. Your output MUST match this aspect ratio.";

const VARIATION_STRENGTH_PHRASES: [&str; 10] = [
    "Change as little as possible: only subtle lighting and color corrections.",
    "Make very small changes, such as slight color grading and minor texture refinement.",
    "Make small changes to lighting, color and fine details.",
    "Make noticeable but restrained changes to lighting, styling and small details.",
    "Make moderate changes to styling, lighting and secondary details.",
    "Make clear changes to styling, mood and background details.",
    "Make bold changes to styling, mood and environment while keeping the subject.",
    "Reinterpret the scene freely, keeping only the main subject and pose.",
    "Reinterpret the image boldly, using it mostly as loose inspiration.",
    "Use maximum creative freedom; the reference is only a starting point.",
];

#[derive(Error, Debug)]
pub enum RequestError {
    #[error("Invalid request: {0}")]
    Invalid(#[from] validator::ValidationErrors),
    #[error("A text prompt is required unless an image-input model varies a reference image")]
    MissingInput,
    #[error("{model} produces at most {max} images per request")]
    TooManyImages { model: ImageModel, max: u32 },
    #[error("{mode} generation requires an image-input model, got {model}")]
    ModelLacksImageInput { mode: GenerationMode, model: ImageModel },
    #[error("Invalid reference images for {mode} generation: {reason}")]
    InvalidReferences {
        mode: GenerationMode,
        reason: &'static str,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[cfg_attr(feature = "server", derive(utoipa::ToSchema))]
pub enum ImageModel {
    #[serde(rename = "gemini-2.5-flash-image")]
    #[strum(serialize = "gemini-2.5-flash-image")]
    GeminiFlashImage,
    #[serde(rename = "imagen-4.0-generate-001")]
    #[strum(serialize = "imagen-4.0-generate-001")]
    Imagen4,
}

impl ImageModel {
    pub fn supports_image_input(self) -> bool {
        matches!(self, ImageModel::GeminiFlashImage)
    }

    /// Images the UI may request in one batch.
    pub fn max_images(self) -> u32 {
        4
    }

    /// Whether one remote call returns the whole batch.
    pub fn generates_batch_per_call(self) -> bool {
        matches!(self, ImageModel::Imagen4)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[cfg_attr(feature = "server", derive(utoipa::ToSchema))]
pub enum AspectRatio {
    #[serde(rename = "1:1")]
    #[strum(serialize = "1:1")]
    Square,
    #[serde(rename = "16:9")]
    #[strum(serialize = "16:9")]
    Widescreen,
    #[serde(rename = "9:16")]
    #[strum(serialize = "9:16")]
    Portrait,
    #[serde(rename = "4:3")]
    #[strum(serialize = "4:3")]
    Landscape,
    #[serde(rename = "3:4")]
    #[strum(serialize = "3:4")]
    Tall,
}

impl AspectRatio {
    pub fn resolution_option(self) -> ResolutionOption {
        match self {
            AspectRatio::Square => ResolutionOption::Square,
            AspectRatio::Widescreen | AspectRatio::Landscape => ResolutionOption::Landscape,
            AspectRatio::Portrait | AspectRatio::Tall => ResolutionOption::Portrait,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "server", derive(utoipa::ToSchema))]
pub enum ResolutionOption {
    Square,
    Landscape,
    Portrait,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
#[cfg_attr(feature = "server", derive(utoipa::ToSchema))]
pub enum GenerationStatus {
    Pending,
    Success,
    Error,
}

/// What a batch produces and how its reference images are read.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
#[cfg_attr(feature = "server", derive(utoipa::ToSchema))]
pub enum GenerationMode {
    /// Text-to-image, or a variation of one uploaded image.
    #[default]
    Standard,
    /// A person composed from a face photo plus optional clothing and
    /// background photos. The prompt is sent exactly as given.
    Portrait,
    /// Face or avatar candidates, optionally shaped by an aspect-ratio
    /// template image.
    Face,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
#[cfg_attr(feature = "server", derive(utoipa::ToSchema))]
pub enum ReferenceRole {
    /// Main content of a variation.
    #[default]
    Content,
    Face,
    Clothing,
    Background,
    /// Blank image whose shape fixes the output aspect ratio.
    Format,
}

/// Base64 image passed to the model alongside the prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "server", derive(utoipa::ToSchema))]
pub struct ReferenceImage {
    pub mime_type: String,
    pub data: String,
    #[serde(default)]
    pub role: ReferenceRole,
}

impl ReferenceImage {
    pub fn new(mime_type: impl Into<String>, data: impl Into<String>, role: ReferenceRole) -> Self {
        Self {
            mime_type: mime_type.into(),
            data: data.into(),
            role,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[cfg_attr(feature = "server", derive(utoipa::ToSchema))]
pub struct GenerationRequest {
    #[serde(default)]
    #[validate(length(max = 4000))]
    pub prompt: String,
    #[serde(default)]
    pub mode: GenerationMode,
    pub model: ImageModel,
    pub aspect_ratio: AspectRatio,
    /// Pixel size hint such as `"1024x1024"`.
    #[validate(length(min = 1, max = 32))]
    pub resolution: String,
    #[validate(range(min = 1, max = 4))]
    pub number_of_images: u32,
    #[validate(range(min = 1, max = 10))]
    pub variation_strength: Option<u8>,
    #[validate(length(max = 500))]
    pub shot_type: Option<String>,
    #[validate(length(max = 500))]
    pub clothing: Option<String>,
    #[validate(length(max = 500))]
    pub background: Option<String>,
    #[serde(default)]
    pub reference_images: Vec<ReferenceImage>,
}

impl GenerationRequest {
    pub fn check(&self) -> Result<(), RequestError> {
        self.validate()?;

        if !self.is_variation() && self.prompt.trim().is_empty() {
            return Err(RequestError::MissingInput);
        }

        let max = self.model.max_images();
        if self.number_of_images > max {
            return Err(RequestError::TooManyImages {
                model: self.model,
                max,
            });
        }

        self.check_references()
    }

    fn check_references(&self) -> Result<(), RequestError> {
        let invalid = |reason: &'static str| {
            Err(RequestError::InvalidReferences {
                mode: self.mode,
                reason,
            })
        };
        let count = |role: ReferenceRole| {
            self.reference_images
                .iter()
                .filter(|r| r.role == role)
                .count()
        };

        match self.mode {
            GenerationMode::Standard => {
                if self.reference_images.iter().any(|r| r.role != ReferenceRole::Content) {
                    return invalid("only content images are accepted");
                }
            }
            GenerationMode::Portrait => {
                if !self.model.supports_image_input() {
                    return Err(RequestError::ModelLacksImageInput {
                        mode: self.mode,
                        model: self.model,
                    });
                }
                if count(ReferenceRole::Face) != 1 {
                    return invalid("exactly one face image is required");
                }
                if count(ReferenceRole::Clothing) > 1 || count(ReferenceRole::Background) > 1 {
                    return invalid("at most one clothing and one background image");
                }
                if count(ReferenceRole::Content) + count(ReferenceRole::Format) > 0 {
                    return invalid("only face, clothing and background images are accepted");
                }
            }
            GenerationMode::Face => {
                if count(ReferenceRole::Format) != self.reference_images.len() {
                    return invalid("only a format template is accepted");
                }
                if self.reference_images.len() > 1 {
                    return invalid("at most one format template");
                }
            }
        }
        Ok(())
    }

    /// A standard request that reworks an uploaded image.
    pub fn is_variation(&self) -> bool {
        self.mode == GenerationMode::Standard
            && !self.reference_images.is_empty()
            && self.model.supports_image_input()
    }

    /// Images sent to the model with the prompt, in the order the prompt
    /// refers to them.
    pub fn outgoing_references(&self) -> Vec<ReferenceImage> {
        let with_role = |role: ReferenceRole| {
            self.reference_images
                .iter()
                .filter(move |r| r.role == role)
                .cloned()
        };
        match self.mode {
            GenerationMode::Standard if self.is_variation() => self.reference_images.clone(),
            GenerationMode::Standard => Vec::new(),
            GenerationMode::Portrait => with_role(ReferenceRole::Face)
                .chain(with_role(ReferenceRole::Clothing))
                .chain(with_role(ReferenceRole::Background))
                .collect(),
            GenerationMode::Face if self.model.supports_image_input() => {
                with_role(ReferenceRole::Format).collect()
            }
            GenerationMode::Face => Vec::new(),
        }
    }

    /// Prompt recorded on the generated images.
    pub fn display_prompt(&self) -> String {
        if self.prompt.trim().is_empty() {
            format!(
                "Variation of uploaded image (Strength: {})",
                self.strength()
            )
        } else {
            self.prompt.clone()
        }
    }

    /// Full text sent to the remote model.
    pub fn remote_prompt(&self) -> String {
        match self.mode {
            GenerationMode::Standard => self.standard_prompt(),
            GenerationMode::Portrait => self.prompt.trim().to_string(),
            GenerationMode::Face => {
                if self.outgoing_references().is_empty() {
                    self.prompt.trim().to_string()
                } else {
                    format!(
                        "{} The user's prompt is: \"{}\".",
                        FORMAT_TEMPLATE_PROMPT,
                        self.prompt.trim()
                    )
                }
            }
        }
    }

    fn standard_prompt(&self) -> String {
        let details = self.detail_sentences();

        if self.is_variation() {
            let text_part = if self.prompt.trim().is_empty() {
                "Use your creative judgment to interpret the image.".to_string()
            } else {
                format!("Text prompt: \"{}\".", self.prompt.trim())
            };
            let instructions = format!(
                "{}{} {} {}",
                text_part,
                details,
                VARIATION_BASE_PROMPT,
                variation_phrase(self.strength())
            );
            return format!(
                "Use the provided image as the main content reference. Follow these instructions to create a new, modified image: \"{}\"",
                instructions
            );
        }

        match self.model {
            ImageModel::Imagen4 => {
                let subject = format!("{}{}", self.prompt.trim(), details);
                format!(
                    "{}. 8k, ultra high detail, photorealistic, aim for a high resolution around {} pixels.",
                    subject.trim_end_matches('.'),
                    self.resolution
                )
            }
            ImageModel::GeminiFlashImage => format!(
                "Your output MUST use a {} aspect ratio. The user's prompt is: \"{}{}\". The image should be 8k, ultra high detail, photorealistic.",
                self.aspect_ratio,
                self.prompt.trim(),
                details
            ),
        }
    }

    fn strength(&self) -> u8 {
        self.variation_strength.unwrap_or(DEFAULT_VARIATION_STRENGTH)
    }

    fn detail_sentences(&self) -> String {
        let mut out = String::new();
        let parts = [
            ("Shot type", &self.shot_type),
            ("Clothing", &self.clothing),
            ("Background", &self.background),
        ];
        for (label, value) in parts {
            if let Some(v) = value.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
                out.push_str(&format!(" {}: {}.", label, v));
            }
        }
        out
    }
}

/// Phrase describing how far a variation may drift from its reference.
pub fn variation_phrase(strength: u8) -> &'static str {
    let index = usize::from(strength.clamp(1, 10)) - 1;
    VARIATION_STRENGTH_PHRASES[index]
}

/// Transient result slot of a generation batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "server", derive(utoipa::ToSchema))]
pub struct GeneratedImage {
    pub id: String,
    pub prompt: String,
    pub status: GenerationStatus,
    /// Data URL of the image once generated.
    pub data: Option<String>,
    pub resolution: ResolutionOption,
}

impl GeneratedImage {
    pub fn pending(id: String, prompt: String, resolution: ResolutionOption) -> Self {
        Self {
            id,
            prompt,
            status: GenerationStatus::Pending,
            data: None,
            resolution,
        }
    }

    pub fn succeed(&mut self, data: String) {
        self.status = GenerationStatus::Success;
        self.data = Some(data);
    }

    pub fn fail(&mut self) {
        self.status = GenerationStatus::Error;
        self.data = None;
    }
}
