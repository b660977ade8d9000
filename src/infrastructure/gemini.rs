use crate::domain::{AspectRatio, ImageModel, ReferenceImage};
use crate::infrastructure::Retriable;
use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error};

const API_KEY_HEADER: &str = "x-goog-api-key";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GenerationError {
    #[error("Rate limited: {0}")]
    RateLimited(String),
    #[error("Empty or invalid response: {0}")]
    EmptyResponse(String),
    #[error("Rejected by safety filters: {0}")]
    SafetyRejected(String),
    #[error("API request failed: {0}")]
    RequestFailed(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("No API key available for image generation")]
    MissingApiKey,
}

impl Retriable for GenerationError {
    fn is_retriable(&self) -> bool {
        matches!(
            self,
            GenerationError::RateLimited(_) | GenerationError::EmptyResponse(_)
        )
    }
}

/// One remote call. Gemini models return one image per call, Imagen up to
/// `number_of_images`.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationCall {
    pub model: ImageModel,
    pub prompt: String,
    pub aspect_ratio: AspectRatio,
    pub number_of_images: u32,
    pub reference_images: Vec<ReferenceImage>,
    /// Per-user key; the client falls back to its configured default.
    pub api_key: Option<String>,
}

/// Hosted image model. Returns images as data URLs.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate(&self, call: &GenerationCall) -> Result<Vec<String>, GenerationError>;
}

pub struct GeminiClient {
    client: Client,
    base_url: String,
    default_api_key: Option<String>,
}

impl GeminiClient {
    pub fn new(
        base_url: String,
        default_api_key: Option<String>,
        request_timeout: Duration,
    ) -> Result<Self, GenerationError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(request_timeout)
            .connect_timeout(Duration::from_secs(10))
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| {
                GenerationError::InvalidConfig(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            default_api_key: default_api_key.filter(|k| !k.trim().is_empty()),
        })
    }

    fn api_key<'a>(&'a self, call: &'a GenerationCall) -> Result<&'a str, GenerationError> {
        call.api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .or(self.default_api_key.as_deref())
            .ok_or(GenerationError::MissingApiKey)
    }

    async fn post(&self, url: &str, api_key: &str, body: &Value) -> Result<Value, GenerationError> {
        let response = self
            .client
            .post(url)
            .header(API_KEY_HEADER, api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| GenerationError::RequestFailed(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| GenerationError::RequestFailed(e.to_string()))?;

        if !status.is_success() {
            return Err(classify_http_failure(status, &text));
        }

        serde_json::from_str(&text).map_err(|e| {
            GenerationError::EmptyResponse(format!("Unparseable response body: {}", e))
        })
    }
}

#[async_trait]
impl ImageGenerator for GeminiClient {
    async fn generate(&self, call: &GenerationCall) -> Result<Vec<String>, GenerationError> {
        let api_key = self.api_key(call)?;

        let result = if call.model.generates_batch_per_call() {
            let url = format!("{}/models/{}:predict", self.base_url, call.model);
            let body = self.post(&url, api_key, &predict_body(call)).await?;
            parse_predict(&body)
        } else {
            let url = format!("{}/models/{}:generateContent", self.base_url, call.model);
            let body = self.post(&url, api_key, &generate_content_body(call)).await?;
            parse_generate_content(&body).map(|image| vec![image])
        };

        match &result {
            Ok(images) => debug!(model = %call.model, images = images.len(), "Generation call succeeded"),
            Err(e) => error!(model = %call.model, error = %e, "Generation call failed"),
        }
        result
    }
}

pub fn generate_content_body(call: &GenerationCall) -> Value {
    let mut parts: Vec<Value> = call
        .reference_images
        .iter()
        .map(|image| {
            json!({
                "inlineData": { "mimeType": image.mime_type, "data": image.data }
            })
        })
        .collect();
    parts.push(json!({ "text": call.prompt }));

    json!({
        "contents": [{ "parts": parts }],
        "generationConfig": {
            "responseModalities": ["IMAGE"],
            "imageConfig": { "aspectRatio": call.aspect_ratio.to_string() }
        }
    })
}

pub fn predict_body(call: &GenerationCall) -> Value {
    json!({
        "instances": [{ "prompt": call.prompt }],
        "parameters": {
            "sampleCount": call.number_of_images,
            "aspectRatio": call.aspect_ratio.to_string(),
            "outputOptions": { "mimeType": "image/png" }
        }
    })
}

pub fn classify_http_failure(status: StatusCode, body: &str) -> GenerationError {
    if status == StatusCode::TOO_MANY_REQUESTS || body.contains("RESOURCE_EXHAUSTED") {
        return GenerationError::RateLimited(format!("HTTP {}", status.as_u16()));
    }
    GenerationError::RequestFailed(format!("HTTP {}: {}", status.as_u16(), truncate(body, 300)))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Content {
    parts: Option<Vec<Part>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

fn is_safety_reason(reason: &str) -> bool {
    matches!(
        reason,
        "SAFETY" | "PROHIBITED_CONTENT" | "BLOCKLIST" | "SPII" | "IMAGE_SAFETY"
    )
}

/// First inline image of the first candidate, as a data URL.
pub fn parse_generate_content(body: &Value) -> Result<String, GenerationError> {
    let response: GenerateContentResponse = serde_json::from_value(body.clone())
        .map_err(|e| GenerationError::EmptyResponse(format!("Unexpected response shape: {}", e)))?;

    if let Some(reason) = response
        .prompt_feedback
        .as_ref()
        .and_then(|f| f.block_reason.as_deref())
    {
        return Err(GenerationError::SafetyRejected(format!(
            "Prompt blocked: {}",
            reason
        )));
    }

    let Some(candidate) = response.candidates.into_iter().next() else {
        return Err(GenerationError::EmptyResponse("No candidates".to_string()));
    };

    let finish_reason = candidate.finish_reason.unwrap_or_default();
    if is_safety_reason(&finish_reason) {
        return Err(GenerationError::SafetyRejected(format!(
            "Finish reason: {}",
            finish_reason
        )));
    }

    let image = candidate
        .content
        .and_then(|c| c.parts)
        .unwrap_or_default()
        .into_iter()
        .find_map(|p| p.inline_data);

    match image {
        Some(data) => Ok(format!("data:{};base64,{}", data.mime_type, data.data)),
        None if finish_reason.is_empty() => Err(GenerationError::EmptyResponse(
            "No image data in response parts".to_string(),
        )),
        None => Err(GenerationError::EmptyResponse(format!(
            "No image data. Finish reason: {}",
            finish_reason
        ))),
    }
}

#[derive(Debug, Default, Deserialize)]
struct PredictResponse {
    #[serde(default)]
    predictions: Vec<Prediction>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Prediction {
    bytes_base64_encoded: Option<String>,
    mime_type: Option<String>,
    rai_filtered_reason: Option<String>,
}

pub fn parse_predict(body: &Value) -> Result<Vec<String>, GenerationError> {
    let response: PredictResponse = serde_json::from_value(body.clone())
        .map_err(|e| GenerationError::EmptyResponse(format!("Unexpected response shape: {}", e)))?;

    let mut images = Vec::new();
    let mut filtered = None;
    for prediction in response.predictions {
        match prediction.bytes_base64_encoded {
            Some(bytes) if !bytes.is_empty() => images.push(format!(
                "data:{};base64,{}",
                prediction.mime_type.as_deref().unwrap_or("image/png"),
                bytes
            )),
            _ => {
                if let Some(reason) = prediction.rai_filtered_reason {
                    filtered = Some(reason);
                }
            }
        }
    }

    if !images.is_empty() {
        return Ok(images);
    }
    match filtered {
        Some(reason) => Err(GenerationError::SafetyRejected(reason)),
        None => Err(GenerationError::EmptyResponse(
            "No images were generated".to_string(),
        )),
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ReferenceRole;

    fn call(model: ImageModel) -> GenerationCall {
        GenerationCall {
            model,
            prompt: "a red fox".to_string(),
            aspect_ratio: AspectRatio::Portrait,
            number_of_images: 3,
            reference_images: vec![ReferenceImage::new(
                "image/jpeg",
                "QUJD",
                ReferenceRole::Content,
            )],
            api_key: None,
        }
    }

    #[test]
    fn rate_limit_signals_are_retriable() {
        let err = classify_http_failure(StatusCode::TOO_MANY_REQUESTS, "");
        assert!(matches!(err, GenerationError::RateLimited(_)));
        assert!(err.is_retriable());

        let err = classify_http_failure(
            StatusCode::BAD_REQUEST,
            r#"{"error":{"status":"RESOURCE_EXHAUSTED"}}"#,
        );
        assert!(err.is_retriable());

        let err = classify_http_failure(StatusCode::FORBIDDEN, "denied");
        assert!(matches!(err, GenerationError::RequestFailed(_)));
        assert!(!err.is_retriable());
    }

    #[test]
    fn inline_image_becomes_data_url() {
        let body = json!({
            "candidates": [{
                "content": { "parts": [
                    { "text": "here you go" },
                    { "inlineData": { "mimeType": "image/png", "data": "iVBOR" } }
                ]},
                "finishReason": "STOP"
            }]
        });
        assert_eq!(
            parse_generate_content(&body).unwrap(),
            "data:image/png;base64,iVBOR"
        );
    }

    #[test]
    fn missing_parts_are_transient_unless_safety() {
        let empty = json!({ "candidates": [{ "finishReason": "IMAGE_OTHER" }] });
        let err = parse_generate_content(&empty).unwrap_err();
        assert!(matches!(err, GenerationError::EmptyResponse(_)));
        assert!(err.is_retriable());

        let no_candidates = json!({});
        assert!(parse_generate_content(&no_candidates).unwrap_err().is_retriable());

        let safety = json!({ "candidates": [{ "finishReason": "SAFETY" }] });
        let err = parse_generate_content(&safety).unwrap_err();
        assert!(matches!(err, GenerationError::SafetyRejected(_)));
        assert!(!err.is_retriable());

        let blocked = json!({ "promptFeedback": { "blockReason": "OTHER" } });
        assert!(matches!(
            parse_generate_content(&blocked),
            Err(GenerationError::SafetyRejected(_))
        ));
    }

    #[test]
    fn predict_response_yields_every_image() {
        let body = json!({
            "predictions": [
                { "bytesBase64Encoded": "AAA", "mimeType": "image/png" },
                { "bytesBase64Encoded": "BBB" }
            ]
        });
        assert_eq!(
            parse_predict(&body).unwrap(),
            vec!["data:image/png;base64,AAA", "data:image/png;base64,BBB"]
        );

        let filtered = json!({ "predictions": [{ "raiFilteredReason": "filtered" }] });
        assert!(matches!(
            parse_predict(&filtered),
            Err(GenerationError::SafetyRejected(_))
        ));
        assert!(parse_predict(&json!({})).unwrap_err().is_retriable());
    }

    #[test]
    fn request_bodies_carry_images_and_ratio() {
        let body = generate_content_body(&call(ImageModel::GeminiFlashImage));
        let parts = body["contents"][0]["parts"].as_array().unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0]["inlineData"]["mimeType"], "image/jpeg");
        assert_eq!(parts[1]["text"], "a red fox");
        assert_eq!(body["generationConfig"]["imageConfig"]["aspectRatio"], "9:16");

        let body = predict_body(&call(ImageModel::Imagen4));
        assert_eq!(body["parameters"]["sampleCount"], 3);
        assert_eq!(body["instances"][0]["prompt"], "a red fox");
    }

    #[test]
    fn portrait_body_keeps_every_image_before_the_text() {
        let mut portrait = call(ImageModel::GeminiFlashImage);
        portrait.reference_images = vec![
            ReferenceImage::new("image/jpeg", "FACE", ReferenceRole::Face),
            ReferenceImage::new("image/png", "COAT", ReferenceRole::Clothing),
            ReferenceImage::new("image/png", "ROOM", ReferenceRole::Background),
        ];
        let body = generate_content_body(&portrait);
        let parts = body["contents"][0]["parts"].as_array().unwrap();
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[0]["inlineData"]["data"], "FACE");
        assert_eq!(parts[2]["inlineData"]["data"], "ROOM");
        assert_eq!(parts[3]["text"], "a red fox");
    }

    #[test]
    fn falls_back_to_default_key() {
        let client = GeminiClient::new(
            "http://localhost/v1beta/".to_string(),
            Some("server-key".to_string()),
            Duration::from_secs(5),
        )
        .unwrap();
        let mut c = call(ImageModel::GeminiFlashImage);
        assert_eq!(client.api_key(&c).unwrap(), "server-key");

        c.api_key = Some("user-key".to_string());
        assert_eq!(client.api_key(&c).unwrap(), "user-key");

        let keyless =
            GeminiClient::new("http://localhost".to_string(), None, Duration::from_secs(5))
                .unwrap();
        c.api_key = Some("  ".to_string());
        assert_eq!(keyless.api_key(&c), Err(GenerationError::MissingApiKey));
    }
}
