//! [`GenerationClient`] over the Gemini REST API.
//!
//! Every capability is a single `generateContent` call. Structured outputs
//! (quiz, slide) request a JSON response schema and are validated here before
//! anything reaches the quiz engine.

use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{header::HeaderValue, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::attachment::Attachment;
use crate::config::GenerationSettings;
use crate::error::{GenerationErrorKind, HubError, Result};
use crate::generation::{validate_quiz_payload, GenerationClient, RawQuizPayload, SlideContent};
use crate::persona::BotPersona;
use crate::quiz::{QuizQuestion, OPTION_COUNT, QUIZ_LENGTH};

/// Reply used when the model answers with no text at all.
pub const EMPTY_REPLY: &str = "Smahni, ma lqitich el kelmet el mnesba tawa.";

static CODE_FENCE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?s)^\s*```[a-zA-Z]*\s*(.*?)\s*```\s*$").ok());

/// Gemini REST client.
#[derive(Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    api_key: Option<String>,
    settings: GenerationSettings,
    quiz_attempts: u32,
}

impl std::fmt::Debug for GeminiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiClient")
            .field("has_api_key", &self.api_key.is_some())
            .field("settings", &self.settings)
            .field("quiz_attempts", &self.quiz_attempts)
            .finish_non_exhaustive()
    }
}

impl GeminiClient {
    /// Creates a client.
    ///
    /// A missing `api_key` is allowed: every call then fails with a
    /// `MissingCredential` generation error.
    ///
    /// # Errors
    ///
    /// Returns a generation error if the HTTP client cannot be built.
    pub fn new(
        settings: GenerationSettings,
        api_key: Option<String>,
        quiz_attempts: u32,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()
            .map_err(|e| {
                HubError::generation(
                    GenerationErrorKind::Other,
                    format!("failed to build HTTP client: {e}"),
                )
            })?;

        if api_key.is_none() {
            tracing::warn!("No API key configured; generation requests will fail");
        }

        Ok(Self {
            http,
            api_key,
            settings,
            quiz_attempts: quiz_attempts.max(1),
        })
    }

    /// Returns `true` if an API key is configured.
    #[must_use]
    pub const fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    async fn send(&self, model: &str, body: &GenerateContentRequest) -> Result<GenerateContentResponse> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            HubError::generation(GenerationErrorKind::MissingCredential, "no API key configured")
        })?;

        let url = format!(
            "{base}/{model}:generateContent",
            base = self.settings.base_url.trim_end_matches('/'),
        );

        tracing::debug!(model, "Sending generateContent request");

        let response = self
            .http
            .post(url)
            .query(&[("key", api_key)])
            .json(body)
            .send()
            .await
            .map_err(|e| {
                let kind = if e.is_connect() || e.is_timeout() {
                    GenerationErrorKind::Network
                } else {
                    GenerationErrorKind::Other
                };
                HubError::generation(kind, format!("request failed: {e}"))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let retry_after = parse_retry_after(response.headers().get("retry-after"));
            let body_text = response
                .text()
                .await
                .unwrap_or_else(|_| "failed to read error body".to_string());
            return Err(map_http_error(status, &body_text, retry_after));
        }

        response
            .json()
            .await
            .map_err(|e| HubError::malformed(format!("failed to parse response: {e}")))
    }

    async fn request_quiz(&self, topic: &str) -> Result<Vec<QuizQuestion>> {
        let request = GenerateContentRequest {
            contents: vec![Content::user(vec![Part::text(quiz_prompt(topic))])],
            system_instruction: None,
            generation_config: Some(GenerationConfig {
                response_mime_type: Some("application/json".to_string()),
                response_schema: Some(quiz_schema()),
                ..GenerationConfig::default()
            }),
        };

        let response = self.send(&self.settings.quiz_model, &request).await?;
        let text = response
            .text()
            .ok_or_else(|| HubError::malformed("quiz response had no text"))?;
        let payload: RawQuizPayload = serde_json::from_str(strip_code_fence(&text))
            .map_err(|e| HubError::malformed(format!("quiz payload is not valid JSON: {e}")))?;
        validate_quiz_payload(payload.questions)
    }

    async fn request_slide(&self, text: &str) -> Result<SlideContent> {
        let context = truncate_chars(text, self.settings.slide_context_chars);
        let request = GenerateContentRequest {
            contents: vec![Content::user(vec![Part::text(format!(
                "Extract a short, catchy title in Tunisian Arabic and 3 to 4 key bullet points \
                 for a professional academic presentation slide from this content. Return JSON.\n\
                 Content: {context}"
            ))])],
            system_instruction: None,
            generation_config: Some(GenerationConfig {
                response_mime_type: Some("application/json".to_string()),
                response_schema: Some(slide_schema()),
                ..GenerationConfig::default()
            }),
        };

        let response = self.send(&self.settings.extraction_model, &request).await?;
        let body = response
            .text()
            .ok_or_else(|| HubError::malformed("slide response had no text"))?;
        let slide: SlideContent = serde_json::from_str(strip_code_fence(&body))
            .map_err(|e| HubError::malformed(format!("slide payload is not valid JSON: {e}")))?;
        slide
            .validated()
            .ok_or_else(|| HubError::malformed("slide needs a title and 3-4 points"))
    }
}

#[async_trait]
impl GenerationClient for GeminiClient {
    async fn generate_text(
        &self,
        persona: &BotPersona,
        prompt: &str,
        attachment: Option<&Attachment>,
    ) -> Result<String> {
        let mut parts = Vec::with_capacity(2);
        if let Some(attachment) = attachment {
            parts.push(Part::inline(&attachment.mime_type, attachment.to_base64()));
        }
        parts.push(Part::text(prompt));

        let request = GenerateContentRequest {
            contents: vec![Content::user(parts)],
            system_instruction: Some(Content::system(persona.system_prompt)),
            generation_config: Some(GenerationConfig {
                temperature: Some(self.settings.temperature),
                ..GenerationConfig::default()
            }),
        };

        let response = self.send(persona.model, &request).await?;
        Ok(response
            .text()
            .filter(|text| !text.trim().is_empty())
            .unwrap_or_else(|| EMPTY_REPLY.to_string()))
    }

    async fn generate_quiz(&self, topic: &str) -> Result<Vec<QuizQuestion>> {
        let mut attempt = 1;
        loop {
            match self.request_quiz(topic).await {
                Ok(questions) => return Ok(questions),
                Err(e) if e.is_transient() && attempt < self.quiz_attempts => {
                    let delay = e.retry_after().unwrap_or_else(|| self.settings.retry_backoff());
                    tracing::warn!(
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %e,
                        "Quiz generation failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn extract_slide_content(&self, text: &str) -> SlideContent {
        match self.request_slide(text).await {
            Ok(slide) => slide,
            Err(e) => {
                tracing::warn!(error = %e, "Slide extraction failed, using fallback content");
                SlideContent::fallback()
            }
        }
    }

    async fn generate_image(&self, prompt: &str) -> Result<Option<String>> {
        let request = GenerateContentRequest {
            contents: vec![Content::user(vec![Part::text(image_prompt(prompt))])],
            system_instruction: None,
            generation_config: Some(GenerationConfig {
                image_config: Some(ImageConfig {
                    aspect_ratio: self.settings.image_aspect_ratio.clone(),
                }),
                ..GenerationConfig::default()
            }),
        };

        let response = self.send(&self.settings.image_model, &request).await?;
        Ok(response.first_image_data_url())
    }
}

// ============================================================================
// Prompts and schemas
// ============================================================================

fn quiz_prompt(topic: &str) -> String {
    format!(
        "Generate a professional interactive multiple-choice quiz about: {topic}.\n\
         Provide exactly {QUIZ_LENGTH} high-quality questions, each with exactly {OPTION_COUNT} options.\n\
         Keep technical terms such as \"Logic Gates\", \"Pointers\" or \"Subnetting\" in English.\n\
         Write the questions and explanations in Tunisian Arabic (Derja) with a professional tone.\n\
         Return JSON."
    )
}

fn quiz_schema() -> serde_json::Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "questions": {
                "type": "ARRAY",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "question": { "type": "STRING" },
                        "options": {
                            "type": "ARRAY",
                            "items": { "type": "STRING" },
                            "minItems": OPTION_COUNT,
                            "maxItems": OPTION_COUNT
                        },
                        "correctAnswerIndex": { "type": "INTEGER" },
                        "explanation": { "type": "STRING" }
                    },
                    "required": ["question", "options", "correctAnswerIndex", "explanation"]
                }
            }
        },
        "required": ["questions"]
    })
}

fn slide_schema() -> serde_json::Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "title": { "type": "STRING" },
            "points": { "type": "ARRAY", "items": { "type": "STRING" } }
        },
        "required": ["title", "points"]
    })
}

fn image_prompt(context: &str) -> String {
    format!(
        "STRICTLY NO TEXT. NO LETTERS. NO NUMBERS. BACKGROUND ONLY.\n\
         A high-quality, cinematic academic background for a university setting.\n\
         Context: {context}.\n\
         Style: photorealistic, modern library or workspace, Mediterranean lighting, soft depth of field.\n\
         MANDATORY: the image must be completely empty of any text, typography, or written symbols."
    )
}

/// Removes a surrounding Markdown code fence, if any.
fn strip_code_fence(text: &str) -> &str {
    CODE_FENCE
        .as_ref()
        .and_then(|re| re.captures(text))
        .and_then(|caps| caps.get(1))
        .map_or_else(|| text.trim(), |m| m.as_str())
}

/// Returns at most `max` characters of `text`, cut on a char boundary.
fn truncate_chars(text: &str, max: usize) -> &str {
    text.char_indices()
        .nth(max)
        .map_or(text, |(idx, _)| &text[..idx])
}

// ============================================================================
// Error mapping
// ============================================================================

fn map_http_error(status: StatusCode, body: &str, retry_after: Option<Duration>) -> HubError {
    let message = serde_json::from_str::<ErrorWrapper>(body)
        .map(|wrapper| {
            let status_text = wrapper.error.status.unwrap_or_default();
            let msg = wrapper.error.message.unwrap_or_else(|| body.to_string());
            if status_text.is_empty() {
                msg
            } else {
                format!("{status_text}: {msg}")
            }
        })
        .unwrap_or_else(|_| body.to_string());

    let kind = match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => GenerationErrorKind::Authentication,
        StatusCode::TOO_MANY_REQUESTS => GenerationErrorKind::RateLimit,
        s if s.is_server_error() => GenerationErrorKind::Server,
        _ => GenerationErrorKind::Other,
    };

    let message = match retry_after {
        Some(delay) => format!("HTTP {}: {message} (retry after {}s)", status.as_u16(), delay.as_secs()),
        None => format!("HTTP {}: {message}", status.as_u16()),
    };

    HubError::generation(kind, message).with_retry_after(retry_after)
}

fn parse_retry_after(header: Option<&HeaderValue>) -> Option<Duration> {
    let value = header?.to_str().ok()?;
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<Part>,
}

impl Content {
    const fn user(parts: Vec<Part>) -> Self {
        Self {
            role: Some("user"),
            parts,
        }
    }

    fn system(text: &str) -> Self {
        Self {
            role: None,
            parts: vec![Part::text(text)],
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
}

impl Part {
    fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    fn inline(mime_type: &str, data: String) -> Self {
        Self::InlineData {
            inline_data: InlineData {
                mime_type: mime_type.to_string(),
                data,
            },
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    #[serde(default)]
    mime_type: String,
    data: String,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_schema: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_config: Option<ImageConfig>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ImageConfig {
    aspect_ratio: String,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    candidates: Option<Vec<Candidate>>,
}

impl GenerateContentResponse {
    fn first_parts(&self) -> &[PartResponse] {
        self.candidates
            .as_ref()
            .and_then(|candidates| candidates.first())
            .and_then(|candidate| candidate.content.as_ref())
            .map_or(&[], |content| content.parts.as_slice())
    }

    /// Concatenated text of the first candidate.
    fn text(&self) -> Option<String> {
        let text: String = self
            .first_parts()
            .iter()
            .filter_map(|part| part.text.as_deref())
            .collect();
        (!text.is_empty()).then_some(text)
    }

    /// First inline image of the first candidate, as a `data:` URL.
    fn first_image_data_url(&self) -> Option<String> {
        self.first_parts()
            .iter()
            .find_map(|part| part.inline_data.as_ref())
            .map(|inline| {
                let mime = if inline.mime_type.is_empty() {
                    "image/png"
                } else {
                    inline.mime_type.as_str()
                };
                format!("data:{mime};base64,{}", inline.data)
            })
    }
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<ContentResponse>,
}

#[derive(Debug, Deserialize)]
struct ContentResponse {
    #[serde(default)]
    parts: Vec<PartResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PartResponse {
    text: Option<String>,
    inline_data: Option<InlineData>,
}

#[derive(Deserialize)]
struct ErrorWrapper {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
    status: Option<String>,
}
