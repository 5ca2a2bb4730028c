//! Configuration for StudyHub.
//!
//! Settings come from an optional `studyhub.json`; every field has a default
//! so an absent file is a valid setup. The API credential is never part of
//! the file and is read from the environment instead.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{HubError, Result};
use crate::persona::PersonaId;

/// The default config file name.
const CONFIG_FILE_NAME: &str = "studyhub.json";

/// Environment variables checked for the API credential, in order.
pub const API_KEY_VARS: [&str; 2] = ["API_KEY", "GEMINI_API_KEY"];

/// Default locked-in interval between answering and advancing.
const fn default_feedback_delay_ms() -> u64 {
    1800
}

/// Default celebration duration in seconds.
const fn default_celebration_secs() -> u64 {
    5
}

/// Default minimum percentage that triggers the celebration.
const fn default_celebration_threshold() -> u32 {
    80
}

/// Default number of quiz generation attempts.
const fn default_generation_attempts() -> u32 {
    2
}

fn default_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta/models".to_string()
}

fn default_quiz_model() -> String {
    "gemini-3-flash-preview".to_string()
}

fn default_extraction_model() -> String {
    "gemini-3-flash-preview".to_string()
}

fn default_image_model() -> String {
    "gemini-2.5-flash-image".to_string()
}

const fn default_temperature() -> f32 {
    0.7
}

const fn default_request_timeout() -> u64 {
    60
}

const fn default_slide_context_chars() -> usize {
    1000
}

const fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_aspect_ratio() -> String {
    "16:9".to_string()
}

/// Main configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Persona active when the hub starts.
    #[serde(default)]
    pub default_persona: PersonaId,

    /// Quiz timing and scoring settings.
    #[serde(default)]
    pub quiz: QuizSettings,

    /// Generation API settings.
    #[serde(default)]
    pub generation: GenerationSettings,
}

/// Quiz timing and scoring settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizSettings {
    /// How long an answer stays locked in before the quiz advances.
    #[serde(default = "default_feedback_delay_ms")]
    pub feedback_delay_ms: u64,

    /// How long the celebration lasts once triggered.
    #[serde(default = "default_celebration_secs")]
    pub celebration_secs: u64,

    /// Final percentage (inclusive) at which the celebration fires.
    #[serde(default = "default_celebration_threshold")]
    pub celebration_threshold: u32,

    /// Attempts made to obtain a well-formed question set.
    #[serde(default = "default_generation_attempts")]
    pub generation_attempts: u32,
}

impl Default for QuizSettings {
    fn default() -> Self {
        Self {
            feedback_delay_ms: default_feedback_delay_ms(),
            celebration_secs: default_celebration_secs(),
            celebration_threshold: default_celebration_threshold(),
            generation_attempts: default_generation_attempts(),
        }
    }
}

impl QuizSettings {
    /// The locked-in interval as a [`std::time::Duration`].
    #[must_use]
    pub const fn feedback_delay(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.feedback_delay_ms)
    }

    /// The celebration length as a [`std::time::Duration`].
    #[must_use]
    pub const fn celebration(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.celebration_secs)
    }
}

/// Generation API settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationSettings {
    /// Base URL of the models endpoint.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Model used to generate quiz questions.
    #[serde(default = "default_quiz_model")]
    pub quiz_model: String,

    /// Model used to extract slide content.
    #[serde(default = "default_extraction_model")]
    pub extraction_model: String,

    /// Model used to generate images.
    #[serde(default = "default_image_model")]
    pub image_model: String,

    /// Sampling temperature for chat replies.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Per-request timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Characters of context handed to slide extraction.
    #[serde(default = "default_slide_context_chars")]
    pub slide_context_chars: usize,

    /// Aspect ratio requested for generated images.
    #[serde(default = "default_aspect_ratio")]
    pub image_aspect_ratio: String,

    /// Pause before retrying a transient failure when the server gives no
    /// `Retry-After`.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            quiz_model: default_quiz_model(),
            extraction_model: default_extraction_model(),
            image_model: default_image_model(),
            temperature: default_temperature(),
            request_timeout_secs: default_request_timeout(),
            slide_context_chars: default_slide_context_chars(),
            image_aspect_ratio: default_aspect_ratio(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl GenerationSettings {
    /// The retry backoff as a [`std::time::Duration`].
    #[must_use]
    pub const fn retry_backoff(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.retry_backoff_ms)
    }
}

impl Config {
    /// Loads configuration from the current working directory.
    ///
    /// # Errors
    ///
    /// Returns an error if `studyhub.json` exists but is invalid.
    pub fn load() -> Result<Self> {
        let current_dir = std::env::current_dir().map_err(|e| {
            HubError::config_parse(
                "<current directory>",
                format!("cannot determine current directory: {e}"),
            )
        })?;
        Self::load_from_dir(&current_dir)
    }

    /// Loads `studyhub.json` from a specific directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but is invalid.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        Self::load_from_file(&dir.join(CONFIG_FILE_NAME))
    }

    /// Loads configuration from a specific file path.
    ///
    /// A missing file yields the default configuration.
    ///
    /// # Errors
    ///
    /// Returns `HubError::ConfigParseError` if the file cannot be read or is
    /// not valid JSON, and `HubError::ConfigValidationError` if a value is out
    /// of range.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = Self::default();
                config.validate()?;
                return Ok(config);
            }
            Err(e) => {
                return Err(HubError::config_parse(
                    path,
                    format!("failed to read file: {e}"),
                ));
            }
        };

        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| HubError::config_parse(path, e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `HubError::ConfigValidationError` if any check fails.
    pub fn validate(&self) -> Result<()> {
        if self.quiz.celebration_threshold > 100 {
            return Err(HubError::config_validation(
                "quiz.celebrationThreshold must be between 0 and 100",
                "Set quiz.celebrationThreshold to a percentage such as 80 in your studyhub.json",
            ));
        }

        if self.quiz.generation_attempts == 0 {
            return Err(HubError::config_validation(
                "quiz.generationAttempts must be greater than 0",
                "Set quiz.generationAttempts to at least 1 in your studyhub.json",
            ));
        }

        let generation = &self.generation;
        if generation.base_url.trim().is_empty() {
            return Err(HubError::config_validation(
                "generation.baseUrl must not be empty",
                "Remove generation.baseUrl from your studyhub.json to use the default endpoint",
            ));
        }

        for (field, model) in [
            ("quizModel", &generation.quiz_model),
            ("extractionModel", &generation.extraction_model),
            ("imageModel", &generation.image_model),
        ] {
            if model.trim().is_empty() {
                return Err(HubError::config_validation(
                    format!("generation.{field} must not be empty"),
                    format!("Provide a model name for generation.{field} in your studyhub.json"),
                ));
            }
        }

        if !(0.0..=2.0).contains(&generation.temperature) {
            return Err(HubError::config_validation(
                "generation.temperature must be between 0.0 and 2.0",
                "Set generation.temperature to a value such as 0.7 in your studyhub.json",
            ));
        }

        if generation.request_timeout_secs == 0 {
            return Err(HubError::config_validation(
                "generation.requestTimeoutSecs must be greater than 0",
                "Set generation.requestTimeoutSecs to at least 1 second in your studyhub.json",
            ));
        }

        if generation.slide_context_chars == 0 {
            return Err(HubError::config_validation(
                "generation.slideContextChars must be greater than 0",
                "Set generation.slideContextChars to a value such as 1000 in your studyhub.json",
            ));
        }

        Ok(())
    }
}

/// Reads the API credential from the process environment.
///
/// `API_KEY` wins over `GEMINI_API_KEY`; blank values are ignored.
#[must_use]
pub fn api_key_from_env() -> Option<String> {
    resolve_api_key(|name| std::env::var(name).ok())
}

fn resolve_api_key(lookup: impl Fn(&str) -> Option<String>) -> Option<String> {
    API_KEY_VARS
        .iter()
        .filter_map(|name| lookup(name))
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
}
