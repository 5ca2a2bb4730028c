//! The generation capability.
//!
//! [`GenerationClient`] is the only boundary to the remote model. Text and
//! quiz generation fail with [`HubError::Generation`]; slide extraction never
//! fails (it degrades to [`SlideContent::fallback`]); image generation may
//! legitimately produce nothing.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::attachment::Attachment;
use crate::error::{HubError, Result};
use crate::persona::BotPersona;
use crate::quiz::{QuizQuestion, OPTION_COUNT, QUIZ_LENGTH};

/// Remote text, quiz, slide and image generation.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    /// Generates a chat reply from `persona` to `prompt`.
    async fn generate_text(
        &self,
        persona: &BotPersona,
        prompt: &str,
        attachment: Option<&Attachment>,
    ) -> Result<String>;

    /// Generates exactly [`QUIZ_LENGTH`] questions of [`OPTION_COUNT`] options on `topic`.
    async fn generate_quiz(&self, topic: &str) -> Result<Vec<QuizQuestion>>;

    /// Extracts a slide title and 3-4 bullet points from `text`.
    async fn extract_slide_content(&self, text: &str) -> SlideContent;

    /// Generates an image; `Ok(None)` means the model returned no image.
    async fn generate_image(&self, prompt: &str) -> Result<Option<String>>;
}

/// Title and bullet points summarizing a reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlideContent {
    /// Slide title.
    pub title: String,
    /// Bullet points.
    pub points: Vec<String>,
}

impl SlideContent {
    /// Minimum number of bullet points in extracted content.
    pub const MIN_POINTS: usize = 3;
    /// Maximum number of bullet points in extracted content.
    pub const MAX_POINTS: usize = 4;

    /// Content used whenever extraction fails.
    #[must_use]
    pub fn fallback() -> Self {
        Self {
            title: "الملخص الأكاديمي".to_string(),
            points: vec!["نقطة رئيسية 1".to_string(), "نقطة رئيسية 2".to_string()],
        }
    }

    /// Returns trimmed content if it has a title and 3-4 non-blank points.
    #[must_use]
    pub fn validated(self) -> Option<Self> {
        let title = self.title.trim().to_string();
        let points: Vec<String> = self.points.iter().map(|p| p.trim().to_string()).collect();

        let well_formed = !title.is_empty()
            && (Self::MIN_POINTS..=Self::MAX_POINTS).contains(&points.len())
            && points.iter().all(|p| !p.is_empty());

        well_formed.then_some(Self { title, points })
    }
}

/// A question as the model returns it, before arity checks.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawQuizQuestion {
    /// Question text.
    #[serde(default)]
    pub question: String,
    /// Options, any count.
    #[serde(default)]
    pub options: Vec<String>,
    /// Correct option index, possibly out of range.
    pub correct_answer_index: i64,
    /// Explanation text.
    #[serde(default)]
    pub explanation: String,
}

/// The JSON envelope of a quiz response.
#[derive(Debug, Clone, Deserialize)]
pub struct RawQuizPayload {
    /// Questions in order.
    pub questions: Vec<RawQuizQuestion>,
}

/// Checks a raw question set against the quiz contract.
///
/// # Errors
///
/// Returns a `MalformedResponse` generation error unless there are exactly
/// [`QUIZ_LENGTH`] questions, each with non-blank text, exactly
/// [`OPTION_COUNT`] options and an in-range correct index. Nothing is
/// truncated or padded.
pub fn validate_quiz_payload(raw: Vec<RawQuizQuestion>) -> Result<Vec<QuizQuestion>> {
    if raw.len() != QUIZ_LENGTH {
        return Err(HubError::malformed(format!(
            "expected {QUIZ_LENGTH} questions, got {}",
            raw.len()
        )));
    }

    raw.into_iter()
        .enumerate()
        .map(|(idx, q)| {
            let number = idx + 1;
            if q.question.trim().is_empty() {
                return Err(HubError::malformed(format!("question {number} has no text")));
            }
            let option_count = q.options.len();
            let options: [String; OPTION_COUNT] = q.options.try_into().map_err(|_| {
                HubError::malformed(format!(
                    "question {number} has {option_count} options, expected {OPTION_COUNT}"
                ))
            })?;
            let correct_index = usize::try_from(q.correct_answer_index)
                .ok()
                .filter(|i| *i < OPTION_COUNT)
                .ok_or_else(|| {
                    HubError::malformed(format!(
                        "question {number} has correct index {} outside 0..{OPTION_COUNT}",
                        q.correct_answer_index
                    ))
                })?;

            Ok(QuizQuestion {
                question: q.question,
                options,
                correct_index,
                explanation: q.explanation,
            })
        })
        .collect()
}

/// Scripted [`GenerationClient`] for tests.
#[cfg(any(test, feature = "test-util"))]
pub mod testing {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use tokio::sync::Notify;

    use super::{GenerationClient, SlideContent};
    use crate::attachment::Attachment;
    use crate::error::{GenerationErrorKind, HubError, Result};
    use crate::persona::{BotPersona, PersonaId};
    use crate::quiz::{QuizQuestion, QUIZ_LENGTH};

    /// What the scripted image call returns.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum ImageScript {
        /// An image reference.
        Image(String),
        /// No image, no error.
        NoImage,
        /// A generation error.
        Fail,
    }

    /// Five well-formed questions whose correct answers are 0, 1, 2, 3, 0.
    #[must_use]
    pub fn sample_questions(topic: &str) -> Vec<QuizQuestion> {
        (0..QUIZ_LENGTH)
            .map(|n| QuizQuestion {
                question: format!("{topic} question {}?", n + 1),
                options: [
                    format!("{topic} option A"),
                    format!("{topic} option B"),
                    format!("{topic} option C"),
                    format!("{topic} option D"),
                ],
                correct_index: n % 4,
                explanation: format!("Explanation {}", n + 1),
            })
            .collect()
    }

    /// Correct answers for [`sample_questions`].
    #[must_use]
    pub fn sample_answers() -> Vec<usize> {
        (0..QUIZ_LENGTH).map(|n| n % 4).collect()
    }

    /// A client whose every answer is configured up front.
    pub struct ScriptedClient {
        text: Mutex<std::result::Result<String, GenerationErrorKind>>,
        quiz: Mutex<Option<Vec<QuizQuestion>>>,
        slide: Mutex<SlideContent>,
        image: Mutex<ImageScript>,
        text_gate: Option<Arc<Notify>>,
        image_gate: Option<Arc<Notify>>,
        text_calls: AtomicUsize,
        quiz_calls: AtomicUsize,
        slide_calls: AtomicUsize,
        image_calls: AtomicUsize,
        prompts: Mutex<Vec<(PersonaId, String)>>,
        image_prompts: Mutex<Vec<String>>,
    }

    impl Default for ScriptedClient {
        fn default() -> Self {
            Self::new()
        }
    }

    impl ScriptedClient {
        /// A client that succeeds at everything.
        #[must_use]
        pub fn new() -> Self {
            Self {
                text: Mutex::new(Ok("scripted reply".to_string())),
                quiz: Mutex::new(Some(sample_questions("topic"))),
                slide: Mutex::new(SlideContent {
                    title: "Scripted slide".to_string(),
                    points: vec!["one".to_string(), "two".to_string(), "three".to_string()],
                }),
                image: Mutex::new(ImageScript::Image(
                    "data:image/png;base64,iVBORw0K".to_string(),
                )),
                text_gate: None,
                image_gate: None,
                text_calls: AtomicUsize::new(0),
                quiz_calls: AtomicUsize::new(0),
                slide_calls: AtomicUsize::new(0),
                image_calls: AtomicUsize::new(0),
                prompts: Mutex::new(Vec::new()),
                image_prompts: Mutex::new(Vec::new()),
            }
        }

        /// Text generation returns `reply`.
        #[must_use]
        pub fn with_text_reply(self, reply: impl Into<String>) -> Self {
            *lock(&self.text) = Ok(reply.into());
            self
        }

        /// Text generation fails with `kind`.
        #[must_use]
        pub fn with_text_failure(self, kind: GenerationErrorKind) -> Self {
            *lock(&self.text) = Err(kind);
            self
        }

        /// Quiz generation returns `questions`.
        #[must_use]
        pub fn with_quiz(self, questions: Vec<QuizQuestion>) -> Self {
            *lock(&self.quiz) = Some(questions);
            self
        }

        /// Quiz generation fails.
        #[must_use]
        pub fn with_quiz_failure(self) -> Self {
            *lock(&self.quiz) = None;
            self
        }

        /// Slide extraction returns `slide`.
        #[must_use]
        pub fn with_slide(self, slide: SlideContent) -> Self {
            *lock(&self.slide) = slide;
            self
        }

        /// Image generation follows `script`.
        #[must_use]
        pub fn with_image(self, script: ImageScript) -> Self {
            *lock(&self.image) = script;
            self
        }

        /// Text generation waits for [`Self::release_text`] before answering.
        #[must_use]
        pub fn with_text_gate(mut self) -> Self {
            self.text_gate = Some(Arc::new(Notify::new()));
            self
        }

        /// Image generation waits for [`Self::release_image`] before answering.
        #[must_use]
        pub fn with_image_gate(mut self) -> Self {
            self.image_gate = Some(Arc::new(Notify::new()));
            self
        }

        /// Lets one gated text call finish.
        pub fn release_text(&self) {
            if let Some(gate) = &self.text_gate {
                gate.notify_one();
            }
        }

        /// Lets one gated image call finish.
        pub fn release_image(&self) {
            if let Some(gate) = &self.image_gate {
                gate.notify_one();
            }
        }

        /// Number of text generation calls.
        pub fn text_calls(&self) -> usize {
            self.text_calls.load(Ordering::SeqCst)
        }

        /// Number of quiz generation calls.
        pub fn quiz_calls(&self) -> usize {
            self.quiz_calls.load(Ordering::SeqCst)
        }

        /// Number of slide extraction calls.
        pub fn slide_calls(&self) -> usize {
            self.slide_calls.load(Ordering::SeqCst)
        }

        /// Number of image generation calls.
        pub fn image_calls(&self) -> usize {
            self.image_calls.load(Ordering::SeqCst)
        }

        /// Persona and prompt of every text call, in order.
        pub fn prompts(&self) -> Vec<(PersonaId, String)> {
            lock(&self.prompts).clone()
        }

        /// Every image prompt, in order.
        pub fn image_prompts(&self) -> Vec<String> {
            lock(&self.image_prompts).clone()
        }
    }

    fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
        mutex
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    #[async_trait]
    impl GenerationClient for ScriptedClient {
        async fn generate_text(
            &self,
            persona: &BotPersona,
            prompt: &str,
            _attachment: Option<&Attachment>,
        ) -> Result<String> {
            self.text_calls.fetch_add(1, Ordering::SeqCst);
            lock(&self.prompts).push((persona.id, prompt.to_string()));
            if let Some(gate) = &self.text_gate {
                gate.notified().await;
            }
            let scripted = lock(&self.text).clone();
            scripted.map_err(|kind| HubError::generation(kind, "scripted failure"))
        }

        async fn generate_quiz(&self, _topic: &str) -> Result<Vec<QuizQuestion>> {
            self.quiz_calls.fetch_add(1, Ordering::SeqCst);
            let scripted = lock(&self.quiz).clone();
            scripted.ok_or_else(|| HubError::malformed("scripted quiz failure"))
        }

        async fn extract_slide_content(&self, _text: &str) -> SlideContent {
            self.slide_calls.fetch_add(1, Ordering::SeqCst);
            lock(&self.slide).clone()
        }

        async fn generate_image(&self, prompt: &str) -> Result<Option<String>> {
            self.image_calls.fetch_add(1, Ordering::SeqCst);
            lock(&self.image_prompts).push(prompt.to_string());
            if let Some(gate) = &self.image_gate {
                gate.notified().await;
            }
            let scripted = lock(&self.image).clone();
            match scripted {
                ImageScript::Image(url) => Ok(Some(url)),
                ImageScript::NoImage => Ok(None),
                ImageScript::Fail => Err(HubError::generation(
                    GenerationErrorKind::Server,
                    "scripted image failure",
                )),
            }
        }
    }
}
