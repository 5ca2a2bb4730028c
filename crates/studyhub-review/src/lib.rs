//! StudyHub Quiz Review
//!
//! This crate turns a finished quiz run into a review: the score summary shown
//! on the results dashboard and a per-question breakdown of what the student
//! picked, what was correct, and why. Reviews can be serialized to JSON for the
//! HTTP API or rendered to Markdown for export.
//!
//! # Types
//!
//! - [`ReviewInput`] - Raw data handed over by the quiz engine
//! - [`Review`] - The complete review with summary and per-question entries
//! - [`ReviewSummary`] - Score, percentage, duration and feedback
//! - [`QuestionReview`] - One answered (or unanswered) question
//!
//! # Generators
//!
//! - [`ReviewGenerator`] - Builds a [`Review`] from a [`ReviewInput`]
//! - [`json::JsonGenerator`] - Compact or pretty JSON output
//! - [`MarkdownGenerator`] - Human-readable Markdown output
//!
//! # Example
//!
//! ```rust
//! use studyhub_review::{QuestionInput, ReviewGenerator, ReviewInput};
//!
//! let input = ReviewInput {
//!     topic: "subnetting".to_string(),
//!     feedback: "Bravo!".to_string(),
//!     celebrated: false,
//!     questions: vec![QuestionInput {
//!         question: "How many hosts fit in a /30?".to_string(),
//!         options: vec!["1".into(), "2".into(), "4".into(), "6".into()],
//!         correct_index: 1,
//!         selected_index: Some(1),
//!         explanation: "4 addresses minus network and broadcast".to_string(),
//!     }],
//!     started_at: chrono::Utc::now(),
//!     completed_at: chrono::Utc::now(),
//! };
//!
//! let review = ReviewGenerator::new(input).generate().unwrap();
//! assert_eq!(review.summary.score, 1);
//! assert_eq!(review.summary.percentage, 100);
//! ```

pub mod json;
mod markdown;

pub use markdown::MarkdownGenerator;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur during review generation.
#[derive(Debug, Error)]
pub enum ReviewError {
    /// Failed to serialize the review to JSON.
    #[error("failed to serialize review: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Failed to write review files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The quiz data handed over cannot be reviewed.
    #[error("invalid review data: {0}")]
    InvalidData(String),
}

/// Result type for review operations.
pub type Result<T> = std::result::Result<T, ReviewError>;

/// Letters shown in front of answer options.
pub const OPTION_LABELS: [char; 4] = ['A', 'B', 'C', 'D'];

/// Returns the display letter for an option index, `?` when out of range.
#[must_use]
pub fn option_label(index: usize) -> char {
    OPTION_LABELS.get(index).copied().unwrap_or('?')
}

// ============================================================================
// Input Types (local copies to avoid depending on the quiz engine)
// ============================================================================

/// One quiz question together with the student's answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionInput {
    /// The question text.
    pub question: String,
    /// The answer options in display order.
    pub options: Vec<String>,
    /// Index of the correct option.
    pub correct_index: usize,
    /// Index the student picked, `None` if the question was never answered.
    pub selected_index: Option<usize>,
    /// Why the correct option is correct.
    pub explanation: String,
}

/// Everything needed to review a quiz run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewInput {
    /// Topic the quiz was generated for.
    pub topic: String,
    /// Feedback message derived from the final score.
    pub feedback: String,
    /// Whether the run earned the celebration.
    pub celebrated: bool,
    /// Questions in the order they were asked.
    pub questions: Vec<QuestionInput>,
    /// When the session was created.
    pub started_at: DateTime<Utc>,
    /// When the last answer was recorded.
    pub completed_at: DateTime<Utc>,
}

// ============================================================================
// Review
// ============================================================================

/// A reviewed quiz run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Review {
    /// Topic of the quiz.
    pub topic: String,
    /// Score summary.
    pub summary: ReviewSummary,
    /// Per-question breakdown.
    pub questions: Vec<QuestionReview>,
}

impl Review {
    /// Serializes the review to compact JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(ReviewError::from)
    }

    /// Returns the questions the student got wrong or skipped.
    pub fn missed(&self) -> impl Iterator<Item = &QuestionReview> {
        self.questions.iter().filter(|q| !q.is_correct)
    }

    /// Returns `true` if every question was answered correctly.
    #[must_use]
    pub fn is_perfect(&self) -> bool {
        self.summary.total > 0 && self.summary.score == self.summary.total
    }
}

/// High-level outcome of a quiz run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewSummary {
    /// Number of correct answers.
    pub score: usize,
    /// Number of questions.
    pub total: usize,
    /// Score as a whole percentage, rounded down.
    pub percentage: u32,
    /// Feedback message for the score tier.
    pub feedback: String,
    /// Whether the celebration fired.
    pub celebrated: bool,
    /// Time from session start to the last answer.
    pub duration_seconds: u64,
}

/// A single option as shown to the student.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerChoice {
    /// Zero-based option index.
    pub index: usize,
    /// Display letter (`A`-`D`).
    pub label: char,
    /// Option text.
    pub text: String,
}

/// Review entry for one question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionReview {
    /// One-based question number.
    pub number: usize,
    /// The question text.
    pub question: String,
    /// What the student picked.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected: Option<AnswerChoice>,
    /// The correct option.
    pub correct: AnswerChoice,
    /// Whether the pick matched the correct option.
    pub is_correct: bool,
    /// Explanation of the correct option.
    pub explanation: String,
}

// ============================================================================
// Generator
// ============================================================================

/// Builds a [`Review`] from quiz data.
pub struct ReviewGenerator {
    input: ReviewInput,
}

impl ReviewGenerator {
    /// Creates a generator for the given input.
    #[must_use]
    pub const fn new(input: ReviewInput) -> Self {
        Self { input }
    }

    /// Produces the review.
    ///
    /// # Errors
    ///
    /// Returns [`ReviewError::InvalidData`] if the input has no questions, or
    /// if a correct or selected index points outside the option list.
    pub fn generate(self) -> Result<Review> {
        let ReviewInput {
            topic,
            feedback,
            celebrated,
            questions,
            started_at,
            completed_at,
        } = self.input;

        if questions.is_empty() {
            return Err(ReviewError::InvalidData(
                "a review needs at least one question".to_string(),
            ));
        }

        let questions = questions
            .into_iter()
            .enumerate()
            .map(|(idx, q)| review_question(idx + 1, q))
            .collect::<Result<Vec<_>>>()?;

        let score = questions.iter().filter(|q| q.is_correct).count();
        let total = questions.len();
        let duration_seconds = u64::try_from((completed_at - started_at).num_seconds()).unwrap_or(0);

        Ok(Review {
            topic,
            summary: ReviewSummary {
                score,
                total,
                percentage: percentage(score, total),
                feedback,
                celebrated,
                duration_seconds,
            },
            questions,
        })
    }
}

/// Whole-number percentage of `score` out of `total`, rounded down.
#[must_use]
pub fn percentage(score: usize, total: usize) -> u32 {
    if total == 0 {
        return 0;
    }
    u32::try_from(score.saturating_mul(100) / total).unwrap_or(u32::MAX)
}

fn review_question(number: usize, input: QuestionInput) -> Result<QuestionReview> {
    let choice = |index: usize| -> Result<AnswerChoice> {
        input
            .options
            .get(index)
            .map(|text| AnswerChoice {
                index,
                label: option_label(index),
                text: text.clone(),
            })
            .ok_or_else(|| {
                ReviewError::InvalidData(format!(
                    "question {number}: option index {index} is out of range ({} options)",
                    input.options.len()
                ))
            })
    };

    let correct = choice(input.correct_index)?;
    let selected = input.selected_index.map(choice).transpose()?;
    let is_correct = input.selected_index == Some(input.correct_index);

    Ok(QuestionReview {
        number,
        question: input.question.clone(),
        selected,
        correct,
        is_correct,
        explanation: input.explanation.clone(),
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn question(correct: usize, selected: Option<usize>) -> QuestionInput {
        QuestionInput {
            question: "Which layer does TCP live in?".to_string(),
            options: vec![
                "Network".to_string(),
                "Transport".to_string(),
                "Session".to_string(),
                "Physical".to_string(),
            ],
            correct_index: correct,
            selected_index: selected,
            explanation: "TCP is a transport protocol".to_string(),
        }
    }

    fn input(questions: Vec<QuestionInput>) -> ReviewInput {
        let start = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        ReviewInput {
            topic: "networking".to_string(),
            feedback: "Bravo!".to_string(),
            celebrated: true,
            questions,
            started_at: start,
            completed_at: start + chrono::Duration::seconds(95),
        }
    }

    #[test]
    fn test_option_label() {
        assert_eq!(option_label(0), 'A');
        assert_eq!(option_label(3), 'D');
        assert_eq!(option_label(4), '?');
    }

    #[test]
    fn test_percentage() {
        assert_eq!(percentage(5, 5), 100);
        assert_eq!(percentage(4, 5), 80);
        assert_eq!(percentage(2, 3), 66);
        assert_eq!(percentage(0, 0), 0);
    }

    #[test]
    fn test_generate_counts_correct_answers() {
        let review = ReviewGenerator::new(input(vec![
            question(1, Some(1)),
            question(1, Some(0)),
            question(2, Some(2)),
            question(3, Some(3)),
            question(0, Some(0)),
        ]))
        .generate()
        .unwrap();

        assert_eq!(review.summary.score, 4);
        assert_eq!(review.summary.total, 5);
        assert_eq!(review.summary.percentage, 80);
        assert_eq!(review.summary.duration_seconds, 95);
        assert!(review.summary.celebrated);
        assert!(!review.is_perfect());
        assert_eq!(review.missed().count(), 1);
        assert_eq!(review.questions[1].number, 2);
        assert_eq!(review.questions[1].selected.as_ref().unwrap().label, 'A');
        assert_eq!(review.questions[1].correct.text, "Transport");
    }

    #[test]
    fn test_unanswered_question_is_missed() {
        let review = ReviewGenerator::new(input(vec![question(1, None)]))
            .generate()
            .unwrap();

        assert!(review.questions[0].selected.is_none());
        assert!(!review.questions[0].is_correct);
        assert_eq!(review.summary.score, 0);
    }

    #[test]
    fn test_empty_input_is_rejected() {
        let err = ReviewGenerator::new(input(vec![])).generate().unwrap_err();
        assert!(matches!(err, ReviewError::InvalidData(_)));
    }

    #[test]
    fn test_out_of_range_index_is_rejected() {
        let err = ReviewGenerator::new(input(vec![question(7, Some(0))]))
            .generate()
            .unwrap_err();
        assert!(err.to_string().contains("out of range"));

        let err = ReviewGenerator::new(input(vec![question(0, Some(9))]))
            .generate()
            .unwrap_err();
        assert!(err.to_string().contains("option index 9"));
    }

    #[test]
    fn test_review_json_skips_missing_selection() {
        let review = ReviewGenerator::new(input(vec![question(1, None)]))
            .generate()
            .unwrap();
        let json = review.to_json().unwrap();

        assert!(json.contains(r#""topic":"networking""#));
        assert!(json.contains(r#""is_correct":false"#));
        assert!(!json.contains("selected"));
    }
}
