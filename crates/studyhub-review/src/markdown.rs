//! Markdown rendering for quiz reviews.
//!
//! The document has a title, a summary table, the feedback message as a
//! blockquote, and one section per question showing the pick, the correct
//! option and the explanation.
//!
//! # Example
//!
//! ```rust
//! use studyhub_review::{MarkdownGenerator, Review};
//!
//! let review = Review {
//!     topic: "algebra".to_string(),
//!     ..Review::default()
//! };
//! let markdown = MarkdownGenerator::new(&review).generate();
//! assert!(markdown.contains("# Quiz Review: algebra"));
//! ```

use chrono::{DateTime, Utc};
use std::fmt::Write;

use crate::{QuestionReview, Review};

/// Generates Markdown documents from quiz reviews.
pub struct MarkdownGenerator<'a> {
    review: &'a Review,
}

impl<'a> MarkdownGenerator<'a> {
    /// Creates a new Markdown generator for the given review.
    #[must_use]
    pub const fn new(review: &'a Review) -> Self {
        Self { review }
    }

    /// Generates the complete Markdown review.
    #[must_use]
    pub fn generate(&self) -> String {
        let mut output = String::new();

        self.write_title(&mut output);
        self.write_summary(&mut output);
        self.write_feedback(&mut output);
        self.write_questions(&mut output);
        Self::write_footer(&mut output);

        output
    }

    fn write_title(&self, output: &mut String) {
        let _ = writeln!(
            output,
            "# Quiz Review: {}\n",
            escape_markdown(&self.review.topic)
        );
    }

    fn write_summary(&self, output: &mut String) {
        let summary = &self.review.summary;

        let _ = writeln!(output, "## Summary\n");
        let _ = writeln!(output, "| Metric | Value |");
        let _ = writeln!(output, "|--------|-------|");
        let _ = writeln!(output, "| Score | {} / {} |", summary.score, summary.total);
        let _ = writeln!(output, "| Percentage | {}% |", summary.percentage);
        let _ = writeln!(
            output,
            "| Duration | {} |",
            format_duration(summary.duration_seconds)
        );
        let _ = writeln!(
            output,
            "| Celebrated | {} |",
            if summary.celebrated { "Yes" } else { "No" }
        );
        let _ = writeln!(output);
    }

    fn write_feedback(&self, output: &mut String) {
        let feedback = self.review.summary.feedback.trim();
        if feedback.is_empty() {
            return;
        }

        for line in feedback.lines() {
            let _ = writeln!(output, "> {line}");
        }
        let _ = writeln!(output);
    }

    fn write_questions(&self, output: &mut String) {
        let _ = writeln!(output, "## Questions\n");

        if self.review.questions.is_empty() {
            let _ = writeln!(output, "*No questions were answered.*\n");
            return;
        }

        for question in &self.review.questions {
            write_question(output, question);
        }
    }

    fn write_footer(output: &mut String) {
        let _ = writeln!(output, "---");
        let timestamp = format_timestamp(&Utc::now());
        let _ = writeln!(output, "*Generated by StudyHub at {timestamp}*");
    }
}

fn write_question(output: &mut String, question: &QuestionReview) {
    let mark = if question.is_correct {
        "Correct"
    } else {
        "Missed"
    };

    let _ = writeln!(
        output,
        "### {}. {} ({mark})\n",
        question.number,
        escape_markdown(&question.question)
    );

    match &question.selected {
        Some(choice) => {
            let _ = writeln!(
                output,
                "- **Your answer:** {}. {}",
                choice.label,
                escape_markdown(&choice.text)
            );
        }
        None => {
            let _ = writeln!(output, "- **Your answer:** *not answered*");
        }
    }

    let _ = writeln!(
        output,
        "- **Correct answer:** {}. {}",
        question.correct.label,
        escape_markdown(&question.correct.text)
    );

    if !question.explanation.trim().is_empty() {
        let _ = writeln!(
            output,
            "- **Why:** {}",
            escape_markdown(question.explanation.trim())
        );
    }
    let _ = writeln!(output);
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Formats a duration in seconds, e.g. 65 -> "1m 5s".
fn format_duration(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;

    let mut parts = Vec::new();

    if hours > 0 {
        parts.push(format!("{hours}h"));
    }
    if minutes > 0 {
        parts.push(format!("{minutes}m"));
    }
    if secs > 0 || parts.is_empty() {
        parts.push(format!("{secs}s"));
    }

    parts.join(" ")
}

fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

/// Escapes characters that would otherwise be read as Markdown syntax.
fn escape_markdown(text: &str) -> String {
    let mut result = String::with_capacity(text.len());

    for ch in text.chars() {
        match ch {
            '*' | '_' | '`' | '#' | '[' | ']' | '!' | '\\' | '<' | '>' | '|' => {
                result.push('\\');
                result.push(ch);
            }
            '\n' => result.push(' '),
            _ => result.push(ch),
        }
    }

    result
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::{AnswerChoice, ReviewSummary};

    fn choice(index: usize, text: &str) -> AnswerChoice {
        AnswerChoice {
            index,
            label: crate::option_label(index),
            text: text.to_string(),
        }
    }

    fn sample_review() -> Review {
        Review {
            topic: "C pointers".to_string(),
            summary: ReviewSummary {
                score: 1,
                total: 2,
                percentage: 50,
                feedback: "Mouch khayeb, ama lazem tzid tkhdem.".to_string(),
                celebrated: false,
                duration_seconds: 65,
            },
            questions: vec![
                QuestionReview {
                    number: 1,
                    question: "What does *p dereference?".to_string(),
                    selected: Some(choice(0, "The pointee")),
                    correct: choice(0, "The pointee"),
                    is_correct: true,
                    explanation: "Unary * reads through the pointer".to_string(),
                },
                QuestionReview {
                    number: 2,
                    question: "sizeof(char)?".to_string(),
                    selected: None,
                    correct: choice(1, "1"),
                    is_correct: false,
                    explanation: String::new(),
                },
            ],
        }
    }

    #[test]
    fn test_generate_contains_sections() {
        let review = sample_review();
        let markdown = MarkdownGenerator::new(&review).generate();

        assert!(markdown.starts_with("# Quiz Review: C pointers"));
        assert!(markdown.contains("| Score | 1 / 2 |"));
        assert!(markdown.contains("| Percentage | 50% |"));
        assert!(markdown.contains("| Duration | 1m 5s |"));
        assert!(markdown.contains("| Celebrated | No |"));
        assert!(markdown.contains("> Mouch khayeb"));
        assert!(markdown.contains("*Generated by StudyHub at"));
    }

    #[test]
    fn test_question_sections() {
        let review = sample_review();
        let markdown = MarkdownGenerator::new(&review).generate();

        assert!(markdown.contains("### 1. What does \\*p dereference? (Correct)"));
        assert!(markdown.contains("- **Your answer:** A. The pointee"));
        assert!(markdown.contains("### 2. sizeof(char)? (Missed)"));
        assert!(markdown.contains("- **Your answer:** *not answered*"));
        assert!(markdown.contains("- **Correct answer:** B. 1"));
        assert_eq!(markdown.matches("- **Why:**").count(), 1);
    }

    #[test]
    fn test_empty_review() {
        let review = Review::default();
        let markdown = MarkdownGenerator::new(&review).generate();
        assert!(markdown.contains("*No questions were answered.*"));
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0), "0s");
        assert_eq!(format_duration(45), "45s");
        assert_eq!(format_duration(3661), "1h 1m 1s");
        assert_eq!(format_duration(120), "2m");
    }

    #[test]
    fn test_escape_markdown() {
        assert_eq!(escape_markdown("a|b"), "a\\|b");
        assert_eq!(escape_markdown("line\nbreak"), "line break");
        assert_eq!(escape_markdown("plain"), "plain");
    }
}
