//! Quiz state machine.
//!
//! A [`QuizSession`] is one run through a fixed question set. Answering is
//! two-phase: [`QuizSession::lock_in`] records the pick and exposes the
//! correctness feedback, [`QuizSession::advance`] commits it once the
//! locked-in interval is over. The [`QuizEngine`] owns at most one session
//! plus the celebration timer.
//!
//! ```text
//! NoSession --start--> InProgress(0) --answer--> InProgress(1) ... --answer--> Complete
//!     ^                                                                           |
//!     +-------------------------------- discard ----------------------------------+
//! ```

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::QuizSettings;
use crate::error::{HubError, Result};
use crate::generation::GenerationClient;

/// Number of questions in a generated quiz.
pub const QUIZ_LENGTH: usize = 5;

/// Number of options per question.
pub const OPTION_COUNT: usize = 4;

// ============================================================================
// QuizQuestion
// ============================================================================

/// A multiple-choice question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizQuestion {
    /// The question text.
    pub question: String,
    /// Exactly four options.
    pub options: [String; OPTION_COUNT],
    /// Index of the correct option, always below [`OPTION_COUNT`].
    #[serde(rename = "correctAnswerIndex")]
    pub correct_index: usize,
    /// Why the correct option is correct.
    pub explanation: String,
}

impl QuizQuestion {
    /// Returns `true` if `option` is the correct answer.
    #[must_use]
    pub const fn is_correct(&self, option: usize) -> bool {
        option == self.correct_index
    }
}

// ============================================================================
// State types
// ============================================================================

/// Where the engine stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum QuizState {
    /// No quiz is running.
    NoSession,
    /// A question is on screen.
    InProgress {
        /// Zero-based index of the current question.
        index: usize,
    },
    /// Every question has been answered.
    Complete,
}

impl std::fmt::Display for QuizState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoSession => write!(f, "no_session"),
            Self::InProgress { index } => write!(f, "in_progress({index})"),
            Self::Complete => write!(f, "complete"),
        }
    }
}

/// Correctness feedback shown while an answer is locked in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerFeedback {
    /// Index of the answered question.
    pub question_index: usize,
    /// Option the student picked.
    pub selected: usize,
    /// The correct option.
    pub correct_index: usize,
    /// Whether the pick was correct.
    pub is_correct: bool,
    /// Explanation of the correct option.
    pub explanation: String,
}

/// Result of committing a locked-in answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum QuizAdvance {
    /// Moved on to the next question.
    Advanced {
        /// Index of the new current question.
        index: usize,
    },
    /// The last question was answered.
    Completed {
        /// Final score.
        score: usize,
        /// Number of questions.
        total: usize,
        /// Whole-number percentage.
        percentage: u32,
        /// Whether the score earned the celebration.
        celebrate: bool,
    },
}

// ============================================================================
// QuizSession
// ============================================================================

/// One run through a question set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuizSession {
    topic: String,
    questions: Vec<QuizQuestion>,
    current_index: usize,
    user_answers: Vec<usize>,
    score: usize,
    is_complete: bool,
    pending: Option<AnswerFeedback>,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl QuizSession {
    /// Creates a fresh session at the first question.
    ///
    /// # Errors
    ///
    /// Returns a `MalformedResponse` generation error if `questions` is empty
    /// or a correct index is out of range.
    pub fn new(topic: impl Into<String>, questions: Vec<QuizQuestion>) -> Result<Self> {
        if questions.is_empty() {
            return Err(HubError::malformed("a quiz needs at least one question"));
        }
        if let Some(pos) = questions.iter().position(|q| q.correct_index >= OPTION_COUNT) {
            return Err(HubError::malformed(format!(
                "question {} has correct index {} outside 0..{OPTION_COUNT}",
                pos + 1,
                questions[pos].correct_index
            )));
        }

        Ok(Self {
            topic: topic.into(),
            questions,
            current_index: 0,
            user_answers: Vec::new(),
            score: 0,
            is_complete: false,
            pending: None,
            started_at: Utc::now(),
            completed_at: None,
        })
    }

    /// Topic the quiz was generated for.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// All questions in order.
    #[must_use]
    pub fn questions(&self) -> &[QuizQuestion] {
        &self.questions
    }

    /// Index of the current question; equals the question count once complete.
    #[must_use]
    pub const fn current_index(&self) -> usize {
        self.current_index
    }

    /// Committed answers, one per answered question.
    #[must_use]
    pub fn user_answers(&self) -> &[usize] {
        &self.user_answers
    }

    /// Number of correct committed answers.
    #[must_use]
    pub const fn score(&self) -> usize {
        self.score
    }

    /// Whether the last question has been answered.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.is_complete
    }

    /// The locked-in answer awaiting commit, if any.
    #[must_use]
    pub const fn pending(&self) -> Option<&AnswerFeedback> {
        self.pending.as_ref()
    }

    /// When the session was created.
    #[must_use]
    pub const fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// The question on screen, `None` once complete.
    #[must_use]
    pub fn current_question(&self) -> Option<&QuizQuestion> {
        if self.is_complete {
            return None;
        }
        self.questions.get(self.current_index)
    }

    /// Current state of this session.
    #[must_use]
    pub const fn state(&self) -> QuizState {
        if self.is_complete {
            QuizState::Complete
        } else {
            QuizState::InProgress {
                index: self.current_index,
            }
        }
    }

    /// Final (or running) percentage, rounded down.
    #[must_use]
    pub fn percentage(&self) -> u32 {
        studyhub_review::percentage(self.score, self.questions.len())
    }

    /// Locks in an answer for the current question.
    ///
    /// Returns `None`, leaving the session unchanged, if the session is
    /// complete, an answer is already locked in, or `option` is out of range.
    pub fn lock_in(&mut self, option: usize) -> Option<AnswerFeedback> {
        if self.is_complete || self.pending.is_some() || option >= OPTION_COUNT {
            return None;
        }
        let question = self.questions.get(self.current_index)?;

        let feedback = AnswerFeedback {
            question_index: self.current_index,
            selected: option,
            correct_index: question.correct_index,
            is_correct: question.is_correct(option),
            explanation: question.explanation.clone(),
        };
        self.pending = Some(feedback.clone());
        Some(feedback)
    }

    /// Commits the locked-in answer.
    ///
    /// `celebration_threshold` is the inclusive percentage at which a
    /// completed run celebrates. Returns `None` if nothing is locked in.
    pub fn advance(&mut self, celebration_threshold: u32) -> Option<QuizAdvance> {
        let feedback = self.pending.take()?;

        self.user_answers.push(feedback.selected);
        if feedback.is_correct {
            self.score += 1;
        }

        if self.current_index + 1 >= self.questions.len() {
            self.is_complete = true;
            self.current_index = self.questions.len();
            self.completed_at = Some(Utc::now());
            let percentage = self.percentage();
            return Some(QuizAdvance::Completed {
                score: self.score,
                total: self.questions.len(),
                percentage,
                celebrate: percentage >= celebration_threshold,
            });
        }

        self.current_index += 1;
        Some(QuizAdvance::Advanced {
            index: self.current_index,
        })
    }

    /// Locks in and immediately commits an answer.
    pub fn submit_answer(&mut self, option: usize, celebration_threshold: u32) -> Option<QuizAdvance> {
        self.lock_in(option)?;
        self.advance(celebration_threshold)
    }

    /// Feedback message for the final score.
    #[must_use]
    pub fn feedback(&self) -> String {
        feedback_message(self.score, self.questions.len(), &self.topic)
    }

    /// Serializable view of the session.
    #[must_use]
    pub fn view(&self) -> QuizView {
        QuizView {
            topic: self.topic.clone(),
            state: self.state(),
            total: self.questions.len(),
            score: self.score,
            user_answers: self.user_answers.clone(),
            current_question: self.current_question().map(|q| QuestionView {
                question: q.question.clone(),
                options: q.options.clone(),
            }),
            pending: self.pending.clone(),
            feedback: self.is_complete.then(|| self.feedback()),
            percentage: self.is_complete.then(|| self.percentage()),
        }
    }

    /// Review input for a completed session; `None` while in progress.
    #[must_use]
    pub fn review_input(&self, celebrated: bool) -> Option<studyhub_review::ReviewInput> {
        if !self.is_complete {
            return None;
        }

        let questions = self
            .questions
            .iter()
            .enumerate()
            .map(|(idx, q)| studyhub_review::QuestionInput {
                question: q.question.clone(),
                options: q.options.to_vec(),
                correct_index: q.correct_index,
                selected_index: self.user_answers.get(idx).copied(),
                explanation: q.explanation.clone(),
            })
            .collect();

        Some(studyhub_review::ReviewInput {
            topic: self.topic.clone(),
            feedback: self.feedback(),
            celebrated,
            questions,
            started_at: self.started_at,
            completed_at: self.completed_at.unwrap_or_else(Utc::now),
        })
    }
}

/// The question as shown before it is answered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionView {
    /// Question text.
    pub question: String,
    /// The four options.
    pub options: [String; OPTION_COUNT],
}

/// Serializable snapshot of a quiz session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizView {
    /// Quiz topic.
    pub topic: String,
    /// Session state.
    pub state: QuizState,
    /// Number of questions.
    pub total: usize,
    /// Current score.
    pub score: usize,
    /// Committed answers.
    pub user_answers: Vec<usize>,
    /// The question on screen.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_question: Option<QuestionView>,
    /// Locked-in feedback, while the answer is being shown.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending: Option<AnswerFeedback>,
    /// Final feedback message once complete.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
    /// Final percentage once complete.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percentage: Option<u32>,
}

/// Feedback message for a final score.
///
/// Tiers use inclusive lower bounds: 100%, 80%, 50%, below. The top tier
/// names the topic. A zero-question total falls into the lowest tier.
#[must_use]
pub fn feedback_message(score: usize, total: usize, topic: &str) -> String {
    let scaled = score.saturating_mul(100);
    if total > 0 && scaled >= total * 100 {
        format!("يا بطل! جبتهم الكل صحاح. إنت ملك الـ {topic}!")
    } else if total > 0 && scaled >= total * 80 {
        "برافو! خدمة ممتازة، باقيلك تفتوفة صغيرة وتولي طيارة.".to_string()
    } else if total > 0 && scaled >= total * 50 {
        "موش خايب، أما تنجم تعمل خير. عاود راجع الدروس شوية.".to_string()
    } else {
        "لازمك تزيد تخدم يا باهي. مايسالش، كلنا نتعلمو. عاود جرب!".to_string()
    }
}

/// Requests a question set for `topic` and builds a fresh session from it.
///
/// # Errors
///
/// Propagates the client's generation error, and returns a
/// `MalformedResponse` error if the set is not exactly [`QUIZ_LENGTH`]
/// questions.
pub async fn start_session(client: &dyn GenerationClient, topic: &str) -> Result<QuizSession> {
    let questions = client.generate_quiz(topic).await?;
    if questions.len() != QUIZ_LENGTH {
        return Err(HubError::malformed(format!(
            "expected {QUIZ_LENGTH} questions, got {}",
            questions.len()
        )));
    }
    QuizSession::new(topic, questions)
}

// ============================================================================
// QuizEngine
// ============================================================================

/// Owns the current quiz session and the celebration timer.
#[derive(Debug)]
pub struct QuizEngine {
    session: Option<QuizSession>,
    session_id: u64,
    celebration_until: Option<Instant>,
    celebrated: bool,
    settings: QuizSettings,
}

impl QuizEngine {
    /// Creates an engine with no session.
    #[must_use]
    pub const fn new(settings: QuizSettings) -> Self {
        Self {
            session: None,
            session_id: 0,
            celebration_until: None,
            celebrated: false,
            settings,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> QuizState {
        self.session
            .as_ref()
            .map_or(QuizState::NoSession, QuizSession::state)
    }

    /// The current session, if any.
    #[must_use]
    pub const fn session(&self) -> Option<&QuizSession> {
        self.session.as_ref()
    }

    /// Identifier of the current session; changes every time one is installed.
    #[must_use]
    pub const fn session_id(&self) -> u64 {
        self.session_id
    }

    /// Settings the engine runs with.
    #[must_use]
    pub const fn settings(&self) -> &QuizSettings {
        &self.settings
    }

    /// Replaces any current session with `session`; returns its id.
    pub fn install(&mut self, session: QuizSession) -> u64 {
        self.session_id += 1;
        self.session = Some(session);
        self.celebration_until = None;
        self.celebrated = false;
        self.session_id
    }

    /// Drops the current session. Returns `true` if there was one.
    pub fn discard(&mut self) -> bool {
        self.celebration_until = None;
        self.celebrated = false;
        self.session.take().is_some()
    }

    /// Locks in an answer on the current session.
    pub fn lock_in(&mut self, option: usize) -> Option<AnswerFeedback> {
        self.session.as_mut()?.lock_in(option)
    }

    /// Commits the locked-in answer; starts the celebration when earned.
    pub fn advance(&mut self, now: Instant) -> Option<QuizAdvance> {
        let threshold = self.settings.celebration_threshold;
        let advance = self.session.as_mut()?.advance(threshold)?;
        if let QuizAdvance::Completed { celebrate: true, .. } = advance {
            self.celebrated = true;
            self.celebration_until = Some(now + self.celebration_duration());
        }
        Some(advance)
    }

    /// Length of the celebration.
    #[must_use]
    pub const fn celebration_duration(&self) -> Duration {
        self.settings.celebration()
    }

    /// Whether the celebration is showing at `now`.
    #[must_use]
    pub fn is_celebrating(&self, now: Instant) -> bool {
        self.celebration_until.is_some_and(|until| now < until)
    }

    /// Review input for the completed session.
    #[must_use]
    pub fn review_input(&self) -> Option<studyhub_review::ReviewInput> {
        self.session.as_ref()?.review_input(self.celebrated)
    }
}
