//! Conversation orchestration.
//!
//! The [`Orchestrator`] owns the active persona, the message log, the quiz
//! engine and the staged attachment. It decides whether a user turn goes to
//! the quiz engine or to text generation, absorbs every generation failure
//! into a chat message, and enriches replies with visual aids in the
//! background.
//!
//! Two single-flight rules apply:
//!
//! - one text/quiz request at a time; further sends are rejected while it runs
//! - one visual aid at a time; further requests are dropped while it runs
//!
//! Switching persona bumps a context epoch. A request that resolves after the
//! switch is discarded instead of writing into the new conversation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use crate::attachment::Attachment;
use crate::config::{Config, QuizSettings};
use crate::generation::GenerationClient;
use crate::intent::{is_quiz_request, wants_visual_aid};
use crate::message::{Message, MessageId, MessageLog, Role, VisualAid};
use crate::persona::PersonaId;
use crate::quiz::{self, AnswerFeedback, QuizAdvance, QuizEngine, QuizView};
use crate::websocket::{EventBroadcaster, HubEvent};

/// Reply appended when a quiz could not be generated.
pub const QUIZ_FAILURE_REPLY: &str = "Smahni, ma najamtich naamel l-quiz tawa. Jarreb marra okhra.";

/// Reply appended when text generation fails.
pub const TEXT_FAILURE_REPLY: &str = "فما مشكلة تقنية صغيرة. عاود جرب مرة أخرى يا بطل.";

/// Prompt sent when the student attaches a file without text.
pub const ATTACHMENT_ONLY_PROMPT: &str = "Analyze input.";

/// Builds the image prompt for a visual aid titled `title`.
#[must_use]
pub fn build_visual_prompt(title: &str) -> String {
    format!(
        "A professional workspace or university library scene, background for a presentation about {title}. NO TEXT."
    )
}

// ============================================================================
// Outcomes
// ============================================================================

/// Why a send was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// No text and no attachment.
    Empty,
    /// Another request is still in flight.
    Busy,
}

/// Result of [`Orchestrator::send_user_input`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SendOutcome {
    /// Nothing happened.
    Rejected {
        /// Why.
        reason: RejectReason,
    },
    /// The model replied.
    Replied {
        /// Id of the reply.
        message_id: MessageId,
        /// Whether a visual aid was requested for the reply.
        visual_aid: bool,
    },
    /// Text generation failed and an apology was appended.
    Apologized {
        /// Id of the apology.
        message_id: MessageId,
    },
    /// A quiz session started.
    QuizStarted {
        /// The quiz topic.
        topic: String,
    },
    /// Quiz generation failed and a fallback reply was appended.
    QuizFailed {
        /// Id of the fallback reply.
        message_id: MessageId,
    },
    /// The persona changed while the request was in flight; its result was dropped.
    Discarded,
}

/// Result of [`Orchestrator::generate_visual_aid`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisualAidOutcome {
    /// The visual aid was attached to the message.
    Attached,
    /// Another visual aid was in progress.
    Dropped,
    /// The model produced no image.
    NoImage,
    /// Image generation failed.
    Failed,
    /// The target message no longer exists or already has a visual aid.
    TargetGone,
}

/// Result of [`Orchestrator::request_visual_aid`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisualAidRequest {
    /// Generation is running; the result arrives as an event.
    Started,
    /// Another visual aid was in progress.
    Dropped,
    /// No model reply has that id.
    NotFound,
    /// The reply already has a visual aid.
    AlreadyAttached,
}

/// Identifies the session and context an answer was locked in for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnswerTicket {
    epoch: u64,
    session_id: u64,
}

/// Serializable view of the whole conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSnapshot {
    /// Active persona.
    pub persona: PersonaId,
    /// Messages in order.
    pub messages: Vec<Message>,
    /// Quiz session, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quiz: Option<QuizView>,
    /// Name of the staged attachment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub staged_attachment: Option<String>,
    /// Whether a text/quiz request is in flight.
    pub busy: bool,
    /// Message currently being enriched with a visual aid.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visual_aid_target: Option<MessageId>,
    /// Whether the quiz celebration is showing.
    pub celebrating: bool,
}

// ============================================================================
// Orchestrator
// ============================================================================

#[derive(Debug)]
struct ChatState {
    persona: PersonaId,
    log: MessageLog,
    quiz: QuizEngine,
    staged: Option<Attachment>,
    epoch: u64,
}

struct Inner {
    client: Arc<dyn GenerationClient>,
    state: Mutex<ChatState>,
    busy: AtomicBool,
    visual_target: std::sync::Mutex<Option<MessageId>>,
    events: EventBroadcaster,
    quiz_settings: QuizSettings,
}

/// Clears the busy flag when dropped.
struct BusyGuard<'a>(&'a AtomicBool);

impl<'a> BusyGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Clears the visual-aid target when dropped.
struct VisualGuard(Arc<Inner>);

impl VisualGuard {
    fn acquire(inner: &Arc<Inner>, id: MessageId) -> Option<Self> {
        let mut target = inner
            .visual_target
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if target.is_some() {
            return None;
        }
        *target = Some(id);
        Some(Self(Arc::clone(inner)))
    }
}

impl Drop for VisualGuard {
    fn drop(&mut self) {
        *self
            .0
            .visual_target
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = None;
    }
}

/// The conversation controller. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("busy", &self.is_busy())
            .field("visual_aid_target", &self.visual_aid_target())
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Creates an orchestrator starting with `persona`.
    #[must_use]
    pub fn new(
        client: Arc<dyn GenerationClient>,
        persona: PersonaId,
        quiz_settings: QuizSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                client,
                state: Mutex::new(ChatState {
                    persona,
                    log: MessageLog::new(),
                    quiz: QuizEngine::new(quiz_settings.clone()),
                    staged: None,
                    epoch: 0,
                }),
                busy: AtomicBool::new(false),
                visual_target: std::sync::Mutex::new(None),
                events: EventBroadcaster::default(),
                quiz_settings,
            }),
        }
    }

    /// Creates an orchestrator from configuration.
    #[must_use]
    pub fn from_config(client: Arc<dyn GenerationClient>, config: &Config) -> Self {
        Self::new(client, config.default_persona, config.quiz.clone())
    }

    /// Subscribes to state-change events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<HubEvent> {
        self.inner.events.subscribe()
    }

    /// The event broadcaster.
    #[must_use]
    pub fn events(&self) -> &EventBroadcaster {
        &self.inner.events
    }

    /// Whether a text/quiz request is in flight.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.inner.busy.load(Ordering::SeqCst)
    }

    /// Message currently being enriched with a visual aid.
    #[must_use]
    pub fn visual_aid_target(&self) -> Option<MessageId> {
        *self
            .inner
            .visual_target
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Quiz settings in use.
    #[must_use]
    pub fn quiz_settings(&self) -> &QuizSettings {
        &self.inner.quiz_settings
    }

    /// The active persona.
    pub async fn active_persona(&self) -> PersonaId {
        self.inner.state.lock().await.persona
    }

    /// A copy of the message log.
    pub async fn messages(&self) -> Vec<Message> {
        self.inner.state.lock().await.log.messages().to_vec()
    }

    /// Serializable view of the whole conversation.
    pub async fn snapshot(&self) -> ChatSnapshot {
        let state = self.inner.state.lock().await;
        ChatSnapshot {
            persona: state.persona,
            messages: state.log.messages().to_vec(),
            quiz: state.quiz.session().map(quiz::QuizSession::view),
            staged_attachment: state.staged.as_ref().map(|a| a.name.clone()),
            busy: self.is_busy(),
            visual_aid_target: self.visual_aid_target(),
            celebrating: state.quiz.is_celebrating(Instant::now()),
        }
    }

    /// Switches persona, clearing the log, the quiz and the staged attachment.
    ///
    /// Requests still in flight resolve into a discarded result.
    pub async fn select_persona(&self, persona: PersonaId) {
        let mut state = self.inner.state.lock().await;
        state.persona = persona;
        state.log.clear();
        state.quiz.discard();
        state.staged = None;
        state.epoch += 1;
        drop(state);

        info!(persona = %persona, "Persona selected");
        self.inner.events.send(HubEvent::persona_selected(persona));
    }

    /// Stages an attachment for the next send, replacing any staged one.
    pub async fn stage_attachment(&self, attachment: Attachment) {
        let name = attachment.name.clone();
        self.inner.state.lock().await.staged = Some(attachment);
        debug!(name = %name, "Attachment staged");
        self.inner.events.send(HubEvent::attachment_staged(name));
    }

    /// Name of the staged attachment, if any.
    pub async fn staged_attachment(&self) -> Option<String> {
        self.inner.state.lock().await.staged.as_ref().map(|a| a.name.clone())
    }

    /// Drops the staged attachment. Returns `true` if there was one.
    pub async fn clear_attachment(&self) -> bool {
        let cleared = self.inner.state.lock().await.staged.take().is_some();
        if cleared {
            self.inner.events.send(HubEvent::AttachmentCleared);
        }
        cleared
    }

    /// Handles one user turn.
    ///
    /// `attachment` takes precedence over a staged attachment; a staged one is
    /// consumed by any accepted send.
    pub async fn send_user_input(&self, text: &str, attachment: Option<Attachment>) -> SendOutcome {
        let mut state = self.inner.state.lock().await;

        let has_text = !text.trim().is_empty();
        if !has_text && attachment.is_none() && state.staged.is_none() {
            debug!("Ignoring empty input");
            return SendOutcome::Rejected {
                reason: RejectReason::Empty,
            };
        }

        let Some(_busy) = BusyGuard::acquire(&self.inner.busy) else {
            debug!("Rejecting input while a request is in flight");
            return SendOutcome::Rejected {
                reason: RejectReason::Busy,
            };
        };

        let attachment = attachment.or_else(|| state.staged.take());
        let content = match (&attachment, has_text) {
            (Some(file), false) => file.placeholder_text(),
            _ => text.to_string(),
        };
        let preview = attachment.as_ref().and_then(Attachment::preview);
        let user_message = state.log.push_user(content, preview).clone();
        let persona = state.persona;
        let epoch = state.epoch;
        drop(state);

        self.inner.events.send(HubEvent::message_appended(user_message));

        if persona.is_quiz() && is_quiz_request(text) {
            return self.start_quiz(text, epoch).await;
        }

        let prompt = if has_text { text } else { ATTACHMENT_ONLY_PROMPT };
        let result = self
            .inner
            .client
            .generate_text(persona.persona(), prompt, attachment.as_ref())
            .await;

        let mut state = self.inner.state.lock().await;
        if state.epoch != epoch {
            debug!(persona = %persona, "Discarding reply for a previous persona");
            return SendOutcome::Discarded;
        }

        match result {
            Ok(reply) => {
                let message = state.log.push_model(reply).clone();
                drop(state);

                let message_id = message.id;
                let visual_aid = wants_visual_aid(text);
                let context = message.content.clone();
                self.inner.events.send(HubEvent::message_appended(message));

                if visual_aid {
                    let this = self.clone();
                    tokio::spawn(async move {
                        this.generate_visual_aid(message_id, &context).await;
                    });
                }

                SendOutcome::Replied {
                    message_id,
                    visual_aid,
                }
            }
            Err(e) => {
                warn!(persona = %persona, error = %e, "Text generation failed");
                let message = state.log.push_model(TEXT_FAILURE_REPLY).clone();
                drop(state);

                let message_id = message.id;
                self.inner.events.send(HubEvent::message_appended(message));
                self.inner.events.send(HubEvent::error(e.to_string()));
                SendOutcome::Apologized { message_id }
            }
        }
    }

    async fn start_quiz(&self, topic: &str, epoch: u64) -> SendOutcome {
        let result = quiz::start_session(self.inner.client.as_ref(), topic).await;

        let mut state = self.inner.state.lock().await;
        if state.epoch != epoch {
            debug!(topic, "Discarding quiz for a previous persona");
            return SendOutcome::Discarded;
        }

        match result {
            Ok(session) => {
                let view = session.view();
                let session_id = state.quiz.install(session);
                drop(state);

                info!(topic, session_id, "Quiz started");
                self.inner.events.send(HubEvent::quiz_started(view));
                SendOutcome::QuizStarted {
                    topic: topic.to_string(),
                }
            }
            Err(e) => {
                warn!(topic, error = %e, "Quiz generation failed");
                let message = state.log.push_model(QUIZ_FAILURE_REPLY).clone();
                drop(state);

                let message_id = message.id;
                self.inner.events.send(HubEvent::message_appended(message));
                self.inner.events.send(HubEvent::error(e.to_string()));
                SendOutcome::QuizFailed { message_id }
            }
        }
    }

    /// Extracts a slide from `context`, generates an image for it and
    /// attaches both to `message_id`.
    ///
    /// Only one visual aid runs at a time; a request made while another is
    /// running is dropped. Failures leave the message untouched.
    pub async fn generate_visual_aid(&self, message_id: MessageId, context: &str) -> VisualAidOutcome {
        let Some(guard) = VisualGuard::acquire(&self.inner, message_id) else {
            debug!(message_id = %message_id, "Visual aid already in progress, dropping request");
            return VisualAidOutcome::Dropped;
        };
        self.run_visual_aid(guard, message_id, context).await
    }

    /// Starts a visual aid for an existing model reply, using the reply's
    /// text as context.
    ///
    /// The single-flight slot is claimed before this returns, so a busy
    /// slot is reported as [`VisualAidRequest::Dropped`] right away. The
    /// outcome itself is broadcast when generation finishes.
    pub async fn request_visual_aid(&self, message_id: MessageId) -> VisualAidRequest {
        let context = {
            let state = self.inner.state.lock().await;
            match state.log.get(message_id) {
                Some(message) if message.role != Role::Model => return VisualAidRequest::NotFound,
                Some(message) if message.visual_aid.is_some() => {
                    return VisualAidRequest::AlreadyAttached;
                }
                Some(message) => message.content.clone(),
                None => return VisualAidRequest::NotFound,
            }
        };

        let Some(guard) = VisualGuard::acquire(&self.inner, message_id) else {
            debug!(message_id = %message_id, "Visual aid already in progress, dropping request");
            return VisualAidRequest::Dropped;
        };

        info!(message_id = %message_id, "Visual aid requested");
        let this = self.clone();
        tokio::spawn(async move {
            this.run_visual_aid(guard, message_id, &context).await;
        });
        VisualAidRequest::Started
    }

    async fn run_visual_aid(
        &self,
        _guard: VisualGuard,
        message_id: MessageId,
        context: &str,
    ) -> VisualAidOutcome {
        if self.inner.state.lock().await.log.get(message_id).is_none() {
            debug!(message_id = %message_id, "Visual aid target is gone");
            return VisualAidOutcome::TargetGone;
        }

        self.inner.events.send(HubEvent::visual_aid_started(message_id));

        let slide = self.inner.client.extract_slide_content(context).await;
        let prompt = build_visual_prompt(&slide.title);

        match self.inner.client.generate_image(&prompt).await {
            Ok(Some(image_url)) => {
                let aid = VisualAid {
                    title: slide.title,
                    points: slide.points,
                    image_url,
                };
                let attached = self
                    .inner
                    .state
                    .lock()
                    .await
                    .log
                    .attach_visual_aid(message_id, aid.clone());

                if attached {
                    info!(message_id = %message_id, "Visual aid attached");
                    self.inner.events.send(HubEvent::visual_aid_attached(message_id, aid));
                    VisualAidOutcome::Attached
                } else {
                    debug!(message_id = %message_id, "Visual aid target is gone, dropping image");
                    VisualAidOutcome::TargetGone
                }
            }
            Ok(None) => {
                warn!(message_id = %message_id, "Image generation returned no image");
                self.inner
                    .events
                    .send(HubEvent::visual_aid_failed(message_id, "no image produced"));
                VisualAidOutcome::NoImage
            }
            Err(e) => {
                warn!(message_id = %message_id, error = %e, "Visual aid generation failed");
                self.inner
                    .events
                    .send(HubEvent::visual_aid_failed(message_id, e.to_string()));
                VisualAidOutcome::Failed
            }
        }
    }

    /// Locks in an answer on the current quiz question.
    ///
    /// Returns `None` if there is no question to answer or an answer is
    /// already locked in.
    pub async fn lock_answer(&self, option: usize) -> Option<(AnswerFeedback, AnswerTicket)> {
        let mut state = self.inner.state.lock().await;
        let feedback = state.quiz.lock_in(option)?;
        let ticket = AnswerTicket {
            epoch: state.epoch,
            session_id: state.quiz.session_id(),
        };
        drop(state);

        debug!(
            question = feedback.question_index,
            correct = feedback.is_correct,
            "Answer locked in"
        );
        self.inner.events.send(HubEvent::answer_locked(feedback.clone()));
        Some((feedback, ticket))
    }

    /// Commits a locked-in answer.
    ///
    /// Returns `None` if the session the ticket belongs to is gone.
    pub async fn commit_answer(&self, ticket: AnswerTicket) -> Option<QuizAdvance> {
        let mut state = self.inner.state.lock().await;
        if state.epoch != ticket.epoch || state.quiz.session_id() != ticket.session_id {
            debug!("Quiz session changed before the answer was committed");
            return None;
        }

        let advance = state.quiz.advance(Instant::now())?;
        let view = state.quiz.session().map(quiz::QuizSession::view);
        let feedback = state.quiz.session().map(quiz::QuizSession::feedback);
        let celebration = state.quiz.celebration_duration();
        drop(state);

        match &advance {
            QuizAdvance::Advanced { .. } => {
                if let Some(view) = view {
                    self.inner.events.send(HubEvent::quiz_advanced(view));
                }
            }
            QuizAdvance::Completed {
                score,
                total,
                percentage,
                celebrate,
            } => {
                info!(score, total, percentage, "Quiz completed");
                self.inner.events.send(HubEvent::quiz_completed(
                    *score,
                    *total,
                    *percentage,
                    feedback.unwrap_or_default(),
                ));
                if *celebrate {
                    self.inner
                        .events
                        .send(HubEvent::celebration_started(celebration.as_secs()));
                    let this = self.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(celebration).await;
                        let state = this.inner.state.lock().await;
                        let same_session = state.epoch == ticket.epoch
                            && state.quiz.session_id() == ticket.session_id;
                        drop(state);
                        if same_session {
                            this.inner.events.send(HubEvent::CelebrationEnded);
                        }
                    });
                }
            }
        }

        Some(advance)
    }

    /// Locks in an answer, waits out the feedback delay, then commits it.
    pub async fn submit_answer(&self, option: usize) -> Option<QuizAdvance> {
        let (_, ticket) = self.lock_answer(option).await?;
        tokio::time::sleep(self.inner.quiz_settings.feedback_delay()).await;
        self.commit_answer(ticket).await
    }

    /// Discards the quiz session, keeping the chat log.
    pub async fn discard_quiz(&self) -> bool {
        let discarded = self.inner.state.lock().await.quiz.discard();
        if discarded {
            info!("Quiz discarded");
            self.inner.events.send(HubEvent::QuizDiscarded);
        }
        discarded
    }

    /// Review input for a completed quiz.
    pub async fn quiz_review(&self) -> Option<studyhub_review::ReviewInput> {
        self.inner.state.lock().await.quiz.review_input()
    }
}
