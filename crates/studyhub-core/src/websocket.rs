//! WebSocket event types and broadcasting for observing a chat session.
//!
//! Every state change the [`Orchestrator`](crate::Orchestrator) makes is
//! published as a [`HubEvent`]. Connected clients receive a `connected`
//! event carrying a full snapshot, followed by every event broadcast after
//! they subscribed.
//!
//! # Event Types
//!
//! - `connected` - Sent when a client connects, includes a full snapshot
//! - `persona_selected` - The persona changed and the conversation was reset
//! - `message_appended` - A user or model message was added
//! - `quiz_started` / `quiz_advanced` / `quiz_completed` - Quiz progress
//! - `answer_locked` - An answer is being shown before the quiz advances
//! - `visual_aid_started` / `visual_aid_attached` / `visual_aid_failed`
//! - `error` - A generation failure was absorbed

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::api::AppState;
use crate::message::{Message, MessageId, VisualAid};
use crate::orchestrator::ChatSnapshot;
use crate::persona::PersonaId;
use crate::quiz::{AnswerFeedback, QuizView};

// ============================================================================
// Event Payloads
// ============================================================================

/// Payload for the `connected` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectedPayload {
    /// The whole conversation at connection time.
    pub snapshot: ChatSnapshot,
}

/// Payload for the `persona_selected` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonaPayload {
    /// The newly active persona.
    pub persona: PersonaId,
}

/// Payload for the `message_appended` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePayload {
    /// The new message.
    pub message: Message,
}

/// Payload for the `attachment_staged` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentPayload {
    /// File name of the staged attachment.
    pub name: String,
}

/// Payload for `quiz_started` and `quiz_advanced`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizPayload {
    /// The session after the change.
    pub quiz: QuizView,
}

/// Payload for the `answer_locked` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerPayload {
    /// Correctness and explanation for the locked-in answer.
    pub feedback: AnswerFeedback,
}

/// Payload for the `quiz_completed` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizCompletedPayload {
    /// Final score.
    pub score: usize,
    /// Number of questions.
    pub total: usize,
    /// Whole-number percentage.
    pub percentage: u32,
    /// Feedback message for the score.
    pub feedback: String,
}

/// Payload for the `celebration_started` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CelebrationPayload {
    /// How long the celebration lasts.
    pub seconds: u64,
}

/// Payload for the `visual_aid_started` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisualAidTargetPayload {
    /// Message being enriched.
    pub message_id: MessageId,
}

/// Payload for the `visual_aid_attached` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisualAidPayload {
    /// Message the visual aid was attached to.
    pub message_id: MessageId,
    /// The visual aid.
    pub visual_aid: VisualAid,
}

/// Payload for the `visual_aid_failed` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisualAidFailedPayload {
    /// Message that stays without a visual aid.
    pub message_id: MessageId,
    /// What went wrong.
    pub reason: String,
}

/// Payload for the `error` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Human-readable error message.
    pub message: String,
}

// ============================================================================
// Event Enum
// ============================================================================

/// Chat session events.
///
/// All events are serialized as JSON objects with "event" and "payload" fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum HubEvent {
    /// Sent when a client connects.
    Connected(ConnectedPayload),
    /// The persona changed.
    PersonaSelected(PersonaPayload),
    /// A message was appended.
    MessageAppended(MessagePayload),
    /// An attachment was staged for the next send.
    AttachmentStaged(AttachmentPayload),
    /// The staged attachment was dropped.
    AttachmentCleared,
    /// A quiz session started.
    QuizStarted(QuizPayload),
    /// An answer was locked in.
    AnswerLocked(AnswerPayload),
    /// The quiz moved to the next question.
    QuizAdvanced(QuizPayload),
    /// The last question was answered.
    QuizCompleted(QuizCompletedPayload),
    /// The quiz session was discarded.
    QuizDiscarded,
    /// The score earned the celebration.
    CelebrationStarted(CelebrationPayload),
    /// The celebration is over.
    CelebrationEnded,
    /// A visual aid is being generated.
    VisualAidStarted(VisualAidTargetPayload),
    /// A visual aid was attached.
    VisualAidAttached(VisualAidPayload),
    /// A visual aid could not be produced.
    VisualAidFailed(VisualAidFailedPayload),
    /// A generation failure was absorbed.
    Error(ErrorPayload),
}

impl HubEvent {
    /// Creates a `Connected` event.
    #[must_use]
    pub const fn connected(snapshot: ChatSnapshot) -> Self {
        Self::Connected(ConnectedPayload { snapshot })
    }

    /// Creates a `PersonaSelected` event.
    #[must_use]
    pub const fn persona_selected(persona: PersonaId) -> Self {
        Self::PersonaSelected(PersonaPayload { persona })
    }

    /// Creates a `MessageAppended` event.
    #[must_use]
    pub const fn message_appended(message: Message) -> Self {
        Self::MessageAppended(MessagePayload { message })
    }

    /// Creates an `AttachmentStaged` event.
    #[must_use]
    pub const fn attachment_staged(name: String) -> Self {
        Self::AttachmentStaged(AttachmentPayload { name })
    }

    /// Creates a `QuizStarted` event.
    #[must_use]
    pub const fn quiz_started(quiz: QuizView) -> Self {
        Self::QuizStarted(QuizPayload { quiz })
    }

    /// Creates an `AnswerLocked` event.
    #[must_use]
    pub const fn answer_locked(feedback: AnswerFeedback) -> Self {
        Self::AnswerLocked(AnswerPayload { feedback })
    }

    /// Creates a `QuizAdvanced` event.
    #[must_use]
    pub const fn quiz_advanced(quiz: QuizView) -> Self {
        Self::QuizAdvanced(QuizPayload { quiz })
    }

    /// Creates a `QuizCompleted` event.
    #[must_use]
    pub const fn quiz_completed(score: usize, total: usize, percentage: u32, feedback: String) -> Self {
        Self::QuizCompleted(QuizCompletedPayload {
            score,
            total,
            percentage,
            feedback,
        })
    }

    /// Creates a `CelebrationStarted` event.
    #[must_use]
    pub const fn celebration_started(seconds: u64) -> Self {
        Self::CelebrationStarted(CelebrationPayload { seconds })
    }

    /// Creates a `VisualAidStarted` event.
    #[must_use]
    pub const fn visual_aid_started(message_id: MessageId) -> Self {
        Self::VisualAidStarted(VisualAidTargetPayload { message_id })
    }

    /// Creates a `VisualAidAttached` event.
    #[must_use]
    pub const fn visual_aid_attached(message_id: MessageId, visual_aid: VisualAid) -> Self {
        Self::VisualAidAttached(VisualAidPayload {
            message_id,
            visual_aid,
        })
    }

    /// Creates a `VisualAidFailed` event.
    #[must_use]
    pub fn visual_aid_failed(message_id: MessageId, reason: impl Into<String>) -> Self {
        Self::VisualAidFailed(VisualAidFailedPayload {
            message_id,
            reason: reason.into(),
        })
    }

    /// Creates an `Error` event.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(ErrorPayload {
            message: message.into(),
        })
    }

    /// Returns the event name as a string.
    #[must_use]
    pub const fn event_name(&self) -> &'static str {
        match self {
            Self::Connected(_) => "connected",
            Self::PersonaSelected(_) => "persona_selected",
            Self::MessageAppended(_) => "message_appended",
            Self::AttachmentStaged(_) => "attachment_staged",
            Self::AttachmentCleared => "attachment_cleared",
            Self::QuizStarted(_) => "quiz_started",
            Self::AnswerLocked(_) => "answer_locked",
            Self::QuizAdvanced(_) => "quiz_advanced",
            Self::QuizCompleted(_) => "quiz_completed",
            Self::QuizDiscarded => "quiz_discarded",
            Self::CelebrationStarted(_) => "celebration_started",
            Self::CelebrationEnded => "celebration_ended",
            Self::VisualAidStarted(_) => "visual_aid_started",
            Self::VisualAidAttached(_) => "visual_aid_attached",
            Self::VisualAidFailed(_) => "visual_aid_failed",
            Self::Error(_) => "error",
        }
    }
}

// ============================================================================
// Event Broadcaster
// ============================================================================

/// Broadcasts chat events to every subscriber.
///
/// Events are not persisted for disconnected clients; a reconnecting client
/// gets a fresh snapshot instead.
#[derive(Debug, Clone)]
pub struct EventBroadcaster {
    sender: broadcast::Sender<HubEvent>,
}

impl EventBroadcaster {
    /// Creates a broadcaster buffering up to `capacity` events per subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Creates a new subscriber.
    ///
    /// A subscriber that falls behind receives a `Lagged` error and misses
    /// the overwritten events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<HubEvent> {
        self.sender.subscribe()
    }

    /// Broadcasts an event; returns how many subscribers will receive it.
    pub fn send(&self, event: HubEvent) -> usize {
        // Err only means nobody is listening
        self.sender.send(event).unwrap_or(0)
    }

    /// Number of active subscribers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(100)
    }
}

// ============================================================================
// WebSocket Handler
// ============================================================================

/// Maximum number of missed pong responses before disconnecting.
const MAX_MISSED_PONGS: u8 = 3;

/// Interval between heartbeat pings.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Upgrades `GET /ws` to a WebSocket streaming [`HubEvent`]s.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    info!("New WebSocket connection request");
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Serves one WebSocket client.
///
/// Sends `connected` with a snapshot first, then forwards broadcast events.
/// Pings every 30 seconds and closes after 3 missed pongs.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();

    // Subscribe before taking the snapshot so nothing falls in between
    let mut event_receiver = state.orchestrator.subscribe();
    let snapshot = state.orchestrator.snapshot().await;

    let connected_json = match serde_json::to_string(&HubEvent::connected(snapshot)) {
        Ok(json) => json,
        Err(e) => {
            warn!("Failed to serialize connected event: {}", e);
            return;
        }
    };

    if sender.send(WsMessage::Text(connected_json)).await.is_err() {
        debug!("Client disconnected before receiving connected event");
        return;
    }

    info!("WebSocket client connected, sent snapshot");

    let mut heartbeat = interval(HEARTBEAT_INTERVAL);
    // The first tick completes immediately
    heartbeat.tick().await;
    let mut missed_pongs = 0u8;

    loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(WsMessage::Pong(_))) => {
                        missed_pongs = 0;
                        debug!("Received pong from client");
                    }
                    Some(Ok(WsMessage::Close(_))) => {
                        info!("Client requested close");
                        break;
                    }
                    Some(Ok(WsMessage::Ping(data))) => {
                        if sender.send(WsMessage::Pong(data)).await.is_err() {
                            debug!("Failed to send pong, client disconnected");
                            break;
                        }
                    }
                    Some(Ok(WsMessage::Text(_) | WsMessage::Binary(_))) => {
                        debug!("Ignoring data message from client");
                    }
                    Some(Err(e)) => {
                        debug!("WebSocket error: {}", e);
                        break;
                    }
                    None => {
                        debug!("WebSocket stream ended");
                        break;
                    }
                }
            }

            event = event_receiver.recv() => {
                match event {
                    Ok(hub_event) => {
                        let json = match serde_json::to_string(&hub_event) {
                            Ok(j) => j,
                            Err(e) => {
                                warn!(event = hub_event.event_name(), "Failed to serialize event: {}", e);
                                continue;
                            }
                        };

                        if sender.send(WsMessage::Text(json)).await.is_err() {
                            debug!("Failed to send event, client disconnected");
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Client lagged, missed {} events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("Broadcaster closed");
                        break;
                    }
                }
            }

            _ = heartbeat.tick() => {
                if sender.send(WsMessage::Ping(vec![])).await.is_err() {
                    debug!("Failed to send ping, client disconnected");
                    break;
                }
                missed_pongs += 1;
                if missed_pongs >= MAX_MISSED_PONGS {
                    info!("Client missed {} pongs, closing connection", MAX_MISSED_PONGS);
                    break;
                }
            }
        }
    }

    info!("WebSocket client disconnected");
}
