//! HTTP API endpoints for a StudyHub chat session.
//!
//! A browser front-end drives the [`Orchestrator`] through these routes and
//! watches the results on `/ws`.
//!
//! # Endpoints
//!
//! - `GET /api/personas` - List the persona catalog
//! - `GET /api/config` - Effective configuration
//! - `GET /api/state` - Snapshot of the conversation
//! - `POST /api/persona` - Switch persona (resets the conversation)
//! - `POST /api/messages` - Send a user turn
//! - `POST /api/messages/:id/visual-aid` - Illustrate an existing reply
//! - `POST /api/attachment` / `DELETE /api/attachment` - Stage or drop a file
//! - `POST /api/quiz/answer` - Answer the current quiz question
//! - `DELETE /api/quiz` - Discard the quiz session
//! - `GET /api/quiz/review` / `GET /api/quiz/review.md` - Review a completed quiz
//! - `GET /ws` - Event stream
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use studyhub_core::{create_router, AppState, Config, GeminiClient, Orchestrator};
//!
//! # async fn example() -> studyhub_core::Result<()> {
//! let config = Config::default();
//! let client = GeminiClient::new(config.generation.clone(), None, config.quiz.generation_attempts)?;
//! let orchestrator = Orchestrator::from_config(Arc::new(client), &config);
//!
//! let router = create_router(AppState::new(config, orchestrator));
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:3000").await?;
//! axum::serve(listener, router).await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use studyhub_review::{MarkdownGenerator, Review, ReviewGenerator};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{debug, info, warn};

use crate::attachment::Attachment;
use crate::config::Config;
use crate::message::MessageId;
use crate::orchestrator::{
    ChatSnapshot, Orchestrator, RejectReason, SendOutcome, VisualAidRequest,
};
use crate::persona::{self, BotPersona, PersonaId};
use crate::quiz::AnswerFeedback;
use crate::websocket::ws_handler;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request body for `POST /api/persona`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectPersonaRequest {
    /// Persona identifier, case-insensitive.
    pub persona: String,
}

/// A file sent inline as base64.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentUpload {
    /// File name.
    pub name: String,
    /// MIME type.
    pub mime_type: String,
    /// Base64-encoded contents, without a `data:` prefix.
    pub data: String,
}

impl AttachmentUpload {
    fn decode(&self) -> crate::Result<Attachment> {
        Attachment::from_base64(self.name.clone(), self.mime_type.clone(), &self.data)
    }
}

/// Request body for `POST /api/messages`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SendMessageRequest {
    /// Message text; may be empty when an attachment is present.
    #[serde(default)]
    pub text: String,
    /// File sent with this message, taking precedence over a staged one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<AttachmentUpload>,
}

/// Response body for `POST /api/attachment`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagedResponse {
    /// Name of the staged file.
    pub staged: String,
}

/// Response body for `DELETE /api/attachment`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClearedResponse {
    /// Whether an attachment was dropped.
    pub cleared: bool,
}

/// Request body for `POST /api/quiz/answer`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerRequest {
    /// Zero-based option index.
    pub option: usize,
}

/// Response body for `DELETE /api/quiz`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscardedResponse {
    /// Whether a session was discarded.
    pub discarded: bool,
}

/// Error response body returned on failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Description of the error.
    pub error: String,
}

// ============================================================================
// Application State
// ============================================================================

/// Shared application state for the HTTP server.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Loaded configuration.
    pub config: Config,
    /// The conversation being served.
    pub orchestrator: Orchestrator,
}

impl AppState {
    /// Creates the state served by [`create_router`].
    #[must_use]
    pub const fn new(config: Config, orchestrator: Orchestrator) -> Self {
        Self {
            config,
            orchestrator,
        }
    }
}

// ============================================================================
// API Error Type
// ============================================================================

#[derive(Debug)]
enum ApiError {
    /// The request body is invalid.
    BadRequest(String),
    /// The requested resource does not exist yet.
    NotFound(String),
    /// The request conflicts with the current state.
    Conflict(String),
    /// Something failed server-side.
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Self::Conflict(msg) => (StatusCode::CONFLICT, msg),
            Self::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(ErrorResponse { error: message });
        (status, body).into_response()
    }
}

// ============================================================================
// Router Setup
// ============================================================================

/// Creates the HTTP router.
///
/// Routes live under `/api`, the event stream at `/ws`. CORS is permissive
/// so a front-end served from another origin can call in.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/personas", get(handle_personas))
        .route("/config", get(handle_config))
        .route("/state", get(handle_state))
        .route("/persona", post(handle_select_persona))
        .route("/messages", post(handle_send_message))
        .route("/messages/:id/visual-aid", post(handle_visual_aid))
        .route(
            "/attachment",
            post(handle_stage_attachment).delete(handle_clear_attachment),
        )
        .route("/quiz", delete(handle_discard_quiz))
        .route("/quiz/answer", post(handle_answer))
        .route("/quiz/review", get(handle_review))
        .route("/quiz/review.md", get(handle_review_markdown));

    Router::new()
        .nest("/api", api_routes)
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(Arc::new(state))
}

// ============================================================================
// Handlers
// ============================================================================

/// Handler for `GET /api/personas`.
async fn handle_personas() -> Json<&'static [BotPersona]> {
    Json(persona::all())
}

/// Handler for `GET /api/config`.
///
/// Lets a front-end match its timers to the quiz settings.
async fn handle_config(State(state): State<Arc<AppState>>) -> Json<Config> {
    Json(state.config.clone())
}

/// Handler for `GET /api/state`.
async fn handle_state(State(state): State<Arc<AppState>>) -> Json<ChatSnapshot> {
    Json(state.orchestrator.snapshot().await)
}

/// Handler for `POST /api/persona`.
async fn handle_select_persona(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SelectPersonaRequest>,
) -> Result<Json<ChatSnapshot>, ApiError> {
    let persona = PersonaId::parse(&request.persona).map_err(|e| {
        warn!(persona = %request.persona, "Rejecting unknown persona");
        ApiError::BadRequest(e.to_string())
    })?;

    state.orchestrator.select_persona(persona).await;
    Ok(Json(state.orchestrator.snapshot().await))
}

/// Handler for `POST /api/messages`.
///
/// Resolves once the reply (or its fallback) is in the log. A requested
/// visual aid arrives later over `/ws`.
async fn handle_send_message(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SendMessageRequest>,
) -> Result<Json<SendOutcome>, ApiError> {
    let attachment = request
        .attachment
        .as_ref()
        .map(AttachmentUpload::decode)
        .transpose()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    debug!(
        text_len = request.text.len(),
        has_attachment = attachment.is_some(),
        "Received user message"
    );

    match state
        .orchestrator
        .send_user_input(&request.text, attachment)
        .await
    {
        SendOutcome::Rejected {
            reason: RejectReason::Empty,
        } => Err(ApiError::BadRequest(
            "Message has no text and no attachment".to_string(),
        )),
        SendOutcome::Rejected {
            reason: RejectReason::Busy,
        } => Err(ApiError::Conflict(
            "Another message is still being answered".to_string(),
        )),
        outcome => Ok(Json(outcome)),
    }
}

/// Handler for `POST /api/messages/:id/visual-aid`.
///
/// Answers as soon as generation has started; the slide and image arrive
/// over `/ws`.
async fn handle_visual_aid(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Result<Json<VisualAidRequest>, ApiError> {
    match state.orchestrator.request_visual_aid(MessageId(id)).await {
        VisualAidRequest::NotFound => Err(ApiError::NotFound(format!(
            "No model reply with id {id}"
        ))),
        VisualAidRequest::Dropped => Err(ApiError::Conflict(
            "Another visual aid is still being generated".to_string(),
        )),
        VisualAidRequest::AlreadyAttached => Err(ApiError::Conflict(format!(
            "Message {id} already has a visual aid"
        ))),
        started @ VisualAidRequest::Started => Ok(Json(started)),
    }
}

/// Handler for `POST /api/attachment`.
async fn handle_stage_attachment(
    State(state): State<Arc<AppState>>,
    Json(upload): Json<AttachmentUpload>,
) -> Result<Json<StagedResponse>, ApiError> {
    let attachment = upload
        .decode()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let staged = attachment.name.clone();
    state.orchestrator.stage_attachment(attachment).await;
    Ok(Json(StagedResponse { staged }))
}

/// Handler for `DELETE /api/attachment`.
async fn handle_clear_attachment(State(state): State<Arc<AppState>>) -> Json<ClearedResponse> {
    let cleared = state.orchestrator.clear_attachment().await;
    Json(ClearedResponse { cleared })
}

/// Handler for `POST /api/quiz/answer`.
///
/// Returns the feedback immediately; the quiz advances after the configured
/// delay and the result is broadcast on `/ws`.
async fn handle_answer(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AnswerRequest>,
) -> Result<Json<AnswerFeedback>, ApiError> {
    let Some((feedback, ticket)) = state.orchestrator.lock_answer(request.option).await else {
        return Err(ApiError::Conflict(
            "No quiz question is waiting for an answer".to_string(),
        ));
    };

    let orchestrator = state.orchestrator.clone();
    let delay = orchestrator.quiz_settings().feedback_delay();
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        orchestrator.commit_answer(ticket).await;
    });

    Ok(Json(feedback))
}

/// Handler for `DELETE /api/quiz`.
async fn handle_discard_quiz(State(state): State<Arc<AppState>>) -> Json<DiscardedResponse> {
    let discarded = state.orchestrator.discard_quiz().await;
    Json(DiscardedResponse { discarded })
}

async fn completed_review(state: &AppState) -> Result<Review, ApiError> {
    let input = state
        .orchestrator
        .quiz_review()
        .await
        .ok_or_else(|| ApiError::NotFound("No completed quiz to review".to_string()))?;

    ReviewGenerator::new(input).generate().map_err(|e| {
        warn!(error = %e, "Failed to build quiz review");
        ApiError::Internal(e.to_string())
    })
}

/// Handler for `GET /api/quiz/review`.
async fn handle_review(State(state): State<Arc<AppState>>) -> Result<Json<Review>, ApiError> {
    let review = completed_review(&state).await?;
    info!(topic = %review.topic, score = review.summary.score, "Serving quiz review");
    Ok(Json(review))
}

/// Handler for `GET /api/quiz/review.md`.
async fn handle_review_markdown(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let review = completed_review(&state).await?;
    let markdown = MarkdownGenerator::new(&review).generate();
    Ok((
        [(header::CONTENT_TYPE, "text/markdown; charset=utf-8")],
        markdown,
    )
        .into_response())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use axum::{
        body::Body,
        http::{Method, Request, StatusCode},
    };
    use serde_json::{json, Value};
    use tower::util::ServiceExt;

    use super::*;
    use crate::config::QuizSettings;
    use crate::generation::testing::{sample_answers, ScriptedClient};

    fn test_state(persona: PersonaId) -> AppState {
        let quiz = QuizSettings {
            feedback_delay_ms: 0,
            celebration_secs: 0,
            ..QuizSettings::default()
        };
        let orchestrator = Orchestrator::new(Arc::new(ScriptedClient::new()), persona, quiz);
        AppState::new(Config::default(), orchestrator)
    }

    async fn call(router: Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Vec<u8>) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };

        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, bytes.to_vec())
    }

    fn json_body(bytes: &[u8]) -> Value {
        serde_json::from_slice(bytes).unwrap()
    }

    #[tokio::test]
    async fn test_personas_lists_catalog() {
        let router = create_router(test_state(PersonaId::Coding));
        let (status, body) = call(router, Method::GET, "/api/personas", None).await;

        assert_eq!(status, StatusCode::OK);
        let personas = json_body(&body);
        let personas = personas.as_array().unwrap();
        assert_eq!(personas.len(), 6);
        assert_eq!(personas[0]["id"], "CODING");
        assert!(personas[0].get("systemPrompt").is_none());
    }

    #[tokio::test]
    async fn test_state_starts_empty() {
        let router = create_router(test_state(PersonaId::Resume));
        let (status, body) = call(router, Method::GET, "/api/state", None).await;

        assert_eq!(status, StatusCode::OK);
        let snapshot: ChatSnapshot = serde_json::from_slice(&body).unwrap();
        assert_eq!(snapshot.persona, PersonaId::Resume);
        assert!(snapshot.messages.is_empty());
        assert!(!snapshot.busy);
    }

    #[tokio::test]
    async fn test_select_persona_case_insensitive() {
        let state = test_state(PersonaId::Coding);
        let router = create_router(state.clone());
        let (status, body) = call(
            router,
            Method::POST,
            "/api/persona",
            Some(json!({ "persona": "quizz" })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json_body(&body)["persona"], "QUIZZ");
        assert_eq!(state.orchestrator.active_persona().await, PersonaId::Quizz);
    }

    #[tokio::test]
    async fn test_select_unknown_persona_is_bad_request() {
        let router = create_router(test_state(PersonaId::Coding));
        let (status, body) = call(
            router,
            Method::POST,
            "/api/persona",
            Some(json!({ "persona": "wizard" })),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json_body(&body)["error"].as_str().unwrap().contains("wizard"));
    }

    #[tokio::test]
    async fn test_config_reports_quiz_settings() {
        let config = Config {
            quiz: QuizSettings {
                feedback_delay_ms: 250,
                ..QuizSettings::default()
            },
            ..Config::default()
        };
        let orchestrator = Orchestrator::from_config(Arc::new(ScriptedClient::new()), &config);
        let router = create_router(AppState::new(config, orchestrator));

        let (status, body) = call(router, Method::GET, "/api/config", None).await;

        assert_eq!(status, StatusCode::OK);
        let body = json_body(&body);
        assert_eq!(body["quiz"]["feedbackDelayMs"], 250);
        assert_eq!(body["defaultPersona"], "CODING");
    }

    #[tokio::test]
    async fn test_visual_aid_for_existing_reply() {
        let state = test_state(PersonaId::Coding);
        let router = create_router(state.clone());
        state.orchestrator.send_user_input("what is a stack?", None).await;
        let reply = state.orchestrator.messages().await[1].id;

        let (status, body) = call(
            router,
            Method::POST,
            &format!("/api/messages/{reply}/visual-aid"),
            None,
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json_body(&body), json!("started"));

        for _ in 0..200 {
            if state.orchestrator.visual_aid_target().is_none() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        let messages = state.orchestrator.messages().await;
        assert!(messages[1].visual_aid.is_some());
    }

    #[tokio::test]
    async fn test_visual_aid_for_missing_or_user_message_is_not_found() {
        let state = test_state(PersonaId::Coding);
        state.orchestrator.send_user_input("what is a stack?", None).await;
        let user = state.orchestrator.messages().await[0].id;

        for uri in [
            format!("/api/messages/{user}/visual-aid"),
            "/api/messages/999/visual-aid".to_string(),
        ] {
            let router = create_router(state.clone());
            let (status, body) = call(router, Method::POST, &uri, None).await;
            assert_eq!(status, StatusCode::NOT_FOUND);
            assert!(json_body(&body)["error"].as_str().unwrap().contains("No model reply"));
        }
    }

    #[tokio::test]
    async fn test_visual_aid_while_another_runs_is_conflict() {
        let client = Arc::new(ScriptedClient::new().with_image_gate());
        let orchestrator = Orchestrator::new(client.clone(), PersonaId::Coding, QuizSettings::default());
        let state = AppState::new(Config::default(), orchestrator);
        state.orchestrator.send_user_input("first", None).await;
        state.orchestrator.send_user_input("second", None).await;
        let messages = state.orchestrator.messages().await;

        let (status, _) = call(
            create_router(state.clone()),
            Method::POST,
            &format!("/api/messages/{}/visual-aid", messages[1].id),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = call(
            create_router(state.clone()),
            Method::POST,
            &format!("/api/messages/{}/visual-aid", messages[3].id),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(json_body(&body)["error"].as_str().unwrap().contains("still being generated"));

        client.release_image();
    }

    #[tokio::test]
    async fn test_send_message_returns_outcome() {
        let router = create_router(test_state(PersonaId::Coding));
        let (status, body) = call(
            router,
            Method::POST,
            "/api/messages",
            Some(json!({ "text": "explain recursion" })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let outcome: SendOutcome = serde_json::from_slice(&body).unwrap();
        assert!(matches!(outcome, SendOutcome::Replied { visual_aid: false, .. }));
    }

    #[tokio::test]
    async fn test_send_empty_message_is_bad_request() {
        let router = create_router(test_state(PersonaId::Coding));
        let (status, _) = call(router, Method::POST, "/api/messages", Some(json!({ "text": "" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_send_message_with_bad_base64_is_bad_request() {
        let router = create_router(test_state(PersonaId::Coding));
        let (status, _) = call(
            router,
            Method::POST,
            "/api/messages",
            Some(json!({
                "text": "",
                "attachment": { "name": "a.png", "mimeType": "image/png", "data": "***" }
            })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_stage_and_clear_attachment() {
        let state = test_state(PersonaId::Resume);
        let (status, body) = call(
            create_router(state.clone()),
            Method::POST,
            "/api/attachment",
            Some(json!({ "name": "notes.txt", "mimeType": "text/plain", "data": "aGVsbG8=" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json_body(&body)["staged"], "notes.txt");

        let (_, body) = call(create_router(state.clone()), Method::DELETE, "/api/attachment", None).await;
        assert_eq!(json_body(&body)["cleared"], true);
        let (_, body) = call(create_router(state), Method::DELETE, "/api/attachment", None).await;
        assert_eq!(json_body(&body)["cleared"], false);
    }

    #[tokio::test]
    async fn test_answer_without_quiz_is_conflict() {
        let router = create_router(test_state(PersonaId::Quizz));
        let (status, _) = call(router, Method::POST, "/api/quiz/answer", Some(json!({ "option": 0 }))).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_review_missing_until_complete() {
        let router = create_router(test_state(PersonaId::Quizz));
        let (status, _) = call(router, Method::GET, "/api/quiz/review", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_quiz_answer_and_review() {
        let state = test_state(PersonaId::Quizz);
        state.orchestrator.send_user_input("quiz sorting", None).await;

        let (status, body) = call(
            create_router(state.clone()),
            Method::POST,
            "/api/quiz/answer",
            Some(json!({ "option": 0 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let feedback: AnswerFeedback = serde_json::from_slice(&body).unwrap();
        assert!(feedback.is_correct);

        // Finish the rest directly so the review is ready
        for _ in 0..100 {
            if state.orchestrator.snapshot().await.quiz.unwrap().user_answers.len() == 1 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        for answer in sample_answers().into_iter().skip(1) {
            state.orchestrator.submit_answer(answer).await;
        }

        let (status, body) = call(create_router(state.clone()), Method::GET, "/api/quiz/review", None).await;
        assert_eq!(status, StatusCode::OK);
        let review: Review = serde_json::from_slice(&body).unwrap();
        assert_eq!(review.summary.score, 5);
        assert_eq!(review.summary.percentage, 100);

        let (status, body) = call(create_router(state), Method::GET, "/api/quiz/review.md", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(String::from_utf8(body).unwrap().starts_with("# Quiz Review: quiz sorting"));
    }

    #[tokio::test]
    async fn test_discard_quiz() {
        let state = test_state(PersonaId::Quizz);
        state.orchestrator.send_user_input("quiz", None).await;

        let (_, body) = call(create_router(state.clone()), Method::DELETE, "/api/quiz", None).await;
        assert_eq!(json_body(&body)["discarded"], true);
        let (_, body) = call(create_router(state), Method::DELETE, "/api/quiz", None).await;
        assert_eq!(json_body(&body)["discarded"], false);
    }
}
