//! StudyHub core
//!
//! Persona chat orchestration over a generative-AI API, the quiz engine, and
//! the HTTP and WebSocket surface that exposes them.

pub mod api;
pub mod attachment;
pub mod config;
pub mod error;
pub mod gemini;
pub mod generation;
pub mod intent;
pub mod message;
pub mod orchestrator;
pub mod persona;
pub mod quiz;
pub mod websocket;

pub use api::{create_router, AppState, ErrorResponse};
pub use attachment::{Attachment, AttachmentFormat, MAX_ATTACHMENT_SIZE};
pub use config::{api_key_from_env, Config, GenerationSettings, QuizSettings};
pub use error::{GenerationErrorKind, HubError, Result};
pub use gemini::GeminiClient;
pub use generation::{GenerationClient, SlideContent};
pub use message::{Message, MessageId, MessageLog, Role, VisualAid};
pub use orchestrator::{
    AnswerTicket, ChatSnapshot, Orchestrator, RejectReason, SendOutcome, VisualAidOutcome,
    VisualAidRequest,
};
pub use persona::{BotPersona, PersonaId};
pub use quiz::{
    AnswerFeedback, QuizAdvance, QuizEngine, QuizQuestion, QuizSession, QuizState, QuizView,
    QUIZ_LENGTH,
};
pub use websocket::{EventBroadcaster, HubEvent};

#[cfg(any(test, feature = "test-util"))]
pub use generation::testing;
