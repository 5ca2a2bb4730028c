//! Integration tests for WebSocket event streaming.
//!
//! These run the real router on a local port and check that HTTP calls and
//! orchestrator operations show up as events on `/ws`.

use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

use futures::SinkExt;
use futures::StreamExt;
use studyhub_core::testing::ScriptedClient;
use studyhub_core::{
    create_router, AppState, Config, HubEvent, Orchestrator, PersonaId, QuizSettings, Role,
};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tungstenite::Message;

/// Helper to find an available port for testing.
fn find_available_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .expect("Failed to bind to port")
        .local_addr()
        .expect("Failed to get local addr")
        .port()
}

/// Helper type for WebSocket client
type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn test_state(persona: PersonaId) -> AppState {
    let quiz = QuizSettings {
        feedback_delay_ms: 0,
        celebration_secs: 0,
        ..QuizSettings::default()
    };
    let orchestrator = Orchestrator::new(Arc::new(ScriptedClient::new()), persona, quiz);
    AppState::new(Config::default(), orchestrator)
}

/// Spawns the test server and returns the WebSocket URL.
async fn spawn_test_server(state: AppState) -> (String, tokio::task::JoinHandle<()>) {
    let port = find_available_port();
    let addr = format!("127.0.0.1:{port}");
    let ws_url = format!("ws://{addr}/ws");

    let router = create_router(state);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind");

    let handle = tokio::spawn(async move {
        axum::serve(listener, router).await.expect("Server failed");
    });

    // Give the server a moment to start
    tokio::time::sleep(Duration::from_millis(50)).await;

    (ws_url, handle)
}

/// Connects a WebSocket client to the given URL.
async fn connect_client(url: &str) -> WsClient {
    let (ws_stream, _) = connect_async(url)
        .await
        .expect("Failed to connect to WebSocket");
    ws_stream
}

/// Receives the next event, answering pings along the way.
async fn receive_event(client: &mut WsClient) -> HubEvent {
    loop {
        let msg = timeout(Duration::from_secs(5), client.next())
            .await
            .expect("Timeout waiting for message")
            .expect("Stream ended")
            .expect("WebSocket error");

        match msg {
            Message::Text(text) => {
                return serde_json::from_str(&text).expect("Failed to parse event");
            }
            Message::Ping(data) => {
                client
                    .send(Message::Pong(data))
                    .await
                    .expect("Failed to send pong");
            }
            Message::Pong(_) => {}
            other => panic!("Expected text message, got: {other:?}"),
        }
    }
}

/// Receives events until one matches `pred`.
async fn receive_until(client: &mut WsClient, pred: impl Fn(&HubEvent) -> bool) -> HubEvent {
    for _ in 0..20 {
        let event = receive_event(client).await;
        if pred(&event) {
            return event;
        }
    }
    panic!("Expected event never arrived");
}

// ============================================================================
// Connection Tests
// ============================================================================

#[tokio::test]
async fn test_client_receives_connected_event_on_connect() {
    let (ws_url, _handle) = spawn_test_server(test_state(PersonaId::Coding)).await;

    let mut client = connect_client(&ws_url).await;
    let event = receive_event(&mut client).await;

    let HubEvent::Connected(payload) = event else {
        panic!("Expected Connected event, got: {event:?}");
    };
    assert_eq!(payload.snapshot.persona, PersonaId::Coding);
    assert!(payload.snapshot.messages.is_empty());
    assert!(payload.snapshot.quiz.is_none());
}

#[tokio::test]
async fn test_connected_event_contains_current_conversation() {
    let state = test_state(PersonaId::Resume);
    state
        .orchestrator
        .send_user_input("lakhasli el chapitre", None)
        .await;
    let (ws_url, _handle) = spawn_test_server(state).await;

    let mut client = connect_client(&ws_url).await;
    let HubEvent::Connected(payload) = receive_event(&mut client).await else {
        panic!("Expected Connected event");
    };

    assert_eq!(payload.snapshot.persona, PersonaId::Resume);
    assert_eq!(payload.snapshot.messages.len(), 2);
    assert_eq!(payload.snapshot.messages[1].role, Role::Model);
}

#[tokio::test]
async fn test_events_broadcast_to_all_clients() {
    let state = test_state(PersonaId::Coding);
    let orchestrator = state.orchestrator.clone();
    let (ws_url, _handle) = spawn_test_server(state).await;

    let mut client1 = connect_client(&ws_url).await;
    let mut client2 = connect_client(&ws_url).await;
    receive_event(&mut client1).await;
    receive_event(&mut client2).await;

    orchestrator.select_persona(PersonaId::Organizer).await;

    for client in [&mut client1, &mut client2] {
        let event = receive_event(client).await;
        assert_eq!(event, HubEvent::persona_selected(PersonaId::Organizer));
    }
}

// ============================================================================
// API Integration Tests
// ============================================================================

#[tokio::test]
async fn test_api_message_triggers_events() {
    let (ws_url, _handle) = spawn_test_server(test_state(PersonaId::Coding)).await;

    let mut client = connect_client(&ws_url).await;
    receive_event(&mut client).await;

    let http_url = ws_url.replace("ws://", "http://").replace("/ws", "");
    let response = reqwest::Client::new()
        .post(format!("{http_url}/api/messages"))
        .json(&serde_json::json!({ "text": "show me a diagram of a stack" }))
        .send()
        .await
        .expect("Failed to send HTTP request");
    assert!(response.status().is_success());

    let HubEvent::MessageAppended(user) = receive_event(&mut client).await else {
        panic!("Expected the user message first");
    };
    assert_eq!(user.message.role, Role::User);
    assert_eq!(user.message.content, "show me a diagram of a stack");

    let HubEvent::MessageAppended(reply) = receive_event(&mut client).await else {
        panic!("Expected the model reply");
    };
    assert_eq!(reply.message.role, Role::Model);

    let event = receive_until(&mut client, |e| matches!(e, HubEvent::VisualAidAttached(_))).await;
    let HubEvent::VisualAidAttached(payload) = event else {
        unreachable!();
    };
    assert_eq!(payload.message_id, reply.message.id);
    assert_eq!(payload.visual_aid.title, "Scripted slide");
}

#[tokio::test]
async fn test_api_quiz_flow_events() {
    let (ws_url, _handle) = spawn_test_server(test_state(PersonaId::Quizz)).await;

    let mut client = connect_client(&ws_url).await;
    receive_event(&mut client).await;

    let http_url = ws_url.replace("ws://", "http://").replace("/ws", "");
    let http = reqwest::Client::new();

    let response = http
        .post(format!("{http_url}/api/messages"))
        .json(&serde_json::json!({ "text": "quiz algorithms" }))
        .send()
        .await
        .expect("Failed to send HTTP request");
    assert!(response.status().is_success());

    let event = receive_until(&mut client, |e| matches!(e, HubEvent::QuizStarted(_))).await;
    let HubEvent::QuizStarted(payload) = event else {
        unreachable!();
    };
    assert_eq!(payload.quiz.total, 5);

    let response = http
        .post(format!("{http_url}/api/quiz/answer"))
        .json(&serde_json::json!({ "option": 0 }))
        .send()
        .await
        .expect("Failed to send HTTP request");
    assert!(response.status().is_success());

    let HubEvent::AnswerLocked(locked) = receive_event(&mut client).await else {
        panic!("Expected answer_locked");
    };
    assert!(locked.feedback.is_correct);

    let HubEvent::QuizAdvanced(advanced) = receive_event(&mut client).await else {
        panic!("Expected quiz_advanced");
    };
    assert_eq!(advanced.quiz.user_answers, vec![0]);
    assert_eq!(advanced.quiz.score, 1);
}

// ============================================================================
// Disconnection Tests
// ============================================================================

#[tokio::test]
async fn test_server_continues_after_client_disconnect() {
    let state = test_state(PersonaId::Coding);
    let orchestrator = state.orchestrator.clone();
    let (ws_url, _handle) = spawn_test_server(state).await;

    let mut client1 = connect_client(&ws_url).await;
    receive_event(&mut client1).await;
    client1.close(None).await.ok();
    drop(client1);

    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut client2 = connect_client(&ws_url).await;
    let event = receive_event(&mut client2).await;
    assert!(matches!(event, HubEvent::Connected(_)));

    orchestrator.discard_quiz().await;
    orchestrator.events().send(HubEvent::error("test error"));
    let event = receive_event(&mut client2).await;
    assert_eq!(event, HubEvent::error("test error"));
}
