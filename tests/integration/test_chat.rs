//! End-to-end conversation tests.
//!
//! These drive the orchestrator the way a front-end does, against a scripted
//! generation client, and check the observable log, quiz and call counts.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use studyhub_core::testing::{sample_answers, sample_questions, ImageScript, ScriptedClient};
use studyhub_core::{
    Config, GenerationErrorKind, HubEvent, Orchestrator, PersonaId, QuizAdvance, QuizSettings,
    QuizState, RejectReason, Role, SendOutcome, QUIZ_LENGTH,
};
use studyhub_review::{MarkdownGenerator, ReviewGenerator};

/// Path to the test fixtures.
fn fixture_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
}

fn instant_quiz() -> QuizSettings {
    QuizSettings {
        feedback_delay_ms: 0,
        celebration_secs: 0,
        ..QuizSettings::default()
    }
}

fn orchestrator(client: &Arc<ScriptedClient>, persona: PersonaId) -> Orchestrator {
    Orchestrator::new(client.clone(), persona, instant_quiz())
}

/// Polls `check` until it holds or a second passes.
async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}

#[test]
fn test_fixture_config_loads() {
    let config = Config::load_from_file(&fixture_path().join("studyhub.json"))
        .expect("Failed to load config");

    assert_eq!(config.default_persona, PersonaId::Quizz);
    assert_eq!(config.quiz.feedback_delay_ms, 0);
    assert_eq!(config.quiz.celebration_secs, 1);
    assert_eq!(config.quiz.generation_attempts, 2);
    assert_eq!(config.generation.slide_context_chars, 500);
}

#[tokio::test]
async fn test_orchestrator_from_fixture_config_starts_on_quiz_persona() {
    let config = Config::load_from_file(&fixture_path().join("studyhub.json"))
        .expect("Failed to load config");
    let client = Arc::new(ScriptedClient::new());
    let hub = Orchestrator::from_config(client.clone(), &config);

    assert_eq!(hub.active_persona().await, PersonaId::Quizz);
    let outcome = hub.send_user_input("quiz", None).await;
    assert!(matches!(outcome, SendOutcome::QuizStarted { .. }));
}

/// Scenario A: a full quiz answered correctly scores 5/5 and celebrates.
#[tokio::test]
async fn test_scenario_a_perfect_quiz() {
    let client = Arc::new(ScriptedClient::new().with_quiz(sample_questions("networking")));
    let hub = orchestrator(&client, PersonaId::Quizz);
    let mut events = hub.subscribe();

    let outcome = hub.send_user_input("quiz networking", None).await;
    assert!(matches!(outcome, SendOutcome::QuizStarted { .. }));

    let quiz = hub.snapshot().await.quiz.expect("quiz should be active");
    assert_eq!(quiz.total, QUIZ_LENGTH);
    let question = quiz.current_question.expect("first question");
    assert_eq!(question.options.len(), 4);

    let mut last = None;
    for (n, answer) in sample_answers().into_iter().enumerate() {
        let quiz = hub.snapshot().await.quiz.expect("quiz should be active");
        assert_eq!(quiz.user_answers.len(), n);
        last = hub.submit_answer(answer).await;
    }

    assert_eq!(
        last,
        Some(QuizAdvance::Completed {
            score: 5,
            total: 5,
            percentage: 100,
            celebrate: true,
        })
    );

    let quiz = hub.snapshot().await.quiz.expect("quiz kept after completion");
    assert_eq!(quiz.state, QuizState::Complete);
    assert_eq!(quiz.user_answers, sample_answers());
    assert!(quiz.feedback.expect("feedback").contains("quiz networking"));

    let mut celebrated = false;
    while let Ok(event) = events.try_recv() {
        celebrated |= matches!(event, HubEvent::CelebrationStarted(_));
    }
    assert!(celebrated);

    // Answering a completed quiz changes nothing
    assert!(hub.submit_answer(0).await.is_none());
    assert_eq!(hub.snapshot().await.quiz.expect("quiz").score, 5);
}

#[tokio::test]
async fn test_quiz_celebration_boundary() {
    // 4/5 = 80% celebrates
    let client = Arc::new(ScriptedClient::new());
    let hub = orchestrator(&client, PersonaId::Quizz);
    hub.send_user_input("quiz", None).await;
    let mut answers = sample_answers();
    answers[4] = (answers[4] + 1) % 4;
    let mut last = None;
    for answer in answers {
        last = hub.submit_answer(answer).await;
    }
    assert!(matches!(
        last,
        Some(QuizAdvance::Completed { score: 4, percentage: 80, celebrate: true, .. })
    ));

    // 3/5 = 60% does not
    let hub = orchestrator(&client, PersonaId::Quizz);
    hub.send_user_input("quiz", None).await;
    let mut answers = sample_answers();
    answers[0] = (answers[0] + 1) % 4;
    answers[1] = (answers[1] + 1) % 4;
    let mut last = None;
    for answer in answers {
        last = hub.submit_answer(answer).await;
    }
    assert!(matches!(
        last,
        Some(QuizAdvance::Completed { score: 3, percentage: 60, celebrate: false, .. })
    ));
}

/// Scenario B: empty input is a no-op.
#[tokio::test]
async fn test_scenario_b_empty_input_is_noop() {
    let client = Arc::new(ScriptedClient::new());
    let hub = orchestrator(&client, PersonaId::Coding);

    let outcome = hub.send_user_input("", None).await;

    assert_eq!(
        outcome,
        SendOutcome::Rejected {
            reason: RejectReason::Empty
        }
    );
    assert!(hub.messages().await.is_empty());
    assert_eq!(client.text_calls(), 0);
    assert_eq!(client.quiz_calls(), 0);
}

/// Scenario C: "quiz" on the quiz persona starts a session, not a chat reply.
#[tokio::test]
async fn test_scenario_c_quiz_dispatch() {
    let client = Arc::new(ScriptedClient::new());
    let hub = orchestrator(&client, PersonaId::Quizz);

    hub.send_user_input("quiz", None).await;

    assert_eq!(client.quiz_calls(), 1);
    assert_eq!(client.text_calls(), 0);
    let messages = hub.messages().await;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].role, Role::User);
    assert_eq!(
        hub.snapshot().await.quiz.expect("quiz").state,
        QuizState::InProgress { index: 0 }
    );
}

#[tokio::test]
async fn test_quiz_failure_shows_fallback_and_no_session() {
    let client = Arc::new(ScriptedClient::new().with_quiz_failure());
    let hub = orchestrator(&client, PersonaId::Quizz);

    let outcome = hub.send_user_input("quiz", None).await;

    assert!(matches!(outcome, SendOutcome::QuizFailed { .. }));
    assert!(hub.snapshot().await.quiz.is_none());
    let messages = hub.messages().await;
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].role, Role::Model);
}

/// Scenario D: a visual request enriches the reply asynchronously.
#[tokio::test]
async fn test_scenario_d_visual_aid() {
    let client = Arc::new(ScriptedClient::new().with_text_reply("TCP opens with SYN, SYN-ACK, ACK."));
    let hub = orchestrator(&client, PersonaId::Coding);

    let outcome = hub.send_user_input("show me a diagram of TCP", None).await;
    let SendOutcome::Replied {
        message_id,
        visual_aid,
    } = outcome
    else {
        panic!("expected a reply, got {outcome:?}");
    };
    assert!(visual_aid);

    let messages = hub.messages().await;
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, Role::User);
    assert_eq!(messages[1].role, Role::Model);
    assert_eq!(messages[1].id, message_id);

    let attached = eventually(|| {
        let hub = hub.clone();
        async move { hub.messages().await[1].visual_aid.is_some() }
    })
    .await;
    assert!(attached, "visual aid never attached");

    let aid = hub.messages().await[1].visual_aid.clone().expect("visual aid");
    assert_eq!(aid.title, "Scripted slide");
    assert_eq!(aid.points.len(), 3);
    assert!(aid.image_url.starts_with("data:image/png;base64,"));
    assert_eq!(client.slide_calls(), 1);
    assert!(client.image_prompts()[0].contains("NO TEXT"));
}

#[tokio::test]
async fn test_visual_aid_failure_leaves_reply_unchanged() {
    let client = Arc::new(ScriptedClient::new().with_image(ImageScript::Fail));
    let hub = orchestrator(&client, PersonaId::Coding);
    let mut events = hub.subscribe();

    hub.send_user_input("image of a binary tree", None).await;

    let mut failed = false;
    for _ in 0..50 {
        match tokio::time::timeout(Duration::from_secs(1), events.recv()).await {
            Ok(Ok(HubEvent::VisualAidFailed(_))) => {
                failed = true;
                break;
            }
            Ok(Ok(_)) => {}
            _ => break,
        }
    }
    assert!(failed);
    assert!(hub.messages().await[1].visual_aid.is_none());
    assert_eq!(hub.visual_aid_target(), None);
}

#[tokio::test]
async fn test_visual_keyword_in_reply_only_does_not_trigger() {
    let client = Arc::new(ScriptedClient::new().with_text_reply("Here is a diagram in words"));
    let hub = orchestrator(&client, PersonaId::Coding);

    let outcome = hub.send_user_input("explain the handshake", None).await;

    assert!(matches!(outcome, SendOutcome::Replied { visual_aid: false, .. }));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(client.image_calls(), 0);
}

/// Scenario E: a second send while one is in flight is rejected.
#[tokio::test]
async fn test_scenario_e_single_flight() {
    let client = Arc::new(ScriptedClient::new().with_text_gate());
    let hub = orchestrator(&client, PersonaId::Coding);

    let first = {
        let hub = hub.clone();
        tokio::spawn(async move { hub.send_user_input("first question", None).await })
    };
    let started = eventually(|| {
        let client = client.clone();
        async move { client.text_calls() == 1 }
    })
    .await;
    assert!(started);
    assert!(hub.is_busy());

    let second = hub.send_user_input("second question", None).await;
    assert_eq!(
        second,
        SendOutcome::Rejected {
            reason: RejectReason::Busy
        }
    );
    assert_eq!(hub.messages().await.len(), 1);
    assert_eq!(client.text_calls(), 1);

    client.release_text();
    let first = first.await.expect("send task panicked");
    assert!(matches!(first, SendOutcome::Replied { .. }));
    assert!(!hub.is_busy());

    // Accepted again once the first resolved
    let third = hub.send_user_input("third question", None).await;
    assert!(matches!(third, SendOutcome::Replied { .. }));
    assert_eq!(hub.messages().await.len(), 4);
}

#[tokio::test]
async fn test_busy_flag_released_after_failure() {
    let client = Arc::new(ScriptedClient::new().with_text_failure(GenerationErrorKind::RateLimit));
    let hub = orchestrator(&client, PersonaId::Exercices);

    let first = hub.send_user_input("solve x^2 = 4", None).await;
    assert!(matches!(first, SendOutcome::Apologized { .. }));
    assert!(!hub.is_busy());

    let second = hub.send_user_input("and x^2 = 9?", None).await;
    assert!(matches!(second, SendOutcome::Apologized { .. }));
    assert_eq!(client.text_calls(), 2);
}

/// Round-trip: switching away and back does not restore history.
#[tokio::test]
async fn test_persona_round_trip_is_one_way_reset() {
    let client = Arc::new(ScriptedClient::new());
    let hub = orchestrator(&client, PersonaId::Coding);

    hub.send_user_input("what is a closure?", None).await;
    assert_eq!(hub.messages().await.len(), 2);

    hub.select_persona(PersonaId::Organizer).await;
    assert!(hub.messages().await.is_empty());

    hub.select_persona(PersonaId::Coding).await;
    assert!(hub.messages().await.is_empty());

    hub.send_user_input("new question", None).await;
    let messages = hub.messages().await;
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].content, "new question");
}

#[tokio::test]
async fn test_persona_switch_discards_quiz() {
    let client = Arc::new(ScriptedClient::new());
    let hub = orchestrator(&client, PersonaId::Quizz);
    hub.send_user_input("quiz", None).await;
    assert!(hub.snapshot().await.quiz.is_some());

    hub.select_persona(PersonaId::Resume).await;
    assert!(hub.snapshot().await.quiz.is_none());
    assert!(hub.submit_answer(0).await.is_none());
}

#[tokio::test]
async fn test_completed_quiz_review() {
    let client = Arc::new(ScriptedClient::new().with_quiz(sample_questions("OSI")));
    let hub = orchestrator(&client, PersonaId::Quizz);
    hub.send_user_input("quiz OSI", None).await;

    let mut answers = sample_answers();
    answers[2] = 0;
    for answer in answers {
        hub.submit_answer(answer).await;
    }

    let input = hub.quiz_review().await.expect("review available");
    let review = ReviewGenerator::new(input).generate().expect("review builds");
    assert_eq!(review.summary.score, 4);
    assert_eq!(review.summary.percentage, 80);
    assert!(review.summary.celebrated);
    assert_eq!(review.missed().count(), 1);

    let markdown = MarkdownGenerator::new(&review).generate();
    assert!(markdown.contains("# Quiz Review: quiz OSI"));
    assert!(markdown.contains("(Missed)"));
}
