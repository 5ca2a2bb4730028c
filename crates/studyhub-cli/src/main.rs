//! StudyHub CLI
//!
//! Serves the chat over HTTP/WebSocket, or runs it in the terminal.

use std::io::Write as _;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use studyhub_core::{
    api_key_from_env, create_router, persona, AppState, Attachment, Config, GeminiClient,
    HubEvent, Message, MessageId, Orchestrator, PersonaId, QuizAdvance, RejectReason, Role,
    SendOutcome, VisualAidRequest,
};
use studyhub_review::{json::JsonGenerator, option_label, MarkdownGenerator, Review, ReviewGenerator};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

/// Default port for the HTTP API server.
const DEFAULT_PORT: u16 = 3000;

/// StudyHub - persona tutors and quizzes for students
#[derive(Parser, Debug)]
#[command(name = "studyhub")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file (default: studyhub.json in current directory)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<String>,

    /// Enable verbose output (sets log level to debug)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the HTTP API and the WebSocket event stream
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value_t = DEFAULT_PORT)]
        port: u16,
    },
    /// Chat in the terminal
    Chat {
        /// Persona to start with (default: from configuration)
        #[arg(short, long, value_name = "ID")]
        persona: Option<String>,

        /// Directory where completed quiz reviews are written
        #[arg(short, long, value_name = "DIR")]
        output_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if args.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    tracing::debug!(config = ?args.config, "Config file");

    let result = match load_config(args.config.as_deref()) {
        Ok(config) => match args.command {
            Command::Serve { port } => run_server(config, port).await,
            Command::Chat {
                persona,
                output_dir,
            } => run_chat(config, persona.as_deref(), output_dir.as_deref()).await,
        },
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(1)
        }
    }
}

/// Loads configuration from the specified path or default location.
fn load_config(config_path: Option<&str>) -> anyhow::Result<Config> {
    match config_path {
        Some(path_str) => {
            let path = Path::new(path_str);
            if !path.exists() {
                anyhow::bail!(
                    "Config file not found: '{}'\n\nSuggestion: Check the path or remove the --config flag to use defaults",
                    path.display()
                );
            }
            Config::load_from_file(path).map_err(|e| anyhow::anyhow!("{e}"))
        }
        None => Config::load().map_err(|e| anyhow::anyhow!("{e}")),
    }
}

/// Builds the orchestrator backed by the Gemini client.
fn build_orchestrator(config: &Config) -> anyhow::Result<Orchestrator> {
    let client = GeminiClient::new(
        config.generation.clone(),
        api_key_from_env(),
        config.quiz.generation_attempts,
    )
    .map_err(|e| anyhow::anyhow!("{e}"))?;

    if !client.has_api_key() {
        println!("No API key found in API_KEY or GEMINI_API_KEY; replies will fall back to an apology.");
    }

    Ok(Orchestrator::from_config(Arc::new(client), config))
}

// ============================================================================
// serve
// ============================================================================

async fn run_server(config: Config, port: u16) -> anyhow::Result<()> {
    let orchestrator = build_orchestrator(&config)?;
    let router = create_router(AppState::new(config, orchestrator));

    let addr: SocketAddr = ([127, 0, 0, 1], port).into();
    let listener = TcpListener::bind(addr).await.map_err(|e| {
        anyhow::anyhow!(
            "Failed to bind to {addr}: {e}\n\nSuggestion: Try a different port with --port"
        )
    })?;

    println!("StudyHub API running on http://{addr}/api");
    println!("Event stream on ws://{addr}/ws");
    println!("Press Ctrl+C to stop");
    tracing::info!(%addr, "HTTP server started");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("HTTP server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for Ctrl+C");
    }
}

// ============================================================================
// chat
// ============================================================================

/// A line typed in the terminal chat.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ChatCommand {
    Say(String),
    Personas,
    Persona(String),
    Attach(String),
    Detach,
    Answer(String),
    Visual(Option<String>),
    New,
    Review,
    Help,
    Quit,
    Unknown(String),
}

impl ChatCommand {
    fn parse(line: &str) -> Self {
        let line = line.trim();
        let Some(rest) = line.strip_prefix('/') else {
            return Self::Say(line.to_string());
        };

        let (name, arg) = rest
            .split_once(char::is_whitespace)
            .map_or((rest, ""), |(name, arg)| (name, arg.trim()));

        match name.to_lowercase().as_str() {
            "personas" => Self::Personas,
            "persona" if !arg.is_empty() => Self::Persona(arg.to_string()),
            "attach" if !arg.is_empty() => Self::Attach(arg.to_string()),
            "detach" => Self::Detach,
            "answer" if !arg.is_empty() => Self::Answer(arg.to_string()),
            "visual" => Self::Visual((!arg.is_empty()).then(|| arg.to_string())),
            "new" => Self::New,
            "review" => Self::Review,
            "help" => Self::Help,
            "quit" | "exit" => Self::Quit,
            _ => Self::Unknown(line.to_string()),
        }
    }
}

/// A blank line sends the staged attachment on its own; otherwise it is ignored.
fn skip_blank_line(line: &str, has_staged: bool) -> bool {
    line.trim().is_empty() && !has_staged
}

/// Picks the reply to illustrate: the given id, or the latest model reply.
fn visual_aid_target(messages: &[Message], arg: Option<&str>) -> anyhow::Result<MessageId> {
    match arg {
        Some(id) => id
            .parse()
            .map(MessageId)
            .map_err(|_| anyhow::anyhow!("'{id}' is not a message id")),
        None => messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Model)
            .map(|m| m.id)
            .ok_or_else(|| anyhow::anyhow!("No reply to illustrate yet")),
    }
}

/// Parses `A`-`D` or `1`-`4` into a zero-based option index.
fn parse_option(input: &str) -> Option<usize> {
    let mut chars = input.trim().chars();
    let c = chars.next()?;
    if chars.next().is_some() {
        return None;
    }
    match c.to_ascii_uppercase() {
        'A'..='D' => Some(c.to_ascii_uppercase() as usize - 'A' as usize),
        '1'..='4' => Some(c as usize - '1' as usize),
        _ => None,
    }
}

async fn run_chat(
    config: Config,
    persona: Option<&str>,
    output_dir: Option<&Path>,
) -> anyhow::Result<()> {
    let orchestrator = build_orchestrator(&config)?;

    if let Some(id) = persona {
        let id = PersonaId::parse(id).map_err(|e| anyhow::anyhow!("{e}"))?;
        orchestrator.select_persona(id).await;
    }

    let events = tokio::spawn(print_background_events(orchestrator.subscribe()));

    print_active_persona(orchestrator.active_persona().await);
    println!("Type /help for commands.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        if skip_blank_line(&line, orchestrator.staged_attachment().await.is_some()) {
            continue;
        }

        match ChatCommand::parse(&line) {
            ChatCommand::Quit => break,
            command => {
                if let Err(e) = handle_command(&orchestrator, command, output_dir).await {
                    println!("Error: {e}");
                }
            }
        }
    }

    events.abort();
    Ok(())
}

async fn handle_command(
    orchestrator: &Orchestrator,
    command: ChatCommand,
    output_dir: Option<&Path>,
) -> anyhow::Result<()> {
    match command {
        ChatCommand::Say(text) => say(orchestrator, &text).await,
        ChatCommand::Personas => {
            let active = orchestrator.active_persona().await;
            for p in persona::all() {
                let marker = if p.id == active { "*" } else { " " };
                println!("{marker} {} {:<12} {} - {}", p.icon, p.id, p.display_name, p.description);
            }
        }
        ChatCommand::Persona(id) => {
            let id = PersonaId::parse(&id).map_err(|e| anyhow::anyhow!("{e}"))?;
            orchestrator.select_persona(id).await;
            print_active_persona(id);
        }
        ChatCommand::Attach(path) => {
            let attachment = Attachment::load(&path).map_err(|e| anyhow::anyhow!("{e}"))?;
            println!("Attached {} ({} bytes)", attachment.name, attachment.data.len());
            orchestrator.stage_attachment(attachment).await;
        }
        ChatCommand::Detach => {
            if orchestrator.clear_attachment().await {
                println!("Attachment removed.");
            } else {
                println!("Nothing attached.");
            }
        }
        ChatCommand::Answer(input) => {
            let option = parse_option(&input)
                .ok_or_else(|| anyhow::anyhow!("'{input}' is not an option; use A-D or 1-4"))?;
            answer(orchestrator, option, output_dir).await?;
        }
        ChatCommand::Visual(arg) => {
            let id = visual_aid_target(&orchestrator.messages().await, arg.as_deref())?;
            match orchestrator.request_visual_aid(id).await {
                VisualAidRequest::Started => println!("(preparing a visual aid for message {id}...)"),
                VisualAidRequest::Dropped => println!("Another visual aid is still being prepared."),
                VisualAidRequest::NotFound => println!("No reply with id {id}."),
                VisualAidRequest::AlreadyAttached => println!("Message {id} already has a visual aid."),
            }
        }
        ChatCommand::New => {
            if orchestrator.discard_quiz().await {
                println!("Quiz discarded. Ask for a new one whenever you're ready.");
            } else {
                println!("No quiz in progress.");
            }
        }
        ChatCommand::Review => match completed_review(orchestrator).await? {
            Some(review) => println!("{}", MarkdownGenerator::new(&review).generate()),
            None => println!("Finish a quiz first."),
        },
        ChatCommand::Help => print_help(),
        ChatCommand::Unknown(line) => println!("Unknown command: {line} (try /help)"),
        ChatCommand::Quit => {}
    }
    Ok(())
}

async fn say(orchestrator: &Orchestrator, text: &str) {
    match orchestrator.send_user_input(text, None).await {
        SendOutcome::Rejected {
            reason: RejectReason::Empty,
        } => {}
        SendOutcome::Rejected {
            reason: RejectReason::Busy,
        } => println!("Still answering the previous message..."),
        SendOutcome::Replied {
            message_id,
            visual_aid,
        } => {
            print_message(orchestrator, message_id).await;
            if visual_aid {
                println!("(preparing a visual aid...)");
            }
        }
        SendOutcome::Apologized { message_id } | SendOutcome::QuizFailed { message_id } => {
            print_message(orchestrator, message_id).await;
        }
        SendOutcome::QuizStarted { topic } => {
            println!("Quiz: {topic}");
            print_current_question(orchestrator).await;
        }
        SendOutcome::Discarded => {}
    }
}

async fn answer(
    orchestrator: &Orchestrator,
    option: usize,
    output_dir: Option<&Path>,
) -> anyhow::Result<()> {
    let Some((feedback, ticket)) = orchestrator.lock_answer(option).await else {
        println!("No question is waiting for an answer.");
        return Ok(());
    };

    if feedback.is_correct {
        println!("Correct!");
    } else {
        println!("Wrong, the answer was {}.", option_label(feedback.correct_index));
    }
    if !feedback.explanation.trim().is_empty() {
        println!("  {}", feedback.explanation);
    }

    tokio::time::sleep(orchestrator.quiz_settings().feedback_delay()).await;

    match orchestrator.commit_answer(ticket).await {
        Some(QuizAdvance::Advanced { .. }) => print_current_question(orchestrator).await,
        Some(QuizAdvance::Completed {
            score,
            total,
            percentage,
            ..
        }) => {
            println!();
            println!("=== Quiz Complete ===");
            println!("Score: {score} / {total} ({percentage}%)");
            if let Some(message) = orchestrator
                .snapshot()
                .await
                .quiz
                .and_then(|quiz| quiz.feedback)
            {
                println!("{message}");
            }
            if let Some(dir) = output_dir {
                write_reviews(orchestrator, dir).await?;
            }
            println!("Type /review to go over your answers, or /new for another quiz.");
        }
        None => {}
    }
    Ok(())
}

async fn completed_review(orchestrator: &Orchestrator) -> anyhow::Result<Option<Review>> {
    match orchestrator.quiz_review().await {
        Some(input) => Ok(Some(ReviewGenerator::new(input).generate()?)),
        None => Ok(None),
    }
}

/// Writes `quiz-review.md` and `quiz-review.json` to `output_dir`.
async fn write_reviews(orchestrator: &Orchestrator, output_dir: &Path) -> anyhow::Result<()> {
    let Some(review) = completed_review(orchestrator).await? else {
        return Ok(());
    };

    std::fs::create_dir_all(output_dir)?;

    let md_path = output_dir.join("quiz-review.md");
    std::fs::write(&md_path, MarkdownGenerator::new(&review).generate())?;
    println!("  Markdown review: {}", md_path.display());

    let json_path = output_dir.join("quiz-review.json");
    JsonGenerator::new(&review).write_to_file(&json_path, true)?;
    println!("  JSON review: {}", json_path.display());

    tracing::info!(dir = %output_dir.display(), "Quiz review written");
    Ok(())
}

/// Prints events that arrive outside the request/response rhythm of the chat.
async fn print_background_events(mut events: broadcast::Receiver<HubEvent>) {
    loop {
        match events.recv().await {
            Ok(HubEvent::VisualAidAttached(payload)) => {
                let aid = payload.visual_aid;
                println!();
                println!("[visual aid for message {}] {}", payload.message_id, aid.title);
                for point in &aid.points {
                    println!("  - {point}");
                }
                println!("  (image: {} bytes as data URL)", aid.image_url.len());
            }
            Ok(HubEvent::VisualAidFailed(payload)) => {
                println!();
                println!("[visual aid for message {} unavailable: {}]", payload.message_id, payload.reason);
            }
            Ok(HubEvent::CelebrationStarted(payload)) => {
                println!("*** Bravo! *** ({}s)", payload.seconds);
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::debug!(missed = n, "Terminal event printer lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn print_message(orchestrator: &Orchestrator, id: MessageId) {
    if let Some(message) = orchestrator.messages().await.into_iter().find(|m| m.id == id) {
        println!();
        println!("{}", message.content);
        println!();
    }
}

async fn print_current_question(orchestrator: &Orchestrator) {
    let Some(quiz) = orchestrator.snapshot().await.quiz else {
        return;
    };
    let Some(question) = quiz.current_question else {
        return;
    };

    println!();
    println!(
        "Question {}/{}: {}",
        quiz.user_answers.len() + 1,
        quiz.total,
        question.question
    );
    for (idx, option) in question.options.iter().enumerate() {
        println!("  {}. {option}", option_label(idx));
    }
    println!("Answer with /answer A-D");
}

fn print_active_persona(id: PersonaId) {
    let p = id.persona();
    println!("{} {} - {}", p.icon, p.display_name, p.description);
}

fn print_help() {
    println!("Commands:");
    println!("  /personas          List personas");
    println!("  /persona <id>      Switch persona (clears the conversation)");
    println!("  /attach <path>     Attach a file to the next message");
    println!("  /detach            Remove the attached file");
    println!("  /answer <A-D|1-4>  Answer the current quiz question");
    println!("  /visual [id]       Illustrate a reply (default: the latest)");
    println!("  /new               Discard the current quiz");
    println!("  /review            Show the review of a finished quiz");
    println!("  /quit              Leave");
    println!("With a file attached, an empty line sends it on its own.");
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_text_is_say() {
        assert_eq!(
            ChatCommand::parse("  explain pointers "),
            ChatCommand::Say("explain pointers".to_string())
        );
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(ChatCommand::parse("/personas"), ChatCommand::Personas);
        assert_eq!(
            ChatCommand::parse("/persona quizz"),
            ChatCommand::Persona("quizz".to_string())
        );
        assert_eq!(
            ChatCommand::parse("/attach  notes/td 1.pdf"),
            ChatCommand::Attach("notes/td 1.pdf".to_string())
        );
        assert_eq!(ChatCommand::parse("/answer b"), ChatCommand::Answer("b".to_string()));
        assert_eq!(ChatCommand::parse("/NEW"), ChatCommand::New);
        assert_eq!(ChatCommand::parse("/exit"), ChatCommand::Quit);
    }

    #[test]
    fn test_parse_command_missing_argument_is_unknown() {
        assert_eq!(
            ChatCommand::parse("/persona"),
            ChatCommand::Unknown("/persona".to_string())
        );
        assert_eq!(
            ChatCommand::parse("/dance"),
            ChatCommand::Unknown("/dance".to_string())
        );
    }

    #[test]
    fn test_parse_visual_with_and_without_id() {
        assert_eq!(ChatCommand::parse("/visual"), ChatCommand::Visual(None));
        assert_eq!(
            ChatCommand::parse("/visual 12"),
            ChatCommand::Visual(Some("12".to_string()))
        );
    }

    #[test]
    fn test_visual_aid_target_defaults_to_latest_reply() {
        let mut log = studyhub_core::MessageLog::new();
        log.push_user("what is a stack?", None);
        let first = log.push_model("A stack is LIFO").id;
        log.push_user("and a queue?", None);
        let latest = log.push_model("A queue is FIFO").id;

        assert_eq!(visual_aid_target(log.messages(), None).unwrap(), latest);
        assert_eq!(
            visual_aid_target(log.messages(), Some(&first.to_string())).unwrap(),
            first
        );
        assert!(visual_aid_target(log.messages(), Some("abc")).is_err());
        assert!(visual_aid_target(&[], None).is_err());
    }

    #[test]
    fn test_blank_line_sends_only_with_staged_attachment() {
        assert!(skip_blank_line("   ", false));
        assert!(!skip_blank_line("   ", true));
        assert!(!skip_blank_line("hello", false));
        assert_eq!(ChatCommand::parse("  "), ChatCommand::Say(String::new()));
    }

    #[test]
    fn test_parse_option() {
        assert_eq!(parse_option("A"), Some(0));
        assert_eq!(parse_option("d"), Some(3));
        assert_eq!(parse_option("1"), Some(0));
        assert_eq!(parse_option(" 4 "), Some(3));
        assert_eq!(parse_option("E"), None);
        assert_eq!(parse_option("5"), None);
        assert_eq!(parse_option("AB"), None);
        assert_eq!(parse_option(""), None);
    }

    #[test]
    fn test_args_parse_subcommands() {
        let args = Args::try_parse_from(["studyhub", "-v", "serve", "--port", "8080"]).unwrap();
        assert!(args.verbose);
        assert!(matches!(args.command, Command::Serve { port: 8080 }));

        let args = Args::try_parse_from(["studyhub", "chat", "--persona", "resume", "-o", "out"]).unwrap();
        let Command::Chat { persona, output_dir } = args.command else {
            panic!("expected chat");
        };
        assert_eq!(persona.as_deref(), Some("resume"));
        assert_eq!(output_dir, Some(PathBuf::from("out")));
    }
}
