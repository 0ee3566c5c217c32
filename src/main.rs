mod commands;

use anyhow::{Context, bail};
use clap::Parser;
use commands::Command;
use lyceum::ai::{INTERRUPTED_TEXT, backend_from_settings};
use lyceum::config::Settings;
use lyceum::controller::{ChatController, ChatSnapshot, TurnHandle, TurnOutcome};
use lyceum::storage::{FileStorage, default_storage_dir};
use lyceum::store::SessionStore;
use lyceum::study::{Flashcard, QuizQuestion};
use lyceum::subjects::{self, Subject};
use lyceum::types::{ChatSession, Part};
use std::io::Write;
use std::sync::Arc;
use time::OffsetDateTime;
use time::macros::format_description;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "lyceum", version, about = "Chat with a subject tutor from the terminal")]
struct Cli {
    /// Subject to study (see --list-subjects)
    #[arg(short, long, env = "LYCEUM_SUBJECT", default_value = "mathematics")]
    subject: String,

    /// Print the available subjects and exit
    #[arg(long)]
    list_subjects: bool,

    /// Print a quiz on the most recent chat and exit
    #[arg(long, value_name = "N")]
    quiz: Option<usize>,

    /// Print flashcards for the most recent chat and exit
    #[arg(long, value_name = "N")]
    flashcards: Option<usize>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("lyceum=info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    if cli.list_subjects {
        for subject in subjects::all() {
            println!("{:<18} {} - {}", subject.id, subject.name, subject.description);
        }
        return Ok(());
    }

    let Some(subject) = subjects::find(&cli.subject) else {
        bail!("unknown subject '{}', try --list-subjects", cli.subject);
    };

    let settings = Settings::load().context("invalid configuration")?;
    let backend = backend_from_settings(&settings)?;
    let storage_dir = settings.storage_dir.clone().unwrap_or_else(default_storage_dir);
    tracing::debug!(dir = %storage_dir.display(), backend = backend.name(), "starting");
    let store = SessionStore::new(Arc::new(FileStorage::new(
        storage_dir,
        Some(settings.storage_quota_bytes),
    )));

    let controller = ChatController::mount(subject.clone(), backend, store).await;

    if cli.quiz.is_some() || cli.flashcards.is_some() {
        if let Some(latest) = controller.snapshot().sessions.first() {
            controller.select_session(&latest.id);
        }
        if let Some(count) = cli.quiz {
            show_quiz(controller.generate_quiz(count, false).await.as_deref());
        }
        if let Some(count) = cli.flashcards {
            show_flashcards(controller.generate_flashcards(count).await.as_deref());
        }
        controller.unmount().await;
        return Ok(());
    }

    let result = run_chat(&controller).await;
    controller.unmount().await;
    result
}

fn print_banner(subject: &Subject) {
    println!("{} tutor. Type /help for commands.", subject.name);
    if !subject.quick_questions.is_empty() {
        println!("Try asking:");
        for question in &subject.quick_questions {
            println!("  - {question}");
        }
    }
    println!();
}

fn prompt() {
    print!("you > ");
    let _ = std::io::stdout().flush();
}

async fn run_chat(controller: &ChatController) -> anyhow::Result<()> {
    print_banner(controller.subject());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        prompt();
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                println!();
                return Ok(());
            }
        };
        let Some(line) = line else {
            return Ok(());
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let turn = match commands::parse(line) {
            None => controller.send_message(vec![Part::text(line)]),
            Some(Command::Quit) => return Ok(()),
            Some(command) => {
                match run_command(controller, command).await {
                    Ok(turn) => turn,
                    Err(message) => {
                        println!("! {message}");
                        None
                    }
                }
            }
        };

        if let Some(turn) = turn {
            let finished = tokio::select! {
                outcome = follow_turn(controller, turn) => {
                    report(outcome);
                    true
                }
                _ = tokio::signal::ctrl_c() => false,
            };
            if !finished {
                println!();
                return Ok(());
            }
        }
    }
}

/// Handle a slash command. A retry hands back the new turn to follow.
async fn run_command(
    controller: &ChatController,
    command: Command,
) -> Result<Option<TurnHandle>, String> {
    match command {
        Command::Help => println!("{}", commands::HELP),
        Command::New => {
            controller.start_new_session();
            println!("Started a new chat.");
        }
        Command::Sessions => list_sessions(&controller.snapshot()),
        Command::Open(n) => {
            let session = session_at(controller, n)?;
            controller.select_session(&session.id);
            for message in &session.messages {
                let who = if message.is_model() { "tutor" } else { "you" };
                println!("{who} > {}", message.text());
            }
        }
        Command::Delete(n) => {
            let session = session_at(controller, n)?;
            controller.delete_session(&session.id).await;
            println!("Deleted \"{}\".", session.title(40));
        }
        Command::Clear => {
            controller.clear_history().await;
            println!("All chats for {} deleted.", controller.subject().name);
        }
        Command::Retry => {
            let messages = controller.messages();
            let Some(failed_index) = messages
                .iter()
                .rposition(|m| m.is_model() && m.is_interrupted)
            else {
                return Err("nothing to retry in this chat".to_string());
            };
            let user_parts = failed_index
                .checked_sub(1)
                .map(|i| messages[i].parts.clone())
                .unwrap_or_default();
            return controller
                .try_again(user_parts, failed_index)
                .map_err(|err| err.to_string());
        }
        Command::Quiz { count, hard } => {
            println!("Generating quiz...");
            show_quiz(controller.generate_quiz(count, hard).await.as_deref());
        }
        Command::Cards(count) => {
            println!("Generating flashcards...");
            show_flashcards(controller.generate_flashcards(count).await.as_deref());
        }
        Command::Invalid(message) => return Err(message),
        Command::Quit => {}
    }
    Ok(None)
}

/// Print the reply as it streams in, then wait for the turn to settle.
async fn follow_turn(controller: &ChatController, turn: TurnHandle) -> TurnOutcome {
    let session_id = turn.session_id().to_string();
    let mut updates = controller.subscribe();
    let mut printed = 0;
    let outcome = turn.outcome();
    tokio::pin!(outcome);

    print!("tutor > ");
    loop {
        tokio::select! {
            result = &mut outcome => {
                if let TurnOutcome::Completed { text } = &result {
                    print_from(text, &mut printed);
                }
                println!();
                return result;
            }
            changed = updates.changed() => {
                if changed.is_err() {
                    let result = (&mut outcome).await;
                    println!();
                    return result;
                }
                let reply = streaming_text(&updates.borrow_and_update(), &session_id);
                if let Some(text) = reply {
                    print_from(&text, &mut printed);
                }
            }
        }
    }
}

fn streaming_text(snapshot: &ChatSnapshot, session_id: &str) -> Option<String> {
    let session = snapshot.sessions.iter().find(|s| s.id == session_id)?;
    let last = session.messages.last().filter(|m| m.is_model() && !m.is_interrupted)?;
    Some(last.text())
}

fn print_from(text: &str, printed: &mut usize) {
    if text.len() > *printed && text.is_char_boundary(*printed) {
        print!("{}", &text[*printed..]);
        let _ = std::io::stdout().flush();
        *printed = text.len();
    }
}

fn report(outcome: TurnOutcome) {
    match outcome {
        TurnOutcome::Completed { .. } => {}
        TurnOutcome::Failed(err) => {
            println!("! {}", err.user_message());
            println!("  Type /retry to ask again.");
        }
        TurnOutcome::Interrupted => println!("! {INTERRUPTED_TEXT}"),
    }
}

fn session_at(controller: &ChatController, n: usize) -> Result<ChatSession, String> {
    controller
        .snapshot()
        .sessions
        .get(n - 1)
        .cloned()
        .ok_or_else(|| format!("there is no chat {n}, see /sessions"))
}

fn list_sessions(snapshot: &ChatSnapshot) {
    if snapshot.sessions.is_empty() {
        println!("No saved chats yet.");
        return;
    }
    for (i, session) in snapshot.sessions.iter().enumerate() {
        let marker = if snapshot.active.as_deref() == Some(session.id.as_str()) {
            "*"
        } else {
            " "
        };
        println!(
            "{marker}{:>2}. {}  {}",
            i + 1,
            format_timestamp(session.timestamp),
            session.title(40)
        );
    }
}

fn format_timestamp(millis: i64) -> String {
    let format = format_description!("[year]-[month]-[day] [hour]:[minute]");
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000)
        .ok()
        .and_then(|at| at.format(&format).ok())
        .unwrap_or_default()
}

fn show_quiz(quiz: Option<&[QuizQuestion]>) {
    let Some(quiz) = quiz else {
        println!("! Could not generate a quiz from this chat. Try again in a moment.");
        return;
    };
    for (i, question) in quiz.iter().enumerate() {
        println!("\n{}. {}", i + 1, question.question);
        for (letter, option) in ('a'..='d').zip(&question.options) {
            println!("   {letter}) {option}");
        }
    }
    println!("\nAnswers:");
    for (i, question) in quiz.iter().enumerate() {
        println!("  {}. {}", i + 1, question.correct_answer);
    }
}

fn show_flashcards(cards: Option<&[Flashcard]>) {
    let Some(cards) = cards else {
        println!("! Could not generate flashcards from this chat. Try again in a moment.");
        return;
    };
    for card in cards {
        println!("\n  {}\n  -> {}", card.front, card.back);
    }
}
