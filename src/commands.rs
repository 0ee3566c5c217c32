//! Slash commands understood by the chat prompt.

const DEFAULT_STUDY_ITEMS: usize = 5;

#[derive(Debug, PartialEq, Eq)]
pub enum Command {
    Help,
    New,
    Sessions,
    Open(usize),
    Delete(usize),
    Clear,
    Retry,
    Quiz { count: usize, hard: bool },
    Cards(usize),
    Quit,
    /// Recognised command with a bad argument, or an unknown command.
    Invalid(String),
}

/// Parse a line starting with `/`. Returns `None` for ordinary messages.
pub fn parse(line: &str) -> Option<Command> {
    let rest = line.trim().strip_prefix('/')?;
    let mut words = rest.split_whitespace();
    let name = words.next().unwrap_or_default().to_ascii_lowercase();
    let arg = words.next();

    let count = |arg: Option<&str>| match arg {
        None => Ok(DEFAULT_STUDY_ITEMS),
        Some(raw) => raw.parse::<usize>().map_err(|_| raw.to_string()),
    };
    let index = |arg: Option<&str>| {
        arg.and_then(|raw| raw.parse::<usize>().ok())
            .filter(|n| *n >= 1)
            .ok_or_else(|| format!("/{name} needs a session number from /sessions"))
    };

    let command = match name.as_str() {
        "help" | "?" => Command::Help,
        "new" => Command::New,
        "sessions" | "history" => Command::Sessions,
        "open" => index(arg).map_or_else(Command::Invalid, Command::Open),
        "delete" => index(arg).map_or_else(Command::Invalid, Command::Delete),
        "clear" => Command::Clear,
        "retry" => Command::Retry,
        "quiz" | "hardquiz" => match count(arg) {
            Ok(count) => Command::Quiz {
                count,
                hard: name == "hardquiz",
            },
            Err(raw) => Command::Invalid(format!("'{raw}' is not a number")),
        },
        "cards" | "flashcards" => match count(arg) {
            Ok(count) => Command::Cards(count),
            Err(raw) => Command::Invalid(format!("'{raw}' is not a number")),
        },
        "quit" | "exit" => Command::Quit,
        other => Command::Invalid(format!("unknown command /{other}, try /help")),
    };
    Some(command)
}

pub const HELP: &str = "\
/new            start a new chat
/sessions       list saved chats
/open <n>       switch to chat n
/delete <n>     delete chat n
/clear          delete every chat for this subject
/retry          ask the last interrupted question again
/quiz [n]       quiz on this chat
/hardquiz [n]   extra-hard quiz
/cards [n]      flashcards
/quit           leave";
