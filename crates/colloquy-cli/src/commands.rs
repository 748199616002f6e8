//! Slash commands for interactive mode

/// Result of parsing a slash command
#[derive(Debug, Clone, PartialEq)]
pub enum CommandResult {
    /// Start a new conversation
    New,
    /// Generate another answer to the last question
    Retry,
    /// Resume an answer paused at the tool-call limit
    Continue,
    /// Attach a file to the next message
    Attach(String),
    /// Toggle reasoning output for the next messages
    Think,
    /// Show conversation info
    Info,
    /// Show a message to the user
    Message(String),
    /// Exit the application
    Exit,
    /// Unknown command
    Unknown(String),
}

/// Parse a slash command. Returns `None` for regular input.
pub fn parse_command(input: &str) -> Option<CommandResult> {
    let input = input.trim();
    let rest = input.strip_prefix('/')?;

    let (command, args) = match rest.split_once(' ') {
        Some((command, args)) => (command.to_lowercase(), args.trim()),
        None => (rest.to_lowercase(), ""),
    };

    Some(match command.as_str() {
        "help" | "h" | "?" => CommandResult::Message(help_message()),
        "new" | "clear" | "c" => CommandResult::New,
        "retry" | "r" => CommandResult::Retry,
        "continue" => CommandResult::Continue,
        "attach" | "a" if !args.is_empty() => CommandResult::Attach(args.to_string()),
        "attach" | "a" => CommandResult::Message("Usage: /attach <path>".to_string()),
        "think" | "t" => CommandResult::Think,
        "info" | "i" => CommandResult::Info,
        "quit" | "exit" | "q" => CommandResult::Exit,
        _ => CommandResult::Unknown(command),
    })
}

fn help_message() -> String {
    r#"Available commands:
  /help, /h, /?        Show this help message
  /new, /clear, /c     Start a new conversation
  /retry, /r           Generate another answer to the last question
  /continue            Resume an answer paused at the tool-call limit
  /attach, /a <path>   Attach a file to the next message
  /think, /t           Toggle reasoning for the next messages
  /info, /i            Show conversation info and token usage
  /quit, /exit, /q     Exit colloquy

Press Ctrl-C while an answer streams to stop it."#
        .to_string()
}
