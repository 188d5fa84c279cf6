use parley_session::GenerationMode;
use snafu::{OptionExt, Snafu, ensure};

pub const HELP_TEXT: &str = "\
commands:
  <text>            send text to the current chat
  /new              start a new chat
  /list             list chats
  /switch <n>       select chat number n
  /delete <n>       delete chat number n
  /mode text|image  choose what plain input generates
  /image <prompt>   generate one image regardless of mode
  /model [id]       show or change the text model
  /models           list known models for the provider
  /help             show this help
  /quit             exit";

/// One parsed line of terminal input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Blank line.
    Empty,
    Send(String),
    NewSession,
    List,
    /// 1-based position in the `/list` output.
    Switch(usize),
    /// 1-based position in the `/list` output.
    Delete(usize),
    Mode(GenerationMode),
    Image(String),
    Model(Option<String>),
    Models,
    Help,
    Quit,
}

#[derive(Debug, Snafu, PartialEq, Eq)]
pub enum CommandError {
    #[snafu(display("unknown command `/{name}`, try /help"))]
    UnknownCommand { name: String },
    #[snafu(display("missing argument, usage: {usage}"))]
    MissingArgument { usage: &'static str },
    #[snafu(display("`{raw}` is not a chat number, see /list"))]
    InvalidIndex { raw: String },
    #[snafu(display("unknown mode `{raw}`, expected text or image"))]
    InvalidMode { raw: String },
}

pub fn parse_command(line: &str) -> Result<Command, CommandError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(Command::Empty);
    }

    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Command::Send(line.to_string()));
    };

    let (name, argument) = match rest.split_once(char::is_whitespace) {
        Some((name, argument)) => (name, argument.trim()),
        None => (rest, ""),
    };
    let argument = (!argument.is_empty()).then_some(argument);

    match name {
        "new" => Ok(Command::NewSession),
        "list" | "ls" => Ok(Command::List),
        "switch" => parse_index(argument, "/switch <n>").map(Command::Switch),
        "delete" | "rm" => parse_index(argument, "/delete <n>").map(Command::Delete),
        "mode" => {
            let raw = argument.context(MissingArgumentSnafu {
                usage: "/mode text|image",
            })?;
            match raw.to_ascii_lowercase().as_str() {
                "text" => Ok(Command::Mode(GenerationMode::Text)),
                "image" => Ok(Command::Mode(GenerationMode::Image)),
                _ => InvalidModeSnafu { raw }.fail(),
            }
        }
        "image" => argument
            .map(|prompt| Command::Image(prompt.to_string()))
            .context(MissingArgumentSnafu {
                usage: "/image <prompt>",
            }),
        "model" => Ok(Command::Model(argument.map(str::to_string))),
        "models" => Ok(Command::Models),
        "help" | "?" => Ok(Command::Help),
        "quit" | "exit" | "q" => Ok(Command::Quit),
        _ => UnknownCommandSnafu { name }.fail(),
    }
}

fn parse_index(argument: Option<&str>, usage: &'static str) -> Result<usize, CommandError> {
    let raw = argument.context(MissingArgumentSnafu { usage })?;
    let index = raw
        .parse::<usize>()
        .ok()
        .context(InvalidIndexSnafu { raw })?;
    ensure!(index > 0, InvalidIndexSnafu { raw });
    Ok(index)
}
