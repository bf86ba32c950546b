//! `#name [args]` command parsing.

use clap::{Parser, error::ErrorKind};

/// Prefixes that mark a message for the automation backend.
const FORWARD_PREFIXES: [char; 3] = ['#', '*', '%'];

/// Result of parsing a command that matched by name.
#[derive(Debug)]
pub enum CommandOutcome<T> {
    Parsed(T),
    /// Help output or a parse error, to be sent back to the user as is.
    Reply(String),
}

/// Argument text of `#name`, if `text` is that command.
///
/// `#name` must be the whole text or be followed by a space, so `#admin`
/// does not match `#administrator`.
pub fn command_args<'a>(text: &'a str, name: &str) -> Option<&'a str> {
    let rest = text.trim().strip_prefix('#')?.strip_prefix(name)?;
    if rest.is_empty() {
        Some(rest)
    } else if rest.starts_with(' ') {
        Some(rest.trim())
    } else {
        None
    }
}

/// Parse `#name` arguments into `T`.
///
/// Returns `None` when `text` is not this command.
pub fn parse_command<T: Parser>(text: &str, name: &str) -> Option<CommandOutcome<T>> {
    let args = command_args(text, name)?;
    let words = match shell_words::split(args) {
        Ok(words) => words,
        Err(_) => {
            return Some(CommandOutcome::Reply(format!(
                "could not parse arguments, send `#{name} -h` for help"
            )));
        },
    };
    let argv = std::iter::once(format!("#{name}")).chain(words);
    Some(match T::try_parse_from(argv) {
        Ok(parsed) => CommandOutcome::Parsed(parsed),
        Err(e) => match e.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                CommandOutcome::Reply(e.render().to_string().trim_end().to_string())
            },
            _ => CommandOutcome::Reply(format!(
                "{}\nsend `#{name} -h` for help",
                e.render().to_string().trim_end()
            )),
        },
    })
}

/// Whether `text` should go to the automation backend.
pub fn is_forwardable(text: &str) -> bool {
    text.trim_start().starts_with(FORWARD_PREFIXES)
}
