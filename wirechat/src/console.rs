//! Slash commands typed into the terminal client.

use anyhow::{Result, bail};

pub const HELP: &str = "\
commands:
  /users               list everyone else who is online
  /msg <name|id> TEXT  send TEXT to one participant
  /help                show this help
  /quit                leave the chat";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Users,
    Msg { target: String, text: String },
    Help,
    Quit,
}

impl ConsoleCommand {
    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim();
        let Some(command) = line.strip_prefix('/') else {
            bail!("commands start with '/', try /help");
        };
        let (verb, rest) = command
            .split_once(char::is_whitespace)
            .map(|(verb, rest)| (verb, rest.trim_start()))
            .unwrap_or((command, ""));

        match verb.to_ascii_lowercase().as_str() {
            "users" | "u" | "who" => Ok(Self::Users),
            "help" | "h" | "?" => Ok(Self::Help),
            "quit" | "q" | "exit" => Ok(Self::Quit),
            "msg" | "m" => {
                let Some((target, text)) = rest.split_once(char::is_whitespace) else {
                    bail!("usage: /msg <name|id> TEXT");
                };
                let text = text.trim_start();
                if text.is_empty() {
                    bail!("usage: /msg <name|id> TEXT");
                }
                Ok(Self::Msg {
                    target: target.to_string(),
                    text: text.to_string(),
                })
            }
            other => bail!("unknown command '/{other}', try /help"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_commands_and_aliases() {
        assert_eq!(ConsoleCommand::parse("/users").unwrap(), ConsoleCommand::Users);
        assert_eq!(ConsoleCommand::parse("  /WHO ").unwrap(), ConsoleCommand::Users);
        assert_eq!(ConsoleCommand::parse("/h").unwrap(), ConsoleCommand::Help);
        assert_eq!(ConsoleCommand::parse("/q").unwrap(), ConsoleCommand::Quit);
    }

    #[test]
    fn msg_keeps_text_spacing() {
        assert_eq!(
            ConsoleCommand::parse("/msg bob   hello  there").unwrap(),
            ConsoleCommand::Msg {
                target: "bob".into(),
                text: "hello  there".into(),
            }
        );
    }

    #[test]
    fn rejects_invalid_input() {
        assert!(ConsoleCommand::parse("hello").is_err());
        assert!(ConsoleCommand::parse("/msg bob").is_err());
        assert!(ConsoleCommand::parse("/msg").is_err());
        assert!(ConsoleCommand::parse("/dance").is_err());
    }
}
