//! Stream control commands sent by clients.
//!
//! The broadcast server itself forwards inbound payloads verbatim and imposes
//! no schema.  The `camcast-server` binary interprets them as control
//! commands using this parser.  Two spellings are accepted:
//!
//! ```text
//! start                      plain text, case-insensitive, surrounding whitespace ignored
//! {"command": "stop"}        JSON object with a `command` field
//! ```

use serde::Deserialize;

/// A command that starts or stops the frame source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    Start,
    Stop,
}

#[derive(Deserialize)]
struct JsonCommand {
    command: String,
}

impl ControlCommand {
    /// Parses a client payload.  Returns `None` for anything that is not a
    /// recognised command.
    pub fn parse(payload: &str) -> Option<Self> {
        let trimmed = payload.trim();
        if trimmed.starts_with('{') {
            let json: JsonCommand = serde_json::from_str(trimmed).ok()?;
            return Self::from_word(&json.command);
        }
        Self::from_word(trimmed)
    }

    fn from_word(word: &str) -> Option<Self> {
        match word.trim().to_ascii_lowercase().as_str() {
            "start" => Some(ControlCommand::Start),
            "stop" => Some(ControlCommand::Stop),
            _ => None,
        }
    }
}
