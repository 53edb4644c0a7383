//! Stdin commands understood in headless mode
//!
//! ```text
//! /join <room>            join a room
//! /leave <room>           leave a room
//! /typing <room>          signal typing activity
//! /status <presence>      online | away | busy | offline
//! /rooms                  reload the room list over HTTP
//! /quit                   log out and exit
//! <room> <text>           send a message
//! ```

use chatwire_core::PresenceStatus;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Join(String),
    Leave(String),
    Typing(String),
    Status(PresenceStatus),
    Rooms,
    Say { room_id: String, text: String },
    Quit,
    Unknown(String),
}

/// Parse one stdin line. Blank lines yield `None`.
pub fn parse_command(line: &str) -> Option<Command> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let (head, rest) = match line.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim()),
        None => (line, ""),
    };

    let command = match (head, rest) {
        ("/quit" | "/q", _) => Command::Quit,
        ("/rooms", _) => Command::Rooms,
        ("/join", room) if !room.is_empty() => Command::Join(room.to_string()),
        ("/leave", room) if !room.is_empty() => Command::Leave(room.to_string()),
        ("/typing", room) if !room.is_empty() => Command::Typing(room.to_string()),
        ("/status", status) => match parse_presence(status) {
            Some(status) => Command::Status(status),
            None => Command::Unknown(line.to_string()),
        },
        (room, text) if !room.starts_with('/') && !text.is_empty() => Command::Say {
            room_id: room.to_string(),
            text: text.to_string(),
        },
        _ => Command::Unknown(line.to_string()),
    };
    Some(command)
}

fn parse_presence(value: &str) -> Option<PresenceStatus> {
    match value.to_ascii_lowercase().as_str() {
        "online" => Some(PresenceStatus::Online),
        "away" => Some(PresenceStatus::Away),
        "busy" => Some(PresenceStatus::Busy),
        "offline" => Some(PresenceStatus::Offline),
        _ => None,
    }
}
