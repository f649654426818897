use std::borrow::Cow;

/// Reserved sender name for join/leave notices.
pub const SERVER_SENDER: &str = "SERVER";

const TEXT_PREFIX: &str = "TEXT:";
const IMAGE_PREFIX: &str = "IMAGE:";
const QUIT_COMMAND: &str = "/quit";

/// One decoded client line. Decoding never fails; anything without a
/// recognized prefix is carried as `Legacy` so older senders keep working.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Quit,
    Text(String),
    Image(String),
    Legacy(String),
}

impl Inbound {
    pub fn parse(line: &str) -> Self {
        if line == QUIT_COMMAND {
            Inbound::Quit
        } else if let Some(body) = line.strip_prefix(TEXT_PREFIX) {
            Inbound::Text(body.to_string())
        } else if let Some(blob) = line.strip_prefix(IMAGE_PREFIX) {
            Inbound::Image(blob.to_string())
        } else {
            Inbound::Legacy(line.to_string())
        }
    }

    /// The original prefixed body, byte-for-byte. The server relays what it
    /// received and never reformats payloads.
    pub fn wire_body(&self) -> String {
        match self {
            Inbound::Quit => QUIT_COMMAND.to_string(),
            Inbound::Text(body) => format!("{TEXT_PREFIX}{body}"),
            Inbound::Image(blob) => format!("{IMAGE_PREFIX}{blob}"),
            Inbound::Legacy(line) => line.clone(),
        }
    }

    /// Loggable form; image blobs are redacted, never printed.
    pub fn log_summary(&self) -> Cow<'_, str> {
        match self {
            Inbound::Quit => Cow::Borrowed(QUIT_COMMAND),
            Inbound::Text(body) => Cow::Borrowed(body),
            Inbound::Legacy(line) => Cow::Borrowed(line),
            Inbound::Image(blob) => Cow::Owned(format!("[image, {} bytes]", blob.len())),
        }
    }
}

pub fn envelope(sender: &str, timestamp: &str, body: &str) -> String {
    format!("[{sender} {timestamp}]: {body}")
}

pub fn announcement(timestamp: &str, text: &str) -> String {
    envelope(SERVER_SENDER, timestamp, text)
}

pub fn join_notice(name: &str) -> String {
    format!("{name} has joined the chat!")
}

pub fn leave_notice(name: &str) -> String {
    format!("{name} has left the chat!")
}
